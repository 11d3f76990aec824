//! Error types for the webshell core crate.
//!
//! [`SshError`] is the taxonomy every public operation reports. The server
//! maps each variant to an HTTP status or to a single error text frame on
//! a WebSocket. [`FileError`] classifies SFTP failures before the file
//! engine folds them into [`SshError::InvalidArgument`].

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the pool, the terminal bridge, the file engine and
/// the resource monitor.
#[derive(Error, Debug)]
pub enum SshError {
    /// The connection record does not exist.
    #[error("Connection not found: {0}")]
    NotFound(String),

    /// The connection record exists but belongs to another user.
    #[error("Access denied to connection: {0}")]
    Forbidden(String),

    /// A required field is missing or an SFTP operation failed.
    #[error("{0}")]
    InvalidArgument(String),

    /// No capacity permit became available within the acquire timeout.
    #[error("Timed out after {}ms waiting for a pooled SSH session", .0.as_millis())]
    PoolExhausted(Duration),

    /// The record carries neither a password nor a private key.
    #[error("SSH connection requires a password or a private key")]
    NoCredentials,

    /// The remote host rejected the credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Connect, handshake or channel-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A low-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SshError {
    /// Wrap an SFTP failure with a short description of the operation.
    pub fn file(context: &str, err: FileError) -> Self {
        SshError::InvalidArgument(format!("{context}: {err}"))
    }
}

/// Errors reported by an SFTP channel.
#[derive(Error, Debug)]
pub enum FileError {
    /// The requested file or directory was not found.
    #[error("File not found: {0}")]
    NotFound(String),

    /// Permission was denied for the requested operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Any other SFTP failure.
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// A low-level I/O error while streaming file content.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileError {
    pub fn is_not_found(&self) -> bool {
        match self {
            FileError::NotFound(_) => true,
            FileError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// The client-facing channel is closed and can no longer carry frames.
#[derive(Error, Debug)]
#[error("Client channel closed: {0}")]
pub struct ChannelError(pub String);
