//! The SSH transport seam.
//!
//! Everything above this module talks to remote hosts through the
//! [`Connector`] and [`Transport`] traits. [`ssh`](self::ssh) provides the
//! libssh2-backed implementation; tests substitute in-memory fakes.

pub mod auth;
pub mod ssh;

use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::config::PtySize;
use crate::connection::ConnectionRecord;
use crate::errors::{FileError, SshError};

pub use ssh::Ssh2Connector;

/// Opens authenticated transports. Blocking; callers run it on a
/// blocking-capable thread.
pub trait Connector: Send + Sync {
    /// Connect and authenticate using the record's credentials.
    ///
    /// Must fail with [`SshError::NoCredentials`] before any network I/O
    /// when the record has neither a password nor a private key.
    fn connect(&self, record: &ConnectionRecord) -> Result<Arc<dyn Transport>, SshError>;
}

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

/// One authenticated SSH session. All methods block.
pub trait Transport: Send + Sync {
    /// Whether the session still answers. Cheap enough to call on every
    /// pool checkout.
    fn is_connected(&self) -> bool;

    /// Run `command` on a fresh exec channel and capture its output.
    /// A non-zero exit status is not an error.
    fn exec(&self, command: &str) -> Result<CommandOutput, SshError>;

    /// Open an SFTP subsystem channel.
    fn sftp(&self) -> Result<Box<dyn SftpChannel>, SshError>;

    /// Open an interactive shell with a pseudo-terminal.
    fn open_shell(&self, term: &str, size: PtySize) -> Result<Box<dyn ShellChannel>, SshError>;

    /// Tear the session down. Idempotent.
    fn disconnect(&self);
}

/// Attributes of a remote path, as reported without following symlinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteStat {
    pub size: u64,
    /// Full mode bits, when the server reports them.
    pub perm: Option<u32>,
    /// Modification time in seconds since the Unix epoch.
    pub mtime: Option<u64>,
    pub is_dir: bool,
    pub is_symlink: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub stat: RemoteStat,
}

/// An SFTP channel. Paths are absolute remote paths.
pub trait SftpChannel: Send {
    /// Directory entries, excluding `.` and `..`.
    fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, FileError>;
    fn stat(&self, path: &str) -> Result<RemoteStat, FileError>;
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>, FileError>;
    /// Create or truncate `path` for writing.
    fn create(&self, path: &str) -> Result<Box<dyn Write + '_>, FileError>;
    /// Create a single directory level. Fails when the parent is missing.
    fn mkdir(&self, path: &str) -> Result<(), FileError>;
    fn rmdir(&self, path: &str) -> Result<(), FileError>;
    fn unlink(&self, path: &str) -> Result<(), FileError>;
    fn rename(&self, from: &str, to: &str) -> Result<(), FileError>;
}

/// Interactive shell channel with a pty.
pub trait ShellChannel: Send {
    /// Non-blocking read. `WouldBlock` when no output is pending, `Ok(0)`
    /// once the remote side has closed.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    fn resize(&mut self, size: PtySize) -> io::Result<()>;
    /// Send EOF and close. Idempotent.
    fn close(&mut self);
}
