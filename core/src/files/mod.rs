//! SFTP file operations over pooled sessions.
//!
//! Every operation resolves the connection record for the calling user,
//! validates its arguments, then runs as one transaction through
//! [`SshConnectionPool::execute_with_session`]. SFTP failures come back as
//! [`SshError::InvalidArgument`] carrying the underlying message.

pub mod utils;

use std::io::{self, Read, Seek, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::{ConnectionRecord, ConnectionStore};
use crate::errors::{FileError, SshError};
use crate::pool::SshConnectionPool;
use crate::transport::{RemoteStat, SftpChannel, Transport};

use self::utils::{chrono_from_epoch, format_octal_permissions, join_path, owner_access, parent_dir};

/// Request body shared by all file operations. Which fields are required
/// depends on the operation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOperationRequest {
    pub path: Option<String>,
    pub content: Option<String>,
    pub source_path: Option<String>,
    pub target_path: Option<String>,
    pub remote_path: Option<String>,
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub size: u64,
    pub is_directory: bool,
    /// Octal permission string such as `"755"`.
    pub permissions: String,
    /// RFC 3339 modification time, empty when unknown.
    pub modified_time: String,
    pub can_read: bool,
    pub can_write: bool,
    pub can_execute: bool,
}

impl FileEntry {
    fn from_remote(dir: &str, name: String, stat: &RemoteStat) -> Self {
        let mode = stat.perm.unwrap_or(0);
        let (can_read, can_write, can_execute) = owner_access(mode);
        Self {
            path: join_path(dir, &name),
            name,
            entry_type: if stat.is_dir { "directory" } else { "file" }.to_string(),
            size: stat.size,
            is_directory: stat.is_dir,
            permissions: format_octal_permissions(mode),
            modified_time: stat.mtime.map(chrono_from_epoch).unwrap_or_default(),
            can_read,
            can_write,
            can_execute,
        }
    }
}

/// Executes file operations against remote hosts.
pub struct FileManager {
    store: Arc<dyn ConnectionStore>,
    pool: Arc<SshConnectionPool>,
}

impl FileManager {
    pub fn new(store: Arc<dyn ConnectionStore>, pool: Arc<SshConnectionPool>) -> Self {
        Self { store, pool }
    }

    /// List `path`, excluding `.` and `..`.
    pub async fn list(
        &self,
        connection_id: &str,
        user: &str,
        path: &str,
    ) -> Result<Vec<FileEntry>, SshError> {
        let record = self.resolve(connection_id, user).await?;
        let path = required(path, "Directory path must not be empty")?;
        self.run(&record, move |sftp| {
            let entries = sftp
                .read_dir(&path)
                .map_err(|e| SshError::file("Failed to list directory", e))?;
            Ok(entries
                .into_iter()
                .map(|entry| FileEntry::from_remote(&path, entry.name, &entry.stat))
                .collect())
        })
        .await
    }

    /// Read a whole file as text. Invalid UTF-8 is replaced, not rejected.
    pub async fn read(&self, connection_id: &str, user: &str, path: &str) -> Result<String, SshError> {
        let record = self.resolve(connection_id, user).await?;
        let path = required(path, "File path must not be empty")?;
        self.run(&record, move |sftp| {
            let bytes = read_remote(sftp, &path).map_err(|e| SshError::file("Failed to read file", e))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        })
        .await
    }

    /// Overwrite `path` with `content`.
    pub async fn write(
        &self,
        connection_id: &str,
        user: &str,
        path: &str,
        content: &str,
    ) -> Result<(), SshError> {
        let record = self.resolve(connection_id, user).await?;
        let path = required(path, "File path must not be empty")?;
        let content = content.as_bytes().to_vec();
        self.run(&record, move |sftp| {
            put_staged(sftp, &path, &content).map_err(|e| SshError::file("Failed to write file", e))
        })
        .await
    }

    /// Create a single directory. The parent must already exist.
    pub async fn mkdir(&self, connection_id: &str, user: &str, path: &str) -> Result<(), SshError> {
        let record = self.resolve(connection_id, user).await?;
        let path = required(path, "Directory path must not be empty")?;
        self.run(&record, move |sftp| {
            sftp.mkdir(&path)
                .map_err(|e| SshError::file("Failed to create directory", e))
        })
        .await
    }

    /// Delete a file, or a directory and everything below it.
    pub async fn delete(&self, connection_id: &str, user: &str, path: &str) -> Result<(), SshError> {
        let record = self.resolve(connection_id, user).await?;
        let path = required(path, "File or directory path must not be empty")?;
        self.run(&record, move |sftp| {
            delete_path(sftp, &path).map_err(|e| SshError::file("Failed to delete file", e))
        })
        .await
    }

    pub async fn rename(
        &self,
        connection_id: &str,
        user: &str,
        source_path: &str,
        target_path: &str,
    ) -> Result<(), SshError> {
        let record = self.resolve(connection_id, user).await?;
        let source = required(source_path, "Source path must not be empty")?;
        let target = required(target_path, "Target path must not be empty")?;
        self.run(&record, move |sftp| {
            sftp.rename(&source, &target)
                .map_err(|e| SshError::file("Failed to rename file", e))
        })
        .await
    }

    /// Write `content` to `path`, creating any missing parent directories.
    pub async fn upload(
        &self,
        connection_id: &str,
        user: &str,
        path: &str,
        content: Vec<u8>,
    ) -> Result<(), SshError> {
        let record = self.resolve(connection_id, user).await?;
        let path = required(path, "File path must not be empty")?;
        self.run(&record, move |sftp| {
            create_dirs(sftp, parent_dir(&path))
                .and_then(|()| put_staged(sftp, &path, &content))
                .map_err(|e| SshError::file("Failed to upload file", e))
        })
        .await
    }

    /// Fetch the raw bytes of `path`.
    pub async fn download(
        &self,
        connection_id: &str,
        user: &str,
        path: &str,
    ) -> Result<Vec<u8>, SshError> {
        let record = self.resolve(connection_id, user).await?;
        let path = required(path, "File path must not be empty")?;
        self.run(&record, move |sftp| {
            get_staged(sftp, &path).map_err(|e| SshError::file("Failed to download file", e))
        })
        .await
    }

    async fn resolve(&self, connection_id: &str, user: &str) -> Result<ConnectionRecord, SshError> {
        self.store.resolve(connection_id, Some(user)).await
    }

    /// Run `op` on a fresh SFTP channel of a pooled session for `record`.
    async fn run<T, F>(&self, record: &ConnectionRecord, op: F) -> Result<T, SshError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SftpChannel) -> Result<T, SshError> + Send + 'static,
    {
        self.pool
            .execute_with_session(record, move |transport: &dyn Transport| {
                let sftp = transport.sftp()?;
                op(sftp.as_ref())
            })
            .await
    }
}

fn required(value: &str, message: &str) -> Result<String, SshError> {
    if value.trim().is_empty() {
        Err(SshError::InvalidArgument(message.to_string()))
    } else {
        Ok(value.to_string())
    }
}

fn read_remote(sftp: &dyn SftpChannel, path: &str) -> Result<Vec<u8>, FileError> {
    let mut reader = sftp.open(path)?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Stage `content` in a local temporary file, then stream it to `path`.
/// The temporary file is removed when it goes out of scope.
fn put_staged(sftp: &dyn SftpChannel, path: &str, content: &[u8]) -> Result<(), FileError> {
    let mut staged = tempfile::NamedTempFile::new()?;
    staged.write_all(content)?;
    staged.flush()?;
    staged.rewind()?;

    let mut remote = sftp.create(path)?;
    io::copy(staged.as_file_mut(), &mut remote)?;
    remote.flush()?;
    Ok(())
}

/// Stream `path` into a local temporary file and read it back.
fn get_staged(sftp: &dyn SftpChannel, path: &str) -> Result<Vec<u8>, FileError> {
    let mut staged = tempfile::NamedTempFile::new()?;
    {
        let mut remote = sftp.open(path)?;
        io::copy(&mut remote, staged.as_file_mut())?;
    }
    staged.rewind()?;
    let mut bytes = Vec::new();
    staged.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn delete_path(sftp: &dyn SftpChannel, path: &str) -> Result<(), FileError> {
    let stat = sftp.stat(path)?;
    if stat.is_dir && !stat.is_symlink {
        delete_tree(sftp, path)
    } else {
        sftp.unlink(path)
    }
}

/// Depth-first delete. Entries that disappear while we walk are skipped.
fn delete_tree(sftp: &dyn SftpChannel, dir: &str) -> Result<(), FileError> {
    for entry in sftp.read_dir(dir)? {
        let child = join_path(dir, &entry.name);
        let result = if entry.stat.is_dir && !entry.stat.is_symlink {
            delete_tree(sftp, &child)
        } else {
            sftp.unlink(&child)
        };
        match result {
            Err(e) if e.is_not_found() => debug!("{child} vanished during delete, skipping"),
            other => other?,
        }
    }
    sftp.rmdir(dir)
}

/// Create `dir` and any missing ancestors.
fn create_dirs(sftp: &dyn SftpChannel, dir: &str) -> Result<(), FileError> {
    if dir.is_empty() || dir == "/" {
        return Ok(());
    }
    match sftp.stat(dir) {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            create_dirs(sftp, parent_dir(dir))?;
            debug!("Creating missing directory {dir}");
            sftp.mkdir(dir)
        }
        Err(e) => Err(e),
    }
}
