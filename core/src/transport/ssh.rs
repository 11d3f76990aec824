//! libssh2-backed [`Connector`] and [`Transport`].
//!
//! Every blocking libssh2 call is bounded by the session timeout: the
//! connect timeout during handshake and authentication, the exec-open
//! timeout while an exec channel is being opened, and the I/O timeout for
//! everything after that.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ssh2::{Channel, Session, Sftp};
use tracing::{debug, warn};

use super::auth::{prepare_key, PreparedKey};
use super::{
    CommandOutput, Connector, RemoteEntry, RemoteStat, SftpChannel, ShellChannel, Transport,
};
use crate::config::{PtySize, TransportTimeouts};
use crate::connection::{AuthChoice, ConnectionRecord};
use crate::errors::{FileError, SshError};

/// Interval between keepalive probes on an idle session.
const KEEPALIVE_INTERVAL_SECS: u32 = 30;

/// Connects with `ssh2` over a plain TCP stream.
#[derive(Debug, Clone, Default)]
pub struct Ssh2Connector {
    timeouts: TransportTimeouts,
}

impl Ssh2Connector {
    pub fn new(timeouts: TransportTimeouts) -> Self {
        Self { timeouts }
    }
}

impl Connector for Ssh2Connector {
    fn connect(&self, record: &ConnectionRecord) -> Result<Arc<dyn Transport>, SshError> {
        let choice = record.auth_choice().ok_or(SshError::NoCredentials)?;

        let tcp = open_tcp(record, self.timeouts.connect)?;
        let mut session = Session::new().map_err(transport_err("Session init failed"))?;
        session.set_timeout(millis(self.timeouts.connect));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(transport_err("Handshake failed"))?;

        authenticate(&session, &record.username, choice)?;

        session.set_keepalive(true, KEEPALIVE_INTERVAL_SECS);
        session.set_timeout(millis(self.timeouts.io));
        debug!("Authenticated SSH session to {}", record.address());

        Ok(Arc::new(Ssh2Transport {
            session,
            channel_lock: Mutex::new(()),
            connected: AtomicBool::new(true),
            timeouts: self.timeouts,
        }))
    }
}

fn open_tcp(record: &ConnectionRecord, timeout: Duration) -> Result<TcpStream, SshError> {
    let addrs = (record.host.as_str(), record.port)
        .to_socket_addrs()
        .map_err(|e| SshError::Transport(format!("Cannot resolve {}: {e}", record.address())))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(tcp) => return Ok(tcp),
            Err(e) => last_err = Some(e),
        }
    }
    Err(SshError::Transport(match last_err {
        Some(e) => format!("Connection to {} failed: {e}", record.address()),
        None => format!("No addresses for {}", record.address()),
    }))
}

fn authenticate(session: &Session, username: &str, choice: AuthChoice<'_>) -> Result<(), SshError> {
    let auth_err = |e: ssh2::Error| SshError::AuthenticationFailed(e.message().to_string());
    match choice {
        AuthChoice::Password(password) => {
            session
                .userauth_password(username, password)
                .map_err(auth_err)?;
        }
        AuthChoice::PrivateKey { key, passphrase } => match prepare_key(key, passphrase)? {
            PreparedKey::Original => {
                session
                    .userauth_pubkey_memory(username, None, key, passphrase)
                    .map_err(auth_err)?;
            }
            PreparedKey::ConvertedPem(pem) => {
                session
                    .userauth_pubkey_memory(username, None, &pem, None)
                    .map_err(auth_err)?;
            }
        },
    }

    if !session.authenticated() {
        return Err(SshError::AuthenticationFailed(
            "Server did not accept the credentials".to_string(),
        ));
    }
    Ok(())
}

fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

fn transport_err(context: &'static str) -> impl Fn(ssh2::Error) -> SshError {
    move |e| SshError::Transport(format!("{context}: {e}"))
}

/// One authenticated libssh2 session.
pub struct Ssh2Transport {
    session: Session,
    /// Serializes channel opening on this session.
    channel_lock: Mutex<()>,
    connected: AtomicBool,
    timeouts: TransportTimeouts,
}

// ssh2 handles wrap raw libssh2 pointers; every call through them goes
// through the library's own session lock or `channel_lock`.
unsafe impl Send for Ssh2Transport {}
unsafe impl Sync for Ssh2Transport {}

impl Ssh2Transport {
    /// Open an exec channel and start `command` under the exec-open
    /// deadline. The channel lock is released before output is read.
    fn open_exec(&self, command: &str) -> Result<Channel, SshError> {
        let _guard = self
            .channel_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        self.session.set_timeout(millis(self.timeouts.exec_open));
        let opened = self.session.channel_session().and_then(|mut channel| {
            channel.exec(command)?;
            Ok(channel)
        });
        self.session.set_timeout(millis(self.timeouts.io));
        opened.map_err(transport_err("Exec channel failed"))
    }
}

impl Transport for Ssh2Transport {
    fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        let _guard = self
            .channel_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match self.session.keepalive_send() {
            Ok(_) => true,
            Err(e) => {
                debug!("Keepalive failed, marking session disconnected: {e}");
                self.connected.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        let mut channel = self.open_exec(command)?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| SshError::Transport(format!("Reading command output failed: {e}")))?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|e| SshError::Transport(format!("Reading command stderr failed: {e}")))?;

        channel.wait_close().ok();
        let exit_status = channel.exit_status().unwrap_or(-1);

        if exit_status != 0 || !stderr.trim().is_empty() {
            debug!(
                "Command `{command}` exited with {exit_status}: {}",
                stderr.trim()
            );
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_status,
        })
    }

    fn sftp(&self) -> Result<Box<dyn SftpChannel>, SshError> {
        let _guard = self
            .channel_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let sftp = self
            .session
            .sftp()
            .map_err(transport_err("SFTP channel failed"))?;
        Ok(Box::new(Ssh2Sftp { sftp }))
    }

    fn open_shell(&self, term: &str, size: PtySize) -> Result<Box<dyn ShellChannel>, SshError> {
        let _guard = self
            .channel_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut channel = self
            .session
            .channel_session()
            .map_err(transport_err("Shell channel failed"))?;
        channel
            .request_pty(term, None, Some((size.cols, size.rows, 0, 0)))
            .map_err(transport_err("PTY request failed"))?;
        channel
            .shell()
            .map_err(transport_err("Shell request failed"))?;

        // Shell sessions are never pooled, so the session can be switched
        // to non-blocking reads for the relay loop.
        self.session.set_blocking(false);

        Ok(Box::new(Ssh2Shell {
            session: self.session.clone(),
            channel,
            closed: false,
        }))
    }

    fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.session.set_blocking(true);
        if let Err(e) = self.session.disconnect(None, "closing", None) {
            debug!("SSH disconnect returned an error: {e}");
        }
    }
}

struct Ssh2Sftp {
    sftp: Sftp,
}

// See `Ssh2Transport`.
unsafe impl Send for Ssh2Sftp {}

impl SftpChannel for Ssh2Sftp {
    fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, FileError> {
        let entries = self
            .sftp
            .readdir(Path::new(path))
            .map_err(|e| map_sftp_error(e, path))?;
        Ok(entries
            .into_iter()
            .filter_map(|(entry_path, stat)| {
                let name = entry_path.file_name()?.to_string_lossy().to_string();
                if name == "." || name == ".." {
                    return None;
                }
                Some(RemoteEntry {
                    name,
                    stat: remote_stat(&stat),
                })
            })
            .collect())
    }

    fn stat(&self, path: &str) -> Result<RemoteStat, FileError> {
        self.sftp
            .lstat(Path::new(path))
            .map(|stat| remote_stat(&stat))
            .map_err(|e| map_sftp_error(e, path))
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>, FileError> {
        let file = self
            .sftp
            .open(Path::new(path))
            .map_err(|e| map_sftp_error(e, path))?;
        Ok(Box::new(file))
    }

    fn create(&self, path: &str) -> Result<Box<dyn Write + '_>, FileError> {
        let file = self
            .sftp
            .create(Path::new(path))
            .map_err(|e| map_sftp_error(e, path))?;
        Ok(Box::new(file))
    }

    fn mkdir(&self, path: &str) -> Result<(), FileError> {
        self.sftp
            .mkdir(Path::new(path), 0o755)
            .map_err(|e| map_sftp_error(e, path))
    }

    fn rmdir(&self, path: &str) -> Result<(), FileError> {
        self.sftp
            .rmdir(Path::new(path))
            .map_err(|e| map_sftp_error(e, path))
    }

    fn unlink(&self, path: &str) -> Result<(), FileError> {
        self.sftp
            .unlink(Path::new(path))
            .map_err(|e| map_sftp_error(e, path))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), FileError> {
        self.sftp
            .rename(Path::new(from), Path::new(to), None)
            .map_err(|e| map_sftp_error(e, from))
    }
}

fn remote_stat(stat: &ssh2::FileStat) -> RemoteStat {
    let file_type = stat.file_type();
    RemoteStat {
        size: stat.size.unwrap_or(0),
        perm: stat.perm,
        mtime: stat.mtime,
        is_dir: file_type.is_dir(),
        is_symlink: file_type.is_symlink(),
    }
}

fn map_sftp_error(e: ssh2::Error, path: &str) -> FileError {
    // SSH_FX_NO_SUCH_FILE = 2, SSH_FX_PERMISSION_DENIED = 3
    match e.code() {
        ssh2::ErrorCode::SFTP(2) => FileError::NotFound(path.to_string()),
        ssh2::ErrorCode::SFTP(3) => FileError::PermissionDenied(path.to_string()),
        _ => FileError::OperationFailed(format!("{path}: {}", e.message())),
    }
}

struct Ssh2Shell {
    session: Session,
    channel: Channel,
    closed: bool,
}

// See `Ssh2Transport`.
unsafe impl Send for Ssh2Shell {}

impl Ssh2Shell {
    /// Run `f` with the session in blocking mode, restoring non-blocking
    /// reads afterwards.
    fn blocking<T>(&mut self, f: impl FnOnce(&mut Channel) -> T) -> T {
        self.session.set_blocking(true);
        let result = f(&mut self.channel);
        self.session.set_blocking(false);
        result
    }
}

impl ShellChannel for Ssh2Shell {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.blocking(|channel| {
            channel.write_all(data)?;
            channel.flush()
        })
    }

    fn resize(&mut self, size: PtySize) -> io::Result<()> {
        self.blocking(|channel| {
            channel
                .request_pty_size(size.cols, size.rows, None, None)
                .map_err(io::Error::from)
        })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.session.set_blocking(true);
        if let Err(e) = self.channel.send_eof() {
            warn!("Failed to send EOF to shell channel: {e}");
        }
        let _ = self.channel.close();
    }
}
