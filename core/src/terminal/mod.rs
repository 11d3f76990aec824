//! Interactive terminal bridge.
//!
//! Each client channel gets its own dedicated (never pooled) SSH session
//! with a pty shell. A reader thread per session relays shell output to the
//! client; inbound frames are either resize requests or keystrokes.

pub mod frame;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channel::ClientChannel;
use crate::config::TerminalConfig;
use crate::connection::ConnectionStore;
use crate::errors::SshError;
use crate::transport::{Connector, ShellChannel, Transport};

use self::frame::{parse_frame, InboundFrame, Utf8Decoder};

/// Idle wait between non-blocking reads with no pending output.
const READ_IDLE_SLEEP: Duration = Duration::from_millis(10);

const READ_BUFFER_SIZE: usize = 4096;

type SessionMap = Arc<Mutex<HashMap<String, Arc<TerminalSession>>>>;

/// One live terminal: transport, shell and the client it feeds.
struct TerminalSession {
    channel_id: String,
    transport: Arc<dyn Transport>,
    shell: Mutex<Box<dyn ShellChannel>>,
    client: Arc<dyn ClientChannel>,
    closed: AtomicBool,
}

impl TerminalSession {
    /// Close the shell and the transport. Only the first call does work.
    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shell
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
        self.transport.disconnect();
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Routes client terminal channels to dedicated SSH shells.
pub struct TerminalBridge {
    store: Arc<dyn ConnectionStore>,
    connector: Arc<dyn Connector>,
    config: TerminalConfig,
    sessions: SessionMap,
}

impl TerminalBridge {
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        connector: Arc<dyn Connector>,
        config: TerminalConfig,
    ) -> Self {
        Self {
            store,
            connector,
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of live terminal sessions.
    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Whether a session is registered for `channel_id`.
    pub fn has_session(&self, channel_id: &str) -> bool {
        lock(&self.sessions).contains_key(channel_id)
    }

    /// Open a shell for a newly connected client channel.
    ///
    /// Failures are reported to the client as a single text frame followed
    /// by closing the channel; they are also returned for logging.
    pub async fn open(
        &self,
        client: Arc<dyn ClientChannel>,
        connection_id: &str,
        user: Option<&str>,
    ) -> Result<(), SshError> {
        let record = match self.store.resolve(connection_id, user).await {
            Ok(record) => record,
            Err(e) => {
                report_and_close(client.as_ref(), &format!("Error: {e}"));
                return Err(e);
            }
        };

        let connector = self.connector.clone();
        let term = self.config.term.clone();
        let size = self.config.size;
        let connected = tokio::task::spawn_blocking(move || {
            let transport = connector.connect(&record)?;
            match transport.open_shell(&term, size) {
                Ok(shell) => Ok((transport, shell)),
                Err(e) => {
                    transport.disconnect();
                    Err(e)
                }
            }
        })
        .await
        .unwrap_or_else(|e| Err(SshError::Transport(format!("Connect task aborted: {e}"))));

        let (transport, shell) = match connected {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Terminal connect for {connection_id} failed: {e}");
                report_and_close(client.as_ref(), &format!("SSH Connection Failed: {e}"));
                return Err(e);
            }
        };

        let channel_id = client.id().to_string();
        let session = Arc::new(TerminalSession {
            channel_id: channel_id.clone(),
            transport,
            shell: Mutex::new(shell),
            client,
            closed: AtomicBool::new(false),
        });

        let replaced = lock(&self.sessions).insert(channel_id.clone(), session.clone());
        if let Some(old) = replaced {
            debug!("Replacing terminal session for channel {channel_id}");
            tokio::task::spawn_blocking(move || old.shutdown());
        }
        info!("Terminal session {channel_id} established for connection {connection_id}");

        if let Err(e) = spawn_reader(self.sessions.clone(), session.clone()) {
            warn!("Failed to spawn terminal reader for {channel_id}: {e}");
            report_and_close(session.client.as_ref(), &format!("Error: {e}"));
            self.close(&channel_id).await;
            return Err(SshError::Io(e));
        }

        // The client may have gone away while we were connecting.
        if !session.client.is_open() {
            self.close(&channel_id).await;
        }
        Ok(())
    }

    /// Handle one inbound text frame from the client.
    pub async fn handle_message(&self, channel_id: &str, text: &str) -> Result<(), SshError> {
        let Some(session) = lock(&self.sessions).get(channel_id).cloned() else {
            debug!("Dropping frame for unknown terminal channel {channel_id}");
            return Ok(());
        };

        let action = match parse_frame(text) {
            InboundFrame::Ignored => return Ok(()),
            InboundFrame::Resize(size) => Action::Resize(size),
            InboundFrame::Input(input) => Action::Write(input.as_bytes().to_vec()),
        };

        let worker = session.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut shell = worker.shell.lock().unwrap_or_else(PoisonError::into_inner);
            match action {
                Action::Resize(size) => shell.resize(size),
                Action::Write(bytes) => shell.write_all(&bytes),
            }
        })
        .await
        .unwrap_or_else(|e| Err(std::io::Error::new(ErrorKind::Other, e.to_string())));

        if let Err(e) = result {
            warn!("Terminal {channel_id} input failed: {e}");
            self.close(channel_id).await;
            return Err(SshError::Io(e));
        }
        Ok(())
    }

    /// Tear down the session bound to `channel_id`. Safe to call any
    /// number of times.
    pub async fn close(&self, channel_id: &str) {
        let removed = lock(&self.sessions).remove(channel_id);
        if let Some(session) = removed {
            let _ = tokio::task::spawn_blocking(move || {
                if session.shutdown() {
                    info!("Terminal session {} closed", session.channel_id);
                }
            })
            .await;
        }
    }

    /// Close every terminal session and its client channel.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<TerminalSession>> =
            lock(&self.sessions).drain().map(|(_, s)| s).collect();
        let _ = tokio::task::spawn_blocking(move || {
            for session in sessions {
                session.shutdown();
                session.client.close();
            }
        })
        .await;
    }
}

enum Action {
    Resize(crate::config::PtySize),
    Write(Vec<u8>),
}

fn lock(sessions: &SessionMap) -> std::sync::MutexGuard<'_, HashMap<String, Arc<TerminalSession>>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

fn report_and_close(client: &dyn ClientChannel, message: &str) {
    if client.is_open() {
        if let Err(e) = client.send(message) {
            debug!("Could not report error to client: {e}");
        }
    }
    client.close();
}

/// Relay shell output to the client until either side goes away, then
/// clean up.
fn spawn_reader(sessions: SessionMap, session: Arc<TerminalSession>) -> std::io::Result<()> {
    let name = format!("terminal-{}", session.channel_id);
    std::thread::Builder::new().name(name).spawn(move || {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut decoder = Utf8Decoder::default();
        while !session.is_closed() {
            let result = session
                .shell
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .read(&mut buf);
            match result {
                Ok(0) => {
                    debug!("Shell for {} reached EOF", session.channel_id);
                    break;
                }
                Ok(n) => {
                    let text = decoder.decode(&buf[..n]);
                    if text.is_empty() {
                        continue;
                    }
                    if let Err(e) = session.client.send(&text) {
                        debug!("Terminal {} output dropped: {e}", session.channel_id);
                        break;
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(READ_IDLE_SLEEP);
                }
                Err(e) => {
                    warn!("Shell read for {} failed: {e}", session.channel_id);
                    break;
                }
            }
        }

        {
            let mut map = lock(&sessions);
            if map
                .get(&session.channel_id)
                .is_some_and(|current| Arc::ptr_eq(current, &session))
            {
                map.remove(&session.channel_id);
            }
        }
        if session.shutdown() {
            info!("Terminal session {} ended", session.channel_id);
        }
        session.client.close();
    })?;
    Ok(())
}
