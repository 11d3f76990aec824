//! Bounded pool of reusable authenticated SSH sessions.
//!
//! Sessions are cached per [`ConnectionIdentity`]. Admission is controlled
//! by a counting semaphore sized to the maximum number of outstanding
//! checkouts. A permit is owned by the [`SessionCheckout`] it was acquired
//! for and returns to the semaphore when the checkout is dropped, so
//! eviction, explicit close and idle sweeps never touch the permit count.
//!
//! Each identity has its own slot lock. Creating or revalidating a session
//! happens under that lock, so concurrent first checkouts for one identity
//! authenticate once and then share the cached session.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::connection::{ConnectionIdentity, ConnectionRecord};
use crate::errors::SshError;
use crate::transport::{Connector, Transport};

/// A cached session and when it was last checked out.
struct PooledSession {
    transport: Arc<dyn Transport>,
    last_used: Instant,
}

type Slot = Arc<tokio::sync::Mutex<Option<PooledSession>>>;

/// A session checked out of the pool. Dropping it releases the capacity
/// permit; the session itself stays cached.
pub struct SessionCheckout {
    identity: ConnectionIdentity,
    transport: Arc<dyn Transport>,
    _permit: OwnedSemaphorePermit,
}

// Credentials stay out of log output; the identity only carries a hash.
impl fmt::Debug for SessionCheckout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCheckout")
            .field("identity", &self.identity.to_string())
            .finish_non_exhaustive()
    }
}

impl SessionCheckout {
    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total_connections: usize,
    pub active_connections: usize,
    pub available_permits: usize,
    pub last_cleanup_time: Option<DateTime<Utc>>,
}

pub struct SshConnectionPool {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    sessions: Mutex<HashMap<ConnectionIdentity, Slot>>,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
}

impl SshConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        let capacity = config.max_sessions.max(1);
        Self {
            connector,
            config,
            permits: Arc::new(Semaphore::new(capacity)),
            sessions: Mutex::new(HashMap::new()),
            last_cleanup: Mutex::new(None),
        }
    }

    /// Permits not currently held by a checkout.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Check out a session for `record`, reusing the cached one when it is
    /// still connected.
    ///
    /// Waits up to the acquire timeout for a permit and fails with
    /// [`SshError::PoolExhausted`] otherwise.
    pub async fn acquire(&self, record: &ConnectionRecord) -> Result<SessionCheckout, SshError> {
        let timeout = self.config.acquire_timeout();
        let permit = match tokio::time::timeout(timeout, self.permits.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                warn!("Pool exhausted waiting for {}", record.identity());
                return Err(SshError::PoolExhausted(timeout));
            }
        };

        let identity = record.identity();
        loop {
            let slot = self.slot(&identity);
            let mut cached = slot.lock().await;
            // The slot may have been swept or closed while we waited on it.
            if !self.is_current_slot(&identity, &slot) {
                continue;
            }

            if let Some(pooled) = cached.as_mut() {
                let transport = pooled.transport.clone();
                if is_connected(transport.clone()).await {
                    pooled.last_used = Instant::now();
                    debug!("Reusing pooled session for {identity}");
                    return Ok(SessionCheckout {
                        identity,
                        transport,
                        _permit: permit,
                    });
                }
                info!("Pooled session for {identity} is disconnected, replacing it");
                if let Some(stale) = cached.take() {
                    disconnect_all(vec![stale.transport]).await;
                }
            }

            if record.auth_choice().is_none() {
                return Err(SshError::NoCredentials);
            }

            let transport = self.connect(record).await?;
            *cached = Some(PooledSession {
                transport: transport.clone(),
                last_used: Instant::now(),
            });
            info!("Created pooled session for {identity}");
            return Ok(SessionCheckout {
                identity,
                transport,
                _permit: permit,
            });
        }
    }

    /// Run a blocking `operation` against a checked-out session.
    ///
    /// If the operation fails, the session it ran on is evicted and
    /// disconnected before the error is returned unchanged.
    ///
    /// The checkout moves into the blocking task, so its permit is released
    /// only once `operation` has returned, even if this future is dropped
    /// while the operation is still running.
    pub async fn execute_with_session<T, F>(
        &self,
        record: &ConnectionRecord,
        operation: F,
    ) -> Result<T, SshError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Transport) -> Result<T, SshError> + Send + 'static,
    {
        let checkout = self.acquire(record).await?;
        let identity = checkout.identity().clone();
        let transport = checkout.transport().clone();
        let result = tokio::task::spawn_blocking(move || {
            let result = operation(checkout.transport().as_ref());
            drop(checkout);
            result
        })
        .await
        .unwrap_or_else(|e| Err(SshError::Transport(format!("Pooled operation aborted: {e}"))));

        if let Err(e) = &result {
            debug!("Operation on {identity} failed, evicting session: {e}");
            self.evict(&identity, &transport).await;
        }
        result
    }

    /// Remove and disconnect the cached session for `identity`. Returns
    /// whether an entry was removed.
    pub async fn close_session(&self, identity: &ConnectionIdentity) -> bool {
        let slot = self.lock_sessions().remove(identity);
        let Some(slot) = slot else {
            return false;
        };
        let removed = slot.lock().await.take();
        match removed {
            Some(pooled) => {
                info!("Closed pooled session for {identity}");
                disconnect_all(vec![pooled.transport]).await;
                true
            }
            None => false,
        }
    }

    /// Disconnect every cached session.
    pub async fn close_all(&self) {
        let identities: Vec<ConnectionIdentity> = self.lock_sessions().keys().cloned().collect();
        for identity in identities {
            self.close_session(&identity).await;
        }
    }

    /// Disconnect and drop every cached session idle for at least
    /// `max_idle`. Slots busy creating a session are skipped. Returns the
    /// number of sessions removed.
    pub async fn sweep_idle_sessions(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        let remaining = {
            let mut sessions = self.lock_sessions();
            sessions.retain(|identity, slot| {
                let Ok(mut cached) = slot.try_lock() else {
                    return true;
                };
                let idle = match cached.as_ref() {
                    Some(pooled) => now.duration_since(pooled.last_used),
                    None => return false,
                };
                if idle < max_idle {
                    return true;
                }
                debug!("Sweeping idle session for {identity}");
                if let Some(pooled) = cached.take() {
                    expired.push(pooled.transport);
                }
                false
            });
            sessions.len()
        };

        let removed = expired.len();
        disconnect_all(expired).await;
        *self
            .last_cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        info!("Idle sweep removed {removed} sessions, {remaining} remaining");
        removed
    }

    pub async fn stats(&self) -> PoolStats {
        let transports: Vec<Arc<dyn Transport>> = {
            let sessions = self.lock_sessions();
            sessions
                .values()
                .filter_map(|slot| {
                    slot.try_lock()
                        .ok()
                        .and_then(|cached| cached.as_ref().map(|p| p.transport.clone()))
                })
                .collect()
        };
        let total_connections = transports.len();
        let active_connections = tokio::task::spawn_blocking(move || {
            transports.iter().filter(|t| t.is_connected()).count()
        })
        .await
        .unwrap_or(0);

        PoolStats {
            total_connections,
            active_connections,
            available_permits: self.available_permits(),
            last_cleanup_time: *self
                .last_cleanup
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Run the idle sweep every `sweep_interval` until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let period = pool.config.sweep_interval();
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Pool sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        pool.sweep_idle_sessions(pool.config.idle_timeout()).await;
                    }
                }
            }
        })
    }

    async fn connect(&self, record: &ConnectionRecord) -> Result<Arc<dyn Transport>, SshError> {
        let connector = self.connector.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || connector.connect(&record))
            .await
            .unwrap_or_else(|e| Err(SshError::Transport(format!("Connect task aborted: {e}"))))
    }

    /// Evict the cached session for `identity`, but only if it is still
    /// `transport`; a replacement created meanwhile is left alone.
    async fn evict(&self, identity: &ConnectionIdentity, transport: &Arc<dyn Transport>) {
        let slot = self.lock_sessions().get(identity).cloned();
        if let Some(slot) = slot {
            let mut cached = slot.lock().await;
            let matches = cached
                .as_ref()
                .is_some_and(|p| same_transport(&p.transport, transport));
            if matches {
                cached.take();
                drop(cached);
                let mut sessions = self.lock_sessions();
                if sessions.get(identity).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                    sessions.remove(identity);
                }
            }
        }
        disconnect_all(vec![transport.clone()]).await;
    }

    fn slot(&self, identity: &ConnectionIdentity) -> Slot {
        self.lock_sessions()
            .entry(identity.clone())
            .or_default()
            .clone()
    }

    fn is_current_slot(&self, identity: &ConnectionIdentity, slot: &Slot) -> bool {
        self.lock_sessions()
            .get(identity)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionIdentity, Slot>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn same_transport(a: &Arc<dyn Transport>, b: &Arc<dyn Transport>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

async fn is_connected(transport: Arc<dyn Transport>) -> bool {
    tokio::task::spawn_blocking(move || transport.is_connected())
        .await
        .unwrap_or(false)
}

async fn disconnect_all(transports: Vec<Arc<dyn Transport>>) {
    if transports.is_empty() {
        return;
    }
    let result = tokio::task::spawn_blocking(move || {
        for transport in transports {
            transport.disconnect();
        }
    })
    .await;
    if let Err(e) = result {
        warn!("Disconnect task failed: {e}");
    }
}
