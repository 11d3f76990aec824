//! Resource monitoring: periodic snapshots of a remote host streamed to a
//! client channel.
//!
//! Each subscription owns a background tokio task that ticks at the
//! configured interval, checks out a pooled session for the duration of one
//! probe battery, and pushes the serialized [`ResourceSnapshot`] to the
//! subscriber. Subscriptions are keyed by connection id; subscribing again
//! to the same id replaces the previous subscription.

pub mod collector;
pub mod parser;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::ClientChannel;
use crate::config::MonitorConfig;
use crate::connection::ConnectionStore;
use crate::errors::SshError;
use crate::pool::SshConnectionPool;

pub use self::collector::collect_snapshot;
pub use self::types::{DiskMount, NetworkInterface, ResourceSnapshot};

/// Manages active monitor subscriptions.
pub struct ResourceMonitor {
    store: Arc<dyn ConnectionStore>,
    pool: Arc<SshConnectionPool>,
    config: MonitorConfig,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

/// An active subscription and the channel it streams to.
struct Subscription {
    channel_id: String,
    cancel: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl Subscription {
    fn stop(self) {
        self.cancel.cancel();
        self.join_handle.abort();
    }
}

impl ResourceMonitor {
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        pool: Arc<SshConnectionPool>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            pool,
            config,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Start streaming snapshots of `connection_id` to `client`.
    ///
    /// The connection is resolved up front; on failure the client gets an
    /// `Error: <message>` frame and is closed. An existing subscription for
    /// the same connection id is cancelled and replaced.
    pub async fn subscribe(
        &self,
        client: Arc<dyn ClientChannel>,
        connection_id: &str,
        user: Option<String>,
    ) -> Result<(), SshError> {
        if let Err(e) = self.store.resolve(connection_id, user.as_deref()).await {
            warn!("Monitor subscription for {connection_id} rejected: {e}");
            let _ = client.send(&format!("Error: {e}"));
            client.close();
            return Err(e);
        }

        let mut subs = self.subscriptions.lock().await;
        if let Some(old) = subs.remove(connection_id) {
            debug!(
                "Replacing monitor subscription for {connection_id} (channel {})",
                old.channel_id
            );
            old.stop();
        }

        let cancel = CancellationToken::new();
        let channel_id = client.id().to_string();
        let join_handle = tokio::spawn(monitoring_task(
            Arc::clone(&self.store),
            Arc::clone(&self.pool),
            connection_id.to_string(),
            user,
            client,
            self.config.clone(),
            cancel.clone(),
        ));

        info!(
            "Started monitoring {connection_id} for channel {channel_id} (interval: {}ms)",
            self.config.interval().as_millis()
        );
        subs.insert(
            connection_id.to_string(),
            Subscription {
                channel_id,
                cancel,
                join_handle,
            },
        );
        Ok(())
    }

    /// Stop the subscription for `connection_id` if it belongs to
    /// `channel_id`. Returns `true` if a subscription was cancelled.
    ///
    /// A channel that was displaced by a newer subscriber cannot cancel the
    /// newer one.
    pub async fn unsubscribe(&self, connection_id: &str, channel_id: &str) -> bool {
        let mut subs = self.subscriptions.lock().await;
        match subs.get(connection_id) {
            Some(sub) if sub.channel_id == channel_id => {}
            _ => return false,
        }
        match subs.remove(connection_id) {
            Some(sub) => {
                sub.stop();
                info!("Stopped monitoring {connection_id} for channel {channel_id}");
                true
            }
            None => false,
        }
    }

    pub async fn is_subscribed(&self, connection_id: &str) -> bool {
        self.subscriptions.lock().await.contains_key(connection_id)
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Cancel all subscriptions (called during server shutdown).
    pub async fn shutdown(&self) {
        let mut subs = self.subscriptions.lock().await;
        for (connection_id, sub) in subs.drain() {
            sub.stop();
            debug!("Shutdown: cancelled monitoring for {connection_id}");
        }
    }
}

/// Background task that samples the host on every tick.
///
/// A tick failure is reported to the client and the schedule continues.
/// The task ends when cancelled or when the client goes away.
async fn monitoring_task(
    store: Arc<dyn ConnectionStore>,
    pool: Arc<SshConnectionPool>,
    connection_id: String,
    user: Option<String>,
    client: Arc<dyn ClientChannel>,
    config: MonitorConfig,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Monitoring task for {connection_id} cancelled");
                break;
            }
            _ = ticker.tick() => {}
        }
        if !client.is_open() {
            debug!("Client channel {} closed, stopping monitoring for {connection_id}", client.id());
            break;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = sample(&store, &pool, &connection_id, user.as_deref(), &cancel) => result,
        };
        if cancel.is_cancelled() || !client.is_open() {
            break;
        }

        let frame = match result {
            Ok(snapshot) => match serde_json::to_string(&snapshot) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize snapshot for {connection_id}: {e}");
                    continue;
                }
            },
            Err(e) => {
                warn!("Monitoring tick for {connection_id} failed: {e}");
                format!("Error: {e}")
            }
        };
        if let Err(e) = client.send(&frame) {
            debug!("{e}, stopping monitoring for {connection_id}");
            break;
        }
    }
}

/// One tick: resolve the record and run the probe battery on a pooled
/// session.
async fn sample(
    store: &Arc<dyn ConnectionStore>,
    pool: &SshConnectionPool,
    connection_id: &str,
    user: Option<&str>,
    cancel: &CancellationToken,
) -> Result<ResourceSnapshot, SshError> {
    let record = store.resolve(connection_id, user).await?;
    let token = cancel.clone();
    pool.execute_with_session(&record, move |transport| Ok(collect_snapshot(transport, &token)))
        .await
}
