use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::ConnectionRecord;
use crate::errors::SshError;

/// Resolves a connection id (and optionally the requesting user) to the
/// record holding its parameters.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Fails with `NotFound` when no record has this id and with
    /// `Forbidden` when `user` is given and does not own it.
    async fn resolve(&self, connection_id: &str, user: Option<&str>)
        -> Result<ConnectionRecord, SshError>;
}

/// Connection records read from a JSON array on disk at startup.
pub struct JsonConnectionStore {
    records: HashMap<String, ConnectionRecord>,
}

impl JsonConnectionStore {
    /// Load the store from `file_path`. A missing or unreadable file yields
    /// an empty store.
    pub fn load(file_path: &Path) -> Self {
        Self {
            records: Self::load_from_disk(file_path),
        }
    }

    /// An in-memory store that never touches disk.
    pub fn from_records(records: impl IntoIterator<Item = ConnectionRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    fn load_from_disk(path: &Path) -> HashMap<String, ConnectionRecord> {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Vec<ConnectionRecord>>(&contents) {
                Ok(records) => {
                    debug!(
                        "Loaded {} connection records from {}",
                        records.len(),
                        path.display()
                    );
                    records.into_iter().map(|r| (r.id.clone(), r)).collect()
                }
                Err(e) => {
                    warn!(
                        "Failed to parse connection records from {}: {}",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(_) => {
                warn!("No connection records file at {}", path.display());
                HashMap::new()
            }
        }
    }
}

#[async_trait]
impl ConnectionStore for JsonConnectionStore {
    async fn resolve(
        &self,
        connection_id: &str,
        user: Option<&str>,
    ) -> Result<ConnectionRecord, SshError> {
        let record = self
            .records
            .get(connection_id)
            .ok_or_else(|| SshError::NotFound(connection_id.to_string()))?;
        if let Some(user) = user {
            if record.owner != user {
                return Err(SshError::Forbidden(connection_id.to_string()));
            }
        }
        Ok(record.clone())
    }
}
