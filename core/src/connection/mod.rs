//! Connection records and the identity key derived from them.
//!
//! A [`ConnectionRecord`] is the persisted description of one remote SSH
//! endpoint. The pool never keys on the record itself but on the
//! [`ConnectionIdentity`] derived from it, which folds a fingerprint of the
//! credentials into the key so that two records differing only in
//! credentials never share a pooled session.

pub mod store;

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

pub use store::{ConnectionStore, JsonConnectionStore};

/// Persisted SSH connection parameters.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_passphrase: Option<String>,
    /// User id that owns this record.
    #[serde(default)]
    pub owner: String,
}

// Credentials stay out of log output.
impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("has_password", &self.password().is_some())
            .field("has_private_key", &self.private_key().is_some())
            .field("owner", &self.owner)
            .finish()
    }
}

/// Which credential a connect attempt will use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChoice<'a> {
    Password(&'a str),
    PrivateKey {
        key: &'a str,
        passphrase: Option<&'a str>,
    },
}

impl ConnectionRecord {
    pub fn password(&self) -> Option<&str> {
        non_blank(self.password.as_deref())
    }

    pub fn private_key(&self) -> Option<&str> {
        non_blank(self.private_key.as_deref())
    }

    pub fn key_passphrase(&self) -> Option<&str> {
        non_blank(self.key_passphrase.as_deref())
    }

    /// Pick the credential to authenticate with. Password wins when both
    /// are present; `None` means the record cannot authenticate at all.
    pub fn auth_choice(&self) -> Option<AuthChoice<'_>> {
        if let Some(password) = self.password() {
            return Some(AuthChoice::Password(password));
        }
        self.private_key().map(|key| AuthChoice::PrivateKey {
            key,
            passphrase: self.key_passphrase(),
        })
    }

    pub fn identity(&self) -> ConnectionIdentity {
        ConnectionIdentity::from_record(self)
    }

    /// `host:port` for socket addressing and log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Pool lookup key for one endpoint + credential tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    pub connection_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    credential_fingerprint: u64,
}

impl ConnectionIdentity {
    pub fn from_record(record: &ConnectionRecord) -> Self {
        let mut hasher = DefaultHasher::new();
        record.password().hash(&mut hasher);
        record.private_key().hash(&mut hasher);
        record.key_passphrase().hash(&mut hasher);
        Self {
            connection_id: record.id.clone(),
            host: record.host.clone(),
            port: record.port,
            username: record.username.clone(),
            credential_fingerprint: hasher.finish(),
        }
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{} ({})",
            self.username, self.host, self.port, self.connection_id
        )
    }
}

fn default_port() -> u16 {
    22
}
