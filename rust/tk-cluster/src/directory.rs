//! Service lookup: aggregator name → socket address.

use std::collections::BTreeMap;
use std::net::{SocketAddr, ToSocketAddrs};

use thiserror::Error;
use tk_core::config::ClusterConfig;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no service named {0:?}")]
    NotFound(String),
    #[error("service {name:?} has unusable address {addr:?}")]
    BadAddress { name: String, addr: String },
}

pub trait ServiceDirectory: Send + Sync {
    fn lookup(&self, name: &str) -> Result<SocketAddr, LookupError>;
}

/// Fixed name → `host:port` table, usually the `cluster.directory` section of
/// the config.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    entries: BTreeMap<String, String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &ClusterConfig) -> Self {
        Self {
            entries: cfg.directory.clone(),
        }
    }

    pub fn with(mut self, name: &str, addr: impl ToString) -> Self {
        self.insert(name, addr);
        self
    }

    pub fn insert(&mut self, name: &str, addr: impl ToString) {
        self.entries.insert(name.to_string(), addr.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ServiceDirectory for StaticDirectory {
    fn lookup(&self, name: &str) -> Result<SocketAddr, LookupError> {
        let addr = self
            .entries
            .get(name)
            .ok_or_else(|| LookupError::NotFound(name.to_string()))?;
        let bad = || LookupError::BadAddress {
            name: name.to_string(),
            addr: addr.clone(),
        };
        addr.to_socket_addrs()
            .map_err(|_| bad())?
            .next()
            .ok_or_else(bad)
    }
}
