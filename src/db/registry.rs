//! Connection registry: connection name to configuration.

use crate::models::ConnectionConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

/// Maps connection names to their configuration.
///
/// Lives as long as its owning manager. There is no removal; registering
/// a name again replaces the previous configuration.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    configs: RwLock<HashMap<String, ConnectionConfig>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `config` under its name, replacing any previous entry.
    pub fn register(&self, config: ConnectionConfig) {
        let name = config.name.clone();
        let previous = self.configs.write().insert(name.clone(), config);
        if previous.is_some() {
            debug!(connection = %name, "Connection config replaced");
        } else {
            info!(connection = %name, "Connection registered");
        }
    }

    pub fn get(&self, name: &str) -> Option<ConnectionConfig> {
        self.configs.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.configs.read().contains_key(name)
    }

    /// Registered connection names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.configs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.read().is_empty()
    }
}
