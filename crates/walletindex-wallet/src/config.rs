//! Wallet configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Highest block height a query range may extend to.
pub const MAX_BLOCK_HEIGHT: u64 = 500_000_000;

/// Configuration for a [`Wallet`](crate::Wallet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Background auto-sync period (milliseconds).
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    /// Upper bound on a daemon connection check (milliseconds).
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Overrides the substrate's own trust flag when refreshing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_daemon: Option<bool>,
    /// How many times a query is re-run after observing inconsistent state.
    #[serde(default = "default_consistency_retries")]
    pub consistency_retries: u32,
    /// Start the background sync loop enabled.
    #[serde(default)]
    pub auto_sync: bool,
    /// Upper bound substituted for an absent `max_height`.
    #[serde(default = "default_max_block_height")]
    pub max_block_height: u64,
}

fn default_sync_interval_ms() -> u64 {
    10_000
}

fn default_connection_timeout_ms() -> u64 {
    30_000
}

fn default_consistency_retries() -> u32 {
    1
}

fn default_max_block_height() -> u64 {
    MAX_BLOCK_HEIGHT
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: default_sync_interval_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            trusted_daemon: None,
            consistency_retries: default_consistency_retries(),
            auto_sync: false,
            max_block_height: default_max_block_height(),
        }
    }
}

impl WalletConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let cfg: WalletConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, WalletConfig::default());
        assert_eq!(cfg.sync_interval(), Duration::from_secs(10));
        assert_eq!(cfg.connection_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.max_block_height, 500_000_000);
    }

    #[test]
    fn partial_json_overrides() {
        let cfg: WalletConfig =
            serde_json::from_str(r#"{"sync_interval_ms": 250, "trusted_daemon": true}"#).unwrap();
        assert_eq!(cfg.sync_interval_ms, 250);
        assert_eq!(cfg.trusted_daemon, Some(true));
        assert_eq!(cfg.consistency_retries, 1);
        assert!(!cfg.auto_sync);
    }
}
