//! Fluent builder API for creating wallets.
//!
//! # Example
//!
//! ```rust,no_run
//! use walletindex_wallet::WalletBuilder;
//!
//! let config = WalletBuilder::new()
//!     .sync_interval_ms(5_000)
//!     .trusted_daemon(true)
//!     .consistency_retries(2)
//!     .build_config();
//! ```

use std::sync::Arc;

use walletindex_core::{ChainSubstrate, WalletError};

use crate::config::WalletConfig;
use crate::wallet::Wallet;

/// Fluent builder for `WalletConfig`.
#[derive(Default)]
pub struct WalletBuilder {
    config: WalletConfig,
}

impl WalletBuilder {
    pub fn new() -> Self {
        Self {
            config: WalletConfig::default(),
        }
    }

    /// Set the background sync period in milliseconds.
    pub fn sync_interval_ms(mut self, ms: u64) -> Self {
        self.config.sync_interval_ms = ms;
        self
    }

    /// Set the upper bound on a daemon connection check.
    pub fn connection_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connection_timeout_ms = ms;
        self
    }

    /// Override the substrate's trust flag when refreshing.
    pub fn trusted_daemon(mut self, trusted: bool) -> Self {
        self.config.trusted_daemon = Some(trusted);
        self
    }

    pub fn consistency_retries(mut self, n: u32) -> Self {
        self.config.consistency_retries = n;
        self
    }

    /// Start with background sync enabled.
    pub fn auto_sync(mut self, enabled: bool) -> Self {
        self.config.auto_sync = enabled;
        self
    }

    pub fn max_block_height(mut self, height: u64) -> Self {
        self.config.max_block_height = height;
        self
    }

    /// Build the `WalletConfig`.
    pub fn build_config(self) -> WalletConfig {
        self.config
    }

    /// Open a wallet over `substrate`. Must run inside a tokio runtime.
    pub fn build(self, substrate: Arc<dyn ChainSubstrate>) -> Result<Wallet, WalletError> {
        Wallet::new(substrate, self.config)
    }
}
