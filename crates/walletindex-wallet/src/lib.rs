//! walletindex-wallet: queries, background sync and the `Wallet` facade.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use walletindex_core::TxQuery;
//! use walletindex_memory::MemorySubstrate;
//! use walletindex_wallet::WalletBuilder;
//!
//! # async fn demo() -> Result<(), walletindex_core::WalletError> {
//! let wallet = WalletBuilder::new()
//!     .sync_interval_ms(5_000)
//!     .build(Arc::new(MemorySubstrate::new()))?;
//!
//! wallet.sync(None, None).await?;
//! let txs = wallet.get_txs(&TxQuery::new().confirmed(true)).await?;
//! println!("{} confirmed txs", txs.len());
//! wallet.close().await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod history;
pub mod logging;
pub mod progress;
pub mod scheduler;
pub mod wallet;

pub use builder::WalletBuilder;
pub use config::{WalletConfig, MAX_BLOCK_HEIGHT};
pub use history::TxHistory;
pub use logging::{init_tracing, LogConfig};
pub use progress::ProgressTracker;
pub use scheduler::SyncScheduler;
pub use wallet::Wallet;
