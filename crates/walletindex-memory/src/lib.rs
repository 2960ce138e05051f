//! walletindex-memory: an in-memory chain substrate for WalletIndex.
//!
//! Used by the wallet crate's tests and by embedders that feed records
//! from their own scanner.

pub mod memory;

pub use memory::MemorySubstrate;
