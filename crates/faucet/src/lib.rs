//! Token faucet service
//!
//! Hands out a fixed drip of a token to wallet addresses, limited per wallet
//! and per client IP over a rolling window. Claims are recorded in a sled
//! ledger before the transfer is handed to the node.

pub mod address;
pub mod amount;
pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod ledger;
pub mod limiter;
pub mod metrics;
pub mod service;
pub mod views;

pub use config::FaucetConfig;
pub use error::{FaucetError, FaucetResult};
pub use ledger::{ClaimLedger, SledLedger};
pub use service::{ClaimOutcome, ClaimRequest, FaucetService, FaucetStatus};
