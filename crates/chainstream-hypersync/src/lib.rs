//! chainstream-hypersync: HyperSync HTTP backend for `chainstream-core`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use chainstream_core::{RetryConfig, RetryingFetcher, StreamController};
//! use chainstream_hypersync::{HyperSyncConfig, HyperSyncFetcher};
//!
//! # fn main() -> Result<(), chainstream_core::BackendError> {
//! let fetcher = HyperSyncFetcher::new(HyperSyncConfig::from_env())?;
//! let controller = StreamController::new(Arc::new(RetryingFetcher::new(fetcher, RetryConfig::default())));
//! # let _ = controller;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod query;

pub use client::HyperSyncFetcher;
pub use config::HyperSyncConfig;
pub use query::{Query, QueryResponse};
