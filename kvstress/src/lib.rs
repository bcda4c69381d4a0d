//! A load generator for key-value stores.
//!
//! The [`Driver`] keeps a fixed number of write-then-read round trips in flight against a
//! [`Store`](store::Store): every key is written with itself as the value and read right back.
//! Admission is bounded by an [`AdmissionGate`](gate::AdmissionGate), and the run ends either
//! when the shutdown token is cancelled or when the first round trip fails.
//!
//! ```
//! use std::num::NonZeroUsize;
//! use std::sync::Arc;
//!
//! use kvstress::Driver;
//! use kvstress::store::InMemoryStore;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let driver = Driver::builder(Arc::new(InMemoryStore::new()))
//!     .parallelism(NonZeroUsize::new(16).unwrap())
//!     .build();
//!
//! let shutdown = CancellationToken::new();
//! shutdown.cancel();
//! driver.run(shutdown).await.unwrap();
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod gate;
pub mod id;
pub mod observability;
pub mod shutdown;
pub mod store;

pub use crate::driver::Driver;
pub use crate::error::RoundTripError;
