//! Test utilities for kvstress.
//!
//! This crate provides instrumented [`Store`](kvstress::store::Store) fakes and helpers to
//! observe a running driver from integration tests. See the modules for all available utilities.

use std::time::Duration;

pub mod stores;
pub mod tracing;

/// Waits until `condition` holds, polling every millisecond.
///
/// # Panics
///
/// Panics if the condition does not hold within five seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };

    if tokio::time::timeout(Duration::from_secs(5), poll).await.is_err() {
        panic!("condition not met within 5s");
    }
}
