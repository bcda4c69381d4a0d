//! The request driver, which admits and dispatches write-then-read round trips.
//!
//! The driver is made of two long-lived loops. The *feeder* waits on the [`AdmissionGate`] and
//! forwards every permit it gets into an unbounded channel. The *main loop* races that channel
//! against the shutdown token and against fatal errors reported by dispatched tasks. Keeping the
//! blocking acquisition out of the main loop means an interrupt is observed right away, even while
//! every permit is held by an in-flight request.
//!
//! Each admitted permit gets a fresh [`RequestId`] and is handed to a detached task that performs
//! the round trip and returns the permit when done. On shutdown the driver stops admitting work
//! and returns without waiting for those tasks.

use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RoundTripError;
use crate::gate::{AdmissionGate, Permit};
use crate::id::{DEFAULT_KEY_PREFIX, RequestId};
use crate::store::{SharedStore, Store};

/// The default number of concurrent round trips.
pub const DEFAULT_PARALLELISM: NonZeroUsize = NonZeroUsize::new(20_000).unwrap();

/// A builder for creating a [`Driver`].
#[derive(Debug)]
pub struct DriverBuilder {
    store: SharedStore,
    parallelism: NonZeroUsize,
    key_prefix: String,
    verbose: bool,
    seed: Option<RequestId>,
}

impl DriverBuilder {
    /// The maximum number of round trips in flight at the same time.
    pub fn parallelism(mut self, parallelism: NonZeroUsize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// The prefix of every key written to the store.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Whether to log the key of every completed round trip.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Fixes the identifier counter instead of seeding it randomly.
    ///
    /// The counter is incremented before every dispatch, so the first request uses `seed + 1`.
    pub fn seed(mut self, seed: RequestId) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Creates the driver instance.
    pub fn build(self) -> Driver {
        Driver {
            store: self.store,
            gate: AdmissionGate::new(self.parallelism),
            key_prefix: self.key_prefix.into(),
            verbose: self.verbose,
            last_id: self.seed.unwrap_or_else(RequestId::seeded),
        }
    }
}

/// Issues write-then-read round trips against a store until shut down or until one fails.
#[derive(Debug)]
pub struct Driver {
    store: SharedStore,
    gate: AdmissionGate,
    key_prefix: Arc<str>,
    verbose: bool,
    /// The identifier of the most recently dispatched request.
    last_id: RequestId,
}

impl Driver {
    /// Constructs a new driver builder for the given store.
    pub fn builder(store: SharedStore) -> DriverBuilder {
        DriverBuilder {
            store,
            parallelism: DEFAULT_PARALLELISM,
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            verbose: false,
            seed: None,
        }
    }

    /// Returns the gate bounding this driver's round trips.
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Runs until `shutdown` is cancelled or a round trip fails.
    ///
    /// Returns `Ok(())` on shutdown and the first [`RoundTripError`] otherwise. In both cases
    /// tasks that are already in flight keep running detached.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), RoundTripError> {
        let (admitted_tx, mut admitted_rx) = mpsc::unbounded_channel();
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();

        // The feeder lives exactly as long as this function.
        let feeder = shutdown.child_token();
        let _feeder_guard = feeder.clone().drop_guard();
        tokio::spawn(feed(self.gate.clone(), admitted_tx, feeder));

        tracing::info!(
            store = self.store.name(),
            parallelism = self.gate.capacity(),
            "starting stress run"
        );

        let mut dispatched = 0u64;
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    tracing::info!(dispatched, "stopping admission of new requests");
                    return Ok(());
                }
                Some(error) = fatal_rx.recv() => {
                    tracing::debug!(dispatched, "stopping after fatal round trip error");
                    return Err(error);
                }
                Some(permit) = admitted_rx.recv() => {
                    self.last_id = self.last_id.next();
                    tokio::spawn(dispatch(
                        Arc::clone(&self.store),
                        Arc::clone(&self.key_prefix),
                        self.last_id,
                        self.verbose,
                        permit,
                        fatal_tx.clone(),
                    ));
                    dispatched += 1;
                }
                else => return Ok(()),
            }
        }
    }
}

/// Turns every permit taken from the gate into an admission notification.
async fn feed(
    gate: AdmissionGate,
    admitted: mpsc::UnboundedSender<Permit>,
    stop: CancellationToken,
) {
    loop {
        let permit = tokio::select! {
            permit = gate.acquire() => permit,
            _ = stop.cancelled() => return,
        };

        // The receiver is gone once the driver returned, which drops the permit again.
        if admitted.send(permit).is_err() {
            return;
        }
    }
}

/// Body of a single admitted request.
async fn dispatch(
    store: SharedStore,
    key_prefix: Arc<str>,
    id: RequestId,
    verbose: bool,
    permit: Permit,
    fatal: mpsc::UnboundedSender<RoundTripError>,
) {
    let key = id.key(&key_prefix);
    let result = round_trip(store.as_ref(), &key).await;

    if verbose && result.is_ok() {
        tracing::info!(%key, "round trip completed");
    }

    // Return the permit before the error can bring the run down.
    permit.release();

    if let Err(error) = result {
        fatal.send(error).ok();
    }
}

/// Writes `key` with itself as the value and reads it back.
async fn round_trip(store: &dyn Store, key: &str) -> Result<(), RoundTripError> {
    store
        .set(key, key)
        .await
        .map_err(|source| RoundTripError::Write {
            key: key.to_owned(),
            source,
        })?;

    let value = store
        .get(key)
        .await
        .map_err(|source| RoundTripError::Read {
            key: key.to_owned(),
            source,
        })?;

    if value != key {
        tracing::warn!(key, %value, "read back a different value than written");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::store::{InMemoryStore, StoreError};

    use super::*;

    fn parallelism(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn round_trip_writes_key_as_value() {
        let store = InMemoryStore::new();
        round_trip(&store, "stress-1").await.unwrap();
        assert_eq!(store.get("stress-1").await.unwrap(), "stress-1");
    }

    #[tokio::test]
    async fn dispatch_releases_permit_and_reports_error() {
        #[derive(Debug)]
        struct Broken;

        #[async_trait::async_trait]
        impl Store for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }

            async fn set(&self, _key: &str, _value: &str) -> crate::store::StoreResult<()> {
                Err(StoreError::Unavailable {
                    context: "down".into(),
                })
            }

            async fn get(&self, key: &str) -> crate::store::StoreResult<String> {
                unreachable!("read `{key}` after failed write")
            }
        }

        let gate = AdmissionGate::new(parallelism(1));
        let permit = gate.try_acquire().unwrap();
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();

        dispatch(
            Arc::new(Broken),
            "stress-".into(),
            RequestId::new(7),
            false,
            permit,
            fatal_tx,
        )
        .await;

        assert_eq!(gate.used_permits(), 0);
        let error = fatal_rx.recv().await.unwrap();
        assert_eq!(error.operation(), "write");
        assert_eq!(error.key(), "stress-7");
    }

    #[tokio::test]
    async fn returns_on_shutdown() {
        let store = InMemoryStore::new();
        let driver = Driver::builder(Arc::new(store.clone()))
            .parallelism(parallelism(4))
            .seed(RequestId::new(0))
            .build();
        let gate = driver.gate().clone();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(driver.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("driver did not stop")
            .unwrap();
        assert!(result.is_ok());

        tokio::time::timeout(Duration::from_secs(5), gate.wait_all())
            .await
            .expect("permits were leaked");
        assert!(!store.is_empty());
        assert_eq!(store.get("stress-1").await.unwrap(), "stress-1");
    }

    #[tokio::test]
    async fn cancelled_before_start_dispatches_nothing() {
        let store = InMemoryStore::new();
        let driver = Driver::builder(Arc::new(store.clone()))
            .parallelism(parallelism(8))
            .build();

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        driver.run(shutdown).await.unwrap();
        tokio::task::yield_now().await;
        assert!(store.is_empty());
    }
}
