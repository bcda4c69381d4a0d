//! Instrumented [`Store`] fakes.
//!
//! All fakes are [`Clone`] and share their state between clones, so a test can keep a handle for
//! inspection while the driver owns another one.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kvstress::store::{InMemoryStore, Store, StoreError, StoreResult};
use tokio::sync::Semaphore;

/// Tracks how many round trips overlap.
///
/// A round trip counts as in flight from the start of its `set` until the end of its `get`.
#[derive(Debug, Default)]
struct Concurrency {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicUsize,
}

impl Concurrency {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A store that counts round trips and records every written key.
///
/// Each operation sleeps for the configured delay, which keeps round trips overlapping.
#[derive(Clone, Debug, Default)]
pub struct CountingStore {
    delay: Duration,
    concurrency: Arc<Concurrency>,
    keys: Arc<Mutex<HashSet<String>>>,
    duplicates: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// Number of round trips whose `get` returned.
    pub fn completed(&self) -> usize {
        self.concurrency.completed.load(Ordering::SeqCst)
    }

    /// Highest number of round trips observed in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.concurrency.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of `set` calls for a key that had been written before.
    pub fn duplicate_keys(&self) -> usize {
        self.duplicates.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Store for CountingStore {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn set(&self, key: &str, _value: &str) -> StoreResult<()> {
        self.concurrency.enter();
        if !self.keys.lock().unwrap().insert(key.to_owned()) {
            self.duplicates.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<String> {
        tokio::time::sleep(self.delay).await;
        self.concurrency.exit();
        Ok(key.to_owned())
    }
}

/// A store whose writes block until the test lets them through.
///
/// Every `set` waits for one unit released with [`open`](Self::open). Reads complete right away
/// and echo the key.
#[derive(Clone, Debug)]
pub struct GatedStore {
    started: Arc<AtomicUsize>,
    concurrency: Arc<Concurrency>,
    gate: Arc<Semaphore>,
}

impl GatedStore {
    pub fn new() -> Self {
        Self {
            started: Arc::default(),
            concurrency: Arc::default(),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    /// Lets `count` more writes through.
    pub fn open(&self, count: usize) {
        self.gate.add_permits(count);
    }

    /// Number of `set` calls that have been entered.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of round trips whose `get` returned.
    pub fn completed(&self) -> usize {
        self.concurrency.completed.load(Ordering::SeqCst)
    }

    /// Highest number of round trips observed in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.concurrency.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for GatedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Store for GatedStore {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn set(&self, _key: &str, _value: &str) -> StoreResult<()> {
        self.concurrency.enter();
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await.unwrap().forget();
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<String> {
        self.concurrency.exit();
        Ok(key.to_owned())
    }
}

/// Which operation of a [`FailingStore`] fails for a key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailOn {
    Set,
    Get,
}

/// An in-memory store that fails chosen operations for chosen keys.
///
/// Records the key of every `get` call, so tests can assert that a key was never read.
#[derive(Clone, Debug, Default)]
pub struct FailingStore {
    inner: InMemoryStore,
    failures: Arc<Mutex<HashMap<String, FailOn>>>,
    reads: Arc<Mutex<Vec<String>>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `operation` fail for `key`.
    pub fn fail(self, key: impl Into<String>, operation: FailOn) -> Self {
        self.failures.lock().unwrap().insert(key.into(), operation);
        self
    }

    /// Returns whether `get` was ever called for `key`.
    pub fn was_read(&self, key: &str) -> bool {
        self.reads.lock().unwrap().iter().any(|read| read == key)
    }

    fn check(&self, key: &str, operation: FailOn) -> StoreResult<()> {
        match self.failures.lock().unwrap().get(key) {
            Some(failing) if *failing == operation => Err(StoreError::Unavailable {
                context: format!("injected {operation:?} failure"),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Store for FailingStore {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check(key, FailOn::Set)?;
        self.inner.set(key, value).await
    }

    async fn get(&self, key: &str) -> StoreResult<String> {
        self.reads.lock().unwrap().push(key.to_owned());
        self.check(key, FailOn::Get)?;
        self.inner.get(key).await
    }
}
