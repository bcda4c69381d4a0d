//! Blackbox tests for the request driver.
//!
//! These tests run the driver against instrumented fake stores and assert the admission bound,
//! permit conservation, shutdown promptness and fatal error propagation.

use std::io;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kvstress::id::RequestId;
use kvstress::{Driver, RoundTripError};
use kvstress_test::stores::{CountingStore, FailOn, FailingStore, GatedStore};
use kvstress_test::wait_for;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::subscriber::DefaultGuard;

const TIMEOUT: Duration = Duration::from_secs(5);

fn parallelism(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

fn spawn(driver: Driver, shutdown: &CancellationToken) -> JoinHandle<Result<(), RoundTripError>> {
    tokio::spawn(driver.run(shutdown.clone()))
}

async fn join(handle: JoinHandle<Result<(), RoundTripError>>) -> Result<(), RoundTripError> {
    tokio::time::timeout(TIMEOUT, handle)
        .await
        .expect("driver did not return")
        .expect("driver panicked")
}

/// Log lines written while the guard returned by [`LogBuffer::capture`] is alive.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    /// Captures logs of the current thread. Tasks spawned on a current-thread runtime are
    /// captured as well.
    fn capture(&self) -> DefaultGuard {
        let buffer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || buffer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn completed_keys(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| line.contains("round trip completed"))
            .filter_map(|line| line.split("key=").nth(1))
            .map(|key| key.split_whitespace().next().unwrap_or_default().to_owned())
            .collect()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admission_bound() {
    kvstress_test::tracing::init();

    let store = CountingStore::new(Duration::from_millis(1));
    let driver = Driver::builder(Arc::new(store.clone()))
        .parallelism(parallelism(8))
        .build();
    let gate = driver.gate().clone();

    let shutdown = CancellationToken::new();
    let handle = spawn(driver, &shutdown);

    wait_for(|| {
        assert!(gate.used_permits() <= 8);
        store.completed() >= 200
    })
    .await;
    shutdown.cancel();
    join(handle).await.unwrap();

    tokio::time::timeout(TIMEOUT, gate.wait_all())
        .await
        .expect("permits were leaked");

    assert!(store.max_in_flight() <= 8);
    assert!(store.max_in_flight() > 1);
    assert_eq!(store.duplicate_keys(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_third_request_waits_for_a_free_permit() {
    let store = GatedStore::new();
    let driver = Driver::builder(Arc::new(store.clone()))
        .parallelism(parallelism(2))
        .build();
    let gate = driver.gate().clone();

    let shutdown = CancellationToken::new();
    let handle = spawn(driver, &shutdown);

    // Requests 1 and 2 are admitted right away, request 3 is held back.
    wait_for(|| store.started() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.started(), 2);
    assert_eq!(gate.used_permits(), 2);

    // Completing one round trip admits exactly one more.
    store.open(1);
    wait_for(|| store.completed() == 1 && store.started() == 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.started(), 3);

    shutdown.cancel();
    join(handle).await.unwrap();

    store.open(2);
    wait_for(|| store.completed() == 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.started(), 3);
    assert!(store.max_in_flight() <= 2);
    tokio::time::timeout(TIMEOUT, gate.wait_all())
        .await
        .expect("permits were leaked");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_while_permits_exhausted() {
    let store = GatedStore::new();
    let driver = Driver::builder(Arc::new(store.clone()))
        .parallelism(parallelism(2))
        .build();
    let gate = driver.gate().clone();

    let shutdown = CancellationToken::new();
    let handle = spawn(driver, &shutdown);

    wait_for(|| store.started() == 2).await;
    assert_eq!(store.completed(), 0);

    // Nothing has completed and no permit is free, the driver still stops.
    shutdown.cancel();
    join(handle).await.unwrap();

    // In-flight requests are not cancelled and finish on their own.
    store.open(2);
    wait_for(|| store.completed() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.started(), 2);
    tokio::time::timeout(TIMEOUT, gate.wait_all())
        .await
        .expect("permits were leaked");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_write_is_fatal() {
    let store = FailingStore::new().fail("stress-7", FailOn::Set);
    let driver = Driver::builder(Arc::new(store.clone()))
        .parallelism(parallelism(1))
        .seed(RequestId::new(6))
        .build();
    let gate = driver.gate().clone();

    let shutdown = CancellationToken::new();
    let error = join(spawn(driver, &shutdown)).await.unwrap_err();

    assert!(matches!(error, RoundTripError::Write { .. }));
    assert_eq!(error.key(), "stress-7");
    assert!(error.to_string().contains("write"));
    assert!(error.to_string().contains("stress-7"));
    assert!(!store.was_read("stress-7"));

    tokio::time::timeout(TIMEOUT, gate.wait_all())
        .await
        .expect("permits were leaked");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_read_is_fatal() {
    let store = FailingStore::new().fail("bench:1", FailOn::Get);
    let driver = Driver::builder(Arc::new(store.clone()))
        .parallelism(parallelism(4))
        .key_prefix("bench:")
        .seed(RequestId::new(0))
        .verbose(true)
        .build();
    let gate = driver.gate().clone();

    let shutdown = CancellationToken::new();
    let error = join(spawn(driver, &shutdown)).await.unwrap_err();

    assert!(matches!(error, RoundTripError::Read { .. }));
    assert_eq!(error.operation(), "read");
    assert_eq!(error.key(), "bench:1");
    assert!(store.was_read("bench:1"));

    tokio::time::timeout(TIMEOUT, gate.wait_all())
        .await
        .expect("permits were leaked");
}

#[tokio::test]
async fn test_verbose_logs_completed_keys() {
    let logs = LogBuffer::default();
    let _guard = logs.capture();

    let store = FailingStore::new().fail("stress-3", FailOn::Get);
    let driver = Driver::builder(Arc::new(store))
        .parallelism(parallelism(1))
        .seed(RequestId::new(0))
        .verbose(true)
        .build();

    let shutdown = CancellationToken::new();
    let error = join(spawn(driver, &shutdown)).await.unwrap_err();
    assert_eq!(error.key(), "stress-3");

    // The failed round trip is not reported as completed.
    assert_eq!(logs.completed_keys(), ["stress-1", "stress-2"]);
}

#[tokio::test]
async fn test_quiet_by_default() {
    let logs = LogBuffer::default();
    let _guard = logs.capture();

    let store = FailingStore::new().fail("stress-3", FailOn::Get);
    let driver = Driver::builder(Arc::new(store))
        .parallelism(parallelism(1))
        .seed(RequestId::new(0))
        .build();

    let shutdown = CancellationToken::new();
    join(spawn(driver, &shutdown)).await.unwrap_err();

    assert!(logs.completed_keys().is_empty());
}
