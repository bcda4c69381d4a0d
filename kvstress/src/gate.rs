//! Admission gate for store round trips.
//!
//! [`AdmissionGate`] caps the number of in-flight round trips using a tokio semaphore. Each
//! acquired [`Permit`] is returned to the gate when it is released or dropped, and notifies
//! waiters so that [`AdmissionGate::wait_all`] resolves once all permits are back.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Limits concurrent round trips and tracks how many permits are held.
///
/// The gate is cheap to clone; all clones share the same pool of permits. Acquisition is never
/// refused, only delayed until a permit is returned.
#[derive(Clone, Debug)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    released: Arc<Notify>,
}

impl AdmissionGate {
    /// The largest capacity a gate can be created with.
    pub const MAX_CAPACITY: usize = Semaphore::MAX_PERMITS;

    /// Creates a new gate holding `capacity` permits.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds [`MAX_CAPACITY`](Self::MAX_CAPACITY).
    pub fn new(capacity: NonZeroUsize) -> Self {
        let capacity = capacity.get();
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            released: Arc::new(Notify::new()),
        }
    }

    /// Waits until a permit is free and takes it.
    ///
    /// This is cancel safe: dropping the returned future before it resolves does not leak a
    /// permit.
    pub async fn acquire(&self) -> Permit {
        // The semaphore is owned by the gate and never closed.
        let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("admission gate semaphore closed"),
        };

        self.wrap(permit)
    }

    /// Takes a permit if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(self.wrap(permit))
    }

    fn wrap(&self, permit: OwnedSemaphorePermit) -> Permit {
        Permit {
            permit: Some(permit),
            released: Arc::clone(&self.released),
        }
    }

    /// Returns the total number of permits in the pool.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of permits currently held.
    pub fn used_permits(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Waits until all permits have been returned.
    pub async fn wait_all(&self) {
        loop {
            let notified = self.released.notified();
            if self.used_permits() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// A single unit of admission capacity borrowed from an [`AdmissionGate`].
///
/// The permit goes back to its gate exactly once: either through [`release`](Self::release) or
/// when it is dropped, including during unwinding.
pub struct Permit {
    permit: Option<OwnedSemaphorePermit>,
    released: Arc<Notify>,
}

impl Permit {
    /// Returns this permit to its gate.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit").finish_non_exhaustive()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.released.notify_waiters();
    }
}
