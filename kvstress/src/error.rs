//! Errors that stop a stress run.

use thiserror::Error;

use crate::store::StoreError;

/// A failed round trip against the store.
///
/// Any of these is fatal to the whole run: the point of the tool is to find where the store
/// breaks, so failures are never retried or counted.
#[derive(Debug, Error)]
pub enum RoundTripError {
    /// Writing the key failed. The key was never read back.
    #[error("failed to write `{key}` to store")]
    Write {
        key: String,
        #[source]
        source: StoreError,
    },

    /// Reading the key back after a successful write failed.
    #[error("failed to read `{key}` from store")]
    Read {
        key: String,
        #[source]
        source: StoreError,
    },
}

impl RoundTripError {
    /// Returns the key of the failed round trip.
    pub fn key(&self) -> &str {
        match self {
            Self::Write { key, .. } | Self::Read { key, .. } => key,
        }
    }

    /// Returns the name of the failed operation.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Write { .. } => "write",
            Self::Read { .. } => "read",
        }
    }
}
