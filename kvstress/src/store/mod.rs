//! Clients for the key-value store under test.
//!
//! The [`Store`] trait is the only thing the request driver knows about the store. Two
//! implementations ship with this crate: [`RedisStore`] talks to a real Redis server and
//! [`InMemoryStore`] keeps everything in process memory for dry runs and tests.

use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;

mod in_memory;
mod redis;

pub use self::in_memory::InMemoryStore;
pub use self::redis::RedisStore;

use crate::config::Storage;

/// A shared, type-erased [`Store`] instance.
pub type SharedStore = Arc<dyn Store>;

/// A key-value store that can be written to and read from concurrently.
#[async_trait::async_trait]
pub trait Store: Debug + Send + Sync + 'static {
    /// The store name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Retrieves the value stored under `key`.
    ///
    /// Returns [`StoreError::NotFound`] if the key does not exist.
    async fn get(&self, key: &str) -> StoreResult<String>;
}

/// Errors returned by a [`Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Any error reported by the Redis client, including connection and protocol errors.
    #[error("redis error: {context}")]
    Redis {
        context: String,
        #[source]
        cause: ::redis::RedisError,
    },

    /// The key was not present in the store.
    #[error("key `{key}` not found")]
    NotFound { key: String },

    /// Any other error, specific to a store implementation.
    #[error("store unavailable: {context}")]
    Unavailable { context: String },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Creates a connected store as described by the configuration.
pub async fn from_config(storage: &Storage) -> StoreResult<SharedStore> {
    Ok(match storage {
        Storage::Redis {
            address,
            password,
            database,
        } => {
            let password = password
                .as_ref()
                .map(|secret| secrecy::ExposeSecret::expose_secret(secret).as_str().to_owned());
            Arc::new(RedisStore::connect(address, password, *database).await?)
        }
        Storage::Memory => Arc::new(InMemoryStore::new()),
    })
}
