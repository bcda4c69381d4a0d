use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, ConnectionInfo, IntoConnectionInfo};

use super::{Store, StoreError, StoreResult};

/// A [`Store`] backed by a Redis server.
///
/// All callers share one multiplexed connection; the handle is cloned per command, which only
/// clones a channel sender.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    /// Connects to the Redis server at `address` (`host:port`) and selects `database`.
    pub async fn connect(
        address: &str,
        password: Option<String>,
        database: i64,
    ) -> StoreResult<Self> {
        let info = connection_info(address, password, database)?;

        let client = redis::Client::open(info).map_err(|cause| StoreError::Redis {
            context: format!("invalid connection parameters for `{address}`"),
            cause,
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|cause| StoreError::Redis {
                context: format!("failed to connect to `{address}`"),
                cause,
            })?;

        tracing::debug!(address, database, "connected to redis");
        Ok(Self { connection })
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

fn connection_info(
    address: &str,
    password: Option<String>,
    database: i64,
) -> StoreResult<ConnectionInfo> {
    let mut info = format!("redis://{address}/{database}")
        .into_connection_info()
        .map_err(|cause| StoreError::Redis {
            context: format!("invalid redis address `{address}`"),
            cause,
        })?;

    info.redis.password = password.filter(|password| !password.is_empty());
    Ok(info)
}

#[async_trait::async_trait]
impl Store for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut connection = self.connection.clone();
        connection
            .set::<_, _, ()>(key, value)
            .await
            .map_err(|cause| StoreError::Redis {
                context: format!("SET `{key}`"),
                cause,
            })
    }

    async fn get(&self, key: &str) -> StoreResult<String> {
        let mut connection = self.connection.clone();
        let value: Option<String> = connection.get(key).await.map_err(|cause| StoreError::Redis {
            context: format!("GET `{key}`"),
            cause,
        })?;

        value.ok_or_else(|| StoreError::NotFound {
            key: key.to_owned(),
        })
    }
}
