//! Configuration for the stress tool.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Command line flags
//! 2. Environment variables (prefixed with `KVSTRESS__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! See [`Config`] for a description of all configuration fields and their defaults.
//!
//! # Environment Variables
//!
//! Environment variables use `KVSTRESS__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `KVSTRESS__PARALLELISM=500` sets the number of concurrent round trips
//! - `KVSTRESS__STORAGE__ADDRESS=localhost:6379` sets the Redis address
//! - `KVSTRESS__STORAGE__TYPE=memory` switches to the in-memory store
//!
//! # YAML Configuration File
//!
//! ```yaml
//! parallelism: 500
//!
//! storage:
//!   type: redis
//!   address: localhost:6379
//!   database: 2
//! ```

use std::borrow::Cow;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::thread::available_parallelism;

use anyhow::{Result, ensure};
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::driver::DEFAULT_PARALLELISM;
use crate::gate::AdmissionGate;
use crate::id::{DEFAULT_KEY_PREFIX, MAX_FIRST_ID};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "KVSTRESS__";

/// Newtype around `String` that protects against accidental logging of secrets in our
/// configuration struct. Use with [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl<'de> Deserialize<'de> for ConfigSecret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        string_or_number::deserialize(deserializer).map(Self)
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// The store to put under load.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
///
/// Used in: [`Config::storage`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Storage {
    /// A Redis server (type `"redis"`).
    ///
    /// # Example
    ///
    /// ```yaml
    /// storage:
    ///   type: redis
    ///   address: redis:6379
    ///   password: hunter2
    ///   database: 0
    /// ```
    Redis {
        /// Address of the server as `host:port`.
        ///
        /// # Default
        ///
        /// `redis:6379`
        ///
        /// # Environment Variable
        ///
        /// `KVSTRESS__STORAGE__ADDRESS`
        address: String,

        /// Password used to authenticate, if the server requires one.
        ///
        /// The password is redacted from debug output.
        ///
        /// # Environment Variable
        ///
        /// `KVSTRESS__STORAGE__PASSWORD`
        password: Option<SecretBox<ConfigSecret>>,

        /// Logical database to select after connecting.
        ///
        /// # Default
        ///
        /// `0`
        ///
        /// # Environment Variable
        ///
        /// `KVSTRESS__STORAGE__DATABASE`
        #[serde(default)]
        database: i64,
    },

    /// A process-local store (type `"memory"`).
    ///
    /// Useful to check the tool itself without a server. Nothing leaves the process.
    ///
    /// Written keys are never evicted, so memory use grows with the length of the run. Keep
    /// dry runs short.
    Memory,
}

impl Default for Storage {
    fn default() -> Self {
        Self::Redis {
            address: "redis:6379".to_owned(),
            password: None,
            database: 0,
        }
    }
}

/// Runtime configuration for the Tokio async runtime.
///
/// Used in: [`Config::runtime`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads for the runtime.
    ///
    /// # Default
    ///
    /// Defaults to the available parallelism of the host machine.
    ///
    /// # Environment Variable
    ///
    /// `KVSTRESS__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: available_parallelism().map_or(1, NonZeroUsize::get),
        }
    }
}

/// [Sentry](https://sentry.io/) error reporting configuration.
///
/// Sentry is disabled by default and only enabled when a DSN is provided. When enabled, the fatal
/// error that ends a run is reported as an event.
///
/// Used in: [`Config::sentry`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN (Data Source Name).
    ///
    /// # Default
    ///
    /// `None` (Sentry disabled)
    ///
    /// # Environment Variable
    ///
    /// `KVSTRESS__SENTRY__DSN`
    pub dsn: Option<SecretBox<ConfigSecret>>,

    /// Environment name attached to all events.
    ///
    /// # Environment Variable
    ///
    /// `KVSTRESS__SENTRY__ENVIRONMENT`
    pub environment: Option<Cow<'static, str>>,

    /// Error event sampling rate between `0.0` and `1.0`.
    ///
    /// # Default
    ///
    /// `1.0` (send all errors)
    ///
    /// # Environment Variable
    ///
    /// `KVSTRESS__SENTRY__SAMPLE_RATE`
    pub sample_rate: f32,

    /// Enable Sentry SDK debug mode.
    ///
    /// # Environment Variable
    ///
    /// `KVSTRESS__SENTRY__DEBUG`
    pub debug: bool,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            sample_rate: 1.0,
            debug: false,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO  kvstress::driver > starting stress run
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z INFO kvstress::driver: starting stress run
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2020-12-04T12:11:08.729716Z","level":"INFO","message":"starting stress run","target":"kvstress::driver"}
    /// ```
    Json,
}

/// Accepts numbers where a string is expected.
///
/// The environment provider parses values like `123456` as integers, which would otherwise fail
/// to deserialize into string fields such as passwords or key prefixes.
mod string_or_number {
    use std::fmt;

    use serde::de::{self, Visitor};

    struct StringOrNumber;

    impl Visitor<'_> for StringOrNumber {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string or a number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_owned())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i128<E: de::Error>(self, v: i128) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(StringOrNumber)
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable takes precedence and provides more granular control
    /// per module if needed.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `KVSTRESS__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format. See [`LogFormat`] for available options.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    ///
    /// # Environment Variable
    ///
    /// `KVSTRESS__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct for the stress tool.
///
/// Default values are applied for omitted fields. See [the module docs](self) for how to
/// provide values.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The store to put under load.
    ///
    /// # Default
    ///
    /// Redis at `redis:6379`, database `0`, no password.
    pub storage: Storage,

    /// Maximum number of round trips in flight at the same time.
    ///
    /// Every round trip holds one of these slots from before its write until after its read.
    ///
    /// # Default
    ///
    /// `20000`
    ///
    /// # Environment Variable
    ///
    /// `KVSTRESS__PARALLELISM`
    pub parallelism: NonZeroUsize,

    /// Log the key of every completed round trip.
    ///
    /// # Default
    ///
    /// `false`
    ///
    /// # Environment Variable
    ///
    /// `KVSTRESS__VERBOSE`
    pub verbose: bool,

    /// Prefix of every key written to the store. Keys are the prefix followed by the decimal
    /// request identifier.
    ///
    /// # Default
    ///
    /// `stress-`
    ///
    /// # Environment Variable
    ///
    /// `KVSTRESS__KEY_PREFIX`
    #[serde(deserialize_with = "string_or_number::deserialize")]
    pub key_prefix: String,

    /// Starting point of the request identifier counter.
    ///
    /// The first request uses `seed + 1`. Must not exceed `9223372036854775807`.
    ///
    /// # Default
    ///
    /// `None` (a random value seeded from the current time)
    ///
    /// # Environment Variable
    ///
    /// `KVSTRESS__SEED`
    pub seed: Option<u64>,

    /// Configuration of the internal Tokio runtime.
    pub runtime: Runtime,

    /// Logging configuration.
    pub logging: Logging,

    /// Sentry error reporting configuration.
    pub sentry: Sentry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: Storage::default(),
            parallelism: DEFAULT_PARALLELISM,
            verbose: false,
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            seed: None,
            runtime: Runtime::default(),
            logging: Logging::default(),
            sentry: Sentry::default(),
        }
    }
}

/// Values passed on the command line, which take precedence over all other sources.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
    #[serde(skip_serializing_if = "StorageOverrides::is_empty")]
    pub storage: StorageOverrides,
}

/// Command line overrides of the Redis connection, see [`Storage::Redis`].
#[derive(Debug, Default, Serialize)]
pub struct StorageOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<i64>,
}

impl StorageOverrides {
    fn is_empty(&self) -> bool {
        self.address.is_none() && self.password.is_none() && self.database.is_none()
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided in `path`)
    /// 3. Environment variables (prefixed with `KVSTRESS__`)
    /// 4. Command line `overrides`
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML file cannot be read or parsed, if environment variables or
    /// overrides cannot be deserialized, or if the resulting values are out of range.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that cannot be expressed in the field types.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.parallelism.get() <= AdmissionGate::MAX_CAPACITY,
            "parallelism must not exceed {}",
            AdmissionGate::MAX_CAPACITY
        );

        ensure!(
            self.runtime.worker_threads > 0,
            "runtime.worker_threads must be at least 1"
        );

        if let Some(seed) = self.seed {
            ensure!(seed <= MAX_FIRST_ID, "seed must not exceed {MAX_FIRST_ID}");
        }

        Ok(())
    }
}
