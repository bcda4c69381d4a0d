use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Overrides, StorageOverrides};
use crate::driver::Driver;
use crate::id::RequestId;
use crate::{observability, shutdown, store};

/// Write-then-read stress tester for key-value stores.
///
/// Writes keys of the form `<prefix><id>` with themselves as the value and immediately reads them
/// back, keeping up to `parallelism` round trips in flight until interrupted. The first failing
/// write or read ends the run with a non-zero exit status.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    /// address of the redis server as host:port
    #[argh(option)]
    pub redis_address: Option<String>,

    /// password for the redis server
    #[argh(option)]
    pub redis_password: Option<String>,

    /// redis database to select
    #[argh(option)]
    pub redis_database: Option<i64>,

    /// maximum number of round trips in flight
    #[argh(option)]
    pub parallelism: Option<usize>,

    /// prefix of every written key
    #[argh(option)]
    pub key_prefix: Option<String>,

    /// log the key of every completed round trip
    #[argh(switch, short = 'v')]
    pub verbose: bool,

    /// print the version and exit
    #[argh(switch)]
    pub version: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            parallelism: self.parallelism,
            verbose: self.verbose.then_some(true),
            key_prefix: self.key_prefix.clone(),
            storage: StorageOverrides {
                address: self.redis_address.clone(),
                password: self.redis_password.clone(),
                database: self.redis_database,
            },
        }
    }
}

/// Bootstrap the runtime and run the stress test until interrupted or a round trip fails.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    if args.version {
        println!("kvstress {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref(), args.overrides())?;

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("kvstress-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads)
        .build()?;
    let runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    let result = runtime.block_on(run(config));

    // Round trips still in flight are abandoned rather than drained.
    drop(runtime_guard);
    runtime.shutdown_background();

    result
}

async fn run(config: Config) -> Result<()> {
    let store = store::from_config(&config.storage)
        .await
        .context("failed to connect to store")?;

    let mut builder = Driver::builder(store)
        .parallelism(config.parallelism)
        .key_prefix(config.key_prefix)
        .verbose(config.verbose);
    if let Some(seed) = config.seed {
        builder = builder.seed(RequestId::new(seed));
    }

    let shutdown = CancellationToken::new();
    shutdown::on_interrupt(shutdown.clone());

    if let Err(error) = builder.build().run(shutdown).await {
        tracing::error!(
            error = &error as &dyn std::error::Error,
            operation = error.operation(),
            key = error.key(),
            "round trip failed, stopping"
        );
        return Err(error.into());
    }

    tracing::info!("shutting down");
    Ok(())
}
