use tracing_subscriber::EnvFilter;

const CRATE_NAMES: &[&str] = &["kvstress", "kvstress_test"];

/// Initialize the logger for testing.
///
/// Logs go to the stdout captured by the Rust test runner. `RUST_LOG` is honored if set;
/// otherwise only our own crates are logged, at maximum verbosity.
///
/// Safe to call from every test, only the first call installs the subscriber.
///
/// # Example
///
/// ```
/// kvstress_test::tracing::init();
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| own_crates());

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}

fn own_crates() -> EnvFilter {
    CRATE_NAMES.iter().fold(EnvFilter::new("ERROR"), |filter, name| {
        filter.add_directive(format!("{name}=TRACE").parse().unwrap())
    })
}
