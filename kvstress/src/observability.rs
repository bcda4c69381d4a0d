use std::env;
use std::io::IsTerminal;

use secrecy::ExposeSecret;
use sentry::integrations::tracing as sentry_tracing;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::config::{Config, LogFormat};

/// Initializes the Sentry client if a DSN is configured.
///
/// The returned guard flushes pending events when dropped, so it has to outlive the run.
pub fn init_sentry(config: &Config) -> Option<sentry::ClientInitGuard> {
    let sentry_config = &config.sentry;
    let dsn = sentry_config.dsn.as_ref()?;

    Some(sentry::init(sentry::ClientOptions {
        dsn: dsn.expose_secret().as_str().parse().ok(),
        release: sentry::release_name!(),
        environment: sentry_config.environment.clone(),
        sample_rate: sentry_config.sample_rate,
        debug: sentry_config.debug,
        enable_logs: true,
        ..Default::default()
    }))
}

pub fn init_tracing(config: &Config) {
    // Same as the default filter, except it converts warnings into events
    // and also sends everything at or above INFO as logs instead of breadcrumbs.
    let sentry_layer = config.sentry.is_enabled().then(|| {
        sentry_tracing::layer().event_filter(|metadata| match *metadata.level() {
            Level::ERROR | Level::WARN => {
                sentry_tracing::EventFilter::Event | sentry_tracing::EventFilter::Log
            }
            Level::INFO => sentry_tracing::EventFilter::Log,
            Level::DEBUG | Level::TRACE => sentry_tracing::EventFilter::Ignore,
        })
    });

    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let format: Box<dyn Layer<Registry> + Send + Sync> =
        match resolve_format(config.logging.format, std::io::stderr().is_terminal()) {
            LogFormat::Json => format.json().flatten_event(true).boxed(),
            LogFormat::Simplified => format.compact().with_ansi(false).boxed(),
            LogFormat::Pretty | LogFormat::Auto => format.pretty().boxed(),
        };

    tracing_subscriber::registry()
        .with(format.with_filter(parse_rust_log(config.logging.level)))
        .with(sentry_layer)
        .init();
}

fn resolve_format(format: LogFormat, is_terminal: bool) -> LogFormat {
    match format {
        LogFormat::Auto if is_terminal => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    }
}

/// Builds the log filter from `RUST_LOG`, falling back to the configured level.
///
/// `RUST_LOG` may be a plain level, which then applies to this crate while dependencies stay at
/// `WARN` or quieter. Anything else is used literally as a filter directive.
fn parse_rust_log(configured: LevelFilter) -> EnvFilter {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return EnvFilter::new(value),
        },
        Err(_) => configured,
    };

    EnvFilter::new(default_directives(level))
}

fn default_directives(level: LevelFilter) -> String {
    let dependencies = level.min(LevelFilter::WARN);
    format!("{dependencies},kvstress={level},kvstress_test={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_format_depends_on_terminal() {
        assert_eq!(resolve_format(LogFormat::Auto, true), LogFormat::Pretty);
        assert_eq!(resolve_format(LogFormat::Auto, false), LogFormat::Simplified);
        assert_eq!(resolve_format(LogFormat::Json, true), LogFormat::Json);
    }

    #[test]
    fn dependencies_stay_quiet() {
        assert!(
            default_directives(LevelFilter::DEBUG)
                .eq_ignore_ascii_case("warn,kvstress=debug,kvstress_test=debug")
        );
        assert!(
            default_directives(LevelFilter::ERROR)
                .eq_ignore_ascii_case("error,kvstress=error,kvstress_test=error")
        );
    }
}
