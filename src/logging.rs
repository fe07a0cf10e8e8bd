//! Logging setup, powered by tracing-subscriber
//!
//! Console output goes to stderr so query results on stdout stay clean. An
//! optional file layer writes through a non-blocking appender.

use crate::config::{LOG_ENV_VAR, LoggingConfig};
use std::fs;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Third-party crates that are chatty below `warn`
const NOISY_TARGETS: &[(&str, &str)] = &[
    ("sqlx", "warn"),
    ("mongodb", "warn"),
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("reqwest", "warn"),
    ("rustls", "warn"),
    ("h2", "warn"),
];

/// Directive string: `NLQUERY_LOG` wins outright, else the level plus quiet defaults
pub fn filter_directives(level: &str, env_override: Option<&str>) -> String {
    if let Some(directives) = env_override.filter(|d| !d.trim().is_empty()) {
        return directives.to_string();
    }
    let mut directives = vec![level.to_string()];
    for (target, lvl) in NOISY_TARGETS {
        directives.push(format!("{target}={lvl}"));
    }
    directives.join(",")
}

fn build_env_filter(directives: &str) -> io::Result<EnvFilter> {
    EnvFilter::try_new(directives).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid log filter '{directives}': {e}"),
        )
    })
}

/// Install the global subscriber
///
/// `verbose` raises the console to at least `debug`. The returned guard must
/// stay alive for the file layer to flush.
pub fn init(config: &LoggingConfig, verbose: bool) -> io::Result<Option<WorkerGuard>> {
    let env_override = std::env::var(LOG_ENV_VAR).ok();
    let level = if verbose {
        "debug".to_string()
    } else {
        config.level.to_string()
    };
    let directives = filter_directives(&level, env_override.as_deref());

    let console_layer = if config.console || verbose {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(true)
                .with_target(verbose)
                .with_filter(build_env_filter(&directives)?),
        )
    } else {
        None
    };

    let (file_layer, guard) = match config.file {
        Some(ref path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_target(true)
                .with_filter(build_env_filter(&directives)?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::other(format!("Logging already initialized: {e}")))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_quiet_noisy_crates() {
        let directives = filter_directives("info", None);
        assert!(directives.starts_with("info,"));
        assert!(directives.contains("sqlx=warn"));
        assert!(directives.contains("mongodb=warn"));
        assert!(build_env_filter(&directives).is_ok());
    }

    #[test]
    fn test_env_override_replaces_everything() {
        assert_eq!(
            filter_directives("info", Some("nlquery=trace")),
            "nlquery=trace"
        );
        assert_eq!(filter_directives("warn", Some("  ")), filter_directives("warn", None));
    }

    #[test]
    fn test_invalid_directive_is_error() {
        assert!(build_env_filter("nlquery=notalevel").is_err());
    }
}
