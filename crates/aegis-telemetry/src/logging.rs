//! Logging initialization.
//!
//! The output format is chosen by `AEGIS_LOG_FORMAT` (`json`, `pretty`,
//! or `compact`); when unset, production (`RUST_ENV=production`) gets
//! JSON and everything else gets the compact single-line format. The
//! default filter raises the engine's own crates to debug and leaves
//! dependencies at info.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{TelemetryError, TelemetryResult};

/// Default directive set when `RUST_LOG` is absent.
const DEFAULT_FILTER: &str = "info,\
    aegis_bot=debug,\
    aegis_signal=debug,\
    aegis_gatekeeper=debug,\
    aegis_runtime=debug,\
    aegis_registry=debug";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

fn resolve_format(explicit: Option<&str>, production: bool) -> LogFormat {
    match explicit {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        Some("compact") => LogFormat::Compact,
        _ if production => LogFormat::Json,
        _ => LogFormat::Compact,
    }
}

/// Install the global subscriber. Fails if one is already set.
pub fn init_logging() -> TelemetryResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let explicit = std::env::var("AEGIS_LOG_FORMAT").ok();
    let production = std::env::var("RUST_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    let builder = fmt().with_env_filter(filter);
    let result = match resolve_format(explicit.as_deref(), production) {
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
        LogFormat::Pretty => builder.pretty().with_thread_names(true).try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };

    result.map_err(|e| TelemetryError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_format_wins() {
        assert_eq!(resolve_format(Some("pretty"), true), LogFormat::Pretty);
        assert_eq!(resolve_format(Some("json"), false), LogFormat::Json);
        assert_eq!(resolve_format(Some("compact"), true), LogFormat::Compact);
    }

    #[test]
    fn test_environment_fallback() {
        assert_eq!(resolve_format(None, true), LogFormat::Json);
        assert_eq!(resolve_format(None, false), LogFormat::Compact);
        // Unknown values fall through to the environment default.
        assert_eq!(resolve_format(Some("fancy"), false), LogFormat::Compact);
    }
}
