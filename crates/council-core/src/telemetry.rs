//! Log output for Council binaries.
//!
//! Engine events (`council.*`, see [`crate::obs`]) are the interesting part
//! of the stream, so the default filter keeps dependencies at `warn` and
//! only raises the Council crates to the requested level. `RUST_LOG`
//! replaces the default filter entirely.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested verbosity.
const COUNCIL_TARGETS: [&str; 2] = ["council_core", "council"];

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// Newline-delimited JSON; each line carries the enclosing investigation span.
    Json,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(COUNCIL_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber. Logs go to stderr; stdout is reserved for
/// command output. Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    init_with_format(LogFormat::from_json_flag(json), level);
}

pub fn init_with_format(format: LogFormat, level: Level) {
    let registry = tracing_subscriber::registry().with(env_filter(level));
    let installed = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_scopes_verbosity_to_council_crates() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,council_core=debug,council=debug"
        );
        assert!(EnvFilter::try_new(default_directives(Level::TRACE)).is_ok());
    }

    #[test]
    fn json_flag_selects_format() {
        assert_eq!(LogFormat::from_json_flag(true), LogFormat::Json);
        assert_eq!(LogFormat::from_json_flag(false), LogFormat::Pretty);
    }

    #[test]
    fn repeated_initialisation_is_ignored() {
        init_with_format(LogFormat::Pretty, Level::WARN);
        init_tracing(true, Level::DEBUG);
    }
}
