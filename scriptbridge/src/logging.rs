//! Tracing subscriber setup for hosts that do not install their own.
//!
//! Settings come from the environment: `RUST_LOG` wins outright, otherwise
//! `SCRIPTBRIDGE_LOG` picks the level for the crate's own targets.
//! `LOG_FORMAT=json` switches stderr output to JSON lines.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(value) if value.trim().eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub directives: String,
    pub format: LogFormat,
}

fn level_for(raw: Option<&str>) -> &'static str {
    let raw = raw.map(|value| value.trim().to_ascii_lowercase());
    match raw.as_deref() {
        Some("off") => "off",
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}

fn crate_directives(level: &str) -> String {
    // inspector traffic is chatty below debug
    let inspector = if level == "off" { "off" } else { "warn" };
    format!("scriptbridge={level},scriptbridge::debug::inspector={inspector}")
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup, so hosts can feed their own
    /// configuration instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let directives = match lookup("RUST_LOG") {
            Some(value) if !value.trim().is_empty() => value,
            _ => crate_directives(level_for(lookup("SCRIPTBRIDGE_LOG").as_deref())),
        };
        Self {
            directives,
            format: LogFormat::parse(lookup("LOG_FORMAT").as_deref()),
        }
    }

    /// The filter for these settings. Unparseable directives fall back to the
    /// crate defaults; the rejected text is handed back for reporting.
    fn filter(&self) -> (EnvFilter, Option<String>) {
        match EnvFilter::try_new(&self.directives) {
            Ok(filter) => (filter, None),
            Err(e) => (
                EnvFilter::new(crate_directives(level_for(None))),
                Some(format!("{}: {e}", self.directives)),
            ),
        }
    }
}

/// Install a global subscriber for `settings`. Returns `false` when another
/// subscriber was already installed; that one is kept.
pub fn init_with(settings: &LogSettings) -> bool {
    let (filter, rejected) = settings.filter();

    let installed = match settings.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .is_ok(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .is_ok(),
    };

    if installed && let Some(rejected) = rejected {
        tracing::warn!(directives = %rejected, "Ignoring invalid log filter");
    }
    installed
}

/// Install a global subscriber from the process environment.
pub fn init_tracing() -> bool {
    init_with(&LogSettings::from_env())
}
