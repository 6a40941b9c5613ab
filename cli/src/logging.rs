//! Tracing subscriber setup for the binary.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    pub level: String,
    /// Extra filter directives from `--log-directive`, e.g. `chainstream_core=debug`.
    pub directives: Vec<String>,
    /// Emit JSON structured logs instead of human-readable text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directives: Vec::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `RUST_LOG`-style filter string, e.g. `info,chainstream_core=debug`.
    ///
    /// Crate names may be given with dashes; they are written with
    /// underscores the way tracing targets spell them.
    pub fn filter(&self) -> String {
        let mut filter = self.level.clone();
        for directive in &self.directives {
            let directive = match directive.split_once('=') {
                Some((target, level)) => format!("{}={level}", target.replace('-', "_")),
                None => directive.replace('-', "_"),
            };
            filter.push(',');
            filter.push_str(&directive);
        }
        filter
    }
}

/// Install the global subscriber. Call once at startup.
///
/// `RUST_LOG`, when set, takes precedence over `config`.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init();
    }
}
