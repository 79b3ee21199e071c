//! Logging initialization: env-filter-driven `tracing-subscriber`, with an
//! optional JSON formatter for production/service use and a human-readable
//! one for interactive CLI use.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber. `level` overrides `RUST_LOG`
/// when set; `json` switches to structured JSON output.
pub fn init(level: Option<&str>, json: bool) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
