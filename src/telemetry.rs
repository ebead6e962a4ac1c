//! Log output setup.

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins when set; otherwise `LOG_LEVEL=debug` turns on debug output for this crate.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(std::env::var("LOG_LEVEL").ok().as_deref())));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

fn default_directives(log_level: Option<&str>) -> &'static str {
    match log_level.map(str::trim) {
        Some(level) if level.eq_ignore_ascii_case("debug") => "info,jirabackup=debug",
        _ => "info",
    }
}
