//! Logging integration for the strata engine.
//!
//! Provides a helper for configuring [`tracing`]-based logging from
//! [`Settings`](crate::settings::Settings). The engine itself only emits
//! events; installing a subscriber is left to the embedding application,
//! which may call [`setup_logging`] or bring its own.

use crate::settings::Settings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The filter is read from `settings.log_level`. In debug mode a pretty,
/// human-readable format is used; otherwise a structured JSON format is
/// used. Installing a second subscriber is a no-op rather than an error so
/// tests and embedders that already configured one are unaffected.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for one migration step.
///
/// Attach this span around the application of a single node so every log
/// entry emitted while it runs carries the node's identity.
///
/// # Examples
///
/// ```
/// use strata_core::logging::step_span;
///
/// let span = step_span("blog", "0001_initial");
/// let _guard = span.enter();
/// tracing::info!("applying");
/// ```
pub fn step_span(app_label: &str, name: &str) -> tracing::Span {
    tracing::info_span!("step", app = app_label, name = name)
}
