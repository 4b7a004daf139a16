//! Subscriber setup for binaries and component spans.
//!
//! The library never installs a global subscriber: each component logs
//! inside the `Span` it was given at construction. Binaries call
//! [`init_tracing`] once at startup.

use tracing::{Span, info_span};
use tracing_subscriber::EnvFilter;

use crate::errors::{JukeboxError, Result};

/// Installs a console subscriber.
///
/// `RUST_LOG`, when set, wins over `default_filter` (usually
/// `logging.filter` from the configuration).
pub fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|err| JukeboxError::config(format!("invalid log filter: {err}")))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .try_init()
        .map_err(|err| JukeboxError::config(format!("cannot install subscriber: {err}")))
}

/// Span for one jukebox component, e.g. `component_span("queue", "alice")`.
pub fn component_span(component: &'static str, owner: &str) -> Span {
    info_span!("jukebox", component, owner)
}
