//! Tracing setup for the bridge daemon.
//!
//! The daemon calls [`init_journald_or_stdout`] once at startup to install a
//! subscriber. Everything else does `use crate::tracing::prelude::*` and logs
//! with `trace!()` through `error!()`, attaching the client address and
//! username as structured fields.

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Initialize logging.
///
/// Under systemd (`JOURNAL_STREAM` set) events go to journald; otherwise
/// they are written to stdout.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_ok() {
        match tracing_journald::layer() {
            Ok(layer) => {
                tracing_subscriber::registry()
                    .with(env_filter())
                    .with(layer)
                    .init();
            }
            Err(e) => {
                use_stdout();
                error!(error = %e, "Failed to initialize journald logging, using stdout.");
            }
        }
    } else {
        use_stdout();
    }
}

// RUST_LOG wins; without it the bridge logs at INFO. Raw request bodies are
// only visible at TRACE.
fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy()
}

fn use_stdout() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_timer(LocalTimer))
        .init();
}

// Local time to the nearest second; the default UTC timestamp is long and
// hard to correlate with miner logs.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or(OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{formatted}")
    }
}
