//! Tracing subscriber setup
//!
//! The server installs one global `tracing-subscriber` from the
//! `[logging]` section when it starts. An embedding application that has
//! already installed its own subscriber keeps it.

use crate::config::{IvrConfig, LogSettings};
use crate::errors::{IvrError, Result};
use std::str::FromStr;
use tracing::{debug, info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| IvrError::config(format!("Invalid log level: {}", level)))
}

/// Filter for `settings`: `RUST_LOG`, then the base level, then the extra
/// directives
pub fn filter(settings: &LogSettings) -> Result<EnvFilter> {
    let mut filter = EnvFilter::from_default_env().add_directive(parse_log_level(&settings.level)?.into());
    for text in &settings.directives {
        let directive = Directive::from_str(text)
            .map_err(|e| IvrError::config(format!("Invalid log directive '{}': {}", text, e)))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

/// Install the global subscriber. Returns `false` when one was already
/// installed, which is left in place.
pub fn init_logging(settings: &LogSettings) -> Result<bool> {
    let span_events = if settings.spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter(settings)?)
        .with_span_events(span_events)
        .with_file(settings.file_info)
        .with_line_number(settings.file_info);

    let installed = if settings.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };
    match installed {
        Ok(()) => Ok(true),
        Err(e) => {
            debug!("Keeping existing tracing subscriber: {}", e);
            Ok(false)
        }
    }
}

/// Startup banner with the version and the configured pool
pub fn log_startup(config: &IvrConfig) {
    info!(
        "Starting rvoip-ivr v{}: {} boards, {} timeslots, entry {}",
        env!("CARGO_PKG_VERSION"),
        config.boards.len(),
        config.slot_count(),
        config.scripts.entry
    );
}
