//! Logging setup
//!
//! The engine logs through `tracing`. Every operation of a session runs in
//! a `jingle` span carrying the peer address and the operation name, so a
//! per-call trace is one filter away. [`setup_logging`] installs a
//! `tracing-subscriber` formatter for applications that have none.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{NegotiationError, Result};

/// Target of every event this crate emits
pub const LOG_TARGET: &str = "rvoip_jingle_core";

/// Logging settings, loadable alongside the negotiation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level ("error" to "trace")
    pub level: String,
    /// Level for negotiation events only, overriding `level`
    pub negotiation_level: Option<String>,
    /// JSON lines instead of text
    pub json: bool,
    /// Source file and line of each event
    pub file_info: bool,
    /// Log entry and exit of the per-peer operation spans
    pub peer_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            negotiation_level: None,
            json: false,
            file_info: false,
            peer_spans: false,
        }
    }
}

impl LoggingConfig {
    /// Text logging at `level`
    pub fn new(level: Level) -> Self {
        Self {
            level: level.to_string().to_lowercase(),
            ..Default::default()
        }
    }

    /// Log negotiation at a different level than everything else
    pub fn with_negotiation_level(mut self, level: Level) -> Self {
        self.negotiation_level = Some(level.to_string().to_lowercase());
        self
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Enable file and line information
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Log span entry and exit
    pub fn with_peer_spans(mut self) -> Self {
        self.peer_spans = true;
        self
    }

    /// Filter from `RUST_LOG` plus the configured levels
    pub fn filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::from_default_env().add_directive(parse_log_level(&self.level)?.into());
        if let Some(level) = self.negotiation_level.as_deref() {
            let level = parse_log_level(level)?;
            let directive = Directive::from_str(&format!("{}={}", LOG_TARGET, level))
                .map_err(|e| NegotiationError::config(format!("Invalid log directive: {}", e)))?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }
}

/// Install the global subscriber
///
/// Fails if the configuration is invalid or a subscriber is already installed.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let span_events = if config.peer_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(config.filter()?)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| NegotiationError::config(format!("Failed to install subscriber: {}", e)))?;

    tracing::info!(target: LOG_TARGET, "Jingle negotiation logging at {}", config.level);
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| NegotiationError::config(format!("Invalid log level: {}", level)))
}
