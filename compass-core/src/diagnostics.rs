//! Operator-facing diagnostic messages
//!
//! The subsystem reports notable events (replacements, exhaustion, removed
//! devices) through a [`DiagnosticSink`]. The default sink forwards to
//! `tracing`; tests use [`RecordingSink`] to inspect what was said.

use parking_lot::Mutex;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Message severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Emergency => "EMERGENCY",
            Self::Alert => "ALERT",
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Notice => "NOTICE",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        };
        f.write_str(s)
    }
}

/// Destination for operator-facing messages
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, severity: Severity, text: &str);
}

/// Forwards diagnostics to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, severity: Severity, text: &str) {
        match severity {
            Severity::Emergency | Severity::Alert | Severity::Critical | Severity::Error => {
                error!(target: "compass::diag", %severity, "{}", text)
            }
            Severity::Warning => warn!(target: "compass::diag", %severity, "{}", text),
            Severity::Notice | Severity::Info => {
                info!(target: "compass::diag", %severity, "{}", text)
            }
            Severity::Debug => debug!(target: "compass::diag", "{}", text),
        }
    }
}

/// Keeps every emitted message
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages.lock().clone()
    }

    /// True if any message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|(_, m)| m.contains(needle))
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, severity: Severity, text: &str) {
        self.messages.lock().push((severity, text.to_string()));
    }
}
