//! Error and diagnostic reporting.
//!
//! Every failed operation is returned to the caller *and* forwarded to the
//! device's [`MessageCallback`]. The default callback logs through `tracing`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageSeverity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for MessageSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageSeverity::Info => "info",
            MessageSeverity::Warning => "warning",
            MessageSeverity::Error => "error",
            MessageSeverity::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Receives diagnostics from the device and its command lists.
///
/// Command lists may be recorded on different threads, so implementations
/// must be `Send + Sync`.
pub trait MessageCallback: Send + Sync {
    fn message(&self, severity: MessageSeverity, text: &str);
}

/// Forwards messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMessageCallback;

impl MessageCallback for TracingMessageCallback {
    fn message(&self, severity: MessageSeverity, text: &str) {
        match severity {
            MessageSeverity::Info => tracing::info!(target: "rhi_state", "{text}"),
            MessageSeverity::Warning => tracing::warn!(target: "rhi_state", "{text}"),
            MessageSeverity::Error => tracing::error!(target: "rhi_state", "{text}"),
            MessageSeverity::Fatal => tracing::error!(target: "rhi_state", fatal = true, "{text}"),
        }
    }
}
