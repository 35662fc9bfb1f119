use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// User-facing alert sink.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, severity: Severity, message: &str);
}

/// Sink that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!(%message, "ASR notification"),
            Severity::Warning => warn!(%message, "ASR notification"),
            Severity::Error => error!(%message, "ASR notification"),
        }
    }
}

/// Starts the external re-authentication flow. The outcome is reported
/// later, on any task, through the handle.
pub trait ReauthTrigger: Send + Sync + 'static {
    fn request_reauth(&self, outcome: ReauthHandle);
}

/// One-shot reply channel for a re-authentication request. Dropping it
/// unresolved counts as abandoned.
#[derive(Debug)]
pub struct ReauthHandle {
    tx: Option<mpsc::UnboundedSender<Command>>,
}

impl ReauthHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn succeeded(mut self) {
        self.resolve(Command::ReauthSucceeded);
    }

    pub fn abandoned(mut self) {
        self.resolve(Command::ReauthAbandoned);
    }

    fn resolve(&mut self, command: Command) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(command);
        }
    }
}

impl Drop for ReauthHandle {
    fn drop(&mut self) {
        if self.tx.is_some() {
            debug!("Re-authentication handle dropped unresolved");
            self.resolve(Command::ReauthAbandoned);
        }
    }
}
