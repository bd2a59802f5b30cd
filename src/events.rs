//! Progress and error events emitted by long-running flows.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgressStep {
    Preparation,
    UserConfirmation,
    ContractVerification,
    TransactionSigningProgress,
    TransactionSigningComplete,
    BroadcastStarted,
    BroadcastComplete,
    Polling,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum WalletEvent {
    RegistrationProgress { phase: u8, message: String },
    LoginProgress { message: String },
    ActionProgress { step: ProgressStep, message: String },
    ActionError { kind: ErrorKind, message: String },
    LinkDeviceProgress { phase: String, message: String },
    EmailRecoveryProgress { status: String, message: String },
    /// Terminal bracket for a flow; `success = false` accompanies an error.
    AfterCall { success: bool },
}

/// Cheap fan-out handle for flow events. A sink without a subscriber drops
/// events silently.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<WalletEvent>>,
}

impl EventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WalletEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: WalletEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn action_progress(&self, step: ProgressStep, message: impl Into<String>) {
        self.emit(WalletEvent::ActionProgress {
            step,
            message: message.into(),
        });
    }

    pub fn action_error(&self, kind: ErrorKind, message: impl Into<String>) {
        self.emit(WalletEvent::ActionError {
            kind,
            message: message.into(),
        });
        self.emit(WalletEvent::AfterCall { success: false });
    }

    pub fn after_call(&self, success: bool) {
        self.emit(WalletEvent::AfterCall { success });
    }
}
