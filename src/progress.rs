//! Lightweight progress signal.
//!
//! The reducer emits one opaque pulse per consumed stat. Pulses are lossy:
//! a slow listener drops pulses instead of ever blocking the run.

use tokio::sync::mpsc;

/// Sending half of the progress channel, installed on the runner for
/// count-driven runs.
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<()>,
}

impl ProgressSender {
    /// Emits one pulse; silently dropped when the listener lags or is gone.
    pub(crate) fn pulse(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Creates a progress channel with the given buffer capacity.
pub fn channel(capacity: usize) -> (ProgressSender, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProgressSender { tx }, rx)
}
