use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

/// One-shot completion notification.
///
/// Any number of trigger sources hold a [`CompletionNotifier`]; the first
/// `notify` wins and later ones are no-ops. Waiters resolve once, whether the
/// notification arrived before or after they started waiting.
pub struct CompletionSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

/// Trigger side of a [`CompletionSignal`].
#[derive(Clone)]
pub struct CompletionNotifier {
    tx: Arc<watch::Sender<bool>>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Hand out a trigger for this signal.
    pub fn notifier(&self) -> CompletionNotifier {
        CompletionNotifier {
            tx: Arc::clone(&self.tx),
        }
    }

    /// Check if the signal has fired.
    pub fn is_complete(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until some trigger fires.
    pub async fn wait(&mut self) {
        // The signal keeps its own sender alive, so the channel cannot close under us.
        let _ = self.rx.wait_for(|done| *done).await;
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionNotifier {
    /// Fire the signal. Returns true only for the call that actually fired it.
    pub fn notify(&self) -> bool {
        let fired = self.tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        });
        if fired {
            debug!("Completion signal fired");
        }
        fired
    }
}
