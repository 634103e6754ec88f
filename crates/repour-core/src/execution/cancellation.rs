use std::sync::Arc;

use tokio::sync::watch;

/// Cooperative cancellation signal shared between the task registry and the
/// process wait loop of the task it belongs to.
#[derive(Clone, Debug)]
pub struct TaskCancellationToken {
    signal: Arc<watch::Sender<bool>>,
}

impl Default for TaskCancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskCancellationToken {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            signal: Arc::new(signal),
        }
    }

    /// Returns `true` only for the call that flipped the token.
    pub fn cancel(&self) -> bool {
        self.signal.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }

    pub async fn cancelled(&self) {
        let mut receiver = self.signal.subscribe();
        // The sender lives inside `self`, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}
