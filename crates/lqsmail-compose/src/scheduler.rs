use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs one-shot delayed callbacks on the current tokio runtime.
#[derive(Debug, Default, Clone)]
pub struct NotificationScheduler;

impl NotificationScheduler {
    pub fn new() -> Self {
        Self
    }

    pub fn schedule<F>(&self, delay: Duration, on_expire: F) -> ScheduledClose
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let (outcome_tx, outcome) = watch::channel(None);
        let handle = tokio::spawn(async move {
            let fired = tokio::select! {
                biased;
                _ = cancelled.cancelled() => false,
                _ = tokio::time::sleep(delay) => {
                    on_expire();
                    true
                }
            };
            let _ = outcome_tx.send(Some(fired));
        });
        ScheduledClose {
            token,
            handle,
            outcome,
        }
    }
}

#[derive(Debug)]
pub struct ScheduledClose {
    token: CancellationToken,
    handle: JoinHandle<()>,
    outcome: watch::Receiver<Option<bool>>,
}

impl ScheduledClose {
    /// No effect once the callback has run.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// A waiter that leaves this handle (and its cancellation) in place.
    pub fn outcome(&self) -> CloseOutcome {
        CloseOutcome(self.outcome.clone())
    }

    /// Resolves to `true` if the callback ran.
    pub async fn wait(&self) -> bool {
        self.outcome().wait().await
    }
}

#[derive(Debug, Clone)]
pub struct CloseOutcome(watch::Receiver<Option<bool>>);

impl CloseOutcome {
    /// Resolves to `true` if the callback ran, `false` if it was cancelled.
    pub async fn wait(mut self) -> bool {
        match self.0.wait_for(Option::is_some).await {
            Ok(fired) => (*fired).unwrap_or(false),
            Err(_) => false,
        }
    }
}
