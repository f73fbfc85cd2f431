//! Per-run deadline and cancellation.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::pipeline::error::StageError;

/// Execution context handed to every stage of one run.
///
/// Every suspension point in a stage goes through [`RunContext::guard`], so a slow collaborator
/// cannot outlive the caller's deadline or survive a cancellation.
#[derive(Clone, Debug, Default)]
pub struct RunContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Handle used by the caller to cancel runs sharing its context.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation to every context created from this handle.
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

impl RunContext {
    /// Context without deadline or cancellation.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    /// Attach a cancellation signal, returning the handle that triggers it.
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        self.cancel = Some(receiver);
        (self, CancelHandle { sender })
    }

    /// Whether the caller already asked for cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|receiver| *receiver.borrow())
            .unwrap_or(false)
    }

    /// Fail fast when the run should not start another stage.
    pub fn check(&self) -> Result<(), StageError> {
        if self.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(StageError::TimedOut);
        }
        Ok(())
    }

    /// Await `future` unless the run is cancelled or its deadline passes first.
    pub async fn guard<F, T>(&self, future: F) -> Result<T, StageError>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        let cancelled = wait_for_cancel(self.cancel.clone());
        let expired = wait_until(self.deadline);
        tokio::select! {
            output = future => Ok(output),
            _ = cancelled => Err(StageError::Cancelled),
            _ = expired => Err(StageError::TimedOut),
        }
    }
}

async fn wait_for_cancel(receiver: Option<watch::Receiver<bool>>) {
    let Some(mut receiver) = receiver else {
        return std::future::pending().await;
    };
    loop {
        if *receiver.borrow_and_update() {
            return;
        }
        if receiver.changed().await.is_err() {
            // Handle dropped without cancelling.
            return std::future::pending().await;
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
