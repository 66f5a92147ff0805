//! Cooperative cancellation shared by both loops.
//!
//! Every suspension point (adapter invocation, gate wait, quality subprocess,
//! plan re-read) races this token so Ctrl-C and parent-imposed timeouts
//! resolve in-flight work promptly instead of leaving the process stuck.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A shared, cheaply-cloneable cancellation flag with an async wait primitive.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Resolves immediately if already cancelled, otherwise waits for `cancel()`.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }

    /// Runs `fut` to completion unless cancellation wins the race first.
    pub async fn race<F, T>(&self, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Installs a Ctrl-C handler that cancels this token. Only meaningful to
    /// call once per process; later calls silently overwrite the handler like
    /// `ctrlc::set_handler` itself does.
    pub fn install_ctrlc(&self) -> crate::Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            tracing::info!("received interrupt, cancelling");
            token.cancel();
        })
        .map_err(|e| crate::Error::Config(format!("failed to install signal handler: {e}")))?;
        Ok(())
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn race_returns_none_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let out = token.race(async { 1 }).await;
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn race_returns_some_when_future_wins() {
        let token = CancellationToken::new();
        let out = token.race(async { 42 }).await;
        assert_eq!(out, Some(42));
    }
}
