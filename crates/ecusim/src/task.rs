//! Background task with a shutdown signal and join-on-stop semantics

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

/// A spawned loop that watches a shutdown flag
///
/// The loop receives a `watch::Receiver<bool>` and is expected to exit
/// promptly once the value flips to `true`, including while sleeping.
pub(crate) struct BackgroundTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub(crate) fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(body(rx));
        Self { shutdown, handle }
    }

    /// Signal the loop and wait until it has fully exited
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!(?e, "Background task panicked");
            }
        }
    }

    /// Cancel without waiting. Only for use from `Drop`.
    pub(crate) fn abort(&self) {
        self.handle.abort();
    }
}

/// Resolves once the shutdown flag is set (or its sender is gone)
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
