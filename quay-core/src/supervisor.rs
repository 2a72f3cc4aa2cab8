//! Process-level termination handling.
//!
//! The supervisor owns the root cancellation token: background tasks take
//! child tokens, the engine watches it for drain, and shutdown handlers run
//! in reverse registration order once the token fires. Handler failures are
//! logged and swallowed so one broken handler cannot skip the rest.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Mutex;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

type HandlerFuture =
    Pin<Box<dyn Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send>>;

pub type ShutdownHandler = Box<dyn FnOnce() -> HandlerFuture + Send>;

pub struct Supervisor {
    cancel: CancellationToken,
    handlers: Mutex<Vec<ShutdownHandler>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Root token. Background tasks should spawn against
    /// `cancellation_token().child_token()`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register a shutdown handler. Handlers run LIFO after the wait
    /// releases; register them before the server starts serving.
    pub fn register_shutdown_handler<F, Fut>(&self, handler: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send + 'static,
    {
        self.handlers
            .lock()
            .expect("supervisor lock poisoned")
            .push(Box::new(move || Box::pin(handler())));
    }

    /// Programmatic shutdown, equivalent to receiving a termination signal.
    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Block until a termination signal fires or [`request_shutdown`] is
    /// called, then run every registered handler in LIFO order.
    ///
    /// [`request_shutdown`]: Supervisor::request_shutdown
    pub async fn wait_for_shutdown_signal(&self) {
        tokio::select! {
            _ = termination_signal() => {
                info!("termination signal received, starting graceful shutdown");
            }
            _ = self.cancel.cancelled() => {
                info!("shutdown requested, starting graceful shutdown");
            }
        }
        self.cancel.cancel();
        self.run_handlers().await;
    }

    async fn run_handlers(&self) {
        loop {
            let handler = self
                .handlers
                .lock()
                .expect("supervisor lock poisoned")
                .pop();
            let Some(handler) = handler else { break };
            match AssertUnwindSafe(handler()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(error = %err, "shutdown handler failed"),
                Err(_) => error!("shutdown handler panicked"),
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

async fn termination_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM hook");
                return std::future::pending::<()>().await;
            }
        };
        let mut sigquit = match signal(SignalKind::quit()) {
            Ok(s) => s,
            Err(err) => {
                error!(error = %err, "failed to install SIGQUIT hook");
                return std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigquit.recv() => {}
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn request_shutdown_releases_wait() {
        let supervisor = Arc::new(Supervisor::new());
        let waiter = supervisor.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_shutdown_signal().await });
        supervisor.request_shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("wait did not release")
            .unwrap();
    }

    #[tokio::test]
    async fn handlers_run_in_reverse_registration_order() {
        let supervisor = Supervisor::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            supervisor.register_shutdown_handler(move || async move {
                order.lock().unwrap().push(tag);
                Ok(())
            });
        }
        supervisor.request_shutdown();
        supervisor.wait_for_shutdown_signal().await;
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn failing_handler_does_not_skip_the_rest() {
        let supervisor = Supervisor::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        supervisor.register_shutdown_handler(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        supervisor.register_shutdown_handler(|| async { Err("boom".into()) });
        let counter = ran.clone();
        supervisor.register_shutdown_handler(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        supervisor.request_shutdown();
        supervisor.wait_for_shutdown_signal().await;
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn background_task_stops_on_cancellation() {
        let supervisor = Supervisor::new();
        let token = supervisor.cancellation_token().child_token();
        let task = tokio::spawn(async move { token.cancelled().await });
        supervisor.request_shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("task did not stop")
            .unwrap();
    }
}
