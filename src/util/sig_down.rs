use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Turns SIGINT/SIGTERM into a cancelled [`CancellationToken`].
pub struct SigDown {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl SigDown {
    /// Starts listening for shutdown signals.
    ///
    /// Fails if the signal handlers cannot be registered.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let signals = shutdown_signals()?;
        let cancel = token.clone();
        tracker.spawn(async move {
            tokio::select! {
                signal = signals => {
                    tracing::info!(signal, "Shutdown signal received");
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        });
        tracker.close();
        Ok(Self { tracker, token })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves once shutdown was requested and the listener task has exited.
    pub async fn recv(&self) {
        self.token.cancelled().await;
        self.tracker.wait().await;
    }
}

#[cfg(unix)]
fn shutdown_signals() -> std::io::Result<impl Future<Output = &'static str> + Send + 'static> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signals() -> std::io::Result<impl Future<Output = &'static str> + Send + 'static> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    })
}
