use std::time::Duration;

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the cancellation token every background task watches, and the
/// handles of those tasks.
#[derive(Debug, Default)]
pub struct ShutdownGuard {
    token: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ShutdownGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Track a background task so `drain` can wait for it.
    pub fn track(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.push((name, handle));
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Cancel on SIGTERM or Ctrl+C.
    pub fn spawn_signal_listener(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to register SIGTERM handler");
                        return;
                    }
                };
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                    _ = signal::ctrl_c() => tracing::info!("received Ctrl+C, shutting down"),
                    _ = token.cancelled() => return,
                }
            }
            #[cfg(not(unix))]
            {
                tokio::select! {
                    _ = signal::ctrl_c() => tracing::info!("received Ctrl+C, shutting down"),
                    _ = token.cancelled() => return,
                }
            }
            token.cancel();
        });
    }

    /// Cancel and wait up to `grace` for tracked tasks. Stragglers are
    /// aborted. Returns how many had to be aborted.
    pub async fn drain(mut self, grace: Duration) -> usize {
        self.token.cancel();
        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0;
        for (name, mut handle) in self.tasks.drain(..) {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "background task stopped"),
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "background task ended abnormally"),
                Err(_) => {
                    tracing::warn!(task = name, "background task aborted after grace period");
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }
}
