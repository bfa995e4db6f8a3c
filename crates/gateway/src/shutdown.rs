//! Signal-driven drain of live sessions.

use std::{future::Future, time::Duration};

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::session::{CloseReport, SessionRegistry};

pub struct ShutdownCoordinator {
    registry: SessionRegistry,
    drain_timeout: Duration,
    per_session_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(registry: SessionRegistry, drain_timeout: Duration, per_session_timeout: Duration) -> Self {
        Self {
            registry,
            drain_timeout,
            per_session_timeout,
        }
    }

    /// Close every live session and refuse new ones. `None` when the whole
    /// drain overran `drain_timeout`; the registry is empty either way.
    pub async fn drain(&self) -> Option<CloseReport> {
        let ids = self.registry.ids().await;
        info!(sessions = ids.len(), "draining sessions");
        debug!(session_ids = ?ids, "sessions to close");

        match tokio::time::timeout(
            self.drain_timeout,
            self.registry.close_all(self.per_session_timeout),
        )
        .await
        {
            Ok(report) => {
                info!(
                    closed = report.closed,
                    failed = report.failed,
                    timed_out = report.timed_out,
                    "sessions drained"
                );
                Some(report)
            },
            Err(_) => {
                warn!(timeout = ?self.drain_timeout, "session drain timed out");
                None
            },
        }
    }

    /// Wait for `signal`, drain, then cancel `shutdown` so the HTTP server
    /// stops accepting work. Returns early if `shutdown` is cancelled first.
    pub async fn run<F>(self, signal: F, shutdown: CancellationToken) -> Option<CloseReport>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            () = signal => {},
            () = shutdown.cancelled() => return None,
        }
        info!("shutdown signal received");
        let report = self.drain().await;
        shutdown.cancel();
        report
    }
}

/// Resolve on SIGINT, SIGTERM or SIGQUIT (ctrl-c elsewhere).
pub async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}
