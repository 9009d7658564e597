//! The `Service` contract every daemon in this crate implements, and a
//! small host that runs one to completion while wiring up SIGTERM/SIGINT.
//!
//! Reconstructed from the teacher's `impl Service for JobWorker<S>` usage
//! (`kernel/jobs/worker.rs`) — the trait's own defining file wasn't present
//! in the retrieved pack, so the shape here is inferred from that call
//! site plus the graceful-shutdown behavior it implements.

use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub trait Service: Send {
    fn name(&self) -> &'static str;

    fn run(
        self: Box<Self>,
        shutdown: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// Runs `service` until it returns or a shutdown signal (SIGTERM/SIGINT) is
/// received, whichever comes first.
pub async fn run_service(service: Box<dyn Service>) -> Result<()> {
    let shutdown = CancellationToken::new();
    let name = service.name();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let _ = wait_for_shutdown_signal().await;
        info!(service = name, "shutdown signal received");
        signal_token.cancel();
    });

    info!(service = name, "starting");
    let result = service.run(shutdown).await;
    info!(service = name, "stopped");
    result
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
