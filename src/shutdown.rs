use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel `token` when SIGTERM or SIGINT is received.
///
/// The signal path and the client `exit` command share the same token:
/// either way the listener stops accepting, queued jobs are drained with an
/// abort notice, and executing jobs finish normally. The signal handlers
/// are registered before this returns; only the wait runs in the
/// background.
pub fn install_shutdown_handler(token: &CancellationToken) {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let token = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }

        token.cancel();
    });
}
