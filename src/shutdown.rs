use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel `token` on the first SIGTERM or SIGINT.
///
/// The runner watches the token, signals its plot processes and exits.
/// Fails only if the signal handlers cannot be registered.
pub fn install_shutdown_handler(token: CancellationToken) -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::error!("Received SIGTERM, terminating");
            }
            _ = sigint.recv() => {
                tracing::error!("Received SIGINT, terminating");
            }
            _ = token.cancelled() => return,
        }

        token.cancel();
    });

    Ok(())
}
