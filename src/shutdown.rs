use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a handler for SIGTERM and SIGINT.
///
/// The returned token is cancelled on the first signal; the caller stops the
/// engine, which lets the in-flight job finish its bookkeeping and leaves
/// queued jobs on disk.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, stopping worker");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, stopping worker");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}
