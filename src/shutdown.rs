use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Returns a token cancelled on the first SIGTERM or SIGINT. Every long-lived
/// loop of the daemon watches it.
pub fn install_shutdown_handler() -> CancellationToken {
  let token = CancellationToken::new();
  let trigger = token.clone();

  tokio::spawn(async move {
    let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
      (Ok(term), Ok(int)) => (term, int),
      (Err(e), _) | (_, Err(e)) => {
        error!(error = %e, "Failed to install signal handlers, shutting down");
        trigger.cancel();
        return;
      }
    };

    tokio::select! {
      _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
      _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
    }
    trigger.cancel();
  });

  token
}
