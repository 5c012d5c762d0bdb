/// Signal handling for graceful shutdown of the monitor.
///
/// SIGINT (Ctrl-C) and SIGTERM both stop the watch loop; the terminal sync
/// still runs before the process exits.
use tokio::signal::unix::{signal, SignalKind};

/// Resolves once SIGINT or SIGTERM is received.
///
/// If a handler cannot be installed the corresponding branch never resolves,
/// so the monitor keeps running until the application exits.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, finishing up"),
        _ = terminate => tracing::info!("received SIGTERM, finishing up"),
    }
}
