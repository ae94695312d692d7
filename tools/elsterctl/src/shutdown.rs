//! Interrupt handling

use tracing::warn;

/// Resolve on Ctrl-C or SIGTERM, returning the signal name
pub async fn wait_for_shutdown() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => tokio::select! {
                _ = interrupt() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!("SIGTERM handler unavailable ({}), only Ctrl-C stops elsterctl", e);
                interrupt().await;
                "SIGINT"
            },
        }
    }
    #[cfg(not(unix))]
    {
        interrupt().await;
        "Ctrl-C"
    }
}

/// Ctrl-C; never resolves if the handler cannot be installed
async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}
