/// Resolves when the process is asked to stop: SIGINT (Ctrl+C) or SIGTERM
/// (the kubelet's stop signal). Used as the graceful-shutdown future for
/// the gateway listener.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        let received = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        tracing::info!(signal = received, "shutdown signal received");
    }

    #[cfg(not(unix))]
    {
        // Only Ctrl+C exists off Unix.
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
        tracing::info!(signal = "ctrl-c", "shutdown signal received");
    }
}
