use std::future::Future;

use tracing::{error, info};

/// Returns a future that resolves when the process is asked to stop.
///
/// Listens for SIGINT everywhere, and for SIGTERM on Unix. On Unix the handlers are installed when this function is
/// called rather than when the future is first polled, so it must be called from within a Tokio runtime. If a handler
/// cannot be installed, the failure is logged and the remaining handlers are still waited on.
#[cfg(unix)]
pub fn shutdown_signal() -> impl Future<Output = ()> {
    use tokio::{
        select,
        signal::unix::{signal, Signal, SignalKind},
    };

    fn install(kind: SignalKind, name: &'static str) -> Option<Signal> {
        signal(kind)
            .map_err(|e| error!(error = %e, signal = name, "Failed to set up signal handler."))
            .ok()
    }

    async fn received(signal: &mut Option<Signal>) {
        match signal {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    let mut interrupt = install(SignalKind::interrupt(), "SIGINT");
    let mut terminate = install(SignalKind::terminate(), "SIGTERM");

    async move {
        select! {
            _ = received(&mut interrupt) => info!("Received SIGINT, shutting down..."),
            _ = received(&mut terminate) => info!("Received SIGTERM, shutting down..."),
        }
    }
}

/// Returns a future that resolves when the process is asked to stop.
///
/// Listens for Ctrl-C. If the handler cannot be installed, the failure is logged and the future never resolves.
#[cfg(not(unix))]
pub fn shutdown_signal() -> impl Future<Output = ()> {
    async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down..."),
            Err(e) => {
                error!(error = %e, "Failed to set up Ctrl-C handler.");
                std::future::pending::<()>().await;
            }
        }
    }
}
