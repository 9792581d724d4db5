//! Shutdown signal handling for the service.
//!
//! SIGINT, SIGTERM and SIGHUP all request a graceful shutdown. Handlers are
//! tokio's signal streams, so nothing runs in signal context.

use log::{info, warn};
use tokio::signal::unix::{signal, SignalKind};

/// Signals that request shutdown
fn shutdown_signals() -> [(SignalKind, &'static str); 3] {
    [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::hangup(), "SIGHUP"),
    ]
}

/// Resolve once any shutdown signal arrives. Returns the signal's name.
///
/// A signal whose stream cannot be installed is skipped with a warning; if
/// none can be installed this falls back to Ctrl+C.
pub async fn shutdown_signal() -> &'static str {
    let mut streams = Vec::new();
    for (kind, name) in shutdown_signals() {
        match signal(kind) {
            Ok(stream) => streams.push((stream, name)),
            Err(e) => warn!("Failed to install {} handler: {}", name, e),
        }
    }

    if streams.is_empty() {
        let _ = tokio::signal::ctrl_c().await;
        return "SIGINT";
    }
    info!("Signal handlers installed (SIGINT, SIGTERM, SIGHUP)");

    let waits = streams.iter_mut().map(|(stream, name)| {
        let name: &'static str = *name;
        Box::pin(async move {
            stream.recv().await;
            name
        })
    });
    let (name, _, _) = futures::future::select_all(waits).await;
    info!("Received {}, shutting down", name);
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{raise, Signal};
    use std::time::Duration;

    #[tokio::test]
    async fn test_sighup_requests_shutdown() {
        let waiter = tokio::spawn(shutdown_signal());
        // Let the handlers install before raising
        tokio::time::sleep(Duration::from_millis(100)).await;
        raise(Signal::SIGHUP).unwrap();

        let name = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(name, "SIGHUP");
    }
}
