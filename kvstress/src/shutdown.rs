//! Turns operator interrupts into a cancellation of the stress run.

use std::future::pending;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancels `token` once the process receives an interrupt.
///
/// Listens for Ctrl-C and, on unix, for `SIGTERM`. The returned task ends after cancelling, or
/// as soon as the token is cancelled by someone else.
pub fn on_interrupt(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupted() => {
                tracing::info!("interrupt is detected");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

async fn interrupted() {
    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "failed to listen for ctrl-c"
            );
            pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "failed to listen for SIGTERM"
                );
                pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listener_ends_when_token_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let listener = on_interrupt(token.clone());

        token.cancel();
        listener.await.unwrap();
    }
}
