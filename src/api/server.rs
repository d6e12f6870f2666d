//! HTTP server lifecycle

use super::routes::{AppState, create_router};
use std::future::{Future, IntoFuture};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Serve the API until `signal` resolves
///
/// When the signal fires the manager is shut down first, so requests
/// waiting on a download observe the cancellation and can complete.
/// Open requests then get `grace` to drain before the server is dropped.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    signal: F,
    grace: Duration,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let manager = state.manager.clone();
    let (draining_tx, draining_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            signal.await;

            if tokio::time::timeout(grace, manager.shutdown())
                .await
                .is_err()
            {
                tracing::warn!(timeout_secs = grace.as_secs(), "Manager shutdown timed out");
            }
            let _ = draining_tx.send(());
        })
        .into_future();
    tokio::pin!(server);

    let drain_deadline = async move {
        if draining_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = &mut server => result,
        _ = drain_deadline => {
            tracing::warn!(
                timeout_secs = grace.as_secs(),
                "Requests still open after grace period, closing"
            );
            Ok(())
        }
    }
}
