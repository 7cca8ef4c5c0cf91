//! HTTP facade for Courier.
//!
//! Exposes the message gateway as two GET endpoints, `/send` and `/status`.

mod routes;
mod state;

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

pub use routes::{SendParams, SendResponse};
pub use state::SharedState;

/// Build the router with all routes and CORS.
pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/send", get(routes::send_handler))
        .route("/status", get(routes::status_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<SharedState>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Handle to a running HTTP server.
#[derive(Default)]
pub struct HttpServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl HttpServerHandle {
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// The bound address; useful when started on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop the server gracefully and wait for in-flight requests.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Bind `host:port` and serve in a background task.
pub async fn start(
    state: Arc<SharedState>,
    host: &str,
    port: u16,
) -> Result<HttpServerHandle, String> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind HTTP server to {}: {}", addr, e))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read bound address: {}", e))?;

    log::info!("HTTP server listening on http://{}", local_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let shutdown = async {
            shutdown_rx.await.ok();
            log::info!("HTTP server shutting down");
        };
        if let Err(e) = serve(listener, state, shutdown).await {
            log::error!("HTTP server error: {}", e);
        }
    });

    Ok(HttpServerHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
        local_addr: Some(local_addr),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::testing::{build_manager, FakeConnector, MemoryCredentialStore};
    use courier_core::{GatewayConfig, MessageGateway};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn shared_state() -> Arc<SharedState> {
        let manager = build_manager(
            Arc::new(FakeConnector::new()),
            Arc::new(MemoryCredentialStore::registered()),
        );
        let gateway = MessageGateway::new(manager, GatewayConfig::default());
        Arc::new(SharedState::new(Arc::new(gateway)))
    }

    #[test]
    fn http_server_handle_default() {
        let handle = HttpServerHandle::default();
        assert!(!handle.is_running());
        assert!(handle.local_addr().is_none());
    }

    #[tokio::test]
    async fn rejects_invalid_address() {
        let result = start(shared_state(), "not an address", 0).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn server_answers_and_stops() {
        let mut handle = start(shared_state(), "127.0.0.1", 0).await.unwrap();
        assert!(handle.is_running());
        let addr = handle.local_addr().unwrap();

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /status HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"connected\":false"));

        handle.stop().await;
        assert!(!handle.is_running());
    }
}
