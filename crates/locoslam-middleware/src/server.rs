//! [`RpcServer`] – JSON-over-WebSocket request server.
//!
//! Every text frame is one [`RpcRequest`]; the server answers each with an
//! [`RpcResponse`] carrying the same `id`.  Connections are served
//! concurrently, one task each; requests on one connection are answered in
//! order.
//!
//! # Example
//!
//! ```rust,no_run
//! use locoslam_middleware::{NameServer, RpcServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bound = RpcServer::new(NameServer::default())
//!         .bind("127.0.0.1:9090".parse().unwrap())
//!         .await
//!         .expect("bind failed");
//!     println!("registry at {}", bound.url());
//!     bound.serve().await.expect("registry failed");
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use locoslam_types::{RpcRequest, RpcResponse, SlamError};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, warn};

use crate::rpc::RpcHandler;

// ────────────────────────────────────────────────────────────────────────────
// RpcServer
// ────────────────────────────────────────────────────────────────────────────

/// A server that has a handler but no socket yet.
pub struct RpcServer {
    handler: Arc<dyn RpcHandler>,
}

impl RpcServer {
    pub fn new(handler: impl RpcHandler + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Bind the listening socket.  Port `0` picks an ephemeral port; read it
    /// back with [`BoundServer::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns [`SlamError::Transport`] if the address cannot be bound.
    pub async fn bind(self, addr: SocketAddr) -> Result<BoundServer, SlamError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SlamError::Transport(format!("ws bind error on {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SlamError::Transport(format!("ws bind error on {addr}: {e}")))?;
        Ok(BoundServer {
            listener,
            local_addr,
            handler: self.handler,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BoundServer
// ────────────────────────────────────────────────────────────────────────────

/// A server with a bound socket, ready to accept connections.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<dyn RpcHandler>,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL other processes use to reach this server.
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Accept connections until the task is dropped.  Accept errors are
    /// logged and do not stop the server.
    pub async fn serve(self) -> Result<(), SlamError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, handler).await {
                            warn!(peer = %peer, error = %e, "rpc connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    /// Run [`serve`](Self::serve) on a background task.
    pub fn spawn(self) -> JoinHandle<Result<(), SlamError>> {
        tokio::spawn(self.serve())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn RpcHandler>,
) -> Result<(), SlamError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| SlamError::Transport(format!("ws handshake from {peer}: {e}")))?;
    debug!(peer = %peer, "rpc client connected");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(SlamError::Transport(format!("ws read from {peer}: {e}"))),
        };

        let request: RpcRequest = match serde_json::from_str(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                warn!(peer = %peer, error = %e, "dropping malformed request frame");
                continue;
            }
        };

        let outcome = handler.handle(&request.method, request.params).await;
        if let Err(e) = &outcome {
            debug!(peer = %peer, method = %request.method, error = %e, "call failed");
        }
        let response = RpcResponse::from_result(request.id, outcome);
        let json = serde_json::to_string(&response)
            .map_err(|e| SlamError::Transport(e.to_string()))?;
        if ws_tx.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }

    debug!(peer = %peer, "rpc client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tokio_tungstenite::connect_async;
    use uuid::Uuid;

    struct Echo;

    #[async_trait]
    impl RpcHandler for Echo {
        async fn handle(&self, method: &str, params: Value) -> Result<Value, SlamError> {
            match method {
                "echo" => Ok(params),
                other => Err(SlamError::UnknownMethod(other.to_string())),
            }
        }
    }

    async fn start_echo() -> String {
        let bound = RpcServer::new(Echo)
            .bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let url = bound.url();
        bound.spawn();
        url
    }

    #[tokio::test]
    async fn bind_to_port_zero_reports_real_port() {
        let bound = RpcServer::new(Echo)
            .bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert_ne!(bound.local_addr().port(), 0);
        assert!(bound.url().starts_with("ws://127.0.0.1:"));
    }

    #[tokio::test]
    async fn answers_with_matching_id() {
        let url = start_echo().await;
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

        let request = RpcRequest::new("echo", json!({"a": 1}));
        let frame = serde_json::to_string(&request).unwrap();
        ws.send(Message::Text(frame.into())).await.unwrap();

        let Some(Ok(Message::Text(text))) = ws.next().await else {
            panic!("expected a text frame");
        };
        let response: RpcResponse = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(response.id, request.id);
        assert_eq!(response.into_result().unwrap(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn handler_error_is_returned_not_fatal() {
        let url = start_echo().await;
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

        for method in ["nope", "echo"] {
            let request = RpcRequest::new(method, Value::Null);
            let frame = serde_json::to_string(&request).unwrap();
            ws.send(Message::Text(frame.into())).await.unwrap();
            let Some(Ok(Message::Text(text))) = ws.next().await else {
                panic!("expected a text frame");
            };
            let response: RpcResponse = serde_json::from_str(text.as_str()).unwrap();
            match method {
                "nope" => assert_eq!(
                    response.into_result().unwrap_err(),
                    SlamError::UnknownMethod("nope".to_string())
                ),
                _ => assert_eq!(response.into_result().unwrap(), Value::Null),
            }
        }
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let url = start_echo().await;
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

        ws.send(Message::Text("not json".into())).await.unwrap();
        let request = RpcRequest {
            id: Uuid::new_v4(),
            method: "echo".to_string(),
            params: json!(7),
        };
        ws.send(Message::Text(serde_json::to_string(&request).unwrap().into()))
            .await
            .unwrap();

        let Some(Ok(Message::Text(text))) = ws.next().await else {
            panic!("expected a text frame");
        };
        let response: RpcResponse = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(response.id, request.id);
    }
}
