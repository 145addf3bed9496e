//! [`RpcClient`] – request/response client for [`RpcServer`]s.
//!
//! One WebSocket connection, one call in flight at a time.  Every call is
//! bounded by a timeout; a reply that arrives after its call timed out is
//! recognised by its `id` and discarded by the next call.
//!
//! [`RpcServer`]: crate::server::RpcServer

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use locoslam_types::{RpcRequest, RpcResponse, SlamError, SlamRequest};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::debug;
use uuid::Uuid;

/// Default bound on connecting and on each call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct RpcClient {
    url: String,
    stream: Mutex<WsStream>,
    timeout: Duration,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Connect to `url` with the default timeout.
    pub async fn connect(url: &str) -> Result<Self, SlamError> {
        Self::connect_with_timeout(url, DEFAULT_CALL_TIMEOUT).await
    }

    /// Connect to `url`; both the handshake and every later call are bounded
    /// by `timeout`.
    ///
    /// # Errors
    ///
    /// * [`SlamError::Timeout`] – the handshake did not finish in time.
    /// * [`SlamError::Transport`] – the connection was refused or failed.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, SlamError> {
        let (stream, _) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| SlamError::Timeout(format!("connecting to {url} after {timeout:?}")))?
            .map_err(|e| SlamError::Transport(format!("connecting to {url}: {e}")))?;
        debug!(url, "rpc client connected");
        Ok(Self {
            url: url.to_string(),
            stream: Mutex::new(stream),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Call `method` and return its raw JSON result.
    ///
    /// # Errors
    ///
    /// * [`SlamError::Timeout`] – no reply within the timeout.
    /// * [`SlamError::Transport`] – the connection failed or closed.
    /// * Any error the remote side reported for the call.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, SlamError> {
        let request = RpcRequest::new(method, params);
        let frame = serde_json::to_string(&request)
            .map_err(|e| SlamError::Transport(e.to_string()))?;

        let mut stream = self.stream.lock().await;
        tokio::time::timeout(self.timeout, exchange(&mut stream, request.id, frame))
            .await
            .map_err(|_| {
                SlamError::Timeout(format!("{method} on {} after {:?}", self.url, self.timeout))
            })?
    }

    /// Call `method` and decode the result into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, SlamError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| SlamError::InvalidParams {
            method: method.to_string(),
            details: format!("unexpected result shape: {e}"),
        })
    }

    /// Send a mapping-service request.
    pub async fn send(&self, request: &SlamRequest) -> Result<Value, SlamError> {
        let rpc = request.to_rpc();
        self.call(&rpc.method, rpc.params).await
    }
}

async fn exchange(stream: &mut WsStream, id: Uuid, frame: String) -> Result<Value, SlamError> {
    stream
        .send(Message::Text(frame.into()))
        .await
        .map_err(|e| SlamError::Transport(format!("ws send: {e}")))?;

    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let response: RpcResponse = serde_json::from_str(text.as_str())
                    .map_err(|e| SlamError::Transport(format!("malformed response: {e}")))?;
                if response.id != id {
                    debug!(stale = %response.id, "discarding reply to an abandoned call");
                    continue;
                }
                return response.into_result();
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(SlamError::Transport("connection closed by peer".to_string()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(SlamError::Transport(format!("ws read: {e}"))),
        }
    }
}
