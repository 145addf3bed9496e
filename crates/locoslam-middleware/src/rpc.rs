//! The handler seam and the call queue.
//!
//! Every server in this crate hands decoded frames to an [`RpcHandler`].  The
//! mapping service itself is not a handler: its grids are owned by a single
//! loop, so the server side is a [`CallQueue`] that forwards each call as a
//! [`RemoteCall`] and waits for the loop to answer it.
//!
//! ```text
//!  ws conn ─┐
//!  ws conn ─┼─► CallQueue ──mpsc──► ServiceLoop (one call at a time)
//!  ws conn ─┘       ▲                    │
//!                   └────── oneshot ─────┘
//! ```

use async_trait::async_trait;
use locoslam_types::{SlamError, SlamReply, SlamRequest};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Anything that can answer a decoded request frame.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Answer `method` called with `params`.
    async fn handle(&self, method: &str, params: Value) -> Result<Value, SlamError>;
}

/// A decoded call waiting for the service loop, plus the channel its answer
/// goes back on.
#[derive(Debug)]
pub struct RemoteCall {
    pub request: SlamRequest,
    reply: oneshot::Sender<Result<SlamReply, SlamError>>,
}

impl RemoteCall {
    /// Build a call and the receiver its answer will arrive on.
    pub fn new(request: SlamRequest) -> (Self, oneshot::Receiver<Result<SlamReply, SlamError>>) {
        let (reply, rx) = oneshot::channel();
        (Self { request, reply }, rx)
    }

    /// Send the outcome back to the caller.  A caller that has gone away
    /// (timed out, disconnected) is not an error.
    pub fn respond(self, outcome: Result<SlamReply, SlamError>) {
        let method = self.request.method();
        if self.reply.send(outcome).is_err() {
            debug!(method, "caller went away before the reply was ready");
        }
    }
}

/// Sending half of the service's call queue.  Cheap to clone; one clone per
/// connection.
#[derive(Debug, Clone)]
pub struct CallQueue {
    tx: mpsc::Sender<RemoteCall>,
}

/// Create a call queue holding up to `capacity` pending calls.
pub fn call_queue(capacity: usize) -> (CallQueue, mpsc::Receiver<RemoteCall>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CallQueue { tx }, rx)
}

impl CallQueue {
    /// Queue `request` and wait for the loop's answer.
    ///
    /// # Errors
    ///
    /// Returns [`SlamError::Transport`] if the loop has stopped, otherwise
    /// whatever error the service raised for the call.
    pub async fn submit(&self, request: SlamRequest) -> Result<SlamReply, SlamError> {
        let (call, rx) = RemoteCall::new(request);
        self.tx
            .send(call)
            .await
            .map_err(|_| SlamError::Transport("service loop is not accepting calls".to_string()))?;
        rx.await
            .map_err(|_| SlamError::Transport("service loop dropped the call".to_string()))?
    }
}

#[async_trait]
impl RpcHandler for CallQueue {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, SlamError> {
        let request = SlamRequest::from_rpc(method, params)?;
        let reply = self.submit(request).await?;
        serde_json::to_value(reply).map_err(|e| SlamError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locoslam_types::MapCell;
    use serde_json::json;

    #[tokio::test]
    async fn submitted_call_reaches_the_receiver_and_gets_its_reply() {
        let (queue, mut rx) = call_queue(4);
        let consumer = tokio::spawn(async move {
            let call = rx.recv().await.unwrap();
            assert_eq!(call.request, SlamRequest::GetMapResolution);
            call.respond(Ok(SlamReply::Resolution(5)));
        });

        let reply = queue.submit(SlamRequest::GetMapResolution).await.unwrap();
        assert_eq!(reply, SlamReply::Resolution(5));
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn handle_encodes_the_reply_as_json() {
        let (queue, mut rx) = call_queue(1);
        tokio::spawn(async move {
            let call = rx.recv().await.unwrap();
            call.respond(Ok(SlamReply::Cell(MapCell::new(3, 4))));
        });

        let value = queue.handle("real2map", json!({"x": 0.0, "y": 0.0})).await.unwrap();
        assert_eq!(value, json!({"row": 3, "col": 4}));
    }

    #[tokio::test]
    async fn unknown_method_never_reaches_the_loop() {
        let (queue, mut rx) = call_queue(1);
        let err = queue.handle("explode", Value::Null).await.unwrap_err();
        assert_eq!(err, SlamError::UnknownMethod("explode".to_string()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn service_errors_are_passed_through() {
        let (queue, mut rx) = call_queue(1);
        tokio::spawn(async move {
            let call = rx.recv().await.unwrap();
            call.respond(Err(SlamError::OutOfBounds { row: 9, col: 9, rows: 4, cols: 4 }));
        });
        let err = queue.submit(SlamRequest::GetMap).await.unwrap_err();
        assert!(matches!(err, SlamError::OutOfBounds { .. }));
    }

    #[tokio::test]
    async fn stopped_loop_is_a_transport_error() {
        let (queue, rx) = call_queue(1);
        drop(rx);
        let err = queue.submit(SlamRequest::GetMap).await.unwrap_err();
        assert!(matches!(err, SlamError::Transport(_)));
    }

    #[tokio::test]
    async fn dropped_call_is_a_transport_error() {
        let (queue, mut rx) = call_queue(1);
        tokio::spawn(async move {
            let call = rx.recv().await.unwrap();
            drop(call);
        });
        let err = queue.submit(SlamRequest::UpdateMap).await.unwrap_err();
        assert!(matches!(err, SlamError::Transport(_)));
    }
}
