//! Request/response correlation
//!
//! Matches outgoing requests to their eventual responses amid interleaved,
//! asynchronously delivered server notifications. Servers emit unsolicited
//! notifications (log messages, diagnostics) at any point; a naive
//! read-one-expect-one client deadlocks on them or mistakes them for the
//! awaited response. The receive loop here forwards everything that is not
//! the matching response to a side channel and keeps reading.
//!
//! Single-caller by contract: `send_request` takes `&mut self`, so a second
//! concurrent protocol caller is rejected at compile time. Its receive
//! loop would otherwise consume another caller's response.

use crate::client::protocol::{Message, Notification, Request, Response};
use crate::client::transport::{Transport, TransportError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Error types for request correlation
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Recoverable: the request may be retried or abandoned; it does not
    /// imply the server is dead.
    #[error("no response to `{method}` within {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// Fatal: the server closed its output stream, which means the process
    /// exited.
    #[error("server closed its output stream while awaiting response to `{method}`")]
    ServerDied { method: String },
}

/// A request that has been sent and awaits its response.
struct PendingRequest {
    id: i64,
    method: String,
    sent_at: Instant,
}

/// Allocates request ids and routes inbound traffic: the matching response
/// back to the caller, everything else to the notification sink.
pub struct Correlator<T: Transport> {
    transport: T,
    last_id: i64,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl<T: Transport> Correlator<T> {
    /// Wrap a transport; the returned receiver observes every server
    /// notification exactly once, in arrival order.
    pub fn new(transport: T) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (notifications, sink) = mpsc::unbounded_channel();
        (
            Self {
                transport,
                last_id: 0,
                notifications,
            },
            sink,
        )
    }

    /// Fresh, strictly increasing request id. Ids start at 1 and are never
    /// reused within a session.
    pub fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Send a request and read until its response arrives.
    ///
    /// Notifications observed along the way go to the sink; responses that
    /// match no outstanding request (including late answers to requests
    /// already abandoned by a timeout) are dropped, as are server-to-client
    /// requests, since this client services none. The server may answer out
    /// of order; matching is purely by id, never by send order.
    pub async fn send_request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<Response, RequestError> {
        let pending = PendingRequest {
            id: self.next_id(),
            method: method.to_string(),
            sent_at: Instant::now(),
        };
        let deadline = pending.sent_at + timeout;

        trace!(id = pending.id, method, "sending request");
        self.transport
            .send(&Message::Request(Request::new(pending.id, method, params)))
            .await?;

        loop {
            let received = match tokio::time::timeout_at(deadline, self.transport.receive()).await
            {
                Ok(result) => result?,
                Err(_) => {
                    debug!(id = pending.id, method, "request timed out after {timeout:?}");
                    return Err(RequestError::Timeout {
                        method: pending.method,
                        timeout,
                    });
                }
            };

            match received {
                None => {
                    return Err(RequestError::ServerDied {
                        method: pending.method,
                    });
                }
                Some(Message::Response(response)) if response.is_for(pending.id) => {
                    trace!(
                        id = pending.id,
                        elapsed = ?pending.sent_at.elapsed(),
                        "response matched"
                    );
                    return Ok(response);
                }
                Some(Message::Response(unmatched)) => {
                    debug!(id = ?unmatched.id, "dropping response with no pending request");
                }
                Some(Message::Notification(notification)) => {
                    trace!(method = %notification.method, "forwarding server notification");
                    let _ = self.notifications.send(notification);
                }
                Some(Message::Request(request)) => {
                    debug!(
                        method = %request.method,
                        "dropping unsupported server-to-client request"
                    );
                }
            }
        }
    }

    /// Fire-and-forget: no id, no waiting, no failure path beyond
    /// transport-level write errors.
    pub async fn send_notification(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), RequestError> {
        trace!(method, "sending notification");
        self.transport
            .send(&Message::Notification(Notification::new(method, params)))
            .await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
