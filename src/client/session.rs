//! Session façade
//!
//! Presents the protocol as a small set of named operations (initialize,
//! document lifecycle, completion, executeCommand, shutdown) over one
//! spawned server process, and guarantees clean teardown on every exit
//! path. Request parameters are built from `lsp_types` so the shapes on
//! the wire match the protocol's published schema.

use crate::client::correlator::{Correlator, RequestError};
use crate::client::protocol::Notification;
use crate::client::transport::{ServerConfig, ServerTransport, TransportError};
use lsp_types::{
    ClientCapabilities, ClientInfo, CompletionClientCapabilities, CompletionContext,
    CompletionItemCapability, CompletionParams, CompletionTriggerKind,
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    ExecuteCommandParams, InitializeParams, InitializeResult, InitializedParams, Position,
    TextDocumentClientCapabilities, TextDocumentContentChangeEvent, TextDocumentIdentifier,
    TextDocumentItem, TextDocumentPositionParams, Uri, VersionedTextDocumentIdentifier,
};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Default window for a single request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `close` waits for a cooperative exit before killing.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of a session.
///
/// `Unstarted → Started → Initialized → ShuttingDown → Closed`; `close` is
/// reachable from every state and idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Started,
    Initialized,
    ShuttingDown,
    Closed,
}

/// Error types for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("initialize rejected by server: {message} (code {code})")]
    HandshakeRejected { code: i32, message: String },

    #[error("no initialize response within {timeout:?}")]
    HandshakeTimeout { timeout: Duration },

    #[error("server returned an error for `{method}`: {error}")]
    Server {
        method: String,
        error: crate::client::protocol::ResponseError,
    },

    #[error("`{operation}` is not valid in session state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("invalid document uri `{uri}`")]
    InvalidUri { uri: String },

    #[error("malformed `{method}` result: {source}")]
    MalformedResult {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode request params: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One protocol conversation with one spawned server process.
pub struct Session {
    config: ServerConfig,
    request_timeout: Duration,
    state: SessionState,
    correlator: Option<Correlator<ServerTransport>>,
    notifications: Option<mpsc::UnboundedReceiver<Notification>>,
}

impl Session {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            state: SessionState::Unstarted,
            correlator: None,
            notifications: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[allow(dead_code)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn expect_state(
        &self,
        operation: &'static str,
        valid: &[SessionState],
    ) -> Result<(), SessionError> {
        if valid.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn correlator_mut(
        &mut self,
        operation: &'static str,
    ) -> Result<&mut Correlator<ServerTransport>, SessionError> {
        let state = self.state;
        self.correlator
            .as_mut()
            .ok_or(SessionError::InvalidState { operation, state })
    }

    /// Spawn the server process. Fails with a startup error if it exits
    /// within the grace period.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.expect_state("start", &[SessionState::Unstarted])?;

        let transport = ServerTransport::start(&self.config).await?;
        let (correlator, notifications) = Correlator::new(transport);
        self.correlator = Some(correlator);
        self.notifications = Some(notifications);
        self.state = SessionState::Started;
        Ok(())
    }

    /// The `initialize` handshake. An error response or a missing response
    /// within the timeout is a handshake failure, fatal to session startup.
    pub async fn initialize(&mut self) -> Result<InitializeResult, SessionError> {
        self.expect_state("initialize", &[SessionState::Started])?;

        let params = serde_json::to_value(initialize_params())?;
        let timeout = self.request_timeout;
        let response = match self
            .correlator_mut("initialize")?
            .send_request("initialize", Some(params), timeout)
            .await
        {
            Ok(response) => response,
            Err(RequestError::Timeout { .. }) => {
                return Err(SessionError::HandshakeTimeout { timeout });
            }
            Err(other) => return Err(other.into()),
        };

        let result = response
            .into_result()
            .map_err(|error| SessionError::HandshakeRejected {
                code: error.code,
                message: error.message,
            })?;
        let result: InitializeResult =
            serde_json::from_value(result).map_err(|source| SessionError::MalformedResult {
                method: "initialize".to_string(),
                source,
            })?;

        self.state = SessionState::Initialized;
        info!(server_info = ?result.server_info, "session initialized");
        Ok(result)
    }

    /// The `initialized` notification, valid only after a successful
    /// `initialize`.
    pub async fn initialized(&mut self) -> Result<(), SessionError> {
        self.expect_state("initialized", &[SessionState::Initialized])?;
        let params = serde_json::to_value(InitializedParams {})?;
        self.correlator_mut("initialized")?
            .send_notification("initialized", Some(params))
            .await?;
        Ok(())
    }

    /// `textDocument/didOpen`: establishes the document and its language
    /// id, which the server uses to scope completion results.
    pub async fn did_open(
        &mut self,
        uri: &str,
        language_id: &str,
        text: &str,
    ) -> Result<(), SessionError> {
        self.expect_state("textDocument/didOpen", &[SessionState::Initialized])?;
        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: parse_uri(uri)?,
                language_id: language_id.to_string(),
                version: 1,
                text: text.to_string(),
            },
        };
        self.notify_value("textDocument/didOpen", serde_json::to_value(params)?)
            .await
    }

    /// `textDocument/didChange` with a full-content change.
    pub async fn did_change(
        &mut self,
        uri: &str,
        version: i32,
        text: &str,
    ) -> Result<(), SessionError> {
        self.expect_state("textDocument/didChange", &[SessionState::Initialized])?;
        let params = DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier {
                uri: parse_uri(uri)?,
                version,
            },
            content_changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: text.to_string(),
            }],
        };
        self.notify_value("textDocument/didChange", serde_json::to_value(params)?)
            .await
    }

    /// `textDocument/didClose`.
    pub async fn did_close(&mut self, uri: &str) -> Result<(), SessionError> {
        self.expect_state("textDocument/didClose", &[SessionState::Initialized])?;
        let params = DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier {
                uri: parse_uri(uri)?,
            },
        };
        self.notify_value("textDocument/didClose", serde_json::to_value(params)?)
            .await
    }

    /// `textDocument/completion` at a position. Returns the raw result
    /// payload; its shape (plain list or `CompletionList`) is the caller's
    /// to interpret.
    pub async fn completion(
        &mut self,
        uri: &str,
        line: u32,
        character: u32,
    ) -> Result<Value, SessionError> {
        self.expect_state("textDocument/completion", &[SessionState::Initialized])?;
        let params = CompletionParams {
            text_document_position: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier {
                    uri: parse_uri(uri)?,
                },
                position: Position { line, character },
            },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
            context: Some(CompletionContext {
                trigger_kind: CompletionTriggerKind::INVOKED,
                trigger_character: None,
            }),
        };
        self.request_value("textDocument/completion", serde_json::to_value(params)?)
            .await
    }

    /// `workspace/executeCommand`. Returns the raw result payload; domain
    /// semantics belong to the caller.
    pub async fn execute_command(
        &mut self,
        command: &str,
        arguments: Vec<Value>,
    ) -> Result<Value, SessionError> {
        self.expect_state("workspace/executeCommand", &[SessionState::Initialized])?;
        let params = ExecuteCommandParams {
            command: command.to_string(),
            arguments,
            work_done_progress_params: Default::default(),
        };
        self.request_value("workspace/executeCommand", serde_json::to_value(params)?)
            .await
    }

    /// Escape hatch for protocol methods the typed surface does not cover.
    #[allow(dead_code)]
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, SessionError> {
        self.expect_state("request", &[SessionState::Initialized])?;
        let timeout = self.request_timeout;
        let response = self
            .correlator_mut("request")?
            .send_request(method, params, timeout)
            .await?;
        response.into_result().map_err(|error| SessionError::Server {
            method: method.to_string(),
            error,
        })
    }

    /// Escape hatch for notifications the typed surface does not cover.
    #[allow(dead_code)]
    pub async fn notify(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), SessionError> {
        self.expect_state("notify", &[SessionState::Initialized])?;
        self.correlator_mut("notify")?
            .send_notification(method, params)
            .await?;
        Ok(())
    }

    /// Server notifications observed so far, without blocking.
    pub fn try_next_notification(&mut self) -> Option<Notification> {
        self.notifications
            .as_mut()
            .and_then(|sink| sink.try_recv().ok())
    }

    /// The protocol's two-step termination handshake: the `shutdown`
    /// request expects acknowledgement; the `exit` notification is sent
    /// afterward regardless of whether `shutdown` succeeded. Best-effort:
    /// a server that no longer answers is not an error here; `close` still
    /// guarantees the process goes away.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        self.expect_state("shutdown", &[SessionState::Initialized])?;
        self.state = SessionState::ShuttingDown;

        let timeout = self.request_timeout;
        match self
            .correlator_mut("shutdown")?
            .send_request("shutdown", None, timeout)
            .await
        {
            Ok(response) => {
                if let Err(error) = response.into_result() {
                    warn!("shutdown request rejected: {error}");
                }
            }
            Err(err) => warn!("shutdown request failed: {err}"),
        }

        if let Err(err) = self
            .correlator_mut("shutdown")?
            .send_notification("exit", None)
            .await
        {
            warn!("exit notification failed: {err}");
        }
        Ok(())
    }

    /// Terminate the server process and release the pipes. Valid in every
    /// state and idempotent; after the first call the process is no longer
    /// running. Kill-on-drop on the child covers the paths where even this
    /// is never reached.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if let Some(correlator) = self.correlator.as_mut() {
            if let Err(err) = correlator
                .transport_mut()
                .terminate(DEFAULT_CLOSE_GRACE)
                .await
            {
                warn!("error while terminating server process: {err}");
            }
        }
        self.correlator = None;
        self.notifications = None;
        self.state = SessionState::Closed;
        info!("session closed");
    }

    async fn request_value(
        &mut self,
        method: &'static str,
        params: Value,
    ) -> Result<Value, SessionError> {
        let timeout = self.request_timeout;
        let response = self
            .correlator_mut(method)?
            .send_request(method, Some(params), timeout)
            .await?;
        response.into_result().map_err(|error| SessionError::Server {
            method: method.to_string(),
            error,
        })
    }

    async fn notify_value(
        &mut self,
        method: &'static str,
        params: Value,
    ) -> Result<(), SessionError> {
        self.correlator_mut(method)?
            .send_notification(method, Some(params))
            .await?;
        Ok(())
    }
}

fn parse_uri(uri: &str) -> Result<Uri, SessionError> {
    Uri::from_str(uri).map_err(|_| SessionError::InvalidUri {
        uri: uri.to_string(),
    })
}

/// Client capabilities advertised to the server: snippet-flavored
/// completion with insert/replace and context support.
fn initialize_params() -> InitializeParams {
    InitializeParams {
        process_id: Some(std::process::id()),
        capabilities: ClientCapabilities {
            text_document: Some(TextDocumentClientCapabilities {
                completion: Some(CompletionClientCapabilities {
                    completion_item: Some(CompletionItemCapability {
                        snippet_support: Some(true),
                        insert_replace_support: Some(true),
                        deprecated_support: Some(true),
                        ..Default::default()
                    }),
                    context_support: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        client_info: Some(ClientInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        ..Default::default()
    }
}

// ============================================================================
// Tests
// ============================================================================
