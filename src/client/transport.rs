//! Transport layer - child process ownership and framed message exchange
//!
//! Owns the server process and its three pipes, exposing `send`/`receive`
//! built on the framing layer plus process lifecycle (startup validation,
//! cooperative termination, force kill). The child's pipes are owned
//! exclusively here; no other component touches them.

use crate::client::framing::{FrameReader, FrameWriter, FramingError};
use crate::client::protocol::Message;
use crate::client::stderr::StderrMonitor;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// How long `start` waits before checking that the server survived launch.
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(300);

/// Error types for the transport layer
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to spawn server process `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("server process exited during startup (exit code {code:?})")]
    Startup { code: Option<i32> },

    #[error("server stdin closed (broken pipe)")]
    BrokenPipe,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(FramingError),
}

impl From<FramingError> for TransportError {
    fn from(err: FramingError) -> Self {
        match err {
            FramingError::Io(e) => TransportError::Io(e),
            other => TransportError::Protocol(other),
        }
    }
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Bidirectional framed message exchange.
///
/// The seam between correlation logic and I/O: the correlator only ever
/// sees this trait, so it can be tested against a scripted transport.
#[async_trait]
pub trait Transport: Send {
    /// Send one message. Fails if the peer is gone.
    async fn send(&mut self, message: &Message) -> Result<(), TransportError>;

    /// Receive the next message, suspending until one is framed.
    /// `Ok(None)` means the peer closed its output stream.
    async fn receive(&mut self) -> Result<Option<Message>, TransportError>;
}

// ============================================================================
// Server Configuration
// ============================================================================

/// Describes the server process to spawn.
///
/// The environment overlay is applied on top of the inherited environment
/// and is opaque to the engine: it carries whatever the server consumes
/// (log verbosity, database location) without interpreting it.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub startup_grace: Duration,
}

impl ServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            startup_grace: DEFAULT_STARTUP_GRACE,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[allow(dead_code)]
    pub fn startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }
}

// ============================================================================
// Server Transport
// ============================================================================

/// Transport over a spawned server process's stdio pipes.
pub struct ServerTransport {
    child: Child,
    /// `None` once stdin has been closed (termination or broken pipe).
    writer: Option<FrameWriter<ChildStdin>>,
    reader: FrameReader<ChildStdout>,
    stderr: StderrMonitor,
}

impl ServerTransport {
    /// Spawn the server and validate that it survives the startup grace
    /// period; a child that exits first yields `Startup` with its exit code.
    pub async fn start(config: &ServerConfig) -> Result<Self, TransportError> {
        info!(command = %config.command, args = ?config.args, "starting server process");

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: config.command.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("server stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("server stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("server stderr was not captured"))?;

        // Stderr drains on its own task for the process's whole lifetime.
        let stderr = StderrMonitor::spawn(stderr);

        tokio::time::sleep(config.startup_grace).await;
        if let Some(status) = child.try_wait()? {
            return Err(TransportError::Startup {
                code: status.code(),
            });
        }

        info!(pid = ?child.id(), "server process started");
        Ok(Self {
            child,
            writer: Some(FrameWriter::new(stdin)),
            reader: FrameReader::new(stdout),
            stderr,
        })
    }

    /// Whether the child process has not yet been observed to exit.
    #[allow(dead_code)]
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    #[allow(dead_code)]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next classified stderr line from the server, if any arrived.
    #[allow(dead_code)]
    pub fn try_next_diagnostic(&mut self) -> Option<crate::client::stderr::DiagnosticLine> {
        self.stderr.try_next_line()
    }

    /// Request cooperative termination by closing the server's stdin (a
    /// stdio server exits when its input ends), escalating to a kill if it
    /// has not exited within `grace`. Always reaps the child.
    pub async fn terminate(&mut self, grace: Duration) -> Result<Option<i32>, TransportError> {
        self.writer.take();

        let status = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!("server did not exit within {grace:?}, killing");
                self.child.kill().await?;
                self.child.wait().await?
            }
        };

        info!(code = ?status.code(), "server process exited");
        Ok(status.code())
    }
}

#[async_trait]
impl Transport for ServerTransport {
    async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        // A write after process death is a broken pipe, not whatever
        // secondary error the closed stream would produce.
        if self.child.try_wait()?.is_some() {
            self.writer.take();
            return Err(TransportError::BrokenPipe);
        }

        let writer = self.writer.as_mut().ok_or(TransportError::BrokenPipe)?;
        writer.write(message).await.map_err(|err| match err {
            FramingError::Io(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                TransportError::BrokenPipe
            }
            other => other.into(),
        })
    }

    async fn receive(&mut self) -> Result<Option<Message>, TransportError> {
        let message = self.reader.read().await?;
        if message.is_none() {
            debug!("server output stream closed");
        }
        Ok(message)
    }
}

// ============================================================================
// Mock Transport
// ============================================================================

/// Scripted transport for exercising correlation logic without a process.
///
/// Cloning shares the underlying queues, so a test can hold one handle to
/// feed inbound messages while the correlator owns another.
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct MockTransport {
    inbound: std::sync::Arc<std::sync::Mutex<std::collections::VecDeque<Message>>>,
    sent: std::sync::Arc<std::sync::Mutex<Vec<Message>>>,
    closed: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            inbound: Default::default(),
            sent: Default::default(),
            closed: Default::default(),
        }
    }

    /// Queue a message for a later `receive` call.
    pub fn push(&self, message: Message) {
        self.inbound.lock().unwrap().push_back(message);
    }

    /// After the queue drains, `receive` reports end-of-stream.
    pub fn close_stream(&self) {
        self.closed
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Everything sent through this transport, in order.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Message>, TransportError> {
        loop {
            if let Some(message) = self.inbound.lock().unwrap().pop_front() {
                return Ok(Some(message));
            }
            if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::protocol::{Notification, Request};
    use crate::test_utils::StubServer;
    use serde_json::json;

    #[tokio::test]
    async fn test_start_and_terminate() {
        let stub = StubServer::respond_then_wait(&[]);
        let mut transport = ServerTransport::start(&stub.config()).await.unwrap();

        assert!(transport.is_alive());
        assert!(transport.pid().is_some());

        // Closing stdin is enough: the stub exits when its input ends.
        let code = transport
            .terminate(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code, Some(0));
        assert!(!transport.is_alive());
    }

    #[tokio::test]
    async fn test_startup_failure_captures_exit_code() {
        let stub = StubServer::exiting_with(7);
        match ServerTransport::start(&stub.config()).await {
            Err(TransportError::Startup { code }) => assert_eq!(code, Some(7)),
            other => panic!("expected startup error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_send_receive_round_trip() {
        // The stub answers any single request with a canned response.
        let stub = StubServer::respond_then_wait(&[
            r#"{"jsonrpc":"2.0","id":1,"result":{"capabilities":{}}}"#,
        ]);
        let mut transport = ServerTransport::start(&stub.config()).await.unwrap();

        transport
            .send(&Message::Request(Request::new(1, "initialize", None)))
            .await
            .unwrap();

        let message = transport.receive().await.unwrap().unwrap();
        assert!(matches!(message, Message::Response(ref r) if r.is_for(1)));

        transport.terminate(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_reports_end_of_stream() {
        let stub = StubServer::respond_then_exit(&[]);
        let mut transport = ServerTransport::start(&stub.config()).await.unwrap();

        assert!(transport.receive().await.unwrap().is_none());
        transport.terminate(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_death_is_broken_pipe() {
        let stub = StubServer::respond_then_exit(&[]);
        let mut transport = ServerTransport::start(&stub.config()).await.unwrap();

        // Wait for the stub to be gone before writing.
        assert!(transport.receive().await.unwrap().is_none());
        let _ = transport.child.wait().await;

        let notification =
            Message::Notification(Notification::new("exit", Some(json!(null))));
        match transport.send(&notification).await {
            Err(TransportError::BrokenPipe) => {}
            other => panic!("expected broken pipe, got {other:?}"),
        }

        transport.terminate(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_forced_kill_after_grace() {
        // A stub that ignores stdin EOF has to be killed.
        let stub = StubServer::ignoring_stdin();
        let mut transport = ServerTransport::start(&stub.config()).await.unwrap();

        transport
            .terminate(Duration::from_millis(200))
            .await
            .unwrap();
        assert!(!transport.is_alive());
    }
}
