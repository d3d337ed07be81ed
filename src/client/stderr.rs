//! Server stderr monitoring
//!
//! A background task that continuously drains the server's error stream so
//! the child process can never stall on a full stderr buffer, classifying
//! each line for diagnostics. Purely advisory: it never affects protocol
//! traffic, swallows its own failures, and stops silently when the stream
//! closes.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Severity of a server stderr line, derived from the log-level markers the
/// server's own log format emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Debug,
    Other,
}

/// A classified line of server stderr output.
#[derive(Debug, Clone)]
pub struct DiagnosticLine {
    pub severity: Severity,
    pub text: String,
}

fn classify(line: &str) -> Severity {
    if line.contains("ERROR") {
        Severity::Error
    } else if line.contains("WARN") {
        Severity::Warning
    } else if line.contains("INFO") {
        Severity::Info
    } else if line.contains("DEBUG") {
        Severity::Debug
    } else {
        Severity::Other
    }
}

/// Drains a child process's stderr for the lifetime of that process.
pub struct StderrMonitor {
    task: JoinHandle<()>,
    lines: mpsc::UnboundedReceiver<DiagnosticLine>,
}

impl StderrMonitor {
    /// Spawn the monitoring task on its own execution context, isolated
    /// from the protocol read/write path.
    pub fn spawn(stderr: ChildStderr) -> Self {
        let (sender, lines) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        trace!("server stderr reached EOF");
                        break;
                    }
                    Ok(_) => {
                        let text = line.trim_end().to_string();
                        if text.is_empty() {
                            continue;
                        }
                        let diagnostic = DiagnosticLine {
                            severity: classify(&text),
                            text,
                        };
                        match diagnostic.severity {
                            Severity::Error => error!(target: "server", "{}", diagnostic.text),
                            Severity::Warning => warn!(target: "server", "{}", diagnostic.text),
                            Severity::Info => info!(target: "server", "{}", diagnostic.text),
                            Severity::Debug => debug!(target: "server", "{}", diagnostic.text),
                            Severity::Other => trace!(target: "server", "{}", diagnostic.text),
                        }
                        // Keep draining even after the receiver is gone.
                        let _ = sender.send(diagnostic);
                    }
                    Err(e) => {
                        trace!("stopping stderr monitor: {e}");
                        break;
                    }
                }
            }
        });

        Self { task, lines }
    }

    /// Next classified line, or `None` once the stream has closed and the
    /// backlog is drained.
    #[allow(dead_code)]
    pub async fn next_line(&mut self) -> Option<DiagnosticLine> {
        self.lines.recv().await
    }

    /// Non-blocking variant of [`next_line`](Self::next_line).
    #[allow(dead_code)]
    pub fn try_next_line(&mut self) -> Option<DiagnosticLine> {
        self.lines.try_recv().ok()
    }
}

impl Drop for StderrMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Tests
// ============================================================================
