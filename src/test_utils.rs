//! Test utilities
//!
//! Stub LSP "servers" for transport and session tests: small `/bin/sh`
//! scripts written to a temp dir that emit canned Content-Length frames,
//! exit with a chosen code, or ignore their input entirely. Invoked as
//! `sh <script>`, so no executable bit is needed.

use crate::client::transport::ServerConfig;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct StubServer {
    // Kept alive until drop so the script outlives the test.
    _dir: TempDir,
    path: PathBuf,
}

impl StubServer {
    fn new(body: &str) -> Self {
        let dir = TempDir::new().expect("failed to create stub server dir");
        let path = dir.path().join("stub-server.sh");
        let script = format!(
            "#!/bin/sh\nrespond() {{\n    printf 'Content-Length: %s\\r\\n\\r\\n%s' \"${{#1}}\" \"$1\"\n}}\n{body}"
        );
        std::fs::write(&path, script).expect("failed to write stub server script");
        Self { _dir: dir, path }
    }

    fn respond_lines(messages: &[&str]) -> String {
        messages
            .iter()
            .inspect(|m| assert!(!m.contains('\''), "stub messages must not contain quotes"))
            .map(|m| format!("respond '{m}'\n"))
            .collect()
    }

    /// Emits the given frames, then keeps running until its stdin closes.
    pub fn respond_then_wait(messages: &[&str]) -> Self {
        let mut body = Self::respond_lines(messages);
        body.push_str("cat >/dev/null\n");
        Self::new(&body)
    }

    /// Emits the given frames, outlives the startup grace period, then
    /// exits on its own, so the client observes end-of-stream.
    pub fn respond_then_exit(messages: &[&str]) -> Self {
        let mut body = Self::respond_lines(messages);
        body.push_str("sleep 1\n");
        Self::new(&body)
    }

    /// Exits immediately with the given code, before the startup grace
    /// period elapses.
    pub fn exiting_with(code: i32) -> Self {
        Self::new(&format!("exit {code}\n"))
    }

    /// Never responds and does not react to stdin closing; only a kill
    /// ends it.
    pub fn ignoring_stdin() -> Self {
        Self::new("sleep 60\n")
    }

    pub fn config(&self) -> ServerConfig {
        ServerConfig::new("sh").args([self.path.display().to_string()])
    }
}

/// Path of the real server binary for gated integration tests; honors
/// `BKMR_PATH` and falls back to `bkmr` on PATH.
#[cfg(feature = "bkmr-integration-tests")]
pub fn bkmr_path() -> String {
    std::env::var("BKMR_PATH").unwrap_or_else(|_| "bkmr".to_string())
}
