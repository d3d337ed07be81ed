//! LSP test-client engine
//!
//! A layered client for exercising a snippet LSP server over its stdio
//! pipe, with proper separation of concerns:
//!
//! - **framing**: Content-Length message envelope over a byte stream
//! - **protocol**: the JSON-RPC 2.0 message model, decoded structurally
//! - **transport**: child process ownership and framed send/receive
//! - **stderr**: background drain and classification of the error stream
//! - **correlator**: request id allocation and response matching under
//!   interleaved server notifications
//! - **session**: the public facade, named operations and clean teardown

pub mod correlator;
pub mod framing;
pub mod protocol;
pub mod session;
pub mod stderr;
pub mod transport;

pub use session::{Session, SessionError, SessionState};
pub use transport::ServerConfig;
