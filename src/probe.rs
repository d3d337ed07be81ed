//! Probe scenarios
//!
//! The scripted debug sessions the CLI exposes, all built on one
//! [`Session`]. Every runner guarantees `close()` on its way out, so a
//! failing step never leaves a server process behind.

use crate::client::{ServerConfig, Session, SessionError};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const PROBE_URI: &str = "file:///tmp/probe.rs";
const PROBE_LANGUAGE: &str = "rust";
const PROBE_TEXT: &str = "// probe file\n";
const PROBE_TEXT_EDITED: &str = "// probe file\n\n";

/// Completion probe positions used by the full check session.
const PROBE_POSITIONS: &[(&str, u32, u32)] = &[("start of file", 0, 0), ("after comment", 0, 8)];

/// Full scripted debug session: initialize, open a document, request
/// completion at several positions, shut down.
pub async fn run_check(config: ServerConfig, timeout: Duration) -> Result<(), SessionError> {
    let mut session = Session::new(config).with_request_timeout(timeout);
    let outcome = check_steps(&mut session).await;
    session.close().await;
    outcome
}

async fn check_steps(session: &mut Session) -> Result<(), SessionError> {
    session.start().await?;

    let init = session.initialize().await?;
    println!("initialize: ok");
    for capability in capability_names(&init.capabilities)? {
        println!("  capability: {capability}");
    }

    session.initialized().await?;
    session
        .did_open(PROBE_URI, PROBE_LANGUAGE, PROBE_TEXT)
        .await?;
    println!("opened {PROBE_URI} ({PROBE_LANGUAGE})");

    for (label, line, character) in PROBE_POSITIONS {
        probe_completion(session, label, *line, *character).await?;
    }

    // An edit introducing a fresh line, then a probe on it.
    session.did_change(PROBE_URI, 2, PROBE_TEXT_EDITED).await?;
    probe_completion(session, "empty line after edit", 1, 0).await?;

    while let Some(notification) = session.try_next_notification() {
        println!("server notification: {}", notification.method);
    }

    session.shutdown().await?;
    println!("shutdown: ok");
    Ok(())
}

async fn probe_completion(
    session: &mut Session,
    label: &str,
    line: u32,
    character: u32,
) -> Result<(), SessionError> {
    let result = session.completion(PROBE_URI, line, character).await?;
    let items = completion_items(&result);
    println!(
        "completion at {label} (line {line}, char {character}): {} items",
        items.len()
    );
    for item in items.iter().take(3) {
        if let Some(label) = item.get("label").and_then(Value::as_str) {
            println!("  - {label}");
        }
    }
    if items.len() > 3 {
        println!("  ... and {} more", items.len() - 3);
    }
    Ok(())
}

/// Initialize and report the commands the server advertises for
/// `workspace/executeCommand`.
pub async fn run_commands(config: ServerConfig, timeout: Duration) -> Result<(), SessionError> {
    let mut session = Session::new(config).with_request_timeout(timeout);
    let outcome = commands_steps(&mut session).await;
    session.close().await;
    outcome
}

async fn commands_steps(session: &mut Session) -> Result<(), SessionError> {
    session.start().await?;
    let init = session.initialize().await?;
    session.initialized().await?;

    match init.capabilities.execute_command_provider {
        Some(provider) if !provider.commands.is_empty() => {
            println!("server commands:");
            for command in provider.commands {
                println!("  {command}");
            }
        }
        _ => println!("server advertises no executeCommand support"),
    }

    session.shutdown().await?;
    Ok(())
}

/// Execute a single server command and print the raw result.
pub async fn run_exec(
    config: ServerConfig,
    timeout: Duration,
    command: &str,
    raw_arguments: &[String],
) -> Result<(), SessionError> {
    let arguments = raw_arguments.iter().map(|raw| parse_argument(raw)).collect();

    let mut session = Session::new(config).with_request_timeout(timeout);
    let outcome = exec_steps(&mut session, command, arguments).await;
    session.close().await;
    outcome
}

async fn exec_steps(
    session: &mut Session,
    command: &str,
    arguments: Vec<Value>,
) -> Result<(), SessionError> {
    session.start().await?;
    session.initialize().await?;
    session.initialized().await?;

    debug!(command, ?arguments, "executing server command");
    let result = session.execute_command(command, arguments).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    session.shutdown().await?;
    Ok(())
}

/// Open one document and request completion at a single position.
pub async fn run_complete(
    config: ServerConfig,
    timeout: Duration,
    uri: &str,
    language: &str,
    text: &str,
    line: u32,
    character: u32,
) -> Result<(), SessionError> {
    let mut session = Session::new(config).with_request_timeout(timeout);
    let outcome = complete_steps(&mut session, uri, language, text, line, character).await;
    session.close().await;
    outcome
}

async fn complete_steps(
    session: &mut Session,
    uri: &str,
    language: &str,
    text: &str,
    line: u32,
    character: u32,
) -> Result<(), SessionError> {
    session.start().await?;
    session.initialize().await?;
    session.initialized().await?;
    session.did_open(uri, language, text).await?;

    let result = session.completion(uri, line, character).await?;
    let items = completion_items(&result);
    println!("{} completion items", items.len());
    println!("{}", serde_json::to_string_pretty(&result)?);

    session.did_close(uri).await?;
    session.shutdown().await?;
    Ok(())
}

/// Command arguments are JSON where they parse as JSON, plain strings
/// otherwise, so `exec snippets.get '{"id":3021}'` and `exec x.echo hi`
/// both do what they look like.
fn parse_argument(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// A completion result is `null`, a plain item array, or a
/// `CompletionList` object with an `items` array.
fn completion_items(result: &Value) -> Vec<Value> {
    match result {
        Value::Array(items) => items.clone(),
        Value::Object(object) => object
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn capability_names(
    capabilities: &lsp_types::ServerCapabilities,
) -> Result<Vec<String>, SessionError> {
    let value = serde_json::to_value(capabilities)?;
    Ok(value
        .as_object()
        .map(|object| object.keys().cloned().collect())
        .unwrap_or_default())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completion_items_shapes() {
        assert_eq!(completion_items(&Value::Null).len(), 0);
        assert_eq!(completion_items(&json!([{"label": "a"}, {"label": "b"}])).len(), 2);
        assert_eq!(
            completion_items(&json!({"isIncomplete": false, "items": [{"label": "a"}]})).len(),
            1
        );
        assert_eq!(completion_items(&json!({"isIncomplete": false})).len(), 0);
    }

    #[test]
    fn test_parse_argument_json_or_string() {
        assert_eq!(parse_argument(r#"{"id":3021}"#), json!({"id": 3021}));
        assert_eq!(parse_argument("42"), json!(42));
        assert_eq!(parse_argument("plain text"), json!("plain text"));
    }
}
