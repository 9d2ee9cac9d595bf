//! Single-shot line-delimited JSON protocol to an external tool process.
//!
//! One request line goes in on stdin, stdin is closed, and the last
//! non-empty stdout line is read back as the response envelope. Earlier
//! output lines are traced at debug level but not interpreted.

use std::process::Stdio;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::BuilderConfig;

#[derive(Debug, Clone, Serialize)]
pub struct ToolRequest<'a> {
    pub id: String,
    pub tool: &'a str,
    pub params: &'a Value,
}

/// Response envelope `{ok, result?, error?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Any other envelope fields, kept as sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// The envelope line as the tool printed it
    #[serde(skip)]
    pub raw: Option<String>,
}

impl ToolResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(Value::String(error.into())),
            extra: Map::new(),
            raw: None,
        }
    }

    /// The tool's own envelope line, or the serialized envelope for
    /// failures the bridge produced itself.
    pub fn log_line(&self) -> serde_json::Result<String> {
        match &self.raw {
            Some(raw) => Ok(raw.clone()),
            None => serde_json::to_string(self),
        }
    }

    /// Error field rendered as text, if present
    pub fn error_message(&self) -> Option<String> {
        match &self.error {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        }
    }
}

/// Interpret captured tool output. Never fails: anything that is not a
/// valid envelope on the last line becomes an `ok: false` response carrying
/// stderr, or the parse failure when stderr is empty.
pub fn parse_tool_output(stdout: &str, stderr: &str) -> ToolResponse {
    let reason = match stdout.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(last) => match serde_json::from_str::<ToolResponse>(last.trim()) {
            Ok(mut response) => {
                response.raw = Some(last.trim().to_string());
                return response;
            }
            Err(e) => format!("parse_error: {}", e),
        },
        None => "parse_error: tool produced no output".to_string(),
    };

    let stderr = stderr.trim();
    if stderr.is_empty() {
        ToolResponse::failure(reason)
    } else {
        ToolResponse::failure(stderr)
    }
}

#[derive(Debug, Clone)]
pub struct ToolBridge {
    program: String,
    args: Vec<String>,
}

impl ToolBridge {
    pub fn new(config: &BuilderConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }

    pub async fn call(&self, tool: &str, params: &Value, cancel: &CancellationToken) -> ToolResponse {
        let request = ToolRequest {
            id: Uuid::new_v4().to_string(),
            tool,
            params,
        };
        let mut line = match serde_json::to_string(&request) {
            Ok(line) => line,
            Err(e) => return ToolResponse::failure(format!("failed to encode request: {}", e)),
        };
        line.push('\n');

        tracing::info!(program = %self.program, tool, request_id = %request.id, "Invoking builder tool");

        let mut child = match Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(program = %self.program, error = %e, "Failed to spawn builder tool");
                return ToolResponse::failure(format!("failed to spawn {}: {}", self.program, e));
            }
        };

        // The request is fed while output is drained; a tool that prints
        // before reading stdin would otherwise fill its pipe and stall.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A tool that exits without reading closes the pipe; its output still decides the result.
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    tracing::debug!(error = %e, "Builder tool closed stdin early");
                }
            }
        };

        let output = tokio::select! {
            (_, result) = async { tokio::join!(feed, child.wait_with_output()) } => match result {
                Ok(output) => output,
                Err(e) => return ToolResponse::failure(format!("failed to collect tool output: {}", e)),
            },
            _ = cancel.cancelled() => {
                tracing::info!(program = %self.program, tool, "Builder tool canceled, child killed");
                return ToolResponse::failure("canceled");
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stdout.lines().filter(|l| !l.trim().is_empty()).collect();
        if let Some((_, earlier)) = lines.split_last() {
            for l in earlier {
                tracing::debug!(tool, line = %l, "Builder tool output");
            }
        }

        let response = parse_tool_output(&stdout, &stderr);
        tracing::info!(
            tool,
            ok = response.ok,
            exit_code = ?output.status.code(),
            "Builder tool finished"
        );
        response
    }
}
