use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::ComposeConfig;
use crate::error::{EngineError, Result};

/// Orchestration verbs a deploy job may issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeVerb {
    Build,
    Up,
    Down,
    Ps,
    Logs,
}

impl ComposeVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComposeVerb::Build => "build",
            ComposeVerb::Up => "up",
            ComposeVerb::Down => "down",
            ComposeVerb::Ps => "ps",
            ComposeVerb::Logs => "logs",
        }
    }
}

impl fmt::Display for ComposeVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComposeVerb {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "build" => Ok(ComposeVerb::Build),
            "up" => Ok(ComposeVerb::Up),
            "down" => Ok(ComposeVerb::Down),
            "ps" => Ok(ComposeVerb::Ps),
            "logs" => Ok(ComposeVerb::Logs),
            other => Err(EngineError::InvalidPayload(format!(
                "unsupported compose verb: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComposeCommand {
    pub compose_path: PathBuf,
    pub verb: ComposeVerb,
    pub extra_args: Vec<String>,
}

impl ComposeCommand {
    /// Argument vector passed to the orchestration binary
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "-f".to_string(),
            self.compose_path.to_string_lossy().into_owned(),
            self.verb.as_str().to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Runs container-orchestration commands against a compose file.
///
/// Arguments are passed as an argv vector; nothing goes through a shell.
/// The child is killed if the returned future is dropped or the token fires.
#[derive(Debug, Clone)]
pub struct ComposeExecutor {
    program: String,
}

impl ComposeExecutor {
    pub fn new(config: &ComposeConfig) -> Self {
        Self {
            program: config.program.clone(),
        }
    }

    pub async fn run(
        &self,
        command: &ComposeCommand,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        let args = command.to_args();
        tracing::info!(program = %self.program, args = ?args, "Running compose command");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let result = tokio::select! {
            result = child.wait_with_output() => result,
            _ = cancel.cancelled() => {
                tracing::info!(program = %self.program, "Compose command canceled, child killed");
                return Err(EngineError::Canceled);
            }
        };

        self.process_output(result)
    }

    fn process_output(
        &self,
        result: std::result::Result<std::process::Output, std::io::Error>,
    ) -> Result<CommandOutput> {
        let output = result.map_err(|source| EngineError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code();

        if output.status.success() {
            tracing::info!(program = %self.program, exit_code = ?exit_code, "Compose command completed");
            Ok(CommandOutput {
                stdout,
                stderr,
                exit_code,
            })
        } else {
            tracing::warn!(program = %self.program, exit_code = ?exit_code, "Compose command failed");
            Err(EngineError::CommandFailed {
                exit_code,
                stderr: if stderr.trim().is_empty() {
                    format!("Exit code: {:?}", exit_code)
                } else {
                    stderr
                },
            })
        }
    }
}
