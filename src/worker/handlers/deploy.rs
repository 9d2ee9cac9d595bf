use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ComposeConfig;
use crate::error::Result;
use crate::worker::dispatch::{JobContext, JobHandler};
use crate::worker::executor::{ComposeCommand, ComposeExecutor, ComposeVerb};
use crate::worker::handlers::decode_payload;

/// `{composePath?, verb?, extraArgs?}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployPayload {
    #[serde(default)]
    pub compose_path: Option<PathBuf>,
    #[serde(default)]
    pub verb: Option<String>,
    #[serde(default)]
    pub extra_args: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct DeployHandler {
    executor: ComposeExecutor,
    default_compose_path: PathBuf,
}

impl DeployHandler {
    pub fn new(config: &ComposeConfig) -> Self {
        Self {
            executor: ComposeExecutor::new(config),
            default_compose_path: config.default_compose_path.clone(),
        }
    }

    /// Resolve a payload into a command; the verb defaults to `up`
    pub fn command(&self, payload: DeployPayload) -> Result<ComposeCommand> {
        let verb = match payload.verb.as_deref() {
            Some(v) => v.parse::<ComposeVerb>()?,
            None => ComposeVerb::Up,
        };
        Ok(ComposeCommand {
            compose_path: payload
                .compose_path
                .unwrap_or_else(|| self.default_compose_path.clone()),
            verb,
            extra_args: payload.extra_args.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl JobHandler for DeployHandler {
    async fn run(&self, ctx: &JobContext) -> Result<()> {
        ctx.progress(30, "docker").await?;
        let payload: DeployPayload = decode_payload("deploy", ctx.payload())?;
        let command = self.command(payload)?;

        ctx.checkpoint().await?;
        let output = self.executor.run(&command, ctx.cancel_token()).await?;
        ctx.log(output.stdout).await?;
        if !output.stderr.is_empty() {
            ctx.log(output.stderr).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn handler() -> DeployHandler {
        DeployHandler::new(&ComposeConfig::for_repo_root(Path::new("/repo")))
    }

    #[test]
    fn defaults_to_up_on_repo_compose_file() {
        let cmd = handler().command(DeployPayload::default()).unwrap();
        assert_eq!(cmd.verb, ComposeVerb::Up);
        assert_eq!(cmd.compose_path, PathBuf::from("/repo/infra/docker/compose.yml"));
        assert!(cmd.extra_args.is_empty());
    }

    #[test]
    fn payload_overrides_path_and_args() {
        let payload: DeployPayload = decode_payload(
            "deploy",
            &json!({"composePath": "/tmp/compose.yml", "verb": "logs", "extraArgs": ["--tail", "10"]}),
        )
        .unwrap();
        let cmd = handler().command(payload).unwrap();
        assert_eq!(cmd.verb, ComposeVerb::Logs);
        assert_eq!(cmd.compose_path, PathBuf::from("/tmp/compose.yml"));
        assert_eq!(cmd.extra_args, vec!["--tail", "10"]);
    }

    #[test]
    fn rejects_unknown_verb() {
        let err = handler()
            .command(DeployPayload {
                verb: Some("exec".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "unsupported compose verb: exec");
    }

    #[test]
    fn rejects_non_string_extra_args() {
        let err = decode_payload::<DeployPayload>("deploy", &json!({"extraArgs": [1, 2]})).unwrap_err();
        assert!(err.to_string().starts_with("invalid deploy payload"));
    }
}
