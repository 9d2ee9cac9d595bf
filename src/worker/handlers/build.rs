use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::BuilderConfig;
use crate::error::{EngineError, Result};
use crate::worker::bridge::ToolBridge;
use crate::worker::dispatch::{JobContext, JobHandler};
use crate::worker::handlers::decode_payload;

/// `{action, id?, variables?, strategy?, engine?, checks?}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildPayload {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub checks: Option<Value>,
}

/// Scaffolding invocation through the builder tool. The tool's response
/// envelope is logged verbatim, whether it reports success or failure.
#[derive(Debug, Clone)]
pub struct BuildHandler {
    bridge: ToolBridge,
    default_strategy: String,
    default_engine: String,
}

impl BuildHandler {
    pub fn new(config: &BuilderConfig) -> Self {
        Self {
            bridge: ToolBridge::new(config),
            default_strategy: config.default_strategy.clone(),
            default_engine: config.default_engine.clone(),
        }
    }

    /// Tool name and parameters forwarded for a payload
    pub fn tool_request(&self, payload: BuildPayload) -> Result<(String, Value)> {
        let action = payload
            .action
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| EngineError::InvalidPayload("missing build action".to_string()))?;

        let mut params = json!({
            "id": payload.id.unwrap_or(Value::Null),
            "variables": payload.variables.unwrap_or_else(|| json!({})),
            "strategy": payload.strategy.unwrap_or_else(|| self.default_strategy.clone()),
            "engine": payload.engine.unwrap_or_else(|| self.default_engine.clone()),
        });
        if let Some(checks) = payload.checks {
            params["checks"] = checks;
        }
        Ok((action, params))
    }
}

#[async_trait]
impl JobHandler for BuildHandler {
    async fn run(&self, ctx: &JobContext) -> Result<()> {
        ctx.progress(20, "mcp:run").await?;
        let payload: BuildPayload = decode_payload("build", ctx.payload())?;
        let (action, params) = self.tool_request(payload)?;

        ctx.checkpoint().await?;
        let response = self.bridge.call(&action, &params, ctx.cancel_token()).await;
        ctx.log(response.log_line()?).await?;

        ctx.checkpoint().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn handler() -> BuildHandler {
        BuildHandler::new(&BuilderConfig::for_repo_root(Path::new("/repo")))
    }

    #[test]
    fn fills_defaults() {
        let (action, params) = handler()
            .tool_request(BuildPayload {
                action: Some("list_builders".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(action, "list_builders");
        assert_eq!(
            params,
            json!({"id": null, "variables": {}, "strategy": "safe-merge", "engine": "eta"})
        );
    }

    #[test]
    fn forwards_explicit_fields() {
        let (_, params) = handler()
            .tool_request(BuildPayload {
                action: Some("apply_builder".to_string()),
                id: Some(json!("nextjs-api-route")),
                variables: Some(json!({"name": "hello"})),
                strategy: Some("overwrite".to_string()),
                engine: Some("handlebars".to_string()),
                checks: Some(json!(["lint"])),
            })
            .unwrap();
        assert_eq!(params["id"], "nextjs-api-route");
        assert_eq!(params["variables"]["name"], "hello");
        assert_eq!(params["strategy"], "overwrite");
        assert_eq!(params["engine"], "handlebars");
        assert_eq!(params["checks"], json!(["lint"]));
    }

    #[test]
    fn missing_action_is_rejected() {
        let err = handler().tool_request(BuildPayload::default()).unwrap_err();
        assert_eq!(err.to_string(), "missing build action");

        let err = handler()
            .tool_request(BuildPayload {
                action: Some("  ".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "missing build action");
    }

    #[test]
    fn null_payload_decodes_to_empty() {
        let payload: BuildPayload = decode_payload("build", &Value::Null).unwrap();
        assert!(payload.action.is_none());
    }
}
