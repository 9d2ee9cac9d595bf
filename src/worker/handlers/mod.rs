//! Built-in job handlers.
//!
//! - [`BuildHandler`]: forwards the payload to the builder tool via [`ToolBridge`](crate::worker::bridge::ToolBridge)
//! - [`DeployHandler`]: issues a compose command via [`ComposeExecutor`](crate::worker::executor::ComposeExecutor)
//! - [`ApiCallHandler`]: placeholder that only records execution

pub mod api_call;
pub mod build;
pub mod deploy;

pub use api_call::ApiCallHandler;
pub use build::{BuildHandler, BuildPayload};
pub use deploy::{DeployHandler, DeployPayload};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{EngineError, Result};

/// Decode a handler payload. `null` is treated as an empty object.
pub(crate) fn decode_payload<T: DeserializeOwned>(kind: &str, payload: &Value) -> Result<T> {
    let value = if payload.is_null() {
        Value::Object(Default::default())
    } else {
        payload.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| EngineError::InvalidPayload(format!("invalid {} payload: {}", kind, e)))
}
