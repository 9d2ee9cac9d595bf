use async_trait::async_trait;

use crate::error::Result;
use crate::worker::dispatch::{JobContext, JobHandler};

/// Accounted API call. Records that execution happened and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiCallHandler;

#[async_trait]
impl JobHandler for ApiCallHandler {
    async fn run(&self, ctx: &JobContext) -> Result<()> {
        ctx.progress(50, "execute").await?;
        ctx.checkpoint().await?;
        ctx.log("api_call executed").await
    }
}
