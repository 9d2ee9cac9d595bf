//! Job execution.
//!
//! # Components
//!
//! - [`Worker`]: the single loop that claims queued jobs and drives them to a terminal state
//! - [`HandlerRegistry`]: maps each [`JobType`](crate::scheduler::JobType) to a [`JobHandler`]
//! - [`JobContext`]: progress, logs and cancellation checkpoints for a running handler
//! - [`ToolBridge`]: one-request/one-response protocol to the builder tool process
//! - [`ComposeExecutor`]: runs container-orchestration commands
//!
//! # Execution Flow
//!
//! 1. [`Worker::start`] spawns the loop if it is not already active
//! 2. The loop claims the first queued job (`queued -> running`)
//! 3. The registered handler runs under the per-job timeout with a cancellation token
//! 4. The job becomes `succeeded` or `failed`, unless a cancel already made it `canceled`
//! 5. When nothing is queued the loop goes idle

pub mod bridge;
pub mod dispatch;
pub mod executor;
pub mod handlers;
pub mod runner;

pub use bridge::{parse_tool_output, ToolBridge, ToolResponse};
pub use dispatch::{HandlerRegistry, JobContext, JobHandler};
pub use executor::{CommandOutput, ComposeCommand, ComposeExecutor, ComposeVerb};
pub use runner::Worker;
