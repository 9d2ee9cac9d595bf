pub mod config;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use config::EngineConfig;
pub use engine::{JobEngine, NewJob};
pub use error::{EngineError, Result};
