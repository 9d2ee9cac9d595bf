use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const DEFAULT_LIST_LIMIT: usize = 200;

/// Configuration for the external builder tool spoken to over the
/// one-line-in / last-line-out protocol.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Executable to spawn (e.g. "node")
    pub program: String,
    /// Arguments passed before the request is written to stdin
    pub args: Vec<String>,
    /// Merge strategy used when a build payload does not name one
    pub default_strategy: String,
    /// Template engine used when a build payload does not name one
    pub default_engine: String,
}

impl BuilderConfig {
    /// Builder entry point shipped inside the repository.
    pub fn for_repo_root(repo_root: &Path) -> Self {
        let entry = repo_root
            .join("tools")
            .join("geo-builders-mcp")
            .join("dist")
            .join("index.js");
        Self {
            program: "node".to_string(),
            args: vec![entry.to_string_lossy().into_owned()],
            default_strategy: "safe-merge".to_string(),
            default_engine: "eta".to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.program = program.into();
        self.args = args;
        self
    }
}

/// Configuration for the container-orchestration CLI used by deploy jobs.
#[derive(Debug, Clone)]
pub struct ComposeConfig {
    /// Orchestration binary; invoked as `<program> compose -f <file> <verb>`
    pub program: String,
    /// Compose file used when a deploy payload does not override it
    pub default_compose_path: PathBuf,
}

impl ComposeConfig {
    pub fn for_repo_root(repo_root: &Path) -> Self {
        Self {
            program: "docker".to_string(),
            default_compose_path: repo_root.join("infra").join("docker").join("compose.yml"),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Durable job document. `None` keeps the collection in memory only.
    pub store_path: Option<PathBuf>,
    pub repo_root: PathBuf,
    /// Wall-clock limit for a single job's handler
    pub job_timeout: Duration,
    /// Display cap applied by list queries
    pub list_limit: usize,
    pub builder: BuilderConfig,
    pub compose: ComposeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_repo_root(PathBuf::from("."))
    }
}

impl EngineConfig {
    pub fn for_repo_root(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        Self {
            store_path: Some(PathBuf::from(".data").join("jobs.json")),
            builder: BuilderConfig::for_repo_root(&repo_root),
            compose: ComposeConfig::for_repo_root(&repo_root),
            repo_root,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            list_limit: DEFAULT_LIST_LIMIT,
        }
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.store_path = None;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_builder(mut self, builder: BuilderConfig) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_compose(mut self, compose: ComposeConfig) -> Self {
        self.compose = compose;
        self
    }
}
