use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ID_SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 6;

pub const CANCEL_ADVISORY: &str = "marked canceled; will stop at next checkpoint";

/// Job identifier: creation time in unix millis plus a random base36 suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..ID_SUFFIX_LEN)
            .map(|_| ID_SUFFIX_ALPHABET[rng.gen_range(0..ID_SUFFIX_ALPHABET.len())] as char)
            .collect();
        Self(format!("{}-{}", Utc::now().timestamp_millis(), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Build,
    Deploy,
    ApiCall,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::Build => write!(f, "build"),
            JobType::Deploy => write!(f, "deploy"),
            JobType::ApiCall => write!(f, "api_call"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// Informational attribution captured at enqueue time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedBy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A unit of asynchronous work.
///
/// Every mutator returns whether the record changed. Once the status is
/// terminal the record is frozen: mutators return `false` and leave
/// `updated_at` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<CreatedBy>,
    #[serde(default)]
    pub payload: Value,
    pub status: JobStatus,
    #[serde(default)]
    pub pct: u8,
    #[serde(default)]
    pub step: String,
    #[serde(default)]
    pub logs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        job_type: JobType,
        workspace_id: impl Into<String>,
        payload: Value,
        created_by: Option<CreatedBy>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            job_type,
            workspace_id: workspace_id.into(),
            created_by,
            payload,
            status: JobStatus::Queued,
            pct: 0,
            step: "queued".to_string(),
            logs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// `queued -> running`. Fails if a cancel got there first.
    pub fn start(&mut self) -> bool {
        if self.status != JobStatus::Queued {
            return false;
        }
        self.status = JobStatus::Running;
        self.step = "starting".to_string();
        self.touch();
        true
    }

    /// Record progress. `pct` never moves backwards and is capped at 100.
    pub fn advance(&mut self, pct: u8, step: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.pct = self.pct.max(pct.min(100));
        self.step = step.into();
        self.touch();
        true
    }

    pub fn append_log(&mut self, line: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.logs.push(line.into());
        self.touch();
        true
    }

    /// `running -> succeeded`
    pub fn succeed(&mut self) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Succeeded;
        self.pct = 100;
        self.step = "done".to_string();
        self.touch();
        true
    }

    /// `running -> failed`, recording the reason in the log.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.logs.push(reason.into());
        self.status = JobStatus::Failed;
        self.step = "error".to_string();
        self.touch();
        true
    }

    /// `queued -> canceled` or `running -> canceled`. The running case is
    /// advisory: the handler only notices at its next checkpoint.
    pub fn cancel(&mut self) -> bool {
        match self.status {
            JobStatus::Queued => {}
            JobStatus::Running => self.logs.push(CANCEL_ADVISORY.to_string()),
            _ => return false,
        }
        self.status = JobStatus::Canceled;
        self.step = "canceled".to_string();
        self.touch();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queued() -> Job {
        Job::new(JobType::Build, "ws-1", json!({"action": "list_builders"}), None)
    }

    #[test]
    fn new_job_is_queued_with_zero_progress() {
        let job = queued();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.pct, 0);
        assert_eq!(job.step, "queued");
        assert!(job.logs.is_empty());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn generated_ids_have_millis_and_suffix() {
        let id = JobId::generate();
        let (millis, suffix) = id.as_str().split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 6);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(id, JobId::generate());
    }

    #[test]
    fn lifecycle_to_success() {
        let mut job = queued();
        assert!(job.start());
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.advance(20, "mcp:run"));
        assert!(job.append_log("{\"ok\":true}"));
        assert!(job.succeed());
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.pct, 100);
        assert_eq!(job.step, "done");
    }

    #[test]
    fn progress_never_decreases() {
        let mut job = queued();
        job.start();
        job.advance(50, "execute");
        job.advance(20, "later");
        assert_eq!(job.pct, 50);
        assert_eq!(job.step, "later");
        job.advance(250, "overflow");
        assert_eq!(job.pct, 100);
    }

    #[test]
    fn failure_appends_reason() {
        let mut job = queued();
        job.start();
        assert!(job.fail("missing build action"));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.step, "error");
        assert_eq!(job.logs, vec!["missing build action"]);
    }

    #[test]
    fn terminal_jobs_are_frozen() {
        let mut job = queued();
        job.start();
        job.succeed();
        let snapshot = job.clone();

        assert!(!job.cancel());
        assert!(!job.fail("late"));
        assert!(!job.advance(10, "late"));
        assert!(!job.append_log("late"));
        assert!(!job.start());
        assert_eq!(job, snapshot);
    }

    #[test]
    fn cancel_queued_job_has_no_advisory_log() {
        let mut job = queued();
        assert!(job.cancel());
        assert_eq!(job.status, JobStatus::Canceled);
        assert!(job.logs.is_empty());
        assert!(!job.start());
    }

    #[test]
    fn cancel_running_job_is_advisory() {
        let mut job = queued();
        job.start();
        assert!(job.cancel());
        assert_eq!(job.status, JobStatus::Canceled);
        assert_eq!(job.logs, vec![CANCEL_ADVISORY]);
        // handler finishing afterwards cannot overwrite the terminal state
        assert!(!job.succeed());
        assert!(!job.fail("boom"));
        assert_eq!(job.status, JobStatus::Canceled);
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let job = Job::new(
            JobType::ApiCall,
            "ws-9",
            json!({}),
            Some(CreatedBy {
                id: Some("u1".to_string()),
                email: None,
            }),
        );
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "api_call");
        assert_eq!(value["workspaceId"], "ws-9");
        assert_eq!(value["status"], "queued");
        assert_eq!(value["createdBy"], json!({"id": "u1"}));
        assert!(value.get("updatedAt").is_some());
    }
}
