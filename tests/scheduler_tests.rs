use ops_jobs::config::EngineConfig;
use ops_jobs::scheduler::job::CANCEL_ADVISORY;
use ops_jobs::scheduler::{Job, JobQueue, JobSnapshot, JobStatus, JobStore, JobType};
use ops_jobs::{JobEngine, NewJob};
use serde_json::json;
use tempfile::TempDir;

fn build_job() -> Job {
    Job::new(JobType::Build, "ws-1", json!({"action": "list_builders"}), None)
}

#[test]
fn test_job_creation() {
    let job = build_job();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.pct, 0);
    assert_eq!(job.payload["action"], "list_builders");
    assert!(job.created_by.is_none());
}

#[test]
fn test_job_queue_operations() {
    let mut queue = JobQueue::new();

    let job1 = build_job();
    let job2 = build_job();
    let id1 = job1.id.clone();
    let id2 = job2.id.clone();

    assert!(queue.add_job(job1));
    assert!(queue.add_job(job2));
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.jobs_with_status(JobStatus::Queued).len(), 2);

    // Start and finish the first
    let job = queue.get_job_mut(&id1).unwrap();
    assert!(job.start());
    assert!(job.append_log("{\"ok\":true}"));
    assert!(job.succeed());

    assert_eq!(queue.jobs_with_status(JobStatus::Queued).len(), 1);
    assert_eq!(queue.next_queued().unwrap().id, id2);
}

#[test]
fn test_terminal_states_are_final() {
    let finishers: [fn(&mut Job) -> bool; 3] = [
        |j| j.succeed(),
        |j| j.fail("boom"),
        |j| j.cancel(),
    ];
    for finish in finishers {
        let mut job = build_job();
        job.start();
        assert!(finish(&mut job));
        let frozen = job.clone();

        assert!(!job.start());
        assert!(!job.succeed());
        assert!(!job.fail("again"));
        assert!(!job.cancel());
        assert!(!job.advance(99, "late"));
        assert!(!job.append_log("late"));
        assert_eq!(job, frozen);
    }
}

#[test]
fn test_running_cancel_keeps_existing_logs() {
    let mut job = build_job();
    job.start();
    job.append_log("first");
    job.cancel();
    assert_eq!(job.logs, vec!["first", CANCEL_ADVISORY]);
}

#[test]
fn test_job_document_round_trips_payload_verbatim() {
    let mut job = Job::new(
        JobType::Deploy,
        "ws",
        json!({"verb": "up", "extraArgs": ["-d"], "nested": {"keep": [1, 2, 3]}}),
        None,
    );
    job.start();
    job.advance(30, "docker");

    let text = serde_json::to_string(&job).unwrap();
    let back: Job = serde_json::from_str(&text).unwrap();
    assert_eq!(back, job);
}

/// Scenario 4: a corrupt store document recovers to an empty collection
#[tokio::test]
async fn test_corrupt_store_recovers_to_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.json");
    std::fs::write(&path, "this is not json").unwrap();

    let engine = JobEngine::open(EngineConfig::default().with_store_path(&path))
        .await
        .unwrap();

    assert!(engine.list().await.is_empty());
    assert!(dir.path().join("jobs.json.corrupt").exists());

    // the recovered store is usable
    let job = engine
        .without_autostart()
        .enqueue(NewJob::new(JobType::ApiCall, "ws", json!({})))
        .await
        .unwrap();
    let reopened = JobStore::open(&path).await.unwrap();
    assert_eq!(reopened.get(&job.id).await.unwrap().status, JobStatus::Queued);
}

#[tokio::test]
async fn test_missing_store_is_created() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data").join("jobs.json");

    let store = JobStore::open(&path).await.unwrap();

    assert!(store.list(200).await.is_empty());
    assert!(path.exists());
}

#[tokio::test]
async fn test_queued_jobs_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.json");
    let a = build_job();
    let b = build_job();
    JobSnapshot::new(&path).save(&[a.clone(), b.clone()]).await.unwrap();

    let store = JobStore::open(&path).await.unwrap();
    let claimed = store.claim_next().await.unwrap().unwrap();
    assert_eq!(claimed.id, a.id);
    assert_eq!(store.get(&b.id).await.unwrap().status, JobStatus::Queued);
}

#[tokio::test]
async fn test_store_document_shape() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.json");
    let store = JobStore::open(&path).await.unwrap();
    let job = build_job();
    store.insert(job.clone()).await.unwrap();

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let jobs = doc["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], job.id.as_str());
    assert_eq!(jobs[0]["type"], "build");
    assert_eq!(jobs[0]["status"], "queued");
    assert_eq!(jobs[0]["payload"], json!({"action": "list_builders"}));
}
