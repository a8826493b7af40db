//! Tests for the job lifecycle: packaging, submission and polling.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use etl_metadata_sdk::{
    ClientError, Column, DatabaseMeta, ExecutionClient, GlueJob, JobDefinition, JobError,
    ObjectStoreClient, PollPolicy, RunStatus, TableMeta, WorkerKind,
};

#[derive(Default)]
struct FakeStore {
    uploads: Mutex<Vec<String>>,
    deleted_prefixes: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStoreClient for FakeStore {
    async fn upload(&self, _local: &Path, _bucket: &str, key: &str) -> Result<(), ClientError> {
        self.uploads.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn delete_by_prefix(&self, _bucket: &str, prefix: &str) -> Result<(), ClientError> {
        self.deleted_prefixes.lock().unwrap().push(prefix.to_string());
        Ok(())
    }
}

enum Poll {
    Run(&'static str),
    Throttle,
}

#[derive(Default)]
struct FakeExecution {
    polls: Mutex<VecDeque<Poll>>,
    created: Mutex<Vec<JobDefinition>>,
    deleted: Mutex<Vec<String>>,
    started: Mutex<Vec<BTreeMap<String, String>>>,
}

impl FakeExecution {
    fn with_polls(polls: Vec<Poll>) -> Self {
        Self {
            polls: Mutex::new(polls.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExecutionClient for FakeExecution {
    async fn create_job(&self, definition: &JobDefinition) -> Result<(), ClientError> {
        self.created.lock().unwrap().push(definition.clone());
        Ok(())
    }

    async fn delete_job(&self, name: &str) -> Result<bool, ClientError> {
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(false)
    }

    async fn start_run(
        &self,
        _name: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<String, ClientError> {
        self.started.lock().unwrap().push(arguments.clone());
        Ok("run-1".to_string())
    }

    async fn get_run(&self, _name: &str, _run_id: &str) -> Result<RunStatus, ClientError> {
        match self.polls.lock().unwrap().pop_front() {
            Some(Poll::Run(state)) => Ok(RunStatus {
                state: state.to_string(),
                error_message: if state == "FAILED" {
                    Some("script blew up".to_string())
                } else {
                    None
                },
                execution_time_seconds: Some(1),
            }),
            Some(Poll::Throttle) => Err(ClientError::Throttling("slow down".to_string())),
            None => Ok(RunStatus {
                state: "SUCCEEDED".to_string(),
                error_message: None,
                execution_time_seconds: Some(1),
            }),
        }
    }
}

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"x").unwrap();
}

fn build_job_folder(root: &Path) -> PathBuf {
    let job = root.join("simple_etl_job");
    touch(&job.join("job.py"));
    touch(&job.join("glue_py_resources/helpers.py"));
    touch(&job.join("glue_resources/employees.json"));
    touch(&job.join("glue_jars/custom.jar"));
    job
}

fn fast_policy() -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(1),
        backoff_base: Duration::from_millis(1),
        max_retries: 2,
    }
}

fn build_job(folder: &Path) -> GlueJob {
    GlueJob::builder(folder, "my-bucket", "etl-role")
        .argument("--env", "dev")
        .poll_policy(fast_policy())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_run_job_uploads_then_submits() {
    let tmp = tempfile::tempdir().unwrap();
    let folder = build_job_folder(tmp.path());
    let store = FakeStore::default();
    let exec = FakeExecution::default();
    let mut job = build_job(&folder);

    job.run_job(&store, &exec).await.unwrap();

    // prefix cleared before any upload
    let deleted = store.deleted_prefixes.lock().unwrap();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].starts_with("_GlueJobs_/simple_etl_job/"));

    let uploads = store.uploads.lock().unwrap();
    let basenames: Vec<&str> = uploads.iter().map(|k| k.rsplit('/').next().unwrap()).collect();
    assert_eq!(basenames, vec!["job.py", "helpers.py", "employees.json", "custom.jar"]);

    let created = exec.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert!(created[0].script_location.ends_with("/resources/job.py"));
    assert_eq!(created[0].worker_type, "Standard");
    assert_eq!(created[0].timeout_minutes, 1363);
    assert!(created[0].default_arguments["--extra-py-files"].contains("helpers.py"));
    assert!(created[0].default_arguments["--extra-jars"].contains("custom.jar"));

    let started = exec.started.lock().unwrap();
    assert_eq!(started[0]["--env"], "dev");
    // no metadata attached, so no injected path
    assert!(!started[0].contains_key("--metadata_base_path"));
    assert_eq!(job.run_id(), Some("run-1"));
}

#[tokio::test]
async fn test_attached_metadata_uploads_and_injects_path() {
    let tmp = tempfile::tempdir().unwrap();
    let folder = build_job_folder(tmp.path());
    let store = FakeStore::default();
    let exec = FakeExecution::default();
    let mut job = build_job(&folder);

    let mut db = DatabaseMeta::new("workforce", "my-bucket", "workforce/", "HR data").unwrap();
    let mut employees = TableMeta::new("employees", "employees/").unwrap();
    employees
        .add_column(Column::new("employee_id", "int", "id"))
        .unwrap();
    db.add_table(employees).unwrap();
    job.attach_database_metadata(db);

    job.run_job(&store, &exec).await.unwrap();

    let uploads = store.uploads.lock().unwrap();
    assert!(uploads
        .iter()
        .any(|k| k.ends_with("/resources/meta_data/workforce/database.json")));
    assert!(uploads
        .iter()
        .any(|k| k.ends_with("/resources/meta_data/workforce/employees.json")));

    let started = exec.started.lock().unwrap();
    assert!(started[0]["--metadata_base_path"].ends_with("/resources/meta_data/"));
}

#[tokio::test]
async fn test_job_submits_at_most_once() {
    let tmp = tempfile::tempdir().unwrap();
    let folder = build_job_folder(tmp.path());
    let store = FakeStore::default();
    let exec = FakeExecution::default();
    let mut job = build_job(&folder);

    job.run_job(&store, &exec).await.unwrap();
    let err = job.run_job(&store, &exec).await.unwrap_err();
    assert!(matches!(err, JobError::AlreadySubmitted));
}

#[tokio::test]
async fn test_wait_without_submission() {
    let tmp = tempfile::tempdir().unwrap();
    let folder = build_job_folder(tmp.path());
    let store = FakeStore::default();
    let exec = FakeExecution::default();
    let mut job = build_job(&folder);
    let err = job.wait_for_completion(&exec, &store, false).await.unwrap_err();
    assert!(matches!(err, JobError::NotSubmitted));
}

#[tokio::test]
async fn test_poll_to_success_with_cleanup() {
    let tmp = tempfile::tempdir().unwrap();
    let folder = build_job_folder(tmp.path());
    let store = FakeStore::default();
    let exec = FakeExecution::with_polls(vec![
        Poll::Run("RUNNING"),
        Poll::Run("RUNNING"),
        Poll::Run("SUCCEEDED"),
    ]);
    let mut job = build_job(&folder);
    job.run_job(&store, &exec).await.unwrap();
    job.wait_for_completion(&exec, &store, true).await.unwrap();

    // one delete before upload, one from cleanup
    assert_eq!(store.deleted_prefixes.lock().unwrap().len(), 2);
    // one delete before create, one from cleanup
    assert_eq!(exec.deleted.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_throttled_polls_back_off_then_recover() {
    let tmp = tempfile::tempdir().unwrap();
    let folder = build_job_folder(tmp.path());
    let store = FakeStore::default();
    let exec = FakeExecution::with_polls(vec![
        Poll::Throttle,
        Poll::Throttle,
        Poll::Run("SUCCEEDED"),
    ]);
    let mut job = build_job(&folder);
    job.run_job(&store, &exec).await.unwrap();
    job.wait_for_completion(&exec, &store, false).await.unwrap();
}

#[tokio::test]
async fn test_throttling_exhaustion() {
    let tmp = tempfile::tempdir().unwrap();
    let folder = build_job_folder(tmp.path());
    let store = FakeStore::default();
    let exec = FakeExecution::with_polls(vec![
        Poll::Throttle,
        Poll::Throttle,
        Poll::Throttle,
        Poll::Throttle,
    ]);
    let mut job = build_job(&folder);
    job.run_job(&store, &exec).await.unwrap();
    let err = job.wait_for_completion(&exec, &store, false).await.unwrap_err();
    assert!(matches!(err, JobError::ThrottlingExceeded { attempts: 2 }));
}

#[tokio::test]
async fn test_failed_run_reports_message() {
    let tmp = tempfile::tempdir().unwrap();
    let folder = build_job_folder(tmp.path());
    let store = FakeStore::default();
    let exec = FakeExecution::with_polls(vec![Poll::Run("RUNNING"), Poll::Run("FAILED")]);
    let mut job = build_job(&folder);
    job.run_job(&store, &exec).await.unwrap();
    let err = job.wait_for_completion(&exec, &store, false).await.unwrap_err();
    assert!(matches!(err, JobError::RunFailed(m) if m.contains("script blew up")));
}

#[tokio::test]
async fn test_timed_out_run() {
    let tmp = tempfile::tempdir().unwrap();
    let folder = build_job_folder(tmp.path());
    let store = FakeStore::default();
    let exec = FakeExecution::with_polls(vec![Poll::Run("TIMEOUT")]);
    let mut job = build_job(&folder);
    job.run_job(&store, &exec).await.unwrap();
    let err = job.wait_for_completion(&exec, &store, false).await.unwrap_err();
    assert!(matches!(err, JobError::RunTimedOut(_)));
}

#[tokio::test]
async fn test_resource_lists_fixed_at_construction() {
    let tmp = tempfile::tempdir().unwrap();
    let folder = build_job_folder(tmp.path());
    let store = FakeStore::default();
    let mut job = build_job(&folder);

    // files dropped into the folder after construction are not submitted
    touch(&folder.join("glue_py_resources/late_addition.py"));
    job.upload_artifacts(&store).await.unwrap();
    let uploads = store.uploads.lock().unwrap();
    assert!(uploads.iter().any(|k| k.ends_with("helpers.py")));
    assert!(uploads.iter().all(|k| !k.ends_with("late_addition.py")));
}

#[tokio::test]
async fn test_duplicate_resource_names_block_upload() {
    let tmp = tempfile::tempdir().unwrap();
    let folder = build_job_folder(tmp.path());
    // same basename in job and shared resources
    touch(&tmp.path().join("shared_job_resources/glue_py_resources/helpers.py"));
    let store = FakeStore::default();
    let mut job = build_job(&folder);
    let err = job.upload_artifacts(&store).await.unwrap_err();
    assert!(matches!(err, JobError::DuplicateResourceName { names } if names == "helpers.py"));
    assert!(store.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_g2x_worker_definition() {
    let tmp = tempfile::tempdir().unwrap();
    let folder = build_job_folder(tmp.path());
    let store = FakeStore::default();
    let exec = FakeExecution::default();
    let mut job = GlueJob::builder(&folder, "my-bucket", "etl-role")
        .worker_kind(WorkerKind::G2X)
        .number_of_workers(5)
        .build()
        .unwrap();
    job.run_job(&store, &exec).await.unwrap();
    let created = exec.created.lock().unwrap();
    assert_eq!(created[0].worker_type, "G.2X");
    assert_eq!(created[0].number_of_workers, 5);
    assert_eq!(created[0].glue_version, "2.0");
    assert_eq!(created[0].python_version, "3");
}
