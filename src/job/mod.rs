//! Batch job packaging and execution.
//!
//! [`GlueJob`] takes a conventional job folder (see [`artifacts`]), uploads
//! its contents to a per-submission object store prefix, registers the job
//! with the execution service, starts a run and polls it to completion.

pub mod artifacts;
pub mod poll;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::clients::{ClientError, ExecutionClient, JobDefinition, ObjectStoreClient};
use crate::job::artifacts::{
    check_nondup_resources, download_and_unnest, scan_job_folder, JobArtifacts,
};
use crate::job::poll::{step, Observation, Outcome, PollPolicy, PollState, Step};
use crate::models::{DatabaseMeta, MetaError};
use crate::validation::{validate_bucket_name, validate_job_name, ValidationError};

/// Arguments the execution service claims for itself.
const RESERVED_ARGUMENTS: &[&str] = &["--JOB_NAME", "--conf", "--debug", "--mode"];

const JOBS_PREFIX: &str = "_GlueJobs_";
const GLUE_VERSION: &str = "2.0";
const PYTHON_VERSION: &str = "3";

/// Run-time budget used to derive the default timeout: a run may burn at
/// most this many dollars at the hourly per-DPU rate.
const COST_BUDGET_DOLLARS: f64 = 20.0;
const HOURLY_DPU_COST: f64 = 0.44;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("could not find job.py in {folder}")]
    MissingEntryScript { folder: String },
    #[error("duplicate resource file names: {names}")]
    DuplicateResourceName { names: String },
    #[error("invalid job argument {0}: arguments must start with -- and not be one of --JOB_NAME, --conf, --debug, --mode")]
    InvalidArgument(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("job run already submitted")]
    AlreadySubmitted,
    #[error("job run not submitted yet")]
    NotSubmitted,
    #[error("gave up after {attempts} consecutive throttled calls")]
    ThrottlingExceeded { attempts: u32 },
    #[error("job run failed: {0}")]
    RunFailed(String),
    #[error("job run timed out: {0}")]
    RunTimedOut(String),
    #[error("job run was stopped: {0}")]
    RunStopped(String),
    #[error(transparent)]
    Metadata(#[from] MetaError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("download error: {0}")]
    Download(String),
}

/// Worker hardware classes offered by the execution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerKind {
    #[default]
    Standard,
    G1X,
    G2X,
}

impl WorkerKind {
    pub fn label(self) -> &'static str {
        match self {
            WorkerKind::Standard => "Standard",
            WorkerKind::G1X => "G.1X",
            WorkerKind::G2X => "G.2X",
        }
    }

    /// DPUs per worker, read out of the label's middle segment ("G.2X" is
    /// two DPUs per worker). Standard workers are one DPU each.
    pub fn dpu_per_worker(self) -> u32 {
        self.label()
            .split('.')
            .nth(1)
            .and_then(|s| s.trim_end_matches('X').parse().ok())
            .unwrap_or(1)
    }
}

/// Object store locations filled in by [`GlueJob::upload_artifacts`].
#[derive(Debug, Clone)]
struct UploadedResources {
    script_location: String,
    extra_py_files: Vec<String>,
    extra_files: Vec<String>,
    extra_jars: Vec<String>,
}

/// A batch job assembled from a local job folder.
#[derive(Debug)]
pub struct GlueJob {
    name: String,
    role: String,
    bucket: String,
    artifacts: JobArtifacts,
    arguments: BTreeMap<String, String>,
    worker_kind: WorkerKind,
    number_of_workers: u32,
    timeout_override_minutes: Option<u32>,
    max_retries: i32,
    max_concurrent_runs: i32,
    tags: BTreeMap<String, String>,
    poll_policy: PollPolicy,
    metadata: Vec<DatabaseMeta>,
    job_id: String,
    run_id: Option<String>,
    uploaded: Option<UploadedResources>,
}

pub struct GlueJobBuilder {
    job_folder: PathBuf,
    bucket: String,
    role: String,
    name: Option<String>,
    include_shared_resources: bool,
    arguments: BTreeMap<String, String>,
    worker_kind: WorkerKind,
    number_of_workers: u32,
    timeout_override_minutes: Option<u32>,
    max_retries: i32,
    max_concurrent_runs: i32,
    tags: BTreeMap<String, String>,
    poll_policy: PollPolicy,
}

impl GlueJobBuilder {
    pub fn new(
        job_folder: impl Into<PathBuf>,
        bucket: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            job_folder: job_folder.into(),
            bucket: bucket.into(),
            role: role.into(),
            name: None,
            include_shared_resources: true,
            arguments: BTreeMap::new(),
            worker_kind: WorkerKind::Standard,
            number_of_workers: 2,
            timeout_override_minutes: None,
            max_retries: 0,
            max_concurrent_runs: 1,
            tags: BTreeMap::new(),
            poll_policy: PollPolicy::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn include_shared_resources(mut self, include: bool) -> Self {
        self.include_shared_resources = include;
        self
    }

    pub fn argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn worker_kind(mut self, kind: WorkerKind) -> Self {
        self.worker_kind = kind;
        self
    }

    pub fn number_of_workers(mut self, workers: u32) -> Self {
        self.number_of_workers = workers;
        self
    }

    pub fn timeout_override_minutes(mut self, minutes: u32) -> Self {
        self.timeout_override_minutes = Some(minutes);
        self
    }

    pub fn max_retries(mut self, retries: i32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn max_concurrent_runs(mut self, runs: i32) -> Self {
        self.max_concurrent_runs = runs;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    pub fn build(self) -> Result<GlueJob, JobError> {
        let name = match self.name {
            Some(name) => name,
            None => folder_name(&self.job_folder)?,
        };
        validate_job_name(&name)?;
        validate_bucket_name(&self.bucket)?;
        validate_arguments(&self.arguments)?;
        // scanned once here so the resource lists are fixed at construction
        let artifacts = scan_job_folder(&self.job_folder, self.include_shared_resources)?;
        Ok(GlueJob {
            name,
            role: self.role,
            bucket: self.bucket,
            artifacts,
            arguments: self.arguments,
            worker_kind: self.worker_kind,
            number_of_workers: self.number_of_workers,
            timeout_override_minutes: self.timeout_override_minutes,
            max_retries: self.max_retries,
            max_concurrent_runs: self.max_concurrent_runs,
            tags: self.tags,
            poll_policy: self.poll_policy,
            metadata: Vec::new(),
            job_id: Utc::now().format("%Y%m%d%H%M%S%3f").to_string(),
            run_id: None,
            uploaded: None,
        })
    }
}

fn folder_name(folder: &Path) -> Result<String, JobError> {
    folder
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .ok_or_else(|| JobError::MissingEntryScript {
            folder: folder.display().to_string(),
        })
}

fn validate_arguments(arguments: &BTreeMap<String, String>) -> Result<(), JobError> {
    for key in arguments.keys() {
        if !key.starts_with("--") || RESERVED_ARGUMENTS.contains(&key.as_str()) {
            return Err(JobError::InvalidArgument(key.clone()));
        }
    }
    Ok(())
}

fn basename(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

impl GlueJob {
    pub fn builder(
        job_folder: impl Into<PathBuf>,
        bucket: impl Into<String>,
        role: impl Into<String>,
    ) -> GlueJobBuilder {
        GlueJobBuilder::new(job_folder, bucket, role)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn arguments(&self) -> &BTreeMap<String, String> {
        &self.arguments
    }

    pub fn set_arguments(&mut self, arguments: BTreeMap<String, String>) -> Result<(), JobError> {
        validate_arguments(&arguments)?;
        self.arguments = arguments;
        Ok(())
    }

    /// Object key prefix this submission's resources live under.
    pub fn resources_prefix(&self) -> String {
        format!("{JOBS_PREFIX}/{}/{}/resources/", self.name, self.job_id)
    }

    /// Full object store URI of the resources prefix.
    pub fn s3_job_folder(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.resources_prefix())
    }

    /// Location the running job reads agnostic metadata from.
    pub fn s3_metadata_base_path(&self) -> String {
        format!("{}meta_data/", self.s3_job_folder())
    }

    /// Attach a database's metadata documents; they are uploaded under
    /// `meta_data/{database}/` and advertised to the running job through the
    /// `--metadata_base_path` argument.
    pub fn attach_database_metadata(&mut self, database: DatabaseMeta) {
        self.metadata.push(database);
    }

    fn s3_temp_folder(&self) -> String {
        format!(
            "s3://{}/{JOBS_PREFIX}/{}/{}/glue_temp_folder/",
            self.bucket, self.name, self.job_id
        )
    }

    /// Total DPUs the run will hold.
    pub fn allocated_dpus(&self) -> u32 {
        self.worker_kind.dpu_per_worker() * self.number_of_workers
    }

    /// Timeout in minutes: the override if set, otherwise derived from the
    /// cost budget so a runaway job cannot burn more than the budget.
    pub fn timeout_minutes(&self) -> u32 {
        match self.timeout_override_minutes {
            Some(minutes) => minutes,
            None => {
                let dpus = self.allocated_dpus().max(1) as f64;
                (60.0 * COST_BUDGET_DOLLARS / (HOURLY_DPU_COST * dpus)) as u32
            }
        }
    }

    /// Package the job folder and push it to the object store.
    ///
    /// The prefix is cleared first so a re-run of the same submission never
    /// mixes stale files with fresh ones. Duplicate basenames are rejected
    /// before anything is uploaded.
    pub async fn upload_artifacts(
        &mut self,
        store: &dyn ObjectStoreClient,
    ) -> Result<(), JobError> {
        let artifacts = &self.artifacts;

        let scratch = tempfile::tempdir()?;
        let mut downloaded: Vec<PathBuf> = Vec::new();
        for url in &artifacts.archive_urls {
            downloaded.push(download_and_unnest(url, scratch.path()).await?);
        }

        let mut to_upload: Vec<&Path> = vec![artifacts.entry_script.as_path()];
        to_upload.extend(artifacts.local_files().map(PathBuf::as_path));
        to_upload.extend(downloaded.iter().map(PathBuf::as_path));
        check_nondup_resources(to_upload.iter().map(|p| basename(p)))?;

        store
            .delete_by_prefix(&self.bucket, &self.resources_prefix())
            .await?;
        let prefix = self.resources_prefix();
        for path in &to_upload {
            let key = format!("{prefix}{}", basename(path));
            info!(%key, "uploading job resource");
            store.upload(path, &self.bucket, &key).await?;
        }

        // metadata documents live in their own tree, outside the flat
        // resource namespace
        for database in &self.metadata {
            let folder = scratch.path().join("meta_data").join(database.name());
            database.write_to_json(&folder, true)?;
            let mut documents: Vec<PathBuf> = std::fs::read_dir(&folder)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            documents.sort();
            for path in documents {
                let key = format!(
                    "{prefix}meta_data/{}/{}",
                    database.name(),
                    basename(&path)
                );
                info!(%key, "uploading metadata document");
                store.upload(&path, &self.bucket, &key).await?;
            }
        }

        let folder = self.s3_job_folder();
        let to_uri = |p: &PathBuf| format!("{folder}{}", basename(p));
        self.uploaded = Some(UploadedResources {
            script_location: format!("{folder}job.py"),
            extra_py_files: artifacts
                .py_resources
                .iter()
                .map(to_uri)
                .chain(downloaded.iter().map(to_uri))
                .collect(),
            extra_files: artifacts.resources.iter().map(to_uri).collect(),
            extra_jars: artifacts.jar_resources.iter().map(to_uri).collect(),
        });
        Ok(())
        // scratch dropped here, downloaded archives removed
    }

    fn job_definition(&self, uploaded: &UploadedResources) -> JobDefinition {
        let mut default_arguments = BTreeMap::new();
        default_arguments.insert("--TempDir".to_string(), self.s3_temp_folder());
        default_arguments.insert(
            "--job-bookmark-option".to_string(),
            "job-bookmark-disable".to_string(),
        );
        if !uploaded.extra_py_files.is_empty() {
            default_arguments.insert(
                "--extra-py-files".to_string(),
                uploaded.extra_py_files.join(","),
            );
        }
        if !uploaded.extra_files.is_empty() {
            default_arguments.insert("--extra-files".to_string(), uploaded.extra_files.join(","));
        }
        if !uploaded.extra_jars.is_empty() {
            default_arguments.insert("--extra-jars".to_string(), uploaded.extra_jars.join(","));
        }
        JobDefinition {
            name: self.name.clone(),
            role: self.role.clone(),
            script_location: uploaded.script_location.clone(),
            temp_dir: self.s3_temp_folder(),
            default_arguments,
            max_retries: self.max_retries,
            max_concurrent_runs: self.max_concurrent_runs,
            worker_type: self.worker_kind.label().to_string(),
            number_of_workers: self.number_of_workers as i32,
            timeout_minutes: self.timeout_minutes() as i32,
            glue_version: GLUE_VERSION.to_string(),
            python_version: PYTHON_VERSION.to_string(),
            tags: self.tags.clone(),
        }
    }

    /// Run arguments passed at start: the user's arguments plus, when
    /// metadata documents are attached, the injected metadata location.
    fn run_arguments(&self) -> BTreeMap<String, String> {
        let mut arguments = self.arguments.clone();
        if !self.metadata.is_empty() {
            arguments.insert(
                "--metadata_base_path".to_string(),
                self.s3_metadata_base_path(),
            );
        }
        arguments
    }

    /// Upload artifacts (unless already done), register the job definition
    /// and start a run. A job object submits at most once.
    pub async fn run_job(
        &mut self,
        store: &dyn ObjectStoreClient,
        exec: &dyn ExecutionClient,
    ) -> Result<(), JobError> {
        if self.run_id.is_some() {
            return Err(JobError::AlreadySubmitted);
        }
        if self.uploaded.is_none() {
            self.upload_artifacts(store).await?;
        }
        let uploaded = self.uploaded.as_ref().ok_or(JobError::NotSubmitted)?;
        let definition = self.job_definition(uploaded);

        // replace any stale definition left by a previous submission
        exec.delete_job(&self.name).await?;
        exec.create_job(&definition).await?;
        let run_id = exec.start_run(&self.name, &self.run_arguments()).await?;
        info!(job = %self.name, %run_id, "job run started");
        self.run_id = Some(run_id);
        Ok(())
    }

    /// Poll the submitted run until it reaches a terminal state.
    ///
    /// Throttled status checks back off exponentially per the poll policy.
    /// On success, `cleanup` removes the job definition and the uploaded
    /// resources.
    pub async fn wait_for_completion(
        &mut self,
        exec: &dyn ExecutionClient,
        store: &dyn ObjectStoreClient,
        cleanup: bool,
    ) -> Result<(), JobError> {
        let run_id = self.run_id.clone().ok_or(JobError::NotSubmitted)?;
        let mut state = PollState::new();
        loop {
            let observation = match exec.get_run(&self.name, &run_id).await {
                Ok(status) => Observation::Run {
                    state: status.state,
                    message: status.error_message,
                },
                Err(e) if e.is_throttling() => Observation::Throttled,
                Err(e) => return Err(e.into()),
            };
            match step(&self.poll_policy, &mut state, observation) {
                Step::Sleep(wait) => tokio::time::sleep(wait).await,
                Step::Done(outcome) => {
                    return match outcome {
                        Outcome::Succeeded => {
                            if cleanup {
                                self.cleanup(exec, store).await?;
                            }
                            Ok(())
                        }
                        Outcome::Failed(m) => Err(JobError::RunFailed(m)),
                        Outcome::TimedOut(m) => Err(JobError::RunTimedOut(m)),
                        Outcome::Stopped(m) => Err(JobError::RunStopped(m)),
                        Outcome::ThrottlingExhausted { attempts } => {
                            Err(JobError::ThrottlingExceeded { attempts })
                        }
                    }
                }
            }
        }
    }

    /// Remove the job definition and the uploaded resources, retrying
    /// throttled calls with the same backoff as polling.
    pub async fn cleanup(
        &self,
        exec: &dyn ExecutionClient,
        store: &dyn ObjectStoreClient,
    ) -> Result<(), JobError> {
        let policy = self.poll_policy;
        let prefix = self.resources_prefix();
        with_throttle_retry(&policy, || exec.delete_job(&self.name)).await?;
        with_throttle_retry(&policy, || store.delete_by_prefix(&self.bucket, &prefix)).await?;
        Ok(())
    }
}

/// Retry a client call on throttling with exponential backoff; other errors
/// return immediately.
async fn with_throttle_retry<T, F, Fut>(policy: &PollPolicy, mut call: F) -> Result<T, JobError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_throttling() => {
                if attempt >= policy.max_retries {
                    warn!("throttled retries exhausted");
                    return Err(JobError::ThrottlingExceeded { attempts: attempt });
                }
                let wait = policy.backoff_base * 2u32.pow(attempt);
                attempt += 1;
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_job_folder(name: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let job = tmp.path().join(name);
        std::fs::create_dir_all(&job).unwrap();
        std::fs::write(job.join("job.py"), b"pass").unwrap();
        (tmp, job)
    }

    fn job_with_capacity(kind: WorkerKind, workers: u32) -> GlueJob {
        let (_tmp, folder) = temp_job_folder("my_job");
        GlueJob::builder(folder, "my-bucket", "etl-role")
            .worker_kind(kind)
            .number_of_workers(workers)
            .build()
            .unwrap()
    }

    #[test]
    fn test_worker_dpus() {
        assert_eq!(WorkerKind::Standard.dpu_per_worker(), 1);
        assert_eq!(WorkerKind::G1X.dpu_per_worker(), 1);
        assert_eq!(WorkerKind::G2X.dpu_per_worker(), 2);
    }

    #[test]
    fn test_timeout_derived_from_cost_budget() {
        assert_eq!(job_with_capacity(WorkerKind::Standard, 2).timeout_minutes(), 1363);
        assert_eq!(job_with_capacity(WorkerKind::Standard, 10).timeout_minutes(), 272);
        assert_eq!(job_with_capacity(WorkerKind::G2X, 20).timeout_minutes(), 68);
    }

    #[test]
    fn test_timeout_override_wins() {
        let (_tmp, folder) = temp_job_folder("my_job");
        let job = GlueJob::builder(folder, "my-bucket", "etl-role")
            .number_of_workers(40)
            .timeout_override_minutes(2880)
            .build()
            .unwrap();
        assert_eq!(job.timeout_minutes(), 2880);
    }

    #[test]
    fn test_name_defaults_to_folder() {
        let (_tmp, folder) = temp_job_folder("simple_etl_job");
        let job = GlueJob::builder(folder, "my-bucket", "etl-role")
            .build()
            .unwrap();
        assert_eq!(job.name(), "simple_etl_job");
    }

    #[test]
    fn test_argument_validation() {
        let (_tmp, folder) = temp_job_folder("my_job");
        let bad = GlueJob::builder(&folder, "my-bucket", "etl-role")
            .argument("no_dashes", "x")
            .build();
        assert!(matches!(bad, Err(JobError::InvalidArgument(_))));

        let reserved = GlueJob::builder(&folder, "my-bucket", "etl-role")
            .argument("--JOB_NAME", "sneaky")
            .build();
        assert!(matches!(reserved, Err(JobError::InvalidArgument(_))));

        let ok = GlueJob::builder(&folder, "my-bucket", "etl-role")
            .argument("--snapshot_date", "2024-01-01")
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_bucket_with_scheme_rejected() {
        let (_tmp, folder) = temp_job_folder("my_job");
        let job = GlueJob::builder(folder, "s3://my-bucket", "etl-role").build();
        assert!(matches!(job, Err(JobError::Validation(_))));
    }

    #[test]
    fn test_build_requires_entry_script() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = tmp.path().join("empty_job");
        std::fs::create_dir_all(&folder).unwrap();
        let job = GlueJob::builder(folder, "my-bucket", "etl-role").build();
        assert!(matches!(job, Err(JobError::MissingEntryScript { .. })));
    }

    #[test]
    fn test_paths_include_job_id() {
        let job = job_with_capacity(WorkerKind::Standard, 2);
        let prefix = job.resources_prefix();
        assert!(prefix.starts_with("_GlueJobs_/my_job/"));
        assert!(prefix.ends_with("/resources/"));
        assert!(prefix.contains(job.job_id()));
        assert!(job.s3_metadata_base_path().ends_with("/resources/meta_data/"));
    }

    #[test]
    fn test_metadata_path_injected_only_when_attached() {
        let (_tmp, folder) = temp_job_folder("my_job");
        let mut job = GlueJob::builder(folder, "my-bucket", "etl-role")
            .argument("--env", "dev")
            .build()
            .unwrap();
        assert!(!job.run_arguments().contains_key("--metadata_base_path"));

        let db = DatabaseMeta::new("workforce", "my-bucket", "workforce/", "HR data").unwrap();
        job.attach_database_metadata(db);
        let args = job.run_arguments();
        assert_eq!(args["--env"], "dev");
        assert!(args["--metadata_base_path"].starts_with("s3://my-bucket/_GlueJobs_/"));
    }
}
