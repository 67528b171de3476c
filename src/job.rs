use crate::{
    config::Config,
    util::{looks_like_url, now_rfc3339, sha256_hex},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub input_path: PathBuf,
    pub test_identifier: String,
}

impl JobDescriptor {
    pub fn new(input_path: impl Into<PathBuf>, test_identifier: impl Into<String>) -> Self {
        Self {
            input_path: input_path.into(),
            test_identifier: test_identifier.into(),
        }
    }

    /// Parses the CLI form `<FILE>=<TEST>`. The split is on the last `=` so
    /// file paths may contain one.
    pub fn parse(raw: &str) -> Result<Self, SelectionError> {
        let (file, test) = raw
            .rsplit_once('=')
            .ok_or_else(|| SelectionError::Malformed(raw.to_string()))?;
        let file = file.trim();
        let test = test.trim();
        if file.is_empty() {
            return Err(SelectionError::Malformed(raw.to_string()));
        }
        if test.is_empty() {
            return Err(SelectionError::MissingTest(PathBuf::from(file)));
        }
        Ok(Self::new(file, test))
    }
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("load at least one file")]
    Empty,
    #[error("malformed job `{0}`; expected <FILE>=<TEST>")]
    Malformed(String),
    #[error("no test case selected for {}", .0.display())]
    MissingTest(PathBuf),
    #[error("URL inputs are disabled: {0}")]
    UrlInput(String),
    #[error("input does not exist: {}", .0.display())]
    MissingInput(PathBuf),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("serializing config for the session id: {0}")]
    ConfigHash(#[from] toml::ser::Error),
}

/// Checks a job list before anything is executed.
pub fn validate_selection(cfg: &Config, jobs: &[JobDescriptor]) -> Result<(), SelectionError> {
    if jobs.is_empty() {
        return Err(SelectionError::Empty);
    }
    for job in jobs {
        if job.test_identifier.trim().is_empty() {
            return Err(SelectionError::MissingTest(job.input_path.clone()));
        }
        let raw = job.input_path.display().to_string();
        if cfg.security.reject_url_inputs && looks_like_url(&raw) {
            return Err(SelectionError::UrlInput(raw));
        }
        if !job.input_path.is_file() {
            return Err(SelectionError::MissingInput(job.input_path.clone()));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Passed,
    Failed,
    ExecutorFailed { reason: String },
    Skipped,
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Passed => "passed",
            JobOutcome::Failed => "failed",
            JobOutcome::ExecutorFailed { .. } => "executor failure",
            JobOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub descriptor: JobDescriptor,
    pub index: usize,
    pub report_path: PathBuf,
    pub outcome: JobOutcome,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSession {
    id: String,
    started: String,
    jobs: Vec<JobDescriptor>,
    results: Vec<JobResult>,
    cursor: usize,
}

impl RunSession {
    /// Opens a session over a validated, non-empty job list.
    pub fn new(cfg: &Config, jobs: Vec<JobDescriptor>) -> Result<Self, SessionError> {
        if jobs.is_empty() {
            return Err(SelectionError::Empty.into());
        }
        let started = now_rfc3339();
        let id = session_id(cfg, &jobs, &started)?;
        Ok(Self {
            id,
            started,
            jobs,
            results: Vec::new(),
            cursor: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started(&self) -> &str {
        &self.started
    }

    pub fn jobs(&self) -> &[JobDescriptor] {
        &self.jobs
    }

    pub fn results(&self) -> &[JobResult] {
        &self.results
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_complete(&self) -> bool {
        self.cursor == self.jobs.len()
    }

    /// The job the cursor points at, if any remain.
    pub fn next_job(&self) -> Option<(usize, &JobDescriptor)> {
        self.jobs.get(self.cursor).map(|job| (self.cursor, job))
    }

    /// Records the result for the job under the cursor and advances it.
    pub(crate) fn collect(&mut self, result: JobResult) {
        debug_assert_eq!(result.index, self.cursor);
        debug_assert!(self.cursor < self.jobs.len());
        self.results.push(result);
        self.cursor += 1;
    }

    /// Per-job report path under `<reports_dir>/<session id>/`.
    pub fn report_path(&self, reports_dir: &Path, index: usize) -> PathBuf {
        let stem = self
            .jobs
            .get(index)
            .and_then(|j| j.input_path.file_stem())
            .map(|s| crate::util::file_slug(&s.to_string_lossy()))
            .unwrap_or_else(|| "job".to_string());
        reports_dir
            .join(&self.id)
            .join(format!("{:02}-{}.html", index + 1, stem))
    }
}

fn session_id(
    cfg: &Config,
    jobs: &[JobDescriptor],
    started: &str,
) -> Result<String, toml::ser::Error> {
    let mut material = cfg.normalized_for_hash()?;
    material.push_str(started);
    for job in jobs {
        material.push('\n');
        material.push_str(&job.input_path.display().to_string());
        material.push('\t');
        material.push_str(&job.test_identifier);
    }
    let mut id = sha256_hex(material.as_bytes());
    id.truncate(16);
    Ok(id)
}
