use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ExecutedJob {
    pub report_path: PathBuf,
    pub exit_code: Option<i32>,
    pub success: bool,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("spawning {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no report produced at {} (exit code {exit_code:?}); stderr: {stderr}", .report.display())]
    NoArtifact {
        report: PathBuf,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("test process exceeded timeout ({timeout:?}); stderr: {stderr}")]
    TimedOut { timeout: Duration, stderr: String },
    #[error("cancelled while the test process was running")]
    Cancelled,
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} reader thread panicked")]
    ReaderPanicked(&'static str),
}

impl ExecutorError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Shared cancellation flag. Cloning hands out another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
