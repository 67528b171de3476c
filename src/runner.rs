use crate::{
    config::Config,
    executor::{CancelToken, Executor},
    job::{JobDescriptor, JobOutcome, JobResult, RunSession},
};
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{info, warn};

pub struct JobQueueRunner<E: Executor> {
    cfg: Config,
    executor: E,
    cancel: CancelToken,
}

impl<E: Executor> JobQueueRunner<E> {
    pub fn new(cfg: &Config, executor: E) -> Self {
        Self {
            cfg: cfg.clone(),
            executor,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Starts dispatching `session`. Nothing runs until the returned
    /// iterator is pulled; each pull executes exactly one job.
    pub fn run(&self, session: RunSession) -> Run<'_, E> {
        Run {
            runner: self,
            session,
            halted: false,
        }
    }

    fn execute_one(&self, index: usize, job: &JobDescriptor, report_path: PathBuf) -> JobResult {
        let started = Instant::now();
        let res = self.executor.execute(job, &report_path, &self.cancel);
        let duration_ms = started.elapsed().as_millis() as u64;

        match res {
            Ok(done) => JobResult {
                descriptor: job.clone(),
                index,
                report_path: done.report_path,
                outcome: if done.success {
                    JobOutcome::Passed
                } else {
                    JobOutcome::Failed
                },
                exit_code: done.exit_code,
                duration_ms,
            },
            Err(err) => {
                warn!("job {} ({}) executor failure: {err}", index, job.test_identifier);
                let exit_code = match &err {
                    crate::executor::ExecutorError::NoArtifact { exit_code, .. } => *exit_code,
                    _ => None,
                };
                JobResult {
                    descriptor: job.clone(),
                    index,
                    report_path,
                    outcome: JobOutcome::ExecutorFailed {
                        reason: err.to_string(),
                    },
                    exit_code,
                    duration_ms,
                }
            }
        }
    }
}

/// One pass over a session. Finite, and not restartable: the session is
/// owned by the iterator and handed back by [`Run::finish`].
pub struct Run<'a, E: Executor> {
    runner: &'a JobQueueRunner<E>,
    session: RunSession,
    halted: bool,
}

impl<E: Executor> Run<'_, E> {
    pub fn session(&self) -> &RunSession {
        &self.session
    }

    /// Runs whatever is left and returns the completed session.
    pub fn finish(mut self) -> RunSession {
        for _ in self.by_ref() {}
        self.session
    }

    /// Like [`Iterator::next`], calling `on_dispatch(index, total, job)` right
    /// before a job is handed to the executor. Jobs collected as skipped never
    /// reach the callback.
    pub fn next_with(
        &mut self,
        on_dispatch: impl FnOnce(usize, usize, &JobDescriptor),
    ) -> Option<JobResult> {
        let (index, job) = self.session.next_job()?;
        let job = job.clone();
        let total = self.session.jobs().len();
        let report_path = self
            .session
            .report_path(&PathBuf::from(&self.runner.cfg.paths.reports_dir), index);

        if !self.halted && self.runner.cancel.is_cancelled() {
            info!("run cancelled before job {}", index + 1);
            self.halted = true;
        }

        let result = if self.halted {
            JobResult {
                descriptor: job,
                index,
                report_path,
                outcome: JobOutcome::Skipped,
                exit_code: None,
                duration_ms: 0,
            }
        } else {
            on_dispatch(index, total, &job);
            info!(
                "job {}/{} test={} input={}",
                index + 1,
                total,
                job.test_identifier,
                job.input_path.display()
            );
            let result = self.runner.execute_one(index, &job, report_path);
            info!(
                "job {}/{} {} in {}ms",
                index + 1,
                total,
                result.outcome.label(),
                result.duration_ms
            );
            if matches!(result.outcome, JobOutcome::ExecutorFailed { .. })
                && self.runner.cfg.runner.stop_on_executor_failure
            {
                warn!("stop_on_executor_failure=true; remaining jobs will be skipped");
                self.halted = true;
            }
            result
        };

        self.session.collect(result.clone());
        Some(result)
    }
}

impl<E: Executor> Iterator for Run<'_, E> {
    type Item = JobResult;

    fn next(&mut self) -> Option<JobResult> {
        self.next_with(|_, _, _| {})
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.session.jobs().len() - self.session.cursor();
        (left, Some(left))
    }
}

/// Progress from a background run. Skipped jobs get a `JobFinished` with a
/// skipped outcome but no `JobStarted`.
#[derive(Debug)]
pub enum RunEvent {
    JobStarted {
        index: usize,
        total: usize,
        job: JobDescriptor,
    },
    JobFinished(JobResult),
    Completed(RunSession),
}

/// A run executing on its single background worker.
pub struct RunHandle {
    events: Receiver<RunEvent>,
    worker: JoinHandle<()>,
    cancel: CancelToken,
}

impl RunHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Blocks until the worker reports completion, passing every
    /// intermediate event to `on_event`.
    pub fn wait(self, mut on_event: impl FnMut(&RunEvent)) -> Result<RunSession> {
        let mut completed = None;
        for event in self.events.iter() {
            on_event(&event);
            if let RunEvent::Completed(session) = event {
                completed = Some(session);
                break;
            }
        }
        self.worker
            .join()
            .map_err(|_| anyhow!("run worker panicked"))?;
        completed.ok_or_else(|| anyhow!("run worker exited without completing the session"))
    }
}

/// Moves the runner onto one worker thread. Completion and per-job progress
/// arrive as [`RunEvent`]s so the caller's thread is never blocked on a child.
pub fn spawn_background<E>(runner: JobQueueRunner<E>, session: RunSession) -> RunHandle
where
    E: Executor + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let cancel = runner.cancel_token();

    let worker = std::thread::spawn(move || {
        let mut run = runner.run(session);
        // A dropped receiver only means nobody is watching; keep running.
        while let Some(result) = run.next_with(|index, total, job| {
            let _ = tx.send(RunEvent::JobStarted {
                index,
                total,
                job: job.clone(),
            });
        }) {
            let _ = tx.send(RunEvent::JobFinished(result));
        }
        let _ = tx.send(RunEvent::Completed(run.finish()));
    });

    RunHandle {
        events: rx,
        worker,
        cancel,
    }
}
