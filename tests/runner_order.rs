use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use testdeck::{
    config::Config,
    executor::{CancelToken, ExecutedJob, Executor, ExecutorError},
    job::{JobDescriptor, JobOutcome, RunSession},
    runner::{spawn_background, JobQueueRunner, RunEvent},
};

/// Writes a tiny report per job and records call order. Fails for any
/// identifier containing `broken`, and exits "non-zero" for `red`.
#[derive(Default, Clone)]
struct FakeExecutor {
    calls: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicBool>,
}

impl Executor for FakeExecutor {
    fn execute(
        &self,
        job: &JobDescriptor,
        report_path: &Path,
        _cancel: &CancelToken,
    ) -> Result<ExecutedJob, ExecutorError> {
        assert!(
            !self.in_flight.swap(true, Ordering::SeqCst),
            "two jobs in flight"
        );
        self.calls.lock().unwrap().push(job.test_identifier.clone());

        let res = if job.test_identifier.contains("broken") {
            Err(ExecutorError::NoArtifact {
                report: report_path.to_path_buf(),
                exit_code: Some(2),
                stderr: "boom".into(),
            })
        } else {
            std::fs::create_dir_all(report_path.parent().unwrap()).unwrap();
            std::fs::write(report_path, format!("<p>{}</p>", job.test_identifier)).unwrap();
            let red = job.test_identifier.contains("red");
            Ok(ExecutedJob {
                report_path: report_path.to_path_buf(),
                exit_code: Some(if red { 1 } else { 0 }),
                success: !red,
            })
        };

        self.in_flight.store(false, Ordering::SeqCst);
        res
    }
}

fn cfg_in(dir: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.reports_dir = dir.join("reports").display().to_string();
    cfg
}

fn jobs(ids: &[&str]) -> Vec<JobDescriptor> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| JobDescriptor::new(format!("in{i}.csv"), *id))
        .collect()
}

#[test]
fn dispatches_each_job_once_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_in(dir.path());
    let fake = FakeExecutor::default();
    let submitted = jobs(&["t::A", "t::B", "t::C", "t::D"]);

    let runner = JobQueueRunner::new(&cfg, fake.clone());
    let session = runner
        .run(RunSession::new(&cfg, submitted.clone()).unwrap())
        .finish();

    assert_eq!(*fake.calls.lock().unwrap(), vec!["t::A", "t::B", "t::C", "t::D"]);
    assert!(session.is_complete());
    assert_eq!(session.cursor(), submitted.len());
    let collected: Vec<_> = session.results().iter().map(|r| r.descriptor.clone()).collect();
    assert_eq!(collected, submitted);
    for (i, r) in session.results().iter().enumerate() {
        assert_eq!(r.index, i);
        assert_eq!(r.outcome, JobOutcome::Passed);
    }
}

#[test]
fn run_is_lazy_and_advances_one_job_per_pull() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_in(dir.path());
    let fake = FakeExecutor::default();
    let runner = JobQueueRunner::new(&cfg, fake.clone());

    let mut run = runner.run(RunSession::new(&cfg, jobs(&["t::A", "t::B"])).unwrap());
    assert!(fake.calls.lock().unwrap().is_empty());
    assert_eq!(run.size_hint(), (2, Some(2)));

    let first = run.next().unwrap();
    assert_eq!(first.descriptor.test_identifier, "t::A");
    assert_eq!(fake.calls.lock().unwrap().len(), 1);
    assert_eq!(run.session().cursor(), 1);

    let second = run.next().unwrap();
    assert_eq!(second.index, 1);
    assert!(run.next().is_none());
    assert!(run.session().is_complete());
}

#[test]
fn nonzero_exit_with_report_is_a_completed_failed_job() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_in(dir.path());
    let runner = JobQueueRunner::new(&cfg, FakeExecutor::default());
    let session = runner
        .run(RunSession::new(&cfg, jobs(&["t::red"])).unwrap())
        .finish();

    let r = &session.results()[0];
    assert_eq!(r.outcome, JobOutcome::Failed);
    assert_eq!(r.exit_code, Some(1));
    assert!(r.report_path.is_file());
}

#[test]
fn executor_failure_is_recorded_and_the_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_in(dir.path());
    let fake = FakeExecutor::default();
    let runner = JobQueueRunner::new(&cfg, fake.clone());
    let session = runner
        .run(RunSession::new(&cfg, jobs(&["t::A", "t::broken", "t::C"])).unwrap())
        .finish();

    assert_eq!(fake.calls.lock().unwrap().len(), 3);
    let outcomes: Vec<_> = session.results().iter().map(|r| r.outcome.label()).collect();
    assert_eq!(outcomes, vec!["passed", "executor failure", "passed"]);
    assert_eq!(session.results()[1].exit_code, Some(2));
}

#[test]
fn stop_on_executor_failure_skips_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = cfg_in(dir.path());
    cfg.runner.stop_on_executor_failure = true;
    let fake = FakeExecutor::default();
    let runner = JobQueueRunner::new(&cfg, fake.clone());
    let session = runner
        .run(RunSession::new(&cfg, jobs(&["t::broken", "t::B", "t::C"])).unwrap())
        .finish();

    assert_eq!(*fake.calls.lock().unwrap(), vec!["t::broken"]);
    assert_eq!(session.results().len(), 3);
    assert!(session.is_complete());
    assert_eq!(session.results()[1].outcome, JobOutcome::Skipped);
    assert_eq!(session.results()[2].outcome, JobOutcome::Skipped);
}

#[test]
fn cancelled_run_starts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_in(dir.path());
    let fake = FakeExecutor::default();
    let cancel = CancelToken::new();
    cancel.cancel();
    let runner = JobQueueRunner::new(&cfg, fake.clone()).with_cancel(cancel);
    let session = runner
        .run(RunSession::new(&cfg, jobs(&["t::A", "t::B"])).unwrap())
        .finish();

    assert!(fake.calls.lock().unwrap().is_empty());
    assert!(session
        .results()
        .iter()
        .all(|r| r.outcome == JobOutcome::Skipped));
}

#[test]
fn background_run_reports_progress_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_in(dir.path());
    let runner = JobQueueRunner::new(&cfg, FakeExecutor::default());
    let handle = spawn_background(runner, RunSession::new(&cfg, jobs(&["t::A", "t::B"])).unwrap());

    let mut seen = Vec::new();
    let session = handle
        .wait(|event| {
            seen.push(match event {
                RunEvent::JobStarted { index, total, .. } => format!("start {index}/{total}"),
                RunEvent::JobFinished(r) => format!("done {}", r.index),
                RunEvent::Completed(_) => "completed".to_string(),
            })
        })
        .unwrap();

    assert_eq!(
        seen,
        vec!["start 0/2", "done 0", "start 1/2", "done 1", "completed"]
    );
    let reports: Vec<PathBuf> = session.results().iter().map(|r| r.report_path.clone()).collect();
    assert_eq!(reports.len(), 2);
    assert_ne!(reports[0], reports[1]);
}

/// Blocks until cancelled.
struct WaitsForCancel;

impl Executor for WaitsForCancel {
    fn execute(
        &self,
        _job: &JobDescriptor,
        _report_path: &Path,
        cancel: &CancelToken,
    ) -> Result<ExecutedJob, ExecutorError> {
        while !cancel.is_cancelled() {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        Err(ExecutorError::Cancelled)
    }
}

#[test]
fn cancelling_a_background_run_skips_remaining_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_in(dir.path());
    let runner = JobQueueRunner::new(&cfg, WaitsForCancel);
    let handle = spawn_background(runner, RunSession::new(&cfg, jobs(&["t::A", "t::B"])).unwrap());

    handle.cancel();
    let session = handle.wait(|_| {}).unwrap();

    assert!(session.is_complete());
    assert_ne!(session.results()[0].outcome, JobOutcome::Passed);
    assert_eq!(session.results()[1].outcome, JobOutcome::Skipped);
}

/// Completes its job, then cancels the run it belongs to.
struct CancelsAfterFirst;

impl Executor for CancelsAfterFirst {
    fn execute(
        &self,
        _job: &JobDescriptor,
        report_path: &Path,
        cancel: &CancelToken,
    ) -> Result<ExecutedJob, ExecutorError> {
        std::fs::create_dir_all(report_path.parent().unwrap()).unwrap();
        std::fs::write(report_path, "<p>ok</p>").unwrap();
        cancel.cancel();
        Ok(ExecutedJob {
            report_path: report_path.to_path_buf(),
            exit_code: Some(0),
            success: true,
        })
    }
}

#[test]
fn skipped_jobs_are_never_reported_as_started() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_in(dir.path());
    let runner = JobQueueRunner::new(&cfg, CancelsAfterFirst);
    let handle = spawn_background(
        runner,
        RunSession::new(&cfg, jobs(&["t::A", "t::B", "t::C"])).unwrap(),
    );

    let mut seen = Vec::new();
    let session = handle
        .wait(|event| {
            seen.push(match event {
                RunEvent::JobStarted { index, .. } => format!("start {index}"),
                RunEvent::JobFinished(r) => format!("done {} {}", r.index, r.outcome.label()),
                RunEvent::Completed(_) => "completed".to_string(),
            })
        })
        .unwrap();

    assert_eq!(
        seen,
        vec![
            "start 0",
            "done 0 passed",
            "done 1 skipped",
            "done 2 skipped",
            "completed"
        ]
    );
    assert!(session.is_complete());
}

#[test]
fn next_with_skips_the_dispatch_callback_after_a_stop() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = cfg_in(dir.path());
    cfg.runner.stop_on_executor_failure = true;
    let runner = JobQueueRunner::new(&cfg, FakeExecutor::default());
    let mut run = runner.run(RunSession::new(&cfg, jobs(&["t::broken", "t::B"])).unwrap());

    let mut dispatched = Vec::new();
    while run.next_with(|index, _, _| dispatched.push(index)).is_some() {}

    assert_eq!(dispatched, vec![0]);
    assert!(run.session().is_complete());
}
