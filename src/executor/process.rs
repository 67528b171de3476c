use super::{split_identifier, CancelToken, ExecutedJob, Executor, ExecutorError};
use crate::{config::Config, job::JobDescriptor, routines::BUILTIN_NAMESPACE};
use anyhow::{Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const STDERR_TAIL_CHARS: usize = 2000;

/// How long pipe readers may keep going once the child is gone. Descendants
/// that inherited stdout/stderr can hold the pipes open past that point.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Fully resolved command line for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

pub struct ProcessExecutor {
    cfg: Config,
    program: PathBuf,
    self_exe: PathBuf,
}

impl ProcessExecutor {
    pub fn new(cfg: &Config) -> Result<Self> {
        let self_exe = std::env::current_exe().with_context(|| "current_exe")?;
        Ok(Self::with_self_exe(cfg, self_exe))
    }

    /// Like `new`, but with an explicit binary for `builtin::` identifiers.
    pub fn with_self_exe(cfg: &Config, self_exe: PathBuf) -> Self {
        Self {
            cfg: cfg.clone(),
            program: resolve_program(&cfg.executor.program),
            self_exe,
        }
    }

    pub fn invocation(&self, job: &JobDescriptor, report_path: &Path) -> Invocation {
        let (module, entity) = split_identifier(&job.test_identifier);
        let report = report_path.display().to_string();

        let mut env: Vec<(String, String)> = self
            .cfg
            .executor
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.push((
            self.cfg.executor.input_env_var.clone(),
            job.input_path.display().to_string(),
        ));

        if module == BUILTIN_NAMESPACE {
            return Invocation {
                program: self.self_exe.clone(),
                args: vec![
                    "check".into(),
                    "--routine".into(),
                    entity.to_string(),
                    "--report".into(),
                    report,
                    "--input-env".into(),
                    self.cfg.executor.input_env_var.clone(),
                ],
                env,
            };
        }

        let args = self
            .cfg
            .executor
            .args
            .iter()
            .map(|a| {
                a.replace("{target}", &job.test_identifier)
                    .replace("{module}", module)
                    .replace("{entity}", entity)
                    .replace("{report}", &report)
            })
            .collect();

        Invocation {
            program: self.program.clone(),
            args,
            env,
        }
    }
}

impl Executor for ProcessExecutor {
    fn execute(
        &self,
        job: &JobDescriptor,
        report_path: &Path,
        cancel: &CancelToken,
    ) -> Result<ExecutedJob, ExecutorError> {
        if let Some(parent) = report_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ExecutorError::io(format!("create {}", parent.display()), e))?;
        }
        // Existence of the artifact is the success signal, so nothing stale may linger.
        if report_path.exists() {
            std::fs::remove_file(report_path).map_err(|e| {
                ExecutorError::io(format!("remove stale {}", report_path.display()), e)
            })?;
        }

        let inv = self.invocation(job, report_path);
        debug!(
            "spawn {} {:?} report={}",
            inv.program.display(),
            inv.args,
            report_path.display()
        );

        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        for (k, v) in &inv.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|source| ExecutorError::Spawn {
            program: inv.program.display().to_string(),
            source,
        })?;

        let timeout = match self.cfg.executor.timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let (status, stderr) = wait_with_timeout(&mut child, timeout, cancel)?;

        if self.cfg.debug.keep_child_stderr && !stderr.trim().is_empty() {
            debug!("child stderr {}: {}", job.test_identifier, stderr.trim());
        }

        let exit_code = status.code();
        if !report_path.is_file() {
            return Err(ExecutorError::NoArtifact {
                report: report_path.to_path_buf(),
                exit_code,
                stderr: tail(&stderr, STDERR_TAIL_CHARS),
            });
        }
        if !status.success() {
            warn!(
                "{} exited with {:?}; report present, recording as failed",
                job.test_identifier, exit_code
            );
        }

        Ok(ExecutedJob {
            report_path: report_path.to_path_buf(),
            exit_code,
            success: status.success(),
        })
    }
}

fn resolve_program(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("TESTDECK_PYTHON") {
            let p = expand_tilde(&env_val);
            if p.exists() {
                return p;
            }
        }
        return PathBuf::from("python3");
    }
    expand_tilde(raw)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

fn tail(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    if count <= max_chars {
        return s.trim().to_string();
    }
    s.chars().skip(count - max_chars).collect::<String>().trim().to_string()
}

type Drained = std::io::Result<Vec<u8>>;

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> Receiver<Drained> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let res = match reader {
            Some(mut r) => r.read_to_end(&mut buf).map(|_| buf),
            None => Ok(buf),
        };
        // The caller may have stopped listening after the grace period.
        let _ = tx.send(res);
    });
    rx
}

/// Collects a reader's output, giving up at `deadline`. A reader still
/// blocked then is left behind with whatever it has buffered.
fn collect_drain(
    rx: &Receiver<Drained>,
    name: &'static str,
    deadline: Instant,
) -> Result<Vec<u8>, ExecutorError> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(res) => res.map_err(|e| ExecutorError::io(format!("read {name}"), e)),
        Err(RecvTimeoutError::Timeout) => {
            warn!("{name} still held open by a descendant of the test process; not waiting");
            Ok(Vec::new())
        }
        Err(RecvTimeoutError::Disconnected) => Err(ExecutorError::ReaderPanicked(name)),
    }
}

fn collect_stderr(
    stdout: &Receiver<Drained>,
    stderr: &Receiver<Drained>,
) -> Result<String, ExecutorError> {
    let deadline = Instant::now() + DRAIN_GRACE;
    let _stdout = collect_drain(stdout, "stdout", deadline)?;
    let stderr = collect_drain(stderr, "stderr", deadline)?;
    Ok(String::from_utf8_lossy(&stderr).into_owned())
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<(ExitStatus, String), ExecutorError> {
    // Drain pipes while waiting so a verbose test runner can't deadlock the
    // child on a full stdout/stderr buffer.
    let stdout_rx = drain(child.stdout.take());
    let stderr_rx = drain(child.stderr.take());

    let start = Instant::now();
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| ExecutorError::io("try_wait", e))?
        {
            let stderr = collect_stderr(&stdout_rx, &stderr_rx)?;
            return Ok((status, stderr));
        }

        let timed_out = timeout.is_some_and(|t| start.elapsed() > t);
        if timed_out || cancel.is_cancelled() {
            if timed_out {
                warn!("test process timed out after {:?}", timeout);
            } else {
                warn!("cancel requested; killing test process");
            }
            let _ = child.kill();
            child
                .wait()
                .map_err(|e| ExecutorError::io("wait after kill", e))?;
            let stderr = collect_stderr(&stdout_rx, &stderr_rx)?;
            return Err(match timeout {
                Some(timeout) if timed_out => ExecutorError::TimedOut {
                    timeout,
                    stderr: tail(&stderr, STDERR_TAIL_CHARS),
                },
                _ => ExecutorError::Cancelled,
            });
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}
