use crate::{
    config::Config,
    discovery,
    executor::process::ProcessExecutor,
    job::{validate_selection, JobDescriptor, RunSession},
    report::{self, SessionMetadata},
    routines,
    runner::{spawn_background, JobQueueRunner, RunEvent},
    util::{ensure_dir, now_rfc3339},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "testdeck")]
#[command(about = "Sequential data-validation test runner (isolated jobs + HTML report aggregation)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./testdeck.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the test identifiers that can be selected for a job.
    Discover {},
    /// Run jobs one after another and aggregate their reports.
    Run {
        /// `<FILE>=<TEST>`; repeat for more jobs. Runs in the given order.
        #[arg(long = "job", value_parser = parse_job)]
        jobs: Vec<JobDescriptor>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        sw_version: Option<String>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Run one built-in routine and write its HTML report (test process side).
    Check {
        #[arg(long)]
        routine: String,
        #[arg(long)]
        report: PathBuf,
        /// Input file; defaults to the value of the input environment variable.
        #[arg(long)]
        input: Option<PathBuf>,
        /// Environment variable holding the input path.
        #[arg(long)]
        input_env: Option<String>,
    },
}

fn parse_job(raw: &str) -> Result<JobDescriptor, crate::job::SelectionError> {
    JobDescriptor::parse(raw)
}

/// Returns the process exit code.
pub fn dispatch(args: Args) -> Result<i32> {
    let cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    match &args.cmd {
        Command::Discover {} => {
            let _guard = init_logging(&args, &cfg, None)?;
            discover(&cfg)
        }
        Command::Run {
            jobs,
            project,
            category,
            sw_version,
            out_dir,
        } => {
            let mut metadata = SessionMetadata::from_config(&cfg);
            if let Some(v) = project {
                metadata.project_name = v.clone();
            }
            if let Some(v) = category {
                metadata.test_category = v.clone();
            }
            if let Some(v) = sw_version {
                metadata.sw_version = v.clone();
            }
            run(&args, &cfg, jobs.clone(), metadata, out_dir.as_deref())
        }
        Command::Check {
            routine,
            report,
            input,
            input_env,
        } => {
            let _guard = init_logging(&args, &cfg, None)?;
            let env_var = input_env
                .as_deref()
                .unwrap_or(cfg.executor.input_env_var.as_str());
            check(routine, report, input.as_deref(), env_var)
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    ["testdeck.toml", "testdeck.example.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn discover(cfg: &Config) -> Result<i32> {
    let found = discovery::discover(cfg);
    for failure in &found.failures {
        warn!("{failure}");
    }
    info!("discovered {} test(s)", found.tests.len());
    println!("{}", serde_json::to_string_pretty(&found)?);
    Ok(0)
}

fn run(
    args: &Args,
    cfg: &Config,
    jobs: Vec<JobDescriptor>,
    metadata: SessionMetadata,
    out_override: Option<&Path>,
) -> Result<i32> {
    // Nothing touches the filesystem until the selection is accepted.
    if let Err(err) = validate_selection(cfg, &jobs) {
        let _guard = init_logging(args, cfg, None)?;
        return Err(err.into());
    }
    let session = RunSession::new(cfg, jobs)?;

    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    let session_dir = out_root.join(session.id());
    ensure_dir(&session_dir)?;

    let log_path = resolve_log_path(cfg, &session_dir);
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    info!(
        "session={} jobs={} out={}",
        session.id(),
        session.jobs().len(),
        session_dir.display()
    );

    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(cfg).context("serializing effective config")?;
        std::fs::write(session_dir.join("effective-config.toml"), raw)?;
    }

    let executor = ProcessExecutor::new(cfg)?;
    let runner = JobQueueRunner::new(cfg, executor);
    let handle = spawn_background(runner, session);

    let session = handle.wait(|event| match event {
        RunEvent::JobStarted { index, total, job } => {
            info!("running {}/{}: {}", index + 1, total, job.test_identifier)
        }
        RunEvent::JobFinished(result) => info!(
            "finished {}: {} report={}",
            result.index + 1,
            result.outcome.label(),
            result.report_path.display()
        ),
        RunEvent::Completed(session) => info!("all {} job(s) collected", session.results().len()),
    })?;

    let results = session.results().to_vec();
    let view = report::aggregate(metadata, session);

    let summary_path = session_dir.join(&cfg.output.summary_filename);
    if cfg.output.write_summary_html {
        let html = report::render_html(&view).context("render summary page")?;
        std::fs::write(&summary_path, html)
            .with_context(|| format!("write summary: {}", summary_path.display()))?;
    }

    if cfg.output.write_index_json {
        let index = report::index_json(&view, &now_rfc3339());
        std::fs::write(
            session_dir.join("index.json"),
            serde_json::to_string_pretty(&index)?,
        )?;
    }

    if cfg.global.print_summary {
        let jobs: Vec<_> = results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "input": r.descriptor.input_path,
                    "test": r.descriptor.test_identifier,
                    "status": r.outcome.label(),
                    "report": r.report_path,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "session_id": view.overview.session_id,
                "session_dir": session_dir,
                "summary": cfg.output.write_summary_html.then_some(&summary_path),
                "jobs": jobs,
            }))?
        );
    }

    Ok(0)
}

fn check(routine: &str, report: &Path, input: Option<&Path>, input_env: &str) -> Result<i32> {
    let routine = routines::find(routine)
        .ok_or_else(|| anyhow!("unknown built-in routine: {routine}"))?;
    let input = match input {
        Some(p) => p.to_path_buf(),
        None => std::env::var_os(input_env)
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("{input_env} is not set"))?,
    };

    let passed = routines::run_to_report(routine, &input, report)?;
    Ok(if passed { 0 } else { 1 })
}

fn resolve_log_path(cfg: &Config, session_dir: &Path) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    Some(session_dir.join("logs").join("testdeck.log"))
}
