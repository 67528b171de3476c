pub mod availability;
pub mod html;
pub mod table;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub use availability::AvailabilityStock;
pub use table::{CsvError, Table};

/// Module part of the identifiers of natively registered routines.
pub const BUILTIN_NAMESPACE: &str = "builtin";

static ROUTINES: &[&dyn Routine] = &[&AvailabilityStock];

/// A validation routine compiled into this binary.
pub trait Routine: Sync {
    /// Entity name, also the `<entity>` half of the identifier.
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn run(&self, input: &Path) -> Result<RoutineReport, RoutineError>;
}

#[derive(Debug, Error)]
pub enum RoutineError {
    #[error("input must be a .csv file: {}", .0.display())]
    NotCsv(PathBuf),
    #[error("reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] CsvError),
    #[error("missing column `{0}`")]
    MissingColumn(&'static str),
    #[error("row {row} ({name}): `{value}` is not an integer stock")]
    BadNumber {
        row: usize,
        name: String,
        value: String,
    },
}

#[derive(Debug, Clone)]
pub struct Bar {
    pub label: String,
    pub value: i64,
    pub highlight: bool,
}

#[derive(Debug, Clone)]
pub struct BarChart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub bars: Vec<Bar>,
}

#[derive(Debug, Clone)]
pub struct RoutineReport {
    pub failures: Vec<String>,
    pub chart: Option<BarChart>,
    pub table: Table,
}

impl RoutineReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

pub fn registry() -> &'static [&'static dyn Routine] {
    ROUTINES
}

pub fn find(name: &str) -> Option<&'static dyn Routine> {
    ROUTINES.iter().copied().find(|r| r.name() == name)
}

pub fn builtin_identifier(routine: &dyn Routine) -> String {
    format!("{BUILTIN_NAMESPACE}::{}", routine.name())
}

/// Runs `routine` against `input` and writes its HTML report. Routine errors
/// are reported inside the document, so a report exists whenever this
/// returns `Ok`. Returns whether the routine passed.
pub fn run_to_report(routine: &dyn Routine, input: &Path, report_path: &Path) -> Result<bool> {
    let outcome = routine.run(input);
    let (doc, passed) = match &outcome {
        Ok(report) => (html::render_report(routine, input, report), report.passed()),
        Err(err) => (html::render_error(routine, input, err), false),
    };
    let doc = doc.with_context(|| format!("render report for {}", routine.name()))?;

    match &outcome {
        Ok(report) if report.passed() => info!("{} passed for {}", routine.name(), input.display()),
        Ok(report) => warn!(
            "{} failed for {}: {} failure(s)",
            routine.name(),
            input.display(),
            report.failures.len()
        ),
        Err(err) => warn!("{} errored for {}: {err}", routine.name(), input.display()),
    }

    if let Some(parent) = report_path.parent() {
        crate::util::ensure_dir(parent)?;
    }
    std::fs::write(report_path, doc)
        .with_context(|| format!("write report: {}", report_path.display()))?;
    Ok(passed)
}
