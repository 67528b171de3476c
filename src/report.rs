use crate::{
    config::Config,
    job::{JobOutcome, RunSession},
    templates,
    util::base_name,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

/// Free-form labels the operator attaches to a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub project_name: String,
    pub test_category: String,
    pub sw_version: String,
}

impl SessionMetadata {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            project_name: cfg.global.project_name.clone(),
            test_category: cfg.global.test_category.clone(),
            sw_version: cfg.global.sw_version.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OverviewEntry {
    pub input_name: String,
    pub input_path: PathBuf,
    pub test_identifier: String,
    pub outcome: Option<JobOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub metadata: SessionMetadata,
    pub session_id: String,
    pub started: String,
    pub entries: Vec<OverviewEntry>,
}

#[derive(Debug, Clone, Serialize, Error)]
#[error("missing report artifact {}: {reason}", .path.display())]
pub struct MissingArtifact {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ReportSection {
    pub title: String,
    pub report_path: PathBuf,
    pub content: Result<String, MissingArtifact>,
}

#[derive(Debug, Clone)]
pub struct CompositeView {
    pub overview: Overview,
    pub sections: Vec<ReportSection>,
}

/// Builds the overview plus one section per collected result, in
/// submission order. A section whose artifact cannot be read carries the
/// error instead of failing the whole view.
pub fn aggregate(metadata: SessionMetadata, session: RunSession) -> CompositeView {
    let entries = session
        .jobs()
        .iter()
        .enumerate()
        .map(|(i, job)| OverviewEntry {
            input_name: base_name(&job.input_path),
            input_path: job.input_path.clone(),
            test_identifier: job.test_identifier.clone(),
            outcome: session.results().get(i).map(|r| r.outcome.clone()),
        })
        .collect();

    let sections = session
        .results()
        .iter()
        .map(|result| {
            let content = std::fs::read_to_string(&result.report_path).map_err(|err| {
                warn!("report for job {} unreadable: {err}", result.index + 1);
                MissingArtifact {
                    path: result.report_path.clone(),
                    reason: err.to_string(),
                }
            });
            ReportSection {
                title: base_name(&result.report_path),
                report_path: result.report_path.clone(),
                content,
            }
        })
        .collect();

    CompositeView {
        overview: Overview {
            metadata,
            session_id: session.id().to_string(),
            started: session.started().to_string(),
            entries,
        },
        sections,
    }
}

pub fn index_json(view: &CompositeView, finished: &str) -> serde_json::Value {
    let sections: Vec<_> = view
        .sections
        .iter()
        .map(|s| {
            serde_json::json!({
                "title": s.title,
                "report": s.report_path,
                "error": s.content.as_ref().err().map(|e| e.reason.clone()),
            })
        })
        .collect();
    serde_json::json!({
        "session_id": view.overview.session_id,
        "started": view.overview.started,
        "finished": finished,
        "metadata": view.overview.metadata,
        "jobs": view.overview.entries,
        "sections": sections,
    })
}

const SUMMARY_TEMPLATE: &str = include_str!("templates/summary.html");

#[derive(Serialize)]
struct SummaryPage<'a> {
    metadata: &'a SessionMetadata,
    session_id: &'a str,
    started: &'a str,
    entries: Vec<EntryView<'a>>,
    sections: Vec<SectionView<'a>>,
}

#[derive(Serialize)]
struct EntryView<'a> {
    input_name: &'a str,
    test_identifier: &'a str,
    css: &'static str,
    label: &'static str,
}

#[derive(Serialize)]
struct SectionView<'a> {
    tab: usize,
    title: &'a str,
    html: Option<&'a str>,
    missing: Option<String>,
}

/// One self-contained document: a Summary tab followed by one tab per report.
pub fn render_html(view: &CompositeView) -> Result<String, minijinja::Error> {
    let overview = &view.overview;
    let entries = overview
        .entries
        .iter()
        .map(|entry| {
            let (css, label) = match &entry.outcome {
                Some(JobOutcome::Passed) => ("passed", "passed"),
                Some(other) => ("failed", other.label()),
                None => ("missing", "not run"),
            };
            EntryView {
                input_name: &entry.input_name,
                test_identifier: &entry.test_identifier,
                css,
                label,
            }
        })
        .collect();

    let sections = view
        .sections
        .iter()
        .enumerate()
        .map(|(i, section)| SectionView {
            tab: i + 1,
            title: &section.title,
            html: section.content.as_deref().ok(),
            missing: section.content.as_ref().err().map(ToString::to_string),
        })
        .collect();

    let page = SummaryPage {
        metadata: &overview.metadata,
        session_id: &overview.session_id,
        started: &overview.started,
        entries,
        sections,
    };
    templates::render_html("summary.html", SUMMARY_TEMPLATE, page)
}
