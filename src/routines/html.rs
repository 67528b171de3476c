use super::{BarChart, Routine, RoutineError, RoutineReport, Table};
use crate::{templates, util::now_rfc3339};
use serde::Serialize;
use std::path::Path;

const TEMPLATE: &str = include_str!("../templates/routine_report.html");

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 420.0;
const LEFT: f64 = 60.0;
const RIGHT_PAD: f64 = 20.0;
const TOP: f64 = 40.0;
const BOTTOM: f64 = 110.0;

#[derive(Serialize)]
struct Page<'a> {
    name: &'static str,
    description: &'static str,
    input: String,
    generated: String,
    status: &'static str,
    failures: &'a [String],
    error: Option<String>,
    chart: Option<ChartView>,
    table: Option<&'a Table>,
}

/// Pixel geometry for the inline SVG bar chart, coordinates pre-formatted.
#[derive(Debug, Serialize)]
pub struct ChartView {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub width: String,
    pub height: String,
    pub left: String,
    pub right: String,
    pub top: String,
    pub bottom: String,
    pub zero_y: String,
    pub center_x: String,
    pub center_y: String,
    pub max_label_y: String,
    pub x_label_y: String,
    pub max: i64,
    pub bars: Vec<BarView>,
}

#[derive(Debug, Serialize)]
pub struct BarView {
    pub label: String,
    pub value: i64,
    pub fill: &'static str,
    pub x: String,
    pub y: String,
    pub width: String,
    pub height: String,
    pub label_x: String,
    pub label_y: String,
}

pub fn render_report(
    routine: &dyn Routine,
    input: &Path,
    report: &RoutineReport,
) -> Result<String, minijinja::Error> {
    let page = Page {
        name: routine.name(),
        description: routine.description(),
        input: input.display().to_string(),
        generated: now_rfc3339(),
        status: if report.passed() { "passed" } else { "failed" },
        failures: &report.failures,
        error: None,
        chart: report.chart.as_ref().map(chart_view),
        table: Some(&report.table),
    };
    templates::render_html("routine_report.html", TEMPLATE, page)
}

pub fn render_error(
    routine: &dyn Routine,
    input: &Path,
    err: &RoutineError,
) -> Result<String, minijinja::Error> {
    let page = Page {
        name: routine.name(),
        description: routine.description(),
        input: input.display().to_string(),
        generated: now_rfc3339(),
        status: "failed",
        failures: &[],
        error: Some(err.to_string()),
        chart: None,
        table: None,
    };
    templates::render_html("routine_report.html", TEMPLATE, page)
}

fn px(v: f64) -> String {
    format!("{v:.1}")
}

/// Lays out one bar per entry. Highlighted bars are red, the rest green.
pub fn chart_view(chart: &BarChart) -> ChartView {
    let plot_w = WIDTH - LEFT - RIGHT_PAD;
    let plot_h = HEIGHT - TOP - BOTTOM;
    let max = chart.bars.iter().map(|b| b.value).max().unwrap_or(0).max(1);
    let min = chart.bars.iter().map(|b| b.value).min().unwrap_or(0).min(0);
    let span = (max - min) as f64;
    let zero_y = TOP + plot_h * (max as f64 / span);
    let slot = plot_w / chart.bars.len().max(1) as f64;
    let label_y = TOP + plot_h + 14.0;

    let bars = chart
        .bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let v = bar.value as f64;
            let h = plot_h * (v.abs() / span);
            let x = LEFT + slot * i as f64 + slot * 0.1;
            BarView {
                label: bar.label.clone(),
                value: bar.value,
                fill: if bar.highlight { "#d32f2f" } else { "#388e3c" },
                x: px(x),
                y: px(if v >= 0.0 { zero_y - h } else { zero_y }),
                width: px(slot * 0.8),
                height: px(h),
                label_x: px(x + slot * 0.4),
                label_y: px(label_y),
            }
        })
        .collect();

    ChartView {
        title: chart.title.clone(),
        x_label: chart.x_label.clone(),
        y_label: chart.y_label.clone(),
        width: px(WIDTH),
        height: px(HEIGHT),
        left: px(LEFT),
        right: px(LEFT + plot_w),
        top: px(TOP),
        bottom: px(TOP + plot_h),
        zero_y: px(zero_y),
        center_x: px(LEFT + plot_w / 2.0),
        center_y: px(TOP + plot_h / 2.0),
        max_label_y: px(TOP + 4.0),
        x_label_y: px(HEIGHT - 8.0),
        max,
        bars,
    }
}
