use super::{Bar, BarChart, Routine, RoutineError, RoutineReport, Table};
use std::path::Path;

pub const DISCONTINUED: &str = "discontinued";

/// Flags products that are marked discontinued while their stock is zero.
pub struct AvailabilityStock;

impl Routine for AvailabilityStock {
    fn name(&self) -> &'static str {
        "TestAvailabilityStock"
    }

    fn description(&self) -> &'static str {
        "Discontinued products must not have zero stock"
    }

    fn run(&self, input: &Path) -> Result<RoutineReport, RoutineError> {
        let is_csv = input
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if !is_csv {
            return Err(RoutineError::NotCsv(input.to_path_buf()));
        }

        let raw = std::fs::read_to_string(input).map_err(|source| RoutineError::Read {
            path: input.to_path_buf(),
            source,
        })?;
        let table = Table::parse_csv(&raw)?;
        check_table(table)
    }
}

pub fn check_table(table: Table) -> Result<RoutineReport, RoutineError> {
    let name_col = table.column("Name").ok_or(RoutineError::MissingColumn("Name"))?;
    let stock_col = table.column("Stock").ok_or(RoutineError::MissingColumn("Stock"))?;
    let avail_col = table
        .column("Availability")
        .ok_or(RoutineError::MissingColumn("Availability"))?;

    let mut failures = Vec::new();
    let mut bars = Vec::with_capacity(table.rows.len());

    for (i, row) in table.rows.iter().enumerate() {
        let name = row[name_col].trim().to_string();
        let stock = parse_stock(&row[stock_col]).ok_or_else(|| RoutineError::BadNumber {
            row: i + 1,
            name: name.clone(),
            value: row[stock_col].clone(),
        })?;
        let discontinued = row[avail_col].trim() == DISCONTINUED;

        if discontinued && stock == 0 {
            failures.push(format!("FAIL: {name} is discontinued but stock is {stock}"));
        }
        bars.push(Bar {
            label: name,
            value: stock,
            highlight: discontinued,
        });
    }

    Ok(RoutineReport {
        failures,
        chart: Some(BarChart {
            title: "Stock by Product (Red=Discontinued)".into(),
            x_label: "Product Name".into(),
            y_label: "Stock".into(),
            bars,
        }),
        table,
    })
}

/// Integers, or finite numbers truncated toward zero (`5.5` reads as 5).
pub fn parse_stock(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    let f = raw.parse::<f64>().ok()?.trunc();
    if f.is_finite() && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}
