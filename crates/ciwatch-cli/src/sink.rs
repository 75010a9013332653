use ciwatch_core::Report;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const CSV_HEADER: &str = "Status,Job,Total,Passed";

pub fn report_path(dir: &Path, target_build: &str) -> PathBuf {
    dir.join(format!("report_{target_build}.csv"))
}

/// CSV table of an aggregated report, one row per subcomponent.
pub fn render_csv(report: &Report) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + 1 + report.rows.len() * 32);
    out.push_str(CSV_HEADER);
    out.push('\n');
    for row in &report.rows {
        out.push_str(&format!(
            "{},{},{},{}\n",
            csv_field(row.status.as_str()),
            csv_field(&row.subcomponent),
            row.total,
            row.passed
        ));
    }
    out
}

pub fn write_csv(path: &Path, report: &Report) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_csv(report))
}

pub fn log_report(report: &Report) {
    let mut current: Option<&str> = None;
    for row in &report.rows {
        if current != Some(row.component.as_str()) {
            info!("Component {}", row.component);
            current = Some(row.component.as_str());
        }
        info!("{:>8} {} {}", row.status, row.subcomponent, row.passed);
    }
    info!("Total: {}", report.total_expected);
    info!("Passed: {}, {}", report.total_passed, format_percentage(report.pass_percentage));
}

pub fn format_percentage(value: f64) -> String {
    format!("{value:.6}%")
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
