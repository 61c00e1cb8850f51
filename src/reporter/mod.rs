// Reporter module - run report model, HTML artifact and console summary
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{error, info};

use crate::checks::CheckCounts;
use crate::config::Config;
use crate::error::LoadTestError;
use crate::extractor::LatencyMetric;
use crate::stats::StatsSnapshot;
use crate::trend::{TrendStats, METRIC_HTTP_REQ_DURATION};

/// Describes the run that produced a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    pub target_url: String,
    pub started_at: String,
    pub finished_at: String,
    pub stage_count: usize,
    pub schedule_duration_secs: f64,
    pub expected_iterations: f64,
    pub pre_allocated_workers: usize,
    pub max_workers: usize,
    pub stopped_early: bool,
}

/// Everything known at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub trends: BTreeMap<String, TrendStats>,
    pub checks: Vec<CheckCounts>,
    pub stats: StatsSnapshot,
}

impl RunReport {
    /// Iterations dropped because the worker pool was exhausted.
    pub fn dropped(&self) -> u64 {
        self.stats.iterations_dropped
    }

    /// Trend metrics in display order: `http_req_duration`, then the latency
    /// components, then anything else by name.
    pub fn ordered_trends(&self) -> Vec<(&str, &TrendStats)> {
        let mut ordered = Vec::with_capacity(self.trends.len());
        let known: Vec<&str> = std::iter::once(METRIC_HTTP_REQ_DURATION)
            .chain(LatencyMetric::ALL.iter().map(|m| m.name()))
            .collect();
        for name in &known {
            if let Some((k, v)) = self.trends.get_key_value(*name) {
                ordered.push((k.as_str(), v));
            }
        }
        for (k, v) in &self.trends {
            if !known.contains(&k.as_str()) {
                ordered.push((k.as_str(), v));
            }
        }
        ordered
    }
}

/// A rendered, self-contained report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportArtifact {
    pub html: String,
}

impl ReportArtifact {
    pub fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, &self.html)?;
        Ok(())
    }
}

/// Write the report as pretty JSON.
pub fn write_json_result(report: &RunReport, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Report phase of a run: print the summary, write the HTML report and the
/// optional JSON result. Each failed write is logged and returned; none of
/// them affects the metrics already collected.
pub fn emit(report: &RunReport, config: &Config) -> Vec<LoadTestError> {
    print_summary(report);

    let mut failures = Vec::new();
    let report_path = &config.report_path;
    match render(report).write_to(report_path) {
        Ok(()) => info!(path = %report_path.display(), "HTML report written"),
        Err(e) => {
            error!(path = %report_path.display(), error = %e, "Failed to write HTML report");
            failures.push(LoadTestError::ReportError(format!(
                "{}: {:#}",
                report_path.display(),
                e
            )));
        }
    }

    if let Some(json_path) = &config.json_output {
        match write_json_result(report, json_path) {
            Ok(()) => info!(path = %json_path.display(), "JSON result written"),
            Err(e) => {
                error!(path = %json_path.display(), error = %e, "Failed to write JSON result");
                failures.push(LoadTestError::ReportError(format!(
                    "{}: {:#}",
                    json_path.display(),
                    e
                )));
            }
        }
    }
    failures
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn rate_class(failed_rate: f64) -> &'static str {
    if failed_rate < 0.01 {
        "good"
    } else if failed_rate < 0.05 {
        "warn"
    } else {
        "bad"
    }
}

/// Render the final snapshot, check counts and drop count as one HTML page
/// with inline styles and no external resources.
pub fn render(report: &RunReport) -> ReportArtifact {
    let m = &report.metadata;
    let s = &report.stats;

    let trend_rows: String = report
        .ordered_trends()
        .iter()
        .map(|(name, t)| {
            format!(
                "<tr><td class=\"name\">{}</td><td>{}</td><td>{:.2}</td><td>{:.2}</td>\
                 <td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td></tr>",
                html_escape(name),
                t.count,
                t.mean,
                t.min,
                t.p50,
                t.p90,
                t.p95,
                t.p99,
                t.max,
                t.std_dev,
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let check_rows: String = report
        .checks
        .iter()
        .map(|c| {
            format!(
                "<tr class=\"{}\"><td class=\"name\">{}</td><td>{}</td><td>{}</td><td>{:.2}%</td></tr>",
                if c.fails == 0 { "ok" } else { "err" },
                html_escape(&c.name),
                c.passes,
                c.fails,
                c.pass_rate() * 100.0,
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let status_rows: String = s
        .status_codes
        .iter()
        .map(|(code, count)| format!("<tr><td>{}</td><td>{}</td></tr>", code, count))
        .collect::<Vec<_>>()
        .join("\n");

    let failed_rate = s.failed_request_rate();
    let check_fails: u64 = report.checks.iter().map(|c| c.fails).sum();

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Load Test Report: {target}</title>
<style>
  body {{
    font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
    margin: 0; padding: 2rem; background: #0f172a; color: #e2e8f0; line-height: 1.5;
  }}
  h1 {{ font-size: 1.75rem; margin: 0 0 0.25rem; color: #f1f5f9; }}
  h2 {{ font-size: 1.1rem; color: #94a3b8; text-transform: uppercase;
        margin: 2rem 0 0.75rem; border-bottom: 1px solid #1e293b; padding-bottom: 0.5rem; }}
  .meta {{ color: #64748b; font-size: 0.875rem; }}
  .meta span {{ margin-right: 1.5rem; }}
  .grid {{ display: grid; grid-template-columns: repeat(auto-fill, minmax(180px, 1fr)); gap: 1rem; }}
  .card {{ background: #1e293b; border: 1px solid #334155; border-radius: 0.5rem; padding: 1rem 1.25rem; }}
  .card .label {{ font-size: 0.75rem; text-transform: uppercase; color: #64748b; }}
  .card .value {{ font-size: 1.5rem; font-weight: 700; color: #f1f5f9; }}
  .good {{ color: #4ade80 !important; }}
  .warn {{ color: #facc15 !important; }}
  .bad {{ color: #f87171 !important; }}
  table {{ width: 100%; border-collapse: collapse; font-size: 0.875rem; }}
  th, td {{ padding: 0.4rem 0.75rem; text-align: right; border-bottom: 1px solid #1e293b; }}
  th {{ color: #94a3b8; font-weight: 600; }}
  td.name, th.name {{ text-align: left; font-family: ui-monospace, monospace; }}
  tr.err td {{ color: #f87171; }}
  footer {{ margin-top: 3rem; color: #475569; font-size: 0.75rem; }}
</style>
</head>
<body>
<h1>Load Test Report</h1>
<div class="meta">
  <span>Target: {target}</span>
  <span>Started: {started}</span>
  <span>Finished: {finished}</span>
  <span>Schedule: {stages} stages, {schedule_secs:.0}s</span>
  <span>Workers: {pre} pre-allocated, {max} max</span>{stopped}
</div>

<h2>Overview</h2>
<div class="grid">
  <div class="card"><div class="label">Requests</div><div class="value">{requests}</div></div>
  <div class="card"><div class="label">Failed requests</div><div class="value {failed_class}">{failed} ({failed_pct:.2}%)</div></div>
  <div class="card"><div class="label">Transport errors</div><div class="value">{transport_errors}</div></div>
  <div class="card"><div class="label">Iterations</div><div class="value">{completed} / {expected:.0}</div></div>
  <div class="card"><div class="label">Iteration rate</div><div class="value">{rate:.2}/s</div></div>
  <div class="card"><div class="label">Dropped iterations</div><div class="value {dropped_class}">{dropped}</div></div>
  <div class="card"><div class="label">Interrupted</div><div class="value">{interrupted}</div></div>
  <div class="card"><div class="label">Check failures</div><div class="value {checks_class}">{check_fails}</div></div>
  <div class="card"><div class="label">Peak workers</div><div class="value">{peak}</div></div>
</div>

<h2>Trend Metrics (ms)</h2>
<table>
  <thead>
    <tr><th class="name">Metric</th><th>Count</th><th>Avg</th><th>Min</th><th>Med</th><th>p(90)</th><th>p(95)</th><th>p(99)</th><th>Max</th><th>Std dev</th></tr>
  </thead>
  <tbody>
{trend_rows}
  </tbody>
</table>

<h2>Checks</h2>
<table>
  <thead>
    <tr><th class="name">Check</th><th>Passes</th><th>Fails</th><th>Pass rate</th></tr>
  </thead>
  <tbody>
{check_rows}
  </tbody>
</table>

<h2>Status Codes</h2>
<table>
  <thead><tr><th>Status</th><th>Count</th></tr></thead>
  <tbody>
{status_rows}
  </tbody>
</table>

<h2>Iterations</h2>
<table>
  <tbody>
    <tr><td class="name">Issued</td><td>{issued}</td></tr>
    <tr><td class="name">Dispatched</td><td>{dispatched}</td></tr>
    <tr><td class="name">Completed</td><td>{completed}</td></tr>
    <tr><td class="name">Dropped</td><td>{dropped}</td></tr>
    <tr><td class="name">Interrupted</td><td>{interrupted}</td></tr>
  </tbody>
</table>

<footer>Generated by latency-load-test &bull; {finished}</footer>
</body>
</html>
"#,
        target = html_escape(&m.target_url),
        started = html_escape(&m.started_at),
        finished = html_escape(&m.finished_at),
        stages = m.stage_count,
        schedule_secs = m.schedule_duration_secs,
        pre = m.pre_allocated_workers,
        max = m.max_workers,
        stopped = if m.stopped_early {
            "\n  <span class=\"bad\">Stopped early</span>"
        } else {
            ""
        },
        requests = s.requests,
        failed = s.failed_requests(),
        failed_pct = failed_rate * 100.0,
        failed_class = rate_class(failed_rate),
        transport_errors = s.transport_errors,
        completed = s.iterations_completed,
        expected = m.expected_iterations,
        rate = s.iteration_rate,
        dropped = s.iterations_dropped,
        dropped_class = if s.iterations_dropped == 0 { "good" } else { "bad" },
        interrupted = s.iterations_interrupted,
        check_fails = check_fails,
        checks_class = if check_fails == 0 { "good" } else { "bad" },
        peak = s.peak_pool_size,
        issued = s.iterations_issued,
        dispatched = s.iterations_dispatched,
        trend_rows = trend_rows,
        check_rows = check_rows,
        status_rows = status_rows,
    );
    ReportArtifact { html }
}

/// Plain-text end-of-test summary.
pub fn format_summary(report: &RunReport) -> String {
    let s = &report.stats;
    let mut out = String::new();
    let _ = writeln!(out, "=== Load Test Summary ===");
    let _ = writeln!(out, "Target:            {}", report.metadata.target_url);
    if report.metadata.stopped_early {
        let _ = writeln!(out, "Run stopped early by shutdown request");
    }
    for check in &report.checks {
        let _ = writeln!(
            out,
            "Check \"{}\": {:.2}% passed ({} / {})",
            check.name,
            check.pass_rate() * 100.0,
            check.passes,
            check.total()
        );
    }
    let _ = writeln!(
        out,
        "Requests:          {} ({} failed, {:.2}%)",
        s.requests,
        s.failed_requests(),
        s.failed_request_rate() * 100.0
    );
    let _ = writeln!(out, "Transport errors:  {}", s.transport_errors);
    let _ = writeln!(
        out,
        "Iterations:        {} completed, {:.2}/s",
        s.iterations_completed, s.iteration_rate
    );
    let _ = writeln!(out, "Dropped:           {}", s.iterations_dropped);
    let _ = writeln!(out, "Interrupted:       {}", s.iterations_interrupted);
    let _ = writeln!(out, "Peak workers:      {}", s.peak_pool_size);
    for (name, t) in report.ordered_trends() {
        let _ = writeln!(
            out,
            "{:<32} avg={:.2} min={:.2} med={:.2} max={:.2} p(90)={:.2} p(95)={:.2}",
            name, t.mean, t.min, t.p50, t.max, t.p90, t.p95
        );
    }
    if !s.status_codes.is_empty() {
        let _ = writeln!(out, "Status Code Distribution:");
        for (code, count) in &s.status_codes {
            let _ = writeln!(out, "  {}: {}", code, count);
        }
    }
    let _ = writeln!(out, "=========================");
    out
}

pub fn print_summary(report: &RunReport) {
    print!("{}", format_summary(report));
}
