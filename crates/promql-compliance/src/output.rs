//! Run report rendering (text, JSON, TSV, HTML).

use std::io::{self, Write};

use clap::ValueEnum;
use promql_compliance_core::compare::{Outcome, Verdict};
use promql_compliance_core::expand::EvalTime;
use promql_compliance_core::report::{FailedQuery, RunReport, RunSummary};
use promql_compliance_core::tweak::{QueryTweak, TweakTarget};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Tsv,
    Html,
}

/// Render `report` to `out` in the requested format.
pub fn render(
    report: &RunReport,
    format: OutputFormat,
    include_passing: bool,
    out: &mut impl Write,
) -> io::Result<()> {
    match format {
        OutputFormat::Text => render_text(report, include_passing, out),
        OutputFormat::Json => render_json(report, include_passing, out),
        OutputFormat::Tsv => render_tsv(report, include_passing, out),
        OutputFormat::Html => render_html(report, include_passing, out),
    }
}

fn describe_eval(eval: &EvalTime) -> String {
    match *eval {
        EvalTime::Instant { time } => format!("instant @ {time}"),
        EvalTime::Range { start, end, step } => format!("range {start}..{end} step {step}s"),
    }
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Pass => "PASS",
        Outcome::Mismatch => "MISMATCH",
        Outcome::ReferenceError => "REFERENCE ERROR",
        Outcome::TestError => "TEST ERROR",
    }
}

fn write_tweaks(tweaks: &[QueryTweak], out: &mut impl Write) -> io::Result<()> {
    if tweaks.is_empty() {
        return Ok(());
    }
    writeln!(out, "Query tweaks:")?;
    for tweak in tweaks {
        let note = if tweak.note.is_empty() {
            "(no note)"
        } else {
            tweak.note.as_str()
        };
        let kind = if tweak.no_bug { "expected" } else { "known bug" };
        let applies_to = match tweak.applies_to {
            TweakTarget::Reference => "reference",
            TweakTarget::Test => "test",
            TweakTarget::Both => "both",
        };
        writeln!(
            out,
            "  - {note} [{kind}, {applies_to}]: s/{}/{}/",
            tweak.match_pattern, tweak.replacement
        )?;
    }
    writeln!(out)
}

fn write_summary(summary: &RunSummary, out: &mut impl Write) -> io::Result<()> {
    writeln!(
        out,
        "Total: {} cases ({} executed on both targets)",
        summary.total,
        summary.executed()
    )?;
    writeln!(
        out,
        "  passed:     {:>5} ({:.2}%)",
        summary.passed,
        summary.percent(summary.passed)
    )?;
    writeln!(
        out,
        "  mismatched: {:>5} ({:.2}%)",
        summary.mismatched,
        summary.percent(summary.mismatched)
    )?;
    writeln!(
        out,
        "  errors:     {:>5} ({:.2}%; reference {}, test {})",
        summary.errors(),
        summary.percent(summary.errors()),
        summary.reference_errors,
        summary.test_errors
    )
}

fn write_verdict(verdict: &Verdict, out: &mut impl Write) -> io::Result<()> {
    let case = &verdict.case;
    writeln!(
        out,
        "[{}] {} ({}): {}",
        case.index,
        case.name,
        describe_eval(&case.eval),
        outcome_label(verdict.outcome)
    )?;
    if case.queries_diverge() {
        writeln!(out, "  reference query: {}", case.reference_query)?;
        writeln!(out, "  test query:      {}", case.test_query)?;
    } else {
        writeln!(out, "  query: {}", case.reference_query)?;
    }
    if case.should_fail {
        writeln!(out, "  expected to diverge")?;
    }
    if let Some(error) = verdict.error() {
        writeln!(out, "  error: {error}")?;
    }
    if verdict.outcome == Outcome::Mismatch && verdict.diffs.is_empty() {
        writeln!(out, "  targets agreed on a query marked should_fail")?;
    }
    for diff in &verdict.diffs {
        writeln!(out, "  - {diff}")?;
    }
    Ok(())
}

fn render_text(report: &RunReport, include_passing: bool, out: &mut impl Write) -> io::Result<()> {
    write_tweaks(&report.tweaks, out)?;
    for verdict in report.visible_verdicts(include_passing) {
        write_verdict(verdict, out)?;
    }

    let failed = report.failed_queries();
    if !failed.is_empty() {
        writeln!(out)?;
        writeln!(out, "Failed queries:")?;
        for query in &failed {
            writeln!(out, "  {} ({}): {}", query.case, query.target, query.query)?;
            writeln!(out, "    {}", query.error)?;
        }
    }

    writeln!(out)?;
    write_summary(&report.summary, out)
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: &'a RunSummary,
    include_passing: bool,
    verdicts: Vec<&'a Verdict>,
    failed_queries: Vec<FailedQuery>,
    tweaks: &'a [QueryTweak],
}

fn render_json(report: &RunReport, include_passing: bool, out: &mut impl Write) -> io::Result<()> {
    let doc = JsonReport {
        summary: &report.summary,
        include_passing,
        verdicts: report.visible_verdicts(include_passing).collect(),
        failed_queries: report.failed_queries(),
        tweaks: &report.tweaks,
    };
    serde_json::to_writer_pretty(&mut *out, &doc)?;
    writeln!(out)
}

/// Tabs and newlines would break the row structure.
fn tsv_field(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\t', "\\t")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

fn render_tsv(report: &RunReport, include_passing: bool, out: &mut impl Write) -> io::Result<()> {
    writeln!(
        out,
        "index\tname\tmode\toutcome\tdiffs\treference_query\ttest_query\terror"
    )?;
    for verdict in report.visible_verdicts(include_passing) {
        let case = &verdict.case;
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            case.index,
            tsv_field(&case.name),
            case.mode(),
            verdict.outcome,
            verdict.diffs.len(),
            tsv_field(&case.reference_query),
            tsv_field(&case.test_query),
            tsv_field(verdict.error().unwrap_or_default())
        )?;
    }
    Ok(())
}

/// Escape text for HTML element content and attribute values.
fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn outcome_class(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Pass => "pass",
        Outcome::Mismatch => "mismatch",
        Outcome::ReferenceError | Outcome::TestError => "error",
    }
}

const HTML_STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse;width:100%}\
td,th{border:1px solid #ccc;padding:4px 8px;text-align:left;vertical-align:top}\
code{white-space:pre-wrap}\
tr.pass{background:#e6ffe6}tr.mismatch{background:#fff3cd}tr.error{background:#ffe6e6}";

/// Self-contained HTML page: summary, tweak notes and one row per case.
fn render_html(report: &RunReport, include_passing: bool, out: &mut impl Write) -> io::Result<()> {
    let summary = &report.summary;
    writeln!(out, "<!DOCTYPE html>")?;
    writeln!(out, "<html><head><meta charset=\"utf-8\">")?;
    writeln!(out, "<title>PromQL compliance results</title>")?;
    writeln!(out, "<style>{HTML_STYLE}</style></head><body>")?;
    writeln!(out, "<h1>PromQL compliance results</h1>")?;
    writeln!(out, "<ul class=\"summary\">")?;
    writeln!(
        out,
        "<li>Total: {} cases ({} executed on both targets)</li>",
        summary.total,
        summary.executed()
    )?;
    writeln!(
        out,
        "<li>Passed: {} ({:.2}%)</li>",
        summary.passed,
        summary.percent(summary.passed)
    )?;
    writeln!(
        out,
        "<li>Mismatched: {} ({:.2}%)</li>",
        summary.mismatched,
        summary.percent(summary.mismatched)
    )?;
    writeln!(
        out,
        "<li>Errors: {} ({:.2}%; reference {}, test {})</li>",
        summary.errors(),
        summary.percent(summary.errors()),
        summary.reference_errors,
        summary.test_errors
    )?;
    writeln!(out, "</ul>")?;

    if !report.tweaks.is_empty() {
        writeln!(out, "<h2>Query tweaks</h2><ul class=\"tweaks\">")?;
        for tweak in &report.tweaks {
            let kind = if tweak.no_bug { "expected" } else { "known bug" };
            writeln!(
                out,
                "<li>{} [{kind}]: <code>s/{}/{}/</code></li>",
                html_escape(&tweak.note),
                html_escape(&tweak.match_pattern),
                html_escape(&tweak.replacement)
            )?;
        }
        writeln!(out, "</ul>")?;
    }

    writeln!(out, "<h2>Cases</h2><table>")?;
    writeln!(
        out,
        "<tr><th>#</th><th>Name</th><th>Evaluation</th><th>Outcome</th><th>Query</th><th>Details</th></tr>"
    )?;
    for verdict in report.visible_verdicts(include_passing) {
        let case = &verdict.case;
        let mut query = format!("<code>{}</code>", html_escape(&case.reference_query));
        if case.queries_diverge() {
            query = format!(
                "reference: <code>{}</code><br>test: <code>{}</code>",
                html_escape(&case.reference_query),
                html_escape(&case.test_query)
            );
        }
        let mut details: Vec<String> = verdict
            .diffs
            .iter()
            .map(|diff| html_escape(&diff.to_string()))
            .collect();
        if let Some(error) = verdict.error() {
            details.insert(0, html_escape(error));
        }
        writeln!(
            out,
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{query}</td><td>{}</td></tr>",
            outcome_class(verdict.outcome),
            case.index,
            html_escape(&case.name),
            html_escape(&describe_eval(&case.eval)),
            outcome_label(verdict.outcome),
            details.join("<br>")
        )?;
    }
    writeln!(out, "</table>")?;
    writeln!(out, "</body></html>")
}
