use atty::Stream;
use color_eyre::Result;
use serde_json::Value;

use pyship_core::{format_status_message, to_json_response, ExecutionOutcome};

use crate::style::Style;

/// Lines of captured tool output shown in human mode.
const TOOL_OUTPUT_TAIL: usize = 20;

#[derive(Clone, Copy, Debug)]
pub struct OutputOptions {
    pub quiet: bool,
    pub json: bool,
    pub no_color: bool,
}

pub fn emit_output(opts: &OutputOptions, command: &str, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.status.exit_code();

    if opts.json {
        let payload = to_json_response(command, outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }

    let style = Style::new(opts.no_color, atty::is(Stream::Stdout));
    let message = format_status_message(command, &outcome.message);
    if opts.quiet {
        if code != 0 {
            eprintln!("{}", style.status(outcome.status, &message));
        }
        return Ok(code);
    }

    println!("{}", style.status(outcome.status, &message));
    for line in render_details(&style, &outcome.details) {
        println!("{line}");
    }
    if let Some(hint) = str_field(&outcome.details, "hint") {
        println!("{}", style.hint(hint));
    }
    Ok(code)
}

fn render_details(style: &Style, details: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(artifacts) = details.get("artifacts").and_then(Value::as_array) {
        for artifact in artifacts {
            let digest = str_field(artifact, "sha256").unwrap_or_default();
            lines.push(format!(
                "  {:<6} {} {}",
                str_field(artifact, "kind").unwrap_or("?"),
                str_field(artifact, "path").unwrap_or("?"),
                style.dimmed(&format!("sha256:{}", digest.get(..12).unwrap_or(digest))),
            ));
        }
    }
    if let Some(workspace) = str_field(details, "workspace") {
        lines.push(style.info(&format!("  workspace kept at {workspace}")));
    }
    if let Some(output) = str_field(details, "tool_output") {
        let tail: Vec<&str> = output.lines().collect();
        let start = tail.len().saturating_sub(TOOL_OUTPUT_TAIL);
        for line in &tail[start..] {
            lines.push(style.dimmed(&format!("  | {line}")));
        }
    }
    if let Some(entries) = details
        .get("report")
        .and_then(|report| report.get("entries"))
        .and_then(Value::as_array)
    {
        lines.push(style.table_header(&format!(
            "  {:<24} {:<12} {:<18} {}",
            "PACKAGE", "VERSION", "STATUS", "DETAIL"
        )));
        for entry in entries {
            let mut status = str_field(entry, "status").unwrap_or("?").to_string();
            if entry.get("needs_attention").and_then(Value::as_bool) == Some(true) {
                status.push('*');
            }
            lines.push(format!(
                "  {:<24} {:<12} {:<18} {}",
                str_field(entry, "distribution").unwrap_or("?"),
                str_field(entry, "version").unwrap_or("?"),
                status,
                str_field(entry, "detail").unwrap_or(""),
            ));
        }
    }
    if let Some(records) = details.get("records").and_then(Value::as_array) {
        if !records.is_empty() {
            lines.push(style.table_header(&format!(
                "  {:<22} {:<24} {:<12} {:<18} {}",
                "TIMESTAMP", "PACKAGE", "VERSION", "OUTCOME", "AVAILABILITY"
            )));
        }
        for record in records {
            lines.push(format!(
                "  {:<22} {:<24} {:<12} {:<18} {}",
                str_field(record, "timestamp").unwrap_or("?"),
                str_field(record, "package").unwrap_or("?"),
                str_field(record, "version").unwrap_or("?"),
                str_field(record, "outcome").unwrap_or("?"),
                str_field(record, "availability").unwrap_or("?"),
            ));
        }
    }
    lines
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}
