//! Shared helpers for command handlers.

use chrono::{DateTime, NaiveDate, Utc};

use arlo_core::CommandResult;

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

/// Report a command outcome: a status line for humans, the result for machines.
pub fn print_result(result: &CommandResult, action: &str, global: &GlobalOpts) {
    if !matches!(global.output, OutputFormat::Table) {
        let out = output::render_single(&global.output, result, |_| String::new(), plain_result);
        output::print_output(&out, global.quiet);
        return;
    }
    match result {
        CommandResult::Sent => {
            if !global.quiet {
                eprintln!("✓ {action}");
            }
        }
        CommandResult::Skipped { reason } => {
            if !global.quiet {
                eprintln!("– {action} skipped: {reason}");
            }
        }
        CommandResult::StreamUrl { url } => output::print_output(url, global.quiet),
    }
}

fn plain_result(result: &CommandResult) -> String {
    match result {
        CommandResult::Sent => "sent".into(),
        CommandResult::Skipped { reason } => format!("skipped: {reason}"),
        CommandResult::StreamUrl { url } => url.clone(),
    }
}

/// Parse `YYYY-MM-DD` or `YYYYMMDD`.
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, CliError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y%m%d"))
        .map_err(|_| CliError::Validation {
            field: field.into(),
            reason: format!("expected YYYY-MM-DD, got '{value}'"),
        })
}

/// Format epoch milliseconds as a UTC timestamp.
pub fn format_millis(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Map a dialoguer / interactive I/O failure into CliError.
pub fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}
