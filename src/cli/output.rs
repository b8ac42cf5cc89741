//! CLI output formatting utilities.

use crate::assembler::{FinalResponse, ResponseStatus};
use crate::conversation::{Action, HistoryRecord};
use crate::store::SessionSummary;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a list item.
    pub fn list_item(msg: &str) {
        println!("  {} {}", style("*").cyan(), msg);
    }

    /// Print an assembled response.
    pub fn response(response: &FinalResponse) {
        let label = match response.status {
            ResponseStatus::Complete => style("complete").green().bold(),
            ResponseStatus::AwaitingUser => style("waiting for you").cyan().bold(),
            ResponseStatus::InProgress => style("in progress").yellow().bold(),
            ResponseStatus::Incomplete => style("incomplete").yellow().bold(),
            ResponseStatus::Apology => style("failed").red().bold(),
        };
        println!("\n{} [{}]", style(&response.session_id).dim(), label);
        println!("{}", response.render_text());
    }

    /// Print a session summary line.
    pub fn session_info(summary: &SessionSummary) {
        let state = if summary.terminal { "closed" } else { "open" };
        println!(
            "  {} {} ({} records, {}, updated {})",
            style("*").cyan(),
            style(&summary.session_id).bold(),
            summary.record_count,
            state,
            summary.updated_at.format("%Y-%m-%d %H:%M")
        );
    }

    /// Print one history record.
    pub fn record(record: &HistoryRecord) {
        let detail = match &record.action {
            Action::UserMessage { text } => content_preview(text, 80),
            Action::Transfer { from, to, reason, .. } => format!("{} -> {} ({})", from, to, reason.label()),
            Action::ToolCall { tool, .. } => tool.clone(),
            Action::ToolResult { tool, .. } => format!("{} ok", tool),
            Action::ToolFailed { tool, error, .. } => format!("{}: {}", tool, error),
            Action::ToolRejected { tool, message, .. } => format!("{}: {}", tool, message),
            Action::InvalidOutput { error, .. } => content_preview(error, 80),
            Action::Terminated { cause, .. } => format!("{:?}", cause),
            other => content_preview(&serde_json::to_string(other).unwrap_or_default(), 80),
        };
        println!(
            "  {:>4} {:<16} {:<14} {}",
            style(record.turn_index).dim(),
            style(record.agent).cyan(),
            record.action.kind(),
            detail
        );
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(spinner_style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Truncate content with ellipsis.
fn content_preview(content: &str, max_len: usize) -> String {
    let content = content.replace('\n', " ");
    if content.chars().count() <= max_len {
        content
    } else {
        let cut: String = content.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}
