//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output: colored status
//! messages, plan and report rendering, and human-readable durations.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use infragraph_lib::execute::{ExecutionReport, NodeLifecycle};
use infragraph_lib::plan::{AttributeChange, ChangeAction, Plan, PlannedChange};
use infragraph_lib::value::{REDACTED, Value};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const ADD: &str = "+";
  pub const MODIFY: &str = "~";
  pub const REPLACE: &str = "-/+";
  pub const REMOVE: &str = "-";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

/// Age of a Unix timestamp, e.g. `5m 3s ago`.
pub fn format_timestamp(timestamp: u64) -> String {
  let datetime = UNIX_EPOCH + Duration::from_secs(timestamp);
  match SystemTime::now().duration_since(datetime) {
    Ok(duration) => {
      let rounded = Duration::from_secs(duration.as_secs());
      format!("{} ago", humantime::format_duration(rounded))
    }
    Err(_) => format!("timestamp: {}", timestamp),
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

fn action_symbol(action: ChangeAction) -> &'static str {
  match action {
    ChangeAction::Create => symbols::ADD,
    ChangeAction::Update => symbols::MODIFY,
    ChangeAction::Replace => symbols::REPLACE,
    ChangeAction::Delete => symbols::REMOVE,
    ChangeAction::NoOp => " ",
  }
}

/// One attribute line, e.g. `max_replicas: 1 → 3`. Sensitive values are
/// always redacted.
pub fn format_attribute(change: &AttributeChange) -> String {
  let show = |value: &Option<Value>| match value {
    Some(_) if change.sensitive => REDACTED.to_string(),
    Some(value) => value.render(),
    None => "null".to_string(),
  };
  let marker = if change.forces_replacement { " (forces replacement)" } else { "" };
  match (&change.old, &change.new) {
    (None, Some(_)) => format!("{}: {}{}", change.name, show(&change.new), marker),
    (Some(_), None) => format!("{}: {}{}", change.name, show(&change.old), marker),
    _ => format!(
      "{}: {} {} {}{}",
      change.name,
      show(&change.old),
      symbols::ARROW,
      show(&change.new),
      marker
    ),
  }
}

fn print_change(change: &PlannedChange, verbose: bool) {
  let symbol = action_symbol(change.action);
  let colored = match change.action {
    ChangeAction::Create => symbol.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    ChangeAction::Update => symbol.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    ChangeAction::Replace | ChangeAction::Delete => symbol.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    ChangeAction::NoOp => symbol.to_string(),
  };
  let pending = if change.pending { ", known after apply" } else { "" };
  println!(
    "  {} {} {}",
    colored,
    change.id,
    format!("({}, {}{})", change.kind, change.reason, pending).if_supports_color(Stream::Stdout, |s| s.dimmed())
  );

  // Creates and deletes list every attribute; only show them when asked.
  let detailed = verbose || matches!(change.action, ChangeAction::Update | ChangeAction::Replace);
  if detailed {
    for attribute in &change.attributes {
      println!("      {}", format_attribute(attribute));
    }
  }
}

/// Summary line, e.g. `Plan: 2 to add, 1 to change, 0 to replace, 0 to destroy.`
pub fn plan_summary(plan: &Plan) -> String {
  format!(
    "Plan: {} to add, {} to change, {} to replace, {} to destroy.",
    plan.count(ChangeAction::Create),
    plan.count(ChangeAction::Update),
    plan.count(ChangeAction::Replace),
    plan.count(ChangeAction::Delete)
  )
}

/// Print drift, the pending operations and a summary line.
pub fn print_plan(plan: &Plan, verbose: bool) {
  for drift in &plan.drift {
    print_warning(&drift.to_string());
  }

  if !plan.has_changes() {
    print_success("No changes. Infrastructure matches the configuration.");
    return;
  }

  println!();
  for change in plan.operations() {
    print_change(change, verbose);
  }
  println!();
  println!("{}", plan_summary(plan).if_supports_color(Stream::Stdout, |s| s.bold()));
}

/// Print failures and skipped nodes of an execution.
pub fn print_report(report: &ExecutionReport) {
  for error in &report.failed {
    print_error(&error.to_string());
  }
  for (id, reason) in &report.skipped {
    print_warning(&format!("{id} skipped: {reason}"));
  }
  if report.cancelled {
    print_warning("Interrupted. Completed operations are recorded in the state; run apply again to continue.");
  }

  let applied = report
    .lifecycle
    .values()
    .filter(|state| **state == NodeLifecycle::Applied)
    .count();
  print_stat("Applied", &applied.to_string());
  print_stat("Failed", &report.failed.len().to_string());
  print_stat("Skipped", &report.skipped.len().to_string());
}
