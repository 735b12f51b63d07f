//! A single file listing completed and dropped tasks by day, newest first.
use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::database::LogbookRow;

pub const LOGBOOK_FILE_NAME: &str = "omnifocus_completed_dropped.md";

fn task_link(name: &str, id: Option<&str>) -> String {
    format!("[{}](omnifocus:///task/{})", name, id.unwrap_or_default())
}

fn format_entry(row: &LogbookRow) -> Option<String> {
    let (when, symbol) = match (row.completed, row.hidden) {
        (Some(done), _) => (done, "[x]"),
        (None, Some(hidden)) => (hidden, "[c]"),
        (None, None) => return None,
    };
    Some(format!(
        "- {} {} {} - {}",
        symbol,
        when.format("%H:%M"),
        task_link(
            row.project_name.as_deref().unwrap_or("No Project"),
            row.project_id.as_deref()
        ),
        task_link(&row.task_name, Some(&row.task_id))
    ))
}

pub fn render_logbook(rows: &[LogbookRow]) -> String {
    let mut sorted: Vec<&LogbookRow> = rows
        .iter()
        .filter(|r| r.completed.is_some() || r.hidden.is_some())
        .collect();
    sorted.sort_by_key(|r| Reverse((r.completed.or(r.hidden), r.task_id.clone())));

    let mut by_day: BTreeMap<NaiveDate, Vec<String>> = BTreeMap::new();
    for row in sorted {
        if let (Some(when), Some(line)) = (row.completed.or(row.hidden), format_entry(row)) {
            by_day.entry(when.date()).or_default().push(line);
        }
    }

    let mut content = String::new();
    for (day, lines) in by_day.iter().rev() {
        content.push_str(&format!("## {}\n", day.format("%Y-%m-%d")));
        content.push_str(&lines.join("\n"));
        content.push_str("\n\n");
    }
    content
}
