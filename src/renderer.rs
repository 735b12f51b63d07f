//! Markdown rendering in the Obsidian Tasks emoji format.
//!
//! Pure string building: nothing here touches the filesystem.
use chrono::NaiveDateTime;

use crate::model::{AttachmentRef, AttachmentRefMap, ProjectStatus, TagMap, TaskDates, TaskRow};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// ` ✅ 2024-01-15 📅 2024-01-20`, or empty when no date is set.
pub fn format_dates(dates: &TaskDates) -> String {
    let fields: [(&str, Option<NaiveDateTime>); 6] = [
        ("✅", dates.completed),
        ("📅", dates.due),
        ("⏳", dates.planned),
        ("🛫", dates.to_start),
        ("➕", dates.added),
        ("✏️", dates.modified),
    ];

    fields
        .into_iter()
        .filter_map(|(emoji, date)| date.map(|d| format!(" {} {}", emoji, d.format(DATE_FORMAT))))
        .collect()
}

/// Task tags, then the project status tag, then `#omnifocus`.
pub fn format_tags(tags: &[String], status: &ProjectStatus) -> String {
    let mut all: Vec<String> = tags
        .iter()
        .map(|tag| format!("#{}", tag.replace(' ', "-")))
        .collect();
    all.extend(status.tag());
    all.push("#omnifocus".to_string());
    format!(" {}", all.join(" "))
}

pub fn format_flag(flagged: bool) -> &'static str {
    if flagged { " 🔼" } else { "" }
}

pub fn checkbox(task: &TaskRow) -> &'static str {
    if task.is_completed {
        "- [x]"
    } else if task.is_dropped {
        "- [c]"
    } else {
        "- [ ]"
    }
}

/// Non-blank note lines as tab-indented sub-bullets.
pub fn note_subitems(note: Option<&str>) -> Vec<String> {
    note.map(|text| {
        text.trim()
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| format!("\t- {}", line.trim_end_matches('\r')))
            .collect()
    })
    .unwrap_or_default()
}

pub fn attachment_subitem(attachment: &AttachmentRef) -> String {
    match &attachment.path {
        Some(path) => format!("\t- 📎 ![{}]({}) ({})", attachment.name, path, attachment.size),
        None => format!("\t- 📎 {} ({})", attachment.name, attachment.size),
    }
}

/// Lookups shared by every task of one render pass.
pub struct RenderContext<'a> {
    pub tags: &'a TagMap,
    pub attachments: &'a AttachmentRefMap,
}

impl RenderContext<'_> {
    /// Dates, tags and flag following the task name.
    fn suffix(&self, task: &TaskRow, status: &ProjectStatus) -> String {
        let tags = self.tags.get(&task.id).map(Vec::as_slice).unwrap_or(&[]);
        format!(
            "{}{}{}",
            format_dates(&task.visible_dates()),
            format_tags(tags, status),
            format_flag(task.is_flagged)
        )
    }

    fn subitems(&self, task: &TaskRow) -> String {
        let mut lines = note_subitems(task.note.as_deref());
        if let Some(attachments) = self.attachments.get(&task.id) {
            lines.extend(attachments.iter().map(attachment_subitem));
        }
        lines.iter().map(|line| format!("\n{}", line)).collect()
    }

    /// A checkbox list item with its note and attachment sub-items.
    pub fn render_task(&self, task: &TaskRow, status: &ProjectStatus) -> String {
        format!(
            "{} {}{}{}\n",
            checkbox(task),
            task.name,
            self.suffix(task, status),
            self.subitems(task)
        )
    }

    /// The level-1 heading for the task that is the project itself.
    pub fn render_title(&self, task: &TaskRow, status: &ProjectStatus) -> String {
        format!(
            "# {}{}{}\n\n",
            task.name,
            self.suffix(task, status),
            self.subitems(task)
        )
    }

    /// Body of one project: the title heading (if the project task is present)
    /// followed by every other task. `tasks` is left untouched.
    pub fn render_project(
        &self,
        tasks: &[&TaskRow],
        project_id: Option<&str>,
        status: &ProjectStatus,
    ) -> String {
        let title = project_id.and_then(|id| tasks.iter().find(|t| t.id == id));

        let mut content = String::new();
        if let Some(title) = title {
            content.push_str(&self.render_title(title, status));
        }
        for task in tasks
            .iter()
            .filter(|t| title.is_none_or(|title| title.id != t.id))
        {
            content.push_str(&self.render_task(task, status));
        }
        content
    }
}

/// The frontmatter block placed before each project's content.
pub fn metadata_block(status: &ProjectStatus) -> String {
    format!("---\nstatus: {}\ntags: omnifocus\n---\n", status)
}
