//! In-memory rows read from the OmniFocus database.
//!
//! Everything here is a read-only snapshot taken once per run. A project is not a
//! separate kind of task: [`Project`] decorates the [`TaskRow`] that shares its
//! identifier.
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::fmt;

use crate::utils::sanitize_filename;

/// The lifecycle timestamps carried by a task, already converted to local time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDates {
    pub completed: Option<NaiveDateTime>,
    pub due: Option<NaiveDateTime>,
    pub planned: Option<NaiveDateTime>,
    pub to_start: Option<NaiveDateTime>,
    pub added: Option<NaiveDateTime>,
    pub modified: Option<NaiveDateTime>,
}

/// A task joined with the name and identifier of its containing project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRow {
    pub id: String,
    pub name: String,
    pub note: Option<String>,
    pub project_name: Option<String>,
    pub project_id: Option<String>,
    pub is_completed: bool,
    /// Derived from `effectiveDateHidden`.
    pub is_dropped: bool,
    pub is_flagged: bool,
    pub dates: TaskDates,
}

impl TaskRow {
    /// Dates as they should be shown: a stale completion timestamp on an incomplete
    /// task is dropped.
    pub fn visible_dates(&self) -> TaskDates {
        let mut dates = self.dates.clone();
        if !self.is_completed {
            dates.completed = None;
        }
        dates
    }
}

/// Project status as stored in `ProjectInfo.effectiveStatus`.
///
/// Comparison is case-insensitive; the original spelling is kept for display.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectStatus(String);

impl ProjectStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    pub fn active() -> Self {
        Self("active".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_active(&self) -> bool {
        self.0.eq_ignore_ascii_case("active")
    }

    pub fn is_inactive(&self) -> bool {
        self.0.eq_ignore_ascii_case("inactive")
    }

    /// The directory segment placed before the project file.
    ///
    /// `active` has none, `inactive` is the visible `(inactive)` and every other
    /// status is the hidden `.(status)`.
    pub fn directory(&self) -> Option<String> {
        if self.is_active() {
            None
        } else if self.is_inactive() {
            Some("(inactive)".to_string())
        } else {
            Some(sanitize_filename(&format!(".({})", self.0)))
        }
    }

    /// Suffix appended to the project file name, e.g. ` (done)`.
    pub fn filename_suffix(&self) -> String {
        if self.is_active() {
            String::new()
        } else {
            format!(" ({})", self.0)
        }
    }

    /// Extra hashtag attached to every task of a non-active project.
    pub fn tag(&self) -> Option<String> {
        if self.is_active() {
            None
        } else {
            Some(format!("#{}", self.0.replace(' ', "-")))
        }
    }
}

impl Default for ProjectStatus {
    fn default() -> Self {
        Self::active()
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `ProjectInfo` metadata keyed by the project's task identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub status: ProjectStatus,
    pub folder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub parent: Option<String>,
    pub rank: i64,
}

/// An attachment row. `content_id` names the container in a backup bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentRecord {
    pub task_id: String,
    pub name: String,
    pub size: i64,
    pub preview: Option<Vec<u8>>,
    pub content_id: String,
    pub creation_order: i64,
}

/// Outcome of resolving one attachment, consumed by the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub name: String,
    pub size: String,
    /// Path relative to the output root, present when a file was written.
    pub path: Option<String>,
    pub has_preview: bool,
    pub is_full_res: bool,
}

pub type TagMap = HashMap<String, Vec<String>>;
pub type AttachmentMap = HashMap<String, Vec<AttachmentRecord>>;
pub type AttachmentRefMap = HashMap<String, Vec<AttachmentRef>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_directory_follows_dot_convention() {
        assert_eq!(ProjectStatus::new("active").directory(), None);
        assert_eq!(ProjectStatus::new("Active").directory(), None);
        assert_eq!(
            ProjectStatus::new("inactive").directory().as_deref(),
            Some("(inactive)")
        );
        assert_eq!(
            ProjectStatus::new("done").directory().as_deref(),
            Some(".(done)")
        );
        assert_eq!(
            ProjectStatus::new("dropped").directory().as_deref(),
            Some(".(dropped)")
        );
    }

    #[test]
    fn status_tag_hyphenates_spaces() {
        assert_eq!(ProjectStatus::active().tag(), None);
        assert_eq!(
            ProjectStatus::new("on hold").tag().as_deref(),
            Some("#on-hold")
        );
    }

    #[test]
    fn incomplete_task_hides_completion_date() {
        let stale = chrono::NaiveDate::from_ymd_opt(2023, 5, 1)
            .and_then(|d| d.and_hms_opt(9, 0, 0));
        let task = TaskRow {
            is_completed: false,
            dates: TaskDates {
                completed: stale,
                ..TaskDates::default()
            },
            ..TaskRow::default()
        };
        assert_eq!(task.visible_dates().completed, None);

        let done = TaskRow {
            is_completed: true,
            ..task
        };
        assert_eq!(done.visible_dates().completed, stale);
    }
}
