//! Read-only access to the OmniFocus 4 SQLite database.
//!
//! Only the columns below are read; the schema belongs to OmniFocus and is never
//! migrated or validated here.
//!
//! ```sql
//! Task        (persistentIdentifier, name, plainTextNote, containingProjectInfo,
//!              dateCompleted, effectiveDateHidden, flagged, dateDue, datePlanned,
//!              dateToStart, dateAdded, dateModified, rank)
//! ProjectInfo (task, effectiveStatus, folder)
//! Folder      (persistentIdentifier, name, parent, rank)
//! Context     (persistentIdentifier, name)            -- tags
//! TaskToTag   (task, tag, rankInTask)
//! Attachment  (persistentIdentifier, task, name, size, previewPNGData, creationOrdinal)
//! ```
//!
//! Dates are Core Data absolute time (seconds since 2001-01-01 UTC) in current
//! databases; older exports store ISO text. Both are accepted.
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use eyre::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, Row, backup::Backup};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

use crate::model::{
    AttachmentMap, AttachmentRecord, Folder, Project, ProjectStatus, TagMap, TaskDates, TaskRow,
};

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z.
const CORE_DATA_EPOCH_OFFSET: i64 = 978_307_200;

/// Every row set the export needs, fetched in one go before rendering.
#[derive(Debug, Default)]
pub struct DatabaseSnapshot {
    pub tasks: Vec<TaskRow>,
    pub projects: HashMap<String, Project>,
    pub tags: TagMap,
    pub attachments: AttachmentMap,
    pub folders: Vec<Folder>,
}

pub fn open_db(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .wrap_err_with(|| format!("Failed to open database: {}", path.display()))
}

/// Copy the database into a temporary file so OmniFocus is never blocked while we read.
pub fn backup_database(db_path: &Path, quiet: bool) -> Result<NamedTempFile> {
    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        let s = ProgressBar::new_spinner();
        s.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        s.set_message("Snapshotting database...");
        s.enable_steady_tick(Duration::from_millis(80));
        s
    };

    let src = open_db(db_path)?;

    let tmp = NamedTempFile::new().wrap_err("Failed to create temporary file")?;
    let mut dst =
        Connection::open(tmp.path()).wrap_err("Failed to open snapshot database connection")?;

    {
        let backup = Backup::new(&src, &mut dst).wrap_err("Failed to initialize backup")?;
        backup
            .run_to_completion(1000, Duration::from_millis(5), None)
            .wrap_err("Backup did not complete successfully")?;
    }

    drop(dst);
    drop(src);
    spinner.finish_and_clear();
    Ok(tmp)
}

/// Run every fetch against `conn`.
pub fn load_snapshot(conn: &Connection) -> Result<DatabaseSnapshot> {
    Ok(DatabaseSnapshot {
        tasks: fetch_tasks(conn)?,
        projects: fetch_projects(conn)?,
        tags: fetch_task_tags(conn)?,
        attachments: fetch_attachments(conn)?,
        folders: fetch_folders(conn)?,
    })
}

pub fn fetch_tasks(conn: &Connection) -> Result<Vec<TaskRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT
                t1.persistentIdentifier,
                t1.name,
                t1.plainTextNote,
                t2.name,
                t2.persistentIdentifier,
                t1.dateCompleted IS NOT NULL,
                t1.effectiveDateHidden IS NOT NULL,
                t1.flagged,
                t1.dateCompleted,
                t1.dateDue,
                t1.datePlanned,
                t1.dateToStart,
                t1.dateAdded,
                t1.dateModified
            FROM Task t1
            LEFT JOIN Task t2 ON t1.containingProjectInfo = t2.persistentIdentifier
            ORDER BY t1.rank, t1.persistentIdentifier",
        )
        .wrap_err("Failed to prepare task query")?;

    let tasks = stmt
        .query_map([], map_task_row)?
        .collect::<Result<_, _>>()
        .wrap_err("Failed to collect tasks")?;
    Ok(tasks)
}

fn map_task_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        note: row.get(2)?,
        project_name: row.get(3)?,
        project_id: row.get(4)?,
        is_completed: row.get(5)?,
        is_dropped: row.get(6)?,
        is_flagged: row.get::<_, Option<bool>>(7)?.unwrap_or(false),
        dates: TaskDates {
            completed: date_column(row, 8)?,
            due: date_column(row, 9)?,
            planned: date_column(row, 10)?,
            to_start: date_column(row, 11)?,
            added: date_column(row, 12)?,
            modified: date_column(row, 13)?,
        },
    })
}

pub fn fetch_projects(conn: &Connection) -> Result<HashMap<String, Project>> {
    let mut stmt = conn
        .prepare(
            "SELECT t.persistentIdentifier, p.effectiveStatus, p.folder
            FROM Task t
            JOIN ProjectInfo p ON t.persistentIdentifier = p.task",
        )
        .wrap_err("Failed to prepare project query")?;

    let rows = stmt.query_map([], |row| {
        let status: Option<String> = row.get(1)?;
        Ok(Project {
            id: row.get(0)?,
            status: status.map(ProjectStatus::new).unwrap_or_default(),
            folder: row.get(2)?,
        })
    })?;

    let mut projects = HashMap::new();
    for project in rows {
        let project = project.wrap_err("Failed to read project row")?;
        projects.insert(project.id.clone(), project);
    }
    Ok(projects)
}

/// Task id -> tag names in `rankInTask` order.
pub fn fetch_task_tags(conn: &Connection) -> Result<TagMap> {
    let mut stmt = conn
        .prepare(
            "SELECT tt.task, c.name
            FROM TaskToTag tt
            JOIN Context c ON c.persistentIdentifier = tt.tag
            ORDER BY tt.task, tt.rankInTask",
        )
        .wrap_err("Failed to prepare tag query")?;

    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut tags = TagMap::new();
    for row in rows {
        let (task_id, tag) = row.wrap_err("Failed to read tag row")?;
        tags.entry(task_id).or_default().push(tag);
    }
    Ok(tags)
}

/// Task id -> attachments in `creationOrdinal` order.
pub fn fetch_attachments(conn: &Connection) -> Result<AttachmentMap> {
    let mut stmt = conn
        .prepare(
            "SELECT task, name, size, previewPNGData, persistentIdentifier, creationOrdinal
            FROM Attachment
            WHERE task IS NOT NULL
            ORDER BY task, creationOrdinal, persistentIdentifier",
        )
        .wrap_err("Failed to prepare attachment query")?;

    let rows = stmt.query_map([], |row| {
        Ok(AttachmentRecord {
            task_id: row.get(0)?,
            name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            size: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            preview: row
                .get::<_, Option<Vec<u8>>>(3)?
                .filter(|blob| !blob.is_empty()),
            content_id: row.get(4)?,
            creation_order: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        })
    })?;

    let mut attachments = AttachmentMap::new();
    for row in rows {
        let record = row.wrap_err("Failed to read attachment row")?;
        attachments
            .entry(record.task_id.clone())
            .or_default()
            .push(record);
    }
    Ok(attachments)
}

pub fn fetch_folders(conn: &Connection) -> Result<Vec<Folder>> {
    let mut stmt = conn
        .prepare(
            "SELECT persistentIdentifier, name, parent, rank
            FROM Folder
            ORDER BY rank, persistentIdentifier",
        )
        .wrap_err("Failed to prepare folder query")?;

    let folders = stmt
        .query_map([], |row| {
            Ok(Folder {
                id: row.get(0)?,
                name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                parent: row.get(2)?,
                rank: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
            })
        })?
        .collect::<Result<_, _>>()
        .wrap_err("Failed to collect folders")?;
    Ok(folders)
}

/// A completed or dropped task for the logbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogbookRow {
    pub project_name: Option<String>,
    pub project_id: Option<String>,
    pub task_name: String,
    pub task_id: String,
    pub completed: Option<NaiveDateTime>,
    pub hidden: Option<NaiveDateTime>,
}

pub fn fetch_logbook(conn: &Connection) -> Result<Vec<LogbookRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT t2.name, t2.persistentIdentifier, t1.name, t1.persistentIdentifier,
                t1.dateCompleted, t1.effectiveDateHidden
            FROM Task t1
            LEFT JOIN Task t2 ON t1.containingProjectInfo = t2.persistentIdentifier
            WHERE t1.dateCompleted IS NOT NULL OR t1.effectiveDateHidden IS NOT NULL",
        )
        .wrap_err("Failed to prepare logbook query")?;

    let rows = stmt
        .query_map([], |row| {
            Ok(LogbookRow {
                project_name: row.get(0)?,
                project_id: row.get(1)?,
                task_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                task_id: row.get(3)?,
                completed: date_column(row, 4)?,
                hidden: date_column(row, 5)?,
            })
        })?
        .collect::<Result<_, _>>()
        .wrap_err("Failed to collect logbook rows")?;
    Ok(rows)
}

fn date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    Ok(parse_date_value(&row.get::<_, Value>(idx)?))
}

/// Normalise a date column to local time.
pub fn parse_date_value(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Null | Value::Blob(_) => None,
        Value::Integer(secs) => from_core_data_seconds(*secs as f64),
        Value::Real(secs) => from_core_data_seconds(*secs),
        Value::Text(text) => parse_date_text(text),
    }
}

fn from_core_data_seconds(secs: f64) -> Option<NaiveDateTime> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    if whole < i64::MIN as f64 || whole >= i64::MAX as f64 {
        return None;
    }
    let nanos = ((secs - whole) * 1e9) as u32;
    let unix = CORE_DATA_EPOCH_OFFSET.checked_add(whole as i64)?;
    DateTime::from_timestamp(unix, nanos).map(|utc| utc.with_timezone(&Local).naive_local())
}

fn parse_date_text(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim().trim_end_matches('Z');
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }
    text.get(..10)
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
