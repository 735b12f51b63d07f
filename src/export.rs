use eyre::{Context, Result, eyre};
use std::fs;

use crate::attachments::{AttachmentResolver, AttachmentStats};
use crate::database::{
    DatabaseSnapshot, LogbookRow, backup_database, fetch_logbook, load_snapshot, open_db,
};
use crate::logbook::{LOGBOOK_FILE_NAME, render_logbook};
use crate::materializer::{WriteStats, plan_files, reorganize_empty_folders, write_files};
use crate::utils::{Console, ExportConfig, ProcessResult, write_markdown_if_changed};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub files: WriteStats,
    pub folders_moved: usize,
    pub attachments: AttachmentStats,
    pub logbook: Option<ProcessResult>,
}

/// The main entry point: snapshot the database, then export it.
pub fn execute(config: &ExportConfig) -> Result<ExportSummary> {
    let mut console = Console::new(config.verbose, config.quiet);

    match &config.backup_dir {
        Some(dir) if !dir.is_dir() => {
            return Err(eyre!("Backup directory not found: {}", dir.display()));
        }
        Some(_) => {}
        None => console.warn(
            "No backup directory given; attachments will use embedded previews only.",
        ),
    }

    console.info(format!("Database path: {}", config.db_path.display()));

    // Every query finishes, and both connections close, before anything is rendered.
    let (snapshot, logbook_rows) = {
        let tmp = backup_database(&config.db_path, config.quiet)?;
        let conn = open_db(tmp.path())?;
        let snapshot = load_snapshot(&conn).wrap_err("Failed to read OmniFocus database")?;
        let logbook_rows = if config.logbook {
            Some(fetch_logbook(&conn)?)
        } else {
            None
        };
        (snapshot, logbook_rows)
    };

    export_snapshot(&snapshot, logbook_rows.as_deref(), config, &mut console)
}

/// Export rows that have already been read.
pub fn export_snapshot(
    snapshot: &DatabaseSnapshot,
    logbook_rows: Option<&[LogbookRow]>,
    config: &ExportConfig,
    console: &mut Console,
) -> Result<ExportSummary> {
    fs::create_dir_all(&config.output_dir).wrap_err_with(|| {
        format!(
            "Failed to create output directory: {}",
            config.output_dir.display()
        )
    })?;

    console.info(format!(
        "Found {} tasks, {} projects, {} folders.",
        snapshot.tasks.len(),
        snapshot.projects.len(),
        snapshot.folders.len()
    ));

    let resolver = AttachmentResolver::new(&config.output_dir, config.backup_dir.as_deref());
    match (resolver.bundle(), &config.backup_dir) {
        (Some(bundle), _) => console.info(format!("Using backup: {}", bundle.display())),
        (None, Some(dir)) => console.warn(format!(
            "No OmniFocus backups found in {}; using embedded previews.",
            dir.display()
        )),
        (None, None) => {}
    }
    let (attachment_refs, attachment_stats) =
        resolver.resolve_all(&snapshot.attachments, console);

    let files = plan_files(snapshot, &attachment_refs);
    let file_stats = write_files(&files, &config.output_dir, config.force, console)?;

    let logbook = match logbook_rows {
        Some(rows) => {
            let path = config.output_dir.join(LOGBOOK_FILE_NAME);
            let result = write_markdown_if_changed(&path, &render_logbook(rows), config.force)?;
            console.detail(format!("Logbook: {:?}", result));
            Some(result)
        }
        None => None,
    };

    let folders_moved = reorganize_empty_folders(&config.output_dir, console)?;

    console.info(format!(
        "Done. {} created, {} updated, {} unchanged. {} folders moved.",
        file_stats.created, file_stats.updated, file_stats.skipped, folders_moved
    ));
    console.info(format!(
        "Attachments: {} full resolution, {} preview only, {} unavailable.",
        attachment_stats.full_res, attachment_stats.preview_only, attachment_stats.unavailable
    ));

    Ok(ExportSummary {
        files: file_stats,
        folders_moved,
        attachments: attachment_stats,
        logbook,
    })
}
