#![allow(dead_code)]

use omnifocus_md::ExportConfig;
use rusqlite::{Connection, params};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::FileOptions;

const SCHEMA: &str = "
CREATE TABLE Task (
    persistentIdentifier TEXT PRIMARY KEY,
    name TEXT,
    plainTextNote TEXT,
    containingProjectInfo TEXT,
    dateCompleted,
    effectiveDateHidden,
    flagged INTEGER NOT NULL DEFAULT 0,
    dateDue,
    datePlanned,
    dateToStart,
    dateAdded,
    dateModified,
    rank INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE ProjectInfo (pk TEXT PRIMARY KEY, task TEXT, effectiveStatus TEXT, folder TEXT);
CREATE TABLE Folder (persistentIdentifier TEXT PRIMARY KEY, name TEXT, parent TEXT, rank INTEGER);
CREATE TABLE Context (persistentIdentifier TEXT PRIMARY KEY, name TEXT);
CREATE TABLE TaskToTag (task TEXT, tag TEXT, rankInTask INTEGER);
CREATE TABLE Attachment (
    persistentIdentifier TEXT PRIMARY KEY,
    task TEXT,
    name TEXT,
    size INTEGER,
    previewPNGData BLOB,
    creationOrdinal INTEGER
);
";

/// A throwaway OmniFocus-shaped database plus an output directory.
pub struct Fixture {
    pub dir: TempDir,
    pub conn: Connection,
    pub db_path: PathBuf,
    pub output_dir: PathBuf,
    next_rank: i64,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("OmniFocusDatabase.db");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        let output_dir = dir.path().join("omnifocus_md");
        Self {
            dir,
            conn,
            db_path,
            output_dir,
            next_rank: 0,
        }
    }

    pub fn config(&self) -> ExportConfig {
        ExportConfig {
            output_dir: self.output_dir.clone(),
            db_path: self.db_path.clone(),
            backup_dir: None,
            logbook: false,
            force: false,
            verbose: false,
            quiet: true,
        }
    }

    pub fn project(&mut self, id: &str, name: &str, status: &str, folder: Option<&str>) {
        self.task(id, name, Some(id));
        self.conn
            .execute(
                "INSERT INTO ProjectInfo (pk, task, effectiveStatus, folder) VALUES (?1, ?2, ?3, ?4)",
                params![format!("pi-{}", id), id, status, folder],
            )
            .unwrap();
    }

    pub fn task(&mut self, id: &str, name: &str, project: Option<&str>) {
        self.next_rank += 1;
        self.conn
            .execute(
                "INSERT INTO Task (persistentIdentifier, name, containingProjectInfo, rank)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, name, project, self.next_rank],
            )
            .unwrap();
    }

    pub fn set(&self, id: &str, column: &str, value: &dyn rusqlite::ToSql) {
        self.conn
            .execute(
                &format!("UPDATE Task SET {} = ?1 WHERE persistentIdentifier = ?2", column),
                params![value, id],
            )
            .unwrap();
    }

    pub fn folder(&self, id: &str, name: &str, parent: Option<&str>) {
        self.conn
            .execute(
                "INSERT INTO Folder (persistentIdentifier, name, parent, rank) VALUES (?1, ?2, ?3, 0)",
                params![id, name, parent],
            )
            .unwrap();
    }

    pub fn tag(&self, task: &str, tag: &str, rank: i64) {
        let tag_id = format!("tag-{}", tag);
        self.conn
            .execute(
                "INSERT OR IGNORE INTO Context (persistentIdentifier, name) VALUES (?1, ?2)",
                params![tag_id, tag],
            )
            .unwrap();
        self.conn
            .execute(
                "INSERT INTO TaskToTag (task, tag, rankInTask) VALUES (?1, ?2, ?3)",
                params![task, tag_id, rank],
            )
            .unwrap();
    }

    pub fn attachment(&self, id: &str, task: &str, name: &str, size: i64, preview: Option<&[u8]>) {
        self.attachment_at(id, task, name, size, preview, 0);
    }

    pub fn attachment_at(
        &self,
        id: &str,
        task: &str,
        name: &str,
        size: i64,
        preview: Option<&[u8]>,
        order: i64,
    ) {
        self.conn
            .execute(
                "INSERT INTO Attachment (persistentIdentifier, task, name, size, previewPNGData, creationOrdinal)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, task, name, size, preview, order],
            )
            .unwrap();
    }

    /// Create a backup root holding one bundle with a container for `content_id`.
    pub fn backup_with(&self, content_id: &str, data: &[u8]) -> PathBuf {
        self.backup_in("OmniFocus 2024-01-15 120000.ofocus-backup", content_id, data)
    }

    /// Add a container to the named bundle, returning the backup root.
    pub fn backup_in(&self, bundle_name: &str, content_id: &str, data: &[u8]) -> PathBuf {
        let root = self.backup_root();
        let bundle = root.join(bundle_name);
        fs::create_dir_all(&bundle).unwrap();
        let file = File::create(bundle.join(format!("{}.zip", content_id))).unwrap();
        let mut zip = ZipWriter::new(file);
        zip.start_file("original.png", FileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
        zip.finish().unwrap();
        root
    }

    pub fn backup_root(&self) -> PathBuf {
        self.dir.path().join("Backups")
    }

    /// Set a bundle's modification time to `secs` seconds ago.
    pub fn age(&self, bundle_name: &str, secs: u64) {
        let bundle = File::open(self.backup_root().join(bundle_name)).unwrap();
        bundle
            .set_modified(SystemTime::now() - Duration::from_secs(secs))
            .unwrap();
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.output_dir.join(relative)).unwrap()
    }
}

/// Modification time of every file below `root`.
pub fn mtimes(root: &Path) -> Vec<(PathBuf, SystemTime)> {
    let mut all: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let modified = e.metadata().unwrap().modified().unwrap();
            (e.into_path(), modified)
        })
        .collect();
    all.sort();
    all
}
