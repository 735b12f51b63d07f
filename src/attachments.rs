//! Attachment resolution.
//!
//! A full-resolution copy from the newest backup bundle is preferred over the
//! low-resolution preview stored in the database. Every failure along the way is
//! local to the attachment: the worst outcome is a textual reference with no file.
use eyre::{Context, Result, eyre};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use zip::ZipArchive;

use crate::model::{AttachmentMap, AttachmentRecord, AttachmentRef, AttachmentRefMap};
use crate::utils::{Console, sanitize_filename, write_bytes_if_changed};

pub const ATTACHMENTS_DIR: &str = "attachments";

const BUNDLE_PREFIX: &str = "OmniFocus";
const BUNDLE_SUFFIX: &str = ".ofocus-backup";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentStats {
    pub full_res: usize,
    pub preview_only: usize,
    pub unavailable: usize,
}

/// Human-readable size: KB below one megabyte, MB above, one decimal place.
pub fn format_size(bytes: i64) -> String {
    let kb = bytes as f64 / 1024.0;
    if kb < 1024.0 {
        format!("{:.1} KB", kb)
    } else {
        format!("{:.1} MB", kb / 1024.0)
    }
}

fn is_backup_bundle(name: &str) -> bool {
    name.starts_with(BUNDLE_PREFIX) && name.ends_with(BUNDLE_SUFFIX)
}

/// The most recently modified backup bundle directly under `root`.
///
/// Ties on modification time go to the lexically greatest path.
pub fn find_newest_bundle(root: &Path) -> Option<PathBuf> {
    fs::read_dir(root)
        .ok()?
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| is_backup_bundle(&e.file_name().to_string_lossy()))
        .map(|e| {
            let modified = e
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, e.path())
        })
        .max()
        .map(|(_, path)| path)
}

/// Extract the first entry of the container named by `content_id`.
fn extract_from_bundle(bundle: &Path, content_id: &str) -> Result<Vec<u8>> {
    let container = bundle.join(format!("{}.zip", content_id));
    let file = File::open(&container)
        .wrap_err_with(|| format!("No backup container: {}", container.display()))?;
    let mut archive = ZipArchive::new(file)
        .wrap_err_with(|| format!("Unreadable backup container: {}", container.display()))?;
    if archive.is_empty() {
        return Err(eyre!("Empty backup container: {}", container.display()));
    }
    let mut entry = archive.by_index(0).wrap_err("Failed to open archive entry")?;
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .wrap_err("Failed to read archive entry")?;
    Ok(data)
}

pub struct AttachmentResolver {
    output_dir: PathBuf,
    bundle: Option<PathBuf>,
}

impl AttachmentResolver {
    /// `backup_root` of `None` means preview-only mode.
    pub fn new(output_dir: &Path, backup_root: Option<&Path>) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            bundle: backup_root.and_then(find_newest_bundle),
        }
    }

    pub fn bundle(&self) -> Option<&Path> {
        self.bundle.as_deref()
    }

    pub fn resolve(&self, record: &AttachmentRecord, console: &Console) -> AttachmentRef {
        let file_name = format!("{}_{}", record.task_id, sanitize_filename(&record.name));
        let relative = format!("{}/{}", ATTACHMENTS_DIR, file_name);
        let dest = self.output_dir.join(ATTACHMENTS_DIR).join(&file_name);
        let has_preview = record.preview.is_some();

        let mut reference = AttachmentRef {
            name: record.name.clone(),
            size: format_size(record.size),
            path: None,
            has_preview,
            is_full_res: false,
        };

        if let Some(bundle) = &self.bundle {
            let extracted = extract_from_bundle(bundle, &record.content_id)
                .and_then(|data| write_bytes_if_changed(&dest, &data));
            match extracted {
                Ok(_) => {
                    reference.path = Some(relative);
                    reference.is_full_res = true;
                    return reference;
                }
                Err(e) => console.detail(format!(
                    "Full-resolution copy unavailable for {}: {:#}",
                    record.name, e
                )),
            }
        }

        if let Some(preview) = &record.preview {
            match write_bytes_if_changed(&dest, preview) {
                Ok(_) => reference.path = Some(relative),
                Err(e) => console.warn(format!(
                    "Could not write preview for {}: {:#}",
                    record.name, e
                )),
            }
        }

        reference
    }

    /// Resolve every attachment, keeping per-task order. Tasks without
    /// attachments are absent from the result.
    pub fn resolve_all(
        &self,
        attachments: &AttachmentMap,
        console: &Console,
    ) -> (AttachmentRefMap, AttachmentStats) {
        let mut stats = AttachmentStats::default();
        let mut resolved = AttachmentRefMap::new();

        for (task_id, records) in attachments {
            if records.is_empty() {
                continue;
            }
            let refs: Vec<AttachmentRef> = records
                .iter()
                .map(|record| {
                    let r = self.resolve(record, console);
                    match (&r.path, r.is_full_res) {
                        (Some(_), true) => stats.full_res += 1,
                        (Some(_), false) => stats.preview_only += 1,
                        (None, _) => stats.unavailable += 1,
                    }
                    r
                })
                .collect();
            resolved.insert(task_id.clone(), refs);
        }

        (resolved, stats)
    }
}
