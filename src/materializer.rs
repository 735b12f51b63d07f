//! Turning rendered projects into files on disk.
//!
//! Grouping is two-phase: rows are first bucketed by project, then each bucket is
//! rendered and assigned a file path. Projects that land on the same path share one
//! file. Writes go through fingerprint comparison so an unchanged database leaves
//! every file (and its modification time) alone.
use eyre::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::attachments::ATTACHMENTS_DIR;
use crate::database::DatabaseSnapshot;
use crate::folders::FolderPaths;
use crate::model::{AttachmentRefMap, ProjectStatus, TaskRow};
use crate::renderer::{RenderContext, metadata_block};
use crate::utils::{
    Console, ProcessResult, fingerprint, markdown_matches, sanitize_filename,
    write_markdown_if_changed,
};

const INBOX_NAME: &str = "Inbox";
const ARCHIVE_DIRS: [&str; 2] = [".(done)", ".(dropped)"];

/// Project name and identifier, as carried by every task row.
pub type ProjectKey = (Option<String>, Option<String>);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl WriteStats {
    fn record(&mut self, result: ProcessResult) {
        match result {
            ProcessResult::Created => self.created += 1,
            ProcessResult::Updated => self.updated += 1,
            ProcessResult::Skipped => self.skipped += 1,
        }
    }
}

/// Phase one: bucket task rows by (project name, project id).
pub fn group_by_project(tasks: &[TaskRow]) -> BTreeMap<ProjectKey, Vec<&TaskRow>> {
    let mut groups: BTreeMap<ProjectKey, Vec<&TaskRow>> = BTreeMap::new();
    for task in tasks {
        groups
            .entry((task.project_name.clone(), task.project_id.clone()))
            .or_default()
            .push(task);
    }
    groups
}

/// Output path of a project relative to the export root.
///
/// `folder/path/[status dir/]Name (status).md`
pub fn project_file_path(
    project_name: Option<&str>,
    status: &ProjectStatus,
    folder_path: Option<&str>,
) -> PathBuf {
    let mut path = PathBuf::new();
    if let Some(folder_path) = folder_path {
        folder_path
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
            .for_each(|segment| path.push(segment));
    }
    if let Some(dir) = status.directory() {
        path.push(dir);
    }
    let stem = format!(
        "{}{}",
        project_name.unwrap_or(INBOX_NAME),
        status.filename_suffix()
    );
    path.push(format!("{}.md", sanitize_filename(&stem)));
    path
}

/// Phase two: render every project and merge those sharing a path.
pub fn plan_files(
    snapshot: &DatabaseSnapshot,
    attachments: &AttachmentRefMap,
) -> BTreeMap<PathBuf, String> {
    let folder_paths: HashMap<String, String> = FolderPaths::resolve_all(&snapshot.folders);
    let ctx = RenderContext {
        tags: &snapshot.tags,
        attachments,
    };

    let mut blocks: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
    for ((project_name, project_id), tasks) in group_by_project(&snapshot.tasks) {
        let project = project_id.as_ref().and_then(|id| snapshot.projects.get(id));
        let status = project.map(|p| p.status.clone()).unwrap_or_default();
        let folder_path = project
            .and_then(|p| p.folder.as_ref())
            .and_then(|folder| folder_paths.get(folder))
            .map(String::as_str);

        let path = project_file_path(project_name.as_deref(), &status, folder_path);
        let block = format!(
            "{}{}",
            metadata_block(&status),
            ctx.render_project(&tasks, project_id.as_deref(), &status)
        );
        blocks.entry(path).or_default().push(block);
    }

    blocks
        .into_iter()
        .map(|(path, blocks)| {
            let content = blocks
                .iter()
                .map(|block| block.trim_end())
                .collect::<Vec<_>>()
                .join("\n\n");
            (path, content)
        })
        .collect()
}

/// Write every planned file below `output_dir`, skipping unchanged ones.
pub fn write_files(
    files: &BTreeMap<PathBuf, String>,
    output_dir: &Path,
    force: bool,
    console: &mut Console,
) -> Result<WriteStats> {
    let mut stats = WriteStats::default();
    console.start_progress(files.len() as u64);

    for (relative, content) in files {
        let path = output_dir.join(relative);
        let archived = !force
            && !path.exists()
            && archived_copies(output_dir, relative)
                .iter()
                .any(|copy| markdown_matches(copy, content));
        let result = if archived {
            ProcessResult::Skipped
        } else {
            write_markdown_if_changed(&path, content, force)?
        };
        match result {
            ProcessResult::Created => console.detail(format!("Created:  {}", relative.display())),
            ProcessResult::Updated => console.detail(format!("Updated:  {}", relative.display())),
            ProcessResult::Skipped => console.detail(format!("Skipped:  {}", relative.display())),
        }
        stats.record(result);
        console.inc();
    }

    console.finish();
    Ok(stats)
}

fn is_dot(name: &str) -> bool {
    name.starts_with('.')
}

/// Folder directories are the ones the post-pass may archive.
fn is_folder_dir(name: &str) -> bool {
    !is_dot(name) && !name.starts_with('(')
}

/// Existing copies of `relative` left by earlier post-passes: the same path with
/// one or more of its folder directories moved under a `.(done)` or `.(dropped)`
/// sibling.
pub fn archived_copies(output_dir: &Path, relative: &Path) -> Vec<PathBuf> {
    let components: Vec<&OsStr> = relative.iter().collect();
    let Some((file_name, dirs)) = components.split_last() else {
        return Vec::new();
    };

    // (directory, reached through an archive move)
    let mut frontier = vec![(output_dir.to_path_buf(), false)];
    for dir in dirs {
        let mut next = Vec::new();
        for (base, archived) in frontier {
            let live = base.join(dir);
            if live.is_dir() {
                next.push((live, archived));
            }
            if is_folder_dir(&dir.to_string_lossy()) {
                for archive in ARCHIVE_DIRS {
                    let moved = base.join(archive).join(dir);
                    if moved.is_dir() {
                        next.push((moved, true));
                    }
                }
            }
        }
        frontier = next;
    }

    frontier
        .into_iter()
        .filter(|(_, archived)| *archived)
        .map(|(dir, _)| dir.join(file_name))
        .filter(|path| path.is_file())
        .collect()
}

/// Decide where an emptied directory should be archived, if anywhere.
///
/// A directory is a candidate only when it holds no files and every subdirectory
/// is a dot or parenthesized status directory.
fn archive_status(dir: &Path) -> Result<Option<&'static str>> {
    let mut subdirs = Vec::new();
    for entry in fs::read_dir(dir).wrap_err_with(|| format!("Failed to read: {}", dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            return Ok(None);
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_folder_dir(&name) {
            return Ok(None);
        }
        subdirs.push(name);
    }

    let status = if subdirs.iter().any(|name| name.contains(".(dropped)")) {
        Some("dropped")
    } else if subdirs.iter().any(|name| is_dot(name)) || subdirs.is_empty() {
        Some("done")
    } else {
        None
    };
    Ok(status)
}

/// Move `src` to `dest`, merging into an existing directory.
///
/// A file identical to the one already at the destination is discarded so the
/// destination keeps its timestamps.
pub fn merge_into(src: &Path, dest: &Path) -> Result<()> {
    if !dest.exists() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        return fs::rename(src, dest).wrap_err_with(|| {
            format!("Failed to move {} -> {}", src.display(), dest.display())
        });
    }

    for entry in fs::read_dir(src).wrap_err_with(|| format!("Failed to read: {}", src.display()))? {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            if to.is_file() {
                fs::remove_file(&to)?;
            }
            merge_into(&from, &to)?;
        } else if to.is_dir() {
            fs::remove_dir_all(&to)?;
            fs::rename(&from, &to)?;
        } else if to.is_file() && fingerprint(&fs::read(&from)?) == fingerprint(&fs::read(&to)?) {
            fs::remove_file(&from)?;
        } else {
            fs::rename(&from, &to)
                .wrap_err_with(|| format!("Failed to move {} -> {}", from.display(), to.display()))?;
        }
    }

    fs::remove_dir(src).wrap_err_with(|| format!("Failed to remove: {}", src.display()))
}

/// Archive directories that no longer hold live content into a sibling
/// `.(done)` or `.(dropped)` directory. Children are handled before parents, so
/// an emptied chain collapses in one pass. Nothing inside a dot directory is
/// touched. Returns the number of moves.
pub fn reorganize_empty_folders(root: &Path, console: &Console) -> Result<usize> {
    // Walk parent-first so dot directories prune their subtrees, then reverse.
    let mut candidates: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || (!is_dot(&e.file_name().to_string_lossy())
                    && !(e.depth() == 1 && e.file_name() == ATTACHMENTS_DIR))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    candidates.reverse();

    let mut moved = 0;
    for dir in candidates {
        if !dir.is_dir() {
            continue;
        }
        let Some(status) = archive_status(&dir)? else {
            continue;
        };
        let (Some(parent), Some(name)) = (dir.parent(), dir.file_name()) else {
            continue;
        };
        let target = parent.join(format!(".({})", status)).join(name);

        match merge_into(&dir, &target) {
            Ok(()) => {
                moved += 1;
                console.info(format!(
                    "Moved {} -> {}",
                    dir.strip_prefix(root).unwrap_or(&dir).display(),
                    target.strip_prefix(root).unwrap_or(&target).display()
                ));
            }
            Err(e) => console.warn(format!("could not move {}: {:#}", dir.display(), e)),
        }
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Folder, Project};
    use tempfile::TempDir;

    fn task(id: &str, name: &str, project: Option<(&str, &str)>) -> TaskRow {
        TaskRow {
            id: id.to_string(),
            name: name.to_string(),
            project_name: project.map(|(n, _)| n.to_string()),
            project_id: project.map(|(_, i)| i.to_string()),
            ..TaskRow::default()
        }
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn status_decides_directory_and_suffix() {
        let active = project_file_path(Some("Work"), &ProjectStatus::active(), None);
        assert_eq!(active, PathBuf::from("Work.md"));

        let inactive = project_file_path(Some("Work"), &ProjectStatus::new("inactive"), Some("Areas/Job"));
        assert_eq!(inactive, PathBuf::from("Areas/Job/(inactive)/Work (inactive).md"));

        let done = project_file_path(Some("A/B"), &ProjectStatus::new("done"), None);
        assert_eq!(done, PathBuf::from(".(done)/A_B (done).md"));

        let inbox = project_file_path(None, &ProjectStatus::active(), None);
        assert_eq!(inbox, PathBuf::from("Inbox.md"));
    }

    #[test]
    fn grouping_does_not_depend_on_row_order() {
        let rows = vec![
            task("b", "B", Some(("Work", "p1"))),
            task("x", "X", None),
            task("a", "A", Some(("Work", "p1"))),
        ];
        let groups = group_by_project(&rows);
        assert_eq!(groups.len(), 2);
        let work = &groups[&(Some("Work".to_string()), Some("p1".to_string()))];
        assert_eq!(work.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), ["b", "a"]);
    }

    #[test]
    fn projects_sharing_a_path_share_a_file() {
        let mut snapshot = DatabaseSnapshot::default();
        snapshot.tasks = vec![
            task("p1", "Errands", Some(("Errands", "p1"))),
            task("p2", "Errands", Some(("Errands", "p2"))),
            task("t1", "Buy milk", Some(("Errands", "p2"))),
        ];
        let files = plan_files(&snapshot, &AttachmentRefMap::new());
        assert_eq!(files.len(), 1);
        let content = &files[&PathBuf::from("Errands.md")];
        assert_eq!(
            content,
            "---\nstatus: active\ntags: omnifocus\n---\n# Errands #omnifocus\n\n\
             ---\nstatus: active\ntags: omnifocus\n---\n# Errands #omnifocus\n\n\
             - [ ] Buy milk #omnifocus"
        );
    }

    #[test]
    fn folder_path_precedes_status_directory() {
        let mut snapshot = DatabaseSnapshot::default();
        snapshot.tasks = vec![task("p1", "Launch", Some(("Launch", "p1")))];
        snapshot.folders = vec![
            Folder { id: "f1".into(), name: "Work".into(), parent: None, rank: 0 },
            Folder { id: "f2".into(), name: "Old Projects".into(), parent: Some("f1".into()), rank: 0 },
        ];
        snapshot.projects.insert(
            "p1".into(),
            Project { id: "p1".into(), status: ProjectStatus::new("done"), folder: Some("f2".into()) },
        );
        let files = plan_files(&snapshot, &AttachmentRefMap::new());
        assert!(files.contains_key(&PathBuf::from("Work/Old Projects/.(done)/Launch (done).md")));
    }

    #[test]
    fn folder_with_only_archived_projects_moves_to_done() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join("Old Projects/.(done)/Finished.md"));
        touch(&root.path().join("Live/Current.md"));

        let moved = reorganize_empty_folders(root.path(), &Console::silent()).unwrap();
        assert_eq!(moved, 1);
        assert!(root.path().join(".(done)/Old Projects/.(done)/Finished.md").is_file());
        assert!(!root.path().join("Old Projects").exists());
        assert!(root.path().join("Live/Current.md").is_file());
    }

    #[test]
    fn archived_tree_is_left_alone_on_later_passes() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join("Old Projects/.(done)/Finished.md"));

        assert_eq!(reorganize_empty_folders(root.path(), &Console::silent()).unwrap(), 1);
        let archived = root.path().join(".(done)/Old Projects/.(done)/Finished.md");
        assert!(archived.is_file());

        for _ in 0..2 {
            assert_eq!(reorganize_empty_folders(root.path(), &Console::silent()).unwrap(), 0);
            assert!(archived.is_file());
            assert!(!root.path().join(".(done)/.(done)").exists());
        }
    }

    #[test]
    fn directories_inside_dot_directories_are_never_candidates() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join(".(done)/Old Projects/.(done)/Finished.md"));
        fs::create_dir_all(root.path().join(".(dropped)/Empty/Nested")).unwrap();

        let moved = reorganize_empty_folders(root.path(), &Console::silent()).unwrap();
        assert_eq!(moved, 0);
        assert!(root.path().join(".(done)/Old Projects/.(done)/Finished.md").is_file());
        assert!(root.path().join(".(dropped)/Empty/Nested").is_dir());
    }

    #[test]
    fn archived_copy_with_same_content_is_not_rewritten() {
        let root = TempDir::new().unwrap();
        let relative = PathBuf::from("Old/.(done)/Finished (done).md");
        let mut files = BTreeMap::new();
        files.insert(relative.clone(), "# Finished".to_string());

        let first = write_files(&files, root.path(), false, &mut Console::silent()).unwrap();
        assert_eq!(first.created, 1);
        reorganize_empty_folders(root.path(), &Console::silent()).unwrap();
        let archived = root.path().join(".(done)/Old/.(done)/Finished (done).md");
        assert_eq!(archived_copies(root.path(), &relative), vec![archived.clone()]);

        let second = write_files(&files, root.path(), false, &mut Console::silent()).unwrap();
        assert_eq!(second, WriteStats { created: 0, updated: 0, skipped: 1 });
        assert!(!root.path().join("Old").exists());

        files.insert(relative.clone(), "# Finished\n- [x] one more".to_string());
        let changed = write_files(&files, root.path(), false, &mut Console::silent()).unwrap();
        assert_eq!(changed.created, 1);
        reorganize_empty_folders(root.path(), &Console::silent()).unwrap();
        assert_eq!(
            fs::read_to_string(&archived).unwrap(),
            "# Finished\n- [x] one more\n"
        );
    }

    #[test]
    fn archived_copies_follow_every_moved_folder() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join(".(done)/A/.(dropped)/B/.(done)/F.md"));
        touch(&root.path().join("A/C/.(done)/F.md"));

        let found = archived_copies(root.path(), Path::new("A/B/.(done)/F.md"));
        assert_eq!(found, vec![root.path().join(".(done)/A/.(dropped)/B/.(done)/F.md")]);
        assert!(archived_copies(root.path(), Path::new("A/C/.(done)/F.md")).is_empty());
        assert!(archived_copies(root.path(), Path::new(".(done)/F.md")).is_empty());
    }

    #[test]
    fn dropped_subdirectory_wins_over_done() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join("Area/.(done)/A.md"));
        touch(&root.path().join("Area/.(dropped)/B.md"));

        reorganize_empty_folders(root.path(), &Console::silent()).unwrap();
        assert!(root.path().join(".(dropped)/Area/.(dropped)/B.md").is_file());
        assert!(root.path().join(".(dropped)/Area/.(done)/A.md").is_file());
    }

    #[test]
    fn inactive_only_directory_stays_put() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join("Someday/(inactive)/Idea (inactive).md"));
        fs::create_dir_all(root.path().join(ATTACHMENTS_DIR)).unwrap();

        let moved = reorganize_empty_folders(root.path(), &Console::silent()).unwrap();
        assert_eq!(moved, 0);
        assert!(root.path().join("Someday/(inactive)/Idea (inactive).md").is_file());
        assert!(root.path().join(ATTACHMENTS_DIR).is_dir());
    }

    #[test]
    fn empty_chain_collapses_in_one_pass() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("Outer/Inner")).unwrap();

        let moved = reorganize_empty_folders(root.path(), &Console::silent()).unwrap();
        assert_eq!(moved, 2);
        assert!(root.path().join(".(done)/Outer/.(done)/Inner").is_dir());
    }

    #[test]
    fn merge_keeps_identical_target_untouched() {
        let root = TempDir::new().unwrap();
        let existing = root.path().join(".(done)/Old/.(done)/Finished.md");
        touch(&existing);
        let mtime = fs::metadata(&existing).unwrap().modified().unwrap();
        touch(&root.path().join("Old/.(done)/Finished.md"));
        touch(&root.path().join("Old/.(done)/New.md"));

        merge_into(&root.path().join("Old"), &root.path().join(".(done)/Old")).unwrap();
        assert!(!root.path().join("Old").exists());
        assert_eq!(fs::metadata(&existing).unwrap().modified().unwrap(), mtime);
        assert!(root.path().join(".(done)/Old/.(done)/New.md").is_file());
    }
}
