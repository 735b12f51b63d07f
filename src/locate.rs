use eyre::{Result, eyre};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const DATABASE_FILE_NAME: &str = "OmniFocusDatabase.db";
pub const VERSION_MARKER: &str = "OmniFocus4";

/// Finds the database file to export.
pub trait DatabaseLocator {
    fn locate(&self) -> Result<PathBuf>;
}

/// A path given explicitly on the command line or in the config file.
pub struct ExplicitPath(pub PathBuf);

impl DatabaseLocator for ExplicitPath {
    fn locate(&self) -> Result<PathBuf> {
        if self.0.is_file() {
            Ok(self.0.clone())
        } else {
            Err(eyre!(
                "Database not found at: {}\nUse --db to specify the path manually.",
                self.0.display()
            ))
        }
    }
}

/// Searches a container tree for `OmniFocusDatabase.db` below an `OmniFocus4` segment.
pub struct GroupContainerSearch {
    base: PathBuf,
}

impl GroupContainerSearch {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// `~/Library/Group Containers`, where OmniFocus keeps its database on macOS.
    pub fn default_base() -> Option<Self> {
        dirs::home_dir().map(|home| Self::new(home.join("Library/Group Containers")))
    }

    fn has_marker(&self, path: &Path) -> bool {
        path.strip_prefix(&self.base)
            .unwrap_or(path)
            .components()
            .any(|c| c.as_os_str().to_string_lossy().contains(VERSION_MARKER))
    }
}

impl DatabaseLocator for GroupContainerSearch {
    fn locate(&self) -> Result<PathBuf> {
        WalkDir::new(&self.base)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == DATABASE_FILE_NAME)
            .map(|entry| entry.into_path())
            .find(|path| path.parent().is_some_and(|dir| self.has_marker(dir)))
            .ok_or_else(|| {
                eyre!(
                    "OmniFocus 4 database not found in {}\nUse --db to specify the path manually.",
                    self.base.display()
                )
            })
    }
}
