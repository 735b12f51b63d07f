//! Folder path resolution.
//!
//! Every folder maps to a slash-separated path of sanitized names from its root.
//! Paths are memoized so each folder is traversed once no matter how many
//! descendants ask for it first. A folder currently being resolved is never
//! re-entered, which keeps a corrupt parent cycle from looping forever.
use std::collections::{HashMap, HashSet};

use crate::model::Folder;
use crate::utils::sanitize_filename;

pub struct FolderPaths<'a> {
    folders: HashMap<&'a str, &'a Folder>,
    resolved: HashMap<String, String>,
    in_progress: HashSet<String>,
    traversals: usize,
}

impl<'a> FolderPaths<'a> {
    pub fn new(folders: &'a [Folder]) -> Self {
        Self {
            folders: folders.iter().map(|f| (f.id.as_str(), f)).collect(),
            resolved: HashMap::new(),
            in_progress: HashSet::new(),
            traversals: 0,
        }
    }

    /// Resolve every folder and return the finished id -> path mapping.
    pub fn resolve_all(folders: &'a [Folder]) -> HashMap<String, String> {
        let mut paths = Self::new(folders);
        for folder in folders {
            paths.resolve(&folder.id);
        }
        paths.resolved
    }

    /// Path of `id`, or `None` when no such folder exists.
    pub fn resolve(&mut self, id: &str) -> Option<String> {
        if let Some(path) = self.resolved.get(id) {
            return Some(path.clone());
        }
        let folder = *self.folders.get(id)?;
        if !self.in_progress.insert(folder.id.clone()) {
            // Cycle: the caller is already resolving this folder.
            return None;
        }
        self.traversals += 1;

        let own = sanitize_filename(&folder.name);
        let parent_path = folder
            .parent
            .as_deref()
            .and_then(|parent| self.resolve(parent));
        let path = match parent_path {
            Some(parent) if !parent.is_empty() => format!("{}/{}", parent, own),
            _ => own,
        };

        self.in_progress.remove(&folder.id);
        self.resolved.insert(folder.id.clone(), path.clone());
        Some(path)
    }

    /// Number of folders actually walked, as opposed to served from the memo.
    pub fn traversals(&self) -> usize {
        self.traversals
    }
}
