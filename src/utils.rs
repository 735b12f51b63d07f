use eyre::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration required to run the export process.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Clone, Debug)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    pub db_path: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub logbook: bool,
    pub force: bool,
    pub verbose: bool,
    pub quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    Created,
    Updated,
    Skipped,
}

const INVALID_FILENAME_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replace characters that are not allowed in a path segment with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if INVALID_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Content fingerprint used to decide whether a file needs rewriting.
pub fn fingerprint(bytes: &[u8]) -> Vec<u8> {
    Sha256::digest(bytes).to_vec()
}

/// Whether the markdown file at `path` holds `content`, ignoring surrounding whitespace.
pub fn markdown_matches(path: &Path, content: &str) -> bool {
    fs::read_to_string(path)
        .map(|existing| fingerprint(existing.trim().as_bytes()) == fingerprint(content.trim().as_bytes()))
        .unwrap_or(false)
}

/// Write a markdown document unless the file on disk already holds the same text.
///
/// Both sides are compared with surrounding whitespace trimmed, so a trailing newline
/// difference never triggers a rewrite. `force` skips the comparison.
pub fn write_markdown_if_changed(path: &Path, content: &str, force: bool) -> Result<ProcessResult> {
    let content = content.trim();
    let existed = path.exists();

    if existed && !force && markdown_matches(path, content) {
        return Ok(ProcessResult::Skipped);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, format!("{}\n", content))
        .wrap_err_with(|| format!("Failed to write: {}", path.display()))?;

    Ok(if existed {
        ProcessResult::Updated
    } else {
        ProcessResult::Created
    })
}

/// Byte-exact variant of [`write_markdown_if_changed`] for binary files.
pub fn write_bytes_if_changed(path: &Path, data: &[u8]) -> Result<ProcessResult> {
    let existed = path.exists();
    if existed
        && let Ok(existing) = fs::read(path)
        && fingerprint(&existing) == fingerprint(data)
    {
        return Ok(ProcessResult::Skipped);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, data).wrap_err_with(|| format!("Failed to write: {}", path.display()))?;

    Ok(if existed {
        ProcessResult::Updated
    } else {
        ProcessResult::Created
    })
}

/// User-facing output: progress bar plus plain lines, gated by verbose/quiet.
pub struct Console {
    bar: ProgressBar,
    verbose: bool,
    quiet: bool,
}

impl Console {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            verbose,
            quiet,
        }
    }

    pub fn silent() -> Self {
        Self::new(false, true)
    }

    /// Replace the current bar with a fresh one of `len` steps.
    pub fn start_progress(&mut self, len: u64) {
        self.bar.finish_and_clear();
        self.bar = if self.quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(len);
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
            );
            bar
        };
    }

    pub fn inc(&self) {
        self.bar.inc(1);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.quiet {
            self.bar.suspend(|| println!("{}", msg.as_ref()));
        }
    }

    pub fn detail(&self, msg: impl AsRef<str>) {
        if self.verbose && !self.quiet {
            self.bar.suspend(|| println!("{}", msg.as_ref()));
        }
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.bar.suspend(|| eprintln!("Warning: {}", msg.as_ref()));
    }
}
