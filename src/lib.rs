//! # omnifocus-md
//!
//! Exports tasks and projects from a local OmniFocus database into a folder tree of
//! Markdown files for a note-taking vault.
//!
//! ## What it does
//!
//! Every project becomes one file, placed under the path of its folder. Projects that
//! are not active are filed under a status directory: `(inactive)` for inactive
//! projects, hidden `.(done)` / `.(dropped)` style directories for everything else.
//! Tasks are written in the Obsidian Tasks emoji format with their dates, tags, flag,
//! note and attachments.
//!
//! The database is opened **read-only** and copied to a temporary snapshot before
//! reading, so OmniFocus can keep running.
//!
//! ## Incremental export
//!
//! Files are only written when their content changes, so re-running against an
//! unchanged database leaves every modification time untouched. Attachments prefer a
//! full-resolution copy from the newest OmniFocus backup and fall back to the preview
//! image stored in the database.
//!
//! ## Usage
//!
//! ```sh
//! # Export with full-resolution attachments from a backup folder
//! omnifocus-md ~/Library/Containers/com.omnigroup.OmniFocus4/Data/Backups
//!
//! # Preview-only attachments, custom output, plus the completed/dropped logbook
//! omnifocus-md --output ~/vault/omnifocus --logbook
//! ```
//!
//! Preferences can be persisted in `~/.config/omnifocus-md/config.toml`.
pub mod attachments;
pub mod database;
pub mod export;
pub mod folders;
pub mod locate;
pub mod logbook;
pub mod materializer;
pub mod model;
pub mod renderer;
pub mod utils;

pub use export::{ExportSummary, execute};
pub use utils::ExportConfig;
