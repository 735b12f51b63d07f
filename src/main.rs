use clap::Parser;
use eyre::{Context, Result, eyre};
use omnifocus_md::locate::{DatabaseLocator, ExplicitPath, GroupContainerSearch};
use omnifocus_md::{ExportConfig, execute};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Export OmniFocus tasks and projects to a folder tree of Markdown files.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// OmniFocus backup directory, used for full-resolution attachments.
    /// Without it only the embedded previews are exported.
    #[arg(value_name = "BACKUP_DIR")]
    backup_dir: Option<PathBuf>,

    /// Directory to export markdown files.
    /// Defaults to ./omnifocus_md if not set in config.
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Path to OmniFocusDatabase.db.
    /// Auto-detected if omitted.
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/omnifocus-md/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also write a logbook of completed and dropped tasks.
    #[arg(long)]
    logbook: bool,

    /// Rewrite files even when their content is unchanged.
    #[arg(short, long)]
    force: bool,

    /// Print each file written or skipped.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress standard output (progress bars and counts).
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    output_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
    logbook: Option<bool>,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        dirs::config_dir()
            .map(|d| d.join("omnifocus-md/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn locator(db: Option<PathBuf>) -> Result<Box<dyn DatabaseLocator>> {
    match db {
        Some(path) => Ok(Box::new(ExplicitPath(path))),
        None => GroupContainerSearch::default_base()
            .map(|search| Box::new(search) as Box<dyn DatabaseLocator>)
            .ok_or_else(|| {
                eyre!("Could not determine home directory.\nUse --db to specify the database path.")
            }),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve output dir (CLI > Config > Default)
    let output_dir = cli
        .output
        .or(file_cfg.output_dir)
        .unwrap_or_else(|| PathBuf::from("omnifocus_md"));

    // 3. Locate the database (CLI > Config > Group Containers search)
    let db_path = locator(cli.db.or(file_cfg.db_path))?.locate()?;

    // 4. Build the Export Config
    let config = ExportConfig {
        output_dir,
        db_path,
        backup_dir: cli.backup_dir.or(file_cfg.backup_dir),
        logbook: cli.logbook || file_cfg.logbook.unwrap_or(false),
        force: cli.force,
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    // 5. Run the Business Logic
    execute(&config)?;
    Ok(())
}
