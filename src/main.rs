//! # Image Harvest CLI (`harvest`)
//!
//! One subcommand per batch job. Positional arguments follow the job's input
//! contract; any mismatch prints the usage line and exits with status 1.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest fetch <prefix> <start> <end> <folder>` | Download and validate images |
//! | `harvest scan <prefix> <start> <end> <log>` | Log valid codes without downloading |
//! | `harvest ranges` | Show the branch range index |
//! | `harvest locate <owner> <repo> <output>` | List in-range images on every range branch |
//! | `harvest organize [true\|false]` | Re-file intake images (argument: dry run) |
//! | `harvest load <log>` | Upsert image URLs into the store |
//! | `harvest stats` | Summarize the store |
//!
//! The store connection string is read from `MONGODB_URL` (name configurable
//! via `store.url_env`).

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

use image_harvest::branches::{load_ranges, print_ranges, GitBranches, RangeIndex};
use image_harvest::config::{self, Config};
use image_harvest::{fetch, load, locate, models, organize, scan, stats};

const DEFAULT_CONFIG: &str = "./harvest.toml";

/// Image Harvest: fetch, validate, locate, organize, and index coded images.
#[derive(Parser)]
#[command(name = "harvest", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./harvest.toml`; built-in defaults apply when that file
    /// does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every code in [start, end] and keep the valid images.
    Fetch {
        /// Code prefix: one lowercase letter.
        #[arg(value_parser = parse_prefix_arg)]
        prefix: char,
        start: u64,
        end: u64,
        /// Folder receiving `<code>.jpg` files.
        output_folder: PathBuf,
    },

    /// Probe every code in [start, end] and append valid codes to a log.
    Scan {
        #[arg(value_parser = parse_prefix_arg)]
        prefix: char,
        start: u64,
        end: u64,
        output_file: PathBuf,
    },

    /// Print the range index derived from remote branch names.
    Ranges,

    /// Find in-range images on every range branch of a GitHub repository.
    Locate {
        repo_owner: String,
        repo_name: String,
        output_file: PathBuf,
    },

    /// Move intake images into folders named after their branch range.
    Organize {
        /// `true` to only report the planned moves.
        #[arg(value_parser = parse_dry_run, default_value = "false", action = ArgAction::Set)]
        dry_run: bool,
    },

    /// Upsert image URLs from a log file into the store.
    Load {
        log_file: PathBuf,
    },

    /// Summarize the store.
    Stats,
}

fn parse_prefix_arg(s: &str) -> Result<char, String> {
    models::parse_prefix(s).map_err(|e| e.to_string())
}

fn parse_dry_run(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("expected true or false, got '{}'", other)),
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                let _ = e.print();
                std::process::exit(1);
            }
        },
    };

    init_tracing();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            error!(error = %err, "command failed");
            for cause in err.chain().skip(1) {
                error!(cause = %cause, "caused by");
            }
            std::process::exit(1);
        }
    }
}

fn load_cli_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(p) => config::load_config(p, true),
        None => config::load_config(std::path::Path::new(DEFAULT_CONFIG), false),
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let cfg = load_cli_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Fetch {
            prefix,
            start,
            end,
            output_folder,
        } => {
            fetch::run_fetch(&cfg, prefix, start, end, &output_folder).await?;
        }
        Commands::Scan {
            prefix,
            start,
            end,
            output_file,
        } => {
            scan::run_scan(&cfg, prefix, start, end, &output_file).await?;
        }
        Commands::Ranges => {
            let source = GitBranches::new(&cfg.workspace.root);
            let index = RangeIndex::new(load_ranges(&source, &cfg.workspace.remote)?);
            print_ranges(&index);
        }
        Commands::Locate {
            repo_owner,
            repo_name,
            output_file,
        } => {
            let token = cfg.github.token_from_env();
            return locate::run_locate(&cfg, &repo_owner, &repo_name, &output_file, token).await;
        }
        Commands::Organize { dry_run } => {
            let today = chrono::Local::now().format("%Y%m%d").to_string();
            organize::run_organize(&cfg, dry_run, &today)?;
        }
        Commands::Load { log_file } => {
            let store_url = cfg.store.url_from_env()?;
            load::run_load(&store_url, &log_file, cfg.store.batch_size).await?;
        }
        Commands::Stats => {
            let store_url = cfg.store.url_from_env()?;
            stats::run_stats(&store_url).await?;
        }
    }

    Ok(true)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
