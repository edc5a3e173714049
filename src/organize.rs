//! Local organizer: re-file intake images into per-range folders.
//!
//! Intake folders are directories under the workspace root whose names start
//! with `images_`. Every `<letter><digits>.jpg` inside is assigned to the one
//! branch range containing its id and moved to
//! `images_<prefix>_<YYYYMMDD>_<start>_to_<end>`.
//!
//! Work happens in two steps. [`plan_moves`] reads the directory tree and
//! decides every move without writing anything; [`apply_moves`] performs the
//! plan and appends the successful moves to the ledger. A dry run stops after
//! planning.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::branches::{load_ranges, GitBranches, RangeIndex};
use crate::config::Config;
use crate::models::{ImageCode, RangeRecord};
use crate::runlog::RunLog;

pub const INTAKE_PREFIX: &str = "images_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub source: PathBuf,
    pub target_dir: PathBuf,
    pub target: PathBuf,
    pub branch: String,
}

impl PlannedMove {
    /// `target<TAB>branch<TAB>source`
    pub fn ledger_line(&self) -> String {
        format!(
            "{}\t{}\t{}",
            self.target.display(),
            self.branch,
            self.source.display()
        )
    }
}

/// A file left where it is, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct MovePlan {
    pub processed: usize,
    /// Files already inside their canonical folder.
    pub in_place: usize,
    pub moves: Vec<PlannedMove>,
    pub errors: Vec<SkippedFile>,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub moved: Vec<PlannedMove>,
    pub errors: Vec<SkippedFile>,
}

pub fn target_folder_name(prefix: char, date: &str, range: &RangeRecord) -> String {
    format!(
        "{}{}_{}_{}_to_{}",
        INTAKE_PREFIX, prefix, date, range.start, range.end
    )
}

/// Intake folders directly under `root`, sorted by name.
pub fn find_intake_folders(root: &Path) -> Result<Vec<PathBuf>> {
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    let mut folders = Vec::new();
    for entry in walker {
        let entry = entry
            .with_context(|| format!("Failed to read workspace root: {}", root.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(INTAKE_PREFIX) {
            folders.push(entry.into_path());
        }
    }
    Ok(folders)
}

fn skip(path: &Path, reason: impl Into<String>) -> SkippedFile {
    SkippedFile {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Decide where every intake image goes. Reads only.
pub fn plan_moves(root: &Path, index: &RangeIndex, date: &str) -> Result<MovePlan> {
    let mut plan = MovePlan::default();
    let mut claimed: HashSet<PathBuf> = HashSet::new();

    for folder in find_intake_folders(root)? {
        let walker = WalkDir::new(&folder)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.to_lowercase().ends_with(".jpg") {
                continue;
            }

            plan.processed += 1;
            let source = entry.path().to_path_buf();

            let code = match ImageCode::from_file_name(&name) {
                Ok(code) if code.number > 0 => code,
                Ok(_) => {
                    plan.errors.push(skip(&source, "image id must be positive"));
                    continue;
                }
                Err(e) => {
                    plan.errors.push(skip(&source, e.to_string()));
                    continue;
                }
            };

            let range = match index.lookup(code.number) {
                Ok(Some(range)) => range,
                Ok(None) => {
                    plan.errors.push(skip(&source, "no matching range"));
                    continue;
                }
                Err(e) => {
                    plan.errors.push(skip(&source, e.to_string()));
                    continue;
                }
            };

            let target_dir = root.join(target_folder_name(code.prefix, date, range));
            if target_dir == folder {
                plan.in_place += 1;
                continue;
            }

            let target = target_dir.join(&name);
            if target.exists() || !claimed.insert(target.clone()) {
                plan.errors.push(skip(
                    &source,
                    format!("target already exists: {}", target.display()),
                ));
                continue;
            }

            plan.moves.push(PlannedMove {
                source,
                target_dir,
                target,
                branch: range.branch.clone(),
            });
        }
    }

    Ok(plan)
}

fn move_file(source: &Path, target: &Path) -> std::io::Result<()> {
    match std::fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(_) => {
            // rename fails across filesystems
            std::fs::copy(source, target)?;
            std::fs::remove_file(source)
        }
    }
}

/// Perform `plan` and append the successful moves to `ledger`.
pub fn apply_moves(plan: &MovePlan, ledger: &RunLog) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();

    for planned in &plan.moves {
        let result = std::fs::create_dir_all(&planned.target_dir)
            .and_then(|_| move_file(&planned.source, &planned.target));
        match result {
            Ok(()) => {
                tracing::info!(
                    source = %planned.source.display(),
                    target = %planned.target.display(),
                    "moved"
                );
                report.moved.push(planned.clone());
            }
            Err(e) => {
                tracing::warn!(source = %planned.source.display(), error = %e, "move failed");
                report.errors.push(skip(&planned.source, e.to_string()));
            }
        }
    }

    let lines: Vec<String> = report.moved.iter().map(PlannedMove::ledger_line).collect();
    ledger.append_lines(lines.iter().map(String::as_str))?;
    Ok(report)
}

/// Entry point for `harvest organize`.
pub fn run_organize(config: &Config, dry_run: bool, date: &str) -> Result<()> {
    let root = &config.workspace.root;
    let source = GitBranches::new(root);
    let index = RangeIndex::new(load_ranges(&source, &config.workspace.remote)?);

    let plan = plan_moves(root, &index, date)?;
    for skipped in &plan.errors {
        tracing::warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped");
    }

    let (moved, move_errors) = if dry_run {
        for planned in &plan.moves {
            println!(
                "Would move {} to {}",
                planned.source.display(),
                planned.target_dir.display()
            );
        }
        (plan.moves.len(), 0)
    } else {
        let ledger = RunLog::new(config.workspace.ledger_path());
        let report = apply_moves(&plan, &ledger)?;
        (report.moved.len(), report.errors.len())
    };

    println!("organize{}", if dry_run { " (dry-run)" } else { "" });
    println!("  processed: {}", plan.processed);
    println!(
        "  {}: {}",
        if dry_run { "to be moved" } else { "moved" },
        moved
    );
    println!("  already in place: {}", plan.in_place);
    println!("  errors: {}", plan.errors.len() + move_errors);
    Ok(())
}
