//! Branch range index.
//!
//! Harvested images are committed to branches named `<anything>_<start>_to_<end>`.
//! This module turns a remote-branch listing into [`RangeRecord`]s and wraps
//! them in a [`RangeIndex`] for id lookup.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;

use crate::models::RangeRecord;

static RANGE_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)_to_(\d+)$").expect("valid range suffix regex"));

/// Produces the raw remote-branch listing, one branch per line.
pub trait BranchSource {
    fn list_remote_branches(&self) -> Result<String>;
}

/// Runs `git branch -r` in a local checkout.
pub struct GitBranches {
    repo_dir: PathBuf,
}

impl GitBranches {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }
}

impl BranchSource for GitBranches {
    fn list_remote_branches(&self) -> Result<String> {
        let output = Command::new("git")
            .args(["branch", "-r"])
            .current_dir(&self.repo_dir)
            .output()
            .with_context(|| "Failed to execute 'git branch -r'. Is git installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git branch -r failed: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// A fixed listing, for callers that already know the branches.
pub struct StaticBranches(pub Vec<String>);

impl BranchSource for StaticBranches {
    fn list_remote_branches(&self) -> Result<String> {
        Ok(self.0.join("\n"))
    }
}

/// Parse a `git branch -r` listing into range records, in listing order.
///
/// Only branches under `remote/` whose name contains `_to_` and ends with
/// `<digits>_to_<digits>` are kept; everything else is skipped silently.
/// The remote prefix is stripped from the stored branch name.
pub fn parse_branch_listing(listing: &str, remote: &str) -> Vec<RangeRecord> {
    let remote_prefix = format!("{}/", remote);

    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.contains("->"))
        .filter_map(|line| {
            let branch = line.strip_prefix(&remote_prefix)?;
            if !branch.contains("_to_") {
                return None;
            }
            let caps = RANGE_SUFFIX_RE.captures(branch)?;
            let start = caps[1].parse().ok()?;
            let end = caps[2].parse().ok()?;
            Some(RangeRecord {
                start,
                end,
                branch: branch.to_string(),
            })
        })
        .collect()
}

/// List and parse the remote branches from `source`.
pub fn load_ranges(source: &dyn BranchSource, remote: &str) -> Result<Vec<RangeRecord>> {
    let listing = source.list_remote_branches()?;
    Ok(parse_branch_listing(&listing, remote))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("id {number} matches {} ranges: {}", .branches.len(), .branches.join(", "))]
    Ambiguous { number: u64, branches: Vec<String> },
}

/// Range records sorted by `(start, end, branch)`.
///
/// Overlapping ranges are allowed in the index but a lookup that lands in
/// more than one of them is an error rather than a silent first pick.
#[derive(Debug, Clone, Default)]
pub struct RangeIndex {
    records: Vec<RangeRecord>,
    overlaps: Vec<(usize, usize)>,
}

impl RangeIndex {
    pub fn new(mut records: Vec<RangeRecord>) -> Self {
        records.sort();
        records.dedup();

        let mut overlaps = Vec::new();
        for i in 0..records.len() {
            for j in (i + 1)..records.len() {
                if records[j].start > records[i].end {
                    break;
                }
                if records[i].overlaps(&records[j]) {
                    overlaps.push((i, j));
                }
            }
        }

        for &(i, j) in &overlaps {
            tracing::warn!(
                first = %records[i].branch,
                second = %records[j].branch,
                "overlapping branch ranges"
            );
        }

        Self { records, overlaps }
    }

    pub fn records(&self) -> &[RangeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Pairs of overlapping records.
    pub fn overlaps(&self) -> impl Iterator<Item = (&RangeRecord, &RangeRecord)> {
        self.overlaps
            .iter()
            .map(|&(i, j)| (&self.records[i], &self.records[j]))
    }

    /// The single record containing `number`, if any.
    pub fn lookup(&self, number: u64) -> Result<Option<&RangeRecord>, RangeError> {
        let upper = self.records.partition_point(|r| r.start <= number);
        let mut hits = self.records[..upper].iter().filter(|r| r.contains(number));

        let first = match hits.next() {
            Some(r) => r,
            None => return Ok(None),
        };
        let rest: Vec<&RangeRecord> = hits.collect();
        if rest.is_empty() {
            return Ok(Some(first));
        }

        let mut branches = vec![first.branch.clone()];
        branches.extend(rest.into_iter().map(|r| r.branch.clone()));
        Err(RangeError::Ambiguous { number, branches })
    }
}

/// Print the index as the `ranges` command does.
pub fn print_ranges(index: &RangeIndex) {
    println!("{:<12} {:<12} BRANCH", "START", "END");
    for record in index.records() {
        println!("{:<12} {:<12} {}", record.start, record.end, record.branch);
    }
    println!();
    println!("  ranges: {}", index.len());
    let overlaps: Vec<_> = index.overlaps().collect();
    if !overlaps.is_empty() {
        println!("  overlapping pairs: {}", overlaps.len());
        for (a, b) in overlaps {
            println!("    {} <-> {}", a.branch, b.branch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(start: u64, end: u64, branch: &str) -> RangeRecord {
        RangeRecord {
            start,
            end,
            branch: branch.to_string(),
        }
    }

    #[test]
    fn parses_git_listing() {
        let listing = "  origin/HEAD -> origin/main\n  origin/main\n  origin/images_s_20240101_100_to_200\n  origin/dev_to_prod\n  upstream/x_1_to_5\n  origin/a_300_to_400\n";
        let records = parse_branch_listing(listing, "origin");
        assert_eq!(
            records,
            vec![
                record(100, 200, "images_s_20240101_100_to_200"),
                record(300, 400, "a_300_to_400"),
            ]
        );
    }

    #[test]
    fn keeps_listing_order() {
        let listing = "origin/b_500_to_600\norigin/a_1_to_10";
        let records = parse_branch_listing(listing, "origin");
        assert_eq!(records[0].start, 500);
        assert_eq!(records[1].start, 1);
    }

    #[test]
    fn inverted_range_parses_without_panic() {
        let records = parse_branch_listing("origin/x_900_to_100", "origin");
        assert_eq!(records, vec![record(900, 100, "x_900_to_100")]);
        let index = RangeIndex::new(records);
        assert_eq!(index.lookup(500).unwrap(), None);
        assert_eq!(index.lookup(900).unwrap(), None);
    }

    #[test]
    fn requires_trailing_range() {
        let records = parse_branch_listing("origin/x_1_to_5_old\norigin/x_1_to_", "origin");
        assert!(records.is_empty());
    }

    #[test]
    fn lookup_finds_unique_range() {
        let index = RangeIndex::new(vec![
            record(300, 400, "c"),
            record(100, 200, "a"),
            record(201, 299, "b"),
        ]);
        assert_eq!(index.lookup(100).unwrap().unwrap().branch, "a");
        assert_eq!(index.lookup(200).unwrap().unwrap().branch, "a");
        assert_eq!(index.lookup(250).unwrap().unwrap().branch, "b");
        assert_eq!(index.lookup(400).unwrap().unwrap().branch, "c");
        assert_eq!(index.lookup(99).unwrap(), None);
        assert_eq!(index.lookup(401).unwrap(), None);
        assert_eq!(index.overlaps().count(), 0);
    }

    #[test]
    fn overlapping_lookup_is_ambiguous() {
        let index = RangeIndex::new(vec![record(1, 1000, "wide"), record(100, 200, "narrow")]);
        assert_eq!(index.overlaps().count(), 1);
        assert_eq!(index.lookup(50).unwrap().unwrap().branch, "wide");
        let err = index.lookup(150).unwrap_err();
        assert_eq!(
            err,
            RangeError::Ambiguous {
                number: 150,
                branches: vec!["wide".to_string(), "narrow".to_string()],
            }
        );
    }

    #[test]
    fn overlap_after_non_overlapping_neighbor_is_found() {
        let index = RangeIndex::new(vec![
            record(1, 1000, "wide"),
            record(10, 20, "a"),
            record(500, 600, "b"),
        ]);
        assert_eq!(index.overlaps().count(), 2);
        assert!(index.lookup(550).is_err());
    }

    #[test]
    fn static_source_round_trips() {
        let source = StaticBranches(vec!["origin/s_1_to_9".to_string()]);
        let records = load_ranges(&source, "origin").unwrap();
        assert_eq!(records, vec![record(1, 9, "s_1_to_9")]);
    }
}
