//! Flat, append-only run logs.
//!
//! Every write opens the file in append mode, writes whole lines, and closes
//! it again; no handle is shared between workers.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Timestamp used inside log lines: `2024-05-01 13:02:11`.
pub fn line_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Timestamp used in log file names: `20240501_130211`.
pub fn file_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/<stem>_<run_ts>.log`
    pub fn in_dir(dir: &Path, stem: &str, run_ts: &str) -> Self {
        Self::new(dir.join(format!("{}_{}.log", stem, run_ts)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_line(&self, line: &str) -> Result<()> {
        self.append_lines(std::iter::once(line))
    }

    /// Append all lines in a single write.
    pub fn append_lines<'a>(&self, lines: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let mut buf = String::new();
        for line in lines {
            buf.push_str(line);
            buf.push('\n');
        }
        if buf.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory: {}", parent.display())
                })?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open log file: {}", self.path.display()))?;
        file.write_all(buf.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Append `<timestamp> - <message>`.
    pub fn append_event(&self, message: &str) -> Result<()> {
        self.append_line(&format!("{} - {}", line_timestamp(Local::now()), message))
    }

    /// Lines containing `needle`, or none if the file does not exist.
    pub fn lines_containing(&self, needle: &str) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read log file: {}", self.path.display()))?;
        Ok(content
            .lines()
            .filter(|l| l.contains(needle))
            .map(str::to_string)
            .collect())
    }
}
