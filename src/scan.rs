//! Code scanner: probe a code range for validity without keeping the bytes.
//!
//! Valid codes are appended to the output log one batch at a time, so an
//! interrupted scan keeps everything up to the last finished batch.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::time::Duration;

use crate::config::{Config, ScanConfig};
use crate::remote::RenderClient;
use crate::runlog::RunLog;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub checked: u64,
    pub valid: u64,
}

/// Probe one code. Any error counts as invalid.
pub async fn check_code(client: &RenderClient, code: &str, delay: Duration) -> bool {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    match client.get(code).await {
        Ok(body) => !client.has_invalid_marker(&body),
        Err(e) => {
            tracing::debug!(code, error = %e, "probe failed");
            false
        }
    }
}

/// Inclusive `[start, end]` split into consecutive batches of at most `size`.
pub fn batches(start: u64, end: u64, size: u64) -> Vec<(u64, u64)> {
    let size = size.max(1);
    let mut out = Vec::new();
    let mut current = start;
    while current <= end {
        let last = current.saturating_add(size - 1).min(end);
        out.push((current, last));
        if last == u64::MAX {
            break;
        }
        current = last + 1;
    }
    out
}

pub async fn scan_range(
    client: &RenderClient,
    scan: &ScanConfig,
    prefix: char,
    start: u64,
    end: u64,
    log: &RunLog,
) -> Result<ScanSummary> {
    let delay = Duration::from_millis(scan.delay_ms);
    let mut summary = ScanSummary::default();

    for (first, last) in batches(start, end, scan.batch_size) {
        let valid: Vec<String> = stream::iter(first..=last)
            .map(|number| {
                let code = format!("{}{}", prefix, number);
                async move {
                    let ok = check_code(client, &code, delay).await;
                    ok.then_some(code)
                }
            })
            .buffered(scan.concurrency.max(1))
            .filter_map(|code| async move { code })
            .collect()
            .await;

        summary.checked += last - first + 1;
        summary.valid += valid.len() as u64;

        log.append_lines(valid.iter().map(String::as_str))?;
        tracing::info!(first, last, valid = valid.len(), "batch scanned");
    }

    Ok(summary)
}

pub async fn run_scan(
    config: &Config,
    prefix: char,
    start: u64,
    end: u64,
    output: &Path,
) -> Result<()> {
    let client = RenderClient::new(&config.remote)?;
    let log = RunLog::new(output);

    let summary = scan_range(&client, &config.scan, prefix, start, end, &log).await?;
    log.append_event("Scan completed")?;

    println!("scan {}{}..{}{}", prefix, start, prefix, end);
    println!("  checked: {}", summary.checked);
    println!("  valid: {}", summary.valid);
    println!("  log: {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_cover_range() {
        assert_eq!(
            batches(1, 250, 100),
            vec![(1, 100), (101, 200), (201, 250)]
        );
        assert_eq!(batches(5, 5, 100), vec![(5, 5)]);
    }

    #[test]
    fn empty_range_has_no_batches() {
        assert!(batches(10, 9, 100).is_empty());
    }

    #[test]
    fn batches_stop_at_max() {
        let b = batches(u64::MAX - 1, u64::MAX, 10);
        assert_eq!(b, vec![(u64::MAX - 1, u64::MAX)]);
    }
}
