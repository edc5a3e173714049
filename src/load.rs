//! Metadata loader: upsert image URLs from a flat log into the store.
//!
//! Each non-empty line is one raw-content URL. The file name gives the code,
//! prefix, and id; the rest of the URL path is the folder. Rows are keyed by
//! code: the first sighting inserts, later ones update every field except
//! `created_at`.
//!
//! Operations are flushed in batches, one transaction each. A failing batch
//! aborts the run; batches flushed before it stay committed, and a re-run is
//! safe because the upsert is idempotent.

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Url;
use sqlx::SqlitePool;
use std::io::BufRead;
use std::path::Path;

use crate::db;
use crate::migrate;
use crate::models::{ImageCode, ImageMetadata, ImageRecord};

/// Extract metadata from one image URL.
pub fn parse_image_url(url: &str) -> Result<ImageMetadata> {
    let parsed = Url::parse(url).with_context(|| format!("invalid URL '{}'", url))?;
    let path = parsed.path();
    let (folder, file_name) = path
        .rsplit_once('/')
        .ok_or_else(|| anyhow!("URL has no file name: {}", url))?;

    let code = file_name.strip_suffix(".jpg").unwrap_or(file_name);
    let parsed_code: ImageCode = code.parse()?;

    Ok(ImageMetadata {
        code: code.to_string(),
        prefix: parsed_code.prefix.to_string(),
        number: i64::try_from(parsed_code.number)
            .map_err(|_| anyhow!("image id out of range in {}", url))?,
        folder: folder.to_string(),
        url: url.to_string(),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub inserted: u64,
    pub modified: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub urls: u64,
    pub batches: u64,
    pub inserted: u64,
    pub modified: u64,
}

/// Upsert one batch in a single transaction.
pub async fn flush_batch(
    pool: &SqlitePool,
    batch: &[ImageMetadata],
    now: i64,
) -> Result<BatchResult> {
    let mut tx = pool.begin().await?;
    let mut result = BatchResult::default();

    for meta in batch {
        let existed: Option<i64> = sqlx::query_scalar("SELECT id FROM images WHERE code = ?")
            .bind(&meta.code)
            .fetch_optional(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO images (code, prefix, number, folder, url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(code) DO UPDATE SET
                prefix = excluded.prefix,
                number = excluded.number,
                folder = excluded.folder,
                url = excluded.url,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&meta.code)
        .bind(&meta.prefix)
        .bind(meta.number)
        .bind(&meta.folder)
        .bind(&meta.url)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if existed.is_some() {
            result.modified += 1;
        } else {
            result.inserted += 1;
        }
    }

    tx.commit().await?;
    Ok(result)
}

/// The stored row for `code`, if any.
pub async fn find_image(pool: &SqlitePool, code: &str) -> Result<Option<ImageRecord>> {
    let record = sqlx::query_as::<_, ImageRecord>(
        "SELECT code, prefix, number, folder, url, created_at, updated_at FROM images WHERE code = ?",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

/// Stream `reader` line by line, flushing every `batch_size` URLs.
pub async fn load_lines<R: BufRead>(
    pool: &SqlitePool,
    reader: R,
    batch_size: usize,
    now: i64,
) -> Result<LoadReport> {
    let batch_size = batch_size.max(1);
    let mut report = LoadReport::default();
    let mut pending: Vec<ImageMetadata> = Vec::with_capacity(batch_size);

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let url = line.trim();
        if url.is_empty() {
            continue;
        }

        let meta = parse_image_url(url).with_context(|| format!("line {}", idx + 1))?;
        pending.push(meta);
        report.urls += 1;

        if pending.len() >= batch_size {
            flush(pool, &mut pending, now, &mut report).await?;
        }
    }

    if !pending.is_empty() {
        flush(pool, &mut pending, now, &mut report).await?;
    }

    Ok(report)
}

async fn flush(
    pool: &SqlitePool,
    pending: &mut Vec<ImageMetadata>,
    now: i64,
    report: &mut LoadReport,
) -> Result<()> {
    let batch_no = report.batches + 1;
    let result = flush_batch(pool, pending, now)
        .await
        .with_context(|| format!("bulk write of batch {} failed", batch_no))?;

    println!(
        "Processed batch: {} inserted, {} modified",
        result.inserted, result.modified
    );
    report.batches = batch_no;
    report.inserted += result.inserted;
    report.modified += result.modified;
    pending.clear();
    Ok(())
}

/// Entry point for `harvest load`.
pub async fn run_load(store_url: &str, log_file: &Path, batch_size: usize) -> Result<()> {
    if !log_file.exists() {
        bail!("Log file not found: {}", log_file.display());
    }
    let file = std::fs::File::open(log_file)
        .with_context(|| format!("Failed to open log file: {}", log_file.display()))?;

    let pool = db::connect(store_url).await?;
    migrate::run_migrations(&pool).await?;

    let now = chrono::Utc::now().timestamp();
    let result = load_lines(&pool, std::io::BufReader::new(file), batch_size, now).await;
    pool.close().await;
    let report = result?;

    println!("load {}", log_file.display());
    println!("  urls: {}", report.urls);
    println!("  batches: {}", report.batches);
    println!("  inserted: {}", report.inserted);
    println!("  modified: {}", report.modified);
    println!("ok");
    Ok(())
}
