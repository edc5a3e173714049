//! Store statistics.
//!
//! Quick summary of what the loader has written: record count, per-prefix
//! breakdown with id bounds, and the last update. Used by `harvest stats`
//! to confirm a load landed.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::migrate;

/// Per-prefix record counts and id bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixStats {
    pub prefix: String,
    pub count: i64,
    pub min_number: i64,
    pub max_number: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total: i64,
    pub last_updated: Option<i64>,
    pub prefixes: Vec<PrefixStats>,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<StoreStats> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
        .fetch_one(pool)
        .await?;

    let last_updated: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM images")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT prefix, COUNT(*) AS count, MIN(number) AS min_number, MAX(number) AS max_number
        FROM images
        GROUP BY prefix
        ORDER BY prefix
        "#,
    )
    .fetch_all(pool)
    .await?;

    let prefixes = rows
        .iter()
        .map(|row| PrefixStats {
            prefix: row.get("prefix"),
            count: row.get("count"),
            min_number: row.get("min_number"),
            max_number: row.get("max_number"),
        })
        .collect();

    Ok(StoreStats {
        total,
        last_updated,
        prefixes,
    })
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(store_url: &str) -> Result<()> {
    let pool = db::connect(store_url).await?;
    migrate::run_migrations(&pool).await?;
    let stats = collect_stats(&pool).await;
    pool.close().await;
    let stats = stats?;

    println!("Image Store Stats");
    println!("=================");
    println!();
    println!("  Records:      {}", stats.total);
    println!(
        "  Last update:  {}",
        stats
            .last_updated
            .map(format_ts_iso)
            .unwrap_or_else(|| "never".to_string())
    );

    if !stats.prefixes.is_empty() {
        println!();
        println!("  By prefix:");
        println!(
            "  {:<8} {:>10} {:>12} {:>12}",
            "PREFIX", "IMAGES", "LOWEST", "HIGHEST"
        );
        println!("  {}", "-".repeat(45));
        for p in &stats.prefixes {
            println!(
                "  {:<8} {:>10} {:>12} {:>12}",
                p.prefix, p.count, p.min_number, p.max_number
            );
        }
    }

    println!();
    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
