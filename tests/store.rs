use sqlx::SqlitePool;
use tempfile::TempDir;

use image_harvest::load::{find_image, load_lines};
use image_harvest::{db, migrate, stats};

async fn open_store(tmp: &TempDir) -> SqlitePool {
    let url = format!("sqlite:{}", tmp.path().join("images.db").display());
    let pool = db::connect(&url).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    pool
}

async fn count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM images")
        .fetch_one(pool)
        .await
        .unwrap()
}

const FIRST: &str = "\
https://raw.example/acme/pics/refs/heads/s_1_to_9/images_s_20240101_1_to_9/s1.jpg
https://raw.example/acme/pics/refs/heads/s_1_to_9/images_s_20240101_1_to_9/s2.jpg
";

#[tokio::test]
async fn later_sighting_updates_url_and_keeps_created_at() {
    let tmp = TempDir::new().unwrap();
    let pool = open_store(&tmp).await;

    let report = load_lines(&pool, FIRST.as_bytes(), 1000, 1_000).await.unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.modified, 0);

    let moved = "https://raw.example/acme/pics/refs/heads/s_1_to_5/s1.jpg\n";
    let report = load_lines(&pool, moved.as_bytes(), 1000, 2_000).await.unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.modified, 1);

    let s1 = find_image(&pool, "s1").await.unwrap().unwrap();
    assert_eq!(s1.url, "https://raw.example/acme/pics/refs/heads/s_1_to_5/s1.jpg");
    assert_eq!(s1.folder, "/acme/pics/refs/heads/s_1_to_5");
    assert_eq!(s1.created_at, 1_000);
    assert_eq!(s1.updated_at, 2_000);

    let s2 = find_image(&pool, "s2").await.unwrap().unwrap();
    assert_eq!(s2.updated_at, 1_000);
    assert!(find_image(&pool, "s3").await.unwrap().is_none());

    assert_eq!(count(&pool).await, 2);
    pool.close().await;
}

#[tokio::test]
async fn duplicate_codes_within_one_file_keep_last_url() {
    let tmp = TempDir::new().unwrap();
    let pool = open_store(&tmp).await;

    let input = "https://h/a/s7.jpg\nhttps://h/b/s7.jpg\n";
    let report = load_lines(&pool, input.as_bytes(), 1000, 5).await.unwrap();
    assert_eq!(report.urls, 2);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.modified, 1);

    let s7 = find_image(&pool, "s7").await.unwrap().unwrap();
    assert_eq!(s7.url, "https://h/b/s7.jpg");
    assert_eq!(count(&pool).await, 1);
    pool.close().await;
}

#[tokio::test]
async fn flushes_in_batches() {
    let tmp = TempDir::new().unwrap();
    let pool = open_store(&tmp).await;

    let input: String = (1..=5).map(|n| format!("https://h/x/a{}.jpg\n", n)).collect();
    let report = load_lines(&pool, input.as_bytes(), 2, 1).await.unwrap();
    assert_eq!(report.urls, 5);
    assert_eq!(report.batches, 3);
    assert_eq!(report.inserted, 5);
    pool.close().await;
}

#[tokio::test]
async fn malformed_line_keeps_earlier_batches() {
    let tmp = TempDir::new().unwrap();
    let pool = open_store(&tmp).await;

    let input = "https://h/x/s1.jpg\nhttps://h/x/s2.jpg\nhttps://h/x/s3.jpg\nhttps://h/x/readme.md\n";
    let err = load_lines(&pool, input.as_bytes(), 2, 1).await.unwrap_err();
    assert!(err.to_string().contains("line 4"), "{}", err);

    // First batch committed; the pending s3 was never flushed.
    assert_eq!(count(&pool).await, 2);
    assert!(find_image(&pool, "s3").await.unwrap().is_none());
    pool.close().await;
}

#[tokio::test]
async fn stats_group_by_prefix() {
    let tmp = TempDir::new().unwrap();
    let pool = open_store(&tmp).await;

    let input = "https://h/x/s10.jpg\nhttps://h/x/s2.jpg\nhttps://h/x/a5.jpg\n";
    load_lines(&pool, input.as_bytes(), 1000, 42).await.unwrap();

    let summary = stats::collect_stats(&pool).await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.last_updated, Some(42));
    let prefixes: Vec<(&str, i64, i64, i64)> = summary
        .prefixes
        .iter()
        .map(|p| (p.prefix.as_str(), p.count, p.min_number, p.max_number))
        .collect();
    assert_eq!(prefixes, vec![("a", 1, 5, 5), ("s", 2, 2, 10)]);
    pool.close().await;
}
