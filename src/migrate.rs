use anyhow::Result;
use sqlx::SqlitePool;

/// Create the `images` collection and its indexes. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS images (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL,
            prefix TEXT NOT NULL,
            number INTEGER NOT NULL,
            folder TEXT NOT NULL,
            url TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per code.
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_images_code ON images(code)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_number ON images(number)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_prefix ON images(prefix)")
        .execute(pool)
        .await?;

    Ok(())
}
