use anyhow::{bail, Context, Result};
use reqwest::Url;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Normalize a store connection string to an sqlx SQLite URL.
///
/// `sqlite:` URLs pass through and bare paths get the prefix. Any other
/// scheme (`mongodb://...`) is rejected.
fn store_url(url: &str) -> Result<String> {
    match Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "sqlite" => Ok(url.to_string()),
        // One-letter schemes are Windows drive letters.
        Ok(parsed) if parsed.scheme().len() > 1 => bail!(
            "Unsupported store connection string '{}': only sqlite:<path> URLs or plain file paths are supported",
            url
        ),
        _ => Ok(format!("sqlite:{}", url)),
    }
}

/// Open the image store.
///
/// `url` is an sqlx SQLite connection string (`sqlite:data/images.db`); a
/// bare path is accepted as well.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let url = store_url(url)?;

    let options = SqliteConnectOptions::from_str(&url)
        .with_context(|| format!("Invalid store connection string: {}", url))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    // Ensure parent directory exists
    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to store: {}", url))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_sqlite_urls_and_paths() {
        assert_eq!(store_url("sqlite:data/images.db").unwrap(), "sqlite:data/images.db");
        assert_eq!(store_url("sqlite://data/images.db").unwrap(), "sqlite://data/images.db");
        assert_eq!(store_url("data/images.db").unwrap(), "sqlite:data/images.db");
        assert_eq!(store_url("/var/lib/images.db").unwrap(), "sqlite:/var/lib/images.db");
    }

    #[tokio::test]
    async fn rejects_document_store_urls() {
        let url = "mongodb://localhost:27017/fgo_database";

        let err = connect(url).await.unwrap_err();
        assert!(err.to_string().contains("only sqlite:"), "{}", err);
        assert!(store_url("postgres://localhost/db").is_err());
        assert!(!std::path::Path::new("mongodb:").exists());
    }
}
