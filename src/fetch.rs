//! Fetcher: download a code range from the render endpoint.
//!
//! Each code is fetched once. A payload is kept only when it decodes as an
//! image and does not carry the invalid-code marker. Failures are logged and
//! counted, never retried.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::remote::RenderClient;

/// What happened to one code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Saved(PathBuf),
    NotAnImage,
    InvalidCode,
    Failed(String),
}

impl FetchOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, FetchOutcome::Saved(_))
    }
}

/// Full decode of `bytes`; any format the `image` crate understands.
pub fn is_valid_image(bytes: &[u8]) -> bool {
    image::load_from_memory(bytes).is_ok()
}

/// Download `<prefix><start>` through `<prefix><end>` into `out_dir`.
///
/// Results are returned in code order once every download has finished.
pub async fn fetch_range(
    client: &RenderClient,
    prefix: char,
    start: u64,
    end: u64,
    out_dir: &Path,
    concurrency: usize,
) -> Vec<(String, FetchOutcome)> {
    stream::iter(start..=end)
        .map(|number| {
            let code = format!("{}{}", prefix, number);
            async move {
                let outcome = fetch_one(client, &code, out_dir).await;
                (code, outcome)
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

async fn fetch_one(client: &RenderClient, code: &str, out_dir: &Path) -> FetchOutcome {
    let url = client.code_url(code);

    let payload = match client.get(code).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(%url, error = %e, "download failed");
            return FetchOutcome::Failed(e.to_string());
        }
    };

    let (payload, decodable) = match tokio::task::spawn_blocking(move || {
        let ok = is_valid_image(&payload);
        (payload, ok)
    })
    .await
    {
        Ok(r) => r,
        Err(e) => return FetchOutcome::Failed(format!("image check panicked: {}", e)),
    };

    if !decodable {
        tracing::info!(%url, "invalid image content");
        return FetchOutcome::NotAnImage;
    }

    if client.has_invalid_marker(&payload) {
        tracing::info!(%url, "invalid image code");
        return FetchOutcome::InvalidCode;
    }

    let path = out_dir.join(format!("{}.jpg", code));
    match tokio::fs::write(&path, &payload).await {
        Ok(()) => {
            tracing::info!(path = %path.display(), "downloaded");
            FetchOutcome::Saved(path)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "write failed");
            FetchOutcome::Failed(e.to_string())
        }
    }
}

pub async fn run_fetch(
    config: &Config,
    prefix: char,
    start: u64,
    end: u64,
    out_dir: &Path,
) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output folder: {}", out_dir.display()))?;

    let client = RenderClient::new(&config.remote)?;
    let results = fetch_range(
        &client,
        prefix,
        start,
        end,
        out_dir,
        config.fetch.concurrency,
    )
    .await;

    let saved = results.iter().filter(|(_, o)| o.is_saved()).count();
    println!(
        "Downloaded {} images out of {} attempts",
        saved,
        results.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn png_is_valid_image() {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([10, 20, 30]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        assert!(is_valid_image(buf.get_ref()));
    }

    #[test]
    fn html_is_not_an_image() {
        assert!(!is_valid_image(b"<html>nope</html>"));
        assert!(!is_valid_image(&[]));
    }

    #[test]
    fn jpeg_header_alone_is_not_an_image() {
        let img = image::RgbImage::from_pixel(16, 16, image::Rgb([200, 0, 0]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Jpeg).unwrap();
        let bytes = buf.into_inner();
        assert!(is_valid_image(&bytes));
        assert!(!is_valid_image(&bytes[..20]));
    }
}
