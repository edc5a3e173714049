//! Client for the page-render endpoint.
//!
//! `GET <render_url>?id=<code>` answers either with the image bytes or with
//! an HTML page carrying the invalid-code marker.

use reqwest::Url;

use crate::config::RemoteConfig;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("invalid render URL '{0}'")]
    Url(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("render endpoint returned {0}")]
    Status(u16),
}

pub struct RenderClient {
    client: reqwest::Client,
    base: Url,
    marker: String,
}

impl RenderClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, RenderError> {
        let base = Url::parse(&config.render_url)
            .map_err(|_| RenderError::Url(config.render_url.clone()))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            base,
            marker: config.invalid_marker.clone(),
        })
    }

    pub fn code_url(&self, code: &str) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut().append_pair("id", code);
        url
    }

    /// Body of a successful response. Non-2xx statuses are errors.
    pub async fn get(&self, code: &str) -> Result<Vec<u8>, RenderError> {
        let response = self.client.get(self.code_url(code)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Whether `body`, read as lossy UTF-8, carries the invalid-code marker.
    pub fn has_invalid_marker(&self, body: &[u8]) -> bool {
        String::from_utf8_lossy(body).contains(&self.marker)
    }
}
