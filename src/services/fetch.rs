use crate::core::error::StoryError;
use crate::utils::text::collapse_whitespace;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;

/// Line width handed to the HTML renderer; long enough that paragraphs are
/// not broken before whitespace is collapsed.
const RENDER_WIDTH: usize = 10_000;

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Downloads `url` and returns its readable text.
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders HTML to plain text on a single whitespace-normalised line.
pub fn html_to_text(html: &[u8]) -> Result<String> {
    let rendered = html2text::from_read(html, RENDER_WIDTH)
        .map_err(|e| StoryError::parse("HTML page", e.to_string()))?;
    Ok(collapse_whitespace(&rendered))
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        info!("Fetching {}", url);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoryError::backend(url, format!("{}: {}", status, body)).into());
        }

        let bytes = resp.bytes().await?;
        html_to_text(&bytes)
    }
}
