//! Google Translate speech endpoint, the same one the `gTTS` package uses.

use super::SpeechSynthesizer;
use crate::core::error::StoryError;
use crate::utils::text::wrap_text;
use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use url::Url;

const TRANSLATE_TTS_URL: &str = "https://translate.google.com/translate_tts";

/// The endpoint rejects long queries; text is sent in word-aligned chunks.
const MAX_CHUNK_CHARS: usize = 100;

pub struct GttsClient {
    language: String,
    client: reqwest::Client,
}

impl GttsClient {
    pub fn new(language: String) -> Self {
        Self {
            language,
            client: reqwest::Client::new(),
        }
    }

    fn chunk_url(&self, chunk: &str, index: usize, total: usize) -> Result<Url> {
        let idx = index.to_string();
        let total = total.to_string();
        let textlen = chunk.chars().count().to_string();
        Ok(Url::parse_with_params(
            TRANSLATE_TTS_URL,
            &[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", self.language.as_str()),
                ("q", chunk),
                ("idx", idx.as_str()),
                ("total", total.as_str()),
                ("textlen", textlen.as_str()),
            ],
        )?)
    }
}

#[async_trait]
impl SpeechSynthesizer for GttsClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let chunks = wrap_text(text, MAX_CHUNK_CHARS);
        let mut audio = Vec::new();

        // MP3 frames concatenate without re-encoding.
        for (index, chunk) in chunks.iter().enumerate() {
            let url = self.chunk_url(chunk, index, chunks.len())?;
            debug!("gTTS request {}/{}", index + 1, chunks.len());
            let resp = self
                .client
                .get(url)
                .header("User-Agent", "Mozilla/5.0")
                .send()
                .await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(StoryError::backend("gTTS", format!("{}: {}", status, body)).into());
            }
            audio.extend_from_slice(&resp.bytes().await?);
        }

        Ok(audio)
    }
}
