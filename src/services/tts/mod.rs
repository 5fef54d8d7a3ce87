use crate::core::config::AudioConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::info;

pub mod edge;
pub mod gtts;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns MP3 bytes narrating `text`.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Drops apostrophes before narration.
pub fn sanitize_for_speech(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\'' | '\u{2019}'))
        .collect()
}

pub fn create_tts_client(config: &AudioConfig) -> Result<Box<dyn SpeechSynthesizer>> {
    info!("Initializing TTS client for provider: {}", config.provider);
    match config.provider.as_str() {
        "edge-tts" => Ok(Box::new(edge::EdgeTtsClient::new(
            config.edge_tts.clone(),
            config.language.clone(),
        ))),
        "gtts" => Ok(Box::new(gtts::GttsClient::new(config.language.clone()))),
        _ => Err(anyhow!("Unknown TTS provider: {}", config.provider)),
    }
}
