use super::SpeechSynthesizer;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

const OUTPUT_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct EdgeTtsConfig {
    /// Voice short name, e.g. `en-US-AnaNeural`. Chosen from the language when unset.
    pub voice: Option<String>,
    /// Speaking rate as an SSML prosody value, e.g. `-10%`.
    pub rate: Option<String>,
}

fn default_voice_for(language: &str) -> &'static str {
    match language {
        lang if lang.starts_with("zh") => "zh-TW-HsiaoChenNeural",
        lang if lang.starts_with("ja") => "ja-JP-NanamiNeural",
        lang if lang.starts_with("de") => "de-DE-KatjaNeural",
        lang if lang.starts_with("fr") => "fr-FR-DeniseNeural",
        lang if lang.starts_with("es") => "es-ES-ElviraNeural",
        _ => "en-US-AnaNeural",
    }
}

/// Locale prefix of a voice short name: `zh-TW-HsiaoChenNeural` gives `zh-TW`.
fn voice_locale(voice: &str) -> &str {
    let mut parts = voice.splitn(3, '-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(lang), Some(region), Some(_)) => &voice[..lang.len() + 1 + region.len()],
        _ => "en-US",
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// --- Edge TTS Client ---

pub struct EdgeTtsClient {
    config: EdgeTtsConfig,
    language: String,
}

impl EdgeTtsClient {
    pub fn new(config: EdgeTtsConfig, language: String) -> Self {
        Self { config, language }
    }

    fn voice(&self) -> String {
        self.config
            .voice
            .clone()
            .unwrap_or_else(|| default_voice_for(&self.language).to_string())
    }

    fn build_ssml(&self, text: &str) -> String {
        let text = escape_xml(text);
        let body = match &self.config.rate {
            Some(rate) => format!("<prosody rate='{}'>{}</prosody>", rate, text),
            None => text,
        };
        let voice = self.voice();
        format!(
            "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='{}'><voice name='{}'>{}</voice></speak>",
            voice_locale(&voice),
            voice,
            body
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for EdgeTtsClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let ssml = self.build_ssml(text);
        debug!("Edge TTS SSML: {}", ssml);

        tokio::task::spawn_blocking(move || {
            edge_tts::request_audio(&ssml, OUTPUT_FORMAT)
                .map_err(|e| anyhow!("Edge TTS crate error: {:?}", e))
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssml_uses_configured_voice_and_rate() {
        let client = EdgeTtsClient::new(
            EdgeTtsConfig {
                voice: Some("en-GB-SoniaNeural".to_string()),
                rate: Some("-10%".to_string()),
            },
            "en".to_string(),
        );
        let ssml = client.build_ssml("Annie & <big> day");
        assert!(ssml.contains("<voice name='en-GB-SoniaNeural'>"));
        assert!(ssml.contains("xml:lang='en-GB'"));
        assert!(ssml.contains("<prosody rate='-10%'>Annie &amp; &lt;big&gt; day</prosody>"));
    }

    #[test]
    fn test_voice_falls_back_to_language_default() {
        let client = EdgeTtsClient::new(EdgeTtsConfig::default(), "zh-TW".to_string());
        assert_eq!(client.voice(), "zh-TW-HsiaoChenNeural");
        let client = EdgeTtsClient::new(EdgeTtsConfig::default(), "en".to_string());
        assert_eq!(client.voice(), "en-US-AnaNeural");
    }

    #[test]
    fn test_ssml_language_follows_voice() {
        let client = EdgeTtsClient::new(EdgeTtsConfig::default(), "ja".to_string());
        let ssml = client.build_ssml("こんにちは");
        assert!(ssml.contains("xml:lang='ja-JP'"));
        assert!(ssml.contains("<voice name='ja-JP-NanamiNeural'>"));
    }

    #[test]
    fn test_voice_locale() {
        assert_eq!(voice_locale("zh-TW-HsiaoChenNeural"), "zh-TW");
        assert_eq!(voice_locale("en-US-AnaNeural"), "en-US");
        assert_eq!(voice_locale("custom"), "en-US");
    }
}
