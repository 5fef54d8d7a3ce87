use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::services::image::ImageConfig;
use crate::services::llm::LlmConfig;
use crate::services::pdf::PdfStyle;
use crate::services::tts::edge::EdgeTtsConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Wall-clock budget for a whole run.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub layout: ArtifactLayout,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// File and directory names of the checkpoint set, relative to `data_root`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ArtifactLayout {
    pub raw_story_file: String,
    pub story_json_file: String,
    pub story_pdf_file: String,
    pub title_prompt_file: String,
    pub image_dir: String,
    pub audio_dir: String,
    pub video_dir: String,
    pub video_file: String,
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self {
            raw_story_file: "raw_story.txt".to_string(),
            story_json_file: "story.json".to_string(),
            story_pdf_file: "story.pdf".to_string(),
            title_prompt_file: "title_prompt.txt".to_string(),
            image_dir: "image".to_string(),
            audio_dir: "audio".to_string(),
            video_dir: "video".to_string(),
            video_file: "story_video.mp4".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SafetyConfig {
    /// Overrides the built-in guardrail policy sent as the system prompt.
    pub policy: Option<String>,
    /// Terms that must not survive the rewrite (case-insensitive).
    #[serde(default)]
    pub blocked_terms: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_tts_provider")]
    pub provider: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(rename = "edge-tts", default)]
    pub edge_tts: EdgeTtsConfig,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            language: default_language(),
            edge_tts: EdgeTtsConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    #[serde(default = "default_pdftoppm_bin")]
    pub pdftoppm_bin: String,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub pdf: PdfStyle,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            pdftoppm_bin: default_pdftoppm_bin(),
            fps: default_fps(),
            pdf: PdfStyle::default(),
        }
    }
}

/// Fixed-delay retry. One attempt means no retry.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub delay_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_seconds: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RetryConfig {
    #[serde(default)]
    pub structure: RetryPolicy,
    #[serde(default)]
    pub prompts: RetryPolicy,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("./data")
}
fn default_timeout_seconds() -> u64 {
    600
}
fn default_tts_provider() -> String {
    "edge-tts".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}
fn default_pdftoppm_bin() -> String {
    "pdftoppm".to_string()
}
fn default_fps() -> u32 {
    24
}
fn default_max_attempts() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            timeout_seconds: default_timeout_seconds(),
            layout: ArtifactLayout::default(),
            llm: LlmConfig::default(),
            safety: SafetyConfig::default(),
            image: ImageConfig::default(),
            audio: AudioConfig::default(),
            media: MediaConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{:?} not found. Please create one.", path);
        }

        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {:?}", path))
    }

    /// Loads `path` when present, otherwise falls back to defaults so that a
    /// `.env` with `NVIDIA_API_KEY` is enough to run.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            log::info!("{:?} not found, using default configuration", path);
            Ok(Self::default())
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }
}

/// Uses the configured secret when set, otherwise the environment variable.
pub fn resolve_secret(configured: Option<&str>, env_var: &str) -> Result<String> {
    match configured {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => std::env::var(env_var)
            .with_context(|| format!("No API key configured and {} is not set", env_var)),
    }
}
