use crate::core::config::resolve_secret;
use crate::core::error::StoryError;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine;
use log::debug;
use serde::{Deserialize, Serialize};

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // "nvidia" or "stability"
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    pub invoke_url: Option<String>,
    #[serde(default = "default_cfg_scale")]
    pub cfg_scale: f32,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    /// `None` draws a fresh seed per image.
    #[serde(default = "default_seed")]
    pub seed: Option<u64>,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default)]
    pub negative_prompt: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            api_key_env: default_api_key_env(),
            invoke_url: None,
            cfg_scale: default_cfg_scale(),
            aspect_ratio: default_aspect_ratio(),
            seed: default_seed(),
            steps: default_steps(),
            negative_prompt: String::new(),
        }
    }
}

fn default_provider() -> String {
    "nvidia".to_string()
}
fn default_api_key_env() -> String {
    "NVIDIA_API_KEY".to_string()
}
fn default_cfg_scale() -> f32 {
    5.0
}
fn default_aspect_ratio() -> String {
    "16:9".to_string()
}
fn default_seed() -> Option<u64> {
    Some(0)
}
fn default_steps() -> u32 {
    50
}

const NVIDIA_SD3_URL: &str = "https://ai.api.nvidia.com/v1/genai/stabilityai/stable-diffusion-3-medium";
const STABILITY_SD3_URL: &str = "https://api.stability.ai/v2beta/stable-image/generate/sd3";

// --- Credentials ---

#[derive(Clone)]
pub struct ImageCredentials {
    pub api_key: String,
}

impl ImageCredentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Configured key, else the environment variable named in the config.
    pub fn from_config(config: &ImageConfig) -> Result<Self> {
        Ok(Self::new(resolve_secret(
            config.api_key.as_deref(),
            &config.api_key_env,
        )?))
    }
}

impl std::fmt::Debug for ImageCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCredentials")
            .field("api_key", &"***")
            .finish()
    }
}

// --- Client ---

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Returns encoded image bytes (JPEG) for `prompt`.
    async fn synthesize_image(&self, prompt: &str, credentials: &ImageCredentials) -> Result<Vec<u8>>;
}

pub fn create_image_client(config: &ImageConfig) -> Result<Box<dyn ImageGenerator>> {
    match config.provider.as_str() {
        "nvidia" => Ok(Box::new(NvidiaImageClient::new(config.clone()))),
        "stability" => Ok(Box::new(StabilityImageClient::new(config.clone()))),
        _ => Err(anyhow!("Unknown image provider: {}", config.provider)),
    }
}

// --- NVIDIA NIM (Stable Diffusion 3) ---

pub struct NvidiaImageClient {
    config: ImageConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct NvidiaImageRequest<'a> {
    prompt: &'a str,
    cfg_scale: f32,
    aspect_ratio: &'a str,
    seed: u64,
    steps: u32,
    negative_prompt: &'a str,
}

#[derive(Deserialize)]
struct NvidiaImageResponse {
    image: String,
}

impl NvidiaImageClient {
    pub fn new(config: ImageConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn request<'a>(&'a self, prompt: &'a str) -> NvidiaImageRequest<'a> {
        NvidiaImageRequest {
            prompt,
            cfg_scale: self.config.cfg_scale,
            aspect_ratio: &self.config.aspect_ratio,
            seed: self.config.seed.unwrap_or_else(rand::random),
            steps: self.config.steps,
            negative_prompt: &self.config.negative_prompt,
        }
    }
}

fn decode_image_response(body: &str) -> Result<Vec<u8>> {
    let response: NvidiaImageResponse = serde_json::from_str(body)
        .map_err(|e| StoryError::parse("image response", e.to_string()))?;
    base64::engine::general_purpose::STANDARD
        .decode(response.image.trim())
        .map_err(|e| StoryError::parse("image payload", e.to_string()).into())
}

#[async_trait]
impl ImageGenerator for NvidiaImageClient {
    async fn synthesize_image(&self, prompt: &str, credentials: &ImageCredentials) -> Result<Vec<u8>> {
        let url = self.config.invoke_url.as_deref().unwrap_or(NVIDIA_SD3_URL);
        debug!("Image prompt: {}", prompt);

        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", credentials.api_key))
            .header("Accept", "application/json")
            .json(&self.request(prompt))
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(StoryError::backend("NVIDIA image generation", error_text).into());
        }

        let body = resp.text().await?;
        decode_image_response(&body)
    }
}

// --- Stability AI ---

pub struct StabilityImageClient {
    config: ImageConfig,
    client: reqwest::Client,
}

impl StabilityImageClient {
    pub fn new(config: ImageConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ImageGenerator for StabilityImageClient {
    async fn synthesize_image(&self, prompt: &str, credentials: &ImageCredentials) -> Result<Vec<u8>> {
        let url = self.config.invoke_url.as_deref().unwrap_or(STABILITY_SD3_URL);
        let mut form = reqwest::multipart::Form::new()
            .text("prompt", prompt.to_string())
            .text("output_format", "jpeg")
            .text("aspect_ratio", self.config.aspect_ratio.clone());
        if let Some(seed) = self.config.seed {
            form = form.text("seed", seed.to_string());
        }
        if !self.config.negative_prompt.is_empty() {
            form = form.text("negative_prompt", self.config.negative_prompt.clone());
        }

        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", credentials.api_key))
            .header("Accept", "image/*")
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(StoryError::backend("Stability AI", error_text).into());
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_image_response() -> Result<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"\xFF\xD8\xFFjpeg");
        let body = format!("{{\"image\": \"{}\"}}", encoded);
        assert_eq!(decode_image_response(&body)?, b"\xFF\xD8\xFFjpeg".to_vec());
        Ok(())
    }

    #[test]
    fn test_decode_image_response_rejects_bad_payload() {
        let err = decode_image_response("{\"image\": \"%%%\"}").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoryError>(),
            Some(StoryError::Parse { .. })
        ));
        assert!(decode_image_response("{\"detail\": \"rate limited\"}").is_err());
    }

    #[test]
    fn test_request_uses_configured_generation_settings() {
        let client = NvidiaImageClient::new(ImageConfig::default());
        let body = serde_json::to_value(client.request("a crocodile")).unwrap();
        assert_eq!(body["prompt"], "a crocodile");
        assert_eq!(body["cfg_scale"], 5.0);
        assert_eq!(body["aspect_ratio"], "16:9");
        assert_eq!(body["seed"], 0);
        assert_eq!(body["steps"], 50);
    }

    #[test]
    fn test_credentials_debug_hides_key() {
        let creds = ImageCredentials::new("nvapi-secret");
        assert!(!format!("{:?}", creds).contains("nvapi-secret"));
    }

    #[test]
    fn test_create_image_client_providers() {
        assert!(create_image_client(&ImageConfig::default()).is_ok());
        let unknown = ImageConfig {
            provider: "dalle".to_string(),
            ..ImageConfig::default()
        };
        assert!(create_image_client(&unknown).is_err());
    }
}
