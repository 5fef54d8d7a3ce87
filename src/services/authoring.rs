//! Text stages backed by the language model: summarizing the source,
//! rewriting it for children and structuring it into pages.

use crate::core::config::SafetyConfig;
use crate::core::error::StoryError;
use crate::core::story::Story;
use crate::services::llm::LlmClient;
use crate::services::prompts;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;

/// Characters of source text handed to the summarizer.
const MAX_CONTEXT_CHARS: usize = 24_000;

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, query: &str, texts: &[String]) -> Result<String>;
}

#[async_trait]
pub trait SafetyFilter: Send + Sync {
    async fn make_safe(&self, text: &str) -> Result<String>;
}

#[async_trait]
pub trait StoryStructurer: Send + Sync {
    async fn generate_structured_story(&self, text: &str) -> Result<Story>;
}

// --- Summarizer ---

pub struct LlmSummarizer {
    llm: Arc<dyn LlmClient>,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, query: &str, texts: &[String]) -> Result<String> {
        let mut budget = MAX_CONTEXT_CHARS;
        let mut context = Vec::with_capacity(texts.len());
        for text in texts {
            if budget == 0 {
                break;
            }
            let chunk: String = text.chars().take(budget).collect();
            budget -= chunk.chars().count();
            context.push(chunk);
        }
        let prompt = prompts::summarize_prompt(query, &context);
        debug!("Summarize prompt:\n{}", prompt);
        self.llm.complete(&prompt).await
    }
}

// --- Safety ---

pub struct LlmSafetyFilter {
    llm: Arc<dyn LlmClient>,
    config: SafetyConfig,
}

impl LlmSafetyFilter {
    pub fn new(llm: Arc<dyn LlmClient>, config: SafetyConfig) -> Self {
        Self { llm, config }
    }

    fn check(&self, rewritten: &str) -> Result<(), StoryError> {
        if rewritten.trim().is_empty() {
            return Err(StoryError::Unsafe("rewrite came back empty".to_string()));
        }
        let lowered = rewritten.to_lowercase();
        if let Some(term) = self
            .config
            .blocked_terms
            .iter()
            .find(|term| lowered.contains(&term.to_lowercase()))
        {
            return Err(StoryError::Unsafe(format!(
                "rewrite still contains blocked term '{}'",
                term
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SafetyFilter for LlmSafetyFilter {
    async fn make_safe(&self, text: &str) -> Result<String> {
        let policy = self
            .config
            .policy
            .as_deref()
            .unwrap_or(prompts::SAFETY_POLICY);
        let rewritten = self
            .llm
            .chat(policy, &prompts::safe_story_prompt(text))
            .await?;
        self.check(&rewritten)?;
        info!("Safety rewrite accepted ({} chars)", rewritten.len());
        Ok(rewritten.trim().to_string())
    }
}

// --- Structured story ---

pub struct LlmStoryStructurer {
    llm: Arc<dyn LlmClient>,
}

impl LlmStoryStructurer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl StoryStructurer for LlmStoryStructurer {
    async fn generate_structured_story(&self, text: &str) -> Result<Story> {
        let response = self
            .llm
            .chat(
                "You turn stories into JSON. Only return valid JSON.",
                &prompts::story_json_prompt(text),
            )
            .await?;
        debug!("Structured story response:\n{}", response);
        Ok(Story::from_model_output(&response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct ScriptedLlm {
        reply: String,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedLlm {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(&self, system: &str, user: &str) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_summarizer_caps_context() -> Result<()> {
        let llm = ScriptedLlm::new("A crocodile learns to share.");
        let summarizer = LlmSummarizer::new(llm.clone());
        let long = "x".repeat(MAX_CONTEXT_CHARS + 500);

        let summary = summarizer
            .summarize(prompts::EXTRACT_SUMMARIZE_STORY_PROMPT, &[long, "tail".to_string()])
            .await?;

        assert_eq!(summary, "A crocodile learns to share.");
        let calls = llm.prompts.lock().unwrap();
        assert!(!calls[0].1.contains("tail"));
        assert!(calls[0].1.contains("extract the story from documents"));
        Ok(())
    }

    #[tokio::test]
    async fn test_safety_filter_uses_policy_and_blocks_terms() -> Result<()> {
        let llm = ScriptedLlm::new("Annie found a shiny sword.");
        let filter = LlmSafetyFilter::new(
            llm.clone(),
            SafetyConfig {
                policy: None,
                blocked_terms: vec!["Sword".to_string()],
            },
        );

        let err = filter.make_safe("Annie fights with a sword.").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoryError>(),
            Some(StoryError::Unsafe(_))
        ));
        let calls = llm.prompts.lock().unwrap();
        assert_eq!(calls[0].0, prompts::SAFETY_POLICY);
        assert!(calls[0].1.contains("Annie fights with a sword."));
        Ok(())
    }

    #[tokio::test]
    async fn test_safety_filter_rejects_empty_rewrite() {
        let filter = LlmSafetyFilter::new(ScriptedLlm::new("   "), SafetyConfig::default());
        assert!(filter.make_safe("story").await.is_err());
    }

    #[tokio::test]
    async fn test_structurer_parses_fenced_json() -> Result<()> {
        let llm = ScriptedLlm::new(
            "```json\n{\"title\": \"Annie\", \"pages\": [{\"page_no\": 1, \"content\": \"Annie smiles.\"}]}\n```",
        );
        let story = LlmStoryStructurer::new(llm)
            .generate_structured_story("Annie smiles.")
            .await?;
        assert_eq!(story.title, "Annie");
        assert_eq!(story.pages.len(), 1);
        Ok(())
    }
}
