use crate::core::error::StoryError;
use crate::utils::text::strip_code_blocks;
use serde::{Deserialize, Serialize};

/// One sentence of the book, addressed by its page number.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Page {
    pub page_no: u32,
    pub content: String,
}

/// The canonical checkpoint: a title plus ordered sentence-pages.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Story {
    pub title: String,
    pub pages: Vec<Page>,
}

/// Image prompts for one story. Never stored as a whole; each prompt has its
/// own file keyed by page number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryPrompt {
    pub title_prompt: String,
    pub prompts: Vec<PagePrompt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePrompt {
    pub page_no: u32,
    pub prompt: String,
}

impl Story {
    /// Parses a story out of a model response, tolerating code fences and
    /// chatter around the JSON object.
    pub fn from_model_output(response: &str) -> Result<Self, StoryError> {
        let clean = strip_code_blocks(response);
        let json = match (clean.find('{'), clean.rfind('}')) {
            (Some(start), Some(end)) if start < end => &clean[start..=end],
            _ => {
                return Err(StoryError::parse(
                    "structured story",
                    format!("no JSON object in response: {}", clean),
                ))
            }
        };
        serde_json::from_str(json)
            .map_err(|e| StoryError::parse("structured story", format!("{}: {}", e, json)))
    }

    /// Keeps the generated order (stable by page number) and renumbers pages
    /// from 1, leaving 0 to the title slot.
    pub fn normalized(mut self) -> Self {
        self.pages.sort_by_key(|p| p.page_no);
        for (i, page) in self.pages.iter_mut().enumerate() {
            page.page_no = i as u32 + 1;
        }
        self
    }

    pub fn truncated(mut self, max_pages: usize) -> Self {
        self.pages.truncate(max_pages);
        self
    }

    /// Checks the ordering invariant every downstream stage relies on.
    pub fn validate(&self) -> Result<(), StoryError> {
        let mut previous = 0u32;
        for page in &self.pages {
            if page.page_no == 0 {
                return Err(StoryError::parse(
                    "story",
                    "page number 0 is reserved for the title",
                ));
            }
            if page.page_no <= previous {
                return Err(StoryError::parse(
                    "story",
                    format!(
                        "page numbers must be unique and ascending, found {} after {}",
                        page.page_no, previous
                    ),
                ));
            }
            previous = page.page_no;
        }
        Ok(())
    }

    /// Full text handed to the prompt writer as context.
    pub fn full_text_with_title(&self) -> String {
        let mut content = format!("Title : {}\n", self.title);
        for page in &self.pages {
            content.push_str(&format!("Page {} : {}\n", page.page_no, page.content));
        }
        content
    }
}

impl StoryPrompt {
    /// Stored completion for a slot; `None` is the title.
    pub fn completion_for(&self, page_no: Option<u32>) -> Option<&str> {
        match page_no {
            None => Some(self.title_prompt.as_str()),
            Some(n) => self
                .prompts
                .iter()
                .find(|p| p.page_no == n)
                .map(|p| p.prompt.as_str()),
        }
    }
}

/// Pulls the quoted image prompt out of a stored completion.
pub fn extract_quoted_prompt(raw: &str) -> Result<String, StoryError> {
    let start = raw
        .find('"')
        .ok_or_else(|| StoryError::parse("image prompt", "missing opening quote"))?;
    let end = raw
        .rfind('"')
        .filter(|end| *end > start)
        .ok_or_else(|| StoryError::parse("image prompt", "missing closing quote"))?;
    let prompt = raw[start + 1..end].trim();
    if prompt.is_empty() {
        return Err(StoryError::parse("image prompt", "quoted prompt is empty"));
    }
    Ok(prompt.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(page_no: u32, content: &str) -> Page {
        Page {
            page_no,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_from_model_output_with_fences_and_chatter() {
        let response = "```json\nHere you go: {\"title\": \"Annie\", \"pages\": [{\"page_no\": 1, \"content\": \"Annie swims.\"}]}\n```";
        let story = Story::from_model_output(response).unwrap();
        assert_eq!(story.title, "Annie");
        assert_eq!(story.pages, vec![page(1, "Annie swims.")]);
    }

    #[test]
    fn test_completion_for_finds_title_and_pages() {
        let prompts = StoryPrompt {
            title_prompt: "\"a river\"".to_string(),
            prompts: vec![PagePrompt {
                page_no: 2,
                prompt: "\"Annie swims\"".to_string(),
            }],
        };
        assert_eq!(prompts.completion_for(None), Some("\"a river\""));
        assert_eq!(prompts.completion_for(Some(2)), Some("\"Annie swims\""));
        assert_eq!(prompts.completion_for(Some(1)), None);
    }

    #[test]
    fn test_from_model_output_rejects_non_json() {
        let err = Story::from_model_output("I cannot do that").unwrap_err();
        assert!(matches!(err, StoryError::Parse { .. }));
    }

    #[test]
    fn test_normalized_renumbers_from_one() {
        let story = Story {
            title: "T".to_string(),
            pages: vec![page(4, "d"), page(0, "a"), page(2, "b")],
        }
        .normalized();
        let numbers: Vec<u32> = story.pages.iter().map(|p| p.page_no).collect();
        let contents: Vec<&str> = story.pages.iter().map(|p| p.content.as_str()).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(contents, vec!["a", "b", "d"]);
        assert!(story.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_disorder_and_title_slot() {
        let unordered = Story {
            title: "T".to_string(),
            pages: vec![page(2, "b"), page(1, "a")],
        };
        assert!(unordered.validate().is_err());

        let title_slot = Story {
            title: "T".to_string(),
            pages: vec![page(0, "a")],
        };
        assert!(title_slot.validate().is_err());
    }

    #[test]
    fn test_full_text_with_title() {
        let story = Story {
            title: "Annie".to_string(),
            pages: vec![page(1, "One."), page(2, "Two.")],
        };
        assert_eq!(
            story.full_text_with_title(),
            "Title : Annie\nPage 1 : One.\nPage 2 : Two.\n"
        );
    }

    #[test]
    fn test_extract_quoted_prompt() {
        let raw = "Here is the prompt: \"Annie the crocodile, smiling, watercolor\"";
        assert_eq!(
            extract_quoted_prompt(raw).unwrap(),
            "Annie the crocodile, smiling, watercolor"
        );
        assert!(extract_quoted_prompt("no quotes here").is_err());
        assert!(extract_quoted_prompt("only \"one quote").is_err());
        assert!(extract_quoted_prompt("empty \"  \"").is_err());
    }
}
