// Prompt templates. Placeholders are substituted with `str::replace`.

pub const EXTRACT_SUMMARIZE_STORY_PROMPT: &str = "extract the story from documents";

pub const SUMMARIZE_TEMPLATE: &str = "Context information is below.
---------------------
{context}
---------------------
Given the context information and not prior knowledge, answer the query.
Query: {query}
Answer: ";

pub const SAFETY_POLICY: &str = "You are a content safety rail for a children's book publisher. \
Remove or soften violence, fear, cruelty, adult themes, crude language and anything unsuitable \
for children under 8. Keep the plot, characters and ending recognisable. \
Reply with the rewritten story only.";

pub const SAFE_STORY_PROMPT: &str = "
Rewrite story to make it safe for children.
\n\n Story: '''{story}'''
";

pub const STORY_JSON_PROMPT: &str = "
Generate a title and list of pages for the story provided.
Make sure full story is included in the response.
Make sure each page is 1 sentence long.
Respond with a valid JSON object of the form
{\"title\": \"...\", \"pages\": [{\"page_no\": 1, \"content\": \"...\"}]}.
Do not add any sentence before or after the JSON object.
  \n\n Original story: '''{story}'''.
";

pub const STORY_GENERATE_IMAGE_PROMPT: &str = "
You are an AI agent that generates prompts that can be passed to image generation multimodal LLM.
You are given a children's book with a title and page content of the book.
Your job is to create prompt to generate fun and engaging pictures to be used for {page} in the book.
Make sure name/character used is fully described in each page.
e.g. Instead of saying Annie is walking slowly, say Annie the crocodile is walking slowly.
Similarly instead of saying John is curious, say John, 5 year old boy, is curious.
Do not return a content or any other details. Only return the prompt text, wrapped in double quotes.
  \n\n Here is the story: \n
  '''{story}'''
";

pub const TITLE_PAGE_LABEL: &str = "the cover page showing the book title";

pub fn summarize_prompt(query: &str, texts: &[String]) -> String {
    SUMMARIZE_TEMPLATE
        .replace("{context}", &texts.join("\n\n"))
        .replace("{query}", query)
}

pub fn safe_story_prompt(story: &str) -> String {
    SAFE_STORY_PROMPT.replace("{story}", story)
}

pub fn story_json_prompt(story: &str) -> String {
    STORY_JSON_PROMPT.replace("{story}", story)
}

/// `page` is either [`TITLE_PAGE_LABEL`] or `page_no N`.
pub fn image_prompt(page: &str, full_story: &str) -> String {
    STORY_GENERATE_IMAGE_PROMPT
        .replace("{page}", page)
        .replace("{story}", full_story)
}

pub fn page_label(page_no: u32) -> String {
    format!("page_no {}", page_no)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_prompt_embeds_page_and_story() {
        let prompt = image_prompt(&page_label(3), "Title : Annie\nPage 3 : Annie naps.\n");
        assert!(prompt.contains("used for page_no 3 in the book"));
        assert!(prompt.contains("Page 3 : Annie naps."));
        assert!(!prompt.contains("{story}"));
    }

    #[test]
    fn test_summarize_prompt_joins_documents() {
        let prompt = summarize_prompt(
            EXTRACT_SUMMARIZE_STORY_PROMPT,
            &["first".to_string(), "second".to_string()],
        );
        assert!(prompt.contains("first\n\nsecond"));
        assert!(prompt.contains("Query: extract the story from documents"));
    }
}
