use crate::core::config::ArtifactLayout;
use crate::core::error::StoryError;
use crate::core::io::Storage;
use crate::core::story::{PagePrompt, Story, StoryPrompt};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Checkpoint artifacts under one data root.
///
/// Every query goes to storage; nothing is cached, so a restarted process
/// sees exactly what the previous one left on disk.
pub struct ArtifactStore {
    storage: Arc<dyn Storage>,
    root: PathBuf,
    layout: ArtifactLayout,
}

impl ArtifactStore {
    pub fn new(storage: Arc<dyn Storage>, root: impl Into<PathBuf>, layout: ArtifactLayout) -> Self {
        Self {
            storage,
            root: root.into(),
            layout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // --- Paths ---

    pub fn raw_story_path(&self) -> PathBuf {
        self.root.join(&self.layout.raw_story_file)
    }

    pub fn story_path(&self) -> PathBuf {
        self.root.join(&self.layout.story_json_file)
    }

    pub fn pdf_path(&self) -> PathBuf {
        self.root.join(&self.layout.story_pdf_file)
    }

    pub fn prompt_dir(&self) -> PathBuf {
        self.root.clone()
    }

    pub fn title_prompt_file(&self) -> &str {
        &self.layout.title_prompt_file
    }

    pub fn page_prompt_file(page_no: u32) -> String {
        format!("{}_prompt.txt", page_no)
    }

    pub fn image_dir(&self) -> PathBuf {
        self.root.join(&self.layout.image_dir)
    }

    pub fn title_image_file() -> &'static str {
        "title.jpg"
    }

    pub fn page_image_file(page_no: u32) -> String {
        format!("{}.jpg", page_no)
    }

    /// Rasterized PDF pages, by page index (0 is the title page).
    pub fn raster_path(&self, index: usize) -> PathBuf {
        self.image_dir().join(format!("{}.png", index))
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join(&self.layout.audio_dir)
    }

    pub fn title_audio_file() -> &'static str {
        "title.mp3"
    }

    pub fn page_audio_file(page_no: u32) -> String {
        format!("{}.mp3", page_no)
    }

    pub fn video_dir(&self) -> PathBuf {
        self.root.join(&self.layout.video_dir)
    }

    /// Clip for one PDF page; the title page uses slot 0.
    pub fn clip_path(&self, slot: u32) -> PathBuf {
        self.video_dir().join(format!("{}.mp4", slot))
    }

    pub fn final_video_path(&self) -> PathBuf {
        self.video_dir().join(&self.layout.video_file)
    }

    // --- Access ---

    pub async fn exists(&self, directory: &Path, filename: &str) -> Result<bool> {
        self.storage.exists(&directory.join(filename)).await
    }

    pub async fn path_exists(&self, path: &Path) -> Result<bool> {
        self.storage.exists(path).await
    }

    pub async fn write_text(&self, path: &Path, content: &str) -> Result<()> {
        self.storage.write(path, content.as_bytes()).await
    }

    pub async fn read_text(&self, path: &Path) -> Result<String> {
        self.storage.read_to_string(path).await
    }

    pub async fn write_bytes(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.storage.write(path, content).await
    }

    pub async fn read_story(&self, path: &Path) -> Result<Story> {
        let content = self.read_text(path).await?;
        let story: Story = serde_json::from_str(&content)
            .map_err(|e| StoryError::parse(format!("story checkpoint {:?}", path), e.to_string()))?;
        story.validate()?;
        Ok(story)
    }

    pub async fn write_story(&self, story: &Story) -> Result<PathBuf> {
        let path = self.story_path();
        let content = serde_json::to_string_pretty(story)?;
        self.write_text(&path, &content).await?;
        Ok(path)
    }

    pub async fn prompts_complete(&self, directory: &Path, story: &Story) -> Result<bool> {
        if !self.exists(directory, self.title_prompt_file()).await? {
            return Ok(false);
        }
        for page in &story.pages {
            if !self.exists(directory, &Self::page_prompt_file(page.page_no)).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Loads the stored completion for the title and every page.
    pub async fn read_prompts(&self, directory: &Path, story: &Story) -> Result<StoryPrompt> {
        let title_prompt = self
            .read_text(&directory.join(self.title_prompt_file()))
            .await?;
        let mut prompts = Vec::with_capacity(story.pages.len());
        for page in &story.pages {
            let prompt = self
                .read_text(&directory.join(Self::page_prompt_file(page.page_no)))
                .await?;
            prompts.push(PagePrompt {
                page_no: page.page_no,
                prompt,
            });
        }
        Ok(StoryPrompt {
            title_prompt,
            prompts,
        })
    }

    pub async fn images_complete(&self, directory: &Path, story: &Story) -> Result<bool> {
        if !self.exists(directory, Self::title_image_file()).await? {
            return Ok(false);
        }
        for page in &story.pages {
            if !self.exists(directory, &Self::page_image_file(page.page_no)).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::story::Page;

    fn story(pages: u32) -> Story {
        Story {
            title: "Annie the Crocodile".to_string(),
            pages: (1..=pages)
                .map(|n| Page {
                    page_no: n,
                    content: format!("Sentence {}.", n),
                })
                .collect(),
        }
    }

    fn store(root: &Path) -> ArtifactStore {
        ArtifactStore::new(Arc::new(NativeStorage::new()), root, ArtifactLayout::default())
    }

    #[tokio::test]
    async fn test_story_round_trip() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = store(temp_dir.path());
        let original = story(3);

        let path = store.write_story(&original).await?;
        assert_eq!(path, temp_dir.path().join("story.json"));
        assert_eq!(store.read_story(&path).await?, original);
        Ok(())
    }

    #[tokio::test]
    async fn test_read_story_rejects_malformed_checkpoint() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = store(temp_dir.path());
        let path = store.story_path();

        store.write_text(&path, "{\"title\": \"x\"").await?;
        let err = store.read_story(&path).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoryError>(),
            Some(StoryError::Parse { .. })
        ));

        store
            .write_text(&path, r#"{"title": "x", "pages": [{"page_no": 2, "content": "b"}, {"page_no": 1, "content": "a"}]}"#)
            .await?;
        assert!(store.read_story(&path).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_prompts_complete_needs_title_and_every_page() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = store(temp_dir.path());
        let story = story(3);
        let dir = store.prompt_dir();

        assert!(!store.prompts_complete(&dir, &story).await?);

        for page in &story.pages {
            let path = dir.join(ArtifactStore::page_prompt_file(page.page_no));
            store.write_text(&path, "\"prompt\"").await?;
        }
        assert!(
            !store.prompts_complete(&dir, &story).await?,
            "title prompt still missing"
        );

        store
            .write_text(&dir.join("title_prompt.txt"), "\"title\"")
            .await?;
        assert!(store.prompts_complete(&dir, &story).await?);

        tokio::fs::remove_file(dir.join("2_prompt.txt")).await?;
        assert!(!store.prompts_complete(&dir, &story).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_prompts_keyed_by_page_no_not_index() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = store(temp_dir.path());
        let story = story(2);
        let dir = store.prompt_dir();

        // Index-keyed files (0, 1) must not satisfy a story numbered 1, 2.
        store.write_text(&dir.join("title_prompt.txt"), "\"t\"").await?;
        store.write_text(&dir.join("0_prompt.txt"), "\"a\"").await?;
        store.write_text(&dir.join("1_prompt.txt"), "\"b\"").await?;
        assert!(!store.prompts_complete(&dir, &story).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_read_prompts_keys_by_page_no() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = store(temp_dir.path());
        let story = story(2);
        let dir = store.prompt_dir();
        store.write_text(&dir.join("title_prompt.txt"), "\"t\"").await?;
        store.write_text(&dir.join("1_prompt.txt"), "\"one\"").await?;

        assert!(store.read_prompts(&dir, &story).await.is_err());

        store.write_text(&dir.join("2_prompt.txt"), "\"two\"").await?;
        let prompts = store.read_prompts(&dir, &story).await?;
        assert_eq!(prompts.title_prompt, "\"t\"");
        assert_eq!(prompts.completion_for(Some(2)), Some("\"two\""));
        Ok(())
    }

    #[tokio::test]
    async fn test_images_complete() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = store(temp_dir.path());
        let story = story(2);
        let dir = store.image_dir();

        store.write_bytes(&dir.join("title.jpg"), b"jpg").await?;
        store.write_bytes(&dir.join("1.jpg"), b"jpg").await?;
        assert!(!store.images_complete(&dir, &story).await?);
        store.write_bytes(&dir.join("2.jpg"), b"jpg").await?;
        assert!(store.images_complete(&dir, &story).await?);
        Ok(())
    }
}
