use crate::core::artifacts::ArtifactStore;
use crate::core::config::{Config, RetryPolicy};
use crate::core::error::StoryError;
use crate::core::io::{write_staged, Storage};
use crate::core::story::{extract_quoted_prompt, Story};
use crate::services::authoring::{
    LlmSafetyFilter, LlmStoryStructurer, LlmSummarizer, SafetyFilter, StoryStructurer, Summarizer,
};
use crate::services::fetch::{HttpFetcher, SourceFetcher};
use crate::services::image::{create_image_client, ImageCredentials, ImageGenerator};
use crate::services::llm::{create_llm, LlmClient};
use crate::services::pdf::{PdfComposer, PrintPdfComposer};
use crate::services::prompts;
use crate::services::tts::{create_tts_client, sanitize_for_speech, SpeechSynthesizer};
use crate::services::video::{FfmpegVideoComposer, VideoComposer};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Pages kept when running in test mode.
pub const TEST_MODE_PAGES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Url(String),
    File(PathBuf),
    Unspecified,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Truncate the generated story to [`TEST_MODE_PAGES`] pages.
    pub test_mode: bool,
    /// Stop once the PDF is written.
    pub pdf_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Intake,
    Summarize,
    SafetyFilter,
    Structure,
    PromptGeneration,
    ImageGeneration,
    ComposePdf,
    Narrate,
    ComposeVideo,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Intake,
        Stage::Summarize,
        Stage::SafetyFilter,
        Stage::Structure,
        Stage::PromptGeneration,
        Stage::ImageGeneration,
        Stage::ComposePdf,
        Stage::Narrate,
        Stage::ComposeVideo,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Intake => "Intake",
            Stage::Summarize => "Summarize",
            Stage::SafetyFilter => "Safety Filter",
            Stage::Structure => "Structure",
            Stage::PromptGeneration => "Prompt Generation",
            Stage::ImageGeneration => "Image Generation",
            Stage::ComposePdf => "Compose PDF",
            Stage::Narrate => "Narrate",
            Stage::ComposeVideo => "Compose Video",
        }
    }

    pub fn node_id(&self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Summarize => "summarize",
            Stage::SafetyFilter => "safety_filter",
            Stage::Structure => "structure",
            Stage::PromptGeneration => "prompt_generation",
            Stage::ImageGeneration => "image_generation",
            Stage::ComposePdf => "compose_pdf",
            Stage::Narrate => "narrate",
            Stage::ComposeVideo => "compose_video",
        }
    }

    /// Event variant this stage consumes.
    pub fn consumes(&self) -> &'static str {
        match self {
            Stage::Intake => "Start",
            Stage::Summarize => "RawText",
            Stage::SafetyFilter => "Summary",
            Stage::Structure => "SafeStory",
            Stage::PromptGeneration => "Story",
            Stage::ImageGeneration => "Prompts",
            Stage::ComposePdf => "Images",
            Stage::Narrate => "Pdf",
            Stage::ComposeVideo => "Audio",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Path of the final artifact (PDF or video).
    Completed(PathBuf),
    /// Input error, reported instead of raised.
    Rejected(String),
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineOutcome::Completed(path) => write!(f, "{}", path.display()),
            PipelineOutcome::Rejected(message) => {
                write!(f, "{}", serde_json::json!({ "error": message }))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    Start { url: String },
    RawText { path: PathBuf },
    Summary { text: String },
    SafeStory { text: String },
    Story { story: Story },
    Prompts { story: Story, dir: PathBuf },
    Images { story: Story, dir: PathBuf },
    Pdf { story: Story, path: PathBuf },
    Audio { story: Story, pdf: PathBuf, dir: PathBuf },
    Stop(PipelineOutcome),
}

fn rejected(error: StoryError) -> StageEvent {
    StageEvent::Stop(PipelineOutcome::Rejected(error.to_string()))
}

fn validate_url(raw: &str) -> Result<(), StoryError> {
    let parsed = url::Url::parse(raw).map_err(|e| StoryError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(StoryError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

/// Picks the first stage whose inputs are not yet on disk.
///
/// Only reads the store; no backend is called and nothing is written.
pub async fn resolve_entry(
    store: &ArtifactStore,
    source: &Source,
    options: RunOptions,
) -> Result<StageEvent> {
    if let Source::File(path) = source {
        let is_pdf = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        let error = if is_pdf {
            StoryError::PdfInput(path.clone())
        } else {
            StoryError::UnsupportedFile(path.clone())
        };
        return Ok(rejected(error));
    }

    let story_path = store.story_path();
    if store.path_exists(&story_path).await? {
        let story = store.read_story(&story_path).await?;
        let pdf = store.pdf_path();
        let pdf_exists = store.path_exists(&pdf).await?;
        info!("Resuming from {:?} ({} pages)", story_path, story.pages.len());

        if options.pdf_only && pdf_exists {
            return Ok(StageEvent::Stop(PipelineOutcome::Completed(pdf)));
        }
        let video = store.final_video_path();
        if store.path_exists(&video).await? {
            return Ok(StageEvent::Stop(PipelineOutcome::Completed(video)));
        }
        if pdf_exists {
            return Ok(StageEvent::Pdf { story, path: pdf });
        }
        let image_dir = store.image_dir();
        if store.images_complete(&image_dir, &story).await? {
            return Ok(StageEvent::Images {
                story,
                dir: image_dir,
            });
        }
        let prompt_dir = store.prompt_dir();
        if store.prompts_complete(&prompt_dir, &story).await? {
            return Ok(StageEvent::Prompts {
                story,
                dir: prompt_dir,
            });
        }
        return Ok(StageEvent::Story { story });
    }

    let raw = store.raw_story_path();
    if store.path_exists(&raw).await? {
        info!("Resuming from {:?}", raw);
        return Ok(StageEvent::RawText { path: raw });
    }

    match source {
        Source::Url(url) => match validate_url(url) {
            Ok(()) => Ok(StageEvent::Start { url: url.clone() }),
            Err(e) => Ok(rejected(e)),
        },
        _ => Ok(rejected(StoryError::MissingSource)),
    }
}

/// Runs `op` up to `policy.max_attempts` times with a fixed delay in between.
pub async fn with_retry<T, F, Fut>(label: &str, policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {:#}. Retrying in {}s...",
                    label, attempt, max_attempts, e, policy.delay_seconds
                );
                tokio::time::sleep(Duration::from_secs(policy.delay_seconds)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// One illustrated slot of the book: the title or a page.
struct Slot<'a> {
    page_no: Option<u32>,
    text: &'a str,
}

impl Slot<'_> {
    fn label(&self) -> String {
        match self.page_no {
            Some(n) => prompts::page_label(n),
            None => prompts::TITLE_PAGE_LABEL.to_string(),
        }
    }

    fn prompt_file(&self, store: &ArtifactStore) -> String {
        match self.page_no {
            Some(n) => ArtifactStore::page_prompt_file(n),
            None => store.title_prompt_file().to_string(),
        }
    }

    fn image_file(&self) -> String {
        match self.page_no {
            Some(n) => ArtifactStore::page_image_file(n),
            None => ArtifactStore::title_image_file().to_string(),
        }
    }

    fn audio_file(&self) -> String {
        match self.page_no {
            Some(n) => ArtifactStore::page_audio_file(n),
            None => ArtifactStore::title_audio_file().to_string(),
        }
    }
}

/// Title first, then every page in order.
fn slots(story: &Story) -> Vec<Slot<'_>> {
    std::iter::once(Slot {
        page_no: None,
        text: story.title.as_str(),
    })
    .chain(story.pages.iter().map(|p| Slot {
        page_no: Some(p.page_no),
        text: p.content.as_str(),
    }))
    .collect()
}

/// The external capabilities one run needs.
pub struct StoryServices {
    pub fetcher: Box<dyn SourceFetcher>,
    pub summarizer: Box<dyn Summarizer>,
    pub safety: Box<dyn SafetyFilter>,
    pub structurer: Box<dyn StoryStructurer>,
    pub llm: Arc<dyn LlmClient>,
    pub images: Box<dyn ImageGenerator>,
    pub tts: Box<dyn SpeechSynthesizer>,
    pub pdf: Box<dyn PdfComposer>,
    pub video: Box<dyn VideoComposer>,
}

impl StoryServices {
    pub fn from_config(config: &Config) -> Result<Self> {
        let llm: Arc<dyn LlmClient> = Arc::from(create_llm(&config.llm)?);
        Ok(Self {
            fetcher: Box::new(HttpFetcher::new()),
            summarizer: Box::new(LlmSummarizer::new(llm.clone())),
            safety: Box::new(LlmSafetyFilter::new(llm.clone(), config.safety.clone())),
            structurer: Box::new(LlmStoryStructurer::new(llm.clone())),
            llm,
            images: create_image_client(&config.image)?,
            tts: create_tts_client(&config.audio)?,
            pdf: Box::new(PrintPdfComposer::new(config.media.pdf.clone())),
            video: Box::new(FfmpegVideoComposer::new(&config.media)),
        })
    }
}

pub struct StoryWorkflow {
    config: Config,
    options: RunOptions,
    services: StoryServices,
    store: ArtifactStore,
    trace: Vec<Stage>,
}

impl StoryWorkflow {
    pub fn new(
        config: Config,
        options: RunOptions,
        services: StoryServices,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let store = ArtifactStore::new(storage, config.data_root.clone(), config.layout.clone());
        Self {
            config,
            options,
            services,
            store,
            trace: Vec::new(),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Stages executed by the last `run`, in order.
    pub fn trace(&self) -> &[Stage] {
        &self.trace
    }

    pub async fn run(&mut self, source: &Source) -> Result<PipelineOutcome> {
        self.trace.clear();
        let mut event = resolve_entry(&self.store, source, self.options).await?;

        loop {
            event = match event {
                StageEvent::Stop(outcome) => {
                    info!("Pipeline finished: {}", outcome);
                    return Ok(outcome);
                }
                StageEvent::Start { url } => {
                    self.enter(Stage::Intake);
                    self.intake(&url).await?
                }
                StageEvent::RawText { path } => {
                    self.enter(Stage::Summarize);
                    self.summarize(&path).await?
                }
                StageEvent::Summary { text } => {
                    self.enter(Stage::SafetyFilter);
                    self.make_safe(&text).await?
                }
                StageEvent::SafeStory { text } => {
                    self.enter(Stage::Structure);
                    self.structure(&text).await?
                }
                StageEvent::Story { story } => {
                    self.enter(Stage::PromptGeneration);
                    self.generate_prompts(story).await?
                }
                StageEvent::Prompts { story, dir } => {
                    self.enter(Stage::ImageGeneration);
                    self.generate_images(story, &dir).await?
                }
                StageEvent::Images { story, dir } => {
                    self.enter(Stage::ComposePdf);
                    self.compose_pdf(story, &dir).await?
                }
                StageEvent::Pdf { story, path } => {
                    self.enter(Stage::Narrate);
                    self.narrate(story, path).await?
                }
                StageEvent::Audio { story, pdf, dir } => {
                    self.enter(Stage::ComposeVideo);
                    self.compose_video(&story, &pdf, &dir).await?
                }
            };
        }
    }

    fn enter(&mut self, stage: Stage) {
        info!("==> {}", stage.name());
        self.trace.push(stage);
    }

    async fn intake(&self, url: &str) -> Result<StageEvent> {
        let text = self.services.fetcher.fetch(url).await?;
        let path = self.store.raw_story_path();
        self.store.write_text(&path, &text).await?;
        println!("Saved source text to {:?}", path);
        Ok(StageEvent::RawText { path })
    }

    async fn summarize(&self, path: &Path) -> Result<StageEvent> {
        let raw = self.store.read_text(path).await?;
        let text = self
            .services
            .summarizer
            .summarize(prompts::EXTRACT_SUMMARIZE_STORY_PROMPT, &[raw])
            .await
            .context("Summarization failed")?;
        debug!("Summary:\n{}", text);
        Ok(StageEvent::Summary { text })
    }

    async fn make_safe(&self, text: &str) -> Result<StageEvent> {
        let text = self.services.safety.make_safe(text).await?;
        Ok(StageEvent::SafeStory { text })
    }

    async fn structure(&self, text: &str) -> Result<StageEvent> {
        let structurer = self.services.structurer.as_ref();
        let story = with_retry(
            "Structured story generation",
            self.config.retry.structure,
            move || structurer.generate_structured_story(text),
        )
        .await?
        .normalized();

        let story = if self.options.test_mode {
            info!("Test mode: keeping the first {} pages", TEST_MODE_PAGES);
            story.truncated(TEST_MODE_PAGES)
        } else {
            story
        };
        if story.pages.is_empty() {
            return Err(StoryError::parse("structured story", "story has no pages").into());
        }

        let path = self.store.write_story(&story).await?;
        println!("Story '{}' ({} pages) saved to {:?}", story.title, story.pages.len(), path);
        Ok(StageEvent::Story { story })
    }

    async fn generate_prompts(&self, story: Story) -> Result<StageEvent> {
        let dir = self.store.prompt_dir();
        let full_story = story.full_text_with_title();
        let slots = slots(&story);
        let pb = progress_bar(slots.len())?;

        for slot in &slots {
            let path = dir.join(slot.prompt_file(&self.store));
            if self.store.path_exists(&path).await? {
                info!("Keeping existing prompt {:?}", path);
            } else {
                let request_text = prompts::image_prompt(&slot.label(), &full_story);
                let request = request_text.as_str();
                let llm = self.services.llm.as_ref();
                let response = with_retry(
                    "Image prompt generation",
                    self.config.retry.prompts,
                    move || llm.complete(request),
                )
                .await?;
                self.store.write_text(&path, &response).await?;
            }
            pb.inc(1);
        }
        pb.finish_with_message("Prompts complete");

        Ok(StageEvent::Prompts { story, dir })
    }

    async fn generate_images(&self, story: Story, prompt_dir: &Path) -> Result<StageEvent> {
        let image_dir = self.store.image_dir();
        let prompts = self.store.read_prompts(prompt_dir, &story).await?;
        let slots = slots(&story);
        let pb = progress_bar(slots.len())?;
        let mut credentials: Option<ImageCredentials> = None;

        for slot in &slots {
            let image_path = image_dir.join(slot.image_file());
            if self.store.path_exists(&image_path).await? {
                info!("Keeping existing image {:?}", image_path);
                pb.inc(1);
                continue;
            }

            let raw = prompts.completion_for(slot.page_no).ok_or_else(|| {
                StoryError::parse("image prompt", format!("no prompt for {}", slot.label()))
            })?;
            let prompt = extract_quoted_prompt(raw)?;
            let creds = match &credentials {
                Some(creds) => creds.clone(),
                None => {
                    let creds = ImageCredentials::from_config(&self.config.image)?;
                    credentials = Some(creds.clone());
                    creds
                }
            };

            let bytes = self
                .services
                .images
                .synthesize_image(&prompt, &creds)
                .await
                .with_context(|| format!("Image generation failed for {}", slot.label()))?;
            self.store.write_bytes(&image_path, &bytes).await?;
            pb.inc(1);
        }
        pb.finish_with_message("Images complete");

        Ok(StageEvent::Images {
            story,
            dir: image_dir,
        })
    }

    async fn compose_pdf(&self, story: Story, image_dir: &Path) -> Result<StageEvent> {
        let path = self.store.pdf_path();
        let pdf = self.services.pdf.as_ref();
        let book = &story;
        write_staged(&path, |staging| async move {
            pdf.compose(book, image_dir, &staging).await
        })
        .await?;
        println!("PDF saved to {:?}", path);

        if self.options.pdf_only {
            return Ok(StageEvent::Stop(PipelineOutcome::Completed(path)));
        }
        Ok(StageEvent::Pdf { story, path })
    }

    async fn narrate(&self, story: Story, pdf: PathBuf) -> Result<StageEvent> {
        let audio_dir = self.store.audio_dir();
        let slots = slots(&story);
        let pb = progress_bar(slots.len())?;

        for slot in &slots {
            let path = audio_dir.join(slot.audio_file());
            if self.store.path_exists(&path).await? {
                info!("Keeping existing audio {:?}", path);
            } else {
                let audio = self
                    .services
                    .tts
                    .synthesize(&sanitize_for_speech(slot.text))
                    .await
                    .with_context(|| format!("Speech synthesis failed for {}", slot.label()))?;
                self.store.write_bytes(&path, &audio).await?;
            }
            pb.inc(1);
        }
        pb.finish_with_message("Narration complete");

        Ok(StageEvent::Audio {
            story,
            pdf,
            dir: audio_dir,
        })
    }

    async fn compose_video(&self, story: &Story, pdf: &Path, audio_dir: &Path) -> Result<StageEvent> {
        let page_count = story.pages.len() + 1;
        let video = self.services.video.as_ref();
        let rasters = video.rasterize(pdf, &self.store.image_dir()).await?;
        if rasters.len() != page_count {
            return Err(StoryError::parse(
                format!("{:?}", pdf),
                format!("expected {} pages, rasterized {}", page_count, rasters.len()),
            )
            .into());
        }

        let pb = progress_bar(page_count)?;
        let mut clips = Vec::with_capacity(page_count);
        // Raster 0 is the cover; raster k+1 is story page k.
        for (slot, raster) in slots(story).iter().zip(&rasters) {
            let clip = self.store.clip_path(slot.page_no.unwrap_or(0));
            video
                .clip(raster, &audio_dir.join(slot.audio_file()), &clip)
                .await?;
            clips.push(clip);
            pb.inc(1);
        }
        pb.finish_with_message("Clips complete");

        let output = self.store.final_video_path();
        let clip_list = clips.as_slice();
        write_staged(&output, |staging| async move {
            video.concat(clip_list, &staging).await
        })
        .await?;
        println!("Video saved to {:?}", output);
        Ok(StageEvent::Stop(PipelineOutcome::Completed(output)))
    }
}
