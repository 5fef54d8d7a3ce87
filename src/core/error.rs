use std::path::PathBuf;

/// Failures the pipeline distinguishes by kind.
///
/// Input errors are turned into a printed result by the workflow instead of
/// aborting the run. Backend and parse errors travel inside `anyhow::Error`
/// and can be recovered with `downcast_ref::<StoryError>()`.
#[derive(Debug, thiserror::Error)]
pub enum StoryError {
    #[error("Please specify url")]
    MissingSource,

    #[error("file must be pdf: {0}")]
    UnsupportedFile(PathBuf),

    #[error("PDF support is not available yet!")]
    PdfInput(PathBuf),

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{backend} returned an error: {payload}")]
    Backend { backend: String, payload: String },

    #[error("failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("safety filter rejected the story: {0}")]
    Unsafe(String),
}

impl StoryError {
    pub fn backend(backend: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            payload: payload.into(),
        }
    }

    pub fn parse(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// Input errors are reported as a result message rather than raised.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MissingSource
                | Self::UnsupportedFile(_)
                | Self::PdfInput(_)
                | Self::InvalidUrl { .. }
        )
    }
}
