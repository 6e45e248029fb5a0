use thiserror::Error;

/// Errors raised by the orchestration plumbing.
///
/// Backend outcomes never surface through this type: the inference client and
/// the generation invoker turn them into [`crate::Failure`] values instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("prompt must contain at least {min} non-blank characters")]
    PromptTooShort { min: usize },
    #[error("failed to load pipeline: {0:#}")]
    Load(anyhow::Error),
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid endpoint url: {0}")]
    InvalidEndpoint(String),
    #[error("a generation command is already pending")]
    CommandPending,
}

pub type Result<T> = std::result::Result<T, Error>;
