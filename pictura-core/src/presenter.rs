use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{Failure, GenerationResult, SessionContext};

pub const DEFAULT_DOWNLOAD_PREFIX: &str = "ai_image";
pub const PNG_MIME: &str = "image/png";

/// `<prefix>_<unix-timestamp>.png`
pub fn download_filename(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{prefix}_{}.png", at.timestamp())
}

/// One-shot PNG download offered for a successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub filename: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

impl Download {
    pub fn save_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(&self.filename);
        std::fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayedImage {
    /// The prompt as the user typed it.
    pub caption: String,
    /// The prompt that was actually sent to the backend.
    pub enhanced_prompt: String,
    pub width: u32,
    pub height: u32,
    pub generated_at: DateTime<Utc>,
    pub download: Download,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureNotice {
    #[serde(flatten)]
    pub failure: Failure,
    pub hint: &'static str,
    pub fatal: bool,
}

impl From<Failure> for FailureNotice {
    fn from(failure: Failure) -> Self {
        Self {
            hint: failure.hint(),
            fatal: failure.kind.is_fatal(),
            failure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Image(DisplayedImage),
    Failure(FailureNotice),
}

/// What the surface shows after a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presentation {
    pub view: View,
    pub warnings: Vec<String>,
}

impl Presentation {
    pub fn image(&self) -> Option<&DisplayedImage> {
        match &self.view {
            View::Image(image) => Some(image),
            View::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureNotice> {
        match &self.view {
            View::Failure(notice) => Some(notice),
            View::Image(_) => None,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

/// Prompt text travelling with a result into the presenter.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub raw: &'a str,
    pub enhanced: &'a str,
}

/// Turns generation results into presentations and keeps the session's
/// last-result slot current.
#[derive(Debug, Clone)]
pub struct ResultPresenter {
    prefix: String,
}

impl ResultPresenter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn present(
        &self,
        session: &mut SessionContext,
        prompt: PromptContext<'_>,
        result: GenerationResult,
    ) -> Presentation {
        self.present_at(session, prompt, result, Utc::now())
    }

    pub fn present_at(
        &self,
        session: &mut SessionContext,
        prompt: PromptContext<'_>,
        result: GenerationResult,
        now: DateTime<Utc>,
    ) -> Presentation {
        let generated = match result {
            GenerationResult::Image(generated) => generated,
            GenerationResult::Failure(failure) => return self.present_failure(session, failure),
        };
        let bytes = match generated.to_png() {
            Ok(bytes) => bytes,
            Err(e) => {
                let failure =
                    Failure::unknown("Could not prepare the image for download.", e.to_string());
                return self.present_failure(session, failure);
            }
        };

        let displayed = DisplayedImage {
            caption: prompt.raw.to_string(),
            enhanced_prompt: prompt.enhanced.to_string(),
            width: generated.width,
            height: generated.height,
            generated_at: now,
            download: Download {
                filename: download_filename(&self.prefix, now),
                mime: PNG_MIME,
                bytes,
            },
        };
        info!(
            width = displayed.width,
            height = displayed.height,
            filename = %displayed.download.filename,
            "image generated"
        );
        session.remember(displayed.clone());
        Presentation {
            view: View::Image(displayed),
            warnings: Vec::new(),
        }
    }

    /// Failures leave the last successful image in place.
    pub fn present_failure(&self, session: &mut SessionContext, failure: Failure) -> Presentation {
        if failure.kind.is_fatal() {
            error!(message = %failure.message, "fatal failure, halting session");
            session.halt(failure.clone());
        } else {
            warn!(kind = %failure.kind, message = %failure.message, "generation failed");
        }
        Presentation {
            view: View::Failure(failure.into()),
            warnings: Vec::new(),
        }
    }
}

impl Default for ResultPresenter {
    fn default() -> Self {
        Self::new(DEFAULT_DOWNLOAD_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use super::*;
    use crate::{FailureKind, GeneratedImage};

    fn jpeg(width: u32, height: u32) -> GeneratedImage {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([1, 2, 3])));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .unwrap();
        GeneratedImage::from_encoded(bytes).unwrap()
    }

    const PROMPT: PromptContext<'static> = PromptContext {
        raw: "a red fox in snow",
        enhanced: "a red fox in snow, high quality, detailed, beautiful",
    };

    #[test]
    fn filename_uses_unix_timestamp() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(download_filename("ai_image", at), "ai_image_1700000000.png");
    }

    #[test]
    fn image_is_offered_as_png_with_same_dimensions() {
        let mut session = SessionContext::default();
        let at = Utc.timestamp_opt(1_700_000_123, 0).unwrap();
        let presentation =
            ResultPresenter::default().present_at(&mut session, PROMPT, jpeg(512, 512).into(), at);

        let shown = presentation.image().unwrap();
        assert_eq!(shown.download.filename, "ai_image_1700000123.png");
        assert_eq!(shown.download.mime, "image/png");
        assert_eq!(shown.caption, PROMPT.raw);
        assert_eq!(shown.enhanced_prompt, PROMPT.enhanced);

        let decoded =
            image::load_from_memory_with_format(&shown.download.bytes, ImageFormat::Png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (512, 512));
        assert_eq!(session.last_result(), Some(shown));
    }

    #[test]
    fn failure_keeps_previous_image_and_uses_specific_hint() {
        let mut session = SessionContext::default();
        let presenter = ResultPresenter::default();
        presenter.present(&mut session, PROMPT, jpeg(64, 64).into());
        let before = session.last_result().cloned();

        let presentation = presenter.present(&mut session, PROMPT, Failure::auth_error(401).into());
        let notice = presentation.failure().unwrap();
        assert_eq!(notice.failure.kind, FailureKind::AuthError);
        assert_eq!(notice.hint, FailureKind::AuthError.hint());
        assert_ne!(notice.hint, FailureKind::Unknown.hint());
        assert!(!notice.fatal);
        assert_eq!(session.last_result().cloned(), before);
        assert!(!session.is_halted());
    }

    #[test]
    fn new_image_supersedes_the_last_one() {
        let mut session = SessionContext::default();
        let presenter = ResultPresenter::new("shot");
        presenter.present(&mut session, PROMPT, jpeg(64, 64).into());
        presenter.present(&mut session, PROMPT, jpeg(128, 96).into());
        let last = session.last_result().unwrap();
        assert_eq!((last.width, last.height), (128, 96));
        assert!(last.download.filename.starts_with("shot_"));
    }

    #[test]
    fn load_failure_halts_the_session() {
        let mut session = SessionContext::default();
        let presentation = ResultPresenter::default().present(
            &mut session,
            PROMPT,
            Failure::load_failure("missing weights").into(),
        );
        assert!(presentation.failure().unwrap().fatal);
        assert!(session.is_halted());
    }

    #[test]
    fn download_can_be_saved() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = SessionContext::default();
        let presentation =
            ResultPresenter::default().present(&mut session, PROMPT, jpeg(32, 32).into());
        let path = presentation
            .image()
            .unwrap()
            .download
            .save_to(dir.path())
            .unwrap();
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (32, 32));
    }
}
