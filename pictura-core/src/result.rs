use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

/// Category of a failed generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ModelLoading,
    RateLimited,
    AuthError,
    Timeout,
    ValidationError,
    LoadFailure,
    Unknown,
}

serde_plain::derive_display_from_serialize!(FailureKind);

impl FailureKind {
    /// Remediation hint shown next to the failure.
    pub fn hint(&self) -> &'static str {
        match self {
            FailureKind::ModelLoading => {
                "The model is starting up. Please wait 1-3 minutes and try again."
            }
            FailureKind::RateLimited => {
                "Rate limit reached. Wait a moment, or use an API token for higher limits."
            }
            FailureKind::AuthError => {
                "API token issue. The token may be invalid or lack the required permissions."
            }
            FailureKind::Timeout => "The backend took too long to answer. Please try again.",
            FailureKind::ValidationError => "Enter a prompt with at least 3 characters.",
            FailureKind::LoadFailure => {
                "The local model could not be initialized. Fix the model setup and restart."
            }
            FailureKind::Unknown => "Try a simpler prompt or wait a moment before trying again.",
        }
    }

    /// Fatal failures halt the session until restart.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::LoadFailure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// Raw diagnostic detail, mostly set for `Unknown`.
    pub detail: Option<String>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn model_loading() -> Self {
        Self::new(
            FailureKind::ModelLoading,
            "Model is loading. Please wait 1-3 minutes and try again.",
        )
    }

    pub fn rate_limited() -> Self {
        Self::new(FailureKind::RateLimited, "Too many requests. Please wait a moment.")
    }

    pub fn auth_error(status: u16) -> Self {
        Self::new(
            FailureKind::AuthError,
            format!("Access denied ({status}). Token may be invalid or expired."),
        )
    }

    pub fn timeout(secs: u64) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("Request timed out after {secs} seconds."),
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ValidationError, message)
    }

    pub fn load_failure(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::LoadFailure, "Failed to load the local model.").with_detail(detail)
    }

    pub fn unknown(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Unknown, message).with_detail(detail)
    }

    pub fn hint(&self) -> &'static str {
        self.kind.hint()
    }
}

/// Encoded image returned by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl GeneratedImage {
    /// Decodes `bytes`, recording the detected format and dimensions.
    pub fn from_encoded(bytes: Vec<u8>) -> image::ImageResult<Self> {
        let format = image::guess_format(&bytes)?;
        let decoded = image::load_from_memory_with_format(&bytes, format)?;
        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            bytes,
            format,
        })
    }

    /// Encodes an in-memory image as PNG.
    pub fn from_image(image: &DynamicImage) -> image::ImageResult<Self> {
        let bytes = crate::encode_png(image)?;
        Ok(Self {
            bytes,
            format: ImageFormat::Png,
            width: image.width(),
            height: image.height(),
        })
    }

    pub fn decode(&self) -> image::ImageResult<DynamicImage> {
        image::load_from_memory_with_format(&self.bytes, self.format)
    }

    /// PNG bytes, reusing the payload when it already is PNG.
    pub fn to_png(&self) -> image::ImageResult<Vec<u8>> {
        if self.format == ImageFormat::Png {
            return Ok(self.bytes.clone());
        }
        crate::encode_png(&self.decode()?)
    }
}

/// Outcome of exactly one generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    Image(GeneratedImage),
    Failure(Failure),
}

impl GenerationResult {
    pub fn is_image(&self) -> bool {
        matches!(self, GenerationResult::Image(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            GenerationResult::Failure(f) => Some(f),
            GenerationResult::Image(_) => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure().map(|f| f.kind)
    }
}

impl From<Failure> for GenerationResult {
    fn from(failure: Failure) -> Self {
        GenerationResult::Failure(failure)
    }
}

impl From<GeneratedImage> for GenerationResult {
    fn from(image: GeneratedImage) -> Self {
        GenerationResult::Image(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn hints_are_kind_specific() {
        assert!(FailureKind::ModelLoading.hint().contains("minutes"));
        assert!(FailureKind::RateLimited.hint().contains("token"));
        assert_ne!(FailureKind::AuthError.hint(), FailureKind::Unknown.hint());
    }

    #[test]
    fn model_loading_message_and_hint_agree_on_wait() {
        let failure = Failure::model_loading();
        assert!(failure.message.contains("1-3 minutes"));
        assert!(failure.hint().contains("1-3 minutes"));
    }

    #[test]
    fn only_load_failure_is_fatal() {
        assert!(FailureKind::LoadFailure.is_fatal());
        assert!(!FailureKind::AuthError.is_fatal());
        assert!(!FailureKind::Unknown.is_fatal());
    }

    #[test]
    fn kind_displays_as_snake_case() {
        assert_eq!(FailureKind::ModelLoading.to_string(), "model_loading");
    }

    #[test]
    fn jpeg_payload_is_reencoded_as_png() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(24, 16, Rgb([200, 10, 10])));
        let mut jpeg = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();

        let generated = GeneratedImage::from_encoded(jpeg).unwrap();
        assert_eq!(generated.format, ImageFormat::Jpeg);
        assert_eq!((generated.width, generated.height), (24, 16));

        let png = generated.to_png().unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), ImageFormat::Png);
        let back = image::load_from_memory(&png).unwrap();
        assert_eq!((back.width(), back.height()), (24, 16));
    }

    #[test]
    fn garbage_is_not_an_image() {
        assert!(GeneratedImage::from_encoded(b"{\"error\":\"nope\"}".to_vec()).is_err());
    }
}
