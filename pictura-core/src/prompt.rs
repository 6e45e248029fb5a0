use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Minimum number of characters a trimmed prompt must contain.
pub const MIN_PROMPT_CHARS: usize = 3;

/// Clause appended when automatic enhancement is requested.
pub const QUALITY_CLAUSE: &str = ", high quality, detailed, beautiful";

pub const EXAMPLE_PROMPTS: [&str; 8] = [
    "beautiful landscape with mountains and trees",
    "cute cartoon robot with colorful design",
    "professional business portrait, modern style",
    "fantasy castle in magical forest",
    "modern city skyline at sunset",
    "abstract art with vibrant colors",
    "cute anime character, colorful hair",
    "vintage car in retro style, detailed",
];

/// A prompt that passed the minimum-length check.
///
/// The text is kept exactly as submitted; only the length check looks at the
/// trimmed form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Prompt(String);

impl Prompt {
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().chars().count() < MIN_PROMPT_CHARS {
            return Err(Error::PromptTooShort {
                min: MIN_PROMPT_CHARS,
            });
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Prompt {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Preset style tags offered next to the prompt box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Style {
    None,
    Photorealistic,
    #[serde(rename = "Digital Art")]
    DigitalArt,
    Anime,
    #[serde(rename = "Oil Painting")]
    OilPainting,
    Watercolor,
    Cyberpunk,
    Fantasy,
}

serde_plain::derive_display_from_serialize!(Style);
serde_plain::derive_fromstr_from_deserialize!(Style);

impl Style {
    pub const ALL: [Style; 8] = [
        Style::None,
        Style::Photorealistic,
        Style::DigitalArt,
        Style::Anime,
        Style::OilPainting,
        Style::Watercolor,
        Style::Cyberpunk,
        Style::Fantasy,
    ];
}

/// Appends the quality clause and/or a style clause to `raw`.
///
/// A style of `None`, `"None"` or blank adds nothing. Any other text is used
/// verbatim, so free-form styles work as well as the [`Style`] presets.
/// Calling this twice appends twice.
pub fn enhance(raw: &str, enhance: bool, style: Option<&str>) -> String {
    let mut out = String::with_capacity(raw.len() + QUALITY_CLAUSE.len());
    out.push_str(raw);
    if enhance {
        out.push_str(QUALITY_CLAUSE);
    }
    match style.map(str::trim) {
        Some(style) if !style.is_empty() && !style.eq_ignore_ascii_case("none") => {
            out.push_str(", ");
            out.push_str(style);
            out.push_str(" style");
        }
        _ => {}
    }
    out
}
