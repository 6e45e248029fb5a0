use std::fmt;

use serde::Serialize;

/// Environment variable holding the stored secret.
pub const TOKEN_ENV_VAR: &str = "HUGGINGFACE_API_TOKEN";

/// Where a credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialOrigin {
    Override,
    Stored,
}

/// Bearer token for the inference endpoint.
///
/// Lives only in memory; it is not serializable and its `Debug` output is
/// redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    origin: CredentialOrigin,
}

impl Credential {
    pub fn new(token: impl Into<String>, origin: CredentialOrigin) -> Option<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return None;
        }
        Some(Self { token, origin })
    }

    /// Picks the user override over the stored secret. Blank values count as
    /// absent.
    pub fn resolve(user_override: Option<&str>, stored: Option<&str>) -> Option<Self> {
        user_override
            .and_then(|t| Self::new(t, CredentialOrigin::Override))
            .or_else(|| stored.and_then(|t| Self::new(t, CredentialOrigin::Stored)))
    }

    /// Reads the stored secret from the process environment.
    pub fn stored_from_env() -> Option<Self> {
        std::env::var(TOKEN_ENV_VAR)
            .ok()
            .and_then(|t| Self::new(t, CredentialOrigin::Stored))
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn origin(&self) -> CredentialOrigin {
        self.origin
    }

    /// Whether the token has the shape of a hub access token.
    pub fn looks_valid(&self) -> bool {
        self.token.starts_with("hf_")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("origin", &self.origin)
            .finish()
    }
}

/// What the status surfaces say about the active credential.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub origin: Option<CredentialOrigin>,
    pub tier: &'static str,
}

impl CredentialStatus {
    pub fn of(credential: Option<&Credential>) -> Self {
        match credential {
            Some(c) if c.looks_valid() => Self {
                origin: Some(c.origin()),
                tier: "priority",
            },
            Some(c) => Self {
                origin: Some(c.origin()),
                tier: "free",
            },
            None => Self {
                origin: None,
                tier: "free",
            },
        }
    }
}
