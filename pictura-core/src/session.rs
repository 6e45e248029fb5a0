use tracing::{info, warn};

use crate::{
    enhance, Backend, BackendKind, Credential, DisplayedImage, Error, Failure, FailureKind,
    GenerationParameters, Presentation, Prompt, PromptContext, Result, ResultPresenter,
};

pub const ANONYMOUS_FALLBACK_WARNING: &str =
    "The API token was rejected; this image was requested anonymously on the free tier.";

/// A single user submission, produced by the surface and consumed once.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateCommand {
    pub prompt: String,
    pub enhance: bool,
    pub style: Option<String>,
    pub params: GenerationParameters,
    pub token_override: Option<String>,
}

impl GenerateCommand {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            enhance: true,
            style: None,
            params: GenerationParameters::default(),
            token_override: None,
        }
    }

    pub fn enhance(mut self, enhance: bool) -> Self {
        self.enhance = enhance;
        self
    }

    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn params(mut self, params: GenerationParameters) -> Self {
        self.params = params;
        self
    }

    pub fn token_override(mut self, token: impl Into<String>) -> Self {
        self.token_override = Some(token.into());
        self
    }
}

/// State owned by one user session.
///
/// Holds the last successful result (capacity one, replaced only by a newer
/// success), the fatal-failure latch and a command slot of depth one.
#[derive(Debug, Default)]
pub struct SessionContext {
    stored_credential: Option<Credential>,
    last_result: Option<DisplayedImage>,
    halted: Option<Failure>,
    pending: Option<GenerateCommand>,
}

impl SessionContext {
    pub fn new(stored_credential: Option<Credential>) -> Self {
        Self {
            stored_credential,
            ..Self::default()
        }
    }

    pub fn submit(&mut self, command: GenerateCommand) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::CommandPending);
        }
        self.pending = Some(command);
        Ok(())
    }

    pub fn take_pending(&mut self) -> Option<GenerateCommand> {
        self.pending.take()
    }

    pub fn last_result(&self) -> Option<&DisplayedImage> {
        self.last_result.as_ref()
    }

    pub(crate) fn remember(&mut self, image: DisplayedImage) {
        self.last_result = Some(image);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halted_by(&self) -> Option<&Failure> {
        self.halted.as_ref()
    }

    pub(crate) fn halt(&mut self, failure: Failure) {
        self.halted.get_or_insert(failure);
    }

    pub fn stored_credential(&self) -> Option<&Credential> {
        self.stored_credential.as_ref()
    }

    /// Override first, then the stored secret.
    pub fn credential_for(&self, token_override: Option<&str>) -> Option<Credential> {
        Credential::resolve(
            token_override,
            self.stored_credential.as_ref().map(Credential::token),
        )
    }
}

/// Runs one command end to end: validate, enhance, clamp, call the backend
/// once, present.
pub struct Orchestrator {
    backend: Backend,
    presenter: ResultPresenter,
    anonymous_fallback: bool,
}

impl Orchestrator {
    pub fn new(backend: Backend, presenter: ResultPresenter) -> Self {
        Self {
            backend,
            presenter,
            anonymous_fallback: false,
        }
    }

    /// Retry once without a token when a credentialed request is rejected.
    pub fn with_anonymous_fallback(mut self, enabled: bool) -> Self {
        self.anonymous_fallback = enabled;
        self
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn presenter(&self) -> &ResultPresenter {
        &self.presenter
    }

    fn reject(&self, session: &mut SessionContext, e: Error) -> Presentation {
        self.presenter.present_failure(session, Failure::validation(e.to_string()))
    }

    /// Consumes the pending command, if any.
    pub async fn run_pending(&self, session: &mut SessionContext) -> Option<Presentation> {
        let command = session.take_pending()?;
        Some(self.run(session, command).await)
    }

    pub async fn run(
        &self,
        session: &mut SessionContext,
        command: GenerateCommand,
    ) -> Presentation {
        let raw = command.prompt.as_str();

        if let Some(failure) = session.halted_by().cloned() {
            warn!("session halted, refusing to generate");
            return self.presenter.present_failure(session, failure);
        }

        let enhanced = match Prompt::new(raw) {
            Ok(prompt) => enhance(prompt.as_str(), command.enhance, command.style.as_deref()),
            Err(e) => return self.reject(session, e),
        };
        let prompt = match Prompt::new(enhanced) {
            Ok(prompt) => prompt,
            Err(e) => return self.reject(session, e),
        };
        let params = command.params.clamp(&self.backend.limits());
        let credential = session.credential_for(command.token_override.as_deref());

        info!(
            backend = %self.backend.kind(),
            enhanced = command.enhance,
            style = command.style.as_deref().unwrap_or("None"),
            "generating"
        );
        let mut result = self.backend.generate(&prompt, credential.as_ref(), &params).await;

        let mut warnings = Vec::new();
        if self.anonymous_fallback
            && credential.is_some()
            && self.backend.kind() == BackendKind::Remote
            && result.failure_kind() == Some(FailureKind::AuthError)
        {
            warn!("credential rejected, retrying once without it");
            let retry = self.backend.generate(&prompt, None, &params).await;
            match retry.failure() {
                None => {
                    warnings.push(ANONYMOUS_FALLBACK_WARNING.to_string());
                    result = retry;
                }
                Some(failure) => {
                    warn!(kind = %failure.kind, "anonymous retry failed as well");
                    warnings.push(format!(
                        "The API token was rejected and the anonymous retry also failed: {}",
                        failure.message
                    ));
                }
            }
        }

        let context = PromptContext {
            raw,
            enhanced: prompt.as_str(),
        };
        self.presenter
            .present(session, context, result)
            .with_warnings(warnings)
    }
}
