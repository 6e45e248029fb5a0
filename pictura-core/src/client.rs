use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    Credential, Error, Failure, GeneratedImage, GenerationParameters, GenerationResult, Prompt,
    Result,
};

pub const DEFAULT_ENDPOINT: &str =
    "https://api-inference.huggingface.co/models/runwayml/stable-diffusion-v1-5";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct InferencePayload<'a> {
    inputs: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<InferenceParameters>,
}

#[derive(Debug, Serialize)]
struct InferenceParameters {
    num_inference_steps: u32,
    guidance_scale: f64,
    width: u32,
    height: u32,
}

impl From<&GenerationParameters> for InferenceParameters {
    fn from(params: &GenerationParameters) -> Self {
        Self {
            num_inference_steps: params.steps,
            guidance_scale: params.guidance_scale,
            width: params.width,
            height: params.height,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for a remote text-to-image inference endpoint.
///
/// Each call sends exactly one POST and never retries; every outcome,
/// including transport errors, comes back as a [`GenerationResult`].
#[derive(Debug, Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl InferenceClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| Error::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidEndpoint(format!(
                "{endpoint}: scheme must be http or https"
            )));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: url,
            timeout,
        })
    }

    pub async fn generate(
        &self,
        prompt: &Prompt,
        credential: Option<&Credential>,
        params: &GenerationParameters,
    ) -> GenerationResult {
        let payload = InferencePayload {
            inputs: prompt.as_str(),
            parameters: Some(params.into()),
        };
        let mut request = self.http.post(self.endpoint.clone()).json(&payload);
        if let Some(credential) = credential {
            request = request.bearer_auth(credential.token());
        }

        info!(
            endpoint = %self.endpoint,
            authenticated = credential.is_some(),
            "submitting inference request"
        );
        debug!(?params, prompt = prompt.as_str(), "inference payload");

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return self.transport_failure(e),
        };
        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return self.transport_failure(e),
        };

        let result = classify_response(status, &body);
        if let Some(failure) = result.failure() {
            warn!(%status, kind = %failure.kind, "inference request failed");
        }
        result
    }

    fn transport_failure(&self, e: reqwest::Error) -> GenerationResult {
        if e.is_timeout() {
            warn!(timeout_secs = self.timeout.as_secs(), "inference request timed out");
            return Failure::timeout(self.timeout.as_secs()).into();
        }
        warn!(error = %e, "inference transport error");
        Failure::unknown(format!("Network error: {e}"), format!("{e:?}")).into()
    }
}

/// Maps an HTTP status and body onto a generation outcome.
pub fn classify_response(status: StatusCode, body: &[u8]) -> GenerationResult {
    match status {
        StatusCode::OK => match GeneratedImage::from_encoded(body.to_vec()) {
            Ok(image) => image.into(),
            Err(e) => Failure::unknown(
                "The backend answered, but not with an image.",
                error_detail(body).unwrap_or_else(|| e.to_string()),
            )
            .into(),
        },
        StatusCode::SERVICE_UNAVAILABLE => with_body_detail(Failure::model_loading(), body).into(),
        StatusCode::TOO_MANY_REQUESTS => with_body_detail(Failure::rate_limited(), body).into(),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            with_body_detail(Failure::auth_error(status.as_u16()), body).into()
        }
        other => Failure::unknown(
            format!("Error {}. Try again in a few minutes.", other.as_u16()),
            error_detail(body).unwrap_or_else(|| other.to_string()),
        )
        .into(),
    }
}

fn with_body_detail(failure: Failure, body: &[u8]) -> Failure {
    match error_detail(body) {
        Some(detail) => failure.with_detail(detail),
        None => failure,
    }
}

/// Best-effort extraction of `{"error": "..."}`.
fn error_detail(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .map(|b| b.error)
}
