use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::{prelude::BASE64_STANDARD, Engine};
use pictura_core::{
    Backend, BackendKind, CredentialStatus, FailureKind, FailureNotice, GenerateCommand,
    GenerationParameters, Orchestrator, ParameterLimits, Presentation, SessionContext, Style,
    View, EXAMPLE_PROMPTS,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;

// One orchestrator and one session per process.
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub session: Mutex<SessionContext>,
    // the stored credential never changes, so its status is read without the lock
    credential: CredentialStatus,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, session: SessionContext) -> Self {
        Self {
            credential: CredentialStatus::of(session.stored_credential()),
            orchestrator,
            session: Mutex::new(session),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/images/generations", post(generate_image_handler))
        .route("/v1/images/last", get(last_image_handler))
        .route("/v1/images/last/download", get(download_handler))
        .route("/v1/status", get(status_handler))
        .route("/v1/examples", get(examples_handler))
        .with_state(state)
}

fn default_enhance() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub prompt: String,
    #[serde(default = "default_enhance")]
    pub enhance: bool,
    pub style: Option<String>,
    pub steps: Option<u32>,
    pub guidance: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seed: Option<u64>,
    pub token: Option<String>,
}

impl GenerateBody {
    pub fn into_command(self) -> GenerateCommand {
        let params = GenerationParameters::from_options(
            self.steps,
            self.guidance,
            self.width,
            self.height,
            self.seed,
        );
        GenerateCommand {
            prompt: self.prompt,
            enhance: self.enhance,
            style: self.style,
            params,
            token_override: self.token,
        }
    }
}

#[derive(Serialize)]
struct GeneratedBody<'a> {
    prompt: &'a str,
    enhanced_prompt: &'a str,
    width: u32,
    height: u32,
    filename: &'a str,
    image: String,
    warnings: &'a [String],
}

#[derive(Serialize)]
struct FailureBody<'a> {
    #[serde(flatten)]
    notice: &'a FailureNotice,
    warnings: &'a [String],
}

pub fn status_for(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
        FailureKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        FailureKind::ModelLoading => StatusCode::SERVICE_UNAVAILABLE,
        FailureKind::AuthError => StatusCode::UNAUTHORIZED,
        FailureKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        FailureKind::LoadFailure => StatusCode::INTERNAL_SERVER_ERROR,
        FailureKind::Unknown => StatusCode::BAD_GATEWAY,
    }
}

fn busy() -> Response {
    (
        StatusCode::CONFLICT,
        Json(json!({ "error": "a generation is already in progress" })),
    )
        .into_response()
}

pub fn presentation_response(presentation: &Presentation) -> Response {
    match &presentation.view {
        View::Image(image) => Json(GeneratedBody {
            prompt: &image.caption,
            enhanced_prompt: &image.enhanced_prompt,
            width: image.width,
            height: image.height,
            filename: &image.download.filename,
            image: BASE64_STANDARD.encode(&image.download.bytes),
            warnings: &presentation.warnings,
        })
        .into_response(),
        View::Failure(notice) => (
            status_for(notice.failure.kind),
            Json(FailureBody {
                notice,
                warnings: &presentation.warnings,
            }),
        )
            .into_response(),
    }
}

pub async fn generate_image_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateBody>,
) -> Response {
    // a second submission while one is running is refused, not queued
    let Ok(mut session) = state.session.try_lock() else {
        warn!("rejecting submission while busy");
        return busy();
    };
    if session.submit(body.into_command()).is_err() {
        return busy();
    }
    match state.orchestrator.run_pending(&mut session).await {
        Some(presentation) => presentation_response(&presentation),
        None => busy(),
    }
}

pub async fn last_image_handler(State(state): State<Arc<AppState>>) -> Response {
    let session = state.session.lock().await;
    match session.last_result() {
        Some(image) => Json(json!({
            "prompt": image.caption,
            "enhanced_prompt": image.enhanced_prompt,
            "width": image.width,
            "height": image.height,
            "filename": image.download.filename,
            "generated_at": image.generated_at.to_rfc3339(),
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no image generated yet" })),
        )
            .into_response(),
    }
}

pub async fn download_handler(State(state): State<Arc<AppState>>) -> Response {
    let session = state.session.lock().await;
    let Some(image) = session.last_result() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no image generated yet" })),
        )
            .into_response();
    };
    let download = &image.download;
    (
        [
            (header::CONTENT_TYPE, download.mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download.filename),
            ),
        ],
        download.bytes.clone(),
    )
        .into_response()
}

#[derive(Serialize)]
struct SessionStatus {
    halted: bool,
    halted_reason: Option<String>,
    has_image: bool,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    backend: BackendKind,
    limits: ParameterLimits,
    credential: &'a CredentialStatus,
    model_loaded: Option<bool>,
    busy: bool,
    /// Absent while a generation holds the session.
    session: Option<SessionStatus>,
}

pub async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    let backend = state.orchestrator.backend();
    let model_loaded = match backend {
        Backend::Local(local) => Some(local.loader.is_loaded()),
        Backend::Remote(_) => None,
    };
    let session = state.session.try_lock().ok().map(|session| SessionStatus {
        halted: session.is_halted(),
        halted_reason: session.halted_by().map(|f| f.message.clone()),
        has_image: session.last_result().is_some(),
    });
    Json(StatusBody {
        backend: backend.kind(),
        limits: backend.limits(),
        credential: &state.credential,
        model_loaded,
        busy: session.is_none(),
        session,
    })
    .into_response()
}

pub async fn examples_handler() -> Response {
    Json(json!({
        "prompts": EXAMPLE_PROMPTS,
        "styles": Style::ALL,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, net::SocketAddr, time::Duration};

    use image::{DynamicImage, ImageFormat, RgbImage};
    use pictura_core::{InferenceClient, ResultPresenter};
    use serde_json::Value;
    use tokio::{net::TcpListener, sync::Notify};

    use super::*;

    #[test]
    fn failure_kinds_map_to_distinct_statuses() {
        assert_eq!(status_for(FailureKind::ModelLoading), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(FailureKind::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(FailureKind::AuthError), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(FailureKind::ValidationError), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn body_defaults_to_enhanced_prompt() {
        let body: GenerateBody =
            serde_json::from_str(r#"{"prompt":"a red fox in snow"}"#).unwrap();
        let command = body.into_command();
        assert!(command.enhance);
        assert_eq!(command.style, None);
        assert_eq!(command.params, GenerationParameters::default());
        assert_eq!(command.token_override, None);
    }

    #[test]
    fn body_carries_overrides() {
        let body: GenerateBody = serde_json::from_str(
            r#"{"prompt":"castle","enhance":false,"style":"Anime","steps":10,"width":256,"token":"hf_x"}"#,
        )
        .unwrap();
        let command = body.into_command();
        assert!(!command.enhance);
        assert_eq!(command.style.as_deref(), Some("Anime"));
        assert_eq!(command.params.steps, 10);
        assert_eq!(command.params.width, 256);
        assert_eq!(command.params.height, 512);
        assert_eq!(command.token_override.as_deref(), Some("hf_x"));
    }

    /// Upstream that answers only once the test releases it.
    #[derive(Clone, Default)]
    struct Gate {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    async fn gated(State(gate): State<Gate>) -> impl IntoResponse {
        gate.entered.notify_one();
        gate.release.notified().await;
        (StatusCode::OK, png(64, 64))
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn spawn_server() -> (SocketAddr, Gate) {
        let gate = Gate::default();
        let upstream = serve(
            Router::new()
                .route("/models/gated", post(gated))
                .with_state(gate.clone()),
        )
        .await;
        let client = InferenceClient::new(
            &format!("http://{upstream}/models/gated"),
            Duration::from_secs(10),
        )
        .unwrap();
        let orchestrator = Orchestrator::new(
            Backend::remote(client, ParameterLimits::STANDARD),
            ResultPresenter::new("shot"),
        );
        let state = Arc::new(AppState::new(orchestrator, SessionContext::default()));
        (serve(router(state)).await, gate)
    }

    #[tokio::test]
    async fn nothing_to_show_before_first_image() {
        let (addr, _) = spawn_server().await;
        let http = reqwest::Client::new();
        for path in ["/v1/images/last", "/v1/images/last/download"] {
            let response = http
                .get(format!("http://{addr}{path}"))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn second_submission_while_generating_is_refused() {
        let (addr, gate) = spawn_server().await;
        let http = reqwest::Client::new();
        let url = format!("http://{addr}/v1/images/generations");

        let first = tokio::spawn({
            let (http, url) = (http.clone(), url.clone());
            async move {
                http.post(url)
                    .json(&json!({ "prompt": "a red fox in snow" }))
                    .send()
                    .await
                    .unwrap()
            }
        });
        gate.entered.notified().await;

        let second = http
            .post(&url)
            .json(&json!({ "prompt": "a castle on a hill" }))
            .send()
            .await
            .unwrap();
        assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);

        let status: Value = http
            .get(format!("http://{addr}/v1/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["busy"], true);
        assert!(status["session"].is_null());
        assert_eq!(status["credential"]["tier"], "free");

        gate.release.notify_one();
        let first = first.await.unwrap();
        assert_eq!(first.status(), reqwest::StatusCode::OK);
        let body: Value = first.json().await.unwrap();
        assert_eq!(
            body["enhanced_prompt"],
            "a red fox in snow, high quality, detailed, beautiful"
        );

        let status: Value = http
            .get(format!("http://{addr}/v1/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["busy"], false);
        assert_eq!(status["session"]["has_image"], true);
    }

    #[tokio::test]
    async fn download_serves_the_last_png() {
        let (addr, gate) = spawn_server().await;
        let http = reqwest::Client::new();
        gate.release.notify_one();
        let generated: Value = http
            .post(format!("http://{addr}/v1/images/generations"))
            .json(&json!({ "prompt": "a red fox in snow" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let filename = generated["filename"].as_str().unwrap().to_string();
        assert!(filename.starts_with("shot_"));
        assert!(filename.ends_with(".png"));
        let stamp = &filename["shot_".len()..filename.len() - ".png".len()];
        assert!(stamp.parse::<i64>().is_ok());

        let response = http
            .get(format!("http://{addr}/v1/images/last/download"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let headers = response.headers().clone();
        assert_eq!(headers[header::CONTENT_TYPE.as_str()], "image/png");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION.as_str()],
            format!("attachment; filename=\"{filename}\"").as_str()
        );
        let bytes = response.bytes().await.unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
    }
}
