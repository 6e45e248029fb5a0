use std::{sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use pictura_core::{
    client::DEFAULT_ENDPOINT, Backend, BackendKind, Credential, DeviceMap, Failure, SessionContext,
    Settings, DEFAULT_DOWNLOAD_PREFIX, DEFAULT_LOCAL_MODEL,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod routes;

use routes::AppState;

// Define command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Pictura image generation server")]
struct Args {
    /// Which backend generates images
    #[arg(long, default_value_t = BackendKind::Remote)]
    backend: BackendKind,

    /// Inference endpoint for the remote backend
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Request timeout for the remote backend, in seconds
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Clamp to resource-constrained limits (30 steps, 512x512)
    #[arg(long)]
    constrained: bool,

    /// Retry once without a token when the token is rejected
    #[arg(long)]
    anonymous_fallback: bool,

    /// Model variant for the local backend
    #[arg(long, default_value = DEFAULT_LOCAL_MODEL)]
    model: String,

    /// Use CPU instead of GPU
    #[arg(long)]
    cpu: bool,

    /// Read weights into memory instead of memory-mapping them
    #[arg(long)]
    no_mmap: bool,

    /// Load the local model at startup instead of on first request
    #[arg(long)]
    preload: bool,

    /// Prefix for download filenames
    #[arg(long, default_value = DEFAULT_DOWNLOAD_PREFIX)]
    download_prefix: String,

    /// Host address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 8000)]
    port: u16,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            backend: self.backend,
            endpoint: self.endpoint.clone(),
            timeout: Duration::from_secs(self.timeout),
            constrained: self.constrained,
            download_prefix: self.download_prefix.clone(),
            anonymous_fallback: self.anonymous_fallback,
            model: self.model.clone(),
            device_map: DeviceMap::from_cpu_flag(self.cpu),
            low_memory: !self.no_mmap,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    if let Err(e) = dotenvy::dotenv() {
        info!("no .env file loaded: {e}");
    }

    let args = Args::parse();
    let stored = Credential::stored_from_env();
    if stored.is_none() {
        warn!("no stored API token, requests use the free tier unless a token is supplied");
    }

    let orchestrator = args.settings().build_orchestrator(stored.as_ref())?;
    let mut session = SessionContext::new(stored);

    if args.preload {
        if let Backend::Local(local) = orchestrator.backend() {
            if let Err(e) = local.loader.load().await {
                error!(error = %e, "preload failed, generation is disabled until restart");
                orchestrator
                    .presenter()
                    .present_failure(&mut session, Failure::load_failure(e.to_string()));
            }
        }
    }

    let shared_state = Arc::new(AppState::new(orchestrator, session));
    let app = routes::router(shared_state);

    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address).await?;
    info!(backend = %args.backend, "started server on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_hosted_endpoint() {
        let args = Args::parse_from(["pictura-server"]);
        let settings = args.settings();
        assert_eq!(settings.backend, BackendKind::Remote);
        assert_eq!(settings.timeout, Duration::from_secs(60));
        assert!(settings.low_memory);
        assert!(!args.preload);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(Args::try_parse_from(["pictura-server", "--timeout", "0"]).is_err());
        let args = Args::try_parse_from(["pictura-server", "--timeout", "120"]).unwrap();
        assert_eq!(args.settings().timeout, Duration::from_secs(120));
    }
}
