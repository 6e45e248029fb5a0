use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use pictura_core::{
    client::DEFAULT_ENDPOINT, BackendKind, Credential, CredentialStatus, DeviceMap, GenerateCommand,
    GenerationParameters, SessionContext, Settings, Style, View, DEFAULT_DOWNLOAD_PREFIX,
    DEFAULT_LOCAL_MODEL, EXAMPLE_PROMPTS,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate an image from a text prompt")]
struct Args {
    /// What to draw
    #[arg(required_unless_present = "list_examples")]
    prompt: Option<String>,

    /// Send the prompt as written, without the quality clause
    #[arg(long)]
    no_enhance: bool,

    /// Art style appended to the prompt (e.g. "Oil Painting")
    #[arg(long)]
    style: Option<String>,

    #[arg(long)]
    steps: Option<u32>,

    #[arg(long)]
    guidance: Option<f64>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    seed: Option<u64>,

    /// API token for this run, takes precedence over the stored one
    #[arg(long)]
    token: Option<String>,

    /// Directory the PNG is written to
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Prefix for the written filename
    #[arg(long, default_value = DEFAULT_DOWNLOAD_PREFIX)]
    prefix: String,

    /// Run the diffusion pipeline on this machine
    #[arg(long)]
    local: bool,

    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Remote request timeout, in seconds
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Clamp to resource-constrained limits
    #[arg(long)]
    constrained: bool,

    /// Retry once without a token when the token is rejected
    #[arg(long)]
    anonymous_fallback: bool,

    /// Model variant for --local
    #[arg(long, default_value = DEFAULT_LOCAL_MODEL)]
    model: String,

    /// Run --local on CPU
    #[arg(long)]
    cpu: bool,

    /// Read weights into memory instead of memory-mapping them
    #[arg(long)]
    no_mmap: bool,

    /// Print example prompts and styles, then exit
    #[arg(long)]
    list_examples: bool,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            backend: if self.local {
                BackendKind::Local
            } else {
                BackendKind::Remote
            },
            endpoint: self.endpoint.clone(),
            timeout: Duration::from_secs(self.timeout),
            constrained: self.constrained,
            download_prefix: self.prefix.clone(),
            anonymous_fallback: self.anonymous_fallback,
            model: self.model.clone(),
            device_map: DeviceMap::from_cpu_flag(self.cpu),
            low_memory: !self.no_mmap,
        }
    }

    fn command(&self, prompt: String) -> GenerateCommand {
        let params = GenerationParameters::from_options(
            self.steps,
            self.guidance,
            self.width,
            self.height,
            self.seed,
        );
        let mut command = GenerateCommand::new(prompt)
            .enhance(!self.no_enhance)
            .params(params);
        if let Some(style) = &self.style {
            command = command.style(style);
        }
        if let Some(token) = &self.token {
            command = command.token_override(token);
        }
        command
    }
}

fn list_examples() {
    println!("Example prompts:");
    for prompt in EXAMPLE_PROMPTS {
        println!("  {prompt}");
    }
    println!("Styles:");
    for style in Style::ALL {
        println!("  {style}");
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let prompt = match args.prompt.clone() {
        Some(prompt) if !args.list_examples => prompt,
        _ => {
            list_examples();
            return Ok(ExitCode::SUCCESS);
        }
    };

    let stored = Credential::stored_from_env();
    let orchestrator = args
        .settings()
        .build_orchestrator(stored.as_ref())
        .context("failed to set up the generation backend")?;
    let mut session = SessionContext::new(stored);

    let status = CredentialStatus::of(session.credential_for(args.token.as_deref()).as_ref());
    match status.origin {
        None if !args.local => warn!("no API token found, using the free tier"),
        origin => info!(?origin, tier = status.tier, "credential resolved"),
    }
    session.submit(args.command(prompt))?;

    let Some(presentation) = orchestrator.run_pending(&mut session).await else {
        return Ok(ExitCode::FAILURE);
    };
    for warning in &presentation.warnings {
        eprintln!("warning: {warning}");
    }

    match presentation.view {
        View::Image(image) => {
            let path = image
                .download
                .save_to(&args.out_dir)
                .with_context(|| format!("failed to write {}", image.download.filename))?;
            println!("{}", image.enhanced_prompt);
            println!("{}x{} written to {}", image.width, image.height, path.display());
            Ok(ExitCode::SUCCESS)
        }
        View::Failure(notice) => {
            eprintln!("error: {}", notice.failure.message);
            if let Some(detail) = &notice.failure.detail {
                eprintln!("detail: {detail}");
            }
            eprintln!("hint: {}", notice.hint);
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    // a missing .env is normal
    dotenvy::dotenv().ok();

    run(Args::parse()).await
}
