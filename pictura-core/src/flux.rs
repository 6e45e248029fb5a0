//! FLUX.1 text-to-image pipeline.
//!
//! Every model and the sampling procedure come from `candle-transformers`;
//! this module only fetches weights, wires the pieces together and turns the
//! decoded tensor into an image. No content-safety filter is installed.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::{Module, VarBuilder};
use candle_transformers::models::{
    clip::text_model::{Activation, ClipTextConfig, ClipTextTransformer},
    flux::{self, autoencoder::AutoEncoder, model::Flux},
    t5::{self, T5EncoderModel},
};
use hf_hub::api::sync::{Api, ApiBuilder};
use hf_hub::{Repo, RepoType};
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::{debug, warn};

use crate::{tensor_to_image, Loader, ModelLike, PipelineOptions, PipelineRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluxVariant {
    Schnell,
    Dev,
}

impl FluxVariant {
    /// Detect model variant from model name
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();
        if !name_upper.contains("FLUX") {
            return None;
        }
        if name_upper.contains("DEV") {
            Some(FluxVariant::Dev)
        } else {
            Some(FluxVariant::Schnell)
        }
    }

    fn repo(&self) -> &'static str {
        match self {
            FluxVariant::Schnell => "black-forest-labs/FLUX.1-schnell",
            FluxVariant::Dev => "black-forest-labs/FLUX.1-dev",
        }
    }

    fn weights_file(&self) -> &'static str {
        match self {
            FluxVariant::Schnell => "flux1-schnell.safetensors",
            FluxVariant::Dev => "flux1-dev.safetensors",
        }
    }

    fn t5_max_tokens(&self) -> usize {
        match self {
            FluxVariant::Schnell => 256,
            FluxVariant::Dev => 512,
        }
    }
}

pub struct FluxModel {
    variant: FluxVariant,
    device: Device,
    dtype: DType,
    // the T5 encoder keeps an internal cache, so `forward` needs `&mut`
    t5_model: Mutex<T5EncoderModel>,
    t5_tokenizer: Tokenizer,
    clip_model: ClipTextTransformer,
    clip_tokenizer: Tokenizer,
    autoencoder: AutoEncoder,
    flux_model: Flux,
}

impl ModelLike for FluxModel {
    fn run(&self, request: &PipelineRequest) -> Result<DynamicImage> {
        let (width, height) = (request.width, request.height);

        if let Some(seed) = request.seed {
            if let Err(e) = self.device.set_seed(seed) {
                warn!(error = %e, seed, "device does not support seeding, continuing unseeded");
            }
        }

        let noise_img =
            flux::sampling::get_noise(1, height, width, &self.device)?.to_dtype(self.dtype)?;

        let mut t5_tokens = self
            .t5_tokenizer
            .encode(request.prompt.as_str(), true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        t5_tokens.resize(self.variant.t5_max_tokens(), 0);
        let t5_ids = Tensor::new(&*t5_tokens, &self.device)?.unsqueeze(0)?;
        let t5_emb = {
            let mut t5 = self
                .t5_model
                .lock()
                .map_err(|_| anyhow!("T5 encoder lock poisoned"))?;
            t5.forward(&t5_ids)?.to_dtype(self.dtype)?
        };

        let clip_tokens = self
            .clip_tokenizer
            .encode(request.prompt.as_str(), true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        let clip_ids = Tensor::new(&*clip_tokens, &self.device)?.unsqueeze(0)?;
        let clip_emb = self.clip_model.forward(&clip_ids)?.to_dtype(self.dtype)?;

        let state = flux::sampling::State::new(&t5_emb, &clip_emb, &noise_img)?;
        let timesteps = match self.variant {
            FluxVariant::Schnell => flux::sampling::get_schedule(request.steps, None),
            FluxVariant::Dev => {
                flux::sampling::get_schedule(request.steps, Some((state.img.dim(1)?, 0.5, 1.15)))
            }
        };

        let latent_img = flux::sampling::denoise(
            &self.flux_model,
            &state.img,
            &state.img_ids,
            &state.txt,
            &state.txt_ids,
            &state.vec,
            &timesteps,
            request.guidance,
        )?;
        let unpacked = flux::sampling::unpack(&latent_img, height, width)?;
        debug!("generated latent image");

        let decoded = self.autoencoder.decode(&unpacked)?;
        let img = ((decoded.clamp(-1f32, 1f32)? + 1.0)? * 127.5)?.to_dtype(DType::U8)?;
        tensor_to_image(&img.i(0)?)
    }
}

/// Fetches FLUX.1 weights from the hub and builds a [`FluxModel`].
pub struct FluxLoader {
    variant: FluxVariant,
    hub_token: Option<String>,
}

impl FluxLoader {
    pub fn new(variant: FluxVariant) -> Self {
        Self {
            variant,
            hub_token: None,
        }
    }

    pub fn from_model_name(model_name: &str) -> Result<Self> {
        FluxVariant::from_name(model_name)
            .map(Self::new)
            .ok_or_else(|| anyhow!("Unsupported model: {model_name}"))
    }

    /// Token for gated repositories such as FLUX.1-dev.
    pub fn with_hub_token(mut self, token: Option<String>) -> Self {
        self.hub_token = token;
        self
    }

    fn api(&self) -> Result<Api> {
        ApiBuilder::new()
            .with_token(self.hub_token.clone())
            .build()
            .context("failed to create hf hub API")
    }
}

fn var_builder(
    file: PathBuf,
    dtype: DType,
    device: &Device,
    options: &PipelineOptions,
) -> Result<VarBuilder<'static>> {
    if options.low_memory {
        // SAFETY: the hub cache files are not modified while mapped.
        unsafe { Ok(VarBuilder::from_mmaped_safetensors(&[file], dtype, device)?) }
    } else {
        let data = std::fs::read(&file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        Ok(VarBuilder::from_buffered_safetensors(data, dtype, device)?)
    }
}

impl Loader for FluxLoader {
    fn name(&self) -> String {
        self.variant.repo().to_string()
    }

    fn load(
        &self,
        device: &Device,
        dtype: DType,
        options: &PipelineOptions,
    ) -> Result<Arc<dyn ModelLike>> {
        if options.safety_checker {
            bail!("the flux pipeline has no content-safety filter to enable");
        }
        let api = self.api()?;

        let t5_repo = api.repo(Repo::with_revision(
            "google/t5-v1_1-xxl".to_string(),
            RepoType::Model,
            "refs/pr/2".to_string(),
        ));
        let t5_model_file = t5_repo
            .get("model.safetensors")
            .context("failed to load T5 model file")?;
        let t5_vb = var_builder(t5_model_file, dtype, device, options)
            .context("failed to build T5 var builder")?;
        let config_filename = t5_repo.get("config.json").context("failed to get T5 config")?;
        let config_str =
            std::fs::read_to_string(&config_filename).context("failed to read T5 config")?;
        let t5_config: t5::Config =
            serde_json::from_str(&config_str).context("failed to parse T5 config")?;
        let t5_model =
            T5EncoderModel::load(t5_vb, &t5_config).context("failed to load T5 model")?;
        let t5_tokenizer_filename = api
            .model("lmz/mt5-tokenizers".to_string())
            .get("t5-v1_1-xxl.tokenizer.json")
            .context("failed to get T5 tokenizer")?;
        let t5_tokenizer = Tokenizer::from_file(t5_tokenizer_filename)
            .map_err(Error::msg)
            .context("failed to load T5 tokenizer")?;

        let clip_repo = api.repo(Repo::model("openai/clip-vit-large-patch14".to_string()));
        let clip_model_file = clip_repo
            .get("model.safetensors")
            .context("failed to get CLIP model file")?;
        let clip_vb = var_builder(clip_model_file, dtype, device, options)
            .context("failed to build CLIP var builder")?;
        let clip_config = ClipTextConfig {
            vocab_size: 49408,
            projection_dim: 768,
            activation: Activation::QuickGelu,
            intermediate_size: 3072,
            embed_dim: 768,
            max_position_embeddings: 77,
            pad_with: None,
            num_hidden_layers: 12,
            num_attention_heads: 12,
        };
        let clip_model = ClipTextTransformer::new(clip_vb.pp("text_model"), &clip_config)
            .context("failed to load CLIP model")?;
        let clip_tokenizer_filename = clip_repo
            .get("tokenizer.json")
            .context("failed to get CLIP tokenizer")?;
        let clip_tokenizer = Tokenizer::from_file(clip_tokenizer_filename)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;

        let bf_repo = api.repo(Repo::model(self.variant.repo().to_string()));
        let autoencoder_model_file = bf_repo
            .get("ae.safetensors")
            .context("failed to get autoencoder model file")?;
        let autoencoder_vb = var_builder(autoencoder_model_file, dtype, device, options)
            .context("failed to build autoencoder var builder")?;
        let autoencoder_config = match self.variant {
            FluxVariant::Schnell => flux::autoencoder::Config::schnell(),
            FluxVariant::Dev => flux::autoencoder::Config::dev(),
        };
        let autoencoder = AutoEncoder::new(&autoencoder_config, autoencoder_vb)
            .context("failed to load autoencoder")?;

        let flux_model_file = bf_repo
            .get(self.variant.weights_file())
            .context("failed to get flux model file")?;
        let flux_vb = var_builder(flux_model_file, dtype, device, options)
            .context("failed to build flux var builder")?;
        let flux_config = match self.variant {
            FluxVariant::Schnell => flux::model::Config::schnell(),
            FluxVariant::Dev => flux::model::Config::dev(),
        };
        let flux_model = Flux::new(&flux_config, flux_vb).context("failed to load flux model")?;

        Ok(Arc::new(FluxModel {
            variant: self.variant,
            device: device.clone(),
            dtype,
            t5_model: Mutex::new(t5_model),
            t5_tokenizer,
            clip_model,
            clip_tokenizer,
            autoencoder,
            flux_model,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_variant_from_name() {
        assert_eq!(
            FluxVariant::from_name("black-forest-labs/FLUX.1-schnell"),
            Some(FluxVariant::Schnell)
        );
        assert_eq!(FluxVariant::from_name("flux.1-dev"), Some(FluxVariant::Dev));
        assert_eq!(FluxVariant::from_name("flux"), Some(FluxVariant::Schnell));
        assert_eq!(FluxVariant::from_name("runwayml/stable-diffusion-v1-5"), None);
    }

    #[test]
    fn unsupported_model_names_are_rejected() {
        assert!(FluxLoader::from_model_name("stable-diffusion").is_err());
        assert_eq!(
            FluxLoader::from_model_name("FLUX.1-dev").unwrap().name(),
            "black-forest-labs/FLUX.1-dev"
        );
    }

    #[test]
    fn safety_checker_cannot_be_enabled() {
        let options = PipelineOptions {
            safety_checker: true,
            ..PipelineOptions::default()
        };
        let err = FluxLoader::new(FluxVariant::Schnell)
            .load(&Device::Cpu, DType::F32, &options)
            .err()
            .unwrap();
        assert!(err.to_string().contains("content-safety"));
    }
}
