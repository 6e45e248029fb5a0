use std::time::Duration;

use crate::{
    client::{DEFAULT_ENDPOINT, DEFAULT_TIMEOUT},
    invoker::LOCAL_LIMITS,
    Backend, BackendKind, Credential, DeviceMap, Error, FluxLoader, GenerationInvoker,
    InferenceClient, ModelLoader, Orchestrator, ParameterLimits, PipelineOptions, Result,
    ResultPresenter, DEFAULT_DOWNLOAD_PREFIX,
};

pub const DEFAULT_LOCAL_MODEL: &str = "black-forest-labs/FLUX.1-schnell";

/// Everything needed to assemble an [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: BackendKind,
    pub endpoint: String,
    pub timeout: Duration,
    pub constrained: bool,
    pub download_prefix: String,
    pub anonymous_fallback: bool,
    pub model: String,
    pub device_map: DeviceMap,
    pub low_memory: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Remote,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            constrained: false,
            download_prefix: DEFAULT_DOWNLOAD_PREFIX.to_string(),
            anonymous_fallback: false,
            model: DEFAULT_LOCAL_MODEL.to_string(),
            device_map: DeviceMap::default(),
            low_memory: true,
        }
    }
}

impl Settings {
    pub fn limits(&self) -> ParameterLimits {
        let base = match self.backend {
            BackendKind::Remote => ParameterLimits::STANDARD,
            BackendKind::Local => LOCAL_LIMITS,
        };
        if self.constrained {
            ParameterLimits::CONSTRAINED.with_dimension_multiple(base.dimension_multiple)
        } else {
            base
        }
    }

    /// `stored` is only used by the local backend, to reach gated weights.
    pub fn build_backend(&self, stored: Option<&Credential>) -> Result<Backend> {
        match self.backend {
            BackendKind::Remote => {
                let client = InferenceClient::new(&self.endpoint, self.timeout)?;
                Ok(Backend::remote(client, self.limits()))
            }
            BackendKind::Local => {
                let loader = FluxLoader::from_model_name(&self.model)
                    .map_err(Error::Load)?
                    .with_hub_token(stored.map(|c| c.token().to_string()));
                let options = PipelineOptions {
                    device_map: self.device_map,
                    low_memory: self.low_memory,
                    safety_checker: false,
                };
                Ok(Backend::local(
                    ModelLoader::new(loader, options),
                    GenerationInvoker::new(self.limits()),
                ))
            }
        }
    }

    pub fn build_orchestrator(&self, stored: Option<&Credential>) -> Result<Orchestrator> {
        let backend = self.build_backend(stored)?;
        Ok(Orchestrator::new(backend, ResultPresenter::new(&self.download_prefix))
            .with_anonymous_fallback(self.anonymous_fallback))
    }
}
