use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{
    Credential, Failure, GenerationInvoker, GenerationParameters, GenerationResult,
    InferenceClient, ModelLoader, ParameterLimits, Prompt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Remote,
    Local,
}

serde_plain::derive_display_from_serialize!(BackendKind);
serde_plain::derive_fromstr_from_deserialize!(BackendKind);

pub struct RemoteBackend {
    pub client: InferenceClient,
    pub limits: ParameterLimits,
}

pub struct LocalBackend {
    pub loader: ModelLoader,
    pub invoker: GenerationInvoker,
}

/// The single generation backend a session talks to.
pub enum Backend {
    Remote(RemoteBackend),
    Local(LocalBackend),
}

impl Backend {
    pub fn remote(client: InferenceClient, limits: ParameterLimits) -> Self {
        Backend::Remote(RemoteBackend { client, limits })
    }

    pub fn local(loader: ModelLoader, invoker: GenerationInvoker) -> Self {
        Backend::Local(LocalBackend { loader, invoker })
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Remote(_) => BackendKind::Remote,
            Backend::Local(_) => BackendKind::Local,
        }
    }

    pub fn limits(&self) -> ParameterLimits {
        match self {
            Backend::Remote(remote) => remote.limits,
            Backend::Local(local) => local.invoker.limits(),
        }
    }

    /// Local pipelines take no credential; it is ignored there.
    pub async fn generate(
        &self,
        prompt: &Prompt,
        credential: Option<&Credential>,
        params: &GenerationParameters,
    ) -> GenerationResult {
        match self {
            Backend::Remote(remote) => remote.client.generate(prompt, credential, params).await,
            Backend::Local(local) => match local.loader.load().await {
                Ok(pipeline) => local.invoker.invoke(&pipeline, prompt, params).await,
                Err(e) => {
                    error!(error = %e, "local model failed to load");
                    Failure::load_failure(e.to_string()).into()
                }
            },
        }
    }
}
