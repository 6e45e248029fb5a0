use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    Failure, GeneratedImage, GenerationParameters, GenerationResult, LoadedPipeline,
    ParameterLimits, PipelineRequest, Prompt,
};

/// Limits for the local flux pipeline, whose latents need sides divisible by 16.
pub const LOCAL_LIMITS: ParameterLimits = ParameterLimits {
    max_steps: ParameterLimits::STANDARD.max_steps,
    max_width: ParameterLimits::STANDARD.max_width,
    max_height: ParameterLimits::STANDARD.max_height,
    dimension_multiple: 16,
};

/// Runs a loaded pipeline and turns whatever happens into a
/// [`GenerationResult`].
#[derive(Debug, Clone, Copy)]
pub struct GenerationInvoker {
    limits: ParameterLimits,
}

impl GenerationInvoker {
    pub fn new(limits: ParameterLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ParameterLimits {
        self.limits
    }

    pub async fn invoke(
        &self,
        pipeline: &LoadedPipeline,
        prompt: &Prompt,
        params: &GenerationParameters,
    ) -> GenerationResult {
        let params = params.clamp(&self.limits);
        let request = PipelineRequest::new(prompt, &params);
        info!(
            steps = request.steps,
            width = request.width,
            height = request.height,
            "running local pipeline"
        );

        let model = Arc::clone(&pipeline.model);
        let outcome = tokio::task::spawn_blocking(move || model.run(&request)).await;
        let image = match outcome {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                warn!(error = %format!("{e:#}"), "local generation failed");
                return Failure::unknown("Local generation failed.", format!("{e:#}")).into();
            }
            Err(e) => {
                warn!(error = %e, "local generation task aborted");
                return Failure::unknown("Local generation aborted.", e.to_string()).into();
            }
        };

        match GeneratedImage::from_image(&image) {
            Ok(generated) => generated.into(),
            Err(e) => {
                Failure::unknown("Could not encode the generated image.", e.to_string()).into()
            }
        }
    }
}

impl Default for GenerationInvoker {
    fn default() -> Self {
        Self::new(LOCAL_LIMITS)
    }
}
