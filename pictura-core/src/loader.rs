use std::sync::Arc;

use anyhow::Context;
use candle_core::{DType, Device};
use image::DynamicImage;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::{precision_for, DeviceMap, Error, GenerationParameters, Prompt, Result};

/// Inputs handed to a pipeline for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRequest {
    pub prompt: String,
    pub width: usize,
    pub height: usize,
    pub steps: usize,
    pub guidance: f64,
    pub seed: Option<u64>,
}

impl PipelineRequest {
    pub fn new(prompt: &Prompt, params: &GenerationParameters) -> Self {
        Self {
            prompt: prompt.as_str().to_string(),
            width: params.width as usize,
            height: params.height as usize,
            steps: params.steps as usize,
            guidance: params.guidance_scale,
            seed: params.seed,
        }
    }
}

/// A constructed text-to-image pipeline. The whole sampling procedure lives
/// behind `run`.
pub trait ModelLike: Send + Sync {
    fn run(&self, request: &PipelineRequest) -> anyhow::Result<DynamicImage>;
}

/// Fixed configuration applied when a pipeline is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub device_map: DeviceMap,
    /// Memory-map weights instead of reading them into memory up front.
    pub low_memory: bool,
    pub safety_checker: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            device_map: DeviceMap::default(),
            low_memory: true,
            safety_checker: false,
        }
    }
}

/// Builds a pipeline on an already selected device.
pub trait Loader: Send + Sync {
    fn name(&self) -> String;

    fn load(
        &self,
        device: &Device,
        dtype: DType,
        options: &PipelineOptions,
    ) -> anyhow::Result<Arc<dyn ModelLike>>;
}

/// A pipeline together with the device and precision it was built for.
pub struct LoadedPipeline {
    pub model: Arc<dyn ModelLike>,
    pub device: Device,
    pub dtype: DType,
}

/// Loads a pipeline once and hands out the same handle afterwards.
///
/// A failed load is not cached; callers are expected to stop submitting work
/// once they have seen a load failure.
pub struct ModelLoader {
    loader: Arc<dyn Loader>,
    options: PipelineOptions,
    cell: OnceCell<Arc<LoadedPipeline>>,
}

impl ModelLoader {
    pub fn new(loader: impl Loader + 'static, options: PipelineOptions) -> Self {
        Self {
            loader: Arc::new(loader),
            options,
            cell: OnceCell::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    pub fn get(&self) -> Option<Arc<LoadedPipeline>> {
        self.cell.get().cloned()
    }

    pub async fn load(&self) -> Result<Arc<LoadedPipeline>> {
        self.cell
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                let options = self.options.clone();
                let loaded =
                    tokio::task::spawn_blocking(move || construct(loader.as_ref(), &options))
                        .await
                        .map_err(|e| Error::Load(anyhow::Error::new(e)))?;
                loaded.map(Arc::new).map_err(|e| {
                    error!(error = %format!("{e:#}"), "pipeline construction failed");
                    Error::Load(e)
                })
            })
            .await
            .cloned()
    }
}

fn construct(loader: &dyn Loader, options: &PipelineOptions) -> anyhow::Result<LoadedPipeline> {
    let device = options.device_map.open().context("failed to set up device")?;
    let dtype = precision_for(&device);
    info!(
        pipeline = %loader.name(),
        device = ?device,
        ?dtype,
        low_memory = options.low_memory,
        safety_checker = options.safety_checker,
        "loading pipeline"
    );
    let model = loader.load(&device, dtype, options)?;
    info!(pipeline = %loader.name(), "pipeline ready");
    Ok(LoadedPipeline {
        model,
        device,
        dtype,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::{Rgb, RgbImage};

    use super::*;

    /// Paints a solid image of the requested size.
    pub struct SolidModel;

    impl ModelLike for SolidModel {
        fn run(&self, request: &PipelineRequest) -> anyhow::Result<DynamicImage> {
            if request.prompt.contains("explode") {
                anyhow::bail!("out of memory");
            }
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                request.width as u32,
                request.height as u32,
                Rgb([10, 20, 30]),
            )))
        }
    }

    pub struct CountingLoader {
        pub calls: Arc<AtomicUsize>,
        pub fail: bool,
    }

    impl CountingLoader {
        pub fn new(fail: bool) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: Arc::clone(&calls),
                    fail,
                },
                calls,
            )
        }
    }

    impl Loader for CountingLoader {
        fn name(&self) -> String {
            "solid".to_string()
        }

        fn load(
            &self,
            _device: &Device,
            _dtype: DType,
            _options: &PipelineOptions,
        ) -> anyhow::Result<Arc<dyn ModelLike>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("weights not found");
            }
            Ok(Arc::new(SolidModel))
        }
    }

    pub fn cpu_options() -> PipelineOptions {
        PipelineOptions {
            device_map: DeviceMap::ForceCpu,
            ..PipelineOptions::default()
        }
    }
}
