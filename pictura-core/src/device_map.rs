use anyhow::Result;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Which device the local pipeline should run on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceMap {
    ForceCpu,
    /// Accelerator ordinal, falling back to the CPU when none is present.
    Ordinal(usize),
}

impl DeviceMap {
    pub fn from_cpu_flag(cpu: bool) -> Self {
        if cpu {
            Self::ForceCpu
        } else {
            Self::default()
        }
    }

    /// Opens the device this map points at. CUDA wins over Metal.
    pub fn open(self) -> Result<Device> {
        let device = match self {
            Self::ForceCpu => Device::Cpu,
            Self::Ordinal(ordinal) if cuda_is_available() => Device::new_cuda(ordinal)?,
            Self::Ordinal(ordinal) if metal_is_available() => Device::new_metal(ordinal)?,
            Self::Ordinal(ordinal) => {
                info!(ordinal, "no accelerator compiled in or present, using the CPU");
                Device::Cpu
            }
        };
        Ok(device)
    }
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::Ordinal(0)
    }
}

/// Pipelines run in BF16 on an accelerator. The CPU has no fast BF16 path,
/// so it gets F32.
pub fn precision_for(device: &Device) -> DType {
    if device.is_cpu() {
        DType::F32
    } else {
        DType::BF16
    }
}
