use serde::{Deserialize, Serialize};

pub const DEFAULT_STEPS: u32 = 20;
pub const DEFAULT_GUIDANCE: f64 = 7.5;
pub const DEFAULT_SIZE: u32 = 512;

/// Sampling parameters sent along with a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub steps: u32,
    pub guidance_scale: f64,
    pub width: u32,
    pub height: u32,
    pub seed: Option<u64>,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE,
            width: DEFAULT_SIZE,
            height: DEFAULT_SIZE,
            seed: None,
        }
    }
}

impl GenerationParameters {
    /// Fills unset fields with the defaults.
    pub fn from_options(
        steps: Option<u32>,
        guidance_scale: Option<f64>,
        width: Option<u32>,
        height: Option<u32>,
        seed: Option<u64>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            steps: steps.unwrap_or(defaults.steps),
            guidance_scale: guidance_scale.unwrap_or(defaults.guidance_scale),
            width: width.unwrap_or(defaults.width),
            height: height.unwrap_or(defaults.height),
            seed,
        }
    }

    /// Clamps every field into `limits`. Dimensions are also rounded down to
    /// the limit's multiple.
    pub fn clamp(&self, limits: &ParameterLimits) -> Self {
        let guidance_scale = if self.guidance_scale.is_finite() {
            self.guidance_scale.clamp(0.0, MAX_GUIDANCE)
        } else {
            DEFAULT_GUIDANCE
        };
        Self {
            steps: self.steps.clamp(1, limits.max_steps),
            guidance_scale,
            width: limits.clamp_dimension(self.width, limits.max_width),
            height: limits.clamp_dimension(self.height, limits.max_height),
            seed: self.seed,
        }
    }
}

pub const MAX_GUIDANCE: f64 = 20.0;
pub const MIN_DIMENSION: u32 = 64;

/// Upper bounds a platform accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterLimits {
    pub max_steps: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub dimension_multiple: u32,
}

impl ParameterLimits {
    pub const STANDARD: Self = Self {
        max_steps: 50,
        max_width: 1024,
        max_height: 1024,
        dimension_multiple: 8,
    };

    /// Limits for resource-constrained hosts.
    pub const CONSTRAINED: Self = Self {
        max_steps: 30,
        max_width: 512,
        max_height: 512,
        dimension_multiple: 8,
    };

    pub fn with_dimension_multiple(mut self, multiple: u32) -> Self {
        self.dimension_multiple = multiple.max(1);
        self
    }

    fn clamp_dimension(&self, value: u32, max: u32) -> u32 {
        let multiple = self.dimension_multiple.max(1);
        let value = value.clamp(MIN_DIMENSION, max.max(MIN_DIMENSION));
        (value / multiple * multiple).max(multiple)
    }
}

impl Default for ParameterLimits {
    fn default() -> Self {
        Self::STANDARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_platform_defaults() {
        let params = GenerationParameters::default();
        assert_eq!(params.steps, 20);
        assert_eq!(params.guidance_scale, 7.5);
        assert_eq!((params.width, params.height), (512, 512));
        assert_eq!(params.seed, None);
    }

    #[test]
    fn defaults_pass_constrained_limits_untouched() {
        let params = GenerationParameters::default();
        assert_eq!(params.clamp(&ParameterLimits::CONSTRAINED), params);
    }

    #[test]
    fn clamps_to_constrained_limits() {
        let params = GenerationParameters::from_options(
            Some(80),
            Some(50.0),
            Some(2048),
            Some(768),
            Some(7),
        );
        let clamped = params.clamp(&ParameterLimits::CONSTRAINED);
        assert_eq!(clamped.steps, 30);
        assert_eq!(clamped.guidance_scale, MAX_GUIDANCE);
        assert_eq!((clamped.width, clamped.height), (512, 512));
        assert_eq!(clamped.seed, Some(7));
    }

    #[test]
    fn clamps_lower_bounds() {
        let params =
            GenerationParameters::from_options(Some(0), Some(-1.0), Some(10), Some(0), None);
        let clamped = params.clamp(&ParameterLimits::STANDARD);
        assert_eq!(clamped.steps, 1);
        assert_eq!(clamped.guidance_scale, 0.0);
        assert_eq!((clamped.width, clamped.height), (64, 64));
    }

    #[test]
    fn rounds_dimensions_down_to_multiple() {
        let limits = ParameterLimits::STANDARD.with_dimension_multiple(16);
        let params = GenerationParameters::from_options(None, None, Some(600), Some(519), None);
        let clamped = params.clamp(&limits);
        assert_eq!((clamped.width, clamped.height), (592, 512));
    }

    #[test]
    fn non_finite_guidance_falls_back_to_default() {
        let params = GenerationParameters::from_options(None, Some(f64::NAN), None, None, None);
        assert_eq!(params.clamp(&ParameterLimits::STANDARD).guidance_scale, DEFAULT_GUIDANCE);
    }
}
