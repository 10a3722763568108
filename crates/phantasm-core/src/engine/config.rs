use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Output volume shape {actual:?} does not match the expected {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },
}

/// The compute device requested for the simulation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    Cpu,
    #[default]
    Gpu,
}

impl FromStr for Device {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" | "host" => Ok(Device::Cpu),
            "gpu" | "device" => Ok(Device::Gpu),
            other => Err(ConfigError::InvalidParameter {
                name: "device",
                reason: format!("expected 'cpu' or 'gpu', got '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Frames run one after another on the calling thread.
    #[default]
    Sequential,
    /// Frames run concurrently on a bounded pool of workers.
    Pooled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterConfig {
    pub mode: ExecutionMode,
    pub max_workers: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::sequential()
    }
}

impl ClusterConfig {
    pub fn sequential() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            max_workers: 1,
        }
    }

    pub fn pooled(max_workers: usize) -> Self {
        Self {
            mode: ExecutionMode::Pooled,
            max_workers,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == ExecutionMode::Pooled && self.max_workers == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "max_workers",
                reason: "a worker pool needs at least one worker".to_string(),
            });
        }
        Ok(())
    }
}

/// Static per-run parameters shared by every frame job.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    /// Extra simulated border in pixels, cropped from every edge of the final image.
    pub margin: usize,
    /// Slice thickness in Angstroms used by the engine's multislice propagation.
    pub slice_thickness: f64,
    /// Number of z-slabs the frame atoms are partitioned into before calling the engine.
    pub num_slices: usize,
    /// Mean electron dose per pixel; `None` leaves the ideal image noise-free.
    pub electrons_per_pixel: Option<f64>,
    /// Base seed for the per-frame noise generators; `None` draws from entropy.
    pub noise_seed: Option<u64>,
}

#[derive(Default)]
pub struct SimulationParamsBuilder {
    margin: Option<usize>,
    slice_thickness: Option<f64>,
    num_slices: Option<usize>,
    electrons_per_pixel: Option<f64>,
    noise_seed: Option<u64>,
}

impl SimulationParamsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn margin(mut self, pixels: usize) -> Self {
        self.margin = Some(pixels);
        self
    }
    pub fn slice_thickness(mut self, angstroms: f64) -> Self {
        self.slice_thickness = Some(angstroms);
        self
    }
    pub fn num_slices(mut self, n: usize) -> Self {
        self.num_slices = Some(n);
        self
    }
    pub fn electrons_per_pixel(mut self, rate: Option<f64>) -> Self {
        self.electrons_per_pixel = rate;
        self
    }
    pub fn noise_seed(mut self, seed: Option<u64>) -> Self {
        self.noise_seed = seed;
        self
    }

    pub fn build(self) -> Result<SimulationParams, ConfigError> {
        let params = SimulationParams {
            margin: self
                .margin
                .ok_or(ConfigError::MissingParameter("margin"))?,
            slice_thickness: self
                .slice_thickness
                .ok_or(ConfigError::MissingParameter("slice_thickness"))?,
            num_slices: self.num_slices.unwrap_or(1),
            electrons_per_pixel: self.electrons_per_pixel,
            noise_seed: self.noise_seed,
        };
        params.validate()?;
        Ok(params)
    }
}

impl SimulationParams {
    /// Checks the invariants every built value satisfies, including after direct field edits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.margin == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "margin",
                reason: "must be a positive number of pixels".to_string(),
            });
        }
        if !(self.slice_thickness.is_finite() && self.slice_thickness > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "slice_thickness",
                reason: format!("must be positive, got {}", self.slice_thickness),
            });
        }
        if self.num_slices == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "num_slices",
                reason: "at least one slab is required".to_string(),
            });
        }
        if let Some(rate) = self.electrons_per_pixel {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(ConfigError::InvalidParameter {
                    name: "electrons_per_pixel",
                    reason: format!("must be positive, got {rate}"),
                });
            }
        }
        Ok(())
    }
}
