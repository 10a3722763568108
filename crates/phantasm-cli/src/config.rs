use crate::cli::SimulateArgs;
use crate::error::{CliError, Result};
use nalgebra::Vector3;
use phantasm::core::models::microscope::{Beam, Detector, Lens, Microscope};
use phantasm::core::models::scan::{PositionStep, Scan, ScanBuilder, ScanMode};
use phantasm::engine::config::{ClusterConfig, Device, SimulationParams, SimulationParamsBuilder};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

mod defaults;

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialDetectorConfig {
    nx: Option<usize>,
    ny: Option<usize>,
    #[serde(rename = "pixel-size")]
    pixel_size: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialLensConfig {
    #[serde(rename = "c-10")]
    c_10: Option<f64>,
    #[serde(rename = "c-30")]
    c_30: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialMicroscopeConfig {
    #[serde(rename = "beam-energy")]
    beam_energy: Option<f64>,
    detector: Option<PartialDetectorConfig>,
    lens: Option<PartialLensConfig>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "kebab-case")]
enum PartialScanMode {
    Still,
    TiltSeries,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
enum PartialPositionStep {
    Fixed(f64),
    Keyword(String),
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialScanConfig {
    mode: Option<PartialScanMode>,
    axis: Option<[f64; 3]>,
    #[serde(rename = "start-angle")]
    start_angle: Option<f64>,
    #[serde(rename = "step-angle")]
    step_angle: Option<f64>,
    #[serde(rename = "start-pos")]
    start_pos: Option<f64>,
    #[serde(rename = "step-pos")]
    step_pos: Option<PartialPositionStep>,
    #[serde(rename = "num-images")]
    num_images: Option<usize>,
    #[serde(rename = "exposure-time")]
    exposure_time: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialSimulationSection {
    margin: Option<usize>,
    #[serde(rename = "slice-thickness")]
    slice_thickness: Option<f64>,
    #[serde(rename = "num-slices")]
    num_slices: Option<usize>,
    #[serde(rename = "electrons-per-pixel")]
    electrons_per_pixel: Option<f64>,
    #[serde(rename = "noise-seed")]
    noise_seed: Option<u64>,
    #[serde(rename = "thermal-jitter")]
    thermal_jitter: Option<bool>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "kebab-case")]
enum PartialClusterMethod {
    Sequential,
    Pooled,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialClusterConfig {
    method: Option<PartialClusterMethod>,
    #[serde(rename = "max-workers")]
    max_workers: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialSimulationConfig {
    device: Option<String>,
    microscope: Option<PartialMicroscopeConfig>,
    scan: Option<PartialScanConfig>,
    simulation: Option<PartialSimulationSection>,
    cluster: Option<PartialClusterConfig>,
}

/// The scan as configured. Automatic position steps depend on the sample, so the poses are only
/// generated once it has been loaded.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    builder: ScanBuilder,
    auto_step: bool,
}

impl ScanPlan {
    pub fn build(&self, sample_radius: f64) -> Result<Scan> {
        let builder = if self.auto_step {
            self.builder.clone().step_pos(PositionStep::Auto {
                radius: sample_radius,
            })
        } else {
            self.builder.clone()
        };
        builder
            .build()
            .map_err(|e| CliError::Config(format!("Invalid scan: {}", e)))
    }
}

/// Everything a simulation command needs besides the sample.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub microscope: Microscope,
    pub scan: ScanPlan,
    pub params: SimulationParams,
    pub cluster: ClusterConfig,
    pub device: Device,
    pub thermal_jitter: bool,
}

impl PartialSimulationConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn merge_with_cli(mut self, args: &SimulateArgs) -> Result<SimulationConfig> {
        self.apply_set_values(&args.set_values)?;

        // --- Microscope ---
        let microscope_file = self.microscope.unwrap_or_default();
        let detector_file = microscope_file.detector.unwrap_or_default();
        let lens_file = microscope_file.lens.unwrap_or_default();
        let detector = Detector {
            nx: detector_file
                .nx
                .ok_or_else(|| CliError::Config("Missing microscope.detector.nx".to_string()))?,
            ny: detector_file
                .ny
                .ok_or_else(|| CliError::Config("Missing microscope.detector.ny".to_string()))?,
            pixel_size: detector_file.pixel_size.unwrap_or(defaults::PIXEL_SIZE),
        };
        let beam = Beam {
            energy_kev: microscope_file
                .beam_energy
                .unwrap_or(Beam::default().energy_kev),
        };
        let default_lens = Lens::default();
        let lens = Lens {
            c_10: lens_file.c_10.unwrap_or(default_lens.c_10),
            c_30: lens_file.c_30.unwrap_or(default_lens.c_30),
        };
        let microscope = Microscope {
            beam,
            lens,
            detector,
        };

        // --- Scan ---
        let scan_file = self.scan.unwrap_or_default();
        let mode = match scan_file.mode.unwrap_or(PartialScanMode::Still) {
            PartialScanMode::Still => ScanMode::Still,
            PartialScanMode::TiltSeries => ScanMode::TiltSeries,
        };
        let [ax, ay, az] = scan_file.axis.unwrap_or(defaults::SCAN_AXIS);
        let (step_pos, auto_step) = match scan_file.step_pos {
            None => (0.0, false),
            Some(PartialPositionStep::Fixed(step)) => (step, false),
            Some(PartialPositionStep::Keyword(word)) if word.eq_ignore_ascii_case("auto") => {
                (0.0, true)
            }
            Some(PartialPositionStep::Keyword(word)) => {
                return Err(CliError::Config(format!(
                    "Invalid scan.step-pos '{}': expected a number or \"auto\"",
                    word
                )));
            }
        };
        let builder = ScanBuilder::new()
            .mode(mode)
            .axis(Vector3::new(ax, ay, az))
            .start_angle(scan_file.start_angle.unwrap_or(0.0))
            .step_angle(scan_file.step_angle.unwrap_or(0.0))
            .start_pos(scan_file.start_pos.unwrap_or(0.0))
            .step_pos(PositionStep::Fixed(step_pos))
            .num_images(scan_file.num_images.unwrap_or(1))
            .exposure_time(scan_file.exposure_time.unwrap_or(defaults::EXPOSURE_TIME));
        let scan = ScanPlan { builder, auto_step };

        // --- Simulation ---
        let sim_file = self.simulation.unwrap_or_default();
        let params = SimulationParamsBuilder::new()
            .margin(sim_file.margin.unwrap_or(defaults::MARGIN))
            .slice_thickness(sim_file.slice_thickness.unwrap_or(defaults::SLICE_THICKNESS))
            .num_slices(sim_file.num_slices.unwrap_or(defaults::NUM_SLICES))
            .electrons_per_pixel(sim_file.electrons_per_pixel)
            .noise_seed(args.seed.or(sim_file.noise_seed))
            .build()
            .map_err(|e| CliError::Config(e.to_string()))?;
        let thermal_jitter = args.thermal_jitter || sim_file.thermal_jitter.unwrap_or(false);

        // --- Execution ---
        let cluster_file = self.cluster.unwrap_or_default();
        let cluster = match (args.max_workers, cluster_file.method) {
            (Some(max_workers), _) => ClusterConfig::pooled(max_workers),
            (None, Some(PartialClusterMethod::Pooled)) => ClusterConfig::pooled(
                cluster_file
                    .max_workers
                    .unwrap_or_else(defaults::max_workers),
            ),
            (None, Some(PartialClusterMethod::Sequential) | None) => ClusterConfig::sequential(),
        };
        cluster
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))?;

        let device = match args.device.as_deref().or(self.device.as_deref()) {
            Some(name) => name
                .parse::<Device>()
                .map_err(|e| CliError::Config(e.to_string()))?,
            None => Device::default(),
        };

        Ok(SimulationConfig {
            microscope,
            scan,
            params,
            cluster,
            device,
            thermal_jitter,
        })
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        if set_values.is_empty() {
            return Ok(());
        }
        for kv_pair in set_values {
            let parts: Vec<_> = kv_pair.splitn(2, '=').collect();
            if parts.len() != 2 {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            }
            let key = parts[0];
            let value_str = parts[1];

            match key {
                "device" => {
                    self.device = Some(value_str.to_string());
                }
                "microscope.beam-energy" => {
                    self.microscope
                        .get_or_insert_with(Default::default)
                        .beam_energy = Some(parse_value(key, value_str)?);
                }
                "microscope.detector.nx" => {
                    self.microscope
                        .get_or_insert_with(Default::default)
                        .detector
                        .get_or_insert_with(Default::default)
                        .nx = Some(parse_value(key, value_str)?);
                }
                "microscope.detector.ny" => {
                    self.microscope
                        .get_or_insert_with(Default::default)
                        .detector
                        .get_or_insert_with(Default::default)
                        .ny = Some(parse_value(key, value_str)?);
                }
                "microscope.detector.pixel-size" => {
                    self.microscope
                        .get_or_insert_with(Default::default)
                        .detector
                        .get_or_insert_with(Default::default)
                        .pixel_size = Some(parse_value(key, value_str)?);
                }
                "microscope.lens.c-10" => {
                    self.microscope
                        .get_or_insert_with(Default::default)
                        .lens
                        .get_or_insert_with(Default::default)
                        .c_10 = Some(parse_value(key, value_str)?);
                }
                "microscope.lens.c-30" => {
                    self.microscope
                        .get_or_insert_with(Default::default)
                        .lens
                        .get_or_insert_with(Default::default)
                        .c_30 = Some(parse_value(key, value_str)?);
                }
                "scan.start-angle" => {
                    self.scan.get_or_insert_with(Default::default).start_angle =
                        Some(parse_value(key, value_str)?);
                }
                "scan.step-angle" => {
                    self.scan.get_or_insert_with(Default::default).step_angle =
                        Some(parse_value(key, value_str)?);
                }
                "scan.start-pos" => {
                    self.scan.get_or_insert_with(Default::default).start_pos =
                        Some(parse_value(key, value_str)?);
                }
                "scan.step-pos" => {
                    let step = match value_str.parse::<f64>() {
                        Ok(step) => PartialPositionStep::Fixed(step),
                        Err(_) => PartialPositionStep::Keyword(value_str.to_string()),
                    };
                    self.scan.get_or_insert_with(Default::default).step_pos = Some(step);
                }
                "scan.num-images" => {
                    self.scan.get_or_insert_with(Default::default).num_images =
                        Some(parse_value(key, value_str)?);
                }
                "scan.exposure-time" => {
                    self.scan.get_or_insert_with(Default::default).exposure_time =
                        Some(parse_value(key, value_str)?);
                }
                "simulation.margin" => {
                    self.simulation.get_or_insert_with(Default::default).margin =
                        Some(parse_value(key, value_str)?);
                }
                "simulation.slice-thickness" => {
                    self.simulation
                        .get_or_insert_with(Default::default)
                        .slice_thickness = Some(parse_value(key, value_str)?);
                }
                "simulation.num-slices" => {
                    self.simulation.get_or_insert_with(Default::default).num_slices =
                        Some(parse_value(key, value_str)?);
                }
                "simulation.electrons-per-pixel" => {
                    self.simulation
                        .get_or_insert_with(Default::default)
                        .electrons_per_pixel = Some(parse_value(key, value_str)?);
                }
                "simulation.noise-seed" => {
                    self.simulation.get_or_insert_with(Default::default).noise_seed =
                        Some(parse_value(key, value_str)?);
                }
                "cluster.max-workers" => {
                    self.cluster.get_or_insert_with(Default::default).max_workers =
                        Some(parse_value(key, value_str)?);
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unknown or unsupported key for --set: {}",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value_str: &str) -> Result<T> {
    value_str.parse().map_err(|_| {
        CliError::Config(format!("Invalid value for {}: {}", key, value_str))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::{TempDir, tempdir};

    const FULL_CONFIG: &str = r#"
        device = "cpu"

        [microscope]
        beam-energy = 200.0

        [microscope.detector]
        nx = 64
        ny = 32
        pixel-size = 1.5

        [microscope.lens]
        c-10 = 15.0
        c-30 = 2.0

        [scan]
        mode = "tilt-series"
        axis = [0.0, 1.0, 0.0]
        start-angle = -30.0
        step-angle = 15.0
        start-pos = 0.0
        step-pos = 2.0
        num-images = 5
        exposure-time = 0.5

        [simulation]
        margin = 4
        slice-thickness = 2.5
        num-slices = 3
        electrons-per-pixel = 40.0
        noise-seed = 7

        [cluster]
        method = "pooled"
        max-workers = 3
    "#;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("simulation.toml");
        fs::write(&path, content).unwrap();
        path
    }

    fn parse_args(config: &Path, extra: &[&str]) -> SimulateArgs {
        let mut argv = vec![
            "phantasm".to_string(),
            "exit-wave".to_string(),
            "-s".to_string(),
            "sample.csv".to_string(),
            "-o".to_string(),
            "out.mrc".to_string(),
            "-c".to_string(),
            config.to_str().unwrap().to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        match Cli::parse_from(argv).command {
            Commands::ExitWave(args) | Commands::Potential(args) => args,
        }
    }

    fn load(content: &str, extra: &[&str]) -> Result<SimulationConfig> {
        let dir = tempdir().unwrap();
        let path = write_config(&dir, content);
        let args = parse_args(&path, extra);
        PartialSimulationConfig::from_file(&path)?.merge_with_cli(&args)
    }

    #[test]
    fn full_file_is_translated_into_core_structs() {
        let config = load(FULL_CONFIG, &[]).unwrap();
        assert_eq!(config.device, Device::Cpu);
        assert_eq!(config.microscope.beam.energy_kev, 200.0);
        assert_eq!(config.microscope.detector.nx, 64);
        assert_eq!(config.microscope.detector.ny, 32);
        assert_eq!(config.microscope.detector.pixel_size, 1.5);
        assert_eq!(config.microscope.lens.c_10, 15.0);
        assert_eq!(config.params.margin, 4);
        assert_eq!(config.params.num_slices, 3);
        assert_eq!(config.params.electrons_per_pixel, Some(40.0));
        assert_eq!(config.params.noise_seed, Some(7));
        assert_eq!(config.cluster, ClusterConfig::pooled(3));
        assert!(!config.thermal_jitter);

        let scan = config.scan.build(10.0).unwrap();
        assert_eq!(scan.len(), 5);
        assert_eq!(scan.angles().collect::<Vec<_>>(), vec![-30.0, -15.0, 0.0, 15.0, 30.0]);
        assert_eq!(scan.positions().last(), Some(8.0));
    }

    #[test]
    fn minimal_file_falls_back_to_defaults() {
        let config = load("[microscope.detector]\nnx = 8\nny = 8\n", &[]).unwrap();
        assert_eq!(config.microscope.detector.pixel_size, defaults::PIXEL_SIZE);
        assert_eq!(config.microscope.lens, Lens::default());
        assert_eq!(config.params.margin, defaults::MARGIN);
        assert_eq!(config.params.electrons_per_pixel, None);
        assert_eq!(config.cluster, ClusterConfig::sequential());
        assert_eq!(config.device, Device::default());
        assert_eq!(config.scan.build(1.0).unwrap().len(), 1);
    }

    #[test]
    fn cli_flags_override_the_file() {
        let config = load(
            FULL_CONFIG,
            &["-d", "gpu", "-w", "6", "--seed", "99", "--thermal-jitter"],
        )
        .unwrap();
        assert_eq!(config.device, Device::Gpu);
        assert_eq!(config.cluster, ClusterConfig::pooled(6));
        assert_eq!(config.params.noise_seed, Some(99));
        assert!(config.thermal_jitter);
    }

    #[test]
    fn set_values_override_the_file() {
        let config = load(
            FULL_CONFIG,
            &[
                "-S",
                "simulation.margin=9",
                "microscope.detector.nx=16",
                "scan.num-images=2",
                "device=gpu",
            ],
        )
        .unwrap();
        assert_eq!(config.params.margin, 9);
        assert_eq!(config.microscope.detector.nx, 16);
        assert_eq!(config.scan.build(1.0).unwrap().len(), 2);
        assert_eq!(config.device, Device::Gpu);
    }

    #[test]
    fn automatic_position_step_uses_the_sample_radius() {
        let content = "[microscope.detector]\nnx = 4\nny = 4\n\n[scan]\nmode = \"tilt-series\"\nstep-angle = 180.0\nstep-pos = \"auto\"\nnum-images = 2\n";
        let config = load(content, &[]).unwrap();
        let scan = config.scan.build(2.0).unwrap();
        let positions: Vec<f64> = scan.positions().collect();
        assert!((positions[1] - 2.0 * std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn invalid_values_are_reported_as_config_errors() {
        let detector = "[microscope.detector]\nnx = 4\nny = 4\n";
        assert!(matches!(
            load(&format!("{detector}[scan]\nstep-pos = \"fast\"\n"), &[]),
            Err(CliError::Config(_))
        ));
        assert!(matches!(
            load(&format!("{detector}[simulation]\nmargin = 0\n"), &[]),
            Err(CliError::Config(_))
        ));
        assert!(matches!(
            load(&format!("{detector}[cluster]\nmethod = \"pooled\"\nmax-workers = 0\n"), &[]),
            Err(CliError::Config(_))
        ));
        assert!(matches!(
            load(&format!("device = \"tpu\"\n{detector}"), &[]),
            Err(CliError::Config(_))
        ));
        assert!(matches!(load("", &[]), Err(CliError::Config(_))));
        assert!(matches!(
            load(detector, &["-S", "simulation.margin"]),
            Err(CliError::Config(_))
        ));
        assert!(matches!(
            load(detector, &["-S", "simulation.volume=3"]),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn unknown_fields_fail_to_parse() {
        assert!(matches!(
            load("[microscope.detector]\nnx = 4\nny = 4\nwidth = 3\n", &[]),
            Err(CliError::FileParsing { .. })
        ));
    }
}
