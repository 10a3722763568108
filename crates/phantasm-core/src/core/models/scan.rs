use crate::core::geometry::rotation_from_axis_angle;
use nalgebra::{Unit, UnitQuaternion, Vector3};
use std::f64::consts::PI;
use thiserror::Error;

/// The specimen transform for a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Tilt angle in degrees.
    pub angle: f64,
    /// Offset along the scan axis in Angstroms.
    pub position: f64,
    /// Rotation applied to the specimen about its centre.
    pub orientation: UnitQuaternion<f64>,
    /// Translation subtracted from the rotated specimen.
    pub shift: Vector3<f64>,
}

/// An ordered acquisition: one [`Pose`] per frame index.
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    poses: Vec<Pose>,
    axis: Unit<Vector3<f64>>,
    exposure_time: f64,
}

impl Scan {
    pub fn new(poses: Vec<Pose>, axis: Vector3<f64>, exposure_time: f64) -> Self {
        Self {
            poses,
            axis: Unit::new_normalize(axis),
            exposure_time,
        }
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn pose(&self, index: usize) -> Option<&Pose> {
        self.poses.get(index)
    }

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    pub fn angles(&self) -> impl Iterator<Item = f64> + '_ {
        self.poses.iter().map(|p| p.angle)
    }

    pub fn positions(&self) -> impl Iterator<Item = f64> + '_ {
        self.poses.iter().map(|p| p.position)
    }

    pub fn axis(&self) -> &Unit<Vector3<f64>> {
        &self.axis
    }

    pub fn exposure_time(&self) -> f64 {
        self.exposure_time
    }
}

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ScanError {
    #[error("Scan rotation axis must be non-zero")]
    ZeroAxis,
    #[error("A tilt series needs at least one image")]
    NoImages,
    #[error("Exposure time must be positive, got {0}")]
    InvalidExposure(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanMode {
    /// A single untilted frame.
    Still,
    /// `num_images` frames stepping in angle and position.
    TiltSeries,
}

/// How the per-frame position increment is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionStep {
    Fixed(f64),
    /// `step_angle * radius * pi / 180`: keeps the sample surface moving at the tilt rate.
    Auto { radius: f64 },
}

/// Builds the poses of a still image or tilt series.
#[derive(Debug, Clone)]
pub struct ScanBuilder {
    mode: ScanMode,
    axis: Vector3<f64>,
    start_angle: f64,
    step_angle: f64,
    start_pos: f64,
    step_pos: PositionStep,
    num_images: usize,
    exposure_time: f64,
}

impl Default for ScanBuilder {
    fn default() -> Self {
        Self {
            mode: ScanMode::Still,
            axis: Vector3::x(),
            start_angle: 0.0,
            step_angle: 0.0,
            start_pos: 0.0,
            step_pos: PositionStep::Fixed(0.0),
            num_images: 1,
            exposure_time: 1.0,
        }
    }
}

impl ScanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }
    pub fn axis(mut self, axis: Vector3<f64>) -> Self {
        self.axis = axis;
        self
    }
    pub fn start_angle(mut self, degrees: f64) -> Self {
        self.start_angle = degrees;
        self
    }
    pub fn step_angle(mut self, degrees: f64) -> Self {
        self.step_angle = degrees;
        self
    }
    pub fn start_pos(mut self, position: f64) -> Self {
        self.start_pos = position;
        self
    }
    pub fn step_pos(mut self, step: PositionStep) -> Self {
        self.step_pos = step;
        self
    }
    pub fn num_images(mut self, n: usize) -> Self {
        self.num_images = n;
        self
    }
    pub fn exposure_time(mut self, seconds: f64) -> Self {
        self.exposure_time = seconds;
        self
    }

    pub fn build(self) -> Result<Scan, ScanError> {
        if self.axis.norm() == 0.0 {
            return Err(ScanError::ZeroAxis);
        }
        if !(self.exposure_time > 0.0) {
            return Err(ScanError::InvalidExposure(self.exposure_time));
        }
        let num_images = match self.mode {
            ScanMode::Still => 1,
            ScanMode::TiltSeries if self.num_images == 0 => return Err(ScanError::NoImages),
            ScanMode::TiltSeries => self.num_images,
        };
        let step_pos = match self.step_pos {
            PositionStep::Fixed(step) => step,
            PositionStep::Auto { radius } => self.step_angle * radius * PI / 180.0,
        };
        let axis = Unit::new_normalize(self.axis);

        let poses = (0..num_images)
            .map(|i| {
                let angle = self.start_angle + i as f64 * self.step_angle;
                let position = self.start_pos + i as f64 * step_pos;
                Pose {
                    angle,
                    position,
                    orientation: rotation_from_axis_angle(&axis, angle),
                    shift: axis.into_inner() * position,
                }
            })
            .collect();

        Ok(Scan {
            poses,
            axis,
            exposure_time: self.exposure_time,
        })
    }
}
