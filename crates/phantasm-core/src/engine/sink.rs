use super::backend::Field;
use super::config::ConfigError;
use crate::core::io::mrc::{MrcError, MrcWriter};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Frame index {index} is out of range for a volume of {num_frames} frames")]
    OutOfRange { index: usize, num_frames: usize },

    #[error("Frame {index} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Frame {index} was already written")]
    AlreadyWritten { index: usize },

    #[error("Frame {index} was never opened for writing")]
    NotOpen { index: usize },

    #[error("Failed to write '{path}': {source}", path = path.display())]
    Mrc {
        path: PathBuf,
        #[source]
        source: MrcError,
    },
}

/// Destination for finished frames, addressed by frame index.
///
/// Frames may arrive in any order; the sink places each one in its own slot.
pub trait ResultSink {
    /// `(num_frames, height, width)`.
    fn shape(&self) -> (usize, usize, usize);

    /// Stores the frame `index`. `image` is `None` for simulations that only produce side
    /// outputs, in which case just the angle is recorded.
    fn write(&mut self, index: usize, angle: f64, image: Option<&Field>) -> Result<(), SinkError>;
}

/// Fails unless `sink` has exactly the `expected` shape.
pub fn check_shape(
    sink: &(impl ResultSink + ?Sized),
    expected: (usize, usize, usize),
) -> Result<(), ConfigError> {
    let actual = sink.shape();
    if actual != expected {
        return Err(ConfigError::ShapeMismatch { expected, actual });
    }
    Ok(())
}

/// Write-once bookkeeping shared by the volume sinks.
#[derive(Debug, Clone)]
struct Slots {
    written: Vec<bool>,
    height: usize,
    width: usize,
}

impl Slots {
    fn new(num_frames: usize, height: usize, width: usize) -> Self {
        Self {
            written: vec![false; num_frames],
            height,
            width,
        }
    }

    /// Fails unless `index` is a free slot and `image` fits it. Nothing is marked; callers
    /// [`Slots::mark`] the slot once the frame is stored.
    fn check(&self, index: usize, image: Option<&Field>) -> Result<(), SinkError> {
        let num_frames = self.written.len();
        let written = self
            .written
            .get(index)
            .ok_or(SinkError::OutOfRange { index, num_frames })?;
        if *written {
            return Err(SinkError::AlreadyWritten { index });
        }
        if let Some(image) = image {
            if image.shape() != (self.height, self.width) {
                return Err(SinkError::ShapeMismatch {
                    index,
                    expected: (self.height, self.width),
                    actual: image.shape(),
                });
            }
        }
        Ok(())
    }

    fn mark(&mut self, index: usize) {
        self.written[index] = true;
    }

    fn is_written(&self, index: usize) -> bool {
        self.written.get(index).copied().unwrap_or(false)
    }

    fn all_written(&self) -> bool {
        self.written.iter().all(|w| *w)
    }
}

/// A pre-allocated `(num_frames, height, width)` volume held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryVolume {
    frames: Vec<Field>,
    angles: Vec<f64>,
    slots: Slots,
}

impl InMemoryVolume {
    pub fn new(num_frames: usize, height: usize, width: usize) -> Self {
        Self {
            frames: vec![Field::zeros(height, width); num_frames],
            angles: vec![0.0; num_frames],
            slots: Slots::new(num_frames, height, width),
        }
    }

    pub fn frame(&self, index: usize) -> Option<&Field> {
        self.frames.get(index)
    }

    pub fn frames(&self) -> &[Field] {
        &self.frames
    }

    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    pub fn is_written(&self, index: usize) -> bool {
        self.slots.is_written(index)
    }

    pub fn is_complete(&self) -> bool {
        self.slots.all_written()
    }
}

impl ResultSink for InMemoryVolume {
    fn shape(&self) -> (usize, usize, usize) {
        (self.frames.len(), self.slots.height, self.slots.width)
    }

    fn write(&mut self, index: usize, angle: f64, image: Option<&Field>) -> Result<(), SinkError> {
        self.slots.check(index, image)?;
        if let Some(image) = image {
            self.frames[index].copy_from(image);
        }
        self.angles[index] = angle;
        self.slots.mark(index);
        Ok(())
    }
}

/// A float32 MRC stack on disk, one section per frame.
///
/// Angles are kept in memory and handed back by [`MrcVolume::finish`] for the caller to store
/// next to the image data.
#[derive(Debug)]
pub struct MrcVolume {
    path: PathBuf,
    writer: MrcWriter,
    angles: Vec<f64>,
    slots: Slots,
}

impl MrcVolume {
    pub fn create(
        path: impl AsRef<Path>,
        shape: (usize, usize, usize),
        pixel_size: f64,
    ) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let (num_frames, height, width) = shape;
        let voxel = [pixel_size as f32, pixel_size as f32, 1.0];
        let writer = MrcWriter::create_stack(&path, shape, voxel).map_err(|source| {
            SinkError::Mrc {
                path: path.clone(),
                source,
            }
        })?;
        debug!("Created MRC volume {} with shape {:?}", path.display(), shape);
        Ok(Self {
            path,
            writer,
            angles: vec![0.0; num_frames],
            slots: Slots::new(num_frames, height, width),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    pub fn is_written(&self, index: usize) -> bool {
        self.slots.is_written(index)
    }

    /// Finalizes the header and returns the per-frame angles.
    pub fn finish(self) -> Result<Vec<f64>, SinkError> {
        let Self {
            path,
            writer,
            angles,
            ..
        } = self;
        writer
            .finish()
            .map_err(|source| SinkError::Mrc { path, source })?;
        Ok(angles)
    }
}

impl ResultSink for MrcVolume {
    fn shape(&self) -> (usize, usize, usize) {
        self.writer.shape()
    }

    fn write(&mut self, index: usize, angle: f64, image: Option<&Field>) -> Result<(), SinkError> {
        self.slots.check(index, image)?;
        if let Some(image) = image {
            self.writer
                .write_section(index, image)
                .map_err(|source| SinkError::Mrc {
                    path: self.path.clone(),
                    source,
                })?;
        }
        self.angles[index] = angle;
        self.slots.mark(index);
        Ok(())
    }
}

/// Records only the frame angles, for runs whose images go elsewhere.
#[derive(Debug, Clone)]
pub struct AngleLog {
    angles: Vec<f64>,
    slots: Slots,
}

impl AngleLog {
    pub fn new(num_frames: usize, height: usize, width: usize) -> Self {
        Self {
            angles: vec![0.0; num_frames],
            slots: Slots::new(num_frames, height, width),
        }
    }

    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    pub fn is_complete(&self) -> bool {
        self.slots.all_written()
    }
}

impl ResultSink for AngleLog {
    fn shape(&self) -> (usize, usize, usize) {
        (self.angles.len(), self.slots.height, self.slots.width)
    }

    fn write(&mut self, index: usize, angle: f64, image: Option<&Field>) -> Result<(), SinkError> {
        self.slots.check(index, image)?;
        self.angles[index] = angle;
        self.slots.mark(index);
        Ok(())
    }
}

/// Receives the per-slab projected potential of each frame.
///
/// Workers of a pooled run call into the same sink concurrently, each for its own frame.
pub trait PotentialSink: Sync {
    /// Prepares storage for frame `index` as a `(num_slices, height, width)` volume.
    fn begin_frame(
        &self,
        index: usize,
        shape: (usize, usize, usize),
        voxel_size: [f64; 3],
    ) -> Result<(), SinkError>;

    fn write_slice(&self, index: usize, slice: usize, potential: &Field) -> Result<(), SinkError>;

    fn end_frame(&self, index: usize) -> Result<(), SinkError>;
}

/// Keeps every potential slice in memory, keyed by frame.
#[derive(Debug, Default)]
pub struct PotentialCollector {
    frames: Mutex<BTreeMap<usize, Vec<Option<Field>>>>,
}

impl PotentialCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slices recorded for frame `index`; slices the engine never reported are `None`.
    pub fn frame(&self, index: usize) -> Option<Vec<Option<Field>>> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .cloned()
    }

    pub fn into_frames(self) -> BTreeMap<usize, Vec<Option<Field>>> {
        self.frames
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PotentialSink for PotentialCollector {
    fn begin_frame(
        &self,
        index: usize,
        shape: (usize, usize, usize),
        _voxel_size: [f64; 3],
    ) -> Result<(), SinkError> {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        if frames.contains_key(&index) {
            return Err(SinkError::AlreadyWritten { index });
        }
        frames.insert(index, vec![None; shape.0]);
        Ok(())
    }

    fn write_slice(&self, index: usize, slice: usize, potential: &Field) -> Result<(), SinkError> {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        let slices = frames.get_mut(&index).ok_or(SinkError::NotOpen { index })?;
        let num_frames = slices.len();
        let slot = slices.get_mut(slice).ok_or(SinkError::OutOfRange {
            index: slice,
            num_frames,
        })?;
        *slot = Some(potential.clone());
        Ok(())
    }

    fn end_frame(&self, index: usize) -> Result<(), SinkError> {
        let frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        if frames.contains_key(&index) {
            Ok(())
        } else {
            Err(SinkError::NotOpen { index })
        }
    }
}

/// Progress of one frame inside an [`MrcPotentialSeries`].
#[derive(Debug)]
enum FrameStage {
    Open {
        shape: (usize, usize, usize),
        voxel_size: [f32; 3],
        slices: Vec<Option<Field>>,
    },
    Closed,
}

/// Writes each frame's potential to `projected_potential_<index>.mrc` in a directory.
///
/// Slices are held until [`PotentialSink::end_frame`], which writes the whole volume from the
/// calling worker. Nothing touches the disk for a frame index that was already begun.
#[derive(Debug)]
pub struct MrcPotentialSeries {
    directory: PathBuf,
    frames: Mutex<HashMap<usize, FrameStage>>,
}

impl MrcPotentialSeries {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            frames: Mutex::new(HashMap::new()),
        }
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.directory
            .join(format!("projected_potential_{index}.mrc"))
    }

    fn write_volume(
        &self,
        index: usize,
        shape: (usize, usize, usize),
        voxel_size: [f32; 3],
        slices: &[Option<Field>],
    ) -> Result<(), SinkError> {
        let path = self.frame_path(index);
        let attach = |source: MrcError| SinkError::Mrc {
            path: path.clone(),
            source,
        };
        let mut writer = MrcWriter::create_volume(&path, shape, voxel_size).map_err(attach)?;
        for (slice, potential) in slices.iter().enumerate() {
            if let Some(potential) = potential {
                writer.write_section(slice, potential).map_err(attach)?;
            }
        }
        writer.finish().map_err(attach)?;
        debug!("Wrote projected potential {} with shape {:?}", path.display(), shape);
        Ok(())
    }
}

impl PotentialSink for MrcPotentialSeries {
    fn begin_frame(
        &self,
        index: usize,
        shape: (usize, usize, usize),
        voxel_size: [f64; 3],
    ) -> Result<(), SinkError> {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        if frames.contains_key(&index) {
            return Err(SinkError::AlreadyWritten { index });
        }
        frames.insert(
            index,
            FrameStage::Open {
                shape,
                voxel_size: voxel_size.map(|v| v as f32),
                slices: vec![None; shape.0],
            },
        );
        Ok(())
    }

    fn write_slice(&self, index: usize, slice: usize, potential: &Field) -> Result<(), SinkError> {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(FrameStage::Open { shape, slices, .. }) = frames.get_mut(&index) else {
            return Err(SinkError::NotOpen { index });
        };
        let expected = (shape.1, shape.2);
        if potential.shape() != expected {
            return Err(SinkError::ShapeMismatch {
                index,
                expected,
                actual: potential.shape(),
            });
        }
        let num_frames = slices.len();
        let slot = slices.get_mut(slice).ok_or(SinkError::OutOfRange {
            index: slice,
            num_frames,
        })?;
        *slot = Some(potential.clone());
        Ok(())
    }

    fn end_frame(&self, index: usize) -> Result<(), SinkError> {
        let stage = {
            let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
            match frames.get_mut(&index) {
                Some(stage @ FrameStage::Open { .. }) => {
                    std::mem::replace(stage, FrameStage::Closed)
                }
                _ => return Err(SinkError::NotOpen { index }),
            }
        };
        let FrameStage::Open {
            shape,
            voxel_size,
            slices,
        } = stage
        else {
            return Err(SinkError::NotOpen { index });
        };
        self.write_volume(index, shape, voxel_size, &slices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn in_memory_volume_places_frames_by_index() {
        let mut volume = InMemoryVolume::new(3, 2, 2);
        volume
            .write(2, 10.0, Some(&Field::from_element(2, 2, 2.0)))
            .unwrap();
        volume
            .write(0, -10.0, Some(&Field::from_element(2, 2, 1.0)))
            .unwrap();
        assert!(!volume.is_complete());
        volume.write(1, 0.0, None).unwrap();
        assert!(volume.is_complete());
        assert_eq!(volume.angles(), &[-10.0, 0.0, 10.0]);
        assert_eq!(volume.frame(2).unwrap()[(1, 1)], 2.0);
        assert_eq!(volume.frame(1).unwrap(), &Field::zeros(2, 2));
    }

    #[test]
    fn in_memory_volume_rejects_bad_writes() {
        let mut volume = InMemoryVolume::new(2, 2, 3);
        let image = Field::zeros(2, 3);
        assert!(matches!(
            volume.write(2, 0.0, Some(&image)),
            Err(SinkError::OutOfRange { index: 2, num_frames: 2 })
        ));
        assert!(matches!(
            volume.write(0, 0.0, Some(&Field::zeros(3, 2))),
            Err(SinkError::ShapeMismatch { index: 0, .. })
        ));
        volume.write(0, 0.0, Some(&image)).unwrap();
        assert!(matches!(
            volume.write(0, 0.0, Some(&image)),
            Err(SinkError::AlreadyWritten { index: 0 })
        ));
    }

    #[test]
    fn shape_check_reports_both_shapes() {
        let volume = InMemoryVolume::new(3, 4, 5);
        assert!(check_shape(&volume, (3, 4, 5)).is_ok());
        assert_eq!(
            check_shape(&volume, (3, 5, 4)),
            Err(ConfigError::ShapeMismatch {
                expected: (3, 5, 4),
                actual: (3, 4, 5)
            })
        );
    }

    #[test]
    fn mrc_volume_writes_sections_and_returns_angles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.mrc");
        let mut volume = MrcVolume::create(&path, (2, 2, 2), 1.5).unwrap();
        assert_eq!(volume.shape(), (2, 2, 2));
        volume
            .write(1, 5.0, Some(&Field::from_element(2, 2, 3.0)))
            .unwrap();
        volume
            .write(0, -5.0, Some(&Field::from_element(2, 2, 1.0)))
            .unwrap();
        assert!(volume.write(0, -5.0, None).is_err());
        let angles = volume.finish().unwrap();
        assert_eq!(angles, vec![-5.0, 5.0]);

        let (header, data) = ::mrc::read_as::<f32, _>(&path).unwrap();
        assert_eq!((header.nx, header.ny, header.nz), (2, 2, 2));
        assert_eq!(header.xlen, 3.0);
        assert_eq!(data, vec![1.0, 1.0, 1.0, 1.0, 3.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn rejected_write_leaves_slot_and_angle_untouched() {
        let dir = tempdir().unwrap();
        let mut volume = MrcVolume::create(dir.path().join("out.mrc"), (2, 2, 3), 1.0).unwrap();
        assert!(matches!(
            volume.write(1, 7.5, Some(&Field::zeros(3, 2))),
            Err(SinkError::ShapeMismatch { index: 1, .. })
        ));
        assert!(!volume.is_written(1));
        assert_eq!(volume.angles(), &[0.0, 0.0]);

        volume
            .write(1, 7.5, Some(&Field::from_element(2, 3, 1.0)))
            .unwrap();
        assert!(volume.is_written(1));
        assert_eq!(volume.angles(), &[0.0, 7.5]);
        volume.finish().unwrap();
    }

    #[test]
    fn checked_slot_stays_free_until_marked() {
        let mut slots = Slots::new(2, 1, 1);
        slots.check(0, None).unwrap();
        slots.check(0, None).unwrap();
        assert!(!slots.is_written(0));
        slots.mark(0);
        assert!(matches!(
            slots.check(0, None),
            Err(SinkError::AlreadyWritten { index: 0 })
        ));
        assert!(!slots.all_written());
    }

    #[test]
    fn in_memory_volume_only_records_accepted_frames() {
        let mut volume = InMemoryVolume::new(1, 2, 2);
        assert!(volume.write(0, 3.0, Some(&Field::zeros(1, 2))).is_err());
        assert!(!volume.is_written(0));
        assert_eq!(volume.angles(), &[0.0]);
        volume.write(0, 3.0, Some(&Field::zeros(2, 2))).unwrap();
        assert_eq!(volume.angles(), &[3.0]);
    }

    #[test]
    fn potential_collector_keeps_slices_per_frame() {
        let collector = PotentialCollector::new();
        collector.begin_frame(4, (3, 2, 2), [1.0; 3]).unwrap();
        collector
            .write_slice(4, 1, &Field::from_element(2, 2, 7.0))
            .unwrap();
        collector.end_frame(4).unwrap();
        assert!(collector.write_slice(5, 0, &Field::zeros(2, 2)).is_err());
        assert!(collector.write_slice(4, 3, &Field::zeros(2, 2)).is_err());

        let slices = collector.frame(4).unwrap();
        assert_eq!(slices.len(), 3);
        assert!(slices[0].is_none());
        assert_eq!(slices[1].as_ref().unwrap()[(0, 0)], 7.0);
    }

    #[test]
    fn mrc_potential_series_writes_one_file_per_frame() {
        let dir = tempdir().unwrap();
        let series = MrcPotentialSeries::new(dir.path());
        series.begin_frame(0, (2, 2, 2), [1.0, 1.0, 2.0]).unwrap();
        series
            .write_slice(0, 1, &Field::from_element(2, 2, 4.0))
            .unwrap();
        series.end_frame(0).unwrap();
        assert!(series.end_frame(0).is_err());

        let path = dir.path().join("projected_potential_0.mrc");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 1024 + 2 * 2 * 2 * 4);
        let (header, data) = ::mrc::read_as::<f32, _>(&path).unwrap();
        assert_eq!(header.ispg, 1);
        assert_eq!(header.zlen, 4.0);
        assert_eq!(data, vec![0.0, 0.0, 0.0, 0.0, 4.0, 4.0, 4.0, 4.0]);
    }

    #[test]
    fn repeated_frame_index_keeps_the_first_file() {
        let dir = tempdir().unwrap();
        let series = MrcPotentialSeries::new(dir.path());
        series.begin_frame(3, (1, 2, 2), [1.0; 3]).unwrap();
        series
            .write_slice(3, 0, &Field::from_element(2, 2, 9.0))
            .unwrap();
        assert!(matches!(
            series.begin_frame(3, (1, 2, 2), [1.0; 3]),
            Err(SinkError::AlreadyWritten { index: 3 })
        ));
        series.end_frame(3).unwrap();

        assert!(matches!(
            series.begin_frame(3, (1, 2, 2), [1.0; 3]),
            Err(SinkError::AlreadyWritten { index: 3 })
        ));
        assert!(series.write_slice(3, 0, &Field::zeros(2, 2)).is_err());
        let (_, data) = ::mrc::read_as::<f32, _>(series.frame_path(3)).unwrap();
        assert_eq!(data, vec![9.0; 4]);
    }

    #[test]
    fn potential_series_rejects_mismatched_slices() {
        let dir = tempdir().unwrap();
        let series = MrcPotentialSeries::new(dir.path());
        series.begin_frame(0, (2, 2, 2), [1.0; 3]).unwrap();
        assert!(matches!(
            series.write_slice(0, 0, &Field::zeros(3, 2)),
            Err(SinkError::ShapeMismatch { index: 0, .. })
        ));
        assert!(matches!(
            series.write_slice(0, 2, &Field::zeros(2, 2)),
            Err(SinkError::OutOfRange { index: 2, num_frames: 2 })
        ));
        assert!(!series.frame_path(0).exists());
    }
}
