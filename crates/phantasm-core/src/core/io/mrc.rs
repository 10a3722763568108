use ::mrc::{DataBlock, OwnedData, Writer, WriterBuilder};
use nalgebra::DMatrix;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MrcError {
    #[error("MRC error: {0}")]
    Format(#[from] ::mrc::Error),

    #[error("Section {index} is out of range for {num_sections} sections")]
    SectionOutOfRange { index: usize, num_sections: usize },

    #[error("Section has shape {actual:?}, expected {expected:?}")]
    SectionShape {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

/// A float32 MRC file of `nz` sections of `ny` rows by `nx` columns.
///
/// The file is memory-mapped at its full size when created, so sections may arrive in any
/// order. Data statistics are folded into the header by [`MrcWriter::finish`].
#[derive(Debug)]
pub struct MrcWriter {
    inner: Writer,
    shape: (usize, usize, usize),
}

impl MrcWriter {
    /// Creates an image stack (space group 0). The z cell length covers a single section.
    pub fn create_stack(
        path: &Path,
        shape: (usize, usize, usize),
        voxel_size: [f32; 3],
    ) -> Result<Self, MrcError> {
        let (_, ny, nx) = shape;
        let builder = Self::builder(path, shape).image_stack().cell_lengths(
            nx as f32 * voxel_size[0],
            ny as f32 * voxel_size[1],
            voxel_size[2],
        );
        Self::open(builder, shape)
    }

    /// Creates a 3-D volume (space group 1).
    pub fn create_volume(
        path: &Path,
        shape: (usize, usize, usize),
        voxel_size: [f32; 3],
    ) -> Result<Self, MrcError> {
        let (nz, ny, nx) = shape;
        let builder = Self::builder(path, shape).volume().cell_lengths(
            nx as f32 * voxel_size[0],
            ny as f32 * voxel_size[1],
            nz as f32 * voxel_size[2],
        );
        Self::open(builder, shape)
    }

    fn builder(path: &Path, (nz, ny, nx): (usize, usize, usize)) -> WriterBuilder {
        ::mrc::create(path)
            .shape([nx, ny, nz])
            .mode::<f32>()
            .add_label("phantasm")
    }

    fn open(builder: WriterBuilder, shape: (usize, usize, usize)) -> Result<Self, MrcError> {
        let inner = builder.finish_mmap()?;
        Ok(Self { inner, shape })
    }

    /// `(nz, ny, nx)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    /// Writes section `index` from a `(ny, nx)` matrix, x varying fastest on disk.
    pub fn write_section(&mut self, index: usize, data: &DMatrix<f64>) -> Result<(), MrcError> {
        let (nz, ny, nx) = self.shape;
        if index >= nz {
            return Err(MrcError::SectionOutOfRange {
                index,
                num_sections: nz,
            });
        }
        if data.shape() != (ny, nx) {
            return Err(MrcError::SectionShape {
                expected: (ny, nx),
                actual: data.shape(),
            });
        }

        // nalgebra is column-major; the transpose's storage is row-major.
        let values: Vec<f32> = data.transpose().iter().map(|&v| v as f32).collect();
        let block = DataBlock::Owned {
            offset: [0, 0, index],
            shape: [nx, ny, 1],
            data: OwnedData::Float32(values),
        };
        self.inner.write_data_block(&block)?;
        Ok(())
    }

    /// Updates the header statistics and flushes the file.
    pub fn finish(mut self) -> Result<(), MrcError> {
        self.inner.update_header_stats()?;
        self.inner.finalize()?;
        Ok(())
    }
}
