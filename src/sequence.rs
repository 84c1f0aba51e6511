//! Pulse-sequence descriptor storage
//!
//! A sequence is a 4D event table: frames, each holding partitions, each
//! holding lines of samples. Instead of a pointer to pointer to pointer
//! structure, the tables live in one arena and refer to each other by index,
//! and every sample lives in a single flat pool. Releasing a descriptor is a
//! bulk deallocation of two vectors.
//!
//! The contents of the table belong to the acquisition layer. This module
//! only sizes, addresses and releases it.

use std::ops::Range;

use num_complex::Complex64;
use tracing::{debug, warn};

use crate::error::{ReconError, ReconResult};
use crate::volume::{try_vec_filled, try_vec_from_iter, try_with_capacity, Dims, Volume, VolumeData, VolumeKind};

/// Structural sizing of a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceShape {
    /// Samples per line (innermost)
    pub samples: usize,
    /// Lines per partition
    pub lines: usize,
    /// Partitions per frame
    pub partitions: usize,
    /// Frames (outermost)
    pub frames: usize,
    /// Element kind of each sample
    pub kind: VolumeKind,
}

impl SequenceShape {
    /// Interpret the five integer allocation parameters
    ///
    /// `(samples, lines, partitions, frames, kind_code)`: four strictly
    /// positive extents and a [`VolumeKind`] code.
    pub fn from_params(p1: i32, p2: i32, p3: i32, p4: i32, p5: i32) -> ReconResult<Self> {
        let extent = |name: &str, v: i32| -> ReconResult<usize> {
            usize::try_from(v)
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| ReconError::allocation(format!("sequence {name} must be positive, got {v}")))
        };
        Ok(Self {
            samples: extent("samples", p1)?,
            lines: extent("lines", p2)?,
            partitions: extent("partitions", p3)?,
            frames: extent("frames", p4)?,
            kind: VolumeKind::from_code(p5)?,
        })
    }

    /// Total number of samples
    ///
    /// An empty extent or an overflowing count is an allocation error.
    pub fn sample_count(&self) -> ReconResult<usize> {
        if self.samples == 0 || self.lines == 0 || self.partitions == 0 || self.frames == 0 {
            return Err(ReconError::allocation(format!("{self:?} has an empty extent")));
        }
        self.samples
            .checked_mul(self.lines)
            .and_then(|n| n.checked_mul(self.partitions))
            .and_then(|n| n.checked_mul(self.frames))
            .ok_or_else(|| ReconError::allocation(format!("{self:?} sample count overflows usize")))
    }

    /// Extent of one frame viewed as a volume
    pub fn frame_dims(&self) -> Dims {
        Dims::new(self.samples, self.lines, self.partitions)
    }
}

/// One arena entry: a contiguous run of children in the next level down,
/// or of samples in the pool for line tables
#[derive(Debug, Clone, Copy)]
struct Table {
    first: usize,
    len: usize,
}

impl Table {
    fn child(&self, index: usize) -> Option<usize> {
        (index < self.len).then(|| self.first + index)
    }

    fn range(&self) -> Range<usize> {
        self.first..self.first + self.len
    }
}

/// Read access to one line of samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SequenceLine<'a> {
    Float(&'a [f32]),
    ComplexDouble(&'a [Complex64]),
}

/// Write access to one line of samples
#[derive(Debug, PartialEq)]
pub enum SequenceLineMut<'a> {
    Float(&'a mut [f32]),
    ComplexDouble(&'a mut [Complex64]),
}

/// A single sample value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SequenceSample {
    Float(f32),
    ComplexDouble(Complex64),
}

impl SequenceSample {
    pub fn kind(&self) -> VolumeKind {
        match self {
            SequenceSample::Float(_) => VolumeKind::Float,
            SequenceSample::ComplexDouble(_) => VolumeKind::ComplexDouble,
        }
    }
}

const ROOT: usize = 0;

/// An allocated pulse-sequence table
///
/// Field order is drop order: the sample pool is released before the tables
/// that index it.
pub struct SequenceDescriptor {
    pool: VolumeData,
    tables: Vec<Table>,
    shape: SequenceShape,
}

impl SequenceDescriptor {
    /// Build the full table for `shape`, zero-filled
    pub fn allocate(shape: SequenceShape) -> ReconResult<Self> {
        let n_samples = shape.sample_count()?;
        let pool = match shape.kind {
            VolumeKind::Float => VolumeData::Float(try_vec_filled(n_samples, 0.0f32)?),
            VolumeKind::ComplexDouble => {
                VolumeData::ComplexDouble(try_vec_filled(n_samples, Complex64::new(0.0, 0.0))?)
            }
        };

        let SequenceShape { samples, lines, partitions, frames, .. } = shape;
        let overflow = || ReconError::allocation(format!("{shape:?} table count overflows usize"));
        let n_partitions = frames.checked_mul(partitions).ok_or_else(overflow)?;
        let n_lines = n_partitions.checked_mul(lines).ok_or_else(overflow)?;
        let n_tables = n_lines
            .checked_add(n_partitions)
            .and_then(|n| n.checked_add(frames))
            .and_then(|n| n.checked_add(1))
            .ok_or_else(overflow)?;

        // Levels are laid out one after another: root, frames, partitions, lines
        let frame_base = 1;
        let partition_base = frame_base + frames;
        let line_base = partition_base + n_partitions;

        let mut tables = try_with_capacity(n_tables)?;
        tables.push(Table { first: frame_base, len: frames });
        tables.extend((0..frames).map(|t| Table { first: partition_base + t * partitions, len: partitions }));
        tables.extend((0..n_partitions).map(|z| Table { first: line_base + z * lines, len: lines }));
        tables.extend((0..n_lines).map(|y| Table { first: y * samples, len: samples }));

        debug!(?shape, tables = n_tables, samples = n_samples, "allocated sequence");
        Ok(Self { pool, tables, shape })
    }

    pub fn shape(&self) -> SequenceShape {
        self.shape
    }

    pub fn kind(&self) -> VolumeKind {
        self.shape.kind
    }

    /// Number of arena tables (root, frames, partitions and lines)
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Pool range of line (frame, partition, line), `None` if out of range
    fn line_range(&self, frame: usize, partition: usize, line: usize) -> Option<Range<usize>> {
        let frame_table = self.tables[ROOT].child(frame)?;
        let partition_table = self.tables[frame_table].child(partition)?;
        let line_table = self.tables[partition_table].child(line)?;
        Some(self.tables[line_table].range())
    }

    pub fn line(&self, frame: usize, partition: usize, line: usize) -> Option<SequenceLine<'_>> {
        let range = self.line_range(frame, partition, line)?;
        Some(match &self.pool {
            VolumeData::Float(v) => SequenceLine::Float(&v[range]),
            VolumeData::ComplexDouble(v) => SequenceLine::ComplexDouble(&v[range]),
        })
    }

    pub fn line_mut(&mut self, frame: usize, partition: usize, line: usize) -> Option<SequenceLineMut<'_>> {
        let range = self.line_range(frame, partition, line)?;
        Some(match &mut self.pool {
            VolumeData::Float(v) => SequenceLineMut::Float(&mut v[range]),
            VolumeData::ComplexDouble(v) => SequenceLineMut::ComplexDouble(&mut v[range]),
        })
    }

    /// Pool offset of one sample, naming the first level whose index is out of range
    fn locate(&self, frame: usize, partition: usize, line: usize, sample: usize) -> ReconResult<usize> {
        let SequenceShape { samples, lines, partitions, frames, .. } = self.shape;
        for (what, index, len) in [
            ("frame", frame, frames),
            ("partition", partition, partitions),
            ("line", line, lines),
            ("sample", sample, samples),
        ] {
            if index >= len {
                return Err(ReconError::IndexOutOfRange { what, index, len });
            }
        }
        let range = self
            .line_range(frame, partition, line)
            .ok_or(ReconError::IndexOutOfRange { what: "line", index: line, len: lines })?;
        Ok(range.start + sample)
    }

    pub fn get(&self, frame: usize, partition: usize, line: usize, sample: usize) -> Option<SequenceSample> {
        let at = self.locate(frame, partition, line, sample).ok()?;
        Some(match &self.pool {
            VolumeData::Float(v) => SequenceSample::Float(v[at]),
            VolumeData::ComplexDouble(v) => SequenceSample::ComplexDouble(v[at]),
        })
    }

    /// Overwrite one sample
    ///
    /// Fails with [`ReconError::KindMismatch`] if `value` is not of the
    /// sequence's element kind.
    pub fn set(
        &mut self,
        frame: usize,
        partition: usize,
        line: usize,
        sample: usize,
        value: SequenceSample,
    ) -> ReconResult<()> {
        let at = self.locate(frame, partition, line, sample)?;
        match (&mut self.pool, value) {
            (VolumeData::Float(v), SequenceSample::Float(x)) => v[at] = x,
            (VolumeData::ComplexDouble(v), SequenceSample::ComplexDouble(c)) => v[at] = c,
            _ => {
                return Err(ReconError::KindMismatch {
                    expected: self.shape.kind,
                    actual: value.kind(),
                })
            }
        }
        Ok(())
    }

    /// Copy one frame out as a (samples, lines, partitions) volume
    pub fn frame_volume(&self, frame: usize) -> ReconResult<Volume> {
        let dims = self.shape.frame_dims();
        if frame >= self.shape.frames {
            return Err(ReconError::IndexOutOfRange {
                what: "frame",
                index: frame,
                len: self.shape.frames,
            });
        }
        let frame_len = dims.len();
        let range = frame * frame_len..(frame + 1) * frame_len;
        match &self.pool {
            VolumeData::Float(v) => Volume::from_float(dims, try_vec_from_iter(v[range].iter().copied())?),
            VolumeData::ComplexDouble(v) => {
                Volume::from_complex(dims, try_vec_from_iter(v[range].iter().copied())?)
            }
        }
    }
}

impl std::fmt::Debug for SequenceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceDescriptor")
            .field("shape", &self.shape)
            .field("tables", &self.tables.len())
            .finish_non_exhaustive()
    }
}

/// Allocate a sequence from the five acquisition-layer parameters
///
/// See [`SequenceShape::from_params`] for their meaning.
pub fn allocate_sequence(p1: i32, p2: i32, p3: i32, p4: i32, p5: i32) -> ReconResult<SequenceDescriptor> {
    SequenceDescriptor::allocate(SequenceShape::from_params(p1, p2, p3, p4, p5)?)
}

/// Release the sequence held in `slot`, leaving `None` behind
///
/// Returns `true` if a sequence was released. Freeing an empty slot is a no-op.
pub fn free_sequence(slot: &mut Option<SequenceDescriptor>) -> bool {
    match slot.take() {
        Some(seq) => {
            debug!(shape = ?seq.shape, "freed sequence");
            drop(seq);
            true
        }
        None => {
            warn!("free requested on an empty sequence slot");
            false
        }
    }
}
