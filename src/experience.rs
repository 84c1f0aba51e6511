//! Acquisition context
//!
//! An [`Experience`] is what the acquisition layer hands over after a
//! simulation run: the sequence it played (borrowed, never freed here), the
//! raw k-space volume it produced, and the parameters saying how that volume
//! should be reconstructed.

use serde::{Deserialize, Serialize};

use crate::error::{ReconError, ReconResult};
use crate::filter::{KSpaceOrigin, WindowKind};
use crate::sequence::SequenceDescriptor;
use crate::volume::{Dims, Volume, VolumeKind};

/// Representation produced by a context-driven reconstruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Complex image-space volume
    Complex,
    /// Per-voxel modulus, `f32`
    #[default]
    Magnitude,
    /// Per-voxel argument in (-π, π], `f32`
    Phase,
}

/// How a context's k-space should be reconstructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconParams {
    pub window: WindowKind,
    pub output: OutputKind,
    pub origin: KSpaceOrigin,
}

/// One acquisition ready for reconstruction
#[derive(Debug)]
pub struct Experience<'seq> {
    sequence: &'seq SequenceDescriptor,
    matrix: Dims,
    kspace: Volume,
    params: ReconParams,
}

impl<'seq> Experience<'seq> {
    /// Context whose acquisition matrix is the k-space volume's own extent
    pub fn new(sequence: &'seq SequenceDescriptor, kspace: Volume, params: ReconParams) -> ReconResult<Self> {
        let matrix = kspace.dims();
        Self::with_matrix(sequence, matrix, kspace, params)
    }

    /// Context with an explicit acquisition matrix
    ///
    /// Fails with [`ReconError::DimensionMismatch`] if `kspace` does not have
    /// `matrix` dims, or [`ReconError::KindMismatch`] if it is not complex.
    pub fn with_matrix(
        sequence: &'seq SequenceDescriptor,
        matrix: Dims,
        kspace: Volume,
        params: ReconParams,
    ) -> ReconResult<Self> {
        check_kspace(&kspace, matrix)?;
        Ok(Self { sequence, matrix, kspace, params })
    }

    pub fn sequence(&self) -> &'seq SequenceDescriptor {
        self.sequence
    }

    pub fn matrix(&self) -> Dims {
        self.matrix
    }

    pub fn kspace(&self) -> &Volume {
        &self.kspace
    }

    pub fn params(&self) -> ReconParams {
        self.params
    }

    pub fn set_params(&mut self, params: ReconParams) {
        self.params = params;
    }

    /// Swap in a new k-space volume, handing the previous one back
    pub fn replace_kspace(&mut self, kspace: Volume) -> ReconResult<Volume> {
        check_kspace(&kspace, self.matrix)?;
        Ok(std::mem::replace(&mut self.kspace, kspace))
    }

    /// Give up the context, keeping its k-space volume
    pub fn into_kspace(self) -> Volume {
        self.kspace
    }
}

fn check_kspace(kspace: &Volume, matrix: Dims) -> ReconResult<()> {
    if kspace.kind() != VolumeKind::ComplexDouble {
        return Err(ReconError::KindMismatch {
            expected: VolumeKind::ComplexDouble,
            actual: kspace.kind(),
        });
    }
    kspace.ensure_dims(matrix)
}
