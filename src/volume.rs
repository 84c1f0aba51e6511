//! Volume buffers
//!
//! A [`Volume`] is a 3D array holding either single-precision real samples or
//! double-precision complex samples. Storage is contiguous in Fortran
//! (column-major) order, index = x + y*nx + z*nx*ny, the same order the FFT
//! helpers in [`crate::fft`] walk.
//!
//! The element kind is fixed when a volume is allocated. Converting between
//! kinds always produces a new volume; the source is never reinterpreted.
//! Volumes do not implement `Clone`: duplicating storage goes through
//! [`Volume::try_clone`], which reports allocation failure like any other
//! allocation.

use std::f64::consts::PI;
use std::fmt;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ReconError, ReconResult};
use crate::fft::idx3d;

/// Extent of a volume along x, y and z
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dims {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
}

impl Dims {
    pub const fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz }
    }

    /// Validate signed extents as they arrive from the acquisition layer
    ///
    /// Every extent must be strictly positive and the element count must fit
    /// in `usize`.
    pub fn from_signed(nx: i64, ny: i64, nz: i64) -> ReconResult<Self> {
        let to_extent = |axis: char, n: i64| -> ReconResult<usize> {
            if n <= 0 {
                return Err(ReconError::allocation(format!(
                    "dimension {axis} must be positive, got {n}"
                )));
            }
            usize::try_from(n).map_err(|_| {
                ReconError::allocation(format!("dimension {axis}={n} exceeds addressable size"))
            })
        };
        let dims = Self::new(to_extent('x', nx)?, to_extent('y', ny)?, to_extent('z', nz)?);
        dims.checked_len()?;
        Ok(dims)
    }

    /// Number of voxels, with overflow reported as an allocation error
    pub fn checked_len(&self) -> ReconResult<usize> {
        if self.nx == 0 || self.ny == 0 || self.nz == 0 {
            return Err(ReconError::allocation(format!("{self} volume has an empty axis")));
        }
        self.nx
            .checked_mul(self.ny)
            .and_then(|n| n.checked_mul(self.nz))
            .ok_or_else(|| ReconError::allocation(format!("{self} element count overflows usize")))
    }

    /// Number of voxels
    ///
    /// Only meaningful for dimensions that passed validation; every `Dims`
    /// held by a [`Volume`] has.
    #[inline]
    pub fn len(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Linear index of voxel (i, j, k)
    #[inline(always)]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        idx3d(i, j, k, self.nx, self.ny)
    }

    /// Fail with [`ReconError::DimensionMismatch`] unless `self == expected`
    pub fn ensure_eq(&self, expected: Dims) -> ReconResult<()> {
        if *self != expected {
            return Err(ReconError::DimensionMismatch {
                expected,
                actual: *self,
            });
        }
        Ok(())
    }

    pub fn as_tuple(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.nx, self.ny, self.nz)
    }
}

/// Element kind of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKind {
    /// `f32` samples
    Float,
    /// `Complex<f64>` samples
    ComplexDouble,
}

impl VolumeKind {
    /// Integer code used at the acquisition boundary
    pub const fn code(self) -> i32 {
        match self {
            VolumeKind::Float => 0,
            VolumeKind::ComplexDouble => 1,
        }
    }

    pub fn from_code(code: i32) -> ReconResult<Self> {
        match code {
            0 => Ok(VolumeKind::Float),
            1 => Ok(VolumeKind::ComplexDouble),
            other => Err(ReconError::allocation(format!("unknown element kind code {other}"))),
        }
    }

    /// Size in bytes of one element
    pub const fn element_size(self) -> usize {
        match self {
            VolumeKind::Float => std::mem::size_of::<f32>(),
            VolumeKind::ComplexDouble => std::mem::size_of::<Complex64>(),
        }
    }
}

impl fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VolumeKind::Float => "float",
            VolumeKind::ComplexDouble => "complex_double",
        };
        write!(f, "{}", label)
    }
}

/// Which real quantity to derive when converting complex samples to float
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComplexPart {
    /// Euclidean norm
    #[default]
    Magnitude,
    /// Principal argument in (-π, π], 0 for zero-magnitude samples
    Phase,
    Real,
    Imaginary,
}

impl ComplexPart {
    #[inline]
    pub fn project(self, c: Complex64) -> f32 {
        match self {
            ComplexPart::Magnitude => c.norm() as f32,
            ComplexPart::Phase => {
                // Narrowing can round a phase just above -π onto -π
                let phase = principal_phase(c) as f32;
                if phase <= -std::f32::consts::PI {
                    std::f32::consts::PI
                } else {
                    phase
                }
            }
            ComplexPart::Real => c.re as f32,
            ComplexPart::Imaginary => c.im as f32,
        }
    }
}

/// Argument of `c` in (-π, π]
///
/// The origin maps to 0, including signed zeros. A negative real axis with
/// `im == -0.0` maps to +π, not -π.
#[inline]
pub fn principal_phase(c: Complex64) -> f64 {
    if c.re == 0.0 && c.im == 0.0 {
        return 0.0;
    }
    let phase = c.im.atan2(c.re);
    if phase <= -PI {
        PI
    } else {
        phase
    }
}

/// Sample storage of a volume
pub enum VolumeData {
    Float(Vec<f32>),
    ComplexDouble(Vec<Complex64>),
}

impl VolumeData {
    pub fn kind(&self) -> VolumeKind {
        match self {
            VolumeData::Float(_) => VolumeKind::Float,
            VolumeData::ComplexDouble(_) => VolumeKind::ComplexDouble,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VolumeData::Float(v) => v.len(),
            VolumeData::ComplexDouble(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Empty vector with room for exactly `len` elements, reporting refusal
/// instead of aborting
pub(crate) fn try_with_capacity<T>(len: usize) -> ReconResult<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|e| ReconError::allocation(format!("cannot reserve {len} elements: {e}")))?;
    Ok(v)
}

pub(crate) fn try_vec_filled<T: Clone>(len: usize, value: T) -> ReconResult<Vec<T>> {
    let mut v = try_with_capacity(len)?;
    v.resize(len, value);
    Ok(v)
}

/// Collect an exact-size iterator into freshly reserved storage
pub(crate) fn try_vec_from_iter<T, I>(iter: I) -> ReconResult<Vec<T>>
where
    I: ExactSizeIterator<Item = T>,
{
    let mut v = try_with_capacity(iter.len())?;
    v.extend(iter);
    Ok(v)
}

/// A 3D volume exclusively owning its samples
pub struct Volume {
    dims: Dims,
    data: VolumeData,
}

impl Volume {
    /// Allocate a zero-initialised volume from signed extents
    ///
    /// Fails with [`ReconError::Allocation`] if any extent is not positive,
    /// the element count or byte size overflows, or the allocator refuses.
    pub fn allocate(nx: i64, ny: i64, nz: i64, kind: VolumeKind) -> ReconResult<Self> {
        let dims = Dims::from_signed(nx, ny, nz)?;
        Self::zeros(dims, kind)
    }

    /// Allocate a zero-initialised volume of already validated `dims`
    pub fn zeros(dims: Dims, kind: VolumeKind) -> ReconResult<Self> {
        let len = dims.checked_len()?;
        let bytes = len
            .checked_mul(kind.element_size())
            .filter(|&b| b <= isize::MAX as usize)
            .ok_or_else(|| {
                ReconError::allocation(format!("{dims} {kind} volume exceeds addressable size"))
            })?;

        let data = match kind {
            VolumeKind::Float => VolumeData::Float(try_vec_filled(len, 0.0f32)?),
            VolumeKind::ComplexDouble => {
                VolumeData::ComplexDouble(try_vec_filled(len, Complex64::new(0.0, 0.0))?)
            }
        };
        debug!(%dims, %kind, bytes, "allocated volume");
        Ok(Self { dims, data })
    }

    /// Complex volume holding a unit impulse (1, 0) at voxel `at`, zero elsewhere
    ///
    /// An out-of-range coordinate is reported against the first axis it exceeds.
    pub fn impulse(dims: Dims, at: (usize, usize, usize)) -> ReconResult<Self> {
        let (i, j, k) = at;
        for (what, index, len) in [("x", i, dims.nx), ("y", j, dims.ny), ("z", k, dims.nz)] {
            if index >= len {
                return Err(ReconError::IndexOutOfRange { what, index, len });
            }
        }
        let mut vol = Self::zeros(dims, VolumeKind::ComplexDouble)?;
        vol.as_complex_mut()?[dims.index(i, j, k)] = Complex64::new(1.0, 0.0);
        Ok(vol)
    }

    /// Wrap existing complex samples
    pub fn from_complex(dims: Dims, samples: Vec<Complex64>) -> ReconResult<Self> {
        Self::from_data(dims, VolumeData::ComplexDouble(samples))
    }

    /// Wrap existing float samples
    pub fn from_float(dims: Dims, samples: Vec<f32>) -> ReconResult<Self> {
        Self::from_data(dims, VolumeData::Float(samples))
    }

    fn from_data(dims: Dims, data: VolumeData) -> ReconResult<Self> {
        let len = dims.checked_len()?;
        if data.len() != len {
            return Err(ReconError::allocation(format!(
                "{} samples supplied for a {dims} volume ({len} voxels)",
                data.len()
            )));
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn kind(&self) -> VolumeKind {
        self.data.kind()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &VolumeData {
        &self.data
    }

    /// Fail with [`ReconError::DimensionMismatch`] unless the volume has `expected` dims
    pub fn ensure_dims(&self, expected: Dims) -> ReconResult<()> {
        self.dims.ensure_eq(expected)
    }

    fn kind_mismatch(&self, expected: VolumeKind) -> ReconError {
        ReconError::KindMismatch {
            expected,
            actual: self.kind(),
        }
    }

    pub fn as_complex(&self) -> ReconResult<&[Complex64]> {
        match &self.data {
            VolumeData::ComplexDouble(v) => Ok(v),
            VolumeData::Float(_) => Err(self.kind_mismatch(VolumeKind::ComplexDouble)),
        }
    }

    pub fn as_complex_mut(&mut self) -> ReconResult<&mut [Complex64]> {
        match &mut self.data {
            VolumeData::ComplexDouble(v) => Ok(v),
            VolumeData::Float(_) => Err(ReconError::KindMismatch {
                expected: VolumeKind::ComplexDouble,
                actual: VolumeKind::Float,
            }),
        }
    }

    pub fn as_float(&self) -> ReconResult<&[f32]> {
        match &self.data {
            VolumeData::Float(v) => Ok(v),
            VolumeData::ComplexDouble(_) => Err(self.kind_mismatch(VolumeKind::Float)),
        }
    }

    pub fn as_float_mut(&mut self) -> ReconResult<&mut [f32]> {
        match &mut self.data {
            VolumeData::Float(v) => Ok(v),
            VolumeData::ComplexDouble(_) => Err(ReconError::KindMismatch {
                expected: VolumeKind::Float,
                actual: VolumeKind::ComplexDouble,
            }),
        }
    }

    /// Complex sample at (i, j, k), `None` if out of bounds or not complex
    pub fn complex_at(&self, i: usize, j: usize, k: usize) -> Option<Complex64> {
        if i >= self.dims.nx || j >= self.dims.ny || k >= self.dims.nz {
            return None;
        }
        match &self.data {
            VolumeData::ComplexDouble(v) => Some(v[self.dims.index(i, j, k)]),
            VolumeData::Float(_) => None,
        }
    }

    /// Float sample at (i, j, k), `None` if out of bounds or not float
    pub fn float_at(&self, i: usize, j: usize, k: usize) -> Option<f32> {
        if i >= self.dims.nx || j >= self.dims.ny || k >= self.dims.nz {
            return None;
        }
        match &self.data {
            VolumeData::Float(v) => Some(v[self.dims.index(i, j, k)]),
            VolumeData::ComplexDouble(_) => None,
        }
    }

    /// Deep copy with fallible allocation
    pub fn try_clone(&self) -> ReconResult<Self> {
        let data = match &self.data {
            VolumeData::Float(v) => VolumeData::Float(try_vec_from_iter(v.iter().copied())?),
            VolumeData::ComplexDouble(v) => {
                VolumeData::ComplexDouble(try_vec_from_iter(v.iter().copied())?)
            }
        };
        Ok(Self {
            dims: self.dims,
            data,
        })
    }

    /// Convert to `target`, deriving magnitude for complex to float
    pub fn convert_kind(&self, target: VolumeKind) -> ReconResult<Self> {
        self.convert_with(target, ComplexPart::Magnitude)
    }

    /// Convert to `target` into a newly allocated volume
    ///
    /// `part` selects the derived quantity for complex to float and is
    /// ignored otherwise. Float to complex stores `(v, 0)`. Same-kind
    /// conversion is a deep copy.
    pub fn convert_with(&self, target: VolumeKind, part: ComplexPart) -> ReconResult<Self> {
        let data = match (&self.data, target) {
            (VolumeData::ComplexDouble(v), VolumeKind::Float) => {
                VolumeData::Float(try_vec_from_iter(v.iter().map(|&c| part.project(c)))?)
            }
            (VolumeData::Float(v), VolumeKind::ComplexDouble) => VolumeData::ComplexDouble(
                try_vec_from_iter(v.iter().map(|&x| Complex64::new(x as f64, 0.0)))?,
            ),
            _ => return self.try_clone(),
        };
        Ok(Self {
            dims: self.dims,
            data,
        })
    }

    /// Consume the volume and return its storage
    pub fn into_data(self) -> VolumeData {
        self.data
    }
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("dims", &self.dims)
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// Release the volume held in `slot`, leaving `None` behind
///
/// Returns `true` if a volume was released. Freeing an empty slot is a no-op.
pub fn free_volume(slot: &mut Option<Volume>) -> bool {
    match slot.take() {
        Some(volume) => {
            debug!(dims = %volume.dims, kind = %volume.kind(), "freed volume");
            drop(volume);
            true
        }
        None => {
            warn!("free requested on an empty volume slot");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI as PI_F32;

    #[test]
    fn test_allocate_zeroed() {
        let vol = Volume::allocate(3, 4, 5, VolumeKind::ComplexDouble).unwrap();
        assert_eq!(vol.dims(), Dims::new(3, 4, 5));
        assert_eq!(vol.len(), 60);
        assert!(vol.as_complex().unwrap().iter().all(|c| c.re == 0.0 && c.im == 0.0));

        let vol = Volume::allocate(2, 2, 2, VolumeKind::Float).unwrap();
        assert!(vol.as_float().unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_allocate_rejects_non_positive() {
        for (nx, ny, nz) in [(-1, 4, 4), (4, 0, 4), (4, 4, -7)] {
            let err = Volume::allocate(nx, ny, nz, VolumeKind::Float).unwrap_err();
            assert!(matches!(err, ReconError::Allocation { .. }), "got {err:?}");
        }
    }

    #[test]
    fn test_allocate_rejects_overflow() {
        let err = Volume::allocate(i64::MAX, i64::MAX, 2, VolumeKind::ComplexDouble).unwrap_err();
        assert!(matches!(err, ReconError::Allocation { .. }));

        // Element count fits but the byte size does not
        let n = 1i64 << 21;
        let err = Volume::allocate(n, n, n, VolumeKind::ComplexDouble).unwrap_err();
        assert!(matches!(err, ReconError::Allocation { .. }));
    }

    #[test]
    fn test_from_complex_length_check() {
        let err = Volume::from_complex(Dims::new(2, 2, 2), vec![Complex64::new(1.0, 0.0); 7])
            .unwrap_err();
        assert!(matches!(err, ReconError::Allocation { .. }));
    }

    #[test]
    fn test_kind_accessors() {
        let mut vol = Volume::allocate(2, 2, 2, VolumeKind::Float).unwrap();
        assert!(matches!(
            vol.as_complex(),
            Err(ReconError::KindMismatch { expected: VolumeKind::ComplexDouble, actual: VolumeKind::Float })
        ));
        assert!(vol.as_complex_mut().is_err());
        vol.as_float_mut().unwrap()[3] = 2.5;
        assert_eq!(vol.float_at(1, 1, 0), Some(2.5));
        assert_eq!(vol.float_at(2, 0, 0), None);
        assert_eq!(vol.complex_at(0, 0, 0), None);
    }

    #[test]
    fn test_ensure_dims() {
        let vol = Volume::allocate(4, 4, 4, VolumeKind::Float).unwrap();
        assert!(vol.ensure_dims(Dims::new(4, 4, 4)).is_ok());
        match vol.ensure_dims(Dims::new(4, 4, 3)) {
            Err(ReconError::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, Dims::new(4, 4, 3));
                assert_eq!(actual, Dims::new(4, 4, 4));
            }
            other => panic!("expected DimensionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_convert_complex_to_float() {
        let dims = Dims::new(2, 1, 1);
        let vol = Volume::from_complex(
            dims,
            vec![Complex64::new(3.0, 4.0), Complex64::new(0.0, -2.0)],
        )
        .unwrap();

        let mag = vol.convert_kind(VolumeKind::Float).unwrap();
        assert_eq!(mag.kind(), VolumeKind::Float);
        assert_eq!(mag.dims(), dims);
        assert_eq!(mag.as_float().unwrap(), &[5.0, 2.0]);

        let re = vol.convert_with(VolumeKind::Float, ComplexPart::Real).unwrap();
        assert_eq!(re.as_float().unwrap(), &[3.0, 0.0]);
        let im = vol.convert_with(VolumeKind::Float, ComplexPart::Imaginary).unwrap();
        assert_eq!(im.as_float().unwrap(), &[4.0, -2.0]);

        // Source untouched
        assert_eq!(vol.as_complex().unwrap()[0], Complex64::new(3.0, 4.0));
    }

    #[test]
    fn test_convert_float_to_complex() {
        let vol = Volume::from_float(Dims::new(3, 1, 1), vec![1.0, -2.0, 0.5]).unwrap();
        let c = vol.convert_kind(VolumeKind::ComplexDouble).unwrap();
        let samples = c.as_complex().unwrap();
        assert_eq!(samples[1], Complex64::new(-2.0, 0.0));
        assert!(samples.iter().all(|s| s.im == 0.0));
    }

    #[test]
    fn test_convert_same_kind_is_deep_copy() {
        let mut vol = Volume::from_float(Dims::new(2, 1, 1), vec![1.0, 2.0]).unwrap();
        let copy = vol.convert_kind(VolumeKind::Float).unwrap();
        vol.as_float_mut().unwrap()[0] = 9.0;
        assert_eq!(copy.as_float().unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn test_principal_phase_conventions() {
        assert_eq!(principal_phase(Complex64::new(0.0, 0.0)), 0.0);
        assert_eq!(principal_phase(Complex64::new(-0.0, -0.0)), 0.0);
        assert_eq!(principal_phase(Complex64::new(-1.0, 0.0)), PI);
        assert_eq!(principal_phase(Complex64::new(-1.0, -0.0)), PI);
        assert!((principal_phase(Complex64::new(0.0, 1.0)) - PI / 2.0).abs() < 1e-15);
        assert!((principal_phase(Complex64::new(1.0, -1.0)) + PI / 4.0).abs() < 1e-15);
        assert_eq!(ComplexPart::Phase.project(Complex64::new(-2.0, -0.0)), PI_F32);
    }

    #[test]
    fn test_impulse() {
        let dims = Dims::new(3, 2, 2);
        let vol = Volume::impulse(dims, (2, 1, 0)).unwrap();
        assert_eq!(vol.complex_at(2, 1, 0), Some(Complex64::new(1.0, 0.0)));
        let total: f64 = vol.as_complex().unwrap().iter().map(|c| c.norm()).sum();
        assert_eq!(total, 1.0);
        assert!(matches!(
            Volume::impulse(dims, (3, 0, 0)),
            Err(ReconError::IndexOutOfRange { what: "x", index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_impulse_far_out_of_range() {
        let dims = Dims::new(4, 4, 4);
        assert!(matches!(
            Volume::impulse(dims, (0, 0, usize::MAX)),
            Err(ReconError::IndexOutOfRange { what: "z", index: usize::MAX, len: 4 })
        ));
        assert!(matches!(
            Volume::impulse(dims, (usize::MAX, usize::MAX, 0)),
            Err(ReconError::IndexOutOfRange { what: "x", .. })
        ));
    }

    #[test]
    fn test_free_volume_nulls_slot() {
        let mut slot = Some(Volume::allocate(2, 2, 2, VolumeKind::Float).unwrap());
        assert!(free_volume(&mut slot));
        assert!(slot.is_none());
        // Second free is a no-op
        assert!(!free_volume(&mut slot));
        assert!(slot.is_none());
    }

    #[test]
    fn test_into_data_keeps_samples() {
        let vol = Volume::from_float(Dims::new(3, 1, 1), vec![0.5, 1.5, 2.5]).unwrap();
        match vol.into_data() {
            VolumeData::Float(samples) => assert_eq!(samples, vec![0.5, 1.5, 2.5]),
            VolumeData::ComplexDouble(_) => panic!("float volume came back as complex"),
        }
    }

    #[test]
    fn test_kind_codes() {
        for kind in [VolumeKind::Float, VolumeKind::ComplexDouble] {
            assert_eq!(VolumeKind::from_code(kind.code()).unwrap(), kind);
        }
        assert!(VolumeKind::from_code(7).is_err());
    }
}
