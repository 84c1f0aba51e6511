//! FFT wrapper for 3D transforms using rustfft
//!
//! Provides 3D FFT/IFFT operations compatible with NumPy's FFT conventions:
//! the forward transform is unnormalised and the inverse applies 1/N, with
//! N = nx*ny*nz. Uses Fortran (column-major) order indexing, the layout of
//! every [`crate::volume::Volume`].
//!
//! rustfft plans any length (mixed radix for smooth sizes, Rader/Bluestein for
//! large primes), so acquisition matrices need not be powers of two. A
//! [`TransformPolicy`] can refuse lengths whose largest prime factor exceeds a
//! bound instead of taking the prime-size path.

use std::sync::Arc;

use num_complex::Complex64;
use rustfft::{Fft, FftDirection, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{ReconError, ReconResult};
use crate::volume::{try_vec_filled, Dims};

/// Which lengths the transform accepts, and how it runs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformPolicy {
    /// Reject axes whose largest prime factor exceeds this bound.
    /// `None` accepts any length.
    pub max_prime_factor: Option<usize>,
    /// Split axis passes across the rayon pool (needs the `parallel` feature)
    pub parallel: bool,
}

impl TransformPolicy {
    /// Check every axis of `dims` against the policy
    pub fn check(&self, dims: Dims) -> ReconResult<()> {
        let Some(limit) = self.max_prime_factor else {
            return Ok(());
        };
        for (axis, len) in [('x', dims.nx), ('y', dims.ny), ('z', dims.nz)] {
            let factor = largest_prime_factor(len);
            if factor > limit {
                return Err(ReconError::TransformUnsupported { axis, len, factor });
            }
        }
        Ok(())
    }
}

/// Largest prime factor of `n` (1 for n <= 1)
pub fn largest_prime_factor(mut n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    let mut largest = 1;
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            largest = p;
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        largest = n;
    }
    largest
}

/// FFT workspace that caches plans and scratch buffers for reuse
pub struct Fft3dWorkspace {
    dims: Dims,
    n_total: usize,
    parallel: bool,
    // Forward FFT plans
    fft_x: Arc<dyn Fft<f64>>,
    fft_y: Arc<dyn Fft<f64>>,
    fft_z: Arc<dyn Fft<f64>>,
    // Inverse FFT plans
    ifft_x: Arc<dyn Fft<f64>>,
    ifft_y: Arc<dyn Fft<f64>>,
    ifft_z: Arc<dyn Fft<f64>>,
    // Scratch buffers
    scratch_x: Vec<Complex64>,
    scratch_y: Vec<Complex64>,
    scratch_z: Vec<Complex64>,
    buffer_y: Vec<Complex64>,
    buffer_z: Vec<Complex64>,
}

impl Fft3dWorkspace {
    /// Create a serial workspace accepting any axis length
    pub fn new(dims: Dims) -> ReconResult<Self> {
        Self::with_policy(dims, &TransformPolicy::default())
    }

    /// Create a workspace after checking `dims` against `policy`
    pub fn with_policy(dims: Dims, policy: &TransformPolicy) -> ReconResult<Self> {
        let n_total = dims.checked_len()?;
        policy.check(dims)?;

        let mut planner = FftPlanner::new();
        let (nx, ny, nz) = dims.as_tuple();

        let fft_x = planner.plan_fft(nx, FftDirection::Forward);
        let fft_y = planner.plan_fft(ny, FftDirection::Forward);
        let fft_z = planner.plan_fft(nz, FftDirection::Forward);

        let ifft_x = planner.plan_fft(nx, FftDirection::Inverse);
        let ifft_y = planner.plan_fft(ny, FftDirection::Inverse);
        let ifft_z = planner.plan_fft(nz, FftDirection::Inverse);

        let zero = Complex64::new(0.0, 0.0);
        let scratch_x = try_vec_filled(fft_x.get_inplace_scratch_len().max(ifft_x.get_inplace_scratch_len()), zero)?;
        let scratch_y = try_vec_filled(fft_y.get_inplace_scratch_len().max(ifft_y.get_inplace_scratch_len()), zero)?;
        let scratch_z = try_vec_filled(fft_z.get_inplace_scratch_len().max(ifft_z.get_inplace_scratch_len()), zero)?;
        let buffer_y = try_vec_filled(ny, zero)?;
        let buffer_z = try_vec_filled(nz, zero)?;

        let parallel = policy.parallel && cfg!(feature = "parallel");
        if policy.parallel && !parallel {
            debug!("parallel transform requested without the `parallel` feature; running serially");
        }
        debug!(%dims, parallel, "planned 3D FFT");

        Ok(Self {
            dims,
            n_total,
            parallel,
            fft_x, fft_y, fft_z,
            ifft_x, ifft_y, ifft_z,
            scratch_x, scratch_y, scratch_z,
            buffer_y,
            buffer_z,
        })
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// Whether axis passes run on the rayon pool
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// In-place forward 3D FFT (unnormalised)
    pub fn fft3d(&mut self, data: &mut [Complex64]) -> ReconResult<()> {
        self.check_len(data)?;
        self.transform(data, FftDirection::Forward)
    }

    /// In-place inverse 3D FFT (with 1/N normalization)
    pub fn ifft3d(&mut self, data: &mut [Complex64]) -> ReconResult<()> {
        self.check_len(data)?;
        self.transform(data, FftDirection::Inverse)?;

        let n_total = self.n_total as f64;
        for val in data.iter_mut() {
            *val /= n_total;
        }
        Ok(())
    }

    fn check_len(&self, data: &[Complex64]) -> ReconResult<()> {
        if data.len() != self.n_total {
            return Err(ReconError::DimensionMismatch {
                expected: self.dims,
                actual: Dims::new(data.len(), 1, 1),
            });
        }
        Ok(())
    }

    fn plans(&self, direction: FftDirection) -> [Arc<dyn Fft<f64>>; 3] {
        match direction {
            FftDirection::Forward => [self.fft_x.clone(), self.fft_y.clone(), self.fft_z.clone()],
            FftDirection::Inverse => [self.ifft_x.clone(), self.ifft_y.clone(), self.ifft_z.clone()],
        }
    }

    fn transform(&mut self, data: &mut [Complex64], direction: FftDirection) -> ReconResult<()> {
        let [fft_x, fft_y, fft_z] = self.plans(direction);

        #[cfg(feature = "parallel")]
        {
            if self.parallel {
                return parallel::transform(data, self.dims, &fft_x, &fft_y, &fft_z);
            }
        }

        let (nx, ny, nz) = self.dims.as_tuple();

        // Transform along x-axis (innermost in Fortran order, stride 1)
        trace!(?direction, len = nx, "x pass");
        for k in 0..nz {
            for j in 0..ny {
                let start = idx3d(0, j, k, nx, ny);
                fft_x.process_with_scratch(&mut data[start..start + nx], &mut self.scratch_x);
            }
        }

        // Transform along y-axis (stride nx)
        trace!(?direction, len = ny, "y pass");
        for k in 0..nz {
            for i in 0..nx {
                for j in 0..ny {
                    self.buffer_y[j] = data[idx3d(i, j, k, nx, ny)];
                }
                fft_y.process_with_scratch(&mut self.buffer_y, &mut self.scratch_y);
                for j in 0..ny {
                    data[idx3d(i, j, k, nx, ny)] = self.buffer_y[j];
                }
            }
        }

        // Transform along z-axis (stride nx*ny)
        trace!(?direction, len = nz, "z pass");
        for j in 0..ny {
            for i in 0..nx {
                for k in 0..nz {
                    self.buffer_z[k] = data[idx3d(i, j, k, nx, ny)];
                }
                fft_z.process_with_scratch(&mut self.buffer_z, &mut self.scratch_z);
                for k in 0..nz {
                    data[idx3d(i, j, k, nx, ny)] = self.buffer_z[k];
                }
            }
        }
        Ok(())
    }
}

/// Axis passes split across the rayon pool
///
/// Each 1D line goes through the same plan with the same input as in the
/// serial path, so the output is bit-identical whatever the thread count.
#[cfg(feature = "parallel")]
mod parallel {
    use std::sync::Arc;

    use num_complex::Complex64;
    use rayon::prelude::*;
    use rustfft::Fft;
    use tracing::trace;

    use crate::error::ReconResult;
    use crate::volume::{try_vec_filled, Dims};

    pub(super) fn transform(
        data: &mut [Complex64],
        dims: Dims,
        fft_x: &Arc<dyn Fft<f64>>,
        fft_y: &Arc<dyn Fft<f64>>,
        fft_z: &Arc<dyn Fft<f64>>,
    ) -> ReconResult<()> {
        let (nx, ny, nz) = dims.as_tuple();
        let zero = Complex64::new(0.0, 0.0);

        trace!(len = nx, "parallel x pass");
        data.par_chunks_mut(nx).for_each_init(
            || vec![zero; fft_x.get_inplace_scratch_len()],
            |scratch, line| fft_x.process_with_scratch(line, scratch),
        );

        // Each z-slab holds complete y-lines
        trace!(len = ny, "parallel y pass");
        data.par_chunks_mut(nx * ny).for_each_init(
            || (vec![zero; fft_y.get_inplace_scratch_len()], vec![zero; ny]),
            |(scratch, buffer), slab| {
                for i in 0..nx {
                    for j in 0..ny {
                        buffer[j] = slab[i + j * nx];
                    }
                    fft_y.process_with_scratch(buffer, scratch);
                    for j in 0..ny {
                        slab[i + j * nx] = buffer[j];
                    }
                }
            },
        );

        // z-lines span every slab: gather them into contiguous columns first
        trace!(len = nz, "parallel z pass");
        let plane = nx * ny;
        let mut columns = try_vec_filled(data.len(), zero)?;
        let src: &[Complex64] = data;
        columns.par_chunks_mut(nz).enumerate().for_each(|(col, line)| {
            for (k, v) in line.iter_mut().enumerate() {
                *v = src[col + k * plane];
            }
        });
        columns.par_chunks_mut(nz).for_each_init(
            || vec![zero; fft_z.get_inplace_scratch_len()],
            |scratch, line| fft_z.process_with_scratch(line, scratch),
        );
        data.par_chunks_mut(plane).enumerate().for_each(|(k, slab)| {
            for (col, v) in slab.iter_mut().enumerate() {
                *v = columns[col * nz + k];
            }
        });
        Ok(())
    }
}

/// Index into a 3D array stored in Fortran order (column-major)
/// index = x + y*nx + z*nx*ny
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

/// 3D FFT (in-place, complex-to-complex)
///
/// Matches numpy.fft.fftn behavior.
pub fn fft3d(data: &mut [Complex64], nx: usize, ny: usize, nz: usize) -> ReconResult<()> {
    Fft3dWorkspace::new(Dims::new(nx, ny, nz))?.fft3d(data)
}

/// 3D IFFT (in-place, complex-to-complex)
///
/// Matches numpy.fft.ifftn behavior (includes 1/N normalization).
pub fn ifft3d(data: &mut [Complex64], nx: usize, ny: usize, nz: usize) -> ReconResult<()> {
    Fft3dWorkspace::new(Dims::new(nx, ny, nz))?.ifft3d(data)
}

/// Generate FFT frequency values for a given dimension
/// Matches numpy.fft.fftfreq(n, d)
pub fn fftfreq(n: usize, d: f64) -> Vec<f64> {
    let mut freq = vec![0.0; n];
    let val = 1.0 / (n as f64 * d);

    if n % 2 == 0 {
        // Even: [0, 1, ..., n/2-1, -n/2, ..., -1]
        for i in 0..n / 2 {
            freq[i] = (i as f64) * val;
        }
        for i in n / 2..n {
            freq[i] = ((i as i64) - (n as i64)) as f64 * val;
        }
    } else {
        // Odd: [0, 1, ..., (n-1)/2, -(n-1)/2, ..., -1]
        for i in 0..=(n - 1) / 2 {
            freq[i] = (i as f64) * val;
        }
        for i in (n + 1) / 2..n {
            freq[i] = ((i as i64) - (n as i64)) as f64 * val;
        }
    }
    freq
}

/// Circularly shift `src` by (sx, sy, sz) voxels into `dst`
///
/// Both slices must hold nx*ny*nz samples.
pub fn circshift_into<T: Copy>(
    src: &[T],
    dst: &mut [T],
    nx: usize, ny: usize, nz: usize,
    shift: (usize, usize, usize),
) {
    let (sx, sy, sz) = shift;
    for k in 0..nz {
        let dk = (k + sz) % nz;
        for j in 0..ny {
            let dj = (j + sy) % ny;
            for i in 0..nx {
                let di = (i + sx) % nx;
                dst[idx3d(di, dj, dk, nx, ny)] = src[idx3d(i, j, k, nx, ny)];
            }
        }
    }
}

/// Shift that moves the zero-frequency sample from the corner to the centre
/// (numpy.fft.fftshift)
pub fn fftshift_offsets(nx: usize, ny: usize, nz: usize) -> (usize, usize, usize) {
    (nx / 2, ny / 2, nz / 2)
}

/// Shift that undoes [`fftshift_offsets`] for any parity
/// (numpy.fft.ifftshift)
pub fn ifftshift_offsets(nx: usize, ny: usize, nz: usize) -> (usize, usize, usize) {
    ((nx + 1) / 2, (ny + 1) / 2, (nz + 1) / 2)
}

/// 3D FFT shift: swap quadrants so zero-frequency is at center
///
/// Matches numpy.fft.fftshift behavior for 3D data in Fortran order.
pub fn fftshift<T: Copy + Default>(data: &[T], nx: usize, ny: usize, nz: usize) -> Vec<T> {
    let mut out = vec![T::default(); nx * ny * nz];
    circshift_into(data, &mut out, nx, ny, nz, fftshift_offsets(nx, ny, nz));
    out
}

/// 3D inverse FFT shift: undo fftshift
///
/// Matches numpy.fft.ifftshift behavior for 3D data in Fortran order.
pub fn ifftshift<T: Copy + Default>(data: &[T], nx: usize, ny: usize, nz: usize) -> Vec<T> {
    let mut out = vec![T::default(); nx * ny * nz];
    circshift_into(data, &mut out, nx, ny, nz, ifftshift_offsets(nx, ny, nz));
    out
}
