//! k-space apodization
//!
//! Multiplies complex k-space samples by a separable window to suppress Gibbs
//! ringing caused by the finite sampling extent. The window is 1 at the k-space
//! centre and tapers towards 0 at the Nyquist edge along each axis.

use std::f64::consts::PI;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ReconResult;
use crate::fft::{fftfreq, idx3d};
use crate::volume::{Dims, Volume};

/// Apodization window applied before the inverse transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// No filtering; samples are left bit-identical
    None,
    /// Raised cosine, `0.5 * (1 + cos(π d))` for normalised distance `d`
    #[default]
    Hanning,
}

impl WindowKind {
    /// Window value at normalised distance `d` from the centre (0 = centre, 1 = Nyquist)
    #[inline]
    pub fn coefficient(self, d: f64) -> f64 {
        match self {
            WindowKind::None => 1.0,
            WindowKind::Hanning => {
                if d >= 1.0 {
                    0.0
                } else {
                    0.5 * (1.0 + (PI * d).cos())
                }
            }
        }
    }
}

/// Where the zero-frequency sample sits in a k-space volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KSpaceOrigin {
    /// At index n/2 on every axis, as the acquisition simulator stores it
    #[default]
    Centered,
    /// At index 0 on every axis (plain FFT order)
    Corner,
}

/// Normalised distance from the k-space centre for every index of an axis
///
/// Index n/2 (centred) or 0 (corner) has distance 0; the Nyquist sample of an
/// even axis has distance 1.
pub fn axis_distances(n: usize, origin: KSpaceOrigin) -> Vec<f64> {
    match origin {
        KSpaceOrigin::Centered => {
            let centre = (n / 2) as f64;
            let half = n as f64 / 2.0;
            (0..n).map(|i| (i as f64 - centre).abs() / half).collect()
        }
        KSpaceOrigin::Corner => fftfreq(n, 1.0).into_iter().map(|f| 2.0 * f.abs()).collect(),
    }
}

/// Per-axis window weights for `dims`
pub fn window_weights(dims: Dims, kind: WindowKind, origin: KSpaceOrigin) -> [Vec<f64>; 3] {
    let axis = |n: usize| -> Vec<f64> {
        axis_distances(n, origin)
            .into_iter()
            .map(|d| kind.coefficient(d))
            .collect()
    };
    [axis(dims.nx), axis(dims.ny), axis(dims.nz)]
}

/// Apply `kind` in place to a centred complex k-space volume
pub fn apply_window(buffer: &mut Volume, kind: WindowKind) -> ReconResult<()> {
    apply_window_with_origin(buffer, kind, KSpaceOrigin::Centered)
}

/// Apply `kind` in place, measuring distance from the centre `origin` names
///
/// Fails with [`crate::ReconError::KindMismatch`] on a float volume. Never reallocates.
pub fn apply_window_with_origin(
    buffer: &mut Volume,
    kind: WindowKind,
    origin: KSpaceOrigin,
) -> ReconResult<()> {
    let dims = buffer.dims();
    let samples = buffer.as_complex_mut()?;
    if kind == WindowKind::None {
        return Ok(());
    }

    debug!(%dims, ?kind, ?origin, "applying k-space window");
    let [wx, wy, wz] = window_weights(dims, kind, origin);
    apply_separable(samples, dims, &wx, &wy, &wz);
    Ok(())
}

fn apply_separable(samples: &mut [Complex64], dims: Dims, wx: &[f64], wy: &[f64], wz: &[f64]) {
    let (nx, ny, nz) = dims.as_tuple();
    for k in 0..nz {
        for j in 0..ny {
            let wjk = wy[j] * wz[k];
            for i in 0..nx {
                samples[idx3d(i, j, k, nx, ny)] *= wx[i] * wjk;
            }
        }
    }
}
