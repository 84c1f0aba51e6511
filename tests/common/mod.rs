//! Common test utilities for reconstruction integration tests

#![allow(dead_code)]

use num_complex::Complex64;
use simri_recon::fft::{fftshift, ifftshift, idx3d};
use simri_recon::{forward_transform_complex, Dims, Volume};

/// Largest absolute difference between two complex arrays
pub fn max_abs_error(a: &[Complex64], b: &[Complex64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).norm())
        .fold(0.0, f64::max)
}

/// Largest sample magnitude
pub fn max_norm(a: &[Complex64]) -> f64 {
    a.iter().map(|c| c.norm()).fold(0.0, f64::max)
}

/// Compute RMSE between two float arrays, only within mask (non-zero values)
pub fn rmse(a: &[f32], b: &[f32], mask: &[u8]) -> f64 {
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for i in 0..a.len() {
        if mask[i] > 0 {
            let diff = a[i] as f64 - b[i] as f64;
            sum_sq += diff * diff;
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    (sum_sq / count as f64).sqrt()
}

/// Deterministic pseudo-random complex volume
pub fn textured_volume(dims: Dims, seed: f64) -> Volume {
    let samples = (0..dims.len())
        .map(|i| {
            let t = i as f64 + seed;
            Complex64::new((t * 0.731).sin() + 0.25 * (t * 1.37).cos(), (t * 0.419).cos() - 0.5)
        })
        .collect();
    Volume::from_complex(dims, samples).unwrap()
}

/// Create a binary sphere mask centred on the volume
pub fn sphere_mask(dims: Dims, radius: f64) -> Vec<u8> {
    let (nx, ny, nz) = dims.as_tuple();
    let (cx, cy, cz) = ((nx / 2) as f64, (ny / 2) as f64, (nz / 2) as f64);
    let mut mask = vec![0u8; dims.len()];
    let r2 = radius * radius;

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let dx = i as f64 - cx;
                let dy = j as f64 - cy;
                let dz = k as f64 - cz;
                if dx * dx + dy * dy + dz * dz <= r2 {
                    mask[idx3d(i, j, k, nx, ny)] = 1;
                }
            }
        }
    }
    mask
}

/// Sphere phantom with uniform value `value` inside the mask
pub fn sphere_phantom(dims: Dims, radius: f64, value: Complex64) -> Volume {
    let samples = sphere_mask(dims, radius)
        .into_iter()
        .map(|m| if m > 0 { value } else { Complex64::new(0.0, 0.0) })
        .collect();
    Volume::from_complex(dims, samples).unwrap()
}

/// Acquisition-side simulation of centred k-space: fftshift(fft(ifftshift(image)))
pub fn simulate_centred_kspace(image: &Volume) -> Volume {
    let dims = image.dims();
    let (nx, ny, nz) = dims.as_tuple();
    let corner = Volume::from_complex(dims, ifftshift(image.as_complex().unwrap(), nx, ny, nz)).unwrap();
    let kspace = forward_transform_complex(&corner).unwrap();
    Volume::from_complex(dims, fftshift(kspace.as_complex().unwrap(), nx, ny, nz)).unwrap()
}

/// Circular convolution with the 3-tap kernel [0.25, 0.5, 0.25] along every axis
///
/// This is the image-space equivalent of a separable Hanning window in k-space.
pub fn smooth_121(image: &Volume) -> Vec<Complex64> {
    let dims = image.dims();
    let (nx, ny, nz) = dims.as_tuple();
    let mut data = image.as_complex().unwrap().to_vec();

    for (axis, n) in [(0usize, nx), (1, ny), (2, nz)] {
        let src = data.clone();
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let pos = [i, j, k];
                    let at = |offset: usize| {
                        let mut p = pos;
                        p[axis] = (p[axis] + offset) % n;
                        src[idx3d(p[0], p[1], p[2], nx, ny)]
                    };
                    data[idx3d(i, j, k, nx, ny)] = at(0) * 0.5 + at(1) * 0.25 + at(n - 1) * 0.25;
                }
            }
        }
    }
    data
}
