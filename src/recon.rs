//! Image reconstruction
//!
//! Turns raw complex k-space into image-space volumes:
//! optional apodization, 3D inverse FFT, then complex, magnitude or phase
//! extraction. Two entry styles are offered:
//!
//! - from a volume: [`inverse_transform_complex`], [`extract_magnitude`],
//!   [`extract_phase`]. The inverse transform is a plain 1/N-normalised
//!   inverse DFT with the zero frequency at index 0.
//! - from an [`Experience`]: [`reconstruct_complex`], [`reconstruct_magnitude`],
//!   [`reconstruct_phase`]. These copy the context's k-space, window it as its
//!   parameters say, and for a centred acquisition shift the zero frequency
//!   to the corner before the transform and the image back to the centre
//!   after it.
//!
//! A unit impulse at k-space index (0, 0, 0) reconstructs to 1/N at every voxel.
//!
//! Inputs are never mutated, and a failed call never returns a volume.

use tracing::{debug, info};

use crate::config::ReconSettings;
use crate::error::{ReconError, ReconResult};
use crate::experience::{Experience, OutputKind};
use crate::fft::{circshift_into, fftshift_offsets, ifftshift_offsets, Fft3dWorkspace, TransformPolicy};
use crate::filter::{apply_window_with_origin, KSpaceOrigin};
use crate::volume::{ComplexPart, Volume, VolumeKind};

/// Reconstruction pipeline with a fixed transform policy
#[derive(Debug, Clone, Default)]
pub struct ReconstructionEngine {
    policy: TransformPolicy,
}

impl ReconstructionEngine {
    pub fn new(policy: TransformPolicy) -> Self {
        Self { policy }
    }

    pub fn from_settings(settings: &ReconSettings) -> Self {
        Self::new(settings.transform.clone())
    }

    pub fn policy(&self) -> &TransformPolicy {
        &self.policy
    }

    /// Forward 3D FFT of an image-space volume (acquisition side, unnormalised)
    pub fn forward_transform_complex(&self, image: &Volume) -> ReconResult<Volume> {
        let dims = image.dims();
        image.as_complex()?;
        let mut workspace = Fft3dWorkspace::with_policy(dims, &self.policy)?;
        let mut out = image.try_clone()?;
        workspace.fft3d(out.as_complex_mut()?)?;
        Ok(out)
    }

    /// Inverse 3D FFT of a complex k-space volume into a new volume
    ///
    /// Dimensions are preserved. Lengths refused by the policy fail with
    /// [`ReconError::TransformUnsupported`] before any allocation.
    pub fn inverse_transform_complex(&self, kspace: &Volume) -> ReconResult<Volume> {
        let dims = kspace.dims();
        kspace.as_complex()?;
        let mut workspace = Fft3dWorkspace::with_policy(dims, &self.policy)?;
        let mut out = kspace.try_clone()?;
        workspace.ifft3d(out.as_complex_mut()?)?;
        debug!(%dims, "inverse transform complete");
        Ok(out)
    }

    /// Per-voxel modulus as a new float volume
    pub fn extract_magnitude(&self, image: &Volume) -> ReconResult<Volume> {
        extract(image, ComplexPart::Magnitude)
    }

    /// Per-voxel argument in (-π, π] as a new float volume, 0 where the modulus is 0
    pub fn extract_phase(&self, image: &Volume) -> ReconResult<Volume> {
        extract(image, ComplexPart::Phase)
    }

    /// Window and inverse transform the context's k-space
    pub fn reconstruct_complex(&self, ctx: &Experience<'_>) -> ReconResult<Volume> {
        let params = ctx.params();
        let kspace = ctx.kspace();
        let dims = kspace.dims();
        kspace.ensure_dims(ctx.matrix())?;
        info!(%dims, window = ?params.window, origin = ?params.origin, output = ?params.output, "reconstructing acquisition");

        let mut workspace = Fft3dWorkspace::with_policy(dims, &self.policy)?;
        let (nx, ny, nz) = dims.as_tuple();

        let mut work = kspace.try_clone()?;
        apply_window_with_origin(&mut work, params.window, params.origin)?;

        match params.origin {
            KSpaceOrigin::Corner => {
                workspace.ifft3d(work.as_complex_mut()?)?;
                Ok(work)
            }
            KSpaceOrigin::Centered => {
                let mut corner = Volume::zeros(dims, VolumeKind::ComplexDouble)?;
                circshift_into(work.as_complex()?, corner.as_complex_mut()?, nx, ny, nz, ifftshift_offsets(nx, ny, nz));
                workspace.ifft3d(corner.as_complex_mut()?)?;

                // Reuse the windowed buffer for the recentred image
                circshift_into(corner.as_complex()?, work.as_complex_mut()?, nx, ny, nz, fftshift_offsets(nx, ny, nz));
                Ok(work)
            }
        }
    }

    pub fn reconstruct_magnitude(&self, ctx: &Experience<'_>) -> ReconResult<Volume> {
        self.extract_magnitude(&self.reconstruct_complex(ctx)?)
    }

    pub fn reconstruct_phase(&self, ctx: &Experience<'_>) -> ReconResult<Volume> {
        self.extract_phase(&self.reconstruct_complex(ctx)?)
    }

    /// Reconstruct into whatever representation the context asks for
    pub fn reconstruct(&self, ctx: &Experience<'_>) -> ReconResult<Volume> {
        match ctx.params().output {
            OutputKind::Complex => self.reconstruct_complex(ctx),
            OutputKind::Magnitude => self.reconstruct_magnitude(ctx),
            OutputKind::Phase => self.reconstruct_phase(ctx),
        }
    }
}

fn extract(image: &Volume, part: ComplexPart) -> ReconResult<Volume> {
    if image.kind() != VolumeKind::ComplexDouble {
        return Err(ReconError::KindMismatch {
            expected: VolumeKind::ComplexDouble,
            actual: image.kind(),
        });
    }
    image.convert_with(VolumeKind::Float, part)
}

/// Forward 3D FFT with the default engine
pub fn forward_transform_complex(image: &Volume) -> ReconResult<Volume> {
    ReconstructionEngine::default().forward_transform_complex(image)
}

/// Inverse 3D FFT with the default engine
pub fn inverse_transform_complex(kspace: &Volume) -> ReconResult<Volume> {
    ReconstructionEngine::default().inverse_transform_complex(kspace)
}

pub fn extract_magnitude(image: &Volume) -> ReconResult<Volume> {
    extract(image, ComplexPart::Magnitude)
}

pub fn extract_phase(image: &Volume) -> ReconResult<Volume> {
    extract(image, ComplexPart::Phase)
}

pub fn reconstruct_complex(ctx: &Experience<'_>) -> ReconResult<Volume> {
    ReconstructionEngine::default().reconstruct_complex(ctx)
}

pub fn reconstruct_magnitude(ctx: &Experience<'_>) -> ReconResult<Volume> {
    ReconstructionEngine::default().reconstruct_magnitude(ctx)
}

pub fn reconstruct_phase(ctx: &Experience<'_>) -> ReconResult<Volume> {
    ReconstructionEngine::default().reconstruct_phase(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;
    use crate::experience::ReconParams;
    use crate::filter::WindowKind;
    use crate::sequence::allocate_sequence;
    use crate::volume::Dims;
    use std::f32::consts::PI;

    #[test]
    fn test_impulse_gives_flat_spectrum() {
        let dims = Dims::new(4, 4, 4);
        let kspace = Volume::impulse(dims, (0, 0, 0)).unwrap();
        let image = inverse_transform_complex(&kspace).unwrap();
        assert_eq!(image.dims(), dims);

        let expected = 1.0 / 64.0;
        for (i, c) in image.as_complex().unwrap().iter().enumerate() {
            assert!(
                (c.re - expected).abs() < 1e-15 && c.im.abs() < 1e-15,
                "voxel {} expected {}, got {}",
                i, expected, c
            );
        }

        let mag = extract_magnitude(&image).unwrap();
        assert_eq!(mag.kind(), VolumeKind::Float);
        assert!(mag.as_float().unwrap().iter().all(|&m| (m - 1.0 / 64.0).abs() < 1e-7));
    }

    #[test]
    fn test_inverse_does_not_mutate_input() {
        let dims = Dims::new(3, 2, 2);
        let kspace = Volume::impulse(dims, (1, 1, 0)).unwrap();
        let _ = inverse_transform_complex(&kspace).unwrap();
        assert_eq!(kspace.complex_at(1, 1, 0), Some(Complex64::new(1.0, 0.0)));
        assert_eq!(kspace.complex_at(0, 0, 0), Some(Complex64::new(0.0, 0.0)));
    }

    #[test]
    fn test_inverse_rejects_float_volume() {
        let vol = Volume::allocate(2, 2, 2, VolumeKind::Float).unwrap();
        assert!(matches!(inverse_transform_complex(&vol), Err(ReconError::KindMismatch { .. })));
        assert!(matches!(extract_magnitude(&vol), Err(ReconError::KindMismatch { .. })));
        assert!(matches!(extract_phase(&vol), Err(ReconError::KindMismatch { .. })));
    }

    #[test]
    fn test_policy_refusal() {
        let engine = ReconstructionEngine::new(TransformPolicy { max_prime_factor: Some(5), parallel: false });
        let kspace = Volume::allocate(4, 7, 2, VolumeKind::ComplexDouble).unwrap();
        assert!(matches!(
            engine.inverse_transform_complex(&kspace),
            Err(ReconError::TransformUnsupported { axis: 'y', len: 7, factor: 7 })
        ));
    }

    #[test]
    fn test_engine_takes_policy_from_settings() {
        let settings = ReconSettings::from_toml_str("[transform]\nmax_prime_factor = 3\n").unwrap();
        let engine = ReconstructionEngine::from_settings(&settings);
        assert_eq!(engine.policy().max_prime_factor, Some(3));
        assert_eq!(ReconstructionEngine::default().policy(), &TransformPolicy::default());
    }

    #[test]
    fn test_phase_of_known_values() {
        let dims = Dims::new(4, 1, 1);
        let image = Volume::from_complex(
            dims,
            vec![
                Complex64::new(0.0, 0.0),
                Complex64::new(-1.0, 0.0),
                Complex64::new(0.0, -2.0),
                Complex64::new(1.0, 1.0),
            ],
        )
        .unwrap();
        let phase = extract_phase(&image).unwrap();
        let p = phase.as_float().unwrap();
        assert_eq!(p[0], 0.0);
        assert_eq!(p[1], PI);
        assert!((p[2] + PI / 2.0).abs() < 1e-6);
        assert!((p[3] - PI / 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_centred_impulse_reconstructs_flat_magnitude() {
        let dims = Dims::new(4, 6, 5);
        let seq = allocate_sequence(4, 6, 5, 1, 1).unwrap();
        let kspace = Volume::impulse(dims, (2, 3, 2)).unwrap();
        let params = ReconParams { window: WindowKind::Hanning, output: OutputKind::Magnitude, origin: KSpaceOrigin::Centered };
        let ctx = Experience::new(&seq, kspace, params).unwrap();

        let mag = ReconstructionEngine::default().reconstruct(&ctx).unwrap();
        assert_eq!(mag.kind(), VolumeKind::Float);
        assert_eq!(mag.dims(), dims);
        let expected = 1.0 / dims.len() as f32;
        for &m in mag.as_float().unwrap() {
            assert!((m - expected).abs() < 1e-7, "expected {}, got {}", expected, m);
        }
        // Context is read-only
        assert_eq!(ctx.kspace().complex_at(2, 3, 2), Some(Complex64::new(1.0, 0.0)));
    }

    #[test]
    fn test_corner_origin_matches_direct_transform() {
        let dims = Dims::new(3, 4, 2);
        let seq = allocate_sequence(3, 4, 2, 1, 1).unwrap();
        let samples: Vec<Complex64> = (0..dims.len())
            .map(|i| Complex64::new((i as f64 * 0.7).cos(), (i as f64 * 0.3).sin()))
            .collect();
        let kspace = Volume::from_complex(dims, samples).unwrap();
        let direct = inverse_transform_complex(&kspace).unwrap();

        let params = ReconParams { window: WindowKind::None, output: OutputKind::Complex, origin: KSpaceOrigin::Corner };
        let ctx = Experience::new(&seq, kspace, params).unwrap();
        let via_ctx = ReconstructionEngine::default().reconstruct(&ctx).unwrap();

        assert_eq!(direct.as_complex().unwrap(), via_ctx.as_complex().unwrap());
    }

    #[test]
    fn test_reconstruct_dispatches_on_output() {
        let dims = Dims::new(2, 2, 2);
        let seq = allocate_sequence(2, 2, 2, 1, 1).unwrap();
        let mut ctx = Experience::new(&seq, Volume::impulse(dims, (1, 1, 1)).unwrap(), ReconParams::default()).unwrap();
        let engine = ReconstructionEngine::default();

        for output in [OutputKind::Complex, OutputKind::Magnitude, OutputKind::Phase] {
            ctx.set_params(ReconParams { output, ..ctx.params() });
            let vol = engine.reconstruct(&ctx).unwrap();
            let expected_kind = match output {
                OutputKind::Complex => VolumeKind::ComplexDouble,
                _ => VolumeKind::Float,
            };
            assert_eq!(vol.kind(), expected_kind, "output {:?}", output);
            assert_eq!(vol.dims(), dims);
        }
    }
}
