//! SIMRI reconstruction core
//!
//! Converts simulated MRI k-space into viewable image-space volumes and
//! owns the pulse-sequence descriptor lifecycle.
//!
//! # Modules
//! - `volume`: 3D float / complex volume buffers, kind conversion
//! - `fft`: 3D FFT operations using rustfft
//! - `filter`: k-space apodization (Hanning)
//! - `recon`: inverse transform, magnitude/phase extraction, context-driven reconstruction
//! - `sequence`: pulse-sequence descriptor allocation and release
//! - `experience`: acquisition context handed over by the simulator
//! - `config`: TOML reconstruction settings
//! - `error`: crate error type

// Core modules
pub mod error;
pub mod fft;
pub mod volume;

// Pipeline modules
pub mod filter;
pub mod recon;

// Acquisition-side types
pub mod experience;
pub mod sequence;

pub mod config;

pub use config::ReconSettings;
pub use error::{ReconError, ReconResult};
pub use experience::{Experience, OutputKind, ReconParams};
pub use filter::{apply_window, apply_window_with_origin, KSpaceOrigin, WindowKind};
pub use recon::{
    extract_magnitude, extract_phase, forward_transform_complex, inverse_transform_complex,
    reconstruct_complex, reconstruct_magnitude, reconstruct_phase, ReconstructionEngine,
};
pub use sequence::{allocate_sequence, free_sequence, SequenceDescriptor, SequenceSample, SequenceShape};
pub use volume::{free_volume, ComplexPart, Dims, Volume, VolumeKind};
