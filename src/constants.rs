//! Crate wide constants.

/// Default number of mu bins in 2D mode.
pub const DEFAULT_NMU: usize = 5;

/// Relative size of the imaginary part of `conj(A)·B` below which the
/// product counts as real for the geometric-mean cross power.
pub const GEOMETRIC_MEAN_IMAG_TOLERANCE: f64 = 1e-6;

/// Window transfer values below this are treated as zero.
pub const MIN_WINDOW: f64 = f64::MIN_POSITIVE;

/// Seed offset for the per-rank random number generators.
pub const RNG_SEED: u64 = 0;

/// Upper limit on the number of radial bins.
pub const MAX_RADIAL_BINS: usize = 1 << 20;
