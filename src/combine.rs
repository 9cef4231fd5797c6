//! Turn one or two Fourier fields into a real power sample per cell.

use std::f64::consts::PI;
use std::fmt::Display;
use std::str::FromStr;

use itertools::izip;
use num::complex::Complex64;
use tracing::{debug, warn};

use crate::{
    constants::{GEOMETRIC_MEAN_IMAG_TOLERANCE, MIN_WINDOW},
    error::{PowerError, Result},
    mesh::FourierGrid,
};

/// Correction for the mass-assignment window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Deconvolution {
    /// Leave the samples untouched.
    None,
    /// Window as a function of `|n|` only. Assumes a cubic box.
    Isotropic,
    /// Product of per-axis windows.
    #[default]
    Anisotropic,
}

impl FromStr for Deconvolution {
    type Err = PowerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Deconvolution::None),
            "isotropic" => Ok(Deconvolution::Isotropic),
            "anisotropic" => Ok(Deconvolution::Anisotropic),
            other => Err(PowerError::UnknownPlugin {
                kind: "deconvolution",
                name: other.to_string(),
            }),
        }
    }
}

/// How the cross power of two fields is formed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CrossConvention {
    /// `Re(conj(A) B)`.
    #[default]
    RealPart,
    /// Legacy `|sqrt(conj(A) B)|²`.
    ///
    /// Only defined where `conj(A) B` is real and non-negative, which holds
    /// exactly only for proportional fields. Other cells are rejected.
    GeometricMean,
}

impl FromStr for CrossConvention {
    type Err = PowerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "real" => Ok(CrossConvention::RealPart),
            "geometric" => Ok(CrossConvention::GeometricMean),
            other => Err(PowerError::UnknownPlugin {
                kind: "cross convention",
                name: other.to_string(),
            }),
        }
    }
}

impl Display for CrossConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrossConvention::RealPart => write!(f, "real part of conj(A) B"),
            CrossConvention::GeometricMean => write!(f, "geometric mean sqrt(conj(A) B)"),
        }
    }
}

/// A Fourier field together with how its window is removed.
#[derive(Clone, Copy, Debug)]
pub struct SpectralField<'a> {
    /// The local Fourier slab.
    pub grid: &'a FourierGrid,
    /// Window correction to apply.
    pub deconvolution: Deconvolution,
    /// Order of the painter's window (1 = NGP, 2 = CIC).
    pub window_order: u32,
}

impl<'a> SpectralField<'a> {
    /// Create a new spectral field.
    pub fn new(grid: &'a FourierGrid, deconvolution: Deconvolution, window_order: u32) -> Self {
        Self {
            grid,
            deconvolution,
            window_order,
        }
    }

    fn window(&self, freq: [i64; 3]) -> f64 {
        window_transfer(
            freq,
            self.grid.mesh().nmesh(),
            self.deconvolution,
            self.window_order,
        )
    }
}

/// Counts of cells whose sample had to be flagged as undefined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CombineReport {
    /// Cross samples rejected by the geometric-mean convention.
    pub rejected_cross: usize,
    /// Samples whose window transfer vanished.
    pub zero_window: usize,
}

impl CombineReport {
    /// Total number of flagged cells.
    pub fn flagged(&self) -> usize {
        self.rejected_cross + self.zero_window
    }
}

/// `sin(x) / x` with the removable singularity filled in.
pub fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        x.sin() / x
    }
}

/// Fourier transform of the mass-assignment window at signed frequency `freq`.
pub fn window_transfer(freq: [i64; 3], nmesh: usize, mode: Deconvolution, order: u32) -> f64 {
    let n = nmesh as f64;
    let order = order as i32;
    match mode {
        Deconvolution::None => 1.0,
        Deconvolution::Anisotropic => freq
            .iter()
            .map(|&f| sinc(PI * f as f64 / n).powi(order))
            .product(),
        Deconvolution::Isotropic => {
            let radius = freq
                .iter()
                .map(|&f| (f * f) as f64)
                .sum::<f64>()
                .sqrt();
            sinc(PI * radius / (n * 3f64.sqrt())).powi(3 * order)
        }
    }
}

/// Auto power of a single cell.
pub fn auto_power(a: Complex64) -> f64 {
    a.norm_sqr()
}

/// Cross power of a single cell, `None` where the convention is undefined.
pub fn cross_power(a: Complex64, b: Complex64, convention: CrossConvention) -> Option<f64> {
    let product = a.conj() * b;
    match convention {
        CrossConvention::RealPart => Some(product.re),
        CrossConvention::GeometricMean => {
            let modulus = product.norm();
            if product.re >= 0.0 && product.im.abs() <= GEOMETRIC_MEAN_IMAG_TOLERANCE * modulus {
                Some(modulus)
            } else {
                None
            }
        }
    }
}

/// Combine one or two fields into one power sample per local cell.
///
/// The returned samples are in the storage order of the grids. Cells whose
/// sample is undefined hold `NaN`; their number is reported and logged.
/// The inputs are not modified.
pub fn combine(
    first: SpectralField,
    second: Option<SpectralField>,
    convention: CrossConvention,
) -> Result<(Vec<f64>, CombineReport)> {
    if let Some(second) = &second {
        if !first.grid.same_layout(second.grid) {
            return Err(PowerError::ShapeMismatch {
                reason: format!(
                    "{:?} over planes {}..{} versus {:?} over planes {}..{}",
                    first.grid.local_shape(),
                    first.grid.layout().start(),
                    first.grid.layout().end(),
                    second.grid.local_shape(),
                    second.grid.layout().start(),
                    second.grid.layout().end(),
                ),
            });
        }
        debug!("cross power convention: {}", convention);
    }

    let mesh = *first.grid.mesh();
    let mut report = CombineReport::default();
    let mut samples = Vec::<f64>::with_capacity(first.grid.len());

    for (offset, &a) in first.grid.values().iter().enumerate() {
        let freq = mesh.frequency(first.grid.global_index(offset));

        let (raw, window) = match &second {
            None => {
                let w = first.window(freq);
                (Some(auto_power(a)), w * w)
            }
            Some(second) => {
                let b = second.grid.values()[offset];
                (
                    cross_power(a, b, convention),
                    first.window(freq) * second.window(freq),
                )
            }
        };

        let sample = match raw {
            None => {
                report.rejected_cross += 1;
                f64::NAN
            }
            Some(_) if !(window.is_finite() && window.abs() >= MIN_WINDOW) => {
                report.zero_window += 1;
                f64::NAN
            }
            Some(power) => power / window,
        };
        samples.push(sample);
    }

    if report.rejected_cross > 0 {
        warn!(
            "{} cell(s) rejected: conj(A) B is not real and non-negative under the {} convention",
            report.rejected_cross, convention
        );
    }
    if report.zero_window > 0 {
        warn!(
            "{} cell(s) flagged: window transfer function vanishes",
            report.zero_window
        );
    }

    Ok((samples, report))
}

/// Multiply every sample by a constant. Flagged cells stay `NaN`.
pub fn scale_samples(samples: &mut [f64], factor: f64) {
    for sample in samples.iter_mut() {
        *sample *= factor;
    }
}

/// Check that two sample streams agree to a relative tolerance.
pub fn samples_close(first: &[f64], second: &[f64], rtol: f64) -> bool {
    first.len() == second.len()
        && izip!(first, second).all(|(&x, &y)| {
            (x.is_nan() && y.is_nan()) || (x - y).abs() <= rtol * x.abs().max(y.abs())
        })
}

#[cfg(test)]
mod test {
    use itertools::izip;
    use num::complex::Complex64;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    use super::{
        combine, cross_power, samples_close, window_transfer, CrossConvention, Deconvolution,
        SpectralField,
    };
    use crate::mesh::{FourierGrid, MeshDescriptor, SlabLayout};

    fn gaussian_grid(n: usize, seed: u64) -> FourierGrid {
        let mesh = MeshDescriptor::cubic(100.0, n).unwrap();
        let mut grid = FourierGrid::zeros(mesh, SlabLayout::whole(n));
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        for value in grid.values_mut() {
            *value = Complex64::new(normal.sample(&mut rng), normal.sample(&mut rng));
        }
        grid
    }

    #[test]
    fn test_cross_with_itself_is_auto() {
        let grid = gaussian_grid(8, 1);
        for deconvolution in [
            Deconvolution::None,
            Deconvolution::Isotropic,
            Deconvolution::Anisotropic,
        ] {
            let field = SpectralField::new(&grid, deconvolution, 2);
            let (auto, _) = combine(field, None, CrossConvention::RealPart).unwrap();
            for convention in [CrossConvention::RealPart, CrossConvention::GeometricMean] {
                let (cross, report) = combine(field, Some(field), convention).unwrap();
                assert_eq!(report.flagged(), 0);
                assert_eq!(auto, cross);
            }
        }
    }

    #[test]
    fn test_geometric_mean_rejects_negative_and_complex() {
        let a = Complex64::new(1.0, 0.0);
        assert_eq!(
            cross_power(a, Complex64::new(-2.0, 0.0), CrossConvention::GeometricMean),
            None
        );
        assert_eq!(
            cross_power(a, Complex64::new(1.0, 1.0), CrossConvention::GeometricMean),
            None
        );
        assert_eq!(
            cross_power(a, Complex64::new(4.0, 0.0), CrossConvention::GeometricMean),
            Some(4.0)
        );
        assert_eq!(
            cross_power(a, Complex64::new(-2.0, 0.0), CrossConvention::RealPart),
            Some(-2.0)
        );
    }

    #[test]
    fn test_rejected_cells_are_nan() {
        let first = gaussian_grid(4, 2);
        let second = gaussian_grid(4, 3);
        let (samples, report) = combine(
            SpectralField::new(&first, Deconvolution::None, 2),
            Some(SpectralField::new(&second, Deconvolution::None, 2)),
            CrossConvention::GeometricMean,
        )
        .unwrap();

        let nan_count = samples.iter().filter(|s| s.is_nan()).count();
        assert!(nan_count > 0);
        assert_eq!(nan_count, report.rejected_cross);
    }

    #[test]
    fn test_layout_mismatch() {
        let first = gaussian_grid(4, 2);
        let second = gaussian_grid(8, 3);
        assert!(combine(
            SpectralField::new(&first, Deconvolution::None, 2),
            Some(SpectralField::new(&second, Deconvolution::None, 2)),
            CrossConvention::RealPart,
        )
        .is_err());
    }

    #[test]
    fn test_window_transfer() {
        for mode in [Deconvolution::Isotropic, Deconvolution::Anisotropic] {
            assert_eq!(window_transfer([0, 0, 0], 16, mode, 2), 1.0);
            let w = window_transfer([8, -8, 8], 16, mode, 2);
            assert!(w > 0.0 && w < 1.0);
        }
        // Along an axis the anisotropic window is sinc^p of pi n / N.
        let w = window_transfer([8, 0, 0], 16, Deconvolution::Anisotropic, 2);
        let expected = (2.0 / std::f64::consts::PI).powi(2);
        assert!((w - expected).abs() < 1e-14);
    }

    #[test]
    fn test_deconvolution_modes_differ_where_window_departs_from_one() {
        let grid = gaussian_grid(8, 4);
        let run = |mode| {
            combine(SpectralField::new(&grid, mode, 2), None, CrossConvention::RealPart)
                .unwrap()
                .0
        };
        let none = run(Deconvolution::None);
        let isotropic = run(Deconvolution::Isotropic);
        let anisotropic = run(Deconvolution::Anisotropic);

        assert!(!samples_close(&none, &anisotropic, 1e-6));
        assert!(!samples_close(&none, &isotropic, 1e-6));

        let mesh = *grid.mesh();
        for (offset, (&n, &i, &a)) in izip!(&none, &isotropic, &anisotropic).enumerate() {
            let freq = mesh.frequency(grid.global_index(offset));
            let w = window_transfer(freq, 8, Deconvolution::Anisotropic, 2);
            // Deconvolution only ever boosts power.
            assert!(a >= n && i >= n);
            if (1.0 - w).abs() < 1e-12 {
                assert_eq!(n, a);
            } else {
                assert!((a / n - 1.0 / (w * w)).abs() < 1e-10);
            }
        }
    }
}
