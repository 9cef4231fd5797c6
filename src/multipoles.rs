//! Legendre multipoles of the (k, mu) binned power.

use itertools::{izip, Itertools};

use crate::binning::BinnedPower;

/// Legendre polynomial `P_ell(x)` by upward recurrence.
pub fn legendre(ell: usize, x: f64) -> f64 {
    match ell {
        0 => 1.0,
        1 => x,
        _ => {
            let mut previous = 1.0;
            let mut current = x;
            for n in 1..ell {
                let n = n as f64;
                let next = ((2.0 * n + 1.0) * x * current - n * previous) / (n + 1.0);
                previous = current;
                current = next;
            }
            current
        }
    }
}

/// Multipole spectra, one per requested order.
#[derive(Clone, Debug, PartialEq)]
pub struct Multipoles {
    orders: Vec<usize>,
    k: Vec<f64>,
    poles: Vec<Vec<f64>>,
    modes: Vec<u64>,
}

impl Multipoles {
    /// The requested orders.
    pub fn orders(&self) -> &[usize] {
        &self.orders
    }

    /// Mode weighted mean k per radial bin.
    pub fn k(&self) -> &[f64] {
        &self.k
    }

    /// Moments of the `i`-th requested order.
    pub fn pole(&self, i: usize) -> &[f64] {
        &self.poles[i]
    }

    /// Moments of all orders.
    pub fn poles(&self) -> &[Vec<f64>] {
        &self.poles
    }

    /// Number of modes per radial bin.
    pub fn modes(&self) -> &[u64] {
        &self.modes
    }
}

/// Project binned power onto Legendre polynomials.
///
/// For every k bin the moment of order `ell` is
/// `(2 ell + 1) sum_mu P(k, mu) L_ell(mu) N(k, mu) / sum_mu N(k, mu)` with
/// `L_ell` evaluated at `mu_centers`. Radial bins without modes give `NaN`.
pub fn project(binned: &BinnedPower, mu_centers: &[f64], orders: &[usize]) -> Multipoles {
    let [nk, nmu] = binned.shape();
    assert_eq!(mu_centers.len(), nmu);

    let mut modes = vec![0_u64; nk];
    let mut k = vec![f64::NAN; nk];
    let mut poles = vec![vec![f64::NAN; nk]; orders.len()];

    let weights = orders
        .iter()
        .map(|&ell| mu_centers.iter().map(|&mu| legendre(ell, mu)).collect_vec())
        .collect_vec();

    for ik in 0..nk {
        let row = ik * nmu..(ik + 1) * nmu;
        let counts = &binned.modes()[row.clone()];
        let total = counts.iter().sum::<u64>();
        modes[ik] = total;
        if total == 0 {
            continue;
        }

        k[ik] = counts
            .iter()
            .zip(&binned.k()[row.clone()])
            .filter(|&(&n, _)| n > 0)
            .map(|(&n, &kk)| n as f64 * kk)
            .sum::<f64>()
            / total as f64;

        for (pole, &ell, legendre_weights) in izip!(poles.iter_mut(), orders, &weights) {
            let weighted = izip!(counts, &binned.power()[row.clone()], legendre_weights)
                .filter(|&(&n, _, _)| n > 0)
                .map(|(&n, &p, &l)| p * l * n as f64)
                .sum::<f64>();
            pole[ik] = (2 * ell + 1) as f64 * weighted / total as f64;
        }
    }

    Multipoles {
        orders: orders.to_vec(),
        k,
        poles,
        modes,
    }
}

#[cfg(test)]
mod test {
    use super::{legendre, project};
    use crate::binning::{BinAccumulator, BinEdges, Binning};
    use crate::mesh::{Axis, FourierGrid, MeshDescriptor, Mode, SlabLayout};

    #[test]
    fn test_legendre_closed_forms() {
        for i in 0..=20 {
            let x = -1.0 + 0.1 * i as f64;
            assert_eq!(legendre(0, x), 1.0);
            assert_eq!(legendre(1, x), x);
            assert!((legendre(2, x) - 0.5 * (3.0 * x * x - 1.0)).abs() < 1e-14);
            let p4 = (35.0 * x.powi(4) - 30.0 * x * x + 3.0) / 8.0;
            assert!((legendre(4, x) - p4).abs() < 1e-13);
        }
    }

    #[test]
    fn test_legendre_high_order_is_bounded() {
        for ell in [50, 200, 1000] {
            assert!((legendre(ell, 1.0) - 1.0).abs() < 1e-10);
            assert!((legendre(ell, -1.0) - if ell % 2 == 0 { 1.0 } else { -1.0 }).abs() < 1e-10);
            for i in 0..100 {
                let x = -0.99 + 0.0198 * i as f64;
                assert!(legendre(ell, x).abs() <= 1.0 + 1e-10);
            }
        }
    }

    /// Accumulator with an isotropic power of `amplitude` and equal counts per bin.
    fn isotropic(nk: usize, nmu: usize, symmetric: bool, amplitude: f64) -> (Binning, BinAccumulator) {
        let binning = Binning::new(
            BinEdges::new("k", (0..=nk).map(|i| i as f64).collect()).unwrap(),
            BinEdges::angular(nmu, symmetric).unwrap(),
            Axis::Z,
            symmetric,
        );
        let centers = binning.mu_edges.centers();
        let mut accumulator = binning.accumulator();
        for ik in 0..nk {
            for &mu in &centers {
                // A single synthetic mode per (k, mu) bin with direction cosine mu.
                let k = ik as f64 + 0.5;
                let kz = k * mu;
                let kx = (k * k - kz * kz).max(0.0).sqrt();
                let mode = Mode {
                    index: [0, 0, 0],
                    k: [kx, 0.0, kz],
                    weight: 1,
                };
                accumulator.accumulate(&binning, &[amplitude], [mode]).unwrap();
            }
        }
        (binning, accumulator)
    }

    #[test]
    fn test_isotropic_unfolded() {
        let (binning, accumulator) = isotropic(4, 200, false, 3.5);
        let poles = project(
            &accumulator.finalize(),
            &binning.mu_edges.centers(),
            &[0, 1, 2, 3, 4],
        );
        for ik in 0..4 {
            assert_eq!(poles.modes()[ik], 200);
            assert!((poles.pole(0)[ik] - 3.5).abs() < 1e-12);
            for i in 1..5 {
                assert!(poles.pole(i)[ik].abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_isotropic_folded() {
        let (binning, accumulator) = isotropic(3, 200, true, 2.0);
        let poles = project(&accumulator.finalize(), &binning.mu_edges.centers(), &[0, 2, 4]);
        for ik in 0..3 {
            assert!((poles.pole(0)[ik] - 2.0).abs() < 1e-12);
            assert!(poles.pole(1)[ik].abs() < 1e-3);
            assert!(poles.pole(2)[ik].abs() < 1e-3);
            assert!((poles.k()[ik] - (ik as f64 + 0.5)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_empty_radial_bin_is_nan() {
        let mesh = MeshDescriptor::cubic(2.0 * std::f64::consts::PI, 4).unwrap();
        let grid = FourierGrid::zeros(mesh, SlabLayout::whole(4));
        let binning = Binning::new(
            BinEdges::new("k", vec![0.0, 0.5, 1.2]).unwrap(),
            BinEdges::angular(2, true).unwrap(),
            Axis::Z,
            true,
        );
        let binned = binning
            .bin(&vec![1.0; grid.len()], grid.modes())
            .unwrap()
            .finalize();
        let poles = project(&binned, &binning.mu_edges.centers(), &[0, 2]);

        assert_eq!(poles.modes(), &[0, 6]);
        assert!(poles.pole(0)[0].is_nan());
        assert!(poles.pole(1)[0].is_nan());
        assert!((poles.pole(0)[1] - 1.0).abs() < 1e-12);
    }
}
