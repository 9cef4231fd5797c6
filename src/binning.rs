//! Reduction of per-cell power samples into (k, mu) bins.
//!
//! Every rank bins the cells of its own slab into a local [BinAccumulator].
//! The local accumulators are then summed element-wise across all ranks.
//! Since only sums are communicated the result does not depend on how the
//! mesh is partitioned, up to floating point summation order.

use itertools::Itertools;
use mpi::{collective::SystemOperation, traits::CommunicatorCollectives};
use tracing::debug;

use crate::{
    constants::MAX_RADIAL_BINS,
    context::Context,
    error::{PowerError, Result},
    mesh::{magnitude_and_mu, Axis, MeshDescriptor, Mode},
};

/// Ascending bin edges.
///
/// A value `v` falls into bin `i` if `edges[i] <= v < edges[i + 1]`. Values
/// outside `[edges[0], edges[n])` are out of range. If `inclusive_last` is
/// set the last edge itself belongs to the last bin.
#[derive(Clone, Debug, PartialEq)]
pub struct BinEdges {
    edges: Vec<f64>,
    inclusive_last: bool,
}

impl BinEdges {
    /// Create edges from a strictly increasing sequence of at least two values.
    pub fn new(axis: &'static str, edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(PowerError::InvalidEdges {
                axis,
                reason: format!("need at least two edges, got {}", edges.len()),
            });
        }
        if let Some(bad) = edges.iter().find(|e| !e.is_finite()) {
            return Err(PowerError::InvalidEdges {
                axis,
                reason: format!("edge {} is not finite", bad),
            });
        }
        if let Some((a, b)) = edges.iter().tuple_windows().find(|(a, b)| a >= b) {
            return Err(PowerError::InvalidEdges {
                axis,
                reason: format!("edges must be strictly increasing, found {} before {}", a, b),
            });
        }
        Ok(Self {
            edges,
            inclusive_last: false,
        })
    }

    /// Radial edges `kmin, kmin + dk, ...` up to just past the Nyquist
    /// frequency of the shortest box axis.
    ///
    /// `dk` defaults to the fundamental frequency of the shortest axis.
    pub fn radial(mesh: &MeshDescriptor, dk: Option<f64>, kmin: f64) -> Result<Self> {
        let dk = dk.unwrap_or_else(|| mesh.fundamental());
        if !(dk.is_finite() && dk > 0.0) {
            return Err(PowerError::InvalidEdges {
                axis: "k",
                reason: format!("bin width must be finite and positive, got {}", dk),
            });
        }
        if !(kmin.is_finite() && kmin >= 0.0) {
            return Err(PowerError::InvalidEdges {
                axis: "k",
                reason: format!("kmin must be finite and non-negative, got {}", kmin),
            });
        }

        let stop = mesh.nyquist() + 0.5 * dk;
        let count = ((stop - kmin) / dk).ceil().max(0.0);
        if count > MAX_RADIAL_BINS as f64 {
            return Err(PowerError::InvalidEdges {
                axis: "k",
                reason: format!(
                    "bin width {} gives {} bins, more than {}",
                    dk, count, MAX_RADIAL_BINS
                ),
            });
        }
        let count = count as usize;
        Self::new("k", (0..count).map(|i| kmin + i as f64 * dk).collect_vec())
    }

    /// `nmu` equal-width angular bins.
    ///
    /// Folded bins cover `[0, 1]`, unfolded bins `[-1, 1]`. The last edge is
    /// inclusive so that modes along the line of sight are kept.
    pub fn angular(nmu: usize, symmetric: bool) -> Result<Self> {
        if nmu == 0 {
            return Err(PowerError::InvalidEdges {
                axis: "mu",
                reason: "need at least one mu bin".to_string(),
            });
        }
        let low = if symmetric { 0.0 } else { -1.0 };
        let width = (1.0 - low) / nmu as f64;
        let mut edges = (0..=nmu).map(|i| low + i as f64 * width).collect_vec();
        *edges.last_mut().unwrap() = 1.0;
        Ok(Self::new("mu", edges)?.with_inclusive_last())
    }

    /// Make the last edge part of the last bin.
    pub fn with_inclusive_last(mut self) -> Self {
        self.inclusive_last = true;
        self
    }

    /// The edges.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Number of bins.
    pub fn nbins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Midpoint of every bin.
    pub fn centers(&self) -> Vec<f64> {
        self.edges
            .iter()
            .tuple_windows()
            .map(|(a, b)| 0.5 * (a + b))
            .collect_vec()
    }

    /// Bin of `value`, or `None` if it is out of range (or `NaN`).
    pub fn locate(&self, value: f64) -> Option<usize> {
        let first = *self.edges.first().unwrap();
        let last = *self.edges.last().unwrap();

        if !(value >= first && value <= last) {
            return None;
        }
        if value == last {
            return self.inclusive_last.then(|| self.nbins() - 1);
        }

        // First edge strictly larger than value, minus one.
        Some(self.edges.partition_point(|&e| e <= value) - 1)
    }
}

/// Describes how samples are binned.
#[derive(Clone, Debug, PartialEq)]
pub struct Binning {
    /// Radial edges.
    pub k_edges: BinEdges,
    /// Angular edges.
    pub mu_edges: BinEdges,
    /// Line of sight for mu.
    pub los: Axis,
    /// Fold mu into `[0, 1]`.
    pub symmetric: bool,
}

impl Binning {
    /// Create a new binning description.
    pub fn new(k_edges: BinEdges, mu_edges: BinEdges, los: Axis, symmetric: bool) -> Self {
        Self {
            k_edges,
            mu_edges,
            los,
            symmetric,
        }
    }

    /// A zeroed accumulator matching these edges.
    pub fn accumulator(&self) -> BinAccumulator {
        BinAccumulator::new(self.k_edges.nbins(), self.mu_edges.nbins())
    }

    /// Bin the local cells.
    ///
    /// `samples` must hold one value per mode yielded by `modes`. Purely
    /// local; follow with [BinAccumulator::reduce] for the global result.
    pub fn bin<I: IntoIterator<Item = Mode>>(
        &self,
        samples: &[f64],
        modes: I,
    ) -> Result<BinAccumulator> {
        let mut accumulator = self.accumulator();
        accumulator.accumulate(self, samples, modes)?;
        Ok(accumulator)
    }

    /// Bin the local cells and reduce across all ranks.
    ///
    /// Collective: all ranks must call this.
    pub fn bin_and_reduce<C: CommunicatorCollectives, I: IntoIterator<Item = Mode>>(
        &self,
        samples: &[f64],
        modes: I,
        ctx: &Context<'_, C>,
    ) -> Result<BinAccumulator> {
        let local = self.bin(samples, modes)?;
        Ok(local.reduce(ctx))
    }
}

/// Running sums per (k, mu) bin, stored row-major as `[k][mu]`.
#[derive(Clone, Debug, PartialEq)]
pub struct BinAccumulator {
    nk: usize,
    nmu: usize,
    power: Vec<f64>,
    k: Vec<f64>,
    mu: Vec<f64>,
    modes: Vec<u64>,
    flagged: Vec<u64>,
}

impl BinAccumulator {
    /// A zeroed accumulator.
    pub fn new(nk: usize, nmu: usize) -> Self {
        let len = nk * nmu;
        Self {
            nk,
            nmu,
            power: vec![0.0; len],
            k: vec![0.0; len],
            mu: vec![0.0; len],
            modes: vec![0; len],
            flagged: vec![0; len],
        }
    }

    /// Number of k and mu bins.
    pub fn shape(&self) -> [usize; 2] {
        [self.nk, self.nmu]
    }

    /// Summed power per bin.
    pub fn power_sums(&self) -> &[f64] {
        &self.power
    }

    /// Summed k per bin.
    pub fn k_sums(&self) -> &[f64] {
        &self.k
    }

    /// Summed mu per bin.
    pub fn mu_sums(&self) -> &[f64] {
        &self.mu
    }

    /// Mode count per bin.
    pub fn modes(&self) -> &[u64] {
        &self.modes
    }

    /// Number of modes per bin whose sample was undefined.
    pub fn flagged(&self) -> &[u64] {
        &self.flagged
    }

    /// Total number of binned modes.
    pub fn total_modes(&self) -> u64 {
        self.modes.iter().sum()
    }

    /// Add samples for a stream of modes.
    ///
    /// The zero mode is skipped. A cell of Hermitian weight two also stands
    /// for its conjugate partner, whose mu has the opposite sign. With
    /// folding both land in the same bin; without folding each gets weight one.
    pub fn accumulate<I: IntoIterator<Item = Mode>>(
        &mut self,
        binning: &Binning,
        samples: &[f64],
        modes: I,
    ) -> Result<()> {
        assert_eq!(self.shape(), [binning.k_edges.nbins(), binning.mu_edges.nbins()]);

        let mut cells = 0;
        for mode in modes {
            let Some(&sample) = samples.get(cells) else {
                return Err(PowerError::SampleCountMismatch {
                    samples: samples.len(),
                    cells: cells + 1,
                });
            };
            cells += 1;

            let (k, mu) = magnitude_and_mu(mode.k, binning.los);
            if k == 0.0 {
                continue;
            }
            let Some(ik) = binning.k_edges.locate(k) else {
                continue;
            };

            let hermitian = mode.weight as u64;
            if binning.symmetric {
                self.deposit(binning, ik, k, mu.abs(), sample, hermitian);
            } else if hermitian == 1 {
                self.deposit(binning, ik, k, mu, sample, 1);
            } else {
                self.deposit(binning, ik, k, mu, sample, 1);
                self.deposit(binning, ik, k, -mu, sample, hermitian - 1);
            }
        }

        if cells != samples.len() {
            return Err(PowerError::SampleCountMismatch {
                samples: samples.len(),
                cells,
            });
        }
        Ok(())
    }

    fn deposit(&mut self, binning: &Binning, ik: usize, k: f64, mu: f64, sample: f64, weight: u64) {
        let Some(imu) = binning.mu_edges.locate(mu) else {
            return;
        };
        let index = ik * self.nmu + imu;
        if sample.is_nan() {
            self.flagged[index] += weight;
            return;
        }
        let w = weight as f64;
        self.power[index] += sample * w;
        self.k[index] += k * w;
        self.mu[index] += mu * w;
        self.modes[index] += weight;
    }

    /// Add the sums of another accumulator to this one.
    pub fn merge(&mut self, other: &BinAccumulator) {
        assert_eq!(self.shape(), other.shape());
        for (a, b) in self.power.iter_mut().zip(&other.power) {
            *a += b;
        }
        for (a, b) in self.k.iter_mut().zip(&other.k) {
            *a += b;
        }
        for (a, b) in self.mu.iter_mut().zip(&other.mu) {
            *a += b;
        }
        for (a, b) in self.modes.iter_mut().zip(&other.modes) {
            *a += b;
        }
        for (a, b) in self.flagged.iter_mut().zip(&other.flagged) {
            *a += b;
        }
    }

    /// Element-wise sum across all ranks.
    ///
    /// Collective: every rank must call this with an accumulator of the same
    /// shape, otherwise the run deadlocks. The result is identical on every rank.
    pub fn reduce<C: CommunicatorCollectives>(&self, ctx: &Context<'_, C>) -> BinAccumulator {
        let comm = ctx.comm();
        let mut result = BinAccumulator::new(self.nk, self.nmu);

        // Collective: element-wise sums of all five tables.
        comm.all_reduce_into(&self.power[..], &mut result.power[..], SystemOperation::sum());
        comm.all_reduce_into(&self.k[..], &mut result.k[..], SystemOperation::sum());
        comm.all_reduce_into(&self.mu[..], &mut result.mu[..], SystemOperation::sum());
        comm.all_reduce_into(&self.modes[..], &mut result.modes[..], SystemOperation::sum());
        comm.all_reduce_into(
            &self.flagged[..],
            &mut result.flagged[..],
            SystemOperation::sum(),
        );

        debug!(
            rank = ctx.rank(),
            "reduced {} local modes into {} global modes",
            self.total_modes(),
            result.total_modes()
        );

        result
    }

    /// Mean k, mu and power per bin. Empty bins report `NaN`.
    pub fn finalize(&self) -> BinnedPower {
        let mean = |sums: &[f64]| {
            sums.iter()
                .zip(&self.modes)
                .map(|(&s, &n)| if n > 0 { s / n as f64 } else { f64::NAN })
                .collect_vec()
        };

        BinnedPower {
            nk: self.nk,
            nmu: self.nmu,
            k: mean(&self.k),
            mu: mean(&self.mu),
            power: mean(&self.power),
            modes: self.modes.clone(),
            flagged: self.flagged.clone(),
        }
    }
}

/// Finalized binned power, stored row-major as `[k][mu]`.
#[derive(Clone, Debug, PartialEq)]
pub struct BinnedPower {
    nk: usize,
    nmu: usize,
    k: Vec<f64>,
    mu: Vec<f64>,
    power: Vec<f64>,
    modes: Vec<u64>,
    flagged: Vec<u64>,
}

impl BinnedPower {
    /// Number of k and mu bins.
    pub fn shape(&self) -> [usize; 2] {
        [self.nk, self.nmu]
    }

    /// Flat index of a bin.
    pub fn index(&self, ik: usize, imu: usize) -> usize {
        ik * self.nmu + imu
    }

    /// Mean k per bin.
    pub fn k(&self) -> &[f64] {
        &self.k
    }

    /// Mean mu per bin.
    pub fn mu(&self) -> &[f64] {
        &self.mu
    }

    /// Mean power per bin, `NaN` for empty bins.
    pub fn power(&self) -> &[f64] {
        &self.power
    }

    /// Mode count per bin.
    pub fn modes(&self) -> &[u64] {
        &self.modes
    }

    /// Flagged modes per bin.
    pub fn flagged(&self) -> &[u64] {
        &self.flagged
    }
}

#[cfg(test)]
mod test {
    use std::f64::consts::PI;

    use itertools::izip;
    use num::complex::Complex64;

    use super::{BinAccumulator, BinEdges, Binning};
    use crate::{
        combine::{combine, CrossConvention, Deconvolution, SpectralField},
        error::PowerError,
        mesh::{Axis, FourierGrid, MeshDescriptor, SlabLayout},
    };

    /// Deterministic pseudo field as a function of the global index.
    fn synthetic_value(index: [usize; 3]) -> Complex64 {
        let [x, y, z] = index.map(|i| i as f64);
        Complex64::new((0.7 * x + 1.3 * y - 0.4 * z).sin() + 1.1, (x * y + z).cos())
    }

    fn synthetic_slab(mesh: MeshDescriptor, layout: SlabLayout) -> FourierGrid {
        let mut grid = FourierGrid::zeros(mesh, layout);
        for offset in 0..grid.len() {
            let index = grid.global_index(offset);
            grid.values_mut()[offset] = synthetic_value(index);
        }
        grid
    }

    fn bin_slab(grid: &FourierGrid, binning: &Binning) -> BinAccumulator {
        let (samples, _) = combine(
            SpectralField::new(grid, Deconvolution::Anisotropic, 2),
            None,
            CrossConvention::RealPart,
        )
        .unwrap();
        binning.bin(&samples, grid.modes()).unwrap()
    }

    #[test]
    fn test_locate() {
        let edges = BinEdges::new("k", vec![0.0, 1.0, 2.0, 4.0]).unwrap();
        assert_eq!(edges.locate(-0.1), None);
        assert_eq!(edges.locate(0.0), Some(0));
        assert_eq!(edges.locate(0.999), Some(0));
        assert_eq!(edges.locate(1.0), Some(1));
        assert_eq!(edges.locate(3.9), Some(2));
        assert_eq!(edges.locate(4.0), None);
        assert_eq!(edges.locate(f64::NAN), None);

        let mu = BinEdges::angular(4, true).unwrap();
        assert_eq!(mu.locate(1.0), Some(3));
        assert_eq!(mu.locate(0.0), Some(0));
        assert_eq!(mu.locate(-0.01), None);

        let mu = BinEdges::angular(4, false).unwrap();
        assert_eq!(mu.locate(-1.0), Some(0));
        assert_eq!(mu.locate(0.0), Some(2));
    }

    #[test]
    fn test_invalid_edges() {
        assert!(BinEdges::new("k", vec![1.0]).is_err());
        assert!(BinEdges::new("k", vec![0.0, 1.0, 1.0]).is_err());
        assert!(BinEdges::new("k", vec![0.0, f64::INFINITY]).is_err());
        assert!(BinEdges::angular(0, true).is_err());

        let mesh = MeshDescriptor::cubic(100.0, 8).unwrap();
        assert!(BinEdges::radial(&mesh, Some(0.0), 0.0).is_err());
        assert!(BinEdges::radial(&mesh, None, -1.0).is_err());
        // A kmin beyond the Nyquist frequency leaves no bins.
        assert!(BinEdges::radial(&mesh, None, 10.0).is_err());
    }

    #[test]
    fn test_radial_edges() {
        let mesh = MeshDescriptor::cubic(1000.0, 64).unwrap();
        let edges = BinEdges::radial(&mesh, None, 0.0).unwrap();
        let dk = 2.0 * PI / 1000.0;

        assert_eq!(edges.nbins(), 32);
        assert_eq!(edges.edges()[1], dk);
        assert!((edges.edges().last().unwrap() - mesh.nyquist()).abs() < 1e-12);
    }

    #[test]
    fn test_radial_bin_count_limit() {
        let mesh = MeshDescriptor::cubic(1000.0, 64).unwrap();
        assert!(matches!(
            BinEdges::radial(&mesh, Some(1e-300), 0.0),
            Err(PowerError::InvalidEdges { axis: "k", .. })
        ));
        let edges = BinEdges::radial(&mesh, Some(mesh.nyquist() / 1000.0), 0.0).unwrap();
        assert_eq!(edges.nbins(), 1000);
    }

    #[test]
    fn test_mode_count_conservation() {
        let n = 8;
        let mesh = MeshDescriptor::new([50.0, 60.0, 70.0], n).unwrap();
        let grid = synthetic_slab(mesh, SlabLayout::whole(n));
        let k_edges = BinEdges::new("k", vec![0.0, 0.3, 0.6, 10.0]).unwrap();

        for symmetric in [true, false] {
            for los in [Axis::X, Axis::Y, Axis::Z] {
                let binning = Binning::new(
                    k_edges.clone(),
                    BinEdges::angular(3, symmetric).unwrap(),
                    los,
                    symmetric,
                );
                let accumulator = bin_slab(&grid, &binning);
                // Every physical mode except the zero mode.
                assert_eq!(accumulator.total_modes(), (n * n * n - 1) as u64);
            }
        }
    }

    #[test]
    fn test_unfolded_bins_are_mirror_symmetric() {
        // Odd resolution, so there is no Nyquist plane whose partner aliases onto itself.
        let n = 5;
        let mesh = MeshDescriptor::cubic(10.0, n).unwrap();
        let grid = synthetic_slab(mesh, SlabLayout::whole(n));
        let binning = Binning::new(
            BinEdges::new("k", vec![0.0, 1.0, 2.0, 4.0]).unwrap(),
            BinEdges::angular(3, false).unwrap(),
            Axis::Z,
            false,
        );
        let modes = bin_slab(&grid, &binning).modes().to_vec();

        // A real field has as many modes at mu as at -mu.
        for row in modes.chunks(3) {
            assert_eq!(row[0], row[2]);
        }
    }

    #[test]
    fn test_partition_invariance() {
        let n = 8;
        let mesh = MeshDescriptor::cubic(100.0, n).unwrap();
        let binning = Binning::new(
            BinEdges::radial(&mesh, None, 0.0).unwrap(),
            BinEdges::angular(4, true).unwrap(),
            Axis::Z,
            true,
        );

        let reduce = |size: usize| {
            let mut total = binning.accumulator();
            for rank in 0..size {
                let grid = synthetic_slab(mesh, SlabLayout::new(n, rank, size));
                total.merge(&bin_slab(&grid, &binning));
            }
            total
        };

        let reference = reduce(1);
        assert!(reference.total_modes() > 0);
        for size in [2, 3, 8] {
            let other = reduce(size);
            assert_eq!(reference.modes(), other.modes());
            for (a, b) in izip!(
                reference
                    .power_sums()
                    .iter()
                    .chain(reference.k_sums())
                    .chain(reference.mu_sums()),
                other
                    .power_sums()
                    .iter()
                    .chain(other.k_sums())
                    .chain(other.mu_sums())
            ) {
                assert!((a - b).abs() <= 1e-10 * a.abs().max(1.0));
            }
        }
    }

    #[test]
    fn test_single_mode_scenario() {
        let n = 64;
        let mesh = MeshDescriptor::cubic(1000.0, n).unwrap();
        let mut grid = FourierGrid::zeros(mesh, SlabLayout::whole(n));
        *grid.get_mut([1, 0, 0]).unwrap() = Complex64::new(1.0, 0.0);
        *grid.get_mut([n - 1, 0, 0]).unwrap() = Complex64::new(1.0, 0.0);

        let (samples, _) = combine(
            SpectralField::new(&grid, Deconvolution::None, 2),
            None,
            CrossConvention::RealPart,
        )
        .unwrap();
        let k_edges = BinEdges::radial(&mesh, None, 0.0).unwrap();

        // 1D: all power sits in the bin containing the fundamental.
        let binning = Binning::new(k_edges.clone(), BinEdges::angular(1, true).unwrap(), Axis::Z, true);
        let accumulator = binning.bin(&samples, grid.modes()).unwrap();
        for (ik, &power) in accumulator.power_sums().iter().enumerate() {
            if ik == 1 {
                assert_eq!(power, 2.0);
            } else {
                assert_eq!(power, 0.0);
            }
        }

        // 2D along x: the two modes are the only ones in the last mu bin.
        let binning = Binning::new(k_edges, BinEdges::angular(5, true).unwrap(), Axis::X, true);
        let binned = binning.bin(&samples, grid.modes()).unwrap().finalize();
        let index = binned.index(1, 4);
        assert_eq!(binned.modes()[index], 2);
        assert_eq!(binned.power()[index], 1.0);
        assert_eq!(binned.mu()[index], 1.0);
        for (i, (&power, &count)) in binned.power().iter().zip(binned.modes()).enumerate() {
            if i != index && count > 0 {
                assert_eq!(power, 0.0);
            }
        }
    }

    #[test]
    fn test_empty_bins_are_nan() {
        let mut accumulator = BinAccumulator::new(2, 1);
        let binning = Binning::new(
            BinEdges::new("k", vec![0.0, 1.0, 1.2]).unwrap(),
            BinEdges::angular(1, true).unwrap(),
            Axis::Z,
            true,
        );
        let mesh = MeshDescriptor::cubic(2.0 * PI, 4).unwrap();
        let grid = FourierGrid::zeros(mesh, SlabLayout::whole(4));
        // Only |k| = 1 cells fall into range; they all have zero power.
        let samples = vec![0.0; grid.len()];
        accumulator.accumulate(&binning, &samples, grid.modes()).unwrap();

        let binned = accumulator.finalize();
        assert_eq!(binned.modes()[0], 0);
        assert!(binned.power()[0].is_nan());
        assert!(binned.k()[0].is_nan());
        assert_eq!(binned.modes()[1], 6);
        assert_eq!(binned.power()[1], 0.0);
    }

    #[test]
    fn test_flagged_samples_are_not_summed() {
        let mesh = MeshDescriptor::cubic(2.0 * PI, 4).unwrap();
        let grid = FourierGrid::zeros(mesh, SlabLayout::whole(4));
        let binning = Binning::new(
            BinEdges::new("k", vec![0.5, 1.2]).unwrap(),
            BinEdges::angular(1, true).unwrap(),
            Axis::Z,
            true,
        );
        let mut samples = vec![1.0; grid.len()];
        let flagged = grid.local_offset([1, 0, 0]).unwrap();
        samples[flagged] = f64::NAN;

        let binned = binning.bin(&samples, grid.modes()).unwrap().finalize();
        assert_eq!(binned.modes(), &[5]);
        assert_eq!(binned.flagged(), &[1]);
        assert_eq!(binned.power(), &[1.0]);
    }

    #[test]
    fn test_sample_count_mismatch() {
        let mesh = MeshDescriptor::cubic(1.0, 4).unwrap();
        let grid = FourierGrid::zeros(mesh, SlabLayout::whole(4));
        let binning = Binning::new(
            BinEdges::new("k", vec![0.0, 100.0]).unwrap(),
            BinEdges::angular(1, true).unwrap(),
            Axis::Z,
            true,
        );
        assert!(binning.bin(&vec![0.0; grid.len() - 1], grid.modes()).is_err());
        assert!(binning.bin(&vec![0.0; grid.len() + 1], grid.modes()).is_err());
        let accumulator = binning.bin(&vec![0.0; grid.len()], grid.modes()).unwrap();
        assert_eq!(accumulator.modes(), &[63]);
    }
}
