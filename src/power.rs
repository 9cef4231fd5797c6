//! Power spectrum of one or two fields in a periodic box.
//!
//! Each field is painted onto the slab mesh, transformed, and passed through
//! its transfers. The combined samples are binned in `(k, mu)` with folded
//! angular bins, reduced across ranks and optionally projected onto
//! Legendre multipoles.

use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use mpi::traits::CommunicatorCollectives;
use tracing::{debug, info, warn};

use crate::{
    binning::{BinEdges, BinnedPower, Binning},
    combine::{combine, scale_samples, CrossConvention, SpectralField},
    constants::DEFAULT_NMU,
    context::Context,
    error::{PowerError, Result},
    fields::FieldSpec,
    mesh::{Axis, FourierGrid, MeshDescriptor, SlabLayout},
    multipoles::{project, Multipoles},
    storage::{write_1d, write_2d, write_poles, Metadata},
    tools::global_all,
    transform::{ReplicatedFft, Transform},
};

/// Binning dimensionality.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerMode {
    /// Power as a function of `k` only.
    OneD,
    /// Power as a function of `k` and `mu`.
    #[default]
    TwoD,
}

impl FromStr for PowerMode {
    type Err = PowerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1d" => Ok(PowerMode::OneD),
            "2d" => Ok(PowerMode::TwoD),
            other => Err(PowerError::Config(format!(
                "mode must be `1d` or `2d`, got `{other}`"
            ))),
        }
    }
}

impl Display for PowerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerMode::OneD => write!(f, "1d"),
            PowerMode::TwoD => write!(f, "2d"),
        }
    }
}

/// Options of a power spectrum measurement.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerConfig {
    /// Binning dimensionality.
    pub mode: PowerMode,
    /// Box length per axis.
    pub box_size: [f64; 3],
    /// Cells per axis.
    pub nmesh: usize,
    /// Line of sight.
    pub los: Axis,
    /// Number of mu bins in 2D mode.
    pub nmu: usize,
    /// Radial bin width, the fundamental frequency if unset.
    pub dk: Option<f64>,
    /// Lower edge of the first radial bin.
    pub kmin: f64,
    /// Multipole orders to project onto.
    pub poles: Vec<usize>,
    /// Cross power convention.
    pub cross: CrossConvention,
}

impl PowerConfig {
    /// Default options for a mesh.
    pub fn new(mode: PowerMode, box_size: [f64; 3], nmesh: usize) -> Self {
        Self {
            mode,
            box_size,
            nmesh,
            los: Axis::default(),
            nmu: DEFAULT_NMU,
            dk: None,
            kmin: 0.0,
            poles: Vec::new(),
            cross: CrossConvention::default(),
        }
    }

    /// Set the line of sight.
    pub fn with_los(mut self, los: Axis) -> Self {
        self.los = los;
        self
    }

    /// Set the number of mu bins.
    pub fn with_nmu(mut self, nmu: usize) -> Self {
        self.nmu = nmu;
        self
    }

    /// Set the radial bin width.
    pub fn with_dk(mut self, dk: f64) -> Self {
        self.dk = Some(dk);
        self
    }

    /// Set the lower radial edge.
    pub fn with_kmin(mut self, kmin: f64) -> Self {
        self.kmin = kmin;
        self
    }

    /// Set the multipole orders.
    pub fn with_poles(mut self, poles: Vec<usize>) -> Self {
        self.poles = poles;
        self
    }

    /// Set the cross power convention.
    pub fn with_cross(mut self, cross: CrossConvention) -> Self {
        self.cross = cross;
        self
    }

    /// Number of mu bins actually used; 1D mode uses a single bin.
    pub fn effective_nmu(&self) -> usize {
        match self.mode {
            PowerMode::OneD => 1,
            PowerMode::TwoD => self.nmu,
        }
    }

    /// The validated mesh.
    pub fn mesh(&self) -> Result<MeshDescriptor> {
        MeshDescriptor::new(self.box_size, self.nmesh)
    }

    /// The validated binning.
    pub fn binning(&self) -> Result<Binning> {
        let mesh = self.mesh()?;
        Ok(Binning::new(
            BinEdges::radial(&mesh, self.dk, self.kmin)?,
            BinEdges::angular(self.effective_nmu(), true)?,
            self.los,
            true,
        ))
    }
}

/// Outcome of a measurement, identical on every rank.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerResult {
    /// Binning dimensionality.
    pub mode: PowerMode,
    /// Radial and angular edges.
    pub binning: Binning,
    /// Binned power, scaled by the box volume.
    pub binned: BinnedPower,
    /// Multipoles, if requested.
    pub poles: Option<Multipoles>,
    /// Box and particle counts.
    pub meta: Metadata,
}

/// A transformed field ready for combination.
struct TransformedField {
    grid: FourierGrid,
    spec: FieldSpec,
    count: usize,
}

impl TransformedField {
    fn spectral(&self) -> SpectralField<'_> {
        SpectralField::new(
            &self.grid,
            self.spec.deconvolution(),
            self.spec.painter.window_order(),
        )
    }
}

/// Periodic box power spectrum.
pub struct PeriodicPower<T = ReplicatedFft> {
    config: PowerConfig,
    transform: T,
}

impl PeriodicPower<ReplicatedFft> {
    /// Measurement with the reference transform.
    pub fn new(config: PowerConfig) -> Self {
        Self::with_transform(config, ReplicatedFft)
    }
}

impl<T: Transform> PeriodicPower<T> {
    /// Measurement with a custom transform.
    pub fn with_transform(config: PowerConfig, transform: T) -> Self {
        Self { config, transform }
    }

    /// The options.
    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    fn transform_field<C: CommunicatorCollectives>(
        &self,
        spec: &FieldSpec,
        mesh: MeshDescriptor,
        layout: SlabLayout,
        ctx: &Context<'_, C>,
    ) -> Result<TransformedField> {
        let (real, count) = spec.paint(mesh, layout, ctx)?;
        let mut grid = self.transform.r2c(&real, ctx)?;
        for transfer in &spec.transfers {
            transfer.apply(&mut grid, ctx)?;
        }
        Ok(TransformedField {
            grid,
            spec: spec.clone(),
            count,
        })
    }

    /// Measure the auto power of one field or the cross power of two.
    ///
    /// A second field equal to the first yields the auto power.
    ///
    /// Collective: all ranks must call this with the same arguments.
    pub fn run<C: CommunicatorCollectives>(
        &self,
        fields: &[FieldSpec],
        ctx: &Context<'_, C>,
    ) -> Result<PowerResult> {
        if fields.is_empty() || fields.len() > 2 {
            return Err(PowerError::FieldCount(fields.len()));
        }

        // All configuration errors surface here, before any collective.
        let mesh = self.config.mesh()?;
        let binning = self.config.binning()?;
        let layout = SlabLayout::new(mesh.nmesh(), ctx.rank(), ctx.size());

        if ctx.is_root() {
            info!(
                "{} power on a {}^3 mesh, box {:?}, {} k bins, {} mu bins",
                self.config.mode,
                mesh.nmesh(),
                mesh.box_size(),
                binning.k_edges.nbins(),
                binning.mu_edges.nbins()
            );
        }

        let first = self.transform_field(&fields[0], mesh, layout, ctx)?;
        // Collective: in-memory catalogs differ per rank, so all must agree.
        let second = match fields.get(1) {
            Some(spec) if !global_all(*spec == fields[0], ctx.comm()) => {
                Some(self.transform_field(spec, mesh, layout, ctx)?)
            }
            _ => None,
        };

        let (mut samples, report) = combine(
            first.spectral(),
            second.as_ref().map(TransformedField::spectral),
            self.config.cross,
        )?;
        scale_samples(&mut samples, mesh.volume());

        // Collective: global bin sums.
        let accumulator = binning.bin_and_reduce(&samples, first.grid.modes(), ctx)?;
        let binned = accumulator.finalize();

        let flagged = binned.flagged().iter().sum::<u64>();
        if ctx.is_root() {
            info!("binned {} modes", accumulator.total_modes());
            if flagged > 0 {
                warn!("{} mode(s) flagged as undefined across all ranks", flagged);
            }
        }
        debug!(rank = ctx.rank(), "{} local cell(s) flagged", report.flagged());

        let poles = (!self.config.poles.is_empty())
            .then(|| project(&binned, &binning.mu_edges.centers(), &self.config.poles));

        let n1 = first.count;
        let n2 = second.as_ref().map_or(n1, |field| field.count);

        Ok(PowerResult {
            mode: self.config.mode,
            binning,
            binned,
            poles,
            meta: Metadata {
                box_size: mesh.box_size(),
                n1,
                n2,
            },
        })
    }

    /// Write the result on the root rank.
    ///
    /// `output` of `-` writes to standard output. Multipoles go to
    /// `<stem>_poles<.ext>` next to `output`.
    pub fn save<C: CommunicatorCollectives>(
        &self,
        result: &PowerResult,
        output: &str,
        ctx: &Context<'_, C>,
    ) -> Result<()> {
        if !ctx.is_root() {
            return Ok(());
        }

        info!("measurement done; saving result to {}", output);
        let mut out = open_output(output)?;
        write_spectrum(&mut out, result)?;
        out.flush()?;

        if let Some(poles) = &result.poles {
            let pole_output = poles_path(output);
            info!(
                "saving multipoles {:?} to {}",
                poles.orders(),
                pole_output.display()
            );
            let mut out = open_output(&pole_output.to_string_lossy())?;
            let modes = poles.modes().iter().map(|&n| n as f64).collect::<Vec<_>>();
            write_poles(
                &mut out,
                result.binning.k_edges.edges(),
                poles.orders(),
                poles.k(),
                poles.poles(),
                &modes,
                &result.meta,
            )?;
            out.flush()?;
        }
        Ok(())
    }
}

/// Write the binned spectrum in the layout of its mode.
pub fn write_spectrum<W: Write>(out: &mut W, result: &PowerResult) -> Result<()> {
    let binned = &result.binned;
    let modes = binned.modes().iter().map(|&n| n as f64).collect::<Vec<_>>();
    match result.mode {
        PowerMode::OneD => write_1d(
            out,
            result.binning.k_edges.edges(),
            &[
                ("k", binned.k()),
                ("power", binned.power()),
                ("modes", &modes[..]),
            ],
            &result.meta,
        ),
        PowerMode::TwoD => write_2d(
            out,
            result.binning.k_edges.edges(),
            result.binning.mu_edges.edges(),
            &[
                ("k", binned.k()),
                ("mu", binned.mu()),
                ("power", binned.power()),
                ("modes", &modes[..]),
            ],
            &result.meta,
        ),
    }
}

fn open_output(output: &str) -> Result<Box<dyn Write>> {
    if output == "-" {
        Ok(Box::new(std::io::stdout().lock()))
    } else {
        Ok(Box::new(BufWriter::new(File::create(output)?)))
    }
}

/// Path of the multipole file belonging to `output`.
pub fn poles_path(output: &str) -> PathBuf {
    if output == "-" {
        return PathBuf::from("-");
    }
    let path = Path::new(output);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_poles.{}", ext.to_string_lossy()),
        None => format!("{stem}_poles"),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::{poles_path, PowerConfig, PowerMode};
    use crate::error::PowerError;

    #[test]
    fn test_config_defaults() {
        let config = PowerConfig::new(PowerMode::TwoD, [1000.0; 3], 64);
        assert_eq!(config.effective_nmu(), 5);
        let binning = config.binning().unwrap();
        assert_eq!(binning.mu_edges.nbins(), 5);
        assert_eq!(binning.k_edges.nbins(), 32);
        assert!(binning.symmetric);

        let config = PowerConfig::new(PowerMode::OneD, [1000.0; 3], 64).with_nmu(7);
        assert_eq!(config.binning().unwrap().mu_edges.nbins(), 1);
    }

    #[test]
    fn test_config_errors() {
        let config = PowerConfig::new(PowerMode::TwoD, [1000.0; 3], 0);
        assert!(matches!(
            config.binning(),
            Err(PowerError::InvalidMeshResolution(0))
        ));

        let config = PowerConfig::new(PowerMode::TwoD, [1000.0; 3], 8).with_nmu(0);
        assert!(matches!(
            config.binning(),
            Err(PowerError::InvalidEdges { axis: "mu", .. })
        ));

        let config = PowerConfig::new(PowerMode::TwoD, [1000.0; 3], 8).with_dk(-1.0);
        assert!(matches!(
            config.binning(),
            Err(PowerError::InvalidEdges { axis: "k", .. })
        ));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("1d".parse::<PowerMode>().unwrap(), PowerMode::OneD);
        assert_eq!("2d".parse::<PowerMode>().unwrap(), PowerMode::TwoD);
        assert!("3d".parse::<PowerMode>().is_err());
    }

    #[test]
    fn test_poles_path() {
        assert_eq!(poles_path("out/pk.dat"), PathBuf::from("out/pk_poles.dat"));
        assert_eq!(poles_path("pk"), PathBuf::from("pk_poles"));
        assert_eq!(poles_path("-"), PathBuf::from("-"));
    }
}
