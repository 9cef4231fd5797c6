//! Input fields: data sources, painters and Fourier-space transfers.
//!
//! A field is described by a sequence of tokens
//! `DataSource [Painter] [Transfer...]`, for example
//! `Random:npart=100000,seed=42 CIC NormalizeDC RemoveDC AnisotropicCIC`.
//! Parameters follow the plugin name after a colon as `name=value` pairs.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use itertools::Itertools;
use mpi::traits::CommunicatorCollectives;
use num::complex::Complex64;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    combine::Deconvolution,
    context::Context,
    error::{PowerError, Result},
    mesh::{FourierGrid, MeshDescriptor, RealGrid, SlabLayout},
    tools::{all_reduce_sum_in_place, block_range, broadcast_from, global_size, seeded_rng},
};

/// Where particle positions come from.
#[derive(Clone, Debug, PartialEq)]
pub enum DataSource {
    /// Positions already held in memory, partitioned arbitrarily.
    Catalog(Vec<[f64; 3]>),
    /// Whitespace separated `x y z` rows. Every rank keeps its block of rows.
    PlainText(PathBuf),
    /// Uniform random positions. `npart` is the global count.
    Random {
        /// Global number of particles.
        npart: usize,
        /// Base seed; rank `r` draws from `seed + r`.
        seed: u64,
    },
}

impl DataSource {
    /// Build a catalog from a flat `x y z x y z ...` buffer.
    pub fn from_flat(flat: &[f64]) -> Result<Self> {
        let positions = bytemuck::try_cast_slice::<f64, [f64; 3]>(flat).map_err(|e| {
            PowerError::Config(format!(
                "flat position buffer of length {} is not a list of 3-vectors: {e}",
                flat.len()
            ))
        })?;
        Ok(DataSource::Catalog(positions.to_vec()))
    }

    /// The positions held by this rank.
    pub fn positions<C: CommunicatorCollectives>(
        &self,
        box_size: [f64; 3],
        ctx: &Context<'_, C>,
    ) -> Result<Vec<[f64; 3]>> {
        match self {
            DataSource::Catalog(positions) => Ok(positions.clone()),
            DataSource::PlainText(path) => {
                let content = std::fs::read_to_string(path)?;
                let flat = content
                    .lines()
                    .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
                    .flat_map(str::split_whitespace)
                    .map(|token| {
                        token.parse::<f64>().map_err(|e| {
                            PowerError::Config(format!("{}: `{token}`: {e}", path.display()))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let all = bytemuck::try_cast_slice::<f64, [f64; 3]>(&flat).map_err(|_| {
                    PowerError::Config(format!(
                        "{}: expected three columns per row",
                        path.display()
                    ))
                })?;
                let (start, end) = block_range(all.len(), ctx.rank(), ctx.size());
                Ok(all[start..end].to_vec())
            }
            DataSource::Random { npart, seed } => {
                let (start, end) = block_range(*npart, ctx.rank(), ctx.size());
                let mut rng = seeded_rng(seed + ctx.rank() as u64);
                Ok((start..end)
                    .map(|_| box_size.map(|length| rng.gen_range(0.0..length)))
                    .collect_vec())
            }
        }
    }
}

/// Mass assignment scheme.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Painter {
    /// Nearest grid point.
    Ngp,
    /// Cloud in cell.
    #[default]
    Cic,
}

impl Painter {
    /// Order of the assignment window (1 for NGP, 2 for CIC).
    pub fn window_order(&self) -> u32 {
        match self {
            Painter::Ngp => 1,
            Painter::Cic => 2,
        }
    }

    /// Paint particle counts onto the local slab.
    ///
    /// Positions are wrapped into the periodic box. Returns the slab and the
    /// global number of particles.
    ///
    /// Collective: all ranks must call this.
    pub fn paint<C: CommunicatorCollectives>(
        &self,
        positions: &[[f64; 3]],
        mesh: MeshDescriptor,
        layout: SlabLayout,
        ctx: &Context<'_, C>,
    ) -> Result<(RealGrid, usize)> {
        let n = mesh.nmesh();
        let mut full = vec![0.0; n * n * n];
        for position in positions {
            self.deposit(&mut full, position, &mesh);
        }

        // Collective: particles may land on any rank's planes.
        all_reduce_sum_in_place(&mut full, ctx.comm());
        // Collective
        let count = global_size(positions, ctx.comm());

        let slab = full[layout.start() * n * n..layout.end() * n * n].to_vec();
        Ok((RealGrid::from_values(mesh, layout, slab)?, count))
    }

    fn deposit(&self, full: &mut [f64], position: &[f64; 3], mesh: &MeshDescriptor) {
        let n = mesh.nmesh();
        let box_size = mesh.box_size();
        let mut cells = [[0_usize; 2]; 3];
        let mut weights = [[0.0; 2]; 3];
        for axis in 0..3 {
            let x = position[axis].rem_euclid(box_size[axis]) / box_size[axis] * n as f64;
            match self {
                Painter::Ngp => {
                    cells[axis] = [(x.round() as usize) % n; 2];
                    weights[axis] = [1.0, 0.0];
                }
                Painter::Cic => {
                    let i = x.floor();
                    let frac = x - i;
                    let i = i as usize % n;
                    cells[axis] = [i, (i + 1) % n];
                    weights[axis] = [1.0 - frac, frac];
                }
            }
        }
        for a in 0..2 {
            for b in 0..2 {
                for c in 0..2 {
                    let w = weights[0][a] * weights[1][b] * weights[2][c];
                    if w != 0.0 {
                        full[(cells[0][a] * n + cells[1][b]) * n + cells[2][c]] += w;
                    }
                }
            }
        }
    }
}

/// A Fourier-space operation applied after the transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// Divide by the zero mode so the field becomes `1 + delta`.
    NormalizeDc,
    /// Zero the zero mode.
    RemoveDc,
    /// Remove the painter window per axis.
    AnisotropicCic,
    /// Remove the painter window as a function of `|n|`.
    IsotropicCic,
}

impl Transfer {
    /// Default transfers when a field lists none.
    pub const DEFAULT: [Transfer; 3] = [
        Transfer::NormalizeDc,
        Transfer::RemoveDc,
        Transfer::AnisotropicCic,
    ];

    /// The window deconvolution this transfer selects, if any.
    pub fn deconvolution(&self) -> Option<Deconvolution> {
        match self {
            Transfer::AnisotropicCic => Some(Deconvolution::Anisotropic),
            Transfer::IsotropicCic => Some(Deconvolution::Isotropic),
            _ => None,
        }
    }

    /// Apply the transfer to a local Fourier slab.
    ///
    /// Window transfers only select the deconvolution, which the combiner
    /// applies to the power samples.
    ///
    /// Collective: all ranks must call this.
    pub fn apply<C: CommunicatorCollectives>(
        &self,
        grid: &mut FourierGrid,
        ctx: &Context<'_, C>,
    ) -> Result<()> {
        match self {
            Transfer::NormalizeDc => {
                let nmesh = grid.mesh().nmesh();
                let owner = dc_owner(nmesh, ctx.size());
                let mut dc = grid.get([0, 0, 0]).map(|v| [v.re, v.im]).unwrap_or_default();
                // Collective: only the owner of plane zero stores the zero mode.
                broadcast_from(&mut dc, owner, ctx.comm());
                let dc = Complex64::new(dc[0], dc[1]);
                if dc.norm() == 0.0 {
                    return Err(PowerError::Config(
                        "cannot normalise a field with zero mean".to_string(),
                    ));
                }
                debug!("normalising by DC value {}", dc);
                for v in grid.values_mut() {
                    *v /= dc;
                }
            }
            Transfer::RemoveDc => {
                if let Some(v) = grid.get_mut([0, 0, 0]) {
                    *v = Complex64::default();
                }
            }
            Transfer::AnisotropicCic | Transfer::IsotropicCic => (),
        }
        Ok(())
    }
}

/// The rank whose slab contains plane zero.
pub fn dc_owner(nmesh: usize, size: usize) -> usize {
    (0..size)
        .find(|&rank| SlabLayout::new(nmesh, rank, size).contains(0))
        .unwrap_or(0)
}

/// A data source with its painter and transfers.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpec {
    /// Particle positions.
    pub source: DataSource,
    /// Mass assignment.
    pub painter: Painter,
    /// Fourier-space transfers in application order.
    pub transfers: Vec<Transfer>,
}

impl FieldSpec {
    /// A field with the default painter and transfers.
    pub fn new(source: DataSource) -> Self {
        Self {
            source,
            painter: Painter::default(),
            transfers: Transfer::DEFAULT.to_vec(),
        }
    }

    /// Replace the painter.
    pub fn with_painter(mut self, painter: Painter) -> Self {
        self.painter = painter;
        self
    }

    /// Replace the transfers.
    pub fn with_transfers(mut self, transfers: Vec<Transfer>) -> Self {
        self.transfers = transfers;
        self
    }

    /// Deconvolution selected by the last window transfer.
    pub fn deconvolution(&self) -> Deconvolution {
        self.transfers
            .iter()
            .rev()
            .find_map(Transfer::deconvolution)
            .unwrap_or(Deconvolution::None)
    }

    /// Paint the field onto the local slab.
    ///
    /// Collective: all ranks must call this.
    pub fn paint<C: CommunicatorCollectives>(
        &self,
        mesh: MeshDescriptor,
        layout: SlabLayout,
        ctx: &Context<'_, C>,
    ) -> Result<(RealGrid, usize)> {
        let positions = self.source.positions(mesh.box_size(), ctx)?;
        let (real, count) = self.painter.paint(&positions, mesh, layout, ctx)?;
        if ctx.is_root() {
            info!("painted {} particles with {}", count, self.painter);
        }
        Ok((real, count))
    }
}

/// One token of a field description.
#[derive(Clone, Debug, PartialEq)]
enum Token {
    Source(DataSource),
    Painter(Painter),
    Transfer(Transfer),
}

fn parameters(spec: &str, params: &str) -> Result<Vec<(String, String)>> {
    params
        .split(',')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| PowerError::FieldSpec {
                    spec: spec.to_string(),
                    reason: format!("expected `name=value`, got `{pair}`"),
                })
        })
        .collect()
}

fn parse_number<T: FromStr>(spec: &str, name: &str, value: &str) -> Result<T>
where
    T::Err: Display,
{
    value.parse::<T>().map_err(|e| PowerError::FieldSpec {
        spec: spec.to_string(),
        reason: format!("parameter `{name}`: {e}"),
    })
}

impl FromStr for Token {
    type Err = PowerError;

    fn from_str(spec: &str) -> Result<Self> {
        let (name, params) = spec.split_once(':').unwrap_or((spec, ""));
        let params = parameters(spec, params)?;
        let missing = |name: &str| PowerError::FieldSpec {
            spec: spec.to_string(),
            reason: format!("missing parameter `{name}`"),
        };

        let token = match name {
            "Random" => {
                let mut npart = None;
                let mut seed = 42;
                for (key, value) in &params {
                    match key.as_str() {
                        "npart" => npart = Some(parse_number(spec, key, value)?),
                        "seed" => seed = parse_number(spec, key, value)?,
                        other => {
                            return Err(PowerError::FieldSpec {
                                spec: spec.to_string(),
                                reason: format!("unknown parameter `{other}`"),
                            })
                        }
                    }
                }
                Token::Source(DataSource::Random {
                    npart: npart.ok_or_else(|| missing("npart"))?,
                    seed,
                })
            }
            "PlainText" => {
                let path = params
                    .iter()
                    .find(|(key, _)| key == "path")
                    .map(|(_, value)| PathBuf::from(value))
                    .ok_or_else(|| missing("path"))?;
                Token::Source(DataSource::PlainText(path))
            }
            "NGP" => Token::Painter(Painter::Ngp),
            "CIC" | "DefaultPainter" => Token::Painter(Painter::Cic),
            "NormalizeDC" => Token::Transfer(Transfer::NormalizeDc),
            "RemoveDC" => Token::Transfer(Transfer::RemoveDc),
            "AnisotropicCIC" => Token::Transfer(Transfer::AnisotropicCic),
            "IsotropicCIC" => Token::Transfer(Transfer::IsotropicCic),
            other => {
                return Err(PowerError::UnknownPlugin {
                    kind: "plugin",
                    name: other.to_string(),
                })
            }
        };
        Ok(token)
    }
}

impl Display for Painter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Painter::Ngp => write!(f, "NGP"),
            Painter::Cic => write!(f, "CIC"),
        }
    }
}

fn current_field<'a>(fields: &'a mut [FieldSpec], raw: &str) -> Result<&'a mut FieldSpec> {
    fields.last_mut().ok_or_else(|| PowerError::FieldSpec {
        spec: raw.to_string(),
        reason: "a field must start with a data source".to_string(),
    })
}

/// One entry of a field list read from a configuration file.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldEntry {
    /// A single token.
    Token(String),
    /// A group of transfers, replacing the defaults of the current field.
    Transfers(Vec<String>),
}

/// Fields under construction.
#[derive(Default)]
struct FieldsBuilder {
    fields: Vec<FieldSpec>,
    explicit_transfers: bool,
}

impl FieldsBuilder {
    fn push_token(&mut self, raw: &str) -> Result<()> {
        match raw.parse::<Token>()? {
            Token::Source(source) => {
                self.fields.push(FieldSpec::new(source));
                self.explicit_transfers = false;
            }
            Token::Painter(painter) => current_field(&mut self.fields, raw)?.painter = painter,
            Token::Transfer(transfer) => self.current_transfers(raw)?.push(transfer),
        }
        Ok(())
    }

    fn push_transfers<S: AsRef<str>>(&mut self, group: &[S]) -> Result<()> {
        let raw = group.iter().map(AsRef::as_ref).join(" ");
        let transfers = group
            .iter()
            .map(|token| match token.as_ref().parse::<Token>()? {
                Token::Transfer(transfer) => Ok(transfer),
                _ => Err(PowerError::FieldSpec {
                    spec: raw.clone(),
                    reason: format!("`{}` in a transfer list is not a transfer", token.as_ref()),
                }),
            })
            .collect::<Result<Vec<_>>>()?;
        self.current_transfers(&raw)?.extend(transfers);
        Ok(())
    }

    /// Transfers of the current field, cleared of the defaults on first use.
    fn current_transfers(&mut self, raw: &str) -> Result<&mut Vec<Transfer>> {
        let field = current_field(&mut self.fields, raw)?;
        if !self.explicit_transfers {
            field.transfers.clear();
            self.explicit_transfers = true;
        }
        Ok(&mut field.transfers)
    }

    fn finish(self) -> Result<Vec<FieldSpec>> {
        if self.fields.is_empty() || self.fields.len() > 2 {
            return Err(PowerError::FieldCount(self.fields.len()));
        }
        Ok(self.fields)
    }
}

/// Parse one or two field descriptions from a token sequence.
///
/// Every field starts with a data source. A field without transfers gets
/// [Transfer::DEFAULT].
pub fn parse_fields<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<FieldSpec>> {
    let mut builder = FieldsBuilder::default();
    for raw in tokens {
        builder.push_token(raw.as_ref())?;
    }
    builder.finish()
}

/// Parse one or two fields from configuration file entries.
///
/// Like [parse_fields], but transfers may be grouped in a nested list. An
/// empty list leaves the field without transfers.
pub fn parse_field_entries(entries: &[FieldEntry]) -> Result<Vec<FieldSpec>> {
    let mut builder = FieldsBuilder::default();
    for entry in entries {
        match entry {
            FieldEntry::Token(raw) => builder.push_token(raw)?,
            FieldEntry::Transfers(group) => builder.push_transfers(group)?,
        }
    }
    builder.finish()
}
