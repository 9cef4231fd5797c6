//! Power spectrum runs read from a TOML file.
//!
//! ```toml
//! mode = "2d"
//! box_size = 1000.0
//! nmesh = 64
//! output = "pk.dat"
//! poles = [0, 2, 4]
//! fields = [
//!     "Random:npart=100000,seed=7", "CIC", ["NormalizeDC", "RemoveDC"],
//!     "PlainText:path=halos.txt", "NGP",
//! ]
//! ```
//!
//! `box_size` is either one length or `[Lx, Ly, Lz]`. A nested list in
//! `fields` groups the transfers of the preceding data source.

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::{
    error::{PowerError, Result},
    fields::{parse_field_entries, FieldEntry, FieldSpec},
    power::PowerConfig,
};

/// Box length given once or per axis.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BoxSize {
    /// Same length along every axis.
    Cubic(f64),
    /// `[Lx, Ly, Lz]`.
    PerAxis([f64; 3]),
}

impl BoxSize {
    /// Length per axis.
    pub fn lengths(self) -> [f64; 3] {
        match self {
            BoxSize::Cubic(length) => [length; 3],
            BoxSize::PerAxis(lengths) => lengths,
        }
    }
}

impl FromStr for BoxSize {
    type Err = PowerError;

    /// One length or `Lx,Ly,Lz`.
    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split(',')
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .map_err(|e| PowerError::Config(format!("box length `{v}`: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        match values[..] {
            [length] => Ok(BoxSize::Cubic(length)),
            [lx, ly, lz] => Ok(BoxSize::PerAxis([lx, ly, lz])),
            _ => Err(PowerError::Config(format!(
                "expected 1 or 3 box lengths, got {}",
                values.len()
            ))),
        }
    }
}

/// Contents of a run file.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunFile {
    /// `1d` or `2d`.
    pub mode: String,
    /// Box length.
    pub box_size: BoxSize,
    /// Cells per axis.
    pub nmesh: usize,
    /// Output path, `-` for stdout.
    pub output: String,
    /// Field tokens, transfers optionally grouped.
    pub fields: Vec<FieldEntry>,
    /// Line of sight, `x`, `y` or `z`.
    pub los: Option<String>,
    /// Number of mu bins.
    pub nmu: Option<usize>,
    /// Radial bin width.
    pub dk: Option<f64>,
    /// Lower radial edge.
    pub kmin: Option<f64>,
    /// Multipole orders.
    #[serde(default)]
    pub poles: Vec<usize>,
    /// Cross power convention, `real` or `geometric`.
    pub cross: Option<String>,
}

impl RunFile {
    /// Read and parse a run file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parse a run file from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// The measurement options. Unset entries keep the defaults of [PowerConfig::new].
    pub fn power_config(&self) -> Result<PowerConfig> {
        let mut config = PowerConfig::new(self.mode.parse()?, self.box_size.lengths(), self.nmesh)
            .with_poles(self.poles.clone());
        if let Some(los) = &self.los {
            config = config.with_los(los.parse()?);
        }
        if let Some(nmu) = self.nmu {
            config = config.with_nmu(nmu);
        }
        if let Some(dk) = self.dk {
            config = config.with_dk(dk);
        }
        if let Some(kmin) = self.kmin {
            config = config.with_kmin(kmin);
        }
        if let Some(cross) = &self.cross {
            config = config.with_cross(cross.parse()?);
        }
        Ok(config)
    }

    /// The parsed fields.
    pub fn fields(&self) -> Result<Vec<FieldSpec>> {
        parse_field_entries(&self.fields)
    }
}

#[cfg(test)]
mod test {
    use crate::combine::CrossConvention;
    use crate::error::PowerError;
    use crate::fields::{DataSource, Painter, Transfer};
    use crate::mesh::Axis;
    use crate::power::PowerMode;

    use super::{BoxSize, RunFile};

    #[test]
    fn test_box_size_parsing() {
        assert_eq!("1000".parse::<BoxSize>().unwrap().lengths(), [1000.0; 3]);
        assert_eq!(
            "1, 2.5,3".parse::<BoxSize>().unwrap().lengths(),
            [1.0, 2.5, 3.0]
        );
        assert!("1,2".parse::<BoxSize>().is_err());
        assert!("a".parse::<BoxSize>().is_err());
    }

    #[test]
    fn test_run_file() {
        let file = RunFile::from_toml(
            r#"
            mode = "1d"
            box_size = [100.0, 200.0, 300.0]
            nmesh = 32
            output = "pk.dat"
            los = "x"
            dk = 0.05
            cross = "geometric"
            poles = [0, 2]
            fields = [
                "Random:npart=1000,seed=7", "NGP", ["RemoveDC", "IsotropicCIC"],
                "Random:npart=500",
            ]
            "#,
        )
        .unwrap();

        let config = file.power_config().unwrap();
        assert_eq!(config.mode, PowerMode::OneD);
        assert_eq!(config.box_size, [100.0, 200.0, 300.0]);
        assert_eq!(config.los, Axis::X);
        assert_eq!(config.nmu, 5);
        assert_eq!(config.dk, Some(0.05));
        assert_eq!(config.kmin, 0.0);
        assert_eq!(config.poles, vec![0, 2]);
        assert_eq!(config.cross, CrossConvention::GeometricMean);
        assert_eq!(file.output, "pk.dat");

        let fields = file.fields().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].source, DataSource::Random { npart: 1000, seed: 7 });
        assert_eq!(fields[0].painter, Painter::Ngp);
        assert_eq!(
            fields[0].transfers,
            vec![Transfer::RemoveDc, Transfer::IsotropicCic]
        );
        assert_eq!(fields[1].transfers, Transfer::DEFAULT.to_vec());
    }

    #[test]
    fn test_run_file_errors() {
        let minimal = "mode = \"2d\"\nbox_size = 10.0\nnmesh = 8\noutput = \"-\"\n";

        let file = RunFile::from_toml(&format!("{minimal}fields = [\"Random:npart=1\"]\n")).unwrap();
        assert_eq!(file.power_config().unwrap().box_size, [10.0; 3]);

        assert!(matches!(
            RunFile::from_toml(&format!("{minimal}fields = []\nbins = 3\n")),
            Err(PowerError::ConfigFile(_))
        ));
        assert!(matches!(
            RunFile::from_toml(minimal),
            Err(PowerError::ConfigFile(_))
        ));

        let file = RunFile::from_toml(&format!("{minimal}fields = []\nlos = \"w\"\n")).unwrap();
        assert!(file.power_config().is_err());
        assert!(matches!(file.fields(), Err(PowerError::FieldCount(0))));
    }
}
