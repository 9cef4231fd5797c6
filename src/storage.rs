//! Reading particle catalogs and writing spectra and halo catalogs.
//!
//! Spectrum files start with a `#` header naming the columns, followed by one
//! whitespace separated row per bin, the bin edges and the run metadata.
//! Only the root rank writes.

use std::io::{BufRead, Write};

use itertools::Itertools;

use crate::{
    error::{PowerError, Result},
    halos::{Halo, ParticleRecord},
};

/// Run metadata written after the data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Metadata {
    /// Box lengths.
    pub box_size: [f64; 3],
    /// Number of particles in the first field.
    pub n1: usize,
    /// Number of particles in the second field, equal to `n1` for auto power.
    pub n2: usize,
}

impl Metadata {
    /// Box volume.
    pub fn volume(&self) -> f64 {
        self.box_size.iter().product()
    }

    /// Metadata as `(name, value)` pairs.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Lx", self.box_size[0].to_string()),
            ("Ly", self.box_size[1].to_string()),
            ("Lz", self.box_size[2].to_string()),
            ("volume", self.volume().to_string()),
            ("N1", self.n1.to_string()),
            ("N2", self.n2.to_string()),
        ]
    }
}

fn write_rows<W: Write>(out: &mut W, columns: &[(&str, &[f64])]) -> Result<()> {
    let nrows = columns.first().map_or(0, |(_, values)| values.len());
    assert!(columns.iter().all(|(_, values)| values.len() == nrows));

    writeln!(out, "# {}", columns.iter().map(|(name, _)| name).join(" "))?;
    for row in 0..nrows {
        writeln!(out, "{}", columns.iter().map(|(_, values)| values[row]).join(" "))?;
    }
    Ok(())
}

fn write_edges<W: Write>(out: &mut W, name: &str, edges: &[f64]) -> Result<()> {
    writeln!(out, "# edges {} {}", name, edges.len())?;
    writeln!(out, "{}", edges.iter().join(" "))?;
    Ok(())
}

fn write_metadata<W: Write>(out: &mut W, meta: &Metadata) -> Result<()> {
    let entries = meta.entries();
    writeln!(out, "# metadata {}", entries.len())?;
    for (name, value) in entries {
        writeln!(out, "{name} {value}")?;
    }
    Ok(())
}

/// Write a 1D spectrum.
pub fn write_1d<W: Write>(
    out: &mut W,
    edges: &[f64],
    columns: &[(&str, &[f64])],
    meta: &Metadata,
) -> Result<()> {
    writeln!(out, "# 1d {}", edges.len().saturating_sub(1))?;
    write_rows(out, columns)?;
    write_edges(out, "k", edges)?;
    write_metadata(out, meta)
}

/// Write a 2D spectrum. Rows run over mu fastest.
pub fn write_2d<W: Write>(
    out: &mut W,
    k_edges: &[f64],
    mu_edges: &[f64],
    columns: &[(&str, &[f64])],
    meta: &Metadata,
) -> Result<()> {
    writeln!(
        out,
        "# 2d {} {}",
        k_edges.len().saturating_sub(1),
        mu_edges.len().saturating_sub(1)
    )?;
    write_rows(out, columns)?;
    write_edges(out, "k", k_edges)?;
    write_edges(out, "mu", mu_edges)?;
    write_metadata(out, meta)
}

/// Write multipoles as a 1D table with columns `k power_<ell>... modes`.
pub fn write_poles<W: Write>(
    out: &mut W,
    edges: &[f64],
    orders: &[usize],
    k: &[f64],
    poles: &[Vec<f64>],
    modes: &[f64],
    meta: &Metadata,
) -> Result<()> {
    let names = orders.iter().map(|ell| format!("power_{ell}")).collect_vec();
    let mut columns: Vec<(&str, &[f64])> = vec![("k", k)];
    columns.extend(names.iter().map(String::as_str).zip(poles.iter().map(Vec::as_slice)));
    columns.push(("modes", modes));
    write_1d(out, edges, &columns, meta)
}

/// Write a halo catalog with columns `label count x y z`.
pub fn write_halos<W: Write>(out: &mut W, halos: &[Halo]) -> Result<()> {
    writeln!(out, "# label count x y z")?;
    for halo in halos {
        writeln!(
            out,
            "{} {} {} {} {}",
            halo.label, halo.count, halo.position[0], halo.position[1], halo.position[2]
        )?;
    }
    Ok(())
}

/// Write a halo catalog in binary form: the number of halos as `i32`, the
/// member counts as `i32`, then the positions as `f32` triples, all in
/// native byte order.
pub fn write_ichalo<W: Write>(out: &mut W, halos: &[Halo]) -> Result<()> {
    let count = i32::try_from(halos.len())
        .map_err(|_| PowerError::Config(format!("{} halos do not fit the format", halos.len())))?;
    let counts = halos
        .iter()
        .map(|halo| i32::try_from(halo.count))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| PowerError::Config("halo member count does not fit the format".to_string()))?;
    let positions = halos
        .iter()
        .flat_map(|halo| halo.position.map(|x| x as f32))
        .collect_vec();

    out.write_all(bytemuck::bytes_of(&count))?;
    out.write_all(bytemuck::cast_slice(&counts))?;
    out.write_all(bytemuck::cast_slice(&positions))?;
    Ok(())
}

/// Read particles from whitespace separated `id label x y z` rows.
///
/// Empty lines and lines starting with `#` are skipped. `name` identifies
/// the source in error messages.
pub fn read_particles<R: BufRead>(reader: R, name: &str) -> Result<Vec<ParticleRecord>> {
    let mut records = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let invalid = |reason: String| {
            PowerError::Config(format!("{name}:{}: {reason}", lineno + 1))
        };

        let columns = line.split_whitespace().collect_vec();
        let [id, label, x, y, z] = columns[..] else {
            return Err(invalid(format!(
                "expected `id label x y z`, got {} columns",
                columns.len()
            )));
        };
        let id = id.parse::<u64>().map_err(|e| invalid(format!("id `{id}`: {e}")))?;
        let label = label
            .parse::<i64>()
            .map_err(|e| invalid(format!("label `{label}`: {e}")))?;
        let mut position = [0.0; 3];
        for (value, token) in position.iter_mut().zip([x, y, z]) {
            *value = token
                .parse::<f64>()
                .map_err(|e| invalid(format!("position `{token}`: {e}")))?;
        }
        records.push(ParticleRecord::new(id, label, position));
    }
    Ok(records)
}

#[cfg(test)]
mod test {
    use super::{
        read_particles, write_1d, write_2d, write_halos, write_ichalo, write_poles, Metadata,
    };
    use crate::error::PowerError;
    use crate::halos::{Halo, ParticleRecord};

    fn meta() -> Metadata {
        Metadata {
            box_size: [2.0, 3.0, 4.0],
            n1: 10,
            n2: 10,
        }
    }

    #[test]
    fn test_write_1d() {
        let mut out = Vec::<u8>::new();
        let k = [0.25, 0.75];
        let power = [f64::NAN, 2.5];
        let modes = [0.0, 6.0];
        write_1d(
            &mut out,
            &[0.0, 0.5, 1.0],
            &[("k", &k[..]), ("power", &power[..]), ("modes", &modes[..])],
            &meta(),
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines = text.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], "# 1d 2");
        assert_eq!(lines[1], "# k power modes");
        assert_eq!(lines[2], "0.25 NaN 0");
        assert_eq!(lines[3], "0.75 2.5 6");
        assert_eq!(lines[4], "# edges k 3");
        assert_eq!(lines[5], "0 0.5 1");
        assert_eq!(lines[6], "# metadata 6");
        assert!(lines.contains(&"volume 24"));
        assert!(lines.contains(&"N2 10"));
    }

    #[test]
    fn test_write_2d_header() {
        let mut out = Vec::<u8>::new();
        let values = [1.0; 4];
        write_2d(
            &mut out,
            &[0.0, 1.0, 2.0],
            &[0.0, 0.5, 1.0],
            &[
                ("k", &values[..]),
                ("mu", &values[..]),
                ("power", &values[..]),
                ("modes", &values[..]),
            ],
            &meta(),
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("# 2d 2 2\n# k mu power modes\n"));
        assert!(text.contains("# edges mu 3\n0 0.5 1\n"));
    }

    #[test]
    fn test_write_poles_columns() {
        let mut out = Vec::<u8>::new();
        write_poles(
            &mut out,
            &[0.0, 1.0],
            &[0, 2],
            &[0.5],
            &[vec![3.0], vec![-1.0]],
            &[12.0],
            &meta(),
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("# k power_0 power_2 modes\n0.5 3 -1 12\n"));
    }

    #[test]
    fn test_write_halos() {
        let mut out = Vec::<u8>::new();
        let halos = [Halo {
            label: 1,
            count: 2,
            position: [0.5, 0.25, 0.0],
        }];
        write_halos(&mut out, &halos).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "# label count x y z\n1 2 0.5 0.25 0\n"
        );
    }

    #[test]
    fn test_write_ichalo() {
        let halos = [
            Halo {
                label: 1,
                count: 3,
                position: [0.5, 0.25, 0.125],
            },
            Halo {
                label: 2,
                count: 0,
                position: [f64::NAN; 3],
            },
        ];
        let mut out = Vec::<u8>::new();
        write_ichalo(&mut out, &halos).unwrap();
        assert_eq!(out.len(), 4 + 2 * 4 + 6 * 4);

        let ints = out[..12]
            .chunks_exact(4)
            .map(|b| i32::from_ne_bytes(b.try_into().unwrap()))
            .collect::<Vec<_>>();
        assert_eq!(ints, vec![2, 3, 0]);
        let floats = out[12..]
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes(b.try_into().unwrap()))
            .collect::<Vec<_>>();
        assert_eq!(&floats[..3], &[0.5, 0.25, 0.125]);
        assert!(floats[3..].iter().all(|x| x.is_nan()));
    }

    #[test]
    fn test_read_particles() {
        let text = "# id label x y z\n3 1 0.5 0.25 0\n\n7 0 1e-3 2 3.5\n";
        let records = read_particles(text.as_bytes(), "catalog.txt").unwrap();
        assert_eq!(
            records,
            vec![
                ParticleRecord::new(3, 1, [0.5, 0.25, 0.0]),
                ParticleRecord::new(7, 0, [1e-3, 2.0, 3.5]),
            ]
        );

        assert!(matches!(
            read_particles("1 2 3\n".as_bytes(), "catalog.txt"),
            Err(PowerError::Config(_))
        ));
        assert!(matches!(
            read_particles("1 x 0 0 0\n".as_bytes(), "catalog.txt"),
            Err(PowerError::Config(_))
        ));
    }
}
