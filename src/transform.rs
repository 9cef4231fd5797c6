//! Forward real-to-complex transform of a slab-decomposed mesh.

use std::sync::Arc;

use mpi::traits::CommunicatorCollectives;
use num::complex::Complex64;
use rustfft::{Fft, FftPlanner};
use tracing::debug;

use crate::{
    context::Context,
    error::Result,
    mesh::{FourierGrid, MeshDescriptor, RealGrid, SlabLayout},
    tools::gather_to_all,
};

/// A forward transform producing the half-space Fourier slab.
///
/// The output has the same slab layout as the input and is normalised by
/// `1 / N^3`, so the zero mode holds the mean of the real field.
pub trait Transform {
    /// Transform the local slab.
    ///
    /// Collective: all ranks must call this.
    fn r2c<C: CommunicatorCollectives>(
        &self,
        real: &RealGrid,
        ctx: &Context<'_, C>,
    ) -> Result<FourierGrid>;
}

/// Reference transform that assembles the full mesh on every rank.
///
/// Memory and work grow with `N^3` per rank. Suitable for checks and small
/// meshes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReplicatedFft;

impl Transform for ReplicatedFft {
    fn r2c<C: CommunicatorCollectives>(
        &self,
        real: &RealGrid,
        ctx: &Context<'_, C>,
    ) -> Result<FourierGrid> {
        let mesh = *real.mesh();
        let n = mesh.nmesh();

        // Collective: slabs are ordered by rank, so the gather yields the full mesh.
        let full = gather_to_all(real.values(), ctx.comm());
        debug!(rank = ctx.rank(), "transforming {}^3 mesh", n);

        let mut data = full
            .iter()
            .map(|&v| Complex64::new(v, 0.0))
            .collect::<Vec<_>>();
        fft3d(&mut data, n);

        FourierGrid::from_values(mesh, *real.layout(), half_space_slab(&data, &mesh, real.layout()))
    }
}

/// In-place forward 3D FFT of a row-major `N^3` cube, unnormalised.
pub fn fft3d(data: &mut [Complex64], n: usize) {
    assert_eq!(data.len(), n * n * n);
    let mut planner = FftPlanner::<f64>::new();
    let fft: Arc<dyn Fft<f64>> = planner.plan_fft_forward(n);
    let mut scratch = vec![Complex64::default(); fft.get_inplace_scratch_len()];

    // z is contiguous; all lines at once.
    fft.process_with_scratch(data, &mut scratch);

    let mut line = vec![Complex64::default(); n];

    // y lines
    for ix in 0..n {
        for iz in 0..n {
            for iy in 0..n {
                line[iy] = data[(ix * n + iy) * n + iz];
            }
            fft.process_with_scratch(&mut line, &mut scratch);
            for iy in 0..n {
                data[(ix * n + iy) * n + iz] = line[iy];
            }
        }
    }

    // x lines
    for iy in 0..n {
        for iz in 0..n {
            for ix in 0..n {
                line[ix] = data[(ix * n + iy) * n + iz];
            }
            fft.process_with_scratch(&mut line, &mut scratch);
            for ix in 0..n {
                data[(ix * n + iy) * n + iz] = line[ix];
            }
        }
    }
}

/// Extract the normalised half-space slab owned by `layout` from a full
/// transformed cube.
pub fn half_space_slab(
    full: &[Complex64],
    mesh: &MeshDescriptor,
    layout: &SlabLayout,
) -> Vec<Complex64> {
    let n = mesh.nmesh();
    let norm = 1.0 / (n * n * n) as f64;
    let mut values = Vec::with_capacity(layout.planes() * n * mesh.half_len());
    for ix in layout.start()..layout.end() {
        for iy in 0..n {
            let row = (ix * n + iy) * n;
            values.extend(full[row..row + mesh.half_len()].iter().map(|&v| v * norm));
        }
    }
    values
}

#[cfg(test)]
mod test {
    use std::f64::consts::PI;

    use num::complex::Complex64;

    use super::{fft3d, half_space_slab};
    use crate::mesh::{FourierGrid, MeshDescriptor, SlabLayout};

    fn cube(n: usize, f: impl Fn(usize, usize, usize) -> f64) -> Vec<Complex64> {
        let mut data = Vec::with_capacity(n * n * n);
        for ix in 0..n {
            for iy in 0..n {
                for iz in 0..n {
                    data.push(Complex64::new(f(ix, iy, iz), 0.0));
                }
            }
        }
        data
    }

    #[test]
    fn test_constant_field_has_only_dc() {
        let n = 4;
        let mesh = MeshDescriptor::cubic(1.0, n).unwrap();
        let mut data = cube(n, |_, _, _| 3.0);
        fft3d(&mut data, n);
        let values = half_space_slab(&data, &mesh, &SlabLayout::whole(n));

        assert!((values[0] - Complex64::new(3.0, 0.0)).norm() < 1e-12);
        assert!(values[1..].iter().all(|v| v.norm() < 1e-12));
    }

    #[test]
    fn test_single_cosine_mode() {
        let n = 8;
        let mesh = MeshDescriptor::cubic(1.0, n).unwrap();
        let mut data = cube(n, |ix, _, iz| {
            (2.0 * PI * ix as f64 / n as f64).cos() + (2.0 * PI * 2.0 * iz as f64 / n as f64).cos()
        });
        fft3d(&mut data, n);

        // Split over two ranks and check the slab holding the mode.
        for rank in 0..2 {
            let layout = SlabLayout::new(n, rank, 2);
            let grid =
                FourierGrid::from_values(mesh, layout, half_space_slab(&data, &mesh, &layout))
                    .unwrap();
            for offset in 0..grid.len() {
                let index = grid.global_index(offset);
                let expected = match index {
                    [1, 0, 0] | [7, 0, 0] | [0, 0, 2] => 0.5,
                    _ => 0.0,
                };
                assert!((grid.values()[offset] - Complex64::new(expected, 0.0)).norm() < 1e-12);
            }
        }
    }
}
