//! Mesh geometry, slab decomposition and wavevectors.
//!
//! The real-space mesh is decomposed into slabs of contiguous x-planes. The
//! Fourier mesh uses the same decomposition. Since the input of the forward
//! transform is real, only the half space `0..=N/2` is stored along z, the
//! last (contiguous) axis.

use std::f64::consts::PI;
use std::fmt::Display;
use std::str::FromStr;

use num::complex::Complex64;
use num::Zero;

use crate::error::{PowerError, Result};

/// A Cartesian axis, used to select the line of sight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Axis {
    /// The x axis (slab axis).
    X,
    /// The y axis.
    Y,
    /// The z axis (half-space axis).
    #[default]
    Z,
}

impl Axis {
    /// Index of the axis into a 3-vector.
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl FromStr for Axis {
    type Err = PowerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            other => Err(PowerError::Config(format!(
                "line of sight must be one of x, y, z, got `{other}`"
            ))),
        }
    }
}

impl Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        };
        write!(f, "{}", name)
    }
}

/// Box lengths and resolution of a periodic mesh.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshDescriptor {
    box_size: [f64; 3],
    nmesh: usize,
}

impl MeshDescriptor {
    /// Create a new mesh descriptor.
    ///
    /// Fails if `nmesh` is zero or a box length is not finite and positive.
    pub fn new(box_size: [f64; 3], nmesh: usize) -> Result<Self> {
        if nmesh == 0 {
            return Err(PowerError::InvalidMeshResolution(nmesh));
        }
        for (axis, &length) in box_size.iter().enumerate() {
            if !(length.is_finite() && length > 0.0) {
                return Err(PowerError::InvalidBoxSize { axis, length });
            }
        }
        Ok(Self { box_size, nmesh })
    }

    /// Create a descriptor for a cubic box.
    pub fn cubic(length: f64, nmesh: usize) -> Result<Self> {
        Self::new([length; 3], nmesh)
    }

    /// Box length per axis.
    pub fn box_size(&self) -> [f64; 3] {
        self.box_size
    }

    /// Number of cells per axis.
    pub fn nmesh(&self) -> usize {
        self.nmesh
    }

    /// Number of stored planes along the half-space axis.
    pub fn half_len(&self) -> usize {
        self.nmesh / 2 + 1
    }

    /// Box volume.
    pub fn volume(&self) -> f64 {
        self.box_size.iter().product()
    }

    /// Smallest box length.
    pub fn min_length(&self) -> f64 {
        self.box_size.into_iter().reduce(f64::min).unwrap_or(0.0)
    }

    /// Fundamental frequency of the shortest axis.
    pub fn fundamental(&self) -> f64 {
        2.0 * PI / self.min_length()
    }

    /// Nyquist frequency of the shortest axis.
    pub fn nyquist(&self) -> f64 {
        PI * self.nmesh as f64 / self.min_length()
    }

    /// Signed frequency indices of a global cell index.
    pub fn frequency(&self, index: [usize; 3]) -> [i64; 3] {
        index.map(|i| frequency_index(i, self.nmesh))
    }

    /// Wavevector of a global cell index.
    pub fn wavevector(&self, index: [usize; 3]) -> [f64; 3] {
        wavevector(index, self.nmesh, self.box_size)
    }
}

/// Map a zero-based cell index to its signed frequency.
///
/// Indices in `[0, N/2]` map to themselves, indices in `(N/2, N)` to `i - N`.
pub fn frequency_index(index: usize, nmesh: usize) -> i64 {
    if index <= nmesh / 2 {
        index as i64
    } else {
        index as i64 - nmesh as i64
    }
}

/// Wavevector `2π n / L` per axis of a global cell index.
pub fn wavevector(index: [usize; 3], nmesh: usize, box_size: [f64; 3]) -> [f64; 3] {
    let mut k = [0.0; 3];
    for axis in 0..3 {
        k[axis] = 2.0 * PI * frequency_index(index[axis], nmesh) as f64 / box_size[axis];
    }
    k
}

/// Magnitude of a wavevector and its direction cosine with the line of sight.
///
/// The cosine is defined as zero at the origin.
pub fn magnitude_and_mu(k: [f64; 3], los: Axis) -> (f64, f64) {
    let norm = (k[0] * k[0] + k[1] * k[1] + k[2] * k[2]).sqrt();
    if norm > 0.0 {
        // Rounding may push |k_los| / |k| a hair above one.
        (norm, (k[los.index()] / norm).clamp(-1.0, 1.0))
    } else {
        (0.0, 0.0)
    }
}

/// Number of physical modes a stored cell represents.
///
/// Cells on the z = 0 plane and, for even `N`, on the z = N/2 plane have
/// their conjugate partner stored explicitly. Every other stored cell also
/// stands for its unstored partner at negated indices.
pub fn hermitian_weight(iz: usize, nmesh: usize) -> u8 {
    if iz == 0 || (nmesh % 2 == 0 && iz == nmesh / 2) {
        1
    } else {
        2
    }
}

/// Contiguous range of x-planes owned by one rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlabLayout {
    nmesh: usize,
    start: usize,
    end: usize,
}

impl SlabLayout {
    /// Block decomposition of `nmesh` planes over `size` ranks.
    ///
    /// Rank `r` owns the planes `[r N / p, (r + 1) N / p)`.
    pub fn new(nmesh: usize, rank: usize, size: usize) -> Self {
        assert!(size > 0 && rank < size);
        Self {
            nmesh,
            start: rank * nmesh / size,
            end: (rank + 1) * nmesh / size,
        }
    }

    /// A layout owning the complete mesh.
    pub fn whole(nmesh: usize) -> Self {
        Self::new(nmesh, 0, 1)
    }

    /// A layout owning an explicit range of planes.
    pub fn from_range(nmesh: usize, start: usize, end: usize) -> Self {
        assert!(start <= end && end <= nmesh);
        Self { nmesh, start, end }
    }

    /// First owned plane.
    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last owned plane.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of owned planes.
    pub fn planes(&self) -> usize {
        self.end - self.start
    }

    /// True if the global plane `x` is owned.
    pub fn contains(&self, x: usize) -> bool {
        self.start <= x && x < self.end
    }

    /// Mesh resolution the layout was built for.
    pub fn nmesh(&self) -> usize {
        self.nmesh
    }
}

/// A stored Fourier cell as seen by the binning engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mode {
    /// Global cell index.
    pub index: [usize; 3],
    /// Wavevector.
    pub k: [f64; 3],
    /// Hermitian multiplicity, 1 or 2.
    pub weight: u8,
}

/// Local slab of a distributed real-space mesh.
///
/// Values are stored row-major with shape `[planes, N, N]`.
#[derive(Clone, Debug)]
pub struct RealGrid {
    mesh: MeshDescriptor,
    layout: SlabLayout,
    data: Vec<f64>,
}

impl RealGrid {
    /// Create a zeroed slab.
    pub fn zeros(mesh: MeshDescriptor, layout: SlabLayout) -> Self {
        let n = mesh.nmesh();
        Self {
            mesh,
            layout,
            data: vec![0.0; layout.planes() * n * n],
        }
    }

    /// Wrap existing slab values.
    pub fn from_values(mesh: MeshDescriptor, layout: SlabLayout, data: Vec<f64>) -> Result<Self> {
        let n = mesh.nmesh();
        if data.len() != layout.planes() * n * n {
            return Err(PowerError::SampleCountMismatch {
                samples: data.len(),
                cells: layout.planes() * n * n,
            });
        }
        Ok(Self { mesh, layout, data })
    }

    /// Mesh descriptor.
    pub fn mesh(&self) -> &MeshDescriptor {
        &self.mesh
    }

    /// Slab layout.
    pub fn layout(&self) -> &SlabLayout {
        &self.layout
    }

    /// Local values.
    pub fn values(&self) -> &[f64] {
        &self.data
    }

    /// Mutable local values.
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

/// Local slab of a distributed half-space Fourier mesh.
///
/// Values are stored row-major with shape `[planes, N, N/2 + 1]`.
#[derive(Clone, Debug)]
pub struct FourierGrid {
    mesh: MeshDescriptor,
    layout: SlabLayout,
    data: Vec<Complex64>,
}

impl FourierGrid {
    /// Create a zeroed slab.
    pub fn zeros(mesh: MeshDescriptor, layout: SlabLayout) -> Self {
        let len = layout.planes() * mesh.nmesh() * mesh.half_len();
        Self {
            mesh,
            layout,
            data: vec![Complex64::zero(); len],
        }
    }

    /// Wrap existing slab values.
    pub fn from_values(
        mesh: MeshDescriptor,
        layout: SlabLayout,
        data: Vec<Complex64>,
    ) -> Result<Self> {
        let cells = layout.planes() * mesh.nmesh() * mesh.half_len();
        if data.len() != cells {
            return Err(PowerError::SampleCountMismatch {
                samples: data.len(),
                cells,
            });
        }
        Ok(Self { mesh, layout, data })
    }

    /// Mesh descriptor.
    pub fn mesh(&self) -> &MeshDescriptor {
        &self.mesh
    }

    /// Slab layout.
    pub fn layout(&self) -> &SlabLayout {
        &self.layout
    }

    /// Shape of the local slab.
    pub fn local_shape(&self) -> [usize; 3] {
        [self.layout.planes(), self.mesh.nmesh(), self.mesh.half_len()]
    }

    /// Number of local cells.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if this rank owns no cells.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Local values.
    pub fn values(&self) -> &[Complex64] {
        &self.data
    }

    /// Mutable local values.
    pub fn values_mut(&mut self) -> &mut [Complex64] {
        &mut self.data
    }

    /// True if `other` has the same mesh and slab layout.
    pub fn same_layout(&self, other: &FourierGrid) -> bool {
        self.mesh == other.mesh && self.layout == other.layout
    }

    /// Global index of a flat local offset.
    pub fn global_index(&self, offset: usize) -> [usize; 3] {
        let n = self.mesh.nmesh();
        let nz = self.mesh.half_len();
        let iz = offset % nz;
        let iy = (offset / nz) % n;
        let ix = offset / (nz * n) + self.layout.start();
        [ix, iy, iz]
    }

    /// Flat local offset of a global index, if this rank stores it.
    pub fn local_offset(&self, index: [usize; 3]) -> Option<usize> {
        let n = self.mesh.nmesh();
        let nz = self.mesh.half_len();
        if !self.layout.contains(index[0]) || index[1] >= n || index[2] >= nz {
            return None;
        }
        Some(((index[0] - self.layout.start()) * n + index[1]) * nz + index[2])
    }

    /// Value at a global index, if stored locally.
    pub fn get(&self, index: [usize; 3]) -> Option<Complex64> {
        self.local_offset(index).map(|offset| self.data[offset])
    }

    /// Mutable value at a global index, if stored locally.
    pub fn get_mut(&mut self, index: [usize; 3]) -> Option<&mut Complex64> {
        self.local_offset(index).map(|offset| &mut self.data[offset])
    }

    /// Iterate over the local cells in storage order.
    pub fn modes(&self) -> impl Iterator<Item = Mode> + '_ {
        let nmesh = self.mesh.nmesh();
        (0..self.data.len()).map(move |offset| {
            let index = self.global_index(offset);
            Mode {
                index,
                k: self.mesh.wavevector(index),
                weight: hermitian_weight(index[2], nmesh),
            }
        })
    }
}
