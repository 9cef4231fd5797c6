//! Halo centres at the initial conditions.
//!
//! Halo membership labels come from a snapshot catalog, positions from the
//! initial-condition catalog. Both are sorted by particle ID so that equal
//! global positions hold the same particle, joined, and averaged per label.
//!
//! Precondition: particle IDs are unique and both catalogs contain exactly the
//! same set of IDs. This is validated; a violation is reported on all ranks.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use itertools::{izip, Itertools};
use mpi::{
    collective::SystemOperation,
    traits::{CommunicatorCollectives, Equivalence},
};
use rand::Rng;
use tracing::{debug, info, Level};

use crate::{
    constants::RNG_SEED,
    context::Context,
    error::{PowerError, Result},
    parsort::parsort_by_key,
    storage::read_particles,
    tools::{
        all_reduce_sum_in_place, block_range, gather_to_all, gather_to_root, global_all,
        global_size, redistribute_evenly, seeded_rng,
    },
};

/// Label of particles that belong to no halo.
pub const UNBOUND_LABEL: i64 = 0;

/// A particle with its halo label.
#[derive(Clone, Copy, Debug, PartialEq, Equivalence)]
pub struct ParticleRecord {
    /// Position inside the periodic box.
    pub position: [f64; 3],
    /// Unique particle ID.
    pub id: u64,
    /// Halo label, [UNBOUND_LABEL] for field particles.
    pub label: i64,
}

impl ParticleRecord {
    /// Create a new record.
    pub fn new(id: u64, label: i64, position: [f64; 3]) -> Self {
        Self {
            position,
            id,
            label,
        }
    }
}

/// Particle count and centre of mass of one halo.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Halo {
    /// The halo label.
    pub label: i64,
    /// Number of member particles.
    pub count: u64,
    /// Periodic mean position, `NaN` if the halo has no members.
    pub position: [f64; 3],
}

/// Wrap a displacement to the nearest periodic image.
pub fn minimum_image(d: f64, length: f64) -> f64 {
    d - length * (d / length).round()
}

/// Join two ID-aligned catalogs.
///
/// The result carries the position of `ic` and the label of `snapshot`.
/// Returns the number of misaligned positions as error.
pub fn join_aligned(
    ic: &[ParticleRecord],
    snapshot: &[ParticleRecord],
) -> std::result::Result<Vec<ParticleRecord>, usize> {
    let mismatched = ic.len().abs_diff(snapshot.len())
        + izip!(ic, snapshot).filter(|(a, b)| a.id != b.id).count();
    if mismatched > 0 {
        return Err(mismatched);
    }
    Ok(izip!(ic, snapshot)
        .map(|(a, b)| ParticleRecord::new(a.id, b.label, a.position))
        .collect_vec())
}

/// Summed minimum-image displacements and counts per label.
struct LabelSums {
    counts: Vec<u64>,
    displacements: Vec<f64>,
}

impl LabelSums {
    fn new(nlabels: usize) -> Self {
        Self {
            counts: vec![0; nlabels],
            displacements: vec![0.0; 3 * nlabels],
        }
    }

    fn accumulate(&mut self, records: &[ParticleRecord], references: &[f64], box_size: [f64; 3]) {
        for record in records.iter().filter(|r| r.label > UNBOUND_LABEL) {
            let label = record.label as usize;
            self.counts[label] += 1;
            for axis in 0..3 {
                let d = record.position[axis] - references[3 * label + axis];
                self.displacements[3 * label + axis] += minimum_image(d, box_size[axis]);
            }
        }
    }

    fn halos(&self, references: &[f64], box_size: [f64; 3]) -> Vec<Halo> {
        (1..self.counts.len())
            .map(|label| {
                let count = self.counts[label];
                let mut position = [f64::NAN; 3];
                if count > 0 {
                    for axis in 0..3 {
                        let mean = references[3 * label + axis]
                            + self.displacements[3 * label + axis] / count as f64;
                        position[axis] = mean.rem_euclid(box_size[axis]);
                    }
                }
                Halo {
                    label: label as i64,
                    count,
                    position,
                }
            })
            .collect_vec()
    }
}

/// Count and periodic centre of mass per label on a single rank.
///
/// The first member of every label is its reference point.
pub fn local_centres(records: &[ParticleRecord], box_size: [f64; 3]) -> Vec<Halo> {
    let nlabels = records.iter().map(|r| r.label.max(0) as usize).max().unwrap_or(0) + 1;
    let mut references = vec![0.0; 3 * nlabels];
    let mut seen = vec![false; nlabels];
    for record in records.iter().filter(|r| r.label > UNBOUND_LABEL) {
        let label = record.label as usize;
        if !seen[label] {
            seen[label] = true;
            references[3 * label..3 * label + 3].copy_from_slice(&record.position);
        }
    }

    let mut sums = LabelSums::new(nlabels);
    sums.accumulate(records, &references, box_size);
    sums.halos(&references, box_size)
}

/// Count and periodic centre of mass per label across all ranks.
///
/// Labels `1..=max_label` are reported in order, identically on every rank.
///
/// Collective: all ranks must call this.
pub fn centre_of_mass<C: CommunicatorCollectives>(
    ctx: &Context<'_, C>,
    records: &[ParticleRecord],
    box_size: [f64; 3],
) -> Result<Vec<Halo>> {
    let comm = ctx.comm();
    let rank = ctx.rank();

    // Collective: labels must be non-negative everywhere.
    if !global_all(records.iter().all(|r| r.label >= 0), comm) {
        return Err(PowerError::Config("halo labels must be non-negative".to_string()));
    }

    let local_max = records.iter().map(|r| r.label).max().unwrap_or(0);
    let mut max_label = 0_i64;
    // Collective: agree on the number of labels.
    comm.all_reduce_into(&local_max, &mut max_label, SystemOperation::max());
    let nlabels = max_label as usize + 1;

    // Every label takes its reference point from the lowest rank holding a member.
    let mut owners = vec![ctx.size() as u64; nlabels];
    for record in records {
        owners[record.label as usize] = rank as u64;
    }
    let local_owners = owners.clone();
    // Collective: lowest owning rank per label.
    comm.all_reduce_into(&local_owners[..], &mut owners[..], SystemOperation::min());

    let mut references = vec![0.0; 3 * nlabels];
    for record in records {
        let label = record.label as usize;
        if owners[label] == rank as u64 && label != UNBOUND_LABEL as usize {
            references[3 * label..3 * label + 3].copy_from_slice(&record.position);
        }
    }
    // Collective: exactly one rank contributes a non-zero reference per label.
    all_reduce_sum_in_place(&mut references, comm);

    let mut sums = LabelSums::new(nlabels);
    sums.accumulate(records, &references, box_size);
    // Collective: global sums.
    all_reduce_sum_in_place(&mut sums.counts, comm);
    all_reduce_sum_in_place(&mut sums.displacements, comm);

    Ok(sums.halos(&references, box_size))
}

/// Read an `id label x y z` catalog; every rank keeps its block of rows.
pub fn read_catalog<C: CommunicatorCollectives>(
    path: &Path,
    ctx: &Context<'_, C>,
) -> Result<Vec<ParticleRecord>> {
    let file = BufReader::new(File::open(path)?);
    let mut records = read_particles(file, &path.display().to_string())?;
    let (start, end) = block_range(records.len(), ctx.rank(), ctx.size());
    records.truncate(end);
    Ok(records.split_off(start))
}

/// Locate halo centres at the initial conditions.
///
/// `ic` provides positions, `snapshot` provides labels. Both may be
/// partitioned arbitrarily across ranks, including ranks without records.
///
/// Collective: all ranks must call this. Every check that can fail is
/// evaluated collectively so all ranks return the same error.
pub fn match_catalogs<C: CommunicatorCollectives>(
    ctx: &Context<'_, C>,
    ic: &[ParticleRecord],
    snapshot: &[ParticleRecord],
    box_size: [f64; 3],
) -> Result<Vec<Halo>> {
    let comm = ctx.comm();

    // Collective: catalog sizes.
    let ic_total = global_size(ic, comm);
    let snapshot_total = global_size(snapshot, comm);
    if ic_total != snapshot_total {
        return Err(PowerError::CatalogSizeMismatch {
            ic: ic_total,
            snapshot: snapshot_total,
        });
    }

    let mut rng = seeded_rng(RNG_SEED + ctx.rank() as u64);

    // Collective: sort both catalogs into the same block distribution, so
    // equal global positions sit at equal local positions.
    let snapshot = sort_by_id(snapshot, snapshot_total, comm, &mut rng);
    let ic = sort_by_id(ic, ic_total, comm, &mut rng);
    if ctx.is_root() {
        info!("sorted {} particles by ID", ic_total);
    }

    // Collective: IDs must be unique across the sorted snapshot.
    if !ids_strictly_increasing(&snapshot, comm) {
        return Err(PowerError::Config("particle IDs are not unique".to_string()));
    }

    let (joined, local_mismatch) = match join_aligned(&ic, &snapshot) {
        Ok(joined) => (joined, 0),
        Err(mismatched) => (Vec::new(), mismatched),
    };
    let mut mismatched_ranks = 0_usize;
    // Collective: count ranks with misaligned IDs.
    comm.all_reduce_into(
        &usize::from(local_mismatch > 0),
        &mut mismatched_ranks,
        SystemOperation::sum(),
    );
    if mismatched_ranks > 0 {
        return Err(PowerError::IdMismatch {
            mismatched: mismatched_ranks,
        });
    }

    let halos = centre_of_mass(ctx, &joined, box_size)?;

    if ctx.is_root() {
        info!("total number of halos: {}", halos.len());
        if ctx.enabled(Level::DEBUG) {
            debug!(
                "halo sizes: {:?}",
                halos.iter().map(|halo| halo.count).collect_vec()
            );
        }
    }

    Ok(halos)
}

/// Sort a catalog of `total` records by ID into an even block distribution.
///
/// Catalogs with fewer records than ranks are sorted on root alone.
///
/// Collective: all ranks must call this.
fn sort_by_id<C, R>(
    records: &[ParticleRecord],
    total: usize,
    comm: &C,
    rng: &mut R,
) -> Vec<ParticleRecord>
where
    C: CommunicatorCollectives,
    R: Rng + ?Sized,
{
    if total < comm.size() as usize {
        let mut sorted = gather_to_root(records, comm).unwrap_or_default();
        sorted.sort_by_key(|r| r.id);
        return sorted;
    }

    // The sample sort needs data on every rank, which the even split gives.
    let balanced = redistribute_evenly(records, comm);
    let sorted = parsort_by_key(&balanced, |r| r.id, comm, rng);
    redistribute_evenly(&sorted, comm)
}

fn ids_strictly_increasing<C: CommunicatorCollectives>(
    records: &[ParticleRecord],
    comm: &C,
) -> bool {
    let locally = records
        .iter()
        .tuple_windows()
        .all(|(a, b)| a.id < b.id);

    // The first and last ID of every non-empty rank, in rank order.
    let bounds = match (records.first(), records.last()) {
        (Some(first), Some(last)) => vec![first.id, last.id],
        _ => Vec::new(),
    };
    let bounds = gather_to_all(&bounds, comm);
    let across = bounds
        .chunks(2)
        .tuple_windows()
        .all(|(a, b)| a[1] < b[0]);

    global_all(locally, comm) && across
}

#[cfg(test)]
mod test {
    use itertools::Itertools;

    use super::{join_aligned, local_centres, minimum_image, ParticleRecord};

    fn position(id: u64) -> [f64; 3] {
        [0.1 * id as f64, 0.2, 0.05 * id as f64]
    }

    #[test]
    fn test_sort_and_join_scenario() {
        // IC in scrambled order, snapshot in order, both carry per-ID data.
        let ic = [3_u64, 1, 4, 2]
            .iter()
            .map(|&id| ParticleRecord::new(id, -1, position(id)))
            .collect_vec();
        let snapshot = [1_u64, 2, 3, 4]
            .iter()
            .map(|&id| ParticleRecord::new(id, (id % 2) as i64 + 1, [0.0; 3]))
            .collect_vec();

        let mut ic_sorted = ic.clone();
        ic_sorted.sort_by_key(|r| r.id);
        let mut snapshot_sorted = snapshot.clone();
        snapshot_sorted.sort_by_key(|r| r.id);

        let joined = join_aligned(&ic_sorted, &snapshot_sorted).unwrap();
        for record in &joined {
            assert_eq!(record.position, position(record.id));
            assert_eq!(record.label, (record.id % 2) as i64 + 1);
        }
        assert_eq!(joined.iter().map(|r| r.id).collect_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_join_detects_misalignment() {
        let a = [ParticleRecord::new(1, 0, [0.0; 3]), ParticleRecord::new(2, 0, [0.0; 3])];
        let b = [ParticleRecord::new(1, 0, [0.0; 3]), ParticleRecord::new(3, 0, [0.0; 3])];
        assert_eq!(join_aligned(&a, &b), Err(1));
        assert_eq!(join_aligned(&a, &b[..1]), Err(1));
    }

    #[test]
    fn test_minimum_image() {
        assert!((minimum_image(0.9, 1.0) - -0.1).abs() < 1e-12);
        assert!((minimum_image(-0.7, 1.0) - 0.3).abs() < 1e-12);
        assert_eq!(minimum_image(0.2, 1.0), 0.2);
    }

    #[test]
    fn test_periodic_centre_of_mass() {
        let records = [
            ParticleRecord::new(1, 1, [0.95, 0.5, 0.5]),
            ParticleRecord::new(2, 1, [0.05, 0.5, 0.5]),
            ParticleRecord::new(3, 1, [0.05, 0.6, 0.4]),
            ParticleRecord::new(4, 0, [0.5, 0.5, 0.5]),
            ParticleRecord::new(5, 3, [0.2, 0.2, 0.2]),
        ];
        let halos = local_centres(&records, [1.0; 3]);

        assert_eq!(halos.len(), 3);
        assert_eq!(halos[0].label, 1);
        assert_eq!(halos[0].count, 3);
        let expected = [(0.95 + 1.05 + 1.05) / 3.0 - 1.0, 1.6 / 3.0, 1.4 / 3.0];
        for axis in 0..3 {
            assert!((halos[0].position[axis] - expected[axis]).abs() < 1e-12);
        }

        // Label 2 has no members.
        assert_eq!(halos[1].count, 0);
        assert!(halos[1].position[0].is_nan());

        assert_eq!(halos[2].count, 1);
        assert_eq!(halos[2].position, [0.2, 0.2, 0.2]);
    }
}
