//! Locate halo centres across ranks and compare with a computation on root.

use itertools::{izip, Itertools};
use mpi::traits::*;
use nbody_power::{
    context::{init_logging, Context},
    halos::{join_aligned, local_centres, match_catalogs, Halo, ParticleRecord},
    storage::write_halos,
    tools::{block_range, gather_to_root},
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tracing::Level;

const BOX: f64 = 10.0;
const NLABELS: u64 = 5;

/// Members of a halo scatter around a centre that sits near the box edge.
fn position(id: u64) -> [f64; 3] {
    let label = id % NLABELS;
    let mut rng = ChaCha8Rng::seed_from_u64(id);
    let centre = [0.1 + 2.0 * label as f64, 9.9, 0.3 + 0.05 * label as f64];
    centre.map(|c| (c + rng.gen_range(-0.5..0.5_f64)).rem_euclid(BOX))
}

fn assert_halos_close(actual: &[Halo], expected: &[Halo]) {
    assert_eq!(actual.len(), expected.len());
    for (actual, expected) in izip!(actual, expected) {
        assert_eq!(actual.label, expected.label);
        assert_eq!(actual.count, expected.count);
        for axis in 0..3 {
            assert!((actual.position[axis] - expected.position[axis]).abs() < 1e-10);
        }
    }
}

/// Shuffled IC blocks against a round robin snapshot. Rank 1 holds no IC
/// particles at all.
fn test_shuffled_catalogs<C: CommunicatorCollectives>(ctx: &Context<'_, C>) {
    let comm = ctx.comm();
    let rank = ctx.rank();
    let size = ctx.size();
    let total = 200 * size;

    // The IC catalog holds a shuffled block of IDs per rank; rank 0 also
    // takes the block of rank 1.
    let mut rng = ChaCha8Rng::seed_from_u64(rank as u64);
    let (start, end) = match rank {
        0 => (0, block_range(total, 1.min(size - 1), size).1),
        1 => (0, 0),
        _ => block_range(total, rank, size),
    };
    let mut ic = (start as u64..end as u64)
        .map(|id| ParticleRecord::new(id, -1, position(id)))
        .collect_vec();
    ic.shuffle(&mut rng);

    // The snapshot is partitioned round robin and carries the labels.
    let snapshot = (0..total as u64)
        .filter(|id| *id as usize % size == rank)
        .map(|id| ParticleRecord::new(id, (id % NLABELS) as i64, [0.0; 3]))
        .collect_vec();

    let halos = match_catalogs(ctx, &ic, &snapshot, [BOX; 3]).unwrap();

    // Copy both catalogs to root and join them there.

    if let (Some(mut ic_root), Some(mut snapshot_root)) =
        (gather_to_root(&ic, comm), gather_to_root(&snapshot, comm))
    {
        ic_root.sort_by_key(|r| r.id);
        snapshot_root.sort_by_key(|r| r.id);
        let joined = join_aligned(&ic_root, &snapshot_root).unwrap();
        let expected = local_centres(&joined, [BOX; 3]);

        assert_halos_close(&halos, &expected);
        write_halos(&mut std::io::stdout(), &halos).unwrap();
        println!("Halo centres of shuffled catalogs match.");
    }
}

/// Four particles: the IC in order `[3, 1, 4, 2]` on rank 0, the snapshot in
/// order `[1, 2, 3, 4]` on the last rank.
fn test_four_particles<C: CommunicatorCollectives>(ctx: &Context<'_, C>) {
    let coords = |id: u64| [0.1 * id as f64, 0.2, 0.05 * id as f64];
    let label = |id: u64| (id % 2) as i64 + 1;

    let ic = if ctx.is_root() {
        [3_u64, 1, 4, 2]
            .iter()
            .map(|&id| ParticleRecord::new(id, -1, coords(id)))
            .collect_vec()
    } else {
        Vec::new()
    };
    let snapshot = if ctx.rank() == ctx.size() - 1 {
        [1_u64, 2, 3, 4]
            .iter()
            .map(|&id| ParticleRecord::new(id, label(id), [0.0; 3]))
            .collect_vec()
    } else {
        Vec::new()
    };

    let halos = match_catalogs(ctx, &ic, &snapshot, [1.0; 3]).unwrap();

    // Label 1 holds IDs 2 and 4, label 2 holds IDs 1 and 3.
    let expected = [
        Halo {
            label: 1,
            count: 2,
            position: [0.3, 0.2, 0.15],
        },
        Halo {
            label: 2,
            count: 2,
            position: [0.2, 0.2, 0.1],
        },
    ];
    assert_halos_close(&halos, &expected);

    if ctx.is_root() {
        println!("Four particle halo centres match.");
    }
}

/// A single particle, fewer than ranks whenever more than one rank runs.
fn test_single_particle<C: CommunicatorCollectives>(ctx: &Context<'_, C>) {
    let record = ParticleRecord::new(7, 1, [9.5, 0.5, 5.0]);
    let ic = if ctx.is_root() { vec![record] } else { Vec::new() };
    let snapshot = if ctx.rank() == ctx.size() - 1 {
        vec![record]
    } else {
        Vec::new()
    };

    let halos = match_catalogs(ctx, &ic, &snapshot, [BOX; 3]).unwrap();
    assert_halos_close(
        &halos,
        &[Halo {
            label: 1,
            count: 1,
            position: [9.5, 0.5, 5.0],
        }],
    );

    if ctx.is_root() {
        println!("Single particle halo matches.");
    }
}

pub fn main() {
    // Initialise MPI
    let universe = mpi::initialize().unwrap();

    // Get the world communicator
    let comm = universe.world();

    init_logging(Level::INFO);
    let ctx = Context::new(&comm, Level::INFO);

    test_shuffled_catalogs(&ctx);
    test_four_particles(&ctx);
    test_single_particle(&ctx);
}
