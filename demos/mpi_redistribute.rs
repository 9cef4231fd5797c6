//! Test the even redistribution of a globally ordered array.

use itertools::Itertools;
use mpi::traits::*;
use nbody_power::tools::{
    block_range, gather_to_root, global_offset, global_size, redistribute_evenly,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

pub fn main() {
    // Initialise MPI
    let universe = mpi::initialize().unwrap();

    // Get the world communicator
    let comm = universe.world();
    let rank = comm.rank() as usize;
    let size = comm.size() as usize;

    // Initialise a seeded Rng.
    let mut rng = ChaCha8Rng::seed_from_u64(comm.rank() as u64);

    // An uneven number of elements per rank, possibly zero.
    let nelems = rng.gen_range(0..20);

    // Global positions as values.

    let offset = global_offset(nelems, &comm);
    let elems = (offset..offset + nelems).collect_vec();

    let total = global_size(&elems, &comm);
    let even = redistribute_evenly(&elems, &comm);

    // Every rank now holds its block of global positions.

    let (start, end) = block_range(total, rank, size);
    assert_eq!(even, (start..end).collect_vec());

    if let Some(all) = gather_to_root(&even, &comm) {
        assert_eq!(all, (0..total).collect_vec());
        println!("Array redistributed evenly.");
    }
}
