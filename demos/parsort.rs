//! Testing the samplesort component.
use itertools::Itertools;
use mpi::traits::Communicator;
use nbody_power::{
    halos::ParticleRecord,
    parsort::{parsort, parsort_by_key},
    tools::{global_size, is_sorted_array},
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

pub fn main() {
    let universe = mpi::initialize().unwrap();
    let world = universe.world();
    let n_per_rank = 1000;

    let mut rng = ChaCha8Rng::seed_from_u64(world.rank() as u64);

    // Plain keys, with repetitions.

    let keys = (0..n_per_rank)
        .map(|_| rng.gen_range(0..5000_u64))
        .collect_vec();

    let arr = parsort(&keys, &world, &mut rng);

    assert!(is_sorted_array(&arr, &world));
    assert_eq!(global_size(&arr, &world), n_per_rank * world.size() as usize);

    // Records sorted by ID keep their payload.

    let records = keys
        .iter()
        .enumerate()
        .map(|(i, &key)| {
            let id = key * world.size() as u64 * n_per_rank as u64
                + (world.rank() as usize * n_per_rank + i) as u64;
            ParticleRecord::new(id, (id % 7) as i64, [id as f64; 3])
        })
        .collect_vec();

    let sorted = parsort_by_key(&records, |r| r.id, &world, &mut rng);
    let ids = sorted.iter().map(|r| r.id).collect_vec();

    assert!(is_sorted_array(&ids, &world));
    for record in &sorted {
        assert_eq!(record.label, (record.id % 7) as i64);
        assert_eq!(record.position, [record.id as f64; 3]);
    }

    if world.rank() == 0 {
        println!("Array is sorted.");
    }
}
