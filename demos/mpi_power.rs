//! Compare a distributed power spectrum with the same measurement on root.

use itertools::{izip, Itertools};
use mpi::{topology::SimpleCommunicator, traits::*};
use nbody_power::{
    combine::samples_close,
    context::{init_logging, Context},
    fields::{DataSource, FieldSpec, Painter},
    power::{write_spectrum, PeriodicPower, PowerConfig, PowerMode, PowerResult},
    tools::gather_to_root,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tracing::Level;

fn assert_same(actual: &PowerResult, expected: &PowerResult) {
    assert_eq!(actual.meta, expected.meta);
    assert_eq!(actual.binned.modes(), expected.binned.modes());
    assert!(samples_close(actual.binned.k(), expected.binned.k(), 1e-10));
    assert!(samples_close(
        actual.binned.power(),
        expected.binned.power(),
        1e-8
    ));

    let (Some(actual), Some(expected)) = (&actual.poles, &expected.poles) else {
        panic!("multipoles missing");
    };
    for (a, b) in izip!(actual.poles(), expected.poles()) {
        assert!(samples_close(a, b, 1e-8));
    }
}

pub fn main() {
    // Initialise MPI
    let universe = mpi::initialize().unwrap();

    // Get the world communicator
    let comm = universe.world();

    init_logging(Level::INFO);
    let ctx = Context::new(&comm, Level::INFO);

    // Initialise a seeded Rng.
    let mut rng = ChaCha8Rng::seed_from_u64(comm.rank() as u64);

    // Two independent catalogs in an anisotropic box.
    let box_size = [100.0, 120.0, 80.0];
    let npoints = 500;
    let first = (0..npoints)
        .map(|_| box_size.map(|l| rng.gen_range(0.0..l)))
        .collect_vec();
    let second = (0..npoints)
        .map(|_| box_size.map(|l| rng.gen_range(0.0..l)))
        .collect_vec();

    let config = PowerConfig::new(PowerMode::TwoD, box_size, 16).with_poles(vec![0, 2, 4]);
    let algorithm = PeriodicPower::new(config);

    let auto_field = FieldSpec::new(DataSource::Catalog(first.clone()));
    let cross_field = FieldSpec::new(DataSource::Catalog(second.clone())).with_painter(Painter::Ngp);

    let auto = algorithm.run(&[auto_field.clone()], &ctx).unwrap();
    let cross = algorithm
        .run(&[auto_field.clone(), cross_field], &ctx)
        .unwrap();

    // Two identical fields give the auto power.
    let repeated = algorithm
        .run(&[auto_field.clone(), auto_field], &ctx)
        .unwrap();
    assert_same(&repeated, &auto);

    // Copy all particles to root and repeat the measurement there.

    if let (Some(first_root), Some(second_root)) =
        (gather_to_root(&first, &comm), gather_to_root(&second, &comm))
    {
        let local = SimpleCommunicator::self_comm();
        let serial_ctx = Context::new(&local, Level::WARN);

        let auto_field = FieldSpec::new(DataSource::Catalog(first_root));
        let cross_field =
            FieldSpec::new(DataSource::Catalog(second_root)).with_painter(Painter::Ngp);

        let expected = algorithm.run(&[auto_field.clone()], &serial_ctx).unwrap();
        assert_same(&auto, &expected);

        let expected = algorithm
            .run(&[auto_field, cross_field], &serial_ctx)
            .unwrap();
        assert_same(&cross, &expected);

        write_spectrum(&mut std::io::stdout(), &auto).unwrap();
        println!("Distributed power matches the serial measurement.");
    }
}
