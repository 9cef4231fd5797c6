//! Initial-condition positions of halos.
//!
//! The IC position of a halo is the periodic centre of mass of its member
//! particles at the initial conditions. Both catalogs hold `id label x y z`
//! rows; labels are taken from the snapshot, positions from the IC.
//!
//! Usage: `mpirun -n 4 ichalo ic.txt snapshot.txt halos` writes `halos.ichalo`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use itertools::Itertools;
use tracing::{error, info, Level};

use nbody_power::{
    config::BoxSize,
    context::{init_logging, Context},
    halos::{match_catalogs, read_catalog},
    storage::{write_halos, write_ichalo},
    Result,
};

#[derive(Parser, Debug)]
#[command(name = "ichalo")]
#[command(about = "Finding IC position of halos")]
struct Args {
    /// Initial-condition catalog with `id label x y z` rows
    ic: PathBuf,

    /// Snapshot catalog with `id label x y z` rows; provides the labels
    snapshot: PathBuf,

    /// Basename of the output; `.ichalo` is appended
    output: String,

    /// Box length, either one value or `Lx,Ly,Lz`
    #[arg(long, default_value = "1.0")]
    box_size: BoxSize,

    /// Also write the halos as text to this file
    #[arg(long)]
    text: Option<PathBuf>,

    /// Silence the logging output
    #[arg(short, long)]
    quiet: bool,
}

fn run<C: mpi::traits::CommunicatorCollectives>(args: &Args, ctx: &Context<'_, C>) -> Result<()> {
    let ic = read_catalog(&args.ic, ctx)?;
    let snapshot = read_catalog(&args.snapshot, ctx)?;

    let halos = match_catalogs(ctx, &ic, &snapshot, args.box_size.lengths())?;

    if ctx.is_root() {
        info!("N {:?}", halos.iter().map(|halo| halo.count).collect_vec());

        let path = format!("{}.ichalo", args.output);
        let mut out = BufWriter::new(File::create(&path)?);
        write_ichalo(&mut out, &halos)?;
        out.flush()?;
        info!("written {path}");

        if let Some(text) = &args.text {
            let mut out = BufWriter::new(File::create(text)?);
            write_halos(&mut out, &halos)?;
            out.flush()?;
            info!("written {}", text.display());
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let level = if args.quiet { Level::ERROR } else { Level::INFO };
    init_logging(level);

    let Some(universe) = mpi::initialize() else {
        error!("failed to initialise MPI");
        process::exit(1);
    };
    let world = universe.world();
    let ctx = Context::new(&world, level);

    let status = match run(&args, &ctx) {
        Ok(()) => 0,
        Err(e) => {
            if ctx.is_root() {
                error!("{e}");
            }
            1
        }
    };

    drop(universe);
    process::exit(status);
}
