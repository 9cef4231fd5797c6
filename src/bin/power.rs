//! Periodic power spectrum calculator via FFT.
//!
//! Usage: `mpirun -n 4 power 2d 1000 64 pk.dat Random:npart=100000 --poles 0,2,4`
//! or `mpirun -n 4 power -c run.toml`.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, Level};

use nbody_power::{
    combine::CrossConvention,
    config::{BoxSize, RunFile},
    context::{init_logging, Context},
    fields::{parse_fields, FieldSpec},
    mesh::Axis,
    power::{PeriodicPower, PowerConfig, PowerMode},
    PowerError, Result,
};

#[derive(Parser, Debug)]
#[command(name = "power")]
#[command(about = "Periodic power spectrum calculator via FFT")]
struct Args {
    /// Compute the power as a function of `k` (1d) or of `k` and `mu` (2d)
    #[arg(required_unless_present = "config")]
    mode: Option<PowerMode>,

    /// Box length, either one value or `Lx,Ly,Lz`
    #[arg(required_unless_present = "config")]
    box_size: Option<BoxSize>,

    /// Number of cells per axis of the mesh
    #[arg(required_unless_present = "config")]
    nmesh: Option<usize>,

    /// Write the power to this file; `-` for stdout
    #[arg(required_unless_present = "config")]
    output: Option<String>,

    /// `DataSource [Painter] [Transfer...]`, optionally twice for cross power
    #[arg(required_unless_present = "config", num_args = 1..)]
    fields: Vec<String>,

    /// Read the run from a TOML file; the options below override its entries
    #[arg(short, long, conflicts_with_all = ["mode", "box_size", "nmesh", "output", "fields"])]
    config: Option<PathBuf>,

    /// Line of sight that `mu` is measured against [default: z]
    #[arg(long)]
    los: Option<Axis>,

    /// Number of mu bins in [0, 1]; forced to 1 in 1d mode [default: 5]
    #[arg(long)]
    nmu: Option<usize>,

    /// Width of the k bins; the fundamental mode of the box if unset
    #[arg(long)]
    dk: Option<f64>,

    /// Lower edge of the first k bin [default: 0]
    #[arg(long)]
    kmin: Option<f64>,

    /// Also compute these multipoles from P(k, mu), e.g. `0,2,4`
    #[arg(long, value_delimiter = ',')]
    poles: Vec<usize>,

    /// Cross power convention: `real` or `geometric` [default: real]
    #[arg(long)]
    cross: Option<CrossConvention>,

    /// Silence the logging output
    #[arg(short, long)]
    quiet: bool,
}

/// Options, fields and output path from the run file or the positional arguments.
fn settings(args: &Args) -> Result<(PowerConfig, Vec<FieldSpec>, String)> {
    let (mut config, fields, output) = match &args.config {
        Some(path) => {
            let file = RunFile::load(path)?;
            (file.power_config()?, file.fields()?, file.output.clone())
        }
        None => match (args.mode, args.box_size, args.nmesh, &args.output) {
            (Some(mode), Some(box_size), Some(nmesh), Some(output)) => (
                PowerConfig::new(mode, box_size.lengths(), nmesh),
                parse_fields(&args.fields)?,
                output.clone(),
            ),
            _ => {
                return Err(PowerError::Config(
                    "mode, box size, mesh size and output are required".to_string(),
                ))
            }
        },
    };

    if let Some(los) = args.los {
        config = config.with_los(los);
    }
    if let Some(nmu) = args.nmu {
        config = config.with_nmu(nmu);
    }
    if let Some(dk) = args.dk {
        config = config.with_dk(dk);
    }
    if let Some(kmin) = args.kmin {
        config = config.with_kmin(kmin);
    }
    if !args.poles.is_empty() {
        config = config.with_poles(args.poles.clone());
    }
    if let Some(cross) = args.cross {
        config = config.with_cross(cross);
    }
    Ok((config, fields, output))
}

fn run<C: mpi::traits::CommunicatorCollectives>(args: &Args, ctx: &Context<'_, C>) -> Result<()> {
    let (config, fields, output) = settings(args)?;
    let algorithm = PeriodicPower::new(config);
    let result = algorithm.run(&fields, ctx)?;
    algorithm.save(&result, &output, ctx)
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
