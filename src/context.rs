//! Execution context handed to every distributed entry point.

use mpi::traits::CommunicatorCollectives;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Rank of the worker that writes output and emits progress messages.
pub const ROOT_RANK: usize = 0;

/// Read-only run context.
///
/// Created once at process start. It bundles the communicator with the
/// rank, the number of ranks and the requested log level so that no routine
/// reaches for global state.
pub struct Context<'c, C> {
    comm: &'c C,
    rank: usize,
    size: usize,
    log_level: Level,
}

impl<'c, C: CommunicatorCollectives> Context<'c, C> {
    /// Create a new context on top of a communicator.
    pub fn new(comm: &'c C, log_level: Level) -> Self {
        Self {
            comm,
            rank: comm.rank() as usize,
            size: comm.size() as usize,
            log_level,
        }
    }

    /// Return the communicator.
    pub fn comm(&self) -> &C {
        self.comm
    }

    /// Rank of this worker.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// True on the rank that writes output.
    pub fn is_root(&self) -> bool {
        self.rank == ROOT_RANK
    }

    /// Requested log level.
    pub fn log_level(&self) -> Level {
        self.log_level
    }

    /// True if messages at `level` pass the requested level.
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.log_level
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Calling this more than once is
/// harmless; only the first call installs a subscriber.
pub fn init_logging(level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
