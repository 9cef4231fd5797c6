//! Error type shared by the power spectrum and halo pipelines.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PowerError>;

/// Configuration and precondition failures.
///
/// All of these are detected identically on every rank, either before any
/// collective operation or through a collective check, so every rank returns
/// the same error.
#[derive(Debug, Error)]
pub enum PowerError {
    /// Zero cells per axis.
    #[error("mesh resolution must be positive, got {0}")]
    InvalidMeshResolution(usize),
    /// A box length that is not finite and positive.
    #[error("box length along axis {axis} must be finite and positive, got {length}")]
    InvalidBoxSize {
        /// Offending axis.
        axis: usize,
        /// Offending length.
        length: f64,
    },
    /// Bin edges that are too few, not finite or not increasing.
    #[error("invalid {axis} bin edges: {reason}")]
    InvalidEdges {
        /// Either `k` or `mu`.
        axis: &'static str,
        /// What is wrong with them.
        reason: String,
    },
    /// Two fields with different meshes or slab layouts.
    #[error("fields do not share a layout: {reason}")]
    ShapeMismatch {
        /// Both shapes.
        reason: String,
    },
    /// A sample stream that does not match the local cells.
    #[error("sample stream has {samples} entries but the grid has {cells} local cells")]
    SampleCountMismatch {
        /// Number of samples.
        samples: usize,
        /// Number of local cells.
        cells: usize,
    },
    /// Neither one nor two input fields.
    #[error("between one and two input fields are required, got {0}")]
    FieldCount(usize),
    /// A field description that cannot be parsed.
    #[error("failed to parse field specification `{spec}`: {reason}")]
    FieldSpec {
        /// The offending description.
        spec: String,
        /// What went wrong.
        reason: String,
    },
    /// A data source, painter or transfer name that is not registered.
    #[error("unknown {kind} `{name}`")]
    UnknownPlugin {
        /// Plugin category.
        kind: &'static str,
        /// Requested name.
        name: String,
    },
    /// Any other invalid option.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Catalogs of different global length.
    #[error("catalog sizes differ: {ic} initial-condition particles, {snapshot} snapshot particles")]
    CatalogSizeMismatch {
        /// Global length of the initial-condition catalog.
        ic: usize,
        /// Global length of the snapshot catalog.
        snapshot: usize,
    },
    /// Sorted catalogs that do not hold the same IDs.
    #[error("particle IDs do not align after sorting on {mismatched} rank(s)")]
    IdMismatch {
        /// Number of ranks with misaligned IDs.
        mismatched: usize,
    },
    /// A configuration file that cannot be parsed.
    #[error("failed to parse configuration file: {0}")]
    ConfigFile(#[from] toml::de::Error),
    /// Writing output failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
