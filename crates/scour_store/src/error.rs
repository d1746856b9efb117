use thiserror::Error;

/// Errors surfaced by the scrub planner, hasher, and log bridge.
///
/// The executor keys its abort decisions off this taxonomy: planning errors
/// are returned synchronously to the caller, batch-scoped errors abort one
/// collection, and `Interrupted`/`PrimarySteppedDown` are terminal for the
/// whole run.
#[derive(Debug, Error)]
pub enum ScourError {
    #[error("namespace {0} not found")]
    NamespaceNotFound(String),

    #[error("cannot scour {0}: not a replicated namespace")]
    InvalidNamespace(String),

    #[error("storage snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    #[error("scour worker interrupted")]
    Interrupted,

    #[error("scour terminated by stepdown")]
    PrimarySteppedDown,

    #[error("scour requires feature version >= {required}, node is at {found}")]
    FeatureGate { found: u32, required: u32 },

    #[error("not authorized to read {0}")]
    Unauthorized(String),

    #[error("malformed scour invocation: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ScourError {
    /// Whether this error ends the entire run rather than one collection.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::Interrupted | Self::PrimarySteppedDown)
    }
}

pub type ScourResult<T> = std::result::Result<T, ScourError>;
