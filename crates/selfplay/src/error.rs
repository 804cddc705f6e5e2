use thiserror::Error;

/// Everything that can go wrong inside the training library.
///
/// Per-pair episode failures are reported through the board's observer and
/// keep the rest of a round running; [`TrainError::InconsistentState`] is the
/// only kind callers should treat as fatal.
#[derive(Error, Debug)]
pub enum TrainError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("script parse error: {0}")]
    ScriptParse(String),

    #[error("no legal moves were supplied to the agent")]
    InvalidMoveSet,

    #[error("agent misconfigured: {0}")]
    AgentMisconfigured(String),

    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    #[error("checkpoint corrupt: {0}")]
    CheckpointCorrupt(String),

    #[error("cancelled")]
    Cancelled,
}
