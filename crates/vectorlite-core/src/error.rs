use thiserror::Error;

/// Unified error type for the whole workspace.
#[derive(Debug, Error)]
pub enum VectorLiteError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("corrupt wal at offset {offset}: {reason}")]
    CorruptWal { offset: u64, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("lock busy: {0}")]
    LockBusy(String),

    #[error("lock epoch mismatch: expected {expected}, got {actual}")]
    LockEpochMismatch { expected: u64, actual: u64 },

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<std::io::Error> for VectorLiteError {
    fn from(e: std::io::Error) -> Self {
        VectorLiteError::Storage(e.to_string())
    }
}

pub type Result<T, E = VectorLiteError> = std::result::Result<T, E>;

impl VectorLiteError {
    /// True for failures that indicate on-disk data damage rather than
    /// caller mistakes.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            VectorLiteError::CorruptSnapshot(_) | VectorLiteError::CorruptWal { .. }
        )
    }
}
