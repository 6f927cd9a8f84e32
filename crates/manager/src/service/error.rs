use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CrackError {
    #[error("invalid request id")]
    InvalidRequestId,
    #[error("crack task not found")]
    TaskNotFound,
    #[error("crack subtask not found")]
    SubtaskNotFound,
    #[error("too many tasks in progress")]
    TooManyTasks,
    #[error("task finished by timeout")]
    TaskFinishedByTimeout,
    #[error(transparent)]
    Split(#[from] keyspace::SplitError),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for CrackError {
    /// Primary-key misses are domain conditions, not storage faults.
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TaskNotFound => Self::TaskNotFound,
            StoreError::SubtaskNotFound => Self::SubtaskNotFound,
            err => Self::Store(err),
        }
    }
}

impl CrackError {
    /// Errors that condemn the triggering message rather than the
    /// infrastructure: the consumer acks and drops these.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequestId
                | Self::TaskNotFound
                | Self::SubtaskNotFound
                | Self::TaskFinishedByTimeout
        )
    }
}
