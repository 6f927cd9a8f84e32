mod message;
mod task;

pub use message::{Alphabet, Answer, ResultStatus, TaskDispatch, TaskResult};
pub use task::{Subtask, SubtaskStatus, Task, TaskStatus};

/// Reason recorded on tasks and subtasks that were failed by the
/// timeout sweep. Result ingestion matches on this exact string to
/// reject late worker deliveries.
pub const TIMEOUT_REASON: &str = "task finished by timeout";
