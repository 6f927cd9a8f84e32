use bson::oid::ObjectId;
use models::{Subtask, SubtaskStatus, Task};
use std::future::Future;

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("crack task not found")]
    TaskNotFound,
    #[error("crack task already exists")]
    TaskExists,
    #[error("crack subtask not found")]
    SubtaskNotFound,
    #[error("database failure")]
    Database(#[source] anyhow::Error),
}

/// A task loaded together with its subtasks, ordered by part number.
#[derive(Debug, Clone)]
pub struct TaskAggregate {
    pub task: Task,
    pub subtasks: Vec<Subtask>,
}

impl TaskAggregate {
    pub fn subtask_mut(&mut self, part_number: u64) -> Option<&mut Subtask> {
        self.subtasks
            .iter_mut()
            .find(|subtask| subtask.part_number == part_number)
    }
}

/// Documents an aggregate mutation decided to persist.
#[derive(Debug, Clone, Default)]
pub struct AggregateChange {
    pub task: Option<Task>,
    pub subtasks: Vec<Subtask>,
}

/// Persistent store for tasks and subtasks, sharing one transactional
/// scope. The manager is the sole writer; every mutation that depends
/// on current aggregate state goes through `update_aggregate`.
pub trait Store: Clone + Send + Sync + 'static {
    fn fetch_task(
        &self,
        id: ObjectId,
    ) -> impl Future<Output = Result<Task, StoreError>> + Send;

    fn fetch_aggregate(
        &self,
        id: ObjectId,
    ) -> impl Future<Output = Result<TaskAggregate, StoreError>> + Send;

    /// Newest task with equal `(hash, max_length)` that is either
    /// still active or already READY, for request deduplication.
    fn find_same_task(
        &self,
        hash: &str,
        max_length: u32,
    ) -> impl Future<Output = Result<Option<Task>, StoreError>> + Send;

    /// IN_PROGRESS tasks whose deadline has passed, with subtasks.
    fn list_timed_out(
        &self,
        now: bson::DateTime,
    ) -> impl Future<Output = Result<Vec<TaskAggregate>, StoreError>> + Send;

    /// Tasks created before `cutoff`.
    fn list_expired(
        &self,
        cutoff: bson::DateTime,
    ) -> impl Future<Output = Result<Vec<Task>, StoreError>> + Send;

    /// A page of tasks ordered by creation time ascending.
    fn list_tasks(
        &self,
        limit: u64,
        offset: u64,
    ) -> impl Future<Output = Result<Vec<Task>, StoreError>> + Send;

    fn count_tasks(&self) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Tasks in PENDING or IN_PROGRESS, for the active-task limit.
    fn count_active(&self) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Atomically create a task with its subtasks. A concurrent
    /// duplicate of an active `(hash, max_length)` pair fails with
    /// `StoreError::TaskExists`.
    fn create_task_with_subtasks(
        &self,
        task: &Task,
        subtasks: &[Subtask],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_task(&self, task: &Task) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_subtask(
        &self,
        subtask: &Subtask,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomically persist a task and a set of its subtasks.
    fn update_task_with_subtasks(
        &self,
        task: &Task,
        subtasks: &[Subtask],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomically delete tasks and their subtasks.
    fn delete_tasks_with_subtasks(
        &self,
        ids: &[ObjectId],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn list_subtasks_by_status(
        &self,
        status: SubtaskStatus,
    ) -> impl Future<Output = Result<Vec<Subtask>, StoreError>> + Send;

    fn fetch_subtask(
        &self,
        task_id: ObjectId,
        part_number: u64,
    ) -> impl Future<Output = Result<Subtask, StoreError>> + Send;

    /// Transactional read-modify-write of one task aggregate: load the
    /// task with its subtasks under snapshot isolation, apply the
    /// synchronous closure, persist the change set it returns, and
    /// commit. Concurrent results for one task serialize here.
    fn update_aggregate<T, E, F>(
        &self,
        id: ObjectId,
        apply: F,
    ) -> impl Future<Output = Result<T, E>> + Send
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnOnce(&mut TaskAggregate) -> Result<(T, AggregateChange), E> + Send;
}
