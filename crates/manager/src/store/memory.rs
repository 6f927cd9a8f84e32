use super::{AggregateChange, Store, StoreError, TaskAggregate};
use bson::oid::ObjectId;
use models::{Subtask, SubtaskStatus, Task, TaskStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory store for development and tests. A single mutex stands in
/// for the database's transactional scope: every operation observes
/// and commits a consistent snapshot.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<ObjectId, Task>,
    subtasks: HashMap<ObjectId, Subtask>,
}

impl Inner {
    fn tasks_sorted(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasks.sort_by_key(|task| (task.created_at, task.id));
        tasks
    }

    fn subtasks_of(&self, task_id: ObjectId) -> Vec<Subtask> {
        let mut subtasks: Vec<Subtask> = self
            .subtasks
            .values()
            .filter(|subtask| subtask.task_id == task_id)
            .cloned()
            .collect();
        subtasks.sort_by_key(|subtask| subtask.part_number);
        subtasks
    }

    fn aggregate(&self, id: ObjectId) -> Result<TaskAggregate, StoreError> {
        let task = self.tasks.get(&id).cloned().ok_or(StoreError::TaskNotFound)?;
        let subtasks = self.subtasks_of(id);
        Ok(TaskAggregate { task, subtasks })
    }

    fn commit(&mut self, change: AggregateChange) -> Result<(), StoreError> {
        if let Some(task) = change.task {
            if !self.tasks.contains_key(&task.id) {
                return Err(StoreError::TaskNotFound);
            }
            self.tasks.insert(task.id, task);
        }
        for subtask in change.subtasks {
            if !self.subtasks.contains_key(&subtask.id) {
                return Err(StoreError::SubtaskNotFound);
            }
            self.subtasks.insert(subtask.id, subtask);
        }
        Ok(())
    }
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store poisoned")
    }
}

impl Store for MemoryStore {
    async fn fetch_task(&self, id: ObjectId) -> Result<Task, StoreError> {
        self.lock()
            .tasks
            .get(&id)
            .cloned()
            .ok_or(StoreError::TaskNotFound)
    }

    async fn fetch_aggregate(&self, id: ObjectId) -> Result<TaskAggregate, StoreError> {
        self.lock().aggregate(id)
    }

    async fn find_same_task(
        &self,
        hash: &str,
        max_length: u32,
    ) -> Result<Option<Task>, StoreError> {
        let inner = self.lock();
        let mut same: Vec<&Task> = inner
            .tasks
            .values()
            .filter(|task| {
                task.hash == hash
                    && task.max_length == max_length
                    && matches!(
                        task.status,
                        TaskStatus::Pending | TaskStatus::InProgress | TaskStatus::Ready
                    )
            })
            .collect();
        same.sort_by_key(|task| task.created_at);
        Ok(same.last().map(|task| (*task).clone()))
    }

    async fn list_timed_out(
        &self,
        now: bson::DateTime,
    ) -> Result<Vec<TaskAggregate>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .tasks_sorted()
            .into_iter()
            .filter(|task| {
                task.status == TaskStatus::InProgress
                    && task.finished_at.is_some_and(|deadline| deadline < now)
            })
            .map(|task| {
                let subtasks = inner.subtasks_of(task.id);
                TaskAggregate { task, subtasks }
            })
            .collect())
    }

    async fn list_expired(&self, cutoff: bson::DateTime) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .lock()
            .tasks_sorted()
            .into_iter()
            .filter(|task| task.created_at < cutoff)
            .collect())
    }

    async fn list_tasks(&self, limit: u64, offset: u64) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .lock()
            .tasks_sorted()
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_tasks(&self) -> Result<u64, StoreError> {
        Ok(self.lock().tasks.len() as u64)
    }

    async fn count_active(&self) -> Result<u64, StoreError> {
        Ok(self
            .lock()
            .tasks
            .values()
            .filter(|task| {
                matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress)
            })
            .count() as u64)
    }

    async fn create_task_with_subtasks(
        &self,
        task: &Task,
        subtasks: &[Subtask],
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let duplicate = inner.tasks.values().any(|existing| {
            existing.hash == task.hash
                && existing.max_length == task.max_length
                && matches!(
                    existing.status,
                    TaskStatus::Pending | TaskStatus::InProgress
                )
        });
        if duplicate || inner.tasks.contains_key(&task.id) {
            return Err(StoreError::TaskExists);
        }
        inner.tasks.insert(task.id, task.clone());
        for subtask in subtasks {
            inner.subtasks.insert(subtask.id, subtask.clone());
        }
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.tasks.contains_key(&task.id) {
            return Err(StoreError::TaskNotFound);
        }
        inner.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update_subtask(&self, subtask: &Subtask) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.subtasks.contains_key(&subtask.id) {
            return Err(StoreError::SubtaskNotFound);
        }
        inner.subtasks.insert(subtask.id, subtask.clone());
        Ok(())
    }

    async fn update_task_with_subtasks(
        &self,
        task: &Task,
        subtasks: &[Subtask],
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.commit(AggregateChange {
            task: Some(task.clone()),
            subtasks: subtasks.to_vec(),
        })
    }

    async fn delete_tasks_with_subtasks(&self, ids: &[ObjectId]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for id in ids {
            inner.tasks.remove(id);
        }
        inner
            .subtasks
            .retain(|_, subtask| !ids.contains(&subtask.task_id));
        Ok(())
    }

    async fn list_subtasks_by_status(
        &self,
        status: SubtaskStatus,
    ) -> Result<Vec<Subtask>, StoreError> {
        let inner = self.lock();
        let mut subtasks: Vec<Subtask> = inner
            .subtasks
            .values()
            .filter(|subtask| subtask.status == status)
            .cloned()
            .collect();
        subtasks.sort_by_key(|subtask| (subtask.created_at, subtask.task_id, subtask.part_number));
        Ok(subtasks)
    }

    async fn fetch_subtask(
        &self,
        task_id: ObjectId,
        part_number: u64,
    ) -> Result<Subtask, StoreError> {
        self.lock()
            .subtasks
            .values()
            .find(|subtask| subtask.task_id == task_id && subtask.part_number == part_number)
            .cloned()
            .ok_or(StoreError::SubtaskNotFound)
    }

    async fn update_aggregate<T, E, F>(&self, id: ObjectId, apply: F) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnOnce(&mut TaskAggregate) -> Result<(T, AggregateChange), E> + Send,
    {
        let mut inner = self.lock();
        let mut aggregate = inner.aggregate(id)?;
        let (out, change) = apply(&mut aggregate)?;
        inner.commit(change)?;
        Ok(out)
    }
}
