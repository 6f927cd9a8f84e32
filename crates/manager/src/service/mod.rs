use crate::clock::{Clock, IdGenerator};
use crate::config::TaskConfig;
use crate::store::{AggregateChange, Store, StoreError, TaskAggregate};
use bson::oid::ObjectId;
use models::{Alphabet, Subtask, SubtaskStatus, Task, TaskDispatch, TaskResult, TaskStatus};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

pub mod aggregate;
mod error;

pub use aggregate::{SubtaskStatusOutput, TaskStatusOutput};
pub use error::CrackError;


/// Seam through which dispatch messages leave the service; the AMQP
/// publisher in production, a scripted fake in tests.
pub trait DispatchSink: Send + Sync + 'static {
    fn send(&self, message: &TaskDispatch) -> impl Future<Output = Result<(), bus::Error>> + Send;
}

impl DispatchSink for bus::Publisher<TaskDispatch> {
    async fn send(&self, message: &TaskDispatch) -> Result<(), bus::Error> {
        bus::Publisher::send(self, message).await
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskMetadata {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub hash: String,
    #[serde(rename = "maxLength")]
    pub max_length: u32,
    #[serde(rename = "createdAt")]
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskMetadataPage {
    pub count: u64,
    pub tasks: Vec<TaskMetadata>,
}

/// The manager's task state machine: creation with deduplication,
/// fan-out dispatch, idempotent result aggregation, and the periodic
/// timeout / expiry / re-execution sweeps.
pub struct CrackService<S, P> {
    cfg: TaskConfig,
    store: S,
    dispatcher: Arc<P>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl<S, P> Clone for CrackService<S, P>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            cfg: self.cfg.clone(),
            store: self.store.clone(),
            dispatcher: self.dispatcher.clone(),
            clock: self.clock.clone(),
            ids: self.ids.clone(),
        }
    }
}

impl<S: Store, P: DispatchSink> CrackService<S, P> {
    pub fn new(
        cfg: TaskConfig,
        store: S,
        dispatcher: Arc<P>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            cfg,
            store,
            dispatcher,
            clock,
            ids,
        }
    }

    /// Create a crack task, or return the id of an equivalent task
    /// that is already active or READY. Dispatch to workers starts
    /// asynchronously; the caller gets the id immediately.
    pub async fn create_task(&self, hash: &str, max_length: u32) -> Result<ObjectId, CrackError> {
        tracing::info!(hash, max_length, "create task");

        if self.cfg.limit > 0 && self.store.count_active().await? >= self.cfg.limit {
            return Err(CrackError::TooManyTasks);
        }

        match self.store.find_same_task(hash, max_length).await {
            Ok(Some(same)) => {
                tracing::info!(id = %same.id, "same task already exists");
                return Ok(same.id);
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(?err, "failed to look up same task"),
        }

        let part_count = keyspace::split(
            max_length,
            self.cfg.alphabet.chars().count(),
            self.cfg.chunk_size,
        )?;

        let now = self.clock.now();
        let task = Task {
            id: self.ids.next_id(),
            hash: hash.to_string(),
            max_length,
            part_count,
            status: TaskStatus::Pending,
            reason: None,
            finished_at: Some(add_millis(now, self.cfg.timeout.as_millis() as i64)),
            created_at: now,
            updated_at: now,
        };
        let subtasks: Vec<Subtask> = (0..part_count)
            .map(|part_number| Subtask {
                id: self.ids.next_id(),
                task_id: task.id,
                part_number,
                status: SubtaskStatus::Pending,
                data: Vec::new(),
                percent: 0.0,
                reason: None,
                created_at: now,
                updated_at: now,
            })
            .collect();

        match self.store.create_task_with_subtasks(&task, &subtasks).await {
            Ok(()) => {}
            // Lost a creation race: fall back to the winner.
            Err(StoreError::TaskExists) => {
                if let Some(same) = self.store.find_same_task(hash, max_length).await? {
                    tracing::info!(id = %same.id, "lost create race to same task");
                    return Ok(same.id);
                }
                return Err(StoreError::TaskExists.into());
            }
            Err(err) => return Err(err.into()),
        }

        let service = self.clone();
        let aggregate = TaskAggregate {
            task: task.clone(),
            subtasks,
        };
        tokio::spawn(async move {
            if let Err(err) = service.start_execute_task(&aggregate).await {
                tracing::error!(id = %aggregate.task.id, ?err, "failed to start task execution");
            }
        });

        Ok(task.id)
    }

    pub async fn get_task_status(&self, id: &str) -> Result<TaskStatusOutput, CrackError> {
        tracing::info!(id, "get task status");

        let id = parse_request_id(id)?;
        let aggregate = self.store.fetch_aggregate(id).await?;
        Ok(aggregate::status_output(
            &aggregate.task,
            &aggregate.subtasks,
        ))
    }

    pub async fn get_task_metadatas(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<TaskMetadataPage, CrackError> {
        tracing::info!(limit, offset, "get task metadatas");

        let (tasks, count) =
            tokio::join!(self.store.list_tasks(limit, offset), self.store.count_tasks());
        Ok(TaskMetadataPage {
            count: count?,
            tasks: tasks?
                .into_iter()
                .map(|task| TaskMetadata {
                    request_id: task.id.to_hex(),
                    hash: task.hash,
                    max_length: task.max_length,
                    created_at: task.created_at.to_chrono(),
                })
                .collect(),
        })
    }

    /// Ingest one worker result. The whole read-modify-write runs in a
    /// store transaction, so duplicate or out-of-order deliveries
    /// converge to the same aggregate state.
    pub async fn save_result_subtask(&self, result: &TaskResult) -> Result<(), CrackError> {
        tracing::info!(
            id = result.request_id,
            part_number = result.part_number,
            status = ?result.status,
            "save result subtask"
        );

        let id = parse_request_id(&result.request_id)?;
        let now = self.clock.now();
        let result = result.clone();

        self.store
            .update_aggregate(id, move |aggregate: &mut TaskAggregate| {
                if aggregate.task.status == TaskStatus::Error
                    && aggregate.task.reason.as_deref() == Some(models::TIMEOUT_REASON)
                {
                    return Err(CrackError::TaskFinishedByTimeout);
                }

                let Some(subtask) = aggregate.subtask_mut(result.part_number) else {
                    return Err(CrackError::SubtaskNotFound);
                };
                aggregate::apply_result(subtask, &result, now);
                let mut change = AggregateChange {
                    task: None,
                    subtasks: vec![subtask.clone()],
                };

                if let Some((status, reasons)) = aggregate::finalize(&aggregate.subtasks) {
                    let task = &mut aggregate.task;
                    task.status = status;
                    if let Some(reasons) = reasons {
                        task.reason =
                            Some(aggregate::append_reason(task.reason.as_deref(), &reasons));
                    }
                    // A terminal task carries no deadline.
                    task.finished_at = None;
                    task.updated_at = now;
                    change.task = Some(task.clone());
                    tracing::info!(id = %task.id, status = %task.status, "task finished");
                }

                Ok(((), change))
            })
            .await
    }

    /// Re-dispatch subtasks that never made it to a worker, typically
    /// because a publish failed during the initial fan-out.
    pub async fn execute_pending_subtasks(&self) -> Result<(), CrackError> {
        tracing::info!("execute pending subtasks");

        let pending = self
            .store
            .list_subtasks_by_status(SubtaskStatus::Pending)
            .await?;
        if pending.is_empty() {
            tracing::debug!("no pending subtasks found");
            return Ok(());
        }
        tracing::debug!(count = pending.len(), "pending subtasks found");

        let mut groups: BTreeMap<ObjectId, Vec<Subtask>> = BTreeMap::new();
        for subtask in pending {
            groups.entry(subtask.task_id).or_default().push(subtask);
        }

        let mut failures = 0usize;
        for (task_id, subtasks) in groups {
            let task = match self.store.fetch_task(task_id).await {
                Ok(task) => task,
                Err(err) => {
                    tracing::error!(id = %task_id, ?err, "failed to load task of pending subtasks");
                    failures += 1;
                    continue;
                }
            };
            if task.status.is_terminal() {
                tracing::debug!(id = %task_id, "skipping pending subtasks of a finished task");
                continue;
            }
            if let Err(err) = self
                .dispatch_subtasks(&task, subtasks, DispatchFailure::MarkError)
                .await
            {
                tracing::error!(id = %task_id, ?err, "failed to re-execute pending subtasks");
                failures += 1;
            }
        }

        if failures > 0 {
            return Err(CrackError::Other(anyhow::anyhow!(
                "failed to execute pending subtasks of {failures} tasks"
            )));
        }
        Ok(())
    }

    /// Fail every IN_PROGRESS task whose deadline has passed, together
    /// with its unfinished subtasks.
    pub async fn finish_timeout_tasks(&self) -> Result<(), CrackError> {
        tracing::info!("finish timeout tasks");

        let now = self.clock.now();
        let aggregates = self.store.list_timed_out(now).await?;
        if aggregates.is_empty() {
            tracing::debug!("no timed out tasks found");
            return Ok(());
        }
        tracing::debug!(count = aggregates.len(), "timed out tasks found");

        let mut failures = 0usize;
        for mut aggregate in aggregates {
            let task = &mut aggregate.task;
            task.status = TaskStatus::Error;
            task.reason = Some(aggregate::append_reason(
                task.reason.as_deref(),
                models::TIMEOUT_REASON,
            ));
            // A terminal task carries no deadline.
            task.finished_at = None;
            task.updated_at = now;

            let mut failed_subtasks = Vec::new();
            for subtask in &mut aggregate.subtasks {
                if subtask.status.is_terminal() {
                    continue;
                }
                subtask.status = SubtaskStatus::Error;
                subtask.reason = Some(aggregate::append_reason(
                    subtask.reason.as_deref(),
                    models::TIMEOUT_REASON,
                ));
                subtask.updated_at = now;
                failed_subtasks.push(subtask.clone());
            }

            if let Err(err) = self
                .store
                .update_task_with_subtasks(&aggregate.task, &failed_subtasks)
                .await
            {
                tracing::error!(id = %aggregate.task.id, ?err, "failed to finish timed out task");
                failures += 1;
            } else {
                tracing::info!(id = %aggregate.task.id, "task finished by timeout");
            }
        }

        if failures > 0 {
            return Err(CrackError::Other(anyhow::anyhow!(
                "failed to finish {failures} timed out tasks"
            )));
        }
        Ok(())
    }

    /// Remove tasks (and their subtasks) older than the retention age.
    pub async fn delete_expired_tasks(&self) -> Result<(), CrackError> {
        tracing::info!("delete expired tasks");

        let cutoff = add_millis(self.clock.now(), -(self.cfg.max_age.as_millis() as i64));
        let expired = self.store.list_expired(cutoff).await?;
        if expired.is_empty() {
            tracing::debug!("no expired tasks found");
            return Ok(());
        }

        let ids: Vec<ObjectId> = expired.iter().map(|task| task.id).collect();
        self.store.delete_tasks_with_subtasks(&ids).await?;
        tracing::info!(count = ids.len(), "expired tasks deleted");
        Ok(())
    }

    /// Initial fan-out of a freshly created task. A failed publish
    /// leaves the subtask PENDING with the error recorded, so the
    /// re-execution sweep retries it once the broker recovers.
    pub async fn start_execute_task(&self, aggregate: &TaskAggregate) -> Result<(), CrackError> {
        tracing::debug!(id = %aggregate.task.id, "start execute task");
        self.dispatch_subtasks(
            &aggregate.task,
            aggregate.subtasks.clone(),
            DispatchFailure::KeepPending,
        )
        .await
    }

    async fn dispatch_subtasks(
        &self,
        task: &Task,
        subtasks: Vec<Subtask>,
        on_failure: DispatchFailure,
    ) -> Result<(), CrackError> {
        let mut dispatched_any = false;

        for mut subtask in subtasks {
            tracing::debug!(id = %subtask.id, part_number = subtask.part_number, "dispatching subtask");
            let message = self.dispatch_message(task, subtask.part_number);
            let now = self.clock.now();

            match self.dispatcher.send(&message).await {
                Ok(()) => {
                    subtask.status = SubtaskStatus::InProgress;
                    subtask.reason = None;
                    dispatched_any = true;
                }
                Err(err) => {
                    tracing::error!(id = %subtask.id, ?err, "failed to dispatch subtask");
                    match on_failure {
                        DispatchFailure::KeepPending => {
                            subtask.reason = Some(err.to_string());
                        }
                        DispatchFailure::MarkError => {
                            subtask.status = SubtaskStatus::Error;
                            subtask.reason = Some(aggregate::append_reason(
                                subtask.reason.as_deref(),
                                &err.to_string(),
                            ));
                        }
                    }
                }
            }
            subtask.updated_at = now;
            self.store.update_subtask(&subtask).await?;
        }

        if dispatched_any || on_failure == DispatchFailure::MarkError {
            let mut task = task.clone();
            task.status = TaskStatus::InProgress;
            task.updated_at = self.clock.now();
            self.store.update_task(&task).await?;
        }
        Ok(())
    }

    fn dispatch_message(&self, task: &Task, part_number: u64) -> TaskDispatch {
        TaskDispatch {
            request_id: task.id.to_hex(),
            part_number,
            part_count: task.part_count,
            hash: task.hash.clone(),
            max_length: task.max_length,
            alphabet: Alphabet {
                symbols: self.cfg.alphabet.chars().map(String::from).collect(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchFailure {
    /// Initial fan-out: leave the subtask retryable.
    KeepPending,
    /// Re-execution sweep: a second failure is terminal.
    MarkError,
}

fn parse_request_id(id: &str) -> Result<ObjectId, CrackError> {
    ObjectId::parse_str(id).map_err(|_| CrackError::InvalidRequestId)
}

fn add_millis(at: bson::DateTime, millis: i64) -> bson::DateTime {
    bson::DateTime::from_millis(at.timestamp_millis() + millis)
}
