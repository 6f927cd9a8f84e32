use super::{AggregateChange, Store, StoreError, TaskAggregate};
use crate::config::MongoConfig;
use anyhow::Context;
use bson::oid::ObjectId;
use bson::{doc, Document};
use futures::TryStreamExt;
use models::{Subtask, SubtaskStatus, Task, TaskStatus};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    Acknowledgment, ClientOptions, Credential, IndexOptions, ReadConcern, WriteConcern,
};
use mongodb::{Client, ClientSession, Collection, IndexModel};
use std::time::Duration;

const TASKS: &str = "hash_crack_tasks";
const SUBTASKS: &str = "hash_crack_subtasks";

const ACTIVE_STATUSES: [&str; 2] = ["PENDING", "IN_PROGRESS"];

/// MongoDB-backed store. Tasks and subtasks live in two collections of
/// one database; multi-document guarantees come from session
/// transactions with the configured read/write concerns.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    tasks: Collection<Task>,
    subtasks: Collection<Subtask>,
}

impl MongoStore {
    pub async fn connect(cfg: &MongoConfig) -> anyhow::Result<Self> {
        let mut options = ClientOptions::parse(&cfg.uri)
            .await
            .context("failed to parse MongoDB URI")?;

        if let Some(username) = &cfg.username {
            options.credential = Some(
                Credential::builder()
                    .username(username.clone())
                    .password(cfg.password.clone())
                    .build(),
            );
        }
        options.read_concern = cfg.read_concern.as_deref().map(read_concern);
        options.write_concern = cfg.write_concern.as_deref().map(write_concern);

        let client = Client::with_options(options).context("failed to build MongoDB client")?;
        let database = client.database(&cfg.database);

        let store = Self {
            tasks: database.collection(TASKS),
            subtasks: database.collection(SUBTASKS),
            client,
        };
        store
            .ping(Duration::from_secs(5))
            .await
            .context("failed to ping MongoDB")?;
        Ok(store)
    }

    pub async fn ping(&self, timeout: Duration) -> anyhow::Result<()> {
        tokio::time::timeout(
            timeout,
            self.client.database("admin").run_command(doc! {"ping": 1}),
        )
        .await
        .context("MongoDB ping timed out")?
        .context("MongoDB ping failed")?;
        Ok(())
    }

    pub async fn ensure_indexes(&self) -> anyhow::Result<()> {
        // Dedup of concurrent creates resolves on this key: only one
        // active task per (hash, maxLength) can exist at a time.
        let same_task = IndexModel::builder()
            .keys(doc! {"hash": 1, "maxLength": 1})
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .partial_filter_expression(doc! {"status": {"$in": ACTIVE_STATUSES.to_vec()}})
                    .build(),
            )
            .build();
        let by_status = IndexModel::builder().keys(doc! {"status": 1}).build();
        let by_finished = IndexModel::builder().keys(doc! {"finishedAt": 1}).build();
        let by_created = IndexModel::builder().keys(doc! {"createdAt": 1}).build();
        self.tasks
            .create_indexes([same_task, by_status, by_finished, by_created])
            .await
            .context("failed to create task indexes")?;

        let by_part = IndexModel::builder()
            .keys(doc! {"taskId": 1, "partNumber": 1})
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let by_subtask_status = IndexModel::builder().keys(doc! {"status": 1}).build();
        self.subtasks
            .create_indexes([by_part, by_subtask_status])
            .await
            .context("failed to create subtask indexes")?;
        Ok(())
    }

    async fn start_transaction(&self) -> Result<ClientSession, StoreError> {
        let mut session = self.client.start_session().await.map_err(db_err)?;
        session.start_transaction().await.map_err(db_err)?;
        Ok(session)
    }

    async fn load_aggregate(
        &self,
        id: ObjectId,
        session: &mut ClientSession,
    ) -> Result<TaskAggregate, StoreError> {
        let task = self
            .tasks
            .find_one(doc! {"_id": id})
            .session(&mut *session)
            .await
            .map_err(db_err)?
            .ok_or(StoreError::TaskNotFound)?;

        let mut cursor = self
            .subtasks
            .find(doc! {"taskId": id})
            .sort(doc! {"partNumber": 1})
            .session(&mut *session)
            .await
            .map_err(db_err)?;
        let subtasks: Vec<Subtask> = cursor
            .stream(&mut *session)
            .try_collect()
            .await
            .map_err(db_err)?;

        Ok(TaskAggregate { task, subtasks })
    }

    async fn subtasks_for(&self, tasks: &[Task]) -> Result<Vec<TaskAggregate>, StoreError> {
        let ids: Vec<ObjectId> = tasks.iter().map(|task| task.id).collect();
        let subtasks: Vec<Subtask> = self
            .subtasks
            .find(doc! {"taskId": {"$in": ids}})
            .sort(doc! {"taskId": 1, "partNumber": 1})
            .await
            .map_err(db_err)?
            .try_collect()
            .await
            .map_err(db_err)?;

        Ok(tasks
            .iter()
            .map(|task| TaskAggregate {
                task: task.clone(),
                subtasks: subtasks
                    .iter()
                    .filter(|subtask| subtask.task_id == task.id)
                    .cloned()
                    .collect(),
            })
            .collect())
    }

    async fn list_tasks_filtered(&self, filter: Document) -> Result<Vec<Task>, StoreError> {
        self.tasks
            .find(filter)
            .sort(doc! {"createdAt": 1})
            .await
            .map_err(db_err)?
            .try_collect()
            .await
            .map_err(db_err)
    }
}

impl Store for MongoStore {
    async fn fetch_task(&self, id: ObjectId) -> Result<Task, StoreError> {
        self.tasks
            .find_one(doc! {"_id": id})
            .await
            .map_err(db_err)?
            .ok_or(StoreError::TaskNotFound)
    }

    async fn fetch_aggregate(&self, id: ObjectId) -> Result<TaskAggregate, StoreError> {
        let task = self.fetch_task(id).await?;
        let subtasks: Vec<Subtask> = self
            .subtasks
            .find(doc! {"taskId": id})
            .sort(doc! {"partNumber": 1})
            .await
            .map_err(db_err)?
            .try_collect()
            .await
            .map_err(db_err)?;
        Ok(TaskAggregate { task, subtasks })
    }

    async fn find_same_task(
        &self,
        hash: &str,
        max_length: u32,
    ) -> Result<Option<Task>, StoreError> {
        self.tasks
            .find_one(doc! {
                "hash": hash,
                "maxLength": max_length as i64,
                "status": {"$in": ["PENDING", "IN_PROGRESS", "READY"]},
            })
            .sort(doc! {"createdAt": -1})
            .await
            .map_err(db_err)
    }

    async fn list_timed_out(
        &self,
        now: bson::DateTime,
    ) -> Result<Vec<TaskAggregate>, StoreError> {
        let tasks = self
            .list_tasks_filtered(doc! {
                "status": TaskStatus::InProgress.as_str(),
                "finishedAt": {"$ne": null, "$lt": now},
            })
            .await?;
        self.subtasks_for(&tasks).await
    }

    async fn list_expired(&self, cutoff: bson::DateTime) -> Result<Vec<Task>, StoreError> {
        self.list_tasks_filtered(doc! {"createdAt": {"$lt": cutoff}})
            .await
    }

    async fn list_tasks(&self, limit: u64, offset: u64) -> Result<Vec<Task>, StoreError> {
        self.tasks
            .find(doc! {})
            .sort(doc! {"createdAt": 1})
            .skip(offset)
            .limit(limit as i64)
            .await
            .map_err(db_err)?
            .try_collect()
            .await
            .map_err(db_err)
    }

    async fn count_tasks(&self) -> Result<u64, StoreError> {
        self.tasks.count_documents(doc! {}).await.map_err(db_err)
    }

    async fn count_active(&self) -> Result<u64, StoreError> {
        self.tasks
            .count_documents(doc! {"status": {"$in": ACTIVE_STATUSES.to_vec()}})
            .await
            .map_err(db_err)
    }

    async fn create_task_with_subtasks(
        &self,
        task: &Task,
        subtasks: &[Subtask],
    ) -> Result<(), StoreError> {
        let mut session = self.start_transaction().await?;
        let created = async {
            self.tasks
                .insert_one(task)
                .session(&mut session)
                .await
                .map_err(create_err)?;
            self.subtasks
                .insert_many(subtasks)
                .session(&mut session)
                .await
                .map_err(create_err)?;
            Ok(())
        }
        .await;
        finish_transaction(session, created).await
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        let result = self
            .tasks
            .replace_one(doc! {"_id": task.id}, task)
            .await
            .map_err(db_err)?;
        if result.matched_count == 0 {
            return Err(StoreError::TaskNotFound);
        }
        Ok(())
    }

    async fn update_subtask(&self, subtask: &Subtask) -> Result<(), StoreError> {
        let result = self
            .subtasks
            .replace_one(doc! {"_id": subtask.id}, subtask)
            .await
            .map_err(db_err)?;
        if result.matched_count == 0 {
            return Err(StoreError::SubtaskNotFound);
        }
        Ok(())
    }

    async fn update_task_with_subtasks(
        &self,
        task: &Task,
        subtasks: &[Subtask],
    ) -> Result<(), StoreError> {
        let mut session = self.start_transaction().await?;
        let updated = async {
            self.tasks
                .replace_one(doc! {"_id": task.id}, task)
                .session(&mut session)
                .await
                .map_err(db_err)?;
            for subtask in subtasks {
                self.subtasks
                    .replace_one(doc! {"_id": subtask.id}, subtask)
                    .session(&mut session)
                    .await
                    .map_err(db_err)?;
            }
            Ok(())
        }
        .await;
        finish_transaction(session, updated).await
    }

    async fn delete_tasks_with_subtasks(&self, ids: &[ObjectId]) -> Result<(), StoreError> {
        let mut session = self.start_transaction().await?;
        let deleted = async {
            self.tasks
                .delete_many(doc! {"_id": {"$in": ids.to_vec()}})
                .session(&mut session)
                .await
                .map_err(db_err)?;
            self.subtasks
                .delete_many(doc! {"taskId": {"$in": ids.to_vec()}})
                .session(&mut session)
                .await
                .map_err(db_err)?;
            Ok(())
        }
        .await;
        finish_transaction(session, deleted).await
    }

    async fn list_subtasks_by_status(
        &self,
        status: SubtaskStatus,
    ) -> Result<Vec<Subtask>, StoreError> {
        self.subtasks
            .find(doc! {"status": status.as_str()})
            .sort(doc! {"createdAt": 1})
            .await
            .map_err(db_err)?
            .try_collect()
            .await
            .map_err(db_err)
    }

    async fn fetch_subtask(
        &self,
        task_id: ObjectId,
        part_number: u64,
    ) -> Result<Subtask, StoreError> {
        self.subtasks
            .find_one(doc! {"taskId": task_id, "partNumber": part_number as i64})
            .await
            .map_err(db_err)?
            .ok_or(StoreError::SubtaskNotFound)
    }

    async fn update_aggregate<T, E, F>(&self, id: ObjectId, apply: F) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnOnce(&mut TaskAggregate) -> Result<(T, AggregateChange), E> + Send,
    {
        let mut session = self.start_transaction().await?;

        let applied: Result<(T, AggregateChange), E> = async {
            let mut aggregate = self.load_aggregate(id, &mut session).await?;
            let (out, change) = apply(&mut aggregate)?;

            if let Some(task) = &change.task {
                self.tasks
                    .replace_one(doc! {"_id": task.id}, task)
                    .session(&mut session)
                    .await
                    .map_err(|err| E::from(db_err(err)))?;
            }
            for subtask in &change.subtasks {
                self.subtasks
                    .replace_one(doc! {"_id": subtask.id}, subtask)
                    .session(&mut session)
                    .await
                    .map_err(|err| E::from(db_err(err)))?;
            }
            Ok((out, change))
        }
        .await;

        match applied {
            Ok((out, _)) => {
                session.commit_transaction().await.map_err(db_err)?;
                Ok(out)
            }
            Err(err) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    tracing::warn!(?abort_err, "failed to abort transaction");
                }
                Err(err)
            }
        }
    }
}

async fn finish_transaction(
    mut session: ClientSession,
    result: Result<(), StoreError>,
) -> Result<(), StoreError> {
    match result {
        Ok(()) => session.commit_transaction().await.map_err(db_err),
        Err(err) => {
            if let Err(abort_err) = session.abort_transaction().await {
                tracing::warn!(?abort_err, "failed to abort transaction");
            }
            Err(err)
        }
    }
}

fn db_err(err: mongodb::error::Error) -> StoreError {
    StoreError::Database(err.into())
}

fn create_err(err: mongodb::error::Error) -> StoreError {
    if is_duplicate_key(&err) {
        StoreError::TaskExists
    } else {
        db_err(err)
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    if let ErrorKind::Write(WriteFailure::WriteError(write_err)) = &*err.kind {
        return write_err.code == 11000;
    }
    // insert_many surfaces duplicate keys through a different error
    // kind per driver version; the server code is stable.
    err.to_string().contains("E11000")
}

fn read_concern(level: &str) -> ReadConcern {
    match level {
        "majority" => ReadConcern::majority(),
        "local" => ReadConcern::local(),
        "linearizable" => ReadConcern::linearizable(),
        "available" => ReadConcern::available(),
        other => ReadConcern::custom(other.to_string()),
    }
}

fn write_concern(level: &str) -> WriteConcern {
    let w = match level {
        "majority" => Acknowledgment::Majority,
        other => match other.parse::<u32>() {
            Ok(nodes) => Acknowledgment::Nodes(nodes),
            Err(_) => Acknowledgment::Custom(other.to_string()),
        },
    };
    WriteConcern::builder().w(w).journal(true).build()
}
