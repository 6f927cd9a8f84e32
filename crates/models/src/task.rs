use bson::oid::ObjectId;

/// Task is a single crack request: the aggregate root owning `part_count`
/// subtasks, one per chunk of the candidate space.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub hash: String,
    #[serde(rename = "maxLength")]
    pub max_length: u32,
    #[serde(rename = "partCount")]
    pub part_count: u64,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Deadline after which the timeout sweep fails the task.
    /// Set at creation and never advanced.
    #[serde(
        rename = "finishedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub finished_at: Option<bson::DateTime>,
    #[serde(rename = "createdAt")]
    pub created_at: bson::DateTime,
    #[serde(rename = "updatedAt")]
    pub updated_at: bson::DateTime,
}

/// Subtask is one chunk of a task's candidate space.
/// `(task_id, part_number)` is unique.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Subtask {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "taskId")]
    pub task_id: ObjectId,
    #[serde(rename = "partNumber")]
    pub part_number: u64,
    pub status: SubtaskStatus,
    /// Plaintexts cracked within this chunk so far.
    #[serde(default)]
    pub data: Vec<String>,
    #[serde(default)]
    pub percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: bson::DateTime,
    #[serde(rename = "updatedAt")]
    pub updated_at: bson::DateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    PartialReady,
    Ready,
    Error,
}

impl TaskStatus {
    /// Terminal statuses admit no further transitions other than
    /// expiration deletion.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PartialReady | Self::Ready | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::PartialReady => "PARTIAL_READY",
            Self::Ready => "READY",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskStatus {
    Pending,
    InProgress,
    Success,
    Error,
}

impl SubtaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_terminality() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::PartialReady.is_terminal());
        assert!(TaskStatus::Ready.is_terminal());
        assert!(TaskStatus::Error.is_terminal());

        assert!(!SubtaskStatus::Pending.is_terminal());
        assert!(!SubtaskStatus::InProgress.is_terminal());
        assert!(SubtaskStatus::Success.is_terminal());
        assert!(SubtaskStatus::Error.is_terminal());
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::PartialReady).unwrap(),
            r#""PARTIAL_READY""#
        );
        assert_eq!(
            serde_json::from_str::<SubtaskStatus>(r#""IN_PROGRESS""#).unwrap(),
            SubtaskStatus::InProgress
        );
    }
}
