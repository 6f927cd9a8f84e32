use models::{ResultStatus, Subtask, SubtaskStatus, Task, TaskResult, TaskStatus};

/// Presence flags over a task's subtask statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags {
    pub has_success: bool,
    pub has_error: bool,
    pub has_in_progress: bool,
    pub has_pending: bool,
}

pub fn status_flags(subtasks: &[Subtask]) -> StatusFlags {
    let mut flags = StatusFlags::default();
    for subtask in subtasks {
        match subtask.status {
            SubtaskStatus::Success => flags.has_success = true,
            SubtaskStatus::Error => flags.has_error = true,
            SubtaskStatus::InProgress => flags.has_in_progress = true,
            SubtaskStatus::Pending => flags.has_pending = true,
        }
    }
    flags
}

/// The finalization rule: map subtask statuses to the task's terminal
/// status, or `None` while any subtask is still pending or running.
/// For the all-error case the second element carries the subtask
/// reasons joined with "; ".
pub fn finalize(subtasks: &[Subtask]) -> Option<(TaskStatus, Option<String>)> {
    let flags = status_flags(subtasks);
    if flags.has_in_progress || flags.has_pending {
        return None;
    }
    Some(match (flags.has_error, flags.has_success) {
        (true, true) => (TaskStatus::PartialReady, None),
        (true, false) => (TaskStatus::Error, Some(joined_reasons(subtasks))),
        (false, true) => (TaskStatus::Ready, None),
        // A task always owns at least one subtask; an empty set never
        // reaches finalization.
        (false, false) => return None,
    })
}

fn joined_reasons(subtasks: &[Subtask]) -> String {
    subtasks
        .iter()
        .filter_map(|subtask| subtask.reason.as_deref())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Prefix `reason` with an already-recorded reason, if any.
pub fn append_reason(existing: Option<&str>, reason: &str) -> String {
    match existing {
        Some(existing) if !existing.is_empty() => format!("{existing}; {reason}"),
        _ => reason.to_string(),
    }
}

/// Apply a worker's result to the targeted subtask: a partial update
/// of status and reason, plus data and percent when an answer is
/// attached. Re-applying the same result is idempotent.
pub fn apply_result(subtask: &mut Subtask, result: &TaskResult, now: bson::DateTime) {
    subtask.status = match result.status {
        ResultStatus::InProgress => SubtaskStatus::InProgress,
        ResultStatus::Success => SubtaskStatus::Success,
        ResultStatus::Error => SubtaskStatus::Error,
    };
    subtask.reason = result.error.clone();
    if let Some(answer) = &result.answer {
        subtask.data = answer.words.clone();
        subtask.percent = answer.percent;
    }
    subtask.updated_at = now;
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskStatusOutput {
    pub status: TaskStatus,
    pub data: Vec<String>,
    pub percent: f64,
    pub subtasks: Vec<SubtaskStatusOutput>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SubtaskStatusOutput {
    pub status: SubtaskStatus,
    pub data: Vec<String>,
    pub percent: f64,
}

/// Project a task aggregate into its status view: `data` is the union
/// of subtask findings (suppressed entirely for failed tasks) and
/// `percent` the mean of subtask percents, capped at 100.
pub fn status_output(task: &Task, subtasks: &[Subtask]) -> TaskStatusOutput {
    let mut data = Vec::new();
    let mut percent = 0.0;
    let mut outputs = Vec::with_capacity(subtasks.len());

    for subtask in subtasks {
        if task.part_count > 0 {
            percent += subtask.percent / task.part_count as f64;
        }
        if task.status != TaskStatus::Error {
            data.extend(subtask.data.iter().cloned());
        }
        outputs.push(SubtaskStatusOutput {
            status: subtask.status,
            data: subtask.data.clone(),
            percent: subtask.percent,
        });
    }

    TaskStatusOutput {
        status: task.status,
        data,
        percent: percent.min(100.0),
        subtasks: outputs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;

    fn subtask(status: SubtaskStatus, reason: Option<&str>) -> Subtask {
        Subtask {
            id: ObjectId::new(),
            task_id: ObjectId::new(),
            part_number: 0,
            status,
            data: Vec::new(),
            percent: 0.0,
            reason: reason.map(String::from),
            created_at: bson::DateTime::now(),
            updated_at: bson::DateTime::now(),
        }
    }

    #[test]
    fn finalize_truth_table() {
        use SubtaskStatus::*;

        // Any pending or running subtask defers finalization.
        assert_eq!(finalize(&[subtask(Pending, None)]), None);
        assert_eq!(
            finalize(&[subtask(Success, None), subtask(InProgress, None)]),
            None
        );
        assert_eq!(
            finalize(&[subtask(Error, None), subtask(Pending, None)]),
            None
        );

        // All terminal: the three outcomes.
        assert_eq!(
            finalize(&[subtask(Success, None), subtask(Success, None)]),
            Some((TaskStatus::Ready, None))
        );
        assert_eq!(
            finalize(&[subtask(Success, None), subtask(Error, Some("boom"))]),
            Some((TaskStatus::PartialReady, None))
        );
        assert_eq!(
            finalize(&[subtask(Error, Some("a")), subtask(Error, Some("b"))]),
            Some((TaskStatus::Error, Some("a; b".to_string())))
        );
    }

    #[test]
    fn finalize_is_order_independent() {
        use SubtaskStatus::*;
        let mut subtasks = vec![
            subtask(Error, Some("x")),
            subtask(Success, None),
            subtask(Success, None),
        ];
        let forward = finalize(&subtasks);
        subtasks.reverse();
        assert_eq!(forward, finalize(&subtasks));
    }

    #[test]
    fn reasons_accumulate() {
        assert_eq!(append_reason(None, "boom"), "boom");
        assert_eq!(append_reason(Some("first"), "boom"), "first; boom");
    }
}
