use crate::task::TaskId;

/// Faults raised by [`AsyncCompileTask`](crate::AsyncCompileTask) accessors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task has not been finalized by a successful `poll` yet.
    #[error("compile task {0} has not finished")]
    NotFinished(TaskId),

    /// The task finished without loading a module.
    #[error("compile task {task} failed: {reason}")]
    Failed { task: TaskId, reason: String },
}

/// Result type for task accessors.
pub type TaskResult<T> = Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_names_task_and_reason() {
        let e = TaskError::Failed {
            task: TaskId("t-1".into()),
            reason: "compilation of `QuillModule1` failed".into(),
        };
        assert_eq!(
            e.to_string(),
            "compile task t-1 failed: compilation of `QuillModule1` failed"
        );
        assert_eq!(
            TaskError::NotFinished(TaskId("t-2".into())).to_string(),
            "compile task t-2 has not finished"
        );
    }
}
