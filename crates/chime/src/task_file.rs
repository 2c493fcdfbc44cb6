//! Loading tasks from a JSON file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chime_scheduler::ScheduledTask;
use thiserror::Error;

/// Errors reading a task file.
#[derive(Debug, Error)]
pub enum TaskFileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("duplicate task id in {path}: {id}")]
    DuplicateId { path: PathBuf, id: String },
}

/// Read a JSON array of tasks, rejecting duplicate ids.
pub async fn load(path: &Path) -> Result<Vec<ScheduledTask>, TaskFileError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| TaskFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    parse(path, &contents)
}

fn parse(path: &Path, contents: &str) -> Result<Vec<ScheduledTask>, TaskFileError> {
    let tasks: Vec<ScheduledTask> =
        serde_json::from_str(contents).map_err(|source| TaskFileError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let mut seen = HashSet::new();
    for task in &tasks {
        if !seen.insert(task.id.as_str()) {
            return Err(TaskFileError::DuplicateId {
                path: path.to_path_buf(),
                id: task.id.clone(),
            });
        }
    }

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_scheduler::RecurrenceKind;
    use std::io::Write;

    const SAMPLE: &str = r#"[
        {
            "id": "water",
            "accountId": "me",
            "title": "Drink water",
            "nextRunAt": "2025-01-01T09:00:00Z",
            "recurrenceRule": {"kind": "DAILY", "interval": 1}
        },
        {
            "id": "call-mom",
            "accountId": "me",
            "title": "Call mom",
            "taskKind": "deadline",
            "priorityLevel": "high",
            "nextRunAt": "2025-01-05T18:30:00Z",
            "payload": {"sourceType": "goal", "sourceId": "family"}
        }
    ]"#;

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let tasks = load(file.path()).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(
            tasks[0].recurrence_rule.as_ref().map(|r| r.kind),
            Some(RecurrenceKind::Daily)
        );
        assert_eq!(tasks[1].payload.source_id(), Some("family"));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load(&dir.path().join("nope.json")).await;
        assert!(matches!(result, Err(TaskFileError::Io { .. })));
    }

    #[test]
    fn test_parse_error() {
        let result = parse(Path::new("bad.json"), "{not json");
        assert!(matches!(result, Err(TaskFileError::Parse { .. })));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let contents = r#"[
            {"id": "a", "accountId": "me", "title": "x", "nextRunAt": "2025-01-01T00:00:00Z"},
            {"id": "a", "accountId": "me", "title": "y", "nextRunAt": "2025-01-02T00:00:00Z"}
        ]"#;
        match parse(Path::new("dup.json"), contents) {
            Err(TaskFileError::DuplicateId { id, .. }) => assert_eq!(id, "a"),
            other => panic!("expected duplicate id error, got {:?}", other),
        }
    }
}
