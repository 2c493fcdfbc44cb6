//! Preview command: print upcoming occurrences without running the engine.

use std::path::Path;

use chime_scheduler::{ScheduledTask, next_occurrence};
use chrono::{DateTime, Utc};
use miette::Result;

use crate::task_file;

/// Run the preview command.
pub async fn run(tasks_path: &Path, count: usize) -> Result<()> {
    let tasks = task_file::load(tasks_path)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    for task in &tasks {
        println!("{} ({})", task.title, task.id);
        let occurrences = upcoming(task, count);
        for at in &occurrences {
            println!("  {}", at.to_rfc3339());
        }
        if occurrences.len() < count {
            println!("  (no further occurrence)");
        }
    }

    Ok(())
}

/// Up to `count` run times for `task`, starting with `next_run_at`.
///
/// Each following occurrence is computed as if the task fired exactly on
/// time.
pub fn upcoming(task: &ScheduledTask, count: usize) -> Vec<DateTime<Utc>> {
    let mut occurrences = Vec::with_capacity(count);
    if count == 0 || !task.is_schedulable() {
        return occurrences;
    }

    let mut current = task.next_run_at;
    occurrences.push(current);
    while occurrences.len() < count {
        let Some(next) = task
            .recurrence_rule
            .as_ref()
            .and_then(|rule| next_occurrence(current, rule, current))
        else {
            break;
        };
        occurrences.push(next);
        current = next;
    }
    occurrences
}
