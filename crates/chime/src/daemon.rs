//! Run command: host the reminder engine over a task file.

use std::path::Path;

use chime_scheduler::memory::{BroadcastNotifier, InMemoryTaskStore};
use chime_scheduler::{EngineConfig, ReminderEngine, TriggeredEvent};
use miette::Result;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::task_file;

/// Run the engine until Ctrl-C.
pub async fn run(tasks_path: &Path, config: EngineConfig) -> Result<()> {
    let tasks = task_file::load(tasks_path)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    info!(count = tasks.len(), path = %tasks_path.display(), "loaded task file");

    let store = InMemoryTaskStore::with_tasks(tasks);
    let notifier = BroadcastNotifier::new();
    let mut events = notifier.subscribe();

    let (engine, handle) = ReminderEngine::new(store.clone(), store, notifier, config)
        .map_err(|e| miette::miette!("{}", e))?;
    let engine_task = engine.spawn();

    handle
        .start()
        .await
        .map_err(|e| miette::miette!("failed to start engine: {}", e))?;

    let status = handle
        .status()
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    info!(
        queue_size = status.queue_size,
        next_execution_time = ?status.next_execution_time,
        "engine started"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event listener fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    if let Err(e) = handle.stop().await {
        warn!(error = %e, "failed to stop engine");
    }
    handle.shutdown().await;
    if let Err(e) = engine_task.await {
        warn!(error = %e, "engine task ended abnormally");
    }

    info!("chime shut down gracefully");
    Ok(())
}

fn log_event(event: &TriggeredEvent) {
    info!(
        task_id = %event.task_id,
        account_id = %event.account_id,
        source_type = ?event.source_type,
        source_id = ?event.source_id,
        occurred_at = %event.occurred_at,
        "reminder fired"
    );
}
