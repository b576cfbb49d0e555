use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use workcrew_jobs::prelude::*;

mod telemetry;

use telemetry::{init_telemetry, TelemetryConfig};

/// Sends one email per queued task
struct Mailer;

#[async_trait]
impl WorkHandler for Mailer {
    async fn work(&self, task: Task) -> Result<WorkResult, WorkError> {
        let Some(item) = task.as_item() else {
            // Only reached with idle backoff disabled
            return Ok(WorkResult::Done);
        };
        if item.data["bounce"].as_bool().unwrap_or(false) {
            // Bounces are dropped; the mailer moves on to the next email
            tracing::warn!(task = %item.name, "Recipient bounced, skipping");
            return Ok(WorkResult::More);
        }
        tracing::info!(task = %item.name, to = %item.data["to"], "Email sent");
        Ok(WorkResult::More)
    }

    async fn on_start(&self) -> Result<(), WorkError> {
        tracing::debug!("Mailer connected");
        Ok(())
    }

    fn info(&self) -> Vec<(String, String)> {
        vec![("transport".to_string(), "log".to_string())]
    }
}

/// Reindexes a fixed number of pages, one page per invocation
fn reindexer(id: Identity, pages: i64) -> Worker {
    let cursor = Arc::new(AtomicI64::new(0));
    Worker::from_fn(id, move |_task| {
        let cursor = cursor.clone();
        async move {
            let page = cursor.fetch_add(1, Ordering::SeqCst);
            if page >= pages {
                return Ok(WorkResult::Done);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(WorkResult::next(page + 1, 1, "pages"))
        }
    })
}

fn seed(queue: &InMemoryQueue, count: usize) {
    queue.extend((0..count).map(|i| {
        TaskItem::new(
            format!("welcome-{i}"),
            json!({ "to": format!("user{i}@example.com"), "bounce": i % 10 == 9 }),
        )
        .with_from("emails")
        .with_job("welcome")
    }));
}

async fn until_completed(coordinators: &[&Coordinator]) {
    while !coordinators.iter().all(|c| c.is_completed()) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "workcrew_jobs=info,workcrew_worker=info")
    // - WORKCREW_*: Coordinator settings (see CoordinatorConfig::from_env)
    // - WORKCREW_DEMO_TASKS: Number of emails to seed (default: 25)
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter = Some("workcrew_jobs=info,workcrew_worker=info".to_string());
    }
    init_telemetry(&telemetry_config);

    tracing::info!("workcrew-worker starting...");

    let config = CoordinatorConfig::from_env().context("Invalid coordinator configuration")?;
    let tasks: usize = std::env::var("WORKCREW_DEMO_TASKS")
        .unwrap_or_else(|_| "25".to_string())
        .parse()
        .context("WORKCREW_DEMO_TASKS must be a number")?;
    let env = telemetry_config.environment.as_deref().unwrap_or("dev");

    let queue = Arc::new(InMemoryQueue::new("emails"));
    seed(&queue, tasks);

    let mailers = (0..3).map(|i| {
        Worker::with_handler(
            Identity::worker("signup", "emails", env).with_instance(format!("mailer-{i}")),
            Arc::new(Mailer),
        )
    });
    let emails = Coordinator::builder()
        .with_workers(mailers)
        .with_queue(queue.clone())
        .with_policy(|| ErrorRatio::new(0.5).with_min_runs(20))
        .with_config(config.clone())
        .build()
        .context("Failed to build email coordinator")?;

    let reindex_id = Identity::job("search", "reindex", env);
    let reindex = Coordinator::builder()
        .with_worker(reindexer(reindex_id.clone(), 10))
        .with_config(config.clone())
        .build()
        .context("Failed to build reindex coordinator")?;

    tracing::info!(
        tasks,
        workers = emails.ids().len() + reindex.ids().len(),
        idle_backoff = config.idle_backoff,
        "Starting workers"
    );

    let mut events = emails.subscribe();
    let seen = Arc::new(AtomicU64::new(0));
    let counter = {
        let seen = seen.clone();
        tokio::spawn(async move {
            while events.recv().await.is_ok() {
                seen.fetch_add(1, Ordering::Relaxed);
            }
        })
    };

    for (id, outcome) in emails.start_all().await {
        if let Err(e) = outcome {
            tracing::error!(worker = %id, error = %e, "Worker did not start");
        }
    }
    reindex
        .start(&reindex_id, Task::Empty, false)
        .await
        .context("Failed to start reindex job")?;

    // With idle backoff on (the default) the mailers keep polling for new mail,
    // so the demo runs until Ctrl-C. Set WORKCREW_IDLE_BACKOFF=false to exit
    // once the queue is drained.
    let coordinators = [&emails, &reindex];
    tokio::select! {
        _ = until_completed(&coordinators) => {
            tracing::info!("All workers completed");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            emails.stop_all(Some("shutdown")).await;
            reindex.stop_all(Some("shutdown")).await;
        }
    }

    emails.shutdown().await.context("Email coordinator did not shut down")?;
    reindex.shutdown().await.context("Reindex coordinator did not shut down")?;
    counter.abort();

    tracing::info!(
        completed = queue.completed_count(),
        abandoned = queue.abandoned_count(),
        events = seen.load(Ordering::Relaxed),
        "Worker shutdown complete"
    );
    Ok(())
}
