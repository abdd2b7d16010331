use rmq_manager::{MemoryBroker, QueueManager};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct Task {
    id: u32,
    data: String,
}

/// Producer/consumer pattern: one side publishes JSON task records, the
/// other blocks on `consume` until work arrives or the deadline passes.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let broker = MemoryBroker::new();
    let mut manager = QueueManager::new(broker.connector(), "task_queue");

    // Producer phase.
    for id in 1..=3 {
        let task = Task {
            id,
            data: format!("record {id}"),
        };
        manager.add(serde_json::to_string(&task)?).await?;
    }
    println!("produced {} tasks", manager.size().await?);

    // Consumer phase: block up to two seconds per task.
    loop {
        match manager.consume(Some(Duration::from_secs(2))).await? {
            Some(payload) => {
                let task: Task = serde_json::from_str(&payload)?;
                println!("consumed task {}: {}", task.id, task.data);
            }
            None => {
                println!("no more work, shutting down");
                break;
            }
        }
    }

    manager.close().await;
    Ok(())
}
