use rmq_manager::{ConfigBuilder, MemoryBroker, QueueManager};
use std::time::Duration;

/// Walkthrough of the main operations against the in-memory broker.
/// Swap `MemoryBroker::new().connector()` for a connector backed by a
/// real driver to run the same code against a live broker.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let broker = MemoryBroker::new();
    let config = ConfigBuilder::new()
        .queue("example_queue")
        .durable(true)
        .confirm_delivery(true)
        .build();
    let mut manager = QueueManager::with_config(broker.connector(), config);

    // Scoped usage: opens on entry, closes on every exit path.
    manager
        .with_open(|queue| {
            Box::pin(async move {
                let delivered = queue.add("Hello, queue!").await?;
                println!("message sent: {delivered}");
                println!("messages in queue: {}", queue.size().await?);

                let message = queue.get().await?;
                println!("retrieved: {message:?}");
                println!("queue size after retrieval: {}", queue.size().await?);
                Ok(())
            })
        })
        .await?;

    // Batch processing: publish a batch, then drain it lazily.
    let work_items = ["task_1", "task_2", "task_3", "task_4", "task_5"];
    manager.add_all(work_items).await?;
    let total = manager.size().await?;
    println!("\nprocessing {total} work items");

    let mut processed = 0;
    let mut messages = manager.messages();
    while let Some(item) = messages.next().await? {
        processed += 1;
        println!("  [{processed}/{total}] processing: {item}");
    }

    // Waiting with a timeout: an empty queue gives up with no error.
    let waited = manager.consume(Some(Duration::from_millis(300))).await?;
    println!("\nconsume on empty queue returned: {waited:?}");

    manager.close().await;
    Ok(())
}
