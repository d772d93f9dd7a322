use std::sync::Arc;
use std::time::Duration;

use syncopate::{Instance, InstanceConfig, LoopbackNetwork, MemoryLog, Operation};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("🎼 Syncopate Loopback Demo");
    println!("==========================");

    let network = LoopbackNetwork::new();

    let alice = Instance::initialize(
        InstanceConfig {
            instance_id: "alice".to_string(),
            sync_interval_ms: 100,
            ..Default::default()
        },
        Arc::new(MemoryLog::new()),
        Arc::new(network.distributor()),
    )
    .await?;

    let bob = Instance::initialize(
        InstanceConfig {
            instance_id: "bob".to_string(),
            sync_interval_ms: 100,
            ..Default::default()
        },
        Arc::new(MemoryLog::new()),
        Arc::new(network.distributor()),
    )
    .await?;

    bob.register_callback(|batch| {
        for op in batch {
            println!(
                "   bob observed {:?} on {} from {}: {:?}",
                op.kind,
                op.file_path,
                op.origin,
                op.content_text()
            );
        }
    });

    println!("\n✏️  alice edits src/main.rs");
    alice
        .submit(Operation::insert("src/main.rs", 1, 1, "fn main() {}\n", "alice"))
        .await?;
    alice
        .submit(Operation::replace(
            "src/main.rs",
            1,
            1,
            "fn main() { run() }\n",
            "fn main() {}\n",
            "alice",
        ))
        .await?;

    tokio::time::sleep(Duration::from_millis(300)).await;

    println!("\n↩️  alice undoes the replace, then redoes it");
    alice.undo().await?;
    alice.redo().await?;

    tokio::time::sleep(Duration::from_millis(300)).await;

    println!("\n📜 bob's log, newest first:");
    for op in bob.history(10).await? {
        println!(
            "   #{} {:?} {} ({} bytes)",
            op.operation_id, op.kind, op.file_path, op.content_length
        );
    }

    println!("\n📊 alice's counters:");
    println!("{}", serde_json::to_string_pretty(&alice.metrics())?);

    alice.shutdown().await?;
    bob.shutdown().await?;
    println!("\n👋 done");
    Ok(())
}
