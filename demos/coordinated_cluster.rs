//! Example of a three-node cluster sharing an in-memory coordinator.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example coordinated_cluster

use partition_router::cluster::CoordinatedDiscovery;
use partition_router::testing::{InMemoryCoordinator, InMemoryTenantProvider};
use partition_router::{
    DiscoveryConfig, DiscoveryService, LocalService, MemberDescriptor, PartitionConfig,
    PartitionService, QueueKey, QueueType,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;

struct Node {
    service: Arc<PartitionService>,
    discovery: CoordinatedDiscovery<partition_router::testing::InMemoryBackend>,
}

fn node(hub: &InMemoryCoordinator, service_id: &str) -> Result<Node, Box<dyn std::error::Error>> {
    let service = Arc::new(PartitionService::new(
        PartitionConfig::default(),
        Arc::new(InMemoryTenantProvider::new()),
    )?);
    let descriptor = MemberDescriptor::new(service_id)
        .with_queue_types([QueueType::Core, QueueType::RuleEngine]);
    let discovery = CoordinatedDiscovery::new(
        Arc::new(LocalService::new(descriptor)),
        hub.session(),
        service.clone(),
        DiscoveryConfig::default().with_recalculate_delay(Duration::from_secs(2)),
        service.metrics().clone(),
    )?;
    Ok(Node { service, discovery })
}

fn print_ownership(nodes: &[(&str, &Node)]) {
    let key = QueueKey::main(QueueType::Core);
    for (name, node) in nodes {
        println!("  {}: {:?}", name, node.service.my_partitions(&key));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            env::var("RUST_LOG").unwrap_or_else(|_| "partition_router=info".to_string()),
        )
        .init();

    let hub = InMemoryCoordinator::new();
    let mut a = node(&hub, "tb-node-a")?;
    let mut b = node(&hub, "tb-node-b")?;
    let mut c = node(&hub, "tb-node-c")?;

    for n in [&mut a, &mut b, &mut c] {
        n.discovery.start().await?;
        n.discovery.wait_connected().await?;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("Core partitions with three nodes:");
    print_ownership(&[("a", &a), ("b", &b), ("c", &c)]);

    // A fast restart of node c inside the debounce window moves nothing
    hub.expire("tb-node-c");
    tokio::time::sleep(Duration::from_millis(500)).await;
    c.discovery.wait_connected().await?;
    println!("After a fast restart of c:");
    print_ownership(&[("a", &a), ("b", &b), ("c", &c)]);

    // A real departure is applied once the window passes
    c.discovery.shutdown().await?;
    tokio::time::sleep(Duration::from_secs(3)).await;
    println!("After c left:");
    print_ownership(&[("a", &a), ("b", &b)]);

    println!("a metrics: {:?}", a.service.metrics().snapshot());
    a.discovery.shutdown().await?;
    b.discovery.shutdown().await?;
    Ok(())
}
