//! Example of a single-node deployment.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example single_node

use partition_router::testing::InMemoryTenantProvider;
use partition_router::{
    DiscoveryService, EntityId, LocalService, MemberDescriptor, PartitionConfig,
    PartitionService, QueueType, QueueUpdate, SingleNodeDiscovery, TenantId, TenantProfileId,
    TenantRoutingInfo,
};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            env::var("RUST_LOG").unwrap_or_else(|_| "partition_router=info".to_string()),
        )
        .init();

    // One isolated tenant known to the tenant provider
    let provider = Arc::new(InMemoryTenantProvider::new());
    let tenant = TenantId::random();
    provider.insert(TenantRoutingInfo::new(tenant, TenantProfileId::random(), true));

    let config = PartitionConfig::default().with_hash_function("murmur3_128");
    let service = Arc::new(PartitionService::new(config, provider)?);
    let mut partition_events = service.notifier().subscribe_partitions();

    // A monolith serves every queue type
    let this = MemberDescriptor::new("monolith").with_queue_types(QueueType::ALL);
    let local = Arc::new(LocalService::new(this));
    let mut discovery = SingleNodeDiscovery::new(local, service.clone());
    discovery.start().await?;

    while let Some(event) = partition_events.try_recv() {
        let owned: usize = event.new_partitions.values().map(|set| set.len()).sum();
        println!("{}: now owning {} partitions", event.queue_type, owned);
    }

    // The isolated tenant gets its own rule-engine queue
    service.apply_queue_updates(&[QueueUpdate {
        tenant_id: tenant,
        queue_name: "Main".to_string(),
        topic: "tb_rule_engine.isolated".to_string(),
        partitions: 4,
        duplicate_msg_to_all_partitions: false,
    }])?;

    for _ in 0..3 {
        let entity = EntityId::random();
        let core = service.resolve(QueueType::Core, None, TenantId::SYSTEM, &entity)?;
        let rule_engine = service.resolve(QueueType::RuleEngine, None, tenant, &entity)?;
        println!(
            "entity {} -> {} (mine: {}), {} (mine: {})",
            entity,
            core.full_topic_name(),
            core.my_partition,
            rule_engine.full_topic_name(),
            rule_engine.my_partition
        );
    }

    println!("metrics: {:?}", service.metrics().snapshot());
    discovery.shutdown().await?;
    Ok(())
}
