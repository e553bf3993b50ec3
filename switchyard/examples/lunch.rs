//! Lunch Service Example - discovery, routed calls and broadcasts over a
//! partitioned in-process space.
//!
//! This example walks through the whole client path:
//! - A partitioned `LunchService` is hosted on a local space and
//!   advertised in the registry
//! - A stateful binding resolves it and keeps it fresh in the background
//! - Restaurants are added with routed calls (routed on their name)
//! - A suggestion is gathered with a broadcast and reduced to the first hit
//! - The space is taken down and brought back under a new name; the binding
//!   follows the new registration
//!
//! # Usage
//!
//! ```bash
//! cargo run --example lunch
//! cargo run --example lunch -- --partitions 5 --rebind-interval-ms 200
//! RUST_LOG=debug cargo run --example lunch
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use switchyard::{
    FaultGuard, FaultGuardConfig, FirstNonNullReducer, InMemoryServiceRegistry, LocalPartition,
    LocalPartitionedComponent, LocalPartitionedTransport, PropertyRouter, RebindConfig,
    RebindScheduler, RemoteFailure, RemoteServiceClient, RemotingBinder, RemotingError,
    ServiceBinder, ServiceComponents, ServiceEntry, ServiceExporter, ServiceKey,
    ServiceMethodTable, ServiceRegistry, Settings, StatefulBinding, TokioTimeProvider,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LUNCH_SERVICE: &str = "com.example.lunch.LunchService";
const ADD_RESTAURANT: &str = "addLunchRestaurant(LunchRestaurant)";
const SUGGEST_RESTAURANT: &str = "suggestRandomLunchRestaurant(String)";

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "lunch")]
#[command(about = "Partitioned lunch service behind a stateful binding", long_about = None)]
struct Args {
    /// Number of partitions of the lunch space
    #[arg(long, default_value = "3")]
    partitions: u32,

    /// Delay between rebind attempts while the binding is stale
    #[arg(long, default_value = "500")]
    rebind_interval_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LunchRestaurant {
    name: String,
    food_type: String,
}

type Store = Arc<Mutex<HashMap<String, LunchRestaurant>>>;

fn lunch_exporter(store: Store) -> ServiceExporter {
    let add_store = Arc::clone(&store);
    ServiceExporter::new(LUNCH_SERVICE)
        .method(ADD_RESTAURANT, move |args| {
            let store = Arc::clone(&add_store);
            async move {
                let restaurant: LunchRestaurant = first_arg(&args)?;
                store.lock().insert(restaurant.name.clone(), restaurant);
                Ok::<_, RemoteFailure>(Value::Null)
            }
        })
        .method(SUGGEST_RESTAURANT, move |args| {
            let store = Arc::clone(&store);
            async move {
                let food_type: String = first_arg(&args)?;
                let suggestion = store
                    .lock()
                    .values()
                    .find(|r| r.food_type == food_type)
                    .cloned();
                Ok::<_, RemoteFailure>(json!(suggestion))
            }
        })
}

fn first_arg<T: serde::de::DeserializeOwned>(args: &[Value]) -> Result<T, RemoteFailure> {
    let arg = args
        .first()
        .cloned()
        .ok_or_else(|| RemoteFailure::new("IllegalArgumentException", "missing argument"))?;
    serde_json::from_value(arg)
        .map_err(|e| RemoteFailure::new("IllegalArgumentException", e.to_string()))
}

fn lunch_space(name: &str, partitions: u32) -> Arc<LocalPartitionedTransport> {
    let partitions = (0..partitions)
        .map(|_| LocalPartition::new().export(lunch_exporter(Store::default())))
        .collect();
    Arc::new(LocalPartitionedTransport::new(name, partitions))
}

fn lunch_entry(space_name: &str) -> Result<ServiceEntry, RemotingError> {
    let url = format!("jini://*/*/{}", space_name);
    Ok(ServiceEntry::new(
        ServiceKey::unqualified(LUNCH_SERVICE),
        LocalPartitionedComponent::service_properties(&url)?,
        60_000,
    ))
}

async fn add_restaurant(
    binding: &StatefulBinding<RemoteServiceClient>,
    name: &str,
    food_type: &str,
) -> Result<(), RemotingError> {
    let restaurant = LunchRestaurant {
        name: name.to_string(),
        food_type: food_type.to_string(),
    };
    binding
        .call(|client| async move {
            client
                .invoke::<Value>(ADD_RESTAURANT, vec![json!(restaurant)])
                .await
                .map(|_| ())
        })
        .await
}

async fn suggest(
    binding: &StatefulBinding<RemoteServiceClient>,
    food_type: &str,
) -> Result<Option<LunchRestaurant>, RemotingError> {
    binding
        .call(|client| async move {
            client
                .invoke_broadcast(
                    SUGGEST_RESTAURANT,
                    vec![json!(food_type)],
                    &FirstNonNullReducer,
                )
                .await
        })
        .await
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let settings = Settings::new();
    settings.set_long("beanRebindAttemptIntervalMillis", args.rebind_interval_ms);

    // Provider side: host the space and advertise it.
    let local = Arc::new(LocalPartitionedComponent::new());
    let primary = lunch_space("lunchSpace", args.partitions);
    local.host(Arc::clone(&primary) as _);
    let registry = Arc::new(InMemoryServiceRegistry::new());
    registry.register(lunch_entry("lunchSpace")?, 60_000).await;

    // Consumer side: bind and keep the binding fresh.
    let methods = Arc::new(
        ServiceMethodTable::builder()
            .routed(ADD_RESTAURANT, PropertyRouter::new(0, "name"))
            .broadcast(SUGGEST_RESTAURANT)
            .build(),
    );
    let guard = FaultGuard::new(FaultGuardConfig::from_settings(&settings)?);
    let binder: Arc<dyn ServiceBinder<RemoteServiceClient>> = Arc::new(RemotingBinder::new(
        ServiceComponents::new().with(Arc::clone(&local) as _),
        guard.clone(),
        methods,
    ));
    let binding = StatefulBinding::bind(
        ServiceKey::unqualified(LUNCH_SERVICE),
        Arc::clone(&registry) as _,
        binder,
    )
    .await?;

    let cancel = CancellationToken::new();
    let scheduler = RebindScheduler::new(
        &binding,
        RebindConfig::from_settings(&settings)?,
        TokioTimeProvider::shared(),
        cancel.clone(),
    )
    .spawn();

    tracing::info!(partitions = args.partitions, "lunch service bound");

    for (name, food_type) in [
        ("Pizza Place", "pizza"),
        ("Sushi Bar", "sushi"),
        ("Napoli", "pizza"),
        ("Taco Truck", "mexican"),
    ] {
        add_restaurant(&binding, name, food_type).await?;
    }
    let suggestion = suggest(&binding, "pizza").await?;
    tracing::info!(suggestion = ?suggestion, "pizza suggestion");

    // Take the space down: the next call fails and marks the binding stale.
    primary.set_available(false);
    if let Err(e) = add_restaurant(&binding, "Burger Joint", "burger").await {
        tracing::warn!(error = %e, healthy = binding.is_healthy(), "call failed");
    }

    // A replacement space shows up under a new name.
    local.host(lunch_space("lunchSpaceBackup", args.partitions) as _);
    registry.register(lunch_entry("lunchSpaceBackup")?, 60_000).await;
    while !binding.is_healthy() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let space = binding
        .entry()
        .and_then(|entry| entry.properties.get("spaceName").map(str::to_string));
    tracing::info!(space = ?space, "binding followed the new registration");

    add_restaurant(&binding, "Burger Joint", "burger").await?;
    let suggestion = suggest(&binding, "burger").await?;
    tracing::info!(suggestion = ?suggestion, "burger suggestion");

    if let Some(client) = binding.current() {
        let group = client.command_group();
        tracing::info!(group = %group, stats = ?guard.stats(&group), "fault guard");
    }

    cancel.cancel();
    scheduler.await?;
    Ok(())
}
