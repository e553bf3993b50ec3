//! Shared fixtures for the integration tests.
//!
//! - [`CountingTransport`]: a mock transport counting dispatches, with
//!   scriptable per-partition behavior.
//! - The lunch domain: a partitioned `LunchService` hosted on
//!   [`LocalPartitionedTransport`], plus its method table.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use switchyard::{
    ArgumentRouter, FaultGuard, InvocationRequest, InvocationResponse, JsonCodec, LocalPartition,
    LocalPartitionedTransport, MessageCodec, PropertyRouter, Provenance, RemoteFailure,
    RemoteServiceClient, RemotingClient, RemotingError, RemotingTransport, ResponseFuture,
    RoutingKey, ServiceExporter, ServiceMethodTable,
};

pub const LUNCH_SERVICE: &str = "com.example.lunch.LunchService";
pub const SPACE: &str = "mySpace";

pub const ADD_RESTAURANT: &str = "addLunchRestaurant(LunchRestaurant)";
pub const GET_RESTAURANT: &str = "getLunchRestaurant(GetLunchRestaurantRequest)";
pub const SUGGEST_RESTAURANT: &str = "suggestRandomLunchRestaurant(String)";
pub const GET_BY_NAME: &str = "getLunchRestaurantByName(String)";

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Counting mock transport
// =============================================================================

/// What the mock does with a dispatch to one partition.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer with this value.
    Answer(Value),
    /// Report an application failure.
    Fail(RemoteFailure),
    /// Fail as unreachable.
    Unavailable,
    /// Answer after a delay.
    Delayed(Duration, Value),
    /// Never answer.
    Hang,
}

type Script = Arc<dyn Fn(u32) -> Behavior + Send + Sync>;

/// Increments a counter when dropped before completion.
struct DropCounter {
    counter: Arc<AtomicUsize>,
    armed: bool,
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        if self.armed {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct CountingTransport {
    group: String,
    partitions: AtomicU32,
    dispatched: AtomicUsize,
    abandoned: Arc<AtomicUsize>,
    script: Mutex<Script>,
}

impl std::fmt::Debug for CountingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountingTransport")
            .field("group", &self.group)
            .field("partitions", &self.partitions.load(Ordering::SeqCst))
            .finish()
    }
}

impl CountingTransport {
    pub fn new(group: &str, partitions: u32) -> Arc<Self> {
        Arc::new(Self {
            group: group.to_string(),
            partitions: AtomicU32::new(partitions),
            dispatched: AtomicUsize::new(0),
            abandoned: Arc::new(AtomicUsize::new(0)),
            script: Mutex::new(Arc::new(|_: u32| Behavior::Answer(Value::Null))),
        })
    }

    pub fn script(&self, script: impl Fn(u32) -> Behavior + Send + Sync + 'static) {
        *self.script.lock() = Arc::new(script);
    }

    pub fn set_partition_count(&self, partitions: u32) {
        self.partitions.store(partitions, Ordering::SeqCst);
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Dispatches dropped before they answered.
    pub fn abandoned_count(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

impl RemotingTransport for CountingTransport {
    fn endpoint_group(&self) -> &str {
        &self.group
    }

    fn partition_count(&self) -> u32 {
        self.partitions.load(Ordering::SeqCst)
    }

    fn submit_partition_request(
        &self,
        _request: InvocationRequest,
        partition: u32,
    ) -> ResponseFuture {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        let script = Arc::clone(&*self.script.lock());
        let behavior = script(partition);
        let provenance = Provenance::partition(self.group.clone(), partition);
        let guard = DropCounter {
            counter: Arc::clone(&self.abandoned),
            armed: true,
        };
        Box::pin(async move {
            let mut guard = guard;
            let result = match behavior {
                Behavior::Answer(value) => Ok(encode(&value)),
                Behavior::Fail(failure) => Ok(InvocationResponse::failed(failure)),
                Behavior::Unavailable => Err(RemotingError::ServiceUnavailable {
                    message: "connection refused".to_string(),
                    provenance,
                }),
                Behavior::Delayed(delay, value) => {
                    tokio::time::sleep(delay).await;
                    Ok(encode(&value))
                }
                Behavior::Hang => std::future::pending().await,
            };
            guard.armed = false;
            result
        })
    }
}

fn encode(value: &Value) -> InvocationResponse {
    InvocationResponse::success(JsonCodec.encode(value).expect("encode"))
}

// =============================================================================
// Lunch domain
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LunchRestaurant {
    pub name: String,
    pub food_type: String,
}

impl LunchRestaurant {
    pub fn new(name: &str, food_type: &str) -> Self {
        Self {
            name: name.to_string(),
            food_type: food_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetLunchRestaurantRequest {
    pub name: String,
}

pub fn lunch_methods() -> Arc<ServiceMethodTable> {
    Arc::new(
        ServiceMethodTable::builder()
            .routed(ADD_RESTAURANT, PropertyRouter::new(0, "name"))
            .routed(GET_RESTAURANT, PropertyRouter::new(0, "name"))
            .routed(GET_BY_NAME, ArgumentRouter::first())
            .broadcast(SUGGEST_RESTAURANT)
            .build(),
    )
}

fn lunch_exporter(store: Arc<Mutex<HashMap<String, LunchRestaurant>>>) -> ServiceExporter {
    let add_store = Arc::clone(&store);
    let get_store = Arc::clone(&store);
    let by_name_store = Arc::clone(&store);
    ServiceExporter::new(LUNCH_SERVICE)
        .method(ADD_RESTAURANT, move |args| {
            let store = Arc::clone(&add_store);
            async move {
                let restaurant: LunchRestaurant = decode_arg(&args, 0)?;
                store.lock().insert(restaurant.name.clone(), restaurant);
                Ok::<_, RemoteFailure>(Value::Null)
            }
        })
        .method(GET_RESTAURANT, move |args| {
            let store = Arc::clone(&get_store);
            async move {
                let request: GetLunchRestaurantRequest = decode_arg(&args, 0)?;
                if request.name == "throwException" {
                    return Err(RemoteFailure::new(
                        "IllegalArgumentException",
                        format!("Illegal restaurant: {}", request.name),
                    ));
                }
                let found = store.lock().get(&request.name).cloned();
                Ok::<_, RemoteFailure>(json!(found))
            }
        })
        .method(GET_BY_NAME, move |args| {
            let store = Arc::clone(&by_name_store);
            async move {
                let name: String = decode_arg(&args, 0)?;
                let found = store.lock().get(&name).cloned();
                Ok::<_, RemoteFailure>(json!(found))
            }
        })
        .method(SUGGEST_RESTAURANT, move |args| {
            let store = Arc::clone(&store);
            async move {
                let food_type: String = decode_arg(&args, 0)?;
                let mut candidates: Vec<LunchRestaurant> = store
                    .lock()
                    .values()
                    .filter(|r| r.food_type == food_type)
                    .cloned()
                    .collect();
                candidates.sort_by(|a, b| a.name.cmp(&b.name));
                Ok::<_, RemoteFailure>(json!(candidates.into_iter().next()))
            }
        })
}

fn decode_arg<T: serde::de::DeserializeOwned>(
    args: &[Value],
    index: usize,
) -> Result<T, RemoteFailure> {
    let arg = args
        .get(index)
        .cloned()
        .ok_or_else(|| RemoteFailure::new("IllegalArgumentException", "missing argument"))?;
    serde_json::from_value(arg).map_err(|e| RemoteFailure::new("SerializationException", e.to_string()))
}

/// A lunch space named [`SPACE`] with `partitions` partitions.
pub fn lunch_space(partitions: u32) -> Arc<LocalPartitionedTransport> {
    lunch_space_named(SPACE, partitions)
}

/// A lunch space with `partitions` partitions, each with its own store.
pub fn lunch_space_named(name: &str, partitions: u32) -> Arc<LocalPartitionedTransport> {
    let partitions = (0..partitions)
        .map(|_| {
            LocalPartition::new().export(lunch_exporter(Arc::new(Mutex::new(HashMap::new()))))
        })
        .collect();
    Arc::new(LocalPartitionedTransport::new(name, partitions))
}

/// A lunch client over any transport.
pub fn lunch_client(transport: Arc<dyn RemotingTransport>, guard: FaultGuard) -> RemoteServiceClient {
    RemoteServiceClient::new(
        LUNCH_SERVICE,
        lunch_methods(),
        RemotingClient::new(transport, guard),
    )
}

/// A restaurant name whose routing key lands on `partition` of `count`.
pub fn name_on_partition(partition: u32, count: u32) -> String {
    (0..)
        .map(|i| format!("restaurant-{}", i))
        .find(|name| RoutingKey::of(&json!(name)).partition(count) == partition)
        .expect("some name lands on every partition")
}
