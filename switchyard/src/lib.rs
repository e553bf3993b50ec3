//! # Switchyard
//!
//! Remote invocation and service discovery for partitioned services.
//!
//! This crate provides:
//! - **Registry**: in-process directory of live service entries with leases
//! - **Routers**: derive the partition routing key from call arguments
//! - **Transport SPI**: dispatch to one partition, a batch, or all partitions
//! - **Remoting clients**: routed, routed-batch and broadcast calls with
//!   application-defined reduction
//! - **Fault guard**: bulkhead, timeout and circuit breaker per command group
//! - **Bindings**: cached service handles re-resolved in the background when
//!   their endpoint goes away

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export core types for convenience
pub use switchyard_core::{
    headers, CodecError, InvocationRequest, InvocationResponse, JsonCodec, MessageCodec,
    RemoteFailure, RoutingKey, ServiceEntry, ServiceKey, ServiceProperties, SettingValue,
    Settings, SettingsError, SharedTimeProvider, TimeProvider, TokioTimeProvider,
};

// =============================================================================
// Modules
// =============================================================================

/// Error taxonomy of remote invocations.
pub mod error;

/// Service registry.
pub mod registry;

/// Routing key strategies.
pub mod router;

/// Transport SPI and the in-process partitioned transport.
pub mod transport;

/// Fault isolation per command group.
pub mod fault;

/// Remoting clients and reducers.
pub mod remoting;

/// Stateful bindings and the rebind scheduler.
pub mod binding;

/// Service component table and the remoting binder.
pub mod component;

// =============================================================================
// Public API Re-exports
// =============================================================================

// Error exports
pub use error::{Provenance, RemotingError};

// Registry exports
pub use registry::{
    InMemoryServiceRegistry, LeasePolicy, RegistryConfig, RegistryError, ServiceRegistry,
};

// Router exports
pub use router::{ArgumentRouter, PropertyRouter, Router};

// Transport exports
pub use transport::{
    LocalPartition, LocalPartitionedTransport, PartitionResponse, RemotingTransport,
    ResponseFuture, ResponseStream, RoutedRequest, ServiceExporter,
};

// Fault exports
pub use fault::{
    BreakerStatus, CommandGroup, FanOutPermit, FaultError, FaultGuard, FaultGuardConfig,
    GroupStats, GuardedError, RejectReason,
};

// Remoting exports
pub use remoting::{
    CollectAllReducer, FirstNonNullReducer, RemoteResult, RemoteResultReducer,
    RemoteServiceClient, RemotingClient, ServiceMethodTable,
};

// Binding exports
pub use binding::{
    BindError, RebindConfig, RebindScheduler, Rebindable, ServiceBinder, StatefulBinding,
};

// Component exports
pub use component::{
    LocalPartitionedComponent, RemotingBinder, ServiceComponent, ServiceComponents,
};
