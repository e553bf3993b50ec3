//! Remote invocation: the three call modes over a transport.
//!
//! - **Routed**: one request to the partition owning its routing key.
//! - **Routed batch**: N routed requests dispatched concurrently, merged in
//!   arrival order.
//! - **Broadcast**: one request to every partition, reduced by a
//!   caller-supplied [`RemoteResultReducer`].
//!
//! Every sub-call runs through the [`FaultGuard`](crate::fault::FaultGuard)
//! of its command group.

mod client;
mod method;
mod reducer;

pub use client::{RemoteServiceClient, RemotingClient};
pub use method::{RemoteServiceMethod, ServiceMethodTable, ServiceMethodTableBuilder};
pub use reducer::{CollectAllReducer, FirstNonNullReducer, RemoteResult, RemoteResultReducer};
