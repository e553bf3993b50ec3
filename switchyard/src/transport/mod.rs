//! Transport SPI: the dispatch seam between the remoting client and a
//! backing store.
//!
//! A transport knows how many partitions its endpoint group has and how to
//! deliver one [`InvocationRequest`] to one partition. Everything else
//! (routing a key to a partition, fanning a batch or a broadcast out and
//! merging the answers in completion order) has a provided implementation
//! built on those two primitives, which a transport may override when its
//! backing store can do better.
//!
//! # Design
//!
//! Submission never blocks: every method returns a `'static + Send` future
//! or stream immediately. Dropping the future (or the merged stream) drops
//! every outstanding sub-call, which is how cancellation propagates down to
//! the dispatch.
//!
//! The partition count is read per call, so a topology change is picked up
//! by the next broadcast.

use std::fmt;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, FuturesUnordered};
use switchyard_core::{InvocationRequest, InvocationResponse, RoutingKey};

use crate::error::RemotingError;

mod local;

pub use local::{LocalPartition, LocalPartitionedTransport, ServiceExporter};

/// Pending answer to one dispatched request.
pub type ResponseFuture = BoxFuture<'static, Result<InvocationResponse, RemotingError>>;

/// Answers to several dispatched requests, in completion order.
pub type ResponseStream = BoxStream<'static, PartitionResponse>;

/// A request paired with the key selecting its partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedRequest {
    /// The request to dispatch.
    pub request: InvocationRequest,
    /// Key selecting the owning partition.
    pub routing_key: RoutingKey,
}

impl RoutedRequest {
    /// Pair `request` with `routing_key`.
    pub fn new(request: InvocationRequest, routing_key: RoutingKey) -> Self {
        Self {
            request,
            routing_key,
        }
    }
}

/// One item of a merged response stream.
#[derive(Debug)]
pub struct PartitionResponse {
    /// Submission index for routed batches, partition index for broadcasts.
    pub index: usize,
    /// What that sub-call produced.
    pub result: Result<InvocationResponse, RemotingError>,
}

/// Dispatch seam implemented once per backing store.
pub trait RemotingTransport: Send + Sync + fmt::Debug {
    /// Name of the endpoint group (e.g. the space name) this transport
    /// dispatches to.
    fn endpoint_group(&self) -> &str;

    /// Current number of partitions.
    fn partition_count(&self) -> u32;

    /// Dispatch `request` to the given partition.
    fn submit_partition_request(&self, request: InvocationRequest, partition: u32)
        -> ResponseFuture;

    /// Dispatch `request` to the partition owning `routing_key`.
    fn submit_routed_request(
        &self,
        request: InvocationRequest,
        routing_key: &RoutingKey,
    ) -> ResponseFuture {
        let partition = routing_key.partition(self.partition_count());
        self.submit_partition_request(request, partition)
    }

    /// Dispatch every request concurrently and merge the answers as they
    /// complete. An empty batch yields an empty stream.
    fn submit_routed_requests(&self, requests: Vec<RoutedRequest>) -> ResponseStream {
        let pending: FuturesUnordered<_> = requests
            .into_iter()
            .enumerate()
            .map(|(index, routed)| {
                let call = self.submit_routed_request(routed.request, &routed.routing_key);
                async move {
                    PartitionResponse {
                        index,
                        result: call.await,
                    }
                }
            })
            .collect();
        Box::pin(pending)
    }

    /// Dispatch `request` to every partition and merge the answers as they
    /// complete. Issues exactly [`partition_count`](Self::partition_count)
    /// dispatches.
    fn submit_broadcast_request(&self, request: InvocationRequest) -> ResponseStream {
        let pending: FuturesUnordered<_> = (0..self.partition_count())
            .map(|partition| {
                let call = self.submit_partition_request(request.clone(), partition);
                async move {
                    PartitionResponse {
                        index: partition as usize,
                        result: call.await,
                    }
                }
            })
            .collect();
        Box::pin(pending)
    }
}
