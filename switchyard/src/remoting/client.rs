//! Remoting clients.
//!
//! [`RemotingClient`] is the untyped layer: it sends already-built requests
//! through a transport with every sub-call guarded by the [`FaultGuard`].
//! [`RemoteServiceClient`] is the typed layer on top: it consults the
//! [`ServiceMethodTable`], runs routers, encodes arguments, decodes results
//! and applies reducers.
//!
//! # Design
//!
//! Guarding happens in a transport decorator that hands every dispatch to
//! the wrapped transport, its own batch and broadcast implementations
//! included:
//!
//! - A routed call is one guarded call holding one bulkhead slot.
//! - A routed batch is admitted as one call holding one slot per entry,
//!   taken all at once or not at all.
//! - A broadcast is admitted as one call holding a single slot, however
//!   many partitions it reaches.
//!
//! A fan-out passes the breaker once, races one deadline and reports one
//! outcome: a failure when any entry failed in a way that counts. Remote
//! failures are turned into `RemoteInvocation` errors, tagged with the
//! answering partition, before the guard sees them. A rejected fan-out
//! dispatches nothing and yields the rejection for every entry.
//!
//! Dropping an in-flight call drops every outstanding sub-call, releasing
//! their slots. The reducer only runs after the merged stream is drained.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use switchyard_core::{
    headers, InvocationRequest, InvocationResponse, JsonCodec, MessageCodec, RoutingKey,
};

use super::method::ServiceMethodTable;
use super::reducer::{RemoteResult, RemoteResultReducer};
use crate::error::{Provenance, RemotingError};
use crate::fault::{CommandGroup, FanOutPermit, FaultError, FaultGuard, GuardedError};
use crate::transport::{
    PartitionResponse, RemotingTransport, ResponseFuture, ResponseStream, RoutedRequest,
};

/// Decorator running every dispatch of `inner` under the fault guard.
#[derive(Debug)]
struct GuardedTransport {
    inner: Arc<dyn RemotingTransport>,
    guard: FaultGuard,
}

impl GuardedTransport {
    fn command_group(&self, request: &InvocationRequest) -> CommandGroup {
        CommandGroup::for_service(self.inner.endpoint_group(), request.service_api())
    }

    fn guarded<D>(&self, request: InvocationRequest, partition: u32, dispatch: D) -> ResponseFuture
    where
        D: FnOnce(InvocationRequest) -> ResponseFuture + Send + 'static,
    {
        let group = self.command_group(&request);
        let provenance = Provenance::partition(self.inner.endpoint_group(), partition);
        let guard = self.guard.clone();
        tracing::debug!(
            group = %group,
            partition,
            method = request.method_signature(),
            "dispatching"
        );
        Box::pin(async move {
            guard
                .execute(&group, move || async move {
                    let response = dispatch(request).await?;
                    match response.failure {
                        Some(failure) => Err(RemotingError::RemoteInvocation {
                            failure,
                            provenance,
                        }),
                        None => Ok(response),
                    }
                })
                .await
        })
    }

    /// Run a fan-out of the inner transport as one guarded call.
    ///
    /// Entry `i` of the fan-out is answered by `partitions[i]`.
    fn guarded_fan_out<D>(
        &self,
        group: CommandGroup,
        slots: u32,
        partitions: Vec<u32>,
        dispatch: D,
    ) -> ResponseStream
    where
        D: FnOnce() -> ResponseStream,
    {
        let permit = match self.guard.admit_fan_out(&group, slots) {
            Ok(permit) => permit,
            Err(err) => {
                let rejected: Vec<PartitionResponse> = (0..partitions.len())
                    .map(|index| PartitionResponse {
                        index,
                        result: Err(err.clone().into()),
                    })
                    .collect();
                return Box::pin(stream::iter(rejected));
            }
        };
        tracing::debug!(group = %group, entries = partitions.len(), slots, "fanning out");
        GuardedFanOut {
            deadline: permit.deadline(),
            permit: Some(permit),
            responses: dispatch(),
            endpoint_group: self.inner.endpoint_group().to_string(),
            answered: vec![false; partitions.len()],
            partitions,
            failed: false,
            expired: VecDeque::new(),
        }
        .into_stream()
    }
}

/// Merged answers of a fan-out, admitted by the guard as one call.
struct GuardedFanOut {
    responses: ResponseStream,
    deadline: BoxFuture<'static, ()>,
    /// `None` once the outcome has been reported.
    permit: Option<FanOutPermit>,
    endpoint_group: String,
    partitions: Vec<u32>,
    answered: Vec<bool>,
    failed: bool,
    /// Timeout errors still to hand out after the deadline fired.
    expired: VecDeque<PartitionResponse>,
}

impl GuardedFanOut {
    fn into_stream(self) -> ResponseStream {
        Box::pin(stream::unfold(self, |mut fan_out| async move {
            let response = fan_out.next().await?;
            Some((response, fan_out))
        }))
    }

    async fn next(&mut self) -> Option<PartitionResponse> {
        if let Some(response) = self.expired.pop_front() {
            return Some(response);
        }
        let permit = self.permit.take()?;
        let next = tokio::select! {
            biased;
            next = self.responses.next() => Some(next),
            _ = &mut self.deadline => None,
        };
        match next {
            Some(Some(response)) => {
                self.permit = Some(permit);
                Some(self.tag(response))
            }
            Some(None) => {
                if self.failed {
                    permit.fail();
                } else {
                    permit.succeed();
                }
                None
            }
            None => {
                let err = permit.time_out();
                self.responses = Box::pin(stream::empty());
                self.expired = self
                    .answered
                    .iter()
                    .enumerate()
                    .filter(|(_, answered)| !**answered)
                    .map(|(index, _)| PartitionResponse {
                        index,
                        result: Err(err.clone().into()),
                    })
                    .collect();
                self.expired.pop_front()
            }
        }
    }

    fn tag(&mut self, response: PartitionResponse) -> PartitionResponse {
        let index = response.index;
        if let Some(answered) = self.answered.get_mut(index) {
            *answered = true;
        }
        let provenance = match self.partitions.get(index) {
            Some(partition) => Provenance::partition(self.endpoint_group.as_str(), *partition),
            None => Provenance::group(self.endpoint_group.as_str()),
        };
        let result = response
            .result
            .and_then(|response| match response.failure {
                Some(failure) => Err(RemotingError::RemoteInvocation {
                    failure,
                    provenance,
                }),
                None => Ok(response),
            });
        if matches!(&result, Err(err) if err.counts_as_failure()) {
            self.failed = true;
        }
        PartitionResponse { index, result }
    }
}

impl RemotingTransport for GuardedTransport {
    fn endpoint_group(&self) -> &str {
        self.inner.endpoint_group()
    }

    fn partition_count(&self) -> u32 {
        self.inner.partition_count()
    }

    fn submit_partition_request(
        &self,
        request: InvocationRequest,
        partition: u32,
    ) -> ResponseFuture {
        let inner = Arc::clone(&self.inner);
        self.guarded(request, partition, move |request| {
            inner.submit_partition_request(request, partition)
        })
    }

    fn submit_routed_request(
        &self,
        request: InvocationRequest,
        routing_key: &RoutingKey,
    ) -> ResponseFuture {
        let partition = routing_key.partition(self.inner.partition_count());
        let inner = Arc::clone(&self.inner);
        let routing_key = routing_key.clone();
        self.guarded(request, partition, move |request| {
            inner.submit_routed_request(request, &routing_key)
        })
    }

    fn submit_routed_requests(&self, requests: Vec<RoutedRequest>) -> ResponseStream {
        let Some(first) = requests.first() else {
            return Box::pin(stream::empty());
        };
        let group = self.command_group(&first.request);
        let partition_count = self.inner.partition_count();
        let partitions = requests
            .iter()
            .map(|routed| routed.routing_key.partition(partition_count))
            .collect();
        let slots = u32::try_from(requests.len()).unwrap_or(u32::MAX);
        let inner = Arc::clone(&self.inner);
        self.guarded_fan_out(group, slots, partitions, move || {
            inner.submit_routed_requests(requests)
        })
    }

    fn submit_broadcast_request(&self, request: InvocationRequest) -> ResponseStream {
        let group = self.command_group(&request);
        let partitions = (0..self.inner.partition_count()).collect();
        let inner = Arc::clone(&self.inner);
        self.guarded_fan_out(group, 1, partitions, move || {
            inner.submit_broadcast_request(request)
        })
    }
}

/// Untyped client: guarded dispatch of encoded requests.
#[derive(Clone)]
pub struct RemotingClient<C: MessageCodec = JsonCodec> {
    transport: Arc<GuardedTransport>,
    codec: C,
}

impl RemotingClient<JsonCodec> {
    /// Create a client over `transport`, isolated by `guard`.
    pub fn new(transport: Arc<dyn RemotingTransport>, guard: FaultGuard) -> Self {
        Self::with_codec(transport, guard, JsonCodec)
    }
}

impl<C: MessageCodec> RemotingClient<C> {
    /// Create a client encoding payloads with `codec`.
    pub fn with_codec(transport: Arc<dyn RemotingTransport>, guard: FaultGuard, codec: C) -> Self {
        Self {
            transport: Arc::new(GuardedTransport {
                inner: transport,
                guard,
            }),
            codec,
        }
    }

    /// The codec used for payloads.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Endpoint group of the underlying transport.
    pub fn endpoint_group(&self) -> &str {
        self.transport.endpoint_group()
    }

    /// Current partition count of the underlying transport.
    pub fn partition_count(&self) -> u32 {
        self.transport.partition_count()
    }

    /// Dispatch one request to the partition owning `routing_key`.
    pub fn submit_routed_request(
        &self,
        request: InvocationRequest,
        routing_key: &RoutingKey,
    ) -> ResponseFuture {
        self.transport.submit_routed_request(request, routing_key)
    }

    /// Dispatch a batch of routed requests, merged in completion order.
    pub fn submit_routed_requests(&self, requests: Vec<RoutedRequest>) -> ResponseStream {
        self.transport.submit_routed_requests(requests)
    }

    /// Dispatch one request to every partition, merged in completion order.
    pub fn submit_broadcast_request(&self, request: InvocationRequest) -> ResponseStream {
        self.transport.submit_broadcast_request(request)
    }
}

impl<C: MessageCodec> fmt::Debug for RemotingClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemotingClient")
            .field("transport", &self.transport.inner)
            .finish()
    }
}

/// Typed client for one service API.
#[derive(Clone)]
pub struct RemoteServiceClient<C: MessageCodec = JsonCodec> {
    service_api: String,
    qualifier: Option<String>,
    methods: Arc<ServiceMethodTable>,
    remoting: RemotingClient<C>,
}

impl<C: MessageCodec> RemoteServiceClient<C> {
    /// Create a client for `service_api` dispatching per `methods`.
    pub fn new(
        service_api: impl Into<String>,
        methods: Arc<ServiceMethodTable>,
        remoting: RemotingClient<C>,
    ) -> Self {
        Self {
            service_api: service_api.into(),
            qualifier: None,
            methods,
            remoting,
        }
    }

    /// Tag every request with the target service's qualifier.
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// The service API this client calls.
    pub fn service_api(&self) -> &str {
        &self.service_api
    }

    /// The untyped client underneath.
    pub fn remoting(&self) -> &RemotingClient<C> {
        &self.remoting
    }

    /// Command group every call of this client runs in.
    pub fn command_group(&self) -> CommandGroup {
        CommandGroup::for_service(self.remoting.endpoint_group(), &self.service_api)
    }

    /// Call a routed method.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        signature: &str,
        args: Vec<Value>,
    ) -> Result<T, RemotingError> {
        let routing_key = self.methods.router(signature)?.routing_key(&args)?;
        let request = self.request(signature, &args)?;
        let response = self
            .remoting
            .submit_routed_request(request, &routing_key)
            .await?;
        self.decode(response)
    }

    /// Call a routed method once per argument list, concurrently.
    ///
    /// Results come back in arrival order, each tagged with the index of
    /// its argument list. A failing sub-call does not cancel the others.
    /// Router failures reject the whole batch before anything is sent.
    pub async fn invoke_routed_batch<T: DeserializeOwned>(
        &self,
        signature: &str,
        batch: Vec<Vec<Value>>,
    ) -> Result<Vec<RemoteResult<T>>, RemotingError> {
        let router = self.methods.router(signature)?;
        let requests = batch
            .iter()
            .map(|args| {
                Ok(RoutedRequest::new(
                    self.request(signature, args)?,
                    router.routing_key(args)?,
                ))
            })
            .collect::<Result<Vec<_>, RemotingError>>()?;

        let results = self
            .remoting
            .submit_routed_requests(requests)
            .map(|response| self.decode_partition(response))
            .collect()
            .await;
        Ok(results)
    }

    /// Call a broadcast method on every partition and reduce the answers.
    ///
    /// The reducer sees one entry per partition, sorted by partition index,
    /// with failed partitions as `Err` entries. When the fault guard
    /// rejected the broadcast, the call fails outright and the reducer is
    /// not invoked.
    pub async fn invoke_broadcast<T, R>(
        &self,
        signature: &str,
        args: Vec<Value>,
        reducer: &impl RemoteResultReducer<T, R>,
    ) -> Result<R, RemotingError>
    where
        T: DeserializeOwned,
    {
        self.methods.require_broadcast(signature)?;
        let request = self.request(signature, &args)?;

        let mut results: Vec<RemoteResult<T>> = self
            .remoting
            .submit_broadcast_request(request)
            .map(|response| self.decode_partition(response))
            .collect()
            .await;

        let all_rejected = !results.is_empty()
            && results.iter().all(|r| {
                matches!(
                    r.error(),
                    Some(RemotingError::Fault(FaultError::Rejected { .. }))
                )
            });
        if all_rejected {
            if let Err(err) = results.swap_remove(0).result {
                return Err(err);
            }
        }

        results.sort_by_key(|r| r.index);
        reducer.reduce(results)
    }

    fn request(&self, signature: &str, args: &[Value]) -> Result<InvocationRequest, RemotingError> {
        let payload = self.remoting.codec().encode(&args)?;
        let mut request = InvocationRequest::new(&self.service_api, signature, payload);
        if let Some(qualifier) = &self.qualifier {
            request = request.with_header(headers::SERVICE_QUALIFIER, qualifier);
        }
        Ok(request)
    }

    fn decode<T: DeserializeOwned>(&self, response: InvocationResponse) -> Result<T, RemotingError> {
        let body = response.body.ok_or_else(|| RemotingError::Serialization {
            message: "response carries no body".to_string(),
        })?;
        Ok(self.remoting.codec().decode(&body)?)
    }

    fn decode_partition<T: DeserializeOwned>(&self, response: PartitionResponse) -> RemoteResult<T> {
        let result = response.result.and_then(|r| self.decode(r));
        RemoteResult::new(response.index, result)
    }
}

impl<C: MessageCodec> fmt::Debug for RemoteServiceClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteServiceClient")
            .field("service_api", &self.service_api)
            .field("qualifier", &self.qualifier)
            .field("endpoint_group", &self.remoting.endpoint_group())
            .finish()
    }
}
