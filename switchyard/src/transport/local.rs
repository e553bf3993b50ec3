//! In-process partitioned transport.
//!
//! Each partition hosts a set of [`ServiceExporter`]s, one per service API.
//! An exporter maps method signatures to async handlers and turns every
//! outcome into an [`InvocationResponse`]: handler errors, unknown methods
//! and undecodable arguments all come back as a [`RemoteFailure`], exactly
//! as a remote endpoint would report them.
//!
//! The whole endpoint group can be toggled unavailable, in which case
//! dispatch fails with `ServiceUnavailable` before reaching any exporter.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use switchyard_core::{
    InvocationRequest, InvocationResponse, JsonCodec, MessageCodec, RemoteFailure,
};

use super::{RemotingTransport, ResponseFuture};
use crate::error::{Provenance, RemotingError};

type Handler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteFailure>> + Send + Sync>;

/// Exposes one service API's methods to a partition.
#[derive(Clone)]
pub struct ServiceExporter<C: MessageCodec = JsonCodec> {
    service_api: String,
    handlers: HashMap<String, Handler>,
    codec: C,
}

impl ServiceExporter<JsonCodec> {
    /// Create an exporter for `service_api` using the JSON codec.
    pub fn new(service_api: impl Into<String>) -> Self {
        Self::with_codec(service_api, JsonCodec)
    }
}

impl<C: MessageCodec> ServiceExporter<C> {
    /// Create an exporter for `service_api` using `codec`.
    pub fn with_codec(service_api: impl Into<String>, codec: C) -> Self {
        Self {
            service_api: service_api.into(),
            handlers: HashMap::new(),
            codec,
        }
    }

    /// Export `handler` under `signature`.
    pub fn method<F, Fut>(mut self, signature: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RemoteFailure>> + Send + 'static,
    {
        let handler: Handler = Arc::new(
            move |args| -> BoxFuture<'static, Result<Value, RemoteFailure>> {
                Box::pin(handler(args))
            },
        );
        self.handlers.insert(signature.into(), handler);
        self
    }

    /// The exported service API.
    pub fn service_api(&self) -> &str {
        &self.service_api
    }

    /// Execute `request` against the exported handlers.
    pub async fn invoke(&self, request: &InvocationRequest) -> InvocationResponse {
        let signature = request.method_signature();
        let Some(handler) = self.handlers.get(signature) else {
            return InvocationResponse::failed(RemoteFailure::new(
                "NoSuchMethod",
                format!("{} has no method {}", self.service_api, signature),
            ));
        };
        let args: Vec<Value> = match self.codec.decode(&request.arguments) {
            Ok(args) => args,
            Err(e) => {
                return InvocationResponse::failed(RemoteFailure::new(
                    "Serialization",
                    e.to_string(),
                ))
            }
        };
        match handler(args).await {
            Ok(value) => match self.codec.encode(&value) {
                Ok(body) => InvocationResponse::success(body),
                Err(e) => InvocationResponse::failed(RemoteFailure::new(
                    "Serialization",
                    e.to_string(),
                )),
            },
            Err(failure) => InvocationResponse::failed(failure),
        }
    }
}

impl<C: MessageCodec> fmt::Debug for ServiceExporter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&String> = self.handlers.keys().collect();
        methods.sort();
        f.debug_struct("ServiceExporter")
            .field("service_api", &self.service_api)
            .field("methods", &methods)
            .finish()
    }
}

/// One partition: the exporters it hosts, keyed by service API.
pub struct LocalPartition<C: MessageCodec = JsonCodec> {
    exporters: HashMap<String, ServiceExporter<C>>,
}

impl<C: MessageCodec> fmt::Debug for LocalPartition<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.exporters.values()).finish()
    }
}

impl<C: MessageCodec> Default for LocalPartition<C> {
    fn default() -> Self {
        Self {
            exporters: HashMap::new(),
        }
    }
}

impl<C: MessageCodec> LocalPartition<C> {
    /// Create an empty partition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host `exporter` on this partition.
    pub fn export(mut self, exporter: ServiceExporter<C>) -> Self {
        self.exporters
            .insert(exporter.service_api().to_string(), exporter);
        self
    }

    async fn invoke(&self, request: &InvocationRequest) -> InvocationResponse {
        match self.exporters.get(request.service_api()) {
            Some(exporter) => exporter.invoke(request).await,
            None => InvocationResponse::failed(RemoteFailure::new(
                "NoSuchService",
                format!("{} is not exported", request.service_api()),
            )),
        }
    }
}

/// Transport dispatching to partitions hosted in this process.
pub struct LocalPartitionedTransport<C: MessageCodec = JsonCodec> {
    endpoint_group: String,
    partitions: Vec<Arc<LocalPartition<C>>>,
    available: AtomicBool,
}

impl<C: MessageCodec> LocalPartitionedTransport<C> {
    /// Create a transport named `endpoint_group` over `partitions`.
    pub fn new(endpoint_group: impl Into<String>, partitions: Vec<LocalPartition<C>>) -> Self {
        Self {
            endpoint_group: endpoint_group.into(),
            partitions: partitions.into_iter().map(Arc::new).collect(),
            available: AtomicBool::new(true),
        }
    }

    /// Make the endpoint group reachable or unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Check whether the endpoint group is reachable.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

impl<C: MessageCodec> fmt::Debug for LocalPartitionedTransport<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPartitionedTransport")
            .field("endpoint_group", &self.endpoint_group)
            .field("partitions", &self.partitions.len())
            .field("available", &self.is_available())
            .finish()
    }
}

impl<C: MessageCodec> RemotingTransport for LocalPartitionedTransport<C> {
    fn endpoint_group(&self) -> &str {
        &self.endpoint_group
    }

    fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    fn submit_partition_request(
        &self,
        request: InvocationRequest,
        partition: u32,
    ) -> ResponseFuture {
        let provenance = Provenance::partition(self.endpoint_group.clone(), partition);
        if !self.is_available() {
            return Box::pin(async move {
                Err(RemotingError::ServiceUnavailable {
                    message: "endpoint group is not reachable".to_string(),
                    provenance,
                })
            });
        }
        let Some(target) = self.partitions.get(partition as usize).cloned() else {
            let count = self.partitions.len();
            return Box::pin(async move {
                Err(RemotingError::ServiceUnavailable {
                    message: format!("no partition {} among {}", partition, count),
                    provenance,
                })
            });
        };
        Box::pin(async move { Ok(target.invoke(&request).await) })
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;

    use super::*;

    const LUNCH_SERVICE: &str = "com.example.lunch.LunchService";

    fn exporter(partition: u32) -> ServiceExporter {
        ServiceExporter::new(LUNCH_SERVICE)
            .method("partition()", move |_args| async move { Ok(json!(partition)) })
            .method("echo(String)", |args| async move {
                args.into_iter()
                    .next()
                    .ok_or_else(|| RemoteFailure::new("IllegalArgument", "missing argument"))
            })
    }

    fn transport(partitions: u32) -> LocalPartitionedTransport {
        LocalPartitionedTransport::new(
            "mySpace",
            (0..partitions)
                .map(|p| LocalPartition::new().export(exporter(p)))
                .collect(),
        )
    }

    fn request(signature: &str, args: &[Value]) -> InvocationRequest {
        let payload = JsonCodec.encode(&args.to_vec()).expect("encode");
        InvocationRequest::new(LUNCH_SERVICE, signature, payload)
    }

    #[tokio::test]
    async fn test_partition_dispatch() {
        let transport = transport(3);
        let response = transport
            .submit_partition_request(request("partition()", &[]), 2)
            .await
            .expect("response");
        let body: Value = JsonCodec
            .decode(&response.body.expect("body"))
            .expect("decode");
        assert_eq!(body, json!(2));
    }

    #[tokio::test]
    async fn test_handler_failure_becomes_remote_failure() {
        let transport = transport(1);
        let response = transport
            .submit_partition_request(request("echo(String)", &[]), 0)
            .await
            .expect("response");
        assert_eq!(
            response.failure,
            Some(RemoteFailure::new("IllegalArgument", "missing argument"))
        );
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_payload() {
        let transport = transport(1);
        let response = transport
            .submit_partition_request(request("lunch()", &[]), 0)
            .await
            .expect("response");
        assert_eq!(
            response.failure.map(|f| f.error_type),
            Some("NoSuchMethod".to_string())
        );

        let garbage = InvocationRequest::new(LUNCH_SERVICE, "echo(String)", b"{".to_vec());
        let response = transport
            .submit_partition_request(garbage, 0)
            .await
            .expect("response");
        assert_eq!(
            response.failure.map(|f| f.error_type),
            Some("Serialization".to_string())
        );
    }

    #[tokio::test]
    async fn test_unavailable_group() {
        let transport = transport(2);
        transport.set_available(false);

        let result = transport
            .submit_partition_request(request("partition()", &[]), 0)
            .await;
        let err = result.expect_err("unavailable");
        assert!(err.is_discovery_relevant());
        assert_eq!(err.provenance(), Some(&Provenance::partition("mySpace", 0)));

        transport.set_available(true);
        let responses: Vec<_> = transport
            .submit_broadcast_request(request("partition()", &[]))
            .collect()
            .await;
        assert!(responses.iter().all(|r| r.result.is_ok()));
    }

    #[tokio::test]
    async fn test_out_of_range_partition() {
        let transport = transport(2);
        let result = transport
            .submit_partition_request(request("partition()", &[]), 5)
            .await;
        assert!(matches!(
            result,
            Err(RemotingError::ServiceUnavailable { .. })
        ));
    }
}
