//! Core types for service identity and remote invocation.
//!
//! This module provides the data model shared by every switchyard component:
//! - [`ServiceKey`]: service contract + optional qualifier (registry key)
//! - [`ServiceProperties`]: ordered, string-keyed connection properties
//! - [`ServiceEntry`]: what a provider publishes in the registry
//! - [`RoutingKey`]: value selecting the partition that owns a call
//! - [`InvocationRequest`] / [`InvocationResponse`]: one remote call and its answer

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one logical service contract instance.
///
/// The qualifier distinguishes several deployments of the same contract.
/// Value equality makes this the registry's lookup key.
///
/// # Examples
///
/// ```
/// use switchyard_core::ServiceKey;
///
/// let key = ServiceKey::new("LunchService", None);
/// assert_eq!(key.to_string(), "LunchService");
///
/// let qualified = ServiceKey::new("LunchService", Some("eu"));
/// assert_eq!(qualified.to_string(), "LunchService[eu]");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    /// The service contract identifier (e.g. `com.example.LunchService`).
    pub service_type: String,
    /// Optional deployment qualifier.
    pub qualifier: Option<String>,
}

impl ServiceKey {
    /// Create a new service key.
    pub fn new(service_type: impl Into<String>, qualifier: Option<&str>) -> Self {
        Self {
            service_type: service_type.into(),
            qualifier: qualifier.map(str::to_string),
        }
    }

    /// Create a key without a qualifier.
    pub fn unqualified(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            qualifier: None,
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(qualifier) => write!(f, "{}[{}]", self.service_type, qualifier),
            None => write!(f, "{}", self.service_type),
        }
    }
}

/// Ordered string-to-string mapping describing how to reach a service.
///
/// Carries transport-specific connection info (endpoint URI, space name,
/// component name) plus the declared API type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProperties(BTreeMap<String, String>);

impl ServiceProperties {
    /// Property holding the declared API type.
    pub const API: &'static str = "api";
    /// Property holding the qualifier.
    pub const QUALIFIER: &'static str = "qualifier";
    /// Property naming the service component able to bind this entry.
    pub const COMPONENT: &'static str = "component";
    /// Property holding the endpoint URI.
    pub const SERVICE_URI: &'static str = "serviceUri";

    /// Create an empty property bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a property value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Set a property, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// The declared API type, if present.
    pub fn api(&self) -> Option<&str> {
        self.get(Self::API)
    }

    /// The qualifier, if present.
    pub fn qualifier(&self) -> Option<&str> {
        self.get(Self::QUALIFIER)
    }

    /// The service component name, if present.
    pub fn component(&self) -> Option<&str> {
        self.get(Self::COMPONENT)
    }

    /// Iterate over all properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ServiceProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Registry entry published by a service provider.
///
/// Replaced wholesale on re-registration (last write wins, no merge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// The service this entry describes.
    pub key: ServiceKey,
    /// Connection properties.
    pub properties: ServiceProperties,
    /// Advisory validity of this entry, in milliseconds.
    pub lease_duration_millis: u64,
}

/// Wire-visible property name for the service type.
pub const SERVICE_TYPE_PROPERTY: &str = "serviceType";

/// Wire-visible property name for the lease duration.
pub const LEASE_DURATION_PROPERTY: &str = "leaseDurationMillis";

/// Reasons a property bag cannot be read back into a [`ServiceEntry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyBagError {
    /// The mandatory `serviceType` property is missing.
    #[error("property bag has no serviceType")]
    MissingServiceType,

    /// The lease duration is not a non-negative integer.
    #[error("invalid leaseDurationMillis: {value}")]
    InvalidLease {
        /// The offending value.
        value: String,
    },
}

impl ServiceEntry {
    /// Create a new entry.
    ///
    /// A `qualifier` property, when present, is mirrored from the key.
    pub fn new(key: ServiceKey, properties: ServiceProperties, lease_duration_millis: u64) -> Self {
        let mut properties = properties;
        if let Some(qualifier) = &key.qualifier {
            properties.set(ServiceProperties::QUALIFIER, qualifier.clone());
        }
        Self {
            key,
            properties,
            lease_duration_millis,
        }
    }

    /// Flatten into the registry's string-keyed wire shape.
    pub fn to_property_bag(&self) -> BTreeMap<String, String> {
        let mut bag: BTreeMap<String, String> = self
            .properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        bag.insert(
            SERVICE_TYPE_PROPERTY.to_string(),
            self.key.service_type.clone(),
        );
        match &self.key.qualifier {
            Some(qualifier) => {
                bag.insert(ServiceProperties::QUALIFIER.to_string(), qualifier.clone());
            }
            None => {
                bag.remove(ServiceProperties::QUALIFIER);
            }
        }
        bag.insert(
            LEASE_DURATION_PROPERTY.to_string(),
            self.lease_duration_millis.to_string(),
        );
        bag
    }

    /// Rebuild an entry from the wire shape produced by [`to_property_bag`](Self::to_property_bag).
    pub fn from_property_bag(bag: &BTreeMap<String, String>) -> Result<Self, PropertyBagError> {
        let service_type = bag
            .get(SERVICE_TYPE_PROPERTY)
            .ok_or(PropertyBagError::MissingServiceType)?;
        let lease_duration_millis = match bag.get(LEASE_DURATION_PROPERTY) {
            Some(value) => value
                .parse::<u64>()
                .map_err(|_| PropertyBagError::InvalidLease {
                    value: value.clone(),
                })?,
            None => 0,
        };
        let qualifier = bag.get(ServiceProperties::QUALIFIER).map(String::as_str);
        let properties = bag
            .iter()
            .filter(|(k, _)| {
                k.as_str() != SERVICE_TYPE_PROPERTY && k.as_str() != LEASE_DURATION_PROPERTY
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self::new(
            ServiceKey::new(service_type.clone(), qualifier),
            properties,
            lease_duration_millis,
        ))
    }
}

/// Value selecting the partition that owns one call.
///
/// Holds the canonical JSON text of the routing value, so equal arguments
/// always produce equal keys. The partition index is
/// `crc32c(text) % partition_count`, stable across processes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingKey(String);

impl RoutingKey {
    /// Derive a routing key from a JSON value.
    pub fn of(value: &serde_json::Value) -> Self {
        Self(value.to_string())
    }

    /// The canonical text of this key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Partition owning this key among `partition_count` partitions.
    ///
    /// Returns 0 when `partition_count` is 0.
    pub fn partition(&self, partition_count: u32) -> u32 {
        if partition_count == 0 {
            return 0;
        }
        crc32c::crc32c(self.0.as_bytes()) % partition_count
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Well-known invocation request header names.
pub mod headers {
    /// Fully qualified service API identifier.
    pub const SERVICE_API: &str = "serviceApi";
    /// Signature of the invoked method.
    pub const SERVICE_METHOD_SIGNATURE: &str = "serviceMethodSignature";
    /// Qualifier of the target service, when any.
    pub const SERVICE_QUALIFIER: &str = "serviceQualifier";
}

/// One remote call: headers plus an opaque, already-encoded argument payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Request headers (see [`headers`]).
    pub headers: BTreeMap<String, String>,
    /// Encoded argument sequence.
    pub arguments: Vec<u8>,
}

impl InvocationRequest {
    /// Create a request for `method_signature` on `service_api`.
    pub fn new(
        service_api: impl Into<String>,
        method_signature: impl Into<String>,
        arguments: Vec<u8>,
    ) -> Self {
        let mut request_headers = BTreeMap::new();
        request_headers.insert(headers::SERVICE_API.to_string(), service_api.into());
        request_headers.insert(
            headers::SERVICE_METHOD_SIGNATURE.to_string(),
            method_signature.into(),
        );
        Self {
            headers: request_headers,
            arguments,
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// The service API header, or an empty string.
    pub fn service_api(&self) -> &str {
        self.header(headers::SERVICE_API).unwrap_or_default()
    }

    /// The method signature header, or an empty string.
    pub fn method_signature(&self) -> &str {
        self.header(headers::SERVICE_METHOD_SIGNATURE)
            .unwrap_or_default()
    }
}

/// Application-level failure raised by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    /// Kind of failure (exception type on the remote side).
    pub error_type: String,
    /// Human-readable failure message.
    pub message: String,
}

impl RemoteFailure {
    /// Create a new remote failure.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

/// Answer from one endpoint: an encoded result or a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    /// Encoded result, absent when the call failed.
    pub body: Option<Vec<u8>>,
    /// Failure description, absent when the call succeeded.
    pub failure: Option<RemoteFailure>,
}

impl InvocationResponse {
    /// A successful response carrying an encoded body.
    pub fn success(body: Vec<u8>) -> Self {
        Self {
            body: Some(body),
            failure: None,
        }
    }

    /// A failed response.
    pub fn failed(failure: RemoteFailure) -> Self {
        Self {
            body: None,
            failure: Some(failure),
        }
    }

    /// Check whether the remote side reported a failure.
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}
