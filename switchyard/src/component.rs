//! Service components: the static table of transport factories.
//!
//! A registry entry names the component able to reach it in its
//! `component` property. The bootstrap layer installs every available
//! [`ServiceComponent`] in a [`ServiceComponents`] table at startup;
//! [`RemotingBinder`] then turns entries into typed clients by asking the
//! named component for a transport.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use switchyard_core::{ServiceEntry, ServiceProperties};

use crate::binding::{BindError, ServiceBinder};
use crate::fault::FaultGuard;
use crate::remoting::{RemoteServiceClient, RemotingClient, ServiceMethodTable};
use crate::transport::RemotingTransport;

/// Entry property naming the endpoint group (space) to reach.
pub const SPACE_NAME_PROPERTY: &str = "spaceName";

/// Entry property carrying the full endpoint URL.
pub const SPACE_URL_PROPERTY: &str = "spaceUrl";

/// Factory building transports for the entries it understands.
pub trait ServiceComponent: Send + Sync + fmt::Debug {
    /// Name entries use in their `component` property.
    fn name(&self) -> &str;

    /// Build a transport reaching the endpoint described by `entry`.
    fn create_transport(&self, entry: &ServiceEntry)
        -> Result<Arc<dyn RemotingTransport>, BindError>;
}

/// Immutable table of installed components, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ServiceComponents {
    components: HashMap<String, Arc<dyn ServiceComponent>>,
}

impl ServiceComponents {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `component` under its name.
    pub fn with(mut self, component: Arc<dyn ServiceComponent>) -> Self {
        self.components
            .insert(component.name().to_string(), component);
        self
    }

    /// Find the component called `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ServiceComponent>, BindError> {
        self.components
            .get(name)
            .cloned()
            .ok_or_else(|| BindError::UnknownComponent {
                name: name.to_string(),
            })
    }
}

/// Binds registry entries to [`RemoteServiceClient`]s.
///
/// Every client it builds shares one fault guard and one method table.
#[derive(Debug, Clone)]
pub struct RemotingBinder {
    components: ServiceComponents,
    guard: FaultGuard,
    methods: Arc<ServiceMethodTable>,
}

impl RemotingBinder {
    /// Create a binder resolving components from `components`.
    pub fn new(
        components: ServiceComponents,
        guard: FaultGuard,
        methods: Arc<ServiceMethodTable>,
    ) -> Self {
        Self {
            components,
            guard,
            methods,
        }
    }
}

impl ServiceBinder<RemoteServiceClient> for RemotingBinder {
    fn bind(&self, entry: &ServiceEntry) -> Result<Arc<RemoteServiceClient>, BindError> {
        let name = entry
            .properties
            .component()
            .ok_or_else(|| BindError::MissingComponent {
                key: entry.key.clone(),
            })?;
        let transport = self.components.get(name)?.create_transport(entry)?;
        tracing::debug!(
            service = %entry.key,
            component = name,
            endpoint_group = transport.endpoint_group(),
            "binding remote service"
        );

        let remoting = RemotingClient::new(transport, self.guard.clone());
        let mut client =
            RemoteServiceClient::new(&entry.key.service_type, Arc::clone(&self.methods), remoting);
        if let Some(qualifier) = &entry.key.qualifier {
            client = client.with_qualifier(qualifier);
        }
        Ok(Arc::new(client))
    }
}

/// Component reaching in-process partitioned endpoint groups.
///
/// Endpoint groups are hosted under their space name; entries select one
/// through their `spaceName` property.
#[derive(Debug, Default)]
pub struct LocalPartitionedComponent {
    spaces: DashMap<String, Arc<dyn RemotingTransport>>,
}

impl LocalPartitionedComponent {
    /// Name entries use to select this component.
    pub const NAME: &'static str = "local";

    /// Create a component hosting no space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host `transport` under its endpoint group name.
    pub fn host(&self, transport: Arc<dyn RemotingTransport>) {
        self.spaces
            .insert(transport.endpoint_group().to_string(), transport);
    }

    /// Properties advertising the space at `space_url`.
    ///
    /// The space name is the fifth `/` separated segment of a
    /// `jini://host/group/space-name/...` URL.
    pub fn service_properties(space_url: &str) -> Result<ServiceProperties, BindError> {
        let space_name = space_url
            .split('/')
            .nth(4)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| BindError::MalformedUrl {
                url: space_url.to_string(),
            })?;
        Ok(ServiceProperties::new()
            .with(ServiceProperties::COMPONENT, Self::NAME)
            .with(SPACE_NAME_PROPERTY, space_name)
            .with(SPACE_URL_PROPERTY, space_url))
    }
}

impl ServiceComponent for LocalPartitionedComponent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn create_transport(
        &self,
        entry: &ServiceEntry,
    ) -> Result<Arc<dyn RemotingTransport>, BindError> {
        let space_name =
            entry
                .properties
                .get(SPACE_NAME_PROPERTY)
                .ok_or_else(|| BindError::Rejected {
                    key: entry.key.clone(),
                    message: format!("no {} property", SPACE_NAME_PROPERTY),
                })?;
        self.spaces
            .get(space_name)
            .map(|transport| Arc::clone(transport.value()))
            .ok_or_else(|| BindError::Rejected {
                key: entry.key.clone(),
                message: format!("space {} is not hosted", space_name),
            })
    }
}
