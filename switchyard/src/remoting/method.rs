//! Per-method dispatch table.
//!
//! A service client is built with one [`ServiceMethodTable`] describing, for
//! each method signature, whether calls are routed to one partition (and by
//! which [`Router`]) or broadcast to all of them. The table is immutable
//! once built and shared between every client of the same service.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RemotingError;
use crate::router::Router;

/// How one method is dispatched.
#[derive(Debug, Clone)]
pub enum RemoteServiceMethod {
    /// Sent to the partition selected by the router.
    Routed(Arc<dyn Router>),
    /// Sent to every partition and reduced.
    Broadcast,
}

/// Immutable mapping from method signature to dispatch mode.
#[derive(Debug, Clone, Default)]
pub struct ServiceMethodTable {
    methods: HashMap<String, RemoteServiceMethod>,
}

impl ServiceMethodTable {
    /// Start building a table.
    pub fn builder() -> ServiceMethodTableBuilder {
        ServiceMethodTableBuilder::default()
    }

    /// Look up how `signature` is dispatched.
    pub fn get(&self, signature: &str) -> Result<&RemoteServiceMethod, RemotingError> {
        self.methods
            .get(signature)
            .ok_or_else(|| RemotingError::UnknownMethod {
                signature: signature.to_string(),
            })
    }

    /// The router of a routed method.
    ///
    /// # Errors
    ///
    /// `UnknownMethod` if `signature` is absent or declared as a broadcast.
    pub fn router(&self, signature: &str) -> Result<&dyn Router, RemotingError> {
        match self.get(signature)? {
            RemoteServiceMethod::Routed(router) => Ok(router.as_ref()),
            RemoteServiceMethod::Broadcast => Err(RemotingError::UnknownMethod {
                signature: format!("{} (declared as broadcast)", signature),
            }),
        }
    }

    /// Check that `signature` is declared as a broadcast.
    pub fn require_broadcast(&self, signature: &str) -> Result<(), RemotingError> {
        match self.get(signature)? {
            RemoteServiceMethod::Broadcast => Ok(()),
            RemoteServiceMethod::Routed(_) => Err(RemotingError::UnknownMethod {
                signature: format!("{} (declared as routed)", signature),
            }),
        }
    }

    /// Number of declared methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Check whether no method is declared.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Builder for [`ServiceMethodTable`].
#[derive(Debug, Default)]
pub struct ServiceMethodTableBuilder {
    methods: HashMap<String, RemoteServiceMethod>,
}

impl ServiceMethodTableBuilder {
    /// Declare `signature` as routed by `router`.
    pub fn routed(mut self, signature: impl Into<String>, router: impl Router + 'static) -> Self {
        self.methods
            .insert(signature.into(), RemoteServiceMethod::Routed(Arc::new(router)));
        self
    }

    /// Declare `signature` as a broadcast.
    pub fn broadcast(mut self, signature: impl Into<String>) -> Self {
        self.methods
            .insert(signature.into(), RemoteServiceMethod::Broadcast);
        self
    }

    /// Freeze the table.
    pub fn build(self) -> ServiceMethodTable {
        ServiceMethodTable {
            methods: self.methods,
        }
    }
}
