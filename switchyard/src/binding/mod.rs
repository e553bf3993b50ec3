//! Stateful service bindings and their rebind scheduler.
//!
//! A [`StatefulBinding`] caches the live handle resolved from a registry
//! entry instead of resolving on every call. When a call through it fails
//! with a discovery-relevant error the binding is marked unhealthy and its
//! [`RebindScheduler`] starts re-resolving it on a fixed interval.

use std::sync::Arc;

use switchyard_core::{ServiceEntry, ServiceKey};

mod rebind;
mod stateful;

pub use rebind::{RebindConfig, RebindScheduler, Rebindable};
pub use stateful::StatefulBinding;

/// Errors turning a registry entry into a live service handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    /// The entry names no service component.
    #[error("service entry {key} declares no component")]
    MissingComponent {
        /// The entry's key.
        key: ServiceKey,
    },

    /// The entry names a component that is not installed.
    #[error("no service component named {name}")]
    UnknownComponent {
        /// The requested component name.
        name: String,
    },

    /// An endpoint URL does not have the expected shape.
    #[error("malformed endpoint url: {url}")]
    MalformedUrl {
        /// The offending URL.
        url: String,
    },

    /// The component refused the entry.
    #[error("cannot bind {key}: {message}")]
    Rejected {
        /// The entry's key.
        key: ServiceKey,
        /// Why the component refused it.
        message: String,
    },
}

/// Factory turning a registry entry into a live handle of type `S`.
pub trait ServiceBinder<S>: Send + Sync {
    /// Build a handle for `entry`.
    fn bind(&self, entry: &ServiceEntry) -> Result<Arc<S>, BindError>;
}

impl<S, F> ServiceBinder<S> for F
where
    F: Fn(&ServiceEntry) -> Result<Arc<S>, BindError> + Send + Sync,
{
    fn bind(&self, entry: &ServiceEntry) -> Result<Arc<S>, BindError> {
        self(entry)
    }
}
