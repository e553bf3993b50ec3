//! Error types for remote invocation.
//!
//! Module-level errors ([`RegistryError`], [`FaultError`], [`BindError`],
//! [`SettingsError`]) convert into [`RemotingError`], the error every
//! invocation path returns.

use std::fmt;

use switchyard_core::{CodecError, RemoteFailure, SettingsError};

use crate::binding::BindError;
use crate::fault::{FaultError, GuardedError};
use crate::registry::RegistryError;

/// Which endpoint produced a result or failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    /// Endpoint group (e.g. the space name) that answered.
    pub endpoint_group: String,
    /// Partition that answered, when the call targeted one.
    pub partition: Option<u32>,
}

impl Provenance {
    /// Provenance for a call answered by a given partition.
    pub fn partition(endpoint_group: impl Into<String>, partition: u32) -> Self {
        Self {
            endpoint_group: endpoint_group.into(),
            partition: Some(partition),
        }
    }

    /// Provenance for a call whose partition is not known.
    pub fn group(endpoint_group: impl Into<String>) -> Self {
        Self {
            endpoint_group: endpoint_group.into(),
            partition: None,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.partition {
            Some(partition) => write!(f, "{}#{}", self.endpoint_group, partition),
            None => write!(f, "{}", self.endpoint_group),
        }
    }
}

/// Errors returned by remote invocations.
#[derive(Debug, thiserror::Error)]
pub enum RemotingError {
    /// Registry operation failed (including lookup misses).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The router could not derive a routing key from the arguments.
    #[error("invalid arguments: {message}")]
    InvalidArguments {
        /// What was wrong with the arguments.
        message: String,
    },

    /// The method is not in the service's dispatch table, or was invoked
    /// in a mode it was not declared for.
    #[error("unknown method: {signature}")]
    UnknownMethod {
        /// The requested method signature.
        signature: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Codec failure description.
        message: String,
    },

    /// The fault guard rejected the call or it timed out.
    #[error(transparent)]
    Fault(#[from] FaultError),

    /// The remote side executed the call and reported a failure.
    #[error("remote invocation failed on {provenance}: {failure}")]
    RemoteInvocation {
        /// The failure as reported by the remote side.
        failure: RemoteFailure,
        /// Which endpoint reported it.
        provenance: Provenance,
    },

    /// The endpoint could not be reached (gone, connection refused).
    #[error("service unavailable on {provenance}: {message}")]
    ServiceUnavailable {
        /// Transport failure description.
        message: String,
        /// Which endpoint was unreachable.
        provenance: Provenance,
    },

    /// Some partitions of a broadcast failed.
    #[error("{} of {total} partitions failed", .failed.len())]
    PartialBroadcastFailure {
        /// Indexes of the failed partitions.
        failed: Vec<u32>,
        /// Number of partitions the broadcast targeted.
        total: u32,
    },

    /// Settings could not be read.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// A registry entry could not be bound to a live service.
    #[error(transparent)]
    Bind(#[from] BindError),
}

impl From<CodecError> for RemotingError {
    fn from(err: CodecError) -> Self {
        RemotingError::Serialization {
            message: err.to_string(),
        }
    }
}

impl RemotingError {
    /// Check whether this error means the bound endpoint should be
    /// resolved again through the registry.
    pub fn is_discovery_relevant(&self) -> bool {
        matches!(
            self,
            RemotingError::Registry(RegistryError::NotFound { .. })
                | RemotingError::ServiceUnavailable { .. }
        )
    }

    /// Check whether this error was produced locally, without the
    /// transport being invoked.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            RemotingError::InvalidArguments { .. }
                | RemotingError::UnknownMethod { .. }
                | RemotingError::Fault(FaultError::Rejected { .. })
                | RemotingError::Settings(_)
        )
    }

    /// Provenance of a remote-origin error.
    pub fn provenance(&self) -> Option<&Provenance> {
        match self {
            RemotingError::RemoteInvocation { provenance, .. }
            | RemotingError::ServiceUnavailable { provenance, .. } => Some(provenance),
            _ => None,
        }
    }
}

impl GuardedError for RemotingError {
    /// Everything that reached the remote side or the transport counts,
    /// including remote application failures.
    fn counts_as_failure(&self) -> bool {
        !self.is_local()
    }
}
