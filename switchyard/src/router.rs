//! Routers: derive a partition routing key from invocation arguments.
//!
//! Each routed service method is bound to one [`Router`] when its client is
//! built. The router inspects the call's arguments and returns the
//! [`RoutingKey`] selecting the owning partition.
//!
//! Routers are deterministic: equal argument sequences always give equal
//! keys. They run before anything is dispatched, so a failure here is a
//! local `InvalidArguments` error and never reaches the transport.

use std::fmt;

use serde_json::Value;
use switchyard_core::RoutingKey;

use crate::error::RemotingError;

/// Strategy deriving a routing key from invocation arguments.
pub trait Router: Send + Sync + fmt::Debug {
    /// Compute the routing key for `args`.
    ///
    /// # Errors
    ///
    /// Returns `RemotingError::InvalidArguments` when the arguments do not
    /// contain what this strategy routes on.
    fn routing_key(&self, args: &[Value]) -> Result<RoutingKey, RemotingError>;
}

/// Routes on a whole argument.
///
/// The most common strategy: a method like `getAccount(accountId)` routes
/// on its first argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentRouter {
    index: usize,
}

impl ArgumentRouter {
    /// Route on the argument at `index`.
    pub fn new(index: usize) -> Self {
        Self { index }
    }

    /// Route on the first argument.
    pub fn first() -> Self {
        Self::new(0)
    }
}

impl Router for ArgumentRouter {
    fn routing_key(&self, args: &[Value]) -> Result<RoutingKey, RemotingError> {
        let arg = args
            .get(self.index)
            .ok_or_else(|| RemotingError::InvalidArguments {
                message: format!(
                    "routing on argument {} but only {} given",
                    self.index,
                    args.len()
                ),
            })?;
        Ok(RoutingKey::of(arg))
    }
}

/// Routes on a field inside an object argument.
///
/// The path is dot separated, e.g. `customer.id` inside the argument at
/// `index`. A missing or `null` field is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRouter {
    index: usize,
    path: Vec<String>,
}

impl PropertyRouter {
    /// Route on `path` inside the argument at `index`.
    pub fn new(index: usize, path: &str) -> Self {
        Self {
            index,
            path: path.split('.').map(str::to_string).collect(),
        }
    }
}

impl Router for PropertyRouter {
    fn routing_key(&self, args: &[Value]) -> Result<RoutingKey, RemotingError> {
        let mut current = args
            .get(self.index)
            .ok_or_else(|| RemotingError::InvalidArguments {
                message: format!(
                    "routing on argument {} but only {} given",
                    self.index,
                    args.len()
                ),
            })?;
        for segment in &self.path {
            current = match current.get(segment.as_str()) {
                Some(Value::Null) | None => {
                    return Err(RemotingError::InvalidArguments {
                        message: format!(
                            "argument {} has no routing field {}",
                            self.index,
                            self.path.join(".")
                        ),
                    });
                }
                Some(value) => value,
            };
        }
        Ok(RoutingKey::of(current))
    }
}
