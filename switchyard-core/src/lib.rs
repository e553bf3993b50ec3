//! # switchyard-core
//!
//! Core abstractions shared by the switchyard remoting layer.
//!
//! This crate provides the pieces every other component builds on:
//!
//! - **Data model**: [`ServiceKey`], [`ServiceEntry`], [`RoutingKey`],
//!   [`InvocationRequest`] and [`InvocationResponse`]
//! - **Codec trait**: pluggable payload serialization ([`MessageCodec`], [`JsonCodec`])
//! - **Time provider**: [`TimeProvider`] so breaker cool-downs, timeouts and
//!   rebind intervals can run against a paused clock in tests
//! - **Settings**: [`Settings`], a concurrent key/value store with typed accessors

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
pub mod settings;
mod time;
mod types;

// Codec exports
pub use codec::{CodecError, JsonCodec, MessageCodec};

// Settings exports
pub use settings::{SettingValue, Settings, SettingsError};

// Time exports
pub use time::{SharedTimeProvider, TimeProvider, TokioTimeProvider};

// Core type exports
pub use types::{
    headers, InvocationRequest, InvocationResponse, PropertyBagError, RemoteFailure, RoutingKey,
    ServiceEntry, ServiceKey, ServiceProperties, LEASE_DURATION_PROPERTY, SERVICE_TYPE_PROPERTY,
};
