//! The communication interface among the Device Connect Manager, the device
//! plugins that run behind it, and the client applications in front of it.
//!
//! This crate provides APIs to:
//!
//! - Describe profiles and their APIs. A profile is a named capability group,
//!   such as `light` or `canvas`, and each of its APIs is identified by an
//!   `HTTP`-like method plus an optional interface and an optional attribute.
//! - Describe and coerce API parameters. Parameters are primitive values
//!   (integers, floats, strings, booleans) or arrays of primitives.
//! - Express authorization scopes. A scope grants a profile either on every
//!   service or on a single service.
//! - Build requests and responses, and encode the event messages delivered
//!   to subscribed origins.
//!
//! Requests, responses and events cross process boundaries, so their
//! structures are serializable and, with the `deserialize` feature,
//! deserializable. A plugin which never parses incoming messages can disable
//! the `deserialize` feature at compile time.
//!
//! This crate can be compiled for both `std` and `no_std` environments.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

mod macros;

/// API descriptors and profile specifications.
pub mod api;
/// Event messages delivered to subscribed origins.
pub mod events;
/// API parameters, their schemas and their coercion rules.
pub mod parameters;
/// Requests sent by client applications.
pub mod request;
/// All supported responses and error codes.
pub mod response;
/// Authorization scopes.
pub mod scope;

// Profile names are case-insensitive.
pub(crate) fn normalize(name: &str) -> alloc::string::String {
    name.trim().to_ascii_lowercase()
}

#[cfg(test)]
#[cfg(feature = "deserialize")]
pub(crate) fn serialize<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap()
}

#[cfg(test)]
#[cfg(feature = "deserialize")]
pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap()
}
