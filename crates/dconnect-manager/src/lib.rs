//! The `dconnect-manager` library crate is the core of a Device Connect
//! Manager: a local message bus which exposes heterogeneous devices through a
//! uniform request-response protocol.
//!
//! Devices are announced by plugins as services, each exposing a set of
//! profiles. Every request sent by a client application is resolved to a
//! service API, validated against its descriptor, authorized with a scoped
//! access token, and finally handed to the API handler.
//!
//! Core functionalities of this crate include:
//!
//! - Registering API descriptors and validating requests against them
//! - Keeping the registry of the available services
//! - Dispatching requests to the handlers of service APIs
//! - Issuing and checking the access tokens of a local `OAuth` authority
//! - Managing event subscriptions and delivering device events to the
//!   subscribed applications
//!
//! Every component is owned by a [`Manager`](manager::Manager) context,
//! built once and shared among the tasks of a `tokio` runtime.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// The registry of API descriptors.
pub mod api_registry;
/// Manager configuration.
pub mod config;
/// The dispatcher routing requests to service APIs.
pub mod dispatcher;
/// Error management.
pub mod error;
/// Event subscriptions and delivery.
pub mod events;
/// The manager context wiring all components together.
pub mod manager;
/// The local `OAuth` authority issuing and checking access tokens.
pub mod oauth;
/// The registry of the available services.
pub mod registry;
/// Services, profiles and API handlers.
pub mod service;
/// Persistence of clients, tokens and subscriptions.
pub mod store;

pub use manager::{Manager, ManagerBuilder};
