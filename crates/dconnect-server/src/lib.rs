//! An `HTTP` transport exposing a Device Connect Manager to client
//! applications.
//!
//! Every manager API is reachable at
//! `/gotapi/{profile}[/{interface}][/{attribute}]`, where the `HTTP` method
//! selects the API method. Request parameters are read from the query string
//! and from an optional `JSON` object body, the target service from the
//! `serviceId` parameter and the access token from either the `accessToken`
//! parameter or an `Authorization: Bearer` header. The calling origin is
//! taken from the `X-GotAPI-Origin` header, falling back to `Origin`.
//!
//! Event messages are streamed to each origin as server-sent events on
//! `/events`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Server errors.
pub mod error;
/// `HTTP` rendition of manager responses.
pub mod responses;
/// The routes handlers.
pub mod routes;
/// The server and its router.
pub mod server;

pub use server::Server;
