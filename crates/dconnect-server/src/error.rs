use std::net::SocketAddr;

/// All server errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The listening socket cannot be bound.
    #[error("impossible to bind `{address}`: {source}")]
    Bind {
        /// The requested address.
        address: SocketAddr,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The server stopped because of an `I/O` failure.
    #[error("server failure: {0}")]
    Serve(#[from] std::io::Error),
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
