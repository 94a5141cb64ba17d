use std::borrow::Cow;

/// All possible manager error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A service with the same identifier is already registered.
    DuplicateService,
    /// Two APIs share the same key on the same profile.
    DuplicateApi,
    /// An API descriptor conflicts with a previously registered one.
    ConflictingApi,
    /// The service does not exist.
    ServiceNotFound,
    /// The client does not exist.
    ClientNotFound,
    /// The authorization has been denied.
    AccessDenied,
    /// The request origin is empty or does not match the client origin.
    InvalidOrigin,
    /// Loading or saving the manager state failed.
    Persistence,
    /// The configuration is invalid.
    Configuration,
    /// Event subscription or delivery failure.
    Events,
    /// An API handler failed.
    Handler,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::DuplicateService => "Duplicate Service",
            Self::DuplicateApi => "Duplicate API",
            Self::ConflictingApi => "Conflicting API",
            Self::ServiceNotFound => "Service Not Found",
            Self::ClientNotFound => "Client Not Found",
            Self::AccessDenied => "Access Denied",
            Self::InvalidOrigin => "Invalid Origin",
            Self::Persistence => "Persistence",
            Self::Configuration => "Configuration",
            Self::Events => "Events",
            Self::Handler => "Handler",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// A manager error.
#[derive(PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error().fmt(f)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error().fmt(f)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[must_use]
    #[inline]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    fn error(&self) -> String {
        format!("{}: {}", self.kind, self.description)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Persistence, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Persistence, e.to_string())
    }
}

impl From<dconnect::api::SpecError> for Error {
    fn from(e: dconnect::api::SpecError) -> Self {
        let kind = match e {
            dconnect::api::SpecError::DuplicateApi { .. } => ErrorKind::DuplicateApi,
            _ => ErrorKind::Configuration,
        };
        Self::new(kind, e.to_string())
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
