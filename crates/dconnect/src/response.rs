use alloc::borrow::Cow;
use alloc::string::String;

use core::fmt;

use hashbrown::DefaultHashBuilder;

use indexmap::map::{IndexMap, Iter};

use serde::{Serialize, Serializer, ser::SerializeMap};

use serde_json::Value;

/// The value of the `result` field of a successful response.
pub const RESULT_OK: u8 = 0;

/// The value of the `result` field of a failed response.
pub const RESULT_ERROR: u8 = 1;

/// The response fields a result parameter cannot be named after.
pub const RESERVED_PARAMETERS: [&str; 3] = ["result", "errorCode", "errorMessage"];

fn is_reserved(name: &str) -> bool {
    RESERVED_PARAMETERS.contains(&name)
}

/// All error codes a response can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// An unexpected error occurred.
    Unknown,
    /// The requested profile is not supported by the service.
    NotSupportProfile,
    /// The requested API is not supported by the profile.
    NotSupportApi,
    /// The requested service does not exist.
    NotFoundService,
    /// A request parameter is missing or malformed.
    InvalidRequestParameter,
    /// The user denied the authorization.
    AccessDenied,
    /// The access token has expired.
    ExpiredAccessToken,
    /// No access token has been supplied.
    EmptyAccessToken,
    /// The access token does not grant the requested profile.
    Scope,
    /// The client identifier is unknown.
    NotFoundClientId,
    /// The access token is unknown or has been revoked.
    InvalidAccessToken,
    /// The request origin is missing or not allowed.
    InvalidOrigin,
}

impl ErrorCode {
    /// Returns the numeric value of the [`ErrorCode`].
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::Unknown => 1,
            Self::NotSupportProfile => 2,
            Self::NotSupportApi => 3,
            Self::NotFoundService => 5,
            Self::InvalidRequestParameter => 10,
            Self::AccessDenied => 11,
            Self::ExpiredAccessToken => 12,
            Self::EmptyAccessToken => 13,
            Self::Scope => 14,
            Self::NotFoundClientId => 15,
            Self::InvalidAccessToken => 16,
            Self::InvalidOrigin => 17,
        }
    }

    /// Returns the [`ErrorCode`] associated with a numeric value.
    ///
    /// Unassigned values map to [`ErrorCode::Unknown`].
    #[must_use]
    pub const fn from_code(code: u16) -> Self {
        match code {
            2 => Self::NotSupportProfile,
            3 => Self::NotSupportApi,
            5 => Self::NotFoundService,
            10 => Self::InvalidRequestParameter,
            11 => Self::AccessDenied,
            12 => Self::ExpiredAccessToken,
            13 => Self::EmptyAccessToken,
            14 => Self::Scope,
            15 => Self::NotFoundClientId,
            16 => Self::InvalidAccessToken,
            17 => Self::InvalidOrigin,
            _ => Self::Unknown,
        }
    }

    /// Returns the default message of the [`ErrorCode`].
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::Unknown => "unexpected error",
            Self::NotSupportProfile => "profile not found",
            Self::NotSupportApi => "unsupported API",
            Self::NotFoundService => "service not found",
            Self::InvalidRequestParameter => "invalid request parameter",
            Self::AccessDenied => "access denied",
            Self::ExpiredAccessToken => "access token expired",
            Self::EmptyAccessToken => "authorization required",
            Self::Scope => "scope insufficient",
            Self::NotFoundClientId => "client not found",
            Self::InvalidAccessToken => "invalid access token",
            Self::InvalidOrigin => "invalid origin",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message().fmt(f)
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.code())
    }
}

/// The parameters produced by a successful API invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ResultParameters(IndexMap<String, Value, DefaultHashBuilder>);

impl ResultParameters {
    /// Creates an empty [`ResultParameters`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self(IndexMap::with_hasher(DefaultHashBuilder::default()))
    }

    /// Adds a result parameter.
    #[must_use]
    #[inline]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a result parameter, replacing any previous value.
    #[inline]
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let _ = self.0.insert(String::from(name), value.into());
    }

    /// Returns the value of the given result parameter.
    #[must_use]
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Checks whether there are no result parameters.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of result parameters.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns an iterator over the result parameters, in insertion order.
    #[inline]
    pub fn iter(&self) -> Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Returns the first parameter named after a response field, if any.
    ///
    /// Such parameters are never serialized.
    #[must_use]
    pub fn reserved_name(&self) -> Option<&str> {
        self.0.keys().map(String::as_str).find(|name| is_reserved(name))
    }
}

/// The error part of a failed [`Response`].
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: Cow<'static, str>,
}

impl ErrorResponse {
    /// Creates an [`ErrorResponse`] with the default message of its code.
    #[must_use]
    pub const fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: Cow::Borrowed(code.message()),
        }
    }

    /// Creates an [`ErrorResponse`] with a custom message.
    #[must_use]
    #[inline]
    pub fn with_message(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

/// The response to a [`Request`](crate::request::Request).
///
/// A response is either entirely success-shaped or entirely error-shaped.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The API completed and produced these parameters.
    Ok(ResultParameters),
    /// The request failed.
    Error(ErrorResponse),
}

impl Response {
    /// Creates a successful [`Response`] without parameters.
    #[must_use]
    #[inline]
    pub fn ok() -> Self {
        Self::Ok(ResultParameters::new())
    }

    /// Creates a successful [`Response`] carrying the given parameters.
    #[must_use]
    #[inline]
    pub const fn with_parameters(parameters: ResultParameters) -> Self {
        Self::Ok(parameters)
    }

    /// Creates a failed [`Response`] with the default message of the code.
    #[must_use]
    #[inline]
    pub const fn error(code: ErrorCode) -> Self {
        Self::Error(ErrorResponse::new(code))
    }

    /// Creates a failed [`Response`] with a custom message.
    #[must_use]
    #[inline]
    pub fn error_with_message(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self::Error(ErrorResponse::with_message(code, message))
    }

    /// Checks whether the [`Response`] is successful.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns the [`ErrorCode`] of a failed [`Response`].
    #[must_use]
    pub const fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Ok(_) => None,
            Self::Error(error) => Some(error.code),
        }
    }

    /// Returns the parameters of a successful [`Response`].
    #[must_use]
    pub const fn parameters(&self) -> Option<&ResultParameters> {
        match self {
            Self::Ok(parameters) => Some(parameters),
            Self::Error(_) => None,
        }
    }
}

impl From<ErrorResponse> for Response {
    fn from(error: ErrorResponse) -> Self {
        Self::Error(error)
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Ok(parameters) => {
                let fields = parameters.iter().filter(|(name, _)| !is_reserved(name));
                let mut map = serializer.serialize_map(Some(fields.clone().count() + 1))?;
                map.serialize_entry("result", &RESULT_OK)?;
                for (name, value) in fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
            Self::Error(error) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("result", &RESULT_ERROR)?;
                map.serialize_entry("errorCode", &error.code)?;
                map.serialize_entry("errorMessage", &error.message)?;
                map.end()
            }
        }
    }
}

#[cfg(feature = "deserialize")]
impl<'de> serde::Deserialize<'de> for Response {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let mut fields =
            <IndexMap<String, Value, DefaultHashBuilder>>::deserialize(deserializer)?;

        let result = fields
            .shift_remove("result")
            .and_then(|value| value.as_u64())
            .ok_or_else(|| D::Error::missing_field("result"))?;

        match result {
            0 => Ok(Self::Ok(ResultParameters(fields))),
            1 => {
                let code = fields
                    .get("errorCode")
                    .and_then(Value::as_u64)
                    .and_then(|code| u16::try_from(code).ok())
                    .map_or(ErrorCode::Unknown, ErrorCode::from_code);
                let message = fields
                    .get("errorMessage")
                    .and_then(Value::as_str)
                    .map_or(Cow::Borrowed(code.message()), |message| {
                        Cow::Owned(String::from(message))
                    });
                Ok(Self::Error(ErrorResponse { code, message }))
            }
            other => Err(D::Error::custom(alloc::format!(
                "unknown result value `{other}`"
            ))),
        }
    }
}
