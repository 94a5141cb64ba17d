use dconnect::response::{ErrorCode, Response as ManagerResponse};

use axum::{
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Returns the `HTTP` status code carried along an [`ErrorCode`].
#[must_use]
pub const fn status_code(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::NotSupportProfile | ErrorCode::NotFoundService | ErrorCode::NotFoundClientId => {
            StatusCode::NOT_FOUND
        }
        ErrorCode::NotSupportApi => StatusCode::METHOD_NOT_ALLOWED,
        ErrorCode::InvalidRequestParameter | ErrorCode::InvalidOrigin => StatusCode::BAD_REQUEST,
        ErrorCode::EmptyAccessToken
        | ErrorCode::ExpiredAccessToken
        | ErrorCode::InvalidAccessToken => StatusCode::UNAUTHORIZED,
        ErrorCode::AccessDenied | ErrorCode::Scope => StatusCode::FORBIDDEN,
    }
}

/// A response reporting an error detected by the server before a request
/// reaches the manager.
///
/// The body has the same shape as the manager error responses.
pub struct ErrorResponse(Response);

impl ErrorResponse {
    /// Generates an [`ErrorResponse`] with the default message of an
    /// [`ErrorCode`].
    #[must_use]
    #[inline]
    pub fn new(code: ErrorCode) -> Self {
        Self::with_description(code, code.message())
    }

    /// Generates an [`ErrorResponse`].
    ///
    /// Requires specifying an [`ErrorCode`] and a description.
    #[must_use]
    #[inline]
    pub fn with_description(code: ErrorCode, description: &str) -> Self {
        let value = ManagerResponse::error_with_message(code, String::from(description));
        Self((status_code(code), Json(value)).into_response())
    }

    /// Generates an [`ErrorResponse`] for malformed request parameters.
    #[must_use]
    #[inline]
    pub fn invalid_parameter(description: &str) -> Self {
        Self::with_description(ErrorCode::InvalidRequestParameter, description)
    }

    /// Generates an [`ErrorResponse`] for an `HTTP` method without a
    /// counterpart API method.
    #[must_use]
    #[inline]
    pub fn unsupported_method(method: &str) -> Self {
        Self::with_description(
            ErrorCode::NotSupportApi,
            &format!("unsupported API, method `{method}` is not an API method"),
        )
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use dconnect::response::ErrorCode;

    use axum::http::StatusCode;

    use super::status_code;

    #[test]
    fn test_status_codes() {
        assert_eq!(status_code(ErrorCode::Unknown), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_code(ErrorCode::NotFoundService), StatusCode::NOT_FOUND);
        assert_eq!(status_code(ErrorCode::NotSupportApi), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(status_code(ErrorCode::EmptyAccessToken), StatusCode::UNAUTHORIZED);
        assert_eq!(status_code(ErrorCode::Scope), StatusCode::FORBIDDEN);
    }
}
