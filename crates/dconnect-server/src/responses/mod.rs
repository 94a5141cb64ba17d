/// Error responses and their `HTTP` status codes.
pub mod error;

use dconnect::response::Response as ManagerResponse;

use axum::{
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use self::error::status_code;

/// The `HTTP` rendition of a manager response.
///
/// The body is the `JSON` serialization of the response, while the status
/// code is derived from its error code.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse(pub ManagerResponse);

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let status = self.0.error_code().map_or(StatusCode::OK, status_code);
        (status, Json(self.0)).into_response()
    }
}
