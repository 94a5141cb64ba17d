use std::sync::Arc;

use dconnect::api::{ApiPath, Method};
use dconnect::parameters::{ParameterValue, ParametersValues};
use dconnect::request::Request;
use dconnect::response::ErrorCode;

use dconnect_manager::Manager;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Method as HttpMethod, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};

use tokio_stream::{StreamExt, wrappers::ReceiverStream};

use tracing::{debug, info, warn};

use crate::responses::ApiResponse;
use crate::responses::error::ErrorResponse;

/// The header carrying the origin of the calling application.
pub const ORIGIN_HEADER: &str = "x-gotapi-origin";

const SERVICE_ID_PARAMETER: &str = "serviceId";
const ACCESS_TOKEN_PARAMETER: &str = "accessToken";
const ORIGIN_PARAMETER: &str = "origin";

type QueryPairs = Query<Vec<(String, String)>>;

fn header_origin(headers: &HeaderMap) -> String {
    headers
        .get(ORIGIN_HEADER)
        .or_else(|| headers.get(header::ORIGIN))
        .and_then(|value| value.to_str().ok())
        .map(|value| String::from(value.trim()))
        .unwrap_or_default()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| String::from(token.trim()))
}

fn body_parameters(body: &[u8]) -> Result<ParametersValues, ErrorResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ParametersValues::new());
    }
    serde_json::from_slice(body)
        .map_err(|e| ErrorResponse::invalid_parameter(&format!("invalid JSON body: {e}")))
}

async fn dispatch(
    manager: &Manager,
    method: &HttpMethod,
    headers: &HeaderMap,
    profile: &str,
    path: ApiPath,
    Query(query): QueryPairs,
    body: &[u8],
) -> Response {
    let Some(api_method) = Method::from_name(method.as_str()) else {
        return ErrorResponse::unsupported_method(method.as_str()).into_response();
    };

    let body = match body_parameters(body) {
        Ok(body) => body,
        Err(e) => return e.into_response(),
    };

    let mut service_id = None;
    let mut access_token = None;
    // Query parameters override the body ones.
    let parameters = body
        .into_iter()
        .chain(
            query
                .into_iter()
                .map(|(name, value)| (name, ParameterValue::String(value))),
        )
        .filter_map(|(name, value)| match name.as_str() {
            SERVICE_ID_PARAMETER => {
                service_id = value.as_str().map(String::from);
                None
            }
            ACCESS_TOKEN_PARAMETER => {
                access_token = value.as_str().map(String::from);
                None
            }
            _ => Some((name, value)),
        })
        .collect::<ParametersValues>();

    let mut request =
        Request::new(&header_origin(headers), profile, path, api_method).parameters(parameters);
    if let Some(service_id) = service_id {
        request = request.service(&service_id);
    }
    if let Some(token) = access_token.or_else(|| bearer_token(headers)) {
        request = request.access_token(&token);
    }

    debug!("Dispatch `{}` for origin `{}`", request.key(), request.origin());
    ApiResponse(manager.dispatch(&request).await).into_response()
}

pub(crate) async fn profile(
    State(manager): State<Arc<Manager>>,
    method: HttpMethod,
    headers: HeaderMap,
    Path(profile): Path<String>,
    query: QueryPairs,
    body: Bytes,
) -> Response {
    dispatch(
        &manager,
        &method,
        &headers,
        &profile,
        ApiPath::root(),
        query,
        &body,
    )
    .await
}

pub(crate) async fn attribute(
    State(manager): State<Arc<Manager>>,
    method: HttpMethod,
    headers: HeaderMap,
    Path((profile, attribute)): Path<(String, String)>,
    query: QueryPairs,
    body: Bytes,
) -> Response {
    dispatch(
        &manager,
        &method,
        &headers,
        &profile,
        ApiPath::attribute(&attribute),
        query,
        &body,
    )
    .await
}

pub(crate) async fn interface(
    State(manager): State<Arc<Manager>>,
    method: HttpMethod,
    headers: HeaderMap,
    Path((profile, interface, attribute)): Path<(String, String, String)>,
    query: QueryPairs,
    body: Bytes,
) -> Response {
    dispatch(
        &manager,
        &method,
        &headers,
        &profile,
        ApiPath::interface(&interface, &attribute),
        query,
        &body,
    )
    .await
}

async fn check_stream_token(
    manager: &Manager,
    origin: &str,
    token: Option<String>,
) -> Result<(), ErrorResponse> {
    if !manager.oauth().config().enabled {
        return Ok(());
    }
    let Some(token) = token.filter(|token| !token.is_empty()) else {
        return Err(ErrorResponse::new(ErrorCode::EmptyAccessToken));
    };
    match manager.oauth().token(&token).await {
        Some(access_token) if access_token.origin() == origin => Ok(()),
        Some(access_token) => {
            warn!(
                target: "audit",
                "Event stream of origin `{origin}` requested with a token of origin `{}`",
                access_token.origin()
            );
            Err(ErrorResponse::new(ErrorCode::InvalidAccessToken))
        }
        None => Err(ErrorResponse::new(ErrorCode::InvalidAccessToken)),
    }
}

pub(crate) async fn events(
    State(manager): State<Arc<Manager>>,
    headers: HeaderMap,
    Query(query): QueryPairs,
) -> Response {
    let mut origin = None;
    let mut access_token = None;
    for (name, value) in query {
        match name.as_str() {
            ORIGIN_PARAMETER => origin = Some(value),
            ACCESS_TOKEN_PARAMETER => access_token = Some(value),
            _ => {}
        }
    }

    // Browsers cannot add headers to an event stream request.
    let origin = origin.unwrap_or_else(|| header_origin(&headers));
    if origin.is_empty() {
        return ErrorResponse::new(ErrorCode::InvalidOrigin).into_response();
    }

    // The stream of an origin belongs to the holder of one of its tokens.
    if let Err(e) =
        check_stream_token(&manager, &origin, access_token.or_else(|| bearer_token(&headers))).await
    {
        return e.into_response();
    }

    let receiver = manager.attach(&origin).await;
    info!("Origin `{origin}` attached an event stream");

    let stream = ReceiverStream::new(receiver).map(|message| Event::default().json_data(message));
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}
