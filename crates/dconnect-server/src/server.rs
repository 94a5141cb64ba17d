use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use dconnect_manager::Manager;

use axum::Router;
use axum::routing::{any, get};

use tokio::net::TcpListener;

use tower_http::trace::TraceLayer;

use tracing::{error, info};

use crate::error::{Error, Result};
use crate::routes;

/// Default server address.
pub const DEFAULT_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default server port.
pub const DEFAULT_PORT: u16 = 4035;

/// The `HTTP` server exposing a [`Manager`].
///
/// Every API is reachable at `/gotapi/{profile}[/{interface}]/{attribute}`,
/// while events are streamed as server-sent events on `/events`.
#[derive(Debug)]
pub struct Server {
    manager: Arc<Manager>,
    address: IpAddr,
    port: u16,
}

impl Server {
    /// Creates a [`Server`] listening on the default address and port.
    #[must_use]
    #[inline]
    pub const fn new(manager: Arc<Manager>) -> Self {
        Self {
            manager,
            address: DEFAULT_ADDRESS,
            port: DEFAULT_PORT,
        }
    }

    /// Sets the server address.
    #[must_use]
    #[inline]
    pub const fn address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Sets the server port.
    #[must_use]
    #[inline]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Returns the socket address the server binds to.
    #[must_use]
    #[inline]
    pub const fn socket_address(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Builds the [`Router`] serving the manager APIs.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/events", get(routes::events))
            .route("/gotapi/{profile}", any(routes::profile))
            .route("/gotapi/{profile}/{attribute}", any(routes::attribute))
            .route(
                "/gotapi/{profile}/{interface}/{attribute}",
                any(routes::interface),
            )
            .with_state(Arc::clone(&self.manager))
            .layer(TraceLayer::new_for_http())
    }

    /// Runs the server until a `Ctrl-C` signal is received.
    ///
    /// # Errors
    ///
    /// Fails when the socket cannot be bound or the server stops because
    /// of an `I/O` failure.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Runs the server until the given signal completes.
    ///
    /// In-flight requests are completed before returning.
    ///
    /// # Errors
    ///
    /// Fails when the socket cannot be bound or the server stops because
    /// of an `I/O` failure.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let address = self.socket_address();
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| Error::Bind { address, source })?;

        info!("Server listening on `{address}`");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Impossible to listen for the shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use dconnect::api::{ApiPath, ApiSpec};
    use dconnect::parameters::{ParameterKind, ParameterSpecs};
    use dconnect::response::ResultParameters;

    use dconnect_manager::config::{ManagerConfig, OAuthConfig};
    use dconnect_manager::oauth::ApproveAll;
    use dconnect_manager::service::{Profile, Service};
    use dconnect_manager::{Manager, ManagerBuilder};

    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};

    use serde_json::{Value, json};

    use tower::ServiceExt;

    use super::Server;

    fn light_service() -> Service {
        let power = Arc::new(AtomicBool::new(false));
        let status = Arc::clone(&power);

        let light = Profile::new("light")
            .api(ApiSpec::get(ApiPath::root()), move |_| {
                let on = status.load(Ordering::SeqCst);
                async move { Ok(ResultParameters::new().with("on", on)) }
            })
            .unwrap()
            .api(
                ApiSpec::post(ApiPath::root()).with_parameters(
                    ParameterSpecs::new()
                        .required("lightId", ParameterKind::String)
                        .optional("brightness", ParameterKind::Integer),
                ),
                move |context| {
                    power.store(true, Ordering::SeqCst);
                    async move {
                        Ok(ResultParameters::new()
                            .with("lightId", context.params.get_str("lightId").unwrap_or_default())
                            .with(
                                "brightness",
                                context.params.get_i64("brightness").unwrap_or_default(),
                            ))
                    }
                },
            )
            .unwrap()
            .event(ApiPath::attribute("onChange"))
            .unwrap();

        Service::new("hue.1", "Hue Light").profile(light).unwrap()
    }

    async fn router(config: ManagerConfig) -> (Arc<Manager>, Router) {
        let manager = ManagerBuilder::new(config)
            .confirmation_ui(ApproveAll)
            .build()
            .await
            .unwrap();
        manager.add_service(light_service()).await.unwrap();

        let manager = Arc::new(manager);
        let router = Server::new(Arc::clone(&manager)).router();
        (manager, router)
    }

    fn disabled_oauth() -> ManagerConfig {
        ManagerConfig::default().oauth(OAuthConfig::default().disabled())
    }

    async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header("x-gotapi-origin", "app")
            .body(Body::empty())
            .unwrap()
    }

    async fn access_token(router: &Router) -> String {
        let (status, body) = call(router, get("/gotapi/authorization/grant")).await;
        assert_eq!(status, StatusCode::OK);
        let client_id = body["clientId"].as_str().unwrap().to_owned();

        let (status, body) = call(
            router,
            get(&format!(
                "/gotapi/authorization/accessToken?clientId={client_id}&scope=light&applicationName=Test"
            )),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["accessToken"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn test_service_discovery() {
        let (manager, router) = router(ManagerConfig::default()).await;

        let (status, body) = call(&router, get("/gotapi/servicediscovery")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], json!(0));
        assert_eq!(body["services"][0]["id"], json!("hue.1"));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_token_flow() {
        let (manager, router) = router(ManagerConfig::default()).await;

        let (status, body) = call(&router, get("/gotapi/light?serviceId=hue.1")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["result"], json!(1));
        assert_eq!(body["errorCode"], json!(13));

        let token = access_token(&router).await;

        let (status, body) = call(
            &router,
            get(&format!("/gotapi/light?serviceId=hue.1&accessToken={token}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["on"], json!(false));

        let request = Request::get("/gotapi/light?serviceId=hue.1")
            .header("x-gotapi-origin", "app")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&router, request).await;
        assert_eq!(status, StatusCode::OK);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_json_body() {
        let (manager, router) = router(disabled_oauth()).await;

        let request = Request::post("/gotapi/light?serviceId=hue.1")
            .header("x-gotapi-origin", "app")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"lightId": 7, "brightness": "40"}"#))
            .unwrap();
        let (status, body) = call(&router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lightId"], json!("7"));
        assert_eq!(body["brightness"], json!(40));

        let request = Request::post("/gotapi/light?serviceId=hue.1")
            .header("x-gotapi-origin", "app")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = call(&router, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errorCode"], json!(10));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsupported_requests() {
        let (manager, router) = router(disabled_oauth()).await;

        let (status, body) = call(&router, get("/gotapi/camera?serviceId=hue.1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorCode"], json!(2));

        let (status, body) = call(&router, get("/gotapi/light?serviceId=hue.9")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorCode"], json!(5));

        let request = Request::patch("/gotapi/light?serviceId=hue.1")
            .header("x-gotapi-origin", "app")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(&router, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["errorCode"], json!(3));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_events_without_origin() {
        let (manager, router) = router(ManagerConfig::default()).await;

        let request = Request::get("/events").body(Body::empty()).unwrap();
        let (status, body) = call(&router, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["result"], json!(1));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_events_stream() {
        let (manager, router) = router(ManagerConfig::default()).await;
        let token = access_token(&router).await;

        let request = Request::get(format!("/events?origin=app&accessToken={token}"))
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_events_stream_requires_origin_token() {
        let (manager, router) = router(ManagerConfig::default()).await;

        let request = Request::get("/events?origin=app").body(Body::empty()).unwrap();
        let (status, body) = call(&router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["errorCode"], json!(13));

        // A token issued to `app` cannot open the stream of `other`.
        let token = access_token(&router).await;
        let request = Request::get("/events?origin=other")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(&router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["errorCode"], json!(16));
        assert!(!manager.detach("other").await);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_events_stream_without_oauth() {
        let (manager, router) = router(disabled_oauth()).await;

        let request = Request::get("/events?origin=app").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        manager.shutdown().await;
    }
}
