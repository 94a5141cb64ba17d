use std::path::Path;
use std::sync::Arc;

use dconnect::api::{ApiPath, ApiSpec, ProfileSpec};
use dconnect::events::{EventKey, EventMessage};
use dconnect::parameters::{ParameterKind, ParameterSpecs, ParametersValues, PrimitiveKind};
use dconnect::request::Request;
use dconnect::response::{ErrorCode, ErrorResponse, Response, ResultParameters};
use dconnect::scope::{Scope, Scopes};

use serde_json::Value;

use tokio::sync::Mutex;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::api_registry::ApiRegistry;
use crate::config::ManagerConfig;
use crate::dispatcher::{Dispatcher, unsupported_api};
use crate::error::{ErrorKind, Result};
use crate::events::{EventManager, EventSource, run_event_loop};
use crate::oauth::{AccessToken, ConfirmationUi, DenyAll, LocalOAuth, TokenCheck};
use crate::registry::ServiceRegistry;
use crate::service::{Profile, Service};
use crate::store::{JsonFileStore, MemoryStore, Store};

/// The name of the profile listing the available services.
pub const SERVICE_DISCOVERY_PROFILE: &str = "servicediscovery";

/// The name of the profile through which clients obtain access tokens.
pub const AUTHORIZATION_PROFILE: &str = "authorization";

const GRANT_ATTRIBUTE: &str = "grant";
const ACCESS_TOKEN_ATTRIBUTE: &str = "accesstoken";

type Outcome<T> = std::result::Result<T, ErrorResponse>;

fn service_discovery_spec() -> ProfileSpec {
    // Built from constants, so insertion never fails.
    let mut profile = ProfileSpec::new(SERVICE_DISCOVERY_PROFILE);
    let _ = profile.insert(
        ApiSpec::get(ApiPath::root())
            .description("Lists the available services")
            .with_parameters(ParameterSpecs::new().optional("profile", ParameterKind::String)),
    );
    profile
}

fn authorization_spec() -> ProfileSpec {
    let mut profile = ProfileSpec::new(AUTHORIZATION_PROFILE);
    let _ = profile.insert(
        ApiSpec::get(ApiPath::attribute(GRANT_ATTRIBUTE))
            .description("Registers the client of the calling origin"),
    );
    let _ = profile.insert(
        ApiSpec::get(ApiPath::attribute(ACCESS_TOKEN_ATTRIBUTE))
            .description("Issues an access token")
            .with_parameters(
                ParameterSpecs::new()
                    .required("clientId", ParameterKind::String)
                    .required("scope", ParameterKind::Array(PrimitiveKind::String))
                    .optional("applicationName", ParameterKind::String),
            ),
    );
    profile
}

fn is_builtin(profile: &str) -> bool {
    profile == SERVICE_DISCOVERY_PROFILE || profile == AUTHORIZATION_PROFILE
}

fn internal_error(description: impl std::fmt::Display) -> ErrorResponse {
    error!("Built-in API failure: {description}");
    ErrorResponse::new(ErrorCode::Unknown)
}

/// A builder for a [`Manager`].
pub struct ManagerBuilder {
    config: ManagerConfig,
    store: Option<Arc<dyn Store>>,
    ui: Option<Arc<dyn ConfirmationUi>>,
}

impl ManagerBuilder {
    /// Creates a [`ManagerBuilder`] from a [`ManagerConfig`].
    #[must_use]
    #[inline]
    pub const fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            store: None,
            ui: None,
        }
    }

    /// Sets the persistence [`Store`].
    ///
    /// When unset, a [`JsonFileStore`] is used if the configuration names a
    /// storage directory, and a [`MemoryStore`] otherwise.
    #[must_use]
    #[inline]
    pub fn store(mut self, store: impl Store + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Sets the [`ConfirmationUi`] asked to approve token requests.
    ///
    /// When unset, every token request needing a confirmation is denied.
    #[must_use]
    #[inline]
    pub fn confirmation_ui(mut self, ui: impl ConfirmationUi + 'static) -> Self {
        self.ui = Some(Arc::new(ui));
        self
    }

    /// Builds the [`Manager`].
    ///
    /// The persisted state is restored and the event task is started, so
    /// this must be called from within a `tokio` runtime.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or when the persisted state
    /// cannot be loaded.
    pub async fn build(self) -> Result<Manager> {
        self.config.validate()?;

        let store: Arc<dyn Store> = match (self.store, &self.config.storage_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => {
                info!("Store manager state in `{}`", dir.display());
                Arc::new(JsonFileStore::new(dir))
            }
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let ui = self.ui.unwrap_or_else(|| {
            warn!("No confirmation UI, interactive token requests will be denied");
            Arc::new(DenyAll)
        });

        let snapshot = store.load().await?;

        let apis = Arc::new(ApiRegistry::new());
        apis.register_profiles([&service_discovery_spec(), &authorization_spec()])
            .await?;

        let events = Arc::new(EventManager::new(
            self.config.events.origin_buffer,
            Arc::clone(&store),
        ));
        let services = Arc::new(ServiceRegistry::new(
            Arc::clone(&apis),
            Arc::clone(&events),
        ));
        let oauth = Arc::new(LocalOAuth::new(
            self.config.oauth.clone(),
            ui,
            store,
            Arc::clone(&events),
        ));

        oauth.restore(snapshot.oauth).await;
        let mut subscriptions = Vec::with_capacity(snapshot.subscriptions.len());
        for subscription in snapshot.subscriptions {
            if let Some(token) = &subscription.access_token
                && oauth.token(token).await.is_none()
            {
                warn!(
                    "Skip subscription of origin `{}` to `{}`: token revoked",
                    subscription.origin, subscription.key
                );
                continue;
            }
            subscriptions.push(subscription);
        }
        events.restore(subscriptions).await;

        let (source, receiver) = EventSource::channel(self.config.events.source_buffer);
        let cancellation_token = CancellationToken::new();
        let event_task = tokio::spawn(run_event_loop(
            Arc::clone(&events),
            receiver,
            cancellation_token.clone(),
        ));

        let dispatcher = Dispatcher::new(
            Arc::clone(&services),
            Arc::clone(&apis),
            Arc::clone(&oauth),
            Arc::clone(&events),
            source.clone(),
        );

        info!("Manager started");

        Ok(Manager {
            config: self.config,
            apis,
            services,
            oauth,
            events,
            dispatcher,
            source,
            cancellation_token,
            event_task: Mutex::new(Some(event_task)),
        })
    }
}

/// The manager context.
///
/// It owns every core component and exposes the operations needed by the
/// transport ingress, by plugins and by the platform lifecycle. Besides the
/// profiles of registered services, the manager itself answers the
/// [`SERVICE_DISCOVERY_PROFILE`] and [`AUTHORIZATION_PROFILE`] profiles.
#[derive(Debug)]
pub struct Manager {
    config: ManagerConfig,
    apis: Arc<ApiRegistry>,
    services: Arc<ServiceRegistry>,
    oauth: Arc<LocalOAuth>,
    events: Arc<EventManager>,
    dispatcher: Dispatcher,
    source: EventSource,
    cancellation_token: CancellationToken,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl Manager {
    /// Builds a [`Manager`] with the default store and without a
    /// confirmation UI.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or when the persisted state
    /// cannot be loaded.
    #[inline]
    pub async fn new(config: ManagerConfig) -> Result<Self> {
        ManagerBuilder::new(config).build().await
    }

    /// Returns a [`ManagerBuilder`].
    #[must_use]
    #[inline]
    pub const fn builder(config: ManagerConfig) -> ManagerBuilder {
        ManagerBuilder::new(config)
    }

    /// Dispatches a [`Request`] and returns its [`Response`].
    pub async fn dispatch(&self, request: &Request) -> Response {
        let profile = request.profile().trim().to_ascii_lowercase();
        if !is_builtin(&profile) {
            return self.dispatcher.dispatch(request).await;
        }

        match self.dispatch_builtin(request, &profile).await {
            Ok(parameters) => Response::with_parameters(parameters),
            Err(e) => {
                debug!(
                    "Request `{}` of origin `{}` failed: {e}",
                    request.key(),
                    request.origin()
                );
                Response::from(e)
            }
        }
    }

    /// Adds a [`Service`].
    ///
    /// # Errors
    ///
    /// Fails when the identifier is taken or when an API conflicts with a
    /// registered descriptor.
    #[inline]
    pub async fn add_service(&self, service: Service) -> Result<()> {
        self.services.add_service(service).await
    }

    /// Removes a service together with its event subscriptions.
    ///
    /// Returns whether the service existed.
    #[inline]
    pub async fn remove_service(&self, id: &str) -> bool {
        self.services.remove_service(id).await
    }

    /// Returns a registered [`Service`].
    #[inline]
    pub async fn get_service(&self, id: &str) -> Option<Arc<Service>> {
        self.services.get_service(id).await
    }

    /// Returns the registered services, optionally only those exposing a
    /// profile.
    #[inline]
    pub async fn get_services(&self, profile: Option<&str>) -> Vec<Arc<Service>> {
        self.services.get_services(profile).await
    }

    /// Changes the display name of a service.
    ///
    /// # Errors
    ///
    /// Fails when the service does not exist.
    #[inline]
    pub async fn rename_service(&self, id: &str, name: &str) -> Result<()> {
        self.services.rename_service(id, name).await
    }

    /// Changes the online flag of a service.
    ///
    /// # Errors
    ///
    /// Fails when the service does not exist.
    #[inline]
    pub async fn set_online(&self, id: &str, online: bool) -> Result<()> {
        self.services.set_online(id, online).await
    }

    /// Adds a [`Profile`] to a registered service.
    ///
    /// # Errors
    ///
    /// Fails when the service does not exist or already exposes the profile,
    /// or when an API conflicts with a registered descriptor.
    #[inline]
    pub async fn extend_service(&self, id: &str, profile: Profile) -> Result<()> {
        self.services.extend_service(id, profile).await
    }

    /// Returns the client identifier of an origin, registering it if needed.
    ///
    /// # Errors
    ///
    /// Fails when the origin is empty.
    #[inline]
    pub async fn create_client(&self, origin: &str) -> Result<String> {
        self.oauth.create_client(origin).await
    }

    /// Issues an access token to a client.
    ///
    /// # Errors
    ///
    /// Fails when the client does not exist or the request is denied.
    #[inline]
    pub async fn request_access_token(
        &self,
        client_id: &str,
        application_name: &str,
        scopes: &Scopes,
    ) -> Result<AccessToken> {
        self.oauth
            .request_access_token(client_id, application_name, scopes)
            .await
    }

    /// Checks an access token against a profile on a service.
    #[inline]
    pub async fn check_access_token(
        &self,
        token: &str,
        origin: &str,
        service_id: Option<&str>,
        profile: &str,
    ) -> TokenCheck {
        self.oauth
            .check_access_token(token, origin, service_id, profile)
            .await
    }

    /// Revokes every token of a client together with their subscriptions.
    ///
    /// Returns the number of revoked tokens.
    ///
    /// # Errors
    ///
    /// Fails when the client does not exist.
    #[inline]
    pub async fn revoke_client(&self, client_id: &str) -> Result<usize> {
        self.oauth.revoke(client_id).await
    }

    /// Forgets an uninstalled origin: its client, all of its tokens, its
    /// subscriptions and its event channel are removed.
    ///
    /// Returns whether anything belonged to the origin.
    pub async fn uninstall_origin(&self, origin: &str) -> bool {
        let had_client = self.oauth.remove_origin(origin).await;
        let removed = self.events.remove_origin(origin).await;
        info!(target: "audit", "Uninstalled origin `{origin}`");
        had_client || removed > 0
    }

    /// Attaches the event channel of an origin.
    #[inline]
    pub async fn attach(&self, origin: &str) -> Receiver<EventMessage> {
        self.events.attach(origin).await
    }

    /// Detaches the event channel of an origin, keeping its subscriptions.
    #[inline]
    pub async fn detach(&self, origin: &str) -> bool {
        self.events.detach(origin).await
    }

    /// Returns an [`EventSource`] through which plugins raise events.
    #[must_use]
    #[inline]
    pub fn event_source(&self) -> EventSource {
        self.source.clone()
    }

    /// Delivers an event to its subscribers right away and returns the
    /// number of origins which received it.
    #[inline]
    pub async fn dispatch_event(&self, key: &EventKey, payload: ResultParameters) -> usize {
        self.events.dispatch_event(key, payload).await
    }

    /// Loads and registers the profile schemas contained in a directory.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be read.
    #[inline]
    pub async fn load_schemas(&self, dir: impl AsRef<Path>) -> Result<Vec<ProfileSpec>> {
        self.apis.load_schemas(dir).await
    }

    /// Returns the [`ManagerConfig`].
    #[must_use]
    pub const fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Returns the [`ApiRegistry`].
    #[must_use]
    pub const fn api_registry(&self) -> &Arc<ApiRegistry> {
        &self.apis
    }

    /// Returns the [`ServiceRegistry`].
    #[must_use]
    pub const fn service_registry(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Returns the [`LocalOAuth`] authority.
    #[must_use]
    pub const fn oauth(&self) -> &Arc<LocalOAuth> {
        &self.oauth
    }

    /// Returns the [`EventManager`].
    #[must_use]
    pub const fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    /// Stops the event task, waiting for it to finish.
    ///
    /// Events published afterwards are rejected.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        let Some(event_task) = self.event_task.lock().await.take() else {
            return;
        };
        if let Err(e) = event_task.await {
            error!("The event task failed: {e}");
        }
        info!("Manager stopped");
    }

    async fn dispatch_builtin(&self, request: &Request, profile: &str) -> Outcome<ResultParameters> {
        let origin = request.origin();
        if origin.is_empty() {
            return Err(ErrorResponse::new(ErrorCode::InvalidOrigin));
        }

        let key = request.key();
        let Some(spec) = self.apis.lookup(None, profile, &key.path, key.method).await else {
            return Err(unsupported_api(
                &self.apis.allowed_methods(None, profile, &key.path).await,
            ));
        };
        let params = ApiRegistry::validate(&spec, request.params()).map_err(|e| {
            ErrorResponse::with_message(ErrorCode::InvalidRequestParameter, e.to_string())
        })?;

        match (profile, key.path.attribute_name()) {
            (SERVICE_DISCOVERY_PROFILE, None) => self.service_discovery(&params).await,
            (AUTHORIZATION_PROFILE, Some(GRANT_ATTRIBUTE)) => self.grant(origin).await,
            (AUTHORIZATION_PROFILE, Some(ACCESS_TOKEN_ATTRIBUTE)) => {
                self.access_token(origin, &params).await
            }
            _ => Err(ErrorResponse::new(ErrorCode::NotSupportApi)),
        }
    }

    async fn service_discovery(&self, params: &ParametersValues) -> Outcome<ResultParameters> {
        let summaries = self
            .services
            .get_services(params.get_str("profile"))
            .await
            .iter()
            .map(|service| service.summary())
            .collect::<Vec<_>>();
        let services = serde_json::to_value(summaries).map_err(internal_error)?;
        Ok(ResultParameters::new().with("services", services))
    }

    async fn grant(&self, origin: &str) -> Outcome<ResultParameters> {
        let client_id = self.oauth.create_client(origin).await.map_err(|e| {
            if e.kind() == ErrorKind::InvalidOrigin {
                ErrorResponse::new(ErrorCode::InvalidOrigin)
            } else {
                internal_error(e)
            }
        })?;
        Ok(ResultParameters::new().with("clientId", client_id))
    }

    async fn access_token(
        &self,
        origin: &str,
        params: &ParametersValues,
    ) -> Outcome<ResultParameters> {
        let client_id = params.get_str("clientId").unwrap_or_default();
        let client = self
            .oauth
            .client(client_id)
            .await
            .ok_or_else(|| ErrorResponse::new(ErrorCode::NotFoundClientId))?;
        if client.origin() != origin {
            warn!(
                target: "audit",
                "Origin `{origin}` requested a token for client of origin `{}`",
                client.origin()
            );
            return Err(ErrorResponse::new(ErrorCode::InvalidOrigin));
        }

        let scopes = params
            .get("scope")
            .and_then(|scope| scope.as_array())
            .unwrap_or_default()
            .iter()
            .filter_map(|scope| scope.as_str().and_then(Scope::parse))
            .collect::<Scopes>();
        if scopes.is_empty() {
            return Err(ErrorResponse::with_message(
                ErrorCode::InvalidRequestParameter,
                "No valid scope in `scope`",
            ));
        }

        let application_name = params.get_str("applicationName").unwrap_or(origin);
        let token = self
            .oauth
            .request_access_token(client_id, application_name, &scopes)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AccessDenied => ErrorResponse::new(ErrorCode::AccessDenied),
                ErrorKind::ClientNotFound => ErrorResponse::new(ErrorCode::NotFoundClientId),
                _ => internal_error(e),
            })?;

        let granted = token
            .scopes()
            .iter()
            .map(|scope| Value::from(scope.to_string()))
            .collect::<Vec<_>>();
        Ok(ResultParameters::new()
            .with("accessToken", token.token())
            .with("scopes", granted)
            .with("timestamp", token.issued_at()))
    }
}

#[cfg(test)]
mod tests {
    use dconnect::api::ApiPath;
    use dconnect::parameters::ParametersValues;
    use dconnect::request::Request;
    use dconnect::response::ErrorCode;

    use serde_json::json;

    use crate::config::{EventsConfig, ManagerConfig};
    use crate::error::ErrorKind;
    use crate::oauth::ApproveAll;
    use crate::service::tests::light_service;

    use super::Manager;

    async fn manager() -> Manager {
        let manager = Manager::builder(ManagerConfig::default())
            .confirmation_ui(ApproveAll)
            .build()
            .await
            .unwrap();
        manager.add_service(light_service("hue.1")).await.unwrap();
        manager
    }

    async fn grant(manager: &Manager, origin: &str) -> String {
        let response = manager
            .dispatch(&Request::get(
                origin,
                "authorization",
                ApiPath::attribute("grant"),
            ))
            .await;
        response
            .parameters()
            .and_then(|parameters| parameters.get("clientId"))
            .and_then(|client_id| client_id.as_str())
            .unwrap()
            .to_owned()
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let config = ManagerConfig::default().events(EventsConfig {
            origin_buffer: 0,
            source_buffer: 8,
        });

        let error = Manager::new(config).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_service_discovery() {
        let manager = manager().await;

        let response = manager
            .dispatch(&Request::get("app", "serviceDiscovery", ApiPath::root()))
            .await;
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "result": 0,
                "services": [{
                    "id": "hue.1",
                    "name": "Hue Light",
                    "type": "wifi",
                    "online": true,
                    "scopes": ["light"],
                }],
            })
        );

        let response = manager
            .dispatch(
                &Request::get("app", "servicediscovery", ApiPath::root())
                    .parameters(ParametersValues::new().string("profile", "canvas")),
            )
            .await;
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "result": 0, "services": [] })
        );

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_authorization_flow() {
        let manager = manager().await;
        let client_id = grant(&manager, "app").await;
        // One client per origin.
        assert_eq!(grant(&manager, "app").await, client_id);

        let response = manager
            .dispatch(
                &Request::get("app", "authorization", ApiPath::attribute("accessToken"))
                    .parameters(
                        ParametersValues::new()
                            .string("clientId", &client_id)
                            .string("scope", "light,hue.1:battery")
                            .string("applicationName", "Demo"),
                    ),
            )
            .await;
        let parameters = response.parameters().unwrap();
        assert_eq!(
            parameters.get("scopes"),
            Some(&json!(["light", "hue.1:battery"]))
        );
        let token = parameters.get("accessToken").unwrap().as_str().unwrap();

        let response = manager
            .dispatch(
                &Request::get("app", "light", ApiPath::root())
                    .service("hue.1")
                    .access_token(token),
            )
            .await;
        assert!(response.is_ok());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_authorization_errors() {
        let manager = manager().await;
        let client_id = grant(&manager, "app").await;

        let access_token = |origin: &str, client_id: &str| {
            Request::get(origin, "authorization", ApiPath::attribute("accessToken")).parameters(
                ParametersValues::new()
                    .string("clientId", client_id)
                    .string("scope", "light"),
            )
        };

        let cases = [
            (access_token("intruder", &client_id), ErrorCode::InvalidOrigin),
            (access_token("app", "unknown"), ErrorCode::NotFoundClientId),
            (
                Request::get("", "authorization", ApiPath::attribute("grant")),
                ErrorCode::InvalidOrigin,
            ),
            (
                Request::get("app", "authorization", ApiPath::attribute("accessToken")),
                ErrorCode::InvalidRequestParameter,
            ),
            (
                Request::post("app", "authorization", ApiPath::attribute("grant")),
                ErrorCode::NotSupportApi,
            ),
        ];

        for (request, code) in cases {
            assert_eq!(
                manager.dispatch(&request).await.error_code(),
                Some(code),
                "{request:?}"
            );
        }

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_denied_without_ui() {
        let manager = Manager::new(ManagerConfig::default()).await.unwrap();
        let client_id = grant(&manager, "app").await;

        let response = manager
            .dispatch(
                &Request::get("app", "authorization", ApiPath::attribute("accessToken"))
                    .parameters(
                        ParametersValues::new()
                            .string("clientId", &client_id)
                            .string("scope", "light"),
                    ),
            )
            .await;
        assert_eq!(response.error_code(), Some(ErrorCode::AccessDenied));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_events() {
        let manager = manager().await;
        let source = manager.event_source();

        manager.shutdown().await;
        // A second shutdown is a no-op.
        manager.shutdown().await;

        assert!(
            source
                .publish(
                    dconnect::events::EventKey::new("hue.1", "light", ApiPath::attribute("onChange")),
                    dconnect::response::ResultParameters::new(),
                )
                .await
                .is_err()
        );
    }
}
