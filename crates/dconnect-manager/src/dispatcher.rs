use std::sync::Arc;

use dconnect::api::{ApiPath, Method};
use dconnect::events::EventKey;
use dconnect::request::Request;
use dconnect::response::{ErrorCode, ErrorResponse, Response, ResultParameters};

use tracing::{debug, error, warn};

use crate::api_registry::ApiRegistry;
use crate::events::{EventManager, EventSource, Registration, Subscription, Unregistration};
use crate::oauth::{LocalOAuth, TokenCheck};
use crate::registry::ServiceRegistry;
use crate::service::ApiContext;

type Outcome<T> = std::result::Result<T, ErrorResponse>;

pub(crate) fn unsupported_api(methods: &[Method]) -> ErrorResponse {
    if methods.is_empty() {
        return ErrorResponse::new(ErrorCode::NotSupportApi);
    }
    let methods = methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    ErrorResponse::with_message(
        ErrorCode::NotSupportApi,
        format!("unsupported API, allowed methods: {methods}"),
    )
}

/// The dispatcher routing every request to the handler of a service API.
///
/// Requests are resolved, validated and authorized before reaching a
/// handler. Each handler runs on its own task, so a failing, panicking or
/// hanging handler only affects its own request.
#[derive(Debug)]
pub struct Dispatcher {
    services: Arc<ServiceRegistry>,
    apis: Arc<ApiRegistry>,
    oauth: Arc<LocalOAuth>,
    events: Arc<EventManager>,
    source: EventSource,
}

impl Dispatcher {
    /// Creates a [`Dispatcher`].
    ///
    /// Handlers receive a clone of `source` to raise events.
    #[must_use]
    pub const fn new(
        services: Arc<ServiceRegistry>,
        apis: Arc<ApiRegistry>,
        oauth: Arc<LocalOAuth>,
        events: Arc<EventManager>,
        source: EventSource,
    ) -> Self {
        Self {
            services,
            apis,
            oauth,
            events,
            source,
        }
    }

    /// Dispatches a [`Request`] and returns its [`Response`].
    ///
    /// Every failure is returned as an error-shaped [`Response`].
    pub async fn dispatch(&self, request: &Request) -> Response {
        match self.route(request).await {
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

    async fn route(&self, request: &Request) -> Outcome<ResultParameters> {
        let service_id = request
            .service_id()
            .ok_or_else(|| ErrorResponse::new(ErrorCode::NotFoundService))?;
        let service = self
            .services
            .get_service(service_id)
            .await
            .ok_or_else(|| ErrorResponse::new(ErrorCode::NotFoundService))?;

        let profile_name = request.profile().trim().to_ascii_lowercase();
        let profile = service
            .get_profile(&profile_name)
            .ok_or_else(|| ErrorResponse::new(ErrorCode::NotSupportProfile))?;

        let key = request.key();
        let spec = self
            .apis
            .lookup(Some(service_id), &profile_name, &key.path, key.method)
            .await;
        let (Some(spec), Some(handler)) = (spec, profile.handler(&key)) else {
            return Err(unsupported_api(&profile.allowed_methods(&key.path)));
        };

        let params = ApiRegistry::validate(&spec, request.params()).map_err(|e| {
            ErrorResponse::with_message(ErrorCode::InvalidRequestParameter, e.to_string())
        })?;

        self.authorize(request, service_id, &profile_name).await?;

        let context = ApiContext {
            origin: String::from(request.origin()),
            service_id: String::from(service_id),
            profile: profile_name.clone(),
            path: key.path.clone(),
            method: key.method,
            params,
            events: self.source.clone(),
        };

        // A panicking handler only aborts its own task.
        let parameters = match tokio::spawn(handler(context)).await {
            Ok(Ok(parameters)) => parameters,
            Ok(Err(e)) => {
                error!("Handler of `{key}` on service `{service_id}` failed: {e}");
                return Err(ErrorResponse::new(ErrorCode::Unknown));
            }
            Err(e) => {
                error!("Handler of `{key}` on service `{service_id}` aborted: {e}");
                return Err(ErrorResponse::new(ErrorCode::Unknown));
            }
        };
        if let Some(name) = parameters.reserved_name() {
            error!("Handler of `{key}` on service `{service_id}` returned the reserved `{name}`");
            return Err(ErrorResponse::new(ErrorCode::Unknown));
        }

        if spec.is_event() {
            self.subscribe(
                request,
                EventKey::new(service_id, &profile_name, key.path),
                key.method,
            )
            .await?;
        }

        Ok(parameters)
    }

    fn checks_tokens(&self, profile: &str) -> bool {
        let config = self.oauth.config();
        config.enabled && !config.is_exempt(profile)
    }

    async fn authorize(&self, request: &Request, service_id: &str, profile: &str) -> Outcome<()> {
        if !self.checks_tokens(profile) {
            return Ok(());
        }

        let token = request
            .token()
            .ok_or_else(|| ErrorResponse::new(ErrorCode::EmptyAccessToken))?;

        let code = match self
            .oauth
            .check_access_token(token, request.origin(), Some(service_id), profile)
            .await
        {
            TokenCheck::Authorized => return Ok(()),
            TokenCheck::Expired => ErrorCode::ExpiredAccessToken,
            TokenCheck::ScopeInsufficient => ErrorCode::Scope,
            TokenCheck::Invalid => ErrorCode::InvalidAccessToken,
        };

        warn!(
            target: "audit",
            "Reject request of origin `{}` on `{service_id}/{profile}`: {}",
            request.origin(),
            code.message()
        );
        Err(ErrorResponse::new(code))
    }

    // The service and the token may be removed while the handler runs, so
    // both are checked again under the locks their removals take.
    async fn subscribe(&self, request: &Request, key: EventKey, method: Method) -> Outcome<()> {
        let subscription = Subscription::new(request.origin(), key, request.token());
        match method {
            Method::Put => {
                let services = self.services.read().await;
                if !services.contains_key(&subscription.key.service_id) {
                    debug!("Skip subscription to `{}`: service removed", subscription.key);
                    return Err(ErrorResponse::new(ErrorCode::NotFoundService));
                }

                let registration = if self.checks_tokens(&subscription.key.profile) {
                    self.oauth
                        .register_subscription(subscription)
                        .await
                        .ok_or_else(|| ErrorResponse::new(ErrorCode::InvalidAccessToken))?
                } else {
                    self.events.register(subscription).await
                };
                drop(services);

                if registration == Registration::AlreadyExists {
                    debug!("Origin `{}` is already subscribed", request.origin());
                }
            }
            Method::Delete => {
                if self.events.unregister(&subscription).await == Unregistration::NotFound {
                    debug!("Skip unsubscription of `{}`: not subscribed", request.origin());
                }
            }
            Method::Get | Method::Post => {}
        }
        Ok(())
    }

    /// Returns the methods a service supports at a profile path.
    pub async fn allowed_methods(
        &self,
        service_id: &str,
        profile: &str,
        path: &ApiPath,
    ) -> Vec<Method> {
        self.services
            .get_service(service_id)
            .await
            .and_then(|service| {
                service
                    .get_profile(&profile.trim().to_ascii_lowercase())
                    .map(|profile| profile.allowed_methods(path))
            })
            .unwrap_or_default()
    }
}
