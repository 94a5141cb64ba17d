use std::borrow::Cow;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use dconnect::api::{ApiKey, ApiPath, ApiSpec, Method, ProfileSpec};
use dconnect::events::EventKey;
use dconnect::parameters::ParametersValues;
use dconnect::response::ResultParameters;

use hashbrown::DefaultHashBuilder;

use indexmap::IndexMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};
use crate::events::EventSource;

/// The future returned by an API handler.
pub type HandlerFuture =
    Pin<Box<dyn Future<Output = std::result::Result<ResultParameters, HandlerError>> + Send>>;

/// An API handler.
pub type HandlerFn = Arc<dyn Fn(ApiContext) -> HandlerFuture + Send + Sync + 'static>;

/// A failure raised by an API handler, for example an unreachable device.
///
/// The description is logged by the manager and never sent to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(Cow<'static, str>);

impl HandlerError {
    /// Creates a [`HandlerError`].
    #[must_use]
    #[inline]
    pub fn new(description: impl Into<Cow<'static, str>>) -> Self {
        Self(description.into())
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for HandlerError {}

/// Everything an API handler receives.
#[derive(Debug, Clone)]
pub struct ApiContext {
    /// The origin of the caller.
    pub origin: String,
    /// The identifier of the targeted service.
    pub service_id: String,
    /// Profile name.
    pub profile: String,
    /// API path.
    pub path: ApiPath,
    /// API method.
    pub method: Method,
    /// Validated and coerced request parameters.
    pub params: ParametersValues,
    /// A sender for raising events from the handler.
    pub events: EventSource,
}

impl ApiContext {
    /// Returns the [`EventKey`] of the given event path on this service and
    /// profile.
    #[must_use]
    pub fn event_key(&self, path: ApiPath) -> EventKey {
        EventKey::new(&self.service_id, &self.profile, path)
    }
}

/// A capability group of APIs exposed by a [`Service`].
///
/// Every API is described by an [`ApiSpec`] and served by a handler.
#[derive(Clone)]
pub struct Profile {
    spec: ProfileSpec,
    handlers: IndexMap<ApiKey, HandlerFn, DefaultHashBuilder>,
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl Profile {
    /// Creates a [`Profile`] without APIs.
    #[must_use]
    #[inline]
    pub fn new(name: &str) -> Self {
        Self {
            spec: ProfileSpec::new(name),
            handlers: IndexMap::with_hasher(DefaultHashBuilder::default()),
        }
    }

    /// Adds an API with its handler.
    ///
    /// # Errors
    ///
    /// Fails when an API with the same method, interface and attribute is
    /// already part of the profile.
    pub fn api<F, Fut>(mut self, spec: ApiSpec, handler: F) -> Result<Self>
    where
        F: Fn(ApiContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<ResultParameters, HandlerError>> + Send + 'static,
    {
        let key = spec.key();
        self.spec.insert(spec)?;

        let handler: HandlerFn =
            Arc::new(move |context| -> HandlerFuture { Box::pin(handler(context)) });
        let _ = self.handlers.insert(key, handler);
        Ok(self)
    }

    /// Adds the `PUT` and `DELETE` event APIs at the given path.
    ///
    /// Subscriptions are managed by the dispatcher, so both handlers only
    /// acknowledge the request.
    ///
    /// # Errors
    ///
    /// Fails when one of the two APIs is already part of the profile.
    pub fn event(self, path: ApiPath) -> Result<Self> {
        self.api(ApiSpec::put(path.clone()).event(), acknowledge)?
            .api(ApiSpec::delete(path).event(), acknowledge)
    }

    /// Returns the profile name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.spec.name()
    }

    /// Returns the [`ProfileSpec`].
    #[must_use]
    pub const fn spec(&self) -> &ProfileSpec {
        &self.spec
    }

    /// Returns the handler of an API.
    #[must_use]
    pub fn handler(&self, key: &ApiKey) -> Option<&HandlerFn> {
        self.handlers.get(key)
    }

    /// Returns the methods registered for the given [`ApiPath`].
    #[must_use]
    #[inline]
    pub fn allowed_methods(&self, path: &ApiPath) -> Vec<Method> {
        self.spec.allowed_methods(path)
    }
}

async fn acknowledge(_context: ApiContext) -> std::result::Result<ResultParameters, HandlerError> {
    Ok(ResultParameters::new())
}

/// The network through which a device is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Wi-Fi.
    Wifi,
    /// Bluetooth Low Energy.
    Ble,
    /// Classic Bluetooth.
    Bluetooth,
    /// USB.
    Usb,
    /// NFC.
    Nfc,
    /// A software-only service.
    Virtual,
    /// Unknown network.
    #[default]
    Unknown,
}

/// A device exposed through the manager.
///
/// A [`Service`] is an immutable snapshot: the registry replaces it as a
/// whole when its name, online flag or profiles change, so readers never
/// observe a partially updated service.
#[derive(Debug, Clone)]
pub struct Service {
    id: String,
    name: String,
    network_type: NetworkType,
    online: bool,
    profiles: IndexMap<String, Arc<Profile>, DefaultHashBuilder>,
}

impl Service {
    /// Creates an online [`Service`] without profiles.
    #[must_use]
    #[inline]
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: String::from(id),
            name: String::from(name),
            network_type: NetworkType::Unknown,
            online: true,
            profiles: IndexMap::with_hasher(DefaultHashBuilder::default()),
        }
    }

    /// Sets the [`NetworkType`].
    #[must_use]
    #[inline]
    pub const fn network_type(mut self, network_type: NetworkType) -> Self {
        self.network_type = network_type;
        self
    }

    /// Sets the online flag.
    #[must_use]
    #[inline]
    pub const fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Adds a [`Profile`].
    ///
    /// # Errors
    ///
    /// Fails when a profile with the same name is already exposed.
    pub fn profile(mut self, profile: Profile) -> Result<Self> {
        self.add_profile(profile)?;
        Ok(self)
    }

    /// Returns the service identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the [`NetworkType`].
    #[must_use]
    pub const fn network(&self) -> NetworkType {
        self.network_type
    }

    /// Checks whether the device is online.
    #[must_use]
    pub const fn is_online(&self) -> bool {
        self.online
    }

    /// Returns the [`Profile`] with the given name.
    #[must_use]
    pub fn get_profile(&self, name: &str) -> Option<&Arc<Profile>> {
        self.profiles.get(name)
    }

    /// Checks whether the service exposes the given profile.
    #[must_use]
    pub fn has_profile(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// Returns the names of the exposed profiles, in registration order.
    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Returns the exposed profiles, in registration order.
    pub fn profiles(&self) -> impl Iterator<Item = &Arc<Profile>> {
        self.profiles.values()
    }

    /// Returns a serializable summary of the service.
    #[must_use]
    pub fn summary(&self) -> ServiceSummary {
        ServiceSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            network_type: self.network_type,
            online: self.online,
            scopes: self.profiles.keys().cloned().collect(),
        }
    }

    pub(crate) fn with_name(&self, name: &str) -> Self {
        let mut service = self.clone();
        service.name = String::from(name);
        service
    }

    pub(crate) fn with_online(&self, online: bool) -> Self {
        let mut service = self.clone();
        service.online = online;
        service
    }

    pub(crate) fn with_profile(&self, profile: Profile) -> Result<Self> {
        let mut service = self.clone();
        service.add_profile(profile)?;
        Ok(service)
    }

    fn add_profile(&mut self, profile: Profile) -> Result<()> {
        if self.profiles.contains_key(profile.name()) {
            return Err(Error::new(
                ErrorKind::DuplicateApi,
                format!(
                    "The profile `{}` is already exposed by service `{}`",
                    profile.name(),
                    self.id
                ),
            ));
        }
        let _ = self
            .profiles
            .insert(String::from(profile.name()), Arc::new(profile));
        Ok(())
    }
}

/// A serializable description of a [`Service`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    /// Service identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Network type.
    #[serde(rename = "type")]
    pub network_type: NetworkType,
    /// Online flag.
    pub online: bool,
    /// Exposed profile names.
    pub scopes: Vec<String>,
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use dconnect::api::{ApiKey, ApiPath, ApiSpec, Method};
    use dconnect::parameters::{ParameterKind, ParameterSpecs};
    use dconnect::response::ResultParameters;

    use crate::error::ErrorKind;

    use super::{HandlerError, NetworkType, Profile, Service};

    pub(crate) fn light_profile() -> Profile {
        let power = Arc::new(AtomicBool::new(false));
        let status = Arc::clone(&power);

        Profile::new("light")
            .api(ApiSpec::get(ApiPath::root()), move |_| {
                let on = status.load(Ordering::SeqCst);
                async move { Ok(ResultParameters::new().with("on", on)) }
            })
            .unwrap()
            .api(
                ApiSpec::post(ApiPath::root()).with_parameters(
                    ParameterSpecs::new()
                        .required("lightId", ParameterKind::String)
                        .optional("brightness", ParameterKind::Float),
                ),
                move |context| {
                    power.store(true, Ordering::SeqCst);
                    async move {
                        Ok(ResultParameters::new()
                            .with("lightId", context.params.get_str("lightId").unwrap_or_default()))
                    }
                },
            )
            .unwrap()
            .api(ApiSpec::delete(ApiPath::attribute("broken")), |_| async {
                Err(HandlerError::new("bulb unreachable"))
            })
            .unwrap()
            .event(ApiPath::attribute("onChange"))
            .unwrap()
    }

    pub(crate) fn light_service(id: &str) -> Service {
        Service::new(id, "Hue Light")
            .network_type(NetworkType::Wifi)
            .profile(light_profile())
            .unwrap()
    }

    #[test]
    fn test_profile() {
        let profile = light_profile();

        assert_eq!(profile.name(), "light");
        assert_eq!(
            profile.allowed_methods(&ApiPath::root()),
            vec![Method::Get, Method::Post]
        );
        assert!(
            profile
                .handler(&ApiKey::new(Method::Put, ApiPath::attribute("onchange")))
                .is_some()
        );
        assert!(
            profile
                .handler(&ApiKey::new(Method::Put, ApiPath::root()))
                .is_none()
        );
    }

    #[test]
    fn test_duplicate_api() {
        let error = light_profile()
            .api(ApiSpec::get(ApiPath::root()), |_| async {
                Ok(ResultParameters::new())
            })
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::DuplicateApi);
    }

    #[test]
    fn test_service() {
        let service = light_service("hue.1");

        assert_eq!(service.id(), "hue.1");
        assert!(service.is_online());
        assert!(service.has_profile("light"));
        assert_eq!(service.profile_names().collect::<Vec<_>>(), vec!["light"]);

        let error = service.with_profile(Profile::new("Light")).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::DuplicateApi);

        let renamed = service.with_name("Kitchen").with_online(false);
        assert_eq!(renamed.name(), "Kitchen");
        assert!(!renamed.is_online());
        // The original snapshot is untouched.
        assert_eq!(service.name(), "Hue Light");

        let summary = serde_json::to_value(renamed.summary()).unwrap();
        assert_eq!(
            summary,
            serde_json::json!({
                "id": "hue.1",
                "name": "Kitchen",
                "type": "wifi",
                "online": false,
                "scopes": ["light"],
            })
        );
    }
}
