use std::path::Path;

use dconnect::api::{ApiKey, ApiPath, ApiSpec, Method, ProfileSpec};
use dconnect::parameters::{ParameterError, ParametersValues};

use hashbrown::DefaultHashBuilder;

use indexmap::IndexMap;

use tokio::sync::RwLock;

use tracing::{debug, info, warn};

use crate::error::{Error, ErrorKind, Result};

// Descriptors without an owner service belong to the manager itself.
type Owner = Option<String>;
type ProfileApis = IndexMap<ApiKey, ApiSpec, DefaultHashBuilder>;
type Descriptors = IndexMap<(Owner, String), ProfileApis, DefaultHashBuilder>;

fn owner_key(service_id: Option<&str>, profile: &str) -> (Owner, String) {
    (service_id.map(String::from), profile.trim().to_ascii_lowercase())
}

fn conflicting_api(profile: &str, key: &ApiKey) -> Error {
    Error::new(
        ErrorKind::ConflictingApi,
        format!("The API `{key}` of profile `{profile}` conflicts with a registered descriptor"),
    )
}

/// The registry of all API descriptors known to the manager.
///
/// Descriptors are owned either by the manager, for built-in profiles and
/// loaded schemas, or by the service which announced them. Each service
/// describes its own profiles, so two services may expose differently
/// described APIs under the same profile name. Within one owner,
/// registering the very same descriptor twice is accepted, while
/// registering a different descriptor under an existing key is rejected.
#[derive(Debug, Default)]
pub struct ApiRegistry {
    descriptors: RwLock<Descriptors>,
}

impl ApiRegistry {
    /// Creates an empty [`ApiRegistry`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an [`ApiSpec`] on the given profile.
    ///
    /// # Errors
    ///
    /// Fails when a different descriptor is already registered with the
    /// same key.
    pub async fn register(&self, profile: &str, spec: ApiSpec) -> Result<()> {
        let mut descriptors = self.descriptors.write().await;
        let key = owner_key(None, profile);
        Self::check(&descriptors, &key, &spec)?;
        Self::insert(&mut descriptors, key, spec);
        Ok(())
    }

    /// Registers all the APIs of a manager-owned [`ProfileSpec`].
    ///
    /// Either every API is registered or none is.
    ///
    /// # Errors
    ///
    /// Fails when any API conflicts with a registered descriptor.
    #[inline]
    pub async fn register_profile(&self, profile: &ProfileSpec) -> Result<()> {
        self.register_profiles([profile]).await
    }

    /// Registers all the APIs of several manager-owned [`ProfileSpec`]s.
    ///
    /// Either every API of every profile is registered or none is.
    ///
    /// # Errors
    ///
    /// Fails when any API conflicts with a registered descriptor.
    #[inline]
    pub async fn register_profiles<'a>(
        &self,
        profiles: impl IntoIterator<Item = &'a ProfileSpec>,
    ) -> Result<()> {
        self.register_owned(None, profiles).await
    }

    /// Registers all the APIs of the profiles announced by a service.
    ///
    /// Either every API of every profile is registered or none is.
    ///
    /// # Errors
    ///
    /// Fails when any API conflicts with a descriptor the same service
    /// already registered.
    #[inline]
    pub async fn register_service<'a>(
        &self,
        service_id: &str,
        profiles: impl IntoIterator<Item = &'a ProfileSpec>,
    ) -> Result<()> {
        self.register_owned(Some(service_id), profiles).await
    }

    /// Removes every descriptor registered by a service.
    ///
    /// Returns the number of removed profiles.
    pub async fn unregister_service(&self, service_id: &str) -> usize {
        let mut descriptors = self.descriptors.write().await;
        let before = descriptors.len();
        descriptors.retain(|(owner, _), _| owner.as_deref() != Some(service_id));
        before - descriptors.len()
    }

    /// Looks up the descriptor of an API.
    ///
    /// A service identifier selects the descriptors of that service, while
    /// [`None`] selects the manager-owned ones.
    pub async fn lookup(
        &self,
        service_id: Option<&str>,
        profile: &str,
        path: &ApiPath,
        method: Method,
    ) -> Option<ApiSpec> {
        self.descriptors
            .read()
            .await
            .get(&owner_key(service_id, profile))
            .and_then(|apis| apis.get(&ApiKey::new(method, path.clone())))
            .cloned()
    }

    /// Returns the methods registered for the given profile and path.
    pub async fn allowed_methods(
        &self,
        service_id: Option<&str>,
        profile: &str,
        path: &ApiPath,
    ) -> Vec<Method> {
        let descriptors = self.descriptors.read().await;
        let mut methods = descriptors
            .get(&owner_key(service_id, profile))
            .map(|apis| {
                apis.keys()
                    .filter(|key| &key.path == path)
                    .map(|key| key.method)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        methods.sort_unstable();
        methods
    }

    /// Checks whether the given profile has at least one descriptor.
    pub async fn contains_profile(&self, service_id: Option<&str>, profile: &str) -> bool {
        self.descriptors
            .read()
            .await
            .contains_key(&owner_key(service_id, profile))
    }

    /// Returns the names of the parameters supported by a descriptor.
    #[must_use]
    pub fn supported_params(spec: &ApiSpec) -> Vec<String> {
        spec.parameters().names().map(String::from).collect()
    }

    /// Validates the request parameters against a descriptor.
    ///
    /// # Errors
    ///
    /// Returns the offending parameter.
    #[inline]
    pub fn validate(
        spec: &ApiSpec,
        values: &ParametersValues,
    ) -> std::result::Result<ParametersValues, ParameterError> {
        spec.parameters().validate(values)
    }

    /// Loads a profile schema document from a `JSON` file and registers its
    /// APIs.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, or when an API of the
    /// schema conflicts with a registered descriptor.
    pub async fn load_schema(&self, path: impl AsRef<Path>) -> Result<ProfileSpec> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await.map_err(|e| {
            Error::new(
                ErrorKind::Configuration,
                format!("Impossible to read schema `{}`: {e}", path.display()),
            )
        })?;
        let profile: ProfileSpec = serde_json::from_slice(&content).map_err(|e| {
            Error::new(
                ErrorKind::Configuration,
                format!("Invalid schema `{}`: {e}", path.display()),
            )
        })?;
        self.register_profile(&profile).await?;
        info!(
            "Loaded schema for profile `{}` from `{}`",
            profile.name(),
            path.display()
        );
        Ok(profile)
    }

    /// Loads every `.json` profile schema contained in a directory.
    ///
    /// Files which fail to load are skipped.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be read.
    pub async fn load_schemas(&self, dir: impl AsRef<Path>) -> Result<Vec<ProfileSpec>> {
        let mut entries = tokio::fs::read_dir(dir.as_ref()).await?;
        let mut profiles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|extension| extension != "json") {
                continue;
            }
            match self.load_schema(&path).await {
                Ok(profile) => profiles.push(profile),
                Err(e) => warn!("Skip schema `{}`: {e}", path.display()),
            }
        }
        Ok(profiles)
    }

    async fn register_owned<'a>(
        &self,
        service_id: Option<&str>,
        profiles: impl IntoIterator<Item = &'a ProfileSpec>,
    ) -> Result<()> {
        let profiles = profiles
            .into_iter()
            .map(|profile| (owner_key(service_id, profile.name()), profile))
            .collect::<Vec<_>>();
        let mut descriptors = self.descriptors.write().await;
        for (key, profile) in &profiles {
            for spec in profile.iter() {
                Self::check(&descriptors, key, spec)?;
            }
        }
        for (key, profile) in profiles {
            for spec in profile.iter() {
                Self::insert(&mut descriptors, key.clone(), spec.clone());
            }
            debug!(
                "Registered {} APIs for profile `{}`",
                profile.len(),
                profile.name()
            );
        }
        Ok(())
    }

    fn check(descriptors: &Descriptors, key: &(Owner, String), spec: &ApiSpec) -> Result<()> {
        let api = spec.key();
        match descriptors.get(key).and_then(|apis| apis.get(&api)) {
            Some(registered) if registered != spec => Err(conflicting_api(&key.1, &api)),
            _ => Ok(()),
        }
    }

    fn insert(descriptors: &mut Descriptors, key: (Owner, String), spec: ApiSpec) {
        let _ = descriptors.entry(key).or_default().insert(spec.key(), spec);
    }
}

#[cfg(test)]
mod tests {
    use dconnect::api::{ApiPath, ApiSpec, Method, ProfileSpec};
    use dconnect::parameters::{ParameterKind, ParameterSpecs, ParametersValues};

    use crate::error::ErrorKind;

    use super::ApiRegistry;

    fn light_profile() -> ProfileSpec {
        ProfileSpec::new("light")
            .add(ApiSpec::get(ApiPath::root()))
            .unwrap()
            .add(
                ApiSpec::post(ApiPath::root()).with_parameters(
                    ParameterSpecs::new()
                        .required("lightId", ParameterKind::String)
                        .optional("brightness", ParameterKind::Float),
                ),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ApiRegistry::new();
        registry.register_profile(&light_profile()).await.unwrap();

        let spec = registry
            .lookup(None, "light", &ApiPath::root(), Method::Post)
            .await
            .unwrap();
        assert_eq!(
            ApiRegistry::supported_params(&spec),
            vec!["lightId", "brightness"]
        );
        assert!(
            registry
                .lookup(None, "light", &ApiPath::root(), Method::Put)
                .await
                .is_none()
        );
        assert_eq!(
            registry.allowed_methods(None, "light", &ApiPath::root()).await,
            vec![Method::Get, Method::Post]
        );
        assert!(registry.contains_profile(None, "light").await);
        assert!(!registry.contains_profile(None, "canvas").await);
    }

    #[tokio::test]
    async fn test_identical_registration() {
        let registry = ApiRegistry::new();
        registry.register_profile(&light_profile()).await.unwrap();
        registry.register_profile(&light_profile()).await.unwrap();
        registry
            .register("light", ApiSpec::get(ApiPath::root()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_conflicting_registration() {
        let registry = ApiRegistry::new();
        registry.register_profile(&light_profile()).await.unwrap();

        let conflicting = ProfileSpec::new("light")
            .add(ApiSpec::delete(ApiPath::root()))
            .unwrap()
            .add(ApiSpec::get(ApiPath::root()).description("Different"))
            .unwrap();

        let error = registry.register_profile(&conflicting).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ConflictingApi);

        // Nothing of the rejected profile has been registered.
        assert!(
            registry
                .lookup(None, "light", &ApiPath::root(), Method::Delete)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_service_descriptors() {
        let registry = ApiRegistry::new();
        let hue = ProfileSpec::new("light")
            .add(ApiSpec::get(ApiPath::root()).description("Hue light"))
            .unwrap();
        let sphero = ProfileSpec::new("light")
            .add(ApiSpec::get(ApiPath::root()).description("Sphero LED"))
            .unwrap();

        registry.register_service("hue", [&hue]).await.unwrap();
        registry.register_service("sphero", [&sphero]).await.unwrap();

        let described = |spec: Option<ApiSpec>| {
            spec.and_then(|spec| spec.description_text().map(String::from))
        };
        assert_eq!(
            described(
                registry
                    .lookup(Some("hue"), "light", &ApiPath::root(), Method::Get)
                    .await
            ),
            Some(String::from("Hue light"))
        );
        assert_eq!(
            described(
                registry
                    .lookup(Some("sphero"), "Light", &ApiPath::root(), Method::Get)
                    .await
            ),
            Some(String::from("Sphero LED"))
        );
        // Service descriptors are not manager-owned.
        assert!(!registry.contains_profile(None, "light").await);

        assert_eq!(registry.unregister_service("hue").await, 1);
        assert_eq!(registry.unregister_service("hue").await, 0);
        assert!(!registry.contains_profile(Some("hue"), "light").await);
        assert!(registry.contains_profile(Some("sphero"), "light").await);
    }

    #[tokio::test]
    async fn test_validate() {
        let registry = ApiRegistry::new();
        registry.register_profile(&light_profile()).await.unwrap();
        let spec = registry
            .lookup(None, "light", &ApiPath::root(), Method::Post)
            .await
            .unwrap();

        let values = ApiRegistry::validate(
            &spec,
            &ParametersValues::new()
                .string("lightId", "1")
                .string("brightness", "0.3"),
        )
        .unwrap();
        assert_eq!(values.get_f64("brightness"), Some(0.3));

        let error = ApiRegistry::validate(&spec, &ParametersValues::new()).unwrap_err();
        assert_eq!(error.name, "lightId");
    }

    #[tokio::test]
    async fn test_load_schemas() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("battery.json"),
            serde_json::to_vec(&serde_json::json!({
                "name": "battery",
                "apis": [{ "method": "GET", "attribute": "level" }],
            }))
            .unwrap(),
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("broken.json"), b"{")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"ignored")
            .await
            .unwrap();

        let registry = ApiRegistry::new();
        let profiles = registry.load_schemas(dir.path()).await.unwrap();

        assert_eq!(profiles.len(), 1);
        assert!(
            registry
                .lookup(None, "battery", &ApiPath::attribute("level"), Method::Get)
                .await
                .is_some()
        );
    }
}
