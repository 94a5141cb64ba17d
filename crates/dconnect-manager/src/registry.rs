use std::sync::Arc;

use hashbrown::DefaultHashBuilder;

use indexmap::IndexMap;

use tokio::sync::{RwLock, RwLockReadGuard};

use tracing::{debug, info};

use crate::api_registry::ApiRegistry;
use crate::error::{Error, ErrorKind, Result};
use crate::events::EventManager;
use crate::service::{Profile, Service};

type Services = IndexMap<String, Arc<Service>, DefaultHashBuilder>;

fn service_not_found(id: &str) -> Error {
    Error::new(
        ErrorKind::ServiceNotFound,
        format!("No service with identifier `{id}`"),
    )
}

/// The registry of all services exposed through the manager.
///
/// Services are stored as immutable snapshots. Lookups run concurrently and
/// always observe a whole service, while every mutation replaces a snapshot
/// under an exclusive lock.
#[derive(Debug)]
pub struct ServiceRegistry {
    services: RwLock<Services>,
    apis: Arc<ApiRegistry>,
    events: Arc<EventManager>,
}

impl ServiceRegistry {
    /// Creates an empty [`ServiceRegistry`].
    ///
    /// The profiles of added services are registered into `apis`, and
    /// service removals cascade to the subscriptions held by `events`.
    #[must_use]
    pub fn new(apis: Arc<ApiRegistry>, events: Arc<EventManager>) -> Self {
        Self {
            services: RwLock::new(IndexMap::with_hasher(DefaultHashBuilder::default())),
            apis,
            events,
        }
    }

    /// Adds a [`Service`] and registers the descriptors of its profiles.
    ///
    /// # Errors
    ///
    /// Fails when a service with the same identifier already exists, in
    /// which case nothing is registered.
    pub async fn add_service(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().await;
        if services.contains_key(service.id()) {
            return Err(Error::new(
                ErrorKind::DuplicateService,
                format!("A service with identifier `{}` already exists", service.id()),
            ));
        }

        self.apis
            .register_service(
                service.id(),
                service.profiles().map(|profile| profile.spec()),
            )
            .await?;

        info!(
            "Added service `{}` with profiles {:?}",
            service.id(),
            service.profile_names().collect::<Vec<_>>()
        );
        let _ = services.insert(String::from(service.id()), Arc::new(service));
        Ok(())
    }

    /// Removes a service, its descriptors and every event subscription
    /// targeting it.
    ///
    /// Returns whether the service existed. Subscriptions are already removed
    /// when this method returns.
    pub async fn remove_service(&self, id: &str) -> bool {
        let mut services = self.services.write().await;
        if services.shift_remove(id).is_none() {
            debug!("Skip removal of service `{id}`: not registered");
            return false;
        }

        let _ = self.apis.unregister_service(id).await;
        let removed = self.events.remove_service_subscriptions(id).await;
        info!("Removed service `{id}` and {removed} subscriptions");
        true
    }

    /// Returns the [`Service`] with the given identifier.
    pub async fn get_service(&self, id: &str) -> Option<Arc<Service>> {
        self.services.read().await.get(id).cloned()
    }

    /// Returns all services, in registration order.
    ///
    /// When a profile is given, only the services exposing it are returned.
    pub async fn get_services(&self, profile: Option<&str>) -> Vec<Arc<Service>> {
        let profile = profile.map(|profile| profile.trim().to_ascii_lowercase());
        self.services
            .read()
            .await
            .values()
            .filter(|service| {
                profile
                    .as_deref()
                    .is_none_or(|profile| service.has_profile(profile))
            })
            .cloned()
            .collect()
    }

    /// Changes the display name of a service.
    ///
    /// # Errors
    ///
    /// Fails when the service does not exist.
    pub async fn rename_service(&self, id: &str, name: &str) -> Result<()> {
        self.update(id, |service| Ok(service.with_name(name))).await
    }

    /// Changes the online flag of a service.
    ///
    /// # Errors
    ///
    /// Fails when the service does not exist.
    pub async fn set_online(&self, id: &str, online: bool) -> Result<()> {
        self.update(id, |service| Ok(service.with_online(online)))
            .await
    }

    /// Adds a [`Profile`] to a registered service.
    ///
    /// # Errors
    ///
    /// Fails when the service does not exist or when it already exposes a
    /// profile with the same name.
    pub async fn extend_service(&self, id: &str, profile: Profile) -> Result<()> {
        let mut services = self.services.write().await;
        let service = services.get(id).ok_or_else(|| service_not_found(id))?;

        let extended = service.with_profile(profile)?;
        if let Some(profile) = extended.profiles().last() {
            self.apis.register_service(id, [profile.spec()]).await?;
            info!("Service `{id}` now exposes profile `{}`", profile.name());
        }

        let _ = services.insert(String::from(id), Arc::new(extended));
        Ok(())
    }

    /// Checks whether a service is registered.
    pub async fn contains(&self, id: &str) -> bool {
        self.services.read().await.contains_key(id)
    }

    /// Returns the number of registered services.
    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    /// Checks whether no service is registered.
    pub async fn is_empty(&self) -> bool {
        self.services.read().await.is_empty()
    }

    // Held while a subscription lands, so a concurrent removal either
    // precedes it or also removes it.
    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, Services> {
        self.services.read().await
    }

    async fn update(&self, id: &str, update: impl FnOnce(&Service) -> Result<Service>) -> Result<()> {
        let mut services = self.services.write().await;
        let service = services.get(id).ok_or_else(|| service_not_found(id))?;
        let updated = update(service)?;
        let _ = services.insert(String::from(id), Arc::new(updated));
        Ok(())
    }
}
