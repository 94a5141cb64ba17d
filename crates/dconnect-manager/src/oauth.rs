use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use dconnect::scope::Scopes;

use hashbrown::{DefaultHashBuilder, HashMap};

use indexmap::IndexMap;

use serde::{Deserialize, Serialize};

use tokio::sync::RwLock;

use tracing::{debug, error, info, warn};

use uuid::Uuid;

use crate::config::OAuthConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::events::{EventManager, Registration, Subscription};
use crate::store::{OAuthSnapshot, Store};

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

fn client_not_found(client_id: &str) -> Error {
    Error::new(
        ErrorKind::ClientNotFound,
        format!("No client with identifier `{client_id}`"),
    )
}

/// A registered client: the stable identity of an origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    client_id: String,
    origin: String,
    created_at: u64,
}

impl Client {
    /// Returns the client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the origin owning the client.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns the creation time, in seconds since the Unix epoch.
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.created_at
    }
}

/// An access token bound to an origin and to a fixed set of scopes.
///
/// Tokens are never modified once issued: granting other scopes issues a
/// new token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    token: String,
    client_id: String,
    origin: String,
    application_name: String,
    scopes: Scopes,
    issued_at: u64,
}

impl AccessToken {
    /// Returns the opaque token string.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns the identifier of the client which requested the token.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the origin the token is bound to.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns the name of the requesting application.
    #[must_use]
    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// Returns the granted [`Scopes`].
    #[must_use]
    pub const fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    /// Returns the issue time, in seconds since the Unix epoch.
    #[must_use]
    pub const fn issued_at(&self) -> u64 {
        self.issued_at
    }
}

/// The outcome of an access token check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    /// The token grants the requested profile.
    Authorized,
    /// The token is valid but too old.
    Expired,
    /// The token is valid but does not grant the requested profile.
    ScopeInsufficient,
    /// The token is unknown, revoked, or bound to another origin.
    Invalid,
}

/// A token request to be confirmed by the user.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationRequest<'a> {
    /// The requesting origin.
    pub origin: &'a str,
    /// The requesting application name.
    pub application_name: &'a str,
    /// The requested scopes.
    pub scopes: &'a Scopes,
}

/// The user answer to a [`ConfirmationRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The user approved these scopes, possibly a subset of the requested
    /// ones.
    Approved(Scopes),
    /// The user denied the request.
    Denied,
}

/// The interface of the user confirmation dialog.
#[async_trait]
pub trait ConfirmationUi: Send + Sync {
    /// Asks the user to confirm a token request.
    async fn confirm(&self, request: ConfirmationRequest<'_>) -> Confirmation;
}

/// A [`ConfirmationUi`] denying every request.
///
/// Used when no interactive confirmation is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl ConfirmationUi for DenyAll {
    async fn confirm(&self, _request: ConfirmationRequest<'_>) -> Confirmation {
        Confirmation::Denied
    }
}

/// A [`ConfirmationUi`] approving every requested scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

#[async_trait]
impl ConfirmationUi for ApproveAll {
    async fn confirm(&self, request: ConfirmationRequest<'_>) -> Confirmation {
        Confirmation::Approved(request.scopes.clone())
    }
}

#[derive(Debug, Default)]
struct OAuthState {
    clients: IndexMap<String, Client, DefaultHashBuilder>,
    origins: HashMap<String, String>,
    tokens: IndexMap<String, AccessToken, DefaultHashBuilder>,
}

impl OAuthState {
    fn snapshot(&self) -> OAuthSnapshot {
        OAuthSnapshot {
            clients: self.clients.values().cloned().collect(),
            tokens: self.tokens.values().cloned().collect(),
        }
    }

    fn remove_tokens_of(&mut self, client_id: &str) -> Vec<String> {
        let revoked = self
            .tokens
            .values()
            .filter(|token| token.client_id == client_id)
            .map(|token| token.token.clone())
            .collect::<Vec<_>>();
        for token in &revoked {
            let _ = self.tokens.shift_remove(token);
        }
        revoked
    }
}

/// The local OAuth authority.
///
/// It registers one client per origin, issues scoped access tokens to
/// clients, and validates the token of every dispatched request. Token
/// checks and revocations are serialized through a single lock, so a check
/// observes a token either before or after its revocation.
pub struct LocalOAuth {
    config: OAuthConfig,
    state: RwLock<OAuthState>,
    ui: Arc<dyn ConfirmationUi>,
    store: Arc<dyn Store>,
    events: Arc<EventManager>,
}

impl std::fmt::Debug for LocalOAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalOAuth")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LocalOAuth {
    /// Creates a [`LocalOAuth`].
    ///
    /// Revocations cascade to the subscriptions held by `events`.
    #[must_use]
    pub fn new(
        config: OAuthConfig,
        ui: Arc<dyn ConfirmationUi>,
        store: Arc<dyn Store>,
        events: Arc<EventManager>,
    ) -> Self {
        Self {
            config,
            state: RwLock::new(OAuthState::default()),
            ui,
            store,
            events,
        }
    }

    /// Returns the [`OAuthConfig`].
    #[must_use]
    pub const fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Returns the client identifier of an origin, registering a new client
    /// when the origin has none.
    ///
    /// # Errors
    ///
    /// Fails when the origin is empty.
    pub async fn create_client(&self, origin: &str) -> Result<String> {
        let origin = origin.trim();
        if origin.is_empty() {
            return Err(Error::new(ErrorKind::InvalidOrigin, "The origin is empty"));
        }

        let mut state = self.state.write().await;
        if let Some(client_id) = state.origins.get(origin) {
            return Ok(client_id.clone());
        }

        let client = Client {
            client_id: Uuid::new_v4().to_string(),
            origin: String::from(origin),
            created_at: now(),
        };
        let client_id = client.client_id.clone();
        let _ = state
            .origins
            .insert(String::from(origin), client_id.clone());
        let _ = state.clients.insert(client_id.clone(), client);
        self.save(&state).await;

        info!(target: "audit", "Registered client `{client_id}` for origin `{origin}`");
        Ok(client_id)
    }

    /// Issues an access token to a client.
    ///
    /// The token is granted without confirmation when token checks are
    /// disabled or when the client origin is auto-granted. Otherwise the
    /// user is asked through the [`ConfirmationUi`] and the token carries
    /// only the requested scopes the user approved.
    ///
    /// # Errors
    ///
    /// Fails when the client does not exist, when no scope is requested, or
    /// when the user denies every requested scope.
    pub async fn request_access_token(
        &self,
        client_id: &str,
        application_name: &str,
        requested: &Scopes,
    ) -> Result<AccessToken> {
        let origin = self
            .client(client_id)
            .await
            .map(|client| client.origin)
            .ok_or_else(|| client_not_found(client_id))?;

        if requested.is_empty() {
            return Err(Error::new(ErrorKind::AccessDenied, "No scope requested"));
        }

        let granted = if !self.config.enabled || self.config.is_auto_granted(&origin) {
            debug!("Auto-grant token request of origin `{origin}`");
            requested.clone()
        } else {
            // The lock is not held while the user answers.
            let confirmation = self
                .ui
                .confirm(ConfirmationRequest {
                    origin: &origin,
                    application_name,
                    scopes: requested,
                })
                .await;
            match confirmation {
                Confirmation::Approved(approved) => requested.intersection(&approved),
                Confirmation::Denied => Scopes::new(),
            }
        };

        if granted.is_empty() {
            warn!(
                target: "audit",
                "Denied token request of origin `{origin}` for application `{application_name}`"
            );
            return Err(Error::new(
                ErrorKind::AccessDenied,
                "The user denied the authorization",
            ));
        }

        let mut state = self.state.write().await;
        // The client may have been revoked during the confirmation.
        if !state.clients.contains_key(client_id) {
            return Err(client_not_found(client_id));
        }

        let token = AccessToken {
            token: Uuid::new_v4().to_string(),
            client_id: String::from(client_id),
            origin: origin.clone(),
            application_name: String::from(application_name),
            scopes: granted,
            issued_at: now(),
        };
        let _ = state.tokens.insert(token.token.clone(), token.clone());
        self.save(&state).await;

        info!(
            target: "audit",
            "Granted token to origin `{origin}` with scopes {:?}",
            token.scopes.iter().map(ToString::to_string).collect::<Vec<_>>()
        );
        Ok(token)
    }

    /// Checks whether an access token presented by an origin grants a
    /// profile on a service.
    ///
    /// A request without a service identifier is granted only by a
    /// profile-wide scope.
    pub async fn check_access_token(
        &self,
        token: &str,
        origin: &str,
        service_id: Option<&str>,
        profile: &str,
    ) -> TokenCheck {
        let state = self.state.read().await;
        let Some(access_token) = state.tokens.get(token) else {
            return TokenCheck::Invalid;
        };

        if access_token.origin != origin {
            warn!(
                target: "audit",
                "Token of origin `{}` presented by origin `{origin}`",
                access_token.origin
            );
            return TokenCheck::Invalid;
        }

        if let Some(lifetime) = self.config.token_lifetime_secs
            && now().saturating_sub(access_token.issued_at) >= lifetime
        {
            return TokenCheck::Expired;
        }

        if access_token.scopes.grants(service_id, profile) {
            TokenCheck::Authorized
        } else {
            TokenCheck::ScopeInsufficient
        }
    }

    /// Revokes every token issued to a client, together with the event
    /// subscriptions made with those tokens.
    ///
    /// Returns the number of revoked tokens.
    ///
    /// # Errors
    ///
    /// Fails when the client does not exist.
    pub async fn revoke(&self, client_id: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        if !state.clients.contains_key(client_id) {
            return Err(client_not_found(client_id));
        }

        let revoked = state.remove_tokens_of(client_id);
        // Subscriptions are removed before the lock is released.
        let removed = self.events.remove_token_subscriptions(&revoked).await;
        self.save(&state).await;

        info!(
            target: "audit",
            "Revoked {} tokens and {removed} subscriptions of client `{client_id}`",
            revoked.len()
        );
        Ok(revoked.len())
    }

    /// Revokes a single token, together with its event subscriptions.
    pub async fn revoke_token(&self, token: &str) -> bool {
        let mut state = self.state.write().await;
        if state.tokens.shift_remove(token).is_none() {
            return false;
        }

        let _ = self
            .events
            .remove_token_subscriptions(&[String::from(token)])
            .await;
        self.save(&state).await;

        info!(target: "audit", "Revoked a single token");
        true
    }

    /// Registers an event subscription unless its access token is gone.
    ///
    /// The token is checked under the lock revocations take, so a
    /// concurrent revocation either rejects the subscription or removes it.
    /// Returns [`None`] when the token has been revoked.
    pub async fn register_subscription(&self, subscription: Subscription) -> Option<Registration> {
        let state = self.state.read().await;
        if let Some(token) = subscription.access_token.as_deref()
            && !state.tokens.contains_key(token)
        {
            debug!(
                "Skip subscription of origin `{}` to `{}`: token revoked",
                subscription.origin, subscription.key
            );
            return None;
        }
        Some(self.events.register(subscription).await)
    }

    /// Removes the client of an origin and revokes all of its tokens.
    ///
    /// Returns whether the origin had a client.
    pub async fn remove_origin(&self, origin: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(client_id) = state.origins.remove(origin) else {
            return false;
        };

        let _ = state.clients.shift_remove(&client_id);
        let revoked = state.remove_tokens_of(&client_id);
        let _ = self.events.remove_token_subscriptions(&revoked).await;
        self.save(&state).await;

        info!(
            target: "audit",
            "Removed client `{client_id}` of origin `{origin}` and {} tokens",
            revoked.len()
        );
        true
    }

    /// Returns the [`Client`] with the given identifier.
    pub async fn client(&self, client_id: &str) -> Option<Client> {
        self.state.read().await.clients.get(client_id).cloned()
    }

    /// Returns the [`Client`] of an origin.
    pub async fn client_by_origin(&self, origin: &str) -> Option<Client> {
        let state = self.state.read().await;
        state
            .origins
            .get(origin)
            .and_then(|client_id| state.clients.get(client_id))
            .cloned()
    }

    /// Returns the [`AccessToken`] with the given token string.
    pub async fn token(&self, token: &str) -> Option<AccessToken> {
        self.state.read().await.tokens.get(token).cloned()
    }

    /// Returns all tokens issued to a client.
    pub async fn tokens_of(&self, client_id: &str) -> Vec<AccessToken> {
        self.state
            .read()
            .await
            .tokens
            .values()
            .filter(|token| token.client_id == client_id)
            .cloned()
            .collect()
    }

    pub(crate) async fn restore(&self, snapshot: OAuthSnapshot) {
        let mut state = self.state.write().await;
        for client in snapshot.clients {
            let _ = state
                .origins
                .insert(client.origin.clone(), client.client_id.clone());
            let _ = state.clients.insert(client.client_id.clone(), client);
        }
        for token in snapshot.tokens {
            if !state.clients.contains_key(&token.client_id) {
                warn!("Skip token of unknown client `{}`", token.client_id);
                continue;
            }
            let _ = state.tokens.insert(token.token.clone(), token);
        }
        debug!(
            "Restored {} clients and {} tokens",
            state.clients.len(),
            state.tokens.len()
        );
    }

    // Called with the write lock held, so snapshots are saved in order.
    async fn save(&self, state: &OAuthState) {
        if let Err(e) = self.store.save_oauth(&state.snapshot()).await {
            error!("Failed to save the OAuth state: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use dconnect::api::ApiPath;
    use dconnect::events::EventKey;
    use dconnect::scope::{Scope, Scopes};

    use crate::config::OAuthConfig;
    use crate::error::ErrorKind;
    use crate::events::{EventManager, Subscription};
    use crate::store::{MemoryStore, Store};

    use super::{
        ApproveAll, Confirmation, ConfirmationRequest, ConfirmationUi, DenyAll, LocalOAuth,
        TokenCheck,
    };

    // Approves only the `light` profile.
    struct LightOnly;

    #[async_trait]
    impl ConfirmationUi for LightOnly {
        async fn confirm(&self, _request: ConfirmationRequest<'_>) -> Confirmation {
            Confirmation::Approved(Scopes::new().insert(Scope::profile("light")))
        }
    }

    fn oauth(config: OAuthConfig, ui: Arc<dyn ConfirmationUi>) -> (LocalOAuth, Arc<EventManager>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let events = Arc::new(EventManager::new(8, Arc::clone(&store)));
        (
            LocalOAuth::new(config, ui, store, Arc::clone(&events)),
            events,
        )
    }

    #[tokio::test]
    async fn test_create_client_is_idempotent() {
        let (oauth, _) = oauth(OAuthConfig::default(), Arc::new(ApproveAll));

        let first = oauth.create_client("com.example.app").await.unwrap();
        let second = oauth.create_client("com.example.app").await.unwrap();
        let other = oauth.create_client("com.example.other").await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(
            oauth.create_client("  ").await.unwrap_err().kind(),
            ErrorKind::InvalidOrigin
        );
    }

    #[tokio::test]
    async fn test_service_scoped_token() {
        let (oauth, _) = oauth(OAuthConfig::default(), Arc::new(ApproveAll));
        let client_id = oauth.create_client("app").await.unwrap();

        let token = oauth
            .request_access_token(
                &client_id,
                "Demo",
                &Scopes::new().insert(Scope::service("serviceA", "light")),
            )
            .await
            .unwrap();

        assert_eq!(
            oauth
                .check_access_token(token.token(), "app", Some("serviceB"), "light")
                .await,
            TokenCheck::ScopeInsufficient
        );
        assert_eq!(
            oauth
                .check_access_token(token.token(), "app", Some("serviceA"), "light")
                .await,
            TokenCheck::Authorized
        );
        // Bound to its origin.
        assert_eq!(
            oauth
                .check_access_token(token.token(), "intruder", Some("serviceA"), "light")
                .await,
            TokenCheck::Invalid
        );
        assert_eq!(
            oauth
                .check_access_token("unknown", "app", Some("serviceA"), "light")
                .await,
            TokenCheck::Invalid
        );
    }

    #[tokio::test]
    async fn test_partial_approval() {
        let (oauth, _) = oauth(OAuthConfig::default(), Arc::new(LightOnly));
        let client_id = oauth.create_client("app").await.unwrap();

        let token = oauth
            .request_access_token(&client_id, "Demo", &Scopes::parse_list("light,canvas"))
            .await
            .unwrap();

        assert_eq!(token.scopes(), &Scopes::new().insert(Scope::profile("light")));
        assert_eq!(
            oauth
                .check_access_token(token.token(), "app", Some("serviceA"), "canvas")
                .await,
            TokenCheck::ScopeInsufficient
        );
    }

    #[tokio::test]
    async fn test_denied_request() {
        let (oauth, _) = oauth(OAuthConfig::default(), Arc::new(DenyAll));
        let client_id = oauth.create_client("app").await.unwrap();

        let error = oauth
            .request_access_token(&client_id, "Demo", &Scopes::parse_list("light"))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::AccessDenied);
        assert!(oauth.tokens_of(&client_id).await.is_empty());

        let error = oauth
            .request_access_token("missing", "Demo", &Scopes::parse_list("light"))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ClientNotFound);
    }

    #[tokio::test]
    async fn test_auto_grant() {
        let (oauth, _) = oauth(
            OAuthConfig::default().auto_grant("org.example.plugin"),
            Arc::new(DenyAll),
        );
        let client_id = oauth.create_client("org.example.plugin").await.unwrap();

        let token = oauth
            .request_access_token(&client_id, "Plugin", &Scopes::parse_list("light"))
            .await
            .unwrap();
        assert_eq!(token.origin(), "org.example.plugin");
    }

    #[tokio::test]
    async fn test_expired_token() {
        let (oauth, _) = oauth(
            OAuthConfig::default().token_lifetime(0),
            Arc::new(ApproveAll),
        );
        let client_id = oauth.create_client("app").await.unwrap();
        let token = oauth
            .request_access_token(&client_id, "Demo", &Scopes::parse_list("light"))
            .await
            .unwrap();

        assert_eq!(
            oauth
                .check_access_token(token.token(), "app", None, "light")
                .await,
            TokenCheck::Expired
        );
    }

    #[tokio::test]
    async fn test_revoke_cascades() {
        let (oauth, events) = oauth(OAuthConfig::default(), Arc::new(ApproveAll));
        let client_id = oauth.create_client("app").await.unwrap();
        let first = oauth
            .request_access_token(&client_id, "Demo", &Scopes::parse_list("light"))
            .await
            .unwrap();
        // Re-authorization issues a new token.
        let second = oauth
            .request_access_token(&client_id, "Demo", &Scopes::parse_list("light,canvas"))
            .await
            .unwrap();
        assert_ne!(first.token(), second.token());
        assert_eq!(first.scopes().len(), 1);

        let key = EventKey::new("serviceA", "light", ApiPath::attribute("onChange"));
        let _ = events
            .register(Subscription::new("app", key.clone(), Some(first.token())))
            .await;
        let _ = events
            .register(Subscription::new("app", key.clone(), Some(second.token())))
            .await;
        let _ = events
            .register(Subscription::new("other", key, Some("foreign")))
            .await;

        assert_eq!(oauth.revoke(&client_id).await.unwrap(), 2);

        for token in [&first, &second] {
            assert_eq!(
                oauth
                    .check_access_token(token.token(), "app", Some("serviceA"), "light")
                    .await,
                TokenCheck::Invalid
            );
        }
        let remaining = events.subscriptions().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].origin, "other");

        // The client survives and can be authorized again.
        assert!(oauth.client(&client_id).await.is_some());
        assert_eq!(
            oauth.revoke("missing").await.unwrap_err().kind(),
            ErrorKind::ClientNotFound
        );
    }

    #[tokio::test]
    async fn test_remove_origin() {
        let (oauth, _) = oauth(OAuthConfig::default(), Arc::new(ApproveAll));
        let client_id = oauth.create_client("app").await.unwrap();
        let token = oauth
            .request_access_token(&client_id, "Demo", &Scopes::parse_list("light"))
            .await
            .unwrap();

        assert!(oauth.remove_origin("app").await);
        assert!(!oauth.remove_origin("app").await);
        assert!(oauth.client_by_origin("app").await.is_none());
        assert!(oauth.token(token.token()).await.is_none());

        // A new client is registered for the origin.
        assert_ne!(oauth.create_client("app").await.unwrap(), client_id);
    }
}
