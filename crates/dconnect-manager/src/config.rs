use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

// Default capacity of the channel of each attached origin.
const DEFAULT_ORIGIN_BUFFER: usize = 32;

// Default capacity of the channel fed by plugin event sources.
const DEFAULT_SOURCE_BUFFER: usize = 128;

fn default_exempt_profiles() -> Vec<String> {
    vec![
        String::from(crate::manager::SERVICE_DISCOVERY_PROFILE),
        String::from(crate::manager::AUTHORIZATION_PROFILE),
    ]
}

/// Local OAuth settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Whether access tokens are checked.
    ///
    /// When disabled, every request is authorized and every token request
    /// is granted without confirmation.
    pub enabled: bool,
    /// Origins whose token requests are granted without user confirmation.
    pub auto_grant_origins: Vec<String>,
    /// Token lifetime in seconds. Tokens never expire when absent.
    pub token_lifetime_secs: Option<u64>,
    /// Profiles which are reachable without an access token.
    pub exempt_profiles: Vec<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_grant_origins: Vec::new(),
            token_lifetime_secs: None,
            exempt_profiles: default_exempt_profiles(),
        }
    }
}

impl OAuthConfig {
    /// Disables the access token checks.
    #[must_use]
    #[inline]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Grants tokens to the given origin without user confirmation.
    #[must_use]
    #[inline]
    pub fn auto_grant(mut self, origin: &str) -> Self {
        self.auto_grant_origins.push(String::from(origin));
        self
    }

    /// Sets the token lifetime.
    #[must_use]
    #[inline]
    pub const fn token_lifetime(mut self, seconds: u64) -> Self {
        self.token_lifetime_secs = Some(seconds);
        self
    }

    pub(crate) fn is_exempt(&self, profile: &str) -> bool {
        self.exempt_profiles
            .iter()
            .any(|exempt| exempt.eq_ignore_ascii_case(profile))
    }

    pub(crate) fn is_auto_granted(&self, origin: &str) -> bool {
        self.auto_grant_origins.iter().any(|o| o == origin)
    }
}

/// Event delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Capacity of the delivery channel of each attached origin.
    pub origin_buffer: usize,
    /// Capacity of the channel fed by plugin event sources.
    pub source_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            origin_buffer: DEFAULT_ORIGIN_BUFFER,
            source_buffer: DEFAULT_SOURCE_BUFFER,
        }
    }
}

/// The manager configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Local OAuth settings.
    pub oauth: OAuthConfig,
    /// Event delivery settings.
    pub events: EventsConfig,
    /// Directory where clients, tokens and subscriptions are stored.
    ///
    /// The state is kept in memory only when absent.
    pub storage_dir: Option<PathBuf>,
}

impl ManagerConfig {
    /// Creates the default [`ManagerConfig`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the [`OAuthConfig`].
    #[must_use]
    #[inline]
    pub fn oauth(mut self, oauth: OAuthConfig) -> Self {
        self.oauth = oauth;
        self
    }

    /// Sets the [`EventsConfig`].
    #[must_use]
    #[inline]
    pub fn events(mut self, events: EventsConfig) -> Self {
        self.events = events;
        self
    }

    /// Sets the storage directory.
    #[must_use]
    #[inline]
    pub fn storage_dir(mut self, storage_dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(storage_dir.into());
        self
    }

    /// Loads a [`ManagerConfig`] from a `JSON` file.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, is not valid `JSON`, or contains
    /// zero-sized channel buffers.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await.map_err(|e| {
            Error::new(
                ErrorKind::Configuration,
                format!("Impossible to read `{}`: {e}", path.display()),
            )
        })?;

        let config: Self = serde_json::from_slice(&content).map_err(|e| {
            Error::new(
                ErrorKind::Configuration,
                format!("Invalid configuration `{}`: {e}", path.display()),
            )
        })?;

        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.events.origin_buffer == 0 || self.events.source_buffer == 0 {
            return Err(Error::new(
                ErrorKind::Configuration,
                "Event channel buffers must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ManagerConfig, OAuthConfig};

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();

        assert!(config.oauth.enabled);
        assert!(config.oauth.is_exempt("servicediscovery"));
        assert!(config.oauth.is_exempt("Authorization"));
        assert!(!config.oauth.is_exempt("light"));
        assert_eq!(config.events.origin_buffer, 32);
        assert_eq!(config.events.source_buffer, 128);
        assert!(config.storage_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config() {
        let config: ManagerConfig = serde_json::from_value(json!({
            "oauth": {
                "auto_grant_origins": ["org.example.plugin"],
                "token_lifetime_secs": 3600,
            },
            "events": { "origin_buffer": 4 },
        }))
        .unwrap();

        assert!(config.oauth.enabled);
        assert!(config.oauth.is_auto_granted("org.example.plugin"));
        assert_eq!(config.oauth.token_lifetime_secs, Some(3600));
        assert!(config.oauth.is_exempt("servicediscovery"));
        assert_eq!(config.events.origin_buffer, 4);
        assert_eq!(config.events.source_buffer, 128);
    }

    #[test]
    fn test_invalid_buffers() {
        let mut config = ManagerConfig::new().oauth(OAuthConfig::default().disabled());
        config.events.source_buffer = 0;

        assert!(config.validate().is_err());
    }
}
