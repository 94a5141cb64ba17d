use std::path::{Path, PathBuf};

use async_trait::async_trait;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use tokio::sync::Mutex;

use tracing::debug;

use crate::error::Result;
use crate::events::Subscription;
use crate::oauth::{AccessToken, Client};

const OAUTH_FILE: &str = "oauth.json";
const SUBSCRIPTIONS_FILE: &str = "subscriptions.json";

/// The persisted state of the local OAuth authority.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthSnapshot {
    /// Registered clients.
    #[serde(default)]
    pub clients: Vec<Client>,
    /// Issued access tokens.
    #[serde(default)]
    pub tokens: Vec<AccessToken>,
}

/// All the persisted manager state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Local OAuth state.
    #[serde(default)]
    pub oauth: OAuthSnapshot,
    /// Active event subscriptions.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// A backend storing clients, tokens and subscriptions.
///
/// The state is loaded once when the manager is built and saved after
/// every mutation.
#[async_trait]
pub trait Store: Send + Sync {
    /// Loads the whole persisted state.
    async fn load(&self) -> Result<Snapshot>;

    /// Saves the local OAuth state.
    async fn save_oauth(&self, oauth: &OAuthSnapshot) -> Result<()>;

    /// Saves the active subscriptions.
    async fn save_subscriptions(&self, subscriptions: &[Subscription]) -> Result<()>;
}

/// A [`Store`] keeping the state in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Snapshot>,
}

impl MemoryStore {
    /// Creates an empty [`MemoryStore`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a [`MemoryStore`] holding the given state.
    #[must_use]
    #[inline]
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    /// Returns a copy of the stored state.
    pub async fn snapshot(&self) -> Snapshot {
        self.snapshot.lock().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load(&self) -> Result<Snapshot> {
        Ok(self.snapshot().await)
    }

    async fn save_oauth(&self, oauth: &OAuthSnapshot) -> Result<()> {
        self.snapshot.lock().await.oauth = oauth.clone();
        Ok(())
    }

    async fn save_subscriptions(&self, subscriptions: &[Subscription]) -> Result<()> {
        self.snapshot.lock().await.subscriptions = subscriptions.to_vec();
        Ok(())
    }
}

/// A [`Store`] writing `JSON` files into a directory.
///
/// Files are replaced atomically through a temporary file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Creates a [`JsonFileStore`] rooted at the given directory.
    #[must_use]
    #[inline]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T> {
        let path = self.dir.join(file);
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No `{}` found, starting empty", path.display());
                Ok(T::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let content = serde_json::to_vec_pretty(value)?;
        let path = self.dir.join(file);
        let temporary = self.dir.join(format!("{file}.tmp"));
        tokio::fs::write(&temporary, content).await?;
        tokio::fs::rename(&temporary, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn load(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            oauth: self.read(OAUTH_FILE).await?,
            subscriptions: self.read(SUBSCRIPTIONS_FILE).await?,
        })
    }

    async fn save_oauth(&self, oauth: &OAuthSnapshot) -> Result<()> {
        self.write(OAUTH_FILE, oauth).await
    }

    async fn save_subscriptions(&self, subscriptions: &[Subscription]) -> Result<()> {
        self.write(SUBSCRIPTIONS_FILE, subscriptions).await
    }
}

#[cfg(test)]
mod tests {
    use dconnect::api::ApiPath;
    use dconnect::events::EventKey;

    use crate::events::Subscription;

    use super::{JsonFileStore, OAuthSnapshot, Store};

    #[tokio::test]
    async fn test_json_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("storage"));

        // Nothing saved yet.
        let snapshot = store.load().await.unwrap();
        assert!(snapshot.oauth.clients.is_empty());
        assert!(snapshot.subscriptions.is_empty());

        let subscriptions = vec![Subscription::new(
            "app",
            EventKey::new("hue.1", "light", ApiPath::attribute("onChange")),
            Some("token"),
        )];
        store.save_subscriptions(&subscriptions).await.unwrap();
        store.save_oauth(&OAuthSnapshot::default()).await.unwrap();

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.subscriptions, subscriptions);
    }

    #[tokio::test]
    async fn test_corrupted_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("subscriptions.json"), b"[{")
            .await
            .unwrap();

        assert!(JsonFileStore::new(dir.path()).load().await.is_err());
    }
}
