use std::sync::Arc;

use dconnect::events::{EventKey, EventMessage};
use dconnect::response::ResultParameters;

use hashbrown::{DefaultHashBuilder, HashMap, HashSet};

use indexmap::IndexSet;

use serde::{Deserialize, Serialize};

use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::store::Store;

/// A standing registration of an origin on an event stream.
///
/// Subscriptions are uniquely identified by all of their fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// The subscribed origin.
    pub origin: String,
    /// The event stream.
    #[serde(flatten)]
    pub key: EventKey,
    /// The access token used to subscribe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Subscription {
    /// Creates a [`Subscription`].
    #[must_use]
    #[inline]
    pub fn new(origin: &str, key: EventKey, access_token: Option<&str>) -> Self {
        Self {
            origin: String::from(origin),
            key,
            access_token: access_token.map(String::from),
        }
    }
}

/// The outcome of an event registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The subscription is now active.
    Added,
    /// The very same subscription was already active.
    AlreadyExists,
}

/// The outcome of an event unregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unregistration {
    /// The subscription has been removed.
    Removed,
    /// No such subscription was active.
    NotFound,
}

#[derive(Debug, Default)]
struct EventState {
    subscriptions: IndexSet<Subscription, DefaultHashBuilder>,
    channels: HashMap<String, Sender<EventMessage>>,
}

impl EventState {
    fn snapshot(&self) -> Vec<Subscription> {
        self.subscriptions.iter().cloned().collect()
    }

    fn retain(&mut self, keep: impl FnMut(&Subscription) -> bool) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(keep);
        before - self.subscriptions.len()
    }
}

/// The event subscription table and its delivery fan-out.
///
/// Each origin attaches a bounded channel through [`EventManager::attach`].
/// Messages are pushed with a non-blocking send, so a slow or broken origin
/// never delays delivery to the others: a full channel drops that single
/// message, a closed channel prunes the subscriptions of its origin.
pub struct EventManager {
    state: RwLock<EventState>,
    origin_buffer: usize,
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("origin_buffer", &self.origin_buffer)
            .finish_non_exhaustive()
    }
}

impl EventManager {
    /// Creates an [`EventManager`] whose origin channels hold up to
    /// `origin_buffer` messages.
    #[must_use]
    pub fn new(origin_buffer: usize, store: Arc<dyn Store>) -> Self {
        Self {
            state: RwLock::new(EventState::default()),
            origin_buffer: origin_buffer.max(1),
            store,
        }
    }

    /// Registers a [`Subscription`].
    ///
    /// Registering an active subscription again is a no-op.
    pub async fn register(&self, subscription: Subscription) -> Registration {
        let mut state = self.state.write().await;
        if state.subscriptions.contains(&subscription) {
            return Registration::AlreadyExists;
        }

        debug!(
            "Origin `{}` subscribed to `{}`",
            subscription.origin, subscription.key
        );
        let _ = state.subscriptions.insert(subscription);
        self.save(&state).await;
        Registration::Added
    }

    /// Unregisters a [`Subscription`].
    pub async fn unregister(&self, subscription: &Subscription) -> Unregistration {
        let mut state = self.state.write().await;
        if !state.subscriptions.shift_remove(subscription) {
            return Unregistration::NotFound;
        }

        debug!(
            "Origin `{}` unsubscribed from `{}`",
            subscription.origin, subscription.key
        );
        self.save(&state).await;
        Unregistration::Removed
    }

    /// Attaches a delivery channel to an origin and returns its receiving
    /// end.
    ///
    /// A previously attached channel of the same origin is replaced.
    pub async fn attach(&self, origin: &str) -> Receiver<EventMessage> {
        let (sender, receiver) = mpsc::channel(self.origin_buffer);
        let mut state = self.state.write().await;
        if state.channels.insert(String::from(origin), sender).is_some() {
            debug!("Replaced the event channel of origin `{origin}`");
        }
        receiver
    }

    /// Detaches the delivery channel of an origin.
    ///
    /// Subscriptions are kept, so the origin can attach again later.
    pub async fn detach(&self, origin: &str) -> bool {
        self.state.write().await.channels.remove(origin).is_some()
    }

    /// Delivers an event to every origin subscribed to its stream and
    /// returns the number of origins which received it.
    ///
    /// Origins subscribed through several tokens receive the message once.
    /// Origins without an attached channel are skipped. Delivery failures
    /// are absorbed here and never reported to the caller.
    pub async fn dispatch_event(&self, key: &EventKey, payload: ResultParameters) -> usize {
        let message = EventMessage::new(key.clone(), payload);
        let mut state = self.state.write().await;

        let origins = state
            .subscriptions
            .iter()
            .filter(|subscription| &subscription.key == key)
            .map(|subscription| subscription.origin.clone())
            .collect::<IndexSet<_, DefaultHashBuilder>>();

        let mut delivered = 0;
        let mut broken = HashSet::new();
        for origin in origins {
            let Some(channel) = state.channels.get(&origin) else {
                debug!("Skip origin `{origin}`: no event channel attached");
                continue;
            };

            match channel.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Drop event `{key}` for origin `{origin}`: channel full");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Prune origin `{origin}`: event channel closed");
                    let _ = broken.insert(origin);
                }
            }
        }

        if !broken.is_empty() {
            for origin in &broken {
                let _ = state.channels.remove(origin);
            }
            let pruned = state.retain(|subscription| !broken.contains(&subscription.origin));
            info!("Pruned {pruned} subscriptions of unreachable origins");
            self.save(&state).await;
        }

        delivered
    }

    /// Removes every subscription to the given service.
    pub async fn remove_service_subscriptions(&self, service_id: &str) -> usize {
        self.remove_where(|subscription| subscription.key.service_id == service_id)
            .await
    }

    /// Removes every subscription made with one of the given tokens.
    pub async fn remove_token_subscriptions(&self, tokens: &[String]) -> usize {
        if tokens.is_empty() {
            return 0;
        }
        self.remove_where(|subscription| {
            subscription
                .access_token
                .as_ref()
                .is_some_and(|token| tokens.contains(token))
        })
        .await
    }

    /// Removes every subscription of an origin and detaches its channel.
    pub async fn remove_origin(&self, origin: &str) -> usize {
        let mut state = self.state.write().await;
        let _ = state.channels.remove(origin);
        let removed = state.retain(|subscription| subscription.origin != origin);
        if removed > 0 {
            self.save(&state).await;
        }
        removed
    }

    /// Checks whether a [`Subscription`] is active.
    pub async fn is_subscribed(&self, subscription: &Subscription) -> bool {
        self.state.read().await.subscriptions.contains(subscription)
    }

    /// Returns the active subscriptions to an event stream.
    pub async fn subscribers(&self, key: &EventKey) -> Vec<Subscription> {
        self.state
            .read()
            .await
            .subscriptions
            .iter()
            .filter(|subscription| &subscription.key == key)
            .cloned()
            .collect()
    }

    /// Returns all active subscriptions, in registration order.
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.state.read().await.snapshot()
    }

    pub(crate) async fn restore(&self, subscriptions: Vec<Subscription>) {
        let mut state = self.state.write().await;
        state.subscriptions.extend(subscriptions);
        debug!("Restored {} subscriptions", state.subscriptions.len());
    }

    async fn remove_where(&self, remove: impl Fn(&Subscription) -> bool) -> usize {
        let mut state = self.state.write().await;
        let removed = state.retain(|subscription| !remove(subscription));
        if removed > 0 {
            self.save(&state).await;
        }
        removed
    }

    // Called with the write lock held, so snapshots are saved in order.
    async fn save(&self, state: &EventState) {
        if let Err(e) = self.store.save_subscriptions(&state.snapshot()).await {
            error!("Failed to save subscriptions: {e}");
        }
    }
}

/// A sender through which plugins raise events.
///
/// Messages are queued on the manager event channel and delivered by its
/// event task, so publishing never waits for subscribers.
#[derive(Debug, Clone)]
pub struct EventSource {
    sender: Sender<EventMessage>,
}

impl EventSource {
    pub(crate) fn channel(buffer: usize) -> (Self, Receiver<EventMessage>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }

    /// Publishes an event, waiting for room in the manager event channel.
    ///
    /// # Errors
    ///
    /// Fails when the manager has shut down.
    pub async fn publish(&self, key: EventKey, payload: ResultParameters) -> Result<()> {
        self.sender
            .send(EventMessage::new(key, payload))
            .await
            .map_err(|e| {
                Error::new(
                    ErrorKind::Events,
                    format!("Impossible to publish event `{}`: manager closed", e.0.key),
                )
            })
    }

    /// Publishes an event without waiting.
    ///
    /// # Errors
    ///
    /// Fails when the manager event channel is full or closed.
    pub fn try_publish(&self, key: EventKey, payload: ResultParameters) -> Result<()> {
        self.sender
            .try_send(EventMessage::new(key, payload))
            .map_err(|e| match e {
                TrySendError::Full(message) => Error::new(
                    ErrorKind::Events,
                    format!("Drop event `{}`: manager channel full", message.key),
                ),
                TrySendError::Closed(message) => Error::new(
                    ErrorKind::Events,
                    format!("Drop event `{}`: manager closed", message.key),
                ),
            })
    }
}

pub(crate) async fn run_event_loop(
    events: Arc<EventManager>,
    mut receiver: Receiver<EventMessage>,
    cancellation_token: CancellationToken,
) {
    loop {
        tokio::select! {
            // Use the cancellation token to stop the loop
            () = cancellation_token.cancelled() => { break; }
            message = receiver.recv() => {
                let Some(EventMessage { key, payload }) = message else {
                    break;
                };
                let delivered = events.dispatch_event(&key, payload).await;
                debug!("Event `{key}` delivered to {delivered} origins");
            }
        }
    }
    receiver.close();
}
