//! Notification bus owned by one manager.
//!
//! Observers subscribe with a [`ListenerFilter`] and receive matching
//! [`Notification`]s on their own [`NotificationListener`]. The listener is
//! an explicit handle: dropping it (or calling
//! [`release`](NotificationListener::release)) removes it from the bus.

use std::{
    collections::HashSet,
    pin::Pin,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::{SystemTime, UNIX_EPOCH},
};

use futures_util::Stream;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::{error::SseError, event::Event, source::SourceId};

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// A source (or the manager) is connected to the stream.
    Connected,
    /// A source (or the manager) is about to be disconnected.
    WillDisconnect,
    /// A source (or the manager) has been disconnected.
    Disconnected,
    /// An event was delivered to a source.
    Event,
    /// The connection failed in a way the retry policy does not cover.
    Error,
}

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    /// The manager itself.
    Manager,
    /// One event source.
    Source(SourceId),
}

/// A notification published on the bus.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Notification kind.
    pub topic: Topic,
    /// Manager or source the notification is about.
    pub subject: Subject,
    /// Endpoint URI of the connection.
    pub source_uri: String,
    /// Time the notification was created.
    pub timestamp: SystemTime,
    /// The delivered event, for [`Topic::Event`].
    pub event: Option<Event>,
    /// The failure, for [`Topic::Error`].
    pub error: Option<SseError>,
}

impl Notification {
    fn new(topic: Topic, subject: Subject, source_uri: impl Into<String>) -> Self {
        Self {
            topic,
            subject,
            source_uri: source_uri.into(),
            timestamp: SystemTime::now(),
            event: None,
            error: None,
        }
    }

    pub(crate) fn connected(subject: Subject, source_uri: &str) -> Self {
        Self::new(Topic::Connected, subject, source_uri)
    }

    pub(crate) fn will_disconnect(subject: Subject, source_uri: &str) -> Self {
        Self::new(Topic::WillDisconnect, subject, source_uri)
    }

    pub(crate) fn disconnected(subject: Subject, source_uri: &str) -> Self {
        Self::new(Topic::Disconnected, subject, source_uri)
    }

    pub(crate) fn event(subject: Subject, event: Event) -> Self {
        let mut notification = Self::new(Topic::Event, subject, event.origin_uri());
        notification.timestamp = event.received_at();
        notification.event = Some(event);
        notification
    }

    pub(crate) fn error(subject: Subject, source_uri: &str, error: SseError) -> Self {
        let mut notification = Self::new(Topic::Error, subject, source_uri);
        notification.error = Some(error);
        notification
    }

    /// Flat attribute map with the keys `Source`, `Timestamp` and, when
    /// present, `Identifier`, `Name`, `Data`, `JSONData` and `Error`.
    pub fn attributes(&self) -> Map<String, Value> {
        let mut attributes = Map::new();
        attributes.insert("Source".into(), Value::from(self.source_uri.clone()));
        let timestamp = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        attributes.insert("Timestamp".into(), Value::from(timestamp));

        if let Some(event) = &self.event {
            attributes.insert("Identifier".into(), Value::from(event.identifier()));
            if let Some(name) = event.name() {
                attributes.insert("Name".into(), Value::from(name));
            }
            if let Some(data) = event.raw_payload() {
                attributes.insert(
                    "Data".into(),
                    Value::from(String::from_utf8_lossy(data).into_owned()),
                );
            }
            if let Some(json) = event.decoded_payload() {
                attributes.insert("JSONData".into(), json.clone());
            }
        }

        if let Some(error) = &self.error {
            attributes.insert("Error".into(), Value::from(error.to_string()));
        }

        attributes
    }
}

/// Selects which notifications a listener receives.
#[derive(Debug, Clone, Default)]
pub struct ListenerFilter {
    topics: Option<HashSet<Topic>>,
    subject: Option<Subject>,
}

impl ListenerFilter {
    /// Receive every notification.
    pub fn all() -> Self {
        Self::default()
    }

    /// Also accept `topic` (the first call restricts the filter to topics).
    #[must_use]
    pub fn topic(mut self, topic: Topic) -> Self {
        self.topics.get_or_insert_with(HashSet::new).insert(topic);
        self
    }

    /// Only accept notifications about `subject`.
    #[must_use]
    pub fn subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Whether `notification` passes this filter.
    pub fn matches(&self, notification: &Notification) -> bool {
        let topic_ok = self
            .topics
            .as_ref()
            .is_none_or(|topics| topics.contains(&notification.topic));
        let subject_ok = self
            .subject
            .is_none_or(|subject| subject == notification.subject);
        topic_ok && subject_ok
    }
}

struct ListenerEntry {
    filter: ListenerFilter,
    tx: mpsc::UnboundedSender<Notification>,
}

struct BusInner {
    listeners: scc::HashMap<u64, ListenerEntry>,
    next_id: AtomicU64,
}

/// Fan-out of [`Notification`]s to registered listeners.
#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

impl NotificationBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: scc::HashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a listener.
    pub fn subscribe(&self, filter: ListenerFilter) -> NotificationListener {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self
            .inner
            .listeners
            .insert_sync(id, ListenerEntry { filter, tx });
        NotificationListener {
            id,
            bus: Arc::downgrade(&self.inner),
            rx,
        }
    }

    /// Deliver `notification` to every matching listener.
    ///
    /// Returns the number of listeners it was delivered to. Listeners whose
    /// receiving side is gone are pruned.
    pub fn publish(&self, notification: Notification) -> usize {
        let mut delivered = 0;
        self.inner.listeners.retain_sync(|_, entry| {
            if entry.tx.is_closed() {
                return false;
            }
            if entry.filter.matches(&notification) && entry.tx.send(notification.clone()).is_ok()
            {
                delivered += 1;
            }
            true
        });
        delivered
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

/// Receiving end of a bus subscription.
pub struct NotificationListener {
    id: u64,
    bus: Weak<BusInner>,
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl NotificationListener {
    /// Receive the next notification. Returns `None` once the bus is gone
    /// and everything queued has been read.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Receive a queued notification without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    /// Unregister from the bus.
    pub fn release(self) {}
}

impl Stream for NotificationListener {
    type Item = Notification;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll_recv(cx)
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.listeners.remove_sync(&self.id);
        }
    }
}
