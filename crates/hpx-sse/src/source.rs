//! Event sources: the subscriber handles returned by
//! [`SseManager::add_source`](crate::SseManager::add_source).
//!
//! The first source of a manager is the [`SourceRole::Primary`] and owns the
//! connection; every later one is a [`SourceRole::Secondary`] riding on it.
//! A source only holds a weak reference to its manager. Once the manager is
//! gone the handle still compares and reports its identity, but operations
//! fail with [`SseError::ManagerGone`].

use std::{
    fmt,
    pin::Pin,
    sync::Weak,
    task::{Context, Poll},
};

use futures_util::Stream;
use tokio::sync::{mpsc, watch};

use crate::{
    error::{SseError, SseResult},
    event::{Event, EventFilter},
    manager::{SseManager, Shared},
};

/// Identity of an event source, unique within one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub(crate) u64);

impl SourceId {
    /// Numeric value of the id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a source owns the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceRole {
    /// Owns the connection. At most one per manager.
    Primary,
    /// Depends on the primary's connection.
    Secondary,
}

impl fmt::Display for SourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Secondary => f.write_str("secondary"),
        }
    }
}

/// Lifecycle state of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceState {
    /// Registered, no connection attempt yet.
    Idle,
    /// Waiting for the connection to open.
    Connecting,
    /// Receiving events.
    Open,
    /// Disconnected. Events are no longer delivered.
    Closed,
}

/// Handle to an event source.
///
/// Events that pass the source's filter are queued on the handle and read
/// with [`recv`](Self::recv) or through its [`Stream`] implementation. The
/// queue ends once the source has been removed from its manager.
pub struct EventSource {
    id: SourceId,
    role: SourceRole,
    filter: EventFilter,
    name: Option<String>,
    manager: Weak<Shared>,
    state: watch::Receiver<SourceState>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl EventSource {
    /// Identity of this source.
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Role assigned when the source was added.
    pub fn role(&self) -> SourceRole {
        self.role
    }

    /// Returns `true` if this source owns the connection.
    pub fn is_primary(&self) -> bool {
        self.role == SourceRole::Primary
    }

    /// Event names this source accepts.
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Display name of the manager this source belongs to.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Current state.
    pub fn state(&self) -> SourceState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn watch_state(&self) -> watch::Receiver<SourceState> {
        self.state.clone()
    }

    /// Receive the next event. Returns `None` once the source has been
    /// removed and its queue drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Receive a queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.events.try_recv().ok()
    }

    /// Remove this source from its manager. `completion` runs on the
    /// manager's callback context.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::ManagerGone`] if the manager no longer exists.
    pub fn disconnect_with<F>(&self, completion: F) -> SseResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.manager()?.remove_source_with(self, completion)
    }

    /// Remove this source from its manager and wait until it is gone.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::ManagerGone`] if the manager no longer exists.
    pub async fn disconnect(&self) -> SseResult<()> {
        self.manager()?.remove_source(self).await
    }

    fn manager(&self) -> SseResult<SseManager> {
        self.manager
            .upgrade()
            .map(SseManager::from_shared)
            .ok_or(SseError::ManagerGone)
    }
}

impl PartialEq for EventSource {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.manager, &other.manager)
    }
}

impl Eq for EventSource {}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("filter", &self.filter)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Stream for EventSource {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

/// Manager-side half of an [`EventSource`].
pub(crate) struct SourceSlot {
    pub(crate) id: SourceId,
    pub(crate) role: SourceRole,
    filter: EventFilter,
    state: watch::Sender<SourceState>,
    events: mpsc::UnboundedSender<Event>,
}

impl SourceSlot {
    pub(crate) fn state(&self) -> SourceState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: SourceState) {
        self.state.send_replace(state);
    }

    pub(crate) fn accepts(&self, name: Option<&str>) -> bool {
        self.filter.accepts(name)
    }

    /// Whether the [`EventSource`] handle was dropped.
    pub(crate) fn is_detached(&self) -> bool {
        self.events.is_closed()
    }

    /// Queue `event` on the handle. Returns `false` if the handle is gone.
    pub(crate) fn deliver(&self, event: Event) -> bool {
        self.events.send(event).is_ok()
    }
}

impl Drop for SourceSlot {
    fn drop(&mut self) {
        self.state.send_replace(SourceState::Closed);
    }
}

impl fmt::Debug for SourceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSlot")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Create the two halves of a new source.
pub(crate) fn pair(
    id: SourceId,
    role: SourceRole,
    filter: EventFilter,
    name: Option<String>,
    manager: Weak<Shared>,
) -> (EventSource, SourceSlot) {
    let (state_tx, state_rx) = watch::channel(SourceState::Idle);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let source = EventSource {
        id,
        role,
        filter: filter.clone(),
        name,
        manager,
        state: state_rx,
        events: events_rx,
    };
    let slot = SourceSlot {
        id,
        role,
        filter,
        state: state_tx,
        events: events_tx,
    };
    (source, slot)
}
