//! The SSE manager and the actor task that owns its connection.
//!
//! [`SseManager`] is a cheap, cloneable handle. Every operation is turned
//! into a [`Command`] and queued on the inbox of a single [`ManagerActor`]
//! task, which owns the connection state, the retry counter, the registered
//! sources, the parser and the transport task. The only state touched on
//! the caller's side is the primary election in
//! [`add_source`](SseManager::add_source), so two concurrent callers can
//! never both become primary.
//!
//! Completion callbacks and notifications never run on the actor. They are
//! handed to the manager's [`CallbackContext`].

use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    callback::{Callback, CallbackContext, SerialCallbackContext},
    config::SseConfig,
    dispatch::dispatch,
    error::{SseError, SseResult},
    event::{Event, EventFilter},
    notify::{ListenerFilter, Notification, NotificationBus, NotificationListener, Subject},
    parse::{ParseOutput, RecordParser},
    reconnect::calculate_backoff,
    source::{self, EventSource, SourceId, SourceRole, SourceSlot, SourceState},
    transport::{HttpTransport, StreamRequest, Transport},
};

/// State of the manager's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection.
    Idle,
    /// A transport stream is being opened (first attempt or retry).
    Connecting,
    /// The endpoint accepted the stream; events are being dispatched.
    Open,
    /// The connection is being torn down.
    Disconnecting,
}

impl ConnectionState {
    /// Returns `true` if events are flowing.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if there is no connection.
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }
}

type ConnectCompletion = Box<dyn FnOnce(SseResult<()>) + Send + 'static>;

/// Generation of the transport task. Transport events from an older epoch
/// are stale and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ConnectionEpoch(u64);

/// What the transport task reports back to the actor.
#[derive(Debug)]
enum TransportEvent {
    /// Response head received.
    Opened { status: u16 },
    /// A body chunk.
    Chunk(Bytes),
    /// The stream is over. `None` means the server closed it cleanly.
    Closed { error: Option<SseError> },
}

/// Commands processed by the [`ManagerActor`], one at a time.
enum Command {
    Connect {
        url: String,
        completion: Option<ConnectCompletion>,
    },
    Disconnect {
        allow_retry: bool,
        completion: Option<Callback>,
    },
    Register {
        slot: SourceSlot,
    },
    Remove {
        id: SourceId,
        completion: Option<Callback>,
    },
    RemoveAll {
        completion: Option<Callback>,
    },
    Transport {
        epoch: ConnectionEpoch,
        event: TransportEvent,
    },
}

/// State shared between all handles of one manager.
pub(crate) struct Shared {
    cmd_tx: mpsc::UnboundedSender<Command>,
    primary: Mutex<Option<SourceId>>,
    next_source_id: AtomicU64,
    state: watch::Receiver<ConnectionState>,
    source_count: watch::Receiver<usize>,
    bus: NotificationBus,
    config: Arc<SseConfig>,
}

/// Handle to an SSE manager.
///
/// A manager consumes one `text/event-stream` endpoint and fans its events
/// out to [`EventSource`]s. The first source added becomes the primary and
/// opens the connection; later ones are secondaries sharing it.
///
/// Clones share the same manager. The background task stops once every
/// clone has been dropped.
///
/// # Example
///
/// ```no_run
/// use hpx_sse::{SseConfig, SseManager};
///
/// # async fn example() -> hpx_sse::SseResult<()> {
/// let config = SseConfig::from_url("http://192.168.0.20:15081/notify")?;
/// let manager = SseManager::new(config)?;
///
/// let mut source = manager.add_source(["cheese"])?;
/// while let Some(event) = source.recv().await {
///     println!("{} {:?}", event.identifier(), event.decoded_payload());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SseManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for SseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseManager")
            .field("uri", &self.shared.config.uri())
            .field("name", &self.shared.config.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SseManager {
    /// Create a manager streaming over HTTP, with callbacks delivered on a
    /// dedicated tokio task.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::Config`] if the configuration is invalid or the
    /// HTTP client cannot be built.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(config: SseConfig) -> SseResult<Self> {
        let transport = HttpTransport::new()?;
        Self::with_transport(
            config,
            Arc::new(transport),
            Arc::new(SerialCallbackContext::spawn()),
        )
    }

    /// Create a manager with a custom transport and callback context.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::Config`] if the configuration is invalid.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn with_transport(
        config: SseConfig,
        transport: Arc<dyn Transport>,
        callbacks: Arc<dyn CallbackContext>,
    ) -> SseResult<Self> {
        config.validate().map_err(SseError::config)?;
        let config = Arc::new(config);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (source_count_tx, source_count_rx) = watch::channel(0);
        let bus = NotificationBus::new();

        let actor = ManagerActor {
            config: Arc::clone(&config),
            transport,
            callbacks,
            bus: bus.clone(),
            cmd_rx,
            cmd_tx: cmd_tx.downgrade(),
            state: ConnectionState::Idle,
            state_tx,
            epoch: ConnectionEpoch(0),
            retry_count: 0,
            pump: None,
            parser: RecordParser::new(),
            url: config.uri(),
            sources: Vec::new(),
            source_count_tx,
            pending_connect: None,
            announced: false,
        };

        let span = info_span!(
            "sse_manager",
            name = config.name.as_deref().unwrap_or(""),
            uri = %config.uri()
        );
        tokio::spawn(actor.run().instrument(span));

        Ok(Self {
            shared: Arc::new(Shared {
                cmd_tx,
                primary: Mutex::new(None),
                next_source_id: AtomicU64::new(1),
                state: state_rx,
                source_count: source_count_rx,
                bus,
                config,
            }),
        })
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// The manager's configuration.
    pub fn config(&self) -> &SseConfig {
        &self.shared.config
    }

    /// Display name from the configuration.
    pub fn name(&self) -> Option<&str> {
        self.shared.config.name.as_deref()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.clone()
    }

    /// Subscribe to this manager's notifications.
    ///
    /// The returned listener must be kept alive to receive notifications;
    /// dropping it unsubscribes.
    pub fn notifications(&self, filter: ListenerFilter) -> NotificationListener {
        self.shared.bus.subscribe(filter)
    }

    /// Returns `true` if a primary source is registered.
    pub fn has_primary(&self) -> bool {
        self.lock_primary().is_some()
    }

    /// Number of sources currently registered with the manager task.
    ///
    /// Secondaries whose handle was dropped are forgotten the next time an
    /// event is dispatched or a source is added.
    pub fn source_count(&self) -> usize {
        *self.shared.source_count.borrow()
    }

    /// Open the stream at `url`. `completion` runs on the callback context
    /// exactly once: with `Ok(())` when the endpoint accepts the stream, or
    /// with the error that ended the attempt after retries.
    pub fn connect_with<F>(&self, url: impl Into<String>, completion: F)
    where
        F: FnOnce(SseResult<()>) + Send + 'static,
    {
        self.send(Command::Connect {
            url: url.into(),
            completion: Some(Box::new(completion)),
        });
    }

    /// Open the stream at `url` and wait until it is accepted.
    ///
    /// # Errors
    ///
    /// [`SseError::AlreadyActive`] if the connection is not idle,
    /// [`SseError::EndpointNotFound`] if the endpoint rejects the stream,
    /// or the last transport error once retries are exhausted.
    pub async fn connect(&self, url: impl Into<String>) -> SseResult<()> {
        let (tx, rx) = oneshot::channel();
        self.connect_with(url, move |result| {
            let _ = tx.send(result);
        });
        rx.await.map_err(|_| SseError::ManagerGone)?
    }

    /// Disconnect. With `allow_retry` and retries left, the stream is
    /// reopened instead. `completion` always runs, also when there was
    /// nothing to disconnect.
    pub fn disconnect_with<F>(&self, allow_retry: bool, completion: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Command::Disconnect {
            allow_retry,
            completion: Some(Box::new(completion)),
        });
    }

    /// Disconnect and wait until it is done.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::ManagerGone`] if the manager task has stopped.
    pub async fn disconnect(&self, allow_retry: bool) -> SseResult<()> {
        let (tx, rx) = oneshot::channel();
        self.disconnect_with(allow_retry, move || {
            let _ = tx.send(());
        });
        rx.await.map_err(|_| SseError::ManagerGone)
    }

    /// Add an event source accepting the given event names (empty = all).
    ///
    /// The first source becomes the primary and opens the connection. Later
    /// sources are secondaries; they are connected as soon as the primary's
    /// connection is open.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::ManagerGone`] if the manager task has stopped.
    pub fn add_source(&self, filter: impl Into<EventFilter>) -> SseResult<EventSource> {
        let filter = filter.into();
        let mut primary = self.lock_primary();

        let id = SourceId(self.shared.next_source_id.fetch_add(1, Ordering::Relaxed));
        let role = if primary.is_none() {
            SourceRole::Primary
        } else {
            SourceRole::Secondary
        };

        let (source, slot) = source::pair(
            id,
            role,
            filter,
            self.shared.config.name.clone(),
            Arc::downgrade(&self.shared),
        );
        self.shared
            .cmd_tx
            .send(Command::Register { slot })
            .map_err(|_| SseError::ManagerGone)?;

        if role == SourceRole::Primary {
            *primary = Some(id);
        }
        Ok(source)
    }

    /// Add an event source using the configured event allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::ManagerGone`] if the manager task has stopped.
    pub fn add_default_source(&self) -> SseResult<EventSource> {
        self.add_source(self.shared.config.events.clone())
    }

    /// Remove `source` without retry. Removing the primary tears the
    /// connection down and removes every secondary with it. `completion`
    /// runs on the callback context.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::ManagerGone`] if the manager task has stopped.
    pub fn remove_source_with<F>(&self, source: &EventSource, completion: F) -> SseResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut primary = self.lock_primary();
        self.shared
            .cmd_tx
            .send(Command::Remove {
                id: source.id(),
                completion: Some(Box::new(completion)),
            })
            .map_err(|_| SseError::ManagerGone)?;

        if *primary == Some(source.id()) {
            *primary = None;
        }
        Ok(())
    }

    /// Remove `source` and wait until it is gone.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::ManagerGone`] if the manager task has stopped.
    pub async fn remove_source(&self, source: &EventSource) -> SseResult<()> {
        let (tx, rx) = oneshot::channel();
        self.remove_source_with(source, move || {
            let _ = tx.send(());
        })?;
        rx.await.map_err(|_| SseError::ManagerGone)
    }

    /// Remove every source, secondaries first. The removal is queued behind
    /// work already pending on the manager.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::ManagerGone`] if the manager task has stopped.
    pub fn remove_all_sources_with<F>(&self, completion: F) -> SseResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut primary = self.lock_primary();
        self.shared
            .cmd_tx
            .send(Command::RemoveAll {
                completion: Some(Box::new(completion)),
            })
            .map_err(|_| SseError::ManagerGone)?;
        *primary = None;
        Ok(())
    }

    /// Remove every source and wait until they are gone.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::ManagerGone`] if the manager task has stopped.
    pub async fn remove_all_sources(&self) -> SseResult<()> {
        let (tx, rx) = oneshot::channel();
        self.remove_all_sources_with(move || {
            let _ = tx.send(());
        })?;
        rx.await.map_err(|_| SseError::ManagerGone)
    }

    fn lock_primary(&self) -> std::sync::MutexGuard<'_, Option<SourceId>> {
        self.shared
            .primary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, command: Command) {
        if self.shared.cmd_tx.send(command).is_err() {
            error!("SSE manager task is gone, dropping command");
        }
    }
}

/// Background task owning all mutable state of one manager.
struct ManagerActor {
    config: Arc<SseConfig>,
    transport: Arc<dyn Transport>,
    callbacks: Arc<dyn CallbackContext>,
    bus: NotificationBus,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    /// Weak so that only user handles keep the inbox open.
    cmd_tx: mpsc::WeakUnboundedSender<Command>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    epoch: ConnectionEpoch,
    retry_count: u32,
    pump: Option<JoinHandle<()>>,
    parser: RecordParser,
    /// Endpoint of the current or last connection.
    url: String,
    /// Registered sources, in registration order.
    sources: Vec<SourceSlot>,
    source_count_tx: watch::Sender<usize>,
    pending_connect: Option<ConnectCompletion>,
    /// Whether the manager-level `Connected` notification is outstanding.
    announced: bool,
}

impl ManagerActor {
    async fn run(mut self) {
        debug!("SSE manager started");
        while let Some(command) = self.cmd_rx.recv().await {
            self.handle(command);
        }
        self.abort_pump();
        info!("SSE manager stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect { url, completion } => self.on_connect(url, completion),
            Command::Disconnect {
                allow_retry,
                completion,
            } => {
                self.on_disconnect(allow_retry);
                self.run_callback(completion);
            }
            Command::Register { slot } => self.on_register(slot),
            Command::Remove { id, completion } => {
                self.remove_source(id);
                self.run_callback(completion);
            }
            Command::RemoveAll { completion } => {
                self.remove_all_sources();
                self.run_callback(completion);
            }
            Command::Transport { epoch, event } => {
                if epoch != self.epoch {
                    debug!(
                        epoch = epoch.0,
                        current = self.epoch.0,
                        "Dropping stale transport event"
                    );
                    return;
                }
                match event {
                    TransportEvent::Opened { status } => self.on_opened(status),
                    TransportEvent::Chunk(chunk) => self.on_chunk(&chunk),
                    TransportEvent::Closed { error } => self.on_closed(error),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    fn on_connect(&mut self, url: String, completion: Option<ConnectCompletion>) {
        if self.state != ConnectionState::Idle {
            warn!(url = %url, state = ?self.state, "SSE connect while not idle");
            self.complete(completion, Err(SseError::AlreadyActive));
            return;
        }

        self.url = url;
        self.retry_count = 0;
        self.pending_connect = completion;
        self.start_attempt(Duration::ZERO);
    }

    fn on_disconnect(&mut self, allow_retry: bool) {
        match self.state {
            ConnectionState::Idle | ConnectionState::Disconnecting => {
                debug!(state = ?self.state, "SSE disconnect with nothing to disconnect");
            }
            ConnectionState::Connecting | ConnectionState::Open => {
                if allow_retry && self.retry_count < self.config.max_retries {
                    info!(url = %self.url, "SSE disconnect requested, reconnecting");
                    self.schedule_retry();
                } else {
                    info!(url = %self.url, "SSE disconnect requested");
                    self.teardown(SseError::Cancelled);
                }
            }
        }
    }

    /// Open a fresh transport stream after `delay`. Any previous stream is
    /// invalidated first and the parser starts over.
    fn start_attempt(&mut self, delay: Duration) {
        self.epoch = ConnectionEpoch(self.epoch.0 + 1);
        self.abort_pump();
        self.parser.reset();
        self.set_state(ConnectionState::Connecting);

        for slot in &self.sources {
            if matches!(slot.state(), SourceState::Idle | SourceState::Closed) {
                slot.set_state(SourceState::Connecting);
            }
        }

        info!(
            url = %self.url,
            attempt = self.retry_count,
            epoch = self.epoch.0,
            "SSE connecting"
        );

        let request = StreamRequest::new(self.url.clone(), self.config.request_timeout)
            .with_headers(&self.config.headers);
        let task = pump(
            Arc::clone(&self.transport),
            request,
            delay,
            self.epoch,
            self.cmd_tx.clone(),
        );
        self.pump = Some(tokio::spawn(task.in_current_span()));
    }

    fn schedule_retry(&mut self) {
        let delay = calculate_backoff(self.config.backoff(), self.retry_count);
        self.retry_count += 1;
        warn!(
            attempt = self.retry_count,
            max_retries = self.config.max_retries,
            delay_ms = delay.as_millis() as u64,
            "SSE reconnecting"
        );
        self.start_attempt(delay);
    }

    fn on_opened(&mut self, status: u16) {
        if self.state != ConnectionState::Connecting {
            debug!(status, state = ?self.state, "Ignoring response head");
            return;
        }

        if (200..400).contains(&status) {
            info!(url = %self.url, status, "SSE connection established");
            self.set_state(ConnectionState::Open);
            self.retry_count = 0;
            self.announce_connected();
            let completion = self.pending_connect.take();
            self.complete(completion, Ok(()));
        } else {
            warn!(url = %self.url, status, "SSE endpoint rejected the stream");
            let error = SseError::endpoint_not_found(status);
            self.publish(Notification::error(Subject::Manager, &self.url, error.clone()));
            self.teardown(error);
        }
    }

    fn on_chunk(&mut self, chunk: &[u8]) {
        if self.state != ConnectionState::Open {
            debug!(
                len = chunk.len(),
                state = ?self.state,
                "Dropping bytes outside an open stream"
            );
            return;
        }
        let output = self.parser.feed(chunk);
        self.handle_parsed(output);
    }

    fn on_closed(&mut self, error: Option<SseError>) {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            return;
        }
        self.pump = None;

        if error.is_none() && self.state == ConnectionState::Open {
            let output = self.parser.finish();
            self.handle_parsed(output);
        }

        let error = error.unwrap_or(SseError::StreamEnded);
        warn!(url = %self.url, error = %error, "SSE stream closed");

        if error.is_transient() && self.retry_count < self.config.max_retries {
            self.schedule_retry();
        } else {
            error!(
                url = %self.url,
                retries = self.retry_count,
                error = %error,
                "SSE retries exhausted"
            );
            self.teardown(error);
        }
    }

    /// Settle in `Idle`: invalidate the transport, send the disconnect
    /// pairs and fail a pending connect with `reason`.
    fn teardown(&mut self, reason: SseError) {
        self.set_state(ConnectionState::Disconnecting);
        self.epoch = ConnectionEpoch(self.epoch.0 + 1);
        self.abort_pump();
        self.parser.reset();

        self.announce_disconnected();
        self.publish(Notification::disconnected(Subject::Manager, &self.url));
        self.announced = false;

        self.set_state(ConnectionState::Idle);
        info!(url = %self.url, reason = %reason, "SSE disconnected");

        let completion = self.pending_connect.take();
        self.complete(completion, Err(reason));
    }

    fn abort_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    fn handle_parsed(&mut self, output: ParseOutput) {
        if !output.records.is_empty() {
            self.prune_detached_sources();
        }

        for malformed in output.malformed {
            warn!(
                id = %malformed.id,
                name = malformed.name.as_deref().unwrap_or(""),
                "Dropping SSE record without data"
            );
        }

        for record in output.records {
            let Some(event) = Event::from_record(record, self.url.as_str()) else {
                warn!("Dropping SSE record with an empty id");
                continue;
            };

            if self.config.should_log_event(event.name()) {
                info!(
                    id = %event.identifier(),
                    name = event.name().unwrap_or(""),
                    payload = event.payload_str().unwrap_or("<binary>"),
                    "SSE event"
                );
            }

            let delivered = dispatch(
                &event,
                &self.sources,
                &self.url,
                &self.bus,
                self.callbacks.as_ref(),
            );
            debug!(id = %event.identifier(), delivered, "SSE event dispatched");
        }
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    fn on_register(&mut self, slot: SourceSlot) {
        info!(source = %slot.id, role = %slot.role, "SSE event source added");
        self.prune_detached_sources();
        let role = slot.role;

        match self.state {
            ConnectionState::Idle => {}
            ConnectionState::Connecting => slot.set_state(SourceState::Connecting),
            ConnectionState::Open => {
                slot.set_state(SourceState::Open);
                self.publish(Notification::connected(Subject::Source(slot.id), &self.url));
            }
            ConnectionState::Disconnecting => {}
        }
        self.sources.push(slot);
        self.sync_source_count();

        // A secondary arriving after the primary's connection gave up
        // reopens it, so it never waits on a closed primary.
        let reopen = match role {
            SourceRole::Primary => true,
            SourceRole::Secondary => self.primary_closed(),
        };
        if reopen && self.state == ConnectionState::Idle {
            self.url = self.config.uri();
            self.retry_count = 0;
            self.start_attempt(Duration::ZERO);
        }
    }

    fn primary_closed(&self) -> bool {
        self.sources
            .iter()
            .any(|slot| slot.role == SourceRole::Primary && slot.state() == SourceState::Closed)
    }

    /// Forget secondaries whose handle was dropped. The primary stays
    /// registered since it owns the connection.
    fn prune_detached_sources(&mut self) {
        let before = self.sources.len();
        self.sources
            .retain(|slot| slot.role == SourceRole::Primary || !slot.is_detached());
        let pruned = before - self.sources.len();
        if pruned > 0 {
            debug!(pruned, "Pruned SSE sources with dropped handles");
            self.sync_source_count();
        }
    }

    fn sync_source_count(&self) {
        self.source_count_tx.send_replace(self.sources.len());
    }

    fn remove_source(&mut self, id: SourceId) {
        let Some(position) = self.sources.iter().position(|slot| slot.id == id) else {
            debug!(source = %id, "SSE event source already removed");
            return;
        };

        if self.sources[position].role == SourceRole::Primary {
            if self.state == ConnectionState::Idle {
                self.announce_disconnected();
            } else {
                self.teardown(SseError::Cancelled);
            }
            let removed = std::mem::take(&mut self.sources);
            info!(source = %id, removed = removed.len(), "SSE primary source removed");
        } else {
            let slot = self.sources.remove(position);
            self.announce_source_disconnected(&slot);
            info!(source = %id, "SSE event source removed");
        }
        self.sync_source_count();
    }

    fn remove_all_sources(&mut self) {
        let secondaries: Vec<SourceId> = self
            .sources
            .iter()
            .filter(|slot| slot.role == SourceRole::Secondary)
            .map(|slot| slot.id)
            .collect();
        for id in secondaries {
            self.remove_source(id);
        }

        let primary = self
            .sources
            .iter()
            .find(|slot| slot.role == SourceRole::Primary)
            .map(|slot| slot.id);
        if let Some(id) = primary {
            self.remove_source(id);
        }
    }

    /// Primary first, then secondaries in registration order.
    fn ordered_sources(&self) -> impl Iterator<Item = &SourceSlot> {
        let primary = self
            .sources
            .iter()
            .filter(|slot| slot.role == SourceRole::Primary);
        let secondaries = self
            .sources
            .iter()
            .filter(|slot| slot.role == SourceRole::Secondary);
        primary.chain(secondaries)
    }

    fn announce_connected(&mut self) {
        let mut notifications = Vec::new();
        for slot in self.ordered_sources() {
            if slot.state() != SourceState::Open {
                slot.set_state(SourceState::Open);
                notifications.push(Notification::connected(Subject::Source(slot.id), &self.url));
            }
        }
        for notification in notifications {
            self.publish(notification);
        }

        if !self.announced {
            self.announced = true;
            self.publish(Notification::connected(Subject::Manager, &self.url));
        }
    }

    fn announce_disconnected(&self) {
        for slot in self.ordered_sources() {
            self.announce_source_disconnected(slot);
        }
    }

    /// Send the disconnect pair for `slot`, unless it never got connected
    /// or already got its pair.
    fn announce_source_disconnected(&self, slot: &SourceSlot) {
        if matches!(slot.state(), SourceState::Idle | SourceState::Closed) {
            return;
        }
        slot.set_state(SourceState::Closed);
        let subject = Subject::Source(slot.id);
        self.publish(Notification::will_disconnect(subject, &self.url));
        self.publish(Notification::disconnected(subject, &self.url));
    }

    // ------------------------------------------------------------------
    // Callback context
    // ------------------------------------------------------------------

    fn publish(&self, notification: Notification) {
        let bus = self.bus.clone();
        self.callbacks.execute(Box::new(move || {
            bus.publish(notification);
        }));
    }

    fn complete(&self, completion: Option<ConnectCompletion>, result: SseResult<()>) {
        if let Some(completion) = completion {
            self.callbacks.execute(Box::new(move || completion(result)));
        }
    }

    fn run_callback(&self, completion: Option<Callback>) {
        if let Some(completion) = completion {
            self.callbacks.execute(completion);
        }
    }
}

/// Transport task: open one stream and forward everything it yields to the
/// actor, tagged with `epoch`.
async fn pump(
    transport: Arc<dyn Transport>,
    request: StreamRequest,
    delay: Duration,
    epoch: ConnectionEpoch,
    cmd_tx: mpsc::WeakUnboundedSender<Command>,
) {
    let send = |event: TransportEvent| {
        cmd_tx
            .upgrade()
            .is_some_and(|tx| tx.send(Command::Transport { epoch, event }).is_ok())
    };

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let connect_timeout = request.connect_timeout;
    let response = match timeout(connect_timeout, transport.open(request)).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            debug!(error = %err, "SSE transport failed to open");
            send(TransportEvent::Closed { error: Some(err) });
            return;
        }
        Err(_) => {
            send(TransportEvent::Closed {
                error: Some(SseError::timeout(connect_timeout)),
            });
            return;
        }
    };

    let status = response.status;
    if !send(TransportEvent::Opened { status }) || status >= 400 {
        return;
    }

    let mut body = response.body;
    while let Some(item) = body.next().await {
        match item {
            Ok(chunk) if chunk.is_empty() => continue,
            Ok(chunk) => {
                if !send(TransportEvent::Chunk(chunk)) {
                    return;
                }
            }
            Err(err) => {
                send(TransportEvent::Closed { error: Some(err) });
                return;
            }
        }
    }

    send(TransportEvent::Closed { error: None });
}
