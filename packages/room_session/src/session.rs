//! Session Controller
//!
//! Composes the history loader and connection manager for one open room:
//! merges history and live events into a single ordered timeline and
//! drives the connection lifecycle state machine.
//!
//! All state transitions happen on one event queue consumed by a single
//! actor task, so timeline mutation needs no locking. Commands from the
//! handle, history resolutions, connection signals, and reconnect timers
//! all arrive as [`SessionEvent`]s on the same queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionSignal, Connector, RoomConnection};
use crate::error::{ApiError, ConnectError, SessionError};
use crate::history::HistoryLoader;
use crate::message::{ChatMessage, MergeOutcome, Timeline};
use crate::protocol::{self, InboundFrame};

/// Connection lifecycle of the open room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Loading,
    Live,
    Disconnected,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Loading => "loading",
            ConnectionState::Live => "live",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Identity of the user driving this session.
///
/// Passed in explicitly at spawn; nothing is read from process-wide state.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_id: String,
    pub display_name: String,
}

/// Bounded reconnect policy applied after a live connection drops.
///
/// The socket is the only thing re-opened; history is never re-fetched and
/// the timeline is preserved across the gap.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Update published to the view after every state or timeline mutation.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    StateChanged(ConnectionState),
    /// History (plus any frames buffered while loading) landed; carries the
    /// full timeline so the view can render it in one pass.
    HistoryMerged { messages: Vec<ChatMessage> },
    /// A live frame merged into the timeline.
    MessageMerged(ChatMessage),
    /// The history fetch failed; the session stays in Loading and the
    /// caller may retry `open_room`.
    HistoryFailed { reason: String },
}

/// Point-in-time view of the session for rendering.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub room_id: Option<String>,
    pub state: ConnectionState,
    pub messages: Vec<ChatMessage>,
    pub history_error: Option<String>,
    /// Why the session is Disconnected, when it is. Cleared on reconnect.
    pub disconnect_reason: Option<String>,
}

enum SessionCommand {
    OpenRoom {
        room_id: String,
        respond_to: oneshot::Sender<()>,
    },
    CloseRoom {
        respond_to: oneshot::Sender<()>,
    },
    Send {
        text: String,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    Snapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
}

enum SessionEvent {
    Command(SessionCommand),
    HistoryResolved {
        generation: u64,
        room_id: String,
        result: Result<Vec<ChatMessage>, ApiError>,
    },
    ConnectResolved {
        generation: u64,
        result: Result<(RoomConnection, mpsc::Receiver<ConnectionSignal>), ConnectError>,
    },
    Signal {
        generation: u64,
        signal: ConnectionSignal,
    },
    ReconnectDue {
        generation: u64,
    },
}

/// Handle to communicate with a running session controller.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::Sender<SessionEvent>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionHandle {
    /// Open a room, implicitly closing any room already open.
    pub async fn open_room(&self, room_id: &str) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(SessionEvent::Command(SessionCommand::OpenRoom {
                room_id: room_id.to_string(),
                respond_to: tx,
            }))
            .await
            .map_err(|_| SessionError::SessionGone)?;
        rx.await.map_err(|_| SessionError::SessionGone)
    }

    /// Close the open room, releasing its connection and timeline.
    pub async fn close_room(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(SessionEvent::Command(SessionCommand::CloseRoom {
                respond_to: tx,
            }))
            .await
            .map_err(|_| SessionError::SessionGone)?;
        rx.await.map_err(|_| SessionError::SessionGone)
    }

    /// Send a composed message. Only permitted while the session is Live;
    /// any other state is a `SendRejected` error, never a panic.
    pub async fn send(&self, text: &str) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(SessionEvent::Command(SessionCommand::Send {
                text: text.to_string(),
                respond_to: tx,
            }))
            .await
            .map_err(|_| SessionError::SessionGone)?;
        rx.await.map_err(|_| SessionError::SessionGone)?
    }

    /// Current state and timeline, for full re-renders.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(SessionEvent::Command(SessionCommand::Snapshot {
                respond_to: tx,
            }))
            .await
            .map_err(|_| SessionError::SessionGone)?;
        rx.await.map_err(|_| SessionError::SessionGone)
    }

    /// Subscribe to session updates. A lagged receiver should re-render
    /// from `snapshot`.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }
}

/// Per-open-room state owned by the controller.
struct RoomState {
    room_id: String,
    generation: u64,
    state: ConnectionState,
    timeline: Timeline,
    history_done: bool,
    history_error: Option<String>,
    opened: bool,
    /// Raw frames received before the history merge, flushed with it.
    pending: Vec<String>,
    conn: Option<RoomConnection>,
    reconnect_attempt: u32,
    disconnect_reason: Option<String>,
}

impl RoomState {
    fn new(room_id: String, generation: u64) -> Self {
        Self {
            timeline: Timeline::new(room_id.clone()),
            room_id,
            generation,
            state: ConnectionState::Loading,
            history_done: false,
            history_error: None,
            opened: false,
            pending: Vec::new(),
            conn: None,
            reconnect_attempt: 0,
            disconnect_reason: None,
        }
    }
}

/// The session controller actor. Spawn with [`SessionController::spawn`]
/// and drive through the returned [`SessionHandle`].
pub struct SessionController {
    #[allow(dead_code)]
    ctx: SessionContext,
    history: Arc<dyn HistoryLoader>,
    connector: Arc<dyn Connector>,
    reconnect: ReconnectPolicy,
    events_rx: mpsc::Receiver<SessionEvent>,
    /// Weak so that in-flight tasks never keep the actor alive after every
    /// handle is gone.
    events: mpsc::WeakSender<SessionEvent>,
    updates: broadcast::Sender<SessionUpdate>,
    room: Option<RoomState>,
    generation: u64,
}

const EVENT_QUEUE_CAPACITY: usize = 256;
const UPDATE_CHANNEL_CAPACITY: usize = 256;

impl SessionController {
    pub fn spawn(
        ctx: SessionContext,
        history: Arc<dyn HistoryLoader>,
        connector: Arc<dyn Connector>,
        reconnect: ReconnectPolicy,
    ) -> SessionHandle {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        let controller = SessionController {
            ctx,
            history,
            connector,
            reconnect,
            events_rx,
            events: events_tx.downgrade(),
            updates: updates.clone(),
            room: None,
            generation: 0,
        };
        tokio::spawn(controller.run());

        SessionHandle {
            events: events_tx,
            updates,
        }
    }

    async fn run(mut self) {
        debug!("session controller started");
        while let Some(event) = self.events_rx.recv().await {
            match event {
                SessionEvent::Command(cmd) => self.handle_command(cmd),
                SessionEvent::HistoryResolved {
                    generation,
                    room_id,
                    result,
                } => self.on_history(generation, &room_id, result),
                SessionEvent::ConnectResolved { generation, result } => {
                    self.on_connect_resolved(generation, result)
                }
                SessionEvent::Signal { generation, signal } => self.on_signal(generation, signal),
                SessionEvent::ReconnectDue { generation } => self.on_reconnect_due(generation),
            }
        }
        // Every handle dropped: release whatever is still open.
        self.close_current();
        debug!("session controller stopped");
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::OpenRoom {
                room_id,
                respond_to,
            } => {
                self.close_current();
                self.open(room_id);
                let _ = respond_to.send(());
            }
            SessionCommand::CloseRoom { respond_to } => {
                self.close_current();
                let _ = respond_to.send(());
            }
            SessionCommand::Send { text, respond_to } => {
                let _ = respond_to.send(self.send_text(&text));
            }
            SessionCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    /// Enter Loading and race the history fetch against the connection
    /// open. Neither depends on the other; frames that land before history
    /// are buffered.
    fn open(&mut self, room_id: String) {
        self.generation += 1;
        let generation = self.generation;
        info!(room = %room_id, "opening room");
        self.room = Some(RoomState::new(room_id.clone(), generation));
        self.publish(SessionUpdate::StateChanged(ConnectionState::Loading));

        self.spawn_history_fetch(generation, room_id.clone());
        self.spawn_connect(generation, room_id);
    }

    /// Tear down the open room, if any: release the connection exactly
    /// once, discard the timeline, and drop any event that arrives later
    /// (stale generation).
    fn close_current(&mut self) {
        let Some(mut room) = self.room.take() else {
            return;
        };
        if let Some(conn) = room.conn.take() {
            conn.close();
        }
        info!(room = %room.room_id, "room closed");
        self.publish(SessionUpdate::StateChanged(ConnectionState::Closed));
        self.publish(SessionUpdate::StateChanged(ConnectionState::Idle));
    }

    fn spawn_history_fetch(&self, generation: u64, room_id: String) {
        let history = self.history.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = history.load_history(&room_id).await;
            let Some(tx) = events.upgrade() else { return };
            let _ = tx
                .send(SessionEvent::HistoryResolved {
                    generation,
                    room_id,
                    result,
                })
                .await;
        });
    }

    fn spawn_connect(&self, generation: u64, room_id: String) {
        let connector = self.connector.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = connector.open(&room_id).await;
            let Some(tx) = events.upgrade() else { return };
            let _ = tx
                .send(SessionEvent::ConnectResolved { generation, result })
                .await;
        });
    }

    fn spawn_signal_pump(&self, generation: u64, mut signals: mpsc::Receiver<ConnectionSignal>) {
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let Some(tx) = events.upgrade() else { break };
                if tx
                    .send(SessionEvent::Signal { generation, signal })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        matches!(&self.room, Some(room) if room.generation == generation)
    }

    fn on_history(
        &mut self,
        generation: u64,
        room_id: &str,
        result: Result<Vec<ChatMessage>, ApiError>,
    ) {
        if !self.is_current(generation) {
            debug!(room = %room_id, "discarding stale history response");
            return;
        }
        match result {
            Ok(page) => {
                let pending = {
                    let Some(room) = self.room.as_mut() else { return };
                    match room.timeline.merge_history(page, true) {
                        Ok(count) => {
                            debug!(room = %room_id, merged = count, "history merged");
                            room.history_done = true;
                            room.history_error = None;
                        }
                        Err(e) => {
                            // The loader fetched by room id, so this cannot
                            // happen without a controller bug.
                            error!(error = %e, "history page failed room check");
                            return;
                        }
                    }
                    // Flush frames buffered during Loading, in arrival
                    // order, now that history is in place.
                    std::mem::take(&mut room.pending)
                };
                for raw in pending {
                    self.merge_live_frame(&raw);
                }
                let messages = match self.room.as_ref() {
                    Some(room) => room.timeline.messages().to_vec(),
                    None => return,
                };
                self.publish(SessionUpdate::HistoryMerged { messages });
                self.maybe_go_live();
            }
            Err(e) => {
                let reason = SessionError::HistoryLoadFailed(e).to_string();
                warn!(room = %room_id, reason = %reason, "history load failed");
                if let Some(room) = self.room.as_mut() {
                    room.history_error = Some(reason.clone());
                }
                // Session stays in Loading; the caller may retry open_room.
                self.publish(SessionUpdate::HistoryFailed { reason });
            }
        }
    }

    fn on_connect_resolved(
        &mut self,
        generation: u64,
        result: Result<(RoomConnection, mpsc::Receiver<ConnectionSignal>), ConnectError>,
    ) {
        if !self.is_current(generation) {
            // Dropping the handle releases the transport of a connection
            // that raced a room switch.
            debug!("discarding stale connection");
            return;
        }
        match result {
            Ok((conn, signals)) => {
                let Some(room) = self.room.as_mut() else { return };
                if room.conn.is_some() {
                    warn!(room = %room.room_id, "duplicate connection resolved; dropping");
                    return;
                }
                room.conn = Some(conn);
                self.spawn_signal_pump(generation, signals);
            }
            Err(e) => {
                warn!(error = %e, "connection open failed");
                self.on_disconnect(SessionError::ConnectionErrored(e.to_string()));
            }
        }
    }

    fn on_signal(&mut self, generation: u64, signal: ConnectionSignal) {
        if !self.is_current(generation) {
            debug!("dropping signal for a room that is no longer open");
            return;
        }
        match signal {
            ConnectionSignal::Opened => {
                if let Some(room) = self.room.as_mut() {
                    room.opened = true;
                    room.reconnect_attempt = 0;
                    room.disconnect_reason = None;
                }
                self.maybe_go_live();
            }
            ConnectionSignal::MessageReceived(raw) => {
                let (history_done, state) = match self.room.as_ref() {
                    Some(room) => (room.history_done, room.state),
                    None => return,
                };
                if !history_done {
                    // History-then-live ordering: hold until the history
                    // merge lands.
                    if let Some(room) = self.room.as_mut() {
                        room.pending.push(raw);
                    }
                } else if state == ConnectionState::Live {
                    if let Some(msg) = self.merge_live_frame(&raw) {
                        self.publish(SessionUpdate::MessageMerged(msg));
                    }
                }
                // Frames in any other state are dropped, never queued.
            }
            ConnectionSignal::Errored(reason) => {
                warn!(reason = %reason, "connection errored");
                self.on_disconnect(SessionError::ConnectionErrored(reason));
            }
            ConnectionSignal::Closed(code) => {
                info!(code = ?code, "connection closed");
                self.on_disconnect(SessionError::ConnectionClosed { code });
            }
        }
    }

    /// Transport is gone: preserve the timeline, surface Disconnected, and
    /// schedule a bounded-backoff reconnect if the policy allows one.
    fn on_disconnect(&mut self, cause: SessionError) {
        let changed = {
            let Some(room) = self.room.as_mut() else {
                return;
            };
            if let Some(conn) = room.conn.take() {
                conn.close();
            }
            room.opened = false;
            room.disconnect_reason = Some(cause.to_string());
            if room.state != ConnectionState::Disconnected {
                room.state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        };
        if changed {
            self.publish(SessionUpdate::StateChanged(ConnectionState::Disconnected));
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let Some(room) = self.room.as_mut() else {
            return;
        };
        if room.reconnect_attempt >= self.reconnect.max_attempts {
            if self.reconnect.max_attempts > 0 {
                info!(room = %room.room_id, "reconnect attempts exhausted; waiting for explicit reopen");
            }
            return;
        }
        let attempt = room.reconnect_attempt;
        room.reconnect_attempt += 1;
        let generation = room.generation;
        let delay = self.reconnect.delay_for(attempt);
        debug!(room = %room.room_id, attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(tx) = events.upgrade() else { return };
            let _ = tx.send(SessionEvent::ReconnectDue { generation }).await;
        });
    }

    fn on_reconnect_due(&mut self, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        let Some(room) = self.room.as_ref() else { return };
        if room.state != ConnectionState::Disconnected || room.conn.is_some() {
            return;
        }
        info!(room = %room.room_id, attempt = room.reconnect_attempt, "reconnecting");
        // Only the socket resumes; history stays merged.
        self.spawn_connect(generation, room.room_id.clone());
    }

    /// Live requires both the history merge and an open connection.
    /// Reached from Loading on first open and from Disconnected on a
    /// successful reconnect.
    fn maybe_go_live(&mut self) {
        let go = {
            let Some(room) = self.room.as_mut() else {
                return;
            };
            let eligible = matches!(
                room.state,
                ConnectionState::Loading | ConnectionState::Disconnected
            );
            if eligible && room.opened && room.history_done {
                room.state = ConnectionState::Live;
                true
            } else {
                false
            }
        };
        if go {
            self.publish(SessionUpdate::StateChanged(ConnectionState::Live));
        }
    }

    /// Decode and merge one live frame. Returns the message if it was
    /// newly inserted. Malformed payloads and unknown frame types are
    /// dropped without a state change; frames for a room that is not open
    /// never reach the timeline.
    fn merge_live_frame(&mut self, raw: &str) -> Option<ChatMessage> {
        let frame = match protocol::decode_inbound(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return None;
            }
        };
        let msg = match frame {
            InboundFrame::Message(msg) => msg,
            InboundFrame::Unhandled(kind) => {
                debug!(kind = %kind, "ignoring unhandled frame type");
                return None;
            }
        };
        let room = self.room.as_mut()?;
        if msg.room_id != room.room_id {
            warn!(
                message_room = %msg.room_id,
                open_room = %room.room_id,
                "dropping message for a room that is not open"
            );
            return None;
        }
        match room.timeline.merge(msg.clone()) {
            Ok(MergeOutcome::Inserted) => Some(msg),
            Ok(MergeOutcome::Duplicate) => {
                debug!(id = msg.id, "duplicate message replayed; timeline unchanged");
                None
            }
            Err(e) => {
                error!(error = %e, "room mismatch reached the timeline");
                None
            }
        }
    }

    fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        let Some(room) = self.room.as_ref() else {
            return Err(SessionError::SendRejected);
        };
        if room.state != ConnectionState::Live {
            return Err(SessionError::SendRejected);
        }
        let Some(conn) = room.conn.as_ref() else {
            return Err(SessionError::SendRejected);
        };
        let frame = match protocol::encode_outbound(text) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to encode outbound frame");
                return Err(SessionError::SendRejected);
            }
        };
        // Fire-and-forget: the only acknowledgment is the broadcast echo,
        // which arrives like any other inbound message.
        conn.send_frame(frame).map_err(|e| {
            warn!(error = %e, "send dropped by transport");
            SessionError::SendRejected
        })
    }

    fn snapshot(&self) -> SessionSnapshot {
        match &self.room {
            Some(room) => SessionSnapshot {
                room_id: Some(room.room_id.clone()),
                state: room.state,
                messages: room.timeline.messages().to_vec(),
                history_error: room.history_error.clone(),
                disconnect_reason: room.disconnect_reason.clone(),
            },
            None => SessionSnapshot {
                room_id: None,
                state: ConnectionState::Idle,
                messages: Vec::new(),
                history_error: None,
                disconnect_reason: None,
            },
        }
    }

    fn publish(&self, update: SessionUpdate) {
        // No receivers is fine; the view may not be subscribed yet.
        let _ = self.updates.send(update);
    }
}
