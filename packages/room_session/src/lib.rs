//! # Room Session
//!
//! Session controller for the suite's chat backend: presents a single,
//! consistent, ordered view of a conversation by reconciling a paginated
//! history load (REST) with a live message stream (WebSocket) across an
//! unreliable connection.
//!
//! The [`session::SessionController`] is a single-task actor. Opening a
//! room races the history fetch against the connection open, buffers live
//! frames until history merges, and then keeps the timeline ordered and
//! deduplicated as frames arrive. Disconnection preserves the timeline;
//! a bounded-backoff reconnect resumes the socket without re-fetching
//! history. Closing a room (or opening another) releases the connection
//! and discards the timeline, and any response that resolves after the
//! switch is detected by generation and dropped.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use room_session::{
//!     ReconnectPolicy, RestHistoryLoader, SessionContext, SessionController, WsConnector,
//! };
//!
//! # async fn run() -> Result<(), room_session::SessionError> {
//! let history = Arc::new(RestHistoryLoader::new("http://127.0.0.1:4600", "token", 50));
//! let connector = Arc::new(WsConnector::new("ws://127.0.0.1:4600", "token"));
//! let ctx = SessionContext {
//!     user_id: "u-1".to_string(),
//!     display_name: "Alice".to_string(),
//! };
//!
//! let handle = SessionController::spawn(ctx, history, connector, ReconnectPolicy::default());
//! let mut updates = handle.subscribe();
//! handle.open_room("room-7").await?;
//! handle.send("hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod directory;
pub mod error;
pub mod history;
pub mod message;
pub mod protocol;
pub mod session;

pub use connection::{ConnectionSignal, Connector, RoomConnection, WsConnector};
pub use directory::{DirectoryClient, RoomKind, RoomSummary};
pub use error::{ApiError, ConnectError, MalformedFrame, RoomMismatch, SessionError};
pub use history::{HistoryLoader, RestHistoryLoader};
pub use message::{ChatMessage, MergeOutcome, Timeline};
pub use session::{
    ConnectionState, ReconnectPolicy, SessionContext, SessionController, SessionHandle,
    SessionSnapshot, SessionUpdate,
};
