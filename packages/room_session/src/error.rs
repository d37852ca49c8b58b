use tokio_tungstenite::tungstenite;

/// A message was merged into a timeline that belongs to a different room.
///
/// The session controller filters rooms before merging, so this surfacing
/// at runtime indicates a controller bug, not a recoverable condition.
#[derive(Debug, Clone, thiserror::Error)]
#[error("message for room {message_room} merged into timeline for room {timeline_room}")]
pub struct RoomMismatch {
    pub timeline_room: String,
    pub message_room: String,
}

/// An inbound stream payload that could not be decoded at all.
///
/// Logged and dropped by the session controller; never a state change.
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed frame: {reason}")]
pub struct MalformedFrame {
    pub reason: String,
}

impl MalformedFrame {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failure talking to the suite's REST backend (history, directory).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("backend is unavailable")]
    Unavailable,

    #[error("backend returned status {status}")]
    Status { status: u16 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Other(err.into())
        }
    }
}

/// Failure establishing the live stream connection for a room.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("stream endpoint is unavailable")]
    Unavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConnectError {
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::Other(err.into())
        }
    }
}

/// Session-level error taxonomy surfaced through `SessionHandle`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("history load failed: {0}")]
    HistoryLoadFailed(#[from] ApiError),

    #[error("connection errored: {0}")]
    ConnectionErrored(String),

    #[error("connection closed (code {code:?})")]
    ConnectionClosed { code: Option<u16> },

    #[error("send rejected: session is not live")]
    SendRejected,

    #[error(transparent)]
    RoomMismatch(#[from] RoomMismatch),

    /// The controller task is gone (every handle path maps a closed
    /// command channel to this).
    #[error("session controller is gone")]
    SessionGone,
}
