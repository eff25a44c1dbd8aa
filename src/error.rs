//! Unified error handling for blockshared.
//!
//! Two layers: [`StoreError`] for the shared state store, and
//! [`SessionError`] for the per-connection coordinator. Each variant maps
//! to a static `error_code()` used as a metrics label. Session errors that
//! reject admission additionally carry a WebSocket close code.

use thiserror::Error;

// ============================================================================
// Store Errors (shared state store)
// ============================================================================

/// Errors from the shared state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed value at {key}: {reason}")]
    Malformed { key: String, reason: String },
}

impl StoreError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::Malformed { .. } => "malformed_value",
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Session Errors (connection coordinator)
// ============================================================================

/// Errors that end or reject a workspace session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No record exists for the requested room. Close code 4004.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// The room is at capacity. Close code 4003.
    #[error("room full: {0}")]
    RoomFull(String),

    /// The room record store failed during admission.
    #[error("room lookup failed: {0}")]
    RoomLookup(#[from] crate::db::DbError),

    /// The shared state store failed on a path that must not be survived
    /// (admission-time presence registration).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

impl SessionError {
    /// Get a static error code string for metrics labeling. Store
    /// failures report the inner store code.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RoomNotFound(_) => "room_not_found",
            Self::RoomFull(_) => "room_full",
            Self::RoomLookup(_) => "room_lookup",
            Self::Store(e) => e.error_code(),
            Self::Transport(_) => "transport",
        }
    }

    /// The application close code for admission rejections.
    ///
    /// Returns `None` for errors that are not part of the close-code
    /// contract (the transport default applies).
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::RoomFull(_) => Some(blockshare_proto::close::ROOM_FULL),
            Self::RoomNotFound(_) => Some(blockshare_proto::close::ROOM_NOT_FOUND),
            Self::RoomLookup(_) | Self::Store(_) | Self::Transport(_) => None,
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
