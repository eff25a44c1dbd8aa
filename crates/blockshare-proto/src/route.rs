//! Connection route parsing.
//!
//! Clients connect on `ws/workspace/{room_id}/?nickname={url-encoded}`.
//! The gateway validates the route inside the WebSocket upgrade callback,
//! so a malformed path is rejected at the HTTP layer before the socket is
//! ever accepted.

use thiserror::Error;

/// Errors produced while parsing a connection route.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The path does not match `/ws/workspace/{room_id}/`.
    #[error("unknown path: {0}")]
    UnknownPath(String),
    /// The room segment was empty.
    #[error("empty room id")]
    EmptyRoomId,
}

/// A parsed connection route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRoute {
    /// The room the client is joining.
    pub room_id: String,
    /// The caller-supplied nickname, URL-decoded. `None` when the query
    /// did not carry one; the coordinator synthesizes a fallback.
    pub nickname: Option<String>,
}

impl ConnectRoute {
    /// Parse a request URI (path plus optional query string).
    pub fn parse(uri: &str) -> Result<Self, RouteError> {
        let (path, query) = match uri.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (uri, None),
        };

        let room_id = path
            .strip_prefix("/ws/workspace/")
            .map(|rest| rest.trim_end_matches('/'))
            .ok_or_else(|| RouteError::UnknownPath(path.to_string()))?;

        if room_id.is_empty() {
            return Err(RouteError::EmptyRoomId);
        }
        // A slash inside the room segment means extra path components.
        if room_id.contains('/') {
            return Err(RouteError::UnknownPath(path.to_string()));
        }

        // Only a truly absent key falls back to a synthesized nickname; an
        // explicit empty value is preserved as-is.
        let nickname = query.and_then(|q| {
            q.split('&').find_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                if key != "nickname" {
                    return None;
                }
                Some(
                    urlencoding::decode(value)
                        .map(|s| s.into_owned())
                        .unwrap_or_else(|_| value.to_string()),
                )
            })
        });

        Ok(Self {
            room_id: room_id.to_string(),
            nickname,
        })
    }
}
