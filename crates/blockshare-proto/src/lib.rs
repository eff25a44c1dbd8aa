//! # blockshare-proto
//!
//! Wire protocol for the blockshare collaborative workspace server.
//!
//! A session is a WebSocket connection carrying JSON envelopes of the shape
//! `{"t": <TYPE>, "payload": <object>}`. This crate owns:
//!
//! - The envelope types ([`ClientMessage`], [`ServerMessage`]) with their
//!   JSON encoding. The `t` discriminator is a serde tag, so a frame with an
//!   unknown type or a missing payload fails to decode structurally and the
//!   server drops it without inspecting it further.
//! - Connection route parsing ([`route::ConnectRoute`]): the
//!   `/ws/workspace/{room_id}/?nickname=...` path clients connect on.
//! - The application close codes sent when admission fails ([`close`]).

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod envelope;
pub mod route;

pub use envelope::{
    ClientMessage, CommitPayload, LockAcquirePayload, ServerMessage, UserInfo,
};
pub use route::{ConnectRoute, RouteError};

/// Application-level WebSocket close codes.
///
/// Codes in the 4000–4999 range are reserved for private use by the
/// WebSocket RFC; these two are the admission-failure contract clients
/// depend on. Transport-standard codes (1000/1006/1011) are not listed.
pub mod close {
    /// The room exists but is at its `max_users` occupancy.
    pub const ROOM_FULL: u16 = 4003;
    /// No record exists for the requested room.
    pub const ROOM_NOT_FOUND: u16 = 4004;
}

#[cfg(test)]
mod tests {
    use super::close;

    #[test]
    fn close_codes_are_in_private_range() {
        assert_eq!(close::ROOM_FULL, 4003);
        assert_eq!(close::ROOM_NOT_FOUND, 4004);
    }
}
