//! Shared process state and the per-session lifecycle machine.
//!
//! The [`Hub`] is the single process-scoped context injected into every
//! session: one store client, one lock manager, one presence registry, one
//! bus. No session-local copies, no process-wide singletons.

use crate::bus::Bus;
use crate::config::Config;
use crate::db::Database;
use crate::locks::LockManager;
use crate::presence::PresenceRegistry;
use crate::store::Store;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Process-scoped collaborators shared by every session.
pub struct Hub {
    /// Shared state store.
    pub store: Arc<dyn Store>,
    /// Block lock manager.
    pub locks: LockManager,
    /// Room presence registry.
    pub presence: PresenceRegistry,
    /// Per-room broadcast bus.
    pub bus: Bus,
    /// Room record store.
    pub db: Database,
    /// Graceful-shutdown fan-out.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl Hub {
    /// Assemble the hub from connected collaborators.
    pub fn new(config: &Config, store: Arc<dyn Store>, db: Database) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            locks: LockManager::new(Arc::clone(&store), config.rooms.lock_ttl_ms),
            presence: PresenceRegistry::new(Arc::clone(&store), config.rooms.presence_ttl_secs),
            bus: Bus::new(),
            store,
            db,
            shutdown_tx,
        }
    }
}

/// Per-session lifecycle phase.
///
/// ```text
/// Connecting ──► Rejected                  (room missing / full)
///     │
///     ▼
///  Active ──► Closing ──► Closed           (any transport exit)
/// ```
///
/// Messages are processed only in `Active`. Every exit from `Active` goes
/// through `Closing` so cleanup runs exactly once on all paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Upgrade finished, admission in progress.
    Connecting,
    /// Admitted; the event loop is running.
    Active,
    /// Admission failed; a contract close code was sent. Terminal.
    Rejected,
    /// Disconnect triggered; cleanup in progress.
    Closing,
    /// Cleanup done. Terminal.
    Closed,
}

impl SessionPhase {
    /// Whether this phase may transition to `next`.
    pub fn can_transition(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Connecting, Active) | (Connecting, Rejected) | (Active, Closing) | (Closing, Closed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::SessionPhase::*;

    #[test]
    fn allowed_transitions() {
        assert!(Connecting.can_transition(Active));
        assert!(Connecting.can_transition(Rejected));
        assert!(Active.can_transition(Closing));
        assert!(Closing.can_transition(Closed));
    }

    #[test]
    fn terminal_phases_stay_terminal() {
        for phase in [Rejected, Closed] {
            for next in [Connecting, Active, Rejected, Closing, Closed] {
                assert!(!phase.can_transition(next), "{phase:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn no_shortcuts_around_cleanup() {
        assert!(!Active.can_transition(Closed), "Active must pass through Closing");
        assert!(!Connecting.can_transition(Closing));
        assert!(!Connecting.can_transition(Closed));
    }
}
