//! Session state.
//!
//! Listeners, cancel handles and the event channel observe the session
//! from other tasks, so the state is tracked at runtime rather than in
//! the type.
//!
//! ## State Transitions
//!
//! ```text
//! Unconnected -> Connected (via Database::connect())
//! Connected -> Attached (via attach() or create_database())
//! Attached -> Closed (via close(), drop_database() or abort)
//! Connected -> Closed (via disconnect() or a transport failure)
//! ```

use std::fmt;

/// Lifecycle state of a [`Database`](crate::Database).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatabaseState {
    /// No socket.
    #[default]
    Unconnected,
    /// Socket open and protocol negotiated; not attached.
    Connected,
    /// Attached to a database.
    Attached,
    /// Socket closed. A closed session cannot be reused.
    Closed,
}

impl DatabaseState {
    /// Whether a socket is open.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Attached)
    }

    /// Whether a database is attached.
    #[must_use]
    pub fn is_attached(self) -> bool {
        self == Self::Attached
    }

    /// Get the state name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Unconnected => "unconnected",
            Self::Connected => "connected",
            Self::Attached => "attached",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for DatabaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
