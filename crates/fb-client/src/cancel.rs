//! Operation cancellation support.
//!
//! A [`CancelHandle`] lets another task cancel the operation a session is
//! blocked on. Firebird receives `op_cancel` on the main connection while a
//! response is outstanding; the session's write half is shared with the
//! handle for that purpose.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_client::{CancelKind, Database};
//! use std::time::Duration;
//!
//! let cancel_handle = db.cancel_handle();
//!
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     if let Err(e) = cancel_handle.cancel(CancelKind::Raise).await {
//!         eprintln!("Failed to cancel: {}", e);
//!     }
//! });
//!
//! // Fails with a cancellation error if it runs longer than 5 seconds.
//! let result = db.execute_immediate("EXECUTE PROCEDURE long_running", Some(&tx)).await;
//! ```
//!
//! ## Important Notes
//!
//! - Protocol versions below 12 support only [`CancelKind::Abort`]
//! - [`CancelKind::Abort`] closes the connection and ends the session
//! - The handle holds the session weakly; cancelling after the session is
//!   dropped fails with [`Error::NotConnected`]

use std::sync::Weak;

use fb_wire::{Capabilities, cancel_kind};

use crate::database::DatabaseShared;
use crate::error::{Error, Result};

/// What a cancel request asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelKind {
    /// Disable cancellation for the attachment.
    Disable,
    /// Re-enable cancellation.
    Enable,
    /// Cancel the running operation; the session stays usable.
    Raise,
    /// Abort the connection.
    Abort,
}

impl CancelKind {
    /// Wire value of the kind.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Disable => cancel_kind::DISABLE,
            Self::Enable => cancel_kind::ENABLE,
            Self::Raise => cancel_kind::RAISE,
            Self::Abort => cancel_kind::ABORT,
        }
    }

    /// Protocol capability required to send this kind.
    #[must_use]
    pub const fn capability(self) -> Capabilities {
        match self {
            Self::Disable => Capabilities::CANCEL_DISABLE,
            Self::Enable => Capabilities::CANCEL_ENABLE,
            Self::Raise => Capabilities::CANCEL_RAISE,
            Self::Abort => Capabilities::CANCEL_ABORT,
        }
    }
}

/// Handle for cancelling the current operation of a session.
///
/// Cheap to clone, `Send + Sync`.
#[derive(Clone)]
pub struct CancelHandle {
    database: Weak<DatabaseShared>,
}

impl CancelHandle {
    pub(crate) fn new(database: Weak<DatabaseShared>) -> Self {
        Self { database }
    }

    /// Send a cancel request of the given kind.
    pub async fn cancel(&self, kind: CancelKind) -> Result<()> {
        let database = self.database.upgrade().ok_or(Error::NotConnected)?;
        database.cancel_operation(kind).await
    }

    /// Whether the session this handle belongs to still exists.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.database.strong_count() > 0
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle").field("live", &self.is_live()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CancelHandle>();
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(CancelKind::Disable.code(), 1);
        assert_eq!(CancelKind::Enable.code(), 2);
        assert_eq!(CancelKind::Raise.code(), 3);
        assert_eq!(CancelKind::Abort.code(), 4);
    }

    #[test]
    fn test_capability_per_protocol() {
        use fb_wire::ProtocolVersion;
        use fb_wire::version::descriptor_for;

        let v10 = descriptor_for(ProtocolVersion::V10).unwrap();
        assert!(v10.supports(CancelKind::Abort.capability()));
        assert!(!v10.supports(CancelKind::Raise.capability()));

        let v12 = descriptor_for(ProtocolVersion::V12).unwrap();
        for kind in [CancelKind::Disable, CancelKind::Enable, CancelKind::Raise, CancelKind::Abort] {
            assert!(v12.supports(kind.capability()));
        }
    }

    #[tokio::test]
    async fn test_dropped_session() {
        let handle = CancelHandle::new(Weak::new());
        assert!(!handle.is_live());
        assert!(matches!(
            handle.cancel(CancelKind::Raise).await,
            Err(Error::NotConnected)
        ));
    }
}
