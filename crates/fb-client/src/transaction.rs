//! Transaction support.
//!
//! This module provides transaction isolation levels, the transaction
//! parameter buffer builder and the [`Transaction`] handle with its
//! state machine.
//!
//! ## State Transitions
//!
//! ```text
//! Active -> Preparing -> Prepared
//! Active | Prepared -> Committing -> Committed
//! Active | Prepared -> RollingBack -> RolledBack
//! ```
//!
//! The `-ing` states last while the request is in flight; a failed request
//! reverts to the state the transaction had before.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fb_wire::params::tpb;
use fb_wire::{InfoTarget, Operation, ParameterBuffer, Request};
use parking_lot::Mutex;

use crate::database::DatabaseShared;
use crate::error::{Error, Result};
use crate::listener::ListenerRegistry;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read committed, reading the latest committed record version.
    #[default]
    ReadCommitted,

    /// Read committed, waiting on uncommitted record versions.
    ReadCommittedNoRecordVersion,

    /// Snapshot of the database at transaction start (`concurrency`).
    Snapshot,

    /// Snapshot with table-level locks (`consistency`).
    SnapshotTableStability,
}

impl IsolationLevel {
    /// Get the isolation level name as used in Firebird SQL.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED RECORD_VERSION",
            Self::ReadCommittedNoRecordVersion => "READ COMMITTED NO RECORD_VERSION",
            Self::Snapshot => "SNAPSHOT",
            Self::SnapshotTableStability => "SNAPSHOT TABLE STABILITY",
        }
    }

    fn write_to(self, buf: &mut ParameterBuffer) {
        match self {
            Self::ReadCommitted => {
                buf.add_flag(tpb::READ_COMMITTED).add_flag(tpb::REC_VERSION);
            }
            Self::ReadCommittedNoRecordVersion => {
                buf.add_flag(tpb::READ_COMMITTED).add_flag(tpb::NO_REC_VERSION);
            }
            Self::Snapshot => {
                buf.add_flag(tpb::CONCURRENCY);
            }
            Self::SnapshotTableStability => {
                buf.add_flag(tpb::CONSISTENCY);
            }
        }
    }
}

/// Options for starting a transaction.
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// Isolation level.
    pub isolation: IsolationLevel,
    /// Read-only access.
    pub read_only: bool,
    /// Fail immediately on lock conflicts instead of waiting.
    pub no_wait: bool,
    /// Give up waiting on a lock after this long.
    pub lock_timeout: Option<Duration>,
}

impl TransactionConfig {
    /// Create a configuration with defaults: read committed, read-write, wait.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level.
    #[must_use]
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Make the transaction read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Fail on lock conflicts without waiting.
    #[must_use]
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Wait at most `timeout` for locks.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Build the transaction parameter buffer.
    #[must_use]
    pub fn parameter_buffer(&self) -> Bytes {
        let mut buf = ParameterBuffer::transaction();
        self.isolation.write_to(&mut buf);
        buf.add_flag(if self.read_only { tpb::READ } else { tpb::WRITE });
        if self.no_wait {
            buf.add_flag(tpb::NOWAIT);
        } else {
            buf.add_flag(tpb::WAIT);
            if let Some(timeout) = self.lock_timeout {
                let secs = i32::try_from(timeout.as_secs()).unwrap_or(i32::MAX);
                buf.add_int(tpb::LOCK_TIMEOUT, secs);
            }
        }
        buf.freeze()
    }
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Started and usable.
    Active,
    /// Prepare in flight.
    Preparing,
    /// Prepared for two-phase commit.
    Prepared,
    /// Commit in flight.
    Committing,
    /// Committed.
    Committed,
    /// Rollback in flight.
    RollingBack,
    /// Rolled back.
    RolledBack,
}

impl TransactionState {
    /// Whether the transaction has ended.
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

/// Receives transaction state changes.
#[async_trait]
pub trait TransactionListener: Send + Sync {
    /// The transaction moved from `previous` to `new_state`.
    async fn transaction_state_changed(
        &self,
        transaction: &Transaction,
        new_state: TransactionState,
        previous: TransactionState,
    );
}

pub(crate) struct TransactionShared {
    handle: i32,
    state: Mutex<TransactionState>,
    database: Weak<DatabaseShared>,
    listeners: ListenerRegistry<dyn TransactionListener>,
}

/// A transaction on an attached database.
///
/// Cloning yields another handle to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionShared>,
}

impl Transaction {
    pub(crate) fn new(handle: i32, state: TransactionState, database: &Arc<DatabaseShared>) -> Self {
        if state == TransactionState::Active {
            database.transaction_started();
        }
        Self {
            inner: Arc::new(TransactionShared {
                handle,
                state: Mutex::new(state),
                database: Arc::downgrade(database),
                listeners: ListenerRegistry::new(),
            }),
        }
    }

    /// Server transaction handle.
    #[must_use]
    pub fn handle(&self) -> i32 {
        self.inner.handle
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        *self.inner.state.lock()
    }

    /// Register a state listener. The transaction holds it weakly.
    pub fn add_transaction_listener(&self, listener: Weak<dyn TransactionListener>) {
        self.inner.listeners.add(listener);
    }

    /// Unregister a state listener.
    pub fn remove_transaction_listener(&self, listener: &Weak<dyn TransactionListener>) {
        self.inner.listeners.remove(listener);
    }

    pub(crate) fn database(&self) -> Result<Arc<DatabaseShared>> {
        let db = self.inner.database.upgrade().ok_or(Error::NotAttached)?;
        db.check_attached()?;
        Ok(db)
    }

    pub(crate) fn downgrade(&self) -> Weak<TransactionShared> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<TransactionShared>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Commit the transaction.
    pub async fn commit(&self) -> Result<()> {
        self.finish(
            Request::TransactionControl {
                operation: Operation::Commit,
                tx_handle: self.handle(),
            },
            "commit",
            TransactionState::Committing,
            TransactionState::Committed,
        )
        .await
    }

    /// Roll the transaction back.
    pub async fn rollback(&self) -> Result<()> {
        self.finish(
            Request::TransactionControl {
                operation: Operation::Rollback,
                tx_handle: self.handle(),
            },
            "roll back",
            TransactionState::RollingBack,
            TransactionState::RolledBack,
        )
        .await
    }

    /// Prepare for two-phase commit, optionally recording `message` for
    /// limbo recovery.
    pub async fn prepare(&self, message: Option<&[u8]>) -> Result<()> {
        let current = self.state();
        if current != TransactionState::Active {
            return Err(Error::TransactionState {
                state: current,
                operation: "prepare",
            });
        }
        let request = match message {
            Some(message) => Request::Prepare2 {
                tx_handle: self.handle(),
                message: Bytes::copy_from_slice(message),
            },
            None => Request::TransactionControl {
                operation: Operation::Prepare,
                tx_handle: self.handle(),
            },
        };
        self.transition(request, current, TransactionState::Preparing, TransactionState::Prepared)
            .await
    }

    /// Commit and keep the transaction context open.
    pub async fn commit_retaining(&self) -> Result<()> {
        self.retaining(Operation::CommitRetaining, "commit retaining").await
    }

    /// Roll back and keep the transaction context open.
    pub async fn rollback_retaining(&self) -> Result<()> {
        self.retaining(Operation::RollbackRetaining, "roll back retaining").await
    }

    /// Request transaction information items.
    pub async fn info(&self, items: &[u8], max_length: i32) -> Result<Bytes> {
        let db = self.database()?;
        let response = db
            .round_trip(Request::Info {
                target: InfoTarget::Transaction,
                handle: self.handle(),
                items: Bytes::copy_from_slice(items),
                max_length,
            })
            .await?;
        Ok(response.data)
    }

    async fn retaining(&self, operation: Operation, name: &'static str) -> Result<()> {
        let state = self.state();
        if state != TransactionState::Active {
            return Err(Error::TransactionState { state, operation: name });
        }
        let db = self.database()?;
        db.round_trip(Request::TransactionControl {
            operation,
            tx_handle: self.handle(),
        })
        .await?;
        tracing::debug!(handle = self.handle(), operation = name, "transaction retained");
        Ok(())
    }

    async fn finish(
        &self,
        request: Request,
        operation: &'static str,
        transient: TransactionState,
        target: TransactionState,
    ) -> Result<()> {
        let current = self.state();
        if !matches!(current, TransactionState::Active | TransactionState::Prepared) {
            return Err(Error::TransactionState {
                state: current,
                operation,
            });
        }
        self.transition(request, current, transient, target).await
    }

    async fn transition(
        &self,
        request: Request,
        current: TransactionState,
        transient: TransactionState,
        target: TransactionState,
    ) -> Result<()> {
        let db = self.database()?;
        self.switch_state(&db, transient).await;

        match db.round_trip(request).await {
            Ok(_) => {
                self.switch_state(&db, target).await;
                tracing::debug!(handle = self.handle(), state = ?target, "transaction state changed");
                Ok(())
            }
            Err(e) => {
                self.switch_state(&db, current).await;
                Err(e)
            }
        }
    }

    async fn switch_state(&self, db: &DatabaseShared, new_state: TransactionState) {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), new_state);
        if previous == new_state {
            return;
        }
        match (previous == TransactionState::Active, new_state == TransactionState::Active) {
            (true, false) => db.transaction_ended(),
            (false, true) => db.transaction_started(),
            _ => {}
        }
        for listener in self.inner.listeners.snapshot() {
            listener.transaction_state_changed(self, new_state, previous).await;
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("handle", &self.handle())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_isolation_level_default() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
        assert_eq!(IsolationLevel::Snapshot.name(), "SNAPSHOT");
    }

    #[test]
    fn test_default_parameter_buffer() {
        let tpb_bytes = TransactionConfig::default().parameter_buffer();
        assert_eq!(
            &tpb_bytes[..],
            &[tpb::VERSION3, tpb::READ_COMMITTED, tpb::REC_VERSION, tpb::WRITE, tpb::WAIT]
        );
    }

    #[test]
    fn test_parameter_buffer_options() {
        let tpb_bytes = TransactionConfig::new()
            .isolation(IsolationLevel::SnapshotTableStability)
            .read_only()
            .lock_timeout(Duration::from_secs(5))
            .parameter_buffer();
        assert_eq!(
            &tpb_bytes[..],
            &[tpb::VERSION3, tpb::CONSISTENCY, tpb::READ, tpb::WAIT, tpb::LOCK_TIMEOUT, 4, 5, 0, 0, 0]
        );

        let nowait = TransactionConfig::new()
            .no_wait()
            .lock_timeout(Duration::from_secs(5))
            .parameter_buffer();
        assert_eq!(nowait.last(), Some(&tpb::NOWAIT));
    }

    #[test]
    fn test_final_states() {
        assert!(TransactionState::Committed.is_final());
        assert!(TransactionState::RolledBack.is_final());
        assert!(!TransactionState::Prepared.is_final());
    }

    #[tokio::test]
    async fn test_commit_without_session() {
        let db = Arc::new(DatabaseShared::new(Config::new()));
        let tx = Transaction::new(7, TransactionState::Active, &db);
        assert_eq!(db.active_transaction_count(), 1);

        drop(db);
        assert!(matches!(tx.commit().await, Err(Error::NotAttached)));
        assert_eq!(tx.state(), TransactionState::Active);
    }

    #[tokio::test]
    async fn test_invalid_transitions_rejected_locally() {
        let db = Arc::new(DatabaseShared::new(Config::new()));
        let tx = Transaction::new(7, TransactionState::Prepared, &db);
        assert_eq!(db.active_transaction_count(), 0);

        let err = tx.prepare(None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::TransactionState {
                state: TransactionState::Prepared,
                operation: "prepare"
            }
        ));
        assert!(matches!(
            tx.commit_retaining().await,
            Err(Error::TransactionState { .. })
        ));

        *tx.inner.state.lock() = TransactionState::Committed;
        let err = tx.rollback().await.unwrap_err();
        assert_eq!(err.error_code(), Some(fb_wire::codes::ISC_TRA_STATE));
    }
}
