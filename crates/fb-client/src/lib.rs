//! # fb-client
//!
//! Async Firebird client over the wire protocol.
//!
//! This is the primary public API surface of the workspace. It covers the
//! session lifecycle, transactions, segmented and stream blobs, server
//! event notifications, operation cancellation and the service manager.
//!
//! ## Session Lifecycle
//!
//! ```text
//! Unconnected -> Connected (via connect())
//! Connected -> Attached (via attach() or create_database())
//! Attached -> Closed (via close(), drop_database(), abort or a lost connection)
//! Connected -> Closed (via disconnect())
//! ```
//!
//! Transactions, blobs and the event channel hold the session weakly and
//! fail with [`Error::NotAttached`] once it is gone.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_client::{Blob, Config, Database, TransactionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_connection_string(
//!         "host=localhost;database=/data/employee.fdb;user=SYSDBA;password=masterkey",
//!     )?;
//!     let db = Database::open(config).await?;
//!
//!     let tx = db.start_transaction(&TransactionConfig::default()).await?;
//!     let blob = db.create_blob_for_output(&tx, None)?;
//!     blob.open().await?;
//!     blob.write_all(b"hello").await?;
//!     blob.close().await?;
//!     tx.commit().await?;
//!
//!     let handle = db.create_event_handle("ORDER_PLACED", |e: &fb_client::EventNotification| {
//!         println!("{} posted {} times", e.name, e.event_count);
//!     })?;
//!     db.queue_event(&handle).await?;
//!
//!     db.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod blob;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod database;
pub mod error;
pub mod event;
pub mod listener;
pub mod processor;
pub mod service;
pub mod state;
pub mod transaction;
pub mod warning;
mod wire;

// Re-export commonly used types
pub use blob::{Blob, BlobState, InputBlob, OutputBlob};
pub use cancel::{CancelHandle, CancelKind};
pub use channel::{AsynchronousChannel, ChannelListener};
pub use config::{Config, TimeoutConfig};
pub use database::Database;
pub use error::{Error, Result, ServerError};
pub use event::{EventHandle, EventHandler, EventNotification};
pub use fb_wire::{BlobId, BlobParameterBuffer, BlobType, Diagnostic, ProtocolVersion, SeekMode};
pub use listener::{DatabaseListener, ListenerRegistry};
pub use processor::AsynchronousProcessor;
pub use service::Service;
pub use state::DatabaseState;
pub use transaction::{IsolationLevel, Transaction, TransactionConfig, TransactionListener, TransactionState};
pub use warning::WarningCallback;
