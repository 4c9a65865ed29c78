//! # fb-testing
//!
//! Test infrastructure for Firebird client development.
//!
//! This crate provides an in-process mock Firebird server so that the
//! client can be exercised end to end without a database installation.
//! The integration tests for `fb-client` live in this crate's `tests/`
//! directory.
//!
//! ## Mock Server Example
//!
//! ```rust,ignore
//! use fb_client::{Database, TransactionConfig};
//! use fb_testing::MockFbServer;
//! use fb_wire::{Operation, StatusVector, codes};
//!
//! #[tokio::test]
//! async fn test_commit_failure() {
//!     let server = MockFbServer::builder()
//!         .fail_on(Operation::Commit, StatusVector::error(codes::ISC_TRA_STATE))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let db = Database::open(server.client_config()).await.unwrap();
//!     let tx = db.start_transaction(&TransactionConfig::default()).await.unwrap();
//!     assert!(tx.commit().await.is_err());
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_server;

pub use mock_server::{
    MOCK_DATABASE, MockFbServer, MockServerBuilder, MockServerConfig, MockServerError, Result,
};
