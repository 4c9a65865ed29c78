//! Helpers shared by the integration tests.

#![allow(dead_code, clippy::expect_used)]

use std::time::Duration;

use fb_client::{Database, Transaction, TransactionConfig};
use fb_testing::MockFbServer;

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

/// Start a default server and open an attached session on it.
pub async fn attached() -> (MockFbServer, Database) {
    init_tracing();
    let server = MockFbServer::builder().build().await.expect("mock server starts");
    let db = Database::open(server.client_config()).await.expect("session attaches");
    (server, db)
}

/// Start a read-write transaction.
pub async fn transaction(db: &Database) -> Transaction {
    db.start_transaction(&TransactionConfig::default())
        .await
        .expect("transaction starts")
}
