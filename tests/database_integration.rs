//! Integration tests for the Realtime Database
//!
//! These tests interact with a real database and require:
//! 1. A Realtime Database whose rules allow authenticated reads and writes
//!    under `kit_tests/`
//! 2. Environment variables set in .env file (see auth_integration.rs)
//! 3. Run with: cargo test --features integration-tests -- --test-threads=1

#![cfg(feature = "integration-tests")]

use firebase_kit::database::RestBackend;
use firebase_kit::{
    ChildEventKind, Filter, FirebaseError, FirebaseKit, KitOptions, ListMode, ListOptions, Response,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    name: String,
    rank: i64,
}

/// Signed-in kit, so database requests carry an ID token
async fn signed_in_kit() -> FirebaseKit {
    dotenvy::dotenv().ok();

    let options = KitOptions::from_env().expect("FIREBASE_* variables must be set in .env file");
    let number = env::var("TEST_PHONE_NUMBER").expect("TEST_PHONE_NUMBER must be set in .env file");
    let code = env::var("TEST_PHONE_CODE").expect("TEST_PHONE_CODE must be set in .env file");

    let kit = FirebaseKit::create(options).await.expect("Failed to create kit");
    kit.auth().request_verification(&number).await.expect("Failed to request verification");
    kit.confirm_otp(&code).await.expect("Failed to confirm code");
    kit
}

fn item(name: &str, rank: i64) -> Item {
    Item {
        name: name.to_string(),
        rank,
    }
}

/// Test: Create, read, update and delete round trip
#[tokio::test]
async fn test_crud_round_trip() {
    let kit = signed_in_kit().await;
    let db = kit.database().await.expect("Failed to authorize database");

    let path = db
        .create(["kit_tests", "crud"], &item("alpha", 1), true)
        .await
        .expect("Failed to create");

    let read = db.read_record::<Item>(&path).await.expect("Failed to read");
    assert_eq!(read.items[0].value, item("alpha", 1));

    db.update(&path, &serde_json::json!({"rank": 2})).await.expect("Failed to update");
    let read = db.read_record::<Item>(&path).await.expect("Failed to read");
    assert_eq!(read.items[0].value.rank, 2);

    db.delete(["kit_tests", "crud"]).await.expect("Failed to delete");
    assert!(db.read_record::<Item>(&path).await.expect("Failed to read").is_empty());
    kit.logout().await;
}

/// Test: Server-side ordering and prefix filter
#[tokio::test]
async fn test_list_with_prefix() {
    let kit = signed_in_kit().await;
    let db = kit.database().await.expect("Failed to authorize database");
    for (key, name) in [("a", "apple"), ("b", "banana"), ("c", "apricot")] {
        db.create(["kit_tests", "list", key], &item(name, 0), false)
            .await
            .expect("Failed to create");
    }

    let response = db
        .list::<Item>(
            ["kit_tests", "list"],
            ListOptions::new("name", Filter::prefix("ap")),
            ListMode::Once,
        )
        .await
        .expect("Failed to list")
        .into_response()
        .expect("one-shot listing");

    let names: Vec<_> = response.values().into_iter().map(|i| i.name).collect();
    assert_eq!(names, ["apple", "apricot"]);

    db.delete(["kit_tests", "list"]).await.expect("Failed to delete");
    kit.logout().await;
}

/// Test: Streaming child events over Server-Sent Events
#[tokio::test]
async fn test_child_added_stream() {
    let kit: FirebaseKit<RestBackend, _> = signed_in_kit().await;
    let db = kit.database().await.expect("Failed to authorize database");
    db.delete(["kit_tests", "stream"]).await.expect("Failed to clear");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let on_added = move |result: Result<Response<Item>, FirebaseError>| {
        for envelope in result.expect("stream error").items {
            let _ = tx.send(envelope.key);
        }
    };
    db.listen_child_events(["kit_tests", "stream"], ChildEventKind::Added, on_added)
        .await
        .expect("Failed to listen");

    db.create(["kit_tests", "stream", "x"], &item("x", 1), false)
        .await
        .expect("Failed to create");

    let key = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("no child event within 10s");
    assert_eq!(key.as_deref(), Some("x"));

    assert_eq!(kit.logout().await, 1);
    db.delete(["kit_tests", "stream"]).await.ok();
}
