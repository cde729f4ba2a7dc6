//! Integration tests for JsonConflictLedger

use std::path::PathBuf;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use irsync_core::domain::{ConflictId, ConflictRecord, ResolutionStrategy};
use irsync_core::ports::IConflictLedger;
use irsync_store::JsonConflictLedger;

// ============================================================================
// Test helpers
// ============================================================================

fn conflict(name: &str) -> ConflictRecord {
    let t0 = Utc::now();
    ConflictRecord::new(
        PathBuf::from(format!("/web/{name}.tsx")),
        t0,
        PathBuf::from(format!("/app/{}.dart", name.to_lowercase())),
        t0 + Duration::milliseconds(1500),
        Some(1),
    )
}

// ============================================================================
// CRUD
// ============================================================================

#[tokio::test]
async fn test_save_and_get() {
    let ledger = JsonConflictLedger::in_memory();
    let c = conflict("Button");
    ledger.save(&c).await.unwrap();

    let fetched = ledger.get(c.id()).await.unwrap().unwrap();
    assert_eq!(fetched, c);
    assert!(ledger.get(&ConflictId::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_save_is_upsert() {
    let ledger = JsonConflictLedger::in_memory();
    let mut c = conflict("Button");
    ledger.save(&c).await.unwrap();
    c.mark_resolved(ResolutionStrategy::KeepB);
    ledger.save(&c).await.unwrap();

    let all = ledger.all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].is_resolved());
}

#[tokio::test]
async fn test_unresolved_filters_resolved() {
    let ledger = JsonConflictLedger::in_memory();
    let a = conflict("A");
    let b = conflict("B");
    ledger.save(&a).await.unwrap();
    ledger.save(&b).await.unwrap();

    assert!(ledger
        .mark_resolved(a.id(), ResolutionStrategy::KeepA)
        .await
        .unwrap());
    let open = ledger.unresolved().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id(), b.id());

    // Resolved records are kept, not garbage-collected
    assert_eq!(ledger.all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_mark_resolved_unknown_id() {
    let ledger = JsonConflictLedger::in_memory();
    assert!(!ledger
        .mark_resolved(&ConflictId::new(), ResolutionStrategy::Skip)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_delete() {
    let ledger = JsonConflictLedger::in_memory();
    let c = conflict("Card");
    ledger.save(&c).await.unwrap();
    assert!(ledger.delete(c.id()).await.unwrap());
    assert!(!ledger.delete(c.id()).await.unwrap());
    assert!(ledger.all().await.unwrap().is_empty());
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_conflicts_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state").join("conflicts.json");
    let c = conflict("Header");

    {
        let ledger = JsonConflictLedger::open(&path).await.unwrap();
        ledger.save(&c).await.unwrap();
    }

    let reopened = JsonConflictLedger::open(&path).await.unwrap();
    let open = reopened.unresolved().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id(), c.id());
    assert!(open[0].side_a_timestamp() < open[0].side_b_timestamp());
}

#[tokio::test]
async fn test_ledger_file_is_json_array() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("conflicts.json");
    let ledger = JsonConflictLedger::open(&path).await.unwrap();
    ledger.save(&conflict("One")).await.unwrap();
    ledger.save(&conflict("Two")).await.unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_open_empty_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("conflicts.json");
    std::fs::write(&path, b"").unwrap();
    let ledger = JsonConflictLedger::open(&path).await.unwrap();
    assert!(ledger.all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_write_leaves_ledger_unchanged() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let ledger = JsonConflictLedger::open(&state.join("conflicts.json"))
        .await
        .unwrap();
    let kept = conflict("Button");
    ledger.save(&kept).await.unwrap();

    // A plain file where the state directory was makes every write fail
    std::fs::remove_dir_all(&state).unwrap();
    std::fs::write(&state, "not a directory").unwrap();

    let lost = conflict("Card");
    assert!(ledger.save(&lost).await.is_err());
    assert!(ledger.get(lost.id()).await.unwrap().is_none());
    assert!(ledger
        .mark_resolved(kept.id(), ResolutionStrategy::KeepA)
        .await
        .is_err());
    assert!(ledger.delete(kept.id()).await.is_err());

    let unresolved = ledger.unresolved().await.unwrap();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].id(), kept.id());
}
