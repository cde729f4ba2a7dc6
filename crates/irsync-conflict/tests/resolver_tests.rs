//! Integration tests for ConflictResolver
//!
//! Uses a line-based fake converter: convert reads the file into
//! `{"lines": [...]}` and generate writes the lines back prefixed with the
//! target side.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;

use irsync_conflict::{BackupManager, ConflictResolver, WriteObserver};
use irsync_core::domain::{
    ConflictRecord, IrDocument, NamingConvention, PathMapper, ResolutionStrategy, Side, SideLayout,
};
use irsync_core::ports::{ConverterRegistry, IConflictLedger, IConverter, IIrStore};
use irsync_store::{JsonConflictLedger, JsonIrStore};

struct LineConverter;

#[async_trait::async_trait]
impl IConverter for LineConverter {
    async fn convert(&self, _side: Side, path: &Path) -> anyhow::Result<IrDocument> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(json!({ "lines": text.lines().collect::<Vec<_>>() }))
    }

    async fn generate(&self, side: Side, ir: &IrDocument, output: &Path) -> anyhow::Result<()> {
        let lines: Vec<String> = ir["lines"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|l| l.as_str().map(|s| format!("[{side}] {s}")))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, lines.join("\n")).await?;
        Ok(())
    }
}

struct FailingConverter;

#[async_trait::async_trait]
impl IConverter for FailingConverter {
    async fn convert(&self, _side: Side, _path: &Path) -> anyhow::Result<IrDocument> {
        anyhow::bail!("parser exploded")
    }

    async fn generate(&self, _side: Side, _ir: &IrDocument, _output: &Path) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingObserver(Mutex<Vec<PathBuf>>);

#[async_trait::async_trait]
impl WriteObserver for RecordingObserver {
    async fn file_written(&self, path: &Path) {
        self.0.lock().unwrap().push(path.to_path_buf());
    }
}

struct Fixture {
    _dir: TempDir,
    a_file: PathBuf,
    b_file: PathBuf,
    ledger: Arc<JsonConflictLedger>,
    store: Arc<JsonIrStore>,
    mapper: PathMapper,
}

async fn setup() -> Fixture {
    let dir = TempDir::new().unwrap();
    let a_root = dir.path().join("web");
    let b_root = dir.path().join("app");
    tokio::fs::create_dir_all(&a_root).await.unwrap();
    tokio::fs::create_dir_all(&b_root).await.unwrap();

    let a_file = a_root.join("Button.tsx");
    let b_file = b_root.join("button.dart");
    tokio::fs::write(&a_file, "alpha\nbeta").await.unwrap();
    tokio::fs::write(&b_file, "gamma").await.unwrap();

    let mapper = PathMapper::new(
        SideLayout::new(a_root, "tsx", NamingConvention::PascalCase),
        SideLayout::new(b_root, "dart", NamingConvention::SnakeCase),
    );

    Fixture {
        _dir: dir,
        a_file,
        b_file,
        ledger: Arc::new(JsonConflictLedger::in_memory()),
        store: Arc::new(JsonIrStore::in_memory(10)),
        mapper,
    }
}

fn resolver(f: &Fixture, converter: Arc<dyn IConverter>) -> ConflictResolver {
    ConflictResolver::new(
        f.ledger.clone(),
        f.store.clone(),
        ConverterRegistry::uniform(converter),
        f.mapper.clone(),
        BackupManager::new(3),
    )
}

async fn open_conflict(f: &Fixture) -> ConflictRecord {
    let now = Utc::now();
    let record = ConflictRecord::new(f.a_file.clone(), now, f.b_file.clone(), now, Some(1));
    f.ledger.save(&record).await.unwrap();
    record
}

#[tokio::test]
async fn test_keep_a_regenerates_side_b() {
    let f = setup().await;
    let observer = Arc::new(RecordingObserver::default());
    let resolver = resolver(&f, Arc::new(LineConverter)).with_write_observer(observer.clone());
    let conflict = open_conflict(&f).await;

    let outcome = resolver.resolve(conflict.id(), ResolutionStrategy::KeepA).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert!(outcome.resolved);
    assert_eq!(outcome.regenerated.as_deref(), Some(f.b_file.as_path()));
    assert_eq!(outcome.backups.len(), 1);

    let b = tokio::fs::read_to_string(&f.b_file).await.unwrap();
    assert_eq!(b, "[b] alpha\n[b] beta");
    let backup = tokio::fs::read_to_string(&outcome.backups[0]).await.unwrap();
    assert_eq!(backup, "gamma");

    let stored = f.ledger.get(conflict.id()).await.unwrap().unwrap();
    assert!(stored.is_resolved());
    assert_eq!(stored.resolution(), Some(ResolutionStrategy::KeepA));

    let id = f.mapper.ir_id(Side::A, &f.a_file).unwrap();
    let latest = f.store.latest(&id).await.unwrap().unwrap();
    assert_eq!(latest.version, 1);

    assert_eq!(observer.0.lock().unwrap().as_slice(), &[f.b_file.clone()]);
}

#[tokio::test]
async fn test_keep_b_regenerates_side_a() {
    let f = setup().await;
    let resolver = resolver(&f, Arc::new(LineConverter));
    let conflict = open_conflict(&f).await;

    let outcome = resolver.resolve(conflict.id(), ResolutionStrategy::KeepB).await;

    assert!(outcome.success);
    let a = tokio::fs::read_to_string(&f.a_file).await.unwrap();
    assert_eq!(a, "[a] gamma");
    assert!(f.ledger.unresolved().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_manual_merge_backs_up_both_and_stays_open() {
    let f = setup().await;
    let resolver = resolver(&f, Arc::new(LineConverter));
    let conflict = open_conflict(&f).await;

    let outcome = resolver
        .resolve(conflict.id(), ResolutionStrategy::ManualMerge)
        .await;

    assert!(outcome.success);
    assert!(!outcome.resolved);
    assert_eq!(outcome.backups.len(), 2);
    assert_eq!(
        tokio::fs::read_to_string(&f.b_file).await.unwrap(),
        "gamma"
    );
    assert_eq!(f.ledger.unresolved().await.unwrap().len(), 1);

    // The user edits side B by hand, then declares it authoritative
    tokio::fs::write(&f.b_file, "merged").await.unwrap();
    let done = resolver.complete_manual_merge(conflict.id(), Side::B).await;
    assert!(done.resolved);
    assert_eq!(
        tokio::fs::read_to_string(&f.a_file).await.unwrap(),
        "[a] merged"
    );
    let stored = f.ledger.get(conflict.id()).await.unwrap().unwrap();
    assert_eq!(stored.resolution(), Some(ResolutionStrategy::ManualMerge));
}

#[tokio::test]
async fn test_skip_touches_nothing() {
    let f = setup().await;
    let resolver = resolver(&f, Arc::new(LineConverter));
    let conflict = open_conflict(&f).await;

    let outcome = resolver.resolve(conflict.id(), ResolutionStrategy::Skip).await;

    assert!(outcome.success);
    assert!(!outcome.resolved);
    assert!(outcome.backups.is_empty());
    assert_eq!(
        tokio::fs::read_to_string(&f.a_file).await.unwrap(),
        "alpha\nbeta"
    );
    assert_eq!(f.ledger.unresolved().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_conflict_fails_without_error() {
    let f = setup().await;
    let resolver = resolver(&f, Arc::new(LineConverter));

    let outcome = resolver
        .resolve(&irsync_core::domain::ConflictId::new(), ResolutionStrategy::KeepA)
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn test_already_resolved_conflict_fails() {
    let f = setup().await;
    let resolver = resolver(&f, Arc::new(LineConverter));
    let conflict = open_conflict(&f).await;

    assert!(resolver.resolve(conflict.id(), ResolutionStrategy::KeepA).await.success);
    let again = resolver.resolve(conflict.id(), ResolutionStrategy::KeepB).await;

    assert!(!again.success);
    assert!(again.error.unwrap().contains("already resolved"));
}

#[tokio::test]
async fn test_conversion_failure_leaves_conflict_open() {
    let f = setup().await;
    let resolver = resolver(&f, Arc::new(FailingConverter));
    let conflict = open_conflict(&f).await;

    let outcome = resolver.resolve(conflict.id(), ResolutionStrategy::KeepA).await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("parser exploded"));
    assert_eq!(
        tokio::fs::read_to_string(&f.b_file).await.unwrap(),
        "gamma"
    );
    assert_eq!(f.ledger.unresolved().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_preview_reads_both_files() {
    let f = setup().await;
    let resolver = resolver(&f, Arc::new(LineConverter));
    let conflict = open_conflict(&f).await;

    let preview = resolver.preview(conflict.id()).await.unwrap();

    assert_eq!(preview.side_a_lines, vec!["alpha", "beta"]);
    assert_eq!(preview.side_b_lines, vec!["gamma"]);
    assert_eq!(preview.differing_lines(), 2);
}
