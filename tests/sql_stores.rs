//! SQL adapter contract tests over sqlite.
//!
//! These exercise the same behaviors the in-memory adapters are tested
//! for, through the sqlx `Any` driver against throwaway sqlite files —
//! no external services needed.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use mirror_sync::idempotency::PutOutcome;
use mirror_sync::{
    AuditLog, Direction, FetchError, FreshnessHint, IdempotencyRecord, IdempotencyStore, LogEntry,
    LogStatus, MirrorFilter, MirrorStore, MirrorSyncConfig, RailGateway, RawRecord, ReadOutcome,
    RemoteWriteError, SqlAuditLog, SqlIdempotencyStore, SqlMirrorStore, SyncRuntime, TenantKeys,
};

// =============================================================================
// Helpers
// =============================================================================

struct TempDb {
    path: PathBuf,
}

impl TempDb {
    fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "mirror_sync_test_{}_{}.db",
            name,
            uuid::Uuid::new_v4()
        ));
        Self { path }
    }

    fn url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.path.display())
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        for suffix in ["-wal", "-shm"] {
            let mut side = self.path.clone().into_os_string();
            side.push(suffix);
            let _ = std::fs::remove_file(side);
        }
    }
}

fn tenant() -> TenantKeys {
    TenantKeys::new("acme", "r1")
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

// =============================================================================
// Mirror store
// =============================================================================

#[tokio::test]
async fn sql_mirror_upsert_and_read_back() {
    let db = TempDb::new("mirror_basic");
    let store = SqlMirrorStore::new(&db.url(), 5).await.unwrap();

    let items = vec![
        RawRecord::new("b1", json!({"vendor": "Acme Paper", "total": 10.5})),
        RawRecord::new("b2", json!({"vendor": "Cloud Inc", "total": 99})),
    ];
    let written = store
        .upsert_many("bills", &tenant(), &items, Some("v1"), 5_000)
        .await
        .unwrap();
    assert_eq!(written, 2);

    let rows = store
        .list("bills", &tenant(), &MirrorFilter::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].entity_id, "b1");
    assert_eq!(rows[0].payload["vendor"], "Acme Paper");
    assert_eq!(rows[0].source_version.as_deref(), Some("v1"));
    assert_eq!(rows[0].last_synced_at, 5_000);

    let b2 = store
        .get_by_id("bills", &tenant(), "b2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(b2.payload["total"], 99);

    assert!(store
        .get_by_id("bills", &tenant(), "missing")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn sql_mirror_upsert_overwrites_and_dedupes() {
    let db = TempDb::new("mirror_dedup");
    let store = SqlMirrorStore::new(&db.url(), 5).await.unwrap();

    store
        .upsert_many(
            "bills",
            &tenant(),
            &[RawRecord::new("b1", json!({"total": 1}))],
            Some("v1"),
            1_000,
        )
        .await
        .unwrap();

    // Batch with an internal duplicate and an overwrite of b1
    let written = store
        .upsert_many(
            "bills",
            &tenant(),
            &[
                RawRecord::new("b1", json!({"total": 2})),
                RawRecord::new("b2", json!({"total": 3})),
                RawRecord::new("b2", json!({"total": 4})),
            ],
            Some("v2"),
            2_000,
        )
        .await
        .unwrap();
    assert_eq!(written, 2);

    let rows = store
        .list("bills", &tenant(), &MirrorFilter::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    let b1 = &rows[0];
    assert_eq!(b1.payload["total"], 2);
    assert_eq!(b1.source_version.as_deref(), Some("v2"));

    let b2 = &rows[1];
    assert_eq!(b2.payload["total"], 4); // last duplicate won
}

#[tokio::test]
async fn sql_mirror_last_synced_at_and_tenancy() {
    let db = TempDb::new("mirror_tenancy");
    let store = SqlMirrorStore::new(&db.url(), 5).await.unwrap();
    let other = TenantKeys::new("other", "r9");

    assert_eq!(store.last_synced_at("bills", &tenant()).await.unwrap(), None);

    store
        .upsert_many(
            "bills",
            &tenant(),
            &[RawRecord::new("b1", json!({}))],
            None,
            1_000,
        )
        .await
        .unwrap();
    store
        .upsert_many(
            "bills",
            &tenant(),
            &[RawRecord::new("b2", json!({}))],
            None,
            9_000,
        )
        .await
        .unwrap();

    assert_eq!(
        store.last_synced_at("bills", &tenant()).await.unwrap(),
        Some(9_000)
    );
    // Other tenant sees nothing
    assert_eq!(store.last_synced_at("bills", &other).await.unwrap(), None);
    assert!(store
        .list("bills", &other, &MirrorFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn sql_mirror_list_with_id_filter() {
    let db = TempDb::new("mirror_filter");
    let store = SqlMirrorStore::new(&db.url(), 5).await.unwrap();

    let items: Vec<RawRecord> = (1..=5)
        .map(|i| RawRecord::new(format!("b{i}"), json!({"n": i})))
        .collect();
    store
        .upsert_many("bills", &tenant(), &items, None, 1_000)
        .await
        .unwrap();

    let rows = store
        .list("bills", &tenant(), &MirrorFilter::ids(["b2", "b4"]))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].entity_id, "b2");
    assert_eq!(rows[1].entity_id, "b4");
}

#[tokio::test]
async fn sql_mirror_rejects_bad_entity_type() {
    let db = TempDb::new("mirror_badtype");
    let store = SqlMirrorStore::new(&db.url(), 5).await.unwrap();

    let result = store
        .upsert_many(
            "bills; DROP TABLE x",
            &tenant(),
            &[RawRecord::new("b1", json!({}))],
            None,
            1_000,
        )
        .await;
    assert!(result.is_err());
}

// =============================================================================
// Audit log
// =============================================================================

#[tokio::test]
async fn sql_audit_append_and_query() {
    let db = TempDb::new("audit_basic");
    let mirror = SqlMirrorStore::new(&db.url(), 5).await.unwrap();
    let audit = SqlAuditLog::with_pool(mirror.pool(), mirror.is_sqlite());
    audit.init_schema().await.unwrap();

    audit
        .append(LogEntry::inbound_ok(
            "qbo",
            "bills",
            &tenant(),
            "v1",
            json!([{"id": "b1"}]),
        ))
        .await
        .unwrap();
    audit
        .append(LogEntry::inbound_failed(
            "qbo",
            "bills",
            &tenant(),
            "connection reset",
        ))
        .await
        .unwrap();
    audit
        .append(LogEntry::outbound_failed(
            "qbo",
            "update_bill",
            Some("bills"),
            &tenant(),
            Some("k1"),
            503,
            "maintenance",
            json!({"total": 5}),
        ))
        .await
        .unwrap();

    let entries = audit.entries_for(&tenant(), "bills").await.unwrap();
    assert_eq!(entries.len(), 3);

    assert_eq!(entries[0].direction, Direction::In);
    assert_eq!(entries[0].status, LogStatus::Ok);
    assert_eq!(entries[0].source_version.as_deref(), Some("v1"));
    assert_eq!(entries[0].payload_snapshot, json!([{"id": "b1"}]));

    assert_eq!(entries[1].status, LogStatus::Failed);
    assert_eq!(
        entries[1].error_message.as_deref(),
        Some("connection reset")
    );

    assert_eq!(entries[2].direction, Direction::Out);
    assert_eq!(entries[2].status_code, Some(503));
    assert_eq!(entries[2].idem_key.as_deref(), Some("k1"));

    // Scoped by tenant
    let other = TenantKeys::new("other", "r9");
    assert!(audit.entries_for(&other, "bills").await.unwrap().is_empty());
}

#[tokio::test]
async fn sql_audit_hygiene_flags() {
    let db = TempDb::new("audit_flags");
    let mirror = SqlMirrorStore::new(&db.url(), 5).await.unwrap();
    let audit = SqlAuditLog::with_pool(mirror.pool(), mirror.is_sqlite());
    audit.init_schema().await.unwrap();

    audit.flag_hygiene(&tenant(), "sync_error_bills").await.unwrap();
    audit.flag_hygiene(&tenant(), "stale_data_bills").await.unwrap();
    audit.flag_hygiene(&tenant(), "sync_error_bills").await.unwrap();

    let all = audit.flags_for(&tenant(), None).await.unwrap();
    assert_eq!(all.len(), 3);

    let sync_errors = audit
        .flags_for(&tenant(), Some("sync_error_bills"))
        .await
        .unwrap();
    assert_eq!(sync_errors.len(), 2);
    assert!(sync_errors.iter().all(|f| f.code == "sync_error_bills"));
}

// =============================================================================
// Idempotency store
// =============================================================================

#[tokio::test]
async fn sql_idempotency_check_and_insert() {
    let db = TempDb::new("idem_basic");
    let mirror = SqlMirrorStore::new(&db.url(), 5).await.unwrap();
    let store = SqlIdempotencyStore::with_pool(mirror.pool(), mirror.is_sqlite());
    store.init_schema().await.unwrap();

    assert!(store.find("k1").await.unwrap().is_none());

    let record = IdempotencyRecord {
        idem_key: "k1".into(),
        tenant: tenant(),
        operation: "update_bill".into(),
        result: RawRecord::new("b1", json!({"total": 10})),
        created_at: now_ms(),
    };

    let outcome = store.put_if_absent(record.clone()).await.unwrap();
    assert!(matches!(outcome, PutOutcome::Inserted));

    // Second insert with the same key loses
    let mut duplicate = record.clone();
    duplicate.result = RawRecord::new("b1", json!({"total": 999}));
    let outcome = store.put_if_absent(duplicate).await.unwrap();
    match outcome {
        PutOutcome::Existing(prior) => {
            assert_eq!(prior.result.payload["total"], 10);
            assert_eq!(prior.operation, "update_bill");
            assert_eq!(prior.tenant, tenant());
        }
        PutOutcome::Inserted => panic!("duplicate insert must not win"),
    }

    let found = store.find("k1").await.unwrap().unwrap();
    assert_eq!(found.result.entity_id, "b1");
    assert_eq!(found.result.payload["total"], 10);
}

// =============================================================================
// End-to-end over sqlite
// =============================================================================

struct StaticGateway;

#[async_trait]
impl RailGateway for StaticGateway {
    fn rail(&self) -> &str {
        "qbo"
    }

    async fn fetch_remote(&self) -> Result<(Vec<RawRecord>, String), FetchError> {
        Ok((
            vec![
                RawRecord::new("b1", json!({"vendor": "Acme Paper"})),
                RawRecord::new("b2", json!({"vendor": "Cloud Inc"})),
            ],
            "v-e2e".to_string(),
        ))
    }

    async fn call_remote(
        &self,
        _operation: &str,
        payload: &Value,
    ) -> Result<RawRecord, RemoteWriteError> {
        Ok(RawRecord::new("b1", payload.clone()))
    }
}

#[tokio::test]
async fn sql_runtime_end_to_end() {
    let db = TempDb::new("e2e");
    let config = MirrorSyncConfig {
        sql_url: Some(db.url()),
        sql_max_connections: 5,
        ..Default::default()
    };

    let mut runtime = SyncRuntime::new(config);
    runtime.start().await.unwrap();
    let orchestrator = runtime.orchestrator().unwrap();

    let gateway: Arc<dyn RailGateway> = Arc::new(StaticGateway);

    // Cold mirror: fetch, log, upsert, read back
    let outcome = orchestrator
        .read_refresh("bills", &tenant(), FreshnessHint::CachedOk, Arc::clone(&gateway))
        .await;
    match &outcome {
        ReadOutcome::Refreshed {
            records,
            source_version,
        } => {
            assert_eq!(records.len(), 2);
            assert_eq!(source_version, "v-e2e");
        }
        other => panic!("expected Refreshed, got {}", other.label()),
    }

    // Second read is served from the sqlite mirror without a fetch
    let outcome = orchestrator
        .read_refresh("bills", &tenant(), FreshnessHint::CachedOk, Arc::clone(&gateway))
        .await;
    assert!(matches!(outcome, ReadOutcome::Fresh(_)));
    assert_eq!(outcome.records().len(), 2);

    // Audit trail landed in sqlite
    let entries = orchestrator
        .audit()
        .entries_for(&tenant(), "bills")
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, LogStatus::Ok);

    // Idempotent write round-trips through sqlite too
    let payload = json!({"vendor": "Acme Paper", "total": 12});
    let first = orchestrator
        .write_idempotent("bills", "update_bill", &tenant(), payload.clone(), Arc::clone(&gateway))
        .await
        .unwrap();
    let second = orchestrator
        .write_idempotent("bills", "update_bill", &tenant(), payload, gateway)
        .await
        .unwrap();
    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.record, second.record);

    runtime.shutdown();
}
