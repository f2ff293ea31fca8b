//! Minimal end-to-end run of the sync layer against a scripted rail.
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use mirror_sync::{
    FetchError, FreshnessHint, MirrorSyncConfig, RailGateway, RawRecord, RemoteWriteError,
    SyncRuntime, TenantKeys,
};

/// Stand-in for a real rail client: returns a fixed set of bills.
struct DemoRail;

#[async_trait]
impl RailGateway for DemoRail {
    fn rail(&self) -> &str {
        "demo"
    }

    async fn fetch_remote(&self) -> Result<(Vec<RawRecord>, String), FetchError> {
        Ok((
            vec![
                RawRecord::new("bill-1", json!({"vendor": "Office Supply Co", "total": 125.50})),
                RawRecord::new("bill-2", json!({"vendor": "Cloud Hosting Inc", "total": 42.00})),
            ],
            "demo-v1".to_string(),
        ))
    }

    async fn call_remote(
        &self,
        _operation: &str,
        payload: &Value,
    ) -> Result<RawRecord, RemoteWriteError> {
        Ok(RawRecord::new("bill-1", payload.clone()))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut runtime = SyncRuntime::new(MirrorSyncConfig::default());
    runtime.start().await.expect("Failed to start runtime");
    let orchestrator = runtime.orchestrator().expect("Runtime is ready");

    let tenant = TenantKeys::new("org-42", "realm-7");
    let gateway: Arc<dyn RailGateway> = Arc::new(DemoRail);

    // Cold mirror: this triggers a fetch
    let outcome = orchestrator
        .read_refresh("bills", &tenant, FreshnessHint::CachedOk, Arc::clone(&gateway))
        .await;
    println!("first read: {} ({} rows)", outcome.label(), outcome.records().len());

    // Warm mirror: served without touching the rail
    let outcome = orchestrator
        .read_refresh("bills", &tenant, FreshnessHint::CachedOk, Arc::clone(&gateway))
        .await;
    println!("second read: {} ({} rows)", outcome.label(), outcome.records().len());
    for record in outcome.records() {
        println!("  {}: {}", record.entity_id, record.payload);
    }

    // Idempotent write: the duplicate replays without a second rail call
    let payload = json!({"vendor": "Office Supply Co", "total": 130.00});
    let first = orchestrator
        .write_idempotent("bills", "update_bill", &tenant, payload.clone(), Arc::clone(&gateway))
        .await
        .expect("write failed");
    let second = orchestrator
        .write_idempotent("bills", "update_bill", &tenant, payload, gateway)
        .await
        .expect("write failed");
    println!(
        "write: replayed first={} second={}",
        first.replayed, second.replayed
    );

    runtime.shutdown();
}
