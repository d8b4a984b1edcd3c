// Collector module - orchestrates one collection run per array
//
// A run sequences: provision destinations -> array-level stats (dual write)
// -> alert messages -> audit entries -> per-volume stats. The run owns the
// shared query timestamp and the array context; failure scoping follows the
// unit of work (provisioning and the array-level fetch abort the run, a bad
// alert, audit entry or volume is logged and counted without blocking the
// rest).

pub mod enrich;
pub mod run;
pub mod schema;

use bson::Bson;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::client::{ArrayApi, ClientError, VolumeListing};
use crate::config::ArrayContext;
use crate::storage::{DocumentStore, StorageError};

use enrich::{add_capacity_fields, enrich, merge_overlay};
use run::CollectionRun;
use schema::{ARRAY_SCHEMA, AUDIT_SCHEMA, MESSAGE_SCHEMA, VOLUME_SCHEMA};

/// Errors that abort a collection run
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("failed to provision destinations: {0}")]
    Provision(#[source] StorageError),

    #[error("failed to fetch array statistics: {0}")]
    ArrayFetch(#[source] ClientError),

    #[error("array monitor endpoint returned an empty payload")]
    EmptyMonitorPayload,

    #[error("failed to persist array document: {0}")]
    ArrayPersist(#[source] StorageError),

    #[error("failed to encode document: {0}")]
    Encode(#[from] bson::ser::Error),
}

/// Outcome of one collection run
///
/// Partial success is expected: per-record failures and step-level listing
/// failures land here instead of aborting the run, and self-heal on the
/// scheduler's next cadence.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    /// The run's shared query timestamp
    pub timeofquery: String,

    /// Array performance documents written (daily + global)
    pub array_docs: usize,

    /// Alert message documents written
    pub alert_docs: usize,

    /// Audit log documents written
    pub audit_docs: usize,

    /// Per-volume performance documents written
    pub volume_docs: usize,

    /// Records dropped (fetch, derivation, encoding or write failures)
    pub records_skipped: usize,

    /// Steps whose listing fetch failed outright (alerts, audit, volumes)
    pub step_failures: Vec<String>,
}

impl RunSummary {
    /// Whether every record of the run was collected and stored.
    pub fn is_clean(&self) -> bool {
        self.records_skipped == 0 && self.step_failures.is_empty()
    }

    /// Total documents written across all kinds.
    pub fn total_docs(&self) -> usize {
        self.array_docs + self.alert_docs + self.audit_docs + self.volume_docs
    }
}

/// Orchestrates collection runs for a single array
pub struct ArrayCollector {
    /// Source API for the array being collected
    api: Arc<dyn ArrayApi>,

    /// Destination document store
    store: Arc<dyn DocumentStore>,

    /// Array identity and retention, immutable across the run
    context: ArrayContext,

    /// Prefix for destination collection names
    index_prefix: String,

    /// Bound on concurrent per-volume fetches
    volume_concurrency: usize,
}

impl ArrayCollector {
    /// Creates a collector for one array.
    pub fn new(
        api: Arc<dyn ArrayApi>,
        store: Arc<dyn DocumentStore>,
        context: ArrayContext,
        index_prefix: String,
        volume_concurrency: usize,
    ) -> Self {
        ArrayCollector {
            api,
            store,
            context,
            index_prefix,
            volume_concurrency: volume_concurrency.max(1),
        }
    }

    /// Performs one full collection run at the current wall-clock time.
    pub async fn collect(&self) -> Result<RunSummary, CollectError> {
        self.collect_at(Utc::now()).await
    }

    /// Performs one full collection run anchored at `now`.
    ///
    /// The shared query timestamp is captured here, once, before anything
    /// fans out; every document of the run carries this exact value.
    pub async fn collect_at(&self, now: DateTime<Utc>) -> Result<RunSummary, CollectError> {
        let run = CollectionRun::begin(&self.index_prefix, now);
        let mut summary = RunSummary {
            timeofquery: run.timeofquery.clone(),
            ..Default::default()
        };

        info!(
            "Starting collection run for array '{}' at {}",
            self.context.name, run.timeofquery
        );

        // Writes would fail against missing destinations, so a provisioning
        // failure ends the run before any fetch.
        self.provision(&run).await.map_err(CollectError::Provision)?;

        self.collect_array(&run, &mut summary).await?;

        if let Err(e) = self.collect_alerts(&run, &mut summary).await {
            warn!("Alert collection failed for '{}': {}", self.context.name, e);
            summary.step_failures.push(format!("alerts: {}", e));
        }

        if let Err(e) = self.collect_audit(&run, &mut summary).await {
            warn!("Audit collection failed for '{}': {}", self.context.name, e);
            summary.step_failures.push(format!("audit: {}", e));
        }

        if let Err(e) = self.collect_volumes(&run, &mut summary).await {
            warn!(
                "Volume collection failed for '{}': {}",
                self.context.name, e
            );
            summary.step_failures.push(format!("volumes: {}", e));
        }

        info!(
            "Run complete for '{}': {} document(s) written ({} array, {} alert, {} audit, {} volume), {} skipped",
            self.context.name,
            summary.total_docs(),
            summary.array_docs,
            summary.alert_docs,
            summary.audit_docs,
            summary.volume_docs,
            summary.records_skipped
        );

        Ok(summary)
    }

    /// Ensures all five destinations exist before any write.
    async fn provision(&self, run: &CollectionRun) -> Result<(), StorageError> {
        self.store
            .ensure_collection(&run.arrays_collection, &ARRAY_SCHEMA)
            .await?;
        self.store
            .ensure_collection(&run.vols_collection, &VOLUME_SCHEMA)
            .await?;
        self.store
            .ensure_collection(&run.msgs_collection, &MESSAGE_SCHEMA)
            .await?;
        self.store
            .ensure_collection(&run.audit_collection, &AUDIT_SCHEMA)
            .await?;

        // Non-time-partitioned stash of latest array state, same shape as
        // the daily array documents.
        self.store
            .ensure_collection(&run.global_arrays_collection, &ARRAY_SCHEMA)
            .await
    }

    /// Step 3: array-level stats, written to the daily collection and, keyed
    /// by array id, to the global latest-state collection.
    async fn collect_array(
        &self,
        run: &CollectionRun,
        summary: &mut RunSummary,
    ) -> Result<(), CollectError> {
        let mut record = self
            .api
            .array_monitor()
            .await
            .map_err(CollectError::ArrayFetch)?
            .into_iter()
            .next()
            .ok_or(CollectError::EmptyMonitorPayload)?;

        let space = self
            .api
            .array_space()
            .await
            .map_err(CollectError::ArrayFetch)?;

        // Space statistics are the authoritative overlay on key collision.
        merge_overlay(&mut record, space);

        let mut doc = enrich(record, &self.context, run, &ARRAY_SCHEMA, &[]);

        if let Err(e) = add_capacity_fields(&mut doc) {
            // A stored NaN or Infinity would poison dashboards; drop the
            // array document for this cycle and keep the run going.
            error!(
                "Skipping array document for '{}': {}",
                self.context.name, e
            );
            summary.records_skipped += 1;
            return Ok(());
        }

        let body = bson::to_document(&doc)?;

        self.store
            .write_document(
                &run.arrays_collection,
                ARRAY_SCHEMA.kind,
                body.clone(),
                None,
                self.context.data_ttl,
            )
            .await
            .map_err(CollectError::ArrayPersist)?;
        summary.array_docs += 1;

        // Same document, keyed by array id: each run overwrites the previous
        // latest-state record via the store's versioning. It carries the
        // same TTL as the time-series data, so an array that stops reporting
        // eventually drops out of the global view.
        self.store
            .write_document(
                &run.global_arrays_collection,
                ARRAY_SCHEMA.kind,
                body,
                Some(Bson::String(self.context.array_id.clone())),
                self.context.data_ttl,
            )
            .await
            .map_err(CollectError::ArrayPersist)?;
        summary.array_docs += 1;

        Ok(())
    }

    /// Step 4: recent alerts, keyed by the alert's own id for idempotent
    /// re-ingestion.
    async fn collect_alerts(
        &self,
        run: &CollectionRun,
        summary: &mut RunSummary,
    ) -> Result<(), ClientError> {
        let alerts = self.api.recent_messages().await?;

        for alert in alerts {
            let id = alert.id;
            let doc = enrich(
                alert.into_record(),
                &self.context,
                run,
                &MESSAGE_SCHEMA,
                &[],
            );

            match bson::to_document(&doc) {
                Ok(body) => {
                    let stored = self
                        .store
                        .write_document_safe(
                            &run.msgs_collection,
                            MESSAGE_SCHEMA.kind,
                            body,
                            Some(Bson::Int64(id)),
                            self.context.data_ttl,
                        )
                        .await;
                    if stored {
                        summary.alert_docs += 1;
                    } else {
                        summary.records_skipped += 1;
                    }
                }
                Err(e) => {
                    warn!("Failed to encode alert {}: {}", id, e);
                    summary.records_skipped += 1;
                }
            }
        }

        Ok(())
    }

    /// Step 5: audit log entries, keyed by the entry's own id.
    async fn collect_audit(
        &self,
        run: &CollectionRun,
        summary: &mut RunSummary,
    ) -> Result<(), ClientError> {
        let entries = self.api.audit_log().await?;

        for entry in entries {
            let id = entry.id;
            let doc = enrich(entry.into_record(), &self.context, run, &AUDIT_SCHEMA, &[]);

            match bson::to_document(&doc) {
                Ok(body) => {
                    let stored = self
                        .store
                        .write_document_safe(
                            &run.audit_collection,
                            AUDIT_SCHEMA.kind,
                            body,
                            Some(Bson::Int64(id)),
                            self.context.data_ttl,
                        )
                        .await;
                    if stored {
                        summary.audit_docs += 1;
                    } else {
                        summary.records_skipped += 1;
                    }
                }
                Err(e) => {
                    warn!("Failed to encode audit entry {}: {}", id, e);
                    summary.records_skipped += 1;
                }
            }
        }

        Ok(())
    }

    /// Step 6: per-volume stats, fetched with bounded concurrency.
    ///
    /// Volumes are fully independent units: one failing volume is logged
    /// and counted while the rest are still collected.
    async fn collect_volumes(
        &self,
        run: &CollectionRun,
        summary: &mut RunSummary,
    ) -> Result<(), ClientError> {
        let volumes = self.api.list_volumes().await?;

        let results: Vec<bool> = stream::iter(volumes)
            .map(|volume| self.collect_one_volume(run, volume))
            .buffer_unordered(self.volume_concurrency)
            .collect()
            .await;

        for stored in results {
            if stored {
                summary.volume_docs += 1;
            } else {
                summary.records_skipped += 1;
            }
        }

        Ok(())
    }

    /// Fetches, merges, enriches and persists one volume's document.
    /// Returns whether the document was stored.
    async fn collect_one_volume(&self, run: &CollectionRun, volume: VolumeListing) -> bool {
        let name = volume.name;

        let mut record = match self.api.volume_monitor(&name).await {
            Ok(records) => match records.into_iter().next() {
                Some(record) => record,
                None => {
                    warn!("Volume '{}' returned an empty monitor payload", name);
                    return false;
                }
            },
            Err(e) => {
                warn!("Failed to fetch monitor stats for volume '{}': {}", name, e);
                return false;
            }
        };

        let space = match self.api.volume_space(&name).await {
            Ok(space) => space,
            Err(e) => {
                warn!("Failed to fetch space stats for volume '{}': {}", name, e);
                return false;
            }
        };

        merge_overlay(&mut record, space);

        let doc = enrich(
            record,
            &self.context,
            run,
            &VOLUME_SCHEMA,
            &[("vol_name", &name)],
        );

        match bson::to_document(&doc) {
            Ok(body) => {
                self.store
                    .write_document_safe(
                        &run.vols_collection,
                        VOLUME_SCHEMA.kind,
                        body,
                        None,
                        self.context.data_ttl,
                    )
                    .await
            }
            Err(e) => {
                warn!("Failed to encode document for volume '{}': {}", name, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AlertRecord, AuditRecord};
    use crate::collector::enrich::StatsRecord;
    use crate::collector::schema::SchemaDescriptor;
    use async_trait::async_trait;
    use bson::Document;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    fn stats(value: Value) -> StatsRecord {
        value.as_object().unwrap().clone()
    }

    fn fetch_error(what: &str) -> ClientError {
        ClientError::MalformedPayload {
            path: what.to_string(),
            reason: "injected test failure".to_string(),
        }
    }

    /// Scripted array API: fixed payloads plus per-endpoint failure switches.
    #[derive(Default)]
    struct MockArrayApi {
        monitor: Vec<StatsRecord>,
        space: StatsRecord,
        alerts: Vec<AlertRecord>,
        audits: Vec<AuditRecord>,
        volumes: Vec<VolumeListing>,
        volume_stats: HashMap<String, StatsRecord>,
        failing_volumes: HashSet<String>,
        fail_alert_listing: bool,
    }

    impl MockArrayApi {
        fn with_array_stats(monitor: Value, space: Value) -> Self {
            MockArrayApi {
                monitor: vec![stats(monitor)],
                space: stats(space),
                ..Default::default()
            }
        }

        fn add_volume(&mut self, name: &str, monitor: Value) {
            self.volumes.push(VolumeListing {
                name: name.to_string(),
                extra: StatsRecord::new(),
            });
            self.volume_stats.insert(name.to_string(), stats(monitor));
        }
    }

    #[async_trait]
    impl ArrayApi for MockArrayApi {
        async fn array_monitor(&self) -> Result<Vec<StatsRecord>, ClientError> {
            Ok(self.monitor.clone())
        }

        async fn array_space(&self) -> Result<StatsRecord, ClientError> {
            Ok(self.space.clone())
        }

        async fn recent_messages(&self) -> Result<Vec<AlertRecord>, ClientError> {
            if self.fail_alert_listing {
                return Err(fetch_error("message?recent=true"));
            }
            Ok(self.alerts.clone())
        }

        async fn audit_log(&self) -> Result<Vec<AuditRecord>, ClientError> {
            Ok(self.audits.clone())
        }

        async fn list_volumes(&self) -> Result<Vec<VolumeListing>, ClientError> {
            Ok(self.volumes.clone())
        }

        async fn volume_monitor(&self, volume: &str) -> Result<Vec<StatsRecord>, ClientError> {
            if self.failing_volumes.contains(volume) {
                return Err(fetch_error(volume));
            }
            Ok(vec![self.volume_stats[volume].clone()])
        }

        async fn volume_space(&self, _volume: &str) -> Result<StatsRecord, ClientError> {
            Ok(StatsRecord::new())
        }
    }

    #[derive(Debug, Clone)]
    struct StoredDoc {
        kind: String,
        id: Option<Bson>,
        body: Document,
    }

    /// In-memory store with the same append/upsert semantics as MongoStore.
    #[derive(Default)]
    struct MemoryStore {
        collections: Mutex<HashMap<String, Vec<StoredDoc>>>,
        provisioned: Mutex<Vec<String>>,
        fail_provision: bool,
    }

    impl MemoryStore {
        fn docs(&self, collection: &str) -> Vec<StoredDoc> {
            self.collections
                .lock()
                .unwrap()
                .get(collection)
                .cloned()
                .unwrap_or_default()
        }

        fn all_docs(&self) -> Vec<StoredDoc> {
            self.collections
                .lock()
                .unwrap()
                .values()
                .flatten()
                .cloned()
                .collect()
        }

        fn provisioned(&self) -> Vec<String> {
            self.provisioned.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DocumentStore for MemoryStore {
        async fn ensure_collection(
            &self,
            name: &str,
            _schema: &SchemaDescriptor,
        ) -> Result<(), StorageError> {
            if self.fail_provision {
                return Err(StorageError::InvalidDocument(
                    "injected provisioning failure".to_string(),
                ));
            }
            self.provisioned.lock().unwrap().push(name.to_string());
            Ok(())
        }

        async fn write_document(
            &self,
            collection: &str,
            kind: &str,
            body: Document,
            id: Option<Bson>,
            _ttl: Duration,
        ) -> Result<(), StorageError> {
            let mut collections = self.collections.lock().unwrap();
            let docs = collections.entry(collection.to_string()).or_default();

            let doc = StoredDoc {
                kind: kind.to_string(),
                id: id.clone(),
                body,
            };

            if let Some(id) = id {
                if let Some(existing) = docs.iter_mut().find(|d| d.id.as_ref() == Some(&id)) {
                    *existing = doc;
                    return Ok(());
                }
            }
            docs.push(doc);
            Ok(())
        }
    }

    fn test_context() -> ArrayContext {
        ArrayContext {
            name: "array-1".to_string(),
            array_id: "abc123".to_string(),
            data_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }

    fn test_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 3, 14, 9, 26, 53).unwrap()
    }

    fn collector(api: MockArrayApi, store: Arc<MemoryStore>) -> ArrayCollector {
        ArrayCollector::new(
            Arc::new(api),
            store,
            test_context(),
            "pureelk".to_string(),
            4,
        )
    }

    fn test_alert(id: i64) -> AlertRecord {
        AlertRecord {
            id,
            category: "array".to_string(),
            current_severity: "warning".to_string(),
            component_name: "ct0".to_string(),
            component_type: "controller".to_string(),
            details: "test alert".to_string(),
            event: "failure".to_string(),
            actual: String::new(),
            expected: String::new(),
            extra: StatsRecord::new(),
        }
    }

    fn test_audit(id: i64) -> AuditRecord {
        AuditRecord {
            id,
            component_name: "admin".to_string(),
            component_type: "user".to_string(),
            details: "volume created".to_string(),
            event: "create".to_string(),
            user: "admin".to_string(),
            extra: StatsRecord::new(),
        }
    }

    #[tokio::test]
    async fn test_worked_example_array_dual_write() {
        let store = Arc::new(MemoryStore::default());
        let api =
            MockArrayApi::with_array_stats(json!({"capacity": 1000, "total": 400}), json!({}));

        let summary = collector(api, store.clone())
            .collect_at(test_now())
            .await
            .unwrap();

        assert_eq!(summary.array_docs, 2);

        let daily = store.docs("pureelk-arrays-2016-03-14");
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].kind, "arrayperf");
        assert_eq!(daily[0].id, None);
        assert_eq!(daily[0].body.get_i64("free").unwrap(), 600);
        assert_eq!(daily[0].body.get_f64("percent_free").unwrap(), 0.6);
        assert_eq!(daily[0].body.get_str("array_name").unwrap(), "array-1");
        assert_eq!(daily[0].body.get_str("array_id").unwrap(), "abc123");
        assert_eq!(daily[0].body.get_str("array_name_a").unwrap(), "array-1");

        let global = store.docs("pureelk-global-arrays");
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].id, Some(Bson::String("abc123".to_string())));
        assert_eq!(global[0].body.get_i64("free").unwrap(), 600);
    }

    #[tokio::test]
    async fn test_every_document_shares_the_run_timestamp() {
        let store = Arc::new(MemoryStore::default());
        let mut api =
            MockArrayApi::with_array_stats(json!({"capacity": 1000, "total": 400}), json!({}));
        api.alerts = vec![test_alert(1), test_alert(2)];
        api.audits = vec![test_audit(3)];
        api.add_volume("vol-1", json!({"reads_per_sec": 5}));
        api.add_volume("vol-2", json!({"reads_per_sec": 6}));

        let summary = collector(api, store.clone())
            .collect_at(test_now())
            .await
            .unwrap();

        let docs = store.all_docs();
        assert_eq!(docs.len(), summary.total_docs());
        assert_eq!(docs.len(), 7); // 2 array + 2 alert + 1 audit + 2 volume

        for doc in docs {
            assert_eq!(
                doc.body.get_str("timeofquery").unwrap(),
                summary.timeofquery,
                "document of kind '{}' has a diverging timestamp",
                doc.kind
            );
        }
    }

    #[tokio::test]
    async fn test_space_stats_override_monitor_stats() {
        let store = Arc::new(MemoryStore::default());
        let api = MockArrayApi::with_array_stats(
            json!({"capacity": 1000, "total": 999, "writes_per_sec": 10}),
            json!({"total": 400, "snapshots": 7}),
        );

        collector(api, store.clone())
            .collect_at(test_now())
            .await
            .unwrap();

        let daily = store.docs("pureelk-arrays-2016-03-14");
        // The space record's total wins, so free derives from 400.
        assert_eq!(daily[0].body.get_i64("total").unwrap(), 400);
        assert_eq!(daily[0].body.get_i64("free").unwrap(), 600);
        assert_eq!(daily[0].body.get_i64("snapshots").unwrap(), 7);
        assert_eq!(daily[0].body.get_i64("writes_per_sec").unwrap(), 10);
    }

    #[tokio::test]
    async fn test_zero_capacity_skips_array_doc_but_run_continues() {
        let store = Arc::new(MemoryStore::default());
        let mut api = MockArrayApi::with_array_stats(json!({"capacity": 0, "total": 0}), json!({}));
        api.alerts = vec![test_alert(1)];
        api.add_volume("vol-1", json!({"reads_per_sec": 5}));

        let summary = collector(api, store.clone())
            .collect_at(test_now())
            .await
            .unwrap();

        assert_eq!(summary.array_docs, 0);
        assert_eq!(summary.records_skipped, 1);
        assert!(store.docs("pureelk-arrays-2016-03-14").is_empty());
        assert!(store.docs("pureelk-global-arrays").is_empty());

        // Remaining steps still ran.
        assert_eq!(summary.alert_docs, 1);
        assert_eq!(summary.volume_docs, 1);
    }

    #[tokio::test]
    async fn test_alert_reingestion_overwrites_by_id() {
        let store = Arc::new(MemoryStore::default());

        for _ in 0..2 {
            let mut api =
                MockArrayApi::with_array_stats(json!({"capacity": 1000, "total": 400}), json!({}));
            api.alerts = vec![test_alert(42)];

            collector(api, store.clone())
                .collect_at(test_now())
                .await
                .unwrap();
        }

        let msgs = store.docs("pureelk-msgs-2016-03-14");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, Some(Bson::Int64(42)));
    }

    #[tokio::test]
    async fn test_global_doc_last_write_wins_across_runs() {
        let store = Arc::new(MemoryStore::default());

        let api1 =
            MockArrayApi::with_array_stats(json!({"capacity": 1000, "total": 400}), json!({}));
        collector(api1, store.clone())
            .collect_at(test_now())
            .await
            .unwrap();

        let api2 =
            MockArrayApi::with_array_stats(json!({"capacity": 1000, "total": 700}), json!({}));
        collector(api2, store.clone())
            .collect_at(test_now())
            .await
            .unwrap();

        // Two daily documents appended, one global document overwritten.
        assert_eq!(store.docs("pureelk-arrays-2016-03-14").len(), 2);

        let global = store.docs("pureelk-global-arrays");
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].body.get_i64("free").unwrap(), 300);
    }

    #[tokio::test]
    async fn test_one_failing_volume_does_not_block_the_rest() {
        let store = Arc::new(MemoryStore::default());
        let mut api =
            MockArrayApi::with_array_stats(json!({"capacity": 1000, "total": 400}), json!({}));
        api.add_volume("vol-1", json!({"reads_per_sec": 1}));
        api.add_volume("vol-2", json!({"reads_per_sec": 2}));
        api.add_volume("vol-3", json!({"reads_per_sec": 3}));
        api.failing_volumes.insert("vol-2".to_string());

        let summary = collector(api, store.clone())
            .collect_at(test_now())
            .await
            .unwrap();

        assert_eq!(summary.volume_docs, 2);
        assert_eq!(summary.records_skipped, 1);

        let vols = store.docs("pureelk-vols-2016-03-14");
        assert_eq!(vols.len(), 2);
        let names: Vec<&str> = vols
            .iter()
            .map(|d| d.body.get_str("vol_name").unwrap())
            .collect();
        assert!(names.contains(&"vol-1"));
        assert!(names.contains(&"vol-3"));
    }

    #[tokio::test]
    async fn test_volume_docs_carry_name_companions() {
        let store = Arc::new(MemoryStore::default());
        let mut api =
            MockArrayApi::with_array_stats(json!({"capacity": 1000, "total": 400}), json!({}));
        api.add_volume("vol-1", json!({"reads_per_sec": 1}));

        collector(api, store.clone())
            .collect_at(test_now())
            .await
            .unwrap();

        let vols = store.docs("pureelk-vols-2016-03-14");
        assert_eq!(vols[0].kind, "volperf");
        assert_eq!(vols[0].body.get_str("vol_name").unwrap(), "vol-1");
        assert_eq!(vols[0].body.get_str("vol_name_a").unwrap(), "vol-1");
        assert_eq!(vols[0].body.get_str("array_name_a").unwrap(), "array-1");
    }

    #[tokio::test]
    async fn test_provisioning_failure_aborts_the_run() {
        let store = Arc::new(MemoryStore {
            fail_provision: true,
            ..Default::default()
        });
        let api =
            MockArrayApi::with_array_stats(json!({"capacity": 1000, "total": 400}), json!({}));

        let result = collector(api, store.clone()).collect_at(test_now()).await;

        assert!(matches!(result, Err(CollectError::Provision(_))));
        assert!(store.all_docs().is_empty());
    }

    #[tokio::test]
    async fn test_provisions_all_five_destinations_before_writing() {
        let store = Arc::new(MemoryStore::default());
        let api =
            MockArrayApi::with_array_stats(json!({"capacity": 1000, "total": 400}), json!({}));

        collector(api, store.clone())
            .collect_at(test_now())
            .await
            .unwrap();

        let provisioned = store.provisioned();
        assert_eq!(provisioned.len(), 5);
        assert!(provisioned.contains(&"pureelk-arrays-2016-03-14".to_string()));
        assert!(provisioned.contains(&"pureelk-vols-2016-03-14".to_string()));
        assert!(provisioned.contains(&"pureelk-msgs-2016-03-14".to_string()));
        assert!(provisioned.contains(&"pureelk-audit-2016-03-14".to_string()));
        assert!(provisioned.contains(&"pureelk-global-arrays".to_string()));
    }

    #[tokio::test]
    async fn test_alert_listing_failure_is_contained() {
        let store = Arc::new(MemoryStore::default());
        let mut api =
            MockArrayApi::with_array_stats(json!({"capacity": 1000, "total": 400}), json!({}));
        api.fail_alert_listing = true;
        api.audits = vec![test_audit(9)];
        api.add_volume("vol-1", json!({"reads_per_sec": 1}));

        let summary = collector(api, store.clone())
            .collect_at(test_now())
            .await
            .unwrap();

        assert_eq!(summary.step_failures.len(), 1);
        assert!(summary.step_failures[0].starts_with("alerts:"));
        assert!(!summary.is_clean());

        // Later steps still ran.
        assert_eq!(summary.audit_docs, 1);
        assert_eq!(summary.volume_docs, 1);
    }

    #[tokio::test]
    async fn test_empty_listings_produce_a_clean_run() {
        let store = Arc::new(MemoryStore::default());
        let api =
            MockArrayApi::with_array_stats(json!({"capacity": 1000, "total": 400}), json!({}));

        let summary = collector(api, store.clone())
            .collect_at(test_now())
            .await
            .unwrap();

        assert!(summary.is_clean());
        assert_eq!(summary.total_docs(), 2);
        assert_eq!(summary.alert_docs, 0);
        assert_eq!(summary.audit_docs, 0);
        assert_eq!(summary.volume_docs, 0);
    }
}
