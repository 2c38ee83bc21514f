//! Pull-style sink: records workload stats into the metric store and
//! serves them to scrapers.

pub mod http;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use prometheus::Registry;
use tracing::{error, info, warn};

use crate::error::{CollectorError, Result};
use crate::onefs::types::{DatasetEntry, DatasetInfo, WorkloadStat};
use crate::onefs::Cluster;
use crate::points::{
    fields_for, is_overflow_bucket, tags_for, ExportPathCache, FIXED_FIELDS, OVERFLOW_BUCKETS,
    PINNED_WORKLOAD,
};
use crate::schema::{self, SchemaEvent, SYSTEM_DATASET_ID};

use self::http::ListenerSettings;
use self::store::MetricStore;

const NAMESPACE: &str = "isilon";
const BASE_NAME: &str = "ppstat";

/// Name and help text of one exported metric family.
#[derive(Debug, Clone)]
struct FamilyMeta {
    name: String,
    help: String,
}

/// Per-dataset exported family names, rebuilt from scratch on every
/// schema create event.
#[derive(Debug)]
struct DatasetMetrics {
    entry: DatasetEntry,
    /// Declared breakout labels, including `export_path` when export-id
    /// lookup is enabled.
    labels: Vec<String>,
    /// Field key (`<field>` or `<bucket>_<field>`) to family metadata.
    families: HashMap<String, FamilyMeta>,
}

impl DatasetMetrics {
    fn new(mut entry: DatasetEntry, lookup_exports: bool) -> Self {
        if lookup_exports
            && entry.metrics.iter().any(|m| m == "export_id")
            && !entry.metrics.iter().any(|m| m == "export_path")
        {
            entry.metrics.push("export_path".to_string());
        }

        let mut sorted = entry.metrics.clone();
        sorted.sort_unstable();
        let mut basename = format!("{NAMESPACE}_{BASE_NAME}");
        for metric in &sorted {
            basename.push('_');
            basename.push_str(metric);
        }

        let mut families = HashMap::new();
        // Overflow buckets aggregate multiple workloads, so they do not
        // carry the dataset's declared breakout labels.
        for bucket in OVERFLOW_BUCKETS {
            for field in FIXED_FIELDS {
                let key = format!("{bucket}_{field}");
                families.insert(
                    key.clone(),
                    FamilyMeta {
                        name: format!("{basename}_{key}"),
                        help: format!(
                            "pp dataset {}, overflow bucket {bucket}, metric {field}",
                            entry.id
                        ),
                    },
                );
            }
        }
        for field in FIXED_FIELDS {
            families.insert(
                field.to_string(),
                FamilyMeta {
                    name: format!("{basename}_{field}"),
                    help: format!("pp dataset {}, metric {field}", entry.id),
                },
            );
        }

        let labels = entry.metrics.clone();
        Self {
            entry,
            labels,
            families,
        }
    }
}

/// Prometheus pull sink for one cluster.
pub struct PromSink {
    cluster_name: String,
    store: Arc<MetricStore>,
    datasets: HashMap<u32, DatasetMetrics>,
    previous: Option<HashMap<u32, DatasetEntry>>,
    exports: ExportPathCache,
    sample_ttl: Duration,
    listener: ListenerSettings,
}

impl PromSink {
    pub fn new(
        cluster_name: &str,
        listener: ListenerSettings,
        lookup_export_ids: bool,
        sample_ttl: Duration,
    ) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            store: Arc::new(MetricStore::new()),
            datasets: HashMap::new(),
            previous: None,
            exports: ExportPathCache::new(lookup_export_ids),
            sample_ttl,
            listener,
        }
    }

    /// Register the store with a fresh registry and start the scrape
    /// listener.
    pub async fn start(&mut self) -> Result<()> {
        let registry = Registry::new();
        registry
            .register(Box::new(store::StoreCollector::new(Arc::clone(
                &self.store,
            ))))
            .map_err(|e| CollectorError::Config(format!("registering collector: {e}")))?;

        http::spawn(self.listener.clone(), registry).await?;
        Ok(())
    }

    /// Apply a fresh dataset snapshot, rebuilding per-dataset families
    /// purely from the synchronizer's event stream.
    pub fn update_datasets(&mut self, info: &DatasetInfo) {
        for event in schema::diff(self.previous.as_ref(), &info.datasets) {
            match event {
                SchemaEvent::Created(entry) => {
                    info!(
                        cluster = %self.cluster_name,
                        dataset = entry.id,
                        name = %entry.name,
                        "creating dataset families",
                    );
                    self.datasets.insert(
                        entry.id,
                        DatasetMetrics::new(entry, self.exports.enabled()),
                    );
                }
                SchemaEvent::Deleted(id) => {
                    info!(
                        cluster = %self.cluster_name,
                        dataset = id,
                        "dropping dataset families",
                    );
                    self.datasets.remove(&id);
                }
            }
        }

        // The System dataset sits outside the event stream: it is set up
        // once on first sight and assumed immutable thereafter.
        if let Some(system) = info
            .datasets
            .iter()
            .find(|ds| ds.id == SYSTEM_DATASET_ID)
        {
            match self.datasets.get(&SYSTEM_DATASET_ID) {
                None => {
                    self.datasets.insert(
                        SYSTEM_DATASET_ID,
                        DatasetMetrics::new(system.clone(), self.exports.enabled()),
                    );
                }
                Some(existing) if existing.entry.creation_time != system.creation_time => {
                    warn!(
                        cluster = %self.cluster_name,
                        "System dataset definition changed, keeping the original",
                    );
                }
                Some(_) => {}
            }
        }

        self.previous = Some(
            info.datasets
                .iter()
                .map(|ds| (ds.id, ds.clone()))
                .collect(),
        );
    }

    /// Record one round of workload stats for a dataset into the store.
    pub async fn write_stats(
        &mut self,
        cluster: &mut Cluster,
        ds: &DatasetEntry,
        stats: &[WorkloadStat],
    ) -> Result<()> {
        let Some(dsm) = self.datasets.get(&ds.id) else {
            warn!(
                cluster = %self.cluster_name,
                dataset = ds.id,
                "stats arrived for an unknown dataset, dropping",
            );
            return Ok(());
        };
        for stat in stats {
            let fields = fields_for(stat)?;
            let mut tags = tags_for(stat);
            self.exports.annotate(&mut tags, stat, cluster).await;

            let mut labels = HashMap::new();
            labels.insert("cluster".to_string(), self.cluster_name.clone());
            labels.insert("node".to_string(), stat.node.to_string());

            // Pinned is effectively a regular stat gather, not a bucket;
            // it only gains a marker label.
            let workload_type = stat.workload_type.as_deref();
            let bucket = match workload_type {
                Some(wt) if wt != PINNED_WORKLOAD => {
                    if !is_overflow_bucket(wt) {
                        error!(
                            cluster = %self.cluster_name,
                            workload_type = wt,
                            "invalid workload type in output, ignoring entry",
                        );
                        continue;
                    }
                    Some(wt)
                }
                _ => None,
            };

            if bucket.is_none() {
                for label in &dsm.labels {
                    labels.insert(
                        label.clone(),
                        tags.get(label).cloned().unwrap_or_default(),
                    );
                }
                let pinned = workload_type == Some(PINNED_WORKLOAD);
                labels.insert("pinned".to_string(), pinned.to_string());
            }

            let timestamp = UNIX_EPOCH + Duration::from_secs(stat.unix_time.max(0) as u64);

            for (field, value) in fields {
                let key = match bucket {
                    Some(bucket) => format!("{bucket}_{field}"),
                    None => field.to_string(),
                };
                let Some(meta) = dsm.families.get(&key) else {
                    // Families cover every bucket/field combination, so
                    // this would mean a bug in DatasetMetrics::new.
                    error!(key = %key, "no family registered for field key");
                    continue;
                };
                self.store.record_sample(
                    &meta.name,
                    &meta.help,
                    labels.clone(),
                    value,
                    timestamp,
                    self.sample_ttl,
                );
            }
        }

        Ok(())
    }

    /// Shared handle to the store, for scrape-side wiring and tests.
    pub fn store(&self) -> Arc<MetricStore> {
        Arc::clone(&self.store)
    }
}
