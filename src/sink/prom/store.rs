//! In-memory pull-scraped series store with per-series expiration.
//!
//! Writer side is the owning cluster worker upserting samples; reader
//! side is the scrape handler taking a snapshot. Both go through one
//! mutex and never see the raw series map.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::proto;

/// The current value of one series, replaced wholesale on each recording.
#[derive(Debug, Clone)]
struct Sample {
    labels: HashMap<String, String>,
    value: f64,
    /// Source timestamp from the cluster, not scrape time.
    timestamp_ms: i64,
    expires_at: Instant,
}

/// A named family of samples keyed by label fingerprint, with usage
/// counts for every label key seen on its samples.
#[derive(Debug, Default)]
struct Family {
    help: String,
    samples: HashMap<String, Sample>,
    label_usage: HashMap<String, i64>,
}

/// Pull-collected metric store.
#[derive(Debug, Default)]
pub struct MetricStore {
    families: Mutex<HashMap<String, Family>>,
}

/// Deterministic, insertion-order-independent identity of a label map:
/// sorted `key=value` pairs joined with commas.
pub fn fingerprint(labels: &HashMap<String, String>) -> String {
    let mut pairs: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort_unstable();
    pairs.join(",")
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a sample into the named family under its label fingerprint.
    ///
    /// Every label key on the sample bumps the family's usage counter;
    /// distinct samples in one family may carry different label subsets.
    pub fn record_sample(
        &self,
        family: &str,
        help: &str,
        labels: HashMap<String, String>,
        value: f64,
        timestamp: SystemTime,
        ttl: Duration,
    ) {
        let timestamp_ms = timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let mut families = self.families.lock();
        let fam = families.entry(family.to_string()).or_insert_with(|| Family {
            help: help.to_string(),
            ..Family::default()
        });

        for key in labels.keys() {
            *fam.label_usage.entry(key.clone()).or_insert(0) += 1;
        }

        let id = fingerprint(&labels);
        fam.samples.insert(
            id,
            Sample {
                labels,
                value,
                timestamp_ms,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop expired samples, decrementing their labels' usage counts,
    /// and drop families left empty. Caller holds the lock.
    fn expire(families: &mut HashMap<String, Family>, now: Instant) {
        families.retain(|_, fam| {
            let expired: Vec<String> = fam
                .samples
                .iter()
                .filter(|(_, sample)| sample.expires_at <= now)
                .map(|(id, _)| id.clone())
                .collect();

            for id in expired {
                if let Some(sample) = fam.samples.remove(&id) {
                    for key in sample.labels.keys() {
                        if let Some(count) = fam.label_usage.get_mut(key) {
                            *count -= 1;
                        }
                    }
                }
            }

            !fam.samples.is_empty()
        });
    }

    /// Expire, then emit one exposition record per remaining sample.
    ///
    /// A family exposes the label keys with positive usage count; a
    /// sample lacking one of them gets the empty string for it.
    pub fn snapshot(&self) -> Vec<proto::MetricFamily> {
        let mut families = self.families.lock();
        Self::expire(&mut families, Instant::now());

        let mut out = Vec::with_capacity(families.len());
        let mut names: Vec<&String> = families.keys().collect();
        names.sort_unstable();

        for name in names {
            let fam = &families[name];

            let mut label_names: Vec<&String> = fam
                .label_usage
                .iter()
                .filter(|(_, &count)| count > 0)
                .map(|(key, _)| key)
                .collect();
            label_names.sort_unstable();

            let mut mf = proto::MetricFamily::default();
            mf.set_name(name.clone());
            mf.set_help(fam.help.clone());
            mf.set_field_type(proto::MetricType::GAUGE);

            for sample in fam.samples.values() {
                let mut metric = proto::Metric::default();
                for label in &label_names {
                    let mut pair = proto::LabelPair::default();
                    pair.set_name((*label).clone());
                    pair.set_value(sample.labels.get(*label).cloned().unwrap_or_default());
                    metric.mut_label().push(pair);
                }
                let mut gauge = proto::Gauge::default();
                gauge.set_value(sample.value);
                metric.set_gauge(gauge);
                metric.set_timestamp_ms(sample.timestamp_ms);
                mf.mut_metric().push(metric);
            }

            out.push(mf);
        }

        out
    }

    /// Number of live samples in the named family, for tests and logs.
    pub fn sample_count(&self, family: &str) -> usize {
        self.families
            .lock()
            .get(family)
            .map(|fam| fam.samples.len())
            .unwrap_or(0)
    }
}

/// Adapter exposing a `MetricStore` through the prometheus `Collector`
/// capability so it can sit in a `Registry` next to ordinary metrics.
pub struct StoreCollector {
    store: std::sync::Arc<MetricStore>,
    desc: Desc,
}

impl StoreCollector {
    pub fn new(store: std::sync::Arc<MetricStore>) -> Self {
        let desc = Desc::new(
            "isilon_ppstat".to_string(),
            "partitioned performance statistics".to_string(),
            Vec::new(),
            HashMap::new(),
        )
        .expect("static descriptor is valid");
        Self { store, desc }
    }
}

impl Collector for StoreCollector {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        self.store.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ts(unix: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(unix)
    }

    const TTL: Duration = Duration::from_secs(30);

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = labels(&[("cluster", "c1"), ("node", "2"), ("protocol", "nfs")]);
        let mut b = HashMap::new();
        b.insert("protocol".to_string(), "nfs".to_string());
        b.insert("node".to_string(), "2".to_string());
        b.insert("cluster".to_string(), "c1".to_string());

        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a), "cluster=c1,node=2,protocol=nfs");
    }

    #[test]
    fn test_record_then_snapshot_yields_one_record() {
        let store = MetricStore::new();
        let l = labels(&[("cluster", "c1"), ("node", "1")]);

        store.record_sample("fam_ops", "ops", l.clone(), 5.0, ts(1000), TTL);
        // Re-record under the same fingerprint: latest value wins.
        store.record_sample("fam_ops", "ops", l, 7.0, ts(1030), TTL);

        let families = store.snapshot();
        assert_eq!(families.len(), 1);
        let metrics = families[0].get_metric();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].get_gauge().get_value(), 7.0);
        assert_eq!(metrics[0].get_timestamp_ms(), 1_030_000);
    }

    #[test]
    fn test_snapshot_uses_source_timestamp() {
        let store = MetricStore::new();
        store.record_sample(
            "fam",
            "help",
            labels(&[("node", "1")]),
            1.0,
            ts(1_700_000_000),
            TTL,
        );

        let families = store.snapshot();
        assert_eq!(
            families[0].get_metric()[0].get_timestamp_ms(),
            1_700_000_000_000
        );
    }

    #[test]
    fn test_expired_samples_are_dropped_with_their_family() {
        let store = MetricStore::new();
        store.record_sample(
            "fam",
            "help",
            labels(&[("node", "1")]),
            1.0,
            ts(1000),
            Duration::ZERO,
        );

        assert_eq!(store.sample_count("fam"), 1);
        let families = store.snapshot();
        assert!(families.is_empty());
        assert_eq!(store.sample_count("fam"), 0);
    }

    #[test]
    fn test_expiry_decrements_label_usage() {
        let store = MetricStore::new();
        // One short-lived sample with a `protocol` label, one long-lived
        // sample without it, in the same family.
        store.record_sample(
            "fam",
            "help",
            labels(&[("node", "1"), ("protocol", "nfs")]),
            1.0,
            ts(1000),
            Duration::ZERO,
        );
        store.record_sample(
            "fam",
            "help",
            labels(&[("node", "2")]),
            2.0,
            ts(1000),
            TTL,
        );

        let families = store.snapshot();
        assert_eq!(families.len(), 1);
        let metrics = families[0].get_metric();
        assert_eq!(metrics.len(), 1);

        // `protocol` usage dropped to zero with the expired sample, so
        // the surviving record only exposes `node`.
        let names: Vec<&str> = metrics[0]
            .get_label()
            .iter()
            .map(|pair| pair.get_name())
            .collect();
        assert_eq!(names, vec!["node"]);
    }

    #[test]
    fn test_mixed_label_subsets_expose_union_with_empty_fill() {
        let store = MetricStore::new();
        store.record_sample(
            "fam",
            "help",
            labels(&[("node", "1"), ("protocol", "nfs")]),
            1.0,
            ts(1000),
            TTL,
        );
        store.record_sample(
            "fam",
            "help",
            labels(&[("node", "2")]),
            2.0,
            ts(1000),
            TTL,
        );

        let families = store.snapshot();
        let metrics = families[0].get_metric();
        assert_eq!(metrics.len(), 2);

        for metric in metrics {
            let pairs: HashMap<&str, &str> = metric
                .get_label()
                .iter()
                .map(|pair| (pair.get_name(), pair.get_value()))
                .collect();
            // Both records expose both keys; the sample without a
            // protocol carries the empty string.
            assert_eq!(pairs.len(), 2);
            if pairs["node"] == "2" {
                assert_eq!(pairs["protocol"], "");
            } else {
                assert_eq!(pairs["protocol"], "nfs");
            }
        }
    }

    #[test]
    fn test_registry_gathers_store_collector() {
        let store = std::sync::Arc::new(MetricStore::new());
        store.record_sample(
            "isilon_ppstat_protocol_ops",
            "ops",
            labels(&[("cluster", "c1")]),
            3.0,
            ts(1000),
            TTL,
        );

        let registry = prometheus::Registry::new();
        registry
            .register(Box::new(StoreCollector::new(store)))
            .expect("register collector");

        let families = registry.gather();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_name(), "isilon_ppstat_protocol_ops");
    }
}
