//! End-to-end checks of the pull sink: dataset snapshots in, workload
//! stats in, gathered families out.

use std::collections::HashMap;
use std::time::Duration;

use ppstats::error::CollectorError;
use ppstats::onefs::types::{DatasetEntry, DatasetInfo, WorkloadStat};
use ppstats::onefs::{AuthType, Cluster};
use ppstats::points::FIXED_FIELDS;
use ppstats::retry::RetryLimit;
use ppstats::sink::prom::http::ListenerSettings;
use ppstats::sink::prom::PromSink;

fn dataset(id: u32, metrics: &[&str]) -> DatasetEntry {
    DatasetEntry {
        id,
        name: format!("ds{id}"),
        creation_time: 1_000 + i64::from(id),
        metrics: metrics.iter().map(|m| m.to_string()).collect(),
        statkey: format!("cluster.performance.dataset.{id}"),
        filters: Vec::new(),
        workload_count: 0,
    }
}

fn snapshot_info(datasets: Vec<DatasetEntry>) -> DatasetInfo {
    let total = datasets.len() as u64;
    DatasetInfo { datasets, total }
}

fn full_stat() -> WorkloadStat {
    WorkloadStat {
        cpu: Some(1.5),
        ops: Some(10.0),
        reads: Some(3.0),
        writes: Some(4.0),
        bytes_in: Some(100.0),
        bytes_out: Some(200.0),
        l2: Some(0.5),
        l3: Some(0.25),
        latency_read: Some(12.0),
        latency_write: Some(9.0),
        latency_other: Some(1.0),
        node: 1,
        unix_time: 1_700_000_000,
        ..WorkloadStat::default()
    }
}

/// An unconnected session client; fine as long as export-id lookup
/// never fires.
fn offline_cluster() -> Cluster {
    Cluster::new(
        "cluster1.example.com",
        None,
        "admin",
        "secret",
        AuthType::Session,
        false,
        RetryLimit::new(1),
    )
    .expect("cluster")
}

fn sink() -> PromSink {
    PromSink::new(
        "c1",
        ListenerSettings::default(),
        false,
        Duration::from_secs(300),
    )
}

fn labels_of(metric: &prometheus::proto::Metric) -> HashMap<String, String> {
    metric
        .get_label()
        .iter()
        .map(|pair| (pair.get_name().to_string(), pair.get_value().to_string()))
        .collect()
}

#[tokio::test]
async fn regular_workload_produces_labeled_families() {
    let mut sink = sink();
    let mut cluster = offline_cluster();
    let ds = dataset(1, &["protocol"]);
    sink.update_datasets(&snapshot_info(vec![ds.clone()]));

    let mut stat = full_stat();
    stat.protocol = Some("nfs".to_string());

    sink.write_stats(&mut cluster, &ds, &[stat])
        .await
        .expect("write");

    let families = sink.store().snapshot();
    assert_eq!(families.len(), FIXED_FIELDS.len());

    let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
    for field in FIXED_FIELDS {
        let expected = format!("isilon_ppstat_protocol_{field}");
        assert!(names.contains(&expected.as_str()), "missing {expected}");
    }

    for family in &families {
        assert_eq!(family.get_metric().len(), 1);
        let metric = &family.get_metric()[0];
        let labels = labels_of(metric);
        assert_eq!(labels.get("cluster").map(String::as_str), Some("c1"));
        assert_eq!(labels.get("node").map(String::as_str), Some("1"));
        assert_eq!(labels.get("protocol").map(String::as_str), Some("nfs"));
        assert_eq!(labels.get("pinned").map(String::as_str), Some("false"));
        assert_eq!(labels.len(), 4);
        assert_eq!(metric.get_timestamp_ms(), 1_700_000_000_000);
    }

    let ops = families
        .iter()
        .find(|f| f.get_name() == "isilon_ppstat_protocol_ops")
        .expect("ops family");
    assert_eq!(ops.get_metric()[0].get_gauge().get_value(), 10.0);
}

#[tokio::test]
async fn overflow_bucket_drops_breakout_labels() {
    let mut sink = sink();
    let mut cluster = offline_cluster();
    let ds = dataset(1, &["protocol"]);
    sink.update_datasets(&snapshot_info(vec![ds.clone()]));

    let mut stat = full_stat();
    stat.workload_type = Some("System".to_string());
    // A bucket entry may still carry tag fields; they must not leak
    // into the exported labels.
    stat.protocol = Some("smb2".to_string());

    sink.write_stats(&mut cluster, &ds, &[stat])
        .await
        .expect("write");

    let families = sink.store().snapshot();
    assert_eq!(families.len(), FIXED_FIELDS.len());

    for family in &families {
        assert!(
            family.get_name().starts_with("isilon_ppstat_protocol_System_"),
            "unexpected family {}",
            family.get_name()
        );
        let labels = labels_of(&family.get_metric()[0]);
        assert_eq!(labels.get("cluster").map(String::as_str), Some("c1"));
        assert_eq!(labels.get("node").map(String::as_str), Some("1"));
        assert_eq!(labels.len(), 2);
    }
}

#[tokio::test]
async fn pinned_workload_is_regular_with_marker() {
    let mut sink = sink();
    let mut cluster = offline_cluster();
    let ds = dataset(1, &["username"]);
    sink.update_datasets(&snapshot_info(vec![ds.clone()]));

    let mut stat = full_stat();
    stat.workload_type = Some("Pinned".to_string());
    stat.username = Some("root".to_string());

    sink.write_stats(&mut cluster, &ds, &[stat])
        .await
        .expect("write");

    let families = sink.store().snapshot();
    assert_eq!(families.len(), FIXED_FIELDS.len());
    for family in &families {
        assert!(family.get_name().starts_with("isilon_ppstat_username_"));
        let labels = labels_of(&family.get_metric()[0]);
        assert_eq!(labels.get("pinned").map(String::as_str), Some("true"));
        assert_eq!(labels.get("username").map(String::as_str), Some("root"));
    }
}

#[tokio::test]
async fn unknown_workload_type_is_skipped() {
    let mut sink = sink();
    let mut cluster = offline_cluster();
    let ds = dataset(1, &["protocol"]);
    sink.update_datasets(&snapshot_info(vec![ds.clone()]));

    let mut bogus = full_stat();
    bogus.workload_type = Some("NotABucket".to_string());
    let mut good = full_stat();
    good.protocol = Some("nfs".to_string());

    sink.write_stats(&mut cluster, &ds, &[bogus, good])
        .await
        .expect("write");

    // Only the valid entry lands.
    let families = sink.store().snapshot();
    assert_eq!(families.len(), FIXED_FIELDS.len());
    for family in &families {
        assert_eq!(family.get_metric().len(), 1);
    }
}

#[tokio::test]
async fn missing_required_field_is_fatal() {
    let mut sink = sink();
    let mut cluster = offline_cluster();
    let ds = dataset(1, &["protocol"]);
    sink.update_datasets(&snapshot_info(vec![ds.clone()]));

    let mut stat = full_stat();
    stat.latency_other = None;

    let err = sink
        .write_stats(&mut cluster, &ds, &[stat])
        .await
        .expect_err("contract breach must not be silent");
    assert!(matches!(err, CollectorError::DataInvariant(_)));
}

#[tokio::test]
async fn recreated_dataset_uses_new_families() {
    let mut sink = sink();
    let mut cluster = offline_cluster();

    let ds = dataset(1, &["protocol"]);
    sink.update_datasets(&snapshot_info(vec![ds.clone()]));
    let mut stat = full_stat();
    stat.protocol = Some("nfs".to_string());
    sink.write_stats(&mut cluster, &ds, &[stat])
        .await
        .expect("write");
    assert!(!sink.store().snapshot().is_empty());

    // Same id, new creation_time and a different breakout set.
    let mut replaced = dataset(1, &["username"]);
    replaced.creation_time = 9_999;
    sink.update_datasets(&snapshot_info(vec![replaced.clone()]));

    // Stats routed through the replaced definition use the new names;
    // the old families age out rather than being force-dropped, so
    // recording against the new definition must not touch them.
    let mut stat = full_stat();
    stat.username = Some("root".to_string());
    sink.write_stats(&mut cluster, &replaced, &[stat])
        .await
        .expect("write");

    let names: Vec<String> = sink
        .store()
        .snapshot()
        .iter()
        .map(|f| f.get_name().to_string())
        .collect();
    assert!(names
        .iter()
        .any(|n| n.starts_with("isilon_ppstat_username_")));
}

#[tokio::test]
async fn stats_for_undefined_dataset_are_dropped() {
    let mut sink = sink();
    let mut cluster = offline_cluster();
    sink.update_datasets(&snapshot_info(vec![dataset(1, &["protocol"])]));

    let other = dataset(3, &["path"]);
    sink.write_stats(&mut cluster, &other, &[full_stat()])
        .await
        .expect("dropped, not fatal");
    assert!(sink.store().snapshot().is_empty());
}
