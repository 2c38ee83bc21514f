//! Conversion of workload stats into field/tag form shared by every sink,
//! plus the per-process NFS export path cache.

use std::collections::HashMap;

use tracing::{debug, error};

use crate::error::{CollectorError, Result};
use crate::onefs::types::WorkloadStat;
use crate::onefs::Cluster;

/// Names of the performance statistics every partitioned-performance
/// workload entry carries, in canonical order.
pub const FIXED_FIELDS: [&str; 11] = [
    "bytes_in",
    "bytes_out",
    "reads",
    "writes",
    "ops",
    "l2",
    "l3",
    "cpu",
    "latency_read",
    "latency_write",
    "latency_other",
];

/// The five overflow buckets workloads are rolled up into when they do
/// not match the dataset's declared breakout.
pub const OVERFLOW_BUCKETS: [&str; 5] =
    ["Additional", "Excluded", "Overaccounted", "System", "Unknown"];

/// Marker for a workload exempted from overflow aggregation. A pinned
/// workload is a regular sample with an extra label, not a bucket.
pub const PINNED_WORKLOAD: &str = "Pinned";

/// Whether a workload_type value names one of the overflow buckets.
pub fn is_overflow_bucket(workload_type: &str) -> bool {
    OVERFLOW_BUCKETS.contains(&workload_type)
}

/// Extract the eleven required numeric fields from a workload entry.
///
/// A missing field breaks the API contract and is fatal rather than
/// skippable.
pub fn fields_for(stat: &WorkloadStat) -> Result<Vec<(&'static str, f64)>> {
    let values = [
        ("bytes_in", stat.bytes_in),
        ("bytes_out", stat.bytes_out),
        ("reads", stat.reads),
        ("writes", stat.writes),
        ("ops", stat.ops),
        ("l2", stat.l2),
        ("l3", stat.l3),
        ("cpu", stat.cpu),
        ("latency_read", stat.latency_read),
        ("latency_write", stat.latency_write),
        ("latency_other", stat.latency_other),
    ];

    values
        .into_iter()
        .map(|(name, value)| {
            value.map(|v| (name, v)).ok_or_else(|| {
                CollectorError::DataInvariant(format!(
                    "required field {name} missing from workload entry (node {}, time {})",
                    stat.node, stat.unix_time
                ))
            })
        })
        .collect()
}

/// Dissect a workload entry into the tags matching its dataset's workload
/// definition, squashing the alternate identity forms (name over numeric
/// id over SID, local/remote name over address, zone name over id).
pub fn tags_for(stat: &WorkloadStat) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    let mut tag = |key: &str, value: String| {
        tags.insert(key.to_string(), value);
    };

    if let Some(id) = stat.export_id {
        tag("export_id", id.to_string());
    }

    if let Some(name) = &stat.group_name {
        tag("groupname", format!("GID:{name}"));
    } else if let Some(gid) = stat.group_id {
        tag("groupname", format!("GID:{gid}"));
    } else if let Some(sid) = &stat.group_sid {
        tag("groupname", format!("SID:{sid}"));
    }

    if let Some(name) = &stat.local_name {
        tag("local_address", name.clone());
    } else if let Some(addr) = &stat.local_address {
        tag("local_address", addr.clone());
    }

    if let Some(path) = &stat.path {
        tag("path", path.clone());
    }

    if let Some(protocol) = &stat.protocol {
        tag("protocol", protocol.clone());
    }

    if let Some(name) = &stat.remote_name {
        tag("remote_address", name.clone());
    } else if let Some(addr) = &stat.remote_address {
        tag("remote_address", addr.clone());
    }

    if let Some(share) = &stat.share_name {
        tag("share_name", share.clone());
    }

    if let Some(name) = &stat.username {
        tag("username", name.clone());
    } else if let Some(uid) = stat.user_id {
        tag("username", format!("UID:{uid}"));
    } else if let Some(sid) = &stat.user_sid {
        tag("username", format!("SID:{sid}"));
    }

    if let Some(zone) = &stat.zone_name {
        tag("zone_name", zone.clone());
    } else if let Some(id) = stat.zone_id {
        tag("zone_name", format!("zone:{id}"));
    }

    if let Some(wt) = &stat.workload_type {
        tag("workload_type", wt.clone());
    }

    // System-dataset extras: process/service name and job-engine job tag.
    if let Some(name) = &stat.system_name {
        tag("system_name", name.clone());
    }
    if let Some(job) = &stat.job_type {
        tag("job_type", job.clone());
    }

    if let Some(domain) = &stat.domain_id {
        tag("domain_id", domain.clone());
    }
    if let Some(id) = stat.workload_id {
        tag("workload_id", id.to_string());
    }

    tags
}

/// Placeholder tag value used when an export path lookup fails.
pub const EXPORT_PATH_UNKNOWN: &str = "unknown (lookup failed)";

/// Lazily-populated map of NFS export id to filesystem path.
///
/// A path is resolved via the API at most once per process lifetime and
/// never invalidated; a failed lookup yields a placeholder and is
/// retried the next time the id appears.
#[derive(Debug)]
pub struct ExportPathCache {
    enabled: bool,
    path_by_id: HashMap<i64, String>,
}

impl ExportPathCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            path_by_id: HashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Resolve an export id to its path, hitting the API only on the
    /// first sighting of an id.
    pub async fn resolve(&mut self, id: i64, cluster: &mut Cluster) -> String {
        if let Some(path) = self.path_by_id.get(&id) {
            return path.clone();
        }

        match cluster.get_export_path(id).await {
            Ok(path) => {
                debug!(export_id = id, path = %path, "resolved export path");
                self.path_by_id.insert(id, path.clone());
                path
            }
            Err(e) => {
                error!(export_id = id, error = %e, "failed to look up export path");
                EXPORT_PATH_UNKNOWN.to_string()
            }
        }
    }

    /// Annotate a tag map with the export path when lookup is enabled and
    /// the workload carries an export id.
    pub async fn annotate(
        &mut self,
        tags: &mut HashMap<String, String>,
        stat: &WorkloadStat,
        cluster: &mut Cluster,
    ) {
        if !self.enabled {
            return;
        }
        if let Some(id) = stat.export_id {
            let path = self.resolve(id, cluster).await;
            tags.insert("export_path".to_string(), path);
        }
    }

    #[cfg(test)]
    pub fn insert_for_test(&mut self, id: i64, path: &str) {
        self.path_by_id.insert(id, path.to_string());
    }
}
