use serde::Deserialize;

/// Metadata for a single partitioned-performance dataset definition.
///
/// Dataset id 0 is the built-in "System" dataset; ids 1..=4 are
/// user-defined on OneFS releases up to and including 9.6.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetEntry {
    pub id: u32,
    pub name: String,
    pub creation_time: i64,
    /// Ordered list of metric/tag names this dataset breaks out by.
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub statkey: String,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub workload_count: u64,
}

/// Response of the dataset-definition endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetInfo {
    pub datasets: Vec<DatasetEntry>,
    #[serde(default)]
    pub total: u64,
}

/// One workload entry from the partitioned-performance summary endpoint.
///
/// The eleven performance fields are guaranteed by the API contract;
/// they are still deserialized as `Option` so a contract breach is
/// detected at extraction time and reported as a `DataInvariant` error
/// rather than a generic decode failure. The identity/context fields
/// are genuinely optional and depend on the dataset definition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkloadStat {
    // Required performance metrics.
    pub cpu: Option<f64>,
    pub ops: Option<f64>,
    pub reads: Option<f64>,
    pub writes: Option<f64>,
    pub bytes_in: Option<f64>,
    pub bytes_out: Option<f64>,
    pub l2: Option<f64>,
    pub l3: Option<f64>,
    pub latency_read: Option<f64>,
    pub latency_write: Option<f64>,
    pub latency_other: Option<f64>,

    // Regular metadata.
    #[serde(default)]
    pub node: i64,
    #[serde(rename = "time", default)]
    pub unix_time: i64,

    // Optional workload identity/context.
    pub username: Option<String>,
    pub protocol: Option<String>,
    pub share_name: Option<String>,
    pub job_type: Option<String>,
    #[serde(rename = "groupname")]
    pub group_name: Option<String>,
    pub path: Option<String>,
    pub zone_name: Option<String>,
    pub domain_id: Option<String>,
    pub export_id: Option<i64>,
    pub user_id: Option<i64>,
    pub local_address: Option<String>,
    pub user_sid: Option<String>,
    #[serde(rename = "error")]
    pub error_string: Option<String>,
    pub remote_address: Option<String>,
    pub workload_type: Option<String>,
    pub group_sid: Option<String>,
    pub remote_name: Option<String>,
    pub system_name: Option<String>,
    pub zone_id: Option<i64>,
    pub workload_id: Option<i64>,
    pub local_name: Option<String>,
    pub group_id: Option<i64>,
}

/// Response of the workload summary endpoint.
#[derive(Debug, Deserialize)]
pub struct WorkloadQuery {
    #[serde(rename = "workload")]
    pub workloads: Vec<WorkloadStat>,
}
