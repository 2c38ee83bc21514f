use tracing::debug;

use crate::onefs::types::{DatasetEntry, DatasetInfo, WorkloadStat};

/// Null sink: accepts everything and throws it away.
#[derive(Debug, Default)]
pub struct DiscardSink {
    cluster_name: String,
}

impl DiscardSink {
    pub fn new(cluster_name: &str) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
        }
    }

    pub fn update_datasets(&mut self, _info: &DatasetInfo) {}

    pub fn write_stats(&self, ds: &DatasetEntry, stats: &[WorkloadStat]) {
        debug!(
            cluster = %self.cluster_name,
            dataset = %ds.name,
            count = stats.len(),
            "discarding stats",
        );
    }
}
