//! Per-cluster collection worker: connect, then loop on a fixed cadence
//! fetching dataset definitions, synchronizing schema, collecting
//! stats, and handing them to the sink.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use crate::config::Config;
use crate::onefs::types::WorkloadStat;
use crate::onefs::Cluster;
use crate::retry::{Backoff, RetryLimit};
use crate::sink;

/// Run the collection loop for one configured cluster.
///
/// Returns when a fatal condition ends this worker; other clusters are
/// unaffected. There is no cancellation path into an in-flight retry or
/// sleep; a worker runs until a fatal error or process exit.
pub async fn run(cfg: Arc<Config>, cluster_index: usize) {
    let cluster_cfg = &cfg.clusters[cluster_index];

    let mut cluster = match Cluster::new(
        &cluster_cfg.hostname,
        cluster_cfg.port,
        &cluster_cfg.username,
        &cluster_cfg.password,
        cluster_cfg.auth_type,
        cluster_cfg.verify_ssl,
        RetryLimit::new(cfg.global.max_retries),
    ) {
        Ok(cluster) => cluster,
        Err(e) => {
            error!(cluster = %cluster_cfg.hostname, error = %e, "invalid cluster definition");
            return;
        }
    };

    if let Err(e) = cluster.connect().await {
        error!(cluster = %cluster_cfg.hostname, error = %e, "connection to cluster failed");
        return;
    }
    info!(
        cluster = %cluster.cluster_name,
        version = %cluster.os_version,
        "connected to cluster",
    );

    let mut sink = match sink::build_sink(&cfg, cluster_index, &cluster.cluster_name) {
        Ok(sink) => sink,
        Err(e) => {
            error!(cluster = %cluster, error = %e, "unable to initialize sink");
            return;
        }
    };
    if let Err(e) = sink.start().await {
        error!(cluster = %cluster, sink = sink.name(), error = %e, "unable to start sink");
        return;
    }

    info!(cluster = %cluster, sink = sink.name(), "starting stat collection loop");
    let interval = cfg.global.poll_interval;

    loop {
        let cycle_start = Instant::now();

        // Schema enumeration failure skips retry entirely: repeated
        // inability to list datasets means deeper breakage than a
        // transient read glitch.
        let info = match cluster.get_dataset_info().await {
            Ok(info) => info,
            Err(e) => {
                error!(
                    cluster = %cluster,
                    error = %e,
                    "unable to retrieve dataset information, bailing",
                );
                return;
            }
        };
        info!(cluster = %cluster, datasets = info.total, "got dataset definitions");

        sink.update_datasets(&info);

        for ds in &info.datasets {
            let stats = fetch_stats(&mut cluster, &ds.name).await;
            info!(
                cluster = %cluster,
                dataset = %ds.name,
                entries = stats.len(),
                "collected workload entries",
            );

            if let Err(e) = sink.write_stats(&mut cluster, ds, &stats).await {
                error!(
                    cluster = %cluster,
                    dataset = %ds.name,
                    error = %e,
                    "failed to write stats, stopping worker",
                );
                return;
            }
        }

        // Hold the fixed cadence measured from the cycle start; a cycle
        // that overran just starts the next one immediately.
        if let Some(remaining) = interval.checked_sub(cycle_start.elapsed()) {
            tokio::time::sleep(remaining).await;
        }
    }
}

/// Fetch one dataset's stats, retrying forever: a read failure is never
/// fatal for the worker.
async fn fetch_stats(cluster: &mut Cluster, dataset_name: &str) -> Vec<WorkloadStat> {
    let mut backoff = Backoff::read();
    let mut failures: u64 = 0;

    loop {
        match cluster.get_pp_stats(dataset_name).await {
            Ok(stats) => return stats,
            Err(e) => {
                failures += 1;
                let delay = backoff.next_delay();
                error!(
                    cluster = %cluster,
                    dataset = dataset_name,
                    error = %e,
                    failures,
                    retry_in = ?delay,
                    "failed to retrieve pp stats, retrying",
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
