//! Stat sinks: a closed set of back ends selected by configuration.

pub mod discard;
pub mod influx;
pub mod prom;

use crate::config::{Config, SinkKind};
use crate::error::{CollectorError, Result};
use crate::onefs::types::{DatasetEntry, DatasetInfo, WorkloadStat};
use crate::onefs::Cluster;
use crate::retry::RetryLimit;

use self::discard::DiscardSink;
use self::influx::{InfluxSettings, InfluxSink};
use self::prom::http::ListenerSettings;
use self::prom::PromSink;

/// Sink dispatches stats to the configured back end.
///
/// Enum dispatch keeps the variant set closed and avoids boxed futures
/// on the write path.
pub enum Sink {
    Discard(DiscardSink),
    Influx(InfluxSink),
    Prometheus(PromSink),
}

impl Sink {
    /// Returns the sink's name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Discard(_) => "discard",
            Self::Influx(_) => "influxdb",
            Self::Prometheus(_) => "prometheus",
        }
    }

    /// Initialize the sink. Only the pull sink has startup work (its
    /// scrape listener).
    pub async fn start(&mut self) -> Result<()> {
        match self {
            Self::Discard(_) | Self::Influx(_) => Ok(()),
            Self::Prometheus(s) => s.start().await,
        }
    }

    /// Update the sink's view of the defined datasets.
    pub fn update_datasets(&mut self, info: &DatasetInfo) {
        match self {
            Self::Discard(s) => s.update_datasets(info),
            Self::Influx(s) => s.update_datasets(info),
            Self::Prometheus(s) => s.update_datasets(info),
        }
    }

    /// Hand one dataset's worth of stats to the back end.
    pub async fn write_stats(
        &mut self,
        cluster: &mut Cluster,
        ds: &DatasetEntry,
        stats: &[WorkloadStat],
    ) -> Result<()> {
        match self {
            Self::Discard(s) => {
                s.write_stats(ds, stats);
                Ok(())
            }
            Self::Influx(s) => s.write_stats(cluster, ds, stats).await,
            Self::Prometheus(s) => s.write_stats(cluster, ds, stats).await,
        }
    }
}

/// Build the configured sink for one cluster.
pub fn build_sink(cfg: &Config, cluster_index: usize, cluster_name: &str) -> Result<Sink> {
    match cfg.global.processor {
        SinkKind::Discard => Ok(Sink::Discard(DiscardSink::new(cluster_name))),
        SinkKind::Influxdb => {
            let ic = &cfg.influxdb;
            let sink = InfluxSink::new(
                cluster_name,
                InfluxSettings {
                    host: ic.host.clone(),
                    port: ic.port,
                    database: ic.database.clone(),
                    username: ic.username.clone(),
                    password: ic.password.clone(),
                },
                cfg.global.lookup_export_ids,
                RetryLimit::new(cfg.global.write_retries),
            )?;
            Ok(Sink::Influx(sink))
        }
        SinkKind::Prometheus => {
            let cluster_cfg = &cfg.clusters[cluster_index];
            let port = cluster_cfg.prometheus_port.ok_or_else(|| {
                CollectorError::Config(format!(
                    "prometheus sink initialization failed: missing port definition for cluster {}",
                    cluster_cfg.hostname
                ))
            })?;

            let pc = &cfg.prometheus;
            let mut listener = ListenerSettings {
                port,
                tls_cert: pc.tls_cert.clone(),
                tls_key: pc.tls_key.clone(),
                ..ListenerSettings::default()
            };
            if pc.authenticated {
                listener.basic_username = Some(pc.username.clone());
                listener.basic_password = Some(pc.password.clone());
            }

            Ok(Sink::Prometheus(PromSink::new(
                cluster_name,
                listener,
                cfg.global.lookup_export_ids,
                cfg.global.poll_interval,
            )))
        }
    }
}
