//! Push-style batch writer: InfluxDB line protocol over HTTP.
//!
//! The writer itself is a thin wrapper over measurement name, tag map,
//! field map and timestamp, and may fail transiently; the bounded retry
//! around each batch lives in `retry::retry_write`.

use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::{debug, info};

use crate::error::{CollectorError, Result};
use crate::onefs::types::{DatasetEntry, DatasetInfo, WorkloadStat};
use crate::onefs::Cluster;
use crate::points::{fields_for, tags_for, ExportPathCache};
use crate::retry::{retry_write, RetryLimit};

/// InfluxDB 1.x connection settings.
#[derive(Debug, Clone, Default)]
pub struct InfluxSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Push sink writing one batch of points per dataset collection.
pub struct InfluxSink {
    cluster_name: String,
    client: reqwest::Client,
    write_url: String,
    settings: InfluxSettings,
    exports: ExportPathCache,
    write_limit: RetryLimit,
}

impl InfluxSink {
    pub fn new(
        cluster_name: &str,
        settings: InfluxSettings,
        lookup_export_ids: bool,
        write_limit: RetryLimit,
    ) -> Result<Self> {
        if settings.host.is_empty() {
            return Err(CollectorError::Config(
                "influxdb host is not configured".into(),
            ));
        }
        if settings.database.is_empty() {
            return Err(CollectorError::Config(
                "influxdb database is not configured".into(),
            ));
        }

        let client = reqwest::Client::new();
        let write_url = format!(
            "http://{}:{}/write?db={}&precision=s",
            settings.host, settings.port, settings.database
        );

        Ok(Self {
            cluster_name: cluster_name.to_string(),
            client,
            write_url,
            settings,
            exports: ExportPathCache::new(lookup_export_ids),
            write_limit,
        })
    }

    pub fn update_datasets(&mut self, _info: &DatasetInfo) {}

    /// Convert one dataset's stats into line protocol and write the
    /// batch, retrying up to the configured write limit.
    pub async fn write_stats(
        &mut self,
        cluster: &mut Cluster,
        ds: &DatasetEntry,
        stats: &[WorkloadStat],
    ) -> Result<()> {
        let measurement = &ds.statkey;
        let mut body = String::new();

        for stat in stats {
            let fields = fields_for(stat)?;
            let mut tags = tags_for(stat);
            self.exports.annotate(&mut tags, stat, cluster).await;
            tags.insert("cluster".to_string(), self.cluster_name.clone());
            tags.insert("node".to_string(), stat.node.to_string());

            body.push_str(&encode_point(measurement, &tags, &fields, stat.unix_time));
            body.push('\n');
        }

        info!(
            cluster = %self.cluster_name,
            dataset = %ds.name,
            points = stats.len(),
            "writing batch to influxdb",
        );

        let client = self.client.clone();
        let url = self.write_url.clone();
        let settings = self.settings.clone();
        retry_write("influxdb write", self.write_limit, || {
            let client = client.clone();
            let url = url.clone();
            let settings = settings.clone();
            let body = body.clone();
            async move { post_batch(&client, &url, &settings, body).await }
        })
        .await
    }
}

async fn post_batch(
    client: &reqwest::Client,
    url: &str,
    settings: &InfluxSettings,
    body: String,
) -> Result<()> {
    let mut req = client.post(url).body(body);
    if let Some(user) = &settings.username {
        req = req.basic_auth(user, settings.password.as_deref());
    }

    let resp = req.send().await.map_err(CollectorError::from_transport)?;
    let status = resp.status();
    if !status.is_success() {
        let detail = resp.text().await.unwrap_or_default();
        return Err(CollectorError::Protocol(format!(
            "influxdb returned {status}: {detail}"
        )));
    }

    debug!("batch accepted");
    Ok(())
}

/// Encode one point in InfluxDB line protocol with second precision.
fn encode_point(
    measurement: &str,
    tags: &HashMap<String, String>,
    fields: &[(&'static str, f64)],
    timestamp: i64,
) -> String {
    let mut line = escape_measurement(measurement);

    let mut tag_keys: Vec<&String> = tags.keys().collect();
    tag_keys.sort_unstable();
    for key in tag_keys {
        let _ = write!(
            line,
            ",{}={}",
            escape_tag(key),
            escape_tag(&tags[key])
        );
    }

    line.push(' ');
    for (i, (name, value)) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        let _ = write!(line, "{name}={value}");
    }

    let _ = write!(line, " {timestamp}");
    line
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
