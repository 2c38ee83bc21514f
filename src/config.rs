use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::onefs::AuthType;

/// Config file versions this collector understands. The last breaking
/// change was moving the prometheus listener port per cluster.
const COMPATIBLE_CONFIG_VERSIONS: [&str; 2] = ["0.2", "0.1"];

/// Top-level collector configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Config file schema version, checked against the collector.
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub global: GlobalConfig,

    /// One entry per cluster to collect from.
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,

    /// Settings for the prometheus pull sink's scrape listeners.
    #[serde(default)]
    pub prometheus: PromConfig,

    /// Prometheus HTTP service-discovery listener.
    #[serde(default)]
    pub prom_sd: PromSdConfig,

    /// Settings for the influxdb push sink.
    #[serde(default)]
    pub influxdb: InfluxConfig,
}

/// Settings shared by every cluster worker.
#[derive(Debug, Deserialize)]
pub struct GlobalConfig {
    /// Which sink to write stats to.
    #[serde(default)]
    pub processor: SinkKind,

    /// Ceiling on connect/read retry attempts; <= 0 means unlimited.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,

    /// Ceiling on push-write attempts per batch.
    #[serde(default = "default_write_retries")]
    pub write_retries: i64,

    /// Resolve NFS export ids to paths via the cluster API.
    #[serde(default)]
    pub lookup_export_ids: bool,

    /// Collection cadence. Default: 30s.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            processor: SinkKind::default(),
            max_retries: default_max_retries(),
            write_retries: default_write_retries(),
            lookup_export_ids: false,
            poll_interval: default_poll_interval(),
        }
    }
}

/// The closed set of supported sink back ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Discard,
    Influxdb,
    Prometheus,
}

/// Connection settings for one cluster.
#[derive(Debug, Deserialize)]
pub struct ClusterConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,

    /// API port; defaults to 8080 when unset.
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub auth_type: AuthType,

    /// Verify the cluster's TLS certificate.
    #[serde(default)]
    pub verify_ssl: bool,

    /// Skip this cluster entirely.
    #[serde(default)]
    pub disabled: bool,

    /// Scrape listener port when the prometheus sink is selected.
    #[serde(default)]
    pub prometheus_port: Option<u16>,
}

/// Scrape listener settings shared across clusters.
#[derive(Debug, Default, Deserialize)]
pub struct PromConfig {
    /// Require basic auth on the scrape endpoints.
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
    #[serde(default)]
    pub tls_key: Option<PathBuf>,
}

/// Prometheus HTTP service-discovery settings.
#[derive(Debug, Deserialize)]
pub struct PromSdConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Address to advertise in SD targets; discovered when unset.
    #[serde(default)]
    pub listen_addr: Option<String>,

    /// Port the SD listener serves on.
    #[serde(default = "default_sd_port")]
    pub sd_port: u16,
}

impl Default for PromSdConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: None,
            sd_port: default_sd_port(),
        }
    }
}

/// InfluxDB 1.x push sink settings.
#[derive(Debug, Deserialize)]
pub struct InfluxConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_influx_port")]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_influx_port(),
            database: String::new(),
            username: None,
            password: None,
        }
    }
}

fn default_max_retries() -> i64 {
    8
}

fn default_write_retries() -> i64 {
    5
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_sd_port() -> u16 {
    9114
}

fn default_influx_port() -> u16 {
    8086
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.version.is_empty() {
            bail!("the collector requires a versioned config file (see the example config)");
        }
        let version = self.version.trim_start_matches(['v', 'V']);
        if !COMPATIBLE_CONFIG_VERSIONS.contains(&version) {
            bail!(
                "config file version {:?} is not compatible with this collector",
                self.version
            );
        }

        if self.clusters.iter().all(|c| c.disabled) {
            bail!("no enabled clusters are configured");
        }

        for cluster in self.clusters.iter().filter(|c| !c.disabled) {
            if cluster.hostname.is_empty() {
                bail!("a cluster entry is missing its hostname");
            }
            if cluster.username.is_empty() || cluster.password.is_empty() {
                bail!("cluster {} is missing credentials", cluster.hostname);
            }
        }

        if self.prometheus.authenticated
            && (self.prometheus.username.is_empty() || self.prometheus.password.is_empty())
        {
            bail!("prometheus.authenticated requires a username and password");
        }

        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// A valid single-cluster config for sink and worker tests.
    pub fn minimal_config(processor: SinkKind) -> Config {
        Config {
            version: "0.2".to_string(),
            global: GlobalConfig {
                processor,
                ..GlobalConfig::default()
            },
            clusters: vec![ClusterConfig {
                hostname: "cluster1.example.com".to_string(),
                username: "scraper".to_string(),
                password: "secret".to_string(),
                port: None,
                auth_type: AuthType::default(),
                verify_ssl: false,
                disabled: false,
                prometheus_port: Some(9090),
            }],
            prometheus: PromConfig::default(),
            prom_sd: PromSdConfig::default(),
            influxdb: InfluxConfig {
                host: "influx.example.com".to_string(),
                database: "isi_data".to_string(),
                ..InfluxConfig::default()
            },
        }
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
version: "0.2"
global:
  processor: prometheus
  max_retries: 10
  lookup_export_ids: true
  poll_interval: 30s
clusters:
  - hostname: cluster1.example.com
    username: scraper
    password: secret
    auth_type: session
    verify_ssl: true
    prometheus_port: 9091
  - hostname: cluster2.example.com
    username: scraper
    password: secret
    auth_type: basic-auth
    disabled: true
prometheus:
  authenticated: true
  username: prom
  password: scrapepw
prom_sd:
  enabled: true
  sd_port: 9114
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("parse");
        cfg.validate().expect("valid");

        assert_eq!(cfg.global.processor, SinkKind::Prometheus);
        assert_eq!(cfg.global.max_retries, 10);
        assert!(cfg.global.lookup_export_ids);
        assert_eq!(cfg.global.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.clusters.len(), 2);
        assert_eq!(cfg.clusters[0].auth_type, AuthType::Session);
        assert_eq!(cfg.clusters[0].prometheus_port, Some(9091));
        assert_eq!(cfg.clusters[1].auth_type, AuthType::BasicAuth);
        assert!(cfg.clusters[1].disabled);
        assert!(cfg.prom_sd.enabled);
    }

    #[test]
    fn test_defaults() {
        let cfg: Config = serde_yaml::from_str(
            r#"
version: "0.2"
clusters:
  - hostname: c1
    username: u
    password: p
"#,
        )
        .expect("parse");

        assert_eq!(cfg.global.processor, SinkKind::Discard);
        assert_eq!(cfg.global.max_retries, 8);
        assert_eq!(cfg.global.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.clusters[0].auth_type, AuthType::Session);
        assert!(!cfg.clusters[0].verify_ssl);
        assert_eq!(cfg.influxdb.port, 8086);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ppstats.yml");
        std::fs::write(
            &path,
            "version: \"0.2\"\nclusters:\n  - hostname: c1\n    username: u\n    password: p\n",
        )
        .expect("write");

        let cfg = Config::load(&path).expect("load");
        assert_eq!(cfg.clusters.len(), 1);

        assert!(Config::load(&dir.path().join("missing.yml")).is_err());
    }

    #[test]
    fn test_version_is_required_and_checked() {
        let mut cfg = minimal_config(SinkKind::Discard);
        cfg.version.clear();
        assert!(cfg.validate().is_err());

        cfg.version = "9.9".to_string();
        assert!(cfg.validate().is_err());

        cfg.version = "v0.2".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_enabled_cluster_needs_credentials() {
        let mut cfg = minimal_config(SinkKind::Discard);
        cfg.clusters[0].password.clear();
        assert!(cfg.validate().is_err());

        // A disabled cluster may be incomplete.
        cfg.clusters[0].disabled = true;
        cfg.clusters.push(ClusterConfig {
            hostname: "c2".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            port: None,
            auth_type: AuthType::default(),
            verify_ssl: false,
            disabled: false,
            prometheus_port: None,
        });
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_authenticated_prometheus_needs_credentials() {
        let mut cfg = minimal_config(SinkKind::Prometheus);
        cfg.prometheus.authenticated = true;
        assert!(cfg.validate().is_err());

        cfg.prometheus.username = "prom".to_string();
        cfg.prometheus.password = "pw".to_string();
        assert!(cfg.validate().is_ok());
    }
}
