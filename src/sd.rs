//! Prometheus HTTP service-discovery listener.
//!
//! Serves the JSON target list pointing scrapers at every configured
//! per-cluster pull listener.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;

const SD_JOB_LABEL: &str = "__meta_prometheus_job";
const SD_JOB_NAME: &str = "isilon_ppstats";

/// One entry of the HTTP SD response format.
#[derive(Debug, Clone, Serialize)]
pub struct SdTargetGroup {
    pub targets: Vec<String>,
    pub labels: HashMap<String, String>,
}

/// Build the target group advertised to scrapers.
pub fn build_target_group(listen_ip: &str, ports: &[u16]) -> SdTargetGroup {
    SdTargetGroup {
        targets: ports
            .iter()
            .map(|port| format!("{listen_ip}:{port}"))
            .collect(),
        labels: HashMap::from([(SD_JOB_LABEL.to_string(), SD_JOB_NAME.to_string())]),
    }
}

/// Start the SD listener in a background task.
pub async fn start_listener(cfg: &Config) -> Result<()> {
    let listen_ip = match cfg.prom_sd.listen_addr.as_deref() {
        Some(addr) if !addr.is_empty() => addr.to_string(),
        _ => find_external_addr().context("discovering the SD listen address")?,
    };

    let ports: Vec<u16> = cfg
        .clusters
        .iter()
        .filter(|cluster| !cluster.disabled)
        .filter_map(|cluster| cluster.prometheus_port)
        .collect();

    let group = Arc::new(build_target_group(&listen_ip, &ports));

    let app = Router::new()
        .route("/", get(targets_handler))
        .with_state(group);

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.prom_sd.sd_port).into();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding SD listener on {addr}"))?;

    info!(%addr, targets = ports.len(), "serving prometheus HTTP SD");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "SD listener failed");
        }
    });

    Ok(())
}

async fn targets_handler(
    State(group): State<Arc<SdTargetGroup>>,
) -> Json<Vec<SdTargetGroup>> {
    Json(vec![group.as_ref().clone()])
}

/// Find the address of the interface with a default route by opening a
/// UDP socket toward a public address; no traffic is sent.
fn find_external_addr() -> Result<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").context("binding probe socket")?;
    socket
        .connect("8.8.8.8:80")
        .context("selecting outbound interface")?;
    Ok(socket.local_addr().context("reading local address")?.ip().to_string())
}
