//! Per-cluster scrape listener: landing page and `/metrics`, with
//! optional basic auth and TLS.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::Engine;
use prometheus::{Encoder, Registry, TextEncoder};
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{CollectorError, Result};

/// Settings for one cluster's scrape listener.
#[derive(Debug, Clone, Default)]
pub struct ListenerSettings {
    pub port: u16,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub basic_username: Option<String>,
    pub basic_password: Option<String>,
}

struct AppState {
    registry: Registry,
    auth: Option<(String, String)>,
}

/// Bind and serve the scrape endpoint in a background task, returning
/// the bound address.
pub async fn spawn(settings: ListenerSettings, registry: Registry) -> Result<SocketAddr> {
    let auth = match (&settings.basic_username, &settings.basic_password) {
        (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
            Some((user.clone(), pass.clone()))
        }
        _ => None,
    };

    let state = Arc::new(AppState { registry, auth });
    let app = Router::new()
        .route("/", get(homepage))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let addr: SocketAddr = ([0, 0, 0, 0], settings.port).into();

    match (&settings.tls_cert, &settings.tls_key) {
        (Some(cert), Some(key)) => {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| {
                    CollectorError::Config(format!("loading TLS cert/key for scrape listener: {e}"))
                })?;
            info!(%addr, "serving scrape endpoint over TLS");
            tokio::spawn(async move {
                if let Err(e) = axum_server::bind_rustls(addr, tls)
                    .serve(app.into_make_service())
                    .await
                {
                    error!(error = %e, "scrape listener failed");
                }
            });
            Ok(addr)
        }
        _ => {
            let listener = TcpListener::bind(addr).await.map_err(|e| {
                CollectorError::Config(format!("binding scrape listener on {addr}: {e}"))
            })?;
            let bound = listener.local_addr().map_err(|e| {
                CollectorError::Config(format!("reading scrape listener address: {e}"))
            })?;
            info!(addr = %bound, "serving scrape endpoint");
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "scrape listener failed");
                }
            });
            Ok(bound)
        }
    }
}

async fn homepage() -> Html<&'static str> {
    Html(
        "<html>\n<body>\n<h1>Dell PowerScale OpenMetrics Exporter</h1>\n\
         <p>Partitioned-performance metrics for this cluster may be found at \
         <a href=\"/metrics\">/metrics</a></p>\n</body>\n</html>",
    )
}

async fn metrics_handler(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> Response {
    if let Some((user, pass)) = &state.auth {
        if !authorized(&headers, user, pass) {
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"Restricted\"")],
                "Not authorized",
            )
                .into_response();
        }
    }

    let encoder = TextEncoder::new();
    let families = state.registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        error!(error = %e, "encoding metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "encoding error").into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

/// Validate an `Authorization: Basic ...` header in constant time.
fn authorized(headers: &axum::http::HeaderMap, user: &str, pass: &str) -> bool {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return false;
    };
    let Ok(value) = value.to_str() else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((got_user, got_pass)) = decoded.split_once(':') else {
        return false;
    };

    let user_ok: bool = got_user.as_bytes().ct_eq(user.as_bytes()).into();
    let pass_ok: bool = got_pass.as_bytes().ct_eq(pass.as_bytes()).into();
    user_ok && pass_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn basic_header(user: &str, pass: &str) -> axum::http::HeaderMap {
        let token =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {token}")).expect("valid header"),
        );
        headers
    }

    #[test]
    fn test_authorized_accepts_matching_credentials() {
        let headers = basic_header("scrape", "hunter2");
        assert!(authorized(&headers, "scrape", "hunter2"));
    }

    #[test]
    fn test_authorized_rejects_bad_credentials() {
        assert!(!authorized(&basic_header("scrape", "wrong"), "scrape", "hunter2"));
        assert!(!authorized(&basic_header("bogus", "hunter2"), "scrape", "hunter2"));
        assert!(!authorized(&axum::http::HeaderMap::new(), "scrape", "hunter2"));
    }

    #[test]
    fn test_authorized_rejects_malformed_header() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer x"));
        assert!(!authorized(&headers, "scrape", "hunter2"));

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic not-base64!!!"),
        );
        assert!(!authorized(&headers, "scrape", "hunter2"));
    }
}
