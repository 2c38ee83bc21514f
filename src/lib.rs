//! Partitioned-performance statistics collector for Dell PowerScale
//! (OneFS) clusters.
//!
//! One worker per configured cluster polls the OneFS API for
//! per-workload performance stats and feeds them to the configured
//! sink: a prometheus pull endpoint, an influxdb push writer, or the
//! discard back end.

pub mod config;
pub mod error;
pub mod onefs;
pub mod points;
pub mod retry;
pub mod schema;
pub mod sd;
pub mod sink;
pub mod worker;
