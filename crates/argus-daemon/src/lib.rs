//! # argus-daemon
//!
//! The argus coordinator: ingests alerts from the push ingress, the
//! Kubernetes pod poller and the watchdog, normalises them into the alerts
//! vector (L1), write-behinds the vector to a distributed map (L2), and
//! asynchronously decides what to forward, suppress or cancel against the
//! external NOC endpoint.
//!
//! Component map:
//!
//! - [`vector`]: the in-memory authoritative store keyed by fingerprint
//! - [`persistence`]: the L2 contract, write-behind store and batch writer
//! - [`k8s`]: pod health checks and the layer service
//! - [`noc`]: suppression cache, decision queue worker and snapshot service
//! - [`coordinator`]: boot branching and the three source loops
//! - [`http`]: the ingress HTTP surface
//! - [`metrics`]: the Prometheus-backed metrics facade

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod http;
pub mod k8s;
pub mod metrics;
pub mod noc;
pub mod persistence;
pub mod vector;
pub mod watchdog;

pub use config::DaemonConfig;
pub use coordinator::Coordinator;
pub use metrics::Metrics;
pub use vector::AlertsVector;
