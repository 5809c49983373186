//! # argus-core
//!
//! Core library for argus - a Kubernetes-resident alert aggregator and NOC
//! dispatcher.
//!
//! This crate provides the domain primitives shared by the coordinator daemon
//! and the pupil sidecar:
//!
//! - **Alert model**: normalised alerts keyed by fingerprint, with statuses
//!   and per-status NOC behaviours
//! - **Duration grammar**: the `<n>{s,m,h,d}` format used throughout
//!   configuration and alert annotations
//! - **Circuit breaker**: the three-state breaker shared by the Kubernetes
//!   and L2 call paths
//! - **Restart tracker**: sliding-window restart storm detection for pods
//! - **Watchdog**: the heartbeat-driven one-shot timer both components arm
//! - **NOC contract**: the wire message and client options for the external
//!   NOC endpoint

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alert;
pub mod breaker;
pub mod duration;
pub mod noc;
pub mod restart;
pub mod watchdog;

pub use alert::{Alert, AlertStatus, NocBehavior, PushAlert};
pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use noc::{NocClientConfig, NocDetails, NocMessage};
pub use restart::{RestartTracker, RestartTrackingConfig};
pub use watchdog::{Watchdog, WatchdogConfig, WatchdogState};
