//! # argus-pupil
//!
//! The pupil sidecar: supervises a customer worker process by listening for
//! its heartbeats, forwards send requests to NOC, and escalates when the
//! worker goes silent. A failed escalation is persisted to disk and
//! replayed on the next boot, so no expiry is ever lost to a NOC outage.
//!
//! Component map:
//!
//! - [`listener`]: the HTTP(S) endpoint the worker posts to
//! - [`handler`]: request dispatch and the bounded event-handler fan-out
//! - [`noc_client`]: retrying NOC POST with persist-on-failure
//! - [`recovery`]: the disk-backed recovery record and startup replay
//! - [`watchdog`]: the pupil's own heartbeat timer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod handler;
pub mod listener;
pub mod noc_client;
pub mod recovery;
pub mod watchdog;

pub use config::PupilConfig;
pub use noc_client::PupilNocClient;
pub use recovery::{RecoveryRecord, RecoveryStore};
pub use watchdog::PupilWatchdog;

/// Generate a pupil correlation ID: `pupil-<8 hex>`.
#[must_use]
pub fn correlation_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("pupil-{}", &hex[..8])
}
