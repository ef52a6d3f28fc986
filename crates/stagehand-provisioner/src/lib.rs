//! stagehand-provisioner — bare-metal provisioner status and failure watching.
//!
//! Provides the [`Provisioner`] boundary trait, the MAAS node status code
//! set, an HTTP client for the MAAS REST API, and the per-instance
//! [`BareMetalWatcher`] that turns a terminal failed-deployment status into
//! a single [`FailureEvent`].
//!
//! # Architecture
//!
//! ```text
//! BareMetalWatcher (one per instance id)
//!   ├── poll Provisioner::node_status() every interval
//!   ├── log status changes
//!   └── FailedDeployment → FailureEvent on the failure queue, then exit
//! ```
//!
//! A watcher that never sees the failure state runs until its task is
//! cancelled. A failed status query ends the watcher with an error; the
//! caller decides whether that is fatal.

pub mod error;
pub mod maas;
pub mod status;
pub mod watcher;

pub use error::{ProvisionerError, ProvisionerResult};
pub use maas::{MaasClient, MaasCredentials};
pub use status::NodeStatus;
pub use watcher::{BareMetalWatcher, FailureEvent, Provisioner};
