//! stagehand-reconcile — the deployment reconciliation engine.
//!
//! Folds the orchestrator's delta stream and the provisioner's node status
//! into the [`StateStore`](stagehand_state::StateStore), and recovers from
//! unit errors (resolve in place) and failed node deployments (machine
//! replacement) within per-unit and per-application retry budgets.
//!
//! Every background task of a run lives in one [`Supervisor`] group; the
//! first fatal error cancels the group and is returned from
//! [`Deployment::deploy`].

pub mod completion;
pub mod deployment;
pub mod error;
pub mod events;
pub mod failures;
pub mod hosts;
pub mod pool;
pub mod recovery;
pub mod supervisor;
pub mod unit_retry;
pub mod watch;

pub use completion::{CompletionWatcher, all_active};
pub use deployment::{Deployment, DeploymentSettings};
pub use error::{ReconcileError, ReconcileResult};
pub use events::{CorrelatedFailure, UnitRetry};
pub use failures::{FailureConsumer, correlate};
pub use hosts::HostsFile;
pub use pool::{NodePool, PoolTarget, count_available};
pub use recovery::{RecoveryOrchestrator, ReplacementPhase};
pub use supervisor::Supervisor;
pub use unit_retry::UnitRetryConsumer;
pub use watch::{Action, WatchConsumer, WatcherSpawner, route};
