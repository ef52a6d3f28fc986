//! stagehand-state — the shared cache of units, machines, and retry budgets.
//!
//! Every reconciliation component reads and writes deployment state through
//! a single [`StateStore`], injected at construction. The store holds two
//! independent lock domains:
//!
//! ```text
//! StateStore
//!   ├── unit domain     (unit name → Unit)
//!   └── machine domain  (machine id → Machine, instance index,
//!                        application tags, application retry counters,
//!                        deleted instance set)
//! ```
//!
//! Each public method takes at most one domain lock, performs a single
//! read-modify-write, and releases it before returning. No lock is ever held
//! across an `.await`, so callers on a cooperative scheduler never observe a
//! torn record.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc`) and can be
//! shared across async tasks.

pub mod store;
pub mod types;

pub use store::{ClaimOutcome, StateStore};
pub use types::*;
