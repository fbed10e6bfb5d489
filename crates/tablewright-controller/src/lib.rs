//! tablewright-controller — reconciliation of `Table` resources.
//!
//! Drives each Table toward its declared schema by dispatching worker
//! jobs that plan and apply DDL, and folding their results back into the
//! Table's plan history.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher (ObjectKey → Table path | Pod path)
//!   ├── PlanLifecycle (Table path)
//!   │   ├── ReadinessGate
//!   │   │   └── ConnectionResolver
//!   │   └── JobOrchestrator (ConfigMap + Pod, create-if-absent)
//!   └── Harvester (Pod path)
//!       ├── pod logs → Plan appended to status.plans
//!       ├── apply done → Plan.executedAt
//!       └── cleanup (ConfigMap + Pod)
//! ```
//!
//! No phase is persisted anywhere. Every pass re-derives what to do from
//! the Table's spec and plan history, so a restarted operator loses
//! nothing and a repeated pass is harmless.

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod harvest;
pub mod jobs;
pub mod lifecycle;
pub mod readiness;
pub mod runtime;

#[cfg(test)]
pub(crate) mod fixtures;

pub use connection::{ConnectionError, ConnectionResolver};
pub use dispatcher::{Dispatcher, ReconcileOutcome};
pub use error::{ControllerError, ControllerResult};
pub use harvest::{HarvestOutcome, Harvester, normalize_plan_output};
pub use jobs::{Ensured, JobOrchestrator, JobOutcome, JobRequest};
pub use lifecycle::{PlanLifecycle, TableAction};
pub use readiness::{NotReadyReason, Readiness, ReadinessGate, ReadyDatabase};
