//! Reconciliation entry point.
//!
//! Change notifications arrive as a bare `namespace/name`. The key is
//! tried as a Table first, then as a Pod. A Table whose name happens to
//! equal a worker pod's (`users-plan` next to the pod of `users`) shadows
//! that pod here, so watchers that already hold the Pod should call
//! [`Dispatcher::reconcile_pod`] instead.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, instrument};

use tablewright_core::OperatorConfig;
use tablewright_store::{ObjectKey, ResourceStore};

use crate::error::{ControllerError, ControllerResult};
use crate::harvest::{HarvestOutcome, Harvester};
use crate::lifecycle::{PlanLifecycle, TableAction};

/// What the caller should do after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOutcome {
    /// Re-run the pass after this delay even without a new event.
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn ResourceStore>,
    lifecycle: PlanLifecycle,
    harvester: Harvester,
    requeue_after: Duration,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ResourceStore>, config: &OperatorConfig) -> Self {
        Self {
            lifecycle: PlanLifecycle::new(store.clone(), config),
            harvester: Harvester::new(store.clone(), config.status_retry_attempts),
            requeue_after: config.requeue_after(),
            store,
        }
    }

    #[instrument(skip_all, fields(object = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> ControllerResult<ReconcileOutcome> {
        if let Some(table) = self.store.get_table(key).await? {
            let action = self.lifecycle.reconcile(&table).await?;
            debug!(?action, "table reconciled");
            // A blocked job produces no event of its own once the old pod
            // is cleaned up, so poll for it.
            return Ok(match action {
                TableAction::Deferred(_) => ReconcileOutcome::requeue(self.requeue_after),
                TableAction::Applying { job, .. } | TableAction::Planning { job, .. }
                    if job.is_blocked() =>
                {
                    ReconcileOutcome::requeue(self.requeue_after)
                }
                _ => ReconcileOutcome::done(),
            });
        }

        if let Some(pod) = self.store.get_pod(key).await? {
            let outcome = self.harvester.harvest(&pod).await?;
            debug!(?outcome, "pod reconciled");
            return Ok(ReconcileOutcome::done());
        }

        Err(ControllerError::UnknownTarget(key.to_string()))
    }

    /// Harvest a pod the caller already holds, skipping the lookups.
    pub async fn reconcile_pod(&self, pod: &Pod) -> ControllerResult<HarvestOutcome> {
        self.harvester.harvest(pod).await
    }
}
