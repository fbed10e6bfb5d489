//! Plan lifecycle — decides what a Table needs next.
//!
//! Evaluated top to bottom on every Table event:
//!
//! 1. the Database must be ready, or the pass is deferred;
//! 2. the first approved, unexecuted, unrejected plan gets an apply job;
//! 3. a plan already recorded for the current fingerprint means nothing to do;
//! 4. otherwise a plan job is dispatched.
//!
//! Plans are only appended to the history when a plan job is harvested,
//! never here.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info, instrument};

use tablewright_core::{OperatorConfig, Plan, Table};
use tablewright_store::ResourceStore;

use crate::error::{ControllerError, ControllerResult};
use crate::jobs::{JobOrchestrator, JobOutcome, JobRequest};
use crate::readiness::{NotReadyReason, Readiness, ReadinessGate};

/// What a reconciliation pass did for a Table.
#[derive(Debug, Clone, PartialEq)]
pub enum TableAction {
    /// The Database is not usable yet. Nothing was changed.
    Deferred(NotReadyReason),
    /// An apply job for `plan` was ensured.
    Applying { plan: String, job: JobOutcome },
    /// A plan for the current fingerprint is already recorded.
    UpToDate { plan: String },
    /// A plan job for `fingerprint` was ensured.
    Planning { fingerprint: String, job: JobOutcome },
}

pub struct PlanLifecycle {
    gate: ReadinessGate,
    jobs: JobOrchestrator,
}

impl PlanLifecycle {
    pub fn new(store: Arc<dyn ResourceStore>, config: &OperatorConfig) -> Self {
        Self {
            gate: ReadinessGate::new(store.clone()),
            jobs: JobOrchestrator::new(store, config),
        }
    }

    #[instrument(skip_all, fields(table = %table.name_any(), namespace = ?table.namespace()))]
    pub async fn reconcile(&self, table: &Table) -> ControllerResult<TableAction> {
        let namespace = table
            .namespace()
            .ok_or_else(|| ControllerError::MissingNamespace {
                kind: "Table",
                name: table.name_any(),
            })?;

        let database = match self
            .gate
            .check(&namespace, &table.spec.database, table.engine())
            .await?
        {
            Readiness::Ready(database) => database,
            Readiness::NotReady(reason) => {
                debug!(database = %table.spec.database, %reason, "database not ready, deferring");
                return Ok(TableAction::Deferred(reason));
            }
        };

        if let Some(plan) = table.first_pending_execution() {
            let plan: Plan = plan.clone();
            let name = plan.name.clone();
            let job = self
                .jobs
                .ensure(&database, table, &JobRequest::Apply(plan))
                .await?;
            info!(plan = %name, "approved plan awaiting execution");
            return Ok(TableAction::Applying { plan: name, job });
        }

        let fingerprint = table.fingerprint()?;
        if let Some(plan) = table.plan_for(&fingerprint) {
            debug!(plan = %plan.name, "schema already planned");
            return Ok(TableAction::UpToDate {
                plan: plan.name.clone(),
            });
        }

        let job = self.jobs.ensure(&database, table, &JobRequest::Plan).await?;
        debug!(%fingerprint, "schema needs a plan");
        Ok(TableAction::Planning { fingerprint, job })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::jobs::Ensured;
    use tablewright_core::jobs::{PLAN_ANNOTATION, ROLE_LABEL};
    use tablewright_core::{TableStatus, ValueOrValueFrom};
    use tablewright_store::{MemoryStore, ObjectKey};

    fn lifecycle(store: &MemoryStore) -> PlanLifecycle {
        PlanLifecycle::new(Arc::new(store.clone()), &OperatorConfig::default())
    }

    fn with_plans(mut table: Table, plans: Vec<Plan>) -> Table {
        table.status = Some(TableStatus { plans });
        table
    }

    fn approved(name: &str) -> Plan {
        Plan {
            approved_at: 1_700_000_100,
            ..Plan::planned(name, "ALTER TABLE t1 ADD COLUMN c text;\n", 1_700_000_000)
        }
    }

    #[tokio::test]
    async fn missing_database_defers_without_side_effects() {
        let store = MemoryStore::new();
        let table = postgres_table("default", "t1", "db1");
        let action = lifecycle(&store).reconcile(&table).await.unwrap();
        assert_eq!(action, TableAction::Deferred(NotReadyReason::DatabaseMissing));
        assert!(store.pod_keys().is_empty());
        assert!(store.config_map_keys().is_empty());
    }

    #[tokio::test]
    async fn unresolvable_secret_defers() {
        let store = MemoryStore::new();
        store
            .put_database(postgres_database(
                "default",
                "db1",
                ValueOrValueFrom::secret("db1-creds", "uri"),
            ))
            .unwrap();
        let table = postgres_table("default", "t1", "db1");
        let action = lifecycle(&store).reconcile(&table).await.unwrap();
        assert!(matches!(
            action,
            TableAction::Deferred(NotReadyReason::CredentialUnavailable(_))
        ));
        assert!(store.pod_keys().is_empty());
    }

    #[tokio::test]
    async fn new_schema_dispatches_plan_job() {
        let store = store_with_ready_database();
        let table = postgres_table("default", "t1", "db1");
        let action = lifecycle(&store).reconcile(&table).await.unwrap();

        let TableAction::Planning { fingerprint, job } = action else {
            panic!("expected planning, got {action:?}");
        };
        assert_eq!(fingerprint, table.fingerprint().unwrap());
        assert_eq!(job.pod, Ensured::Created);

        let pod = store.pod(&ObjectKey::new("default", "t1-plan")).unwrap();
        assert_eq!(pod.labels()[ROLE_LABEL], "plan");
        assert!(table.plans().is_empty());
    }

    #[tokio::test]
    async fn repeated_pass_does_not_duplicate_plan_job() {
        let store = store_with_ready_database();
        let table = postgres_table("default", "t1", "db1");
        let lifecycle = lifecycle(&store);
        lifecycle.reconcile(&table).await.unwrap();
        let action = lifecycle.reconcile(&table).await.unwrap();

        let TableAction::Planning { job, .. } = action else {
            panic!("expected planning, got {action:?}");
        };
        assert_eq!(job.pod, Ensured::AlreadyPresent);
        assert_eq!(store.pod_keys().len(), 1);
    }

    #[tokio::test]
    async fn planned_fingerprint_is_up_to_date() {
        let store = store_with_ready_database();
        let table = postgres_table("default", "t1", "db1");
        let fingerprint = table.fingerprint().unwrap();
        let table = with_plans(table, vec![Plan::planned(&fingerprint, "", 1_700_000_000)]);

        let action = lifecycle(&store).reconcile(&table).await.unwrap();
        assert_eq!(action, TableAction::UpToDate { plan: fingerprint });
        assert!(store.pod_keys().is_empty());
    }

    #[tokio::test]
    async fn approved_plan_dispatches_apply_job() {
        let store = store_with_ready_database();
        let table = postgres_table("default", "t1", "db1");
        let fingerprint = table.fingerprint().unwrap();
        let table = with_plans(table, vec![approved(&fingerprint)]);

        let action = lifecycle(&store).reconcile(&table).await.unwrap();
        assert!(matches!(action, TableAction::Applying { ref plan, .. } if *plan == fingerprint));

        let pod = store.pod(&ObjectKey::new("default", "t1-apply")).unwrap();
        assert_eq!(pod.labels()[ROLE_LABEL], "table");
        assert_eq!(pod.annotations()[PLAN_ANNOTATION], fingerprint);
        assert!(store.pod(&ObjectKey::new("default", "t1-plan")).is_none());
    }

    #[tokio::test]
    async fn apply_takes_precedence_over_new_schema() {
        let store = store_with_ready_database();
        let table = with_plans(
            postgres_table("default", "t1", "db1"),
            vec![approved("older-fingerprint")],
        );
        let action = lifecycle(&store).reconcile(&table).await.unwrap();
        assert!(matches!(action, TableAction::Applying { ref plan, .. } if plan == "older-fingerprint"));
        assert!(store.pod(&ObjectKey::new("default", "t1-plan")).is_none());
    }

    #[tokio::test]
    async fn executed_or_rejected_plans_are_not_applied() {
        let store = store_with_ready_database();
        let table = postgres_table("default", "t1", "db1");
        let fingerprint = table.fingerprint().unwrap();
        let executed = Plan {
            executed_at: 1_700_000_200,
            ..approved(&fingerprint)
        };
        let rejected = Plan {
            rejected_at: 1_700_000_200,
            ..approved("other")
        };
        let table = with_plans(table, vec![rejected, executed]);

        let action = lifecycle(&store).reconcile(&table).await.unwrap();
        assert_eq!(action, TableAction::UpToDate { plan: fingerprint });
        assert!(store.pod_keys().is_empty());
    }

    #[tokio::test]
    async fn first_pending_plan_wins() {
        let store = store_with_ready_database();
        let table = with_plans(
            postgres_table("default", "t1", "db1"),
            vec![Plan::planned("a", "", 1), approved("b"), approved("c")],
        );
        let action = lifecycle(&store).reconcile(&table).await.unwrap();
        assert!(matches!(action, TableAction::Applying { ref plan, .. } if plan == "b"));
    }

    #[tokio::test]
    async fn engine_mismatch_changes_nothing() {
        let store = MemoryStore::new();
        store
            .put_database(mysql_database(
                "default",
                "db1",
                ValueOrValueFrom::inline("mysql://db1/app"),
            ))
            .unwrap();
        let table = postgres_table("default", "t1", "db1");
        let err = lifecycle(&store).reconcile(&table).await.unwrap_err();
        assert!(matches!(err, ControllerError::EngineMismatch { .. }));
        assert!(store.pod_keys().is_empty());
        assert!(store.config_map_keys().is_empty());
    }
}
