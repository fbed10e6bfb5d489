//! Job result harvester — folds a finished worker pod back into its Table
//! and removes the job's artifacts.
//!
//! A plan pod's log output becomes a new `Plan` in the Table's history. An
//! apply pod marks its plan executed. Either way, once a pod has
//! succeeded its ConfigMap and the pod itself are deleted.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::AsyncReadExt;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use tablewright_core::jobs::{
    PLAN_ANNOTATION, ROLE_LABEL, SPECS_VOLUME, TABLE_NAME_LABEL, TABLE_NAMESPACE_LABEL,
};
use tablewright_core::{JobRole, Plan, Table};
use tablewright_store::{ObjectKey, ResourceStore, StoreResult};

use crate::error::{ControllerError, ControllerResult};
use crate::jobs::{POD_FAILED, POD_SUCCEEDED, pod_phase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestOutcome {
    /// Not a worker pod.
    Ignored,
    /// The pod has not succeeded yet.
    Pending { phase: String },
    /// The pod's result was folded in and its artifacts removed.
    /// `recorded` is false when the Table needed no change or was gone.
    Harvested { role: JobRole, recorded: bool },
}

pub struct Harvester {
    store: Arc<dyn ResourceStore>,
    status_retry_attempts: u32,
}

impl Harvester {
    pub fn new(store: Arc<dyn ResourceStore>, status_retry_attempts: u32) -> Self {
        Self {
            store,
            status_retry_attempts: status_retry_attempts.max(1),
        }
    }

    #[instrument(skip_all, fields(pod = %pod.name_any(), namespace = ?pod.namespace()))]
    pub async fn harvest(&self, pod: &Pod) -> ControllerResult<HarvestOutcome> {
        let Some(role) = role_of(pod) else {
            debug!("pod has no worker role, ignoring");
            return Ok(HarvestOutcome::Ignored);
        };
        let key = ObjectKey::of(pod).ok_or_else(|| ControllerError::MissingNamespace {
            kind: "Pod",
            name: pod.name_any(),
        })?;

        let phase = pod_phase(pod);
        if phase != POD_SUCCEEDED {
            if phase == POD_FAILED {
                warn!(role = role.command(), "worker pod failed, leaving it for inspection");
            } else {
                debug!(role = role.command(), %phase, "worker pod not finished");
            }
            return Ok(HarvestOutcome::Pending {
                phase: phase.to_string(),
            });
        }

        let recorded = match role {
            JobRole::Plan => self.record_plan(&key, pod).await?,
            JobRole::Apply => self.record_execution(pod).await?,
        };

        self.cleanup(&key, pod).await?;
        info!(role = role.command(), recorded, "worker job harvested");
        Ok(HarvestOutcome::Harvested { role, recorded })
    }

    async fn record_plan(&self, key: &ObjectKey, pod: &Pod) -> ControllerResult<bool> {
        let ddl = normalize_plan_output(&self.read_pod_output(key).await?);

        let Some(table_key) = table_key_of(pod) else {
            warn!("plan pod has no table labels, skipping status write");
            return Ok(false);
        };

        let now = epoch_secs();
        self.update_status_with(&table_key, |table| {
            let fingerprint = table.fingerprint()?;
            if table.plan_for(&fingerprint).is_some() {
                debug!(plan = %fingerprint, "plan already recorded");
                return Ok(false);
            }
            info!(table = %table.name_any(), plan = %fingerprint, "recording plan");
            table
                .plans_mut()
                .push(Plan::planned(fingerprint, ddl.clone(), now));
            Ok(true)
        })
        .await
    }

    async fn record_execution(&self, pod: &Pod) -> ControllerResult<bool> {
        let Some(table_key) = table_key_of(pod) else {
            warn!("apply pod has no table labels, skipping status write");
            return Ok(false);
        };
        let annotated = pod.annotations().get(PLAN_ANNOTATION).cloned();

        let now = epoch_secs();
        self.update_status_with(&table_key, |table| {
            let plans = table.plans_mut();
            let index = match annotated.as_deref() {
                Some(name) if plans.iter().any(|p| p.name == name) => plans
                    .iter()
                    .position(|p| p.name == name && p.is_pending_execution()),
                _ => plans.iter().position(Plan::is_pending_execution),
            };
            let Some(index) = index else {
                debug!("no plan awaiting execution");
                return Ok(false);
            };
            let plan = &mut plans[index];
            plan.executed_at = now;
            info!(plan = %plan.name, "plan executed");
            Ok(true)
        })
        .await
    }

    /// Read a pod's whole log output. The stream is dropped on return.
    ///
    /// Invalid UTF-8 is replaced rather than rejected: a finished pod's
    /// output never changes, so a decode error would never clear.
    async fn read_pod_output(&self, key: &ObjectKey) -> ControllerResult<String> {
        let mut stream = self.store.pod_logs(key).await?;
        let mut output = Vec::new();
        stream
            .read_to_end(&mut output)
            .await
            .map_err(|source| ControllerError::LogRead {
                pod: key.to_string(),
                source,
            })?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Apply `mutate` to a fresh copy of the Table and write its status,
    /// re-reading and re-applying on conflict.
    ///
    /// Returns whether a status write happened. A missing Table or a
    /// mutation that reports no change skips the write.
    async fn update_status_with<F>(&self, key: &ObjectKey, mut mutate: F) -> ControllerResult<bool>
    where
        F: FnMut(&mut Table) -> ControllerResult<bool>,
    {
        for attempt in 1..=self.status_retry_attempts {
            let Some(mut table) = self.store.get_table(key).await? else {
                warn!(table = %key, "table no longer exists, skipping status write");
                return Ok(false);
            };
            if !mutate(&mut table)? {
                return Ok(false);
            }
            match self.store.update_table_status(&table).await {
                Ok(_) => return Ok(true),
                Err(e) if e.is_conflict() => {
                    debug!(table = %key, attempt, "status write conflicted, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ControllerError::ConflictRetriesExhausted {
            table: key.to_string(),
            attempts: self.status_retry_attempts,
        })
    }

    /// Delete the job's ConfigMap, then its pod. The pod goes last so a
    /// failed ConfigMap delete is retried from the next pod event.
    async fn cleanup(&self, key: &ObjectKey, pod: &Pod) -> ControllerResult<()> {
        match config_map_name(pod) {
            Some(name) => {
                let cm_key = ObjectKey::new(&key.namespace, name);
                tolerate_not_found(self.store.delete_config_map(&cm_key).await)?;
                debug!(config_map = %cm_key, "config bundle deleted");
            }
            None => debug!("pod mounts no config bundle"),
        }
        tolerate_not_found(self.store.delete_pod(key).await)?;
        debug!("worker pod deleted");
        Ok(())
    }
}

fn tolerate_not_found(result: StoreResult<()>) -> StoreResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

fn role_of(pod: &Pod) -> Option<JobRole> {
    pod.labels()
        .get(ROLE_LABEL)
        .and_then(|v| JobRole::from_label(v))
}

fn table_key_of(pod: &Pod) -> Option<ObjectKey> {
    let labels = pod.labels();
    let name = labels.get(TABLE_NAME_LABEL).filter(|v| !v.is_empty())?;
    let namespace = labels.get(TABLE_NAMESPACE_LABEL).filter(|v| !v.is_empty())?;
    Some(ObjectKey::new(namespace, name))
}

fn config_map_name(pod: &Pod) -> Option<String> {
    pod.spec
        .as_ref()?
        .volumes
        .as_ref()?
        .iter()
        .find(|v| v.name == SPECS_VOLUME)?
        .config_map
        .as_ref()
        .map(|cm| cm.name.clone())
}

/// Collapse every run of consecutive newlines into one.
pub fn normalize_plan_output(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_newline = false;
    for c in raw.chars() {
        let newline = c == '\n';
        if !(newline && last_was_newline) {
            out.push(c);
        }
        last_was_newline = newline;
    }
    out
}

fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
