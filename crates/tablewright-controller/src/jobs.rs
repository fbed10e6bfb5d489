//! Job orchestrator — materializes the config bundle and worker pod of a
//! plan or apply job.
//!
//! Both artifacts have deterministic names, so ensuring a job is a
//! get-then-create on each. An artifact that already exists is left
//! untouched, whatever its state. A pod that has already finished belongs
//! to an earlier job that is still awaiting harvest, and blocks the new
//! job entirely until it is gone.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, Pod, PodSpec,
    SecretKeySelector, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info};

use tablewright_core::jobs::{
    CONNECTION_KEY, PLAN_ANNOTATION, PLAN_DDL_KEY, ROLE_LABEL, SPECS_MOUNT_PATH, SPECS_VOLUME,
    TABLE_NAME_LABEL, TABLE_NAMESPACE_LABEL, TABLE_SPEC_KEY, URI_ENV,
};
use tablewright_core::{JobRole, OperatorConfig, Plan, Table};
use tablewright_store::{ObjectKey, ResourceStore, StoreError};

use crate::error::{ControllerError, ControllerResult};
use crate::readiness::ReadyDatabase;

/// Name of the single container in a worker pod.
pub const WORKER_CONTAINER: &str = "tablewright";

pub(crate) const POD_SUCCEEDED: &str = "Succeeded";
pub(crate) const POD_FAILED: &str = "Failed";

/// The pod's reported phase, empty before the kubelet reports one.
pub(crate) fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("")
}

fn is_finished(pod: &Pod) -> bool {
    matches!(pod_phase(pod), POD_SUCCEEDED | POD_FAILED)
}

/// What a job should do.
#[derive(Debug, Clone, PartialEq)]
pub enum JobRequest {
    /// Plan the table's current schema.
    Plan,
    /// Execute an approved plan.
    Apply(Plan),
}

impl JobRequest {
    pub fn role(&self) -> JobRole {
        match self {
            JobRequest::Plan => JobRole::Plan,
            JobRequest::Apply(_) => JobRole::Apply,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Created,
    AlreadyPresent,
    /// Nothing was touched: a finished pod of the same name still awaits
    /// harvest.
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    pub config_map: Ensured,
    pub pod: Ensured,
}

impl JobOutcome {
    fn blocked() -> Self {
        Self {
            config_map: Ensured::Blocked,
            pod: Ensured::Blocked,
        }
    }

    /// The job could not be dispatched yet and should be retried.
    pub fn is_blocked(&self) -> bool {
        self.pod == Ensured::Blocked
    }
}

pub struct JobOrchestrator {
    store: Arc<dyn ResourceStore>,
    worker_image: String,
    image_pull_policy: String,
}

impl JobOrchestrator {
    pub fn new(store: Arc<dyn ResourceStore>, config: &OperatorConfig) -> Self {
        Self {
            store,
            worker_image: config.worker_image.clone(),
            image_pull_policy: config.image_pull_policy.clone(),
        }
    }

    /// Make sure the ConfigMap and Pod for `request` exist.
    pub async fn ensure(
        &self,
        database: &ReadyDatabase,
        table: &Table,
        request: &JobRequest,
    ) -> ControllerResult<JobOutcome> {
        let namespace = table
            .namespace()
            .ok_or_else(|| ControllerError::MissingNamespace {
                kind: "Table",
                name: table.name_any(),
            })?;
        let role = request.role();
        let key = ObjectKey::new(&namespace, role.artifact_name(&table.name_any()));

        let existing_pod = self.store.get_pod(&key).await?;
        if let Some(pod) = existing_pod.as_ref().filter(|pod| is_finished(pod)) {
            debug!(
                job = %key,
                role = role.command(),
                phase = pod_phase(pod),
                "previous worker job not harvested yet"
            );
            return Ok(JobOutcome::blocked());
        }

        let config_map = match self.store.get_config_map(&key).await? {
            Some(_) => Ensured::AlreadyPresent,
            None => {
                let bundle = config_map_for(database, table, request)?;
                created_or_present(self.store.create_config_map(&bundle).await)?
            }
        };

        let pod = match existing_pod {
            Some(_) => Ensured::AlreadyPresent,
            None => {
                let pod = pod_for(
                    database,
                    table,
                    request,
                    &self.worker_image,
                    &self.image_pull_policy,
                );
                created_or_present(self.store.create_pod(&pod).await)?
            }
        };

        if config_map == Ensured::Created || pod == Ensured::Created {
            info!(job = %key, role = role.command(), ?config_map, ?pod, "worker job dispatched");
        } else {
            debug!(job = %key, role = role.command(), "worker job already present");
        }

        Ok(JobOutcome { config_map, pod })
    }
}

/// Losing a create race to another reconciliation is as good as winning it.
fn created_or_present<T>(result: Result<T, StoreError>) -> ControllerResult<Ensured> {
    match result {
        Ok(_) => Ok(Ensured::Created),
        Err(e) if e.is_already_exists() => Ok(Ensured::AlreadyPresent),
        Err(e) => Err(e.into()),
    }
}

fn job_labels(table: &Table, role: JobRole) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ROLE_LABEL.to_string(), role.label_value().to_string()),
        (TABLE_NAME_LABEL.to_string(), table.name_any()),
        (
            TABLE_NAMESPACE_LABEL.to_string(),
            table.namespace().unwrap_or_default(),
        ),
    ])
}

fn job_meta(table: &Table, request: &JobRequest) -> ObjectMeta {
    let role = request.role();
    let annotations = match request {
        JobRequest::Apply(plan) => Some(BTreeMap::from([(
            PLAN_ANNOTATION.to_string(),
            plan.name.clone(),
        )])),
        JobRequest::Plan => None,
    };
    ObjectMeta {
        name: Some(role.artifact_name(&table.name_any())),
        namespace: table.namespace(),
        labels: Some(job_labels(table, role)),
        annotations,
        ..Default::default()
    }
}

/// The config bundle mounted into the worker at `/specs`.
///
/// The connection credential is copied as a descriptor only. A secret
/// reference stays a reference; the secret's value never lands here.
pub fn config_map_for(
    database: &ReadyDatabase,
    table: &Table,
    request: &JobRequest,
) -> ControllerResult<ConfigMap> {
    let table_spec = json!({
        "name": table.sql_name(),
        "schema": table.spec.schema,
    });
    let connection = json!({
        "driver": database.engine,
        "uri": database.database.spec.connection.uri(),
    });

    let mut data = BTreeMap::from([
        (
            TABLE_SPEC_KEY.to_string(),
            serde_json::to_string_pretty(&table_spec)?,
        ),
        (
            CONNECTION_KEY.to_string(),
            serde_json::to_string_pretty(&connection)?,
        ),
    ]);
    if let JobRequest::Apply(plan) = request {
        data.insert(PLAN_DDL_KEY.to_string(), plan.ddl.clone());
    }

    Ok(ConfigMap {
        metadata: job_meta(table, request),
        data: Some(data),
        ..Default::default()
    })
}

fn uri_env(database: &ReadyDatabase) -> EnvVar {
    let uri = database.database.spec.connection.uri();
    match uri.secret_key_ref() {
        Some(secret_ref) if uri.value.is_empty() => EnvVar {
            name: URI_ENV.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret_ref.name.clone(),
                    key: secret_ref.key.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        _ => EnvVar {
            name: URI_ENV.to_string(),
            value: Some(uri.value.clone()),
            ..Default::default()
        },
    }
}

/// The worker pod for a job.
pub fn pod_for(
    database: &ReadyDatabase,
    table: &Table,
    request: &JobRequest,
    worker_image: &str,
    image_pull_policy: &str,
) -> Pod {
    let role = request.role();
    let spec_file = format!("{SPECS_MOUNT_PATH}/{TABLE_SPEC_KEY}");

    let mut args = vec![
        role.command().to_string(),
        "--driver".to_string(),
        database.engine.to_string(),
        "--spec-file".to_string(),
        spec_file,
    ];
    if let JobRequest::Apply(_) = request {
        args.push("--ddl".to_string());
        args.push(format!("{SPECS_MOUNT_PATH}/{PLAN_DDL_KEY}"));
    }

    let container = Container {
        name: WORKER_CONTAINER.to_string(),
        image: Some(worker_image.to_string()),
        image_pull_policy: Some(image_pull_policy.to_string()),
        args: Some(args),
        env: Some(vec![uri_env(database)]),
        volume_mounts: Some(vec![VolumeMount {
            name: SPECS_VOLUME.to_string(),
            mount_path: SPECS_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Pod {
        metadata: job_meta(table, request),
        spec: Some(PodSpec {
            containers: vec![container],
            restart_policy: Some("Never".to_string()),
            volumes: Some(vec![Volume {
                name: SPECS_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: role.artifact_name(&table.name_any()),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use tablewright_core::{Database, ValueOrValueFrom};
    use tablewright_store::{MemoryStore, Operation};

    fn ready(database: Database) -> ReadyDatabase {
        let engine = database.spec.connection.engine();
        ReadyDatabase { database, engine }
    }

    fn orchestrator(store: &MemoryStore) -> JobOrchestrator {
        JobOrchestrator::new(Arc::new(store.clone()), &OperatorConfig::default())
    }

    fn approved_plan() -> Plan {
        Plan {
            approved_at: 1_700_000_100,
            ..Plan::planned("abc123", "CREATE TABLE t1 (id integer);\n", 1_700_000_000)
        }
    }

    fn container(pod: &Pod) -> &Container {
        &pod.spec.as_ref().unwrap().containers[0]
    }

    #[test]
    fn plan_pod_shape() {
        let table = postgres_table("default", "t1", "db1");
        let pod = pod_for(&ready_database(), &table, &JobRequest::Plan, "worker:1", "Always");

        assert_eq!(pod.metadata.name.as_deref(), Some("t1-plan"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("default"));
        let labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[ROLE_LABEL], "plan");
        assert_eq!(labels[TABLE_NAME_LABEL], "t1");
        assert_eq!(labels[TABLE_NAMESPACE_LABEL], "default");
        assert!(pod.metadata.annotations.is_none());

        let spec = pod.spec.as_ref().unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        let volume = &spec.volumes.as_ref().unwrap()[0];
        assert_eq!(volume.name, SPECS_VOLUME);
        assert_eq!(volume.config_map.as_ref().unwrap().name, "t1-plan");

        let c = container(&pod);
        assert_eq!(c.name, WORKER_CONTAINER);
        assert_eq!(c.image.as_deref(), Some("worker:1"));
        assert_eq!(c.image_pull_policy.as_deref(), Some("Always"));
        assert_eq!(
            c.args.as_deref().unwrap(),
            ["plan", "--driver", "postgres", "--spec-file", "/specs/table.json"]
        );
        let mount = &c.volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.mount_path, "/specs");
        assert_eq!(mount.read_only, Some(true));
    }

    #[test]
    fn apply_pod_carries_ddl_and_plan_annotation() {
        let table = postgres_table("default", "t1", "db1");
        let request = JobRequest::Apply(approved_plan());
        let pod = pod_for(&ready_database(), &table, &request, "worker:1", "IfNotPresent");

        assert_eq!(pod.metadata.name.as_deref(), Some("t1-apply"));
        assert_eq!(pod.metadata.labels.as_ref().unwrap()[ROLE_LABEL], "table");
        assert_eq!(
            pod.metadata.annotations.as_ref().unwrap()[PLAN_ANNOTATION],
            "abc123"
        );
        assert_eq!(
            container(&pod).args.as_deref().unwrap(),
            [
                "apply",
                "--driver",
                "postgres",
                "--spec-file",
                "/specs/table.json",
                "--ddl",
                "/specs/plan.sql"
            ]
        );
    }

    #[test]
    fn inline_uri_is_passed_as_value() {
        let table = postgres_table("default", "t1", "db1");
        let pod = pod_for(&ready_database(), &table, &JobRequest::Plan, "w", "IfNotPresent");
        let env = &container(&pod).env.as_ref().unwrap()[0];
        assert_eq!(env.name, URI_ENV);
        assert_eq!(env.value.as_deref(), Some("postgres://db1:5432/app"));
        assert!(env.value_from.is_none());
    }

    #[test]
    fn secret_uri_is_passed_by_reference() {
        let table = postgres_table("default", "t1", "db1");
        let db = ready(postgres_database(
            "default",
            "db1",
            ValueOrValueFrom::secret("db1-creds", "uri"),
        ));
        let pod = pod_for(&db, &table, &JobRequest::Plan, "w", "IfNotPresent");
        let env = &container(&pod).env.as_ref().unwrap()[0];
        assert!(env.value.is_none());
        let selector = env
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(selector.name, "db1-creds");
        assert_eq!(selector.key, "uri");
    }

    #[test]
    fn plan_bundle_has_spec_and_connection_only() {
        let table = postgres_table("default", "t1", "db1");
        let cm = config_map_for(&ready_database(), &table, &JobRequest::Plan).unwrap();
        let data = cm.data.unwrap();
        assert_eq!(data.len(), 2);

        let spec: serde_json::Value = serde_json::from_str(&data[TABLE_SPEC_KEY]).unwrap();
        assert_eq!(spec["name"], "t1");
        assert_eq!(spec["schema"]["postgres"]["primaryKey"][0], "id");

        let conn: serde_json::Value = serde_json::from_str(&data[CONNECTION_KEY]).unwrap();
        assert_eq!(conn["driver"], "postgres");
        assert_eq!(conn["uri"]["value"], "postgres://db1:5432/app");
    }

    #[test]
    fn apply_bundle_includes_ddl() {
        let table = postgres_table("default", "t1", "db1");
        let request = JobRequest::Apply(approved_plan());
        let cm = config_map_for(&ready_database(), &table, &request).unwrap();
        assert_eq!(
            cm.data.unwrap()[PLAN_DDL_KEY],
            "CREATE TABLE t1 (id integer);\n"
        );
    }

    #[test]
    fn secret_value_never_copied_into_bundle() {
        let table = postgres_table("default", "t1", "db1");
        let db = ready(postgres_database(
            "default",
            "db1",
            ValueOrValueFrom::secret("db1-creds", "uri"),
        ));
        let cm = config_map_for(&db, &table, &JobRequest::Plan).unwrap();
        let conn: serde_json::Value =
            serde_json::from_str(&cm.data.unwrap()[CONNECTION_KEY]).unwrap();
        assert!(conn["uri"].get("value").is_none());
        assert_eq!(conn["uri"]["valueFrom"]["secretKeyRef"]["name"], "db1-creds");
    }

    #[tokio::test]
    async fn ensure_creates_both_artifacts_once() {
        let store = MemoryStore::new();
        let table = postgres_table("default", "t1", "db1");
        let jobs = orchestrator(&store);

        let first = jobs.ensure(&ready_database(), &table, &JobRequest::Plan).await.unwrap();
        assert_eq!(
            first,
            JobOutcome {
                config_map: Ensured::Created,
                pod: Ensured::Created
            }
        );

        let second = jobs.ensure(&ready_database(), &table, &JobRequest::Plan).await.unwrap();
        assert_eq!(
            second,
            JobOutcome {
                config_map: Ensured::AlreadyPresent,
                pod: Ensured::AlreadyPresent
            }
        );
        assert_eq!(store.pod_keys(), vec![ObjectKey::new("default", "t1-plan")]);
        assert_eq!(
            store.config_map_keys(),
            vec![ObjectKey::new("default", "t1-plan")]
        );
    }

    #[tokio::test]
    async fn ensure_completes_partially_created_job() {
        let store = MemoryStore::new();
        let table = postgres_table("default", "t1", "db1");
        let cm = config_map_for(&ready_database(), &table, &JobRequest::Plan).unwrap();
        store.create_config_map(&cm).await.unwrap();

        let outcome = orchestrator(&store)
            .ensure(&ready_database(), &table, &JobRequest::Plan)
            .await
            .unwrap();
        assert_eq!(outcome.config_map, Ensured::AlreadyPresent);
        assert_eq!(outcome.pod, Ensured::Created);
    }

    #[tokio::test]
    async fn failed_pod_blocks_the_job() {
        let store = MemoryStore::new();
        let table = postgres_table("default", "t1", "db1");
        let key = ObjectKey::new("default", "t1-plan");
        let pod = pod_for(&ready_database(), &table, &JobRequest::Plan, "w", "IfNotPresent");
        store.create_pod(&pod).await.unwrap();
        store.set_pod_phase(&key, POD_FAILED);

        let outcome = orchestrator(&store)
            .ensure(&ready_database(), &table, &JobRequest::Plan)
            .await
            .unwrap();
        assert!(outcome.is_blocked());
        let phase = store.pod(&key).unwrap().status.unwrap().phase;
        assert_eq!(phase.as_deref(), Some("Failed"));
        assert!(store.config_map_keys().is_empty());
    }

    #[tokio::test]
    async fn unharvested_apply_pod_blocks_the_next_bundle() {
        let store = MemoryStore::new();
        let table = postgres_table("default", "t1", "db1");
        let key = ObjectKey::new("default", "t1-apply");
        let previous = JobRequest::Apply(approved_plan());
        let pod = pod_for(&ready_database(), &table, &previous, "w", "IfNotPresent");
        store.create_pod(&pod).await.unwrap();
        store.set_pod_phase(&key, POD_SUCCEEDED);

        let next = Plan {
            name: "def456".into(),
            ddl: "ALTER TABLE t1 ADD COLUMN c text;\n".into(),
            ..approved_plan()
        };
        let outcome = orchestrator(&store)
            .ensure(&ready_database(), &table, &JobRequest::Apply(next))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            JobOutcome {
                config_map: Ensured::Blocked,
                pod: Ensured::Blocked
            }
        );
        assert!(store.config_map_keys().is_empty());
        assert_eq!(
            store.pod(&key).unwrap().annotations()[PLAN_ANNOTATION],
            "abc123"
        );
    }

    #[tokio::test]
    async fn create_failure_propagates() {
        let store = MemoryStore::new();
        store.fail_next(Operation::CreatePod, 1);
        let table = postgres_table("default", "t1", "db1");
        let err = orchestrator(&store)
            .ensure(&ready_database(), &table, &JobRequest::Plan)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Store(_)));
        assert!(!err.is_terminal());
    }

    #[test]
    fn already_exists_counts_as_present() {
        let raced: Result<(), StoreError> = Err(StoreError::AlreadyExists {
            kind: "Pod",
            key: "default/t1-plan".into(),
        });
        assert_eq!(created_or_present(raced).unwrap(), Ensured::AlreadyPresent);
    }
}
