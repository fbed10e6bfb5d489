//! MemoryStore — an in-memory `ResourceStore`.
//!
//! Objects live in per-kind maps keyed by `ObjectKey`. Every write assigns a
//! fresh resource version, and `update_table_status` rejects stale copies
//! the same way the API server does, so optimistic-concurrency paths can be
//! exercised without a cluster. Failures and conflicts can be injected
//! per operation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::io::Cursor;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, PodStatus, Secret};
use kube::Resource;
use tracing::debug;

use tablewright_core::{Database, Table};

use crate::error::{StoreError, StoreResult};
use crate::store::{LogStream, ObjectKey, ResourceStore};

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetTable,
    UpdateTableStatus,
    GetDatabase,
    GetSecret,
    GetPod,
    CreatePod,
    DeletePod,
    GetConfigMap,
    CreateConfigMap,
    DeleteConfigMap,
    PodLogs,
}

#[derive(Default)]
struct Objects {
    tables: BTreeMap<ObjectKey, Table>,
    databases: BTreeMap<ObjectKey, Database>,
    secrets: BTreeMap<ObjectKey, Secret>,
    pods: BTreeMap<ObjectKey, Pod>,
    config_maps: BTreeMap<ObjectKey, ConfigMap>,
    logs: BTreeMap<ObjectKey, Vec<u8>>,
    failures: HashMap<Operation, u32>,
    pending_conflicts: u32,
    status_writes: u32,
    last_version: u64,
}

impl Objects {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }

    /// Consume one injected failure for `op`, if any.
    fn take_failure(&mut self, op: Operation) -> StoreResult<()> {
        match self.failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Unavailable(format!("injected failure: {op:?}")))
            }
            _ => Ok(()),
        }
    }
}

/// Thread-safe in-memory store. Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Objects>>,
}

fn key_of<K: Resource>(kind: &str, obj: &K) -> StoreResult<ObjectKey> {
    let meta = obj.meta();
    match (&meta.namespace, &meta.name) {
        (Some(ns), Some(name)) => Ok(ObjectKey::new(ns, name)),
        _ => Err(StoreError::InvalidObject(format!(
            "{kind} must have a name and a namespace"
        ))),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, Objects> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Seeding ────────────────────────────────────────────────────

    /// Insert or replace a table, as a user applying a manifest would.
    pub fn put_table(&self, mut table: Table) -> StoreResult<Table> {
        let key = key_of("Table", &table)?;
        let mut objects = self.objects();
        table.metadata.resource_version = Some(objects.next_version());
        objects.tables.insert(key, table.clone());
        Ok(table)
    }

    pub fn put_database(&self, mut database: Database) -> StoreResult<()> {
        let key = key_of("Database", &database)?;
        let mut objects = self.objects();
        database.metadata.resource_version = Some(objects.next_version());
        objects.databases.insert(key, database);
        Ok(())
    }

    pub fn put_secret(&self, mut secret: Secret) -> StoreResult<()> {
        let key = key_of("Secret", &secret)?;
        let mut objects = self.objects();
        secret.metadata.resource_version = Some(objects.next_version());
        objects.secrets.insert(key, secret);
        Ok(())
    }

    pub fn put_pod(&self, mut pod: Pod) -> StoreResult<()> {
        let key = key_of("Pod", &pod)?;
        let mut objects = self.objects();
        pod.metadata.resource_version = Some(objects.next_version());
        objects.pods.insert(key, pod);
        Ok(())
    }

    /// Set the phase a pod reports, e.g. `Succeeded`.
    pub fn set_pod_phase(&self, key: &ObjectKey, phase: &str) {
        let mut objects = self.objects();
        let version = objects.next_version();
        if let Some(pod) = objects.pods.get_mut(key) {
            pod.status.get_or_insert_with(PodStatus::default).phase = Some(phase.to_string());
            pod.metadata.resource_version = Some(version);
        }
    }

    /// Set the log output a pod will stream.
    pub fn set_pod_logs(&self, key: &ObjectKey, logs: impl Into<Vec<u8>>) {
        self.objects().logs.insert(key.clone(), logs.into());
    }

    // ── Failure injection ──────────────────────────────────────────

    /// Make the next `times` calls of `op` fail with `StoreError::Unavailable`.
    pub fn fail_next(&self, op: Operation, times: u32) {
        self.objects().failures.insert(op, times);
    }

    /// Make the next `times` status writes fail with a conflict, as if
    /// another writer had updated the table in between.
    pub fn conflict_next_status_updates(&self, times: u32) {
        self.objects().pending_conflicts = times;
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn table(&self, key: &ObjectKey) -> Option<Table> {
        self.objects().tables.get(key).cloned()
    }

    pub fn pod(&self, key: &ObjectKey) -> Option<Pod> {
        self.objects().pods.get(key).cloned()
    }

    pub fn config_map(&self, key: &ObjectKey) -> Option<ConfigMap> {
        self.objects().config_maps.get(key).cloned()
    }

    pub fn pod_keys(&self) -> Vec<ObjectKey> {
        self.objects().pods.keys().cloned().collect()
    }

    pub fn config_map_keys(&self) -> Vec<ObjectKey> {
        self.objects().config_maps.keys().cloned().collect()
    }

    /// Number of successful table status writes so far.
    pub fn status_writes(&self) -> u32 {
        self.objects().status_writes
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    // ── Tables ─────────────────────────────────────────────────────

    async fn get_table(&self, key: &ObjectKey) -> StoreResult<Option<Table>> {
        let mut objects = self.objects();
        objects.take_failure(Operation::GetTable)?;
        Ok(objects.tables.get(key).cloned())
    }

    async fn update_table_status(&self, table: &Table) -> StoreResult<Table> {
        let key = key_of("Table", table)?;
        let mut objects = self.objects();
        objects.take_failure(Operation::UpdateTableStatus)?;

        if objects.pending_conflicts > 0 {
            objects.pending_conflicts -= 1;
            // Simulate a concurrent writer bumping the version.
            let version = objects.next_version();
            if let Some(stored) = objects.tables.get_mut(&key) {
                stored.metadata.resource_version = Some(version);
            }
            return Err(StoreError::Conflict {
                kind: "Table",
                key: key.to_string(),
            });
        }

        let version = objects.next_version();
        let stored = objects.tables.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            kind: "Table",
            key: key.to_string(),
        })?;

        if table.metadata.resource_version.is_some()
            && table.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(StoreError::Conflict {
                kind: "Table",
                key: key.to_string(),
            });
        }

        stored.status = table.status.clone();
        stored.metadata.resource_version = Some(version);
        let updated = stored.clone();
        objects.status_writes += 1;
        debug!(%key, "table status stored");
        Ok(updated)
    }

    // ── Databases & secrets ────────────────────────────────────────

    async fn get_database(&self, key: &ObjectKey) -> StoreResult<Option<Database>> {
        let mut objects = self.objects();
        objects.take_failure(Operation::GetDatabase)?;
        Ok(objects.databases.get(key).cloned())
    }

    async fn get_secret(&self, key: &ObjectKey) -> StoreResult<Option<Secret>> {
        let mut objects = self.objects();
        objects.take_failure(Operation::GetSecret)?;
        Ok(objects.secrets.get(key).cloned())
    }

    // ── Pods ───────────────────────────────────────────────────────

    async fn get_pod(&self, key: &ObjectKey) -> StoreResult<Option<Pod>> {
        let mut objects = self.objects();
        objects.take_failure(Operation::GetPod)?;
        Ok(objects.pods.get(key).cloned())
    }

    async fn create_pod(&self, pod: &Pod) -> StoreResult<Pod> {
        let key = key_of("Pod", pod)?;
        let mut objects = self.objects();
        objects.take_failure(Operation::CreatePod)?;
        if objects.pods.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "Pod",
                key: key.to_string(),
            });
        }
        let mut created = pod.clone();
        created.metadata.resource_version = Some(objects.next_version());
        created
            .status
            .get_or_insert_with(PodStatus::default)
            .phase
            .get_or_insert_with(|| "Pending".to_string());
        objects.pods.insert(key.clone(), created.clone());
        debug!(%key, "pod created");
        Ok(created)
    }

    async fn delete_pod(&self, key: &ObjectKey) -> StoreResult<()> {
        let mut objects = self.objects();
        objects.take_failure(Operation::DeletePod)?;
        objects.logs.remove(key);
        match objects.pods.remove(key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                kind: "Pod",
                key: key.to_string(),
            }),
        }
    }

    async fn pod_logs(&self, key: &ObjectKey) -> StoreResult<LogStream> {
        let mut objects = self.objects();
        objects.take_failure(Operation::PodLogs)?;
        if !objects.pods.contains_key(key) {
            return Err(StoreError::NotFound {
                kind: "Pod",
                key: key.to_string(),
            });
        }
        let bytes = objects.logs.get(key).cloned().unwrap_or_default();
        Ok(Box::pin(Cursor::new(bytes)))
    }

    // ── ConfigMaps ─────────────────────────────────────────────────

    async fn get_config_map(&self, key: &ObjectKey) -> StoreResult<Option<ConfigMap>> {
        let mut objects = self.objects();
        objects.take_failure(Operation::GetConfigMap)?;
        Ok(objects.config_maps.get(key).cloned())
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> StoreResult<ConfigMap> {
        let key = key_of("ConfigMap", config_map)?;
        let mut objects = self.objects();
        objects.take_failure(Operation::CreateConfigMap)?;
        if objects.config_maps.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "ConfigMap",
                key: key.to_string(),
            });
        }
        let mut created = config_map.clone();
        created.metadata.resource_version = Some(objects.next_version());
        objects.config_maps.insert(key.clone(), created.clone());
        debug!(%key, "config map created");
        Ok(created)
    }

    async fn delete_config_map(&self, key: &ObjectKey) -> StoreResult<()> {
        let mut objects = self.objects();
        objects.take_failure(Operation::DeleteConfigMap)?;
        match objects.config_maps.remove(key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                kind: "ConfigMap",
                key: key.to_string(),
            }),
        }
    }
}
