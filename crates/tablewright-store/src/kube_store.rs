//! KubeStore — `ResourceStore` over a live Kubernetes API server.

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::api::{Api, DeleteParams, LogParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use tracing::debug;

use tablewright_core::{Database, Table};

use crate::error::{StoreError, StoreResult};
use crate::store::{LogStream, ObjectKey, ResourceStore};

/// HTTP status the API server answers with for a missing object.
const NOT_FOUND: u16 = 404;
/// HTTP status for create-on-existing and stale-version writes.
const CONFLICT: u16 = 409;

/// Store backed by a `kube::Client`.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, key: &ObjectKey) -> StoreResult<Option<K>>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = self.api(&key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn create<K>(&self, kind: &'static str, obj: &K) -> StoreResult<K>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + serde::Serialize
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        let key = ObjectKey::of(obj)
            .ok_or_else(|| StoreError::InvalidObject(format!("{kind} has no namespace")))?;
        let api: Api<K> = self.api(&key.namespace);
        match api.create(&PostParams::default(), obj).await {
            Ok(created) => {
                debug!(%key, kind, "object created");
                Ok(created)
            }
            Err(kube::Error::Api(ae)) if ae.code == CONFLICT => Err(StoreError::AlreadyExists {
                kind,
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete<K>(&self, kind: &'static str, key: &ObjectKey) -> StoreResult<()>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = self.api(&key.namespace);
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!(%key, kind, "object deleted");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == NOT_FOUND => Err(StoreError::NotFound {
                kind,
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_table(&self, key: &ObjectKey) -> StoreResult<Option<Table>> {
        self.get(key).await
    }

    async fn update_table_status(&self, table: &Table) -> StoreResult<Table> {
        let key = ObjectKey::of(table)
            .ok_or_else(|| StoreError::InvalidObject("Table has no namespace".into()))?;
        let api: Api<Table> = self.api(&key.namespace);

        // A resourceVersion in the patch makes the write conditional.
        let patch = json!({
            "metadata": { "resourceVersion": table.resource_version() },
            "status": table.status,
        });

        match api
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(updated) => {
                debug!(%key, plans = updated.plans().len(), "table status written");
                Ok(updated)
            }
            Err(kube::Error::Api(ae)) if ae.code == CONFLICT => Err(StoreError::Conflict {
                kind: "Table",
                key: key.to_string(),
            }),
            Err(kube::Error::Api(ae)) if ae.code == NOT_FOUND => Err(StoreError::NotFound {
                kind: "Table",
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_database(&self, key: &ObjectKey) -> StoreResult<Option<Database>> {
        self.get(key).await
    }

    async fn get_secret(&self, key: &ObjectKey) -> StoreResult<Option<Secret>> {
        self.get(key).await
    }

    async fn get_pod(&self, key: &ObjectKey) -> StoreResult<Option<Pod>> {
        self.get(key).await
    }

    async fn create_pod(&self, pod: &Pod) -> StoreResult<Pod> {
        self.create("Pod", pod).await
    }

    async fn delete_pod(&self, key: &ObjectKey) -> StoreResult<()> {
        self.delete::<Pod>("Pod", key).await
    }

    async fn get_config_map(&self, key: &ObjectKey) -> StoreResult<Option<ConfigMap>> {
        self.get(key).await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> StoreResult<ConfigMap> {
        self.create("ConfigMap", config_map).await
    }

    async fn delete_config_map(&self, key: &ObjectKey) -> StoreResult<()> {
        self.delete::<ConfigMap>("ConfigMap", key).await
    }

    async fn pod_logs(&self, key: &ObjectKey) -> StoreResult<LogStream> {
        let api: Api<Pod> = self.api(&key.namespace);
        match api.log_stream(&key.name, &LogParams::default()).await {
            Ok(stream) => Ok(Box::pin(stream)),
            Err(kube::Error::Api(ae)) if ae.code == NOT_FOUND => Err(StoreError::NotFound {
                kind: "Pod",
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
