//! The `ResourceStore` capability.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::io::AsyncBufRead;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::{Resource, ResourceExt};

use tablewright_core::{Database, Table};

use crate::error::StoreResult;

/// A pod's combined log output, readable once.
pub type LogStream = Pin<Box<dyn AsyncBufRead + Send>>;

/// Namespace + name of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an object, or `None` if it has no namespace.
    pub fn of<K: Resource>(obj: &K) -> Option<Self> {
        Some(Self::new(obj.namespace()?, obj.name_any()))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Typed access to the objects the controller reads and writes.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_table(&self, key: &ObjectKey) -> StoreResult<Option<Table>>;

    /// Persist `table.status`. The write is conditional on `table`'s
    /// resource version still being current.
    async fn update_table_status(&self, table: &Table) -> StoreResult<Table>;

    async fn get_database(&self, key: &ObjectKey) -> StoreResult<Option<Database>>;

    async fn get_secret(&self, key: &ObjectKey) -> StoreResult<Option<Secret>>;

    async fn get_pod(&self, key: &ObjectKey) -> StoreResult<Option<Pod>>;

    async fn create_pod(&self, pod: &Pod) -> StoreResult<Pod>;

    async fn delete_pod(&self, key: &ObjectKey) -> StoreResult<()>;

    async fn get_config_map(&self, key: &ObjectKey) -> StoreResult<Option<ConfigMap>>;

    async fn create_config_map(&self, config_map: &ConfigMap) -> StoreResult<ConfigMap>;

    async fn delete_config_map(&self, key: &ObjectKey) -> StoreResult<()>;

    /// Open the log stream of a pod.
    async fn pod_logs(&self, key: &ObjectKey) -> StoreResult<LogStream>;
}
