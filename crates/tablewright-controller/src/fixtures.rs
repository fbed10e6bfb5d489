//! Shared test fixtures.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use tablewright_core::*;
use tablewright_store::{MemoryStore, ObjectKey, ResourceStore};

use crate::jobs::{JobRequest, config_map_for, pod_for};
use crate::readiness::ReadyDatabase;

pub fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

pub fn secret(namespace: &str, name: &str, key: &str, value: &[u8]) -> Secret {
    Secret {
        metadata: meta(namespace, name),
        data: Some(BTreeMap::from([(
            key.to_string(),
            ByteString(value.to_vec()),
        )])),
        ..Default::default()
    }
}

pub fn users_schema() -> SqlTableSchema {
    SqlTableSchema {
        primary_key: vec!["id".to_string()],
        columns: vec![
            SqlTableColumn {
                name: "id".to_string(),
                column_type: "integer".to_string(),
                ..Default::default()
            },
            SqlTableColumn {
                name: "email".to_string(),
                column_type: "varchar(255)".to_string(),
                ..Default::default()
            },
        ],
        ..Default::default()
    }
}

pub fn postgres_table(namespace: &str, name: &str, database: &str) -> Table {
    Table {
        metadata: meta(namespace, name),
        spec: TableSpec {
            database: database.to_string(),
            name: None,
            schema: TableSchema::Postgres(users_schema()),
        },
        status: None,
    }
}

pub fn postgres_database(namespace: &str, name: &str, uri: ValueOrValueFrom) -> Database {
    Database {
        metadata: meta(namespace, name),
        spec: DatabaseSpec {
            connection: DatabaseConnection::Postgres(ConnectionUri { uri }),
        },
    }
}

pub fn mysql_database(namespace: &str, name: &str, uri: ValueOrValueFrom) -> Database {
    Database {
        metadata: meta(namespace, name),
        spec: DatabaseSpec {
            connection: DatabaseConnection::Mysql(ConnectionUri { uri }),
        },
    }
}

/// A store holding Postgres database `db1` (inline URI) in `default`.
pub fn store_with_ready_database() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .put_database(postgres_database(
            "default",
            "db1",
            ValueOrValueFrom::inline("postgres://db1:5432/app"),
        ))
        .unwrap();
    store
}

pub fn ready_database() -> ReadyDatabase {
    ReadyDatabase {
        database: postgres_database(
            "default",
            "db1",
            ValueOrValueFrom::inline("postgres://db1:5432/app"),
        ),
        engine: Engine::Postgres,
    }
}

/// Create the ConfigMap and Pod of a job directly, bypassing the lifecycle.
/// Returns the key both artifacts share.
pub async fn dispatch_job(store: &MemoryStore, table: &Table, request: &JobRequest) -> ObjectKey {
    let database = ready_database();
    let config_map = config_map_for(&database, table, request).unwrap();
    let pod = pod_for(&database, table, request, "worker:test", "IfNotPresent");
    store.create_config_map(&config_map).await.unwrap();
    let created = store.create_pod(&pod).await.unwrap();
    ObjectKey::of(&created).unwrap()
}
