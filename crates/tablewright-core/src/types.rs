//! Custom resource types.
//!
//! A `Table` declares the desired schema of one SQL table and carries the
//! history of plans made for it. A `Database` declares how to reach the
//! database a table lives in; it is owned by another controller and only
//! read here.

use std::fmt;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::fingerprint::fingerprint;

// ── Engines ────────────────────────────────────────────────────────

/// Database engines a table schema or a connection can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Postgres,
    Mysql,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Postgres => "postgres",
            Engine::Mysql => "mysql",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Table ──────────────────────────────────────────────────────────

/// Desired schema for one database table.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "schemas.tablewright.io",
    version = "v1alpha1",
    kind = "Table",
    plural = "tables",
    namespaced,
    status = "TableStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Database", "type":"string", "jsonPath":".spec.database"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    /// Name of the `Database` resource (same namespace) this table lives in.
    pub database: String,

    /// SQL name of the table. Defaults to the resource name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Engine-specific schema description.
    pub schema: TableSchema,
}

/// Schema description, tagged by engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TableSchema {
    Postgres(SqlTableSchema),
    Mysql(SqlTableSchema),
}

impl TableSchema {
    pub fn engine(&self) -> Engine {
        match self {
            TableSchema::Postgres(_) => Engine::Postgres,
            TableSchema::Mysql(_) => Engine::Mysql,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SqlTableSchema {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,

    #[serde(default)]
    pub columns: Vec<SqlTableColumn>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<SqlTableIndex>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<SqlTableForeignKey>,

    /// Drop the table instead of converging it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SqlTableColumn {
    pub name: String,

    #[serde(rename = "type")]
    pub column_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<SqlTableColumnConstraints>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SqlTableColumnConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_null: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SqlTableIndex {
    pub columns: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_unique: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SqlTableForeignKey {
    pub columns: Vec<String>,
    pub references: ForeignKeyReference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyReference {
    pub table: String,
    pub columns: Vec<String>,
}

/// Observed state of a Table: its plan history, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableStatus {
    #[serde(default)]
    pub plans: Vec<Plan>,
}

/// A proposed DDL change for one table fingerprint.
///
/// Timestamps are Unix seconds; `0` means the event has not happened.
/// Approval and rejection are written by users, never by the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Fingerprint of the schema this plan was made for.
    pub name: String,

    #[serde(default)]
    pub ddl: String,

    #[serde(default)]
    pub planned_at: i64,

    #[serde(default)]
    pub approved_at: i64,

    #[serde(default)]
    pub rejected_at: i64,

    #[serde(default)]
    pub executed_at: i64,
}

impl Plan {
    /// A freshly harvested plan, waiting for approval.
    pub fn planned(name: impl Into<String>, ddl: impl Into<String>, now: i64) -> Self {
        Self {
            name: name.into(),
            ddl: ddl.into(),
            planned_at: now,
            ..Default::default()
        }
    }

    pub fn is_approved(&self) -> bool {
        self.approved_at != 0
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected_at != 0
    }

    pub fn is_executed(&self) -> bool {
        self.executed_at != 0
    }

    /// Approved but neither executed nor rejected.
    pub fn is_pending_execution(&self) -> bool {
        self.is_approved() && !self.is_executed() && !self.is_rejected()
    }
}

impl Table {
    pub fn plans(&self) -> &[Plan] {
        self.status.as_ref().map(|s| s.plans.as_slice()).unwrap_or(&[])
    }

    /// Mutable access to the plan history, creating an empty status if needed.
    pub fn plans_mut(&mut self) -> &mut Vec<Plan> {
        &mut self.status.get_or_insert_with(TableStatus::default).plans
    }

    /// The plan recorded for `fingerprint`, if any.
    pub fn plan_for(&self, fingerprint: &str) -> Option<&Plan> {
        self.plans().iter().find(|p| p.name == fingerprint)
    }

    /// First plan (in history order) that is approved and not yet executed.
    pub fn first_pending_execution(&self) -> Option<&Plan> {
        self.plans().iter().find(|p| p.is_pending_execution())
    }

    /// Content hash of the current `spec.schema`.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        fingerprint(&self.spec.schema)
    }

    /// SQL name of the table.
    pub fn sql_name(&self) -> String {
        self.spec.name.clone().unwrap_or_else(|| self.name_any())
    }

    pub fn engine(&self) -> Engine {
        self.spec.schema.engine()
    }
}

// ── Database ───────────────────────────────────────────────────────

/// Connection info for one database instance.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "databases.tablewright.io",
    version = "v1alpha1",
    kind = "Database",
    plural = "databases",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    pub connection: DatabaseConnection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseConnection {
    Postgres(ConnectionUri),
    Mysql(ConnectionUri),
}

impl DatabaseConnection {
    pub fn engine(&self) -> Engine {
        match self {
            DatabaseConnection::Postgres(_) => Engine::Postgres,
            DatabaseConnection::Mysql(_) => Engine::Mysql,
        }
    }

    pub fn uri(&self) -> &ValueOrValueFrom {
        match self {
            DatabaseConnection::Postgres(c) | DatabaseConnection::Mysql(c) => &c.uri,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUri {
    pub uri: ValueOrValueFrom,
}

/// A credential given inline or by reference to a Secret key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValueOrValueFrom {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueFrom>,
}

impl ValueOrValueFrom {
    pub fn inline(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            value_from: None,
        }
    }

    pub fn secret(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            value: String::new(),
            value_from: Some(ValueFrom {
                secret_key_ref: Some(SecretKeyRef {
                    name: name.into(),
                    key: key.into(),
                }),
            }),
        }
    }

    pub fn secret_key_ref(&self) -> Option<&SecretKeyRef> {
        self.value_from.as_ref()?.secret_key_ref.as_ref()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValueFrom {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeyRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}
