//! Readiness gate — decides whether a Table's Database can be used yet.
//!
//! Tables are routinely applied before their Database, and Databases before
//! their connection Secret. Both are expected states and come back as
//! `Readiness::NotReady`, never as an error.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use tablewright_core::{Database, Engine};
use tablewright_store::{ObjectKey, ResourceStore};

use crate::connection::ConnectionResolver;
use crate::error::{ControllerError, ControllerResult};

/// Why a Database cannot be used yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotReadyReason {
    DatabaseMissing,
    CredentialUnavailable(String),
}

impl fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReadyReason::DatabaseMissing => f.write_str("database not found"),
            NotReadyReason::CredentialUnavailable(why) => {
                write!(f, "connection credential unavailable: {why}")
            }
        }
    }
}

/// A Database whose connection resolves and whose engine matches the table.
#[derive(Debug, Clone)]
pub struct ReadyDatabase {
    pub database: Database,
    pub engine: Engine,
}

#[derive(Debug, Clone)]
pub enum Readiness {
    Ready(ReadyDatabase),
    NotReady(NotReadyReason),
}

pub struct ReadinessGate {
    store: Arc<dyn ResourceStore>,
    resolver: ConnectionResolver,
}

impl ReadinessGate {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            resolver: ConnectionResolver::new(store.clone()),
            store,
        }
    }

    /// Check database `name` in `namespace` for a table of `table_engine`.
    pub async fn check(
        &self,
        namespace: &str,
        name: &str,
        table_engine: Engine,
    ) -> ControllerResult<Readiness> {
        let key = ObjectKey::new(namespace, name);
        debug!(database = %key, "checking database readiness");

        let Some(database) = self.store.get_database(&key).await? else {
            return Ok(Readiness::NotReady(NotReadyReason::DatabaseMissing));
        };

        let connection = &database.spec.connection;
        if let Err(e) = self.resolver.resolve(namespace, connection.uri()).await {
            if e.is_transient_absence() {
                return Ok(Readiness::NotReady(NotReadyReason::CredentialUnavailable(
                    e.to_string(),
                )));
            }
            return Err(e.into());
        }

        let database_engine = connection.engine();
        if database_engine != table_engine {
            return Err(ControllerError::EngineMismatch {
                database: key.to_string(),
                table_engine,
                database_engine,
            });
        }

        Ok(Readiness::Ready(ReadyDatabase {
            database,
            engine: database_engine,
        }))
    }
}
