//! Controller error types.

use thiserror::Error;

use tablewright_core::Engine;
use tablewright_store::StoreError;

use crate::connection::ConnectionError;

/// Errors surfaced by a reconciliation pass.
///
/// "Not ready" is not an error: it is reported as a requeue by the
/// dispatcher. Everything here is either an infrastructure failure, which
/// is retried with backoff, or a terminal misconfiguration, which waits
/// for the object to change.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error(
        "unable to deploy a {table_engine} table to {database_engine} database {database}"
    )]
    EngineMismatch {
        database: String,
        table_engine: Engine,
        database_engine: Engine,
    },

    #[error("unknown reconciliation target: {0}")]
    UnknownTarget(String),

    #[error("{kind} {name} has no namespace")]
    MissingNamespace { kind: &'static str, name: String },

    #[error("failed to read logs of pod {pod}: {source}")]
    LogRead {
        pod: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("gave up writing status of table {table} after {attempts} conflicting writes")]
    ConflictRetriesExhausted { table: String, attempts: u32 },
}

impl ControllerError {
    /// Errors that cannot succeed on retry until someone edits a resource.
    pub fn is_terminal(&self) -> bool {
        match self {
            ControllerError::EngineMismatch { .. } | ControllerError::UnknownTarget(_) => true,
            ControllerError::Connection(e) => e.is_permanent(),
            _ => false,
        }
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;
