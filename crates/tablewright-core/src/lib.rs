//! tablewright-core — shared types for the tablewright operator.
//!
//! - **`types`** — the `Table` and `Database` custom resources and the
//!   `Plan` records embedded in a Table's status
//! - **`fingerprint`** — content hash of a table schema, the identity of a plan
//! - **`jobs`** — labels, annotations and naming for worker job artifacts
//! - **`config`** — operator configuration (`tablewright.toml`)

pub mod config;
pub mod fingerprint;
pub mod jobs;
pub mod types;

pub use config::{ConfigError, OperatorConfig};
pub use fingerprint::fingerprint;
pub use jobs::JobRole;
pub use types::*;
