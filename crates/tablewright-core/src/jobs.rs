//! Labels, annotations and names shared by the job orchestrator and the
//! harvester. A worker pod is correlated back to its Table only through
//! these labels, so both sides must agree on them exactly.

/// Role of a worker pod: `plan` or `table` (apply).
pub const ROLE_LABEL: &str = "tablewright-role";

/// Name of the Table a worker pod was dispatched for.
pub const TABLE_NAME_LABEL: &str = "tablewright-name";

/// Namespace of the Table a worker pod was dispatched for.
pub const TABLE_NAMESPACE_LABEL: &str = "tablewright-namespace";

/// Name of the plan an apply pod executes. An annotation, since plan names
/// are longer than a label value may be.
pub const PLAN_ANNOTATION: &str = "tablewright.io/plan";

/// Volume through which the config bundle is mounted into a worker pod.
pub const SPECS_VOLUME: &str = "specs";

/// Mount path of the `specs` volume inside the worker container.
pub const SPECS_MOUNT_PATH: &str = "/specs";

/// Config bundle keys.
pub const TABLE_SPEC_KEY: &str = "table.json";
pub const CONNECTION_KEY: &str = "connection.json";
pub const PLAN_DDL_KEY: &str = "plan.sql";

/// Environment variable carrying the connection URI into the worker.
pub const URI_ENV: &str = "TABLEWRIGHT_URI";

/// What a worker job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobRole {
    /// Produce a plan for the current schema.
    Plan,
    /// Execute an approved plan.
    Apply,
}

impl JobRole {
    /// Value of the role label on the job's pod.
    pub fn label_value(&self) -> &'static str {
        match self {
            JobRole::Plan => "plan",
            JobRole::Apply => "table",
        }
    }

    /// Parse a role label value. Unknown roles belong to other pods.
    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "plan" => Some(JobRole::Plan),
            "table" => Some(JobRole::Apply),
            _ => None,
        }
    }

    /// Worker subcommand for this role.
    pub fn command(&self) -> &'static str {
        match self {
            JobRole::Plan => "plan",
            JobRole::Apply => "apply",
        }
    }

    /// Deterministic name of the ConfigMap and Pod for a table's job.
    pub fn artifact_name(&self, table_name: &str) -> String {
        format!("{table_name}-{}", self.command())
    }
}
