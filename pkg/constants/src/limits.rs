//! LimitRange shape and the configuration keys that feed it.

// ─── Configuration keys ───────────────────────────────────────────────────

pub const CPU_LIMIT_MIN: &str = "CPU_LIMIT_MIN";
pub const CPU_LIMIT_MAX: &str = "CPU_LIMIT_MAX";
pub const MEM_LIMIT_MIN: &str = "MEM_LIMIT_MIN";
pub const MEM_LIMIT_MAX: &str = "MEM_LIMIT_MAX";
pub const EPHEMERAL_STORAGE_MIN: &str = "EPHEMERAL_STORAGE_MIN";
pub const EPHEMERAL_STORAGE_MAX: &str = "EPHEMERAL_STORAGE_MAX";

/// Comma-separated list of extra namespaces to leave alone.
pub const EXCLUDED_NAMESPACES: &str = "EXCLUDED_NAMESPACES";

// ─── LimitRange object ────────────────────────────────────────────────────

/// Name of the LimitRange managed in every namespace.
pub const LIMIT_RANGE_NAME: &str = "default-limits";

/// Limits apply to the pod as a whole, not per container.
pub const LIMIT_TYPE_POD: &str = "Pod";

pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";
pub const RESOURCE_EPHEMERAL_STORAGE: &str = "ephemeral-storage";

/// Label stamped on every LimitRange this controller writes.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY_VALUE: &str = "limitwarden";
