//! Namespaces that never receive a LimitRange.

/// Platform namespaces excluded by exact name.
pub const RESERVED_NAMESPACES: &[&str] = &[
    "default",
    "kube-system",
    "kube-public",
    "kube-node-lease",
    "istio-system",
];

/// Any namespace whose name contains this token is managed by Rancher
/// (`cattle-system`, `cattle-fleet-system`, ...) and is excluded.
pub const RESERVED_SUBSTRING: &str = "cattle";
