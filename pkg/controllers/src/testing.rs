use std::collections::BTreeMap;

use pkg_types::limits::LimitPolicy;

/// cpu 100m..500m, memory 128Mi..512Mi, ephemeral-storage 1Gi..2Gi.
pub(crate) fn test_policy() -> LimitPolicy {
    let values = BTreeMap::from([
        ("CPU_LIMIT_MIN", "100m"),
        ("CPU_LIMIT_MAX", "500m"),
        ("MEM_LIMIT_MIN", "128Mi"),
        ("MEM_LIMIT_MAX", "512Mi"),
        ("EPHEMERAL_STORAGE_MIN", "1Gi"),
        ("EPHEMERAL_STORAGE_MAX", "2Gi"),
    ]);
    LimitPolicy::load(|key| values.get(key).map(|v| v.to_string())).unwrap()
}
