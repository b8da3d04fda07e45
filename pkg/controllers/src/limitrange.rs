use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use pkg_constants::limits::{LIMIT_RANGE_NAME, MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use pkg_state::client::{ClientError, LimitRangeStore};
use pkg_types::limits::LimitPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Updated,
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileAction::Created => write!(f, "created"),
            ReconcileAction::Updated => write!(f, "updated"),
        }
    }
}

/// Makes the `default-limits` LimitRange of a namespace match the policy.
pub struct LimitRangeReconciler<S> {
    store: Arc<S>,
    policy: Arc<LimitPolicy>,
}

impl<S: LimitRangeStore> LimitRangeReconciler<S> {
    pub fn new(store: Arc<S>, policy: Arc<LimitPolicy>) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// Create the LimitRange if it is missing, otherwise overwrite its spec.
    ///
    /// The fetched metadata, `resourceVersion` included, is sent back on
    /// update, so a write racing with another client fails with a conflict
    /// instead of silently overwriting it. Errors are returned as-is; there
    /// is no retry.
    pub async fn reconcile(&self, namespace: &str) -> Result<ReconcileAction, ClientError> {
        match self.store.get(namespace, LIMIT_RANGE_NAME).await? {
            None => {
                let limit_range = self.policy.limit_range(namespace);
                self.store.create(namespace, &limit_range).await?;
                Ok(ReconcileAction::Created)
            }
            Some(mut existing) => {
                existing.spec = Some(self.policy.limit_range_spec());
                existing
                    .metadata
                    .labels
                    .get_or_insert_with(BTreeMap::new)
                    .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
                self.store
                    .replace(namespace, LIMIT_RANGE_NAME, &existing)
                    .await?;
                Ok(ReconcileAction::Updated)
            }
        }
    }
}
