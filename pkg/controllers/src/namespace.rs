use std::fmt;

use pkg_constants::limits::LIMIT_RANGE_NAME;
use pkg_constants::namespaces::RESERVED_SUBSTRING;
use pkg_state::client::LimitRangeStore;
use pkg_types::namespace::NamespaceEvent;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::exclusion::ExclusionFilter;
use crate::limitrange::{LimitRangeReconciler, ReconcileAction};

/// What the controller did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Not an `Added` event.
    Ignored,
    Excluded,
    Reconciled(ReconcileAction),
    Failed,
}

/// Running totals of [`EventOutcome`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub ignored: u64,
    pub excluded: u64,
    pub created: u64,
    pub updated: u64,
    pub failed: u64,
}

impl ControllerStats {
    fn record(&mut self, outcome: EventOutcome) {
        match outcome {
            EventOutcome::Ignored => self.ignored += 1,
            EventOutcome::Excluded => self.excluded += 1,
            EventOutcome::Reconciled(ReconcileAction::Created) => self.created += 1,
            EventOutcome::Reconciled(ReconcileAction::Updated) => self.updated += 1,
            EventOutcome::Failed => self.failed += 1,
        }
    }
}

impl fmt::Display for ControllerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} updated={} excluded={} failed={} ignored={}",
            self.created, self.updated, self.excluded, self.failed, self.ignored
        )
    }
}

/// Single consumer of namespace events.
///
/// Events are handled strictly one after another: each `Added` namespace is
/// filtered and, unless excluded, reconciled to completion before the next
/// event is read. A failed reconciliation is logged and not retried.
pub struct NamespaceController<S> {
    reconciler: LimitRangeReconciler<S>,
    filter: ExclusionFilter,
}

impl<S: LimitRangeStore + 'static> NamespaceController<S> {
    pub fn new(reconciler: LimitRangeReconciler<S>, filter: ExclusionFilter) -> Self {
        Self { reconciler, filter }
    }

    /// Start the controller loop as a background task.
    pub fn start(self, rx: mpsc::Receiver<NamespaceEvent>) -> tokio::task::JoinHandle<ControllerStats> {
        tokio::spawn(self.run(rx))
    }

    /// Consume events until every sender is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<NamespaceEvent>) -> ControllerStats {
        info!(
            "NamespaceController started (excluded: {}; and any name containing '{}')",
            self.filter.entries().join(","),
            RESERVED_SUBSTRING
        );
        let mut stats = ControllerStats::default();
        while let Some(event) = rx.recv().await {
            stats.record(self.handle(&event).await);
        }
        info!("NamespaceController stopped ({})", stats);
        stats
    }

    pub async fn handle(&self, event: &NamespaceEvent) -> EventOutcome {
        let name = match event {
            NamespaceEvent::Added { name, .. } => name,
            other => {
                debug!(
                    "Ignoring {} event for namespace {}",
                    other.kind(),
                    other.name().unwrap_or("-")
                );
                return EventOutcome::Ignored;
            }
        };

        if self.filter.should_exclude(name) {
            info!("Namespace {} is excluded, skipping", name);
            return EventOutcome::Excluded;
        }

        match self.reconciler.reconcile(name).await {
            Ok(action) => {
                info!("Namespace {}: LimitRange {} {}", name, LIMIT_RANGE_NAME, action);
                EventOutcome::Reconciled(action)
            }
            Err(e) => {
                error!(
                    "Namespace {}: failed to reconcile LimitRange {}: {}",
                    name, LIMIT_RANGE_NAME, e
                );
                EventOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use pkg_state::client::ClientError;
    use pkg_state::memory::{InMemoryCluster, Operation};
    use pkg_state::watch::NamespaceWatcher;

    use crate::testing::test_policy;

    fn controller(cluster: &InMemoryCluster) -> NamespaceController<InMemoryCluster> {
        NamespaceController::new(
            LimitRangeReconciler::new(Arc::new(cluster.clone()), Arc::new(test_policy())),
            ExclusionFilter::from_csv("monitoring"),
        )
    }

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[tokio::test]
    async fn added_namespace_gets_policy() {
        let cluster = InMemoryCluster::new();
        cluster.add_namespace("team-a").await;

        let outcome = controller(&cluster)
            .handle(&NamespaceEvent::added("team-a"))
            .await;
        assert_eq!(outcome, EventOutcome::Reconciled(ReconcileAction::Created));

        let lr = cluster.limit_range("team-a", LIMIT_RANGE_NAME).await.unwrap();
        let item = &lr.spec.unwrap().limits[0];
        assert_eq!(item.type_, "Pod");
        assert_eq!(
            item.max,
            Some(BTreeMap::from([
                ("cpu".to_string(), q("500m")),
                ("ephemeral-storage".to_string(), q("2Gi")),
                ("memory".to_string(), q("512Mi")),
            ]))
        );
        assert_eq!(
            item.min,
            Some(BTreeMap::from([
                ("cpu".to_string(), q("100m")),
                ("ephemeral-storage".to_string(), q("1Gi")),
                ("memory".to_string(), q("128Mi")),
            ]))
        );
    }

    #[tokio::test]
    async fn duplicate_add_updates_without_change() {
        let cluster = InMemoryCluster::new();
        cluster.add_namespace("team-a").await;
        let controller = controller(&cluster);

        controller.handle(&NamespaceEvent::added("team-a")).await;
        let before = cluster.limit_range("team-a", LIMIT_RANGE_NAME).await.unwrap();

        let outcome = controller.handle(&NamespaceEvent::added("team-a")).await;
        assert_eq!(outcome, EventOutcome::Reconciled(ReconcileAction::Updated));

        let after = cluster.limit_range("team-a", LIMIT_RANGE_NAME).await.unwrap();
        assert_eq!(before.spec, after.spec);
        assert_eq!(before.metadata.labels, after.metadata.labels);
    }

    #[tokio::test]
    async fn excluded_namespace_is_never_reconciled() {
        let cluster = InMemoryCluster::new();
        let controller = controller(&cluster);
        for ns in ["kube-system", "monitoring", "rancher-cattle-ns"] {
            cluster.add_namespace(ns).await;
            let outcome = controller.handle(&NamespaceEvent::added(ns)).await;
            assert_eq!(outcome, EventOutcome::Excluded, "{ns}");
        }
        assert_eq!(cluster.calls(Operation::Get).await, 0);
        assert_eq!(cluster.limit_range_count().await, 0);
    }

    #[tokio::test]
    async fn non_added_events_are_ignored() {
        let cluster = InMemoryCluster::new();
        cluster.add_namespace("team-a").await;
        let controller = controller(&cluster);

        let events = [
            NamespaceEvent::Modified {
                name: "team-a".to_string(),
                resource_version: None,
            },
            NamespaceEvent::Deleted {
                name: "team-a".to_string(),
                resource_version: None,
            },
            NamespaceEvent::Bookmark {
                resource_version: "9".to_string(),
            },
            NamespaceEvent::Error {
                code: 500,
                message: "internal".to_string(),
            },
        ];
        for event in &events {
            assert_eq!(controller.handle(event).await, EventOutcome::Ignored);
        }
        assert_eq!(cluster.calls(Operation::Get).await, 0);
    }

    #[tokio::test]
    async fn failure_does_not_stop_the_loop() {
        let cluster = InMemoryCluster::new();
        cluster.add_namespace("team-a").await;
        cluster.add_namespace("team-b").await;
        cluster
            .fail_next(
                Operation::Create,
                ClientError::Transport("connection reset".to_string()),
            )
            .await;

        let (tx, rx) = mpsc::channel(8);
        tx.send(NamespaceEvent::added("team-a")).await.unwrap();
        tx.send(NamespaceEvent::added("kube-system")).await.unwrap();
        tx.send(NamespaceEvent::added("team-b")).await.unwrap();
        drop(tx);

        let stats = controller(&cluster).run(rx).await;
        assert_eq!(
            stats,
            ControllerStats {
                failed: 1,
                excluded: 1,
                created: 1,
                ..Default::default()
            }
        );
        assert!(cluster.limit_range("team-a", LIMIT_RANGE_NAME).await.is_none());
        assert!(cluster.limit_range("team-b", LIMIT_RANGE_NAME).await.is_some());
    }

    #[tokio::test]
    async fn watch_to_limit_range_end_to_end() {
        let cluster = InMemoryCluster::new();
        cluster.add_namespace("legacy").await;

        let watcher = NamespaceWatcher::new(Arc::new(cluster.clone()));
        let subscription = watcher.subscribe().await.unwrap();
        let (tx, rx) = mpsc::channel(8);
        let watch_handle = watcher.start(subscription, tx);
        let controller_handle = controller(&cluster).start(rx);

        cluster.add_namespace("kube-system").await;
        cluster.add_namespace("team-a").await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while cluster.limit_range("team-a", LIMIT_RANGE_NAME).await.is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("LimitRange was not created");

        // Pre-existing and excluded namespaces are left alone.
        assert!(cluster.limit_range("legacy", LIMIT_RANGE_NAME).await.is_none());
        assert!(cluster.limit_range("kube-system", LIMIT_RANGE_NAME).await.is_none());

        watch_handle.abort();
        let stats = controller_handle.await.unwrap();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.excluded, 1);
    }

    #[tokio::test]
    async fn transient_watch_error_leaves_existing_namespaces_alone() {
        let cluster = InMemoryCluster::new();
        cluster.add_namespace("legacy").await;

        let watcher = NamespaceWatcher::new(Arc::new(cluster.clone()))
            .with_backoff(Duration::from_millis(10), Duration::from_millis(40));
        let subscription = watcher.subscribe().await.unwrap();
        let (tx, rx) = mpsc::channel(8);
        let watch_handle = watcher.start(subscription, tx);
        let controller_handle = controller(&cluster).start(rx);

        cluster
            .disconnect_watchers(Some(ClientError::Transport("reset".to_string())))
            .await;
        cluster.add_namespace("team-a").await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while cluster.limit_range("team-a", LIMIT_RANGE_NAME).await.is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("namespace created during the outage was not reconciled");

        watch_handle.abort();
        let stats = controller_handle.await.unwrap();
        assert!(cluster.limit_range("legacy", LIMIT_RANGE_NAME).await.is_none());
        assert_eq!(
            stats,
            ControllerStats {
                created: 1,
                ..Default::default()
            }
        );
    }
}
