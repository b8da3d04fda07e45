use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use pkg_constants::watch::{RESUBSCRIBE_BACKOFF_INITIAL_MS, RESUBSCRIBE_BACKOFF_MAX_MS};
use pkg_types::namespace::{NamespaceEvent, NamespaceSnapshot};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{ClientError, NamespaceEventStream, NamespaceSource};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to subscribe to namespace events: {0}")]
    Subscribe(#[source] ClientError),
    /// The stream ended with resubscription disabled; carries the failure,
    /// if the stream did not close cleanly.
    #[error(
        "namespace event stream terminated{}",
        .0.as_ref().map(|e| format!(": {}", e)).unwrap_or_default()
    )]
    Terminated(Option<ClientError>),
}

/// An open namespace watch, the last resource version it has seen and the
/// namespaces known to exist at that version.
pub struct Subscription {
    stream: NamespaceEventStream,
    resource_version: String,
    known: HashSet<String>,
}

impl Subscription {
    fn new(stream: NamespaceEventStream, snapshot: NamespaceSnapshot) -> Self {
        Self {
            stream,
            resource_version: snapshot.resource_version,
            known: snapshot.names.into_iter().collect(),
        }
    }

    pub fn resource_version(&self) -> &str {
        &self.resource_version
    }

    fn observe(&mut self, event: &NamespaceEvent) {
        if let Some(rv) = event.resource_version() {
            self.resource_version = rv.to_string();
        }
        match event {
            NamespaceEvent::Added { name, .. } | NamespaceEvent::Modified { name, .. } => {
                self.known.insert(name.clone());
            }
            NamespaceEvent::Deleted { name, .. } => {
                self.known.remove(name);
            }
            NamespaceEvent::Bookmark { .. } | NamespaceEvent::Error { .. } => {}
        }
    }
}

/// Why forwarding stopped.
enum StreamEnd {
    /// The server closed the watch cleanly (e.g. its timeout elapsed).
    Closed,
    Failed(ClientError),
    /// The receiving side of the channel is gone.
    ConsumerGone,
}

/// Feeds namespace events into the controller's channel.
///
/// The first subscription only establishes a starting resource version:
/// namespaces that already exist are not delivered. After that, events are
/// forwarded one at a time in arrival order. When resubscription is enabled a
/// cleanly closed watch is resumed from the last seen resource version, and a
/// failed one is re-established with exponential backoff followed by a
/// re-list. The re-list delivers an `Added` event only for namespaces the
/// watcher had not seen yet, i.e. those created while the watch was down.
pub struct NamespaceWatcher<S> {
    source: Arc<S>,
    resubscribe: bool,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl<S: NamespaceSource + 'static> NamespaceWatcher<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            resubscribe: true,
            initial_backoff: Duration::from_millis(RESUBSCRIBE_BACKOFF_INITIAL_MS),
            max_backoff: Duration::from_millis(RESUBSCRIBE_BACKOFF_MAX_MS),
        }
    }

    pub fn with_resubscribe(mut self, resubscribe: bool) -> Self {
        self.resubscribe = resubscribe;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Open the initial subscription. Failure here is fatal to the caller.
    pub async fn subscribe(&self) -> Result<Subscription, WatchError> {
        let snapshot = self.source.list().await.map_err(WatchError::Subscribe)?;
        let stream = self
            .source
            .watch(&snapshot.resource_version)
            .await
            .map_err(WatchError::Subscribe)?;
        info!(
            "Watching namespaces from resource version {} ({} existing namespaces not replayed)",
            snapshot.resource_version,
            snapshot.names.len()
        );
        Ok(Subscription::new(stream, snapshot))
    }

    /// Run the watch loop as a background task.
    pub fn start(
        self,
        subscription: Subscription,
        tx: mpsc::Sender<NamespaceEvent>,
    ) -> tokio::task::JoinHandle<Result<(), WatchError>> {
        tokio::spawn(async move { self.run(subscription, tx).await })
    }

    /// Forward events until the consumer goes away (`Ok`) or, with
    /// resubscription disabled, until the stream ends (`Terminated`).
    pub async fn run(
        &self,
        mut subscription: Subscription,
        tx: mpsc::Sender<NamespaceEvent>,
    ) -> Result<(), WatchError> {
        loop {
            match forward(&mut subscription, &tx).await {
                StreamEnd::ConsumerGone => {
                    info!("Event consumer stopped, closing namespace watch");
                    return Ok(());
                }
                StreamEnd::Closed if !self.resubscribe => {
                    warn!("Namespace watch closed and resubscription is disabled");
                    return Err(WatchError::Terminated(None));
                }
                StreamEnd::Failed(e) if !self.resubscribe => {
                    warn!("Namespace watch failed and resubscription is disabled: {}", e);
                    return Err(WatchError::Terminated(Some(e)));
                }
                StreamEnd::Closed => {
                    debug!(
                        "Namespace watch closed by server, resuming at resource version {}",
                        subscription.resource_version
                    );
                    match self.source.watch(&subscription.resource_version).await {
                        Ok(stream) => {
                            subscription.stream = stream;
                            continue;
                        }
                        Err(e) => warn!("Failed to resume namespace watch: {}", e),
                    }
                }
                StreamEnd::Failed(e) => warn!("Namespace watch failed: {}", e),
            }

            let next = self.resubscribe_with_backoff(&tx, &subscription.known).await;
            match next {
                Some(next) => subscription = next,
                None => {
                    info!("Event consumer stopped during resubscription");
                    return Ok(());
                }
            }
        }
    }

    /// Retry [`Self::resync`] with exponential backoff until it succeeds.
    /// Returns `None` if the consumer went away meanwhile.
    async fn resubscribe_with_backoff(
        &self,
        tx: &mpsc::Sender<NamespaceEvent>,
        known: &HashSet<String>,
    ) -> Option<Subscription> {
        let mut delay = self.initial_backoff;
        loop {
            info!(
                "Resubscribing to namespace events in {}ms",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            if tx.is_closed() {
                return None;
            }
            match self.resync(tx, known).await {
                Ok(next) => return next,
                Err(e) => warn!("Namespace resubscription failed: {}", e),
            }
            delay = (delay * 2).min(self.max_backoff);
        }
    }

    /// Re-list namespaces, open a watch from the list's resource version and
    /// deliver an `Added` event for every listed namespace not in `known`.
    async fn resync(
        &self,
        tx: &mpsc::Sender<NamespaceEvent>,
        known: &HashSet<String>,
    ) -> Result<Option<Subscription>, ClientError> {
        let snapshot = self.source.list().await?;
        let stream = self.source.watch(&snapshot.resource_version).await?;
        let missed: Vec<String> = snapshot
            .names
            .iter()
            .filter(|name| !known.contains(*name))
            .cloned()
            .collect();
        info!(
            "Re-listed {} namespaces at resource version {} ({} created while disconnected)",
            snapshot.names.len(),
            snapshot.resource_version,
            missed.len()
        );
        for name in missed {
            if tx.send(NamespaceEvent::added(name)).await.is_err() {
                return Ok(None);
            }
        }
        Ok(Some(Subscription::new(stream, snapshot)))
    }
}

async fn forward(subscription: &mut Subscription, tx: &mpsc::Sender<NamespaceEvent>) -> StreamEnd {
    while let Some(item) = subscription.stream.next().await {
        let event = match item {
            Ok(event) => event,
            Err(e) => return StreamEnd::Failed(e),
        };
        subscription.observe(&event);

        match event {
            NamespaceEvent::Bookmark { .. } => continue,
            NamespaceEvent::Error { code, message } => {
                // The watch is unusable after an in-band error; a 410 means
                // our resource version is too old to resume from.
                return StreamEnd::Failed(ClientError::Api {
                    code,
                    reason: "WatchError".to_string(),
                    message,
                });
            }
            event => {
                if tx.send(event).await.is_err() {
                    return StreamEnd::ConsumerGone;
                }
            }
        }
    }
    StreamEnd::Closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCluster, Operation};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn watcher(cluster: &InMemoryCluster) -> NamespaceWatcher<InMemoryCluster> {
        NamespaceWatcher::new(Arc::new(cluster.clone()))
            .with_backoff(Duration::from_millis(10), Duration::from_millis(40))
    }

    async fn recv(rx: &mut mpsc::Receiver<NamespaceEvent>) -> NamespaceEvent {
        timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    async fn wait_for_watchers(cluster: &InMemoryCluster, n: usize) {
        timeout(WAIT, async {
            while cluster.watcher_count().await != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for watch");
    }

    #[tokio::test]
    async fn existing_namespaces_are_not_replayed() {
        let cluster = InMemoryCluster::new();
        cluster.add_namespace("old").await;

        let w = watcher(&cluster);
        let sub = w.subscribe().await.unwrap();
        assert_eq!(sub.resource_version(), "1");
        let (tx, mut rx) = mpsc::channel(8);
        let _handle = w.start(sub, tx);

        cluster.add_namespace("team-a").await;
        assert_eq!(
            recv(&mut rx).await,
            NamespaceEvent::Added {
                name: "team-a".to_string(),
                resource_version: Some("2".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn forwards_in_order_and_drops_bookmarks() {
        let cluster = InMemoryCluster::new();
        let w = watcher(&cluster);
        let sub = w.subscribe().await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let _handle = w.start(sub, tx);

        cluster
            .emit(NamespaceEvent::Bookmark {
                resource_version: "5".to_string(),
            })
            .await;
        cluster.add_namespace("a").await;
        cluster.add_namespace("b").await;
        cluster.delete_namespace("a").await;

        assert_eq!(recv(&mut rx).await.name(), Some("a"));
        assert_eq!(recv(&mut rx).await.name(), Some("b"));
        let deleted = recv(&mut rx).await;
        assert_eq!(deleted.kind(), "deleted");
        assert_eq!(deleted.name(), Some("a"));
    }

    #[tokio::test]
    async fn subscribe_failure_is_reported() {
        let cluster = InMemoryCluster::new();
        cluster
            .fail_next(Operation::Watch, ClientError::Transport("refused".to_string()))
            .await;

        let err = watcher(&cluster).subscribe().await.err().unwrap();
        assert!(matches!(err, WatchError::Subscribe(ClientError::Transport(_))));
    }

    async fn wait_for_calls(cluster: &InMemoryCluster, op: Operation, n: usize) {
        timeout(WAIT, async {
            while cluster.calls(op).await < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for call");
    }

    #[tokio::test]
    async fn relist_delivers_only_namespaces_created_while_disconnected() {
        let cluster = InMemoryCluster::new();
        cluster.add_namespace("old").await;

        let w = watcher(&cluster);
        let sub = w.subscribe().await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let _handle = w.start(sub, tx);

        cluster.add_namespace("seen").await;
        assert_eq!(recv(&mut rx).await.name(), Some("seen"));

        cluster
            .disconnect_watchers(Some(ClientError::Transport("reset".to_string())))
            .await;
        // Nobody is watching when this one appears.
        cluster.add_namespace("team-b").await;

        assert_eq!(recv(&mut rx).await, NamespaceEvent::added("team-b"));
        assert_eq!(cluster.calls(Operation::List).await, 2);

        // Neither "old" nor "seen" was replayed before the new watch's events.
        cluster.add_namespace("team-c").await;
        let next = recv(&mut rx).await;
        assert_eq!(next.name(), Some("team-c"));
        assert!(next.resource_version().is_some());
    }

    #[tokio::test]
    async fn namespace_recreated_while_disconnected_is_replayed() {
        let cluster = InMemoryCluster::new();
        cluster.add_namespace("old").await;

        let w = watcher(&cluster);
        let sub = w.subscribe().await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let _handle = w.start(sub, tx);

        cluster.delete_namespace("old").await;
        assert_eq!(recv(&mut rx).await.kind(), "deleted");

        cluster
            .disconnect_watchers(Some(ClientError::Transport("reset".to_string())))
            .await;
        cluster.add_namespace("old").await;

        assert_eq!(recv(&mut rx).await, NamespaceEvent::added("old"));
    }

    #[tokio::test]
    async fn error_event_is_not_forwarded_and_triggers_relist() {
        let cluster = InMemoryCluster::new();
        cluster.add_namespace("old").await;

        let w = watcher(&cluster);
        let sub = w.subscribe().await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let _handle = w.start(sub, tx);

        cluster
            .emit(NamespaceEvent::Error {
                code: 410,
                message: "too old resource version".to_string(),
            })
            .await;
        wait_for_calls(&cluster, Operation::Watch, 2).await;
        assert_eq!(cluster.calls(Operation::List).await, 2);

        cluster.add_namespace("team-b").await;
        assert_eq!(recv(&mut rx).await.name(), Some("team-b"));
    }

    #[tokio::test]
    async fn retries_failed_resync() {
        let cluster = InMemoryCluster::new();
        cluster.add_namespace("old").await;

        let w = watcher(&cluster);
        let sub = w.subscribe().await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let _handle = w.start(sub, tx);

        cluster
            .fail_next(Operation::List, ClientError::Transport("refused".to_string()))
            .await;
        cluster
            .disconnect_watchers(Some(ClientError::Transport("reset".to_string())))
            .await;
        cluster.add_namespace("team-b").await;

        assert_eq!(recv(&mut rx).await, NamespaceEvent::added("team-b"));
        assert_eq!(cluster.calls(Operation::List).await, 3);
    }

    #[tokio::test]
    async fn resumes_after_clean_close_without_relist() {
        let cluster = InMemoryCluster::new();
        let w = watcher(&cluster);
        let sub = w.subscribe().await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let _handle = w.start(sub, tx);

        cluster.disconnect_watchers(None).await;
        wait_for_watchers(&cluster, 1).await;

        cluster.add_namespace("team-c").await;
        assert_eq!(recv(&mut rx).await.name(), Some("team-c"));
        assert_eq!(cluster.calls(Operation::List).await, 1);
    }

    #[tokio::test]
    async fn terminates_when_resubscription_disabled() {
        let cluster = InMemoryCluster::new();
        let w = watcher(&cluster).with_resubscribe(false);
        let sub = w.subscribe().await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = w.start(sub, tx);

        cluster.disconnect_watchers(None).await;

        let result = timeout(WAIT, handle).await.unwrap().unwrap();
        assert!(matches!(result, Err(WatchError::Terminated(None))));
        assert!(rx.recv().await.is_none());
        assert_eq!(cluster.calls(Operation::Watch).await, 1);
    }

    #[tokio::test]
    async fn termination_carries_the_stream_error() {
        let cluster = InMemoryCluster::new();
        let w = watcher(&cluster).with_resubscribe(false);
        let sub = w.subscribe().await.unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let handle = w.start(sub, tx);

        cluster
            .disconnect_watchers(Some(ClientError::Transport("reset".to_string())))
            .await;

        let err = timeout(WAIT, handle).await.unwrap().unwrap().unwrap_err();
        assert!(matches!(
            &err,
            WatchError::Terminated(Some(ClientError::Transport(msg))) if msg == "reset"
        ));
        assert_eq!(
            err.to_string(),
            "namespace event stream terminated: transport error: reset"
        );
    }

    #[tokio::test]
    async fn stops_when_consumer_is_gone() {
        let cluster = InMemoryCluster::new();
        let w = watcher(&cluster);
        let sub = w.subscribe().await.unwrap();
        let (tx, rx) = mpsc::channel(8);
        let handle = w.start(sub, tx);

        drop(rx);
        cluster.add_namespace("team-a").await;

        let result = timeout(WAIT, handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
