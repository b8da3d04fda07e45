use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::LimitRange;
use pkg_types::namespace::{NamespaceEvent, NamespaceSnapshot};
use tokio::sync::{RwLock, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::client::{ClientError, LimitRangeStore, NamespaceEventStream, NamespaceSource};

/// Client operations that can be counted or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Create,
    Replace,
    List,
    Watch,
}

type WatchSender = mpsc::UnboundedSender<Result<NamespaceEvent, ClientError>>;

/// In-process stand-in for the API server.
///
/// Keeps namespaces and LimitRanges under a single monotonically increasing
/// revision, enforces `resourceVersion` preconditions on replace, fans
/// namespace changes out to open watches, and can be told to fail the next
/// call of any [`Operation`].
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    revision: u64,
    namespaces: BTreeSet<String>,
    limit_ranges: BTreeMap<(String, String), LimitRange>,
    watchers: Vec<WatchSender>,
    failures: HashMap<Operation, VecDeque<ClientError>>,
    calls: HashMap<Operation, usize>,
}

impl Inner {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    /// Count the call, then fail it if a failure was queued.
    fn enter(&mut self, op: Operation) -> Result<(), ClientError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn broadcast(&mut self, event: NamespaceEvent) {
        self.watchers.retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a namespace and notify open watches.
    pub async fn add_namespace(&self, name: &str) {
        let mut inner = self.inner.write().await;
        let rv = inner.next_revision();
        inner.namespaces.insert(name.to_string());
        inner.broadcast(NamespaceEvent::Added {
            name: name.to_string(),
            resource_version: Some(rv),
        });
    }

    /// Delete a namespace together with its LimitRanges and notify open watches.
    pub async fn delete_namespace(&self, name: &str) {
        let mut inner = self.inner.write().await;
        let rv = inner.next_revision();
        inner.namespaces.remove(name);
        inner.limit_ranges.retain(|(ns, _), _| ns != name);
        inner.broadcast(NamespaceEvent::Deleted {
            name: name.to_string(),
            resource_version: Some(rv),
        });
    }

    /// Push an arbitrary event to every open watch.
    pub async fn emit(&self, event: NamespaceEvent) {
        self.inner.write().await.broadcast(event);
    }

    /// End every open watch, optionally delivering `error` first.
    pub async fn disconnect_watchers(&self, error: Option<ClientError>) {
        let mut inner = self.inner.write().await;
        for tx in inner.watchers.drain(..) {
            if let Some(err) = &error {
                let _ = tx.send(Err(err.clone()));
            }
        }
    }

    pub async fn watcher_count(&self) -> usize {
        let mut inner = self.inner.write().await;
        inner.watchers.retain(|tx| !tx.is_closed());
        inner.watchers.len()
    }

    /// Queue `err` as the result of the next call to `op`.
    pub async fn fail_next(&self, op: Operation, err: ClientError) {
        let mut inner = self.inner.write().await;
        inner.failures.entry(op).or_default().push_back(err);
    }

    /// How many times `op` has been called, failed calls included.
    pub async fn calls(&self, op: Operation) -> usize {
        self.inner.read().await.calls.get(&op).copied().unwrap_or(0)
    }

    pub async fn limit_range(&self, namespace: &str, name: &str) -> Option<LimitRange> {
        let key = (namespace.to_string(), name.to_string());
        self.inner.read().await.limit_ranges.get(&key).cloned()
    }

    pub async fn limit_range_count(&self) -> usize {
        self.inner.read().await.limit_ranges.len()
    }

    /// Write a LimitRange out of band, as another client would.
    pub async fn put_limit_range(&self, namespace: &str, mut limit_range: LimitRange) {
        let mut inner = self.inner.write().await;
        let name = limit_range.metadata.name.clone().unwrap_or_default();
        limit_range.metadata.namespace = Some(namespace.to_string());
        limit_range.metadata.resource_version = Some(inner.next_revision());
        inner
            .limit_ranges
            .insert((namespace.to_string(), name), limit_range);
    }
}

#[async_trait]
impl LimitRangeStore for InMemoryCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<LimitRange>, ClientError> {
        let mut inner = self.inner.write().await;
        inner.enter(Operation::Get)?;
        let key = (namespace.to_string(), name.to_string());
        Ok(inner.limit_ranges.get(&key).cloned())
    }

    async fn create(
        &self,
        namespace: &str,
        limit_range: &LimitRange,
    ) -> Result<LimitRange, ClientError> {
        let mut inner = self.inner.write().await;
        inner.enter(Operation::Create)?;

        if !inner.namespaces.contains(namespace) {
            return Err(ClientError::not_found(format!(
                "namespaces \"{}\" not found",
                namespace
            )));
        }
        let name = limit_range.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());
        if inner.limit_ranges.contains_key(&key) {
            return Err(ClientError::already_exists(format!(
                "limitranges \"{}\" already exists",
                name
            )));
        }

        let mut stored = limit_range.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(inner.next_revision());
        inner.limit_ranges.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        limit_range: &LimitRange,
    ) -> Result<LimitRange, ClientError> {
        let mut inner = self.inner.write().await;
        inner.enter(Operation::Replace)?;

        let key = (namespace.to_string(), name.to_string());
        let current_rv = match inner.limit_ranges.get(&key) {
            Some(existing) => existing.metadata.resource_version.clone(),
            None => {
                return Err(ClientError::not_found(format!(
                    "limitranges \"{}\" not found",
                    name
                )));
            }
        };
        if let Some(expected) = &limit_range.metadata.resource_version
            && current_rv.as_ref() != Some(expected)
        {
            return Err(ClientError::conflict(format!(
                "the object has been modified; please apply your changes to the latest version (limitranges \"{}\")",
                name
            )));
        }

        let mut stored = limit_range.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(inner.next_revision());
        inner.limit_ranges.insert(key, stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl NamespaceSource for InMemoryCluster {
    async fn list(&self) -> Result<NamespaceSnapshot, ClientError> {
        let mut inner = self.inner.write().await;
        inner.enter(Operation::List)?;
        Ok(NamespaceSnapshot {
            names: inner.namespaces.iter().cloned().collect(),
            resource_version: inner.revision.to_string(),
        })
    }

    /// Changes made before the watch opens are not replayed, whatever
    /// `resource_version` says.
    async fn watch(&self, _resource_version: &str) -> Result<NamespaceEventStream, ClientError> {
        let mut inner = self.inner.write().await;
        inner.enter(Operation::Watch)?;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.watchers.push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
