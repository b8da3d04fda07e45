use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use k8s_openapi::api::core::v1::{LimitRange, Namespace};
use kube::api::{Api, ListParams, PostParams, WatchEvent, WatchParams};
use kube::{Client, ResourceExt};
use pkg_constants::watch::WATCH_TIMEOUT_SECS;
use pkg_types::namespace::{NamespaceEvent, NamespaceSnapshot};
use thiserror::Error;
use tracing::{debug, info};

/// Failure talking to the cluster API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("failed to initialize cluster client: {0}")]
    Initialization(String),
    #[error("API error {code} {reason}: {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::api(404, "NotFound", message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::api(409, "AlreadyExists", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::api(409, "Conflict", message)
    }

    fn api(code: u16, reason: &str, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { code: 404, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Api { code: 409, .. })
    }
}

impl From<kube::Error> for ClientError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) => Self::Api {
                code: resp.code,
                reason: resp.reason,
                message: resp.message,
            },
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Live namespace events, in the order the API server delivers them.
pub type NamespaceEventStream = BoxStream<'static, Result<NamespaceEvent, ClientError>>;

/// Read/write access to LimitRange objects.
#[async_trait]
pub trait LimitRangeStore: Send + Sync {
    /// Fetch a LimitRange, or `None` if it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<LimitRange>, ClientError>;

    async fn create(
        &self,
        namespace: &str,
        limit_range: &LimitRange,
    ) -> Result<LimitRange, ClientError>;

    /// Replace an existing LimitRange. When `metadata.resourceVersion` is set
    /// the write only succeeds if the stored object still has that version.
    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        limit_range: &LimitRange,
    ) -> Result<LimitRange, ClientError>;
}

/// List/watch access to namespaces.
#[async_trait]
pub trait NamespaceSource: Send + Sync {
    async fn list(&self) -> Result<NamespaceSnapshot, ClientError>;

    /// Open a watch delivering changes made after `resource_version`.
    async fn watch(&self, resource_version: &str) -> Result<NamespaceEventStream, ClientError>;
}

/// Cluster client backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    /// Connect using the in-cluster service account, or the local kubeconfig
    /// when running outside a cluster.
    pub async fn connect() -> Result<Self, ClientError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClientError::Initialization(e.to_string()))?;
        info!("Cluster client initialized");
        Ok(Self { client })
    }

    fn limit_ranges(&self, namespace: &str) -> Api<LimitRange> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl LimitRangeStore for KubeClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<LimitRange>, ClientError> {
        Ok(self.limit_ranges(namespace).get_opt(name).await?)
    }

    async fn create(
        &self,
        namespace: &str,
        limit_range: &LimitRange,
    ) -> Result<LimitRange, ClientError> {
        Ok(self
            .limit_ranges(namespace)
            .create(&PostParams::default(), limit_range)
            .await?)
    }

    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        limit_range: &LimitRange,
    ) -> Result<LimitRange, ClientError> {
        Ok(self
            .limit_ranges(namespace)
            .replace(name, &PostParams::default(), limit_range)
            .await?)
    }
}

#[async_trait]
impl NamespaceSource for KubeClient {
    async fn list(&self) -> Result<NamespaceSnapshot, ClientError> {
        let list = self.namespaces().list(&ListParams::default()).await?;
        Ok(NamespaceSnapshot {
            names: list.items.iter().map(|ns| ns.name_any()).collect(),
            resource_version: list.metadata.resource_version.unwrap_or_default(),
        })
    }

    async fn watch(&self, resource_version: &str) -> Result<NamespaceEventStream, ClientError> {
        debug!("Opening namespace watch at resource version {}", resource_version);
        let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let stream = self.namespaces().watch(&params, resource_version).await?;
        Ok(stream
            .map(|item| item.map(namespace_event).map_err(ClientError::from))
            .boxed())
    }
}

fn namespace_event(event: WatchEvent<Namespace>) -> NamespaceEvent {
    match event {
        WatchEvent::Added(ns) => NamespaceEvent::Added {
            name: ns.name_any(),
            resource_version: ns.resource_version(),
        },
        WatchEvent::Modified(ns) => NamespaceEvent::Modified {
            name: ns.name_any(),
            resource_version: ns.resource_version(),
        },
        WatchEvent::Deleted(ns) => NamespaceEvent::Deleted {
            name: ns.name_any(),
            resource_version: ns.resource_version(),
        },
        WatchEvent::Bookmark(bookmark) => NamespaceEvent::Bookmark {
            resource_version: bookmark.metadata.resource_version,
        },
        WatchEvent::Error(e) => NamespaceEvent::Error {
            code: e.code,
            message: e.message,
        },
    }
}
