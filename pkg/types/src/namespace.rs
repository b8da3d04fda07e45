/// A namespace lifecycle notification as delivered by the watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceEvent {
    Added {
        name: String,
        resource_version: Option<String>,
    },
    Modified {
        name: String,
        resource_version: Option<String>,
    },
    Deleted {
        name: String,
        resource_version: Option<String>,
    },
    /// Progress marker from the API server; carries no namespace.
    Bookmark { resource_version: String },
    /// Error object sent in-band by the API server (e.g. 410 Gone).
    Error { code: u16, message: String },
}

impl NamespaceEvent {
    /// An `Added` event without a resource version, as produced by a re-list.
    pub fn added(name: impl Into<String>) -> Self {
        Self::Added {
            name: name.into(),
            resource_version: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Modified { .. } => "modified",
            Self::Deleted { .. } => "deleted",
            Self::Bookmark { .. } => "bookmark",
            Self::Error { .. } => "error",
        }
    }

    /// Namespace the event is about, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Added { name, .. } | Self::Modified { name, .. } | Self::Deleted { name, .. } => {
                Some(name)
            }
            Self::Bookmark { .. } | Self::Error { .. } => None,
        }
    }

    pub fn resource_version(&self) -> Option<&str> {
        match self {
            Self::Added {
                resource_version, ..
            }
            | Self::Modified {
                resource_version, ..
            }
            | Self::Deleted {
                resource_version, ..
            } => resource_version.as_deref(),
            Self::Bookmark { resource_version } => Some(resource_version),
            Self::Error { .. } => None,
        }
    }
}

/// Result of listing namespaces: current names plus the collection's
/// resource version, from which a watch can start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceSnapshot {
    pub names: Vec<String>,
    pub resource_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let added = NamespaceEvent::Added {
            name: "team-a".to_string(),
            resource_version: Some("42".to_string()),
        };
        assert_eq!(added.kind(), "added");
        assert_eq!(added.name(), Some("team-a"));
        assert_eq!(added.resource_version(), Some("42"));

        let bookmark = NamespaceEvent::Bookmark {
            resource_version: "43".to_string(),
        };
        assert_eq!(bookmark.name(), None);
        assert_eq!(bookmark.resource_version(), Some("43"));

        let error = NamespaceEvent::Error {
            code: 410,
            message: "too old resource version".to_string(),
        };
        assert_eq!(error.kind(), "error");
        assert_eq!(error.name(), None);
        assert_eq!(error.resource_version(), None);

        assert_eq!(NamespaceEvent::added("x").resource_version(), None);
    }
}
