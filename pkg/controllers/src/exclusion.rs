use std::collections::HashSet;

use pkg_constants::namespaces::{RESERVED_NAMESPACES, RESERVED_SUBSTRING};

/// Decides which namespaces are left without a LimitRange.
///
/// A namespace is excluded if its name contains [`RESERVED_SUBSTRING`]
/// anywhere, or if it exactly matches a reserved platform namespace or an
/// operator-supplied entry.
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    excluded: HashSet<String>,
}

impl ExclusionFilter {
    /// Reserved namespaces plus `extra`; entries are trimmed and blanks dropped.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let excluded = RESERVED_NAMESPACES
            .iter()
            .map(|ns| ns.to_string())
            .chain(
                extra
                    .into_iter()
                    .map(|ns| ns.as_ref().trim().to_string())
                    .filter(|ns| !ns.is_empty()),
            )
            .collect();
        Self { excluded }
    }

    /// Build from a comma-separated list such as `EXCLUDED_NAMESPACES`.
    pub fn from_csv(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn should_exclude(&self, name: &str) -> bool {
        name.contains(RESERVED_SUBSTRING) || self.excluded.contains(name)
    }

    /// Exact-match entries, sorted, for logging.
    pub fn entries(&self) -> Vec<&str> {
        let mut entries: Vec<&str> = self.excluded.iter().map(String::as_str).collect();
        entries.sort_unstable();
        entries
    }
}

impl Default for ExclusionFilter {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}
