//! Derives the repository addressed by a registry request and the library
//! (namespace) prefix the entitlement service grants access to.

use crate::constants::{API_PREFIX, CONTENT_TREE_PREFIX, ROUTE_MARKERS};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePath {
    pub repository: String,
    /// Repository up to and including its final `/`.
    pub library: String,
}

impl ResourcePath {
    pub fn from_repository(repository: &str) -> Self {
        let library = match repository.rfind('/') {
            Some(idx) => repository[..=idx].to_string(),
            None => String::new(),
        };
        Self {
            repository: repository.to_string(),
            library,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.repository.is_empty()
    }
}

/// Resolves the resource path, preferring the host-parsed repository name.
pub fn resolve(request_uri: &str, repository: Option<&str>) -> ResourcePath {
    if let Some(name) = repository.filter(|name| !name.is_empty()) {
        return ResourcePath::from_repository(name);
    }
    repository_from_uri(request_uri)
        .map(ResourcePath::from_repository)
        .unwrap_or_default()
}

/// Extracts `<name>` from `/v2/<name>/{manifests,tags,blobs}/...`.
pub fn repository_from_uri(request_uri: &str) -> Option<&str> {
    let path = request_uri
        .split_once('?')
        .map_or(request_uri, |(path, _)| path);
    let rest = path.strip_prefix(API_PREFIX)?;
    let end = ROUTE_MARKERS
        .iter()
        .filter_map(|marker| rest.rfind(marker))
        .max()?;
    let name = &rest[..end];
    (!name.is_empty()).then_some(name)
}

/// Content-tree path sent to the entitlement service for a library.
pub fn entitlement_path(library: &str) -> String {
    format!("{CONTENT_TREE_PREFIX}{library}")
}
