//! Query scopes: which URIs a query is allowed to match.

use crate::uri::AssetUri;
use serde::{Deserialize, Serialize};

/// How a scope's roots are traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeTraversal {
    /// Every URI matches; roots are ignored.
    All,
    /// Only a URI equal to one of the roots matches.
    SelfOnly,
    /// URIs exactly one path segment below a root.
    Children,
    /// Any URI strictly below a root, at any depth.
    Descendants,
}

/// A set of root URIs plus a traversal mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryScope {
    pub roots: Vec<AssetUri>,
    pub traversal: ScopeTraversal,
}

impl QueryScope {
    /// Scope matching every URI.
    pub fn all() -> Self {
        Self { roots: Vec::new(), traversal: ScopeTraversal::All }
    }

    pub fn new(roots: Vec<AssetUri>, traversal: ScopeTraversal) -> Self {
        Self { roots, traversal }
    }

    /// Whether `uri` falls inside this scope.
    ///
    /// With a non-`All` traversal and no roots, nothing matches. A root
    /// whose relative path is empty denotes the whole mount for
    /// `Children`/`Descendants`.
    pub fn matches(&self, uri: &AssetUri) -> bool {
        match self.traversal {
            ScopeTraversal::All => true,
            ScopeTraversal::SelfOnly => self.roots.iter().any(|root| root == uri),
            ScopeTraversal::Children => self.roots.iter().any(|root| {
                matches!(remainder_below(root, uri), Some(rest) if !rest.contains('/'))
            }),
            ScopeTraversal::Descendants => {
                self.roots.iter().any(|root| remainder_below(root, uri).is_some())
            }
        }
    }
}

/// The non-empty path remainder of `uri` below `root`, if `uri` is a strict
/// descendant of `root` at a folder boundary. The root's path is treated as
/// if it carried a trailing `/`.
fn remainder_below<'u>(root: &AssetUri, uri: &'u AssetUri) -> Option<&'u str> {
    if !root.mount().eq_ignore_ascii_case(uri.mount()) {
        return None;
    }
    let rest = if root.relative().is_empty() {
        uri.relative()
    } else {
        uri.relative()
            .strip_prefix(root.relative())?
            .strip_prefix('/')?
    };
    (!rest.is_empty()).then_some(rest)
}
