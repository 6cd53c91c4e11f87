//! Test-tree addressing.
//!
//! Every group and test has an id of the form `<file>[<scope>]`, where the
//! scope is a colon-separated path of positions (`./spec/a_spec.rb[2:1:3]` is
//! the third child of the first child of the second top-level group in that
//! file). A scope `n:m` contains every scope that starts with `n:m`.
//!
//! The empty scope is the sentinel carried by the end-of-run marker and by
//! ids with no scope at all. It is never equal to, never contains, and is
//! never contained by anything, so a target carrying it falls through every
//! group without matching.

use std::fmt;

use crate::ScopeError;

/// A position in the test tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope {
    segments: Vec<String>,
}

impl Scope {
    /// Parses `n:m:q` into `[n, m, q]`. The empty string parses to the
    /// sentinel scope.
    pub fn parse(scoped_id: &str) -> Self {
        let segments = if scoped_id.is_empty() {
            Vec::new()
        } else {
            scoped_id.split(':').map(str::to_owned).collect()
        };
        Self { segments }
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// The empty scope, which matches nothing.
    pub fn is_sentinel(&self) -> bool {
        self.segments.is_empty()
    }

    /// The scope of the `position`th (1-based) child of this scope.
    pub fn child(&self, position: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(position.to_string());
        Self { segments }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join(":"))
    }
}

/// `inner` starts with all of `outer`'s segments.
///
/// Reflexive and transitive; false whenever either side is the sentinel.
pub fn contains(outer: &Scope, inner: &Scope) -> bool {
    if outer.is_sentinel() || inner.is_sentinel() {
        return false;
    }
    inner.segments.len() >= outer.segments.len()
        && inner.segments[..outer.segments.len()] == outer.segments[..]
}

/// `inner` is exactly one level below `outer`.
///
/// Only meaningful once [`contains`] holds; asking about scopes that are not
/// nested is a traversal bug and reported as an error.
pub fn directly_contains(outer: &Scope, inner: &Scope) -> Result<bool, ScopeError> {
    if !contains(outer, inner) {
        return Err(ScopeError {
            outer: outer.to_string(),
            inner: inner.to_string(),
        });
    }
    Ok(inner.depth() == outer.depth() + 1)
}

/// Same file, identical scope.
pub fn is_exact_match(
    target_scope: &Scope,
    node_scope: &Scope,
    target_file: &str,
    node_file: &str,
) -> bool {
    !target_scope.is_sentinel() && target_file == node_file && target_scope == node_scope
}

/// File plus scope: uniquely identifies one node of a loaded suite.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress {
    pub file: String,
    pub scope: Scope,
}

impl NodeAddress {
    pub fn new(file: impl Into<String>, scope: Scope) -> Self {
        Self {
            file: file.into(),
            scope,
        }
    }

    /// Splits an id like `./spec/a_spec.rb[1:2]` into its file and scope.
    ///
    /// Segments are opaque: `file[x:y]` has the scope `x:y`. Ids without a
    /// non-empty bracketed scope keep the whole string as the file and get
    /// the sentinel scope, so they match no node.
    pub fn parse_id(id: &str) -> Self {
        if let Some(body) = id.strip_suffix(']')
            && let Some(open) = body.rfind('[')
        {
            let scoped_id = &body[open + 1..];
            if !scoped_id.trim().is_empty() {
                return Self::new(&body[..open], Scope::parse(scoped_id));
            }
        }
        Self::new(id, Scope::default())
    }

    /// Renders back to `<file>[<scope>]`.
    pub fn id(&self) -> String {
        format!("{}[{}]", self.file, self.scope)
    }

    pub fn child(&self, position: usize) -> Self {
        Self::new(self.file.clone(), self.scope.child(position))
    }

    /// This node is a group that contains `other`.
    pub fn contains(&self, other: &NodeAddress) -> bool {
        self.file == other.file && contains(&self.scope, &other.scope)
    }

    pub fn matches(&self, other: &NodeAddress) -> bool {
        is_exact_match(&self.scope, &other.scope, &self.file, &other.file)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.file, self.scope)
    }
}
