//! Typed addresses into the configuration tree.

use std::fmt;

/// Matches exactly one segment, whatever its content.
pub const PATH_MATCH_ALL: &str = "*";

/// Matches one sequence index.
pub const PATH_MATCH_LIST: &str = "[]";

/// Matches any number of trailing segments. Only used in type-cast rules.
pub const PATH_MATCH_TAIL: &str = "**";

/// A path into a [`crate::Value`] tree.
///
/// Paths are values: two paths compare by segment equality, and a path can
/// key a map (the scoped named-mappings table, the type-cast table). The
/// textual form joins segments with `.`, so `TreePath::from("services.web")`
/// and `TreePath::new().next("services").next("web")` are the same path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct TreePath {
    parts: Vec<String>,
}

impl TreePath {
    /// The root path (no segments).
    pub fn new() -> Self {
        Self { parts: Vec::new() }
    }

    /// Build a path from literal segments.
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    /// The path one mapping key deeper.
    pub fn next(&self, part: impl Into<String>) -> Self {
        let mut parts = self.parts.clone();
        parts.push(part.into());
        Self { parts }
    }

    /// The path one sequence index deeper.
    pub fn next_index(&self, index: usize) -> Self {
        self.next(index.to_string())
    }

    /// The segments of this path.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// The last segment, or `""` for the root path.
    pub fn last(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or("")
    }

    /// The path with the last segment removed.
    pub fn parent(&self) -> Self {
        let mut parts = self.parts.clone();
        parts.pop();
        Self { parts }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Structural pattern match.
    ///
    /// Literal segments must be equal; `*` matches any one segment; `[]`
    /// matches a sequence position (a numeric segment or the literal `[]`
    /// marker used by pattern-driven recursion); `**` matches any tail,
    /// including the empty one.
    pub fn matches(&self, pattern: &TreePath) -> bool {
        Self::match_parts(&self.parts, &pattern.parts)
    }

    fn match_parts(parts: &[String], pattern: &[String]) -> bool {
        match pattern.first().map(String::as_str) {
            None => parts.is_empty(),
            Some(PATH_MATCH_TAIL) => {
                // A tail wildcard swallows zero or more segments.
                if Self::match_parts(parts, &pattern[1..]) {
                    return true;
                }
                match parts.first() {
                    Some(_) => Self::match_parts(&parts[1..], pattern),
                    None => false,
                }
            }
            Some(expected) => match parts.first() {
                None => false,
                Some(part) => {
                    Self::segment_matches(part, expected)
                        && Self::match_parts(&parts[1..], &pattern[1..])
                }
            },
        }
    }

    fn segment_matches(part: &str, expected: &str) -> bool {
        match expected {
            PATH_MATCH_ALL => true,
            PATH_MATCH_LIST => part == PATH_MATCH_LIST || part.parse::<usize>().is_ok(),
            literal => part == literal,
        }
    }
}

impl From<&str> for TreePath {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            return Self::new();
        }
        Self {
            parts: value.split('.').map(str::to_owned).collect(),
        }
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> TreePath {
        TreePath::from(s)
    }

    #[test]
    fn test_construction_and_display() {
        let path = TreePath::new().next("services").next("web").next_index(0);
        assert_eq!(path.to_string(), "services.web.0");
        assert_eq!(path, p("services.web.0"));
        assert_eq!(path.last(), "0");
        assert_eq!(path.parent(), p("services.web"));
        assert_eq!(TreePath::new().last(), "");
    }

    #[test]
    fn test_literal_match() {
        assert!(p("services.web").matches(&p("services.web")));
        assert!(!p("services.web").matches(&p("services.db")));
        assert!(!p("services").matches(&p("services.web")));
        assert!(!p("services.web.image").matches(&p("services.web")));
    }

    #[test]
    fn test_single_wildcard() {
        assert!(p("services.web").matches(&p("services.*")));
        assert!(p("services.web.ports").matches(&p("services.*.ports")));
        assert!(!p("services.web.ports").matches(&p("services.*")));
        // `*` also matches the sequence marker
        assert!(p("services.web.volumes.[]").matches(&p("services.*.volumes.*")));
    }

    #[test]
    fn test_list_wildcard() {
        assert!(p("services.web.ports.0.target").matches(&p("services.*.ports.[].target")));
        assert!(p("services.web.ports.[].target").matches(&p("services.*.ports.[].target")));
        assert!(!p("services.web.ports.tcp.target").matches(&p("services.*.ports.[].target")));
    }

    #[test]
    fn test_tail_wildcard() {
        let pattern = p("services.*.ulimits.**");
        assert!(p("services.web.ulimits").matches(&pattern));
        assert!(p("services.web.ulimits.nofile").matches(&pattern));
        assert!(p("services.web.ulimits.nofile.hard").matches(&pattern));
        assert!(!p("services.web.limits.nofile").matches(&pattern));
    }

    #[test]
    fn test_root_path() {
        assert!(TreePath::new().matches(&TreePath::new()));
        assert!(!p("services").matches(&TreePath::new()));
        assert_eq!(TreePath::from(""), TreePath::new());
    }
}
