//! Structured query keys and prefix matching.
//!
//! A [`QueryKey`] names a fetchable resource: a resource name followed by
//! zero or more typed segments. Keys compare structurally, and a key acts as
//! a prefix of every key that shares its resource name and leading segments.
//! Prefix matching is what drives bulk invalidation: invalidating `books`
//! also invalidates `books/filtered/dune`.
//!
//! ```
//! use folio::QueryKey;
//!
//! let all = QueryKey::new("books");
//! let filtered = QueryKey::new("books").with("filtered").with("dune");
//!
//! assert!(all.is_prefix_of(&filtered));
//! assert!(!filtered.is_prefix_of(&all));
//! assert_eq!(filtered.to_string(), "books/filtered/dune");
//! ```

use std::fmt;

/// A single typed segment following the resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeySegment {
    /// A string identifier, e.g. a filter name or search term.
    Str(String),
    /// A numeric identifier, e.g. a record id.
    Int(i64),
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for KeySegment {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for KeySegment {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for KeySegment {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for KeySegment {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for KeySegment {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

/// Identifies a cacheable read resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    resource: String,
    segments: Vec<KeySegment>,
}

impl QueryKey {
    /// Creates a key for the given resource with no further segments.
    #[must_use]
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            segments: Vec::new(),
        }
    }

    /// Returns this key extended by one segment.
    #[must_use]
    pub fn with(mut self, segment: impl Into<KeySegment>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// The resource name.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The segments after the resource name.
    #[must_use]
    pub fn segments(&self) -> &[KeySegment] {
        &self.segments
    }

    /// Returns `true` if `other` equals this key or extends it.
    #[must_use]
    pub fn is_prefix_of(&self, other: &QueryKey) -> bool {
        self.resource == other.resource && other.segments.starts_with(&self.segments)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource)?;
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl From<&str> for QueryKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for QueryKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&QueryKey> for QueryKey {
    fn from(value: &QueryKey) -> Self {
        value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_structural_equality() {
        let a = QueryKey::new("book").with(42);
        let b = QueryKey::new("book").with(42_i64);
        let c = QueryKey::new("book").with("42");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_prefix_of_itself() {
        let key = QueryKey::new("books").with("filtered");
        assert!(key.is_prefix_of(&key));
    }

    #[test]
    fn test_prefix_matching() {
        let books = QueryKey::new("books");
        let filtered = QueryKey::new("books").with("filtered").with("x");
        let publishers = QueryKey::new("publishers");

        assert!(books.is_prefix_of(&filtered));
        assert!(!filtered.is_prefix_of(&books));
        assert!(!books.is_prefix_of(&publishers));
    }

    #[test]
    fn test_resource_name_must_match_exactly() {
        let book = QueryKey::new("book");
        let books = QueryKey::new("books");
        assert!(!book.is_prefix_of(&books));
    }

    #[test]
    fn test_segment_mismatch_is_not_prefix() {
        let a = QueryKey::new("books").with("filtered").with("a");
        let b = QueryKey::new("books").with("filtered").with("b");
        assert!(!a.is_prefix_of(&b));
    }

    #[test]
    fn test_display() {
        assert_eq!(QueryKey::new("books").to_string(), "books");
        assert_eq!(QueryKey::new("book").with(7).to_string(), "book/7");
        assert_eq!(
            QueryKey::new("books").with("filtered").with(3).to_string(),
            "books/filtered/3"
        );
    }

    #[test]
    fn test_from_str() {
        let key: QueryKey = "activeUser".into();
        assert_eq!(key.resource(), "activeUser");
        assert!(key.segments().is_empty());
    }
}
