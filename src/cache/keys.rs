//! Cache key construction.
//!
//! A [`CacheKey`] is an opaque string that must encode every input affecting
//! the cached value. Keys are built as `namespace:name=value:name=value`, with
//! `%`, `:` and `=` percent-escaped in every segment so that two different
//! parameter lists can never produce the same key.

use std::fmt::{self, Display, Write as _};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Start a key in the given namespace.
    pub fn new(namespace: &str) -> Self {
        let mut key = String::with_capacity(namespace.len() + 16);
        push_escaped(&mut key, namespace);
        Self(key)
    }

    /// Append a named parameter. Callers must append parameters in a fixed order.
    pub fn with(mut self, name: &str, value: impl Display) -> Self {
        self.0.push(':');
        push_escaped(&mut self.0, name);
        self.0.push('=');
        push_escaped(&mut self.0, &value.to_string());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix matching every key created in `namespace`.
    pub fn namespace_prefix(namespace: &str) -> String {
        let mut prefix = String::with_capacity(namespace.len() + 1);
        push_escaped(&mut prefix, namespace);
        prefix.push(':');
        prefix
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn push_escaped(out: &mut String, segment: &str) {
    for ch in segment.chars() {
        match ch {
            '%' | ':' | '=' => {
                let _ = write!(out, "%{:02X}", ch as u32);
            }
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_produce_identical_keys() {
        let a = CacheKey::new("overview").with("from", 1).with("top", 10);
        let b = CacheKey::new("overview").with("from", 1).with("top", 10);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "overview:from=1:top=10");
    }

    #[test]
    fn separators_in_values_cannot_forge_parameters() {
        let smuggled = CacheKey::new("search").with("q", "a:page=2");
        let honest = CacheKey::new("search").with("q", "a").with("page", 2);
        assert_ne!(smuggled, honest);
        assert_eq!(smuggled.as_str(), "search:q=a%3Apage%3D2");
    }

    #[test]
    fn escape_character_is_itself_escaped() {
        let literal = CacheKey::new("search").with("q", "%3A");
        let colon = CacheKey::new("search").with("q", ":");
        assert_ne!(literal, colon);
    }

    #[test]
    fn namespace_prefix_matches_built_keys() {
        let key = CacheKey::new("revday").with("from", 5);
        assert!(key.as_str().starts_with(&CacheKey::namespace_prefix("revday")));
        assert!(!key.as_str().starts_with(&CacheKey::namespace_prefix("rev")));
    }
}
