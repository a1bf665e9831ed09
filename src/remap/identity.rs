// src/remap/identity.rs
//! Per-run identity mapping for session and window ids

use crate::error::{Error, Result};
use std::collections::HashMap;
use uuid::Uuid;

/// Bidirectional map from original ids to their replayed replacements
///
/// Every mutation is a check-then-insert that completes before returning, so
/// an original id can never end up with two replacements. Lookups after the
/// first insertion always return the same id.
#[derive(Debug, Default)]
pub struct IdentityMapping {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl IdentityMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replacement for an original id, if one was assigned
    pub fn get(&self, original: &str) -> Option<&str> {
        self.forward.get(original).map(String::as_str)
    }

    /// Original id behind a replacement
    pub fn original_of(&self, replacement: &str) -> Option<&str> {
        self.reverse.get(replacement).map(String::as_str)
    }

    /// Existing replacement, or a freshly generated UUIDv7
    pub fn get_or_create(&mut self, original: &str) -> String {
        self.get_or_create_with(original, || Uuid::now_v7().to_string())
    }

    /// Existing replacement, or the one produced by `generate`
    pub fn get_or_create_with(&mut self, original: &str, generate: impl FnOnce() -> String) -> String {
        if let Some(existing) = self.forward.get(original) {
            return existing.clone();
        }
        let replacement = generate();
        self.insert(original, &replacement);
        replacement
    }

    /// Accept a caller-chosen replacement for an original id
    ///
    /// Re-assigning the same pair is a no-op. Mapping an original to a
    /// different id than before, or reusing a replacement already owned by
    /// another original, is an [`Error::IdentityConflict`].
    pub fn assign(&mut self, original: &str, replacement: &str) -> Result<()> {
        if let Some(existing) = self.forward.get(original) {
            if existing == replacement {
                return Ok(());
            }
            return Err(Error::IdentityConflict {
                original: original.to_string(),
                existing: existing.clone(),
                attempted: replacement.to_string(),
            });
        }

        if let Some(owner) = self.reverse.get(replacement) {
            return Err(Error::IdentityConflict {
                original: original.to_string(),
                existing: format!("{replacement} (owned by {owner})"),
                attempted: replacement.to_string(),
            });
        }

        self.insert(original, replacement);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    fn insert(&mut self, original: &str, replacement: &str) {
        self.forward
            .insert(original.to_string(), replacement.to_string());
        self.reverse
            .insert(replacement.to_string(), original.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_stable() {
        let mut mapping = IdentityMapping::new();
        let first = mapping.get_or_create("session-a");
        for _ in 0..10 {
            assert_eq!(mapping.get_or_create("session-a"), first);
        }
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.original_of(&first), Some("session-a"));
    }

    #[test]
    fn test_distinct_originals_get_distinct_ids() {
        let mut mapping = IdentityMapping::new();
        let a = mapping.get_or_create("a");
        let b = mapping.get_or_create("b");
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_assign_then_reuse() {
        let mut mapping = IdentityMapping::new();
        mapping.assign("A", "B").unwrap();
        assert_eq!(mapping.get_or_create("A"), "B");
        // Same pair again is fine
        mapping.assign("A", "B").unwrap();
        assert_eq!(mapping.get("A"), Some("B"));
    }

    #[test]
    fn test_assign_conflicts() {
        let mut mapping = IdentityMapping::new();
        mapping.assign("A", "B").unwrap();

        let err = mapping.assign("A", "C").unwrap_err();
        assert!(matches!(err, Error::IdentityConflict { .. }));

        let err = mapping.assign("other", "B").unwrap_err();
        assert!(matches!(err, Error::IdentityConflict { .. }));

        // Failed assignments leave the mapping untouched
        assert_eq!(mapping.get("A"), Some("B"));
        assert_eq!(mapping.get("other"), None);
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn test_generator_only_runs_on_first_lookup() {
        let mut mapping = IdentityMapping::new();
        let mut calls = 0;
        mapping.get_or_create_with("w", || {
            calls += 1;
            "w-new".to_string()
        });
        mapping.get_or_create_with("w", || {
            calls += 1;
            "never".to_string()
        });
        assert_eq!(calls, 1);
        assert_eq!(mapping.get("w"), Some("w-new"));
    }
}
