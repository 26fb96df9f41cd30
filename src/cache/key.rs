//! Cache Key Module
//!
//! Builds deterministic cache keys from an owner, a feature name and an
//! ordered list of typed segments.

use std::fmt::Write;

// == Key Segment ==
/// One argument of a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySegment {
    /// Domain name (pipeline, stage, job, user); ASCII letters are folded
    /// to lower case, the same way the store compares names.
    Name(String),
    /// Opaque text kept verbatim (fingerprints, revisions, labels).
    Text(String),
    /// Counters and database ids.
    Number(i64),
}

impl KeySegment {
    /// Creates a case-insensitive name segment.
    pub fn name(value: impl AsRef<str>) -> Self {
        KeySegment::Name(value.as_ref().to_ascii_lowercase())
    }

    /// Creates a case-sensitive text segment.
    pub fn text(value: impl Into<String>) -> Self {
        KeySegment::Text(value.into())
    }

    fn render(&self, out: &mut String) {
        // `|<byte length>:<text>` keeps segment boundaries unambiguous
        let text = match self {
            KeySegment::Name(name) => name.clone(),
            KeySegment::Text(text) => text.clone(),
            KeySegment::Number(n) => n.to_string(),
        };
        let _ = write!(out, "|{}:{}", text.len(), text);
    }
}

impl From<i64> for KeySegment {
    fn from(value: i64) -> Self {
        KeySegment::Number(value)
    }
}

impl From<i32> for KeySegment {
    fn from(value: i32) -> Self {
        KeySegment::Number(value.into())
    }
}

impl From<u32> for KeySegment {
    fn from(value: u32) -> Self {
        KeySegment::Number(value.into())
    }
}

impl From<usize> for KeySegment {
    fn from(value: usize) -> Self {
        KeySegment::Number(value as i64)
    }
}

// == Key Builder ==
/// Generates cache keys scoped to one owning component.
///
/// Two components using the same feature name never share keys because the
/// owner is part of every key.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    owner: &'static str,
}

impl KeyBuilder {
    /// Creates a builder for keys owned by `owner`.
    pub const fn new(owner: &'static str) -> Self {
        Self { owner }
    }

    /// Returns the owner prefix.
    pub fn owner(&self) -> &'static str {
        self.owner
    }

    // == Build ==
    /// Builds the key for `feature` and `segments`.
    ///
    /// Equal inputs always give the same key, name segments compare
    /// case-insensitively, and moving text across a segment boundary always
    /// gives a different key.
    pub fn build(&self, feature: &str, segments: &[KeySegment]) -> String {
        let mut key = String::with_capacity(self.owner.len() + feature.len() + 16 * segments.len());
        key.push_str(self.owner);
        key.push('.');
        key.push_str(feature);
        for segment in segments {
            segment.render(&mut key);
        }
        key
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: KeyBuilder = KeyBuilder::new("StageDao");

    #[test]
    fn test_build_is_stable() {
        let first = KEYS.build("mostRecentId", &[KeySegment::name("up42"), KeySegment::name("dev")]);
        let second = KEYS.build("mostRecentId", &[KeySegment::name("up42"), KeySegment::name("dev")]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_name_segments_fold_case() {
        let lower = KEYS.build("isStageActive", &[KeySegment::name("up42"), KeySegment::name("dev")]);
        let upper = KEYS.build("isStageActive", &[KeySegment::name("UP42"), KeySegment::name("Dev")]);
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_non_ascii_names_are_not_folded() {
        let accented = KEYS.build("isStageActive", &[KeySegment::name("Étape")]);
        let folded = KEYS.build("isStageActive", &[KeySegment::name("étape")]);
        assert_ne!(accented, folded);
        assert_eq!(accented, KEYS.build("isStageActive", &[KeySegment::name("ÉTAPE")]));
    }

    #[test]
    fn test_text_segments_keep_case() {
        let lower = KEYS.build("byRevision", &[KeySegment::text("abc")]);
        let upper = KEYS.build("byRevision", &[KeySegment::text("ABC")]);
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_boundary_shift_gives_different_keys() {
        let left = KEYS.build("history", &[KeySegment::name("foo"), KeySegment::name("bar_baz")]);
        let right = KEYS.build("history", &[KeySegment::name("foo_bar"), KeySegment::name("baz")]);
        assert_ne!(left, right);
    }

    #[test]
    fn test_separator_inside_segment_is_not_ambiguous() {
        let left = KEYS.build("history", &[KeySegment::text("a|1:b"), KeySegment::text("c")]);
        let right = KEYS.build("history", &[KeySegment::text("a"), KeySegment::text("b|1:c")]);
        assert_ne!(left, right);
    }

    #[test]
    fn test_owner_scopes_keys() {
        let stage = KeyBuilder::new("StageDao").build("count", &[]);
        let job = KeyBuilder::new("JobDao").build("count", &[]);
        assert_ne!(stage, job);
    }

    #[test]
    fn test_numbers_render_decimal() {
        let key = KEYS.build("stageById", &[KeySegment::from(42i64)]);
        assert_eq!(key, "StageDao.stageById|2:42");
    }
}
