//! History Pagination
//!
//! Cursor and offset descriptors for paged reads over append-only history.

use serde::{Deserialize, Serialize};

use crate::cache::KeySegment;

// == Feed Modifier ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedModifier {
    /// Newest entries
    Latest,
    /// Entries older than the anchor
    Before,
    /// Entries newer than the anchor
    After,
}

impl FeedModifier {
    /// Suffix appended to the base query name, e.g. `findStageHistory` +
    /// `Before`.
    pub fn suffix(self) -> &'static str {
        match self {
            FeedModifier::Latest => "Latest",
            FeedModifier::Before => "Before",
            FeedModifier::After => "After",
        }
    }
}

// == History Cursor ==
/// One page request over an ordered history.
///
/// A `Latest` page changes whenever history is appended. Appended entries
/// always get ids above every existing one, so a `Before` page is settled
/// once its anchor is not above the newest id, and an `After` page once it
/// is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistoryCursor {
    modifier: FeedModifier,
    anchor: Option<i64>,
    page_size: u32,
}

impl HistoryCursor {
    pub fn latest(page_size: u32) -> Self {
        Self {
            modifier: FeedModifier::Latest,
            anchor: None,
            page_size,
        }
    }

    pub fn before(anchor: i64, page_size: u32) -> Self {
        Self {
            modifier: FeedModifier::Before,
            anchor: Some(anchor),
            page_size,
        }
    }

    pub fn after(anchor: i64, page_size: u32) -> Self {
        Self {
            modifier: FeedModifier::After,
            anchor: Some(anchor),
            page_size,
        }
    }

    pub fn modifier(&self) -> FeedModifier {
        self.modifier
    }

    pub fn anchor(&self) -> Option<i64> {
        self.anchor
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn is_latest(&self) -> bool {
        self.modifier == FeedModifier::Latest
    }

    /// Whether a page of `len` entries loaded for this cursor can still
    /// change when history is appended. `newest` is the newest id at load
    /// time.
    pub fn is_settled(&self, len: usize, newest: Option<i64>) -> bool {
        match self.modifier {
            FeedModifier::Latest => false,
            FeedModifier::Before => matches!((self.anchor, newest), (Some(anchor), Some(newest)) if anchor <= newest),
            FeedModifier::After => len >= self.page_size as usize,
        }
    }

    /// Query name for this cursor on `base`.
    pub fn query_name(&self, base: &str) -> String {
        format!("{}{}", base, self.modifier.suffix())
    }

    /// Cache key segments identifying this page: modifier, anchor, size.
    pub fn key_segments(&self) -> [KeySegment; 3] {
        [
            KeySegment::text(self.modifier.suffix()),
            KeySegment::Number(self.anchor.unwrap_or(0)),
            KeySegment::from(self.page_size),
        ]
    }
}

// == Pagination ==
/// Offset-based page over a history of `total` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    offset: u32,
    total: u32,
    page_size: u32,
}

impl Pagination {
    /// Page `page_number` (1-based). Numbers below 1 are treated as 1.
    pub fn page_by_number(page_number: u32, total: u32, page_size: u32) -> Self {
        let page_size = page_size.max(1);
        let page_number = page_number.max(1);
        Self {
            offset: (page_number - 1).saturating_mul(page_size),
            total,
            page_size,
        }
    }

    /// The page containing the entry at `offset`.
    pub fn page_for_offset(offset: u32, total: u32, page_size: u32) -> Self {
        let page_size = page_size.max(1);
        Self {
            offset: (offset / page_size) * page_size,
            total,
            page_size,
        }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// 1-based number of this page.
    pub fn current_page(&self) -> u32 {
        self.offset / self.page_size + 1
    }

    /// Number of pages needed for `total`; at least one.
    pub fn total_pages(&self) -> u32 {
        self.total.div_ceil(self.page_size).max(1)
    }

    pub fn has_previous_page(&self) -> bool {
        self.current_page() > 1
    }

    pub fn has_next_page(&self) -> bool {
        self.current_page() < self.total_pages()
    }
}
