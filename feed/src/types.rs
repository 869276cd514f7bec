use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
}

/// One feed item. Immutable once the feed is assembled.
#[derive(Debug, Clone)]
pub struct MediaEntry {
    /// `{collection}/{relative_path}`, unique within a feed. Cache and
    /// reconciliation key.
    pub id: String,
    pub kind: MediaKind,
    pub collection: String,
    pub relative_path: String,
    /// Timestamp from the storage listing. A hint, not authoritative.
    pub created_at_hint: Option<DateTime<Utc>>,
}

impl MediaEntry {
    pub fn new(
        kind: MediaKind,
        collection: &str,
        relative_path: &str,
        created_at_hint: Option<DateTime<Utc>>,
    ) -> Self {
        MediaEntry {
            id: format!("{}/{}", collection, relative_path),
            kind,
            collection: collection.to_string(),
            relative_path: relative_path.to_string(),
            created_at_hint,
        }
    }
}

/// Mutable per-session feed state. Created on feed load, discarded on
/// reload; shared behind `SharedFeedState`, never a global.
#[derive(Debug, Default)]
pub struct FeedState {
    pub entries: Vec<MediaEntry>,
    pub resource_urls: HashMap<String, String>,
    pub date_labels: HashMap<String, String>,
    pub consumed: HashMap<String, bool>,
    active_index: usize,
}

pub type SharedFeedState = Arc<Mutex<FeedState>>;

impl FeedState {
    pub fn new(entries: Vec<MediaEntry>, resource_urls: HashMap<String, String>) -> Self {
        FeedState {
            entries,
            resource_urls,
            date_labels: HashMap::new(),
            consumed: HashMap::new(),
            active_index: 0,
        }
    }

    pub fn shared(self) -> SharedFeedState {
        Arc::new(Mutex::new(self))
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    /// Advance the active index. Monotonic: scrolling back up never
    /// shrinks the prefetch window.
    pub fn note_visible(&mut self, index: usize) {
        self.active_index = self.active_index.max(index);
    }

    /// Record a resolved label. First non-empty value wins; empty values
    /// never overwrite anything.
    pub fn set_label(&mut self, id: &str, label: &str) {
        if label.is_empty() {
            return;
        }
        let slot = self.date_labels.entry(id.to_string()).or_default();
        if slot.is_empty() {
            *slot = label.to_string();
        }
    }

    pub fn label(&self, id: &str) -> Option<&str> {
        self.date_labels.get(id).map(|s| s.as_str())
    }

    pub fn mark_consumed(&mut self, id: &str, consumed: bool) {
        self.consumed.insert(id.to_string(), consumed);
    }

    pub fn is_consumed(&self, id: &str) -> bool {
        self.consumed.get(id).copied().unwrap_or(false)
    }

    pub fn url(&self, id: &str) -> Option<&str> {
        self.resource_urls.get(id).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_index_never_regresses() {
        let mut state = FeedState::new(Vec::new(), HashMap::new());
        state.note_visible(3);
        state.note_visible(7);
        state.note_visible(2);
        assert_eq!(state.active_index(), 7);
    }

    #[test]
    fn first_label_wins() {
        let mut state = FeedState::new(Vec::new(), HashMap::new());
        state.set_label("a", "");
        assert_eq!(state.label("a"), None);
        state.set_label("a", "2024,03,01");
        state.set_label("a", "2025,01,01");
        assert_eq!(state.label("a"), Some("2024,03,01"));
    }
}
