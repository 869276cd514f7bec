//! Per-entry capture-date cascade: cache, precomputed map, listing hint,
//! embedded metadata, header probe.

use crate::types::{MediaEntry, MediaKind, SharedFeedState};
use crate::FeedError;
use api_client::StorageClient;
use cache::CacheManager;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;

/// Labels use the `YYYY,MM,DD` pattern in JST.
fn format_label(date: NaiveDate) -> String {
    date.format("%Y,%m,%d").to_string()
}

fn label_from_instant(instant: DateTime<Utc>) -> String {
    format_label((instant + Duration::hours(9)).date_naive())
}

fn is_normalized(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 10
        && b.iter().enumerate().all(|(i, c)| match i {
            4 | 7 => *c == b',',
            _ => c.is_ascii_digit(),
        })
}

fn take_digits(s: &str, max: usize) -> Option<(u32, &str)> {
    let end = s
        .char_indices()
        .take(max)
        .take_while(|(_, c)| c.is_ascii_digit())
        .count();
    if end == 0 {
        return None;
    }
    let (digits, rest) = s.split_at(end);
    digits.parse().ok().map(|n| (n, rest))
}

fn take_separator(s: &str) -> Option<&str> {
    let mut chars = s.chars();
    match chars.next() {
        Some('-') | Some(':') | Some('/') | Some(',') => Some(chars.as_str()),
        _ => None,
    }
}

/// Normalize a date string to `YYYY,MM,DD`. Strings already in that shape
/// pass through; `YYYY-M-D`-like prefixes (any of `-:/,` as separator) are
/// zero-padded; anything else is returned unchanged, since legacy cache
/// entries may carry non-conforming labels the caller still has to show.
pub fn normalize_date_text(s: &str) -> String {
    if is_normalized(s) {
        return s.to_string();
    }
    let parse = || -> Option<(u32, u32, u32)> {
        let (year, rest) = take_digits(s, 4)?;
        if s.len() - rest.len() != 4 {
            return None;
        }
        let rest = take_separator(rest)?;
        let (month, rest) = take_digits(rest, 2)?;
        let rest = take_separator(rest)?;
        let (day, _) = take_digits(rest, 2)?;
        Some((year, month, day))
    };
    match parse() {
        Some((y, m, d)) => format!("{:04},{:02},{:02}", y, m, d),
        None => s.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateHint {
    pub taken_at: Option<DateTime<Utc>>,
    pub label: Option<String>,
}

/// Precomputed path → capture-date table, loaded once at startup from a
/// side channel. Absence is tolerated: every id falls through the cascade.
#[derive(Debug, Clone, Default)]
pub struct DateMap(HashMap<String, DateHint>);

impl DateMap {
    pub fn from_json_str(json: &str) -> Result<Self, FeedError> {
        serde_json::from_str(json)
            .map(DateMap)
            .map_err(|e| FeedError::DateMapError(e.to_string()))
    }

    pub fn get(&self, relative_path: &str) -> Option<&DateHint> {
        self.0.get(relative_path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Capture time from embedded photo metadata, in tag priority order.
/// EXIF times are local wall-clock, so the label comes straight from the
/// parsed date with no timezone shift.
fn exif_capture_label(payload: &[u8]) -> Option<String> {
    let exifreader = exif::Reader::new();
    let data = exifreader
        .read_from_container(&mut std::io::BufReader::new(Cursor::new(payload)))
        .ok()?;

    for tag in [exif::Tag::DateTimeOriginal, exif::Tag::DateTimeDigitized, exif::Tag::DateTime] {
        let Some(field) = data.get_field(tag, exif::In::PRIMARY) else {
            continue;
        };
        let text = field.display_value().to_string();
        if let Ok(dt) = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S") {
            return Some(format_label(dt.date()));
        }
    }
    None
}

/// Resolves display-date labels through the tiered cascade. One resolution
/// attempt per entry id per session; unresolved entries stay empty and are
/// never written to the durable cache.
pub struct DateResolver {
    storage: StorageClient,
    cache: CacheManager,
    date_map: DateMap,
    attempted: HashSet<String>,
}

impl DateResolver {
    pub fn new(storage: StorageClient, cache: CacheManager, date_map: DateMap) -> Self {
        DateResolver {
            storage,
            cache,
            date_map,
            attempted: HashSet::new(),
        }
    }

    async fn persist(&self, id: &str, label: &str) {
        if let Err(e) = self.cache.put_label_async(id.to_string(), label.to_string()).await {
            tracing::warn!(id, %e, "failed to persist resolved label");
        }
    }

    /// Resolve one entry's label. Returns the label, or an empty string
    /// while unresolved. Never fails the feed: tier errors cascade to the
    /// next tier.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self, entry, url), fields(id = %entry.id)))]
    pub async fn resolve(&mut self, entry: &MediaEntry, url: &str) -> String {
        // Tier 1: durable cache short-circuits everything, network included.
        match self.cache.get_label_async(entry.id.clone()).await {
            Ok(Some(label)) => {
                self.attempted.insert(entry.id.clone());
                return normalize_date_text(&label);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(id = %entry.id, %e, "cache lookup failed"),
        }

        // Single attempt per id per session from here on.
        if !self.attempted.insert(entry.id.clone()) {
            return String::new();
        }

        // Tier 2: precomputed map.
        if let Some(hint) = self.date_map.get(&entry.relative_path) {
            let label = match (&hint.label, hint.taken_at) {
                (Some(label), _) if !label.is_empty() => normalize_date_text(label),
                (_, Some(taken_at)) => label_from_instant(taken_at),
                _ => String::new(),
            };
            if !label.is_empty() {
                self.persist(&entry.id, &label).await;
                return label;
            }
        }

        match entry.kind {
            MediaKind::Video => {
                // Tier 3: listing hint.
                if let Some(hint) = entry.created_at_hint {
                    let label = label_from_instant(hint);
                    self.persist(&entry.id, &label).await;
                    return label;
                }
                // Tier 5: metadata-only probe, last resort.
                match self.storage.head_probe(url).await {
                    Ok(Some(last_modified)) => {
                        if let Ok(dt) = DateTime::parse_from_rfc2822(&last_modified) {
                            let label = label_from_instant(dt.with_timezone(&Utc));
                            self.persist(&entry.id, &label).await;
                            return label;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(id = %entry.id, %e, "head probe failed"),
                }
            }
            MediaKind::Photo => {
                // Tier 4: embedded metadata from the raw payload.
                match self.storage.download(&entry.collection, &entry.relative_path).await {
                    Ok(payload) => {
                        if let Some(label) = exif_capture_label(&payload) {
                            self.persist(&entry.id, &label).await;
                            return label;
                        }
                    }
                    Err(e) => tracing::debug!(id = %entry.id, %e, "payload fetch failed"),
                }
            }
        }

        String::new()
    }

    /// Drive resolution for the whole feed sequentially in feed order, so
    /// network activity stays bounded. Entries with a label already in the
    /// session state are skipped.
    pub async fn resolve_all(&mut self, state: &SharedFeedState) {
        let work: Vec<(MediaEntry, String)> = {
            let Ok(guard) = state.lock() else { return };
            guard
                .entries
                .iter()
                .filter(|e| guard.label(&e.id).is_none())
                .map(|e| (e.clone(), guard.url(&e.id).unwrap_or_default().to_string()))
                .collect()
        };

        for (entry, url) in work {
            let label = self.resolve(&entry, &url).await;
            if label.is_empty() {
                continue;
            }
            if let Ok(mut guard) = state.lock() {
                guard.set_label(&entry.id, &label);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_passes_conforming_strings() {
        assert_eq!(normalize_date_text("2024,03,01"), "2024,03,01");
    }

    #[test]
    fn normalize_pads_and_converts_separators() {
        assert_eq!(normalize_date_text("2024-3-1"), "2024,03,01");
        assert_eq!(normalize_date_text("2024:12:19 18:03:14"), "2024,12,19");
        assert_eq!(normalize_date_text("2024/7/09"), "2024,07,09");
        assert_eq!(normalize_date_text("2024,3,1"), "2024,03,01");
    }

    #[test]
    fn normalize_leaves_unrecognized_strings_alone() {
        assert_eq!(normalize_date_text("sometime in march"), "sometime in march");
        assert_eq!(normalize_date_text(""), "");
        assert_eq!(normalize_date_text("24-03-01"), "24-03-01");
    }

    #[test]
    fn label_uses_jst() {
        // 20:00 UTC on Mar 1 is already Mar 2 in JST.
        let instant = DateTime::parse_from_rfc3339("2025-03-01T20:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(label_from_instant(instant), "2025,03,02");
    }

    #[test]
    fn unparsable_date_map_is_a_date_map_error() {
        let err = DateMap::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, FeedError::DateMapError(_)));
        assert!(err.to_string().starts_with("Date Map Error"));
    }

    #[test]
    fn date_map_parses_side_channel_shape() {
        let json = r#"{
            "2025/001.jpg": {"takenAt": "2025-12-19T09:03:14Z", "label": "2025,12,19"},
            "2025/002.jpg": {"takenAt": null, "label": null}
        }"#;
        let map = DateMap::from_json_str(json).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get("2025/001.jpg").unwrap().label.as_deref(),
            Some("2025,12,19")
        );
        assert!(map.get("2025/002.jpg").unwrap().label.is_none());
    }
}
