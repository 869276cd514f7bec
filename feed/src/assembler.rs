//! Lists the backing collections and builds the randomized feed.

use crate::types::{FeedState, MediaEntry, MediaKind};
use api_client::StorageClient;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub photo_bucket: String,
    pub video_bucket: String,
    pub folder: String,
    pub page_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            photo_bucket: "photos".to_string(),
            video_bucket: "videos".to_string(),
            folder: "2025".to_string(),
            page_size: 100,
        }
    }
}

fn extension_matches(name: &str, kind: MediaKind) -> bool {
    let lower = name.to_ascii_lowercase();
    match kind {
        MediaKind::Photo => lower.ends_with(".jpg") || lower.ends_with(".jpeg"),
        MediaKind::Video => lower.ends_with(".mp4"),
    }
}

/// List one collection to exhaustion. A short page ends the listing; a
/// listing error degrades to zero entries for this collection.
async fn list_collection(
    storage: &StorageClient,
    bucket: &str,
    folder: &str,
    page_size: usize,
    kind: MediaKind,
) -> Vec<MediaEntry> {
    let mut entries = Vec::new();
    let mut offset = 0;
    loop {
        let page = match storage.list_objects(bucket, folder, page_size, offset).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(bucket, %e, "collection listing failed, treating as empty");
                return Vec::new();
            }
        };
        let page_len = page.len();

        for obj in page {
            if obj.name.starts_with('.') || !extension_matches(&obj.name, kind) {
                continue;
            }
            let relative_path = format!("{}/{}", folder, obj.name);
            entries.push(MediaEntry::new(kind, bucket, &relative_path, obj.created_at));
        }

        if page_len < page_size {
            break;
        }
        offset += page_size;
    }
    entries
}

/// Assemble the feed: list both collections, filter, then shuffle exactly
/// once. The resulting order is frozen for the session.
pub async fn assemble<R: Rng>(
    storage: &StorageClient,
    cfg: &FeedConfig,
    rng: &mut R,
) -> Vec<MediaEntry> {
    let photos = list_collection(
        storage,
        &cfg.photo_bucket,
        &cfg.folder,
        cfg.page_size,
        MediaKind::Photo,
    )
    .await;
    let videos = list_collection(
        storage,
        &cfg.video_bucket,
        &cfg.folder,
        cfg.page_size,
        MediaKind::Video,
    )
    .await;

    let mut entries = photos;
    entries.extend(videos);
    entries.shuffle(rng);

    tracing::info!(count = entries.len(), "assembled feed");
    entries
}

/// Compute the retrieval locator for every entry. Pure, cannot fail; a bad
/// locator surfaces as a 404 at fetch time.
pub fn resource_urls(storage: &StorageClient, entries: &[MediaEntry]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|e| {
            (
                e.id.clone(),
                storage.public_url(&e.collection, &e.relative_path),
            )
        })
        .collect()
}

/// Assemble a fresh `FeedState` for one session.
pub async fn build_feed_state<R: Rng>(
    storage: &StorageClient,
    cfg: &FeedConfig,
    rng: &mut R,
) -> FeedState {
    let entries = assemble(storage, cfg, rng).await;
    let urls = resource_urls(storage, &entries);
    FeedState::new(entries, urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(extension_matches("001.JPG", MediaKind::Photo));
        assert!(extension_matches("001.jpeg", MediaKind::Photo));
        assert!(!extension_matches("v001.mp4", MediaKind::Photo));
        assert!(extension_matches("v001.MP4", MediaKind::Video));
        assert!(!extension_matches("notes.txt", MediaKind::Video));
    }
}
