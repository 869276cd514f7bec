use api_client::StorageClient;
use cache::CacheManager;
use chrono::{DateTime, Utc};
use feed::{DateMap, DateResolver, MediaEntry, MediaKind};
use mockito::Server;
use tempfile::NamedTempFile;

fn photo_entry(name: &str) -> MediaEntry {
    MediaEntry::new(MediaKind::Photo, "photos", &format!("2025/{}", name), None)
}

fn video_entry(name: &str, hint: Option<DateTime<Utc>>) -> MediaEntry {
    MediaEntry::new(MediaKind::Video, "videos", &format!("2025/{}", name), hint)
}

fn cache_at(file: &NamedTempFile) -> CacheManager {
    CacheManager::new(file.path()).unwrap()
}

#[tokio::test]
async fn cache_hit_short_circuits_all_network_tiers() {
    let mut server = Server::new_async().await;
    let head = server
        .mock("HEAD", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let get = server
        .mock("GET", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let file = NamedTempFile::new().unwrap();
    let cache = cache_at(&file);
    let entry = photo_entry("001.jpg");
    cache.put_label(&entry.id, "2024,03,01").unwrap();

    let storage = StorageClient::new(server.url(), "anon".into());
    let mut resolver = DateResolver::new(storage.clone(), cache, DateMap::default());
    let url = storage.public_url(&entry.collection, &entry.relative_path);

    let label = resolver.resolve(&entry, &url).await;
    assert_eq!(label, "2024,03,01");
    head.assert_async().await;
    get.assert_async().await;
}

#[tokio::test]
async fn date_map_tier_resolves_and_persists() {
    let server = Server::new_async().await;
    let file = NamedTempFile::new().unwrap();
    let cache = cache_at(&file);
    let map = DateMap::from_json_str(
        r#"{"2025/002.jpg": {"takenAt": "2025-12-19T09:03:14Z", "label": "2025,12,19"}}"#,
    )
    .unwrap();

    let storage = StorageClient::new(server.url(), "anon".into());
    let entry = photo_entry("002.jpg");
    let mut resolver = DateResolver::new(storage, cache.clone(), map);

    let label = resolver.resolve(&entry, "http://unused").await;
    assert_eq!(label, "2025,12,19");
    assert_eq!(cache.get_label(&entry.id).unwrap().as_deref(), Some("2025,12,19"));
}

#[tokio::test]
async fn video_listing_hint_beats_head_probe() {
    let mut server = Server::new_async().await;
    let head = server
        .mock("HEAD", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let file = NamedTempFile::new().unwrap();
    let hint = DateTime::parse_from_rfc3339("2025-03-01T20:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let entry = video_entry("v001.mp4", Some(hint));

    let storage = StorageClient::new(server.url(), "anon".into());
    let mut resolver = DateResolver::new(storage, cache_at(&file), DateMap::default());

    // 20:00 UTC is past midnight JST
    let label = resolver.resolve(&entry, "http://unused").await;
    assert_eq!(label, "2025,03,02");
    head.assert_async().await;
}

#[tokio::test]
async fn video_without_hint_head_probes_exactly_once() {
    let mut server = Server::new_async().await;
    let head = server
        .mock("HEAD", "/storage/v1/object/public/videos/2025/v002.mp4")
        .with_status(200)
        .with_header("last-modified", "Sat, 01 Mar 2025 10:00:00 GMT")
        .expect(1)
        .create_async()
        .await;

    let file = NamedTempFile::new().unwrap();
    let entry = video_entry("v002.mp4", None);
    let storage = StorageClient::new(server.url(), "anon".into());
    let url = storage.public_url(&entry.collection, &entry.relative_path);
    let mut resolver = DateResolver::new(storage, cache_at(&file), DateMap::default());

    let label = resolver.resolve(&entry, &url).await;
    assert_eq!(label, "2025,03,01");

    // second call is a cache hit, no further probes
    let label = resolver.resolve(&entry, &url).await;
    assert_eq!(label, "2025,03,01");
    head.assert_async().await;
}

#[tokio::test]
async fn photo_with_bad_exif_never_head_probes_and_stays_uncached() {
    let mut server = Server::new_async().await;
    let download = server
        .mock("GET", "/storage/v1/object/photos/2025/003.jpg")
        .with_status(200)
        .with_body("not a jpeg at all")
        .expect(1)
        .create_async()
        .await;
    let head = server
        .mock("HEAD", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let file = NamedTempFile::new().unwrap();
    let cache = cache_at(&file);
    let entry = photo_entry("003.jpg");
    let storage = StorageClient::new(server.url(), "anon".into());
    let url = storage.public_url(&entry.collection, &entry.relative_path);
    let mut resolver = DateResolver::new(storage, cache.clone(), DateMap::default());

    let label = resolver.resolve(&entry, &url).await;
    assert_eq!(label, "");
    // failure is not persisted, so a later session can retry
    assert_eq!(cache.get_label(&entry.id).unwrap(), None);

    // session dedup guard: no second fetch within this session
    let label = resolver.resolve(&entry, &url).await;
    assert_eq!(label, "");
    download.assert_async().await;
    head.assert_async().await;
}

#[tokio::test]
async fn resolve_all_fills_feed_state_in_order() {
    let server = Server::new_async().await;
    let file = NamedTempFile::new().unwrap();
    let cache = cache_at(&file);

    let e1 = photo_entry("001.jpg");
    let e2 = video_entry("v001.mp4", None);
    cache.put_label(&e1.id, "2024,03,01").unwrap();

    let storage = StorageClient::new(server.url(), "anon".into());
    let urls = feed::resource_urls(&storage, std::slice::from_ref(&e1));
    let state = feed::FeedState::new(vec![e1.clone(), e2.clone()], urls).shared();

    let mut resolver = DateResolver::new(storage, cache, DateMap::default());
    resolver.resolve_all(&state).await;

    let guard = state.lock().unwrap();
    assert_eq!(guard.label(&e1.id), Some("2024,03,01"));
    // v001 exhausted every tier: pending, not an error
    assert_eq!(guard.label(&e2.id), None);
}
