use cache::CacheManager;
use chrono::Utc;
use rusqlite::Connection;
use tempfile::NamedTempFile;

#[test]
fn test_new_applies_migrations() {
    let file = NamedTempFile::new().unwrap();
    let _ = CacheManager::new(file.path()).unwrap();
    let conn = Connection::open(file.path()).unwrap();
    let version: i64 = conn
        .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, 2);
}

#[test]
fn test_labels_survive_reopen() {
    let file = NamedTempFile::new().unwrap();
    {
        let cache = CacheManager::new(file.path()).unwrap();
        cache.put_label("photos/2025/003.jpg", "2025,01,15").unwrap();
    }
    let cache = CacheManager::new(file.path()).unwrap();
    assert_eq!(
        cache.get_label("photos/2025/003.jpg").unwrap().as_deref(),
        Some("2025,01,15")
    );
    let all = cache.all_labels().unwrap();
    assert_eq!(all.len(), 1);
}

#[test]
fn test_consumed_flag_roundtrip() {
    let file = NamedTempFile::new().unwrap();
    let cache = CacheManager::new(file.path()).unwrap();
    cache
        .set_consumed("videos/2025/v001.mp4", true, Some(Utc::now()))
        .unwrap();
    let all = cache.all_consumed().unwrap();
    assert_eq!(all.get("videos/2025/v001.mp4"), Some(&true));

    // rollback path flips it back
    cache.set_consumed("videos/2025/v001.mp4", false, None).unwrap();
    let all = cache.all_consumed().unwrap();
    assert_eq!(all.get("videos/2025/v001.mp4"), Some(&false));
}

#[tokio::test]
async fn test_async_wrappers() {
    let file = NamedTempFile::new().unwrap();
    let cache = CacheManager::new(file.path()).unwrap();
    cache
        .put_label_async("photos/2025/001.jpg".into(), "2024,03,01".into())
        .await
        .unwrap();
    let label = cache
        .get_label_async("photos/2025/001.jpg".into())
        .await
        .unwrap();
    assert_eq!(label.as_deref(), Some("2024,03,01"));
}
