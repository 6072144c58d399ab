//! Integration tests for the full delivery path.
//!
//! These tests exercise the complete workflow against real datasets on
//! disk: factory dispatch, the delivery cache, driver request handling
//! and response draining, including:
//! - Directory tileset and archive datasets
//! - Cache hits returning the identical driver
//! - Concurrent opens collapsing into one construction
//! - Dataset-not-found propagation
//! - Byte-range windows over driver responses

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tilegate::config::LocationConfig;
use tilegate::delivery::{
    CacheConfig, DeliveryCache, DriverFactory, OpenError, OpenOptions, SharedDriver,
};
use tilegate::fileclass::{FileClass, FileClassSettings};
use tilegate::sink::{Response, Sink, WindowSource};

// =============================================================================
// Test Helpers
// =============================================================================

fn make_tileset(root: &Path) {
    fs::create_dir_all(root.join("tiles/7")).unwrap();
    fs::write(
        root.join("tileset.json"),
        br#"{"name": "world", "tile_content_type": "image/jpeg"}"#,
    )
    .unwrap();
    fs::write(root.join("tiles/7/42.bin"), vec![0xAB; 4096]).unwrap();
}

fn make_archive(path: &Path) {
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    let file = fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);

    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    writer.start_file("layers/0/layer.json", stored).unwrap();
    writer
        .write_all(br#"{"layerType": "IntegratedMesh"}"#)
        .unwrap();
    writer.finish().unwrap();
}

fn drain(response: &mut Response) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    let mut offset = 0u64;
    loop {
        let n = response.read_at(&mut buf, offset).unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        offset += n as u64;
    }
    data
}

fn new_cache() -> DeliveryCache {
    DeliveryCache::new(Arc::new(DriverFactory::new()), CacheConfig::default())
}

async fn get(cache: &DeliveryCache, path: &Path) -> Result<SharedDriver, OpenError> {
    cache
        .get(path.to_str().unwrap(), &OpenOptions::default())
        .await
}

// =============================================================================
// Integration Tests
// =============================================================================

#[tokio::test]
async fn test_tileset_served_through_cache() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("world");
    make_tileset(&root);

    let cache = new_cache();
    let driver = get(&cache, &root).await.unwrap();

    let location = LocationConfig::new("/", dir.path()).with_file_class_settings(
        FileClassSettings::new().with_max_age(FileClass::Data, 604_800),
    );
    let sink = Sink::new(&location);

    let mut response = driver.handle(&sink, "tiles/7/42.bin", &location).unwrap();
    assert_eq!(response.stat().content_type, "image/jpeg");
    assert_eq!(response.stat().max_age, Some(604_800));
    assert_eq!(response.size(), Some(4096));
    assert_eq!(drain(&mut response).len(), 4096);
}

#[tokio::test]
async fn test_cache_hit_reuses_driver() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("world");
    make_tileset(&root);

    let cache = new_cache();
    let first = get(&cache, &root).await.unwrap();
    let second = get(&cache, &root).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.entry_count(), 1);
}

#[tokio::test]
async fn test_concurrent_opens_share_one_driver() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("world");
    make_tileset(&root);

    let cache = new_cache();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let path = root.clone();
        handles.push(tokio::spawn(
            async move { get(&cache, &path).await.unwrap() },
        ));
    }

    let drivers: Vec<SharedDriver> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|handle| handle.unwrap())
        .collect();

    for driver in &drivers[1..] {
        assert!(Arc::ptr_eq(&drivers[0], driver));
    }
    assert_eq!(cache.entry_count(), 1);
}

#[tokio::test]
async fn test_unknown_path_is_dataset_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache();

    let result = get(&cache, &dir.path().join("nothing-here")).await;
    assert!(matches!(result, Err(OpenError::DatasetNotFound(_))));

    // an existing directory without any descriptor is no dataset either
    let result = get(&cache, dir.path()).await;
    assert!(matches!(result, Err(OpenError::DatasetNotFound(_))));
    assert_eq!(cache.entry_count(), 0);
}

#[tokio::test]
async fn test_archive_entry_served_through_cache() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("scene.slpk");
    make_archive(&archive);

    let cache = new_cache();
    let driver = get(&cache, &archive).await.unwrap();

    let location = LocationConfig::new("/", dir.path());
    let sink = Sink::new(&location);

    let mut response = driver
        .handle(&sink, "layers/0/layer.json", &location)
        .unwrap();
    assert_eq!(response.stat().content_type, "application/json");
    assert_eq!(drain(&mut response), br#"{"layerType": "IntegratedMesh"}"#);
}

#[tokio::test]
async fn test_byte_range_window_over_response() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("world");
    make_tileset(&root);

    let cache = new_cache();
    let driver = get(&cache, &root).await.unwrap();

    let location = LocationConfig::new("/", dir.path());
    let sink = Sink::new(&location);

    // the transport wraps the driver's response to honor a byte range
    let response = driver.handle(&sink, "tiles/7/42.bin", &location).unwrap();
    let mut window: Response = Box::new(WindowSource::new(response, 1024, 512, false));

    assert_eq!(window.size(), Some(512));
    assert_eq!(drain(&mut window), vec![0xAB; 512]);
}

#[tokio::test]
async fn test_browser_pages_from_cached_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("world");
    make_tileset(&root);

    let cache = new_cache();
    let driver = get(&cache, &root).await.unwrap();

    let location = LocationConfig::new("/", dir.path()).with_browser(true).with_vars(
        tilegate::support::Variables::new()
            .with_var("title", "World")
            .with_var("version", tilegate::VERSION),
    );
    let sink = Sink::new(&location);

    let mut response = driver.handle(&sink, "", &location).unwrap();
    assert_eq!(response.stat().file_class, FileClass::Support);

    let body = String::from_utf8(drain(&mut response)).unwrap();
    assert!(body.contains("World"));
    assert!(body.contains(tilegate::VERSION));
}
