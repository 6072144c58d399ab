//! HTTP transport: translates request paths into dataset lookups and
//! drains data sources into response bodies.
//!
//! The core library never sees a socket; this module matches the
//! request against a serving location, resolves the dataset/file split,
//! pulls the driver out of the delivery cache and adapts the resulting
//! data source to HTTP (status, cache headers, byte ranges, streaming
//! body).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use tilegate::config::LocationConfig;
use tilegate::delivery::{
    split_archive_path, DeliveryCache, DeliveryError, DriverFactory, OpenError, OpenOptions,
    SharedDriver, SplitPath,
};
use tilegate::fileclass::FileClass;
use tilegate::sink::{
    content_type_for_extension, FileInfo, FileSource, Response as SourceResponse, Sink,
    WindowSource, OCTET_STREAM,
};

use crate::config::DaemonConfig;
use crate::error::CliError;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

struct AppState {
    cache: DeliveryCache,
    locations: Vec<LocationConfig>,
}

/// Run the daemon until the listener fails or the process is stopped.
pub async fn serve(config: DaemonConfig) -> Result<(), CliError> {
    let cache = DeliveryCache::new(Arc::new(DriverFactory::new()), config.cache);
    let state = Arc::new(AppState {
        cache,
        locations: config.locations,
    });

    let app = Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .map_err(CliError::Io)?;
    info!(listen = %config.listen, "tilegate daemon listening");

    axum::serve(listener, app)
        .await
        .map_err(|err| CliError::Server(err.to_string()))
}

async fn handle_request(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let raw_path = uri.path();
    let Ok(decoded) = percent_decode_str(raw_path).decode_utf8() else {
        return text_response(StatusCode::BAD_REQUEST, "Bad request.");
    };
    let path = decoded.into_owned();

    let Some(location) = match_location(&state.locations, &path) else {
        return text_response(StatusCode::NOT_FOUND, "Not found.");
    };

    let rel = path[location.location.len()..].trim_start_matches('/');
    if rel.split('/').any(|segment| segment == "..") {
        return text_response(StatusCode::BAD_REQUEST, "Bad request.");
    }
    let full = location.root.join(rel);

    if location.enable_dataset {
        handle_dataset(&state, location, full, raw_path, &headers).await
    } else {
        handle_plain(location, full, raw_path, &headers).await
    }
}

fn match_location<'a>(locations: &'a [LocationConfig], path: &str) -> Option<&'a LocationConfig> {
    // locations are sorted longest prefix first
    locations.iter().find(|location| {
        let prefix = location.location.as_str();
        path.starts_with(prefix)
            && (prefix.ends_with('/') || path.len() == prefix.len()
                || path[prefix.len()..].starts_with('/'))
    })
}

// =============================================================================
// Dataset serving
// =============================================================================

async fn handle_dataset(
    state: &AppState,
    location: &LocationConfig,
    full: PathBuf,
    raw_path: &str,
    headers: &HeaderMap,
) -> Response {
    let full_str = full.to_string_lossy().into_owned();

    for split in dataset_candidates(location, &full_str, raw_path) {
        match state.cache.get(&split.dataset, &OpenOptions::default()).await {
            Ok(driver) => return serve_driver(driver, location, &split.file, headers).await,
            // not a dataset root: try the next shallower candidate
            Err(OpenError::DatasetNotFound(_)) => continue,
            Err(err) => {
                error!(path = raw_path, error = %err, "dataset open failed");
                return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.");
            }
        }
    }

    dataset_fallback(state, location, &full, raw_path).await
}

/// Dataset/file splits to try, deepest first. An archive extension in
/// the path decides the split outright; otherwise every ancestor up to
/// the location root is a candidate dataset root, with the remaining
/// components as the intra-dataset path.
fn dataset_candidates(
    location: &LocationConfig,
    full_str: &str,
    raw_path: &str,
) -> Vec<SplitPath> {
    // a trailing slash addresses the dataset root itself
    if raw_path.ends_with('/') {
        return vec![SplitPath {
            dataset: full_str.to_owned(),
            file: String::new(),
        }];
    }

    if let Some(split) = split_archive_path(full_str) {
        return vec![split];
    }

    let mut candidates = Vec::new();
    let mut dataset = Path::new(full_str);
    let mut file = Vec::new();

    while let (Some(parent), Some(name)) = (dataset.parent(), dataset.file_name()) {
        file.insert(0, name.to_string_lossy().into_owned());
        candidates.push(SplitPath {
            dataset: parent.to_string_lossy().into_owned(),
            file: file.join("/"),
        });
        if parent == location.root || parent.parent().is_none() {
            break;
        }
        dataset = parent;
    }

    candidates
}

/// No dataset answered for the path: fall back to directory redirects,
/// listings and dataset-root redirects.
async fn dataset_fallback(
    state: &AppState,
    location: &LocationConfig,
    full: &Path,
    raw_path: &str,
) -> Response {
    let metadata = match tokio::fs::metadata(full).await {
        Ok(metadata) => metadata,
        Err(_) => return text_response(StatusCode::NOT_FOUND, "Path doesn't exist."),
    };

    if metadata.is_dir() {
        if !raw_path.ends_with('/') {
            return redirect_response(&format!("{raw_path}/"));
        }
        if location.enable_listing {
            return serve_listing(location, full).await;
        }
        return text_response(StatusCode::FORBIDDEN, "Unlistable.");
    }

    // a non-directory dataset root (e.g. an archive) is addressed like a
    // directory
    let full_str = full.to_string_lossy().into_owned();
    if state
        .cache
        .get(&full_str, &OpenOptions::default())
        .await
        .is_ok()
    {
        return redirect_response(&format!("{raw_path}/"));
    }

    text_response(StatusCode::NOT_FOUND, "Not found.")
}

async fn serve_driver(
    driver: SharedDriver,
    location: &LocationConfig,
    file: &str,
    headers: &HeaderMap,
) -> Response {
    let location = location.clone();
    let file = file.to_string();

    let result = tokio::task::spawn_blocking(move || {
        let sink = Sink::new(&location);
        driver.handle(&sink, &file, &location)
    })
    .await;

    match result {
        Ok(Ok(source)) => source_response(source, headers),
        Ok(Err(DeliveryError::NotFound(what))) => {
            info!(%what, "not found in dataset");
            text_response(StatusCode::NOT_FOUND, "Not found.")
        }
        Ok(Err(DeliveryError::BadRequest(what))) => {
            info!(%what, "bad dataset request");
            text_response(StatusCode::BAD_REQUEST, "Bad request.")
        }
        Ok(Err(err)) => {
            error!(error = %err, "dataset request failed");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
        }
        Err(err) => {
            error!(error = %err, "dataset handler task failed");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
        }
    }
}

// =============================================================================
// Plain file serving
// =============================================================================

async fn handle_plain(
    location: &LocationConfig,
    full: PathBuf,
    raw_path: &str,
    headers: &HeaderMap,
) -> Response {
    let metadata = match tokio::fs::metadata(&full).await {
        Ok(metadata) => metadata,
        Err(_) => return text_response(StatusCode::NOT_FOUND, "Not found."),
    };

    if metadata.is_dir() {
        if !raw_path.ends_with('/') {
            return redirect_response(&format!("{raw_path}/"));
        }
        if location.enable_listing {
            return serve_listing(location, &full).await;
        }
        return text_response(StatusCode::FORBIDDEN, "Unlistable.");
    }

    let location = location.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<SourceResponse, io::Error> {
        let content_type = full
            .to_str()
            .and_then(content_type_for_extension)
            .unwrap_or(OCTET_STREAM);
        let source = FileSource::open(&full, content_type)?;
        Ok(Sink::new(&location).file_stream(source, FileClass::Data))
    })
    .await;

    match result {
        Ok(Ok(source)) => source_response(source, headers),
        Ok(Err(err)) if err.kind() == io::ErrorKind::NotFound => {
            text_response(StatusCode::NOT_FOUND, "Not found.")
        }
        Ok(Err(err)) => {
            error!(error = %err, "file open failed");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
        }
        Err(err) => {
            error!(error = %err, "file handler task failed");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
        }
    }
}

async fn serve_listing(location: &LocationConfig, dir: &Path) -> Response {
    let dir = dir.to_path_buf();
    let listing = tokio::task::spawn_blocking(move || listing_page(&dir)).await;

    match listing {
        Ok(Ok(html)) => {
            let sink = Sink::new(location);
            let info =
                FileInfo::new("text/html; charset=utf-8").with_file_class(FileClass::Unknown);
            let source = sink.content(Bytes::from(html), info, "listing");
            source_response(source, &HeaderMap::new())
        }
        Ok(Err(err)) => {
            error!(error = %err, "listing failed");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
        }
        Err(err) => {
            error!(error = %err, "listing task failed");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
        }
    }
}

fn listing_page(dir: &Path) -> io::Result<String> {
    let mut names: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    let mut html = String::from("<!DOCTYPE html>\n<html><body><ul>\n<li><a href=\"..\">..</a></li>\n");
    for name in names {
        html.push_str(&format!("<li><a href=\"{name}\">{name}</a></li>\n"));
    }
    html.push_str("</ul></body></html>\n");
    Ok(html)
}

// =============================================================================
// Response assembly
// =============================================================================

enum RangeOutcome {
    Full,
    Partial { offset: u64, length: u64 },
    Unsatisfiable,
}

/// Parse a single-range `Range` header against a known total size.
/// Malformed or multi-range headers are ignored and the full content is
/// served; sources of unknown size never honor ranges.
fn parse_range(header: Option<&str>, total: Option<u64>) -> RangeOutcome {
    let (Some(header), Some(total)) = (header, total) else {
        return RangeOutcome::Full;
    };
    let Some(spec) = header.strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    if spec.contains(',') {
        return RangeOutcome::Full;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return RangeOutcome::Full;
    };

    if start.is_empty() {
        // suffix range: the last N bytes
        let Ok(suffix) = end.parse::<u64>() else {
            return RangeOutcome::Full;
        };
        if suffix == 0 || total == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        let length = suffix.min(total);
        return RangeOutcome::Partial {
            offset: total - length,
            length,
        };
    }

    let Ok(offset) = start.parse::<u64>() else {
        return RangeOutcome::Full;
    };
    if offset >= total {
        return RangeOutcome::Unsatisfiable;
    }

    let end = if end.is_empty() {
        total - 1
    } else {
        match end.parse::<u64>() {
            Ok(end) => end.min(total - 1),
            Err(_) => return RangeOutcome::Full,
        }
    };
    if end < offset {
        return RangeOutcome::Full;
    }

    RangeOutcome::Partial {
        offset,
        length: end - offset + 1,
    }
}

/// Adapt a drained data source into an HTTP response.
fn source_response(source: SourceResponse, headers: &HeaderMap) -> Response {
    let total = source.size();
    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    let mut status = StatusCode::OK;
    let mut content_range = None;
    let mut source = source;

    match parse_range(range_header, total) {
        RangeOutcome::Full => {}
        RangeOutcome::Partial { offset, length } => {
            let total = total.unwrap_or(0);
            status = StatusCode::PARTIAL_CONTENT;
            content_range = Some(format!(
                "bytes {}-{}/{}",
                offset,
                offset + length - 1,
                total
            ));
            source = Box::new(WindowSource::new(source, offset, length, false));
        }
        RangeOutcome::Unsatisfiable => {
            let mut builder = Response::builder().status(StatusCode::RANGE_NOT_SATISFIABLE);
            if let Some(total) = total {
                builder = builder.header(header::CONTENT_RANGE, format!("bytes */{total}"));
            }
            return builder
                .body(Body::empty())
                .unwrap_or_else(|_| fallback_error());
        }
    }

    let stat = source.stat().clone();
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, stat.content_type.as_str())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, cache_control(stat.max_age));

    if let Some(modified) = stat.last_modified {
        builder = builder.header(header::LAST_MODIFIED, http_date(modified));
    }
    if let Some(size) = source.size() {
        builder = builder.header(header::CONTENT_LENGTH, size);
    }
    if let Some(content_range) = content_range {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }
    for extra in source.headers() {
        builder = builder.header(extra.name.as_str(), extra.value.as_str());
    }

    builder
        .body(body_from_source(source))
        .unwrap_or_else(|_| fallback_error())
}

/// Stream a data source as a response body, one blocking chunk at a
/// time. Dropping the body (client gone) drops the source with it.
fn body_from_source(source: SourceResponse) -> Body {
    let stream = futures::stream::unfold(Some((source, 0u64)), |state| async move {
        let (mut source, offset) = state?;

        let step = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            let read = source.read_at(&mut buf, offset);
            (source, buf, read)
        })
        .await;

        match step {
            Ok((source, mut buf, Ok(read))) => {
                if read == 0 {
                    return None;
                }
                buf.truncate(read);
                Some((Ok(Bytes::from(buf)), Some((source, offset + read as u64))))
            }
            Ok((source, _, Err(err))) => {
                error!(source = source.name(), error = %err, "read failed mid-stream");
                Some((Err(io::Error::other(err.to_string())), None))
            }
            Err(err) => Some((Err(io::Error::other(err.to_string())), None)),
        }
    });

    Body::from_stream(stream)
}

fn cache_control(max_age: Option<i64>) -> String {
    match max_age {
        Some(age) if age >= 0 => format!("max-age={age}"),
        _ => "no-cache".to_string(),
    }
}

fn http_date(time: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn text_response(status: StatusCode, body: &'static str) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(body))
        .unwrap_or_else(|_| fallback_error())
}

fn redirect_response(target: &str) -> Response {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, target)
        .body(Body::empty())
        .unwrap_or_else(|_| fallback_error())
}

fn fallback_error() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_full_when_absent() {
        assert!(matches!(parse_range(None, Some(100)), RangeOutcome::Full));
        assert!(matches!(
            parse_range(Some("bytes=0-10"), None),
            RangeOutcome::Full
        ));
    }

    #[test]
    fn test_parse_range_bounded() {
        match parse_range(Some("bytes=10-19"), Some(100)) {
            RangeOutcome::Partial { offset, length } => {
                assert_eq!(offset, 10);
                assert_eq!(length, 10);
            }
            _ => panic!("expected partial range"),
        }
    }

    #[test]
    fn test_parse_range_open_ended() {
        match parse_range(Some("bytes=90-"), Some(100)) {
            RangeOutcome::Partial { offset, length } => {
                assert_eq!(offset, 90);
                assert_eq!(length, 10);
            }
            _ => panic!("expected partial range"),
        }
    }

    #[test]
    fn test_parse_range_suffix() {
        match parse_range(Some("bytes=-25"), Some(100)) {
            RangeOutcome::Partial { offset, length } => {
                assert_eq!(offset, 75);
                assert_eq!(length, 25);
            }
            _ => panic!("expected partial range"),
        }
    }

    #[test]
    fn test_parse_range_end_clamped() {
        match parse_range(Some("bytes=90-500"), Some(100)) {
            RangeOutcome::Partial { offset, length } => {
                assert_eq!(offset, 90);
                assert_eq!(length, 10);
            }
            _ => panic!("expected partial range"),
        }
    }

    #[test]
    fn test_parse_range_unsatisfiable() {
        assert!(matches!(
            parse_range(Some("bytes=100-"), Some(100)),
            RangeOutcome::Unsatisfiable
        ));
        assert!(matches!(
            parse_range(Some("bytes=-0"), Some(100)),
            RangeOutcome::Unsatisfiable
        ));
    }

    #[test]
    fn test_parse_range_malformed_ignored() {
        assert!(matches!(
            parse_range(Some("bytes=abc-def"), Some(100)),
            RangeOutcome::Full
        ));
        assert!(matches!(
            parse_range(Some("bytes=0-10,20-30"), Some(100)),
            RangeOutcome::Full
        ));
        assert!(matches!(
            parse_range(Some("items=0-10"), Some(100)),
            RangeOutcome::Full
        ));
    }

    #[test]
    fn test_dataset_candidates_walk_up_to_location_root() {
        let location = LocationConfig::new("/", "/srv");
        let candidates =
            dataset_candidates(&location, "/srv/world/tiles/7/42.bin", "/world/tiles/7/42.bin");

        let pairs: Vec<(&str, &str)> = candidates
            .iter()
            .map(|split| (split.dataset.as_str(), split.file.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("/srv/world/tiles/7", "42.bin"),
                ("/srv/world/tiles", "7/42.bin"),
                ("/srv/world", "tiles/7/42.bin"),
                ("/srv", "world/tiles/7/42.bin"),
            ]
        );
    }

    #[test]
    fn test_dataset_candidates_archive_split_decides() {
        let location = LocationConfig::new("/", "/srv");
        let candidates = dataset_candidates(
            &location,
            "/srv/maps/world.slpk/layers/0",
            "/maps/world.slpk/layers/0",
        );

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].dataset, "/srv/maps/world.slpk/");
        assert_eq!(candidates[0].file, "layers/0");
    }

    #[test]
    fn test_dataset_candidates_trailing_slash_is_dataset_root() {
        let location = LocationConfig::new("/", "/srv");
        let candidates = dataset_candidates(&location, "/srv/world/", "/world/");

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].dataset, "/srv/world/");
        assert_eq!(candidates[0].file, "");
    }

    #[test]
    fn test_cache_control() {
        assert_eq!(cache_control(Some(3600)), "max-age=3600");
        assert_eq!(cache_control(Some(0)), "max-age=0");
        assert_eq!(cache_control(Some(-1)), "no-cache");
        assert_eq!(cache_control(None), "no-cache");
    }

    #[test]
    fn test_http_date_format() {
        let date = http_date(std::time::UNIX_EPOCH);
        assert_eq!(date, "Thu, 01 Jan 1970 00:00:00 GMT");
    }
}
