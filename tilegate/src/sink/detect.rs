//! Best-effort content detection from filenames and magic bytes.

/// First byte of a gzip stream.
pub const GZIP_MAGIC: u8 = 0x1f;

/// Guess an image content type from leading magic bytes.
///
/// Only formats that actually occur inside tile archives are recognized;
/// everything else stays `None` and falls back to the octet-stream
/// default.
pub fn content_type_from_magic(head: &[u8]) -> Option<&'static str> {
    if head.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some("image/png");
    }
    if head.starts_with(&[0xff, 0xd8, 0xff]) {
        return Some("image/jpeg");
    }
    if head.starts_with(b"GIF8") {
        return Some("image/gif");
    }
    None
}

/// Content type for a well-known filename extension.
pub fn content_type_for_extension(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    let ct = match ext.to_ascii_lowercase().as_str() {
        "json" => "application/json",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "application/javascript",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        _ => return None,
    };
    Some(ct)
}
