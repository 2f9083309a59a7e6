//! Content-type to file extension hints
//!
//! Only used for logging; the sink is always named after the request path.

/// Extension commonly used for `content_type`, ignoring parameters
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let ext = match essence.as_str() {
        "application/octet-stream" => "bin",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/gzip" => "gz",
        "application/x-tar" => "tar",
        "application/vnd.apple.mpegurl" | "application/x-mpegurl" => "m3u8",
        "application/dash+xml" => "mpd",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "text/html" => "html",
        "image/png" => "png",
        "image/jpeg" => "jpeg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "audio/mpeg" => "mp3",
        "audio/aac" => "aac",
        "audio/ogg" => "ogg",
        "video/mp4" => "mp4",
        "video/mp2t" => "ts",
        "video/webm" => "webm",
        "video/x-flv" => "flv",
        "video/x-matroska" => "mkv",
        _ => return None,
    };
    Some(ext)
}
