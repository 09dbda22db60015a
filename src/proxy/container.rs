//! Container detection from URL shape and MIME repair for direct relays.

use url::Url;

/// Upstream content types that say nothing about the payload. Media served with
/// one of these never reaches the hardware decoder on mobile browsers.
const OPAQUE_CONTENT_TYPES: &[&str] = &[
    "application/octet-stream",
    "binary/octet-stream",
    "application/force-download",
    "application/x-download",
    "application/download",
    "application/unknown",
    "application/x-unknown",
];

pub const FALLBACK_VIDEO_MIME: &str = "video/mp4";

/// Lowercased extension of the last path segment, ignoring query and fragment.
pub fn extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "ts" | "m2ts" => "video/mp2t",
        "m4s" => "video/iso.segment",
        "m3u8" => "application/vnd.apple.mpegurl",
        "mpd" => "application/dash+xml",
        "ogv" => "video/ogg",
        "3gp" => "video/3gpp",
        _ => return None,
    };
    Some(mime)
}

pub fn is_opaque(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.is_empty() || OPAQUE_CONTENT_TYPES.contains(&essence.as_str())
}

/// Content type to hand the client: the upstream's own unless it is opaque or missing,
/// in which case the URL's extension decides, falling back to MP4.
pub fn normalize_content_type(upstream: Option<&str>, url: &Url) -> String {
    match upstream {
        Some(ct) if !is_opaque(ct) => ct.to_string(),
        _ => extension(url)
            .as_deref()
            .and_then(mime_for_extension)
            .unwrap_or(FALLBACK_VIDEO_MIME)
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn extension_ignores_query_and_case() {
        assert_eq!(
            extension(&url("https://cdn.example.com/path/Movie.MKV?token=abc#t=10")).as_deref(),
            Some("mkv")
        );
        assert_eq!(extension(&url("https://cdn.example.com/stream")), None);
        assert_eq!(extension(&url("https://cdn.example.com/")), None);
        assert_eq!(extension(&url("https://cdn.example.com/.hidden")), None);
    }

    #[test]
    fn octet_stream_becomes_video() {
        let mp4 = url("https://cdn.example.com/v.mp4");
        assert_eq!(
            normalize_content_type(Some("application/octet-stream"), &mp4),
            "video/mp4"
        );
        assert_eq!(
            normalize_content_type(Some("binary/octet-stream; charset=binary"), &mp4),
            "video/mp4"
        );

        let webm = url("https://cdn.example.com/clip.webm");
        assert_eq!(
            normalize_content_type(Some("application/force-download"), &webm),
            "video/webm"
        );

        let unknown = url("https://drive.example.com/uc?id=42");
        assert_eq!(
            normalize_content_type(Some("application/octet-stream"), &unknown),
            FALLBACK_VIDEO_MIME
        );
        assert_eq!(normalize_content_type(None, &unknown), FALLBACK_VIDEO_MIME);
    }

    #[test]
    fn specific_types_pass_through() {
        let playlist = url("https://cdn.example.com/master.m3u8");
        assert_eq!(
            normalize_content_type(Some("application/x-mpegURL"), &playlist),
            "application/x-mpegURL"
        );
        assert_eq!(
            normalize_content_type(Some("application/octet-stream"), &playlist),
            "application/vnd.apple.mpegurl"
        );
    }
}
