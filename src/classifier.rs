//! MediaSource classifier
//!
//! Decides whether a raw source is a single media file or an HLS manifest,
//! and for manifests fetches and flattens the playlist into its ordered
//! segment list.

use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::types::{MediaAccess, RawSource, SourceRef, url_extension};
use m3u8_rs::{KeyMethod, Playlist};
use std::sync::atomic::AtomicU32;
use url::Url;

/// Container extensions downloaded as a single file
const DIRECT_EXTENSIONS: [&str; 7] = ["mp4", "m4v", "mkv", "webm", "mov", "flv", "ts"];

/// Playlist extensions
const MANIFEST_EXTENSIONS: [&str; 2] = ["m3u8", "m3u"];

/// Shape of a raw source before any manifest is fetched
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceShape {
    /// A single media file
    Direct,
    /// An HLS playlist
    Manifest,
}

/// Parsed content of one playlist document
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManifestContent {
    /// A media playlist: segment URLs in playback order
    Segments(Vec<Url>),
    /// A master playlist: the highest-bandwidth variant
    Variant(Url),
}

/// Classify a source by URL extension, falling back to its announced MIME type
pub fn classify_shape(raw: &RawSource) -> Result<SourceShape> {
    if let Some(ext) = url_extension(&raw.url) {
        if MANIFEST_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(SourceShape::Manifest);
        }
        if DIRECT_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(SourceShape::Direct);
        }
    }

    match raw.mime_type.as_deref().map(str::to_ascii_lowercase) {
        Some(mime) if mime.contains("mpegurl") => Ok(SourceShape::Manifest),
        Some(mime) if mime.starts_with("video/") => Ok(SourceShape::Direct),
        _ => Err(Error::Parse(format!(
            "unrecognized source shape: {}",
            raw.url
        ))),
    }
}

/// Parse a playlist document fetched from `base`
///
/// Segment and variant URIs are resolved against `base`.
pub fn parse_manifest(bytes: &[u8], base: &Url) -> Result<ManifestContent> {
    match m3u8_rs::parse_playlist_res(bytes) {
        Ok(Playlist::MasterPlaylist(master)) => {
            let variant = master
                .variants
                .iter()
                .filter(|v| !v.is_i_frame)
                .max_by_key(|v| v.bandwidth)
                .ok_or_else(|| {
                    Error::Parse(format!("master playlist {} has no variants", base))
                })?;
            let url = base.join(variant.uri.trim()).map_err(|e| {
                Error::Parse(format!("invalid variant URI '{}': {}", variant.uri, e))
            })?;
            tracing::debug!(
                manifest = %base,
                variant = %url,
                bandwidth = variant.bandwidth,
                "Selected variant"
            );
            Ok(ManifestContent::Variant(url))
        }
        Ok(Playlist::MediaPlaylist(media)) => {
            if media.segments.iter().any(|segment| {
                segment
                    .key
                    .as_ref()
                    .is_some_and(|key| key.method != KeyMethod::None)
            }) {
                return Err(Error::Parse(format!(
                    "encrypted playlist {} is not supported",
                    base
                )));
            }

            let segments = media
                .segments
                .iter()
                .map(|segment| {
                    base.join(segment.uri.trim()).map_err(|e| {
                        Error::Parse(format!("invalid segment URI '{}': {}", segment.uri, e))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            if segments.is_empty() {
                return Err(Error::Parse(format!("playlist {} has no segments", base)));
            }
            Ok(ManifestContent::Segments(segments))
        }
        Err(e) => Err(Error::Parse(format!("malformed playlist {}: {}", base, e))),
    }
}

/// Turn a raw source into a typed [`SourceRef`]
///
/// Manifests cost one fetch, or two when a master playlist points at a
/// variant.
pub async fn classify(
    http: &HttpClient,
    raw: &RawSource,
    retries: &AtomicU32,
) -> Result<SourceRef> {
    match classify_shape(raw)? {
        SourceShape::Direct => Ok(SourceRef::DirectFile {
            url: raw.url.clone(),
        }),
        SourceShape::Manifest => {
            let access = MediaAccess::from(raw);
            let bytes = http.get_bytes(&raw.url, &access, retries).await?;
            let segments = match parse_manifest(&bytes, &raw.url)? {
                ManifestContent::Segments(segments) => segments,
                ManifestContent::Variant(variant) => {
                    let bytes = http.get_bytes(&variant, &access, retries).await?;
                    match parse_manifest(&bytes, &variant)? {
                        ManifestContent::Segments(segments) => segments,
                        ManifestContent::Variant(_) => {
                            return Err(Error::Parse(format!(
                                "variant {} is another master playlist",
                                variant
                            )));
                        }
                    }
                }
            };
            tracing::debug!(manifest = %raw.url, segments = segments.len(), "Classified segmented stream");
            Ok(SourceRef::SegmentedStream { segments })
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ErrorKind;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXTINF:10.0,
seg-0.ts
#EXTINF:10.0,
seg-1.ts
#EXTINF:10.0,
https://other.example/abs/seg-2.ts
#EXT-X-ENDLIST
";

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
360p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080
1080p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720
720p/index.m3u8
";

    fn raw(url: &str, mime: Option<&str>) -> RawSource {
        RawSource {
            url: Url::parse(url).unwrap(),
            mime_type: mime.map(String::from),
            cookie: None,
        }
    }

    #[test]
    fn shapes_by_extension() {
        assert_eq!(
            classify_shape(&raw("https://cdn/v/1.mp4?t=1", None)).unwrap(),
            SourceShape::Direct
        );
        assert_eq!(
            classify_shape(&raw("https://cdn/v/playlist.M3U8", None)).unwrap(),
            SourceShape::Manifest
        );
    }

    #[test]
    fn mime_type_decides_when_extension_is_missing() {
        assert_eq!(
            classify_shape(&raw("https://cdn/stream", Some("application/x-mpegURL"))).unwrap(),
            SourceShape::Manifest
        );
        assert_eq!(
            classify_shape(&raw("https://cdn/stream", Some("video/mp4"))).unwrap(),
            SourceShape::Direct
        );
    }

    #[test]
    fn unknown_shape_is_a_parse_error() {
        let err = classify_shape(&raw("https://cdn/page.html", Some("text/html"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(classify_shape(&raw("https://cdn/stream", None)).is_err());
    }

    #[test]
    fn media_playlist_keeps_manifest_order() {
        let base = Url::parse("https://cdn.example/hls/720/index.m3u8").unwrap();
        let content = parse_manifest(MEDIA.as_bytes(), &base).unwrap();
        let ManifestContent::Segments(segments) = content else {
            panic!("expected segments");
        };
        let urls: Vec<&str> = segments.iter().map(Url::as_str).collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example/hls/720/seg-0.ts",
                "https://cdn.example/hls/720/seg-1.ts",
                "https://other.example/abs/seg-2.ts",
            ]
        );
    }

    #[test]
    fn master_playlist_picks_highest_bandwidth() {
        let base = Url::parse("https://cdn.example/hls/master.m3u8").unwrap();
        assert_eq!(
            parse_manifest(MASTER.as_bytes(), &base).unwrap(),
            ManifestContent::Variant(Url::parse("https://cdn.example/hls/1080p/index.m3u8").unwrap())
        );
    }

    #[test]
    fn encrypted_playlist_is_rejected() {
        let encrypted = "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"
#EXTINF:10.0,
seg-0.ts
#EXT-X-ENDLIST
";
        let base = Url::parse("https://cdn.example/index.m3u8").unwrap();
        let err = parse_manifest(encrypted.as_bytes(), &base).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.to_string().contains("encrypted"));
    }

    #[test]
    fn empty_playlist_is_rejected() {
        let empty = "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXT-X-ENDLIST\n";
        let base = Url::parse("https://cdn.example/index.m3u8").unwrap();
        let err = parse_manifest(empty.as_bytes(), &base).unwrap_err();
        assert!(err.to_string().contains("no segments"));
    }

    #[test]
    fn garbage_is_rejected() {
        let base = Url::parse("https://cdn.example/index.m3u8").unwrap();
        assert!(parse_manifest(b"<html>blocked</html>", &base).is_err());
    }

    #[tokio::test]
    async fn master_is_followed_to_its_media_playlist() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hls/master.m3u8"))
            .and(header("cookie", "e=1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MASTER))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hls/1080p/index.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MEDIA))
            .expect(1)
            .mount(&server)
            .await;

        let http = HttpClient::new(&Config::default()).unwrap();
        let source = RawSource {
            url: Url::parse(&format!("{}/hls/master.m3u8", server.uri())).unwrap(),
            mime_type: None,
            cookie: Some("e=1".into()),
        };
        let classified = classify(&http, &source, &AtomicU32::new(0)).await.unwrap();
        match classified {
            SourceRef::SegmentedStream { segments } => {
                assert_eq!(segments.len(), 3);
                assert_eq!(
                    segments[0].as_str(),
                    format!("{}/hls/1080p/seg-0.ts", server.uri())
                );
            }
            other => panic!("expected segmented stream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn direct_file_needs_no_fetch() {
        let http = HttpClient::new(&Config::default()).unwrap();
        let source = raw("http://127.0.0.1:9/never/fetched.mp4", None);
        let classified = classify(&http, &source, &AtomicU32::new(0)).await.unwrap();
        assert_eq!(
            classified,
            SourceRef::DirectFile {
                url: source.url.clone()
            }
        );
    }
}
