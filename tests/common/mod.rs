//! Common test utilities for anime1-dl pipeline tests
//!
//! A single wiremock server plays every role: listing pages, the player
//! API, direct media files, manifests and segments.

#![allow(dead_code)]

use anime1_dl::config::RetryConfig;
use anime1_dl::{AnimeDownloader, Config, ConcatRemuxer, Event};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use walkdir::WalkDir;
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Config pointing at `server`, with fast retries and four workers
///
/// The minimum file size is off so tiny fixture bodies count as media.
pub fn test_config(root: &Path, server: &MockServer) -> Config {
    let mut config = Config::default();
    config.download.download_root = root.to_path_buf();
    config.download.use_multithreading = true;
    config.download.max_workers = 4;
    config.download.min_file_size = 0;
    config.http.api_endpoint = format!("{}/api", server.uri());
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Downloader using byte concatenation so no ffmpeg is needed
pub fn downloader(config: Config) -> AnimeDownloader {
    AnimeDownloader::new(config)
        .expect("valid test config")
        .with_remuxer(Arc::new(ConcatRemuxer))
}

/// Episode page markup as served by the site
pub fn episode_html(title: &str, apireq: &str) -> String {
    format!(
        r#"<html><head><title>{title} &#8211; Anime1.me</title></head><body>
<article><h2 class="entry-title">{title}</h2>
<video class="video-js vjs-big-play-centered" data-apireq="{apireq}"></video>
</article></body></html>"#
    )
}

/// Season index markup linking `links`
pub fn index_html(links: &[String]) -> String {
    let mut html = String::from("<html><body>");
    for link in links {
        html.push_str(&format!(
            r#"<article><h2 class="entry-title"><a href="{link}" rel="bookmark">ep</a></h2></article>"#
        ));
    }
    html.push_str("</body></html>");
    html
}

/// Season index markup linking `links`, with an "older entries" link to `older`
pub fn paged_index_html(links: &[String], older: &str) -> String {
    let html = index_html(links);
    html.replace(
        "</body>",
        &format!(r#"<div class="nav-links"><div class="nav-previous"><a href="{older}">older</a></div></div></body>"#),
    )
}

/// Serve `/{id}` as an episode page whose player API answers with `sources_json`
pub async fn mount_episode(server: &MockServer, id: &str, title: &str, sources_json: String) {
    Mock::given(method("GET"))
        .and(path(format!("/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(episode_html(title, id)))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api"))
        .and(body_string(format!("d={id}")))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", "e=1; path=/")
                .set_body_string(sources_json),
        )
        .mount(server)
        .await;
}

/// Episode `id` backed by a direct mp4 of `body`
pub async fn mount_direct_episode(server: &MockServer, id: &str, title: &str, body: Vec<u8>) {
    mount_episode(
        server,
        id,
        title,
        format!(r#"{{"s":[{{"src":"/media/{id}.mp4","type":"video/mp4"}}]}}"#),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(format!("/media/{id}.mp4")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Media playlist listing `count` segments named `seg{n}.ts`
pub fn media_playlist(count: usize) -> String {
    let mut playlist = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n",
    );
    for n in 0..count {
        playlist.push_str(&format!("#EXTINF:10.0,\nseg{n}.ts\n"));
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}

/// Bytes served for segment `n`
pub fn segment_body(n: usize) -> Vec<u8> {
    format!("<segment {n}>").into_bytes()
}

/// Episode `id` backed by an HLS playlist of `count` segments
///
/// Segments listed in `broken` always answer 503. Returns the bytes a
/// correct in-order assembly produces.
pub async fn mount_segmented_episode(
    server: &MockServer,
    id: &str,
    title: &str,
    count: usize,
    broken: &[usize],
) -> Vec<u8> {
    mount_episode(
        server,
        id,
        title,
        format!(r#"{{"s":[{{"src":"/hls/{id}/playlist.m3u8","type":"application/x-mpegURL"}}]}}"#),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(format!("/hls/{id}/playlist.m3u8")))
        .respond_with(ResponseTemplate::new(200).set_body_string(media_playlist(count)))
        .mount(server)
        .await;

    let mut expected = Vec::new();
    for n in 0..count {
        let response = if broken.contains(&n) {
            ResponseTemplate::new(503)
        } else {
            expected.extend(segment_body(n));
            ResponseTemplate::new(200).set_body_bytes(segment_body(n))
        };
        Mock::given(method("GET"))
            .and(path(format!("/hls/{id}/seg{n}.ts")))
            .respond_with(response)
            .mount(server)
            .await;
    }
    expected
}

/// Regular files under `root`, skipping the temporary directory
pub fn final_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".tmp")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Whether anything is left under the temporary directory
pub fn temp_is_empty(root: &Path) -> bool {
    WalkDir::new(root.join(".tmp"))
        .min_depth(1)
        .into_iter()
        .next()
        .is_none()
}

/// Events received so far
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
