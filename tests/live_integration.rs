//! Integration tests for live playlist tailing.

use std::collections::BTreeMap;
use std::time::Duration;

use m3uget::download::{HttpClient, RetryPolicy, SegmentDownloader};
use m3uget::live::LiveTailer;
use m3uget::playlist::{Playlist, Segment};
use m3uget::session::{CacheDir, DownloadSession};
use m3uget::ui::SilentUi;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_segment(server: &MockServer, path_str: &str, content: &[u8]) {
    Mock::given(method("GET"))
        .and(path(path_str))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .mount(server)
        .await;
}

fn playlist_body(names: &[&str]) -> String {
    let mut body = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:2\n");
    for name in names {
        body.push_str("#EXTINF:2.0,\n");
        body.push_str(name);
        body.push('\n');
    }
    body
}

#[tokio::test]
async fn test_tailer_appends_new_segments_then_terminates() {
    let server = MockServer::start().await;
    mock_segment(&server, "/0.ts", b"s0").await;
    mock_segment(&server, "/1.ts", b"s1").await;
    mock_segment(&server, "/2.ts", b"s2").await;

    // First refresh discovers 2.ts; second refresh is identical, which
    // means the broadcast ended. Sliding window: 0.ts drops out.
    Mock::given(method("GET"))
        .and(path("/live.m3u8"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(playlist_body(&["1.ts", "2.ts"])),
        )
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let cache = CacheDir::at(temp_dir.path());

    let initial = {
        let mut playlist = Playlist::default();
        playlist
            .tags
            .insert("EXT-X-TARGETDURATION".to_string(), "2".to_string());
        playlist.segments = vec![
            Segment::new(format!("{}/0.ts", server.uri()), 0),
            Segment::new(format!("{}/1.ts", server.uri()), 1),
        ];
        playlist
    };
    let mut session = DownloadSession {
        m3u_url: format!("{}/live.m3u8", server.uri()),
        livestream: true,
        playlist: Some(initial.clone()),
        ..DownloadSession::default()
    };

    let client = HttpClient::new();
    let downloader = SegmentDownloader::new(client.clone(), 2, RetryPolicy::default())
        .expect("valid worker count");
    let mut run = downloader.start(cache.clone(), BTreeMap::new(), BTreeMap::new());
    run.enqueue(&initial.segments);

    let tailer = LiveTailer::new(client, cache.clone(), Duration::from_millis(50));
    tailer
        .follow(&mut session, &mut run, &SilentUi, &mut None)
        .await
        .expect("tailing should terminate cleanly");
    run.shutdown().await;

    // 2.ts was discovered by the refresh and downloaded with index 2.
    assert!(cache.has_segment(0));
    assert!(cache.has_segment(1));
    assert!(cache.has_segment(2));
    assert_eq!(std::fs::read(cache.segment_path(2)).expect("segment"), b"s2");

    let playlist = session.playlist.as_ref().expect("playlist present");
    assert_eq!(playlist.segments.len(), 3);
    assert_eq!(playlist.segments[2].index, 2);

    // The refreshed session was checkpointed.
    let restored = DownloadSession::load(&cache)
        .expect("checkpoint readable")
        .expect("checkpoint present");
    assert_eq!(
        restored.playlist.expect("playlist persisted").segments.len(),
        3
    );
}

#[tokio::test]
async fn test_tailer_ends_immediately_when_nothing_new() {
    let server = MockServer::start().await;
    mock_segment(&server, "/0.ts", b"s0").await;
    Mock::given(method("GET"))
        .and(path("/live.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(playlist_body(&["0.ts"])))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let cache = CacheDir::at(temp_dir.path());

    let initial = Playlist {
        segments: vec![Segment::new(format!("{}/0.ts", server.uri()), 0)],
        ..Playlist::default()
    };
    let mut session = DownloadSession {
        m3u_url: format!("{}/live.m3u8", server.uri()),
        livestream: true,
        playlist: Some(initial.clone()),
        ..DownloadSession::default()
    };

    let client = HttpClient::new();
    let downloader = SegmentDownloader::new(client.clone(), 1, RetryPolicy::default())
        .expect("valid worker count");
    let mut run = downloader.start(cache.clone(), BTreeMap::new(), BTreeMap::new());
    run.enqueue(&initial.segments);

    let tailer = LiveTailer::new(client, cache.clone(), Duration::from_millis(20));
    tailer
        .follow(&mut session, &mut run, &SilentUi, &mut None)
        .await
        .expect("tailing should terminate cleanly");
    let total = run.total();
    run.shutdown().await;

    assert_eq!(total, 1);
    assert_eq!(
        session.playlist.as_ref().map(|p| p.segments.len()),
        Some(1)
    );
}
