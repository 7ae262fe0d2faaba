//! HTTP transport tests against a mock server.

use streamhold::config::TransportConfig;
use streamhold::transport::HttpTransport;
use streamhold_cache::{Error, Playlist, Transport};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> HttpTransport {
    HttpTransport::new(&TransportConfig::default())
}

#[tokio::test]
async fn test_fetch_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/seg0.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 188]))
        .mount(&server)
        .await;

    let body = transport()
        .fetch(&format!("{}/seg0.ts", server.uri()))
        .await
        .unwrap();
    assert_eq!(body.len(), 188);
    assert!(body.iter().all(|b| *b == 7));
}

#[tokio::test]
async fn test_fetch_error_status_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.ts"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = transport()
        .fetch(&format!("{}/gone.ts", server.uri()))
        .await;
    assert!(matches!(result, Err(Error::Transport(_))));
}

#[tokio::test]
async fn test_stat_uses_head_content_length() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/seg1.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1316]))
        .expect(1)
        .mount(&server)
        .await;

    let size = transport()
        .stat(&format!("{}/seg1.ts", server.uri()))
        .await
        .unwrap();
    assert_eq!(size, 1316);
}

#[tokio::test]
async fn test_stat_falls_back_to_ranged_get() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/seg2.ts"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/seg2.ts"))
        .and(header("range", "bytes=0-0"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 0-0/5000")
                .set_body_bytes(vec![0u8; 1]),
        )
        .mount(&server)
        .await;

    let size = transport()
        .stat(&format!("{}/seg2.ts", server.uri()))
        .await
        .unwrap();
    assert_eq!(size, 5000);
}

#[tokio::test]
async fn test_stat_without_any_size_fails() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/seg3.ts"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/seg3.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 10]))
        .mount(&server)
        .await;

    let result = transport()
        .stat(&format!("{}/seg3.ts", server.uri()))
        .await;
    assert!(matches!(result, Err(Error::Transport(_))));
}

#[tokio::test]
async fn test_master_playlist_selects_best_variant() {
    let server = MockServer::start().await;
    let master = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
        low/index.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1280x720\n\
        high/index.m3u8\n";
    let media = "#EXTM3U\n\
        #EXT-X-TARGETDURATION:6\n\
        #EXT-X-MEDIA-SEQUENCE:120\n\
        #EXTINF:6.0,\n\
        seg120.ts\n\
        #EXTINF:6.0,\n\
        seg121.ts\n";
    Mock::given(method("GET"))
        .and(path("/channel/master.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(master))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/channel/high/index.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(media))
        .mount(&server)
        .await;

    let url = format!("{}/channel/master.m3u8", server.uri());
    let playlist = Playlist::load(&transport(), &url).await.unwrap();

    assert_eq!(
        playlist.url(),
        format!("{}/channel/high/index.m3u8", server.uri())
    );
    assert!(!playlist.is_vod());
    assert_eq!(playlist.cursor(), 120);
    let urls: Vec<String> = playlist.segments().map(|s| s.url).collect();
    assert_eq!(
        urls,
        vec![
            format!("{}/channel/high/seg120.ts", server.uri()),
            format!("{}/channel/high/seg121.ts", server.uri()),
        ]
    );
}

#[tokio::test]
async fn test_live_stream_is_read_in_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/live/channel"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x47u8; 4096]))
        .mount(&server)
        .await;

    let mut stream = transport()
        .open_stream(&format!("{}/live/channel", server.uri()))
        .await
        .unwrap();
    let mut total = 0;
    while let Some(chunk) = stream.next_chunk().await.unwrap() {
        total += chunk.len();
    }
    assert_eq!(total, 4096);
}
