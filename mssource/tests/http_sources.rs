use mssource::{
    CsnSource, HttpSource, LyricsProvider, MusicSource, MusixmatchClient, SourceKind,
    StreamFormat, Track, YoutubeSource,
};
use tokio::io::AsyncReadExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_url_source_streams_body() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/radio/live"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "audio/mpeg"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/radio/live"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
        .mount(&server)
        .await;

    let source = HttpSource::new();
    let url = format!("{}/radio/live", server.uri());
    let mut track = source.search(&url).await?.remove(0);
    assert_eq!(track.source, SourceKind::Url);
    assert!(!track.is_populated());

    source.populate(&mut track).await?;
    let mut stream = track.open().await?;
    assert_eq!(stream.format, StreamFormat::Mp3);
    let mut body = Vec::new();
    stream.reader.read_to_end(&mut body).await?;
    assert_eq!(body, vec![1, 2, 3, 4]);
    Ok(())
}

#[tokio::test]
async fn test_url_source_unknown_format() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .mount(&server)
        .await;

    let source = HttpSource::new();
    let mut track = source
        .search(&format!("{}/index", server.uri()))
        .await
        .unwrap()
        .remove(0);
    assert!(source.populate(&mut track).await.is_err());
}

#[tokio::test]
async fn test_musixmatch_query() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "message": {"body": {"macro_calls": {
            "track.lyrics.get": {"message": {"body": {"lyrics": {"lyrics_body": "words"}}}},
            "track.subtitles.get": {"message": {"body": []}}
        }}}
    });
    Mock::given(method("GET"))
        .and(path("/ws/1.1/macro.subtitles.get"))
        .and(query_param("usertoken", "tok"))
        .and(query_param("q_track", "Song"))
        .and(query_param("q_artists", "Someone"))
        .and(query_param("q_duration", "120"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let client = MusixmatchClient::new("tok", None).with_base_url(server.uri());
    let track = Track::new(SourceKind::Deezer, "1", "Song")
        .with_artist("Someone")
        .with_duration(120);
    let lyrics = client.fetch(&track.metadata()).await?;
    assert_eq!(lyrics.raw, "words");
    assert!(lyrics.synced.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_csn_search_then_stream() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let results = serde_json::json!([{
        "q": "mua he",
        "music": {"rows": "3", "row_total": 1, "page": 1, "data": [{
            "music_id": 1977,
            "music_title": "Mùa Hè",
            "music_artist": "Singer; Guest",
            "music_cover": format!("{}/cover.jpg", server.uri()),
            "music_link": format!("{}/mp3/mua-he.html", server.uri()),
        }]}
    }]);
    Mock::given(method("GET"))
        .and(path("/search/real"))
        .and(query_param("type", "json"))
        .and(query_param("q", "mua he"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results))
        .expect(1)
        .mount(&server)
        .await;
    let page = format!(
        r#"<script>sources: [{{"file": "{0}/128/song.mp3", "type": "mp3"}}, {{"file": "{0}/320/song.mp3", "type": "mp3"}},]</script>
        <span>Album: </span><a href="/a">Summer</a>"#,
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/mp3/mua-he.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/320/song.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFFu8, 0xFB, 0x90]))
        .mount(&server)
        .await;

    let source = CsnSource::new(None)?.with_base_url(server.uri());
    let mut track = source.search("mua he").await?.remove(0);
    assert_eq!(track.source, SourceKind::Csn);
    assert_eq!(track.id, "1977");
    assert_eq!(track.artist, "Singer");
    assert_eq!(track.artists, "Singer, Guest");

    source.populate(&mut track).await?;
    assert_eq!(track.album, "Summer");
    let mut stream = track.open().await?;
    assert_eq!(stream.format, StreamFormat::Mp3);
    let mut body = Vec::new();
    stream.reader.read_to_end(&mut body).await?;
    assert_eq!(body, vec![0xFF, 0xFB, 0x90]);
    Ok(())
}

#[tokio::test]
async fn test_csn_empty_search() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/real"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"q": "x"}])))
        .mount(&server)
        .await;

    let source = CsnSource::new(None)?.with_base_url(server.uri());
    assert!(source.search("x").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_youtube_search_then_stream() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let search = serde_json::json!({
        "kind": "youtube#searchListResponse",
        "items": [{
            "id": {"kind": "youtube#video", "videoId": "dQw4w9WgXcQ"},
            "snippet": {
                "title": "Rick Astley - Never Gonna Give You Up &#39;Official&#39;",
                "channelTitle": "Rick Astley",
                "thumbnails": {"default": {"url": "https://i.ytimg.com/vi/dQw4w9WgXcQ/default.jpg"}}
            }
        }]
    });
    Mock::given(method("GET"))
        .and(path("/youtube/v3/search"))
        .and(query_param("key", "dev-key"))
        .and(query_param("type", "video"))
        .and(query_param("q", "never gonna"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search))
        .expect(1)
        .mount(&server)
        .await;
    let details = serde_json::json!({
        "lengthSeconds": 213,
        "adaptiveFormats": [
            {"url": format!("{}/video.webm", server.uri()), "type": "video/webm; codecs=\"vp9\"", "bitrate": "900000"},
            {"url": format!("{}/low.webm", server.uri()), "type": "audio/webm; codecs=\"opus\"", "bitrate": "50000"},
            {"url": format!("{}/high.webm", server.uri()), "type": "audio/webm; codecs=\"opus\"", "bitrate": "160000"},
            {"url": format!("{}/audio.m4a", server.uri()), "type": "audio/mp4", "bitrate": "999999"}
        ]
    });
    Mock::given(method("GET"))
        .and(path("/api/v1/videos/dQw4w9WgXcQ"))
        .respond_with(ResponseTemplate::new(200).set_body_json(details))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/high.webm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x1Au8, 0x45, 0xDF, 0xA3]))
        .mount(&server)
        .await;

    let source = YoutubeSource::new("dev-key", server.uri())
        .with_api_url(format!("{}/youtube/v3", server.uri()));
    let mut track = source.search("never gonna").await?.remove(0);
    assert_eq!(track.source, SourceKind::Youtube);
    assert_eq!(track.title, "Rick Astley - Never Gonna Give You Up 'Official'");
    assert_eq!(track.artist, "Rick Astley");
    assert_eq!(track.href, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    assert!(track.cover.ends_with("default.jpg"));

    source.populate(&mut track).await?;
    assert_eq!(track.duration, 213);
    let mut stream = track.open().await?;
    assert_eq!(stream.format, StreamFormat::WebM);
    let mut body = Vec::new();
    stream.reader.read_to_end(&mut body).await?;
    assert_eq!(body, vec![0x1A, 0x45, 0xDF, 0xA3]);
    Ok(())
}

#[tokio::test]
async fn test_youtube_without_audio_format() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/videos/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"adaptiveFormats": []})))
        .mount(&server)
        .await;

    let source = YoutubeSource::new("dev-key", server.uri());
    let mut track = Track::new(SourceKind::Youtube, "abc", "Nothing");
    assert!(source.populate(&mut track).await.is_err());
    assert!(!track.is_populated());
    Ok(())
}
