//! Lyrics lookup.
//!
//! [`MusixmatchClient`] queries the subtitle macro endpoint used by the
//! Musixmatch desktop app and returns both plain and time-synced lyrics.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::{LyricsLine, LyricsResult, LyricsTime, MusicSourceError, Result, TrackMetadata};

const MUSIXMATCH_BASE_URL: &str = "http://apic.musixmatch.com";
const SUBTITLES_PATH: &str = "/ws/1.1/macro.subtitles.get";
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/13.0.4 Safari/605.1.15";

/// Seconds added after the last synced line when the track length is unknown.
const TAIL_WITHOUT_DURATION: f64 = 10.0;

const FIXED_QUERY: &[(&str, &str)] = &[
    ("format", "json"),
    ("user_language", "en"),
    ("tags", "playing"),
    ("namespace", "lyrics_synched"),
    ("f_subtitle_length_max_deviation", "1"),
    ("subtitle_format", "mxm"),
    ("app_id", "mac-ios-v2.0"),
    ("part", "subtitle_translated,lyrics_translated"),
    ("selected_language", "en"),
];

#[async_trait]
pub trait LyricsProvider: Send + Sync {
    async fn fetch(&self, track: &TrackMetadata) -> Result<LyricsResult>;
}

#[derive(Debug, Clone)]
pub struct MusixmatchClient {
    client: Client,
    base_url: String,
    user_token: String,
    ob_user_token: Option<String>,
}

impl MusixmatchClient {
    pub fn new(user_token: impl Into<String>, ob_user_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: MUSIXMATCH_BASE_URL.to_string(),
            user_token: user_token.into(),
            ob_user_token: ob_user_token.filter(|t| !t.is_empty()),
        }
    }

    /// Points the client at another host (mirrors, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn query(&self, track: &TrackMetadata) -> Vec<(&'static str, String)> {
        let mut query: Vec<(&'static str, String)> = FIXED_QUERY
            .iter()
            .map(|(k, v)| (*k, v.to_string()))
            .collect();
        query.push(("usertoken", self.user_token.clone()));
        if let Some(ob) = &self.ob_user_token {
            query.push(("OB-USER-TOKEN", ob.clone()));
        }
        query.push(("q_track", track.title.clone()));
        query.push(("q_artist", track.artist.clone()));
        let artists = if track.artists.is_empty() {
            &track.artist
        } else {
            &track.artists
        };
        query.push(("q_artists", artists.clone()));
        query.push(("q_album", track.album.clone()));
        if track.duration > 0 {
            query.push(("q_duration", track.duration.to_string()));
            query.push(("f_subtitle_length", track.duration.to_string()));
        }
        if !track.spotify_uri.is_empty() {
            query.push(("track_spotify_id", track.spotify_uri.clone()));
        }
        query
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

fn parse_lines(body: &str) -> Vec<LyricsLine> {
    if body.is_empty() {
        return Vec::new();
    }
    serde_json::from_str(body).unwrap_or_else(|e| {
        debug!("musixmatch: unreadable subtitle body: {e}");
        Vec::new()
    })
}

/// Extracts a [`LyricsResult`] from a `macro.subtitles.get` response.
pub fn parse_subtitles_response(response: &Value, duration: u32) -> Result<LyricsResult> {
    let calls = response
        .pointer("/message/body/macro_calls")
        .ok_or(MusicSourceError::LyricsNotFound)?;
    let raw = str_at(calls, "/track.lyrics.get/message/body/lyrics/lyrics_body").to_string();
    let subtitle = calls
        .pointer("/track.subtitles.get/message/body/subtitle_list/0/subtitle")
        .cloned()
        .unwrap_or(Value::Null);
    let language = str_at(&subtitle, "/subtitle_language").to_string();

    let original = parse_lines(str_at(&subtitle, "/subtitle_body"));
    let translated_body = str_at(&subtitle, "/subtitle_translated/subtitle_body");

    let mut synced: Vec<LyricsLine> = if language != "en" && !translated_body.is_empty() {
        parse_lines(translated_body)
            .into_iter()
            .map(|line| LyricsLine {
                translated: line.text,
                text: line.original,
                time: line.time,
                original: String::new(),
            })
            .collect()
    } else {
        Vec::new()
    };

    if synced.is_empty() {
        synced = original;
    } else if synced.len() == original.len() {
        for (line, orig) in synced.iter_mut().zip(original) {
            line.original = orig.text;
        }
    }

    if let Some(last) = synced.last() {
        if !(last.text.is_empty() && last.translated.is_empty() && last.original.is_empty()) {
            let tail = if duration > 0 {
                duration as f64 - last.time.total
            } else {
                TAIL_WITHOUT_DURATION
            };
            let total = last.time.total + tail;
            synced.push(LyricsLine {
                time: LyricsTime {
                    total,
                    ..Default::default()
                },
                ..Default::default()
            });
        }
    }

    if raw.is_empty() && synced.is_empty() {
        return Err(MusicSourceError::LyricsNotFound);
    }
    Ok(LyricsResult {
        raw,
        synced,
        language,
    })
}

#[async_trait]
impl LyricsProvider for MusixmatchClient {
    async fn fetch(&self, track: &TrackMetadata) -> Result<LyricsResult> {
        let url = format!("{}{}", self.base_url, SUBTITLES_PATH);
        let response: Value = self
            .client
            .get(url)
            .query(&self.query(track))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-us")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_subtitles_response(&response, track.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(language: &str, body: &str, translated: &str) -> Value {
        json!({
            "message": {"body": {"macro_calls": {
                "track.lyrics.get": {"message": {"body": {"lyrics": {"lyrics_body": "plain"}}}},
                "track.subtitles.get": {"message": {"body": {"subtitle_list": [
                    {"subtitle": {
                        "subtitle_body": body,
                        "subtitle_language": language,
                        "subtitle_translated": {"subtitle_body": translated}
                    }}
                ]}}}
            }}}
        })
    }

    #[test]
    fn test_english_lines_get_tail() {
        let body = r#"[{"text":"hello","time":{"total":1.5,"minutes":0,"seconds":1,"hundredths":50}}]"#;
        let result = parse_subtitles_response(&response("en", body, ""), 200).unwrap();
        assert_eq!(result.raw, "plain");
        assert_eq!(result.synced.len(), 2);
        assert_eq!(result.synced[0].text, "hello");
        assert_eq!(result.synced[1].time.total, 200.0);
        assert!(result.synced[1].text.is_empty());
    }

    #[test]
    fn test_translated_lines() {
        let body = r#"[{"text":"bonjour","time":{"total":2.0}}]"#;
        let translated = r#"[{"text":"hello","original":"bonjour","time":{"total":2.0}}]"#;
        let result = parse_subtitles_response(&response("fr", body, translated), 0).unwrap();
        assert_eq!(result.language, "fr");
        assert_eq!(result.synced[0].text, "bonjour");
        assert_eq!(result.synced[0].translated, "hello");
        assert_eq!(result.synced[0].original, "bonjour");
        assert_eq!(result.synced[1].time.total, 12.0);
    }

    #[test]
    fn test_empty_response() {
        let empty = json!({"message": {"body": {"macro_calls": {}}}});
        assert!(matches!(
            parse_subtitles_response(&empty, 0),
            Err(MusicSourceError::LyricsNotFound)
        ));
    }
}
