use std::fmt;

/// Container/codec of a source byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamFormat {
    /// Already canonical PCM (s16le, stereo, 48 kHz).
    Raw,
    /// MPEG-1/2 layer III.
    Mp3,
    /// WebM/Matroska carrying Opus.
    WebM,
    /// Ogg/Vorbis.
    Vorbis,
}

impl StreamFormat {
    /// Guesses the format from an HTTP `Content-Type`.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "audio/mpeg" | "audio/mp3" | "audio/mpeg3" => Some(Self::Mp3),
            "audio/webm" | "video/webm" | "audio/x-matroska" => Some(Self::WebM),
            "audio/ogg" | "application/ogg" | "audio/vorbis" => Some(Self::Vorbis),
            "audio/l16" | "audio/pcm" => Some(Self::Raw),
            _ => None,
        }
    }

    /// Guesses the format from a file extension (with or without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp3" => Some(Self::Mp3),
            "webm" | "mka" | "weba" => Some(Self::WebM),
            "ogg" | "oga" => Some(Self::Vorbis),
            "pcm" | "raw" => Some(Self::Raw),
            _ => None,
        }
    }

    /// Guesses the format from the last path segment of a URL.
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let file = path.rsplit('/').next().unwrap_or_default();
        let (_, ext) = file.rsplit_once('.')?;
        Self::from_extension(ext)
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Raw => "raw",
            Self::Mp3 => "mp3",
            Self::WebM => "webm",
            Self::Vorbis => "vorbis",
        };
        f.write_str(name)
    }
}
