use msaudio::{
    decode_stream, AudioError, Mp3StreamEncoder, StreamEncoder, StreamFormat,
    VorbisStreamEncoder, PCM_WINDOW_BYTES,
};
use tokio::io::AsyncReadExt;

fn tone_window(phase: &mut f32) -> Vec<u8> {
    let mut window = Vec::with_capacity(PCM_WINDOW_BYTES);
    for _ in 0..PCM_WINDOW_BYTES / 4 {
        let sample = (phase.sin() * 8000.0) as i16;
        *phase += 2.0 * std::f32::consts::PI * 440.0 / 48_000.0;
        window.extend_from_slice(&sample.to_le_bytes());
        window.extend_from_slice(&sample.to_le_bytes());
    }
    window
}

fn encode_seconds(encoder: &mut dyn StreamEncoder, seconds: usize) -> Vec<u8> {
    let mut out = encoder.warmup_header().to_vec();
    let mut phase = 0.0;
    for _ in 0..seconds * 50 {
        encoder.encode(&tone_window(&mut phase), &mut out).unwrap();
    }
    out
}

#[tokio::test]
async fn test_raw_is_passthrough() {
    let input = vec![7u8; PCM_WINDOW_BYTES * 3];
    let mut pcm = decode_stream(std::io::Cursor::new(input.clone()), StreamFormat::Raw)
        .await
        .unwrap();
    assert!(pcm.source_info().is_canonical());
    let mut out = Vec::new();
    pcm.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, input);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mp3_roundtrip_duration() {
    let mut encoder = Mp3StreamEncoder::new().unwrap();
    let encoded = encode_seconds(&mut encoder, 2);

    let mut pcm = decode_stream(std::io::Cursor::new(encoded), StreamFormat::Mp3)
        .await
        .unwrap();
    let mut out = Vec::new();
    pcm.read_to_end(&mut out).await.unwrap();

    let frames = out.len() / 4;
    // 2 s d'audio, plus l'en-tête et le délai de l'encodeur
    assert!(frames >= 2 * 48_000 - 4 * 1152, "decoded {frames} frames");
    assert!(frames <= 2 * 48_000 + 8 * 1152, "decoded {frames} frames");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_vorbis_roundtrip() {
    let mut encoder = VorbisStreamEncoder::new().unwrap();
    let encoded = encode_seconds(&mut encoder, 2);

    let mut pcm = decode_stream(std::io::Cursor::new(encoded), StreamFormat::Vorbis)
        .await
        .unwrap();
    assert_eq!(pcm.source_info().sample_rate, 48_000);
    let mut out = Vec::new();
    pcm.read_to_end(&mut out).await.unwrap();
    assert!(out.len() / 4 > 48_000, "decoded {} frames", out.len() / 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_garbage_mp3_fails_once() {
    let garbage = vec![0x42u8; 32 * 1024];
    let result = decode_stream(std::io::Cursor::new(garbage), StreamFormat::Mp3).await;
    assert!(matches!(result, Err(AudioError::Decode(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_truncated_webm_is_an_error() {
    let result = decode_stream(
        std::io::Cursor::new(vec![0x1A, 0x45, 0xDF, 0xA3, 0x00]),
        StreamFormat::WebM,
    )
    .await;
    assert!(result.is_err());
}
