//! Multi-codec PCM decode via `symphonia`, mirroring the decode loop in the
//! `Bojan20-reelforge-standalone` pack repo's offline pipeline (probe by
//! extension hint, decode every packet of the first audio track, mix down
//! to mono `f64` samples).

use std::io::Cursor;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::BeatError;

pub struct DecodedAudio {
    pub samples: Vec<f64>,
    pub sample_rate: u32,
}

/// Decodes `bytes` (a whole audio file read into memory — the Stage Runner
/// downloads the artifact to a scratch buffer before calling in) to mono PCM.
pub fn decode_pcm(bytes: Vec<u8>, extension_hint: Option<&str>) -> Result<DecodedAudio, BeatError> {
    let cursor = Cursor::new(bytes);
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| BeatError::AnalysisFailed(format!("failed to probe audio format: {e}")))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| BeatError::AnalysisFailed("no audio track found".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params.sample_rate.unwrap_or(44_100);
    let channels = codec_params.channels.map(|c| c.count()).unwrap_or(1).max(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| BeatError::AnalysisFailed(format!("failed to create decoder: {e}")))?;

    let mut mono: Vec<f64> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(BeatError::AnalysisFailed(format!("packet read error: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => mix_down_to_mono(&decoded, channels, &mut mono),
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(BeatError::AnalysisFailed(format!("decode error: {e}"))),
        }
    }

    Ok(DecodedAudio { samples: mono, sample_rate })
}

fn mix_down_to_mono(decoded: &AudioBufferRef, channels: usize, out: &mut Vec<f64>) {
    macro_rules! mix {
        ($buf:expr, $as_f64:expr) => {{
            let planes = $buf.planes();
            let frames = $buf.frames();
            let n_ch = channels.min(planes.planes().len()).max(1);
            for frame in 0..frames {
                let mut sum = 0.0;
                for ch in 0..n_ch {
                    sum += $as_f64(planes.planes()[ch][frame]);
                }
                out.push(sum / n_ch as f64);
            }
        }};
    }

    match decoded {
        AudioBufferRef::F32(buf) => mix!(buf, |s: f32| s as f64),
        AudioBufferRef::F64(buf) => mix!(buf, |s: f64| s),
        AudioBufferRef::S16(buf) => mix!(buf, |s: i16| s as f64 / i16::MAX as f64),
        AudioBufferRef::S32(buf) => mix!(buf, |s: i32| s as f64 / i32::MAX as f64),
        AudioBufferRef::U8(buf) => mix!(buf, |s: u8| (s as f64 - 128.0) / 128.0),
        _ => {}
    }
}
