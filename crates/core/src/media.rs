use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::{
    error::{LecternError, Result},
    types::VideoMetadata,
};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

/// Parse an ffprobe rational such as `30000/1001`.
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = match rate.split_once('/') {
        Some((num, den)) => (num.trim().parse::<f64>().ok()?, den.trim().parse::<f64>().ok()?),
        None => (rate.trim().parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

fn parse_probe(path: &Path, json: &str) -> Result<VideoMetadata> {
    let probe: ProbeOutput = serde_json::from_str(json)?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| LecternError::VideoOpenFailed {
            path: path.to_path_buf(),
            reason: "no video stream".to_string(),
        })?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .ok_or_else(|| LecternError::VideoOpenFailed {
            path: path.to_path_buf(),
            reason: "unknown frame rate".to_string(),
        })?;

    Ok(VideoMetadata {
        fps,
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        frame_count: stream.nb_frames.and_then(|n| n.parse().ok()),
    })
}

/// Read frame rate and dimensions of the first video stream using ffprobe
pub fn probe_metadata(path: &Path) -> Result<VideoMetadata> {
    if !path.is_file() {
        return Err(LecternError::VideoNotFound {
            path: path.to_path_buf(),
        });
    }

    let output = std::process::Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height,avg_frame_rate,r_frame_rate,nb_frames")
        .arg("-of")
        .arg("json")
        .arg(path)
        .output()?;

    if !output.status.success() {
        return Err(LecternError::VideoOpenFailed {
            path: path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    parse_probe(path, &String::from_utf8_lossy(&output.stdout))
}

/// Write the frame at `frame_index` as an image, seeking by timestamp
pub async fn extract_frame(
    video_path: &Path,
    frame_index: usize,
    fps: f64,
    output_path: &Path,
) -> Result<()> {
    let seconds = frame_index as f64 / fps;
    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-v")
        .arg("error")
        .arg("-ss")
        .arg(format!("{seconds:.3}"))
        .arg("-i")
        .arg(video_path)
        .arg("-frames:v")
        .arg("1")
        .arg(output_path)
        .output()
        .await?;

    if !output.status.success() || !output_path.is_file() {
        return Err(LecternError::FrameExtractionFailed {
            video_path: video_path.to_path_buf(),
            frame_index,
            reason: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(())
}

#[derive(Debug, Default)]
pub struct FrameExtractionReport {
    pub extracted: Vec<usize>,
    pub failed: Vec<(usize, String)>,
}

/// Run [`extract_frame`] for every `(frame_index, output_path)`. A frame
/// that fails is logged and recorded, the others are still extracted.
pub async fn extract_frames(
    video_path: &Path,
    frames: &[(usize, PathBuf)],
    fps: f64,
) -> FrameExtractionReport {
    let mut report = FrameExtractionReport::default();

    for (frame_index, output_path) in frames {
        match extract_frame(video_path, *frame_index, fps, output_path).await {
            Ok(()) => report.extracted.push(*frame_index),
            Err(e) => {
                warn!(frame = frame_index, error = %e, "frame extraction failed");
                report.failed.push((*frame_index, e.to_string()));
            }
        }
    }

    info!(
        extracted = report.extracted.len(),
        failed = report.failed.len(),
        "frame extraction finished"
    );
    report
}

/// Extract 16 kHz mono PCM audio from video using ffmpeg
pub async fn extract_audio(video_path: &Path, audio_path: &Path) -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(video_path)
        .arg("-vn")
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg("-ar")
        .arg("16000")
        .arg("-ac")
        .arg("1")
        .arg(audio_path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(LecternError::AudioExtractionFailed {
            video_path: video_path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(())
}
