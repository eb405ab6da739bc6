use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LecternError {
    #[error("Video file not found: {path}")]
    VideoNotFound { path: PathBuf },

    #[error("Cannot open video {path}: {reason}")]
    VideoOpenFailed { path: PathBuf, reason: String },

    #[error("No frames could be read from {path}")]
    NoFrames { path: PathBuf },

    #[error("Frame read failed at frame {frame_index}: {reason}")]
    FrameReadFailed { frame_index: usize, reason: String },

    #[error("Frame extraction failed for frame {frame_index} of {video_path}: {reason}")]
    FrameExtractionFailed {
        video_path: PathBuf,
        frame_index: usize,
        reason: String,
    },

    #[error("Frame image not found: {path}")]
    FrameNotFound { path: PathBuf },

    #[error("File is not a valid image: {path} ({reason})")]
    InvalidImage { path: PathBuf, reason: String },

    #[error("Artifact not found: {path}")]
    ArtifactNotFound { path: PathBuf },

    #[error("Invalid artifact {path}: {reason}")]
    InvalidArtifact { path: PathBuf, reason: String },

    #[error("Audio extraction failed for {video_path}: {reason}")]
    AudioExtractionFailed { video_path: PathBuf, reason: String },

    #[error("Transcription failed for {audio_path}: {reason}")]
    TranscriptFailed { audio_path: PathBuf, reason: String },

    #[error("Model download failed for {url}: {reason}")]
    ModelDownloadFailed { url: String, reason: String },

    #[error("Layout detection failed for {image_path}: {reason}")]
    LayoutDetectionFailed { image_path: PathBuf, reason: String },

    #[error("Embedding request failed: {reason}")]
    EmbeddingFailed { reason: String },

    #[error("Chunk labeling failed: {reason}")]
    LabelFailed { reason: String },

    #[error("Explanation request failed: {reason}")]
    ExplanationFailed { reason: String },

    #[error("Embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("No slide is shown at {timestamp:.2}s")]
    NoSlideAtTimestamp { timestamp: f64 },

    #[error("Box {box_id} not found in layout of frame {frame_index}")]
    BoxNotFound { box_id: usize, frame_index: usize },

    #[error("Box {box_id} of frame {frame_index} lies outside the slide image")]
    EmptyRegion { box_id: usize, frame_index: usize },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("API request to {url} returned {status}: {body}")]
    ApiStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Missing API key: {env_var} environment variable is not set")]
    MissingApiKey { env_var: String },
}

pub type Result<T> = std::result::Result<T, LecternError>;
