//! On-disk artifacts of preprocessed videos.
//!
//! Every video gets its own directory under the store root:
//!
//! ```text
//! <root>/<video>/metadata.json
//!               /frame_indices.json
//!               /frames/<idx>_frame.png
//!               /layouts/<idx>_frame.json
//!               /audio.wav
//!               /transcript.json
//!               /chunks.json
//! <root>/models/
//! ```

use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use tokio::fs;

use crate::{
    error::{LecternError, Result},
    slides::SlideBoundaries,
    types::{Chunk, FrameLayout, Transcript, VideoMetadata},
};

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Platform data directory, e.g. `~/.local/share/lectern` on Linux.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("lectern")
    }

    pub fn model_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    /// Name a video is stored under: its file stem.
    pub fn video_name(video_path: &Path) -> String {
        video_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string())
    }

    pub fn video_dir(&self, video: &str) -> PathBuf {
        self.root.join(video)
    }

    pub fn metadata_path(&self, video: &str) -> PathBuf {
        self.video_dir(video).join("metadata.json")
    }

    pub fn boundaries_path(&self, video: &str) -> PathBuf {
        self.video_dir(video).join("frame_indices.json")
    }

    pub fn frames_dir(&self, video: &str) -> PathBuf {
        self.video_dir(video).join("frames")
    }

    pub fn frame_path(&self, video: &str, frame_index: usize) -> PathBuf {
        self.frames_dir(video)
            .join(format!("{frame_index}_frame.png"))
    }

    pub fn layouts_dir(&self, video: &str) -> PathBuf {
        self.video_dir(video).join("layouts")
    }

    pub fn layout_path(&self, video: &str, frame_index: usize) -> PathBuf {
        self.layouts_dir(video)
            .join(format!("{frame_index}_frame.json"))
    }

    pub fn audio_path(&self, video: &str) -> PathBuf {
        self.video_dir(video).join("audio.wav")
    }

    pub fn transcript_path(&self, video: &str) -> PathBuf {
        self.video_dir(video).join("transcript.json")
    }

    pub fn chunks_path(&self, video: &str) -> PathBuf {
        self.video_dir(video).join("chunks.json")
    }

    /// Create the video directory and its `frames/` and `layouts/` children.
    pub async fn prepare(&self, video: &str) -> Result<PathBuf> {
        fs::create_dir_all(self.frames_dir(video)).await?;
        fs::create_dir_all(self.layouts_dir(video)).await?;
        Ok(self.video_dir(video))
    }

    /// Frame image paths for every boundary, in boundary order.
    pub fn frame_paths(&self, video: &str, boundaries: &SlideBoundaries) -> Vec<(usize, PathBuf)> {
        boundaries
            .as_slice()
            .iter()
            .map(|&idx| (idx, self.frame_path(video, idx)))
            .collect()
    }

    pub async fn save_metadata(&self, video: &str, metadata: &VideoMetadata) -> Result<()> {
        write_json(&self.metadata_path(video), metadata).await
    }

    pub async fn load_metadata(&self, video: &str) -> Result<VideoMetadata> {
        read_json(&self.metadata_path(video)).await
    }

    pub async fn save_boundaries(&self, video: &str, boundaries: &SlideBoundaries) -> Result<()> {
        write_json(&self.boundaries_path(video), boundaries).await
    }

    /// Load and validate the boundary list.
    pub async fn load_boundaries(&self, video: &str) -> Result<SlideBoundaries> {
        let path = self.boundaries_path(video);
        let indices: Vec<usize> = read_json(&path).await?;
        SlideBoundaries::from_indices(indices)
            .map_err(|reason| LecternError::InvalidArtifact { path, reason })
    }

    pub async fn save_layout(&self, video: &str, layout: &FrameLayout) -> Result<()> {
        write_json(&self.layout_path(video, layout.frame_index), layout).await
    }

    pub async fn load_layout(&self, video: &str, frame_index: usize) -> Result<FrameLayout> {
        read_json(&self.layout_path(video, frame_index)).await
    }

    pub async fn save_transcript(&self, video: &str, transcript: &Transcript) -> Result<()> {
        write_json(&self.transcript_path(video), transcript).await
    }

    pub async fn load_transcript(&self, video: &str) -> Result<Transcript> {
        read_json(&self.transcript_path(video)).await
    }

    pub async fn save_chunks(&self, video: &str, chunks: &[Chunk]) -> Result<()> {
        write_json(&self.chunks_path(video), chunks).await
    }

    pub async fn load_chunks(&self, video: &str) -> Result<Vec<Chunk>> {
        read_json(&self.chunks_path(video)).await
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let pretty_json = serde_json::to_string_pretty(value)?;
    fs::write(path, &pretty_json).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !fs::try_exists(path).await? {
        return Err(LecternError::ArtifactNotFound {
            path: path.to_path_buf(),
        });
    }
    let json_content = fs::read_to_string(path).await?;
    serde_json::from_str(&json_content).map_err(|e| LecternError::InvalidArtifact {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoxLabel, Coordinate, LayoutBox, Segment};

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn paths_follow_layout() {
        let store = ArtifactStore::new("/data");
        assert_eq!(
            store.frame_path("csp", 150),
            PathBuf::from("/data/csp/frames/150_frame.png")
        );
        assert_eq!(
            store.layout_path("csp", 150),
            PathBuf::from("/data/csp/layouts/150_frame.json")
        );
        assert_eq!(
            store.boundaries_path("csp"),
            PathBuf::from("/data/csp/frame_indices.json")
        );
        assert_eq!(ArtifactStore::video_name(Path::new("/videos/csp.mp4")), "csp");
    }

    #[tokio::test]
    async fn boundaries_persist_as_flat_list() {
        let (_dir, store) = store();
        let boundaries = SlideBoundaries::from_indices(vec![0, 150, 600]).unwrap();
        store.save_boundaries("csp", &boundaries).await.unwrap();

        let raw = std::fs::read_to_string(store.boundaries_path("csp")).unwrap();
        let parsed: Vec<usize> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, vec![0, 150, 600]);
        assert_eq!(store.load_boundaries("csp").await.unwrap(), boundaries);
    }

    #[tokio::test]
    async fn invalid_boundary_list_is_rejected() {
        let (_dir, store) = store();
        store.prepare("csp").await.unwrap();
        std::fs::write(store.boundaries_path("csp"), "[5, 3]").unwrap();

        let err = store.load_boundaries("csp").await.unwrap_err();
        assert!(matches!(err, LecternError::InvalidArtifact { .. }));
    }

    #[tokio::test]
    async fn missing_artifact_names_the_file() {
        let (_dir, store) = store();
        let err = store.load_chunks("csp").await.unwrap_err();
        match err {
            LecternError::ArtifactNotFound { path } => assert_eq!(path, store.chunks_path("csp")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_json_is_invalid_artifact() {
        let (_dir, store) = store();
        store.prepare("csp").await.unwrap();
        std::fs::write(store.chunks_path("csp"), "{not json").unwrap();
        let err = store.load_chunks("csp").await.unwrap_err();
        assert!(matches!(err, LecternError::InvalidArtifact { .. }));
    }

    #[tokio::test]
    async fn layout_file_has_boxes_list() {
        let (_dir, store) = store();
        let mut boxed = LayoutBox::new(BoxLabel::Table, Coordinate::new(1.0, 2.0, 3.0, 4.0), 0.9);
        boxed.box_id = Some(0);
        let layout = FrameLayout {
            frame_index: 150,
            width: 1280,
            height: 720,
            boxes: vec![boxed],
        };
        store.save_layout("csp", &layout).await.unwrap();

        let raw: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(store.layout_path("csp", 150)).unwrap(),
        )
        .unwrap();
        assert_eq!(raw["boxes"][0]["label"], "table");
        assert_eq!(raw["boxes"][0]["box_id"], 0);
        assert_eq!(raw["boxes"][0]["coordinate"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(store.load_layout("csp", 150).await.unwrap(), layout);
    }

    #[tokio::test]
    async fn transcript_and_chunks_round_trip() {
        let (_dir, store) = store();
        let transcript = Transcript {
            text: "hello world".to_string(),
            segments: vec![Segment::new(0.0, 1.5, "hello world")],
            language: "en".to_string(),
        };
        store.save_transcript("csp", &transcript).await.unwrap();
        let loaded = store.load_transcript("csp").await.unwrap();
        assert_eq!(loaded.segments, transcript.segments);

        let chunks = vec![Chunk {
            start: 0.0,
            end: 1.5,
            text: "hello world".to_string(),
            embedding: vec![0.5, 0.25],
            label: Some("greeting".to_string()),
        }];
        store.save_chunks("csp", &chunks).await.unwrap();
        assert_eq!(store.load_chunks("csp").await.unwrap(), chunks);
    }
}
