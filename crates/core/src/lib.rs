pub mod assist;
pub mod chunker;
pub mod config;
pub mod context;
pub mod error;
pub mod format;
pub mod intelligence;
pub mod layout;
pub mod media;
pub mod provider;
pub mod slides;
pub mod store;
pub mod transcribe;
pub mod types;
pub mod video;

pub use assist::{Explanation, associate, explain_box};
pub use chunker::{NoLabels, TranscriptChunker};
pub use config::{
    ChunkerConfig, GroupingConfig, LabelFailurePolicy, PipelineConfig, SlideDetectorConfig,
};
pub use context::{ContextWindow, association_candidates, best_association, context_window};
pub use error::{LecternError, Result};
pub use intelligence::{Embedder, ExplainRequest, Explainer, Labeler, OpenAiClient};
pub use layout::{
    CommandLayoutDetector, LayoutBatchReport, LayoutDetector, analyze_frame, analyze_frames,
    structure_boxes,
};
pub use provider::{Provider, ProviderConfig};
pub use slides::{SlideBoundaries, detect_slide_boundaries};
pub use store::ArtifactStore;
pub use transcribe::{WhisperTranscriber, ensure_model};
pub use types::{
    Association, BoxLabel, Chunk, Coordinate, FrameLayout, LayoutBox, Segment, Transcript,
    VideoMetadata,
};
pub use video::{FfmpegFrameSource, FrameSource, MemoryFrameSource};
