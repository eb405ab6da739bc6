use crate::types::BoxLabel;

/// Tunables of the slide boundary detector.
#[derive(Debug, Clone)]
pub struct SlideDetectorConfig {
    /// Samples per second of playback. `<= 0` samples every frame.
    pub sample_rate: f64,
    /// Mean absolute intensity difference (0..255) that counts as a slide change.
    pub diff_threshold: f64,
    /// Width and height of the grayscale comparison signal.
    pub signal_size: (u32, u32),
}

impl Default for SlideDetectorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 0.2,
            diff_threshold: 2.0,
            signal_size: (100, 100),
        }
    }
}

/// Indentation threshold as a fraction of the frame width.
pub const INDENT_RATIO: f64 = 0.025;

#[derive(Debug, Clone)]
pub struct GroupingConfig {
    pub allowed_labels: Vec<BoxLabel>,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            allowed_labels: vec![
                BoxLabel::Header,
                BoxLabel::DocTitle,
                BoxLabel::Formula,
                BoxLabel::Text,
                BoxLabel::Table,
                BoxLabel::ParagraphTitle,
                BoxLabel::Image,
            ],
        }
    }
}

impl GroupingConfig {
    pub fn allows(&self, label: &BoxLabel) -> bool {
        self.allowed_labels.contains(label)
    }
}

/// What to do when the label provider fails while a chunk is finalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LabelFailurePolicy {
    /// Keep the chunk without a label and log a warning.
    #[default]
    Unlabeled,
    /// Abort the whole chunking run.
    Abort,
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Cosine similarity below which adjacent segments start a new chunk.
    pub similarity_threshold: f32,
    pub label_failure: LabelFailurePolicy,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.26,
            label_failure: LabelFailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub slides: SlideDetectorConfig,
    pub grouping: GroupingConfig,
    pub chunker: ChunkerConfig,
}
