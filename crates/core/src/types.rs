use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<Segment>,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// A topically coherent span of the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Chunk {
    /// Half-open containment: `start <= timestamp < end`.
    pub fn contains(&self, timestamp: f64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

/// Layout category reported by the detection model.
///
/// Labels outside the known vocabulary are kept verbatim in `Other` so a
/// detector upgrade never breaks deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BoxLabel {
    Text,
    ParagraphTitle,
    Formula,
    Header,
    DocTitle,
    Table,
    Image,
    Other(String),
}

impl BoxLabel {
    pub fn as_str(&self) -> &str {
        match self {
            BoxLabel::Text => "text",
            BoxLabel::ParagraphTitle => "paragraph_title",
            BoxLabel::Formula => "formula",
            BoxLabel::Header => "header",
            BoxLabel::DocTitle => "doc_title",
            BoxLabel::Table => "table",
            BoxLabel::Image => "image",
            BoxLabel::Other(label) => label,
        }
    }

    /// Labels that take part in indentation grouping.
    pub fn is_groupable_text(&self) -> bool {
        matches!(self, BoxLabel::Text | BoxLabel::ParagraphTitle)
    }
}

impl From<String> for BoxLabel {
    fn from(label: String) -> Self {
        match label.as_str() {
            "text" => BoxLabel::Text,
            "paragraph_title" => BoxLabel::ParagraphTitle,
            "formula" => BoxLabel::Formula,
            "header" => BoxLabel::Header,
            "doc_title" => BoxLabel::DocTitle,
            "table" => BoxLabel::Table,
            "image" => BoxLabel::Image,
            _ => BoxLabel::Other(label),
        }
    }
}

impl From<&str> for BoxLabel {
    fn from(label: &str) -> Self {
        BoxLabel::from(label.to_string())
    }
}

impl From<BoxLabel> for String {
    fn from(label: BoxLabel) -> Self {
        match label {
            BoxLabel::Other(label) => label,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for BoxLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned rectangle in source-frame pixels, serialized as
/// `[xmin, ymin, xmax, ymax]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Coordinate {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Coordinate {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn union(&self, other: &Coordinate) -> Coordinate {
        Coordinate {
            xmin: self.xmin.min(other.xmin),
            ymin: self.ymin.min(other.ymin),
            xmax: self.xmax.max(other.xmax),
            ymax: self.ymax.max(other.ymax),
        }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }
}

impl From<[f64; 4]> for Coordinate {
    fn from([xmin, ymin, xmax, ymax]: [f64; 4]) -> Self {
        Coordinate::new(xmin, ymin, xmax, ymax)
    }
}

impl From<Coordinate> for [f64; 4] {
    fn from(c: Coordinate) -> Self {
        [c.xmin, c.ymin, c.xmax, c.ymax]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutBox {
    pub label: BoxLabel,
    pub coordinate: Coordinate,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_id: Option<usize>,
}

impl LayoutBox {
    pub fn new(label: impl Into<BoxLabel>, coordinate: Coordinate, score: f64) -> Self {
        Self {
            label: label.into(),
            coordinate,
            score,
            box_id: None,
        }
    }
}

/// Grouped, ID-assigned boxes of one extracted frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameLayout {
    pub frame_index: usize,
    pub width: u32,
    pub height: u32,
    pub boxes: Vec<LayoutBox>,
}

impl FrameLayout {
    pub fn box_coordinates(&self, box_id: usize) -> Option<Coordinate> {
        self.boxes
            .iter()
            .find(|b| b.box_id == Some(box_id))
            .map(|b| b.coordinate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub chunk_index: usize,
    pub start: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub similarity: f32,
}
