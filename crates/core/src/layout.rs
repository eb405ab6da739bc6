//! Layout box grouping.
//!
//! Layout models split multi-line indented text (bullets, nested clauses)
//! into many small boxes. Grouping folds vertically stacked, indented text
//! back into paragraph blocks while tables, images, headers and formulas
//! stay individually addressable by `box_id`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::{
    config::{GroupingConfig, INDENT_RATIO},
    error::{LecternError, Result},
    types::{BoxLabel, Coordinate, FrameLayout, LayoutBox},
};

/// Source of raw, ungrouped boxes for one frame image.
pub trait LayoutDetector {
    async fn detect(&self, image_path: &Path) -> Result<Vec<LayoutBox>>;
}

pub fn indent_threshold(frame_width: u32) -> f64 {
    INDENT_RATIO * f64::from(frame_width)
}

/// Paragraph block being assembled.
struct OpenGroup {
    /// Left edge of the box that opened the group. Merges never move it.
    anchor_xmin: f64,
    coordinate: Coordinate,
    scores: Vec<f64>,
}

impl OpenGroup {
    fn seed(b: &LayoutBox) -> Self {
        Self {
            anchor_xmin: b.coordinate.xmin,
            coordinate: b.coordinate,
            scores: vec![b.score],
        }
    }

    fn absorb(&mut self, b: &LayoutBox) {
        self.coordinate = self.coordinate.union(&b.coordinate);
        self.scores.push(b.score);
    }

    fn close(self) -> LayoutBox {
        let score = self.scores.into_iter().fold(f64::INFINITY, f64::min);
        LayoutBox::new(BoxLabel::Text, self.coordinate, score)
    }
}

#[derive(Default)]
struct GroupingState {
    emitted: Vec<LayoutBox>,
    open: Option<OpenGroup>,
}

impl GroupingState {
    fn close_open(&mut self) {
        if let Some(group) = self.open.take() {
            self.emitted.push(group.close());
        }
    }

    fn step(mut self, b: LayoutBox, indent_threshold: f64, config: &GroupingConfig) -> Self {
        if b.label.is_groupable_text() {
            let indented = self
                .open
                .as_ref()
                .is_some_and(|group| b.coordinate.xmin > group.anchor_xmin + indent_threshold);
            if let (true, Some(group)) = (indented, self.open.as_mut()) {
                group.absorb(&b);
            } else {
                self.close_open();
                self.open = Some(OpenGroup::seed(&b));
            }
        } else if b.label == BoxLabel::Formula {
            if let Some(group) = self.open.as_mut() {
                group.absorb(&b);
            }
            self.emitted.push(b);
        } else if config.allows(&b.label) {
            self.close_open();
            self.emitted.push(b);
        }
        self
    }

    fn finish(mut self) -> Vec<LayoutBox> {
        self.close_open();
        self.emitted
    }
}

/// Merge indented text runs of boxes already sorted top to bottom.
pub fn group_boxes(
    sorted: Vec<LayoutBox>,
    indent_threshold: f64,
    config: &GroupingConfig,
) -> Vec<LayoutBox> {
    sorted
        .into_iter()
        .fold(GroupingState::default(), |state, b| {
            state.step(b, indent_threshold, config)
        })
        .finish()
}

/// Number boxes by their final position.
pub fn assign_box_ids(boxes: Vec<LayoutBox>) -> Vec<LayoutBox> {
    boxes
        .into_iter()
        .enumerate()
        .map(|(id, b)| LayoutBox {
            box_id: Some(id),
            ..b
        })
        .collect()
}

/// Sort by top edge, group with the width-relative indent threshold and
/// assign IDs.
pub fn structure_boxes(
    mut boxes: Vec<LayoutBox>,
    frame_width: u32,
    config: &GroupingConfig,
) -> Vec<LayoutBox> {
    boxes.sort_by(|a, b| a.coordinate.ymin.total_cmp(&b.coordinate.ymin));
    assign_box_ids(group_boxes(boxes, indent_threshold(frame_width), config))
}

/// Detect and group the boxes of one extracted frame.
pub async fn analyze_frame<D: LayoutDetector>(
    detector: &D,
    frame_index: usize,
    image_path: &Path,
    config: &GroupingConfig,
) -> Result<FrameLayout> {
    if !image_path.is_file() {
        return Err(LecternError::FrameNotFound {
            path: image_path.to_path_buf(),
        });
    }
    let (width, height) =
        image::image_dimensions(image_path).map_err(|e| LecternError::InvalidImage {
            path: image_path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let raw = detector.detect(image_path).await?;
    let boxes = structure_boxes(raw, width, config);

    Ok(FrameLayout {
        frame_index,
        width,
        height,
        boxes,
    })
}

#[derive(Debug, Default)]
pub struct LayoutBatchReport {
    pub layouts: Vec<FrameLayout>,
    pub failed: Vec<(usize, String)>,
}

/// Run [`analyze_frame`] over many frames. A failing frame is logged and
/// recorded, the rest of the batch still runs.
pub async fn analyze_frames<D: LayoutDetector>(
    detector: &D,
    frames: &[(usize, PathBuf)],
    config: &GroupingConfig,
) -> LayoutBatchReport {
    let mut report = LayoutBatchReport::default();

    for (frame_index, image_path) in frames {
        match analyze_frame(detector, *frame_index, image_path, config).await {
            Ok(layout) => report.layouts.push(layout),
            Err(e) => {
                warn!(frame = frame_index, error = %e, "layout detection failed");
                report.failed.push((*frame_index, e.to_string()));
            }
        }
    }

    info!(
        analyzed = report.layouts.len(),
        failed = report.failed.len(),
        "layout batch finished"
    );
    report
}

#[derive(Debug, Deserialize)]
struct DetectorOutput {
    boxes: Vec<LayoutBox>,
}

/// Runs an external layout model as `<program> <args...> <image_path>` and
/// reads `{"boxes": [...]}` from its stdout.
#[derive(Debug, Clone)]
pub struct CommandLayoutDetector {
    program: String,
    args: Vec<String>,
}

impl CommandLayoutDetector {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a shell-like command line on whitespace.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

impl LayoutDetector for CommandLayoutDetector {
    async fn detect(&self, image_path: &Path) -> Result<Vec<LayoutBox>> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image_path)
            .output()
            .await
            .map_err(|e| LecternError::LayoutDetectionFailed {
                image_path: image_path.to_path_buf(),
                reason: format!("failed to run {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            return Err(LecternError::LayoutDetectionFailed {
                image_path: image_path.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let parsed: DetectorOutput =
            serde_json::from_slice(&output.stdout).map_err(|e| {
                LecternError::LayoutDetectionFailed {
                    image_path: image_path.to_path_buf(),
                    reason: format!("unreadable detector output: {e}"),
                }
            })?;
        Ok(parsed.boxes)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use image::{GrayImage, Luma};

    use super::*;

    fn bx(label: &str, xmin: f64, ymin: f64, xmax: f64, ymax: f64, score: f64) -> LayoutBox {
        LayoutBox::new(label, Coordinate::new(xmin, ymin, xmax, ymax), score)
    }

    fn group(boxes: Vec<LayoutBox>, threshold: f64) -> Vec<LayoutBox> {
        group_boxes(boxes, threshold, &GroupingConfig::default())
    }

    #[test]
    fn indented_text_merges_and_table_stands_alone() {
        let boxes = vec![
            bx("text", 0.0, 0.0, 100.0, 10.0, 0.9),
            bx("text", 50.0, 12.0, 120.0, 20.0, 0.8),
            bx("table", 0.0, 30.0, 200.0, 80.0, 0.95),
        ];
        let mut sorted = boxes.clone();
        sorted.sort_by(|a, b| a.coordinate.ymin.total_cmp(&b.coordinate.ymin));
        let out = assign_box_ids(group(sorted, 10.0));

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].label, BoxLabel::Text);
        assert_eq!(out[0].coordinate, Coordinate::new(0.0, 0.0, 120.0, 20.0));
        assert_eq!(out[0].score, 0.8);
        assert_eq!(out[0].box_id, Some(0));
        assert_eq!(out[1].label, BoxLabel::Table);
        assert_eq!(out[1].box_id, Some(1));
    }

    #[test]
    fn same_indentation_starts_new_group() {
        let out = group(
            vec![
                bx("text", 10.0, 0.0, 100.0, 10.0, 0.9),
                bx("paragraph_title", 12.0, 12.0, 100.0, 20.0, 0.7),
            ],
            10.0,
        );
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|b| b.label == BoxLabel::Text));
        assert_eq!(out[1].score, 0.7);
    }

    #[test]
    fn anchor_is_frozen_at_group_start() {
        // The second box widens the group to the left, but indentation is
        // still measured against the first box's xmin.
        let out = group(
            vec![
                bx("text", 40.0, 0.0, 100.0, 10.0, 0.9),
                bx("text", 60.0, 12.0, 100.0, 20.0, 0.9),
                bx("text", 55.0, 22.0, 100.0, 30.0, 0.9),
                bx("text", 45.0, 32.0, 100.0, 40.0, 0.9),
            ],
            10.0,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].coordinate, Coordinate::new(40.0, 0.0, 100.0, 30.0));
        assert_eq!(out[1].coordinate, Coordinate::new(45.0, 32.0, 100.0, 40.0));
    }

    #[test]
    fn formula_joins_group_and_stands_alone() {
        let formula = bx("formula", 30.0, 12.0, 90.0, 30.0, 0.6);
        let out = group(
            vec![
                bx("text", 0.0, 0.0, 100.0, 10.0, 0.9),
                formula.clone(),
                bx("text", 40.0, 32.0, 100.0, 40.0, 0.8),
            ],
            10.0,
        );

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], formula);
        assert_eq!(out[1].label, BoxLabel::Text);
        assert_eq!(out[1].coordinate, Coordinate::new(0.0, 0.0, 100.0, 40.0));
        assert_eq!(out[1].score, 0.6);
    }

    #[test]
    fn formula_without_open_group_is_emitted_once() {
        let out = group(vec![bx("formula", 0.0, 0.0, 10.0, 10.0, 0.5)], 10.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, BoxLabel::Formula);
    }

    #[test]
    fn header_closes_group() {
        let out = group(
            vec![
                bx("text", 0.0, 0.0, 100.0, 10.0, 0.9),
                bx("header", 0.0, 12.0, 100.0, 20.0, 0.9),
                bx("text", 50.0, 22.0, 100.0, 30.0, 0.9),
            ],
            10.0,
        );
        let labels: Vec<&BoxLabel> = out.iter().map(|b| &b.label).collect();
        assert_eq!(labels, vec![&BoxLabel::Text, &BoxLabel::Header, &BoxLabel::Text]);
    }

    #[test]
    fn disallowed_labels_are_dropped_without_closing() {
        let out = group(
            vec![
                bx("text", 0.0, 0.0, 100.0, 10.0, 0.9),
                bx("footnote", 0.0, 12.0, 100.0, 20.0, 0.9),
                bx("text", 50.0, 22.0, 100.0, 30.0, 0.9),
            ],
            10.0,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].coordinate, Coordinate::new(0.0, 0.0, 100.0, 30.0));
    }

    #[test]
    fn every_formula_appears_once_standalone() {
        let input = vec![
            bx("formula", 5.0, 0.0, 20.0, 5.0, 0.5),
            bx("text", 0.0, 6.0, 100.0, 10.0, 0.9),
            bx("formula", 30.0, 11.0, 60.0, 15.0, 0.4),
            bx("image", 0.0, 20.0, 60.0, 50.0, 0.9),
            bx("formula", 30.0, 51.0, 60.0, 55.0, 0.3),
        ];
        let out = structure_boxes(input.clone(), 400, &GroupingConfig::default());
        for formula in input.iter().filter(|b| b.label == BoxLabel::Formula) {
            let copies = out
                .iter()
                .filter(|b| b.label == BoxLabel::Formula && b.coordinate == formula.coordinate)
                .count();
            assert_eq!(copies, 1);
        }
    }

    #[test]
    fn ids_are_dense_and_ordered() {
        let input = vec![
            bx("image", 0.0, 90.0, 60.0, 120.0, 0.9),
            bx("doc_title", 0.0, 0.0, 300.0, 30.0, 0.9),
            bx("text", 0.0, 40.0, 300.0, 50.0, 0.9),
            bx("text", 30.0, 52.0, 300.0, 60.0, 0.9),
            bx("table", 0.0, 70.0, 300.0, 85.0, 0.9),
        ];
        let out = structure_boxes(input, 800, &GroupingConfig::default());
        let ids: Vec<Option<usize>> = out.iter().map(|b| b.box_id).collect();
        assert_eq!(ids, (0..out.len()).map(Some).collect::<Vec<_>>());
        let labels: Vec<&str> = out.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["doc_title", "text", "table", "image"]);
    }

    #[test]
    fn regrouping_grouped_output_is_stable() {
        let input = vec![
            bx("doc_title", 0.0, 0.0, 300.0, 30.0, 0.9),
            bx("text", 0.0, 40.0, 300.0, 50.0, 0.9),
            bx("text", 30.0, 52.0, 300.0, 60.0, 0.8),
            bx("table", 0.0, 70.0, 300.0, 85.0, 0.9),
            bx("text", 0.0, 90.0, 300.0, 100.0, 0.7),
        ];
        let once = structure_boxes(input, 800, &GroupingConfig::default());
        let twice = structure_boxes(once.clone(), 800, &GroupingConfig::default());
        assert_eq!(once, twice);
    }

    #[test]
    fn threshold_scales_with_width() {
        assert_eq!(indent_threshold(1000), 25.0);
        assert_eq!(indent_threshold(0), 0.0);
    }

    #[test]
    fn command_line_is_split() {
        let detector = CommandLayoutDetector::from_command_line("python detect.py --json").unwrap();
        assert_eq!(detector.program, "python");
        assert_eq!(detector.args, vec!["detect.py", "--json"]);
        assert!(CommandLayoutDetector::from_command_line("   ").is_none());
    }

    /// Returns canned boxes per file name, fails for anything else.
    struct FakeDetector {
        boxes: HashMap<String, Vec<LayoutBox>>,
    }

    impl LayoutDetector for FakeDetector {
        async fn detect(&self, image_path: &Path) -> Result<Vec<LayoutBox>> {
            let name = image_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            self.boxes
                .get(&name)
                .cloned()
                .ok_or_else(|| LecternError::LayoutDetectionFailed {
                    image_path: image_path.to_path_buf(),
                    reason: "model crashed".to_string(),
                })
        }
    }

    #[tokio::test]
    async fn batch_isolates_failing_frames() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("0_frame.png");
        let crashing = dir.path().join("150_frame.png");
        let not_an_image = dir.path().join("300_frame.png");
        let missing = dir.path().join("450_frame.png");

        GrayImage::from_pixel(400, 200, Luma([255])).save(&good).unwrap();
        GrayImage::from_pixel(400, 200, Luma([0])).save(&crashing).unwrap();
        std::fs::write(&not_an_image, b"not a png").unwrap();

        let detector = FakeDetector {
            boxes: HashMap::from([(
                "0_frame.png".to_string(),
                vec![
                    bx("text", 0.0, 0.0, 100.0, 10.0, 0.9),
                    bx("text", 20.0, 12.0, 100.0, 20.0, 0.8),
                ],
            )]),
        };
        let frames = vec![
            (0, good),
            (150, crashing),
            (300, not_an_image),
            (450, missing),
        ];

        let report = analyze_frames(&detector, &frames, &GroupingConfig::default()).await;

        assert_eq!(report.layouts.len(), 1);
        let layout = &report.layouts[0];
        assert_eq!((layout.frame_index, layout.width, layout.height), (0, 400, 200));
        // 2.5% of 400px is 10px, so the 20px indent merges.
        assert_eq!(layout.boxes.len(), 1);
        let failed: Vec<usize> = report.failed.iter().map(|(i, _)| *i).collect();
        assert_eq!(failed, vec![150, 300, 450]);
    }

    #[tokio::test]
    async fn non_image_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        std::fs::write(&path, b"plain text").unwrap();
        let detector = FakeDetector {
            boxes: HashMap::new(),
        };
        let err = analyze_frame(&detector, 0, &path, &GroupingConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LecternError::InvalidImage { .. }));
    }
}
