//! Slide boundary detection over a sampled frame signal.

use std::path::Path;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::SlideDetectorConfig,
    error::{LecternError, Result},
    video::{FrameSampler, FrameSource},
};

/// Frame indices at which a new slide starts.
///
/// Always non-empty, starts at `0` and is strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlideBoundaries(Vec<usize>);

impl SlideBoundaries {
    /// Validate a boundary list loaded from elsewhere.
    pub fn from_indices(indices: Vec<usize>) -> std::result::Result<Self, String> {
        match indices.first() {
            None => return Err("boundary list is empty".to_string()),
            Some(&first) if first != 0 => {
                return Err(format!("boundary list starts at {first}, not 0"));
            }
            _ => {}
        }
        if let Some(pair) = indices.windows(2).find(|w| w[0] >= w[1]) {
            return Err(format!(
                "boundary list is not strictly increasing ({} then {})",
                pair[0], pair[1]
            ));
        }
        Ok(Self(indices))
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Position of the first boundary `>= frame`, or `len()` if none.
    pub fn position_at_or_after(&self, frame: usize) -> usize {
        self.0.partition_point(|&b| b < frame)
    }

    pub fn first_at_or_after(&self, frame: usize) -> Option<usize> {
        self.0.get(self.position_at_or_after(frame)).copied()
    }

    /// Boundary frame to show for a playback position.
    pub fn frame_for_timestamp(&self, seconds: f64, fps: f64) -> Option<usize> {
        self.first_at_or_after(timestamp_to_frame(seconds, fps))
    }
}

pub fn timestamp_to_frame(seconds: f64, fps: f64) -> usize {
    (seconds * fps).floor().max(0.0) as usize
}

/// Mean absolute per-pixel difference of two equally sized signals.
pub fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> f64 {
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| u64::from(x.abs_diff(y)))
        .sum();
    let count = a.as_raw().len().min(b.as_raw().len());
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

/// Scan `source` and collect slide boundaries.
///
/// End of stream, including inside a skip, ends the scan normally. So does a
/// read error after the first frame, which is logged and keeps the
/// boundaries found so far. A source without a single readable frame is
/// [`LecternError::NoFrames`].
pub fn detect_slide_boundaries<S: FrameSource>(
    source: S,
    config: &SlideDetectorConfig,
    video_path: &Path,
) -> Result<SlideBoundaries> {
    let mut sampler = FrameSampler::new(source, config.sample_rate, config.signal_size);
    info!(
        interval = sampler.interval(),
        threshold = config.diff_threshold,
        "detecting slide boundaries"
    );

    let Some(first) = sampler.next().transpose()? else {
        return Err(LecternError::NoFrames {
            path: video_path.to_path_buf(),
        });
    };

    let mut boundaries = vec![first.index];
    let mut previous = first.signal;

    for sample in sampler {
        let sample = match sample {
            Ok(sample) => sample,
            Err(e) => {
                warn!(
                    error = %e,
                    slides = boundaries.len(),
                    "frame read failed, keeping boundaries found so far"
                );
                break;
            }
        };
        let diff = mean_abs_diff(&sample.signal, &previous);
        if diff > config.diff_threshold {
            debug!(frame = sample.index, diff, "slide change");
            boundaries.push(sample.index);
        }
        previous = sample.signal;
    }

    info!(slides = boundaries.len(), "slide detection finished");
    Ok(SlideBoundaries(boundaries))
}
