//! Queries over a preprocessed video: explain a layout box, associate an
//! explanation with an earlier transcript chunk.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use tracing::{debug, info};

use crate::{
    context::{best_association, context_window},
    error::{LecternError, Result},
    intelligence::{Embedder, ExplainRequest, Explainer},
    store::ArtifactStore,
    types::{Association, Coordinate},
};

#[derive(Debug, Clone)]
pub struct Explanation {
    /// Boundary frame whose layout the box belongs to.
    pub frame_index: usize,
    pub box_id: usize,
    /// Transcript text sent along with the images.
    pub transcript: String,
    pub text: String,
}

/// Crop `coordinate` out of `image`, clamped to the image bounds. `None`
/// when nothing of the box overlaps the image.
pub fn crop_region(image: &DynamicImage, coordinate: &Coordinate) -> Option<DynamicImage> {
    let clamp = |v: f64, max: u32| (v.max(0.0) as u32).min(max);
    let (x0, x1) = (
        clamp(coordinate.xmin, image.width()),
        clamp(coordinate.xmax, image.width()),
    );
    let (y0, y1) = (
        clamp(coordinate.ymin, image.height()),
        clamp(coordinate.ymax, image.height()),
    );
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(image.crop_imm(x0, y0, x1 - x0, y1 - y0))
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

/// Explain box `box_id` of the slide on screen at `timestamp`.
///
/// The slide is the first boundary at or after the timestamp's frame. The
/// explainer gets the cropped box, the full slide and the chunk context
/// window around `timestamp`, empty when no chunk covers it.
pub async fn explain_box<X: Explainer>(
    store: &ArtifactStore,
    video: &str,
    timestamp: f64,
    box_id: usize,
    explainer: &X,
) -> Result<Explanation> {
    let metadata = store.load_metadata(video).await?;
    let boundaries = store.load_boundaries(video).await?;

    let frame_index = boundaries
        .frame_for_timestamp(timestamp, metadata.fps)
        .ok_or(LecternError::NoSlideAtTimestamp { timestamp })?;

    let layout = store.load_layout(video, frame_index).await?;
    let coordinate = layout
        .box_coordinates(box_id)
        .ok_or(LecternError::BoxNotFound {
            box_id,
            frame_index,
        })?;

    let frame_path = store.frame_path(video, frame_index);
    if !frame_path.is_file() {
        return Err(LecternError::FrameNotFound { path: frame_path });
    }
    let slide = image::open(&frame_path).map_err(|e| LecternError::InvalidImage {
        path: frame_path.clone(),
        reason: e.to_string(),
    })?;
    let region = crop_region(&slide, &coordinate).ok_or(LecternError::EmptyRegion {
        box_id,
        frame_index,
    })?;
    debug!(
        frame = frame_index,
        box_id,
        width = region.width(),
        height = region.height(),
        "cropped region"
    );

    let chunks = store.load_chunks(video).await?;
    let context = context_window(&chunks, timestamp)
        .map(|window| window.text())
        .unwrap_or_default();

    let region_png = encode_png(&region)?;
    let slide_png = encode_png(&slide)?;
    let text = explainer
        .explain(&ExplainRequest {
            transcript: &context,
            region_png: &region_png,
            slide_png: Some(&slide_png),
        })
        .await?;

    info!(frame = frame_index, box_id, "box explained");
    Ok(Explanation {
        frame_index,
        box_id,
        transcript: context,
        text,
    })
}

/// Earlier chunk the explanation relates to most, skipping the most
/// recent chunks before `timestamp`.
pub async fn associate<E: Embedder>(
    store: &ArtifactStore,
    video: &str,
    timestamp: f64,
    explanation: &str,
    embedder: &E,
) -> Result<Option<Association>> {
    let chunks = store.load_chunks(video).await?;
    let query = embedder
        .embed(&[explanation.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| LecternError::EmbeddingFailed {
            reason: "no embedding returned for explanation".to_string(),
        })?;

    best_association(&chunks, timestamp, &query, embedder)
}
