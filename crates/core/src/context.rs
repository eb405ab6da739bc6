//! Context windows around a playback timestamp.
//!
//! Chunk windows answer "what was being said around here". Boundary windows
//! map a pause frame to a range of surrounding slides and the transcript
//! spoken over them. Association finds the earlier chunk an explanation
//! relates to most, skipping the most recent ones.

use crate::{
    error::Result,
    intelligence::Embedder,
    slides::SlideBoundaries,
    types::{Association, Chunk, Segment},
};

/// Chunks kept on each side of the focus chunk.
pub const CONTEXT_RADIUS: usize = 4;

/// Most recent chunks before the query that association ignores.
pub const RECENCY_EXCLUSION: usize = 4;

/// Slides before the pause slide included in a boundary window.
pub const BOUNDARY_LOOKBACK: usize = 3;

/// Index of the chunk with `start <= timestamp < end`.
pub fn find_chunk_index(chunks: &[Chunk], timestamp: f64) -> Option<usize> {
    chunks.iter().position(|c| c.contains(timestamp))
}

#[derive(Debug, Clone, Copy)]
pub struct ContextWindow<'a> {
    /// Index of the containing chunk in the full sequence.
    pub focus: usize,
    /// Index of `chunks[0]` in the full sequence.
    pub offset: usize,
    pub chunks: &'a [Chunk],
}

impl ContextWindow<'_> {
    /// Chunk texts in order, space-joined.
    pub fn text(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn focus_chunk(&self) -> &Chunk {
        &self.chunks[self.focus - self.offset]
    }
}

/// Up to [`CONTEXT_RADIUS`] chunks before and after the chunk containing
/// `timestamp`. `None` when no chunk contains it, e.g. during silence.
pub fn context_window(chunks: &[Chunk], timestamp: f64) -> Option<ContextWindow<'_>> {
    let focus = find_chunk_index(chunks, timestamp)?;
    let offset = focus.saturating_sub(CONTEXT_RADIUS);
    let end = (focus + CONTEXT_RADIUS + 1).min(chunks.len());
    Some(ContextWindow {
        focus,
        offset,
        chunks: &chunks[offset..end],
    })
}

/// Frame range `[lower, upper)` around the slide shown at `pause_frame`.
///
/// With `i` the position of the first boundary at or after the pause, the
/// range starts [`BOUNDARY_LOOKBACK`] boundaries before `i` (or at frame 0)
/// and ends at the boundary after `i` (or at `end_frame`).
pub fn boundary_frame_range(
    boundaries: &SlideBoundaries,
    pause_frame: usize,
    end_frame: usize,
) -> (usize, usize) {
    let b = boundaries.as_slice();
    let i = boundaries.position_at_or_after(pause_frame);

    let upper = b.get(i + 1).copied().unwrap_or(end_frame);
    let lower = i
        .checked_sub(BOUNDARY_LOOKBACK)
        .and_then(|j| b.get(j).copied())
        .unwrap_or(0);
    (lower, upper)
}

/// Trimmed texts of the segments starting inside the frame range.
pub fn transcript_for_frame_range(
    segments: &[Segment],
    (lower, upper): (usize, usize),
    fps: f64,
) -> String {
    let (from, to) = (lower as f64 / fps, upper as f64 / fps);
    segments
        .iter()
        .filter(|s| s.start >= from && s.start < to)
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Chunks eligible for association at `timestamp`: those already started,
/// minus the [`RECENCY_EXCLUSION`] most recent. Empty when there are not
/// more than that many.
pub fn association_candidates(chunks: &[Chunk], timestamp: f64) -> &[Chunk] {
    let started = chunks.partition_point(|c| c.start <= timestamp);
    let eligible = started.saturating_sub(RECENCY_EXCLUSION);
    &chunks[..eligible]
}

/// Earlier chunk most similar to `query`, scored by `embedder.similarity`.
/// Ties keep the earliest chunk.
pub fn best_association<E: Embedder>(
    chunks: &[Chunk],
    timestamp: f64,
    query: &[f32],
    embedder: &E,
) -> Result<Option<Association>> {
    let mut best: Option<(usize, f32)> = None;

    for (index, chunk) in association_candidates(chunks, timestamp).iter().enumerate() {
        let similarity = embedder.similarity(&chunk.embedding, query)?;
        if best.is_none_or(|(_, top)| similarity > top) {
            best = Some((index, similarity));
        }
    }

    Ok(best.map(|(chunk_index, similarity)| {
        let chunk = &chunks[chunk_index];
        Association {
            chunk_index,
            start: chunk.start,
            label: chunk.label.clone(),
            similarity,
        }
    }))
}
