use crate::{
    context::ContextWindow,
    slides::SlideBoundaries,
    types::{Association, Chunk, FrameLayout},
};

/// Format seconds as MM:SS timestamp
pub fn format_timestamp(seconds: f64) -> String {
    let mins = (seconds / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    format!("{:02}:{:02}", mins, secs)
}

fn chunk_heading(chunk: &Chunk) -> String {
    let span = format!(
        "[{}–{}]",
        format_timestamp(chunk.start),
        format_timestamp(chunk.end)
    );
    match &chunk.label {
        Some(label) => format!("{span} {label}"),
        None => span,
    }
}

/// Context window with the containing chunk marked by `>`.
pub fn format_context(window: &ContextWindow<'_>) -> String {
    window
        .chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let marker = if window.offset + i == window.focus { ">" } else { " " };
            format!("{marker} {}\n  {}", chunk_heading(chunk), chunk.text.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_boundaries(boundaries: &SlideBoundaries, fps: f64) -> String {
    boundaries
        .as_slice()
        .iter()
        .enumerate()
        .map(|(slide, &frame)| {
            format!(
                "slide {:>3}  frame {:>7}  {}",
                slide + 1,
                frame,
                format_timestamp(frame as f64 / fps)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_layout(layout: &FrameLayout) -> String {
    let mut output = format!(
        "frame {} ({}x{})\n",
        layout.frame_index, layout.width, layout.height
    );
    for b in &layout.boxes {
        let c = &b.coordinate;
        output.push_str(&format!(
            "  #{:<3} {:<16} [{:.0}, {:.0}, {:.0}, {:.0}] {:.2}\n",
            b.box_id.map(|id| id.to_string()).unwrap_or_default(),
            b.label.as_str(),
            c.xmin,
            c.ymin,
            c.xmax,
            c.ymax,
            b.score
        ));
    }
    output
}

pub fn format_association(association: &Association) -> String {
    let label = association.label.as_deref().unwrap_or("(unlabeled)");
    format!(
        "[{}] chunk {}: {} (similarity {:.3})",
        format_timestamp(association.start),
        association.chunk_index,
        label,
        association.similarity
    )
}
