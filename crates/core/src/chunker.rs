//! Greedy semantic chunking of transcript segments.

use tracing::{info, warn};

use crate::{
    config::{ChunkerConfig, LabelFailurePolicy},
    error::{LecternError, Result},
    intelligence::{Embedder, Labeler},
    types::{Chunk, Segment},
};

/// Labeler for runs that do not label chunks. Never called.
pub struct NoLabels;

impl Labeler for NoLabels {
    async fn label(&self, _text: &str) -> Result<String> {
        Err(LecternError::LabelFailed {
            reason: "labeling is disabled".to_string(),
        })
    }
}

/// Chunk under construction.
struct OpenChunk {
    start: f64,
    end: f64,
    text: String,
}

impl OpenChunk {
    fn seed(segment: &Segment) -> Self {
        Self {
            start: segment.start,
            end: segment.end,
            text: segment.text.clone(),
        }
    }

    fn extend(&mut self, segment: &Segment) {
        self.end = segment.end;
        self.text.push(' ');
        self.text.push_str(&segment.text);
    }
}

pub struct TranscriptChunker<'a, E, L = NoLabels> {
    embedder: &'a E,
    labeler: Option<&'a L>,
    config: ChunkerConfig,
}

impl<'a, E: Embedder> TranscriptChunker<'a, E, NoLabels> {
    pub fn new(embedder: &'a E, config: ChunkerConfig) -> Self {
        Self {
            embedder,
            labeler: None,
            config,
        }
    }
}

impl<'a, E: Embedder, L: Labeler> TranscriptChunker<'a, E, L> {
    pub fn with_labeler<M: Labeler>(self, labeler: &'a M) -> TranscriptChunker<'a, E, M> {
        TranscriptChunker {
            embedder: self.embedder,
            labeler: Some(labeler),
            config: self.config,
        }
    }

    /// Split `segments` wherever two adjacent segments are less similar than
    /// the threshold. Every segment ends up in exactly one chunk.
    pub async fn chunk(&self, segments: &[Segment]) -> Result<Vec<Chunk>> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(Vec::new());
        };

        let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != segments.len() {
            return Err(LecternError::EmbeddingFailed {
                reason: format!(
                    "received {} embeddings for {} segments",
                    embeddings.len(),
                    segments.len()
                ),
            });
        }

        let mut chunks = Vec::new();
        let mut current = OpenChunk::seed(first);

        for (offset, segment) in rest.iter().enumerate() {
            let i = offset + 1;
            let similarity = self
                .embedder
                .similarity(&embeddings[i], &embeddings[i - 1])?;

            if similarity < self.config.similarity_threshold {
                let next = OpenChunk::seed(segment);
                chunks.push(self.finalize(std::mem::replace(&mut current, next)).await?);
            } else {
                current.extend(segment);
            }
        }
        chunks.push(self.finalize(current).await?);

        info!(
            segments = segments.len(),
            chunks = chunks.len(),
            "transcript chunked"
        );
        Ok(chunks)
    }

    async fn finalize(&self, open: OpenChunk) -> Result<Chunk> {
        let label = match self.labeler {
            Some(labeler) => match labeler.label(&open.text).await {
                Ok(label) => Some(label),
                Err(e) if self.config.label_failure == LabelFailurePolicy::Unlabeled => {
                    warn!(start = open.start, error = %e, "keeping chunk unlabeled");
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        let embedding = self
            .embedder
            .embed(std::slice::from_ref(&open.text))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LecternError::EmbeddingFailed {
                reason: "no embedding returned for chunk text".to_string(),
            })?;

        Ok(Chunk {
            start: open.start,
            end: open.end,
            text: open.text,
            embedding,
            label,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::HashMap};

    use super::*;

    /// Maps known texts to fixed vectors; anything else embeds to `[1, 0]`.
    struct ScriptedEmbedder {
        vectors: HashMap<String, Vec<f32>>,
        calls: RefCell<Vec<Vec<String>>>,
    }

    impl ScriptedEmbedder {
        fn new(pairs: &[(&str, [f32; 2])]) -> Self {
            Self {
                vectors: pairs
                    .iter()
                    .map(|(text, v)| (text.to_string(), v.to_vec()))
                    .collect(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Embedder for ScriptedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.borrow_mut().push(texts.to_vec());
            Ok(texts
                .iter()
                .map(|t| self.vectors.get(t).cloned().unwrap_or_else(|| vec![1.0, 0.0]))
                .collect())
        }
    }

    struct PrefixLabeler;

    impl Labeler for PrefixLabeler {
        async fn label(&self, text: &str) -> Result<String> {
            Ok(format!("about {}", text.split_whitespace().next().unwrap_or("")))
        }
    }

    struct FailingLabeler;

    impl Labeler for FailingLabeler {
        async fn label(&self, _text: &str) -> Result<String> {
            Err(LecternError::LabelFailed {
                reason: "rate limited".to_string(),
            })
        }
    }

    fn segments() -> Vec<Segment> {
        vec![
            Segment::new(0.0, 2.0, "A"),
            Segment::new(2.0, 4.0, "A similar"),
            Segment::new(4.0, 6.0, "totally different topic"),
        ]
    }

    /// seg0 vs seg1 is 0.9, seg1 vs seg2 is about 0.11
    fn embedder() -> ScriptedEmbedder {
        ScriptedEmbedder::new(&[
            ("A", [1.0, 0.0]),
            ("A similar", [0.9, 0.435_889_9]),
            ("totally different topic", [-0.3, 0.85]),
        ])
    }

    #[tokio::test]
    async fn splits_where_adjacent_similarity_drops() {
        let embedder = embedder();
        let chunks = TranscriptChunker::new(&embedder, ChunkerConfig::default())
            .chunk(&segments())
            .await
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].start, chunks[0].end), (0.0, 4.0));
        assert_eq!(chunks[0].text, "A A similar");
        assert_eq!((chunks[1].start, chunks[1].end), (4.0, 6.0));
        assert_eq!(chunks[1].text, "totally different topic");
        assert!(chunks.iter().all(|c| c.label.is_none()));
    }

    #[tokio::test]
    async fn chunk_embedding_is_fresh_embedding_of_merged_text() {
        let embedder = embedder();
        TranscriptChunker::new(&embedder, ChunkerConfig::default())
            .chunk(&segments())
            .await
            .unwrap();

        let calls = embedder.calls.borrow();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].len(), 3);
        assert_eq!(calls[1], vec!["A A similar".to_string()]);
        assert_eq!(calls[2], vec!["totally different topic".to_string()]);
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let embedder = embedder();
        let chunks = TranscriptChunker::new(&embedder, ChunkerConfig::default())
            .chunk(&[])
            .await
            .unwrap();
        assert!(chunks.is_empty());
        assert!(embedder.calls.borrow().is_empty());
    }

    #[tokio::test]
    async fn similarity_equal_to_threshold_extends() {
        let embedder = ScriptedEmbedder::new(&[("x", [1.0, 0.0]), ("y", [0.0, 1.0])]);
        let config = ChunkerConfig {
            similarity_threshold: 0.0,
            ..ChunkerConfig::default()
        };
        let segments = vec![Segment::new(0.0, 1.0, "x"), Segment::new(1.0, 2.5, "y")];
        let chunks = TranscriptChunker::new(&embedder, config)
            .chunk(&segments)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end, 2.5);
    }

    #[tokio::test]
    async fn chunks_partition_segments() {
        let embedder = ScriptedEmbedder::new(&[
            ("a", [1.0, 0.0]),
            ("b", [0.0, 1.0]),
            ("c", [0.1, 1.0]),
            ("d", [1.0, 0.0]),
            ("e", [1.0, 0.1]),
        ]);
        let segments: Vec<Segment> = ["a", "b", "c", "d", "e"]
            .iter()
            .enumerate()
            .map(|(i, t)| Segment::new(i as f64, i as f64 + 1.0, *t))
            .collect();
        let chunks = TranscriptChunker::new(&embedder, ChunkerConfig::default())
            .chunk(&segments)
            .await
            .unwrap();

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b c", "d e"]);
        assert_eq!(chunks[0].start, segments[0].start);
        assert_eq!(chunks.last().unwrap().end, segments.last().unwrap().end);
        assert!(chunks.windows(2).all(|w| w[0].end == w[1].start));
    }

    #[tokio::test]
    async fn labels_every_chunk_when_labeler_is_set() {
        let embedder = embedder();
        let labeler = PrefixLabeler;
        let chunks = TranscriptChunker::new(&embedder, ChunkerConfig::default())
            .with_labeler(&labeler)
            .chunk(&segments())
            .await
            .unwrap();
        let labels: Vec<Option<&str>> = chunks.iter().map(|c| c.label.as_deref()).collect();
        assert_eq!(labels, vec![Some("about A"), Some("about totally")]);
    }

    #[tokio::test]
    async fn failed_label_degrades_by_default() {
        let embedder = embedder();
        let chunks = TranscriptChunker::new(&embedder, ChunkerConfig::default())
            .with_labeler(&FailingLabeler)
            .chunk(&segments())
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.label.is_none()));
    }

    #[tokio::test]
    async fn failed_label_aborts_when_configured() {
        let embedder = embedder();
        let config = ChunkerConfig {
            label_failure: LabelFailurePolicy::Abort,
            ..ChunkerConfig::default()
        };
        let result = TranscriptChunker::new(&embedder, config)
            .with_labeler(&FailingLabeler)
            .chunk(&segments())
            .await;
        assert!(matches!(result, Err(LecternError::LabelFailed { .. })));
    }
}
