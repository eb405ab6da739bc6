use std::path::{Path, PathBuf};

use tokio::{fs, process::Command};
use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::{
    error::{LecternError, Result},
    types::{Segment, Transcript},
};

pub const MODEL_NAME: &str = "ggml-medium-q5_0.bin";

/// Download the whisper model into `model_dir` unless it is already there.
pub async fn ensure_model(model_dir: &Path) -> Result<PathBuf> {
    let download_url = format!(
        "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/{}",
        MODEL_NAME
    );

    if !model_dir.exists() {
        fs::create_dir_all(model_dir).await?;
    }

    let model_path = model_dir.join(MODEL_NAME);
    if !model_path.exists() {
        info!(url = %download_url, "downloading whisper model");
        let output = Command::new("curl")
            .arg("-fL")
            .arg(&download_url)
            .arg("-o")
            .arg(&model_path)
            .output()
            .await?;

        if !output.status.success() {
            let _ = fs::remove_file(&model_path).await;
            return Err(LecternError::ModelDownloadFailed {
                url: download_url,
                reason: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
    }

    Ok(model_path)
}

/// Speech-to-text over 16 kHz mono WAV files with a local whisper model.
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    model_path: PathBuf,
    use_gpu: bool,
}

impl WhisperTranscriber {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            use_gpu: true,
        }
    }

    pub fn with_gpu(mut self, use_gpu: bool) -> Self {
        self.use_gpu = use_gpu;
        self
    }

    /// Transcribe `audio_path` on a blocking thread.
    pub async fn transcribe(&self, audio_path: &Path) -> Result<Transcript> {
        let model_path = self.model_path.clone();
        let audio = audio_path.to_path_buf();
        let use_gpu = self.use_gpu;

        let transcript =
            tokio::task::spawn_blocking(move || transcribe_blocking(&model_path, &audio, use_gpu))
                .await
                .map_err(|e| LecternError::TranscriptFailed {
                    audio_path: audio_path.to_path_buf(),
                    reason: format!("transcription task failed: {e}"),
                })??;

        info!(
            segments = transcript.segments.len(),
            language = %transcript.language,
            "transcription finished"
        );
        Ok(transcript)
    }
}

fn read_samples(audio_path: &Path) -> Result<Vec<f32>> {
    let failed = |reason: String| LecternError::TranscriptFailed {
        audio_path: audio_path.to_path_buf(),
        reason,
    };

    let mut reader = hound::WavReader::open(audio_path).map_err(|e| failed(e.to_string()))?;
    reader
        .samples::<i16>()
        .map(|s| {
            s.map(|s| s as f32 / i16::MAX as f32)
                .map_err(|e| failed(e.to_string()))
        })
        .collect()
}

fn transcribe_blocking(model_path: &Path, audio_path: &Path, use_gpu: bool) -> Result<Transcript> {
    let failed = |reason: String| LecternError::TranscriptFailed {
        audio_path: audio_path.to_path_buf(),
        reason,
    };

    let samples = read_samples(audio_path)?;

    let ctx_params = WhisperContextParameters {
        use_gpu,
        flash_attn: use_gpu,
        ..Default::default()
    };
    let model_path_str = model_path
        .to_str()
        .ok_or_else(|| failed(format!("model path is not UTF-8: {}", model_path.display())))?;
    let ctx = WhisperContext::new_with_params(model_path_str, ctx_params)
        .map_err(|e| failed(format!("failed to load model: {e:?}")))?;

    let params = FullParams::new(SamplingStrategy::Greedy { best_of: 5 });

    let mut state = ctx
        .create_state()
        .map_err(|e| failed(format!("failed to create state: {e:?}")))?;
    state
        .full(params, &samples)
        .map_err(|e| failed(format!("failed to run model: {e:?}")))?;

    let mut text = String::new();
    let mut segments: Vec<Segment> = Vec::new();

    for segment in state.as_iter() {
        let Ok(seg_text) = segment.to_str() else {
            continue;
        };
        segments.push(Segment {
            start: segment.start_timestamp() as f64 / 100.0,
            end: segment.end_timestamp() as f64 / 100.0,
            text: seg_text.to_string(),
        });
        text.push_str(seg_text);
    }

    let language_index = state.full_lang_id_from_state();
    let language = whisper_rs::get_lang_str(language_index);

    Ok(Transcript {
        language: language.unwrap_or("Unknown").to_string(),
        segments,
        text,
    })
}
