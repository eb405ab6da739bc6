use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use lectern_core::{
    ArtifactStore, ChunkerConfig, CommandLayoutDetector, FfmpegFrameSource, GroupingConfig,
    LabelFailurePolicy, OpenAiClient, PipelineConfig, Provider, SlideBoundaries, SlideDetectorConfig,
    TranscriptChunker, VideoMetadata, WhisperTranscriber, analyze_frames, associate,
    context_window, detect_slide_boundaries, ensure_model, explain_box,
    format::{format_association, format_boundaries, format_context, format_layout},
    media::{extract_audio, extract_frames, probe_metadata},
};
use tracing_subscriber::EnvFilter;

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// CLI wrapper for Provider enum (needed for clap ValueEnum)
#[derive(Clone, Copy, Default, ValueEnum)]
enum CliProvider {
    #[default]
    Openai,
    Gemini,
}

impl From<CliProvider> for Provider {
    fn from(cli: CliProvider) -> Self {
        match cli {
            CliProvider::Openai => Provider::Openai,
            CliProvider::Gemini => Provider::Gemini,
        }
    }
}

#[derive(Parser)]
#[command(name = "lectern")]
#[command(
    about = "Segment lecture videos into slides, layout regions and semantic transcript chunks"
)]
struct Cli {
    /// Directory holding preprocessed videos
    #[arg(long, global = true, env = "LECTERN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect slides, analyze layouts, transcribe and chunk a video
    Preprocess(PreprocessArgs),

    /// Print the transcript chunks around a timestamp
    Context {
        /// Stored video name (file stem of the preprocessed video)
        video: String,

        /// Playback position in seconds
        #[arg(long)]
        at: f64,
    },

    /// Explain a layout box of the slide shown at a timestamp
    Explain {
        video: String,

        #[arg(long)]
        at: f64,

        /// Box ID from the slide's layout
        #[arg(long)]
        box_id: usize,

        #[arg(short, long, default_value = "openai")]
        provider: CliProvider,
    },

    /// Find the earlier transcript chunk an explanation relates to
    Associate {
        video: String,

        #[arg(long)]
        at: f64,

        /// Explanation text to associate
        #[arg(long)]
        text: String,

        #[arg(short, long, default_value = "openai")]
        provider: CliProvider,
    },
}

#[derive(Args)]
struct PreprocessArgs {
    /// Path to the lecture video
    video: PathBuf,

    /// Frames sampled per second of playback for slide detection
    #[arg(long, default_value_t = 0.2)]
    sample_rate: f64,

    /// Mean pixel difference (0-255) that counts as a slide change
    #[arg(long, default_value_t = 2.0)]
    diff_threshold: f64,

    /// Cosine similarity below which the transcript starts a new chunk
    #[arg(long, default_value_t = 0.26)]
    similarity_threshold: f32,

    /// Layout detector command; the frame image path is appended and the
    /// command must print {"boxes": [...]} to stdout
    #[arg(long)]
    layout_command: Option<String>,

    /// AI provider for embeddings and chunk labels
    #[arg(short, long, default_value = "openai")]
    provider: CliProvider,

    /// Do not label chunks
    #[arg(long)]
    no_labels: bool,

    /// Fail when a chunk cannot be labeled instead of leaving it unlabeled
    #[arg(long, conflicts_with = "no_labels")]
    strict_labels: bool,

    /// Run whisper on the CPU
    #[arg(long)]
    cpu: bool,

    /// Force re-processing even if cached files exist
    #[arg(short, long)]
    force: bool,
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn print_cached(msg: &str) {
    println!(
        "{} {} {}",
        style("✓").green().bold(),
        msg,
        style("(cached)").dim()
    );
}

fn finish(spinner: ProgressBar, msg: &str, started: Instant) {
    spinner.finish_with_message(format!(
        "{} {} {}",
        style("✓").green().bold(),
        msg,
        style(format!("[{}]", format_duration(started.elapsed()))).dim()
    ));
}

extern "C" fn whisper_log_callback(
    _level: u32,
    _message: *const std::ffi::c_char,
    _user_data: *mut std::ffi::c_void,
) {
    // silent
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lectern=warn,lectern_core=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let store = ArtifactStore::new(cli.data_dir.unwrap_or_else(ArtifactStore::default_root));

    match cli.command {
        Command::Preprocess(args) => preprocess(&store, args).await,
        Command::Context { video, at } => show_context(&store, &video, at).await,
        Command::Explain {
            video,
            at,
            box_id,
            provider,
        } => {
            let client = connect(provider.into())?;
            let spinner = create_spinner(&format!("Explaining box {box_id}..."));
            let explanation = explain_box(&store, &video, at, box_id, &client).await;
            spinner.finish_and_clear();
            let explanation = explanation?;
            println!(
                "{} slide at frame {}, box {}\n",
                style("✓").green().bold(),
                explanation.frame_index,
                explanation.box_id
            );
            println!("{}", explanation.text);
            Ok(())
        }
        Command::Associate {
            video,
            at,
            text,
            provider,
        } => {
            let client = connect(provider.into())?;
            match associate(&store, &video, at, &text, &client).await? {
                Some(association) => println!("{}", format_association(&association)),
                None => println!(
                    "{} not enough earlier transcript before {:.1}s",
                    style("–").dim(),
                    at
                ),
            }
            Ok(())
        }
    }
}

fn connect(provider: Provider) -> Result<OpenAiClient> {
    match OpenAiClient::new(&provider) {
        Ok(client) => Ok(client),
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    }
}

async fn show_context(store: &ArtifactStore, video: &str, at: f64) -> Result<()> {
    let chunks = store.load_chunks(video).await?;
    match context_window(&chunks, at) {
        Some(window) => println!("{}", format_context(&window)),
        None => println!("{} no transcript chunk at {:.1}s", style("–").dim(), at),
    }
    Ok(())
}

async fn preprocess(store: &ArtifactStore, args: PreprocessArgs) -> Result<()> {
    if !args.video.is_file() {
        bail!("video file not found: {}", args.video.display());
    }

    // Validate API key early
    let client = connect(args.provider.into())?;

    unsafe {
        whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
    }

    let config = args.pipeline_config();
    let name = ArtifactStore::video_name(&args.video);
    store.prepare(&name).await?;

    println!(
        "\n{}  {}\n",
        style("lectern").cyan().bold(),
        style(&name).dim()
    );
    println!("{}", style("─".repeat(60)).dim());

    let total_start = Instant::now();

    // Step 1: Probe metadata (check cache)
    let metadata_path = store.metadata_path(&name);
    let metadata = if !args.force && metadata_path.exists() {
        let metadata = store.load_metadata(&name).await?;
        print_cached(&format!(
            "Probed: {}x{} @ {:.2} fps",
            metadata.width, metadata.height, metadata.fps
        ));
        metadata
    } else {
        let step_start = Instant::now();
        let spinner = create_spinner("Probing video...");
        let video = args.video.clone();
        let metadata = tokio::task::spawn_blocking(move || probe_metadata(&video)).await??;
        store.save_metadata(&name, &metadata).await?;
        finish(
            spinner,
            &format!(
                "Probed: {}x{} @ {:.2} fps",
                metadata.width, metadata.height, metadata.fps
            ),
            step_start,
        );
        metadata
    };

    // Step 2: Slide boundaries (check cache)
    let boundaries_path = store.boundaries_path(&name);
    let boundaries = if !args.force && boundaries_path.exists() {
        let boundaries = store.load_boundaries(&name).await?;
        print_cached(&format!("Detected {} slides", boundaries.len()));
        boundaries
    } else {
        let step_start = Instant::now();
        let spinner = create_spinner("Detecting slide changes...");
        let boundaries = detect_slides(args.video.clone(), config.slides.clone()).await?;
        store.save_boundaries(&name, &boundaries).await?;
        finish(
            spinner,
            &format!("Detected {} slides", boundaries.len()),
            step_start,
        );
        boundaries
    };
    tracing::debug!("\n{}", format_boundaries(&boundaries, metadata.fps));

    // Step 3: Slide images
    extract_slide_frames(store, &name, &args, &metadata, &boundaries).await?;

    // Step 4: Layouts
    match args.layout_command.as_deref() {
        Some(command) => {
            let detector = CommandLayoutDetector::from_command_line(command)
                .context("--layout-command is empty")?;
            analyze_layouts(
                store,
                &name,
                &boundaries,
                &detector,
                &config.grouping,
                args.force,
            )
            .await?;
        }
        None => println!(
            "{} Layouts {}",
            style("–").dim(),
            style("(skipped, no --layout-command)").dim()
        ),
    }

    // Step 5: Extract audio (check cache)
    let audio_file = store.audio_path(&name);
    if !args.force && audio_file.exists() {
        print_cached("Audio extracted");
    } else {
        let step_start = Instant::now();
        let spinner = create_spinner("Extracting audio...");
        extract_audio(&args.video, &audio_file).await?;
        finish(spinner, "Audio extracted", step_start);
    }

    // Step 6: Transcribe (check cache)
    let transcript_path = store.transcript_path(&name);
    let transcript = if !args.force && transcript_path.exists() {
        let transcript = store.load_transcript(&name).await?;
        print_cached(&format!(
            "Transcribed: {} segments, {}",
            transcript.segments.len(),
            style(&transcript.language).yellow()
        ));
        transcript
    } else {
        let model_path = ensure_model(&store.model_dir()).await?;
        let step_start = Instant::now();
        let spinner = create_spinner("Transcribing with Whisper...");
        let transcript = WhisperTranscriber::new(model_path)
            .with_gpu(!args.cpu)
            .transcribe(&audio_file)
            .await?;
        store.save_transcript(&name, &transcript).await?;
        finish(
            spinner,
            &format!(
                "Transcribed: {} segments, {}",
                transcript.segments.len(),
                style(&transcript.language).yellow()
            ),
            step_start,
        );
        transcript
    };

    // Step 7: Chunk (check cache)
    let chunks_path = store.chunks_path(&name);
    if !args.force && chunks_path.exists() {
        let chunks = store.load_chunks(&name).await?;
        print_cached(&format!("Chunked into {} topics", chunks.len()));
    } else {
        let step_start = Instant::now();
        let spinner = create_spinner(&format!(
            "Chunking transcript with {}...",
            args.provider_name()
        ));
        let chunker = TranscriptChunker::new(&client, config.chunker.clone());
        let chunks = if args.no_labels {
            chunker.chunk(&transcript.segments).await?
        } else {
            chunker
                .with_labeler(&client)
                .chunk(&transcript.segments)
                .await?
        };
        store.save_chunks(&name, &chunks).await?;
        finish(
            spinner,
            &format!("Chunked into {} topics", chunks.len()),
            step_start,
        );
    }

    println!(
        "\n{} {}\n",
        style("Total time:").dim(),
        style(format_duration(total_start.elapsed())).cyan().bold()
    );
    println!(
        "{} {}",
        style("Saved:").dim(),
        style(store.video_dir(&name).display()).cyan()
    );
    println!("{}", style("─".repeat(60)).dim());

    Ok(())
}

impl PreprocessArgs {
    fn provider_name(&self) -> &'static str {
        Provider::from(self.provider).name()
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            slides: SlideDetectorConfig {
                sample_rate: self.sample_rate,
                diff_threshold: self.diff_threshold,
                ..SlideDetectorConfig::default()
            },
            grouping: GroupingConfig::default(),
            chunker: ChunkerConfig {
                similarity_threshold: self.similarity_threshold,
                label_failure: if self.strict_labels {
                    LabelFailurePolicy::Abort
                } else {
                    LabelFailurePolicy::Unlabeled
                },
            },
        }
    }
}

/// Decoding and frame comparison are CPU-bound, so they run off the runtime.
async fn detect_slides(video: PathBuf, config: SlideDetectorConfig) -> Result<SlideBoundaries> {
    let boundaries = tokio::task::spawn_blocking(move || {
        let source = FfmpegFrameSource::open(&video)?;
        detect_slide_boundaries(source, &config, &video)
    })
    .await??;
    Ok(boundaries)
}

async fn extract_slide_frames(
    store: &ArtifactStore,
    name: &str,
    args: &PreprocessArgs,
    metadata: &VideoMetadata,
    boundaries: &SlideBoundaries,
) -> Result<()> {
    let pending: Vec<(usize, PathBuf)> = store
        .frame_paths(name, boundaries)
        .into_iter()
        .filter(|(_, path)| args.force || !path.exists())
        .collect();

    if pending.is_empty() {
        print_cached("Slide images extracted");
        return Ok(());
    }

    let step_start = Instant::now();
    let spinner = create_spinner(&format!("Extracting {} slide images...", pending.len()));
    let report = extract_frames(&args.video, &pending, metadata.fps).await;
    finish(
        spinner,
        &format!("Extracted {} slide images", report.extracted.len()),
        step_start,
    );
    print_failures(&report.failed);
    Ok(())
}

async fn analyze_layouts(
    store: &ArtifactStore,
    name: &str,
    boundaries: &SlideBoundaries,
    detector: &CommandLayoutDetector,
    grouping: &GroupingConfig,
    force: bool,
) -> Result<()> {
    let pending: Vec<(usize, PathBuf)> = store
        .frame_paths(name, boundaries)
        .into_iter()
        .filter(|(frame_index, _)| force || !store.layout_path(name, *frame_index).exists())
        .collect();

    if pending.is_empty() {
        print_cached("Layouts analyzed");
        return Ok(());
    }

    let step_start = Instant::now();
    let spinner = create_spinner(&format!("Analyzing {} slide layouts...", pending.len()));
    let report = analyze_frames(detector, &pending, grouping).await;
    for layout in &report.layouts {
        store.save_layout(name, layout).await?;
        tracing::debug!("\n{}", format_layout(layout));
    }
    finish(
        spinner,
        &format!("Analyzed {} layouts", report.layouts.len()),
        step_start,
    );

    print_failures(&report.failed);
    Ok(())
}

fn print_failures(failed: &[(usize, String)]) {
    for (frame_index, reason) in failed {
        println!(
            "  {} frame {}: {}",
            style("!").yellow().bold(),
            frame_index,
            style(first_line(reason)).dim()
        );
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}
