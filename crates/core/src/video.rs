//! Frame sources and the fixed-interval frame sampler.
//!
//! A [`FrameSource`] is a single decode cursor that only moves forward.
//! [`FrameSampler`] owns one and turns it into a stream of reduced
//! grayscale [`FrameSample`]s, one every `frame_interval` frames.

use std::{
    collections::VecDeque,
    io::{BufReader, ErrorKind, Read},
    path::Path,
    process::{Child, ChildStdout, Command, Stdio},
};

use image::{DynamicImage, GrayImage, RgbImage, imageops::FilterType};

use crate::{
    error::{LecternError, Result},
    media::probe_metadata,
    types::VideoMetadata,
};

/// Sequential access to decoded video frames.
pub trait FrameSource {
    fn native_frame_rate(&self) -> f64;

    /// Decode the next frame, `Ok(None)` at end of stream.
    fn read_next_frame(&mut self) -> Result<Option<DynamicImage>>;

    /// Advance past `n` frames without handing them out. Returns how many
    /// frames were actually skipped, which is less than `n` only at end of
    /// stream.
    fn skip(&mut self, n: usize) -> Result<usize>;
}

/// Decodes a video through an `ffmpeg` child process that streams raw RGB
/// frames on stdout.
pub struct FfmpegFrameSource {
    metadata: VideoMetadata,
    child: Child,
    stdout: BufReader<ChildStdout>,
    frame_buf: Vec<u8>,
    frames_read: usize,
}

impl FfmpegFrameSource {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(LecternError::VideoNotFound {
                path: path.to_path_buf(),
            });
        }

        let metadata = probe_metadata(path)?;
        if metadata.width == 0 || metadata.height == 0 {
            return Err(LecternError::VideoOpenFailed {
                path: path.to_path_buf(),
                reason: "video stream has no dimensions".to_string(),
            });
        }

        let mut child = Command::new("ffmpeg")
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(path)
            .arg("-map")
            .arg("0:v:0")
            .arg("-fps_mode")
            .arg("passthrough")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| LecternError::VideoOpenFailed {
                path: path.to_path_buf(),
                reason: format!("failed to start ffmpeg: {e}"),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LecternError::VideoOpenFailed {
                path: path.to_path_buf(),
                reason: "ffmpeg stdout is not captured".to_string(),
            })?;

        let frame_len = metadata.width as usize * metadata.height as usize * 3;
        Ok(Self {
            metadata,
            child,
            stdout: BufReader::new(stdout),
            frame_buf: vec![0; frame_len],
            frames_read: 0,
        })
    }

    /// Fill `frame_buf` with the next frame. `false` at end of stream; a
    /// truncated trailing frame also counts as end of stream.
    fn fill_next(&mut self) -> Result<bool> {
        match self.stdout.read_exact(&mut self.frame_buf) {
            Ok(()) => {
                self.frames_read += 1;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(LecternError::FrameReadFailed {
                frame_index: self.frames_read,
                reason: e.to_string(),
            }),
        }
    }
}

impl FrameSource for FfmpegFrameSource {
    fn native_frame_rate(&self) -> f64 {
        self.metadata.fps
    }

    fn read_next_frame(&mut self) -> Result<Option<DynamicImage>> {
        if !self.fill_next()? {
            return Ok(None);
        }
        let frame = RgbImage::from_raw(
            self.metadata.width,
            self.metadata.height,
            self.frame_buf.clone(),
        )
        .ok_or_else(|| LecternError::FrameReadFailed {
            frame_index: self.frames_read - 1,
            reason: "frame buffer does not match video dimensions".to_string(),
        })?;
        Ok(Some(DynamicImage::ImageRgb8(frame)))
    }

    fn skip(&mut self, n: usize) -> Result<usize> {
        for skipped in 0..n {
            if !self.fill_next()? {
                return Ok(skipped);
            }
        }
        Ok(n)
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Already decoded frames, e.g. from a test fixture or another decoder.
pub struct MemoryFrameSource {
    fps: f64,
    frames: VecDeque<DynamicImage>,
}

impl MemoryFrameSource {
    pub fn new(fps: f64, frames: impl IntoIterator<Item = DynamicImage>) -> Self {
        Self {
            fps,
            frames: frames.into_iter().collect(),
        }
    }
}

impl FrameSource for MemoryFrameSource {
    fn native_frame_rate(&self) -> f64 {
        self.fps
    }

    fn read_next_frame(&mut self) -> Result<Option<DynamicImage>> {
        Ok(self.frames.pop_front())
    }

    fn skip(&mut self, n: usize) -> Result<usize> {
        let skipped = n.min(self.frames.len());
        self.frames.drain(..skipped);
        Ok(skipped)
    }
}

/// One sampled frame reduced to its comparison signal.
#[derive(Debug, Clone)]
pub struct FrameSample {
    /// Frame ordinal in the source video, not the sample ordinal.
    pub index: usize,
    pub signal: GrayImage,
}

/// Number of source frames between two samples, never below 1.
pub fn frame_interval(native_fps: f64, sample_rate: f64) -> usize {
    if !sample_rate.is_finite() || sample_rate <= 0.0 || !native_fps.is_finite() {
        return 1;
    }
    let interval = (native_fps / sample_rate).floor();
    if interval >= 1.0 { interval as usize } else { 1 }
}

/// Grayscale and downscale a frame so encoding noise and resolution do not
/// affect comparisons.
pub fn to_signal(frame: &DynamicImage, (width, height): (u32, u32)) -> GrayImage {
    image::imageops::resize(&frame.to_luma8(), width, height, FilterType::Triangle)
}

/// Iterator over [`FrameSample`]s taken every `interval` frames.
///
/// Owns its source, so no other reader can move the cursor in between.
pub struct FrameSampler<S> {
    source: S,
    interval: usize,
    signal_size: (u32, u32),
    last_index: Option<usize>,
    finished: bool,
}

impl<S: FrameSource> FrameSampler<S> {
    pub fn new(source: S, sample_rate: f64, signal_size: (u32, u32)) -> Self {
        let interval = frame_interval(source.native_frame_rate(), sample_rate);
        Self {
            source,
            interval,
            signal_size,
            last_index: None,
            finished: false,
        }
    }

    pub fn interval(&self) -> usize {
        self.interval
    }

    fn advance(&mut self) -> Result<Option<FrameSample>> {
        let index = match self.last_index {
            None => 0,
            Some(last) => {
                let wanted = self.interval - 1;
                if self.source.skip(wanted)? < wanted {
                    return Ok(None);
                }
                last + self.interval
            }
        };

        let Some(frame) = self.source.read_next_frame()? else {
            return Ok(None);
        };
        self.last_index = Some(index);
        Ok(Some(FrameSample {
            index,
            signal: to_signal(&frame, self.signal_size),
        }))
    }
}

impl<S: FrameSource> Iterator for FrameSampler<S> {
    type Item = Result<FrameSample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.advance() {
            Ok(Some(sample)) => Some(Ok(sample)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
