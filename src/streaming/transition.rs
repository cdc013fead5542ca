//! Crossfade clips for video mode
//!
//! Frames are blended in-process and encoded to H.264 by an external
//! `ffmpeg`. A clip fades from the previous image into the next one, then
//! holds the next image for the rest of the display time.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbImage};

use super::content::{PreparedContent, content_key};
use super::prepare::{ImagePreparer, display_name, encode_jpeg, read_source, resource_error};
use crate::error::Result;
use crate::state::StreamingStage;
use crate::transport::MediaKind;
use crate::types::EngineConfig;

/// Progress callback, invoked from worker threads
pub type ProgressFn = Arc<dyn Fn(StreamingStage) + Send + Sync>;

/// What a clip shows
#[derive(Debug, Clone, PartialEq)]
pub struct CrossfadeJob {
    /// Image faded out; `None` fades in from black
    pub from: Option<PathBuf>,
    /// Image faded in and held
    pub to: PathBuf,
    /// Crossfade length
    pub transition: Duration,
    /// Hold after the crossfade
    pub hold: Duration,
}

/// Video output parameters
#[derive(Debug, Clone)]
pub struct VideoOutput {
    /// `ffmpeg` executable
    pub ffmpeg: PathBuf,
    /// Clip resolution
    pub size: (u32, u32),
    /// Frames per second
    pub fps: u32,
    /// JPEG quality of intermediate frames
    pub quality: u8,
}

impl VideoOutput {
    /// Parameters from engine configuration
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            // yuv420p needs even dimensions
            size: (
                (config.video_size.0 & !1).max(2),
                (config.video_size.1 & !1).max(2),
            ),
            fps: config.video_fps.max(1),
            quality: config.image_quality.clamp(1, 100),
        }
    }
}

/// Renders transition clips, sharing the preparer's cache
#[derive(Clone)]
pub struct TransitionRenderer {
    output: VideoOutput,
    cache: ImagePreparer,
}

impl TransitionRenderer {
    /// Create a renderer caching through `cache`
    #[must_use]
    pub fn new(output: VideoOutput, cache: ImagePreparer) -> Self {
        Self { output, cache }
    }

    /// Frames in the crossfade part of a clip
    #[must_use]
    pub fn frame_count(&self, transition: Duration) -> u32 {
        let frames = (transition.as_secs_f64() * f64::from(self.output.fps)).ceil();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let frames = frames.min(f64::from(u32::MAX)) as u32;
        frames.max(1)
    }

    /// Produce the MP4 clip for `job`
    ///
    /// # Errors
    ///
    /// Returns a `Resource` error if an image cannot be read or `ffmpeg`
    /// fails.
    pub async fn render(&self, job: &CrossfadeJob, progress: ProgressFn) -> Result<PreparedContent> {
        let result = self.render_inner(job, &progress).await;
        match &result {
            Ok(_) => progress(StreamingStage::Completed),
            Err(e) => progress(StreamingStage::Error {
                message: e.to_string(),
            }),
        }
        result
    }

    async fn render_inner(&self, job: &CrossfadeJob, progress: &ProgressFn) -> Result<PreparedContent> {
        let to_raw = read_source(&job.to).await?;
        let from_raw = match &job.from {
            Some(path) => Some(read_source(path).await?),
            None => None,
        };

        let frames = self.frame_count(job.transition);
        let params = format!(
            "{}x{}@{}:{}:{:.3}:{}",
            self.output.size.0,
            self.output.size.1,
            self.output.fps,
            frames,
            job.hold.as_secs_f64(),
            self.output.quality
        );
        let key = content_key(&[
            from_raw.as_deref().unwrap_or_default(),
            &to_raw,
            params.as_bytes(),
        ]);

        if let Some(hit) = self.cache.cached(&key) {
            return Ok(hit);
        }

        progress(StreamingStage::Starting {
            image: display_name(&job.to),
        });

        let workdir = tempfile::tempdir()?;
        let frame_dir = workdir.path().to_path_buf();
        let output = self.output.clone();
        let to_path = job.to.clone();
        let from_path = job.from.clone();
        let frame_progress = Arc::clone(progress);

        tokio::task::spawn_blocking(move || {
            write_frames(
                &frame_dir,
                (from_path.as_deref(), from_raw.as_deref()),
                (&to_path, &to_raw),
                &output,
                frames,
                &frame_progress,
            )
        })
        .await
        .map_err(|e| resource_error(&job.to, format!("frame task failed: {e}")))??;

        let clip = workdir.path().join("clip.mp4");
        self.encode(workdir.path(), &clip, job).await?;

        let data = tokio::fs::read(&clip)
            .await
            .map_err(|e| resource_error(&job.to, format!("cannot read clip: {e}")))?;

        let content = PreparedContent {
            data: Bytes::from(data),
            kind: MediaKind::Video,
            key,
        };
        self.cache.store(content.clone());
        Ok(content)
    }

    async fn encode(&self, frame_dir: &Path, clip: &Path, job: &CrossfadeJob) -> Result<()> {
        let hold = format!("{:.3}", job.hold.as_secs_f64());
        let filter = format!("tpad=stop_mode=clone:stop_duration={hold}");

        tracing::debug!("Encoding transition clip for {}", job.to.display());
        let result = tokio::process::Command::new(&self.output.ffmpeg)
            .arg("-y")
            .args(["-loglevel", "error"])
            .args(["-framerate", &self.output.fps.to_string()])
            .arg("-i")
            .arg(frame_dir.join("frame_%05d.jpg"))
            .args(["-vf", &filter])
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-movflags", "+faststart"])
            .arg(clip)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                resource_error(
                    &job.to,
                    format!("cannot run {}: {e}", self.output.ffmpeg.display()),
                )
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
            return Err(resource_error(
                &job.to,
                format!("ffmpeg exited with {}: {tail}", result.status),
            ));
        }
        Ok(())
    }
}

/// Center `image` on a black canvas of `size`, scaled to fit
#[must_use]
pub fn letterbox(image: &DynamicImage, size: (u32, u32)) -> RgbImage {
    let (width, height) = image.dimensions();
    let fitted = if (width, height) == size {
        image.to_rgb8()
    } else {
        image.resize(size.0, size.1, FilterType::Lanczos3).to_rgb8()
    };

    let mut canvas = RgbImage::new(size.0, size.1);
    let x = i64::from((size.0 - fitted.width().min(size.0)) / 2);
    let y = i64::from((size.1 - fitted.height().min(size.1)) / 2);
    imageops::overlay(&mut canvas, &fitted, x, y);
    canvas
}

/// Linear blend `from * (1 - alpha) + to * alpha`
#[must_use]
pub fn blend(from: &RgbImage, to: &RgbImage, alpha: f32) -> RgbImage {
    let alpha = alpha.clamp(0.0, 1.0);
    let pixels: Vec<u8> = from
        .as_raw()
        .iter()
        .zip(to.as_raw())
        .map(|(&a, &b)| mix(a, b, alpha))
        .collect();

    RgbImage::from_raw(to.width(), to.height(), pixels)
        .unwrap_or_else(|| to.clone())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn mix(a: u8, b: u8, alpha: f32) -> u8 {
    (f32::from(a) * (1.0 - alpha) + f32::from(b) * alpha)
        .round()
        .clamp(0.0, 255.0) as u8
}

fn write_frames(
    dir: &Path,
    from: (Option<&Path>, Option<&[u8]>),
    to: (&Path, &[u8]),
    output: &VideoOutput,
    frames: u32,
    progress: &ProgressFn,
) -> Result<()> {
    let target = letterbox(&super::prepare::decode(to.0, to.1)?, output.size);
    let source = match from {
        (Some(path), Some(raw)) => letterbox(&super::prepare::decode(path, raw)?, output.size),
        _ => RgbImage::new(output.size.0, output.size.1),
    };

    for index in 0..frames {
        #[allow(clippy::cast_precision_loss)]
        let alpha = (index + 1) as f32 / frames as f32;
        let frame = DynamicImage::ImageRgb8(blend(&source, &target, alpha));
        let path = dir.join(format!("frame_{:05}.jpg", index + 1));
        let encoded = encode_jpeg(to.0, &frame, output.quality)?;
        std::fs::write(&path, encoded).map_err(|e| resource_error(to.0, format!("cannot write frame: {e}")))?;

        progress(StreamingStage::Creating {
            current: index + 1,
            total: frames,
        });
    }
    Ok(())
}
