//! Lazy, restartable access to decoded frames.
//!
//! A [`FrameSource`] hands out a fresh [`FrameStream`] on every call, so a
//! consumer can walk a video as many times as it needs without ever holding
//! more than one decoded frame per stream in memory.

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use image::RgbImage;
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use vmix_models::SourceVideo;

use crate::command::check_ffmpeg;
use crate::error::{MediaError, MediaResult};

/// A decoded RGB frame and its presentation time in the source.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Seconds from the start of the source
    pub timestamp: f64,
    pub image: RgbImage,
}

/// Which frames to decode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRequest {
    /// First timestamp (seconds)
    pub start: f64,
    /// Last timestamp, exclusive; `None` reads to the end
    pub end: Option<f64>,
    /// Frames per second of source time
    pub sample_fps: f64,
    /// Decoded height; never upscales
    pub height: u32,
}

/// Finite sequence of frames in timestamp order.
pub type FrameStream = Pin<Box<dyn Stream<Item = MediaResult<Frame>> + Send>>;

/// Anything that can decode frames of a source video.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Start a new pass over `video`.
    async fn frames(&self, video: &SourceVideo, request: &FrameRequest) -> MediaResult<FrameStream>;
}

/// Even-sized analysis dimensions preserving the source aspect.
pub fn analysis_dimensions(width: u32, height: u32, target_height: u32) -> (u32, u32) {
    let height_out = target_height.min(height).max(2) & !1;
    let width_out = ((width as f64 * height_out as f64 / height.max(1) as f64).round() as u32).max(2) & !1;
    (width_out, height_out)
}

// =============================================================================
// FFmpeg-backed source
// =============================================================================

/// Decodes frames by piping `rgb24` rawvideo out of FFmpeg.
#[derive(Debug, Clone, Default)]
pub struct FfmpegFrameSource;

impl FfmpegFrameSource {
    pub fn new() -> Self {
        Self
    }

    fn build_args(video: &SourceVideo, request: &FrameRequest, width: u32, height: u32) -> Vec<String> {
        let mut args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-ss".to_string(),
            format!("{:.3}", request.start.max(0.0)),
            "-i".to_string(),
            video.path.to_string_lossy().to_string(),
        ];
        if let Some(end) = request.end {
            args.push("-t".to_string());
            args.push(format!("{:.3}", (end - request.start).max(0.0)));
        }
        args.extend([
            "-an".to_string(),
            "-vf".to_string(),
            format!("fps={},scale={}:{}", request.sample_fps, width, height),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-".to_string(),
        ]);
        args
    }
}

struct DecodeState {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr_task: Option<JoinHandle<String>>,
    width: u32,
    height: u32,
    start: f64,
    sample_fps: f64,
    decoded: u64,
    done: bool,
}

impl DecodeState {
    async fn finish(&mut self) -> Option<MediaError> {
        self.done = true;
        let status = self.child.wait().await;
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        let failed = !matches!(&status, Ok(s) if s.success());
        if self.decoded == 0 {
            let detail = if stderr.trim().is_empty() {
                "no frames decoded".to_string()
            } else {
                stderr.trim().to_string()
            };
            return Some(MediaError::frame_decode(detail));
        }
        if failed {
            warn!(
                decoded = self.decoded,
                stderr = %stderr.trim(),
                "Decoder stopped early, keeping frames read so far"
            );
        }
        None
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn frames(&self, video: &SourceVideo, request: &FrameRequest) -> MediaResult<FrameStream> {
        check_ffmpeg()?;
        if !video.path.exists() {
            return Err(MediaError::FileNotFound(video.path.clone()));
        }
        if !(request.sample_fps > 0.0) {
            return Err(MediaError::internal("sample_fps must be positive"));
        }

        let (width, height) = analysis_dimensions(video.width, video.height, request.height);
        let args = Self::build_args(video, request, width, height);
        debug!(source = %video.id, "Decoding frames: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stdout was not captured"))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            })
        });

        let state = DecodeState {
            child,
            stdout: BufReader::new(stdout),
            stderr_task,
            width,
            height,
            start: request.start.max(0.0),
            sample_fps: request.sample_fps,
            decoded: 0,
            done: false,
        };

        let frames = stream::unfold(state, |mut st| async move {
            if st.done {
                return None;
            }

            let mut buf = vec![0u8; st.width as usize * st.height as usize * 3];
            match st.stdout.read_exact(&mut buf).await {
                Ok(_) => {
                    let timestamp = st.start + st.decoded as f64 / st.sample_fps;
                    st.decoded += 1;
                    let item = RgbImage::from_raw(st.width, st.height, buf)
                        .map(|image| Frame { timestamp, image })
                        .ok_or_else(|| MediaError::frame_decode("frame buffer size mismatch"));
                    Some((item, st))
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    let err = st.finish().await?;
                    Some((Err(err), st))
                }
                Err(e) => {
                    st.done = true;
                    Some((Err(MediaError::from(e)), st))
                }
            }
        });

        Ok(Box::pin(frames))
    }
}

// =============================================================================
// Generated source
// =============================================================================

/// Produces frames from a function of `(video, timestamp, width, height)`.
///
/// Used for tests and benchmarks, and anywhere frames are synthesized rather
/// than decoded.
pub struct GeneratedFrameSource<F> {
    render: F,
}

impl<F> GeneratedFrameSource<F>
where
    F: Fn(&SourceVideo, f64, u32, u32) -> MediaResult<RgbImage> + Send + Sync + Clone + 'static,
{
    pub fn new(render: F) -> Self {
        Self { render }
    }
}

#[async_trait]
impl<F> FrameSource for GeneratedFrameSource<F>
where
    F: Fn(&SourceVideo, f64, u32, u32) -> MediaResult<RgbImage> + Send + Sync + Clone + 'static,
{
    async fn frames(&self, video: &SourceVideo, request: &FrameRequest) -> MediaResult<FrameStream> {
        if !(request.sample_fps > 0.0) {
            return Err(MediaError::internal("sample_fps must be positive"));
        }
        let (width, height) = analysis_dimensions(video.width, video.height, request.height);
        let start = request.start.max(0.0);
        let end = request.end.unwrap_or(video.duration).min(video.duration);
        let count = ((end - start) * request.sample_fps).ceil().max(0.0) as u64;

        let video = video.clone();
        let render = self.render.clone();
        let fps = request.sample_fps;
        let frames = stream::iter(0..count).map(move |i| {
            let timestamp = start + i as f64 / fps;
            render(&video, timestamp, width, height).map(|image| Frame { timestamp, image })
        });

        Ok(Box::pin(frames))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use image::Rgb;
    use std::path::PathBuf;
    use vmix_models::SourceId;

    fn video(duration: f64) -> SourceVideo {
        SourceVideo {
            id: SourceId(0),
            path: PathBuf::from("synthetic.mp4"),
            duration,
            width: 1920,
            height: 1080,
            fps: 30.0,
            has_audio: false,
        }
    }

    #[test]
    fn test_analysis_dimensions_are_even_and_never_upscale() {
        assert_eq!(analysis_dimensions(1920, 1080, 240), (426, 240));
        assert_eq!(analysis_dimensions(1080, 1920, 360), (202, 360));
        assert_eq!(analysis_dimensions(320, 180, 480), (320, 180));
        let (w, h) = analysis_dimensions(1001, 777, 777);
        assert_eq!((w % 2, h % 2), (0, 0));
    }

    #[tokio::test]
    async fn test_generated_stream_is_restartable() {
        let source = GeneratedFrameSource::new(|_: &SourceVideo, t: f64, w: u32, h: u32| {
            Ok(RgbImage::from_pixel(w, h, Rgb([(t * 10.0) as u8, 0, 0])))
        });
        let request = FrameRequest {
            start: 0.0,
            end: None,
            sample_fps: 2.0,
            height: 120,
        };

        let first: Vec<_> = source.frames(&video(3.0), &request).await.unwrap().collect().await;
        let second: Vec<_> = source.frames(&video(3.0), &request).await.unwrap().collect().await;

        assert_eq!(first.len(), 6);
        assert_eq!(second.len(), 6);
        let stamps: Vec<f64> = first.iter().map(|f| f.as_ref().unwrap().timestamp).collect();
        assert_eq!(stamps, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);
        assert_eq!(first[0].as_ref().unwrap().image.height(), 120);
    }

    #[tokio::test]
    async fn test_generated_stream_respects_window() {
        let source = GeneratedFrameSource::new(|_: &SourceVideo, _t: f64, w: u32, h: u32| {
            Ok(RgbImage::new(w, h))
        });
        let request = FrameRequest {
            start: 2.0,
            end: Some(4.0),
            sample_fps: 1.0,
            height: 60,
        };
        let frames: Vec<_> = source.frames(&video(10.0), &request).await.unwrap().collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].as_ref().unwrap().timestamp, 3.0);
    }

    #[test]
    fn test_ffmpeg_args() {
        let request = FrameRequest {
            start: 1.5,
            end: Some(4.5),
            sample_fps: 2.0,
            height: 240,
        };
        let args = FfmpegFrameSource::build_args(&video(10.0), &request, 426, 240).join(" ");
        assert!(args.contains("-ss 1.500 -i synthetic.mp4 -t 3.000"));
        assert!(args.contains("fps=2,scale=426:240"));
        assert!(args.ends_with("-pix_fmt rgb24 -f rawvideo -"));
    }
}
