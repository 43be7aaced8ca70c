//! FFmpeg `-progress pipe:2` parsing and render progress logging.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::info;

/// Keys FFmpeg writes in its progress blocks.
const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Progress percentage given the expected output duration in seconds.
    pub fn percentage(&self, total_secs: f64) -> f64 {
        if total_secs <= 0.0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / 1000.0 / total_secs) * 100.0).clamp(0.0, 100.0)
    }
}

/// Feed one stderr line into `current`.
///
/// Returns `None` when the line is not part of a progress block,
/// `Some(None)` when it updated a field, and `Some(Some(snapshot))` at the
/// end of each block.
pub fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<Option<FfmpegProgress>> {
    let (key, value) = line.trim().split_once('=')?;
    let key = key.trim();
    let value = value.trim();
    if !PROGRESS_KEYS.contains(&key) && !key.starts_with("stream_") {
        return None;
    }

    match key {
        "out_time_us" => {
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        // Despite the name FFmpeg reports microseconds here too
        "out_time_ms" => {
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "frame" => {
            if let Ok(frame) = value.parse() {
                current.frame = frame;
            }
        }
        "fps" => {
            if let Ok(fps) = value.parse() {
                current.fps = fps;
            }
        }
        "speed" => {
            if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                current.speed = speed;
            }
        }
        "progress" => {
            current.is_complete = value == "end";
            return Some(Some(current.clone()));
        }
        _ => {}
    }

    Some(None)
}

/// Build a progress callback that logs every quarter of a render stage.
pub fn log_progress(stage: &'static str, total_secs: f64) -> impl Fn(FfmpegProgress) + Send + 'static {
    let last_quarter = Arc::new(AtomicU32::new(0));
    move |progress: FfmpegProgress| {
        let pct = progress.percentage(total_secs);
        let quarter = (pct / 25.0).floor() as u32;
        if quarter > last_quarter.fetch_max(quarter, Ordering::Relaxed) {
            info!(
                stage,
                percent = pct.round(),
                speed = progress.speed,
                "Render progress"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_block() {
        let mut progress = FfmpegProgress::default();

        assert!(matches!(parse_progress_line("out_time_us=5000000", &mut progress), Some(None)));
        assert_eq!(progress.out_time_ms, 5000);

        parse_progress_line("speed=1.5x", &mut progress);
        assert!((progress.speed - 1.5).abs() < 0.01);

        parse_progress_line("speed=N/A", &mut progress);
        assert!((progress.speed - 1.5).abs() < 0.01);

        let snapshot = parse_progress_line("progress=end", &mut progress).flatten();
        assert!(snapshot.unwrap().is_complete);
    }

    #[test]
    fn test_non_progress_lines_pass_through() {
        let mut progress = FfmpegProgress::default();
        assert!(parse_progress_line("Error opening input file clip.mp4.", &mut progress).is_none());
        assert!(parse_progress_line("[concat @ 0x55] Impossible to open 'a.mp4'", &mut progress).is_none());
        assert!(parse_progress_line("stream_0_0_q=28.0", &mut progress).is_some());
    }

    #[test]
    fn test_percentage_is_clamped() {
        let progress = FfmpegProgress {
            out_time_ms: 15_000,
            ..Default::default()
        };
        assert!((progress.percentage(30.0) - 50.0).abs() < 0.01);
        assert_eq!(progress.percentage(10.0), 100.0);
        assert_eq!(progress.percentage(0.0), 0.0);
    }
}
