//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum sources analyzed at the same time
    pub max_parallel_analyses: usize,
    /// Maximum concurrent FFmpeg processes per run
    pub max_ffmpeg_processes: usize,
    /// Time budget for analyzing one source at one mode
    pub analysis_timeout: Duration,
    /// Time budget for a single FFmpeg invocation
    pub ffmpeg_timeout: Duration,
    /// Parent directory for per-run workspaces
    pub work_dir: String,
}

fn default_parallel_analyses() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(4)
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_parallel_analyses: default_parallel_analyses(),
            max_ffmpeg_processes: 2,
            analysis_timeout: Duration::from_secs(300),
            ffmpeg_timeout: Duration::from_secs(1800),
            work_dir: "/tmp/vmix".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_parallel_analyses: env_parse::<usize>("VMIX_MAX_PARALLEL_ANALYSES")
                .unwrap_or(defaults.max_parallel_analyses)
                .max(1),
            max_ffmpeg_processes: env_parse::<usize>("VMIX_MAX_FFMPEG_PROCESSES")
                .unwrap_or(defaults.max_ffmpeg_processes)
                .max(1),
            analysis_timeout: env_parse("VMIX_ANALYSIS_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.analysis_timeout),
            ffmpeg_timeout: env_parse("VMIX_FFMPEG_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.ffmpeg_timeout),
            work_dir: std::env::var("VMIX_WORK_DIR").unwrap_or(defaults.work_dir),
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<String>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert!((1..=4).contains(&config.max_parallel_analyses));
        assert_eq!(config.max_ffmpeg_processes, 2);
        assert_eq!(config.analysis_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_builders() {
        let config = WorkerConfig::default()
            .with_work_dir("/data/runs")
            .with_analysis_timeout(Duration::from_secs(5));
        assert_eq!(config.work_dir, "/data/runs");
        assert_eq!(config.analysis_timeout, Duration::from_secs(5));
    }
}
