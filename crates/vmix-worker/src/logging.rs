//! Tracing setup and structured run logging.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vmix_models::RunId;

/// Install the global subscriber.
///
/// Colored text by default, JSON lines when `LOG_FORMAT=json`. `RUST_LOG`
/// directives are honoured on top of `vmix=info`.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["vmix=info", "vmix_worker=info", "vmix_media=info"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Logs run lifecycle events with the run id and stage attached.
#[derive(Debug, Clone)]
pub struct RunLogger {
    run_id: String,
    stage: &'static str,
}

impl RunLogger {
    pub fn new(run_id: &RunId) -> Self {
        Self {
            run_id: run_id.to_string(),
            stage: "run",
        }
    }

    /// Same run, different stage label.
    pub fn for_stage(&self, stage: &'static str) -> Self {
        Self {
            run_id: self.run_id.clone(),
            stage,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(run_id = %self.run_id, stage = self.stage, "Stage started: {}", message);
    }

    pub fn log_progress(&self, message: &str) {
        info!(run_id = %self.run_id, stage = self.stage, "{}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(run_id = %self.run_id, stage = self.stage, "{}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(run_id = %self.run_id, stage = self.stage, "Stage failed: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(run_id = %self.run_id, stage = self.stage, "Stage completed: {}", message);
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Span carrying the run id, for instrumenting whole futures.
    pub fn span(&self) -> Span {
        tracing::info_span!("run", run_id = %self.run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_loggers_share_run_id() {
        let run_id = RunId::new();
        let logger = RunLogger::new(&run_id);
        let analysis = logger.for_stage("analysis");

        assert_eq!(logger.stage(), "run");
        assert_eq!(analysis.stage(), "analysis");
        assert_eq!(analysis.run_id(), run_id.as_str());
    }
}
