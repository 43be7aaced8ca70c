//! Run driver for the vertical mix pipeline.
//!
//! This crate provides:
//! - Clip selection under duration, count and diversity constraints
//! - The assembly engine (transform, concatenate, audio, logo, tagline, encode)
//! - The run pipeline with bounded pools, cancellation and degradation
//! - Per-run workspaces, worker configuration and structured logging

pub mod assembly;
pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod selector;
pub mod workspace;

pub use assembly::{AssemblyEngine, AssemblyOutput};
pub use cancel::CancelToken;
pub use config::WorkerConfig;
pub use error::{AssemblyStage, PipelineError, PipelineResult};
pub use logging::{init_tracing, RunLogger};
pub use pipeline::{build_plan, select_and_report, AnalysisOutcome, Pipeline};
pub use selector::{rank_order, ClipSelector, Selection};
pub use workspace::RunWorkspace;
