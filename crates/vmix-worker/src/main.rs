//! Vertical mix worker binary.
//!
//! Usage: `vmix-worker <request.json> [report.json]`

use std::path::PathBuf;

use anyhow::Context;
use tracing::{error, info};

use vmix_models::RunRequest;
use vmix_worker::{init_tracing, Pipeline, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(e) = run().await {
        error!("Run failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let request_path = args
        .next()
        .map(PathBuf::from)
        .context("usage: vmix-worker <request.json> [report.json]")?;
    let report_path = args.next().map(PathBuf::from);

    let raw = tokio::fs::read_to_string(&request_path)
        .await
        .with_context(|| format!("reading {}", request_path.display()))?;
    let request: RunRequest =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", request_path.display()))?;

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let pipeline = Pipeline::new(config);
    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, cancelling run");
            cancel.cancel();
        }
    });

    let report = pipeline.run(request).await?;
    let json = serde_json::to_string_pretty(&report)?;
    match report_path {
        Some(path) => {
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!(report = %path.display(), "Report written");
        }
        None => println!("{}", json),
    }
    Ok(())
}
