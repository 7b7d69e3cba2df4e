//! `kazi-engine` -- run media files through the job engine.
//!
//! Submits every path given on the command line, logs progress as events
//! arrive, and prints the final job records as JSON once all jobs are
//! terminal (or on Ctrl-C).
//!
//! Configuration is read from the environment (see
//! [`EngineConfig::from_env`]). `LOG_FORMAT=json` switches log output to
//! JSON lines.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kazi_core::job::JobMetadata;
use kazi_core::media::{MediaContent, ProcessingOptions};
use kazi_core::types::JobId;
use kazi_engine::{Engine, EngineConfig, EngineDeps};
use kazi_events::JobEventKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        anyhow::bail!("usage: kazi-engine <media-file>...");
    }

    let config = EngineConfig::from_env();
    let deps = EngineDeps::from_config(&config).context("Failed to build engine dependencies")?;
    let engine = Engine::start(config, deps);

    // Subscribe before submitting so no event is missed.
    let mut events = engine.events().subscribe();

    let loaded = futures::future::join_all(paths.iter().map(|path| load_media(path))).await;
    let mut pending: HashSet<JobId> = HashSet::new();
    for content in loaded {
        let content = match content {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "Skipping file");
                continue;
            }
        };
        let metadata = JobMetadata::new(title_from(&content.name));
        let name = content.name.clone();
        match engine
            .submit_job(content, ProcessingOptions::default(), metadata)
            .await
        {
            Ok(job_id) => {
                pending.insert(job_id);
            }
            Err(e) => tracing::error!(%name, error = %e, "Submission failed"),
        }
    }

    while !pending.is_empty() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT (Ctrl-C), stopping");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    match &event.kind {
                        JobEventKind::Progress { progress } => {
                            tracing::info!(job_id = %event.job_id, progress, "Progress");
                        }
                        JobEventKind::Completed { output } => {
                            tracing::info!(job_id = %event.job_id, location = %output.location, "Completed");
                        }
                        JobEventKind::Error { error } => {
                            tracing::error!(job_id = %event.job_id, %error, "Failed");
                        }
                        JobEventKind::Cancelled => {
                            tracing::info!(job_id = %event.job_id, "Cancelled");
                        }
                    }
                    if event.is_terminal() {
                        pending.remove(&event.job_id);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event receiver lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown().await;

    let jobs = engine.list_all_jobs().await;
    println!("{}", serde_json::to_string_pretty(&jobs)?);
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kazi_engine=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn load_media(path: &str) -> anyhow::Result<MediaContent> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {path}"))?;
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string();
    MediaContent::new(name, data).with_context(|| format!("Unsupported media file {path}"))
}

/// `maasai_mara_safari.mp4` -> `maasai mara safari`
fn title_from(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    stem.replace(['_', '-'], " ")
}
