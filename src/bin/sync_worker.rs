use std::path::PathBuf;
use std::sync::Arc;

use patient_sync::config::{ConfigOverrides, DatabaseOverrides, SyncConfig, WorkerOverrides};
use patient_sync::{telemetry, CanonicalCache, JobQueue, PatientSync, SqliteGateway, Worker};

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn cli_overrides() -> anyhow::Result<ConfigOverrides> {
    let poll_interval_secs = parse_arg("--poll-interval")
        .map(|value| value.parse::<u64>())
        .transpose()?;
    Ok(ConfigOverrides {
        database: Some(DatabaseOverrides {
            patients_path: parse_arg("--patients-db").map(PathBuf::from),
            jobs_path: parse_arg("--jobs-db").map(PathBuf::from),
        }),
        worker: Some(WorkerOverrides {
            poll_interval_secs,
            requeue_stranded_on_start: has_flag("--requeue-stranded").then_some(true),
        }),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = parse_arg("--config");
    let config = SyncConfig::load(config_path.as_deref(), cli_overrides()?)?;
    telemetry::init(&config.log);

    let gateway = SqliteGateway::open(&config.database.patients_path)?
        .with_chunk_rows(config.persistence.insert_chunk_rows);
    let queue = Arc::new(JobQueue::open(&config.database.jobs_path)?);
    let pipeline = Arc::new(PatientSync::new(
        Arc::new(CanonicalCache::new()),
        Arc::new(gateway),
    ));

    if config.worker.requeue_stranded_on_start {
        let moved = queue.requeue_stranded()?;
        tracing::info!(moved, "stranded jobs requeued at startup");
    }
    if config.cache.warm_on_start {
        pipeline.warm_cache()?;
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("shutdown requested; finishing current job");
        let _ = shutdown_tx.send(true);
    });

    let worker = Worker::new(queue, pipeline, config.worker.poll_interval());
    worker.run(shutdown_rx).await;
    Ok(())
}
