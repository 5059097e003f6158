use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use patient_sync::config::{ConfigOverrides, DatabaseOverrides, SyncConfig};
use patient_sync::jobs::stage_upload;
use patient_sync::{
    telemetry, CanonicalCache, JobQueue, JobStatus, PatientQuery, PatientSync, SqliteGateway,
};
use serde_json::json;

const USAGE: &str = "usage: patient-sync-admin [--config FILE] [--patients-db FILE] [--jobs-db FILE] <command>

commands:
  submit <file>                 stage an upload and queue it for the worker
  process <file>                process an upload synchronously
  query [--name N] [--phone P] [--chart C] [--page N] [--limit N]
  jobs [--status STATUS]        list queued jobs
  requeue                       move jobs stranded in processing back to pending";

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

/// Positional arguments, skipping flags and their values.
fn positional() -> Vec<String> {
    let mut out = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg.starts_with("--") {
            args.next();
        } else {
            out.push(arg);
        }
    }
    out
}

fn load_config() -> anyhow::Result<SyncConfig> {
    let overrides = ConfigOverrides {
        database: Some(DatabaseOverrides {
            patients_path: parse_arg("--patients-db").map(PathBuf::from),
            jobs_path: parse_arg("--jobs-db").map(PathBuf::from),
        }),
        ..ConfigOverrides::default()
    };
    Ok(SyncConfig::load(parse_arg("--config").as_deref(), overrides)?)
}

fn pipeline(config: &SyncConfig) -> anyhow::Result<PatientSync> {
    let gateway = SqliteGateway::open(&config.database.patients_path)?
        .with_chunk_rows(config.persistence.insert_chunk_rows);
    Ok(PatientSync::new(
        Arc::new(CanonicalCache::new()),
        Arc::new(gateway),
    ))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn submit(config: &SyncConfig, file: &Path) -> anyhow::Result<()> {
    let queue = JobQueue::open(&config.database.jobs_path)?;
    let job_id = pipeline(config)?.submit_upload(&queue, file, &config.uploads.dir)?;
    print_json(&json!({
        "message": "file accepted for processing",
        "jobId": job_id.0,
    }))
}

fn process(config: &SyncConfig, file: &Path) -> anyhow::Result<()> {
    let sync = pipeline(config)?;
    // A cold cache would re-insert every persisted patient.
    sync.warm_cache()?;
    let staged = stage_upload(file, &config.uploads.dir)?;
    let original_name = file.file_name().map(|name| name.to_string_lossy().into_owned());
    let summary = sync.process_upload_as(&staged, original_name.as_deref())?;
    print_json(&summary)
}

fn query(config: &SyncConfig) -> anyhow::Result<()> {
    let mut query = PatientQuery {
        name: parse_arg("--name"),
        phone: parse_arg("--phone"),
        chart: parse_arg("--chart"),
        ..PatientQuery::default()
    };
    if let Some(page) = parse_arg("--page") {
        query.page = page.parse().context("--page must be a positive integer")?;
    }
    if let Some(limit) = parse_arg("--limit") {
        query.limit = limit.parse().context("--limit must be a positive integer")?;
    }
    if query.page == 0 || query.limit == 0 {
        bail!("--page and --limit must be at least 1");
    }
    print_json(&pipeline(config)?.find_patients(&query)?)
}

fn jobs(config: &SyncConfig) -> anyhow::Result<()> {
    let status = parse_arg("--status")
        .map(|value| value.parse::<JobStatus>())
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let queue = JobQueue::open(&config.database.jobs_path)?;
    print_json(&queue.list(status)?)
}

fn requeue(config: &SyncConfig) -> anyhow::Result<()> {
    let queue = JobQueue::open(&config.database.jobs_path)?;
    let moved = queue.requeue_stranded()?;
    print_json(&json!({ "requeued": moved }))
}

fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    telemetry::init(&config.log);

    let args = positional();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["submit", file] => submit(&config, Path::new(file)),
        ["process", file] => process(&config, Path::new(file)),
        ["query"] => query(&config),
        ["jobs"] => jobs(&config),
        ["requeue"] => requeue(&config),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}
