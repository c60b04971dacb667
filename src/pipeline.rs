use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rusqlite::Connection;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::Settings;
use crate::db;
use crate::enrich::EnrichClient;
use crate::error::PipelineError;
use crate::extract::extract_record;
use crate::mapper::{to_canonical, CanonicalRecord};
use crate::registry::{validate_nct_id, RegistryClient};

const CONCURRENCY: usize = 4;
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

/// Terminal status of one processed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStatus {
    Complete,
    Partial,
    Failed,
    Skipped,
}

impl DocStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocStatus::Complete => "complete",
            DocStatus::Partial => "partial",
            DocStatus::Failed => "failed",
            DocStatus::Skipped => "skipped",
        }
    }
}

pub struct BatchSummary {
    pub started: DateTime<Local>,
    pub total: usize,
    pub complete: usize,
    pub partial: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

impl BatchSummary {
    fn new(total: usize) -> Self {
        BatchSummary {
            started: Local::now(),
            total,
            complete: 0,
            partial: 0,
            failed: 0,
            skipped: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn record(&mut self, status: DocStatus) {
        match status {
            DocStatus::Complete => self.complete += 1,
            DocStatus::Partial => self.partial += 1,
            DocStatus::Failed => self.failed += 1,
            DocStatus::Skipped => self.skipped += 1,
        }
    }

    pub fn print(&self) {
        println!(
            "Batch started {}: {} documents, {} complete, {} partial, {} failed, {} skipped ({:.1}s)",
            self.started.format("%Y-%m-%d %H:%M:%S"),
            self.total,
            self.complete,
            self.partial,
            self.failed,
            self.skipped,
            self.elapsed.as_secs_f64()
        );
    }
}

pub struct RunOptions {
    pub skip_enrichment: bool,
    pub limit: Option<usize>,
    pub clean: bool,
}

struct DocOutcome {
    input: PathBuf,
    nct_id: Option<String>,
    status: DocStatus,
    detail: Option<String>,
    record: Option<CanonicalRecord>,
}

impl DocOutcome {
    fn skipped(input: PathBuf) -> Self {
        DocOutcome {
            input,
            nct_id: None,
            status: DocStatus::Skipped,
            detail: None,
            record: None,
        }
    }

    fn failed(input: PathBuf, detail: String) -> Self {
        DocOutcome {
            input,
            nct_id: None,
            status: DocStatus::Failed,
            detail: Some(detail),
            record: None,
        }
    }

    fn label(&self) -> String {
        match &self.nct_id {
            Some(id) => id.clone(),
            None => self.input.display().to_string(),
        }
    }
}

/// Run the full pipeline over a file or directory of registry documents,
/// streaming each document's canonical record to a single DB writer as it
/// finishes. Per-document failures never abort the batch.
pub async fn run_batch(
    settings: &Settings,
    input: &Path,
    opts: &RunOptions,
) -> Result<BatchSummary> {
    let t0 = Instant::now();
    let out_dir = PathBuf::from(&settings.out_dir);

    if opts.clean {
        clean_output_dir(&out_dir)?;
    }

    let mut inputs = collect_inputs(input)?;
    if let Some(n) = opts.limit {
        inputs.truncate(n);
    }
    if inputs.is_empty() {
        bail!("no input documents found under {}", input.display());
    }
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;

    let mut conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;

    let enricher = if opts.skip_enrichment {
        None
    } else {
        EnrichClient::from_settings(settings)?
    };
    if enricher.is_none() {
        info!("Enrichment disabled, records will be stored extraction-only");
    }
    let enricher = enricher.map(Arc::new);

    let cancel = install_interrupt();
    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let total = inputs.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    // Channel: workers send outcomes, main loop owns the one connection
    let (tx, mut rx) = tokio::sync::mpsc::channel::<DocOutcome>(CONCURRENCY * 2);

    for path in inputs {
        let tx = tx.clone();
        let sem = Arc::clone(&semaphore);
        let enricher = enricher.clone();
        let cancel = Arc::clone(&cancel);
        let out_dir = out_dir.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let outcome = process_one(path, enricher.as_deref(), &out_dir, &cancel).await;
            let _ = tx.send(outcome).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut summary = BatchSummary::new(total);
    while let Some(outcome) = rx.recv().await {
        let label = outcome.label();
        let mut status = outcome.status;
        let mut detail = outcome.detail;

        if let Some(record) = &outcome.record {
            if let Err(e) = write_with_retry(&mut conn, &settings.db_path, &label, record).await {
                status = DocStatus::Failed;
                detail = Some(e.to_string());
            }
        }

        match (status, &detail) {
            (DocStatus::Failed, d) => {
                warn!(
                    "{}: failed ({})",
                    label,
                    d.as_deref().unwrap_or("unknown error")
                );
            }
            (_, Some(d)) => info!("{}: {} ({})", label, status.as_str(), d),
            _ => {}
        }

        summary.record(status);
        pb.inc(1);
    }

    pb.finish_and_clear();
    summary.elapsed = t0.elapsed();
    info!(
        "Processed {} documents ({} complete, {} partial, {} failed, {} skipped)",
        summary.total, summary.complete, summary.partial, summary.failed, summary.skipped
    );
    Ok(summary)
}

/// Extract one document end to end: artifacts on disk, canonical record for
/// the writer. Never panics; every early exit carries a status.
async fn process_one(
    path: PathBuf,
    enricher: Option<&EnrichClient>,
    out_dir: &Path,
    cancel: &AtomicBool,
) -> DocOutcome {
    if cancel.load(Ordering::SeqCst) {
        return DocOutcome::skipped(path);
    }

    let doc = match read_document(&path) {
        Ok(doc) => doc,
        Err(e) => return DocOutcome::failed(path, e.to_string()),
    };

    let extracted = extract_record(&doc);
    let nct_id = extracted.basic_info.nct_id.clone();

    let extracted_json = match serde_json::to_value(&extracted) {
        Ok(v) => v,
        Err(e) => return DocOutcome::failed(path, format!("serializing extracted record: {}", e)),
    };
    if let Err(e) = write_artifact(out_dir, &path, "_extracted", &extracted_json) {
        return DocOutcome::failed(path, e.to_string());
    }

    let mut status = DocStatus::Complete;
    let mut detail = None;
    let mut enrichment = None;

    match enricher {
        None => status = DocStatus::Partial,
        Some(_) if cancel.load(Ordering::SeqCst) => {
            status = DocStatus::Partial;
            detail = Some("enrichment skipped after interrupt".to_string());
        }
        Some(client) => match client.analyze(&extracted).await {
            Ok(doc) => enrichment = Some(doc),
            Err(e) => {
                status = DocStatus::Partial;
                detail = Some(format!("enrichment failed: {}", e));
            }
        },
    }

    let canonical = to_canonical(&extracted, enrichment.as_ref());
    if let Err(e) = write_artifact(out_dir, &path, "_canonical", &canonical.to_json()) {
        return DocOutcome::failed(path, e.to_string());
    }

    DocOutcome {
        input: path,
        nct_id,
        status,
        detail,
        record: Some(canonical),
    }
}

async fn write_with_retry(
    conn: &mut Connection,
    db_path: &str,
    label: &str,
    record: &CanonicalRecord,
) -> Result<(), PipelineError> {
    let mut attempt = 0;
    loop {
        match db::upsert_trial(conn, record) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                warn!(
                    "Database write for {} failed ({}), retrying in {:.1}s",
                    label,
                    e,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
                if let Ok(fresh) = db::connect(db_path) {
                    let _ = db::init_schema(&fresh);
                    *conn = fresh;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn install_interrupt() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let f = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight documents");
            f.store(true, Ordering::SeqCst);
        }
    });
    flag
}

// ── Extraction-only batch ──

pub struct ExtractCounts {
    pub extracted: usize,
    pub errors: usize,
}

impl ExtractCounts {
    pub fn print(&self) {
        println!(
            "Extracted {} documents ({} errors).",
            self.extracted, self.errors
        );
    }
}

/// CPU-bound bulk extraction with no database involved: every input gets a
/// `<stem>_extracted.json` artifact.
pub fn extract_batch(input: &Path, out_dir: &Path) -> Result<ExtractCounts> {
    let inputs = collect_inputs(input)?;
    if inputs.is_empty() {
        bail!("no input documents found under {}", input.display());
    }
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;

    let pb = ProgressBar::new(inputs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut counts = ExtractCounts {
        extracted: 0,
        errors: 0,
    };

    for chunk in inputs.chunks(500) {
        let results: Vec<_> = chunk
            .par_iter()
            .map(|path| extract_one(path, out_dir))
            .collect();
        for result in results {
            match result {
                Ok(()) => counts.extracted += 1,
                Err(e) => {
                    warn!("{}", e);
                    counts.errors += 1;
                }
            }
        }
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    Ok(counts)
}

fn extract_one(path: &Path, out_dir: &Path) -> Result<()> {
    let doc = read_document(path)?;
    let record = extract_record(&doc);
    write_artifact(out_dir, path, "_extracted", &serde_json::to_value(&record)?)?;
    Ok(())
}

// ── Registry fetch ──

pub struct FetchCounts {
    pub fetched: usize,
    pub failed: usize,
}

impl FetchCounts {
    pub fn print(&self) {
        println!("Fetched {} studies ({} failed).", self.fetched, self.failed);
    }
}

/// Download raw study documents into the raw-documents directory, one
/// `<ID>.json` per identifier. Bad identifiers are reported without costing
/// a request.
pub async fn fetch_studies(settings: &Settings, ids: &[String]) -> Result<FetchCounts> {
    let client = RegistryClient::new(&settings.registry_base)?;
    fs::create_dir_all(&settings.raw_dir)
        .with_context(|| format!("creating raw directory {}", settings.raw_dir))?;

    let mut counts = FetchCounts {
        fetched: 0,
        failed: 0,
    };
    for raw_id in ids {
        let id = match validate_nct_id(raw_id) {
            Ok(id) => id,
            Err(e) => {
                warn!("{}", e);
                counts.failed += 1;
                continue;
            }
        };
        match client.fetch_study(&id).await {
            Ok(doc) => {
                let path = Path::new(&settings.raw_dir).join(format!("{}.json", id));
                fs::write(&path, serde_json::to_string_pretty(&doc)?)
                    .with_context(|| format!("writing {}", path.display()))?;
                info!("Fetched {} -> {}", id, path.display());
                counts.fetched += 1;
            }
            Err(e) => {
                warn!("Fetch failed for {}: {}", id, e);
                counts.failed += 1;
            }
        }
    }
    Ok(counts)
}

// ── Filesystem helpers ──

/// Input documents for a run: a single file, or every `.json` directly in a
/// directory that is not itself a pipeline artifact.
pub fn collect_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("input path {} does not exist", input.display());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(input).with_context(|| format!("reading {}", input.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if stem.ends_with("_extracted") || stem.ends_with("_canonical") {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

pub fn clean_output_dir(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if name.ends_with("_extracted.json") || name.ends_with("_canonical.json") {
            fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
            removed += 1;
        }
    }
    if removed > 0 {
        info!("Removed {} stale artifact files from {}", removed, dir.display());
    }
    Ok(removed)
}

fn read_document(path: &Path) -> Result<Value> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn artifact_path(out_dir: &Path, input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    out_dir.join(format!("{}{}.json", stem, suffix))
}

fn write_artifact(out_dir: &Path, input: &Path, suffix: &str, value: &Value) -> Result<PathBuf> {
    let path = artifact_path(out_dir, input, suffix);
    let body = serde_json::to_string_pretty(value)?;
    fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
