use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::{Receiver, Sender, bounded};
use serde::Serialize;

use super::matcher::{self, Match, ScanOutcome};
use super::signature::SignatureSet;
use crate::error::{Error, Result};
use crate::git::BlobId;
use crate::walker::{Blob, BlobSource, ReaderSource, Scope};

/// Shared cancellation flag, checked once per blob
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Stop at the first blob with a match
    pub fail_fast: bool,
    pub cancel: CancelFlag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    Binary,
    TooLarge { size: u64, limit: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedBlob {
    pub blob_id: BlobId,
    pub source: BlobSource,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Merged result of scanning one scope
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scope: Scope,
    /// Ordered by blob id, then byte range
    pub matches: Vec<Match>,
    /// Where each blob with matches was found
    pub sources: BTreeMap<BlobId, BlobSource>,
    pub blobs_scanned: usize,
    pub skipped: Vec<SkippedBlob>,
    /// True when `fail_fast` stopped the scan before every blob was read
    pub stopped_early: bool,
}

impl ScanReport {
    pub fn has_matches(&self) -> bool {
        !self.matches.is_empty()
    }

    pub fn affected_blob_count(&self) -> usize {
        self.sources.len()
    }

    /// Distinct signature ids with at least one match, sorted
    pub fn exposed_signatures(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.matches.iter().map(|m| m.signature_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Hard cap on workers; 0 means derive from `thread_percentage`
    pub max_threads: usize,
    /// Share of CPU cores to use
    pub thread_percentage: u8,
    /// Blobs larger than this are skipped
    pub max_blob_size: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_threads: 0,
            thread_percentage: 75,
            max_blob_size: 10 * 1024 * 1024,
        }
    }
}

impl PoolConfig {
    pub fn worker_count(&self) -> usize {
        let cpu_cores = num_cpus::get();
        let max_by_percentage = std::cmp::max(1, (cpu_cores * self.thread_percentage as usize) / 100);

        if self.max_threads > 0 {
            std::cmp::min(self.max_threads, max_by_percentage)
        } else {
            max_by_percentage
        }
    }
}

enum WorkerEvent {
    Scanned { blob: Blob, outcome: ScanOutcome },
    TooLarge { blob: Blob, limit: u64 },
    Failed(Error),
}

/// Bounded producer/worker pool over a lazy blob sequence.
pub struct ScanPool<'a> {
    config: PoolConfig,
    signatures: &'a SignatureSet,
    reader: ReaderSource,
}

impl<'a> ScanPool<'a> {
    pub fn new(config: PoolConfig, signatures: &'a SignatureSet, reader: ReaderSource) -> Self {
        Self {
            config,
            signatures,
            reader,
        }
    }

    /// Scan every blob from `blobs`.
    ///
    /// The producer runs on the calling thread because history walkers borrow
    /// the repository. Workers each open their own reader. The first error
    /// stops the pool and is returned.
    pub fn run<I>(&self, scope: Scope, blobs: I, options: &ScanOptions) -> Result<ScanReport>
    where
        I: Iterator<Item = Result<Blob>>,
    {
        let workers = self.config.worker_count();
        let (work_tx, work_rx): (Sender<Blob>, Receiver<Blob>) = bounded(workers * 2);
        let (result_tx, result_rx): (Sender<WorkerEvent>, Receiver<WorkerEvent>) = bounded(workers * 4);
        // Stops workers for fail-fast, user cancellation, or errors.
        let stop = CancelFlag::new();

        tracing::info!("Scanning {scope} with {workers} workers");

        let scoped = crossbeam::thread::scope(|s| {
            for worker_id in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let stop = stop.clone();
                let user_cancel = options.cancel.clone();
                s.spawn(move |_| self.worker(worker_id, work_rx, result_tx, &stop, &user_cancel));
            }
            drop(work_rx);
            drop(result_tx);

            let collector_stop = stop.clone();
            let fail_fast = options.fail_fast;
            let collector = s.spawn(move |_| collect(scope, result_rx, &collector_stop, fail_fast));

            let mut walk_error = None;
            for item in blobs {
                if stop.is_cancelled() || options.cancel.is_cancelled() {
                    break;
                }
                match item {
                    Ok(blob) => {
                        if work_tx.send(blob).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        stop.cancel();
                        walk_error = Some(e);
                        break;
                    }
                }
            }
            drop(work_tx);

            let collected = collector.join();
            (walk_error, collected)
        });

        let (walk_error, collected) = scoped.map_err(|_| Error::Io(std::io::Error::other("scan worker panicked")))?;
        let collected = collected.map_err(|_| Error::Io(std::io::Error::other("scan collector panicked")))?;

        if let Some(e) = walk_error {
            return Err(e);
        }
        let mut report = collected?;
        report.stopped_early |= options.fail_fast && stop.is_cancelled();
        tracing::info!(
            "Scanned {} blobs in {scope}: {} matches, {} skipped",
            report.blobs_scanned,
            report.matches.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn worker(
        &self,
        worker_id: usize,
        work_rx: Receiver<Blob>,
        result_tx: Sender<WorkerEvent>,
        stop: &CancelFlag,
        user_cancel: &CancelFlag,
    ) {
        let reader = match self.reader.open() {
            Ok(reader) => reader,
            Err(e) => {
                let _ = result_tx.send(WorkerEvent::Failed(e));
                return;
            }
        };

        while let Ok(blob) = work_rx.recv() {
            // Keep draining so the producer never blocks on a full channel.
            if stop.is_cancelled() || user_cancel.is_cancelled() {
                continue;
            }

            let limit = self.config.max_blob_size;
            let event = if blob.size > limit {
                WorkerEvent::TooLarge { blob, limit }
            } else {
                match reader.read(&blob) {
                    Ok(content) => {
                        let outcome = matcher::scan(blob.id, &content, self.signatures);
                        WorkerEvent::Scanned { blob, outcome }
                    }
                    Err(e) => WorkerEvent::Failed(e),
                }
            };
            if result_tx.send(event).is_err() {
                break;
            }
        }
        tracing::trace!("Scan worker {worker_id} finished");
    }
}

fn collect(scope: Scope, results: Receiver<WorkerEvent>, stop: &CancelFlag, fail_fast: bool) -> Result<ScanReport> {
    let mut report = ScanReport {
        scope,
        matches: Vec::new(),
        sources: BTreeMap::new(),
        blobs_scanned: 0,
        skipped: Vec::new(),
        stopped_early: false,
    };
    let mut first_error = None;

    for event in results {
        match event {
            WorkerEvent::Scanned { blob, outcome } => {
                report.blobs_scanned += 1;
                match outcome {
                    ScanOutcome::BinarySkipped => report.skipped.push(SkippedBlob {
                        blob_id: blob.id,
                        source: blob.source,
                        reason: SkipReason::Binary,
                    }),
                    ScanOutcome::Scanned(matches) if !matches.is_empty() => {
                        report.sources.insert(blob.id, blob.source);
                        report.matches.extend(matches);
                        if fail_fast {
                            stop.cancel();
                        }
                    }
                    ScanOutcome::Scanned(_) => {}
                }
            }
            WorkerEvent::TooLarge { blob, limit } => {
                tracing::warn!("Skipping {} ({} bytes exceeds {limit})", blob.source, blob.size);
                report.skipped.push(SkippedBlob {
                    blob_id: blob.id,
                    source: blob.source,
                    reason: SkipReason::TooLarge { size: blob.size, limit },
                });
            }
            WorkerEvent::Failed(e) => {
                stop.cancel();
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    // Workers finish in any order; within a blob the matcher order is kept.
    report
        .matches
        .sort_by(|a, b| (a.blob_id, a.byte_range.start, a.byte_range.end).cmp(&(b.blob_id, b.byte_range.start, b.byte_range.end)));
    report.skipped.sort_by_key(|s| s.blob_id);
    Ok(report)
}
