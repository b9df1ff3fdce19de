use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, warn};

use crate::config::ScanPolicy;
use crate::domain::{FileRecord, ScanOptions, ScanResult, ScanStage, StageTiming};
use crate::embedding::{ContentEmbedder, Embedding};
use crate::error::{Error, Result};
use crate::fingerprint::{self, Fingerprint};
use crate::grouping::{self, QualifyingPair};
use crate::matching::candidates::candidate_pairs;
use crate::matching::{Evaluator, PairwiseScore, Side};

/// Cooperative cancellation, checked at every stage boundary.
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
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

/// Progress events reported through the optional scan callback.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanProgress {
    /// A stage is starting. `items` counts input files, or qualifying pairs
    /// for grouping.
    StageStarted { stage: ScanStage, items: usize },
    /// A stage completed.
    StageFinished { stage: ScanStage, seconds: f64 },
    /// Content scanning was requested but the embedding backend failed.
    ContentSkipped { reason: String },
}

/// Everything a single scan borrows from the engine.
pub(crate) struct Scan<'a> {
    pub policy: &'a ScanPolicy,
    pub embedder: &'a ContentEmbedder,
    pub cancel: &'a CancelToken,
}

struct Stages<'p> {
    progress: Option<&'p mut dyn FnMut(ScanProgress)>,
    timings: Vec<StageTiming>,
}

impl<'p> Stages<'p> {
    fn report(&mut self, event: ScanProgress) {
        if let Some(ref mut cb) = self.progress {
            cb(event);
        }
    }

    fn start(&mut self, cancel: &CancelToken, stage: ScanStage, items: usize) -> Result<Instant> {
        if cancel.is_cancelled() {
            info!(%stage, "scan cancelled");
            return Err(Error::Cancelled { stage });
        }
        self.report(ScanProgress::StageStarted { stage, items });
        Ok(Instant::now())
    }

    fn finish(&mut self, stage: ScanStage, started: Instant) {
        let seconds = started.elapsed().as_secs_f64();
        self.timings.push(StageTiming { stage, seconds });
        self.report(ScanProgress::StageFinished { stage, seconds });
    }
}

fn install<R: Send>(pool: Option<&ThreadPool>, f: impl FnOnce() -> R + Send) -> R {
    match pool {
        Some(pool) => pool.install(f),
        None => f(),
    }
}

/// Reject bad input before any work starts.
pub(crate) fn validate(files: &[FileRecord], options: &ScanOptions, policy: &ScanPolicy) -> Result<()> {
    options.validate()?;
    let mut seen = HashSet::with_capacity(files.len());
    for file in files {
        if !seen.insert(file.id.as_str()) {
            return Err(Error::DuplicateFileId(file.id.clone()));
        }
    }
    policy.validate()
}

impl<'a> Scan<'a> {
    pub(crate) fn run(
        &self,
        upload_id: &str,
        files: &[FileRecord],
        options: ScanOptions,
        progress: Option<&mut dyn FnMut(ScanProgress)>,
    ) -> Result<ScanResult> {
        validate(files, &options, self.policy)?;
        let scan_start = Instant::now();
        let mut stages = Stages {
            progress,
            timings: Vec::new(),
        };

        let mut result = ScanResult {
            upload_id: upload_id.to_string(),
            groups: Vec::new(),
            total_files: files.len(),
            duplicates_found: 0,
            size_saved: 0,
            scan_time: 0.0,
            scan_options: options,
            content_scanning_skipped: false,
            stage_timings: Vec::new(),
        };

        if !options.any_enabled() {
            info!(upload_id, "every scanning signal disabled, nothing to compare");
            result.scan_time = scan_start.elapsed().as_secs_f64();
            return Ok(result);
        }

        let pool = match self.policy.max_workers {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| Error::InvalidConfig(e.to_string()))?,
            ),
            None => None,
        };
        let pool = pool.as_ref();

        info!(upload_id, files = files.len(), ?options, "scan started");

        // Fingerprinting
        let started = stages.start(self.cancel, ScanStage::Fingerprinting, files.len())?;
        let fingerprints: Vec<Fingerprint> =
            install(pool, || files.par_iter().map(fingerprint::extract).collect());
        let failed = fingerprints.iter().filter(|f| f.is_failed()).count();
        info!(
            files = fingerprints.len(),
            failed,
            elapsed = started.elapsed().as_secs_f64(),
            "fingerprinting done"
        );
        stages.finish(ScanStage::Fingerprinting, started);

        // Embedding
        let mut embeddings: Vec<Option<Arc<Embedding>>> = Vec::new();
        if options.enable_content_scanning {
            let started = stages.start(self.cancel, ScanStage::Embedding, files.len())?;
            let embedded = self
                .embedder
                .ready()
                .and_then(|_| install(pool, || self.embedder.embed_all(files, &fingerprints)));
            match embedded {
                Ok(e) => {
                    info!(
                        embedded = e.iter().filter(|e| e.is_some()).count(),
                        elapsed = started.elapsed().as_secs_f64(),
                        "embedding done"
                    );
                    embeddings = e;
                }
                Err(e) => {
                    warn!(error = %e, "embedding backend failed, continuing without content signal");
                    result.content_scanning_skipped = true;
                    stages.report(ScanProgress::ContentSkipped { reason: e.to_string() });
                }
            }
            stages.finish(ScanStage::Embedding, started);
        }

        // Evaluating
        let evaluator = Evaluator::new(options, self.policy, !result.content_scanning_skipped);
        let side = |i: usize| Side::new(&fingerprints[i], embeddings.get(i).and_then(|e| e.as_deref()));

        let started = stages.start(self.cancel, ScanStage::Evaluating, files.len())?;
        let candidates = candidate_pairs(&fingerprints, &embeddings, &evaluator);
        let scores: Vec<Option<PairwiseScore>> = install(pool, || {
            candidates
                .par_iter()
                .map(|&(a, b)| evaluator.score(side(a), side(b)))
                .collect()
        });
        let qualifying: Vec<QualifyingPair> = candidates
            .iter()
            .zip(scores)
            .filter_map(|(&(a, b), score)| {
                score
                    .filter(|s| evaluator.qualifies(s))
                    .map(|score| QualifyingPair { a, b, score })
            })
            .collect();
        debug!(candidates = candidates.len(), qualifying = qualifying.len(), "pairs evaluated");
        info!(
            qualifying = qualifying.len(),
            elapsed = started.elapsed().as_secs_f64(),
            "evaluation done"
        );
        stages.finish(ScanStage::Evaluating, started);

        // Grouping
        let started = stages.start(self.cancel, ScanStage::Grouping, qualifying.len())?;
        let direct = |a: usize, b: usize| evaluator.score(side(a), side(b));
        result.groups = grouping::group(files, &fingerprints, &qualifying, upload_id, &direct);
        stages.finish(ScanStage::Grouping, started);

        result.duplicates_found = result.groups.iter().map(|g| g.duplicates.len()).sum();
        result.size_saved = result.groups.iter().map(|g| g.total_size_saved).sum();
        result.scan_time = scan_start.elapsed().as_secs_f64();
        result.stage_timings = stages.timings;

        info!(
            upload_id,
            groups = result.groups.len(),
            duplicates = result.duplicates_found,
            size_saved = result.size_saved,
            content_skipped = result.content_scanning_skipped,
            elapsed = result.scan_time,
            "scan done"
        );
        Ok(result)
    }
}
