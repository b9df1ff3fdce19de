pub mod candidates;
pub mod signals;

use std::fmt;

use crate::config::ScanPolicy;
use crate::domain::{MatchType, ScanOptions};
use crate::embedding::Embedding;
use crate::fingerprint::Fingerprint;
use signals::{join_components, metadata_similarity, MetadataComponent};

/// Slack for comparing derived floating-point scores against the threshold.
pub const SCORE_EPSILON: f64 = 1e-9;

/// Why a pair matched. Each variant renders its own reason string.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchReason {
    IdenticalHash,
    Visual(f64),
    Content(f64),
    Metadata {
        matched: Vec<MetadataComponent>,
        overlap: f64,
    },
}

impl MatchReason {
    pub fn match_type(&self) -> MatchType {
        match self {
            MatchReason::IdenticalHash => MatchType::Exact,
            MatchReason::Visual(_) => MatchType::Visual,
            MatchReason::Content(_) => MatchType::Content,
            MatchReason::Metadata { .. } => MatchType::Metadata,
        }
    }
}

fn percent(score: f64) -> u32 {
    (score * 100.0).round() as u32
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchReason::IdenticalHash => f.write_str("identical content hash"),
            MatchReason::Visual(s) => write!(f, "{}% visual similarity", percent(*s)),
            MatchReason::Content(s) => write!(f, "{}% content similarity", percent(*s)),
            MatchReason::Metadata { matched, overlap } => write!(
                f,
                "{} match ({}% metadata overlap)",
                join_components(matched),
                percent(*overlap)
            ),
        }
    }
}

/// Per-signal scores. `None` means the signal was disabled or not applicable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalScores {
    pub exact: bool,
    pub perceptual: Option<f64>,
    pub content: Option<f64>,
    pub metadata: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseScore {
    pub a: String,
    pub b: String,
    pub signals: SignalScores,
    pub similarity: f64,
    pub match_type: MatchType,
    pub reason: MatchReason,
}

/// One side of a comparison.
#[derive(Debug, Clone, Copy)]
pub struct Side<'a> {
    pub fingerprint: &'a Fingerprint,
    pub embedding: Option<&'a Embedding>,
}

impl<'a> Side<'a> {
    pub fn new(fingerprint: &'a Fingerprint, embedding: Option<&'a Embedding>) -> Self {
        Self { fingerprint, embedding }
    }
}

/// Scores pairs under one scan's options and policy.
#[derive(Debug, Clone)]
pub struct Evaluator<'p> {
    options: ScanOptions,
    policy: &'p ScanPolicy,
    content_available: bool,
}

impl<'p> Evaluator<'p> {
    /// `content_available` is false when the embedding stage was skipped.
    pub fn new(options: ScanOptions, policy: &'p ScanPolicy, content_available: bool) -> Self {
        Self {
            options,
            policy,
            content_available,
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn policy(&self) -> &ScanPolicy {
        self.policy
    }

    pub fn hash_active(&self) -> bool {
        self.options.enable_hash_scanning
    }

    pub fn perceptual_active(&self) -> bool {
        self.policy.perceptual_gate.is_open(&self.options)
    }

    pub fn content_active(&self) -> bool {
        self.options.enable_content_scanning && self.content_available
    }

    pub fn metadata_active(&self) -> bool {
        self.options.enable_metadata_scanning
    }

    pub fn qualifies(&self, score: &PairwiseScore) -> bool {
        score.similarity + SCORE_EPSILON >= self.options.similarity_threshold
    }

    /// Fuse every enabled, applicable signal for the pair. Symmetric.
    /// Returns None when no signal applies.
    pub fn score(&self, a: Side<'_>, b: Side<'_>) -> Option<PairwiseScore> {
        let (fa, fb) = (a.fingerprint, b.fingerprint);
        let mut signals = SignalScores::default();

        // Identical content wins outright
        if self.hash_active() {
            if let (Some(sa), Some(sb)) = (fa.sha256(), fb.sha256()) {
                if sa == sb {
                    signals.exact = true;
                    return Some(PairwiseScore {
                        a: fa.file_id.clone(),
                        b: fb.file_id.clone(),
                        signals,
                        similarity: 1.0,
                        match_type: MatchType::Exact,
                        reason: MatchReason::IdenticalHash,
                    });
                }
            }
        }

        // Failed fingerprints only take part in exact matching
        if fa.is_failed() || fb.is_failed() {
            return None;
        }

        let mut best: Option<(f64, MatchReason)> = None;
        let mut consider = |score: f64, reason: MatchReason| {
            // Strictly greater: on ties the earlier signal keeps the label
            if best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, reason));
            }
        };

        if self.perceptual_active() {
            if let (Some(pa), Some(pb)) = (fa.perceptual, fb.perceptual) {
                let s = pa.similarity(pb);
                signals.perceptual = Some(s);
                consider(s, MatchReason::Visual(s));
            }
        }

        if self.content_active() {
            if let (Some(ea), Some(eb)) = (a.embedding, b.embedding) {
                if let Some(s) = ea.similarity(eb) {
                    signals.content = Some(s);
                    consider(s, MatchReason::Content(s));
                }
            }
        }

        if self.metadata_active() {
            if let Some(m) = metadata_similarity(&fa.metadata, &fb.metadata, &self.policy.metadata) {
                signals.metadata = Some(m.score);
                consider(
                    m.score,
                    MatchReason::Metadata {
                        matched: m.matched,
                        overlap: m.score,
                    },
                );
            }
        }

        let (similarity, reason) = best?;
        Some(PairwiseScore {
            a: fa.file_id.clone(),
            b: fb.file_id.clone(),
            signals,
            similarity: similarity.clamp(0.0, 1.0),
            match_type: reason.match_type(),
            reason,
        })
    }
}
