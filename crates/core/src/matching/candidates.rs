use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::debug;

use super::signals::sizes_within_tolerance;
use super::{Evaluator, SCORE_EPSILON};
use crate::embedding::Embedding;
use crate::fingerprint::Fingerprint;
use crate::hasher::perceptual::{hamming_distance, PerceptualHash};

/// BK-tree for Hamming-distance neighbour search over perceptual hashes.
/// Finds everything within a radius without comparing against every entry.
struct BkTree {
    root: Option<BkNode>,
}

struct BkNode {
    hash: u64,
    index: usize,
    children: HashMap<u32, BkNode>,
}

impl BkTree {
    fn new() -> Self {
        Self { root: None }
    }

    fn insert(&mut self, hash: u64, index: usize) {
        match self.root {
            None => {
                self.root = Some(BkNode {
                    hash,
                    index,
                    children: HashMap::new(),
                });
            }
            Some(ref mut root) => {
                Self::insert_into(root, hash, index);
            }
        }
    }

    fn insert_into(node: &mut BkNode, hash: u64, index: usize) {
        let dist = hamming_distance(node.hash, hash);
        if let Some(child) = node.children.get_mut(&dist) {
            Self::insert_into(child, hash, index);
        } else {
            node.children.insert(
                dist,
                BkNode {
                    hash,
                    index,
                    children: HashMap::new(),
                },
            );
        }
    }

    /// All entries within `max_distance` of `query`.
    fn find_within(&self, query: u64, max_distance: u32) -> Vec<usize> {
        let mut results = Vec::new();
        if let Some(ref root) = self.root {
            Self::search(root, query, max_distance, &mut results);
        }
        results
    }

    fn search(node: &BkNode, query: u64, max_distance: u32, results: &mut Vec<usize>) {
        let dist = hamming_distance(node.hash, query);
        if dist <= max_distance {
            results.push(node.index);
        }
        let low = dist.saturating_sub(max_distance);
        let high = dist + max_distance;
        for d in low..=high {
            if let Some(child) = node.children.get(&d) {
                Self::search(child, query, max_distance, results);
            }
        }
    }
}

fn push_pair(pairs: &mut BTreeSet<(usize, usize)>, a: usize, b: usize) {
    if a != b {
        pairs.insert((a.min(b), a.max(b)));
    }
}

fn push_all_pairs(pairs: &mut BTreeSet<(usize, usize)>, members: &[usize]) {
    for (k, &a) in members.iter().enumerate() {
        for &b in &members[k + 1..] {
            push_pair(pairs, a, b);
        }
    }
}

/// Select the pairs worth a full evaluation, in ascending (i, j) order.
///
/// The result is a superset of every pair whose fused score can reach the
/// threshold: each active signal contributes all pairs it could qualify,
/// and a metadata partition is only used when the weights make it
/// impossible to reach the threshold without that component agreeing.
pub fn candidate_pairs(
    fingerprints: &[Fingerprint],
    embeddings: &[Option<Arc<Embedding>>],
    evaluator: &Evaluator<'_>,
) -> Vec<(usize, usize)> {
    let mut pairs: BTreeSet<(usize, usize)> = BTreeSet::new();
    let threshold = evaluator.options().similarity_threshold;

    // Same SHA-256 bucket
    if evaluator.hash_active() {
        let mut buckets: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, fp) in fingerprints.iter().enumerate() {
            if let Some(sha) = fp.sha256() {
                buckets.entry(sha).or_default().push(i);
            }
        }
        for members in buckets.values().filter(|m| m.len() >= 2) {
            push_all_pairs(&mut pairs, members);
        }
        debug!(pairs = pairs.len(), "exact-hash candidates");
    }

    // Perceptual neighbours within the radius the threshold allows
    if evaluator.perceptual_active() {
        let radius = PerceptualHash::max_distance_for(threshold);
        let mut tree = BkTree::new();
        let hashed: Vec<(usize, u64)> = fingerprints
            .iter()
            .enumerate()
            .filter(|(_, fp)| !fp.is_failed())
            .filter_map(|(i, fp)| fp.perceptual.map(|p| (i, p.0)))
            .collect();
        for &(i, h) in &hashed {
            tree.insert(h, i);
        }
        for &(i, h) in &hashed {
            for j in tree.find_within(h, radius) {
                push_pair(&mut pairs, i, j);
            }
        }
        debug!(radius, pairs = pairs.len(), "after perceptual candidates");
    }

    // Embeddings are only comparable within one model
    if evaluator.content_active() {
        let mut by_model: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, fp) in fingerprints.iter().enumerate() {
            if fp.is_failed() {
                continue;
            }
            if let Some(Some(e)) = embeddings.get(i) {
                by_model.entry(e.model_id.as_str()).or_default().push(i);
            }
        }
        for members in by_model.values() {
            push_all_pairs(&mut pairs, members);
        }
        debug!(pairs = pairs.len(), "after content candidates");
    }

    if evaluator.metadata_active() {
        metadata_candidates(fingerprints, evaluator, threshold, &mut pairs);
        debug!(pairs = pairs.len(), "after metadata candidates");
    }

    pairs.into_iter().collect()
}

fn metadata_candidates(
    fingerprints: &[Fingerprint],
    evaluator: &Evaluator<'_>,
    threshold: f64,
    pairs: &mut BTreeSet<(usize, usize)>,
) {
    let weights = &evaluator.policy().metadata;
    let split_by_capture = weights.ceiling_without(weights.capture_time) + SCORE_EPSILON < threshold;
    let split_by_mime = weights.ceiling_without(weights.mime) + SCORE_EPSILON < threshold;
    let sweep_by_size = weights.ceiling_without(weights.size) + SCORE_EPSILON < threshold;

    // Pairs without a capture time on both sides are never scored
    let mut partitions: BTreeMap<(Option<NaiveDateTime>, String), Vec<usize>> = BTreeMap::new();
    for (i, fp) in fingerprints.iter().enumerate() {
        if fp.is_failed() {
            continue;
        }
        let Some(captured) = fp.metadata.captured_at else {
            continue;
        };
        let mime = if split_by_mime {
            fp.metadata.mime_type.to_ascii_lowercase()
        } else {
            String::new()
        };
        partitions
            .entry((split_by_capture.then_some(captured), mime))
            .or_default()
            .push(i);
    }

    for members in partitions.values() {
        if !sweep_by_size {
            push_all_pairs(pairs, members);
            continue;
        }
        let mut sorted = members.clone();
        sorted.sort_by_key(|&i| (fingerprints[i].metadata.size, i));
        for (k, &a) in sorted.iter().enumerate() {
            let size_a = fingerprints[a].metadata.size;
            for &b in &sorted[k + 1..] {
                if !sizes_within_tolerance(size_a, fingerprints[b].metadata.size, weights.size_tolerance) {
                    break;
                }
                push_pair(pairs, a, b);
            }
        }
    }
}
