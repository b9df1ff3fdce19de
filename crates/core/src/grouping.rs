use std::collections::{BTreeSet, HashMap, VecDeque};

use uuid::Uuid;

use crate::domain::{DuplicateGroup, DuplicateMatch, FileRecord, FileSummary, MatchType};
use crate::fingerprint::Fingerprint;
use crate::matching::PairwiseScore;
use crate::ranking::elect_keep;

const TRANSITIVE_REASON: &str = "linked through other group members";

/// Index-based disjoint sets with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Returns false when `a` and `b` were already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }
}

/// A pair whose fused similarity reached the threshold, by input index.
#[derive(Debug, Clone)]
pub struct QualifyingPair {
    pub a: usize,
    pub b: usize,
    pub score: PairwiseScore,
}

/// Deterministic group id: same upload and keep file, same id.
pub fn group_id(upload_id: &str, keep_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{upload_id}:{keep_id}").as_bytes()).to_string()
}

/// Label for a member with no direct signal to the keep file: the match type
/// of the weakest edge on the shortest qualifying path from the keep file.
/// Ties between equally weak edges go to the one nearest the keep file.
fn path_link_type(keep: usize, member: usize, adjacency: &HashMap<usize, Vec<(usize, &PairwiseScore)>>) -> Option<MatchType> {
    let mut via: HashMap<usize, (usize, &PairwiseScore)> = HashMap::new();
    let mut queue = VecDeque::from([keep]);
    while let Some(node) = queue.pop_front() {
        if node == member {
            break;
        }
        for &(next, score) in adjacency.get(&node).into_iter().flatten() {
            if next != keep && !via.contains_key(&next) {
                via.insert(next, (node, score));
                queue.push_back(next);
            }
        }
    }

    let mut path = Vec::new();
    let mut cur = member;
    while cur != keep {
        let &(prev, score) = via.get(&cur)?;
        path.push(score);
        cur = prev;
    }
    path.iter()
        .rev()
        .min_by(|a, b| a.similarity.total_cmp(&b.similarity))
        .map(|s| s.match_type)
}

fn group_reason(types: &BTreeSet<MatchType>) -> String {
    match types.iter().collect::<Vec<_>>().as_slice() {
        [one] => one.group_reason().to_string(),
        many => {
            let names: Vec<&str> = many.iter().map(|t| t.as_str()).collect();
            format!("Mixed signals: {}", names.join(", "))
        }
    }
}

/// Cluster qualifying pairs into duplicate groups.
///
/// Groups come out in the order their first qualifying pair appears in
/// `qualifying`. Each match carries the direct (keep, member) score, taken
/// from `qualifying` when present and otherwise from `direct`. A member
/// with no direct signal at all gets similarity 0.0, a "linked through"
/// reason, and the type of the weakest link on its path to the keep file.
pub fn group(
    files: &[FileRecord],
    fingerprints: &[Fingerprint],
    qualifying: &[QualifyingPair],
    upload_id: &str,
    direct: &dyn Fn(usize, usize) -> Option<PairwiseScore>,
) -> Vec<DuplicateGroup> {
    let mut uf = UnionFind::new(files.len());
    for pair in qualifying {
        uf.union(pair.a, pair.b);
    }

    // Component order follows the first pair that touched it
    let mut order: HashMap<usize, usize> = HashMap::new();
    for pair in qualifying {
        let root = uf.find(pair.a);
        let next = order.len();
        order.entry(root).or_insert(next);
    }

    let mut components: Vec<Vec<usize>> = vec![Vec::new(); order.len()];
    for i in 0..files.len() {
        let root = uf.find(i);
        if let Some(&slot) = order.get(&root) {
            components[slot].push(i);
        }
    }

    let mut scored: HashMap<(usize, usize), &PairwiseScore> = HashMap::new();
    let mut adjacency: HashMap<usize, Vec<(usize, &PairwiseScore)>> = HashMap::new();
    for pair in qualifying {
        scored.insert((pair.a.min(pair.b), pair.a.max(pair.b)), &pair.score);
        adjacency.entry(pair.a).or_default().push((pair.b, &pair.score));
        adjacency.entry(pair.b).or_default().push((pair.a, &pair.score));
    }

    let mut groups = Vec::with_capacity(components.len());
    for members in components.into_iter().filter(|m| m.len() >= 2) {
        let records: Vec<&FileRecord> = members.iter().map(|&i| &files[i]).collect();
        let Some(keep) = elect_keep(&records) else { continue };
        let Some(keep_idx) = members.iter().copied().find(|&i| std::ptr::eq(&files[i], keep)) else {
            continue;
        };

        let mut duplicates: Vec<DuplicateMatch> = members
            .iter()
            .copied()
            .filter(|&m| m != keep_idx)
            .map(|m| {
                let key = (keep_idx.min(m), keep_idx.max(m));
                let score = scored.get(&key).map(|s| (*s).clone()).or_else(|| direct(keep_idx, m));
                let file = FileSummary::from_parts(&files[m], &fingerprints[m]);
                match score {
                    Some(s) => DuplicateMatch {
                        file,
                        similarity: s.similarity,
                        reason: s.reason.to_string(),
                        match_type: s.match_type,
                    },
                    // Same component, so a path always exists
                    None => DuplicateMatch {
                        file,
                        similarity: 0.0,
                        reason: TRANSITIVE_REASON.to_string(),
                        match_type: path_link_type(keep_idx, m, &adjacency).unwrap_or(MatchType::Metadata),
                    },
                }
            })
            .collect();

        duplicates.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.file.id.cmp(&b.file.id))
        });

        let types: BTreeSet<MatchType> = duplicates.iter().map(|d| d.match_type).collect();
        let total_size_saved = duplicates.iter().map(|d| d.file.size).sum();

        groups.push(DuplicateGroup {
            id: group_id(upload_id, &keep.id),
            group_index: groups.len(),
            keep_file: FileSummary::from_parts(keep, &fingerprints[keep_idx]),
            duplicates,
            reason: group_reason(&types),
            total_size_saved,
        });
    }

    groups
}
