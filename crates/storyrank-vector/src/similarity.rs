//! Cosine similarity and the ranking order shared by every store.
//!
//! Results are ordered by descending similarity, ties broken by ascending
//! item ID. [`TopK`] keeps only the best `limit` hits while scanning, so a
//! search holds O(limit) candidates no matter how large the corpus is, and
//! yields exactly what a full sort followed by truncation would.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use storyrank_core::types::ItemId;

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude, if the lengths differ,
/// or if the result is not finite.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    let sim = dot / (mag_a * mag_b);
    // Also folds -0.0 into 0.0 so it ties with other zero scores.
    if !sim.is_finite() || sim == 0.0 {
        return 0.0;
    }
    sim
}

/// One scored candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub id: ItemId,
    pub similarity: f64,
}

impl Hit {
    pub fn new(id: ItemId, similarity: f64) -> Self {
        Self { id, similarity }
    }

    /// `Less` when `self` ranks ahead of `other`.
    pub fn rank_cmp(&self, other: &Hit) -> Ordering {
        other
            .similarity
            .total_cmp(&self.similarity)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Heap entry whose `Ord` is the ranking order, so the heap's maximum is the
/// worst hit retained so far.
#[derive(Debug)]
struct Ranked(Hit);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.rank_cmp(&other.0)
    }
}

/// Bounded best-`limit` selection.
#[derive(Debug)]
pub struct TopK {
    limit: usize,
    heap: BinaryHeap<Ranked>,
}

impl TopK {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            heap: BinaryHeap::with_capacity(limit.min(1024) + 1),
        }
    }

    /// Consider one candidate.
    pub fn offer(&mut self, hit: Hit) {
        if self.limit == 0 {
            return;
        }
        if self.heap.len() < self.limit {
            self.heap.push(Ranked(hit));
            return;
        }
        let beats_worst = self
            .heap
            .peek()
            .is_some_and(|worst| hit.rank_cmp(&worst.0) == Ordering::Less);
        if beats_worst {
            self.heap.pop();
            self.heap.push(Ranked(hit));
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Retained hits, best first.
    pub fn into_sorted_vec(self) -> Vec<Hit> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|ranked| ranked.0)
            .collect()
    }
}

/// Reference ranking: sort everything, then truncate.
pub fn rank_exhaustive(mut hits: Vec<Hit>, limit: usize) -> Vec<Hit> {
    hits.sort_by(Hit::rank_cmp);
    hits.truncate(limit);
    hits
}
