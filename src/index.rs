//! In-memory vector index: parallel (id, unit-vector) arrays with exact
//! brute-force top-k scoring.
//!
//! Single-writer / multiple-reader: `top_k` and `len` take the read lock;
//! `load_all`, `upsert`, and `remove` take the write lock. At the target
//! scale (≤100k images) a full dot-product sweep is faster and simpler than
//! any approximate structure.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::RwLock;

use crate::vecmath;

#[derive(Default)]
struct Slots {
    /// Embedding dimensionality, pinned by the first vector accepted.
    dim: Option<usize>,
    ids: Vec<i64>,
    vecs: Vec<Vec<f32>>,
    /// id → position in the parallel arrays.
    by_id: HashMap<i64, usize>,
}

pub struct VectorIndex {
    slots: RwLock<Slots>,
}

/// Min-heap entry: the heap root is the worst kept hit, so `Ord` is inverted
/// relative to the final ordering (score descending, id ascending on ties).
struct HeapEntry {
    id: i64,
    score: f32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Worst first: lower score is "greater" for the max-heap root; equal
        // scores put the higher id at the root so the lower id survives.
        other.score.total_cmp(&self.score).then_with(|| self.id.cmp(&other.id))
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex {
    pub fn new() -> Self {
        Self { slots: RwLock::new(Slots::default()) }
    }

    pub fn len(&self) -> usize {
        self.slots.read().expect("index lock").ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> Option<usize> {
        self.slots.read().expect("index lock").dim
    }

    /// Replace the whole contents from (id, raw little-endian f32 bytes)
    /// rows. Rows whose decoded length disagrees with the first row are
    /// dropped with a warning rather than poisoning the index.
    pub fn load_all(&self, rows: Vec<(i64, Vec<u8>)>) {
        let mut slots = self.slots.write().expect("index lock");
        slots.dim = None;
        slots.ids.clear();
        slots.vecs.clear();
        slots.by_id.clear();

        for (id, bytes) in rows {
            let vec = vecmath::from_bytes(&bytes);
            if vec.is_empty() {
                continue;
            }
            match slots.dim {
                None => slots.dim = Some(vec.len()),
                Some(dim) if dim != vec.len() => {
                    tracing::warn!(id, got = vec.len(), expected = dim, "dropping mismatched embedding");
                    continue;
                }
                Some(_) => {}
            }
            let pos = slots.ids.len();
            slots.ids.push(id);
            slots.vecs.push(vec);
            slots.by_id.insert(id, pos);
        }
    }

    /// Insert or overwrite in place.
    ///
    /// # Panics
    /// Panics if `vec` disagrees with the pinned dimensionality — a
    /// programmer error that kills the offending request, not the process.
    pub fn upsert(&self, id: i64, vec: Vec<f32>) {
        assert!(!vec.is_empty(), "refusing to index an empty vector");
        let mut slots = self.slots.write().expect("index lock");
        match slots.dim {
            None => slots.dim = Some(vec.len()),
            Some(dim) => assert_eq!(dim, vec.len(), "embedding dimension mismatch for id {id}"),
        }
        if let Some(&pos) = slots.by_id.get(&id) {
            slots.vecs[pos] = vec;
        } else {
            let pos = slots.ids.len();
            slots.ids.push(id);
            slots.vecs.push(vec);
            slots.by_id.insert(id, pos);
        }
    }

    /// Swap-with-last removal. Unknown ids are a no-op.
    pub fn remove(&self, id: i64) {
        let mut slots = self.slots.write().expect("index lock");
        let Some(pos) = slots.by_id.remove(&id) else {
            return;
        };
        let last = slots.ids.len() - 1;
        slots.ids.swap_remove(pos);
        slots.vecs.swap_remove(pos);
        if pos != last {
            let moved = slots.ids[pos];
            slots.by_id.insert(moved, pos);
        }
    }

    /// Top-k by dot product (cosine similarity for unit-norm entries),
    /// skipping the first `offset` hits. Maintains a bounded min-heap of
    /// `k + offset`, then sorts descending with ties broken by id ascending.
    pub fn top_k(&self, query: &[f32], k: usize, offset: usize) -> Vec<(i64, f32)> {
        let slots = self.slots.read().expect("index lock");
        let keep = k + offset;
        if keep == 0 || slots.ids.is_empty() {
            return Vec::new();
        }

        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(keep + 1);
        for (pos, vec) in slots.vecs.iter().enumerate() {
            let entry = HeapEntry { id: slots.ids[pos], score: vecmath::dot(query, vec) };
            if heap.len() < keep {
                heap.push(entry);
            } else if let Some(worst) = heap.peek() {
                let better = entry.score > worst.score
                    || (entry.score == worst.score && entry.id < worst.id);
                if better {
                    heap.pop();
                    heap.push(entry);
                }
            }
        }

        let mut hits: Vec<(i64, f32)> = heap.into_iter().map(|e| (e.id, e.score)).collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hits.into_iter().skip(offset).take(k).collect()
    }
}
