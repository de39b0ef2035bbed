//! Approximate nearest neighbours over dense vectors.
//!
//! A forest of random binary space partitioning trees. Every inner node splits
//! its points with the hyperplane that perpendicularly bisects two sampled
//! points; leaves hold at most `max_leaf_size` points. Queries descend toward
//! the query's side of each plane, backtrack while a tree has produced fewer
//! than `k` candidates, then rank the union of candidates exactly.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::{Result, SearchyError};

pub type VectorId = u64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: VectorId,
    /// Squared Euclidean distance to the query.
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hyperplane {
    normal: Vec<f32>,
    offset: f32,
}

impl Hyperplane {
    /// The plane equidistant from `a` and `b`.
    pub fn bisecting(a: &[f32], b: &[f32]) -> Self {
        let normal: Vec<f32> = a.iter().zip(b).map(|(x, y)| x - y).collect();
        let offset = -a.iter().zip(b).zip(&normal).map(|((x, y), n)| n * (x + y) / 2.0).sum::<f32>();
        Self { normal, offset }
    }

    pub fn is_above(&self, v: &[f32]) -> bool { dot(&self.normal, v) + self.offset >= 0.0 }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    /// Slots into the index's vector table.
    Leaf(Vec<u32>),
    Inner { plane: Hyperplane, below: Box<Node>, above: Box<Node> },
}

impl Node {
    fn depth(&self) -> usize {
        match self {
            Node::Leaf(_) => 1,
            Node::Inner { below, above, .. } => 1 + below.depth().max(above.depth()),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() }

fn squared_distance(a: &[f32], b: &[f32]) -> f32 { a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum() }

pub struct VectorIndexBuilder {
    num_trees: usize,
    max_leaf_size: usize,
    seed: Option<u64>,
    deduplicate: bool,
    vectors: Vec<Vec<f32>>,
    ids: Vec<VectorId>,
}

impl Default for VectorIndexBuilder {
    fn default() -> Self {
        Self { num_trees: 10, max_leaf_size: 15, seed: None, deduplicate: true, vectors: Vec::new(), ids: Vec::new() }
    }
}

impl VectorIndexBuilder {
    pub fn new() -> Self { Self::default() }

    pub fn num_trees(mut self, n: usize) -> Self {
        self.num_trees = n;
        self
    }

    pub fn max_leaf_size(mut self, n: usize) -> Self {
        self.max_leaf_size = n;
        self
    }

    /// Fix the seed to make tree construction reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn deduplicate(mut self, on: bool) -> Self {
        self.deduplicate = on;
        self
    }

    pub fn len(&self) -> usize { self.vectors.len() }

    pub fn is_empty(&self) -> bool { self.vectors.is_empty() }

    pub fn add(&mut self, vector: Vec<f32>, id: VectorId) -> Result<()> {
        if let Some(first) = self.vectors.first() {
            if first.len() != vector.len() {
                return Err(SearchyError::Validation(format!(
                    "vector {id} has dimension {}, expected {}", vector.len(), first.len()
                )));
            }
        } else if vector.is_empty() {
            return Err(SearchyError::Validation("vectors must have at least one dimension".into()));
        }
        self.vectors.push(vector);
        self.ids.push(id);
        Ok(())
    }

    pub fn add_all(&mut self, vectors: Vec<Vec<f32>>, ids: Vec<VectorId>) -> Result<()> {
        if vectors.len() != ids.len() {
            return Err(SearchyError::Validation(format!("{} vectors but {} ids", vectors.len(), ids.len())));
        }
        for (v, id) in vectors.into_iter().zip(ids) {
            self.add(v, id)?;
        }
        Ok(())
    }

    pub fn build(self) -> Result<VectorIndex> {
        if self.num_trees == 0 || self.max_leaf_size == 0 {
            return Err(SearchyError::Validation("num_trees and max_leaf_size must be positive".into()));
        }
        let (vectors, ids) = if self.deduplicate { dedup(self.vectors, self.ids) } else { (self.vectors, self.ids) };
        let dimension = vectors.first().map(Vec::len).unwrap_or(0);
        let base_seed = self.seed.unwrap_or_else(rand::random);
        let slots: Vec<u32> = (0..vectors.len() as u32).collect();
        let max_leaf = self.max_leaf_size;

        let trees: Vec<Node> = (0..self.num_trees as u64)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(t));
                split(&vectors, slots.clone(), max_leaf, &mut rng)
            })
            .collect();

        tracing::info!(
            vectors = vectors.len(),
            trees = trees.len(),
            max_depth = trees.iter().map(Node::depth).max().unwrap_or(0),
            "built vector index"
        );
        Ok(VectorIndex { dimension, vectors, ids, trees })
    }
}

/// Keep the first occurrence of each exact vector value.
fn dedup(vectors: Vec<Vec<f32>>, ids: Vec<VectorId>) -> (Vec<Vec<f32>>, Vec<VectorId>) {
    let mut seen = HashSet::new();
    let mut out = (Vec::new(), Vec::new());
    for (v, id) in vectors.into_iter().zip(ids) {
        let bits: Vec<u32> = v.iter().map(|x| x.to_bits()).collect();
        if seen.insert(bits) {
            out.0.push(v);
            out.1.push(id);
        }
    }
    out
}

fn split(vectors: &[Vec<f32>], slots: Vec<u32>, max_leaf: usize, rng: &mut StdRng) -> Node {
    if slots.len() <= max_leaf {
        return Node::Leaf(slots);
    }
    let i = rng.random_range(0..slots.len());
    let mut j = rng.random_range(0..slots.len() - 1);
    if j >= i {
        j += 1;
    }
    let plane = Hyperplane::bisecting(&vectors[slots[i] as usize], &vectors[slots[j] as usize]);
    let (above, below): (Vec<u32>, Vec<u32>) = slots.iter().copied().partition(|s| plane.is_above(&vectors[*s as usize]));
    if above.is_empty() || below.is_empty() {
        return Node::Leaf(slots);
    }
    Node::Inner {
        below: Box::new(split(vectors, below, max_leaf, rng)),
        above: Box::new(split(vectors, above, max_leaf, rng)),
        plane,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    ids: Vec<VectorId>,
    trees: Vec<Node>,
}

impl VectorIndex {
    pub fn builder() -> VectorIndexBuilder { VectorIndexBuilder::new() }

    pub fn dimension(&self) -> usize { self.dimension }

    /// Vectors held after deduplication.
    pub fn len(&self) -> usize { self.vectors.len() }

    pub fn is_empty(&self) -> bool { self.vectors.is_empty() }

    pub fn num_trees(&self) -> usize { self.trees.len() }

    /// Approximate `k` nearest neighbours of `query`, closest first.
    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<Candidate>> {
        self.query_many(std::slice::from_ref(&query.to_vec()), k)
    }

    /// The `k` closest vectors to any of `queries`.
    pub fn query_many(&self, queries: &[Vec<f32>], k: usize) -> Result<Vec<Candidate>> {
        if let Some(q) = queries.iter().find(|q| q.len() != self.dimension) {
            return Err(SearchyError::Validation(format!(
                "query has dimension {}, index has {}", q.len(), self.dimension
            )));
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let mut slots = HashSet::new();
        for q in queries {
            for tree in &self.trees {
                collect(tree, q, k, &mut slots);
            }
        }
        let mut ranked: Vec<Candidate> = slots
            .into_iter()
            .map(|s| {
                let v = &self.vectors[s as usize];
                let distance = queries.iter().map(|q| squared_distance(v, q)).fold(f32::INFINITY, f32::min);
                Candidate { id: self.ids[s as usize], distance }
            })
            .collect();
        ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        ranked.truncate(k);
        Ok(ranked)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> { Ok(bincode::serialize(self)?) }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> { Ok(bincode::deserialize(bytes)?) }

    /// Write as gzip-compressed bincode.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut enc = GzEncoder::new(BufWriter::new(File::create(path)?), Compression::default());
        bincode::serialize_into(&mut enc, self)?;
        enc.finish()?.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let dec = GzDecoder::new(BufReader::new(File::open(path)?));
        Ok(bincode::deserialize_from(dec)?)
    }
}

/// Gather slots from `node`, preferring the query's side and visiting the
/// other side only while fewer than `n` were found. Leaves contribute whole.
fn collect(node: &Node, query: &[f32], n: usize, out: &mut HashSet<u32>) -> usize {
    match node {
        Node::Leaf(slots) => {
            out.extend(slots);
            slots.len()
        }
        Node::Inner { plane, below, above } => {
            let (main, backup) = if plane.is_above(query) { (above, below) } else { (below, above) };
            let found = collect(main, query, n, out);
            if found < n {
                found + collect(backup, query, n - found, out)
            } else {
                found
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> (Vec<Vec<f32>>, Vec<VectorId>) {
        let mut vs = Vec::new();
        for x in 0..10 {
            for y in 0..10 {
                vs.push(vec![x as f32, y as f32]);
            }
        }
        let ids = (0..vs.len() as u64).collect();
        (vs, ids)
    }

    fn index(trees: usize, leaf: usize) -> VectorIndex {
        let (vs, ids) = grid();
        let mut b = VectorIndex::builder().num_trees(trees).max_leaf_size(leaf).seed(7);
        b.add_all(vs, ids).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn bisecting_plane_separates_its_points() {
        let plane = Hyperplane::bisecting(&[2.0, 0.0], &[0.0, 0.0]);
        assert!(plane.is_above(&[2.0, 0.0]));
        assert!(!plane.is_above(&[0.0, 0.0]));
        assert!(plane.is_above(&[1.0, 5.0]));
    }

    #[test]
    fn exact_match_is_first() {
        let idx = index(10, 5);
        let hits = idx.query(&[3.0, 4.0], 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, 34);
        assert_eq!(hits[0].distance, 0.0);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn single_leaf_is_exact() {
        let idx = index(1, 1000);
        let hits = idx.query(&[0.1, 0.1], 4).unwrap();
        let ids: Vec<_> = hits.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 1, 10, 11]);
    }

    #[test]
    fn seeded_builds_agree() {
        let a = index(4, 3).query(&[5.5, 2.5], 5).unwrap();
        let b = index(4, 3).query(&[5.5, 2.5], 5).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn dimension_checks() {
        let mut b = VectorIndexBuilder::new();
        b.add(vec![1.0, 2.0], 1).unwrap();
        assert!(matches!(b.add(vec![1.0], 2), Err(SearchyError::Validation(_))));
        assert!(matches!(b.add_all(vec![vec![0.0, 0.0]], vec![]), Err(SearchyError::Validation(_))));
        let idx = b.build().unwrap();
        assert!(matches!(idx.query(&[1.0], 1), Err(SearchyError::Validation(_))));
    }

    #[test]
    fn duplicates_dropped() {
        let mut b = VectorIndexBuilder::new();
        b.add_all(vec![vec![1.0], vec![1.0], vec![2.0]], vec![10, 11, 12]).unwrap();
        let idx = b.build().unwrap();
        assert_eq!(idx.len(), 2);
        let ids: Vec<_> = idx.query(&[1.0], 5).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![10, 12]);
    }

    #[test]
    fn query_many_takes_closest_to_any() {
        let idx = index(1, 1000);
        let hits = idx.query_many(&[vec![0.0, 0.0], vec![9.0, 9.0]], 2).unwrap();
        let ids: Vec<_> = hits.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 99]);
    }

    #[test]
    fn gzip_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");
        let idx = index(3, 4);
        idx.save(&path).unwrap();
        let back = VectorIndex::load(&path).unwrap();
        assert_eq!(back.len(), idx.len());
        assert_eq!(back.query(&[2.0, 2.0], 3).unwrap(), idx.query(&[2.0, 2.0], 3).unwrap());
    }
}
