//! Exact nearest-neighbour search under Euclidean distance.
//!
//! Two backends share one ordering law: ascending distance, ties broken by
//! ascending position. [`SearchBackend::Simd`] builds a [`FlatL2Index`] over
//! the candidate rows and scores them with simsimd; [`SearchBackend::BruteForce`]
//! computes distances in plain Rust. Any failure of the SIMD path is logged
//! and answered by brute force.

use rkyv::{Archive, Deserialize, Serialize};
use std::cmp::Ordering;

/// Row-major matrix of embeddings, row `i` belonging to record `i`.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct VectorMatrix {
    dimension: u32,
    data: Vec<f32>,
}

impl VectorMatrix {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension as u32,
            data: Vec::new(),
        }
    }

    pub fn with_capacity(dimension: usize, rows: usize) -> Self {
        Self {
            dimension: dimension as u32,
            data: Vec::with_capacity(dimension * rows),
        }
    }

    pub fn from_rows(dimension: usize, rows: &[Vec<f32>]) -> Result<Self, crate::Error> {
        let mut matrix = Self::with_capacity(dimension, rows.len());
        for row in rows {
            matrix.push(row)?;
        }
        Ok(matrix)
    }

    pub fn dimension(&self) -> usize {
        self.dimension as usize
    }

    pub fn len(&self) -> usize {
        match self.dimension() {
            0 => 0,
            dim => self.data.len() / dim,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, row: &[f32]) -> Result<(), crate::Error> {
        if row.len() != self.dimension() {
            return Err(crate::Error::DimensionMismatch {
                expected: self.dimension(),
                actual: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn row(&self, position: usize) -> Option<&[f32]> {
        let dim = self.dimension();
        let start = position.checked_mul(dim)?;
        self.data.get(start..start + dim)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension().max(1))
    }

    /// Copy of the given rows, in the given order. Out-of-range positions
    /// are skipped.
    pub fn subset(&self, positions: &[usize]) -> Self {
        let mut subset = Self::with_capacity(self.dimension(), positions.len());
        for row in positions.iter().filter_map(|&p| self.row(p)) {
            subset.data.extend_from_slice(row);
        }
        subset
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

fn by_distance_then_position(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .partial_cmp(&b.distance)
        .unwrap_or(Ordering::Equal)
        .then(a.position.cmp(&b.position))
}

fn take_nearest(mut scored: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    scored.sort_by(by_distance_then_position);
    scored.truncate(k);
    scored
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Scan every row of `vectors`; positions are row indices.
pub fn brute_force_search(vectors: &VectorMatrix, query: &[f32], k: usize) -> Vec<Neighbor> {
    if k == 0 || query.len() != vectors.dimension() {
        return Vec::new();
    }

    let scored = vectors
        .rows()
        .enumerate()
        .map(|(position, row)| Neighbor {
            position,
            distance: euclidean_distance(row, query),
        })
        .collect();

    take_nearest(scored, k)
}

/// Flat exact-L2 index scored with SIMD kernels. This is the on-disk
/// `memory.index` artifact.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct FlatL2Index {
    vectors: VectorMatrix,
}

impl FlatL2Index {
    pub fn build(vectors: VectorMatrix) -> Self {
        Self { vectors }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.vectors.dimension()
    }

    pub fn vectors(&self) -> &VectorMatrix {
        &self.vectors
    }

    /// The `k` nearest rows to `query`, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, crate::Error> {
        if query.len() != self.dimension() {
            return Err(crate::Error::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored = Vec::with_capacity(self.len());
        for (position, row) in self.vectors.rows().enumerate() {
            let squared = squared_l2(row, query)?;
            scored.push(Neighbor {
                position,
                distance: squared.max(0.0).sqrt(),
            });
        }

        Ok(take_nearest(scored, k))
    }
}

#[cfg(feature = "simd")]
fn squared_l2(a: &[f32], b: &[f32]) -> Result<f32, crate::Error> {
    use simsimd::SpatialSimilarity;

    // simsimd returns None for mismatched or empty inputs.
    <f32 as SpatialSimilarity>::l2sq(a, b)
        .map(|d| d as f32)
        .ok_or_else(|| crate::Error::Search("simsimd rejected vector pair".to_string()))
}

#[cfg(not(feature = "simd"))]
fn squared_l2(_a: &[f32], _b: &[f32]) -> Result<f32, crate::Error> {
    Err(crate::Error::Search(
        "simd feature not enabled".to_string(),
    ))
}

/// Search strategy, selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBackend {
    Simd,
    BruteForce,
}

impl SearchBackend {
    /// `Simd` when requested and compiled in, else `BruteForce`.
    pub fn detect(prefer_accelerated: bool) -> Self {
        if prefer_accelerated && cfg!(feature = "simd") {
            Self::Simd
        } else {
            Self::BruteForce
        }
    }

    pub fn is_accelerated(self) -> bool {
        matches!(self, Self::Simd)
    }

    /// Nearest `k` among `candidates` (positions into `vectors`), nearest
    /// first. Returned positions are positions into `vectors`; ties go to
    /// the lower position whatever the order of `candidates`. Duplicate and
    /// out-of-range candidates are ignored.
    ///
    /// `prebuilt` is an index over all of `vectors`, reused when the
    /// candidate set is every row.
    pub fn search(
        self,
        vectors: &VectorMatrix,
        candidates: &[usize],
        query: &[f32],
        k: usize,
        prebuilt: Option<&FlatL2Index>,
    ) -> Vec<Neighbor> {
        // Ascending positions, so subset row order is index order.
        let mut candidates: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&position| position < vectors.len())
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        if candidates.is_empty() || k == 0 {
            return Vec::new();
        }

        let subset = vectors.subset(&candidates);

        let local = match self {
            Self::Simd => {
                let covers_all = candidates.len() == vectors.len();
                let result = match prebuilt {
                    Some(index) if covers_all && index.len() == vectors.len() => {
                        index.search(query, k)
                    }
                    _ => FlatL2Index::build(subset.clone()).search(query, k),
                };
                match result {
                    Ok(neighbors) => neighbors,
                    Err(e) => {
                        tracing::warn!("Accelerated search failed, using brute force: {}", e);
                        brute_force_search(&subset, query, k)
                    }
                }
            }
            Self::BruteForce => brute_force_search(&subset, query, k),
        };

        local
            .into_iter()
            .filter_map(|n| {
                candidates.get(n.position).map(|&position| Neighbor {
                    position,
                    distance: n.distance,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[[f32; 2]]) -> VectorMatrix {
        let rows: Vec<Vec<f32>> = rows.iter().map(|r| r.to_vec()).collect();
        VectorMatrix::from_rows(2, &rows).unwrap()
    }

    fn positions(neighbors: &[Neighbor]) -> Vec<usize> {
        neighbors.iter().map(|n| n.position).collect()
    }

    #[test]
    fn test_nearest_first_with_known_distances() {
        // Distances from the origin: 0.1, 5.0, 2.0.
        let vectors = matrix(&[[0.1, 0.0], [3.0, 4.0], [0.0, 2.0]]);
        let query = [0.0, 0.0];

        for backend in [SearchBackend::BruteForce, SearchBackend::detect(true)] {
            let found = backend.search(&vectors, &[0, 1, 2], &query, 2, None);
            assert_eq!(positions(&found), vec![0, 2]);
            assert!((found[0].distance - 0.1).abs() < 1e-5);
            assert!((found[1].distance - 2.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_ties_break_by_position() {
        let vectors = matrix(&[[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0], [0.0, -1.0]]);
        let found = brute_force_search(&vectors, &[0.0, 0.0], 4);
        assert_eq!(positions(&found), vec![0, 1, 2, 3]);

        for backend in [SearchBackend::BruteForce, SearchBackend::detect(true)] {
            let found = backend.search(&vectors, &[3, 1], &[0.0, 0.0], 5, None);
            assert_eq!(positions(&found), vec![1, 3]);
        }
    }

    #[test]
    fn test_duplicate_and_out_of_range_candidates_are_ignored() {
        let vectors = matrix(&[[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0], [0.0, -1.0]]);
        for backend in [SearchBackend::BruteForce, SearchBackend::detect(true)] {
            let found = backend.search(&vectors, &[2, 0, 2, 9, 0], &[0.0, 0.0], 5, None);
            assert_eq!(positions(&found), vec![0, 2]);
        }

        // Every row, in scrambled order, still goes through the prebuilt index.
        let prebuilt = FlatL2Index::build(vectors.clone());
        let found =
            SearchBackend::Simd.search(&vectors, &[3, 2, 1, 0], &[0.0, 0.0], 2, Some(&prebuilt));
        assert_eq!(positions(&found), vec![0, 1]);
    }

    #[test]
    fn test_failed_accelerated_search_falls_back_to_brute_force() {
        let vectors = matrix(&[[4.0, 0.0], [1.0, 0.0]]);
        // Two rows of the wrong dimension: the prebuilt index rejects the query.
        let mismatched =
            FlatL2Index::build(VectorMatrix::from_rows(3, &[vec![0.0; 3], vec![0.0; 3]]).unwrap());
        assert!(mismatched.search(&[0.0, 0.0], 1).is_err());

        let found = SearchBackend::Simd.search(&vectors, &[0, 1], &[0.0, 0.0], 2, Some(&mismatched));
        assert_eq!(positions(&found), vec![1, 0]);
        assert!((found[0].distance - 1.0).abs() < 1e-5);
        assert!((found[1].distance - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_k_larger_than_candidates_returns_all() {
        let vectors = matrix(&[[5.0, 0.0], [1.0, 0.0], [3.0, 0.0]]);
        let found = SearchBackend::BruteForce.search(&vectors, &[0, 1, 2], &[0.0, 0.0], 10, None);
        assert_eq!(positions(&found), vec![1, 2, 0]);
    }

    #[test]
    fn test_empty_candidates_or_zero_k() {
        let vectors = matrix(&[[1.0, 0.0]]);
        assert!(SearchBackend::BruteForce
            .search(&vectors, &[], &[0.0, 0.0], 3, None)
            .is_empty());
        assert!(SearchBackend::detect(true)
            .search(&vectors, &[0], &[0.0, 0.0], 0, None)
            .is_empty());
    }

    #[test]
    fn test_subset_maps_back_to_original_positions() {
        let vectors = matrix(&[[0.0, 0.0], [9.0, 9.0], [1.0, 1.0], [2.0, 2.0]]);
        let found = SearchBackend::BruteForce.search(&vectors, &[1, 3], &[0.0, 0.0], 1, None);
        assert_eq!(positions(&found), vec![3]);
    }

    #[test]
    fn test_prebuilt_index_reused_for_full_candidate_set() {
        let vectors = matrix(&[[4.0, 0.0], [1.0, 0.0]]);
        let prebuilt = FlatL2Index::build(vectors.clone());
        let found = SearchBackend::Simd.search(&vectors, &[0, 1], &[0.0, 0.0], 1, Some(&prebuilt));
        assert_eq!(positions(&found), vec![1]);
    }

    #[test]
    fn test_push_rejects_wrong_dimension() {
        let mut vectors = VectorMatrix::new(3);
        assert!(vectors.push(&[1.0, 2.0]).is_err());
        vectors.push(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors.row(0), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(vectors.row(1), None);
    }

    #[test]
    fn test_query_dimension_mismatch_yields_nothing() {
        let vectors = matrix(&[[1.0, 0.0]]);
        assert!(brute_force_search(&vectors, &[1.0, 0.0, 0.0], 1).is_empty());
        assert!(FlatL2Index::build(vectors).search(&[1.0], 1).is_err());
    }
}
