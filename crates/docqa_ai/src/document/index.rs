//! Exact (brute-force) vector index for one document generation.
//!
//! Ranking is deterministic: identical query and index state always give the
//! same ordering, with equal distances broken by ascending key. No approximate
//! structure is provided.

use docqa_core::config::DistanceMetric;
use docqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::similarity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Neighbor {
    /// Chunk sequence index.
    pub key: u32,
    pub distance: f32,
}

#[derive(Debug, Clone)]
pub struct ExactIndex {
    metric: DistanceMetric,
    dims: usize,
    keys: Vec<u32>,
    vectors: Vec<Vec<f32>>,
    norms: Vec<f32>,
}

impl ExactIndex {
    pub fn build(
        metric: DistanceMetric,
        mut entries: Vec<(u32, Vec<f32>)>,
    ) -> Result<Self, AppError> {
        entries.sort_by_key(|(k, _)| *k);

        let dims = entries.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut keys = Vec::with_capacity(entries.len());
        let mut vectors = Vec::with_capacity(entries.len());
        let mut norms = Vec::with_capacity(entries.len());

        for (key, v) in entries {
            if keys.last() == Some(&key) {
                return Err(AppError::new(
                    "RAG_INDEXING_DUPLICATE_KEY",
                    "Index entries must have unique keys",
                )
                .with_details(format!("key={key}")));
            }
            if v.len() != dims {
                return Err(AppError::new(
                    "RAG_INDEXING_DIMENSION_MISMATCH",
                    "All index vectors must share one dimensionality",
                )
                .with_details(format!("key={key}; expected={dims}; got={}", v.len())));
            }
            if dims == 0 || v.iter().any(|x| !x.is_finite()) {
                return Err(AppError::new(
                    "RAG_INDEXING_INVALID_VECTOR",
                    "Index vectors must be non-empty and finite",
                )
                .with_details(format!("key={key}")));
            }
            let norm = similarity::l2_norm(&v);
            if metric == DistanceMetric::Cosine && norm == 0.0 {
                return Err(AppError::new(
                    "RAG_INDEXING_INVALID_VECTOR",
                    "Cosine index vectors must have a non-zero norm",
                )
                .with_details(format!("key={key}")));
            }
            keys.push(key);
            vectors.push(v);
            norms.push(norm);
        }

        Ok(Self {
            metric,
            dims,
            keys,
            vectors,
            norms,
        })
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn vector(&self, key: u32) -> Option<&[f32]> {
        self.keys
            .binary_search(&key)
            .ok()
            .map(|i| self.vectors[i].as_slice())
    }

    /// Up to `k` nearest entries, best first. `metric` must be the build metric.
    pub fn search(
        &self,
        metric: DistanceMetric,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, AppError> {
        if metric != self.metric {
            return Err(AppError::new(
                "RAG_RETRIEVAL_METRIC_MISMATCH",
                "Search metric differs from the metric the index was built with",
            )
            .with_details(format!(
                "index_metric={}; search_metric={}",
                self.metric.as_str(),
                metric.as_str()
            )));
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            return Err(AppError::new(
                "RAG_RETRIEVAL_DIMENSION_MISMATCH",
                "Query embedding dims do not match index dims",
            )
            .with_details(format!("index_dims={}; query_dims={}", self.dims, query.len())));
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(AppError::new(
                "RAG_RETRIEVAL_FAILED",
                "Query embedding contains non-finite values",
            ));
        }

        let mut hits: Vec<Neighbor> = match self.metric {
            DistanceMetric::Cosine => {
                let qnorm = similarity::l2_norm(query);
                if qnorm == 0.0 {
                    return Err(AppError::new(
                        "RAG_RETRIEVAL_FAILED",
                        "Query embedding norm is zero",
                    ));
                }
                self.keys
                    .iter()
                    .zip(self.vectors.iter().zip(self.norms.iter()))
                    .map(|(&key, (v, &vnorm))| Neighbor {
                        key,
                        distance: 1.0 - similarity::cosine_similarity(query, v, qnorm, vnorm),
                    })
                    .collect()
            }
            DistanceMetric::SquaredEuclidean => self
                .keys
                .iter()
                .zip(self.vectors.iter())
                .map(|(&key, v)| Neighbor {
                    key,
                    distance: similarity::squared_euclidean(query, v),
                })
                .collect(),
        };

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.key.cmp(&b.key)));
        hits.truncate(k.min(self.len()));
        Ok(hits)
    }
}

/// Map a distance to the relevance space used by the retrieval floor:
/// cosine similarity for cosine, `1 / (1 + d)` for squared Euclidean.
pub fn relevance(metric: DistanceMetric, distance: f32) -> f32 {
    match metric {
        DistanceMetric::Cosine => 1.0 - distance,
        DistanceMetric::SquaredEuclidean => 1.0 / (1.0 + distance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn keys(hits: &[Neighbor]) -> Vec<u32> {
        hits.iter().map(|h| h.key).collect()
    }

    #[test]
    fn ranks_by_distance_then_key() {
        let idx = ExactIndex::build(
            DistanceMetric::Cosine,
            vec![
                (2, vec![1.0, 0.0]),
                (0, vec![0.0, 1.0]),
                (1, vec![2.0, 0.0]),
                (3, vec![1.0, 1.0]),
            ],
        )
        .expect("build");
        let hits = idx.search(DistanceMetric::Cosine, &[1.0, 0.0], 10).expect("search");
        // 1 and 2 are both parallel to the query; the lower key wins the tie.
        assert_eq!(keys(&hits), vec![1, 2, 3, 0]);
        assert!(hits[0].distance.abs() < 1e-6);
        assert!((relevance(DistanceMetric::Cosine, hits[3].distance)).abs() < 1e-6);
    }

    #[test]
    fn k_is_clamped_and_empty_index_returns_nothing() {
        let idx = ExactIndex::build(DistanceMetric::SquaredEuclidean, vec![(0, vec![1.0])])
            .expect("build");
        let hits = idx.search(DistanceMetric::SquaredEuclidean, &[3.0], 5).expect("search");
        assert_eq!(hits, vec![Neighbor { key: 0, distance: 4.0 }]);
        assert_eq!(relevance(DistanceMetric::SquaredEuclidean, 4.0), 0.2);

        let empty = ExactIndex::build(DistanceMetric::Cosine, Vec::new()).expect("empty");
        assert!(empty.search(DistanceMetric::Cosine, &[1.0, 2.0], 3).expect("search").is_empty());
    }

    #[test]
    fn metric_mismatch_fails_fast() {
        let idx = ExactIndex::build(DistanceMetric::Cosine, vec![(0, vec![1.0, 0.0])]).expect("build");
        let err = idx
            .search(DistanceMetric::SquaredEuclidean, &[1.0, 0.0], 1)
            .expect_err("mismatch");
        assert_eq!(err.code, "RAG_RETRIEVAL_METRIC_MISMATCH");
    }

    #[test]
    fn build_rejects_inconsistent_entries() {
        let err = ExactIndex::build(DistanceMetric::Cosine, vec![(0, vec![1.0]), (1, vec![1.0, 2.0])])
            .expect_err("dims");
        assert_eq!(err.code, "RAG_INDEXING_DIMENSION_MISMATCH");

        let err = ExactIndex::build(DistanceMetric::Cosine, vec![(0, vec![1.0]), (0, vec![2.0])])
            .expect_err("dup");
        assert_eq!(err.code, "RAG_INDEXING_DUPLICATE_KEY");

        let err = ExactIndex::build(DistanceMetric::Cosine, vec![(0, vec![0.0, 0.0])])
            .expect_err("zero");
        assert_eq!(err.code, "RAG_INDEXING_INVALID_VECTOR");

        let err = ExactIndex::build(DistanceMetric::SquaredEuclidean, vec![(0, vec![f32::NAN])])
            .expect_err("nan");
        assert_eq!(err.code, "RAG_INDEXING_INVALID_VECTOR");
    }

    #[test]
    fn query_dims_must_match() {
        let idx = ExactIndex::build(DistanceMetric::Cosine, vec![(0, vec![1.0, 0.0])]).expect("build");
        let err = idx.search(DistanceMetric::Cosine, &[1.0], 1).expect_err("dims");
        assert_eq!(err.code, "RAG_RETRIEVAL_DIMENSION_MISMATCH");
    }
}
