//! Training data handed to the network from outside the graph.
//!
//! The graph itself never reads files. A [`Dataset`] is built up front, here by
//! the sparse text reader in [`libsvm`], and instances are bound into the input
//! ensemble one at a time.

pub mod libsvm;

use std::path::PathBuf;

use ndarray::{Array2, ArrayView2};
use thiserror::Error;

pub use libsvm::{load_libsvm, parse_libsvm};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("record {record} has {found} features, expected {expected}")]
    Ragged {
        record: usize,
        expected: usize,
        found: usize,
    },
    #[error("{labels} labels for {rows} feature rows")]
    LabelCount { labels: usize, rows: usize },
}

/// Labels with a dense feature matrix, one row per record.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    labels: Vec<i32>,
    features: Array2<f32>,
}

impl Dataset {
    pub fn new(labels: Vec<i32>, features: Array2<f32>) -> Result<Self, DatasetError> {
        if labels.len() != features.nrows() {
            return Err(DatasetError::LabelCount {
                labels: labels.len(),
                rows: features.nrows(),
            });
        }
        Ok(Self {
            labels,
            features: features.as_standard_layout().into_owned(),
        })
    }

    /// Builds from per-record feature vectors, which must all have one length.
    pub fn from_rows(labels: Vec<i32>, rows: Vec<Vec<f32>>) -> Result<Self, DatasetError> {
        let width = rows.first().map_or(0, Vec::len);
        if let Some((record, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(DatasetError::Ragged {
                record,
                expected: width,
                found: row.len(),
            });
        }
        let mut features = Array2::zeros((rows.len(), width));
        for (mut target, row) in features.rows_mut().into_iter().zip(&rows) {
            for (slot, value) in target.iter_mut().zip(row) {
                *slot = *value;
            }
        }
        Self::new(labels, features)
    }

    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    /// Feature vector of record `record`.
    pub fn instance(&self, record: usize) -> &[f32] {
        self.features
            .row(record)
            .to_slice()
            .expect("dataset keeps features in standard layout")
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    /// Number of labels read, one per record.
    pub fn n_labels(&self) -> usize {
        self.labels.len()
    }

    /// Distinct labels in ascending order.
    pub fn classes(&self) -> Vec<i32> {
        let mut classes = self.labels.clone();
        classes.sort_unstable();
        classes.dedup();
        classes
    }

    /// Each label replaced by its position in [`Dataset::classes`].
    pub fn class_indices(&self) -> Vec<usize> {
        let classes = self.classes();
        self.labels
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or_default())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rows_requires_uniform_width() {
        let err = Dataset::from_rows(vec![0, 1], vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::Ragged {
                record: 1,
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn label_count_must_match_rows() {
        assert!(matches!(
            Dataset::new(vec![1], Array2::zeros((2, 3))),
            Err(DatasetError::LabelCount { labels: 1, rows: 2 })
        ));
    }

    #[test]
    fn class_indices_follow_sorted_labels() {
        let data = Dataset::from_rows(
            vec![1, -1, 3, 1],
            vec![vec![0.0], vec![0.0], vec![0.0], vec![0.0]],
        )
        .unwrap();
        assert_eq!(data.classes(), vec![-1, 1, 3]);
        assert_eq!(data.class_indices(), vec![1, 0, 2, 1]);
    }

    #[test]
    fn instance_returns_row() {
        let data = Dataset::from_rows(vec![0, 1], vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(data.instance(1), &[3.0, 4.0]);
        assert_eq!(data.n_features(), 2);
        assert_eq!(data.n_labels(), 2);
    }
}
