//! Sparse `label index:value ...` text format.
//!
//! Each non-blank line holds one record: an integer label followed by one or
//! more `index:value` tokens with 1-based feature indices. Records are
//! densified to as many columns as the largest index seen; absent features
//! read as `0.0`. The dense matrix is capped at [`MAX_CELLS`] entries.

use std::fs;
use std::path::Path;

use ndarray::Array2;

use super::{Dataset, DatasetError};

/// Largest dense matrix, in `f32` cells, a file may expand to.
pub const MAX_CELLS: usize = 1 << 28;

/// Reads and parses a whole file before any graph work starts.
pub fn load_libsvm<P: AsRef<Path>>(path: P) -> Result<Dataset, DatasetError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_libsvm(&text)
}

pub fn parse_libsvm(text: &str) -> Result<Dataset, DatasetError> {
    let mut labels = Vec::new();
    let mut records: Vec<Vec<(usize, f32)>> = Vec::new();
    let mut n_features = 0;

    for (line_no, line) in text.lines().enumerate() {
        let line_no = line_no + 1;
        let mut tokens = line.split_whitespace();
        let Some(label) = tokens.next() else {
            continue;
        };
        let label: i32 = label.parse().map_err(|_| DatasetError::Parse {
            line: line_no,
            message: format!("label `{label}` is not an integer"),
        })?;

        let features = tokens
            .map(|token| parse_feature(token, line_no))
            .collect::<Result<Vec<_>, _>>()?;
        if features.is_empty() {
            return Err(DatasetError::Parse {
                line: line_no,
                message: "record has no features".into(),
            });
        }
        if let Some(max) = features.iter().map(|(index, _)| *index).max() {
            n_features = n_features.max(max);
        }
        let records_so_far = labels.len() + 1;
        if !records_so_far
            .checked_mul(n_features)
            .map_or(false, |cells| cells <= MAX_CELLS)
        {
            return Err(DatasetError::Parse {
                line: line_no,
                message: format!(
                    "{records_so_far} records of {n_features} features exceed {MAX_CELLS} dense cells"
                ),
            });
        }
        labels.push(label);
        records.push(features);
    }

    let mut matrix = Array2::<f32>::zeros((records.len(), n_features));
    for (row, features) in records.iter().enumerate() {
        for &(index, value) in features {
            matrix[(row, index - 1)] = value;
        }
    }
    Dataset::new(labels, matrix)
}

fn parse_feature(token: &str, line: usize) -> Result<(usize, f32), DatasetError> {
    let parse_error = |message: String| DatasetError::Parse { line, message };
    let (index, value) = token
        .split_once(':')
        .ok_or_else(|| parse_error(format!("token `{token}` is not index:value")))?;
    let index: usize = index
        .parse()
        .map_err(|_| parse_error(format!("feature index `{index}` is not a positive integer")))?;
    if index == 0 {
        return Err(parse_error("feature indices start at 1".into()));
    }
    let value: f32 = value
        .parse()
        .map_err(|_| parse_error(format!("feature value `{value}` is not a number")))?;
    Ok((index, value))
}
