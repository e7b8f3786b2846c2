//! Two-dimensional extents and coordinates.
//!
//! Every ensemble is a `rows x cols` grid. Neurons are stored row-major, so the
//! linear position of `Index { row, col }` inside a [`Shape`] is
//! `row * cols + col`.

use std::fmt::{self, Display};

use serde::Serialize;

use crate::error::{Error, Result};

/// Extent of an ensemble. Both dimensions are at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Shape {
    rows: usize,
    cols: usize,
}

impl Shape {
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidShape { rows, cols });
        }
        Ok(Self { rows, cols })
    }

    /// A single row of `len` neurons.
    pub fn flat(len: usize) -> Result<Self> {
        Self::new(1, len)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn size(&self) -> usize {
        self.rows * self.cols
    }

    pub fn contains(&self, index: Index) -> bool {
        index.row < self.rows && index.col < self.cols
    }

    /// Fails with [`Error::IndexOutOfBounds`] unless `index` lies inside the shape.
    pub fn check(&self, index: Index) -> Result<()> {
        if self.contains(index) {
            Ok(())
        } else {
            Err(Error::IndexOutOfBounds {
                index,
                shape: *self,
            })
        }
    }

    /// Row-major position of `index`. The index must lie inside the shape.
    #[inline]
    pub fn linear(&self, index: Index) -> usize {
        debug_assert!(self.contains(index));
        index.row * self.cols + index.col
    }

    /// Inverse of [`Shape::linear`].
    #[inline]
    pub fn index_of(&self, position: usize) -> Index {
        debug_assert!(position < self.size());
        Index::new(position / self.cols, position % self.cols)
    }

    /// All indices in row-major order.
    pub fn indices(&self) -> impl Iterator<Item = Index> + '_ {
        (0..self.size()).map(move |position| self.index_of(position))
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// Coordinate inside some ensemble's [`Shape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Index {
    pub row: usize,
    pub col: usize,
}

impl Index {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

impl From<(usize, usize)> for Index {
    fn from((row, col): (usize, usize)) -> Self {
        Self::new(row, col)
    }
}
