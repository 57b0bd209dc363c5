//! Compressed sparse row (CSR) matrices.
//!
//! [`SparseRowMatrix`] is the output of mapping-matrix construction and of
//! periodic-boundary linking. All constructors validate the CSR invariants:
//!
//! - `row_offsets.len() == rows + 1`
//! - `row_offsets[0] == 0` and `row_offsets[rows] == nnz`
//! - `row_offsets` is non-decreasing
//! - every column index is `< cols`

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// CSR invariant violations and shape errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SparseMatrixError {
    /// `row_offsets` has the wrong length.
    #[error("Row offset array has {actual} entries, expected rows + 1 = {expected}")]
    OffsetsLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
    /// `row_offsets` does not start at zero.
    #[error("First row offset is {value}, expected 0")]
    FirstOffsetNonZero {
        /// Offending offset.
        value: usize,
    },
    /// `row_offsets` decreases at `row`.
    #[error("Row offsets decrease at row {row}")]
    NonMonotonicOffsets {
        /// Row whose end offset is below its start.
        row: usize,
    },
    /// The last offset disagrees with the entry count.
    #[error("Last row offset is {last}, but there are {nnz} column indices")]
    LastOffsetMismatch {
        /// Final offset.
        last: usize,
        /// Column index count.
        nnz: usize,
    },
    /// `values` and `column_indices` differ in length.
    #[error("{values} values for {columns} column indices")]
    ValuesLength {
        /// Value count.
        values: usize,
        /// Column index count.
        columns: usize,
    },
    /// A column index is out of range.
    #[error("Row {row} references column {column}, but the matrix has {cols} columns")]
    ColumnOutOfRange {
        /// Row containing the entry.
        row: usize,
        /// Offending column.
        column: usize,
        /// Column count.
        cols: usize,
    },
    /// A vector has the wrong length for a product.
    #[error("Vector of length {actual} cannot multiply a matrix with {expected} columns")]
    DimensionMismatch {
        /// Column count.
        expected: usize,
        /// Vector length.
        actual: usize,
    },
}

// =============================================================================
// SPARSE ROW MATRIX
// =============================================================================

#[derive(Deserialize)]
struct RawSparseRowMatrix {
    rows: usize,
    cols: usize,
    row_offsets: Vec<usize>,
    column_indices: Vec<usize>,
    values: Vec<f64>,
}

/// A validated CSR matrix of `f64` values.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::sparse::SparseRowMatrix;
///
/// // [[1, 0, 2],
/// //  [0, 0, 0],
/// //  [0, 3, 0]]
/// let m = SparseRowMatrix::new(3, 3, vec![0, 2, 2, 3], vec![0, 2, 1], vec![1.0, 2.0, 3.0]).unwrap();
/// assert_eq!(m.nnz(), 3);
/// assert_eq!(m.multiply(&[1.0, 1.0, 1.0]).unwrap(), vec![3.0, 0.0, 3.0]);
/// assert!(m.row(1).next().is_none());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSparseRowMatrix")]
pub struct SparseRowMatrix {
    rows: usize,
    cols: usize,
    row_offsets: Vec<usize>,
    column_indices: Vec<usize>,
    values: Vec<f64>,
}

impl TryFrom<RawSparseRowMatrix> for SparseRowMatrix {
    type Error = SparseMatrixError;

    fn try_from(raw: RawSparseRowMatrix) -> Result<Self, Self::Error> {
        Self::new(
            raw.rows,
            raw.cols,
            raw.row_offsets,
            raw.column_indices,
            raw.values,
        )
    }
}

impl SparseRowMatrix {
    /// Builds a matrix from raw CSR arrays.
    ///
    /// # Errors
    ///
    /// Returns a [`SparseMatrixError`] describing the first violated invariant.
    pub fn new(
        rows: usize,
        cols: usize,
        row_offsets: Vec<usize>,
        column_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, SparseMatrixError> {
        let matrix = Self {
            rows,
            cols,
            row_offsets,
            column_indices,
            values,
        };
        matrix.validate()?;
        Ok(matrix)
    }

    /// A `rows × cols` matrix with no entries.
    #[must_use]
    pub fn empty(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            row_offsets: vec![0; rows + 1],
            column_indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Square adjacency matrix with value `1.0` at every `(row, col)` pair.
    ///
    /// Pairs may be unsorted and repeated; they are sorted and deduplicated.
    ///
    /// # Errors
    ///
    /// Returns [`SparseMatrixError::ColumnOutOfRange`] if an index is `>= n`.
    pub fn from_pairs(n: usize, mut pairs: Vec<(usize, usize)>) -> Result<Self, SparseMatrixError> {
        pairs.sort_unstable();
        pairs.dedup();
        let mut builder = CsrBuilder::with_capacity(n, n, pairs.len());
        let mut iter = pairs.into_iter().peekable();
        for row in 0..n {
            while let Some(&(r, c)) = iter.peek() {
                if r != row {
                    break;
                }
                builder.push(c, 1.0);
                iter.next();
            }
            builder.finish_row();
        }
        if let Some((row, column)) = iter.next() {
            return Err(SparseMatrixError::ColumnOutOfRange {
                row,
                column,
                cols: n,
            });
        }
        builder.build()
    }

    /// Checks every CSR invariant.
    ///
    /// # Errors
    ///
    /// Returns a [`SparseMatrixError`] describing the first violated invariant.
    pub fn validate(&self) -> Result<(), SparseMatrixError> {
        if self.row_offsets.len() != self.rows + 1 {
            return Err(SparseMatrixError::OffsetsLength {
                expected: self.rows + 1,
                actual: self.row_offsets.len(),
            });
        }
        if self.row_offsets[0] != 0 {
            return Err(SparseMatrixError::FirstOffsetNonZero {
                value: self.row_offsets[0],
            });
        }
        if let Some(row) = self.row_offsets.windows(2).position(|w| w[1] < w[0]) {
            return Err(SparseMatrixError::NonMonotonicOffsets { row });
        }
        let last = self.row_offsets[self.rows];
        if last != self.column_indices.len() {
            return Err(SparseMatrixError::LastOffsetMismatch {
                last,
                nnz: self.column_indices.len(),
            });
        }
        if self.values.len() != self.column_indices.len() {
            return Err(SparseMatrixError::ValuesLength {
                values: self.values.len(),
                columns: self.column_indices.len(),
            });
        }
        for row in 0..self.rows {
            for k in self.row_offsets[row]..self.row_offsets[row + 1] {
                let column = self.column_indices[k];
                if column >= self.cols {
                    return Err(SparseMatrixError::ColumnOutOfRange {
                        row,
                        column,
                        cols: self.cols,
                    });
                }
            }
        }
        Ok(())
    }

    /// Number of rows.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Number of stored entries.
    #[must_use]
    pub const fn nnz(&self) -> usize {
        self.column_indices.len()
    }

    /// Row offset array (`rows + 1` entries).
    #[must_use]
    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    /// Column index array.
    #[must_use]
    pub fn column_indices(&self) -> &[usize] {
        &self.column_indices
    }

    /// Value array.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of entries in `row`.
    #[must_use]
    pub fn row_len(&self, row: usize) -> usize {
        self.row_offsets[row + 1] - self.row_offsets[row]
    }

    /// `(column, value)` entries of `row`.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.row_offsets[row]..self.row_offsets[row + 1];
        self.column_indices[range.clone()]
            .iter()
            .copied()
            .zip(self.values[range].iter().copied())
    }

    /// Column indices of `row`.
    #[must_use]
    pub fn row_columns(&self, row: usize) -> &[usize] {
        &self.column_indices[self.row_offsets[row]..self.row_offsets[row + 1]]
    }

    /// Sum of the values in `row`.
    #[must_use]
    pub fn row_sum(&self, row: usize) -> f64 {
        self.row(row).map(|(_, v)| v).sum()
    }

    /// Value at `(row, col)`; zero if absent (duplicates are summed).
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.row(row)
            .filter(|&(c, _)| c == col)
            .map(|(_, v)| v)
            .sum()
    }

    /// Matrix–vector product.
    ///
    /// # Errors
    ///
    /// Returns [`SparseMatrixError::DimensionMismatch`] if `x.len() != cols`.
    pub fn multiply(&self, x: &[f64]) -> Result<Vec<f64>, SparseMatrixError> {
        if x.len() != self.cols {
            return Err(SparseMatrixError::DimensionMismatch {
                expected: self.cols,
                actual: x.len(),
            });
        }
        Ok((0..self.rows)
            .map(|row| self.row(row).map(|(c, v)| v * x[c]).sum())
            .collect())
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Row-by-row CSR assembly.
///
/// Used by the sequential compaction stages: entries are pushed for the
/// current row, then [`CsrBuilder::finish_row`] closes it.
#[derive(Clone, Debug)]
pub struct CsrBuilder {
    rows: usize,
    cols: usize,
    row_offsets: Vec<usize>,
    column_indices: Vec<usize>,
    values: Vec<f64>,
}

impl CsrBuilder {
    /// Starts a `rows × cols` matrix, reserving room for `nnz` entries.
    #[must_use]
    pub fn with_capacity(rows: usize, cols: usize, nnz: usize) -> Self {
        let mut row_offsets = Vec::with_capacity(rows + 1);
        row_offsets.push(0);
        Self {
            rows,
            cols,
            row_offsets,
            column_indices: Vec::with_capacity(nnz),
            values: Vec::with_capacity(nnz),
        }
    }

    /// Appends an entry to the current row.
    pub fn push(&mut self, column: usize, value: f64) {
        self.column_indices.push(column);
        self.values.push(value);
    }

    /// Closes the current row.
    pub fn finish_row(&mut self) {
        self.row_offsets.push(self.column_indices.len());
    }

    /// Validates and returns the matrix.
    ///
    /// # Errors
    ///
    /// Returns a [`SparseMatrixError`] if fewer or more rows than declared were
    /// finished or a column is out of range.
    pub fn build(self) -> Result<SparseRowMatrix, SparseMatrixError> {
        SparseRowMatrix::new(
            self.rows,
            self.cols,
            self.row_offsets,
            self.column_indices,
            self.values,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_each_invariant() {
        assert_eq!(
            SparseRowMatrix::new(2, 2, vec![0, 1], vec![0], vec![1.0]).unwrap_err(),
            SparseMatrixError::OffsetsLength {
                expected: 3,
                actual: 2
            }
        );
        assert_eq!(
            SparseRowMatrix::new(1, 2, vec![1, 1], vec![0], vec![1.0]).unwrap_err(),
            SparseMatrixError::FirstOffsetNonZero { value: 1 }
        );
        assert_eq!(
            SparseRowMatrix::new(2, 2, vec![0, 2, 1], vec![0], vec![1.0]).unwrap_err(),
            SparseMatrixError::NonMonotonicOffsets { row: 1 }
        );
        assert_eq!(
            SparseRowMatrix::new(1, 2, vec![0, 2], vec![0], vec![1.0]).unwrap_err(),
            SparseMatrixError::LastOffsetMismatch { last: 2, nnz: 1 }
        );
        assert_eq!(
            SparseRowMatrix::new(1, 2, vec![0, 1], vec![0], vec![]).unwrap_err(),
            SparseMatrixError::ValuesLength {
                values: 0,
                columns: 1
            }
        );
        assert_eq!(
            SparseRowMatrix::new(1, 2, vec![0, 1], vec![2], vec![1.0]).unwrap_err(),
            SparseMatrixError::ColumnOutOfRange {
                row: 0,
                column: 2,
                cols: 2
            }
        );
    }

    #[test]
    fn test_from_pairs_sorts_and_dedups() {
        let m = SparseRowMatrix::from_pairs(3, vec![(2, 0), (0, 1), (0, 1), (0, 0)]).unwrap();
        assert_eq!(m.row_offsets(), &[0, 2, 2, 3]);
        assert_eq!(m.column_indices(), &[0, 1, 0]);
        assert!(m.values().iter().all(|&v| v == 1.0));
        assert!(SparseRowMatrix::from_pairs(2, vec![(0, 5)]).is_err());
        assert!(SparseRowMatrix::from_pairs(2, vec![(4, 0)]).is_err());
    }

    #[test]
    fn test_builder_and_product() {
        let mut b = CsrBuilder::with_capacity(2, 3, 3);
        b.push(0, 0.5);
        b.push(2, 0.5);
        b.finish_row();
        b.push(1, 2.0);
        b.finish_row();
        let m = b.build().unwrap();
        assert_eq!(m.multiply(&[2.0, 1.0, 4.0]).unwrap(), vec![3.0, 2.0]);
        assert_eq!(m.get(0, 2), 0.5);
        assert_eq!(m.get(1, 0), 0.0);
        assert_eq!(m.row_sum(0), 1.0);
        assert!(matches!(
            m.multiply(&[1.0]),
            Err(SparseMatrixError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_serde_validates() {
        let m = SparseRowMatrix::empty(2, 4);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(serde_json::from_str::<SparseRowMatrix>(&json).unwrap(), m);
        let bad = r#"{"rows":1,"cols":1,"row_offsets":[0,1],"column_indices":[3],"values":[1.0]}"#;
        assert!(serde_json::from_str::<SparseRowMatrix>(bad).is_err());
    }
}
