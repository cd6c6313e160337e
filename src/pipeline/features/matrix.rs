use serde::{Deserialize, Serialize};

/// Sparse row-major matrix with a fixed column count.
/// Each row holds `(column, value)` pairs in ascending column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    n_cols: usize,
    rows: Vec<Vec<(usize, f64)>>,
}

impl FeatureMatrix {
    pub fn new(n_cols: usize) -> Self {
        Self {
            n_cols,
            rows: Vec::new(),
        }
    }

    /// Build from dense rows; zeros are not stored.
    pub fn from_dense(rows: &[Vec<f64>]) -> Self {
        let n_cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut matrix = Self::new(n_cols);
        for row in rows {
            matrix.push_row(
                row.iter()
                    .enumerate()
                    .filter(|(_, v)| **v != 0.0)
                    .map(|(j, v)| (j, *v))
                    .collect(),
            );
        }
        matrix
    }

    /// Append a row. Entries are sorted by column; columns past the width are dropped.
    pub fn push_row(&mut self, mut entries: Vec<(usize, f64)>) {
        entries.retain(|(j, _)| *j < self.n_cols);
        entries.sort_by_key(|(j, _)| *j);
        self.rows.push(entries);
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> &[(usize, f64)] {
        &self.rows[index]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[(usize, f64)]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Value at (row, col), zero when not stored.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.rows[row]
            .binary_search_by_key(&col, |(j, _)| *j)
            .map(|pos| self.rows[row][pos].1)
            .unwrap_or(0.0)
    }

    pub fn dense_row(&self, index: usize) -> Vec<f64> {
        let mut dense = vec![0.0; self.n_cols];
        for &(j, v) in &self.rows[index] {
            dense[j] = v;
        }
        dense
    }

    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        (0..self.n_rows()).map(|i| self.dense_row(i)).collect()
    }

    /// New matrix made of the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            n_cols: self.n_cols,
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }
}

/// Sparse row dot dense weights.
pub fn dot(row: &[(usize, f64)], weights: &[f64]) -> f64 {
    row.iter().map(|&(j, v)| v * weights[j]).sum()
}
