use std::collections::HashMap;

use crate::error::EngineError;

/// A row-major matrix of feature values with a fixed, ordered name table.
///
/// The schema (names and order) is immutable for the life of the frame;
/// name-to-index lookups are precomputed at construction.
#[derive(Debug, Clone)]
pub struct FeatureFrame {
    names: Vec<String>,
    index: HashMap<String, usize>,
    data: Vec<f64>,
    n_rows: usize,
}

impl FeatureFrame {
    /// Create an empty frame with the given column schema.
    pub fn new<S: Into<String>>(names: Vec<S>) -> Self {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self {
            names,
            index,
            data: Vec::new(),
            n_rows: 0,
        }
    }

    /// Build a frame from complete rows.
    pub fn from_rows<S: Into<String>>(
        names: Vec<S>,
        rows: &[Vec<f64>],
    ) -> Result<Self, EngineError> {
        let mut frame = Self::new(names);
        for row in rows {
            frame.push_row(row)?;
        }
        Ok(frame)
    }

    /// Append a row; its length must match the schema.
    pub fn push_row(&mut self, row: &[f64]) -> Result<(), EngineError> {
        if row.len() != self.names.len() {
            return Err(EngineError::SchemaMismatch(format!(
                "row has {} values, schema has {} columns",
                row.len(),
                self.names.len()
            )));
        }
        self.data.extend_from_slice(row);
        self.n_rows += 1;
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Borrow row `i` as a slice in schema order.
    pub fn row(&self, i: usize) -> &[f64] {
        let w = self.n_cols();
        &self.data[i * w..(i + 1) * w]
    }

    /// Borrow row `i` with named access.
    pub fn row_view(&self, i: usize) -> FeatureRow<'_> {
        FeatureRow { frame: self, row: i }
    }

    /// Copy out column `j`.
    pub fn column(&self, j: usize) -> Vec<f64> {
        let w = self.n_cols();
        (0..self.n_rows).map(|i| self.data[i * w + j]).collect()
    }

    pub fn column_by_name(&self, name: &str) -> Option<Vec<f64>> {
        self.column_index(name).map(|j| self.column(j))
    }

    /// Value at (row, column-name), if the column exists.
    pub fn get(&self, row: usize, name: &str) -> Option<f64> {
        self.column_index(name).map(|j| self.row(row)[j])
    }

    /// New frame with the same schema containing the selected rows.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut out = Self::new(self.names.clone());
        for &i in indices {
            out.data.extend_from_slice(self.row(i));
            out.n_rows += 1;
        }
        out
    }

    /// Indices of rows with no NaN in any column.
    pub fn finite_row_indices(&self) -> Vec<usize> {
        (0..self.n_rows)
            .filter(|&i| self.row(i).iter().all(|v| !v.is_nan()))
            .collect()
    }
}

/// A borrowed single row of a [`FeatureFrame`] with named lookup.
#[derive(Debug, Clone, Copy)]
pub struct FeatureRow<'a> {
    frame: &'a FeatureFrame,
    row: usize,
}

impl<'a> FeatureRow<'a> {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.frame.get(self.row, name)
    }

    pub fn values(&self) -> &'a [f64] {
        self.frame.row(self.row)
    }

    pub fn names(&self) -> &'a [String] {
        self.frame.names()
    }
}
