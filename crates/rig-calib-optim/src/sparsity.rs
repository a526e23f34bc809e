//! Residual/parameter incidence and column grouping for sparse finite differences.

use crate::residuals::ResidualRegistry;
use log::debug;
use nalgebra::DMatrix;

impl ResidualRegistry {
    /// Boolean `(num_residuals, num_params)` matrix; `(i, j)` is set iff
    /// residual `i` declared a dependency on parameter `j`.
    pub fn build_sparsity_matrix(&self, num_params: usize) -> DMatrix<bool> {
        let mut m = DMatrix::from_element(self.len(), num_params, false);
        for (i, residual) in self.residuals().iter().enumerate() {
            for &j in &residual.dependencies {
                m[(i, j)] = true;
            }
        }
        let nnz = m.iter().filter(|v| **v).count();
        debug!(
            "sparsity {}x{}: {} non-zeros ({:.2}% dense)",
            m.nrows(),
            m.ncols(),
            nnz,
            100.0 * density(&m)
        );
        m
    }
}

/// Fraction of set entries.
pub fn density(m: &DMatrix<bool>) -> f64 {
    if m.is_empty() {
        return 0.0;
    }
    m.iter().filter(|v| **v).count() as f64 / m.len() as f64
}

/// Rows with a set entry, per column.
pub fn rows_by_column(m: &DMatrix<bool>) -> Vec<Vec<usize>> {
    (0..m.ncols())
        .map(|j| (0..m.nrows()).filter(|&i| m[(i, j)]).collect())
        .collect()
}

/// Greedy column partition where no two columns of a group share a row.
///
/// Columns of one group can be perturbed together with a single objective
/// evaluation. Empty columns are left out of every group.
pub fn column_groups(m: &DMatrix<bool>) -> Vec<Vec<usize>> {
    let rows = rows_by_column(m);
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut occupied: Vec<Vec<bool>> = Vec::new();
    for (j, col_rows) in rows.iter().enumerate() {
        if col_rows.is_empty() {
            continue;
        }
        let slot = occupied
            .iter()
            .position(|occ| col_rows.iter().all(|&i| !occ[i]));
        let g = match slot {
            Some(g) => g,
            None => {
                groups.push(Vec::new());
                occupied.push(vec![false; m.nrows()]);
                groups.len() - 1
            }
        };
        groups[g].push(j);
        for &i in col_rows {
            occupied[g][i] = true;
        }
    }
    groups
}
