use crate::error::{CalibError, CalibResult};
use nalgebra::{DMatrix, DVector};
use rig_calib_core::{DatasetError, Real};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Residual function `R^n -> R^m` handed to a backend.
///
/// Calls are strictly sequential; an implementation may mutate state it owns
/// (e.g. push `x` into a dataset) before computing the residuals.
pub trait Objective {
    fn evaluate(&mut self, x: &DVector<Real>) -> CalibResult<DVector<Real>>;
}

impl<F> Objective for F
where
    F: FnMut(&DVector<Real>) -> CalibResult<DVector<Real>>,
{
    fn evaluate(&mut self, x: &DVector<Real>) -> CalibResult<DVector<Real>> {
        self(x)
    }
}

/// Everything a backend needs besides the objective itself.
#[derive(Debug, Clone)]
pub struct BoundedProblem {
    pub x0: DVector<Real>,
    pub lower: DVector<Real>,
    pub upper: DVector<Real>,
    /// `(residuals, parameters)` incidence; `true` where the Jacobian may be non-zero.
    pub sparsity: DMatrix<bool>,
}

impl BoundedProblem {
    pub fn num_params(&self) -> usize {
        self.x0.len()
    }

    pub fn num_residuals(&self) -> usize {
        self.sparsity.nrows()
    }

    pub fn validate(&self) -> CalibResult<()> {
        let n = self.num_params();
        for len in [self.lower.len(), self.upper.len(), self.sparsity.ncols()] {
            if len != n {
                return Err(DatasetError::DimensionMismatch {
                    expected: n,
                    got: len,
                }
                .into());
            }
        }
        if let Some(i) = (0..n).find(|&i| self.lower[i] > self.upper[i]) {
            return Err(CalibError::Solver(format!(
                "parameter {i}: lower bound {} exceeds upper bound {}",
                self.lower[i], self.upper[i]
            )));
        }
        Ok(())
    }

    /// Clamp `x` into the bound box.
    pub fn project(&self, x: &DVector<Real>) -> DVector<Real> {
        DVector::from_iterator(
            x.len(),
            x.iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .map(|(v, (lo, hi))| v.clamp(*lo, *hi)),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    /// Relative tolerance on the cost reduction.
    pub ftol: Real,
    /// Relative tolerance on parameter updates.
    pub xtol: Real,
    /// Orthogonality/gradient tolerance.
    pub gtol: Real,
    /// Maximum number of solver iterations before termination.
    ///
    /// The LM backend follows the MINPACK convention and caps residual
    /// evaluations at `max_iters * (n + 1)`.
    pub max_iters: usize,
    /// Relative forward-difference step.
    pub diff_step: Real,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            max_iters: 100,
            diff_step: Real::EPSILON.sqrt(),
        }
    }
}

/// How a solve ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// A tolerance was met.
    Converged,
    /// The evaluation budget ran out first.
    BudgetExhausted,
    /// The cancel token fired between iterations.
    Cancelled,
    Failed(String),
}

impl ConvergenceStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceStatus::Converged)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    /// Objective evaluations, finite-difference probes included.
    pub evaluations: usize,
    /// `0.5 * |r(x0)|^2`
    pub initial_cost: Real,
    /// `0.5 * |r(x)|^2` at the returned vector.
    pub final_cost: Real,
    pub status: ConvergenceStatus,
}

/// Cooperative cancellation flag shared between the driver and a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounded, sparsity-aware non-linear least-squares solver.
pub trait LeastSquaresBackend {
    /// Minimize `|objective(x)|^2` over the bound box of `problem`.
    ///
    /// Returns the best vector evaluated together with a report. Objective
    /// errors abort the solve and are returned as-is.
    fn solve<O: Objective>(
        &self,
        problem: &BoundedProblem,
        objective: &mut O,
        options: &SolveOptions,
        cancel: &CancelToken,
    ) -> CalibResult<(DVector<Real>, SolveReport)>;
}
