use crate::error::{CalibError, CalibResult};
use crate::sparsity::{column_groups, rows_by_column};
use crate::traits::{
    BoundedProblem, CancelToken, ConvergenceStatus, LeastSquaresBackend, Objective, SolveOptions,
    SolveReport,
};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::{debug, info, warn};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use rig_calib_core::Real;
use std::cell::RefCell;

fn cost(r: &DVector<Real>) -> Real {
    0.5 * r.norm_squared()
}

#[derive(Default)]
struct EvalState {
    evaluations: usize,
    initial_cost: Option<Real>,
    /// Last evaluated `(x, r(x))`, reused as the finite-difference base point.
    last: Option<(DVector<Real>, DVector<Real>)>,
    best: Option<(Real, DVector<Real>)>,
    error: Option<CalibError>,
    cancelled: bool,
}

struct LmWrapper<'a, O: Objective> {
    problem: &'a BoundedProblem,
    objective: RefCell<&'a mut O>,
    options: &'a SolveOptions,
    cancel: &'a CancelToken,
    groups: Vec<Vec<usize>>,
    rows: Vec<Vec<usize>>,
    params: DVector<Real>,
    state: RefCell<EvalState>,
}

impl<'a, O: Objective> LmWrapper<'a, O> {
    fn eval(&self, x: &DVector<Real>) -> Option<DVector<Real>> {
        let result = self.objective.borrow_mut().evaluate(x);
        let mut state = self.state.borrow_mut();
        state.evaluations += 1;
        match result {
            Ok(r) => {
                let c = cost(&r);
                state.initial_cost.get_or_insert(c);
                if state.best.as_ref().map_or(true, |(best, _)| c < *best) {
                    state.best = Some((c, x.clone()));
                }
                state.last = Some((x.clone(), r.clone()));
                Some(r)
            }
            Err(err) => {
                state.error.get_or_insert(err);
                None
            }
        }
    }

    /// Signed forward step for column `j`, or `None` when the box is too tight.
    fn step(&self, x: &DVector<Real>, j: usize) -> Option<Real> {
        let h = self.options.diff_step * x[j].abs().max(1.0);
        if x[j] + h <= self.problem.upper[j] {
            Some(h)
        } else if x[j] - h >= self.problem.lower[j] {
            Some(-h)
        } else {
            None
        }
    }
}

impl<'a, O: Objective> LeastSquaresProblem<Real, Dyn, Dyn> for LmWrapper<'a, O> {
    type ResidualStorage = Owned<Real, Dyn>;
    type JacobianStorage = Owned<Real, Dyn, Dyn>;
    type ParameterStorage = Owned<Real, Dyn>;

    fn set_params(&mut self, x: &DVector<Real>) {
        self.params = self.problem.project(x);
    }

    fn params(&self) -> DVector<Real> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<Real>> {
        self.eval(&self.params)
    }

    fn jacobian(&self) -> Option<DMatrix<Real>> {
        if self.cancel.is_cancelled() {
            self.state.borrow_mut().cancelled = true;
            return None;
        }

        let cached = match &self.state.borrow().last {
            Some((x, r)) if *x == self.params => Some(r.clone()),
            _ => None,
        };
        let r0 = match cached {
            Some(r) => r,
            None => self.eval(&self.params)?,
        };

        let mut jac = DMatrix::zeros(r0.len(), self.params.len());
        for group in &self.groups {
            let mut x = self.params.clone();
            let steps: Vec<(usize, Real)> = group
                .iter()
                .filter_map(|&j| self.step(&self.params, j).map(|h| (j, h)))
                .collect();
            if steps.is_empty() {
                continue;
            }
            for &(j, h) in &steps {
                x[j] += h;
            }
            let r1 = self.eval(&x)?;
            for &(j, h) in &steps {
                for &i in &self.rows[j] {
                    jac[(i, j)] = (r1[i] - r0[i]) / h;
                }
            }
        }
        Some(jac)
    }
}

/// Levenberg-Marquardt backend with box projection and grouped sparse
/// finite-difference Jacobians.
#[derive(Debug, Default, Clone)]
pub struct LmBackend;

impl LeastSquaresBackend for LmBackend {
    fn solve<O: Objective>(
        &self,
        problem: &BoundedProblem,
        objective: &mut O,
        options: &SolveOptions,
        cancel: &CancelToken,
    ) -> CalibResult<(DVector<Real>, SolveReport)> {
        problem.validate()?;

        let lm = LevenbergMarquardt::new()
            .with_ftol(options.ftol)
            .with_xtol(options.xtol)
            .with_gtol(options.gtol)
            .with_patience(options.max_iters.max(1));

        let groups = column_groups(&problem.sparsity);
        debug!(
            "LM: {} parameters, {} residuals, {} finite-difference groups",
            problem.num_params(),
            problem.num_residuals(),
            groups.len()
        );

        let wrapper = LmWrapper {
            problem,
            objective: RefCell::new(objective),
            options,
            cancel,
            groups,
            rows: rows_by_column(&problem.sparsity),
            params: problem.project(&problem.x0),
            state: RefCell::new(EvalState::default()),
        };

        let (wrapper, report) = lm.minimize(wrapper);
        let last_params = wrapper.params();
        let state = wrapper.state.into_inner();

        if let Some(err) = state.error {
            return Err(err);
        }

        let status = if state.cancelled {
            warn!("LM: cancelled after {} evaluations", state.evaluations);
            ConvergenceStatus::Cancelled
        } else {
            match report.termination {
                TerminationReason::LostPatience => ConvergenceStatus::BudgetExhausted,
                ref t if t.was_successful() => ConvergenceStatus::Converged,
                ref t => ConvergenceStatus::Failed(format!("{t:?}")),
            }
        };

        let (final_cost, x_best) = state
            .best
            .unwrap_or((report.objective_function, last_params));
        let initial_cost = state.initial_cost.unwrap_or(final_cost);
        info!(
            "LM: {:?} after {} evaluations, cost {:.6e} -> {:.6e}",
            status, state.evaluations, initial_cost, final_cost
        );

        Ok((
            x_best,
            SolveReport {
                evaluations: state.evaluations,
                initial_cost,
                final_cost,
                status,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::LmBackend;
    use crate::error::CalibResult;
    use crate::traits::{
        BoundedProblem, CancelToken, ConvergenceStatus, LeastSquaresBackend, SolveOptions,
    };
    use nalgebra::{DMatrix, DVector};
    use rig_calib_core::Real;

    fn unbounded(x0: Vec<Real>, sparsity: DMatrix<bool>) -> BoundedProblem {
        let n = x0.len();
        BoundedProblem {
            x0: DVector::from_vec(x0),
            lower: DVector::from_element(n, Real::NEG_INFINITY),
            upper: DVector::from_element(n, Real::INFINITY),
            sparsity,
        }
    }

    #[test]
    fn lm_backend_solves_trivial_problem() {
        let problem = unbounded(vec![10.0], DMatrix::from_element(1, 1, true));
        let mut objective = |x: &DVector<Real>| -> CalibResult<DVector<Real>> {
            Ok(DVector::from_element(1, x[0] - 3.0))
        };

        let (x, report) = LmBackend
            .solve(&problem, &mut objective, &SolveOptions::default(), &CancelToken::new())
            .unwrap();

        assert!((x[0] - 3.0).abs() < 1e-6, "expected 3.0, got {}", x[0]);
        assert!(report.final_cost < 1e-12, "final cost too high: {}", report.final_cost);
        assert!(report.status.is_converged(), "{report:?}");
        assert!(report.evaluations > 0);
    }

    #[test]
    fn sparse_groups_solve_separable_problem() {
        // r_i = x_i - i, diagonal sparsity: one group covers every column
        let n = 4;
        let problem = unbounded(vec![0.0; n], DMatrix::from_fn(n, n, |i, j| i == j));
        let mut calls = 0usize;
        let mut objective = |x: &DVector<Real>| -> CalibResult<DVector<Real>> {
            calls += 1;
            Ok(DVector::from_fn(n, |i, _| x[i] - i as Real))
        };
        let (x, report) = LmBackend
            .solve(&problem, &mut objective, &SolveOptions::default(), &CancelToken::new())
            .unwrap();
        for i in 0..n {
            assert!((x[i] - i as Real).abs() < 1e-6);
        }
        assert_eq!(report.evaluations, calls);
    }

    #[test]
    fn bounds_are_respected() {
        let mut problem = unbounded(vec![0.0], DMatrix::from_element(1, 1, true));
        problem.upper[0] = 1.0;
        let mut seen_max: Real = Real::NEG_INFINITY;
        let mut objective = |x: &DVector<Real>| -> CalibResult<DVector<Real>> {
            seen_max = seen_max.max(x[0]);
            Ok(DVector::from_element(1, x[0] - 3.0))
        };
        let (x, _) = LmBackend
            .solve(&problem, &mut objective, &SolveOptions::default(), &CancelToken::new())
            .unwrap();
        assert!(x[0] <= 1.0);
        assert!((x[0] - 1.0).abs() < 1e-6);
        assert!(seen_max <= 1.0);
    }

    #[test]
    fn cancelled_token_stops_before_first_jacobian() {
        let problem = unbounded(vec![10.0], DMatrix::from_element(1, 1, true));
        let mut objective = |x: &DVector<Real>| -> CalibResult<DVector<Real>> {
            Ok(DVector::from_element(1, x[0] - 3.0))
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let (x, report) = LmBackend
            .solve(&problem, &mut objective, &SolveOptions::default(), &cancel)
            .unwrap();
        assert_eq!(report.status, ConvergenceStatus::Cancelled);
        assert_eq!(report.evaluations, 1);
        assert_eq!(x[0], 10.0);
    }
}
