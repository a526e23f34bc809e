//! The calibration state machine.
//!
//! `Idle -> ParamsDeclared -> ResidualsDeclared -> SparsityComputed -> Running
//! -> Converged | Aborted`. Feature extraction may only run while `Idle`;
//! after that the dataset is mutated exclusively through the parameter
//! registry.

use crate::config::OptimizationConfig;
use crate::error::{CalibError, CalibResult};
use crate::features::{extract_features, ExtractionSummary};
use crate::params::ParameterRegistry;
use crate::problem::{declare_parameters, declare_residuals};
use crate::residuals::ResidualRegistry;
use crate::sparsity::density;
use crate::traits::{
    BoundedProblem, CancelToken, ConvergenceStatus, LeastSquaresBackend, Objective,
};
use log::{info, warn};
use nalgebra::{DMatrix, DVector};
use rig_calib_core::{Dataset, Real};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    Idle,
    ParamsDeclared,
    ResidualsDeclared,
    SparsityComputed,
    Running,
    Converged,
    Aborted,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub status: ConvergenceStatus,
    pub evaluations: usize,
    pub initial_cost: Real,
    pub final_cost: Real,
    pub initial_rms: Real,
    pub final_rms: Real,
    pub num_parameters: usize,
    pub num_residuals: usize,
    pub extraction: ExtractionSummary,
}

/// Final pose of a sensor's calibrated transform in the representative collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPose {
    pub sensor: String,
    pub parent: String,
    pub child: String,
    pub translation: [Real; 3],
    /// Intrinsic X-Y-Z roll, pitch, yaw in radians.
    pub rpy: [Real; 3],
    /// `[x, y, z, w]`
    pub quaternion: [Real; 4],
}

/// Objective that pushes `x` into the dataset and recomputes every residual.
struct DatasetObjective<'a> {
    dataset: &'a mut Dataset,
    params: &'a ParameterRegistry,
    residuals: &'a ResidualRegistry,
}

impl Objective for DatasetObjective<'_> {
    fn evaluate(&mut self, x: &DVector<Real>) -> CalibResult<DVector<Real>> {
        self.params.apply_vector(self.dataset, x)?;
        self.residuals.evaluate(self.dataset)
    }
}

fn rms(r: &DVector<Real>) -> Real {
    if r.is_empty() {
        0.0
    } else {
        (r.norm_squared() / r.len() as Real).sqrt()
    }
}

/// Owns the dataset for the duration of a calibration.
#[derive(Debug)]
pub struct Calibration {
    dataset: Dataset,
    config: OptimizationConfig,
    state: DriverState,
    extraction: Option<ExtractionSummary>,
    params: ParameterRegistry,
    residuals: ResidualRegistry,
    sparsity: Option<DMatrix<bool>>,
}

impl Calibration {
    pub fn new(dataset: Dataset, config: OptimizationConfig) -> Self {
        Self {
            dataset,
            config,
            state: DriverState::Idle,
            extraction: None,
            params: ParameterRegistry::new(),
            residuals: ResidualRegistry::new(),
            sparsity: None,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    pub fn parameters(&self) -> &ParameterRegistry {
        &self.params
    }

    pub fn residuals(&self) -> &ResidualRegistry {
        &self.residuals
    }

    pub fn sparsity(&self) -> Option<&DMatrix<bool>> {
        self.sparsity.as_ref()
    }

    pub fn extraction(&self) -> Option<&ExtractionSummary> {
        self.extraction.as_ref()
    }

    fn expect_state(&self, expected: DriverState, action: &'static str) -> CalibResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CalibError::InvalidState {
                action,
                state: self.state,
            })
        }
    }

    /// Run feature extraction. Only allowed while `Idle`; may be repeated.
    pub fn extract_features(&mut self) -> CalibResult<&ExtractionSummary> {
        self.expect_state(DriverState::Idle, "extract features")?;
        let summary = extract_features(&mut self.dataset, &self.config.features);
        Ok(self.extraction.insert(summary))
    }

    /// `Idle -> ParamsDeclared`. Extracts features first if that has not happened.
    pub fn declare_parameters(&mut self) -> CalibResult<usize> {
        self.expect_state(DriverState::Idle, "declare parameters")?;
        if self.extraction.is_none() {
            self.extract_features()?;
        }
        self.params = declare_parameters(&self.dataset, &self.config)?;
        self.state = DriverState::ParamsDeclared;
        Ok(self.params.len())
    }

    /// `ParamsDeclared -> ResidualsDeclared`.
    pub fn declare_residuals(&mut self) -> CalibResult<usize> {
        self.expect_state(DriverState::ParamsDeclared, "declare residuals")?;
        self.residuals = declare_residuals(&self.dataset, &self.params)?;
        if self.residuals.is_empty() {
            warn!("no residuals declared; nothing constrains the parameters");
        }
        self.state = DriverState::ResidualsDeclared;
        Ok(self.residuals.len())
    }

    /// `ResidualsDeclared -> SparsityComputed`.
    pub fn compute_sparsity(&mut self) -> CalibResult<&DMatrix<bool>> {
        self.expect_state(DriverState::ResidualsDeclared, "compute sparsity")?;
        let m = self.residuals.build_sparsity_matrix(self.params.len());
        info!(
            "sparsity {}x{}, {:.2}% dense",
            m.nrows(),
            m.ncols(),
            100.0 * density(&m)
        );
        self.state = DriverState::SparsityComputed;
        Ok(self.sparsity.insert(m))
    }

    /// Push `x` into the dataset and return the residual vector.
    ///
    /// Available once the sparsity is computed and after a run has finished.
    pub fn objective(&mut self, x: &DVector<Real>) -> CalibResult<DVector<Real>> {
        match self.state {
            DriverState::SparsityComputed | DriverState::Converged | DriverState::Aborted => {
                self.evaluate_at(x)
            }
            state => Err(CalibError::InvalidState {
                action: "evaluate the objective",
                state,
            }),
        }
    }

    fn evaluate_at(&mut self, x: &DVector<Real>) -> CalibResult<DVector<Real>> {
        DatasetObjective {
            dataset: &mut self.dataset,
            params: &self.params,
            residuals: &self.residuals,
        }
        .evaluate(x)
    }

    /// Walk the remaining transitions and solve.
    ///
    /// The best vector returned by the backend is applied once more, so the
    /// dataset always holds the reported optimum, including after cancellation.
    pub fn run<B: LeastSquaresBackend>(
        &mut self,
        backend: &B,
        cancel: &CancelToken,
    ) -> CalibResult<CalibrationReport> {
        if self.state == DriverState::Idle {
            self.declare_parameters()?;
        }
        if self.state == DriverState::ParamsDeclared {
            self.declare_residuals()?;
        }
        if self.state == DriverState::ResidualsDeclared {
            self.compute_sparsity()?;
        }
        self.expect_state(DriverState::SparsityComputed, "run")?;
        let sparsity = self
            .sparsity
            .clone()
            .ok_or(CalibError::InvalidState {
                action: "run",
                state: self.state,
            })?;

        let x0 = self.params.current_vector(&self.dataset)?;
        let (lower, upper) = self.params.bounds();
        let problem = BoundedProblem {
            x0,
            lower,
            upper,
            sparsity,
        };
        let r0 = self.residuals.evaluate(&self.dataset)?;
        info!(
            "optimizing {} parameters over {} residuals, initial rms {:.6}",
            self.params.len(),
            self.residuals.len(),
            rms(&r0)
        );

        self.state = DriverState::Running;
        let mut objective = DatasetObjective {
            dataset: &mut self.dataset,
            params: &self.params,
            residuals: &self.residuals,
        };
        let solved = backend.solve(&problem, &mut objective, &self.config.solver, cancel);
        let (x, report) = match solved {
            Ok(v) => v,
            Err(err) => {
                self.state = DriverState::Aborted;
                return Err(err);
            }
        };

        let r = match self.evaluate_at(&x) {
            Ok(r) => r,
            Err(err) => {
                self.state = DriverState::Aborted;
                return Err(err);
            }
        };
        self.state = match report.status {
            ConvergenceStatus::Converged | ConvergenceStatus::BudgetExhausted => {
                DriverState::Converged
            }
            ConvergenceStatus::Cancelled | ConvergenceStatus::Failed(_) => DriverState::Aborted,
        };
        if report.status == ConvergenceStatus::BudgetExhausted {
            warn!("evaluation budget exhausted before the tolerances were met");
        }
        info!(
            "calibration {:?}: rms {:.6} -> {:.6}",
            self.state,
            rms(&r0),
            rms(&r)
        );

        Ok(CalibrationReport {
            status: report.status,
            evaluations: report.evaluations,
            initial_cost: 0.5 * r0.norm_squared(),
            final_cost: 0.5 * r.norm_squared(),
            initial_rms: rms(&r0),
            final_rms: rms(&r),
            num_parameters: self.params.len(),
            num_residuals: self.residuals.len(),
            extraction: self.extraction.clone().unwrap_or_default(),
        })
    }

    /// Calibrated transform of every sensor, read from the representative collection.
    pub fn sensor_poses(&self) -> CalibResult<Vec<SensorPose>> {
        let representative = self
            .dataset
            .representative_collection()
            .ok_or(CalibError::NoCollections)?;
        self.dataset
            .sensors
            .iter()
            .map(|(name, sensor)| -> CalibResult<SensorPose> {
                let t = self
                    .dataset
                    .transform(representative, &sensor.calibration_key())?;
                let q = t.quaternion();
                Ok(SensorPose {
                    sensor: name.clone(),
                    parent: t.parent.clone(),
                    child: t.child.clone(),
                    translation: [t.translation.x, t.translation.y, t.translation.z],
                    rpy: t.rpy(),
                    quaternion: [q.i, q.j, q.k, q.w],
                })
            })
            .collect()
    }

    pub fn into_dataset(self) -> Dataset {
        self.dataset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend_lm::LmBackend;
    use rig_calib_core::synthetic::{two_camera_rig, SyntheticRig};

    fn calibration() -> Calibration {
        let mut dataset = two_camera_rig(&SyntheticRig::default()).dataset;
        dataset.calibration_config.anchored_sensor = Some("left".into());
        Calibration::new(dataset, OptimizationConfig::default())
    }

    #[test]
    fn transitions_are_ordered() {
        let mut calib = calibration();
        assert!(matches!(
            calib.declare_residuals(),
            Err(CalibError::InvalidState { .. })
        ));
        assert_eq!(calib.declare_parameters().unwrap(), 30);
        assert_eq!(calib.state(), DriverState::ParamsDeclared);
        assert!(calib.extract_features().is_err());
        assert_eq!(calib.declare_residuals().unwrap(), 120);
        assert_eq!(calib.compute_sparsity().unwrap().shape(), (120, 30));
        assert_eq!(calib.state(), DriverState::SparsityComputed);
    }

    #[test]
    fn run_from_idle_converges() {
        let mut calib = calibration();
        let report = calib.run(&LmBackend, &CancelToken::new()).unwrap();
        assert_eq!(calib.state(), DriverState::Converged);
        assert!(report.final_rms < 1e-4, "{report:?}");
        assert!(report.final_rms < report.initial_rms);
        assert!(matches!(
            calib.run(&LmBackend, &CancelToken::new()),
            Err(CalibError::InvalidState { .. })
        ));
    }

    #[test]
    fn cancellation_aborts_with_consistent_dataset() {
        let mut calib = calibration();
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = calib.run(&LmBackend, &cancel).unwrap();
        assert_eq!(report.status, ConvergenceStatus::Cancelled);
        assert_eq!(calib.state(), DriverState::Aborted);
        let x = calib.parameters().current_vector(calib.dataset()).unwrap();
        let r = calib.residuals().evaluate(calib.dataset()).unwrap();
        let again = calib.objective(&x).unwrap();
        assert_eq!(r, again);
    }

    #[test]
    fn objective_requires_computed_sparsity() {
        let mut calib = calibration();
        let x = DVector::zeros(30);
        assert!(matches!(
            calib.objective(&x),
            Err(CalibError::InvalidState {
                state: DriverState::Idle,
                ..
            })
        ));
        calib.declare_parameters().unwrap();
        calib.declare_residuals().unwrap();
        let before = calib.dataset().clone();
        assert!(calib.objective(&x).is_err());
        assert_eq!(calib.dataset(), &before);

        calib.compute_sparsity().unwrap();
        let x0 = calib.parameters().current_vector(calib.dataset()).unwrap();
        assert_eq!(calib.objective(&x0).unwrap().len(), 120);
    }

    #[test]
    fn sensor_poses_report_rpy() {
        let calib = calibration();
        let poses = calib.sensor_poses().unwrap();
        assert_eq!(poses.len(), 2);
        assert_eq!(poses[0].sensor, "left");
        assert_eq!(poses[0].parent, "base_link");
        let t = &calib.dataset().collections["0"].transforms["base_link-left"];
        assert_eq!(poses[0].rpy, t.rpy());
    }
}
