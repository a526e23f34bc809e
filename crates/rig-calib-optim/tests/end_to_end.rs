//! End-to-end calibration on synthetic rigs.
//!
//! This test validates:
//! 1. Parameter and residual counts for a minimal camera + moving pattern setup
//! 2. Anchoring keeps the anchored transform in place
//! 3. Convergence of the relative camera pose to ground truth
//! 4. Mixed camera / laser / lidar rigs run through the whole pipeline

use approx::assert_relative_eq;
use rig_calib_core::synthetic::{build, mixed_rig, two_camera_rig, SyntheticRig, SyntheticSensor};
use rig_calib_core::{Dataset, GridSize, TransformKey, Vec3};
use rig_calib_optim::{
    Calibration, CancelToken, ConvergenceStatus, DriverState, LmBackend, OptimizationConfig,
};

fn relative_pose(dataset: &Dataset, a: &str, b: &str) -> rig_calib_core::Iso3 {
    let c = &dataset.collections["0"];
    c.lookup("0", a, b).unwrap()
}

#[test]
fn single_camera_two_collections_counts() {
    let rig = SyntheticRig {
        num_collections: 2,
        grid: GridSize { x: 2, y: 2 },
        ..Default::default()
    };
    let dataset = build(
        &rig,
        &[SyntheticSensor::camera("cam", Vec3::zeros(), [0.0, 0.0, 0.0])],
    )
    .dataset;

    let mut calib = Calibration::new(dataset, OptimizationConfig::default());
    assert_eq!(calib.declare_parameters().unwrap(), 18);
    assert_eq!(calib.parameters().groups().len(), 3);
    assert_eq!(calib.declare_residuals().unwrap(), 8);

    let sensor_group = calib.parameters().group("base_link-cam").unwrap().range.clone();
    for r in calib.residuals().residuals() {
        assert_eq!(r.dependencies.len(), 12, "{}", r.name);
        let pattern_group = calib
            .parameters()
            .group(&format!("c{}_base_link-pattern", r.site.collection))
            .unwrap()
            .range
            .clone();
        let expected: Vec<usize> = sensor_group.clone().chain(pattern_group).collect();
        assert_eq!(r.dependencies, expected);
    }
    assert!(calib.residuals().get("1_cam_corner_3").is_some());

    let sparsity = calib.compute_sparsity().unwrap();
    assert_eq!(sparsity.shape(), (8, 18));
    assert_eq!(sparsity.iter().filter(|v| **v).count(), 8 * 12);
}

#[test]
fn anchored_camera_stays_put_and_rig_converges() {
    let synthetic = two_camera_rig(&SyntheticRig::default());
    let mut dataset = synthetic.dataset.clone();
    dataset.calibration_config.anchored_sensor = Some("left".into());
    let left_key = TransformKey::new("base_link", "left");
    let left_before = dataset.transform("0", &left_key).unwrap().to_params();

    let mut calib = Calibration::new(dataset, OptimizationConfig::default());
    let report = calib.run(&LmBackend, &CancelToken::new()).unwrap();
    assert!(
        matches!(
            report.status,
            ConvergenceStatus::Converged | ConvergenceStatus::BudgetExhausted
        ),
        "{report:?}"
    );
    assert_eq!(calib.state(), DriverState::Converged);
    assert!(report.final_rms < 1e-4, "final rms {}", report.final_rms);
    assert_eq!(report.num_parameters, 30);
    assert_eq!(report.num_residuals, 120);

    let refined = calib.into_dataset();
    for collection in refined.collections.keys() {
        let after = refined.transform(collection, &left_key).unwrap().to_params();
        for (a, b) in after.iter().zip(left_before.iter()) {
            assert!((a - b).abs() <= 2.0 * f64::EPSILON * b.abs().max(1.0));
        }
    }

    // the right camera seen from the left one matches ground truth
    let got = relative_pose(&refined, "left", "right");
    let expected = relative_pose(&synthetic.truth, "left", "right");
    assert_relative_eq!(
        got.translation.vector,
        expected.translation.vector,
        epsilon = 1e-5
    );
    assert!(got.rotation.angle_to(&expected.rotation) < 1e-5);
}

#[test]
fn intrinsics_can_be_refined_alongside() {
    let mut dataset = two_camera_rig(&SyntheticRig::default()).dataset;
    dataset.calibration_config.anchored_sensor = Some("left".into());
    dataset.sensors.get_mut("right").unwrap().intrinsics.as_mut().unwrap().fx += 5.0;
    let config = OptimizationConfig {
        optimize_intrinsics: true,
        ..Default::default()
    };
    let mut calib = Calibration::new(dataset, config);
    let report = calib.run(&LmBackend, &CancelToken::new()).unwrap();
    assert_eq!(report.num_parameters, 30 + 18);
    assert!(report.final_rms < 0.1 * report.initial_rms, "{report:?}");
    let r = calib.residuals().get("0_right_corner_0").unwrap();
    assert_eq!(r.dependencies.len(), 6 + 6 + 9);
}

#[test]
fn mixed_rig_runs_end_to_end() {
    let mut dataset = mixed_rig(&SyntheticRig::default()).dataset;
    dataset.calibration_config.anchored_sensor = Some("camera".into());
    let mut config = OptimizationConfig::default();
    config.solver.max_iters = 30;
    let mut calib = Calibration::new(dataset, config);
    let report = calib.run(&LmBackend, &CancelToken::new()).unwrap();
    assert!(report.final_cost <= report.initial_cost);
    assert_eq!(report.extraction.skipped_sensors, 0);
    let poses = calib.sensor_poses().unwrap();
    let names: Vec<&str> = poses.iter().map(|p| p.sensor.as_str()).collect();
    assert_eq!(names, vec!["camera", "laser", "lidar"]);
}

#[test]
fn filtered_out_dataset_is_rejected() {
    let mut dataset = two_camera_rig(&SyntheticRig::default()).dataset;
    dataset.collections.clear();
    let mut calib = Calibration::new(dataset, OptimizationConfig::default());
    let err = calib.run(&LmBackend, &CancelToken::new()).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(calib.state(), DriverState::Idle);
}
