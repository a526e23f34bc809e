//! Perturbing a parameter may only move the residuals that declared it.

use rig_calib_core::synthetic::{mixed_rig, SyntheticRig};
use rig_calib_core::Dataset;
use rig_calib_optim::{Calibration, OptimizationConfig, ResidualKind};

fn ready(dataset: Dataset) -> Calibration {
    let config = OptimizationConfig {
        optimize_intrinsics: true,
        ..Default::default()
    };
    let mut calib = Calibration::new(dataset, config);
    calib.declare_parameters().unwrap();
    calib.declare_residuals().unwrap();
    calib.compute_sparsity().unwrap();
    calib
}

fn assert_sparsity_is_sound(mut calib: Calibration) {
    let sparsity = calib.sparsity().unwrap().clone();
    let x0 = calib.parameters().current_vector(calib.dataset()).unwrap();
    let r0 = calib.objective(&x0).unwrap();

    for j in 0..x0.len() {
        let mut x = x0.clone();
        x[j] += 1e-3;
        let r = calib.objective(&x).unwrap();
        let mut moved = 0;
        for i in 0..r.len() {
            if sparsity[(i, j)] {
                moved += usize::from(r[i] != r0[i]);
            } else {
                assert_eq!(
                    r[i],
                    r0[i],
                    "residual {} moved with parameter {}",
                    calib.residuals().residuals()[i].name,
                    calib.parameters().parameters()[j].name
                );
            }
        }
        let declared = (0..r.len()).filter(|&i| sparsity[(i, j)]).count();
        if declared > 0 {
            assert!(moved > 0, "parameter {j} moves none of its residuals");
        }
    }

    // restoring the initial vector restores the residuals exactly
    let back = calib.objective(&x0).unwrap();
    assert_eq!(back, r0);
}

fn gapped_scan_rig() -> Dataset {
    let rig = SyntheticRig {
        scan_dropout: 5,
        ..Default::default()
    };
    mixed_rig(&rig).dataset
}

#[test]
fn undeclared_dependencies_never_move() {
    assert_sparsity_is_sound(ready(mixed_rig(&SyntheticRig::default()).dataset));
}

#[test]
fn laser_edges_respect_sparsity() {
    assert_sparsity_is_sound(ready(gapped_scan_rig()));
}

#[test]
fn laser_edges_depend_on_laser_and_pattern() {
    let calib = ready(gapped_scan_rig());
    let params = calib.parameters();
    let edges: Vec<_> = calib
        .residuals()
        .residuals()
        .iter()
        .filter(|r| matches!(r.kind, ResidualKind::EdgeDistance { .. }))
        .collect();
    assert!(!edges.is_empty());
    assert!(calib.residuals().get("0_laser_ee_0").is_some());

    let values = calib.residuals().evaluate(calib.dataset()).unwrap();
    for r in &edges {
        assert!(r.name.contains("_laser_ee_"), "{}", r.name);
        let expected: Vec<usize> = [
            params.group("base_link-laser").unwrap().range.clone(),
            params
                .group(&format!("c{}_base_link-pattern", r.site.collection))
                .unwrap()
                .range
                .clone(),
        ]
        .into_iter()
        .flatten()
        .collect();
        assert_eq!(r.dependencies, expected, "{}", r.name);
    }
    let index = |name: &str| {
        calib
            .residuals()
            .residuals()
            .iter()
            .position(|r| r.name == name)
            .unwrap()
    };
    assert!(values[index("0_laser_ee_0")].is_finite());
}
