//! Builds the parameter and residual registries of a calibration from a dataset.

use crate::config::OptimizationConfig;
use crate::error::{CalibError, CalibResult};
use crate::params::{
    anchor_bounds, ParameterRegistry, Selector, TransformScope, INTRINSICS_SUFFIXES,
    TRANSFORM_SUFFIXES,
};
use crate::residuals::{ResidualKind, ResidualRegistry, ResidualSite};
use log::{debug, info, warn};
use rig_calib_core::{Dataset, DatasetError, Features, Modality, TransformKey, Vec2};
use std::borrow::Cow;

pub fn transform_group_name(key: &TransformKey) -> String {
    key.as_string()
}

/// Group of the pattern pose: shared when the pattern is fixed, one per collection otherwise.
pub fn pattern_group_name(collection: &str, key: &TransformKey, fixed: bool) -> String {
    if fixed {
        key.as_string()
    } else {
        format!("c{collection}_{key}")
    }
}

pub fn intrinsics_group_name(sensor: &str) -> String {
    format!("{sensor}_intrinsics")
}

/// `<collection>_<sensor>_<tag>`, with `%` and `_` percent-encoded in both keys
/// so that distinct pairs never share a name.
pub fn residual_name(collection: &str, sensor: &str, tag: &str) -> String {
    format!("{}_{}_{tag}", escape_key(collection), escape_key(sensor))
}

fn escape_key(key: &str) -> Cow<'_, str> {
    if key.contains(['%', '_']) {
        Cow::Owned(key.replace('%', "%25").replace('_', "%5F"))
    } else {
        Cow::Borrowed(key)
    }
}

/// Collections in which at least one sensor detected the pattern.
pub fn eligible_collections(dataset: &Dataset) -> usize {
    dataset
        .collections
        .values()
        .filter(|c| dataset.sensors.keys().any(|s| c.detected(s)))
        .count()
}

/// Check that every collection carries a pattern pose with the configured
/// naming. A fixed pattern is read from `representative`; other copies that
/// disagree are overwritten on the first write.
pub fn check_pattern_transforms(dataset: &Dataset, representative: &str) -> CalibResult<()> {
    let pattern = dataset.pattern();
    let key = pattern.transform_key();
    let shared = dataset
        .collection(representative)?
        .transform(&key)
        .map(|t| t.to_params());
    for (ckey, collection) in &dataset.collections {
        let err = |reason: String| CalibError::PatternTransform {
            collection: ckey.clone(),
            reason,
        };
        let t = collection
            .transform(&key)
            .ok_or_else(|| err(format!("no initial estimate for '{key}'")))?;
        if t.parent != pattern.parent_link || t.child != pattern.link {
            return Err(err(format!(
                "entry '{key}' links '{}' -> '{}'",
                t.parent, t.child
            )));
        }
        if pattern.fixed && shared != Some(t.to_params()) {
            warn!(
                "collection {ckey}: fixed pattern pose differs from collection {representative}, \
                 using the latter"
            );
        }
    }
    Ok(())
}

/// Check that every collection holds its own copy of a replicated transform.
pub fn check_shared_transform(dataset: &Dataset, key: &TransformKey) -> CalibResult<()> {
    match dataset
        .collections
        .iter()
        .find(|(_, c)| c.transform(key).is_none())
    {
        Some((ckey, _)) => Err(CalibError::MissingSharedTransform {
            collection: ckey.clone(),
            key: key.as_string(),
        }),
        None => Ok(()),
    }
}

/// Declare sensor transforms, optional intrinsics and pattern poses.
///
/// Sensors are visited in name order; sensors sharing a calibration key
/// share one group. The anchored sensor's transform gets an epsilon band.
pub fn declare_parameters(
    dataset: &Dataset,
    config: &OptimizationConfig,
) -> CalibResult<ParameterRegistry> {
    if eligible_collections(dataset) == 0 {
        return Err(CalibError::NoCollections);
    }
    let representative = dataset
        .representative_collection()
        .ok_or(CalibError::NoCollections)?
        .to_string();
    check_pattern_transforms(dataset, &representative)?;

    let pattern = dataset.pattern();
    let pattern_key = pattern.transform_key();
    let anchored_key = match &dataset.calibration_config.anchored_sensor {
        Some(name) => Some(dataset.sensor(name)?.calibration_key()),
        None => None,
    };

    let mut reg = ParameterRegistry::new();
    for (name, sensor) in &dataset.sensors {
        let key = sensor.calibration_key();
        if key == pattern_key {
            return Err(CalibError::PatternTransform {
                collection: representative.clone(),
                reason: format!("sensor '{name}' calibrates the pattern transform '{key}'"),
            });
        }
        let group = transform_group_name(&key);
        if reg.group(&group).is_some() {
            debug!("sensor {name} shares transform {group}");
            continue;
        }
        check_shared_transform(dataset, &key)?;
        let selector = Selector::Transform {
            key: key.clone(),
            scope: TransformScope::Replicated {
                representative: representative.clone(),
            },
        };
        if anchored_key.as_ref() == Some(&key) {
            let (lower, upper) = anchor_bounds(&selector.read(dataset)?);
            info!("anchoring {group}");
            reg.declare(group, selector, &TRANSFORM_SUFFIXES, &lower, &upper)?;
        } else {
            reg.declare_unbounded(group, selector, &TRANSFORM_SUFFIXES)?;
        }
    }

    if config.optimize_intrinsics {
        for (name, sensor) in &dataset.sensors {
            if sensor.modality != Modality::Image {
                continue;
            }
            if sensor.intrinsics.is_none() {
                return Err(DatasetError::MissingIntrinsics {
                    sensor: name.clone(),
                }
                .into());
            }
            reg.declare_unbounded(
                intrinsics_group_name(name),
                Selector::Intrinsics {
                    sensor: name.clone(),
                },
                &INTRINSICS_SUFFIXES,
            )?;
        }
    }

    if pattern.fixed {
        reg.declare_unbounded(
            pattern_group_name(&representative, &pattern_key, true),
            Selector::Transform {
                key: pattern_key.clone(),
                scope: TransformScope::Replicated { representative },
            },
            &TRANSFORM_SUFFIXES,
        )?;
    } else {
        for ckey in dataset.collections.keys() {
            reg.declare_unbounded(
                pattern_group_name(ckey, &pattern_key, false),
                Selector::Transform {
                    key: pattern_key.clone(),
                    scope: TransformScope::Collection(ckey.clone()),
                },
                &TRANSFORM_SUFFIXES,
            )?;
        }
    }

    info!(
        "declared {} parameters in {} groups",
        reg.len(),
        reg.groups().len()
    );
    Ok(reg)
}

/// Parameter names a `(collection, sensor)` pair depends on: every optimized
/// transform between the sensor data frame and the pattern, plus intrinsics.
pub fn site_dependencies(
    dataset: &Dataset,
    params: &ParameterRegistry,
    collection: &str,
    sensor: &str,
) -> CalibResult<Vec<String>> {
    let s = dataset.sensor(sensor)?;
    let chain = dataset.collection(collection)?.chain(
        collection,
        &s.frame_id,
        &dataset.pattern().link,
    )?;
    let mut names = Vec::new();
    for link in &chain {
        if let Some(group) = params.transform_group(collection, &link.key) {
            names.extend(params.group_parameter_names(group));
        }
    }
    if s.modality == Modality::Image {
        if let Some(group) = params.group(&intrinsics_group_name(sensor)) {
            names.extend(params.group_parameter_names(group));
        }
    }
    Ok(names)
}

/// Declare one residual per extracted feature of every detected pair.
pub fn declare_residuals(
    dataset: &Dataset,
    params: &ParameterRegistry,
) -> CalibResult<ResidualRegistry> {
    let mut reg = ResidualRegistry::new();
    for (ckey, collection) in &dataset.collections {
        for name in dataset.sensors.keys() {
            let Some(labels) = collection.labels.get(name).filter(|l| l.detected) else {
                continue;
            };
            let Some(features) = &labels.features else {
                warn!("collection {ckey}: sensor {name} has no extracted features");
                continue;
            };
            let deps = site_dependencies(dataset, params, ckey, name)?;
            let site = ResidualSite {
                collection: ckey.clone(),
                sensor: name.clone(),
            };
            let mut add = |tag: String, kind: ResidualKind| -> CalibResult<usize> {
                reg.declare(residual_name(ckey, name, &tag), site.clone(), kind, &deps, params)
            };

            match features {
                Features::Corners { kept } => {
                    for c in kept {
                        add(
                            format!("corner_{}", c.id),
                            ResidualKind::Corner {
                                id: c.id,
                                pixel: Vec2::new(c.x, c.y),
                            },
                        )?;
                    }
                }
                Features::LaserScan {
                    limits,
                    edges,
                    beams,
                } => {
                    if let Some((first, last)) = *limits {
                        add("eleft".into(), ResidualKind::BorderDistance { idx: first })?;
                        add("eright".into(), ResidualKind::BorderDistance { idx: last })?;
                    }
                    for (k, e) in edges.iter().enumerate() {
                        add(
                            format!("ee_{k}"),
                            ResidualKind::EdgeDistance {
                                before: e.before,
                                after: e.after,
                            },
                        )?;
                    }
                    for &idx in beams {
                        add(format!("b_{idx}"), ResidualKind::PlaneDistance { idx })?;
                    }
                }
                Features::PointCloud {
                    limit_points,
                    middle_points,
                } => {
                    for &idx in middle_points {
                        add(format!("oe_{idx}"), ResidualKind::PlaneDistance { idx })?;
                    }
                    for &idx in limit_points {
                        add(format!("ld_{idx}"), ResidualKind::BorderDistance { idx })?;
                    }
                }
            }
        }
    }
    info!("declared {} residuals", reg.len());
    Ok(reg)
}
