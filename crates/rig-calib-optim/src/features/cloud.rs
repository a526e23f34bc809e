use rig_calib_core::{to_spherical, Pt3, Real};
use std::collections::BTreeMap;

/// Decimal places kept when grouping points by polar angle.
const THETA_DECIMALS: i32 = 4;

/// Points of one lidar scan line, sorted by azimuth.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamCluster {
    /// Rounded polar angle shared by the cluster.
    pub theta: Real,
    /// `(azimuth, point index)` in increasing azimuth.
    pub points: Vec<(Real, usize)>,
}

impl BeamCluster {
    /// Indices of the azimuth extrema; one index for a single-point cluster.
    pub fn extrema(&self) -> Vec<usize> {
        match self.points.as_slice() {
            [] => Vec::new(),
            [only] => vec![only.1],
            [first, .., last] => vec![first.1, last.1],
        }
    }

    /// Indices strictly between the extrema.
    pub fn middle(&self) -> Vec<usize> {
        if self.points.len() <= 2 {
            return Vec::new();
        }
        self.points[1..self.points.len() - 1]
            .iter()
            .map(|p| p.1)
            .collect()
    }
}

/// Group the selected points into scan lines by rounded polar angle.
///
/// Returns the clusters in increasing polar angle plus the number of indices
/// that were out of range or at the sensor origin.
pub fn cluster_beams(points: &[[Real; 3]], idxs: &[usize]) -> (Vec<BeamCluster>, usize) {
    let scale = 10f64.powi(THETA_DECIMALS);
    let mut bins: BTreeMap<i64, Vec<(Real, usize)>> = BTreeMap::new();
    let mut invalid = 0;
    for &idx in idxs {
        let Some((_, theta, phi)) = points.get(idx).and_then(|p| to_spherical(&Pt3::from(*p)))
        else {
            invalid += 1;
            continue;
        };
        bins.entry((theta * scale).round() as i64)
            .or_default()
            .push((phi, idx));
    }
    let clusters = bins
        .into_iter()
        .map(|(key, mut points)| {
            points.sort_by(|a, b| a.0.total_cmp(&b.0));
            BeamCluster {
                theta: key as Real / scale,
                points,
            }
        })
        .collect();
    (clusters, invalid)
}

/// Limit and middle points of a point-cloud detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloudFeatures {
    pub limit_points: Vec<usize>,
    /// Middle points after subsampling.
    pub middle_points: Vec<usize>,
    pub invalid: usize,
}

impl CloudFeatures {
    pub fn extract(points: &[[Real; 3]], idxs: &[usize], step: usize) -> Self {
        let (clusters, invalid) = cluster_beams(points, idxs);
        let mut out = CloudFeatures {
            invalid,
            ..Default::default()
        };
        let mut middle = Vec::new();
        for cluster in &clusters {
            out.limit_points.extend(cluster.extrema());
            middle.extend(cluster.middle());
        }
        out.middle_points = middle.into_iter().step_by(step.max(1)).collect();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `rings` scan lines of `per_ring` points each, two meters away.
    fn rings(thetas: &[Real], per_ring: usize) -> Vec<[Real; 3]> {
        let mut pts = Vec::new();
        for &theta in thetas {
            for k in 0..per_ring {
                let phi = -0.1 + 0.05 * k as Real;
                pts.push([
                    2.0 * theta.sin() * phi.cos(),
                    2.0 * theta.sin() * phi.sin(),
                    2.0 * theta.cos(),
                ]);
            }
        }
        pts
    }

    #[test]
    fn three_rings_of_five_points() {
        let pts = rings(&[1.50, 1.55, 1.60], 5);
        let idxs: Vec<usize> = (0..pts.len()).collect();
        let features = CloudFeatures::extract(&pts, &idxs, 1);
        assert_eq!(features.limit_points.len(), 6);
        assert_eq!(features.middle_points.len(), 9);
        assert_eq!(features.invalid, 0);
        // extrema are the first and last azimuth of each ring
        assert_eq!(&features.limit_points[..2], &[0, 4]);
        assert_eq!(&features.middle_points[..3], &[1, 2, 3]);
    }

    #[test]
    fn clusters_follow_rounded_theta() {
        let pts = rings(&[1.50, 1.55], 3);
        let (clusters, _) = cluster_beams(&pts, &[5, 0, 3, 1]);
        assert_eq!(clusters.len(), 2);
        assert!((clusters[0].theta - 1.5).abs() < 1e-9);
        let ids: Vec<usize> = clusters[1].points.iter().map(|p| p.1).collect();
        assert_eq!(ids, vec![3, 5]);
    }

    #[test]
    fn single_point_cluster_has_one_limit() {
        let pts = rings(&[1.5], 1);
        let features = CloudFeatures::extract(&pts, &[0], 1);
        assert_eq!(features.limit_points, vec![0]);
        assert!(features.middle_points.is_empty());
    }

    #[test]
    fn origin_and_out_of_range_points_are_invalid() {
        let mut pts = rings(&[1.5], 3);
        pts.push([0.0, 0.0, 0.0]);
        let features = CloudFeatures::extract(&pts, &[0, 1, 2, 3, 42], 1);
        assert_eq!(features.invalid, 2);
        assert_eq!(features.limit_points, vec![0, 2]);
        assert!(CloudFeatures::extract(&pts, &[], 1).limit_points.is_empty());
    }

    #[test]
    fn middle_points_are_subsampled() {
        let pts = rings(&[1.5], 7);
        let idxs: Vec<usize> = (0..7).collect();
        let features = CloudFeatures::extract(&pts, &idxs, 2);
        assert_eq!(features.middle_points, vec![1, 3, 5]);
    }
}
