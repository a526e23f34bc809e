//! Frame-tree queries over the transforms of a collection.
//!
//! Every child frame has exactly one parent. Paths are routed through the
//! lowest common ancestor, so transforms above it never enter a lookup.

use crate::dataset::Collection;
use crate::error::{DatasetError, DatasetResult};
use crate::math::Iso3;
use crate::transform::{Transform, TransformKey};
use std::collections::HashMap;

/// One edge of a frame path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub key: TransformKey,
    /// `true` when the edge is traversed from parent to child.
    pub inverted: bool,
}

impl Collection {
    fn parent_edges(&self, collection: &str) -> DatasetResult<HashMap<&str, &Transform>> {
        let mut edges = HashMap::with_capacity(self.transforms.len());
        for t in self.transforms.values() {
            if edges.insert(t.child.as_str(), t).is_some() {
                return Err(DatasetError::AmbiguousParent {
                    collection: collection.to_string(),
                    frame: t.child.clone(),
                });
            }
        }
        Ok(edges)
    }

    /// Edges on the path that maps points from `source` into `target`.
    ///
    /// `collection` is only used to label errors.
    pub fn chain(
        &self,
        collection: &str,
        source: &str,
        target: &str,
    ) -> DatasetResult<Vec<ChainLink>> {
        let edges = self.parent_edges(collection)?;
        let ancestors = |frame: &str| {
            let mut path = vec![frame.to_string()];
            let mut current = frame;
            while let Some(t) = edges.get(current) {
                // A cycle would loop forever; stop once the path revisits a frame.
                if path.iter().any(|f| f == &t.parent) {
                    break;
                }
                path.push(t.parent.clone());
                current = t.parent.as_str();
            }
            path
        };

        let up = ancestors(source);
        let down = ancestors(target);
        let Some((i_up, i_down)) = up
            .iter()
            .enumerate()
            .find_map(|(i, f)| down.iter().position(|g| g == f).map(|j| (i, j)))
        else {
            return Err(DatasetError::FramesNotConnected {
                collection: collection.to_string(),
                source_frame: source.to_string(),
                target_frame: target.to_string(),
            });
        };

        let mut links = Vec::with_capacity(i_up + i_down);
        for frame in &up[..i_up] {
            links.push(ChainLink {
                key: edges[frame.as_str()].key(),
                inverted: false,
            });
        }
        for frame in down[..i_down].iter().rev() {
            links.push(ChainLink {
                key: edges[frame.as_str()].key(),
                inverted: true,
            });
        }
        Ok(links)
    }

    /// Isometry mapping points expressed in `source` into `target`.
    pub fn lookup(&self, collection: &str, target: &str, source: &str) -> DatasetResult<Iso3> {
        let links = self.chain(collection, source, target)?;
        let mut pose = Iso3::identity();
        for link in &links {
            let t = self
                .transform(&link.key)
                .ok_or_else(|| DatasetError::MissingTransform {
                    collection: collection.to_string(),
                    key: link.key.as_string(),
                })?
                .to_iso3();
            pose = if link.inverted {
                t.inverse() * pose
            } else {
                t * pose
            };
        }
        Ok(pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Pt3, Vec3};
    use approx::assert_relative_eq;

    fn tree() -> Collection {
        let mut c = Collection::default();
        c.insert_transform(Transform::from_rpy(
            "world",
            "base",
            Vec3::new(5.0, 0.0, 0.0),
            [0.0, 0.0, 0.4],
        ));
        c.insert_transform(Transform::from_rpy(
            "base",
            "camera",
            Vec3::new(0.1, 0.2, 0.3),
            [0.1, 0.0, 0.0],
        ));
        c.insert_transform(Transform::from_rpy(
            "base",
            "pattern",
            Vec3::new(1.0, 0.0, 0.0),
            [0.0, 0.2, 0.0],
        ));
        c
    }

    #[test]
    fn chain_stops_at_common_ancestor() {
        let c = tree();
        let links = c.chain("0", "camera", "pattern").unwrap();
        let keys: Vec<String> = links.iter().map(|l| l.key.as_string()).collect();
        assert_eq!(keys, vec!["base-camera", "base-pattern"]);
        assert!(!links[0].inverted);
        assert!(links[1].inverted);
    }

    #[test]
    fn lookup_matches_manual_composition() {
        let c = tree();
        let t_bc = c.transforms["base-camera"].to_iso3();
        let t_bp = c.transforms["base-pattern"].to_iso3();
        let p = Pt3::new(0.3, -0.2, 1.5);
        let expected = t_bp.inverse() * t_bc * p;
        let got = c.lookup("0", "pattern", "camera").unwrap() * p;
        assert_relative_eq!(got, expected, epsilon = 1e-12);
    }

    #[test]
    fn lookup_to_same_frame_is_identity() {
        let c = tree();
        let pose = c.lookup("0", "camera", "camera").unwrap();
        assert_relative_eq!(pose.to_homogeneous(), Iso3::identity().to_homogeneous());
    }

    #[test]
    fn disconnected_frames_error() {
        let c = tree();
        let err = c.lookup("7", "camera", "elsewhere").unwrap_err();
        assert!(matches!(err, DatasetError::FramesNotConnected { .. }));
    }
}
