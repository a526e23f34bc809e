use super::CornerMode;
use rig_calib_core::{CornerObservation, PatternConfig};

/// Corners that become residuals, and the number of detections with an id
/// outside the pattern grid.
pub fn select_corners(
    corners: &[CornerObservation],
    pattern: &PatternConfig,
    mode: CornerMode,
    step: usize,
) -> (Vec<CornerObservation>, usize) {
    let valid: Vec<CornerObservation> = corners
        .iter()
        .copied()
        .filter(|c| pattern.grid_coords(c.id).is_some())
        .collect();
    let invalid = corners.len() - valid.len();
    let kept = match mode {
        CornerMode::All => valid.into_iter().step_by(step.max(1)).collect(),
        CornerMode::Extrema => extrema_corners(&valid, pattern),
    };
    (kept, invalid)
}

/// The detected corners extreme in `col + row` and `col - row`.
///
/// For a full detection these are the four outer corners of the grid. Fewer
/// are returned when the extremes coincide.
pub fn extrema_corners(
    corners: &[CornerObservation],
    pattern: &PatternConfig,
) -> Vec<CornerObservation> {
    let keyed: Vec<(i64, i64, CornerObservation)> = corners
        .iter()
        .filter_map(|c| {
            let (col, row) = pattern.grid_coords(c.id)?;
            let (col, row) = (col as i64, row as i64);
            Some((col + row, col - row, *c))
        })
        .collect();

    let by_sum = |k: &&(i64, i64, CornerObservation)| k.0;
    let by_diff = |k: &&(i64, i64, CornerObservation)| k.1;

    let mut out: Vec<CornerObservation> = Vec::with_capacity(4);
    for (_, _, c) in [
        keyed.iter().min_by_key(by_sum),
        keyed.iter().max_by_key(by_diff),
        keyed.iter().max_by_key(by_sum),
        keyed.iter().min_by_key(by_diff),
    ]
    .into_iter()
    .flatten()
    {
        if out.iter().all(|o| o.id != c.id) {
            out.push(*c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_calib_core::{BorderSize, GridSize};

    fn pattern() -> PatternConfig {
        PatternConfig {
            fixed: false,
            parent_link: "base".into(),
            link: "pattern".into(),
            dimension: GridSize { x: 4, y: 3 },
            size: 0.1,
            border_size: BorderSize::default(),
        }
    }

    fn all_corners(p: &PatternConfig) -> Vec<CornerObservation> {
        (0..p.num_corners())
            .map(|id| CornerObservation {
                id,
                x: id as f64,
                y: 0.0,
            })
            .collect()
    }

    #[test]
    fn extrema_of_full_grid_are_outer_corners() {
        let p = pattern();
        let ids: Vec<usize> = extrema_corners(&all_corners(&p), &p)
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![0, 3, 11, 8]);
    }

    #[test]
    fn subsampling_keeps_every_nth() {
        let p = pattern();
        let (kept, invalid) = select_corners(&all_corners(&p), &p, CornerMode::All, 5);
        assert_eq!(invalid, 0);
        let ids: Vec<usize> = kept.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 5, 10]);
    }

    #[test]
    fn out_of_grid_ids_are_dropped() {
        let p = pattern();
        let mut corners = all_corners(&p);
        corners.push(CornerObservation {
            id: 99,
            x: 0.0,
            y: 0.0,
        });
        let (kept, invalid) = select_corners(&corners, &p, CornerMode::All, 1);
        assert_eq!(invalid, 1);
        assert_eq!(kept.len(), 12);
    }

    #[test]
    fn single_corner_extrema_is_deduplicated() {
        let p = pattern();
        let corners = vec![CornerObservation {
            id: 5,
            x: 1.0,
            y: 2.0,
        }];
        assert_eq!(extrema_corners(&corners, &p).len(), 1);
    }
}
