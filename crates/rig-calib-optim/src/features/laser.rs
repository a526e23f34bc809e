use rig_calib_core::LaserEdge;

/// Inner edges of a 2D scan hit sequence.
///
/// An edge is a pair of consecutive hit indices that are not contiguous in
/// the scan. The first and the last pair are discarded as boundary artifacts.
pub fn detect_edges(idxs: &[usize]) -> Vec<LaserEdge> {
    let pairs: Vec<LaserEdge> = idxs
        .windows(2)
        .filter(|w| w[1] != w[0] + 1)
        .map(|w| LaserEdge {
            before: w[0],
            after: w[1],
        })
        .collect();
    if pairs.len() <= 2 {
        return Vec::new();
    }
    pairs[1..pairs.len() - 1].to_vec()
}
