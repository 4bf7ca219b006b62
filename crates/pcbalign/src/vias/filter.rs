use super::Via;
use crate::geometry::dist2;

fn sort_by_confidence(vias: Vec<Via>) -> Vec<Via> {
    let mut vias = vias;
    vias.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    vias
}

/// Deduplicate vias reported by several passes: the most confident via
/// within `radius` wins. Output is ordered by (y, x).
pub fn merge_by_proximity(vias: Vec<Via>, radius: f64) -> Vec<Via> {
    let vias = sort_by_confidence(vias);
    let mut keep = vec![true; vias.len()];
    let r2 = radius * radius;

    for i in 0..vias.len() {
        if !keep[i] {
            continue;
        }
        for j in (i + 1)..vias.len() {
            if keep[j] && dist2(vias[i].center, vias[j].center) < r2 {
                keep[j] = false;
            }
        }
    }

    let mut out: Vec<Via> = vias
        .into_iter()
        .enumerate()
        .filter_map(|(index, via)| keep[index].then_some(via))
        .collect();
    out.sort_by(|a, b| {
        a.center[1]
            .total_cmp(&b.center[1])
            .then(a.center[0].total_cmp(&b.center[0]))
    });
    out
}

/// Drop vias with more than `max_neighbours` others within `radius`.
///
/// Header-pin rows and other regular clusters produce symmetric,
/// ambiguous matches; isolated board vias are kept.
pub fn reject_dense_vias(vias: Vec<Via>, radius: f64, max_neighbours: usize) -> Vec<Via> {
    let r2 = radius * radius;
    let dense: Vec<bool> = vias
        .iter()
        .enumerate()
        .map(|(i, v)| {
            vias.iter()
                .enumerate()
                .filter(|(j, o)| *j != i && dist2(v.center, o.center) <= r2)
                .count()
                > max_neighbours
        })
        .collect();
    let removed = dense.iter().filter(|d| **d).count();
    if removed > 0 {
        tracing::debug!("dense-via filter removed {} of {} vias", removed, vias.len());
    }
    vias.into_iter()
        .zip(dense)
        .filter_map(|(v, d)| (!d).then_some(v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vias::ViaMethod;

    fn via(x: f64, y: f64, confidence: f64) -> Via {
        Via::new([x, y], 4.0, confidence, ViaMethod::Standard)
    }

    #[test]
    fn cluster_removed_isolated_kept() {
        let vias = vec![
            via(100.0, 100.0, 0.9),
            via(110.0, 100.0, 0.9),
            via(100.0, 110.0, 0.9),
            via(110.0, 110.0, 0.9),
            via(300.0, 250.0, 0.9),
        ];
        let kept = reject_dense_vias(vias, 20.0, 2);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].center, [300.0, 250.0]);
    }

    #[test]
    fn pairs_and_rows_of_three_survive() {
        let vias = vec![via(0.0, 0.0, 0.9), via(10.0, 0.0, 0.9), via(20.0, 0.0, 0.9)];
        // Middle via has exactly two neighbours.
        assert_eq!(reject_dense_vias(vias, 12.0, 2).len(), 3);
    }

    #[test]
    fn merge_keeps_most_confident() {
        let mut bright = via(50.5, 50.0, 0.95);
        bright.method = ViaMethod::BrightCore;
        let vias = vec![via(50.0, 50.0, 0.7), bright, via(80.0, 50.0, 0.6)];
        let merged = merge_by_proximity(vias, 3.0);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].method, ViaMethod::BrightCore);
        assert_eq!(merged[1].center, [80.0, 50.0]);
    }
}
