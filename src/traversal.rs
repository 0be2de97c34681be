use nalgebra as na;

use crate::geometry::{line_sphere_intersection, point_of_row};

/// A "this node is believed to be here" hint fed into registration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrespondencePrior {
    pub index: usize,
    pub position: na::Point3<f64>,
}

impl CorrespondencePrior {
    #[inline]
    pub fn new(index: usize, position: na::Point3<f64>) -> Self {
        Self { index, position }
    }

    #[inline]
    pub fn offset(self, by: usize) -> Self {
        Self {
            index: self.index + by,
            ..self
        }
    }
}

/// Which end of the chain a traversal pass is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Head,
    Tail,
    /// Seeded from an interior guide node (index into the guide-node rows),
    /// marching toward both ends.
    Bidirectional { seed: usize },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Walks the guide-node polyline in lock-step with the arc-length table,
/// emitting an interpolated point for every node whose arc coordinate still
/// fits on the polyline.
///
/// `geodesic_coord` and `visible_nodes` are object-local; `guide_nodes` has
/// one row per visible node. Bidirectional alignment is not defined for this
/// strategy; callers fall back to the Euclidean pursuit for that case.
pub fn traverse_geodesic(
    geodesic_coord: &[f64],
    guide_nodes: &na::DMatrix<f64>,
    visible_nodes: &[usize],
    alignment: Alignment,
) -> Vec<CorrespondencePrior> {
    assert_eq!(guide_nodes.nrows(), visible_nodes.len());

    if guide_nodes.nrows() == 1 {
        return vec![CorrespondencePrior::new(
            visible_nodes[0],
            point_of_row(guide_nodes, 0),
        )];
    }

    // cumulative length along the guide polyline
    let g = guide_nodes.nrows();
    let mut cum = Vec::with_capacity(g);
    cum.push(0.0);
    for i in 1..g {
        cum.push(cum[i - 1] + (guide_nodes.row(i) - guide_nodes.row(i - 1)).norm());
    }
    let total = cum[g - 1];

    let mut out = Vec::new();
    match alignment {
        Alignment::Head => {
            let first = visible_nodes[0];
            out.push(CorrespondencePrior::new(first, point_of_row(guide_nodes, 0)));

            let mut gi = 0;
            for node in first + 1..geodesic_coord.len() {
                let s = geodesic_coord[node] - geodesic_coord[first];
                if s > total {
                    break;
                }
                while gi + 2 < g && cum[gi + 1] < s {
                    gi += 1;
                }
                let seg_len = cum[gi + 1] - cum[gi];
                let frac = if seg_len > 0.0 { (s - cum[gi]) / seg_len } else { 0.0 };
                let p0 = point_of_row(guide_nodes, gi);
                let p1 = point_of_row(guide_nodes, gi + 1);
                out.push(CorrespondencePrior::new(node, p0 + (p1 - p0) * frac));
            }
        }
        Alignment::Tail => {
            let last = *visible_nodes.last().unwrap();
            out.push(CorrespondencePrior::new(last, point_of_row(guide_nodes, g - 1)));

            let mut gi = g - 1;
            for node in (0..last).rev() {
                let s = geodesic_coord[last] - geodesic_coord[node];
                if s > total {
                    break;
                }
                while gi > 1 && total - cum[gi - 1] < s {
                    gi -= 1;
                }
                let seg_len = cum[gi] - cum[gi - 1];
                let frac = if seg_len > 0.0 {
                    (s - (total - cum[gi])) / seg_len
                } else {
                    0.0
                };
                let p0 = point_of_row(guide_nodes, gi);
                let p1 = point_of_row(guide_nodes, gi - 1);
                out.push(CorrespondencePrior::new(node, p0 + (p1 - p0) * frac));
            }
        }
        Alignment::Bidirectional { .. } => {
            unreachable!("bidirectional traversal is Euclidean-only")
        }
    }

    out
}

/// Pure-pursuit densification: starting at an anchored guide node, each
/// arc-length step looks for the point on the current or an upcoming guide
/// segment at exactly the look-ahead distance from the current center
/// (a line/sphere intersection).
///
/// `geodesic_coord` and `visible_nodes` are object-local; `guide_nodes` has
/// one row per visible node.
pub fn traverse_euclidean(
    geodesic_coord: &[f64],
    guide_nodes: &na::DMatrix<f64>,
    visible_nodes: &[usize],
    alignment: Alignment,
) -> Vec<CorrespondencePrior> {
    assert_eq!(guide_nodes.nrows(), visible_nodes.len());

    if guide_nodes.nrows() == 1 {
        return vec![CorrespondencePrior::new(
            visible_nodes[0],
            point_of_row(guide_nodes, 0),
        )];
    }

    match alignment {
        Alignment::Head => {
            let mut out = vec![CorrespondencePrior::new(
                visible_nodes[0],
                point_of_row(guide_nodes, 0),
            )];
            out.extend(pursue(
                geodesic_coord,
                guide_nodes,
                visible_nodes[0],
                0,
                Direction::Forward,
            ));
            out
        }
        Alignment::Tail => {
            let last_row = guide_nodes.nrows() - 1;
            let mut out = vec![CorrespondencePrior::new(
                *visible_nodes.last().unwrap(),
                point_of_row(guide_nodes, last_row),
            )];
            out.extend(pursue(
                geodesic_coord,
                guide_nodes,
                *visible_nodes.last().unwrap(),
                last_row,
                Direction::Backward,
            ));
            out
        }
        Alignment::Bidirectional { seed } => {
            let mut out = vec![CorrespondencePrior::new(
                visible_nodes[seed],
                point_of_row(guide_nodes, seed),
            )];
            out.extend(pursue(
                geodesic_coord,
                guide_nodes,
                visible_nodes[seed],
                seed,
                Direction::Forward,
            ));
            out.extend(pursue(
                geodesic_coord,
                guide_nodes,
                visible_nodes[seed],
                seed,
                Direction::Backward,
            ));
            out
        }
    }
}

/// One marching pass; the anchored starting pair itself is not emitted.
fn pursue(
    geodesic_coord: &[f64],
    guide_nodes: &na::DMatrix<f64>,
    start_node: usize,
    start_row: usize,
    direction: Direction,
) -> Vec<CorrespondencePrior> {
    let g = guide_nodes.nrows();
    let mut out = Vec::new();

    let mut node = start_node;
    let mut last_found = start_row;
    let mut center = point_of_row(guide_nodes, start_row);

    loop {
        // next arc step, or the sequence is exhausted
        let (look_ahead, next_node) = match direction {
            Direction::Forward => {
                if node + 1 >= geodesic_coord.len() {
                    break;
                }
                ((geodesic_coord[node + 1] - geodesic_coord[node]).abs(), node + 1)
            }
            Direction::Backward => {
                if node == 0 {
                    break;
                }
                ((geodesic_coord[node] - geodesic_coord[node - 1]).abs(), node - 1)
            }
        };

        // candidate segments from the last matched one outward
        let segments: Vec<(usize, usize)> = match direction {
            Direction::Forward => (last_found..g.saturating_sub(1)).map(|i| (i, i + 1)).collect(),
            Direction::Backward => (1..=last_found).rev().map(|i| (i, i - 1)).collect(),
        };

        let mut found = None;
        for (near, far) in segments {
            let p_near = point_of_row(guide_nodes, near);
            let p_far = point_of_row(guide_nodes, far);
            let hits = line_sphere_intersection(p_near, p_far, center, look_ahead);

            if hits.is_empty() {
                continue;
            }
            // a single solution behind the current center is no progress
            if hits.len() == 1 && (hits[0] - p_far).norm() > (center - p_far).norm() {
                continue;
            }

            let pick = if hits.len() == 2 {
                if (hits[0] - p_far).norm() <= (hits[1] - p_far).norm() {
                    hits[0]
                } else {
                    hits[1]
                }
            } else {
                hits[0]
            };

            found = Some((near, pick));
            break;
        }

        match found {
            Some((row, pt)) => {
                last_found = row;
                center = pt;
                out.push(CorrespondencePrior::new(next_node, pt));
                node = next_node;
            }
            None => break,
        }
    }

    out
}

/// Merges a head-aligned and a tail-aligned pass: nodes covered by both get
/// the average of the two predictions, nodes covered by one keep that
/// prediction, uncovered nodes get no prior.
pub fn average_passes(
    head: &[CorrespondencePrior],
    tail: &[CorrespondencePrior],
    num_nodes: usize,
) -> Vec<CorrespondencePrior> {
    let mut from_head: Vec<Option<na::Point3<f64>>> = vec![None; num_nodes];
    let mut from_tail: Vec<Option<na::Point3<f64>>> = vec![None; num_nodes];

    for p in head {
        if p.index < num_nodes {
            from_head[p.index] = Some(p.position);
        }
    }
    for p in tail {
        if p.index < num_nodes {
            from_tail[p.index] = Some(p.position);
        }
    }

    (0..num_nodes)
        .filter_map(|i| match (from_head[i], from_tail[i]) {
            (Some(a), Some(b)) => Some(CorrespondencePrior::new(i, na::center(&a, &b))),
            (Some(a), None) => Some(CorrespondencePrior::new(i, a)),
            (None, Some(b)) => Some(CorrespondencePrior::new(i, b)),
            (None, None) => None,
        })
        .collect()
}
