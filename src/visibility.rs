use nalgebra as na;

use crate::chain::ChainLayout;
use crate::geometry::{plot_thick_line, point_of_row, CameraModel};

#[derive(Debug, Clone)]
pub struct VisibilityParams {
    /// Maximum nearest-point distance for a node to count as observed.
    pub visibility_threshold: f64,
    /// Rasterized width of a projected chain edge, in pixels.
    pub dlo_pixel_width: usize,
    /// Maximum arc-length gap between visible nodes that is filled in.
    pub d_vis: f64,
}

/// Per-frame visibility labels.
#[derive(Debug, Clone, Default)]
pub struct NodeVisibility {
    /// Indices judged directly observed, strictly increasing.
    pub visible: Vec<usize>,
    /// `visible` with small same-object gaps filled in.
    pub extended: Vec<usize>,
}

/// Labels each node of the previous frame's chain as visible or occluded
/// against the current point cloud.
///
/// Self-occlusion is resolved by processing projected edges near-to-far:
/// an edge claims its pixels when processed, and a node whose pixel was
/// already claimed by a nearer edge is occluded no matter how close the
/// observed points are.
pub fn classify(
    y: &na::DMatrix<f64>,
    x: &na::DMatrix<f64>,
    camera: &CameraModel,
    img_rows: usize,
    img_cols: usize,
    layout: ChainLayout,
    geodesic_coord: &[f64],
    params: &VisibilityParams,
) -> NodeVisibility {
    let m = y.nrows();
    if m == 0 || x.nrows() == 0 || img_rows == 0 || img_cols == 0 {
        return NodeVisibility::default();
    }

    // nearest observed point per node
    let mut shortest_node_pt_dists = vec![f64::MAX; m];
    for i in 0..m {
        for j in 0..x.nrows() {
            let dist = (y.row(i) - x.row(j)).norm();
            if dist < shortest_node_pt_dists[i] {
                shortest_node_pt_dists[i] = dist;
            }
        }
    }

    // chain edges ordered near-to-far by midpoint distance from the camera
    let mut edge_order: Vec<usize> = (0..m - 1).filter(|&i| !layout.is_wrap_edge(i)).collect();
    edge_order.sort_by(|&a, &b| {
        let da = ((y.row(a) + y.row(a + 1)) / 2.0).norm();
        let db = ((y.row(b) + y.row(b + 1)) / 2.0).norm();
        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
    });

    let pixels: Vec<Option<(i64, i64)>> = (0..m)
        .map(|i| camera.project(&point_of_row(y, i)))
        .collect();

    let mut claimed = vec![false; img_rows * img_cols];
    let mut is_visible = vec![false; m];

    let pixel_free = |claimed: &[bool], px: Option<(i64, i64)>| -> bool {
        match px {
            Some((c, r)) => {
                if r < 0 || c < 0 || r as usize >= img_rows || c as usize >= img_cols {
                    // outside the image no drawn edge can hide it
                    true
                } else {
                    !claimed[r as usize * img_cols + c as usize]
                }
            }
            None => false,
        }
    };

    for &idx in &edge_order {
        let (p0, p1) = match (pixels[idx], pixels[idx + 1]) {
            (Some(a), Some(b)) => (a, b),
            _ => continue,
        };

        for (node, px) in [(idx, pixels[idx]), (idx + 1, pixels[idx + 1])] {
            if pixel_free(&claimed, px) && shortest_node_pt_dists[node] <= params.visibility_threshold
            {
                is_visible[node] = true;
            }
        }

        plot_thick_line(p0, p1, params.dlo_pixel_width, img_rows, img_cols, |r, c| {
            claimed[r * img_cols + c] = true;
        });
    }

    let visible: Vec<usize> = (0..m).filter(|&i| is_visible[i]).collect();
    let extended = fill_gaps(&visible, geodesic_coord, layout, params.d_vis);

    NodeVisibility { visible, extended }
}

/// Fills in runs of occluded nodes between visible neighbors when the
/// arc-length gap is at most `d_vis` and both sides lie on the same object.
pub fn fill_gaps(
    visible: &[usize],
    geodesic_coord: &[f64],
    layout: ChainLayout,
    d_vis: f64,
) -> Vec<usize> {
    let mut extended = Vec::with_capacity(visible.len());

    for w in visible.windows(2) {
        let (a, b) = (w[0], w[1]);
        extended.push(a);

        if layout.object_of(a) != layout.object_of(b) {
            continue;
        }
        if (geodesic_coord[b] - geodesic_coord[a]).abs() <= d_vis {
            extended.extend(a + 1..b);
        }
    }
    if let Some(&last) = visible.last() {
        extended.push(last);
    }

    extended
}
