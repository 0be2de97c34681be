use nalgebra as na;

/// Relaxation sweeps applied to restore segment rest lengths.
const LENGTH_ITERATIONS: usize = 10;

/// Post-solve smoothing with the same contract as the external collaborator
/// it substitutes: takes the pre-solve chain, the solved chain, the
/// per-object edge list, the initial chain and the kernel matrix, and
/// returns a smoothed chain of identical shape.
///
/// The displacement field `y - y_0` is smoothed with the row-normalized
/// kernel (rigid translations pass through exactly, block-diagonal kernels
/// keep objects independent), then segment lengths are relaxed toward the
/// rest lengths of the initial chain.
pub fn smooth(
    y_0: &na::DMatrix<f64>,
    y: &na::DMatrix<f64>,
    edges: &[(usize, usize)],
    init_nodes: &na::DMatrix<f64>,
    g: &na::DMatrix<f64>,
) -> na::DMatrix<f64> {
    let m = y.nrows();

    // kernel-weighted averaging of the displacement field
    let displacement = y - y_0;
    let mut smoothed = y_0.clone();
    for i in 0..m {
        let row_sum: f64 = g.row(i).sum();
        if row_sum <= 0.0 {
            smoothed.row_mut(i).copy_from(&y.row(i));
            continue;
        }
        let mut avg = na::RowVector3::zeros();
        for j in 0..m {
            avg += displacement.row(j) * (g[(i, j)] / row_sum);
        }
        smoothed.row_mut(i).copy_from(&(y_0.row(i) + avg));
    }

    // relax segment lengths toward the initial chain's rest lengths
    let rest: Vec<f64> = edges
        .iter()
        .map(|&(a, b)| (init_nodes.row(b) - init_nodes.row(a)).norm())
        .collect();

    for _ in 0..LENGTH_ITERATIONS {
        for (k, &(a, b)) in edges.iter().enumerate() {
            let seg = smoothed.row(b) - smoothed.row(a);
            let len = seg.norm();
            if len <= f64::EPSILON {
                continue;
            }
            let delta = seg * ((1.0 - rest[k] / len) * 0.5);
            let new_a = smoothed.row(a) + delta.clone();
            let new_b = smoothed.row(b) - delta;
            smoothed.row_mut(a).copy_from(&new_a);
            smoothed.row_mut(b).copy_from(&new_b);
        }
    }

    smoothed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainLayout;
    use crate::registration::kernel_matrix;

    fn straight_chain(n: usize, spacing: f64) -> na::DMatrix<f64> {
        na::DMatrix::from_fn(n, 3, |i, j| if j == 0 { i as f64 * spacing } else { 0.0 })
    }

    #[test]
    fn rigid_translation_passes_through_exactly() {
        let layout = ChainLayout::new(10, 10);
        let y_0 = straight_chain(10, 0.05);
        let mut y = y_0.clone();
        for i in 0..10 {
            y[(i, 1)] += 0.3;
        }

        let g = kernel_matrix(&y_0, 0.1, layout);
        let out = smooth(&y_0, &y, &layout.edges(), &y_0, &g);

        assert!((out - y).norm() < 1e-9);
    }

    #[test]
    fn stretched_segments_relax_toward_rest_length() {
        let layout = ChainLayout::new(10, 10);
        let init = straight_chain(10, 0.05);
        let y_0 = init.clone();

        let mut y = init.clone();
        y[(9, 0)] += 0.1; // pull the tail node away, stretching the last edge

        let g = kernel_matrix(&y_0, 0.1, layout);
        let out = smooth(&y_0, &y, &layout.edges(), &init, &g);

        let stretched_before = (y.row(9) - y.row(8)).norm();
        let stretched_after = (out.row(9) - out.row(8)).norm();
        assert!(stretched_before > 0.14);
        assert!(
            (stretched_after - 0.05).abs() < (stretched_before - 0.05).abs(),
            "edge stayed at {}",
            stretched_after
        );
    }

    #[test]
    fn output_shape_matches_input() {
        let layout = ChainLayout::new(8, 4);
        let init = straight_chain(8, 0.05);
        let g = kernel_matrix(&init, 0.1, layout);
        let out = smooth(&init, &init, &layout.edges(), &init, &g);

        assert_eq!(out.shape(), (8, 3));
        assert!((out - init).norm() < 1e-9);
    }
}
