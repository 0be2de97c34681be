use std::f64::consts::PI;

use nalgebra as na;

use crate::chain::ChainLayout;
use crate::error::Error;
use crate::lle;
use crate::traversal::CorrespondencePrior;

/// Observed points farther than this from every node are treated as outliers
/// and dropped before the solve.
const OUTLIER_PRUNE_DIST: f64 = 0.1;

/// Full LLE neighborhood size used for the smoothness regularizer.
const LLE_NEIGHBORHOOD: usize = 6;

const SIGMA2_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct RegistrationParams {
    pub beta: f64,
    pub lambda: f64,
    pub lle_weight: f64,
    pub mu: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub include_lle: bool,
    /// Switches the E-step distance metric to arc length along the chain.
    pub use_geodesic: bool,
    /// Correspondence-prior anchoring weight; ignored when no priors are given.
    pub alpha: f64,
    /// Visibility decay rate; 0 disables visibility weighting.
    pub k_vis: f64,
    pub visibility_threshold: f64,
    /// Boost the first and last prior of the chain when anchoring.
    pub clamp: bool,
}

/// Radial-basis kernel over arc-length node coordinates, block-diagonal
/// across objects so one object's deformation cannot pull another.
pub fn kernel_matrix(y: &na::DMatrix<f64>, beta: f64, layout: ChainLayout) -> na::DMatrix<f64> {
    let m = y.nrows();

    let mut coord = Vec::with_capacity(m);
    coord.push(0.0);
    for i in 0..m.saturating_sub(1) {
        coord.push(coord[i] + (y.row(i + 1) - y.row(i)).norm());
    }

    let mut g = na::DMatrix::zeros(m, m);
    for i in 0..m {
        for j in 0..m {
            let d = (coord[i] - coord[j]).abs();
            g[(i, j)] = 1.0 / (2.0 * beta * 2.0 * beta)
                * (-2.0_f64.sqrt() * d / beta).exp()
                * (2.0 * d + 2.0_f64.sqrt() * beta);
        }
    }

    if layout.num_dlos > 1 {
        let mut masked = na::DMatrix::zeros(m, m);
        for dlo in 0..layout.num_dlos {
            let start = dlo * layout.nodes_per_dlo;
            masked
                .slice_mut((start, start), (layout.nodes_per_dlo, layout.nodes_per_dlo))
                .copy_from(&g.slice((start, start), (layout.nodes_per_dlo, layout.nodes_per_dlo)));
        }
        g = masked;
    }

    g
}

fn argmax_column(p: &na::DMatrix<f64>, col: usize) -> usize {
    let mut best = 0;
    let mut best_val = f64::NEG_INFINITY;
    for m in 0..p.nrows() {
        if p[(m, col)] > best_val {
            best_val = p[(m, col)];
            best = m;
        }
    }
    best
}

/// CPD registration with LLE smoothness, correspondence-prior anchoring and
/// visibility weighting. Deforms `y` toward `x_orig` in place and updates
/// `sigma2`; returns whether the EM loop converged within `max_iter`.
///
/// Non-convergence is a soft failure: the last iterate is kept and a warning
/// is logged.
pub fn cpd_lle(
    x_orig: &na::DMatrix<f64>,
    y: &mut na::DMatrix<f64>,
    sigma2: &mut f64,
    nodes_per_dlo: usize,
    params: &RegistrationParams,
    priors: &[CorrespondencePrior],
    visible_nodes: &[usize],
) -> Result<bool, Error> {
    if x_orig.ncols() != 3 {
        return Err(Error::DimensionMismatch {
            expected: 3,
            got: x_orig.ncols(),
        });
    }

    let m = y.nrows();
    let layout = ChainLayout::new(m, nodes_per_dlo.min(m).max(1));

    // prune points too far from every node
    let keep: Vec<usize> = (0..x_orig.nrows())
        .filter(|&n| {
            (0..m).any(|j| (y.row(j) - x_orig.row(n)).norm() < OUTLIER_PRUNE_DIST)
        })
        .collect();
    if keep.is_empty() {
        log::warn!("registration skipped: no observed points near the node chain");
        return Ok(false);
    }
    let x = crate::chain::select_rows(x_orig, &keep);
    let n = x.nrows();
    let d_dims = 3.0;

    let y_0 = y.clone();

    // arc-length coordinate over the whole chain; only the kernel is
    // block-masked, the coordinate itself stays continuous
    let mut node_coord = Vec::with_capacity(m);
    node_coord.push(0.0);
    for i in 0..m - 1 {
        node_coord.push(node_coord[i] + (y_0.row(i + 1) - y_0.row(i)).norm());
    }

    let g = kernel_matrix(&y_0, params.beta, layout);

    let h = if params.include_lle {
        let l = lle::lle_weights(LLE_NEIGHBORHOOD, &y_0, layout);
        Some(lle::lle_regularizer(&l))
    } else {
        None
    };

    // prior selector J and the anchor targets
    let mut j_sel = na::DMatrix::zeros(m, m);
    let mut y_extended = y_0.clone();
    for (k, prior) in priors.iter().enumerate() {
        let idx = prior.index;
        if idx >= m {
            continue;
        }
        let weight = if params.clamp && (k == 0 || k == priors.len() - 1) {
            5.0
        } else {
            1.0
        };
        j_sel[(idx, idx)] = weight;
        y_extended[(idx, 0)] = prior.position.x;
        y_extended[(idx, 1)] = prior.position.y;
        y_extended[(idx, 2)] = prior.position.z;
    }

    let mut diff_xy = na::DMatrix::zeros(m, n);
    for i in 0..m {
        for j in 0..n {
            diff_xy[(i, j)] = (y_0.row(i) - x.row(j)).norm_squared();
        }
    }

    if *sigma2 == 0.0 {
        *sigma2 = diff_xy.sum() / (d_dims * (m * n) as f64);
    }

    let identity = na::DMatrix::<f64>::identity(m, m);

    for it in 0..params.max_iter {
        // squared distances and per-node closest-point distances
        let mut shortest_node_pt_dists = vec![f64::MAX; m];
        for i in 0..m {
            for j in 0..n {
                let dist_sq = (y.row(i) - x.row(j)).norm_squared();
                diff_xy[(i, j)] = dist_sq;
                let dist = dist_sq.sqrt();
                if dist < shortest_node_pt_dists[i] {
                    shortest_node_pt_dists[i] = dist;
                }
            }
            if shortest_node_pt_dists[i] <= params.visibility_threshold {
                shortest_node_pt_dists[i] = 0.0;
            }
        }

        let mut p = diff_xy.map(|v| (-0.5 * v / *sigma2).exp());
        let mut c = (2.0 * PI * *sigma2).powf(d_dims / 2.0) * params.mu / (1.0 - params.mu)
            * m as f64
            / n as f64;

        // the secondary-node fallback below needs at least 4 nodes
        if params.use_geodesic && m >= 4 {
            // pick the primary/secondary responsible pair per point, then
            // convert distances to arc length for nodes outside the pair
            let mut normalized = p.clone();
            for col in 0..n {
                let col_sum: f64 = p.column(col).sum();
                for row in 0..m {
                    normalized[(row, col)] = p[(row, col)] / (col_sum + c);
                }
            }

            let mut dis_sq_geodesic = diff_xy.clone();
            for i in 0..n {
                let max_p_node = argmax_column(&normalized, i);

                let cand_1 = if max_p_node == 0 { 2 } else { max_p_node - 1 };
                let cand_2 = if max_p_node + 1 == m { m - 3 } else { max_p_node + 1 };
                let next_max_p_node = if (y.row(cand_1) - x.row(i)).norm()
                    < (y.row(cand_2) - x.row(i)).norm()
                {
                    cand_1
                } else {
                    cand_2
                };

                let lo = max_p_node.min(next_max_p_node);
                let hi = max_p_node.max(next_max_p_node);
                let d_lo = (y.row(lo) - x.row(i)).norm();
                let d_hi = (y.row(hi) - x.row(i)).norm();

                for j in 0..lo {
                    let geo = (node_coord[j] - node_coord[lo]).abs() + d_lo;
                    dis_sq_geodesic[(j, i)] = geo * geo;
                }
                for j in hi + 1..m {
                    let geo = (node_coord[j] - node_coord[hi]).abs() + d_hi;
                    dis_sq_geodesic[(j, i)] = geo * geo;
                }
            }

            p = dis_sq_geodesic.map(|v| (-0.5 * v / *sigma2).exp());
        }

        // visibility weighting: down-weight occluded nodes' pull
        let partial_visibility =
            !visible_nodes.is_empty() && visible_nodes.len() != m && params.k_vis != 0.0;
        if partial_visibility {
            let p_vis: Vec<f64> = shortest_node_pt_dists
                .iter()
                .map(|&dist| (-params.k_vis * dist).exp())
                .collect();
            let total_p_vis: f64 = p_vis.iter().sum();

            for row in 0..m {
                let scale = p_vis[row] / total_p_vis;
                for col in 0..n {
                    p[(row, col)] *= scale;
                }
            }

            c = (2.0 * PI * *sigma2).powf(d_dims / 2.0) * params.mu / (1.0 - params.mu)
                / n as f64;
        }

        for col in 0..n {
            let col_sum: f64 = p.column(col).sum();
            let denom = col_sum + c;
            for row in 0..m {
                p[(row, col)] /= denom;
            }
        }

        let p1 = p.column_sum(); // row sums of P, length M
        let pt1 = p.row_sum(); // column sums of P, 1 x N
        let np = p1.sum();
        let px = &p * &x;

        // M step
        let d_p1 = na::DMatrix::from_diagonal(&p1);
        let mut a_matrix = &d_p1 * &g + (params.lambda * *sigma2) * &identity;
        let mut b_matrix = &px - &d_p1 * &y_0;

        if let Some(h) = &h {
            a_matrix += (*sigma2 * params.lle_weight) * (h * &g);
            b_matrix -= (*sigma2 * params.lle_weight) * (h * &y_0);
        }
        if !priors.is_empty() {
            a_matrix += params.alpha * (&j_sel * &g);
            b_matrix += params.alpha * (&j_sel * (&y_extended - &y_0));
        }

        let w = a_matrix
            .svd(true, true)
            .solve(&b_matrix, 1e-12)
            .map_err(Error::SolveFailed)?;

        let t = &y_0 + &g * w;

        // sigma2 from the trace identity
        let mut tr_xt_dpt1_x = 0.0;
        for j in 0..n {
            tr_xt_dpt1_x += pt1[j] * x.row(j).norm_squared();
        }
        let tr_pxt_t = px.zip_fold(&t, 0.0, |acc, a, b| acc + a * b);
        let mut tr_tt_dp1_t = 0.0;
        for i in 0..m {
            tr_tt_dp1_t += p1[i] * t.row(i).norm_squared();
        }
        *sigma2 = ((tr_xt_dpt1_x - 2.0 * tr_pxt_t + tr_tt_dp1_t) / (np * d_dims))
            .max(SIGMA2_FLOOR);

        let step = (&t - &*y).norm() / m as f64;
        y.copy_from(&t);

        if step < params.tol {
            log::debug!("registration converged after {} iterations", it + 1);
            return Ok(true);
        }
    }

    log::warn!(
        "registration did not converge within {} iterations",
        params.max_iter
    );
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra as na;

    fn straight_chain(n: usize, spacing: f64) -> na::DMatrix<f64> {
        na::DMatrix::from_fn(n, 3, |i, j| if j == 0 { i as f64 * spacing } else { 0.0 })
    }

    fn base_params() -> RegistrationParams {
        RegistrationParams {
            beta: 5.0,
            lambda: 1.0,
            lle_weight: 1.0,
            mu: 0.05,
            max_iter: 50,
            tol: 0.00001,
            include_lle: false,
            use_geodesic: true,
            alpha: 0.0,
            k_vis: 0.0,
            visibility_threshold: 0.02,
            clamp: false,
        }
    }

    #[test]
    fn kernel_is_block_diagonal_across_objects() {
        let y = straight_chain(10, 1.0);
        let g = kernel_matrix(&y, 5.0, crate::chain::ChainLayout::new(10, 5));
        for i in 0..5 {
            for j in 5..10 {
                assert_eq!(g[(i, j)], 0.0);
                assert_eq!(g[(j, i)], 0.0);
            }
        }
        assert!(g[(0, 4)] > 0.0 && g[(6, 9)] > 0.0);
    }

    #[test]
    fn self_registration_is_idempotent() {
        // 20-node chain along x at unit spacing, X = Y
        let y_ref = straight_chain(20, 1.0);
        let mut y = y_ref.clone();
        let mut sigma2 = 0.0;

        let mut params = base_params();
        params.mu = 0.01;

        let converged =
            cpd_lle(&y_ref, &mut y, &mut sigma2, 20, &params, &[], &[]).unwrap();

        assert!(converged);
        assert!(sigma2 < 0.05, "sigma2 stayed at {}", sigma2);
        for i in 0..20 {
            let dev = (y.row(i) - y_ref.row(i)).norm();
            assert!(dev < 1e-3, "node {} deviated by {}", i, dev);
        }
    }

    #[test]
    fn registration_follows_a_translated_cloud() {
        let y_ref = straight_chain(15, 0.05);
        let mut x = y_ref.clone();
        for i in 0..x.nrows() {
            x[(i, 1)] += 0.03;
        }

        let mut y = y_ref.clone();
        let mut sigma2 = 0.0;
        cpd_lle(&x, &mut y, &mut sigma2, 15, &base_params(), &[], &[]).unwrap();

        for i in 0..15 {
            assert!(
                (y[(i, 1)] - 0.03).abs() < 0.015,
                "node {} only moved to y = {}",
                i,
                y[(i, 1)]
            );
        }
    }

    #[test]
    fn objects_are_displacement_isolated() {
        // two 5-node chains far apart; perturbing A's points must not move B.
        // sigma2 is shared between the blocks, so compare a single EM step.
        let npd = 5;
        let mut y_ref = na::DMatrix::zeros(10, 3);
        for i in 0..5 {
            y_ref[(i, 0)] = i as f64 * 0.05;
            y_ref[(i + 5, 0)] = i as f64 * 0.05;
            y_ref[(i + 5, 1)] = 2.0;
        }

        let mut params = base_params();
        params.max_iter = 1;

        let run = |x: &na::DMatrix<f64>| {
            let mut y = y_ref.clone();
            let mut sigma2 = 1e-4;
            cpd_lle(x, &mut y, &mut sigma2, npd, &params, &[], &[]).unwrap();
            y
        };

        let x_a = y_ref.clone();
        let mut x_b = y_ref.clone();
        for i in 0..5 {
            x_b[(i, 1)] += 0.02; // perturb object A's points only
        }

        let (res_a, res_b) = (run(&x_a), run(&x_b));
        for i in 5..10 {
            let drift = (res_a.row(i) - res_b.row(i)).norm();
            assert!(drift < 1e-9, "object B node {} drifted by {}", i, drift);
        }
        // sanity: object A did react to its perturbed points
        assert!((res_a.rows(0, 5) - res_b.rows(0, 5)).norm() > 1e-6);
    }

    #[test]
    fn empty_cloud_after_pruning_is_a_soft_failure() {
        let y_ref = straight_chain(10, 0.05);
        let mut far = y_ref.clone();
        for i in 0..far.nrows() {
            far[(i, 2)] += 5.0;
        }

        let mut y = y_ref.clone();
        let mut sigma2 = 0.0;
        let converged =
            cpd_lle(&far, &mut y, &mut sigma2, 10, &base_params(), &[], &[]).unwrap();

        assert!(!converged);
        assert_eq!(y, y_ref);
    }

    #[test]
    fn priors_anchor_nodes_toward_their_hints() {
        let y_ref = straight_chain(10, 0.05);
        let x = y_ref.clone();

        let hint = na::Point3::new(0.0, 0.05, 0.0);
        let priors = vec![crate::traversal::CorrespondencePrior::new(0, hint)];

        let mut params = base_params();
        params.alpha = 5.0;
        params.max_iter = 20;

        let mut y = y_ref.clone();
        let mut sigma2 = 0.0;
        cpd_lle(&x, &mut y, &mut sigma2, 10, &params, &priors, &[]).unwrap();

        // node 0 gets pulled off the data toward the hint
        assert!(y[(0, 1)] > 0.005, "node 0 stayed at y = {}", y[(0, 1)]);
    }
}
