use nalgebra as na;

use crate::chain::ChainLayout;

const RIDGE: f64 = 0.00001;

/// Indices of the up-to-2k chain neighbors of `idx` within a block of `m`
/// nodes, truncated at the block ends. `idx` itself is excluded.
pub fn nearest_indices(k: usize, m: usize, idx: usize) -> Vec<usize> {
    let lo = idx.saturating_sub(k);
    let hi = (idx + k).min(m.saturating_sub(1));

    (lo..=hi).filter(|&i| i != idx).collect()
}

/// LLE reconstruction weights: a sparse M x M matrix W whose row i holds the
/// affine weights reconstructing node i from its chain neighbors within the
/// same object. Rows sum to one; entries outside the neighbor set are zero.
///
/// `k` is the full neighborhood size; the per-side half-width is `k / 2`.
pub fn lle_weights(k: usize, x: &na::DMatrix<f64>, layout: ChainLayout) -> na::DMatrix<f64> {
    let m = x.nrows();
    let mut w = na::DMatrix::zeros(m, m);

    for i in 0..m {
        let dlo_index = i / layout.nodes_per_dlo;
        let offset = dlo_index * layout.nodes_per_dlo;
        // the last block may be truncated when x is a visible-node subset
        let block_len = layout.nodes_per_dlo.min(m - offset);

        let indices: Vec<usize> = nearest_indices(k / 2, block_len, i - offset)
            .into_iter()
            .map(|idx| idx + offset)
            .collect();
        if indices.is_empty() {
            continue;
        }

        // gram matrix of (neighbor - node) difference vectors
        let mut component = na::DMatrix::zeros(x.ncols(), indices.len());
        for (c, &idx) in indices.iter().enumerate() {
            component
                .column_mut(c)
                .copy_from(&(x.row(i) - x.row(idx)).transpose());
        }
        let mut gi = component.transpose() * &component;

        let gi_inv = match gi.clone().try_inverse() {
            Some(inv) => inv,
            None => {
                for d in 0..gi.nrows() {
                    gi[(d, d)] += RIDGE;
                }
                match gi.clone().try_inverse() {
                    Some(inv) => inv,
                    // fully degenerate neighborhood, spread weights evenly
                    None => {
                        let uniform = 1.0 / indices.len() as f64;
                        for &idx in &indices {
                            w[(i, idx)] = uniform;
                        }
                        continue;
                    }
                }
            }
        };

        let ones = na::DVector::from_element(indices.len(), 1.0);
        let numer = &gi_inv * &ones;
        let denom = numer.sum();
        let wi = numer / denom;

        for (c, &idx) in indices.iter().enumerate() {
            w[(i, idx)] = wi[c];
        }
    }

    w
}

/// Smoothness regularizer H = (I - W)^T (I - W).
pub fn lle_regularizer(w: &na::DMatrix<f64>) -> na::DMatrix<f64> {
    let m = w.nrows();
    let i_minus_w = na::DMatrix::identity(m, m) - w;
    i_minus_w.transpose() * &i_minus_w
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bent_chain(n: usize) -> na::DMatrix<f64> {
        na::DMatrix::from_fn(n, 3, |i, j| match j {
            0 => i as f64 * 0.1,
            1 => (i as f64 * 0.7).sin() * 0.05,
            _ => (i as f64 * 0.3).cos() * 0.02,
        })
    }

    #[test]
    fn neighbor_windows_truncate_at_block_ends() {
        assert_eq!(nearest_indices(3, 10, 0), vec![1, 2, 3]);
        assert_eq!(nearest_indices(3, 10, 9), vec![6, 7, 8]);
        assert_eq!(nearest_indices(3, 10, 5), vec![2, 3, 4, 6, 7, 8]);
    }

    #[test]
    fn weight_rows_sum_to_one() {
        for &(n, npd, k) in &[(20usize, 20usize, 6usize), (24, 12, 6), (16, 4, 4)] {
            let x = bent_chain(n);
            let w = lle_weights(k, &x, ChainLayout::new(n, npd));
            for i in 0..n {
                let sum: f64 = w.row(i).sum();
                assert!((sum - 1.0).abs() < 1e-9, "row {} sums to {}", i, sum);
            }
        }
    }

    #[test]
    fn weights_never_cross_object_boundaries() {
        let x = bent_chain(24);
        let w = lle_weights(6, &x, ChainLayout::new(24, 12));
        for i in 0..24 {
            for j in 0..24 {
                if w[(i, j)] != 0.0 {
                    assert_eq!(i / 12, j / 12, "weight ({}, {}) crosses objects", i, j);
                }
            }
        }
    }

    #[test]
    fn collinear_neighborhood_is_ridge_recovered() {
        // straight chain makes the local gram matrix singular
        let x = na::DMatrix::from_fn(10, 3, |i, j| if j == 0 { i as f64 } else { 0.0 });
        let w = lle_weights(6, &x, ChainLayout::new(10, 10));
        for i in 0..10 {
            let sum: f64 = w.row(i).sum();
            assert!((sum - 1.0).abs() < 1e-6);
            assert!(w.row(i).iter().all(|v| v.is_finite()));
        }
    }
}
