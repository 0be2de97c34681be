use nalgebra as na;

/// Block structure of the tracked node chain: `num_dlos` objects of
/// `nodes_per_dlo` nodes each, stored contiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLayout {
    pub nodes_per_dlo: usize,
    pub num_dlos: usize,
}

impl ChainLayout {
    pub fn new(total_nodes: usize, nodes_per_dlo: usize) -> Self {
        Self {
            nodes_per_dlo,
            num_dlos: total_nodes / nodes_per_dlo,
        }
    }

    #[inline]
    pub fn total_nodes(&self) -> usize {
        self.nodes_per_dlo * self.num_dlos
    }

    #[inline]
    pub fn object_of(&self, node: usize) -> usize {
        node / self.nodes_per_dlo
    }

    #[inline]
    pub fn block_range(&self, dlo: usize) -> std::ops::Range<usize> {
        dlo * self.nodes_per_dlo..(dlo + 1) * self.nodes_per_dlo
    }

    /// True when `a -> a+1` crosses from one object block into the next;
    /// such a "wrap" pair is not a physical edge.
    #[inline]
    pub fn is_wrap_edge(&self, a: usize) -> bool {
        (a + 1) % self.nodes_per_dlo == 0
    }

    /// Adjacent-node edge list excluding the inter-object wrap edges.
    pub fn edges(&self) -> Vec<(usize, usize)> {
        (0..self.total_nodes().saturating_sub(1))
            .filter(|&i| !self.is_wrap_edge(i))
            .map(|i| (i, i + 1))
            .collect()
    }

    /// Splits a strictly increasing global index set into per-object groups
    /// of object-local indices.
    pub fn partition_indices(&self, indices: &[usize]) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.num_dlos];
        for &idx in indices {
            let dlo = self.object_of(idx);
            if dlo < self.num_dlos {
                groups[dlo].push(idx - dlo * self.nodes_per_dlo);
            }
        }
        groups
    }
}

/// Cumulative arc length along each object's chain, reset to zero at every
/// object boundary. Computed once from the initial chain and held fixed.
pub fn geodesic_coords(y: &na::DMatrix<f64>, layout: ChainLayout) -> Vec<f64> {
    let mut coords = Vec::with_capacity(y.nrows());
    let mut cur_sum = 0.0;

    coords.push(0.0);
    for i in 0..y.nrows().saturating_sub(1) {
        cur_sum += (y.row(i + 1) - y.row(i)).norm();
        if layout.is_wrap_edge(i) {
            cur_sum = 0.0;
        }
        coords.push(cur_sum);
    }

    coords
}

/// Extracts the rows of `m` at `indices` into a new matrix.
pub fn select_rows(m: &na::DMatrix<f64>, indices: &[usize]) -> na::DMatrix<f64> {
    let mut out = na::DMatrix::zeros(indices.len(), m.ncols());
    for (r, &idx) in indices.iter().enumerate() {
        out.row_mut(r).copy_from(&m.row(idx));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra as na;

    fn straight_chain(n: usize, spacing: f64) -> na::DMatrix<f64> {
        na::DMatrix::from_fn(n, 3, |i, j| if j == 0 { i as f64 * spacing } else { 0.0 })
    }

    #[test]
    fn geodesic_coords_reset_at_object_boundary() {
        let y = straight_chain(8, 0.5);
        let layout = ChainLayout::new(8, 4);
        let coords = geodesic_coords(&y, layout);

        assert_eq!(coords.len(), 8);
        assert!((coords[3] - 1.5).abs() < 1e-12);
        assert_eq!(coords[4], 0.0);
        assert!((coords[7] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn edges_skip_wrap_pairs() {
        let layout = ChainLayout::new(8, 4);
        let edges = layout.edges();
        assert_eq!(edges.len(), 6);
        assert!(!edges.contains(&(3, 4)));
    }

    #[test]
    fn partition_localizes_indices() {
        let layout = ChainLayout::new(8, 4);
        let groups = layout.partition_indices(&[0, 2, 3, 4, 7]);
        assert_eq!(groups, vec![vec![0, 2, 3], vec![0, 3]]);
    }
}
