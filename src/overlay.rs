use nalgebra as na;

use crate::chain::ChainLayout;
use crate::geometry::{plot_thick_line, point_of_row, CameraModel};

const NODE_COLORS: [[u8; 3]; 3] = [[255, 0, 0], [255, 255, 0], [0, 255, 0]];

const LINE_WIDTH: usize = 5;
const NODE_RADIUS: i64 = 7;

/// RGB overlay of the tracked chains, row-major, 3 bytes per pixel.
#[derive(Debug, Clone)]
pub struct OverlayImage {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<u8>,
}

impl OverlayImage {
    fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0; rows * cols * 3],
        }
    }

    #[inline]
    pub fn pixel(&self, row: usize, col: usize) -> [u8; 3] {
        let at = (row * self.cols + col) * 3;
        [self.data[at], self.data[at + 1], self.data[at + 2]]
    }

    #[inline]
    fn put(&mut self, row: usize, col: usize, color: [u8; 3]) {
        let at = (row * self.cols + col) * 3;
        self.data[at..at + 3].copy_from_slice(&color);
    }

    fn disc(&mut self, (c, r): (i64, i64), radius: i64, color: [u8; 3]) {
        for dr in -radius..=radius {
            for dc in -radius..=radius {
                if dr * dr + dc * dc > radius * radius {
                    continue;
                }
                let (rr, cc) = (r + dr, c + dc);
                if rr >= 0 && cc >= 0 && (rr as usize) < self.rows && (cc as usize) < self.cols {
                    self.put(rr as usize, cc as usize, color);
                }
            }
        }
    }
}

/// Draws nodes and edges color-coded per object, farthest edges first so
/// nearer geometry ends up on top.
pub fn render(
    y: &na::DMatrix<f64>,
    camera: &CameraModel,
    img_rows: usize,
    img_cols: usize,
    layout: ChainLayout,
) -> OverlayImage {
    let mut img = OverlayImage::new(img_rows, img_cols);
    let m = y.nrows();
    if m == 0 {
        return img;
    }

    let pixels: Vec<Option<(i64, i64)>> = (0..m)
        .map(|i| camera.project(&point_of_row(y, i)))
        .collect();

    let mut edge_order: Vec<usize> = (0..m - 1).filter(|&i| !layout.is_wrap_edge(i)).collect();
    edge_order.sort_by(|&a, &b| {
        let da = ((y.row(a) + y.row(a + 1)) / 2.0).norm();
        let db = ((y.row(b) + y.row(b + 1)) / 2.0).norm();
        db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
    });

    for &idx in &edge_order {
        let color = NODE_COLORS[layout.object_of(idx) % NODE_COLORS.len()];
        if let (Some(p0), Some(p1)) = (pixels[idx], pixels[idx + 1]) {
            plot_thick_line(p0, p1, LINE_WIDTH, img_rows, img_cols, |r, c| {
                let at = (r * img_cols + c) * 3;
                img.data[at..at + 3].copy_from_slice(&color);
            });
        }
    }

    for i in 0..m {
        if let Some(px) = pixels[i] {
            let color = NODE_COLORS[layout.object_of(i) % NODE_COLORS.len()];
            img.disc(px, NODE_RADIUS, color);
        }
    }

    img
}
