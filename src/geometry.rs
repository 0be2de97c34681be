use nalgebra as na;

/// Reads row `i` of an M x 3 matrix as a point.
#[inline]
pub fn point_of_row(m: &na::DMatrix<f64>, i: usize) -> na::Point3<f64> {
    na::Point3::new(m[(i, 0)], m[(i, 1)], m[(i, 2)])
}

/// Intersections of the segment p1..p2 with the sphere (center, radius).
///
/// Only on-segment solutions are returned, ordered by increasing parameter
/// along the segment, so the result holds 0, 1 or 2 points. A tangential
/// contact counts once.
pub fn line_sphere_intersection(
    p1: na::Point3<f64>,
    p2: na::Point3<f64>,
    center: na::Point3<f64>,
    radius: f64,
) -> Vec<na::Point3<f64>> {
    let d = p2 - p1;
    let f = p1 - center;

    let a = d.dot(&d);
    if a == 0.0 {
        return Vec::new();
    }

    let b = 2.0 * f.dot(&d);
    let c = f.dot(&f) - radius * radius;

    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return Vec::new();
    }

    let sqrt_disc = discriminant.sqrt();
    let t1 = (-b - sqrt_disc) / (2.0 * a);
    let t2 = (-b + sqrt_disc) / (2.0 * a);

    let mut out = Vec::with_capacity(2);
    if (0.0..=1.0).contains(&t1) {
        out.push(p1 + d * t1);
    }
    if sqrt_disc > 0.0 && (0.0..=1.0).contains(&t2) {
        out.push(p1 + d * t2);
    }

    out
}

/// Pinhole camera: 3x4 row-major projection matrix, intrinsics at
/// (0,0),(1,1) (focal lengths) and (0,2),(1,2) (principal point).
#[derive(Debug, Clone)]
pub struct CameraModel {
    proj: na::Matrix3x4<f64>,
}

impl CameraModel {
    pub fn new(proj: na::Matrix3x4<f64>) -> Self {
        Self { proj }
    }

    pub fn from_row_slice(vals: &[f64]) -> Self {
        Self {
            proj: na::Matrix3x4::from_row_slice(vals),
        }
    }

    #[inline]
    pub fn matrix(&self) -> &na::Matrix3x4<f64> {
        &self.proj
    }

    /// Projects a camera-frame point into pixel coordinates (col, row).
    /// Returns `None` for points at or behind the optical center.
    pub fn project(&self, pt: &na::Point3<f64>) -> Option<(i64, i64)> {
        let h = na::Vector4::new(pt.x, pt.y, pt.z, 1.0);
        let uvw = self.proj * h;
        if uvw.z <= 0.0 {
            return None;
        }

        Some(((uvw.x / uvw.z) as i64, (uvw.y / uvw.z) as i64))
    }
}

/// Visits every pixel of the width-expanded line between two pixel
/// coordinates. Out-of-bounds pixels are skipped, not clamped.
pub fn plot_thick_line(
    (c0, r0): (i64, i64),
    (c1, r1): (i64, i64),
    width: usize,
    rows: usize,
    cols: usize,
    mut visit: impl FnMut(usize, usize),
) {
    let half = (width.max(1) / 2) as i64;

    let mut stamp = |c: i64, r: i64| {
        for dr in -half..=half {
            for dc in -half..=half {
                let (rr, cc) = (r + dr, c + dc);
                if rr >= 0 && cc >= 0 && (rr as usize) < rows && (cc as usize) < cols {
                    visit(rr as usize, cc as usize);
                }
            }
        }
    };

    // Bresenham
    let (dx, dy) = ((c1 - c0).abs(), -(r1 - r0).abs());
    let sx = if c0 < c1 { 1 } else { -1 };
    let sy = if r0 < r1 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut c, mut r) = (c0, r0);

    loop {
        stamp(c, r);
        if c == c1 && r == r1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            c += sx;
        }
        if e2 <= dx {
            err += dx;
            r += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra as na;

    #[test]
    fn sphere_crossing_segment_has_two_solutions() {
        let hits = line_sphere_intersection(
            na::Point3::new(-2.0, 0.0, 0.0),
            na::Point3::new(2.0, 0.0, 0.0),
            na::Point3::origin(),
            1.0,
        );
        assert_eq!(hits.len(), 2);
        assert!((hits[0] - na::Point3::new(-1.0, 0.0, 0.0)).norm() < 1e-12);
        assert!((hits[1] - na::Point3::new(1.0, 0.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn sphere_ahead_of_segment_end_has_one_solution() {
        // the segment stops inside the sphere, only the entry point lies on it
        let hits = line_sphere_intersection(
            na::Point3::new(-2.0, 0.0, 0.0),
            na::Point3::new(0.0, 0.0, 0.0),
            na::Point3::origin(),
            1.0,
        );
        assert_eq!(hits.len(), 1);
        assert!((hits[0] - na::Point3::new(-1.0, 0.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn disjoint_sphere_has_no_solution() {
        let hits = line_sphere_intersection(
            na::Point3::new(-2.0, 5.0, 0.0),
            na::Point3::new(2.0, 5.0, 0.0),
            na::Point3::origin(),
            1.0,
        );
        assert!(hits.is_empty());
    }

    #[test]
    fn projection_maps_center_ray_to_principal_point() {
        let cam = CameraModel::from_row_slice(&[
            500.0, 0.0, 320.0, 0.0, //
            0.0, 500.0, 240.0, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        ]);

        assert_eq!(cam.project(&na::Point3::new(0.0, 0.0, 1.0)), Some((320, 240)));
        assert_eq!(cam.project(&na::Point3::new(0.0, 0.0, -1.0)), None);
    }

    #[test]
    fn thick_line_covers_both_endpoints() {
        let mut hit = std::collections::HashSet::new();
        plot_thick_line((2, 2), (8, 5), 3, 20, 20, |r, c| {
            hit.insert((r, c));
        });
        assert!(hit.contains(&(2, 2)));
        assert!(hit.contains(&(5, 8)));
        // width 3 stamps one pixel around the centerline
        assert!(hit.contains(&(1, 2)) && hit.contains(&(3, 2)));
    }
}
