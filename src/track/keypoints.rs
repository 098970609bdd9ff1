use anyhow::{anyhow, Result};
use serde::Serialize;

use super::Point;

/// Fraction of polygon points taken as the head (top) and leg (bottom) clusters.
pub const DEFAULT_KEYPOINT_THRESHOLD: f64 = 0.12;

/// Head and leg points of one detected person.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Keypoints {
    pub head: Point,
    pub leg: Point,
}

impl Keypoints {
    /// Head-to-leg pixel distance.
    pub fn pixel_length(&self) -> f64 {
        self.head.distance(&self.leg)
    }
}

/// Derive head/leg points from a mask polygon.
///
/// The `max(round(threshold * n), 1)` topmost and bottommost vertices are
/// averaged into centroids; each centroid's y is then pulled halfway to the
/// polygon's extreme y on its side. Coordinates are truncated to whole pixels.
pub fn extract_keypoints(polygon: &[[f64; 2]], threshold: f64) -> Result<Keypoints> {
    if polygon.is_empty() {
        return Err(anyhow!("cannot extract keypoints from an empty polygon"));
    }
    if polygon
        .iter()
        .any(|[x, y]| !x.is_finite() || !y.is_finite())
    {
        return Err(anyhow!("polygon contains non-finite coordinates"));
    }

    let points: Vec<Point> = polygon
        .iter()
        .map(|[x, y]| Point::new(*x as i32, *y as i32))
        .collect();

    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by_key(|&i| points[i].y);

    let n = points.len();
    let cluster = ((threshold * n as f64).round() as usize).clamp(1, n);

    let min_y = points[order[0]].y;
    let max_y = points[order[n - 1]].y;

    let mut head = centroid(order[..cluster].iter().map(|&i| points[i]));
    let mut leg = centroid(order[n - cluster..].iter().map(|&i| points[i]));

    head.y = midpoint(head.y, min_y);
    leg.y = midpoint(leg.y, max_y);

    Ok(Keypoints { head, leg })
}

fn centroid(points: impl Iterator<Item = Point>) -> Point {
    let (mut sx, mut sy, mut count) = (0i64, 0i64, 0i64);
    for p in points {
        sx += i64::from(p.x);
        sy += i64::from(p.y);
        count += 1;
    }
    let count = count.max(1) as f64;
    Point::new((sx as f64 / count) as i32, (sy as f64 / count) as i32)
}

fn midpoint(a: i32, b: i32) -> i32 {
    ((i64::from(a) + i64::from(b)) / 2) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rectangle boundary sampled every `step` pixels, clockwise from top-left.
    fn rectangle(width: i32, height: i32, step: i32) -> Vec<[f64; 2]> {
        let mut pts = Vec::new();
        let mut x = 0;
        while x <= width {
            pts.push([x as f64, 0.0]);
            x += step;
        }
        let mut y = step;
        while y < height {
            pts.push([width as f64, y as f64]);
            y += step;
        }
        let mut x = width;
        while x >= 0 {
            pts.push([x as f64, height as f64]);
            x -= step;
        }
        let mut y = height - step;
        while y > 0 {
            pts.push([0.0, y as f64]);
            y -= step;
        }
        pts
    }

    #[test]
    fn narrow_rectangle_keypoints_are_pulled_inside() {
        // 22 vertices: cluster size round(2.64) = 3 reaches into the side edges.
        let poly = rectangle(10, 100, 10);
        assert_eq!(poly.len(), 22);

        let kp = extract_keypoints(&poly, DEFAULT_KEYPOINT_THRESHOLD).unwrap();
        assert!(kp.head.y < kp.leg.y);
        assert!(kp.leg.y - kp.head.y < 100);
        assert_eq!(kp.head.y, 1);
        assert_eq!(kp.leg.y, 98);
    }

    #[test]
    fn wide_rectangle_keeps_full_extent() {
        // Top and bottom edges hold more points than the cluster size.
        let poly = rectangle(80, 100, 2);
        let kp = extract_keypoints(&poly, DEFAULT_KEYPOINT_THRESHOLD).unwrap();
        assert_eq!(kp.head.y, 0);
        assert_eq!(kp.leg.y, 100);
        assert_eq!(kp.pixel_length(), 100.0);
    }

    #[test]
    fn tiny_polygon_uses_single_point_clusters() {
        let poly = [[5.0, 2.0], [9.0, 40.0], [1.0, 20.0]];
        let kp = extract_keypoints(&poly, DEFAULT_KEYPOINT_THRESHOLD).unwrap();
        assert_eq!(kp.head, Point::new(5, 2));
        assert_eq!(kp.leg, Point::new(9, 40));
    }

    #[test]
    fn empty_polygon_is_rejected() {
        assert!(extract_keypoints(&[], DEFAULT_KEYPOINT_THRESHOLD).is_err());
    }
}
