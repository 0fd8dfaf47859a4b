//! Conversion of a layout label map into wall polygons.
//!
//! Layout estimation networks emit one label per pixel (floor, ceiling,
//! left wall, front wall, ...). Each wall label becomes one polygon: the
//! convex hull of the labelled region with near-collinear vertices dropped,
//! so a planar wall ends up as (roughly) a quadrilateral.

use crate::{CornerEstimate, Polygon};
use image::GrayImage;
use imageproc::geometry::{arc_length, convex_hull};
use imageproc::point::Point;
use tracing::debug;

/// Vertex removal tolerance as a fraction of the hull perimeter
const SIMPLIFY_RATIO: f64 = 0.02;

/// Labels covering fewer pixels than this are treated as noise
const MIN_REGION_PIXELS: usize = 16;

/// Build one polygon per wall label, in the order the labels are given
pub fn polygons_from_layout(layout: &GrayImage, wall_labels: &[u8]) -> CornerEstimate {
    let mut polygons = Vec::new();

    for &label in wall_labels {
        // Leftmost and rightmost pixel of each row is enough for the hull
        let mut extremes: Vec<Point<i32>> = Vec::new();
        let mut area = 0usize;

        for y in 0..layout.height() {
            let mut row_min: Option<u32> = None;
            let mut row_max = 0u32;
            for x in 0..layout.width() {
                if layout.get_pixel(x, y)[0] == label {
                    area += 1;
                    row_min.get_or_insert(x);
                    row_max = x;
                }
            }
            if let Some(min_x) = row_min {
                extremes.push(Point::new(min_x as i32, y as i32));
                if row_max != min_x {
                    extremes.push(Point::new(row_max as i32, y as i32));
                }
            }
        }

        if area < MIN_REGION_PIXELS || extremes.len() < 3 {
            debug!("Skipping layout label {} ({} pixels)", label, area);
            continue;
        }

        let hull = convex_hull(&extremes[..]);
        if hull.len() < 3 {
            continue;
        }

        let epsilon = arc_length(&hull, true) * SIMPLIFY_RATIO;
        let outline = simplify_closed(hull, epsilon);

        let polygon: Polygon = outline.iter().map(|p| [p.x, p.y]).collect();
        debug!(
            "Layout label {} -> polygon with {} vertices ({} pixels)",
            label,
            polygon.len(),
            area
        );
        polygons.push(polygon);
    }

    CornerEstimate::new(polygons)
}

/// Repeatedly drop the vertex closest to the line through its neighbours
/// until every remaining vertex deviates by more than `epsilon`.
fn simplify_closed(mut points: Vec<Point<i32>>, epsilon: f64) -> Vec<Point<i32>> {
    while points.len() > 3 {
        let n = points.len();
        let (index, deviation) = (0..n)
            .map(|i| {
                let prev = points[(i + n - 1) % n];
                let next = points[(i + 1) % n];
                (i, distance_to_line(points[i], prev, next))
            })
            .fold((0, f64::INFINITY), |best, candidate| {
                if candidate.1 < best.1 {
                    candidate
                } else {
                    best
                }
            });

        if deviation > epsilon {
            break;
        }
        points.remove(index);
    }
    points
}

fn distance_to_line(p: Point<i32>, a: Point<i32>, b: Point<i32>) -> f64 {
    let (px, py) = (p.x as f64, p.y as f64);
    let (ax, ay) = (a.x as f64, a.y as f64);
    let (bx, by) = (b.x as f64, b.y as f64);

    let len = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
    if len == 0.0 {
        return ((px - ax).powi(2) + (py - ay).powi(2)).sqrt();
    }
    ((bx - ax) * (ay - py) - (ax - px) * (by - ay)).abs() / len
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn two_wall_layout() -> GrayImage {
        // Label 1: left half, label 2: right half, row 0..10 is ceiling (label 0)
        GrayImage::from_fn(100, 60, |x, y| {
            if y < 10 {
                Luma([0])
            } else if x < 50 {
                Luma([1])
            } else {
                Luma([2])
            }
        })
    }

    #[test]
    fn test_rectangular_regions_become_quads() {
        let corners = polygons_from_layout(&two_wall_layout(), &[1, 2]);

        assert_eq!(corners.len(), 2);
        for polygon in corners.iter() {
            assert_eq!(polygon.len(), 4);
        }

        let left = &corners.polygons[0];
        let xs: Vec<i32> = left.iter().map(|p| p[0]).collect();
        let ys: Vec<i32> = left.iter().map(|p| p[1]).collect();
        assert_eq!(*xs.iter().min().unwrap(), 0);
        assert_eq!(*xs.iter().max().unwrap(), 49);
        assert_eq!(*ys.iter().min().unwrap(), 10);
        assert_eq!(*ys.iter().max().unwrap(), 59);
    }

    #[test]
    fn test_label_order_is_preserved() {
        let corners = polygons_from_layout(&two_wall_layout(), &[2, 1]);
        assert_eq!(corners.len(), 2);
        assert!(corners.polygons[0].iter().all(|p| p[0] >= 50));
    }

    #[test]
    fn test_simplify_drops_collinear_vertices() {
        let square = vec![
            Point::new(0, 0),
            Point::new(5, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        let simplified = simplify_closed(square, 0.5);
        assert_eq!(simplified.len(), 4);
        assert!(!simplified.contains(&Point::new(5, 0)));
    }

    #[test]
    fn test_simplify_removes_least_deviating_vertex_until_epsilon() {
        let bulged = vec![
            Point::new(0, 0),
            Point::new(5, 2),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];

        // The bulge deviates by 2 px from its neighbours' chord
        assert_eq!(simplify_closed(bulged.clone(), 1.0).len(), 5);
        let simplified = simplify_closed(bulged.clone(), 3.0);
        assert_eq!(simplified.len(), 4);
        assert!(!simplified.contains(&Point::new(5, 2)));

        // Never below a triangle
        assert_eq!(simplify_closed(bulged, 100.0).len(), 3);
    }

    #[test]
    fn test_missing_and_tiny_labels_are_skipped() {
        let mut layout = two_wall_layout();
        layout.put_pixel(0, 0, Luma([7]));

        let corners = polygons_from_layout(&layout, &[5, 7]);
        assert!(corners.is_empty());
    }
}
