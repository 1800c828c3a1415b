//! Quad candidates from a dark-pixel mask.
//!
//! Each 4-connected dark component is reduced to its convex hull; hulls that
//! are well approximated by four of their vertices become quads. Corners are
//! reported in pixel-center coordinates, ordered clockwise on screen.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadParams {
    /// Smallest component (in pixels) worth fitting.
    pub min_area_px: usize,
    /// Shortest accepted quad side in pixels.
    pub min_side_px: f64,
    /// Minimum ratio between quad area and hull area.
    pub min_fill: f64,
}

impl Default for QuadParams {
    fn default() -> Self {
        Self {
            min_area_px: 64,
            min_side_px: 8.0,
            min_fill: 0.9,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    pub corners: [Point2<f64>; 4],
}

impl Quad {
    pub fn shortest_side(&self) -> f64 {
        (0..4)
            .map(|i| (self.corners[(i + 1) % 4] - self.corners[i]).norm())
            .fold(f64::INFINITY, f64::min)
    }

    pub fn area(&self) -> f64 {
        polygon_area(&self.corners).abs()
    }
}

struct Component {
    touches_border: bool,
    /// `(y, min_x, max_x)` per covered row.
    rows: Vec<(usize, usize, usize)>,
    area: usize,
}

/// Extract quads from `mask` (`true` = dark), scanning components in raster order.
pub(crate) fn find_quads(mask: &[bool], width: usize, height: usize, params: &QuadParams) -> Vec<Quad> {
    components(mask, width, height)
        .into_iter()
        .filter(|c| !c.touches_border && c.area >= params.min_area_px)
        .filter_map(|c| fit_quad(&c, params))
        .collect()
}

fn components(mask: &[bool], width: usize, height: usize) -> Vec<Component> {
    let mut visited = vec![false; mask.len()];
    let mut out = Vec::new();
    let mut stack = Vec::new();
    let mut row_span: Vec<(usize, usize)> = vec![(usize::MAX, 0); height];

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }

        let mut touches_border = false;
        let mut area = 0usize;
        let mut y_min = usize::MAX;
        let mut y_max = 0usize;

        visited[start] = true;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            let x = idx % width;
            let y = idx / width;
            area += 1;
            y_min = y_min.min(y);
            y_max = y_max.max(y);
            let span = &mut row_span[y];
            span.0 = span.0.min(x);
            span.1 = span.1.max(x);
            if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                touches_border = true;
            }

            let mut visit = |n: usize| {
                if mask[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < width {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - width);
            }
            if y + 1 < height {
                visit(idx + width);
            }
        }

        let mut rows = Vec::with_capacity(y_max - y_min + 1);
        for (y, span) in row_span.iter_mut().enumerate().take(y_max + 1).skip(y_min) {
            if span.0 != usize::MAX {
                rows.push((y, span.0, span.1));
            }
            *span = (usize::MAX, 0);
        }

        out.push(Component {
            touches_border,
            rows,
            area,
        });
    }

    out
}

fn fit_quad(c: &Component, params: &QuadParams) -> Option<Quad> {
    // Outer pixel corners of every row extreme, shifted to pixel-center coordinates.
    let mut pts = Vec::with_capacity(c.rows.len() * 4);
    for &(y, x0, x1) in &c.rows {
        let (y, x0, x1) = (y as f64, x0 as f64, x1 as f64);
        pts.push(Point2::new(x0 - 0.5, y - 0.5));
        pts.push(Point2::new(x0 - 0.5, y + 0.5));
        pts.push(Point2::new(x1 + 0.5, y - 0.5));
        pts.push(Point2::new(x1 + 0.5, y + 0.5));
    }

    let hull = convex_hull(pts);
    if hull.len() < 4 {
        return None;
    }
    let hull_area = polygon_area(&hull).abs();
    if hull_area <= 0.0 {
        return None;
    }

    let n = hull.len() as f64;
    let centroid = hull
        .iter()
        .fold(Vector2::zeros(), |acc: Vector2<f64>, p| acc + p.coords)
        / n;

    let p0 = *argmax(&hull, |p| (p.coords - centroid).norm_squared())?;
    let p2 = *argmax(&hull, |p| (p - p0).norm_squared())?;
    let axis = p2 - p0;
    let side = |p: &Point2<f64>| cross(&axis, &(p - p0));
    let p1 = *argmax(&hull, side)?;
    let p3 = *argmax(&hull, |p| -side(p))?;
    if side(&p1) <= 0.0 || side(&p3) >= 0.0 {
        return None;
    }

    let mut corners = [p0, p1, p2, p3];
    if polygon_area(&corners) < 0.0 {
        corners = [p0, p3, p2, p1];
    }
    let quad = Quad { corners };

    if quad.shortest_side() < params.min_side_px {
        return None;
    }
    if quad.area() / hull_area < params.min_fill {
        return None;
    }
    Some(quad)
}

fn argmax<T, F: Fn(&T) -> f64>(items: &[T], key: F) -> Option<&T> {
    let mut best: Option<(&T, f64)> = None;
    for it in items {
        let k = key(it);
        if best.map_or(true, |(_, bk)| k > bk) {
            best = Some((it, k));
        }
    }
    best.map(|(it, _)| it)
}

#[inline]
fn cross(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Shoelace area; positive for clockwise order on screen (y down).
fn polygon_area(pts: &[Point2<f64>]) -> f64 {
    let n = pts.len();
    let mut s = 0.0;
    for i in 0..n {
        let a = pts[i];
        let b = pts[(i + 1) % n];
        s += a.x * b.y - b.x * a.y;
    }
    0.5 * s
}

/// Andrew's monotone chain; collinear points are dropped.
fn convex_hull(mut pts: Vec<Point2<f64>>) -> Vec<Point2<f64>> {
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let turn = |o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>| cross(&(a - o), &(b - o));

    let mut lower: Vec<Point2<f64>> = Vec::with_capacity(pts.len());
    for p in &pts {
        while lower.len() >= 2 && turn(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(*p);
    }
    let mut upper: Vec<Point2<f64>> = Vec::with_capacity(pts.len());
    for p in pts.iter().rev() {
        while upper.len() >= 2 && turn(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(*p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}
