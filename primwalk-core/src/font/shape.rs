//! Glyph outline geometry: edges, contours, and the distance queries the field generator needs.
//!
//! Coordinates are font units, y-up. After [`Shape::normalize_orientation`], filled regions lie to
//! the *left* of every edge's direction of travel, so a positive cross product of the edge direction
//! with the vector towards a point means "inside".

use rustybuzz::ttf_parser;
use ultraviolet::Vec2;

use super::coloring::EdgeColor;

#[inline]
pub(crate) fn cross(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Normalize, or zero if degenerate.
#[inline]
fn normalized_or_zero(v: Vec2) -> Vec2 {
    let mag = v.mag();
    if mag > f32::EPSILON {
        v / mag
    } else {
        Vec2::zero()
    }
}

/// Distance from an edge to a point, with a tiebreaker for points equidistant from two edges
/// meeting at a shared vertex.
#[derive(Copy, Clone, Debug)]
pub struct SignedDistance {
    /// Positive inside.
    pub distance: f32,
    /// `|cos|` of the angle between the edge direction and the direction to the point.
    /// Smaller is more orthogonal, and therefore the better owner of the point.
    pub dot: f32,
}
impl SignedDistance {
    pub const INFINITE: Self = Self {
        distance: f32::NEG_INFINITY,
        dot: 1.0,
    };
    #[must_use]
    pub fn closer_than(&self, other: &Self) -> bool {
        let (a, b) = (self.distance.abs(), other.distance.abs());
        a < b || (a == b && self.dot < other.dot)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Segment {
    Linear([Vec2; 2]),
    Quadratic([Vec2; 3]),
    Cubic([Vec2; 4]),
}
impl Segment {
    #[must_use]
    pub fn start(&self) -> Vec2 {
        match self {
            Self::Linear(p) => p[0],
            Self::Quadratic(p) => p[0],
            Self::Cubic(p) => p[0],
        }
    }
    #[must_use]
    pub fn end(&self) -> Vec2 {
        match self {
            Self::Linear(p) => p[1],
            Self::Quadratic(p) => p[2],
            Self::Cubic(p) => p[3],
        }
    }
    #[must_use]
    pub fn point(&self, t: f32) -> Vec2 {
        let s = 1.0 - t;
        match *self {
            Self::Linear([a, b]) => a * s + b * t,
            Self::Quadratic([a, b, c]) => a * (s * s) + b * (2.0 * s * t) + c * (t * t),
            Self::Cubic([a, b, c, d]) => {
                a * (s * s * s) + b * (3.0 * s * s * t) + c * (3.0 * s * t * t) + d * (t * t * t)
            }
        }
    }
    /// First derivative. May be zero at the ends of curves with coincident control points,
    /// see [`Self::start_direction`] and [`Self::end_direction`] for robust tangents.
    #[must_use]
    pub fn direction(&self, t: f32) -> Vec2 {
        let s = 1.0 - t;
        match *self {
            Self::Linear([a, b]) => b - a,
            Self::Quadratic([a, b, c]) => (b - a) * (2.0 * s) + (c - b) * (2.0 * t),
            Self::Cubic([a, b, c, d]) => {
                (b - a) * (3.0 * s * s) + (c - b) * (6.0 * s * t) + (d - c) * (3.0 * t * t)
            }
        }
    }
    #[must_use]
    fn second_derivative(&self, t: f32) -> Vec2 {
        match *self {
            Self::Linear(_) => Vec2::zero(),
            Self::Quadratic([a, b, c]) => (a - b * 2.0 + c) * 2.0,
            Self::Cubic([a, b, c, d]) => {
                (c - b * 2.0 + a) * (6.0 * (1.0 - t)) + (d - c * 2.0 + b) * (6.0 * t)
            }
        }
    }
    /// Tangent leaving the start point, skipping coincident control points.
    #[must_use]
    pub fn start_direction(&self) -> Vec2 {
        let first = self.start();
        let points: &[Vec2] = match self {
            Self::Linear(p) => &p[1..],
            Self::Quadratic(p) => &p[1..],
            Self::Cubic(p) => &p[1..],
        };
        points
            .iter()
            .map(|p| *p - first)
            .find(|d| d.mag_sq() > f32::EPSILON)
            .unwrap_or_else(Vec2::zero)
    }
    /// Tangent arriving at the end point, skipping coincident control points.
    #[must_use]
    pub fn end_direction(&self) -> Vec2 {
        let last = self.end();
        let points: &[Vec2] = match self {
            Self::Linear(p) => &p[..1],
            Self::Quadratic(p) => &p[..2],
            Self::Cubic(p) => &p[..3],
        };
        points
            .iter()
            .rev()
            .map(|p| last - *p)
            .find(|d| d.mag_sq() > f32::EPSILON)
            .unwrap_or_else(Vec2::zero)
    }
    #[must_use]
    pub fn reversed(&self) -> Self {
        match *self {
            Self::Linear([a, b]) => Self::Linear([b, a]),
            Self::Quadratic([a, b, c]) => Self::Quadratic([c, b, a]),
            Self::Cubic([a, b, c, d]) => Self::Cubic([d, c, b, a]),
        }
    }
    /// Subdivide at t=1/3 and t=2/3, exactly (de Casteljau).
    #[must_use]
    pub fn split_in_thirds(&self) -> [Self; 3] {
        let (first, rest) = self.split_at(1.0 / 3.0);
        let (second, third) = rest.split_at(0.5);
        [first, second, third]
    }
    fn split_at(&self, t: f32) -> (Self, Self) {
        let lerp = |a: Vec2, b: Vec2| a + (b - a) * t;
        match *self {
            Self::Linear([a, b]) => {
                let m = lerp(a, b);
                (Self::Linear([a, m]), Self::Linear([m, b]))
            }
            Self::Quadratic([a, b, c]) => {
                let ab = lerp(a, b);
                let bc = lerp(b, c);
                let m = lerp(ab, bc);
                (Self::Quadratic([a, ab, m]), Self::Quadratic([m, bc, c]))
            }
            Self::Cubic([a, b, c, d]) => {
                let ab = lerp(a, b);
                let bc = lerp(b, c);
                let cd = lerp(c, d);
                let abc = lerp(ab, bc);
                let bcd = lerp(bc, cd);
                let m = lerp(abc, bcd);
                (Self::Cubic([a, ab, abc, m]), Self::Cubic([m, bcd, cd, d]))
            }
        }
    }
    /// Number of line pieces used when flattening for area and winding queries.
    fn flatten_steps(&self) -> usize {
        match self {
            Self::Linear(_) => 1,
            Self::Quadratic(_) => 8,
            Self::Cubic(_) => 12,
        }
    }
    /// Parameter of the point on this segment nearest to `p`.
    #[must_use]
    pub fn nearest_t(&self, p: Vec2) -> f32 {
        if let Self::Linear([a, b]) = *self {
            let ab = b - a;
            let len_sq = ab.mag_sq();
            if len_sq <= f32::EPSILON {
                return 0.0;
            }
            return ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
        }
        // Coarse search, then refine with Newton iterations on d/dt |B(t) - p|^2.
        const SAMPLES: usize = 16;
        let (mut best_t, mut best) = (0.0, f32::INFINITY);
        for i in 0..=SAMPLES {
            let t = i as f32 / SAMPLES as f32;
            let d = (self.point(t) - p).mag_sq();
            if d < best {
                best = d;
                best_t = t;
            }
        }
        let mut t = best_t;
        for _ in 0..4 {
            let offs = self.point(t) - p;
            let d1 = self.direction(t);
            let numerator = offs.dot(d1);
            let denominator = d1.mag_sq() + offs.dot(self.second_derivative(t));
            if denominator.abs() <= f32::EPSILON {
                break;
            }
            t = (t - numerator / denominator).clamp(0.0, 1.0);
        }
        if (self.point(t) - p).mag_sq() < best {
            t
        } else {
            best_t
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Edge {
    pub segment: Segment,
    pub color: EdgeColor,
}
impl Edge {
    #[must_use]
    pub fn new(segment: Segment) -> Self {
        Self {
            segment,
            color: EdgeColor::WHITE,
        }
    }
    /// True signed distance from this edge to `p`, and the parameter of the nearest point.
    #[must_use]
    pub fn signed_distance(&self, p: Vec2) -> (SignedDistance, f32) {
        let t = self.segment.nearest_t(p);
        let nearest = self.segment.point(t);
        let mut direction = self.segment.direction(t);
        if direction.mag_sq() <= f32::EPSILON {
            direction = if t < 0.5 {
                self.segment.start_direction()
            } else {
                self.segment.end_direction()
            };
        }
        let to_point = p - nearest;
        let distance = to_point.mag();
        let sign = if cross(direction, to_point) >= 0.0 {
            1.0
        } else {
            -1.0
        };
        let dot = normalized_or_zero(direction)
            .dot(normalized_or_zero(to_point))
            .abs();
        (
            SignedDistance {
                distance: sign * distance,
                dot,
            },
            t,
        )
    }
    /// Extend the distance past the segment's ends along its end tangents.
    /// Points beyond an endpoint take their perpendicular distance from the tangent line instead,
    /// which keeps corners sharp when channels are combined.
    pub fn to_pseudo_distance(&self, distance: &mut SignedDistance, p: Vec2, t: f32) {
        let (origin, dir, beyond) = if t <= 0.0 {
            let dir = normalized_or_zero(self.segment.start_direction());
            let offs = p - self.segment.start();
            (offs, dir, offs.dot(dir) < 0.0)
        } else if t >= 1.0 {
            let dir = normalized_or_zero(self.segment.end_direction());
            let offs = p - self.segment.end();
            (offs, dir, offs.dot(dir) > 0.0)
        } else {
            return;
        };
        if beyond {
            let pseudo = cross(dir, origin);
            if pseudo.abs() <= distance.distance.abs() {
                distance.distance = pseudo;
                distance.dot = 0.0;
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Contour {
    pub edges: Vec<Edge>,
}
impl Contour {
    fn flatten_into(&self, out: &mut Vec<Vec2>) {
        out.clear();
        for edge in &self.edges {
            let steps = edge.segment.flatten_steps();
            // The first point of every edge is the last point of the previous one.
            for i in 0..steps {
                out.push(edge.segment.point(i as f32 / steps as f32));
            }
        }
    }
    /// Shoelace area of the flattened contour. Positive for counterclockwise (y-up).
    #[must_use]
    pub fn signed_area(&self) -> f32 {
        let mut points = Vec::new();
        self.flatten_into(&mut points);
        polygon_area(&points)
    }
    pub fn reverse(&mut self) {
        self.edges.reverse();
        for edge in &mut self.edges {
            edge.segment = edge.segment.reversed();
        }
    }
}

fn polygon_area(points: &[Vec2]) -> f32 {
    let Some(&last) = points.last() else {
        return 0.0;
    };
    let mut prev = last;
    let mut twice_area = 0.0;
    for &p in points {
        twice_area += cross(prev, p);
        prev = p;
    }
    twice_area * 0.5
}

/// Axis-aligned bounds in font units.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bounds {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}
impl Bounds {
    #[must_use]
    pub fn width(&self) -> f32 {
        self.right - self.left
    }
    #[must_use]
    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }
    fn include(&mut self, p: Vec2) {
        self.left = self.left.min(p.x);
        self.right = self.right.max(p.x);
        self.bottom = self.bottom.min(p.y);
        self.top = self.top.max(p.y);
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Shape {
    pub contours: Vec<Contour>,
}
impl Shape {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contours.iter().all(|c| c.edges.is_empty())
    }
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.contours.iter().map(|c| c.edges.len()).sum()
    }
    /// Tight bounds of the outline. None if the shape has no edges.
    #[must_use]
    pub fn bounds(&self) -> Option<Bounds> {
        let mut edges = self.contours.iter().flat_map(|c| c.edges.iter());
        let first = edges.next()?.segment.start();
        let mut bounds = Bounds {
            left: first.x,
            bottom: first.y,
            right: first.x,
            top: first.y,
        };
        for edge in self.contours.iter().flat_map(|c| c.edges.iter()) {
            // Curves never leave their hull, but the hull is loose. Sample instead.
            let steps = edge.segment.flatten_steps() * 2;
            for i in 0..=steps {
                bounds.include(edge.segment.point(i as f32 / steps as f32));
            }
        }
        Some(bounds)
    }
    /// Total signed area across all contours.
    #[must_use]
    pub fn signed_area(&self) -> f32 {
        self.contours.iter().map(Contour::signed_area).sum()
    }
    /// Make outer contours counterclockwise, so that "left of the edge" means inside.
    /// Fonts disagree on this (TrueType is clockwise, CFF counterclockwise).
    pub fn normalize_orientation(&mut self) {
        if self.signed_area() < 0.0 {
            for contour in &mut self.contours {
                contour.reverse();
            }
        }
    }
    /// Flattened polylines, for repeated inside/outside queries.
    #[must_use]
    pub fn polylines(&self) -> Polylines {
        let contours = self
            .contours
            .iter()
            .filter(|c| !c.edges.is_empty())
            .map(|c| {
                let mut points = Vec::new();
                c.flatten_into(&mut points);
                points
            })
            .collect();
        Polylines { contours }
    }
}

/// A flattened [`Shape`].
pub struct Polylines {
    contours: Vec<Vec<Vec2>>,
}
impl Polylines {
    /// Nonzero winding number of the outline around `p`.
    #[must_use]
    pub fn winding(&self, p: Vec2) -> i32 {
        let mut winding = 0;
        for contour in &self.contours {
            let Some(&last) = contour.last() else {
                continue;
            };
            let mut a = last;
            for &b in contour {
                if a.y <= p.y {
                    if b.y > p.y && cross(b - a, p - a) > 0.0 {
                        winding += 1;
                    }
                } else if b.y <= p.y && cross(b - a, p - a) < 0.0 {
                    winding -= 1;
                }
                a = b;
            }
        }
        winding
    }
    #[must_use]
    pub fn is_inside(&self, p: Vec2) -> bool {
        self.winding(p) != 0
    }
}

/// Collects a glyph outline from `ttf_parser` into a [`Shape`].
/// Unclosed contours are closed with a line, zero-length lines are dropped.
#[derive(Default)]
pub struct ShapeBuilder {
    shape: Shape,
    current: Vec<Edge>,
    start: Vec2,
    last: Vec2,
}
impl ShapeBuilder {
    #[must_use]
    pub fn finish(mut self) -> Shape {
        self.close_contour();
        self.shape
    }
    fn close_contour(&mut self) {
        if self.current.is_empty() {
            return;
        }
        if (self.last - self.start).mag_sq() > f32::EPSILON {
            self.current
                .push(Edge::new(Segment::Linear([self.last, self.start])));
        }
        let edges = std::mem::take(&mut self.current);
        self.shape.contours.push(Contour { edges });
        self.last = self.start;
    }
    fn push(&mut self, segment: Segment, to: Vec2) {
        self.current.push(Edge::new(segment));
        self.last = to;
    }
}
impl ttf_parser::OutlineBuilder for ShapeBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        self.close_contour();
        self.start = Vec2::new(x, y);
        self.last = self.start;
    }
    fn line_to(&mut self, x: f32, y: f32) {
        let to = Vec2::new(x, y);
        if (to - self.last).mag_sq() > f32::EPSILON {
            self.push(Segment::Linear([self.last, to]), to);
        }
    }
    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let to = Vec2::new(x, y);
        self.push(Segment::Quadratic([self.last, Vec2::new(x1, y1), to]), to);
    }
    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let to = Vec2::new(x, y);
        self.push(
            Segment::Cubic([self.last, Vec2::new(x1, y1), Vec2::new(x2, y2), to]),
            to,
        );
    }
    fn close(&mut self) {
        self.close_contour();
    }
}
