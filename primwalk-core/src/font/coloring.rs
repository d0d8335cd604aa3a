//! Edge coloring for multi-channel distance fields.
//!
//! Each edge is assigned a subset of the RGB channels. The field generator computes one distance per
//! channel from only the edges carrying that channel, and the shader takes the median. Two edges
//! meeting at a sharp corner must share at most one channel, so that the median reproduces the corner
//! instead of rounding it off.

use smallvec::SmallVec;
use ultraviolet::Vec2;

use super::shape::{cross, Contour, Edge, Shape};

bitflags::bitflags! {
    #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
    pub struct EdgeColor: u8 {
        const RED = 0b001;
        const GREEN = 0b010;
        const BLUE = 0b100;
        const YELLOW = Self::RED.bits() | Self::GREEN.bits();
        const MAGENTA = Self::RED.bits() | Self::BLUE.bits();
        const CYAN = Self::GREEN.bits() | Self::BLUE.bits();
        const WHITE = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits();
    }
}
impl EdgeColor {
    pub const BLACK: Self = Self::empty();
}

/// Default corner threshold, in radians. Joins turning less than this are smooth.
pub const DEFAULT_ANGLE_THRESHOLD: f32 = 3.0;

/// Whether the join between two unit tangents is a corner.
fn is_corner(a: Vec2, b: Vec2, cross_threshold: f32) -> bool {
    a.dot(b) <= 0.0 || cross(a, b).abs() > cross_threshold
}

/// Pick the next two-channel color, never equal to `color` and never sharing a single `banned` channel.
fn switch_color(color: &mut EdgeColor, seed: &mut u64, banned: EdgeColor) {
    let combined = *color & banned;
    if combined == EdgeColor::RED || combined == EdgeColor::GREEN || combined == EdgeColor::BLUE {
        *color = combined ^ EdgeColor::WHITE;
        return;
    }
    if *color == EdgeColor::BLACK || *color == EdgeColor::WHITE {
        const START: [EdgeColor; 3] = [EdgeColor::CYAN, EdgeColor::MAGENTA, EdgeColor::YELLOW];
        *color = START[(*seed % 3) as usize];
        *seed /= 3;
        return;
    }
    // Rotate the two set bits left by one or two within the three-bit field.
    let shifted = u16::from(color.bits()) << (1 + (*seed & 1));
    *color = EdgeColor::from_bits_truncate(((shifted | shifted >> 3) & 0b111) as u8);
    *seed >>= 1;
}

/// Map edge `position` of `count` onto -1, 0, 1, symmetric about the middle.
fn symmetrical_trichotomy(position: usize, count: usize) -> usize {
    let t = 3.0 + 2.875 * position as f32 / (count - 1) as f32 - 1.4375 + 0.5;
    // In 0..=2 for position in 0..count.
    (t as i32 - 3 + 1).clamp(0, 2) as usize
}

fn corners(contour: &Contour, cross_threshold: f32) -> SmallVec<[usize; 16]> {
    let mut corners = SmallVec::new();
    let Some(last) = contour.edges.last() else {
        return corners;
    };
    let mut prev = last.segment.end_direction().normalized();
    for (i, edge) in contour.edges.iter().enumerate() {
        let next = edge.segment.start_direction().normalized();
        if is_corner(prev, next, cross_threshold) {
            corners.push(i);
        }
        prev = edge.segment.end_direction().normalized();
    }
    corners
}

/// Assign colors to every edge of every contour.
///
/// `angle_threshold` is in radians, `seed` varies the color choice deterministically.
pub fn color_edges(shape: &mut Shape, angle_threshold: f32, mut seed: u64) {
    let cross_threshold = angle_threshold.sin();
    let mut color = EdgeColor::WHITE;
    for contour in &mut shape.contours {
        if contour.edges.is_empty() {
            continue;
        }
        let corners = corners(contour, cross_threshold);
        match corners.as_slice() {
            &[] => {
                // Smooth. One color for the whole contour.
                switch_color(&mut color, &mut seed, EdgeColor::BLACK);
                for edge in &mut contour.edges {
                    edge.color = color;
                }
            }
            &[corner] => {
                color_teardrop(contour, corner, &mut seed);
            }
            &[start, ..] => {
                let count = contour.edges.len();
                let mut spline = 0;
                switch_color(&mut color, &mut seed, EdgeColor::BLACK);
                let initial = color;
                for i in 0..count {
                    let index = (start + i) % count;
                    if spline + 1 < corners.len() && corners[spline + 1] == index {
                        spline += 1;
                        // The last spline must also differ from the first, which it meets at `start`.
                        let banned = if spline == corners.len() - 1 {
                            initial
                        } else {
                            EdgeColor::BLACK
                        };
                        switch_color(&mut color, &mut seed, banned);
                    }
                    contour.edges[index].color = color;
                }
            }
        }
    }
}

/// A contour with one corner. Split into three runs colored `a, WHITE, b` so the single corner still
/// sees two different channel pairs on either side.
fn color_teardrop(contour: &mut Contour, corner: usize, seed: &mut u64) {
    let mut colors = [EdgeColor::WHITE; 3];
    switch_color(&mut colors[0], seed, EdgeColor::BLACK);
    colors[2] = colors[0];
    switch_color(&mut colors[2], seed, EdgeColor::BLACK);

    let count = contour.edges.len();
    if count >= 3 {
        for i in 0..count {
            contour.edges[(corner + i) % count].color = colors[symmetrical_trichotomy(i, count)];
        }
        return;
    }
    // Too few edges to distribute. Split them so there are enough.
    let mut parts: SmallVec<[Edge; 6]> = SmallVec::new();
    for edge in &contour.edges {
        parts.extend(edge.segment.split_in_thirds().into_iter().map(Edge::new));
    }
    // Start the run at the corner.
    parts.rotate_left(corner * 3);
    if parts.len() == 6 {
        for (i, part) in parts.iter_mut().enumerate() {
            part.color = colors[i / 2];
        }
    } else {
        for (part, color) in parts.iter_mut().zip(colors) {
            part.color = color;
        }
    }
    contour.edges = parts.into_vec();
}

#[cfg(test)]
mod test {
    use super::{color_edges, switch_color, symmetrical_trichotomy, EdgeColor};
    use crate::font::shape::{test::clockwise_box, ShapeBuilder};
    use rustybuzz::ttf_parser::OutlineBuilder;

    #[test]
    fn switch_never_repeats() {
        let mut seed = 12345;
        let mut color = EdgeColor::WHITE;
        for _ in 0..32 {
            let prev = color;
            switch_color(&mut color, &mut seed, EdgeColor::BLACK);
            assert_ne!(prev, color);
            assert_eq!(color.bits().count_ones(), 2);
        }
    }
    #[test]
    fn trichotomy_is_symmetric() {
        let spread: Vec<_> = (0..7).map(|i| symmetrical_trichotomy(i, 7)).collect();
        assert_eq!(spread.first(), Some(&0));
        assert_eq!(spread.last(), Some(&2));
        assert!(spread.contains(&1));
        assert!(spread.windows(2).all(|w| w[0] <= w[1]));
    }
    #[test]
    fn square_corners_never_share_pairs() {
        let mut builder = ShapeBuilder::default();
        clockwise_box(&mut builder, [0.0, 0.0], [10.0, 10.0]);
        let mut shape = builder.finish();
        shape.normalize_orientation();
        color_edges(&mut shape, super::DEFAULT_ANGLE_THRESHOLD, 0);

        let edges = &shape.contours[0].edges;
        for i in 0..edges.len() {
            let a = edges[i].color;
            let b = edges[(i + 1) % edges.len()].color;
            // Each corner sees two different colors, sharing at most one channel.
            assert_ne!(a, b);
            assert!((a & b).bits().count_ones() <= 1);
        }
    }
    #[test]
    fn smooth_contour_is_single_color() {
        let mut builder = ShapeBuilder::default();
        // Circle-ish out of four quadratic arcs, tangent continuous at every join.
        builder.move_to(10.0, 0.0);
        builder.quad_to(10.0, 10.0, 0.0, 10.0);
        builder.quad_to(-10.0, 10.0, -10.0, 0.0);
        builder.quad_to(-10.0, -10.0, 0.0, -10.0);
        builder.quad_to(10.0, -10.0, 10.0, 0.0);
        builder.close();
        let mut shape = builder.finish();
        color_edges(&mut shape, super::DEFAULT_ANGLE_THRESHOLD, 0);
        let first = shape.contours[0].edges[0].color;
        assert!(shape.contours[0].edges.iter().all(|e| e.color == first));
    }
    #[test]
    fn teardrop_splits_short_contours() {
        let mut builder = ShapeBuilder::default();
        // One curve plus the closing line: two edges, one sharp corner at the origin.
        builder.move_to(0.0, 0.0);
        builder.curve_to(20.0, 20.0, 0.0, 30.0, 0.0, 10.0);
        builder.close();
        let mut shape = builder.finish();
        assert_eq!(shape.contours[0].edges.len(), 2);
        color_edges(&mut shape, super::DEFAULT_ANGLE_THRESHOLD, 0);
        let edges = &shape.contours[0].edges;
        assert_eq!(edges.len(), 6);
        assert!(edges.iter().any(|e| e.color == EdgeColor::WHITE));
        assert_ne!(edges.first().unwrap().color, edges.last().unwrap().color);
    }
}
