//! Per-glyph multi-channel signed distance field rasterization.
//!
//! Output texels are RGBA8: red, green and blue hold the pseudo-distance to the nearest edge of that
//! channel's color, alpha holds the true signed distance (an MTSDF). Values are encoded as
//! `0.5 + distance / range`, so 0.5 is the outline, larger is inside.

use ultraviolet::Vec2;

use super::coloring::EdgeColor;
use super::shape::{Edge, Polylines, Shape, SignedDistance};

/// Maps font units to texel coordinates of one glyph box: `texel = unit * scale + translate`.
/// Texel y is up, with the origin at the bottom-left of the box.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Projection {
    pub scale: f32,
    pub translate: Vec2,
}
impl Projection {
    #[must_use]
    pub fn unproject(&self, texel: Vec2) -> Vec2 {
        (texel - self.translate) / self.scale
    }
}

#[must_use]
pub fn median(a: f32, b: f32, c: f32) -> f32 {
    a.min(b).max(a.max(b).min(c))
}

#[derive(Copy, Clone)]
struct Nearest<'a> {
    distance: SignedDistance,
    edge: Option<&'a Edge>,
    t: f32,
}
impl Nearest<'_> {
    const NONE: Self = Self {
        distance: SignedDistance::INFINITE,
        edge: None,
        t: 0.0,
    };
}

/// Signed distances, in font units, at `p`: `[r, g, b, true]`.
fn distances_at(shape: &Shape, lines: &Polylines, p: Vec2) -> [f32; 4] {
    const CHANNELS: [EdgeColor; 3] = [EdgeColor::RED, EdgeColor::GREEN, EdgeColor::BLUE];

    let mut channels = [Nearest::NONE; 3];
    let mut truest = SignedDistance::INFINITE;
    for edge in shape.contours.iter().flat_map(|c| c.edges.iter()) {
        let (distance, t) = edge.signed_distance(p);
        if distance.closer_than(&truest) {
            truest = distance;
        }
        for (nearest, channel) in channels.iter_mut().zip(CHANNELS) {
            if edge.color.contains(channel) && distance.closer_than(&nearest.distance) {
                *nearest = Nearest {
                    distance,
                    edge: Some(edge),
                    t,
                };
            }
        }
    }

    // Edge orientation gets the sign wrong for overlapping contours, winding never does.
    let inside = lines.is_inside(p);
    let true_distance = if inside {
        truest.distance.abs()
    } else {
        -truest.distance.abs()
    };

    let mut rgb = channels.map(|nearest| match nearest.edge {
        Some(edge) => {
            let mut distance = nearest.distance;
            edge.to_pseudo_distance(&mut distance, p, nearest.t);
            distance.distance
        }
        // No edge of this color at all. Agree with the truth so the median is unaffected.
        None => true_distance,
    });
    let [r, g, b] = rgb;
    if (median(r, g, b) > 0.0) != inside {
        rgb = [true_distance; 3];
    }
    [rgb[0], rgb[1], rgb[2], true_distance]
}

fn encode(distance: f32, range: f32) -> u8 {
    let value = (0.5 + distance / range).clamp(0.0, 1.0);
    (value * 255.0).round() as u8
}

/// Rasterize an MTSDF of `shape` into a tightly packed, top-to-bottom RGBA8 block of `extent`.
///
/// `range_px` is the full distance range in texels, i.e. distances beyond `range_px / 2` saturate.
#[must_use]
pub fn generate_mtsdf(
    shape: &Shape,
    projection: Projection,
    range_px: f32,
    [width, height]: [u32; 2],
) -> Vec<u8> {
    let lines = shape.polylines();
    let range = range_px / projection.scale;
    let mut texels = Vec::with_capacity(width as usize * height as usize * 4);
    for row in 0..height {
        let y = (height - row) as f32 - 0.5;
        for column in 0..width {
            let p = projection.unproject(Vec2::new(column as f32 + 0.5, y));
            let distances = distances_at(shape, &lines, p);
            texels.extend(distances.map(|d| encode(d, range)));
        }
    }
    texels
}

#[cfg(test)]
mod test {
    use super::{generate_mtsdf, median, Projection};
    use crate::font::{
        coloring::{color_edges, DEFAULT_ANGLE_THRESHOLD},
        shape::{test::clockwise_box, ShapeBuilder},
    };
    use ultraviolet::Vec2;

    #[test]
    fn median_of_three() {
        assert_eq!(median(1.0, 2.0, 3.0), 2.0);
        assert_eq!(median(3.0, 1.0, 2.0), 2.0);
        assert_eq!(median(2.0, 3.0, 1.0), 2.0);
        assert_eq!(median(-1.0, -1.0, 5.0), -1.0);
    }
    #[test]
    fn square_field() {
        let mut builder = ShapeBuilder::default();
        clockwise_box(&mut builder, [0.0, 0.0], [100.0, 100.0]);
        let mut shape = builder.finish();
        shape.normalize_orientation();
        color_edges(&mut shape, DEFAULT_ANGLE_THRESHOLD, 0);

        // 0.1 texels per unit, with 4 texels of padding each side: 18x18 texels.
        let projection = Projection {
            scale: 0.1,
            translate: Vec2::new(4.0, 4.0),
        };
        let extent = [18, 18];
        let texels = generate_mtsdf(&shape, projection, 8.0, extent);
        assert_eq!(texels.len(), 18 * 18 * 4);

        let at = |x: usize, y: usize| &texels[(y * 18 + x) * 4..(y * 18 + x) * 4 + 4];
        // Center is deep inside, every channel agrees.
        assert!(at(9, 9).iter().all(|&c| c > 200), "{:?}", at(9, 9));
        // Corner texel is outside.
        assert!(at(0, 0).iter().all(|&c| c < 128), "{:?}", at(0, 0));
        // Alpha grows moving inwards along a row.
        let alphas: Vec<u8> = (0..9).map(|x| at(x, 9)[3]).collect();
        assert!(alphas.windows(2).all(|w| w[0] <= w[1]), "{alphas:?}");
        // Texel 4 sits half a texel inside the edge.
        assert!(at(4, 9)[3] > 128 && at(3, 9)[3] < 128);
    }
}
