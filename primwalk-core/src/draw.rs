//! # Draw lists
//!
//! Widgets describe themselves as rectangles and glyph runs. These accumulate into one vertex/index
//! pair, split into batches of contiguous quads sharing a texture. Untextured quads share the batch
//! of the renderer's built-in white texture, represented here as `None`.

use std::sync::Arc;

use az::CheckedAs;

use crate::cache::TextureHandle;
use crate::color::Color;
use crate::font::Font;

/// How the fragment stage treats a quad. Stored as a float in [`UiVertex::params`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum QuadMode {
    /// Vertex color, optionally with rounded corners.
    Color = 0,
    /// Texture times vertex color, optionally with rounded corners.
    Textured = 1,
    /// Glyph from a distance field atlas.
    Msdf = 2,
}

#[repr(C)]
#[derive(Copy, Clone, PartialEq, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UiVertex {
    /// Logical pixels, top-left origin.
    pub position: [f32; 2],
    pub uv: [f32; 2],
    /// Straight sRGB.
    pub color: [f32; 4],
    /// Offset from the quad center, for the rounded corner distance.
    pub local: [f32; 2],
    pub half_size: [f32; 2],
    /// `[mode, corner radius, screen pixels per distance unit, unused]`.
    pub params: [f32; 4],
}

/// A run of indices drawn with one texture.
#[derive(Debug)]
pub struct Batch<T> {
    /// None for the built-in white texture.
    pub texture: Option<Arc<T>>,
    pub first_index: u32,
    pub index_count: u32,
}

pub struct DrawList<T> {
    vertices: Vec<UiVertex>,
    indices: Vec<u32>,
    batches: Vec<Batch<T>>,
}
impl<T> Default for DrawList<T> {
    fn default() -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            batches: Vec::new(),
        }
    }
}

struct Quad {
    min: [f32; 2],
    max: [f32; 2],
    /// `[u0, v0, u1, v1]`
    uv: [f32; 4],
    color: Color,
    mode: QuadMode,
    radius: f32,
    px_range: f32,
}

impl<T: TextureHandle> DrawList<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    #[must_use]
    pub fn vertices(&self) -> &[UiVertex] {
        &self.vertices
    }
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }
    #[must_use]
    pub fn batches(&self) -> &[Batch<T>] {
        &self.batches
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
    /// Forget all primitives, keeping allocations.
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.batches.clear();
    }
    /// A rectangle with its top-left at `position`. Optionally rounded, optionally textured
    /// (the texture is tinted by `color`). Empty or non-finite rectangles are skipped.
    pub fn draw_rect(
        &mut self,
        position: [f32; 2],
        width: f32,
        height: f32,
        color: Color,
        border_radius: Option<f32>,
        texture: Option<&Arc<T>>,
    ) {
        if !(width > 0.0 && height > 0.0 && width.is_finite() && height.is_finite()) {
            return;
        }
        if !(position[0].is_finite() && position[1].is_finite()) {
            return;
        }
        let radius = border_radius
            .filter(|r| r.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, width.min(height) / 2.0);
        self.push_quad(
            texture,
            &Quad {
                min: position,
                max: [position[0] + width, position[1] + height],
                uv: [0.0, 0.0, 1.0, 1.0],
                color,
                mode: if texture.is_some() {
                    QuadMode::Textured
                } else {
                    QuadMode::Color
                },
                radius,
                px_range: 0.0,
            },
        );
    }
    /// Lay out `text` left to right, with the top of the first line at `position`.
    /// `\n` starts a new line. Characters the font lacks take no space.
    pub fn draw_text(
        &mut self,
        position: [f32; 2],
        text: &str,
        size: f32,
        color: Color,
        font: &Font<T>,
    ) {
        if !(size > 0.0 && size.is_finite()) {
            return;
        }
        let scale = font.scale(size);
        let px_range = font.distance_range() * scale;
        let line_height = font.line_height(size);
        let mut pen = [position[0], position[1] + font.ascender(size)];
        for c in text.chars() {
            if c == '\n' {
                pen = [position[0], pen[1] + line_height];
                continue;
            }
            let glyph = font.glyph(c);
            if glyph.is_inked() {
                let plane = glyph.plane;
                // Plane bounds are y-up from the baseline, screen space is y-down.
                self.push_quad(
                    Some(font.atlas()),
                    &Quad {
                        min: [pen[0] + plane.left * scale, pen[1] - plane.top * scale],
                        max: [pen[0] + plane.right * scale, pen[1] - plane.bottom * scale],
                        uv: glyph.uv,
                        color,
                        mode: QuadMode::Msdf,
                        radius: 0.0,
                        px_range,
                    },
                );
            }
            pen[0] += glyph.advance * scale;
        }
    }
    fn push_quad(&mut self, texture: Option<&Arc<T>>, quad: &Quad) {
        let Some(base) = self.vertices.len().checked_as::<u32>() else {
            log::warn!("Draw list vertex limit reached, dropping quad");
            return;
        };
        let first_index = self.indices.len().checked_as::<u32>().unwrap_or(u32::MAX);

        let half_size = [
            (quad.max[0] - quad.min[0]) / 2.0,
            (quad.max[1] - quad.min[1]) / 2.0,
        ];
        let [u0, v0, u1, v1] = quad.uv;
        let color = quad.color.as_array();
        let params = [quad.mode as u32 as f32, quad.radius, quad.px_range, 0.0];
        // Clockwise from top-left.
        let corners = [
            ([quad.min[0], quad.min[1]], [u0, v0], [-1.0, -1.0]),
            ([quad.max[0], quad.min[1]], [u1, v0], [1.0, -1.0]),
            ([quad.max[0], quad.max[1]], [u1, v1], [1.0, 1.0]),
            ([quad.min[0], quad.max[1]], [u0, v1], [-1.0, 1.0]),
        ];
        self.vertices
            .extend(corners.into_iter().map(|(position, uv, sign)| UiVertex {
                position,
                uv,
                color,
                local: [sign[0] * half_size[0], sign[1] * half_size[1]],
                half_size,
                params,
            }));
        self.indices
            .extend([base, base + 1, base + 2, base, base + 2, base + 3]);

        let texture_id = texture.map(|t| t.texture_id());
        match self.batches.last_mut() {
            Some(batch) if batch.texture.as_ref().map(|t| t.texture_id()) == texture_id => {
                batch.index_count += 6;
            }
            _ => self.batches.push(Batch {
                texture: texture.cloned(),
                first_index,
                index_count: 6,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{DrawList, QuadMode};
    use crate::cache::test::MockTexture;
    use crate::color::Color;
    use crate::font::{
        atlas::{test::SyntheticSource, AtlasBuilder, AtlasConfig},
        Font, FontKey,
    };

    pub fn synthetic_font() -> Font<MockTexture> {
        let atlas = AtlasBuilder::new(AtlasConfig::default())
            .unwrap()
            .load(&SyntheticSource)
            .unwrap()
            .color_edges()
            .pack()
            .unwrap()
            .generate()
            .unwrap()
            .commit();
        let texture = MockTexture::new(atlas.bitmap.extent());
        Font::new(FontKey::new("Boxes", 400, false), atlas.face, texture)
    }

    #[test]
    fn batches_split_on_texture_change() {
        let font = synthetic_font();
        let image = MockTexture::new([4, 4]);
        let mut list = DrawList::<MockTexture>::new();

        list.draw_rect([0.0, 0.0], 10.0, 10.0, Color::WHITE, None, None);
        list.draw_rect([0.0, 0.0], 10.0, 10.0, Color::BLACK, Some(3.0), None);
        list.draw_rect([0.0, 0.0], 10.0, 10.0, Color::WHITE, None, Some(&image));
        list.draw_rect([5.0, 0.0], 10.0, 10.0, Color::WHITE, None, Some(&image));
        list.draw_text([0.0, 20.0], "A B", 16.0, Color::BLACK, &font);
        list.draw_rect([0.0, 0.0], 10.0, 10.0, Color::WHITE, None, None);

        // Space has no ink: 2 rects, 2 image rects, 2 glyphs, 1 rect.
        assert_eq!(list.vertices().len(), 7 * 4);
        assert_eq!(list.indices().len(), 7 * 6);
        let batches = list.batches();
        assert_eq!(batches.len(), 4);
        assert!(batches[0].texture.is_none());
        assert_eq!((batches[0].first_index, batches[0].index_count), (0, 12));
        assert!(Arc::ptr_eq(batches[1].texture.as_ref().unwrap(), &image));
        assert_eq!((batches[1].first_index, batches[1].index_count), (12, 12));
        assert!(Arc::ptr_eq(batches[2].texture.as_ref().unwrap(), font.atlas()));
        assert_eq!((batches[2].first_index, batches[2].index_count), (24, 12));
        assert!(batches[3].texture.is_none());
        assert_eq!(batches[3].first_index, 36);
        // Batches tile the index buffer.
        let total: u32 = batches.iter().map(|b| b.index_count).sum();
        assert_eq!(total as usize, list.indices().len());

        list.clear();
        assert!(list.is_empty() && list.batches().is_empty());
    }
    #[test]
    fn rect_geometry() {
        let mut list = DrawList::<MockTexture>::new();
        list.draw_rect([10.0, 20.0], 30.0, 40.0, Color::WHITE, Some(100.0), None);
        // Degenerate ones are dropped.
        list.draw_rect([0.0, 0.0], 0.0, 10.0, Color::WHITE, None, None);
        list.draw_rect([f32::NAN, 0.0], 10.0, 10.0, Color::WHITE, None, None);
        let v = list.vertices();
        assert_eq!(v.len(), 4);
        assert_eq!(v[0].position, [10.0, 20.0]);
        assert_eq!(v[2].position, [40.0, 60.0]);
        assert_eq!(v[2].uv, [1.0, 1.0]);
        assert_eq!(v[0].half_size, [15.0, 20.0]);
        assert_eq!(v[0].local, [-15.0, -20.0]);
        // Radius clamps to half the short side.
        assert_eq!(v[0].params[1], 15.0);
        assert_eq!(v[0].params[0], QuadMode::Color as u32 as f32);
    }
    #[test]
    fn text_follows_advances() {
        let font = synthetic_font();
        let mut list = DrawList::new();
        list.draw_text([100.0, 50.0], "AA", 64.0, Color::BLACK, &font);
        let v = list.vertices();
        assert_eq!(v.len(), 8);
        let advance = font.glyph('A').advance * 2.0;
        assert!((v[4].position[0] - v[0].position[0] - advance).abs() < 1e-3);
        // Glyph quads sit on the baseline, one ascender below the top.
        let baseline = 50.0 + font.ascender(64.0);
        let bottom = baseline - font.glyph('A').plane.bottom * 2.0;
        assert!((v[2].position[1] - bottom).abs() < 1e-3);
        assert_eq!(v[0].params[0], QuadMode::Msdf as u32 as f32);
        assert!((v[0].params[2] - font.distance_range() * 2.0).abs() < 1e-6);

        list.clear();
        list.draw_text([0.0, 0.0], "A\nA", 32.0, Color::BLACK, &font);
        let v = list.vertices();
        assert!((v[4].position[1] - v[0].position[1] - font.line_height(32.0)).abs() < 1e-3);
        assert_eq!(v[4].position[0], v[0].position[0]);
    }
}
