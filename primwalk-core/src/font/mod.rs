//! # Fonts
//!
//! Text is drawn from a multi-channel signed distance field atlas: every glyph of the charset is
//! rasterized once, at a base point size, into one RGBA texture. Since a distance field scales cleanly,
//! one atlas serves every requested size, so fonts are keyed by family, weight and style only.
//!
//! Building an atlas is a fixed pipeline, see [`atlas::AtlasBuilder`]. The result is a [`FontFace`]
//! (metrics and per-glyph placement) plus a bitmap, which the resource cache uploads and binds together
//! into a [`Font`].

pub mod atlas;
pub mod coloring;
pub mod msdf;
pub mod packer;
pub mod shape;

use rustybuzz::ttf_parser;

/// Identity of a font in the resource cache.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FontKey {
    pub family: String,
    /// CSS-style weight, 100..=900. 400 is regular.
    pub weight: u16,
    pub italic: bool,
}
impl FontKey {
    #[must_use]
    pub fn new(family: impl Into<String>, weight: u16, italic: bool) -> Self {
        Self {
            family: family.into(),
            weight,
            italic,
        }
    }
    /// Read the key a face describes itself with, from its `name` and `OS/2` tables.
    pub fn from_face_data(data: &[u8]) -> Result<Self, ttf_parser::FaceParsingError> {
        let face = ttf_parser::Face::parse(data, 0)?;
        Ok(Self::from_face(&face))
    }
    #[must_use]
    pub fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let name = |id: u16| {
            face.names()
                .into_iter()
                .filter(|name| name.name_id == id && name.is_unicode())
                .find_map(|name| decode_utf16_be(name.name))
        };
        // Typographic family groups all weights under one name, the legacy family may not.
        let family = name(ttf_parser::name_id::TYPOGRAPHIC_FAMILY)
            .or_else(|| name(ttf_parser::name_id::FAMILY))
            .unwrap_or_else(|| String::from("Unknown"));
        Self {
            family,
            weight: face.weight().to_number(),
            italic: face.is_italic(),
        }
    }
}
/// Unicode `name` records are UTF-16BE. `None` on odd length or unpaired surrogates.
fn decode_utf16_be(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}
impl std::fmt::Display for FontKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.family, self.weight)?;
        if self.italic {
            write!(f, " italic")?;
        }
        Ok(())
    }
}

/// Quad extents relative to the pen position on the baseline, in pixels at the base size. Y-up.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct PlaneBounds {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

/// Placement in the atlas bitmap, in texels. Top-left origin.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AtlasRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Glyph {
    pub codepoint: char,
    /// Pen advance, in pixels at the base size.
    pub advance: f32,
    /// Bounds of the textured quad, including the distance range padding.
    pub plane: PlaneBounds,
    /// None for glyphs without ink, like space.
    pub atlas: Option<AtlasRect>,
    /// Normalized `[u0, v0, u1, v1]`, top-left to bottom-right.
    pub uv: [f32; 4],
}
impl Glyph {
    /// Stand-in for code points the face does not cover. Draws nothing, takes no space.
    pub const MISSING: Self = Self {
        codepoint: char::REPLACEMENT_CHARACTER,
        advance: 0.0,
        plane: PlaneBounds {
            left: 0.0,
            bottom: 0.0,
            right: 0.0,
            top: 0.0,
        },
        atlas: None,
        uv: [0.0; 4],
    };
    #[must_use]
    pub fn bearing_x(&self) -> f32 {
        self.plane.left
    }
    #[must_use]
    pub fn width(&self) -> f32 {
        self.plane.right - self.plane.left
    }
    #[must_use]
    pub fn height(&self) -> f32 {
        self.plane.top - self.plane.bottom
    }
    #[must_use]
    pub fn is_inked(&self) -> bool {
        self.atlas.is_some()
    }
}

/// Vertical metrics in pixels at the base size. Y-up, so the descender is usually negative.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct FontMetrics {
    pub ascender: f32,
    pub descender: f32,
    pub line_height: f32,
}

/// Glyph table and metrics of one atlas.
#[derive(Clone, Debug)]
pub struct FontFace {
    glyphs: hashbrown::HashMap<char, Glyph>,
    metrics: FontMetrics,
    base_size: f32,
    distance_range: f32,
    atlas_extent: [u32; 2],
}
impl FontFace {
    pub(crate) fn new(
        glyphs: hashbrown::HashMap<char, Glyph>,
        metrics: FontMetrics,
        base_size: f32,
        distance_range: f32,
        atlas_extent: [u32; 2],
    ) -> Self {
        Self {
            glyphs,
            metrics,
            base_size,
            distance_range,
            atlas_extent,
        }
    }
    /// The glyph for `c`, or [`Glyph::MISSING`].
    #[must_use]
    pub fn glyph(&self, c: char) -> &Glyph {
        self.glyphs.get(&c).unwrap_or(&Glyph::MISSING)
    }
    #[must_use]
    pub fn try_glyph(&self, c: char) -> Option<&Glyph> {
        self.glyphs.get(&c)
    }
    pub fn glyphs(&self) -> impl Iterator<Item = &Glyph> + '_ {
        self.glyphs.values()
    }
    /// Point size the atlas was rasterized at. Glyph metrics are in pixels at this size.
    #[must_use]
    pub fn base_size(&self) -> f32 {
        self.base_size
    }
    /// Distance field range, in atlas texels.
    #[must_use]
    pub fn distance_range(&self) -> f32 {
        self.distance_range
    }
    #[must_use]
    pub fn atlas_extent(&self) -> [u32; 2] {
        self.atlas_extent
    }
    #[must_use]
    pub fn metrics(&self) -> FontMetrics {
        self.metrics
    }
    /// Factor from base size metrics to `size`.
    #[must_use]
    pub fn scale(&self, size: f32) -> f32 {
        size / self.base_size
    }
    #[must_use]
    pub fn ascender(&self, size: f32) -> f32 {
        self.metrics.ascender * self.scale(size)
    }
    #[must_use]
    pub fn line_height(&self, size: f32) -> f32 {
        self.metrics.line_height * self.scale(size)
    }
    /// Horizontal extent of a single line of `text` at `size`.
    ///
    /// Every glyph but the last contributes its advance. The last contributes its ink extent
    /// (`bearing_x + width`), or its advance if it has no ink.
    #[must_use]
    pub fn text_width(&self, text: &str, size: f32) -> f32 {
        let scale = self.scale(size);
        let mut chars = text.chars().peekable();
        let mut width = 0.0;
        while let Some(c) = chars.next() {
            let glyph = self.glyph(c);
            width += if chars.peek().is_some() || !glyph.is_inked() {
                glyph.advance
            } else {
                glyph.bearing_x() + glyph.width()
            } * scale;
        }
        width
    }
}

/// A font ready to draw: the face, plus the atlas texture its UVs refer to.
pub struct Font<T> {
    key: FontKey,
    face: FontFace,
    atlas: std::sync::Arc<T>,
}
impl<T> Font<T> {
    pub fn new(key: FontKey, face: FontFace, atlas: std::sync::Arc<T>) -> Self {
        Self { key, face, atlas }
    }
    #[must_use]
    pub fn key(&self) -> &FontKey {
        &self.key
    }
    #[must_use]
    pub fn face(&self) -> &FontFace {
        &self.face
    }
    #[must_use]
    pub fn atlas(&self) -> &std::sync::Arc<T> {
        &self.atlas
    }
}
impl<T> std::ops::Deref for Font<T> {
    type Target = FontFace;
    fn deref(&self) -> &Self::Target {
        &self.face
    }
}
impl<T> std::fmt::Debug for Font<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Font")
            .field("key", &self.key)
            .field("base_size", &self.face.base_size)
            .field("glyphs", &self.face.glyphs.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::atlas::{test::SyntheticSource, AtlasBuilder, AtlasConfig};
    use super::{FontFace, FontKey, Glyph};

    fn synthetic_face() -> FontFace {
        AtlasBuilder::new(AtlasConfig::default())
            .unwrap()
            .load(&SyntheticSource)
            .unwrap()
            .color_edges()
            .pack()
            .unwrap()
            .generate()
            .unwrap()
            .commit()
            .face
    }
    #[test]
    fn missing_is_sentinel() {
        let face = synthetic_face();
        assert!(face.try_glyph('\u{1F980}').is_none());
        assert_eq!(face.glyph('\u{1F980}'), &Glyph::MISSING);
        assert_eq!(face.text_width("\u{1F980}", 32.0), 0.0);
    }
    #[test]
    fn width_last_glyph_is_ink() {
        let face = synthetic_face();
        let a = face.glyph('A');
        let b = face.glyph('B');
        let expected = a.advance * 2.0 + (b.bearing_x() + b.width()) * 2.0;
        let got = face.text_width("AB", face.base_size() * 2.0);
        assert!((expected - got).abs() < 1e-3, "{expected} != {got}");
        // Trailing whitespace counts with its advance.
        let space = face.glyph(' ');
        assert!(!space.is_inked());
        let got = face.text_width("A ", face.base_size());
        assert!((got - (a.advance + space.advance)).abs() < 1e-3);
    }
    #[test]
    fn empty_text_is_zero() {
        assert_eq!(synthetic_face().text_width("", 12.0), 0.0);
    }
    #[test]
    fn real_font_width_is_monotonic() {
        let data = std::fs::read(super::atlas::test::font_path()).unwrap();
        let config = AtlasConfig {
            point_size: 16.0,
            ..Default::default()
        };
        let face = super::atlas::build_from_font_data(config, &data).unwrap().face;

        let text = "Hello, world";
        let mut last = 0.0;
        for size in [6.0, 12.0, 13.0, 32.0, 100.0] {
            let width = face.text_width(text, size);
            assert!(width > last, "{width} <= {last} at {size}");
            last = width;
        }
        let mut last = 0.0;
        for end in 1..=text.len() {
            let width = face.text_width(&text[..end], 24.0);
            assert!(width >= last, "{:?} shrank", &text[..end]);
            last = width;
        }
    }
    #[test]
    fn real_font_two_glyph_width() {
        let data = std::fs::read(super::atlas::test::font_path()).unwrap();
        let face = super::atlas::build_from_font_data(AtlasConfig::default(), &data)
            .unwrap()
            .face;
        let a = face.glyph('A');
        let b = face.glyph('B');
        let scale = 32.0 / face.base_size();
        let expected = a.advance * scale + (b.bearing_x() + b.width()) * scale;
        let got = face.text_width("AB", 32.0);
        assert!((expected - got).abs() < 1e-3, "{expected} != {got}");
    }
    #[test]
    fn key_display() {
        assert_eq!(FontKey::new("Sans", 700, true).to_string(), "Sans 700 italic");
        assert_eq!(FontKey::new("Sans", 400, false).to_string(), "Sans 400");
    }
    #[test]
    fn utf16_names() {
        assert_eq!(
            super::decode_utf16_be(&[0, b'S', 0, b'a', 0x00, 0xE9]).as_deref(),
            Some("Sa\u{e9}")
        );
        // Surrogate pair.
        assert_eq!(
            super::decode_utf16_be(&[0xD8, 0x3E, 0xDD, 0x80]).as_deref(),
            Some("\u{1F980}")
        );
        assert!(super::decode_utf16_be(&[0, b'S', 0]).is_none());
        assert!(super::decode_utf16_be(&[0xD8, 0x3E]).is_none());
    }
}
