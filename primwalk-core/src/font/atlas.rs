//! # Atlas builder
//!
//! `Unloaded -> GeometryLoaded -> EdgeColored -> Packed -> Generated -> commit()`.
//!
//! Each stage is its own type, so a stage can only be reached from the one before it.
//! Field generation is the only expensive step, and runs per-glyph on a bounded rayon pool.

use az::SaturatingAs;
use rayon::prelude::*;
use rustybuzz::ttf_parser;
use ultraviolet::Vec2;

use super::{
    coloring,
    msdf::{self, Projection},
    packer,
    shape::{Bounds, Shape, ShapeBuilder},
    AtlasRect, FontFace, FontMetrics, Glyph, PlaneBounds,
};
use crate::bitmap::{Bitmap, BitmapError, PixelFormat};

/// Atlases larger than this are refused rather than allocated.
pub const MAX_ATLAS_SIDE: u32 = 8192;

#[derive(thiserror::Error, Debug)]
pub enum AtlasError {
    /// Not `#[from]`: without ttf-parser's `std` feature this isn't a `std::error::Error`.
    #[error("failed to parse face: {0}")]
    Face(ttf_parser::FaceParsingError),
    #[error("invalid atlas config: {0}")]
    Config(&'static str),
    #[error("face reports {0} units per em")]
    UnitsPerEm(f32),
    #[error("atlas would be {side}x{side}, the limit is {MAX_ATLAS_SIDE}")]
    TooLarge { side: u32 },
    #[error("failed to start glyph workers: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Bitmap(#[from] BitmapError),
}

impl From<ttf_parser::FaceParsingError> for AtlasError {
    fn from(value: ttf_parser::FaceParsingError) -> Self {
        Self::Face(value)
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Size, in pixels per em, glyphs are rasterized at.
    pub point_size: f32,
    /// Width of the distance field, in atlas texels. Glyph boxes are padded by half of this on each side.
    pub distance_range: f32,
    /// Joins turning more sharply than this, in radians, are corners.
    pub angle_threshold: f32,
    /// Characters to include beyond printable ASCII.
    pub extra_chars: String,
    /// Field generation threads. 0 lets rayon decide.
    pub worker_threads: usize,
    /// Varies edge coloring. Any value is valid.
    pub coloring_seed: u64,
}
impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            point_size: 32.0,
            distance_range: 4.0,
            angle_threshold: coloring::DEFAULT_ANGLE_THRESHOLD,
            extra_chars: String::new(),
            worker_threads: 0,
            coloring_seed: 0,
        }
    }
}
impl AtlasConfig {
    pub fn validate(&self) -> Result<(), AtlasError> {
        if !(self.point_size.is_finite() && self.point_size > 0.0) {
            return Err(AtlasError::Config("point size must be positive"));
        }
        if !(self.distance_range.is_finite() && self.distance_range > 0.0) {
            return Err(AtlasError::Config("distance range must be positive"));
        }
        if !(self.angle_threshold.is_finite() && self.angle_threshold > 0.0) {
            return Err(AtlasError::Config("angle threshold must be positive"));
        }
        Ok(())
    }
    /// Printable ASCII plus the extra characters, sorted and deduplicated.
    #[must_use]
    pub fn charset(&self) -> Vec<char> {
        let mut chars: Vec<char> = (' '..='~').chain(self.extra_chars.chars()).collect();
        chars.sort_unstable();
        chars.dedup();
        chars
    }
}

/// Vertical metrics in font units. Y-up.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct VerticalMetrics {
    pub ascender: f32,
    pub descender: f32,
    pub line_gap: f32,
}

pub struct GlyphOutline {
    /// In font units.
    pub advance: f32,
    /// Empty for glyphs without ink.
    pub shape: Shape,
}

/// Anything that can hand out glyph outlines in font units.
pub trait OutlineSource {
    fn units_per_em(&self) -> f32;
    fn vertical_metrics(&self) -> VerticalMetrics;
    /// None if the source has no glyph for `c`.
    fn outline(&self, c: char) -> Option<GlyphOutline>;
}
impl OutlineSource for ttf_parser::Face<'_> {
    fn units_per_em(&self) -> f32 {
        f32::from(ttf_parser::Face::units_per_em(self))
    }
    fn vertical_metrics(&self) -> VerticalMetrics {
        VerticalMetrics {
            ascender: f32::from(self.ascender()),
            descender: f32::from(self.descender()),
            line_gap: f32::from(self.line_gap()),
        }
    }
    fn outline(&self, c: char) -> Option<GlyphOutline> {
        let id = self.glyph_index(c)?;
        let advance = self.glyph_hor_advance(id).map_or(0.0, f32::from);
        let mut builder = ShapeBuilder::default();
        // None for glyphs without an outline, which is fine. The builder is then empty.
        let _ = self.outline_glyph(id, &mut builder);
        Some(GlyphOutline {
            advance,
            shape: builder.finish(),
        })
    }
}

struct GlyphGeometry {
    codepoint: char,
    advance: f32,
    shape: Shape,
    bounds: Option<Bounds>,
}

/// Outlines shared by every stage after loading.
struct Geometry {
    glyphs: Vec<GlyphGeometry>,
    units_per_em: f32,
    vertical: VerticalMetrics,
    missing: Vec<char>,
}

/// Where one inked glyph lives in the atlas, and how to get there from font units.
#[derive(Copy, Clone, Debug)]
struct GlyphBox {
    position: [u32; 2],
    extent: [u32; 2],
    projection: Projection,
}

pub struct Unloaded;
pub struct GeometryLoaded(Geometry);
pub struct EdgeColored(Geometry);
pub struct Packed {
    geometry: Geometry,
    side: u32,
    /// Parallel to `geometry.glyphs`.
    boxes: Vec<Option<GlyphBox>>,
}
pub struct Generated {
    geometry: Geometry,
    boxes: Vec<Option<GlyphBox>>,
    bitmap: Bitmap,
}

/// The finished atlas: glyph table plus the RGBA8 field bitmap, not yet on the GPU.
pub struct CommittedAtlas {
    pub face: FontFace,
    pub bitmap: Bitmap,
}

pub struct AtlasBuilder<Stage> {
    config: AtlasConfig,
    stage: Stage,
}
impl<Stage> AtlasBuilder<Stage> {
    #[must_use]
    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }
}
impl AtlasBuilder<Unloaded> {
    pub fn new(config: AtlasConfig) -> Result<Self, AtlasError> {
        config.validate()?;
        Ok(Self {
            config,
            stage: Unloaded,
        })
    }
    /// Parse a font file and load outlines from its first face.
    pub fn load_font_data(self, data: &[u8]) -> Result<AtlasBuilder<GeometryLoaded>, AtlasError> {
        let face = ttf_parser::Face::parse(data, 0)?;
        self.load(&face)
    }
    /// Extract outlines for the charset. Contours are oriented so that filled regions lie left of every edge.
    pub fn load(
        self,
        source: &impl OutlineSource,
    ) -> Result<AtlasBuilder<GeometryLoaded>, AtlasError> {
        let units_per_em = source.units_per_em();
        if !(units_per_em.is_finite() && units_per_em > 0.0) {
            return Err(AtlasError::UnitsPerEm(units_per_em));
        }
        let mut glyphs = Vec::new();
        let mut missing = Vec::new();
        for codepoint in self.config.charset() {
            let Some(GlyphOutline { advance, mut shape }) = source.outline(codepoint) else {
                missing.push(codepoint);
                continue;
            };
            shape.normalize_orientation();
            let bounds = shape.bounds();
            glyphs.push(GlyphGeometry {
                codepoint,
                advance,
                shape,
                bounds,
            });
        }
        if !missing.is_empty() {
            log::debug!("{} charset glyphs missing from face", missing.len());
        }
        Ok(AtlasBuilder {
            config: self.config,
            stage: GeometryLoaded(Geometry {
                glyphs,
                units_per_em,
                vertical: source.vertical_metrics(),
                missing,
            }),
        })
    }
}
impl AtlasBuilder<GeometryLoaded> {
    /// Charset characters the source had no glyph for.
    #[must_use]
    pub fn missing(&self) -> &[char] {
        &self.stage.0.missing
    }
    #[must_use]
    pub fn glyph_count(&self) -> usize {
        self.stage.0.glyphs.len()
    }
    #[must_use]
    pub fn color_edges(self) -> AtlasBuilder<EdgeColored> {
        let mut geometry = self.stage.0;
        for glyph in &mut geometry.glyphs {
            coloring::color_edges(
                &mut glyph.shape,
                self.config.angle_threshold,
                self.config.coloring_seed,
            );
        }
        AtlasBuilder {
            config: self.config,
            stage: EdgeColored(geometry),
        }
    }
}
impl AtlasBuilder<EdgeColored> {
    /// Size every inked glyph's box at the base size and pack them into a square.
    pub fn pack(self) -> Result<AtlasBuilder<Packed>, AtlasError> {
        let geometry = self.stage.0;
        let scale = self.config.point_size / geometry.units_per_em;
        let range = self.config.distance_range;

        // (extent, projection) per glyph.
        let sized: Vec<Option<([u32; 2], Projection)>> = geometry
            .glyphs
            .iter()
            .map(|glyph| {
                let bounds = glyph.bounds.filter(|_| !glyph.shape.is_empty())?;
                let ink = [bounds.width() * scale, bounds.height() * scale];
                let extent = ink.map(|ink| (ink + range).ceil().saturating_as::<u32>().max(1));
                // Center the ink in the box.
                let translate = Vec2::new(
                    (extent[0] as f32 - ink[0]) / 2.0 - bounds.left * scale,
                    (extent[1] as f32 - ink[1]) / 2.0 - bounds.bottom * scale,
                );
                Some((extent, Projection { scale, translate }))
            })
            .collect();

        let extents: Vec<[u32; 2]> = sized
            .iter()
            .map(|s| s.map_or([0, 0], |(extent, _)| extent))
            .collect();
        let packing = packer::pack_square(&extents);
        if packing.side > MAX_ATLAS_SIDE {
            return Err(AtlasError::TooLarge { side: packing.side });
        }
        let boxes = sized
            .into_iter()
            .zip(packing.positions)
            .map(|(sized, position)| {
                sized.map(|(extent, projection)| GlyphBox {
                    position,
                    extent,
                    projection,
                })
            })
            .collect();
        Ok(AtlasBuilder {
            config: self.config,
            stage: Packed {
                geometry,
                side: packing.side,
                boxes,
            },
        })
    }
}
impl AtlasBuilder<Packed> {
    /// Side length of the square atlas bitmap.
    #[must_use]
    pub fn side(&self) -> u32 {
        self.stage.side
    }
    /// Rasterize every glyph's field in parallel, then assemble the atlas bitmap.
    pub fn generate(self) -> Result<AtlasBuilder<Generated>, AtlasError> {
        let Packed {
            geometry,
            side,
            boxes,
        } = self.stage;
        let range = self.config.distance_range;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_threads)
            .thread_name(|idx| format!("primwalk-msdf-{idx}"))
            .build()?;

        let start = std::time::Instant::now();
        // Each glyph rasterizes into its own buffer, blitted into place afterwards.
        let fields: Vec<Option<Vec<u8>>> = pool.install(|| {
            geometry
                .glyphs
                .par_iter()
                .zip(boxes.par_iter())
                .map(|(glyph, glyph_box)| {
                    glyph_box.map(|b| {
                        msdf::generate_mtsdf(&glyph.shape, b.projection, range, b.extent)
                    })
                })
                .collect()
        });

        let mut bitmap = Bitmap::zeroed(side, side, PixelFormat::Rgba8)?;
        for (field, glyph_box) in fields.iter().zip(&boxes) {
            if let (Some(field), Some(glyph_box)) = (field, glyph_box) {
                bitmap.blit(glyph_box.position, glyph_box.extent, field);
            }
        }
        log::info!(
            "Generated {side}x{side} glyph atlas ({}, {} glyphs) in {:?}",
            human_bytes::human_bytes(bitmap.pixels().len() as f64),
            geometry.glyphs.len(),
            start.elapsed(),
        );
        Ok(AtlasBuilder {
            config: self.config,
            stage: Generated {
                geometry,
                boxes,
                bitmap,
            },
        })
    }
}
impl AtlasBuilder<Generated> {
    #[must_use]
    pub fn bitmap(&self) -> &Bitmap {
        &self.stage.bitmap
    }
    /// Convert placements into the glyph table.
    #[must_use]
    pub fn commit(self) -> CommittedAtlas {
        let Generated {
            geometry,
            boxes,
            bitmap,
        } = self.stage;
        let scale = self.config.point_size / geometry.units_per_em;
        let side = bitmap.width() as f32;

        let glyphs = geometry
            .glyphs
            .iter()
            .zip(&boxes)
            .map(|(glyph, glyph_box)| {
                let mut entry = Glyph {
                    codepoint: glyph.codepoint,
                    advance: glyph.advance * scale,
                    plane: PlaneBounds::default(),
                    atlas: None,
                    uv: [0.0; 4],
                };
                if let Some(GlyphBox {
                    position: [x, y],
                    extent: [width, height],
                    projection,
                }) = *glyph_box
                {
                    // The box origin sits at `-translate` relative to the pen.
                    let Vec2 { x: left, y: bottom } = -projection.translate;
                    entry.plane = PlaneBounds {
                        left,
                        bottom,
                        right: left + width as f32,
                        top: bottom + height as f32,
                    };
                    entry.atlas = Some(AtlasRect {
                        x,
                        y,
                        width,
                        height,
                    });
                    entry.uv = [
                        x as f32 / side,
                        y as f32 / side,
                        (x + width) as f32 / side,
                        (y + height) as f32 / side,
                    ];
                }
                (glyph.codepoint, entry)
            })
            .collect();

        let vertical = geometry.vertical;
        let metrics = FontMetrics {
            ascender: vertical.ascender * scale,
            descender: vertical.descender * scale,
            line_height: (vertical.ascender - vertical.descender + vertical.line_gap) * scale,
        };
        CommittedAtlas {
            face: FontFace::new(
                glyphs,
                metrics,
                self.config.point_size,
                self.config.distance_range,
                bitmap.extent(),
            ),
            bitmap,
        }
    }
}

/// Run every stage on a font file.
pub fn build_from_font_data(config: AtlasConfig, data: &[u8]) -> Result<CommittedAtlas, AtlasError> {
    Ok(AtlasBuilder::new(config)?
        .load_font_data(data)?
        .color_edges()
        .pack()?
        .generate()?
        .commit())
}

#[cfg(test)]
pub(crate) mod test {
    use super::{
        build_from_font_data, AtlasBuilder, AtlasConfig, AtlasError, GlyphOutline, OutlineSource,
        VerticalMetrics,
    };
    use crate::font::shape::{test::clockwise_box, ShapeBuilder};

    /// A face of boxes. Printable ASCII only, with varying widths, and space left blank.
    pub struct SyntheticSource;
    impl OutlineSource for SyntheticSource {
        fn units_per_em(&self) -> f32 {
            1000.0
        }
        fn vertical_metrics(&self) -> VerticalMetrics {
            VerticalMetrics {
                ascender: 800.0,
                descender: -200.0,
                line_gap: 100.0,
            }
        }
        fn outline(&self, c: char) -> Option<GlyphOutline> {
            if !(' '..='~').contains(&c) {
                return None;
            }
            let mut builder = ShapeBuilder::default();
            if c != ' ' {
                let width = 200.0 + (u32::from(c) % 7) as f32 * 50.0;
                clockwise_box(&mut builder, [50.0, 0.0], [50.0 + width, 700.0]);
            }
            Some(GlyphOutline {
                advance: 600.0,
                shape: builder.finish(),
            })
        }
    }

    pub fn font_path() -> std::path::PathBuf {
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/DejaVuSansMono.ttf")
    }

    #[test]
    fn bad_config_rejected() {
        let config = AtlasConfig {
            point_size: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            AtlasBuilder::new(config),
            Err(AtlasError::Config(_))
        ));
    }
    #[test]
    fn unreadable_font_is_error() {
        assert!(matches!(
            build_from_font_data(AtlasConfig::default(), b"not a font"),
            Err(AtlasError::Face(_))
        ));
    }
    #[test]
    fn extra_chars_missing_from_face() {
        let config = AtlasConfig {
            extra_chars: "\u{00E9}A".into(),
            ..Default::default()
        };
        let loaded = AtlasBuilder::new(config)
            .unwrap()
            .load(&SyntheticSource)
            .unwrap();
        assert_eq!(loaded.missing(), &['\u{00E9}']);
        // 'A' was deduplicated.
        assert_eq!(loaded.glyph_count(), 95);
    }
    #[test]
    fn synthetic_glyphs_placed() {
        let packed = AtlasBuilder::new(AtlasConfig::default())
            .unwrap()
            .load(&SyntheticSource)
            .unwrap()
            .color_edges()
            .pack()
            .unwrap();
        let side = packed.side();
        let atlas = packed.generate().unwrap().commit();
        assert_eq!(atlas.bitmap.extent(), [side, side]);

        let face = &atlas.face;
        assert!((face.metrics().ascender - 25.6).abs() < 1e-3);
        assert!((face.line_height(32.0) - 35.2).abs() < 1e-3);
        for glyph in face.glyphs() {
            assert!((glyph.advance - 19.2).abs() < 1e-3);
            if glyph.codepoint == ' ' {
                assert!(glyph.atlas.is_none());
                continue;
            }
            let rect = glyph.atlas.unwrap();
            assert!(rect.width > 0 && rect.height > 0);
            assert!(rect.x + rect.width <= side && rect.y + rect.height <= side);
            assert!(glyph.width() > 0.0 && glyph.height() > 0.0);
            // Quad matches the atlas box one to one at the base size.
            assert!((glyph.width() - rect.width as f32).abs() < 1e-3);
            // Ink starts 1.6px right of the pen, padding puts the quad 2px further left.
            let ink_left = 50.0 * 32.0 / 1000.0;
            assert!(glyph.bearing_x() < ink_left && glyph.bearing_x() > ink_left - 3.0);

            // The texel under the glyph center is inside.
            let cx = rect.x + rect.width / 2;
            let cy = rect.y + rect.height / 2;
            let texel = (cy * side + cx) as usize * 4;
            assert!(atlas.bitmap.pixels()[texel + 3] > 128);
        }
    }
    #[test]
    fn real_font_glyphs_have_area() {
        let _ = env_logger::builder().is_test(true).try_init();
        let data = std::fs::read(font_path()).unwrap();
        let atlas = build_from_font_data(AtlasConfig::default(), &data).unwrap();
        let face = &atlas.face;
        for c in AtlasConfig::default().charset() {
            let glyph = face.try_glyph(c).unwrap();
            if c.is_whitespace() {
                continue;
            }
            let rect = glyph.atlas.unwrap_or_else(|| panic!("{c:?} has no atlas box"));
            assert!(rect.width > 0 && rect.height > 0, "{c:?}");
            assert!(glyph.width() > 0.0 && glyph.height() > 0.0, "{c:?}");
        }
        assert!(face.metrics().ascender > 0.0 && face.metrics().descender < 0.0);
    }
}
