use crate::util::{FiniteF32, FiniteF32Error};

/// A straight-alpha sRGB color, as widgets specify it.
/// All transparent values (alpha == 0) are normalized to transparent black.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, bytemuck::Zeroable, Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct Color([FiniteF32; 4]);
impl Color {
    pub const TRANSPARENT: Self = Self([FiniteF32::ZERO; 4]);
    pub const WHITE: Self = Self([FiniteF32::ONE; 4]);
    pub const BLACK: Self = Self([
        FiniteF32::ZERO,
        FiniteF32::ZERO,
        FiniteF32::ZERO,
        FiniteF32::ONE,
    ]);
    /// Create a color from straight sRGB channels in `[0, 1]`. Channels are clamped.
    /// Normalizes all fully transparent colors to transparent black.
    pub fn new_lossy(r: f32, g: f32, b: f32, a: f32) -> Result<Self, FiniteF32Error> {
        let raw = Self([
            FiniteF32::new(r.clamp(0.0, 1.0))?,
            FiniteF32::new(g.clamp(0.0, 1.0))?,
            FiniteF32::new(b.clamp(0.0, 1.0))?,
            FiniteF32::new(a.clamp(0.0, 1.0))?,
        ]);
        if raw.0[3].get() == 0.0 {
            Ok(Self::TRANSPARENT)
        } else {
            Ok(raw)
        }
    }
    pub fn from_array_lossy([r, g, b, a]: [f32; 4]) -> Result<Self, FiniteF32Error> {
        Self::new_lossy(r, g, b, a)
    }
    /// From 8-bit sRGB channels. Infallible.
    #[must_use]
    pub fn from_rgba8([r, g, b, a]: [u8; 4]) -> Self {
        let f = |c: u8| f32::from(c) / 255.0;
        // Division of a u8 by 255 is always finite.
        Self::new_lossy(f(r), f(g), f(b), f(a)).unwrap_or(Self::TRANSPARENT)
    }
    #[must_use]
    pub fn as_array(&self) -> [f32; 4] {
        [
            self.0[0].get(),
            self.0[1].get(),
            self.0[2].get(),
            self.0[3].get(),
        ]
    }
    #[must_use]
    pub fn alpha(&self) -> f32 {
        self.0[3].get()
    }
    #[must_use]
    pub fn with_alpha(self, alpha: f32) -> Self {
        let [r, g, b, _] = self.as_array();
        Self::new_lossy(r, g, b, alpha).unwrap_or(self)
    }
    /// Linear interpolation in sRGB space. `t` is clamped to `[0, 1]`, NaN is treated as 0.
    #[must_use]
    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        if t == 1.0 {
            return to;
        }
        let from = self.as_array();
        let to = to.as_array();
        let mix = |i: usize| from[i] + (to[i] - from[i]) * t;
        Self::new_lossy(mix(0), mix(1), mix(2), mix(3)).unwrap_or(self)
    }
    /// Linear-light straight-alpha channels, for clearing or writing into sRGB targets.
    #[must_use]
    pub fn to_linear(&self) -> [f32; 4] {
        let [r, g, b, a] = self.as_array();
        [srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b), a]
    }
}

/// sRGB transfer function, inverted. Alpha is already linear and never goes through this.
#[must_use]
pub fn srgb_to_linear(c: f32) -> f32 {
    if c < 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}
impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}
// Safety: FiniteF32 is NoUninit, arrays have no uninit bytes of their own.
unsafe impl bytemuck::NoUninit for Color {}
