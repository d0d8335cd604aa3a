//! Utility types, used throughout the crate.

/// A float which is finite (non-NaN, non-Inf)
// Because of the preconditions invalidating many bitpatterns, this is not Pod.
#[derive(Copy, Clone, PartialEq, PartialOrd, bytemuck::NoUninit, bytemuck::Zeroable, Debug)]
#[repr(transparent)]
pub struct FiniteF32(f32);
impl FiniteF32 {
    pub const ZERO: Self = Self(0.0);
    pub const ONE: Self = Self(1.0);
    pub fn new(val: f32) -> Result<Self, FiniteF32Error> {
        if val.is_finite() {
            Ok(Self(val))
        } else {
            Err(FiniteF32Error::NotFinite)
        }
    }
    /// Wrap a value, replacing non-finite values with zero.
    #[must_use]
    pub fn new_or_zero(val: f32) -> Self {
        Self::new(val).unwrap_or(Self::ZERO)
    }
    #[must_use]
    pub fn get(self) -> f32 {
        self.0
    }
}

impl Default for FiniteF32 {
    fn default() -> Self {
        Self::ZERO
    }
}

impl TryFrom<f32> for FiniteF32 {
    type Error = FiniteF32Error;
    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
impl From<FiniteF32> for f32 {
    fn from(value: FiniteF32) -> Self {
        value.get()
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiniteF32Error {
    #[error("not finite")]
    NotFinite,
}

// This is safe - even though f32 is !Eq, we guarantee that no component is ever NaN
// So PartialEq can act like Eq
impl Eq for FiniteF32 {}
// Doing this on purpose! taking partial ord logic to impl Ord because of struct invariants.
#[allow(clippy::derive_ord_xor_partial_ord)]
impl Ord for FiniteF32 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Never None - NaN is unrepresentable.
        self.0.total_cmp(&other.0)
    }
}

/// Axis-aligned rectangle in logical pixels, y-down. `position` is the top-left corner.
#[derive(Copy, Clone, PartialEq, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    pub position: [f32; 2],
    pub size: [f32; 2],
}
impl Rect {
    #[must_use]
    pub const fn new(position: [f32; 2], size: [f32; 2]) -> Self {
        Self { position, size }
    }
    #[must_use]
    pub fn min(&self) -> [f32; 2] {
        self.position
    }
    #[must_use]
    pub fn max(&self) -> [f32; 2] {
        [
            self.position[0] + self.size[0],
            self.position[1] + self.size[1],
        ]
    }
    #[must_use]
    pub fn center(&self) -> [f32; 2] {
        [
            self.position[0] + self.size[0] / 2.0,
            self.position[1] + self.size[1] / 2.0,
        ]
    }
    /// Inclusive of the top-left edges, exclusive of the bottom-right.
    #[must_use]
    pub fn contains(&self, point: [f32; 2]) -> bool {
        let [max_x, max_y] = self.max();
        point[0] >= self.position[0] && point[1] >= self.position[1] && point[0] < max_x && point[1] < max_y
    }
    /// Shrink by `by` on every side. Sizes saturate at zero.
    #[must_use]
    pub fn inset(&self, by: f32) -> Self {
        Self {
            position: [self.position[0] + by, self.position[1] + by],
            size: [
                (self.size[0] - by * 2.0).max(0.0),
                (self.size[1] - by * 2.0).max(0.0),
            ],
        }
    }
}

#[cfg(test)]
mod test {
    use super::{FiniteF32, Rect};
    #[test]
    fn finite_rejects() {
        assert!(FiniteF32::new(f32::NAN).is_err());
        assert!(FiniteF32::new(f32::INFINITY).is_err());
        assert_eq!(FiniteF32::new_or_zero(f32::NEG_INFINITY), FiniteF32::ZERO);
        assert_eq!(FiniteF32::new(2.5).map(FiniteF32::get), Ok(2.5));
    }
    #[test]
    fn rect_contains_edges() {
        let rect = Rect::new([10.0, 10.0], [5.0, 5.0]);
        assert!(rect.contains([10.0, 10.0]));
        assert!(rect.contains([14.9, 14.9]));
        assert!(!rect.contains([15.0, 12.0]));
        assert!(!rect.contains([9.9, 12.0]));
        assert_eq!(rect.inset(10.0).size, [0.0, 0.0]);
    }
}
