//! CPU-side pixel buffers, the input to every texture upload.

/// Texel formats the toolkit uploads. The GPU layer maps these onto its own format enum.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum PixelFormat {
    /// Single channel, linear. Coverage masks.
    R8,
    /// Four channel, linear. Distance fields must be linear!
    Rgba8,
    /// Four channel, sRGB-encoded color. Decoded images.
    Rgba8Srgb,
}
impl PixelFormat {
    #[must_use]
    pub fn channels(self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::Rgba8 | Self::Rgba8Srgb => 4,
        }
    }
    /// Bytes per texel.
    #[must_use]
    pub fn texel_size(self) -> usize {
        self.channels() as usize
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BitmapError {
    #[error("expected {expected} bytes for {width}x{height} {format:?}, got {got}")]
    SizeMismatch {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        got: usize,
    },
    #[error("zero-sized image")]
    Empty,
    #[error(transparent)]
    Decode(#[from] image::ImageError),
}

/// Tightly packed, row-major, top-to-bottom pixel data.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
}
impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Don't dump the pixels.
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}
impl Bitmap {
    /// Byte length required for the given dimensions. None on overflow.
    #[must_use]
    pub fn byte_len(width: u32, height: u32, format: PixelFormat) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(format.texel_size())
    }
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
    ) -> Result<Self, BitmapError> {
        if width == 0 || height == 0 {
            return Err(BitmapError::Empty);
        }
        let expected = Self::byte_len(width, height, format).ok_or(BitmapError::Empty)?;
        if expected != pixels.len() {
            return Err(BitmapError::SizeMismatch {
                width,
                height,
                format,
                expected,
                got: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            pixels,
        })
    }
    /// A zeroed bitmap.
    pub fn zeroed(width: u32, height: u32, format: PixelFormat) -> Result<Self, BitmapError> {
        let len = Self::byte_len(width, height, format).ok_or(BitmapError::Empty)?;
        Self::new(width, height, format, vec![0; len])
    }
    /// A 1x1 opaque white image, the stand-in texture for untextured draws.
    #[must_use]
    pub fn white_pixel() -> Self {
        Self {
            width: 1,
            height: 1,
            format: PixelFormat::Rgba8Srgb,
            pixels: vec![255; 4],
        }
    }
    /// Decode an encoded image file (PNG, JPEG, BMP) into sRGB RGBA8.
    pub fn decode(bytes: &[u8]) -> Result<Self, BitmapError> {
        let image = image::load_from_memory(bytes)?.into_rgba8();
        let (width, height) = image.dimensions();
        Self::new(width, height, PixelFormat::Rgba8Srgb, image.into_raw())
    }
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }
    #[must_use]
    pub fn extent(&self) -> [u32; 2] {
        [self.width, self.height]
    }
    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.format
    }
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
    /// Copy a tightly packed block of the same format into this bitmap with its top-left at `at`.
    ///
    /// # Panics
    /// If the block does not fit, or `block` has the wrong length.
    pub fn blit(&mut self, at: [u32; 2], block_extent: [u32; 2], block: &[u8]) {
        let texel = self.format.texel_size();
        let row_len = block_extent[0] as usize * texel;
        assert!(at[0] + block_extent[0] <= self.width && at[1] + block_extent[1] <= self.height);
        assert_eq!(block.len(), row_len * block_extent[1] as usize);

        let stride = self.width as usize * texel;
        for (row, src) in block.chunks_exact(row_len.max(1)).enumerate() {
            let start = (at[1] as usize + row) * stride + at[0] as usize * texel;
            self.pixels[start..start + row_len].copy_from_slice(src);
        }
    }
}
