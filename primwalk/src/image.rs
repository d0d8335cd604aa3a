//! Device-local sampled images, uploaded through a staging buffer.

use crate::render_device::RenderContext;
use crate::staging::{self, StageError};
use crate::vulkano_prelude::*;
use primwalk_core::{
    bitmap::BitmapError,
    cache::{ResourceFactory, TextureHandle},
    Bitmap, PixelFormat, TextureID,
};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    /// The pixels don't describe an image of the requested size. Resource-local.
    #[error(transparent)]
    Bitmap(#[from] BitmapError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Device(#[from] anyhow::Error),
}

fn vk_format(format: PixelFormat) -> vk::Format {
    match format {
        PixelFormat::R8 => vk::Format::R8_UNORM,
        PixelFormat::Rgba8 => vk::Format::R8G8B8A8_UNORM,
        PixelFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
    }
}

/// An immutable-size texture. Freed when the last `Arc` to it, or to a descriptor set referencing
/// it, drops.
pub struct GpuImage {
    context: Arc<RenderContext>,
    id: TextureID,
    image: Arc<vk::Image>,
    view: Arc<vk::ImageView>,
    format: PixelFormat,
}
impl GpuImage {
    /// Create and fill an image. Blocks until the upload completes.
    pub fn create(
        context: &Arc<RenderContext>,
        width: u32,
        height: u32,
        pixels: &[u8],
        format: PixelFormat,
    ) -> Result<Self, ImageError> {
        let bitmap = Bitmap::new(width, height, format, pixels.to_vec())?;
        Self::from_bitmap(context, &bitmap)
    }
    pub fn from_bitmap(context: &Arc<RenderContext>, bitmap: &Bitmap) -> Result<Self, ImageError> {
        let image = vk::Image::new(
            context.allocators().memory().clone(),
            vk::ImageCreateInfo {
                array_layers: 1,
                format: vk_format(bitmap.format()),
                extent: [bitmap.width(), bitmap.height(), 1],
                usage: vk::ImageUsage::TRANSFER_DST | vk::ImageUsage::SAMPLED,
                sharing: vk::Sharing::Exclusive,
                ..Default::default()
            },
            vk::AllocationCreateInfo {
                memory_type_filter: vk::MemoryTypeFilter::PREFER_DEVICE,
                ..Default::default()
            },
        )
        .map_err(anyhow::Error::from)?;

        let mapping = if bitmap.format() == PixelFormat::R8 {
            //One channel, representing percent coverage of white.
            vk::ComponentMapping {
                a: vk::ComponentSwizzle::Red,
                r: vk::ComponentSwizzle::One,
                g: vk::ComponentSwizzle::One,
                b: vk::ComponentSwizzle::One,
            }
        } else {
            vk::ComponentMapping::identity()
        };
        let view = vk::ImageView::new(
            image.clone(),
            vk::ImageViewCreateInfo {
                component_mapping: mapping,
                ..vk::ImageViewCreateInfo::from_image(&image)
            },
        )
        .map_err(anyhow::Error::from)?;

        let this = Self {
            context: context.clone(),
            id: TextureID::default(),
            image,
            view,
            format: bitmap.format(),
        };
        this.upload(bitmap.pixels())?;
        log::debug!(
            "Created {} ({}x{} {:?})",
            this.id,
            bitmap.width(),
            bitmap.height(),
            this.format
        );
        Ok(this)
    }
    /// Replace the whole contents. `pixels` must be the same size and format as at creation.
    ///
    /// Blocks until the copy completes. The image must not be in use by an unretired frame.
    pub fn update_data(&self, pixels: &[u8]) -> Result<(), ImageError> {
        let [width, height] = self.extent();
        // Validates the length.
        Bitmap::new(width, height, self.format, pixels.to_vec())?;
        self.upload(pixels)
    }
    fn upload(&self, pixels: &[u8]) -> Result<(), ImageError> {
        let stage = staging::stage(&self.context, pixels)?;
        let image = self.image.clone();
        // Layout transitions around the copy are inserted by the command buffer builder.
        self.context.submit_once(move |cb| {
            let region = vk::BufferImageCopy {
                image_extent: image.extent(),
                image_subresource: vk::ImageSubresourceLayers {
                    array_layers: 0..1,
                    aspects: vk::ImageAspects::COLOR,
                    mip_level: 0,
                },
                // Buffer is tightly-packed, same size as the image.
                ..Default::default()
            };
            cb.copy_buffer_to_image(vk::CopyBufferToImageInfo {
                regions: smallvec::smallvec![region],
                ..vk::CopyBufferToImageInfo::buffer_image(stage, image)
            })?;
            Ok(())
        })?;
        Ok(())
    }
    pub fn view(&self) -> &Arc<vk::ImageView> {
        &self.view
    }
    pub fn format(&self) -> PixelFormat {
        self.format
    }
}
impl TextureHandle for GpuImage {
    fn texture_id(&self) -> TextureID {
        self.id
    }
    fn extent(&self) -> [u32; 2] {
        let [width, height, _] = self.image.extent();
        [width, height]
    }
}

/// Creates [`GpuImage`]s for the resource cache.
#[derive(Clone)]
pub struct GpuResources {
    context: Arc<RenderContext>,
}
impl GpuResources {
    pub fn new(context: Arc<RenderContext>) -> Self {
        Self { context }
    }
    pub fn context(&self) -> &Arc<RenderContext> {
        &self.context
    }
}
impl ResourceFactory for GpuResources {
    type Texture = GpuImage;
    fn create_texture(&self, bitmap: &Bitmap) -> anyhow::Result<GpuImage> {
        Ok(GpuImage::from_bitmap(&self.context, bitmap)?)
    }
}
