//! Host-visible upload buffers.

use crate::render_device::RenderContext;
use crate::vulkano_prelude::*;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("cannot stage zero bytes")]
    Empty,
    #[error(transparent)]
    Allocate(#[from] vk::Validated<vulkano::buffer::AllocateBufferError>),
    /// The buffer is still in use by the device.
    #[error(transparent)]
    HostAccess(#[from] vk::HostAccessError),
    #[error(transparent)]
    Record(#[from] Box<vk::ValidationError>),
    #[error(transparent)]
    Device(anyhow::Error),
}

/// Copy `bytes` into a new host-visible transfer source of exactly `bytes.len()`.
/// The mapping is released before returning.
pub fn stage(context: &RenderContext, bytes: &[u8]) -> Result<vk::Subbuffer<[u8]>, StageError> {
    if bytes.is_empty() {
        return Err(StageError::Empty);
    }
    let buffer = vk::Buffer::new_slice::<u8>(
        context.allocators().memory().clone(),
        vk::BufferCreateInfo {
            sharing: vk::Sharing::Exclusive,
            usage: vk::BufferUsage::TRANSFER_SRC,
            ..Default::default()
        },
        vk::AllocationCreateInfo {
            memory_type_filter: vk::MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
            ..Default::default()
        },
        bytes.len() as vk::DeviceSize,
    )?;
    {
        // We just made it - no concurrent access.
        let mut write = buffer.write()?;
        write.copy_from_slice(bytes);
    }
    Ok(buffer)
}

/// A device-local `T`, written through a host-visible twin. For callers' own uniforms: the UI
/// pipeline passes its projection as a push constant and has no use for one.
///
/// [`StagedBuffer::update`] writes the host copy and records the transfer. The host copy can't be
/// written again until that transfer retires.
pub struct StagedBuffer<T: vk::BufferContents + Copy> {
    host: vk::Subbuffer<T>,
    device: vk::Subbuffer<T>,
}
impl<T: vk::BufferContents + Copy> StagedBuffer<T> {
    /// `usage` is for the device-local half, in addition to `TRANSFER_DST`.
    pub fn new(
        context: &Arc<RenderContext>,
        initial: T,
        usage: vk::BufferUsage,
    ) -> Result<Self, StageError> {
        let host = vk::Buffer::from_data(
            context.allocators().memory().clone(),
            vk::BufferCreateInfo {
                usage: vk::BufferUsage::TRANSFER_SRC,
                ..Default::default()
            },
            vk::AllocationCreateInfo {
                memory_type_filter: vk::MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            initial,
        )?;
        let device = vk::Buffer::new_sized::<T>(
            context.allocators().memory().clone(),
            vk::BufferCreateInfo {
                usage: usage | vk::BufferUsage::TRANSFER_DST,
                ..Default::default()
            },
            vk::AllocationCreateInfo {
                memory_type_filter: vk::MemoryTypeFilter::PREFER_DEVICE,
                ..Default::default()
            },
        )?;
        // Bring the device half up to date before first use.
        context
            .submit_once(|cb| {
                cb.copy_buffer(vk::CopyBufferInfo::buffers(host.clone(), device.clone()))?;
                Ok(())
            })
            .map_err(StageError::Device)?;
        Ok(Self { host, device })
    }
    /// Write `value` and record its transfer into `cb`. The device half holds `value` once `cb`
    /// has executed.
    pub fn update(
        &self,
        value: T,
        cb: &mut vk::AutoCommandBufferBuilder<vk::PrimaryAutoCommandBuffer>,
    ) -> Result<(), StageError> {
        *self.host.write()? = value;
        cb.copy_buffer(vk::CopyBufferInfo::buffers(
            self.host.clone(),
            self.device.clone(),
        ))?;
        Ok(())
    }
    /// The device-local buffer, to bind.
    pub fn buffer(&self) -> &vk::Subbuffer<T> {
        &self.device
    }
}

#[cfg(test)]
mod test {
    use super::{stage, StageError, StagedBuffer};
    use crate::render_device::{test::headless, RenderContext};
    use crate::vulkano_prelude::*;

    /// Copy `source` somewhere the host can read, and read it.
    fn read_back<T: vk::BufferContents + Copy>(
        context: &RenderContext,
        source: &vk::Subbuffer<T>,
    ) -> T {
        let readback = vk::Buffer::new_sized::<T>(
            context.allocators().memory().clone(),
            vk::BufferCreateInfo {
                usage: vk::BufferUsage::TRANSFER_DST,
                ..Default::default()
            },
            vk::AllocationCreateInfo {
                memory_type_filter: vk::MemoryTypeFilter::PREFER_HOST
                    | vk::MemoryTypeFilter::HOST_RANDOM_ACCESS,
                ..Default::default()
            },
        )
        .unwrap();
        let target = readback.clone();
        context
            .submit_once(|cb| {
                cb.copy_buffer(vk::CopyBufferInfo::buffers(source.clone(), target))?;
                Ok(())
            })
            .unwrap();
        let value = *readback.read().unwrap();
        value
    }

    #[test]
    fn empty_stage_is_refused() {
        let Some(context) = headless() else {
            return;
        };
        assert!(matches!(stage(&context, &[]), Err(StageError::Empty)));
        let staged = stage(&context, &[1, 2, 3]).unwrap();
        assert_eq!(staged.len(), 3);
    }
    #[test]
    fn staged_buffer_updates() {
        let Some(context) = headless() else {
            return;
        };
        let uniform =
            StagedBuffer::new(&context, [1.0f32, 2.0, 3.0, 4.0], vk::BufferUsage::UNIFORM_BUFFER)
                .unwrap();
        assert_eq!(read_back(&context, uniform.buffer()), [1.0, 2.0, 3.0, 4.0]);

        context
            .submit_once(|cb| {
                uniform.update([0.5; 4], cb)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(read_back(&context, uniform.buffer()), [0.5; 4]);
    }
}
