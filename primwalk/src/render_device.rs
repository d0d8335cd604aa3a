use crate::vulkano_prelude::*;
use primwalk_core::AnyResult;
use std::sync::Arc;

pub struct Queue {
    queue: Arc<vk::Queue>,
    family_idx: u32,
}
impl Queue {
    pub fn idx(&self) -> u32 {
        self.family_idx
    }
    pub fn queue(&self) -> &Arc<vk::Queue> {
        &self.queue
    }
}

enum QueueSrc {
    UseGraphics,
    Queue(Queue),
}

struct QueueIndices {
    graphics: u32,
    present: u32,
}
pub struct Queues {
    graphics_queue: Queue,
    present_queue: QueueSrc,
}
impl Queues {
    #[must_use]
    pub fn present(&self) -> &Queue {
        match &self.present_queue {
            QueueSrc::UseGraphics => self.graphics(),
            QueueSrc::Queue(q) => q,
        }
    }
    #[must_use]
    pub fn graphics(&self) -> &Queue {
        &self.graphics_queue
    }
    //No transfer queues yet, just use Graphics.
    #[must_use]
    pub fn transfer(&self) -> &Queue {
        self.graphics()
    }
}

pub struct Allocators {
    command_buffer_alloc: vk::StandardCommandBufferAllocator,
    memory_alloc: Arc<dyn vk::MemoryAllocator>,
    descriptor_set_alloc: vk::StandardDescriptorSetAllocator,
}

impl Allocators {
    pub fn command_buffer(&self) -> &vk::StandardCommandBufferAllocator {
        &self.command_buffer_alloc
    }
    pub fn memory(&self) -> &Arc<dyn vk::MemoryAllocator> {
        &self.memory_alloc
    }
    pub fn descriptor_set(&self) -> &vk::StandardDescriptorSetAllocator {
        &self.descriptor_set_alloc
    }
}

/// Long-lived device state. Everything that allocates from the device holds an `Arc` of this,
/// so the device cannot be torn down from under them.
pub struct RenderContext {
    _library: Arc<vk::VulkanLibrary>,
    _instance: Arc<vk::Instance>,
    physical_device: Arc<vk::PhysicalDevice>,
    device: Arc<vk::Device>,
    queues: Queues,

    _debugger: Option<vulkano::instance::debug::DebugUtilsMessenger>,

    allocators: Allocators,
}

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

impl RenderContext {
    /// Create a device able to present to `window`, and the surface for it.
    ///
    /// With `validation`, the Khronos validation layer is enabled if installed, and messages from it
    /// (and the driver) are forwarded to the log under the `vulkan` target.
    pub fn new_with_window(
        event_loop: &winit::event_loop::EventLoop<()>,
        window: Arc<winit::window::Window>,
        validation: bool,
    ) -> AnyResult<(Arc<Self>, Arc<vk::Surface>)> {
        let library = vk::VulkanLibrary::new()?;
        let (instance, debugger) = Self::create_instance(
            &library,
            vk::Surface::required_extensions(event_loop),
            validation,
        )?;
        let surface = vk::Surface::from_window(instance.clone(), window)?;
        let context = Self::from_instance(
            library,
            instance,
            debugger,
            vk::DeviceExtensions {
                khr_swapchain: true,
                ..Default::default()
            },
            Some(&surface),
        )?;
        Ok((context, surface))
    }
    /// Create a device with no presentation support, for offscreen uploads.
    pub fn new_headless(validation: bool) -> AnyResult<Arc<Self>> {
        let library = vk::VulkanLibrary::new()?;
        let (instance, debugger) =
            Self::create_instance(&library, vk::InstanceExtensions::empty(), validation)?;
        Self::from_instance(
            library,
            instance,
            debugger,
            vk::DeviceExtensions::empty(),
            None,
        )
    }
    fn create_instance(
        library: &Arc<vk::VulkanLibrary>,
        mut extensions: vk::InstanceExtensions,
        validation: bool,
    ) -> AnyResult<(
        Arc<vk::Instance>,
        Option<vulkano::instance::debug::DebugUtilsMessenger>,
    )> {
        let layers = if validation {
            let available = library
                .layer_properties()?
                .any(|layer| layer.name() == VALIDATION_LAYER);
            if !available {
                log::warn!("{VALIDATION_LAYER} requested but not installed");
            }
            extensions.ext_debug_utils = library.supported_extensions().ext_debug_utils;
            if available {
                vec![VALIDATION_LAYER.to_owned()]
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        };

        let instance = vk::Instance::new(
            library.clone(),
            vk::InstanceCreateInfo {
                application_name: Some(option_env!("CARGO_PKG_NAME").unwrap_or("").to_string()),
                application_version: vk::Version {
                    major: option_env!("CARGO_PKG_VERSION_MAJOR")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0),
                    minor: option_env!("CARGO_PKG_VERSION_MINOR")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0),
                    patch: option_env!("CARGO_PKG_VERSION_PATCH")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0),
                },
                enabled_extensions: extensions,
                enabled_layers: layers,
                ..Default::default()
            },
        )?;

        let debugger = if extensions.ext_debug_utils {
            Some(Self::create_debugger(instance.clone())?)
        } else {
            None
        };
        Ok((instance, debugger))
    }
    fn from_instance(
        library: Arc<vk::VulkanLibrary>,
        instance: Arc<vk::Instance>,
        debugger: Option<vulkano::instance::debug::DebugUtilsMessenger>,
        required_device_extensions: vk::DeviceExtensions,
        surface: Option<&Arc<vk::Surface>>,
    ) -> AnyResult<Arc<Self>> {
        let Some((physical_device, queue_indices)) =
            Self::choose_physical_device(&instance, &required_device_extensions, surface)?
        else {
            return Err(anyhow::anyhow!("Failed to find a suitable Vulkan device."));
        };

        log::info!(
            "Chose physical device {} ({:?})",
            physical_device.properties().device_name,
            physical_device.properties().driver_info
        );

        let (device, queues) = Self::create_device(
            physical_device.clone(),
            &queue_indices,
            required_device_extensions,
        )?;

        Ok(Arc::new(Self {
            allocators: Allocators {
                command_buffer_alloc: vk::StandardCommandBufferAllocator::new(
                    device.clone(),
                    Default::default(),
                ),
                memory_alloc: Arc::new(vk::StandardMemoryAllocator::new_default(device.clone())),
                descriptor_set_alloc: vk::StandardDescriptorSetAllocator::new(
                    device.clone(),
                    vk::StandardDescriptorSetAllocatorCreateInfo {
                        update_after_bind: false,
                        ..Default::default()
                    },
                ),
            },
            _library: library,
            _instance: instance,
            device,
            physical_device,
            queues,

            _debugger: debugger,
        }))
    }
    fn create_debugger(
        instance: Arc<vk::Instance>,
    ) -> AnyResult<vulkano::instance::debug::DebugUtilsMessenger> {
        use vulkano::instance::debug as vkDebug;

        Ok(vkDebug::DebugUtilsMessenger::new(
            instance,
            vkDebug::DebugUtilsMessengerCreateInfo {
                message_severity: vkDebug::DebugUtilsMessageSeverity::ERROR
                    | vkDebug::DebugUtilsMessageSeverity::WARNING
                    | vkDebug::DebugUtilsMessageSeverity::INFO
                    | vkDebug::DebugUtilsMessageSeverity::VERBOSE,
                message_type: vkDebug::DebugUtilsMessageType::GENERAL
                    | vkDebug::DebugUtilsMessageType::PERFORMANCE
                    | vkDebug::DebugUtilsMessageType::VALIDATION,
                ..vkDebug::DebugUtilsMessengerCreateInfo::user_callback(
                    // SAFETY: the closure must not access vulkan API in any way.
                    // It only formats and hands the message to the log facade.
                    unsafe {
                        vkDebug::DebugUtilsMessengerCallback::new(|severity, ty, data| {
                            #[allow(clippy::wildcard_in_or_patterns)]
                            let level = match severity {
                                vkDebug::DebugUtilsMessageSeverity::ERROR => log::Level::Error,
                                vkDebug::DebugUtilsMessageSeverity::WARNING => log::Level::Warn,
                                vkDebug::DebugUtilsMessageSeverity::VERBOSE => log::Level::Trace,
                                vkDebug::DebugUtilsMessageSeverity::INFO | _ => log::Level::Debug,
                            };
                            let ty = match ty {
                                vkDebug::DebugUtilsMessageType::GENERAL => "GENERAL",
                                vkDebug::DebugUtilsMessageType::PERFORMANCE => "PERFORMANCE",
                                vkDebug::DebugUtilsMessageType::VALIDATION => "VALIDATION",
                                _ => "UNKNOWN",
                            };
                            let layer = data.message_id_name.unwrap_or("");

                            log::log!(target: "vulkan", level, "[{ty}] {layer} - {}", data.message);
                        })
                    },
                )
            },
        )?)
    }
    fn create_device(
        physical_device: Arc<vk::PhysicalDevice>,
        queue_indices: &QueueIndices,
        extensions: vk::DeviceExtensions,
    ) -> AnyResult<(Arc<vk::Device>, Queues)> {
        let mut create_infos = vec![vk::QueueCreateInfo {
            queue_family_index: queue_indices.graphics,
            queues: vec![0.5],
            ..Default::default()
        }];
        // Present shares the graphics queue when it can, otherwise gets its own family.
        let separate_present = queue_indices.present != queue_indices.graphics;
        if separate_present {
            create_infos.push(vk::QueueCreateInfo {
                queue_family_index: queue_indices.present,
                queues: vec![0.5],
                ..Default::default()
            });
        }

        let (device, mut queues) = vk::Device::new(
            physical_device,
            vk::DeviceCreateInfo {
                enabled_extensions: extensions,
                queue_create_infos: create_infos,
                ..Default::default()
            },
        )?;

        let Some(graphics) = queues.next() else {
            anyhow::bail!("Device created no graphics queue");
        };
        let graphics_queue = Queue {
            queue: graphics,
            family_idx: queue_indices.graphics,
        };
        let present_queue = if separate_present {
            let Some(present) = queues.next() else {
                anyhow::bail!("Device created no present queue");
            };
            QueueSrc::Queue(Queue {
                queue: present,
                family_idx: queue_indices.present,
            })
        } else {
            QueueSrc::UseGraphics
        };

        Ok((
            device,
            Queues {
                graphics_queue,
                present_queue,
            },
        ))
    }
    /// Find a device that has the extensions, a graphics+transfer queue, and can present to `surface`
    /// if there is one. Discrete GPUs are preferred.
    fn choose_physical_device(
        instance: &Arc<vk::Instance>,
        required_extensions: &vk::DeviceExtensions,
        surface: Option<&Arc<vk::Surface>>,
    ) -> AnyResult<Option<(Arc<vk::PhysicalDevice>, QueueIndices)>> {
        let res = instance
            .enumerate_physical_devices()?
            .filter_map(|device| {
                use vk::QueueFlags;

                //Make sure it has what we need
                if !device.supported_extensions().contains(required_extensions) {
                    return None;
                }

                let families = device.queue_family_properties();
                let can_present = |family_idx: usize| {
                    let Some(surface) = surface else {
                        return true;
                    };
                    //Assume error is false.
                    device
                        .surface_support(family_idx as u32, surface.as_ref())
                        .unwrap_or(false)
                };

                //We need a graphics queue, always! Otherwise, disqualify.
                let (graphics, _) = families.iter().enumerate().find(|q| {
                    q.1.queue_flags
                        .contains(QueueFlags::GRAPHICS | QueueFlags::TRANSFER)
                })?;

                //Prefer presenting from the graphics family.
                let present = if can_present(graphics) {
                    graphics
                } else {
                    (0..families.len()).find(|&idx| can_present(idx))?
                };

                Some((
                    device.clone(),
                    QueueIndices {
                        graphics: graphics as u32,
                        present: present as u32,
                    },
                ))
            })
            .min_by_key(|(device, _)| {
                use vk::PhysicalDeviceType;
                match device.properties().device_type {
                    PhysicalDeviceType::DiscreteGpu => 0,
                    PhysicalDeviceType::IntegratedGpu => 1,
                    PhysicalDeviceType::VirtualGpu => 2,

                    _ => 3,
                }
            });

        Ok(res)
    }
    /// Record commands with `record`, submit them on the transfer queue, and block until they finish.
    pub fn submit_once(
        &self,
        record: impl FnOnce(
            &mut vk::AutoCommandBufferBuilder<vk::PrimaryAutoCommandBuffer>,
        ) -> AnyResult<()>,
    ) -> AnyResult<()> {
        let mut cb = vk::AutoCommandBufferBuilder::primary(
            self.allocators().command_buffer(),
            self.queues().transfer().idx(),
            vk::CommandBufferUsage::OneTimeSubmit,
        )?;
        record(&mut cb)?;
        self.now()
            .then_execute(self.queues().transfer().queue().clone(), cb.build()?)?
            .then_signal_fence_and_flush()?
            .wait(None)?;
        Ok(())
    }
    /// Block until every queue has finished its submitted work.
    ///
    /// Each queue is idled under its own lock, so loads submitting from other threads stay
    /// externally synchronized with it.
    pub fn wait_idle(&self) -> AnyResult<()> {
        let graphics = self.queues.graphics().queue();
        graphics.with(|mut queue| queue.wait_idle())?;
        let present = self.queues.present().queue();
        if !Arc::ptr_eq(present, graphics) {
            present.with(|mut queue| queue.wait_idle())?;
        }
        Ok(())
    }
    pub fn now(&self) -> vk::NowFuture {
        vk::sync::now(self.device.clone())
    }
    pub fn physical_device(&self) -> &Arc<vk::PhysicalDevice> {
        &self.physical_device
    }
    pub fn queues(&self) -> &Queues {
        &self.queues
    }
    pub fn device(&self) -> &Arc<vk::Device> {
        &self.device
    }
    pub fn allocators(&self) -> &Allocators {
        &self.allocators
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::RenderContext;
    use crate::vulkano_prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// A headless context, or `None` on machines with no Vulkan device.
    pub fn headless() -> Option<Arc<RenderContext>> {
        let _ = env_logger::builder().is_test(true).try_init();
        RenderContext::new_headless(false)
            .inspect_err(|err| log::warn!("No Vulkan device, skipping: {err:#}"))
            .ok()
    }

    #[test]
    fn wait_idle_alongside_uploads() {
        let Some(context) = headless() else {
            return;
        };
        let stop = AtomicBool::new(false);
        std::thread::scope(|scope| {
            let loaders: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(|| {
                        let mut uploads = 0usize;
                        while uploads == 0 || !stop.load(Ordering::Relaxed) {
                            let stage = crate::staging::stage(&context, &[7; 256]).unwrap();
                            let target = vk::Buffer::new_slice::<u8>(
                                context.allocators().memory().clone(),
                                vk::BufferCreateInfo {
                                    usage: vk::BufferUsage::TRANSFER_DST,
                                    ..Default::default()
                                },
                                vk::AllocationCreateInfo {
                                    memory_type_filter: vk::MemoryTypeFilter::PREFER_DEVICE,
                                    ..Default::default()
                                },
                                256,
                            )
                            .unwrap();
                            context
                                .submit_once(|cb| {
                                    cb.copy_buffer(vk::CopyBufferInfo::buffers(stage, target))?;
                                    Ok(())
                                })
                                .unwrap();
                            uploads += 1;
                        }
                        uploads
                    })
                })
                .collect();
            for _ in 0..64 {
                context.wait_idle().unwrap();
            }
            stop.store(true, Ordering::Relaxed);
            for loader in loaders {
                assert!(loader.join().unwrap() > 0);
            }
        });
    }
}
