// SPDX-License-Identifier: CEPL-1.0
//! Device, queue, transfer pool and swapchain ownership.

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{GpuError, Result, VkResultExt};
use crate::gpu::{AdapterInfo, GpuDevice, GpuInstance, SubmitDesc, SwapchainDesc};
use crate::swapchain::{
    choose_present_mode, choose_surface_format, extent_from_caps, format_name,
    image_count_from_caps, pre_transform_from_caps, present_mode_name, PresentPrefs, Swapchain,
};

/// Picks which physical device to run on.
pub trait DeviceSelector {
    fn name(&self) -> &'static str;
    /// Index into `adapters`, or `None` if nothing is acceptable.
    fn select(&self, adapters: &[AdapterInfo]) -> Option<usize>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FirstEnumerated;

impl DeviceSelector for FirstEnumerated {
    fn name(&self) -> &'static str {
        "first"
    }

    fn select(&self, adapters: &[AdapterInfo]) -> Option<usize> {
        (!adapters.is_empty()).then_some(0)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PreferDiscrete;

impl DeviceSelector for PreferDiscrete {
    fn name(&self) -> &'static str {
        "discrete"
    }

    fn select(&self, adapters: &[AdapterInfo]) -> Option<usize> {
        adapters
            .iter()
            .position(|a| a.device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
            .or_else(|| FirstEnumerated.select(adapters))
    }
}

/// Config-facing name of a shipped [`DeviceSelector`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DevicePreference {
    #[default]
    FirstEnumerated,
    PreferDiscrete,
}

impl DevicePreference {
    pub fn selector(self) -> &'static dyn DeviceSelector {
        match self {
            DevicePreference::FirstEnumerated => &FirstEnumerated,
            DevicePreference::PreferDiscrete => &PreferDiscrete,
        }
    }
}

/// First family that can do graphics and present to the surface.
pub fn find_queue_family(
    families: &[vk::QueueFamilyProperties],
    mut can_present: impl FnMut(u32) -> bool,
) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .filter(|(_, f)| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i as u32)
        .find(|&i| can_present(i))
}

/// First memory type allowed by `type_bits` whose flags include all of `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    props
        .memory_types
        .iter()
        .take(props.memory_type_count as usize)
        .enumerate()
        .find(|(i, t)| type_bits & (1u32 << *i) != 0 && t.property_flags.contains(required))
        .map(|(i, _)| i as u32)
        .ok_or(GpuError::NoMemoryType {
            type_bits,
            required,
        })
}

/// A buffer and the memory bound to it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

pub struct Context {
    // drop order matters: device before instance
    device: Option<Box<dyn GpuDevice>>,
    instance: Option<Box<dyn GpuInstance>>,
    phys: vk::PhysicalDevice,
    adapter_name: String,
    queue_family: u32,
    memory: vk::PhysicalDeviceMemoryProperties,
    transfer_pool: vk::CommandPool,
    swapchain: Swapchain,
    present: PresentPrefs,
}

impl Context {
    /// Select a device, resolve a graphics+present queue family, create the
    /// logical device and the transfer pool.
    pub fn init(instance: Box<dyn GpuInstance>, selector: &dyn DeviceSelector) -> Result<Self> {
        let adapters = instance
            .enumerate_adapters()
            .op("vkEnumeratePhysicalDevices")?;
        for (i, a) in adapters.iter().enumerate() {
            debug!(index = i, name = %a.name, kind = ?a.device_type, "physical device");
        }
        let adapter = selector
            .select(&adapters)
            .and_then(|i| adapters.get(i))
            .cloned()
            .ok_or(GpuError::NoPhysicalDevice)?;

        let families = instance.queue_families(adapter.handle);
        let mut support_error = None;
        let found = find_queue_family(&families, |i| {
            match instance.surface_support(adapter.handle, i) {
                Ok(supported) => supported,
                Err(e) => {
                    warn!(family = i, error = %e, "surface support query failed");
                    support_error.get_or_insert(e);
                    false
                }
            }
        });
        // a driver error explains the miss better than "no queue family"
        let queue_family = match (found, support_error) {
            (Some(family), _) => family,
            (None, Some(result)) => {
                return Err(GpuError::Vulkan {
                    op: "vkGetPhysicalDeviceSurfaceSupportKHR",
                    result,
                })
            }
            (None, None) => {
                return Err(GpuError::NoQueueFamily {
                    device: adapter.name.clone(),
                })
            }
        };

        let memory = instance.memory_properties(adapter.handle);
        let device = instance
            .create_device(adapter.handle, queue_family)
            .op("vkCreateDevice")?;

        let mut ctx = Self {
            device: Some(device),
            instance: Some(instance),
            phys: adapter.handle,
            adapter_name: adapter.name,
            queue_family,
            memory,
            transfer_pool: vk::CommandPool::null(),
            swapchain: Swapchain::default(),
            present: PresentPrefs::default(),
        };

        ctx.transfer_pool = ctx
            .device()?
            .create_command_pool(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )
            .op("vkCreateCommandPool(transfer)")?;

        info!(
            device = %ctx.adapter_name,
            policy = selector.name(),
            queue_family,
            "GPU context ready"
        );
        Ok(ctx)
    }

    pub fn device(&self) -> Result<&dyn GpuDevice> {
        self.device.as_deref().ok_or(GpuError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn transfer_pool(&self) -> vk::CommandPool {
        self.transfer_pool
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn present_prefs(&self) -> PresentPrefs {
        self.present
    }

    /// Takes effect on the next `create_swapchain`.
    pub fn set_present_prefs(&mut self, prefs: PresentPrefs) {
        self.present = prefs;
    }

    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        find_memory_type(&self.memory, type_bits, required)
    }

    /// (Re)build the swapchain for the requested size. The previous views
    /// and swapchain are always released. The caller drains the device first.
    pub fn create_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        let (Some(device), Some(instance)) = (self.device.as_deref(), self.instance.as_deref())
        else {
            return Err(GpuError::NotInitialized);
        };

        let caps = instance
            .surface_capabilities(self.phys)
            .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        let formats = instance
            .surface_formats(self.phys)
            .op("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        let modes = instance
            .present_modes(self.phys)
            .op("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

        let (surface_format, reason) = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&modes, self.present);
        let extent = extent_from_caps(&caps, width, height);
        let image_count = image_count_from_caps(&caps);

        // views belong to the old images
        for view in self.swapchain.views.drain(..) {
            device.destroy_image_view(view);
        }
        let old = std::mem::take(&mut self.swapchain);

        let created = device.create_swapchain(&SwapchainDesc {
            surface_format,
            present_mode,
            extent,
            image_count,
            pre_transform: pre_transform_from_caps(&caps),
            old_swapchain: old.handle,
        });
        // retired either way once the new one was requested
        if old.handle != vk::SwapchainKHR::null() {
            device.destroy_swapchain(old.handle);
        }
        let handle = created.op("vkCreateSwapchainKHR")?;

        let images = match device.swapchain_images(handle) {
            Ok(images) => images,
            Err(e) => {
                device.destroy_swapchain(handle);
                return Err(GpuError::Vulkan {
                    op: "vkGetSwapchainImagesKHR",
                    result: e,
                });
            }
        };

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            match device.create_image_view(image, surface_format.format) {
                Ok(v) => views.push(v),
                Err(e) => {
                    for v in views {
                        device.destroy_image_view(v);
                    }
                    device.destroy_swapchain(handle);
                    return Err(GpuError::Vulkan {
                        op: "vkCreateImageView",
                        result: e,
                    });
                }
            }
        }

        info!(
            reason,
            format = format_name(surface_format.format),
            present_mode = present_mode_name(present_mode),
            width = extent.width,
            height = extent.height,
            images = images.len(),
            "swapchain created"
        );

        self.swapchain = Swapchain {
            handle,
            format: surface_format.format,
            color_space: surface_format.color_space,
            extent,
            present_mode,
            images,
            views,
        };
        Ok(())
    }

    /// Allocate a primary command buffer from the transfer pool and begin it
    /// for a single submission. Setup and upload only.
    pub fn begin_one_time_commands(&self) -> Result<vk::CommandBuffer> {
        let device = self.device()?;
        let cmd = device
            .allocate_command_buffers(self.transfer_pool, 1)
            .op("vkAllocateCommandBuffers(one-time)")?
            .into_iter()
            .next()
            .ok_or(GpuError::Vulkan {
                op: "vkAllocateCommandBuffers(one-time)",
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            })?;
        if let Err(e) = device.begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
        {
            device.free_command_buffers(self.transfer_pool, &[cmd]);
            return Err(GpuError::Vulkan {
                op: "vkBeginCommandBuffer(one-time)",
                result: e,
            });
        }
        Ok(cmd)
    }

    /// End, submit and block until the queue is idle, then free `cmd`.
    pub fn end_one_time_commands(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let device = self.device()?;
        let run = || -> Result<()> {
            device
                .end_command_buffer(cmd)
                .op("vkEndCommandBuffer(one-time)")?;
            device
                .queue_submit(&SubmitDesc {
                    command_buffer: cmd,
                    wait: None,
                    signal: None,
                    fence: vk::Fence::null(),
                })
                .op("vkQueueSubmit(one-time)")?;
            device.queue_wait_idle().op("vkQueueWaitIdle")
        };
        let result = run();
        device.free_command_buffers(self.transfer_pool, &[cmd]);
        result
    }

    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer> {
        let device = self.device()?;
        let buffer = device.create_buffer(size, usage).op("vkCreateBuffer")?;

        let bound = (|| -> Result<vk::DeviceMemory> {
            let req = device.buffer_memory_requirements(buffer);
            let type_index = self.find_memory_type(req.memory_type_bits, props)?;
            let memory = device
                .allocate_memory(req.size, type_index)
                .op("vkAllocateMemory")?;
            if let Err(e) = device.bind_buffer_memory(buffer, memory) {
                device.free_memory(memory);
                return Err(GpuError::Vulkan {
                    op: "vkBindBufferMemory",
                    result: e,
                });
            }
            Ok(memory)
        })();

        match bound {
            Ok(memory) => Ok(GpuBuffer {
                buffer,
                memory,
                size,
            }),
            Err(e) => {
                device.destroy_buffer(buffer);
                Err(e)
            }
        }
    }

    pub fn destroy_buffer(&self, buf: &mut GpuBuffer) {
        let Some(device) = self.device.as_deref() else {
            return;
        };
        if buf.buffer != vk::Buffer::null() {
            device.destroy_buffer(buf.buffer);
        }
        if buf.memory != vk::DeviceMemory::null() {
            device.free_memory(buf.memory);
        }
        *buf = GpuBuffer::default();
    }

    /// Copy `bytes` into `dst` through a host-visible staging buffer.
    /// `dst` needs `TRANSFER_DST` usage.
    pub fn upload_to_buffer(&self, dst: &GpuBuffer, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let size = bytes.len() as vk::DeviceSize;
        let mut staging = self.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let copied = (|| -> Result<()> {
            let device = self.device()?;
            device
                .write_memory(staging.memory, 0, bytes)
                .op("vkMapMemory(staging)")?;
            let cmd = self.begin_one_time_commands()?;
            device.cmd_copy_buffer(cmd, staging.buffer, dst.buffer, size.min(dst.size));
            self.end_one_time_commands(cmd)
        })();

        self.destroy_buffer(&mut staging);
        copied
    }

    /// Release swapchain views, swapchain, transfer pool, device, then
    /// surface and instance. Safe to call more than once.
    pub fn destroy(&mut self) {
        if let Some(device) = self.device.as_deref() {
            if let Err(e) = device.wait_idle() {
                warn!(error = %e, "vkDeviceWaitIdle failed during context teardown");
            }
            for view in self.swapchain.views.drain(..) {
                device.destroy_image_view(view);
            }
            if self.swapchain.handle != vk::SwapchainKHR::null() {
                device.destroy_swapchain(self.swapchain.handle);
            }
            if self.transfer_pool != vk::CommandPool::null() {
                device.destroy_command_pool(self.transfer_pool);
            }
            debug!("GPU context destroyed");
        }
        self.swapchain = Swapchain::default();
        self.transfer_pool = vk::CommandPool::null();

        // device strictly before surface + instance
        drop(self.device.take());
        drop(self.instance.take());
        self.phys = vk::PhysicalDevice::null();
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.destroy();
    }
}
