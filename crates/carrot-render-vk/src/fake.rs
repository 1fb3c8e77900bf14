// SPDX-License-Identifier: CEPL-1.0
//! Recording stand-in for the driver. Hands out increasing raw handles,
//! tracks what is alive, and logs every device call by name.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::gpu::{AdapterInfo, GpuDevice, GpuInstance, SubmitDesc, SwapchainDesc};
use crate::pipeline::{PipelineDesc, PushConstantDesc, RenderPassDesc, ShaderPaths, SPIRV_MAGIC};

pub type Shared = Rc<RefCell<FakeState>>;

#[derive(Debug)]
pub struct FakeState {
    /// Device-level call names in order.
    pub calls: Vec<String>,
    /// Misuse the driver would reject: double frees, unknown handles, ...
    pub errors: Vec<String>,
    pub live: BTreeMap<u64, &'static str>,
    pub leaked_at_device_destroy: Vec<(u64, &'static str)>,
    next_raw: u64,

    pub adapters: Vec<AdapterInfo>,
    pub families: Vec<vk::QueueFamilyProperties>,
    pub present_support: Vec<bool>,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub memory_type_bits: u32,
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub modes: Vec<vk::PresentModeKHR>,

    pub device_alive: bool,
    pub instance_alive: bool,

    signaled: BTreeSet<u64>,
    pool_of: BTreeMap<u64, u64>,
    buffer_sizes: BTreeMap<u64, vk::DeviceSize>,
    swapchain_images: BTreeMap<u64, Vec<vk::Image>>,
    next_image: u32,
    fail: BTreeMap<&'static str, vk::Result>,

    pub acquire_script: VecDeque<VkResult<(u32, bool)>>,
    pub present_script: VecDeque<VkResult<bool>>,
    pub last_swapchain_desc: Option<SwapchainDesc>,
    pub framebuffer_extents: BTreeMap<u64, vk::Extent2D>,
    pub pipelines: BTreeMap<u64, PipelineDesc>,
    pub submits: Vec<SubmitDesc>,
    pub presents: Vec<(u32, vk::Semaphore)>,
    pub push_constants: Vec<Vec<u8>>,
    pub clears: Vec<[f32; 4]>,
    pub draws: Vec<(u32, u32)>,
    pub writes: Vec<(u64, vk::DeviceSize, Vec<u8>)>,
    pub copies: Vec<(vk::Buffer, vk::Buffer, vk::DeviceSize)>,
}

impl Default for FakeState {
    fn default() -> Self {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            memory_heap_count: 1,
            ..Default::default()
        };
        memory.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        memory.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        Self {
            calls: Vec::new(),
            errors: Vec::new(),
            live: BTreeMap::new(),
            leaked_at_device_destroy: Vec::new(),
            next_raw: 0x10_000,
            adapters: vec![AdapterInfo {
                handle: vk::PhysicalDevice::from_raw(0x1000),
                name: "Fake iGPU".into(),
                device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            }],
            families: vec![vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            }],
            present_support: vec![true],
            memory,
            memory_type_bits: 0b11,
            caps: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 3,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 1920,
                    height: 1080,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            device_alive: false,
            instance_alive: true,
            signaled: BTreeSet::new(),
            pool_of: BTreeMap::new(),
            buffer_sizes: BTreeMap::new(),
            swapchain_images: BTreeMap::new(),
            next_image: 0,
            fail: BTreeMap::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            last_swapchain_desc: None,
            framebuffer_extents: BTreeMap::new(),
            pipelines: BTreeMap::new(),
            submits: Vec::new(),
            presents: Vec::new(),
            push_constants: Vec::new(),
            clears: Vec::new(),
            draws: Vec::new(),
            writes: Vec::new(),
            copies: Vec::new(),
        }
    }
}

impl FakeState {
    /// Make the next call named `call` fail with `result`.
    pub fn fail_on(&mut self, call: &'static str, result: vk::Result) {
        self.fail.insert(call, result);
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_of_kind(&self, kind: &str) -> usize {
        self.live.values().filter(|k| **k == kind).count()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn is_signaled<H: Handle>(&self, fence: H) -> bool {
        self.signaled.contains(&fence.as_raw())
    }

    pub fn pipeline_desc(&self, pipeline: vk::Pipeline) -> Option<PipelineDesc> {
        self.pipelines.get(&pipeline.as_raw()).cloned()
    }

    fn enter(&mut self, call: &'static str) -> VkResult<()> {
        self.calls.push(call.to_string());
        match self.fail.remove(call) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn mint<H: Handle>(&mut self, kind: &'static str) -> H {
        self.next_raw += 1;
        self.live.insert(self.next_raw, kind);
        H::from_raw(self.next_raw)
    }

    fn untracked<H: Handle>(&mut self) -> H {
        self.next_raw += 1;
        H::from_raw(self.next_raw)
    }

    fn check<H: Handle>(&mut self, handle: H, kind: &'static str, call: &str) {
        let raw = handle.as_raw();
        match self.live.get(&raw) {
            Some(k) if *k == kind => {}
            Some(k) => self
                .errors
                .push(format!("{call}: handle {raw:#x} is a {k}, expected {kind}")),
            None => self
                .errors
                .push(format!("{call}: {kind} {raw:#x} is not alive")),
        }
    }

    fn release<H: Handle + Copy>(&mut self, handle: H, kind: &'static str, call: &str) {
        let raw = handle.as_raw();
        self.check(handle, kind, call);
        self.live.remove(&raw);
    }
}

pub struct FakeInstance {
    state: Shared,
}

impl FakeInstance {
    pub fn new() -> (Shared, Box<dyn GpuInstance>) {
        let state = Rc::new(RefCell::new(FakeState::default()));
        (
            state.clone(),
            Box::new(FakeInstance {
                state: state.clone(),
            }),
        )
    }
}

impl Drop for FakeInstance {
    fn drop(&mut self) {
        let mut s = self.state.borrow_mut();
        if s.device_alive {
            s.errors.push("instance destroyed before device".into());
        }
        s.instance_alive = false;
    }
}

impl GpuInstance for FakeInstance {
    fn enumerate_adapters(&self) -> VkResult<Vec<AdapterInfo>> {
        Ok(self.state.borrow().adapters.clone())
    }

    fn queue_families(&self, _phys: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        self.state.borrow().families.clone()
    }

    fn surface_support(&self, _phys: vk::PhysicalDevice, family: u32) -> VkResult<bool> {
        let mut s = self.state.borrow_mut();
        if let Some(err) = s.fail.remove("surface_support") {
            return Err(err);
        }
        Ok(s.present_support
            .get(family as usize)
            .copied()
            .unwrap_or(false))
    }

    fn memory_properties(&self, _phys: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties {
        self.state.borrow().memory
    }

    fn surface_capabilities(
        &self,
        _phys: vk::PhysicalDevice,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.state.borrow().caps)
    }

    fn surface_formats(&self, _phys: vk::PhysicalDevice) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state.borrow().formats.clone())
    }

    fn present_modes(&self, _phys: vk::PhysicalDevice) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state.borrow().modes.clone())
    }

    fn create_device(
        &self,
        _phys: vk::PhysicalDevice,
        _queue_family: u32,
    ) -> VkResult<Box<dyn GpuDevice>> {
        let mut s = self.state.borrow_mut();
        s.enter("create_device")?;
        s.device_alive = true;
        Ok(Box::new(FakeDevice {
            state: self.state.clone(),
        }))
    }
}

pub struct FakeDevice {
    state: Shared,
}

impl FakeDevice {
    /// A device without an instance, for tests below the `Context`.
    pub fn standalone() -> (Shared, FakeDevice) {
        let state = Rc::new(RefCell::new(FakeState::default()));
        state.borrow_mut().device_alive = true;
        (
            state.clone(),
            FakeDevice {
                state,
            },
        )
    }

    fn s(&self) -> std::cell::RefMut<'_, FakeState> {
        self.state.borrow_mut()
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        let mut s = self.state.borrow_mut();
        s.calls.push("destroy_device".into());
        let leaked: Vec<(u64, &'static str)> = s.live.iter().map(|(r, k)| (*r, *k)).collect();
        s.leaked_at_device_destroy = leaked;
        s.device_alive = false;
    }
}

impl GpuDevice for FakeDevice {
    fn wait_idle(&self) -> VkResult<()> {
        self.s().enter("wait_idle")
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut s = self.s();
        s.enter("create_semaphore")?;
        Ok(s.mint("semaphore"))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut s = self.s();
        s.calls.push("destroy_semaphore".into());
        s.release(semaphore, "semaphore", "destroy_semaphore");
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut s = self.s();
        s.enter("create_fence")?;
        let fence: vk::Fence = s.mint("fence");
        if signaled {
            s.signaled.insert(fence.as_raw());
        }
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut s = self.s();
        s.calls.push("destroy_fence".into());
        s.release(fence, "fence", "destroy_fence");
        s.signaled.remove(&fence.as_raw());
    }

    /// Submitted work completes instantly, so an unsignaled fence never
    /// signals on its own and every wait on one times out.
    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        let mut s = self.s();
        s.enter("wait_for_fence")?;
        s.check(fence, "fence", "wait_for_fence");
        if s.signaled.contains(&fence.as_raw()) {
            Ok(())
        } else {
            Err(vk::Result::TIMEOUT)
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.s();
        s.enter("reset_fence")?;
        s.check(fence, "fence", "reset_fence");
        s.signaled.remove(&fence.as_raw());
        Ok(())
    }

    fn create_command_pool(
        &self,
        _flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool> {
        let mut s = self.s();
        s.enter("create_command_pool")?;
        Ok(s.mint("command_pool"))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut s = self.s();
        s.calls.push("destroy_command_pool".into());
        s.release(pool, "command_pool", "destroy_command_pool");
        // buffers still allocated from the pool go with it
        let owned: Vec<u64> = s
            .pool_of
            .iter()
            .filter(|(_, p)| **p == pool.as_raw())
            .map(|(c, _)| *c)
            .collect();
        for c in owned {
            s.pool_of.remove(&c);
            s.live.remove(&c);
        }
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut s = self.s();
        s.enter("allocate_command_buffers")?;
        s.check(pool, "command_pool", "allocate_command_buffers");
        let mut out = Vec::new();
        for _ in 0..count {
            let cmd: vk::CommandBuffer = s.mint("command_buffer");
            s.pool_of.insert(cmd.as_raw(), pool.as_raw());
            out.push(cmd);
        }
        Ok(out)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut s = self.s();
        s.calls.push("free_command_buffers".into());
        for &cmd in buffers {
            if s.pool_of.remove(&cmd.as_raw()) != Some(pool.as_raw()) {
                s.errors
                    .push(format!("free_command_buffers: {:#x} not from pool", cmd.as_raw()));
            }
            s.release(cmd, "command_buffer", "free_command_buffers");
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.s();
        s.enter("reset_command_buffer")?;
        s.check(cmd, "command_buffer", "reset_command_buffer");
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        let mut s = self.s();
        s.enter("begin_command_buffer")?;
        s.check(cmd, "command_buffer", "begin_command_buffer");
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.s();
        s.enter("end_command_buffer")?;
        s.check(cmd, "command_buffer", "end_command_buffer");
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _extent: vk::Extent2D,
        clear: [f32; 4],
    ) {
        let mut s = self.s();
        s.calls.push("cmd_begin_render_pass".into());
        s.check(cmd, "command_buffer", "cmd_begin_render_pass");
        s.check(render_pass, "render_pass", "cmd_begin_render_pass");
        s.check(framebuffer, "framebuffer", "cmd_begin_render_pass");
        s.clears.push(clear);
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {
        self.s().calls.push("cmd_end_render_pass".into());
    }

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        let mut s = self.s();
        s.calls.push("cmd_bind_pipeline".into());
        s.check(pipeline, "pipeline", "cmd_bind_pipeline");
    }

    fn cmd_set_viewport(&self, _cmd: vk::CommandBuffer, _extent: vk::Extent2D) {
        self.s().calls.push("cmd_set_viewport".into());
    }

    fn cmd_set_scissor(&self, _cmd: vk::CommandBuffer, _extent: vk::Extent2D) {
        self.s().calls.push("cmd_set_scissor".into());
    }

    fn cmd_push_constants(
        &self,
        _cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        _offset: u32,
        bytes: &[u8],
    ) {
        let mut s = self.s();
        s.calls.push("cmd_push_constants".into());
        s.check(layout, "pipeline_layout", "cmd_push_constants");
        s.push_constants.push(bytes.to_vec());
    }

    fn cmd_draw(&self, _cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32) {
        let mut s = self.s();
        s.calls.push("cmd_draw".into());
        s.draws.push((vertex_count, instance_count));
    }

    fn cmd_copy_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        let mut s = self.s();
        s.calls.push("cmd_copy_buffer".into());
        s.check(src, "buffer", "cmd_copy_buffer");
        s.check(dst, "buffer", "cmd_copy_buffer");
        s.copies.push((src, dst, size));
    }

    fn queue_submit(&self, submit: &SubmitDesc) -> VkResult<()> {
        let mut s = self.s();
        s.enter("queue_submit")?;
        s.check(submit.command_buffer, "command_buffer", "queue_submit");
        if submit.fence != vk::Fence::null() {
            let raw = submit.fence.as_raw();
            if s.signaled.contains(&raw) {
                s.errors
                    .push(format!("queue_submit: fence {raw:#x} is still signaled"));
            }
            s.signaled.insert(raw);
        }
        s.submits.push(*submit);
        Ok(())
    }

    fn queue_wait_idle(&self) -> VkResult<()> {
        self.s().enter("queue_wait_idle")
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let mut s = self.s();
        s.enter("create_swapchain")?;
        if desc.old_swapchain != vk::SwapchainKHR::null() {
            s.check(desc.old_swapchain, "swapchain", "create_swapchain(old)");
        }
        let sc: vk::SwapchainKHR = s.mint("swapchain");
        let images: Vec<vk::Image> = (0..desc.image_count).map(|_| s.untracked()).collect();
        s.swapchain_images.insert(sc.as_raw(), images);
        s.last_swapchain_desc = Some(*desc);
        s.next_image = 0;
        Ok(sc)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut s = self.s();
        s.calls.push("destroy_swapchain".into());
        s.release(swapchain, "swapchain", "destroy_swapchain");
        s.swapchain_images.remove(&swapchain.as_raw());
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut s = self.s();
        s.enter("swapchain_images")?;
        Ok(s.swapchain_images
            .get(&swapchain.as_raw())
            .cloned()
            .unwrap_or_default())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.s();
        s.enter("acquire_next_image")?;
        s.check(swapchain, "swapchain", "acquire_next_image");
        s.check(signal, "semaphore", "acquire_next_image");
        if let Some(scripted) = s.acquire_script.pop_front() {
            return scripted;
        }
        let count = s
            .swapchain_images
            .get(&swapchain.as_raw())
            .map_or(1, |i| i.len().max(1)) as u32;
        let index = s.next_image % count;
        s.next_image = s.next_image.wrapping_add(1);
        Ok((index, false))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut s = self.s();
        s.enter("queue_present")?;
        s.check(swapchain, "swapchain", "queue_present");
        s.presents.push((image_index, wait));
        s.present_script.pop_front().unwrap_or(Ok(false))
    }

    fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        let mut s = self.s();
        s.enter("create_image_view")?;
        Ok(s.mint("image_view"))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut s = self.s();
        s.calls.push("destroy_image_view".into());
        s.release(view, "image_view", "destroy_image_view");
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let mut s = self.s();
        s.enter("create_framebuffer")?;
        s.check(render_pass, "render_pass", "create_framebuffer");
        s.check(view, "image_view", "create_framebuffer");
        let fb: vk::Framebuffer = s.mint("framebuffer");
        s.framebuffer_extents.insert(fb.as_raw(), extent);
        Ok(fb)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut s = self.s();
        s.calls.push("destroy_framebuffer".into());
        s.release(framebuffer, "framebuffer", "destroy_framebuffer");
        s.framebuffer_extents.remove(&framebuffer.as_raw());
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let mut s = self.s();
        s.enter("create_shader_module")?;
        if code.first() != Some(&SPIRV_MAGIC) {
            s.errors.push("create_shader_module: not SPIR-V".into());
        }
        Ok(s.mint("shader_module"))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        let mut s = self.s();
        s.calls.push("destroy_shader_module".into());
        s.release(module, "shader_module", "destroy_shader_module");
    }

    fn create_render_pass(&self, _desc: &RenderPassDesc) -> VkResult<vk::RenderPass> {
        let mut s = self.s();
        s.enter("create_render_pass")?;
        Ok(s.mint("render_pass"))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut s = self.s();
        s.calls.push("destroy_render_pass".into());
        s.release(render_pass, "render_pass", "destroy_render_pass");
    }

    fn create_pipeline_layout(
        &self,
        _push_constants: &[PushConstantDesc],
    ) -> VkResult<vk::PipelineLayout> {
        let mut s = self.s();
        s.enter("create_pipeline_layout")?;
        Ok(s.mint("pipeline_layout"))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        let mut s = self.s();
        s.calls.push("destroy_pipeline_layout".into());
        s.release(layout, "pipeline_layout", "destroy_pipeline_layout");
    }

    fn create_graphics_pipeline(
        &self,
        desc: &PipelineDesc,
        vertex: vk::ShaderModule,
        fragment: vk::ShaderModule,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
    ) -> VkResult<vk::Pipeline> {
        let mut s = self.s();
        s.enter("create_graphics_pipeline")?;
        s.check(vertex, "shader_module", "create_graphics_pipeline");
        s.check(fragment, "shader_module", "create_graphics_pipeline");
        s.check(layout, "pipeline_layout", "create_graphics_pipeline");
        s.check(render_pass, "render_pass", "create_graphics_pipeline");
        let pipeline: vk::Pipeline = s.mint("pipeline");
        s.pipelines.insert(pipeline.as_raw(), desc.clone());
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        let mut s = self.s();
        s.calls.push("destroy_pipeline".into());
        s.release(pipeline, "pipeline", "destroy_pipeline");
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer> {
        let mut s = self.s();
        s.enter("create_buffer")?;
        let buffer: vk::Buffer = s.mint("buffer");
        s.buffer_sizes.insert(buffer.as_raw(), size);
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut s = self.s();
        s.calls.push("destroy_buffer".into());
        s.release(buffer, "buffer", "destroy_buffer");
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let s = self.state.borrow();
        vk::MemoryRequirements {
            size: s.buffer_sizes.get(&buffer.as_raw()).copied().unwrap_or(0),
            alignment: 4,
            memory_type_bits: s.memory_type_bits,
        }
    }

    fn allocate_memory(
        &self,
        _size: vk::DeviceSize,
        _memory_type: u32,
    ) -> VkResult<vk::DeviceMemory> {
        let mut s = self.s();
        s.enter("allocate_memory")?;
        Ok(s.mint("memory"))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut s = self.s();
        s.calls.push("free_memory".into());
        s.release(memory, "memory", "free_memory");
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VkResult<()> {
        let mut s = self.s();
        s.enter("bind_buffer_memory")?;
        s.check(buffer, "buffer", "bind_buffer_memory");
        s.check(memory, "memory", "bind_buffer_memory");
        Ok(())
    }

    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        bytes: &[u8],
    ) -> VkResult<()> {
        let mut s = self.s();
        s.enter("write_memory")?;
        s.check(memory, "memory", "write_memory");
        s.writes.push((memory.as_raw(), offset, bytes.to_vec()));
        Ok(())
    }
}

/// Per-test scratch directory under the system temp dir.
pub fn test_shader_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("carrot-vk-{}-{tag}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Write a header-only SPIR-V module as both stages and return their paths.
pub fn write_test_shaders(tag: &str) -> ShaderPaths {
    let dir = test_shader_dir(tag);
    let words: [u32; 5] = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
    let paths = ShaderPaths::new(dir.join("triangle.vert.spv"), dir.join("triangle.frag.spv"));
    std::fs::write(&paths.vertex, bytemuck::cast_slice::<u32, u8>(&words)).unwrap();
    std::fs::write(&paths.fragment, bytemuck::cast_slice::<u32, u8>(&words)).unwrap();
    paths
}
