// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use anyhow::Context as _;
use ash::vk;
use carrot_render::{FrameStatus, RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use crate::ash_backend::AshInstance;
use crate::context::{Context, DevicePreference};
use crate::error::{GpuError, Result, VkResultExt};
use crate::frame_ring::{FrameCursor, FrameRing};
use crate::gpu::{GpuDevice, GpuInstance, SubmitDesc};
use crate::pipeline::{PipelineManager, ShaderPaths};
use crate::swapchain::{PresentPrefs, Swapchain, VsyncMode};

pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.15, 0.05, 0.0, 1.0];
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub shaders: ShaderPaths,
    pub clear_color: [f32; 4],
    pub present: PresentPrefs,
    pub device: DevicePreference,
    /// Upper bound for the slot fence wait and for image acquisition.
    pub frame_timeout: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            shaders: ShaderPaths::new("shaders/triangle.vert.spv", "shaders/triangle.frag.spv"),
            clear_color: DEFAULT_CLEAR_COLOR,
            present: PresentPrefs::default(),
            device: DevicePreference::default(),
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
        }
    }
}

/// Something that draws on top of the frame (debug text, gizmos, ...).
///
/// `record` is called once per frame after the engine's own draw, inside the
/// still-open render pass. It must not begin or end a render pass itself.
pub trait OverlayRenderer {
    fn is_initialized(&self) -> bool;
    fn record(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording { image_index: u32, pass_open: bool },
    Submitted,
}

impl FrameState {
    pub fn name(&self) -> &'static str {
        match self {
            FrameState::Idle => "idle",
            FrameState::Acquiring => "acquiring",
            FrameState::Recording {
                pass_open: true, ..
            } => "recording",
            FrameState::Recording {
                pass_open: false, ..
            } => "recorded",
            FrameState::Submitted => "submitted",
        }
    }
}

fn timeout_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn create_framebuffers(
    device: &dyn GpuDevice,
    render_pass: vk::RenderPass,
    swapchain: &Swapchain,
) -> Result<Vec<vk::Framebuffer>> {
    let mut out = Vec::with_capacity(swapchain.views.len());
    for &view in &swapchain.views {
        match device.create_framebuffer(render_pass, view, swapchain.extent) {
            Ok(fb) => out.push(fb),
            Err(e) => {
                destroy_framebuffers(device, &mut out);
                return Err(GpuError::Vulkan {
                    op: "vkCreateFramebuffer",
                    result: e,
                });
            }
        }
    }
    Ok(out)
}

fn destroy_framebuffers(device: &dyn GpuDevice, framebuffers: &mut Vec<vk::Framebuffer>) {
    for fb in framebuffers.drain(..) {
        device.destroy_framebuffer(fb);
    }
}

/// Drives one frame at a time through acquire, record, submit and present.
pub struct VkRenderer {
    ctx: Context,
    ring: FrameRing,
    pipeline: PipelineManager,
    framebuffers: Vec<vk::Framebuffer>,
    cursor: FrameCursor,
    state: FrameState,
    overlay: Option<Box<dyn OverlayRenderer>>,

    clear: [f32; 4],
    requested: RenderSize,
    frame_timeout: Duration,
    paused: bool,
    swapchain_dirty: bool,
    shut_down: bool,
}

impl VkRenderer {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: RendererConfig,
    ) -> anyhow::Result<Self> {
        let instance =
            AshInstance::new(window, display).context("creating Vulkan instance and surface")?;
        Self::with_instance(Box::new(instance), size, config)
    }

    /// Build on an already created instance + surface.
    pub fn with_instance(
        instance: Box<dyn GpuInstance>,
        size: RenderSize,
        config: RendererConfig,
    ) -> anyhow::Result<Self> {
        let mut ctx = Context::init(instance, config.device.selector())
            .context("initializing GPU context")?;
        ctx.set_present_prefs(config.present);

        let mut renderer = Self {
            ctx,
            ring: FrameRing::default(),
            pipeline: PipelineManager::new(config.shaders),
            framebuffers: Vec::new(),
            cursor: FrameCursor::default(),
            state: FrameState::Idle,
            overlay: None,
            clear: config.clear_color,
            requested: size,
            frame_timeout: config.frame_timeout,
            paused: size.is_zero_area(),
            swapchain_dirty: false,
            shut_down: false,
        };
        // on error the partially built renderer is dropped, which runs shutdown
        renderer
            .init_resources()
            .context("creating swapchain, pipeline and frame resources")?;

        info!(
            device = renderer.ctx.adapter_name(),
            width = renderer.requested.width,
            height = renderer.requested.height,
            "Vulkan renderer ready"
        );
        Ok(renderer)
    }

    fn init_resources(&mut self) -> Result<()> {
        // a minimized window still gets a 1x1 swapchain so the pipeline knows its format
        self.ctx
            .create_swapchain(self.requested.width.max(1), self.requested.height.max(1))?;
        let device = self.ctx.device()?;
        let swapchain = self.ctx.swapchain();
        self.pipeline.create(device, swapchain.format)?;
        self.framebuffers = create_framebuffers(device, self.pipeline.render_pass(), swapchain)?;
        self.ring = FrameRing::new(device)?;
        Ok(())
    }

    /// Drain the GPU and rebuild swapchain, framebuffers and the frame ring.
    fn recreate_swapchain(&mut self) -> Result<()> {
        if self.requested.is_zero_area() {
            self.paused = true;
            return Ok(());
        }

        // retried from begin_frame until it succeeds
        self.swapchain_dirty = true;

        // STRICT ORDER:
        // 1) device idle
        // 2) framebuffers go before the views they point at
        // 3) swapchain + views (old ones released inside)
        // 4) pipeline again only if the surface format changed
        // 5) framebuffers, then fresh slots
        self.ctx.device()?.wait_idle().op("vkDeviceWaitIdle")?;
        destroy_framebuffers(self.ctx.device()?, &mut self.framebuffers);
        self.ctx
            .create_swapchain(self.requested.width, self.requested.height)?;

        let device = self.ctx.device()?;
        let swapchain = self.ctx.swapchain();
        if swapchain.format != self.pipeline.desc().color_format {
            info!("surface format changed, rebuilding pipeline");
            self.pipeline.create(device, swapchain.format)?;
        }
        self.framebuffers = create_framebuffers(device, self.pipeline.render_pass(), swapchain)?;
        self.ring.recreate(device)?;

        self.swapchain_dirty = false;
        debug!(
            width = swapchain.extent.width,
            height = swapchain.extent.height,
            images = swapchain.image_count(),
            "swapchain dependents rebuilt"
        );
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.shut_down {
            Err(GpuError::NotInitialized)
        } else {
            Ok(())
        }
    }

    fn begin_inner(&mut self) -> Result<FrameStatus> {
        self.ensure_live()?;
        if self.state != FrameState::Idle {
            return Err(GpuError::FrameOrder {
                op: "begin_frame",
                state: self.state.name(),
            });
        }
        if self.paused {
            return Ok(FrameStatus::Skipped);
        }
        if self.swapchain_dirty {
            self.recreate_swapchain()?;
            return Ok(FrameStatus::Skipped);
        }

        let slot_index = self.cursor.slot();
        let slot = *self.ring.slot(slot_index);
        let timeout = timeout_ns(self.frame_timeout);

        {
            let device = self.ctx.device()?;
            match device.wait_for_fence(slot.in_flight, timeout) {
                Ok(()) => {}
                Err(vk::Result::TIMEOUT) => {
                    return Err(GpuError::FenceTimeout {
                        slot: slot_index,
                        timeout: self.frame_timeout,
                    })
                }
                Err(e) => {
                    return Err(GpuError::Vulkan {
                        op: "vkWaitForFences",
                        result: e,
                    })
                }
            }
        }

        self.state = FrameState::Acquiring;
        let acquired = self.ctx.device()?.acquire_next_image(
            self.ctx.swapchain().handle,
            timeout,
            slot.image_available,
        );
        let image_index = match acquired {
            Ok((index, false)) => index,
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!(suboptimal = acquired.is_ok(), "swapchain stale on acquire");
                self.state = FrameState::Idle;
                self.recreate_swapchain()?;
                return Ok(FrameStatus::Skipped);
            }
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => {
                return Err(GpuError::AcquireTimeout {
                    timeout: self.frame_timeout,
                })
            }
            Err(e) => {
                return Err(GpuError::Vulkan {
                    op: "vkAcquireNextImageKHR",
                    result: e,
                })
            }
        };

        // framebuffers lost to a failed rebuild: the acquired image and its
        // semaphore are dropped with the rest of the swapchain
        let Some(framebuffer) = self.framebuffers.get(image_index as usize).copied() else {
            debug!(image_index, "no framebuffer for acquired image");
            self.state = FrameState::Idle;
            self.recreate_swapchain()?;
            return Ok(FrameStatus::Skipped);
        };

        if let Err(e) = self.open_recording(slot.command_buffer, slot.in_flight, framebuffer) {
            // the slot fence may already be reset; fresh slots come signaled
            self.swapchain_dirty = true;
            return Err(e);
        }

        self.state = FrameState::Recording {
            image_index,
            pass_open: true,
        };
        Ok(FrameStatus::Ready)
    }

    /// Reset the slot fence, then start the command buffer and the pass.
    fn open_recording(
        &self,
        cmd: vk::CommandBuffer,
        fence: vk::Fence,
        framebuffer: vk::Framebuffer,
    ) -> Result<()> {
        // the fence is only reset once this slot will definitely be submitted
        let device = self.ctx.device()?;
        let extent = self.ctx.swapchain().extent;
        device.reset_fence(fence).op("vkResetFences")?;
        device.reset_command_buffer(cmd).op("vkResetCommandBuffer")?;
        device
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .op("vkBeginCommandBuffer")?;

        device.cmd_begin_render_pass(cmd, self.pipeline.render_pass(), framebuffer, extent, self.clear);
        device.cmd_bind_pipeline(cmd, self.pipeline.pipeline());
        device.cmd_set_viewport(cmd, extent);
        device.cmd_set_scissor(cmd, extent);
        let frame = self.cursor.frame();
        device.cmd_push_constants(
            cmd,
            self.pipeline.layout(),
            vk::ShaderStageFlags::VERTEX,
            0,
            bytemuck::bytes_of(&frame),
        );
        Ok(())
    }

    fn render_inner(&mut self) -> Result<()> {
        self.ensure_live()?;
        let image_index = match self.state {
            FrameState::Idle => return Ok(()),
            FrameState::Recording {
                image_index,
                pass_open: true,
            } => image_index,
            other => {
                return Err(GpuError::FrameOrder {
                    op: "render_frame",
                    state: other.name(),
                })
            }
        };

        let device = self.ctx.device()?;
        let cmd = self.ring.slot(self.cursor.slot()).command_buffer;
        device.cmd_draw(cmd, 3, 1);

        // overlay always goes last so it blends over the scene
        if let Some(overlay) = self.overlay.as_mut() {
            if overlay.is_initialized() {
                if let Err(e) = overlay.record(cmd, self.ctx.swapchain().extent) {
                    warn!(error = %e, "overlay failed to record, frame continues without it");
                }
            }
        }

        device.cmd_end_render_pass(cmd);
        self.state = FrameState::Recording {
            image_index,
            pass_open: false,
        };
        Ok(())
    }

    fn end_inner(&mut self) -> Result<()> {
        self.ensure_live()?;
        let image_index = match self.state {
            FrameState::Idle => return Ok(()),
            FrameState::Recording {
                image_index,
                pass_open: false,
            } => image_index,
            other => {
                return Err(GpuError::FrameOrder {
                    op: "end_frame",
                    state: other.name(),
                })
            }
        };

        let slot = *self.ring.slot(self.cursor.slot());
        let device = self.ctx.device()?;
        device
            .end_command_buffer(slot.command_buffer)
            .op("vkEndCommandBuffer")?;
        device
            .queue_submit(&SubmitDesc {
                command_buffer: slot.command_buffer,
                wait: Some((
                    slot.image_available,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                )),
                signal: Some(slot.render_finished),
                fence: slot.in_flight,
            })
            .op("vkQueueSubmit")?;
        self.state = FrameState::Submitted;

        let presented =
            device.queue_present(self.ctx.swapchain().handle, image_index, slot.render_finished);

        // submitted work counts as a frame whatever present says
        self.cursor.advance();
        self.state = FrameState::Idle;

        match presented {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("swapchain stale on present");
                self.recreate_swapchain()
            }
            Err(e) => Err(GpuError::Vulkan {
                op: "vkQueuePresentKHR",
                result: e,
            }),
        }
    }

    /// A failed frame drops back to idle. A misordered call leaves the frame
    /// in progress untouched.
    ///
    /// A frame that dies while recording holds a reset fence that will never
    /// be signaled, so the slots are rebuilt on the next `begin_frame`.
    fn settle<T>(&mut self, r: Result<T>) -> anyhow::Result<T> {
        if let Err(e) = &r {
            if !matches!(e, GpuError::FrameOrder { .. }) {
                if matches!(self.state, FrameState::Recording { .. }) {
                    self.swapchain_dirty = true;
                }
                self.state = FrameState::Idle;
            }
        }
        Ok(r?)
    }

    pub fn set_vsync_mode(&mut self, mode: VsyncMode) {
        let mut prefs = self.ctx.present_prefs();
        if prefs.mode != mode {
            prefs.mode = mode;
            self.ctx.set_present_prefs(prefs);
            self.swapchain_dirty = true;
        }
    }

    pub fn set_overlay(&mut self, overlay: Box<dyn OverlayRenderer>) {
        self.overlay = Some(overlay);
    }

    pub fn take_overlay(&mut self) -> Option<Box<dyn OverlayRenderer>> {
        self.overlay.take()
    }

    /// The command buffer of the slot that is (or will be) recording.
    pub fn current_command_buffer(&self) -> vk::CommandBuffer {
        self.ring.slot(self.cursor.slot()).command_buffer
    }

    pub fn frame_counter(&self) -> u32 {
        self.cursor.frame()
    }

    pub fn frame_slot(&self) -> usize {
        self.cursor.slot()
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn pipeline(&self) -> &PipelineManager {
        &self.pipeline
    }

    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }
}

impl Renderer for VkRenderer {
    fn resize(&mut self, size: RenderSize) -> anyhow::Result<()> {
        self.ensure_live()?;
        self.requested = size;
        if size.is_zero_area() {
            if !self.paused {
                debug!("zero-area surface, pausing");
            }
            self.paused = true;
            return Ok(());
        }
        self.paused = false;
        if self.state != FrameState::Idle {
            // the frame in progress still owns its slot; rebuild once it is done
            self.swapchain_dirty = true;
            return Ok(());
        }
        let r = self.recreate_swapchain();
        self.settle(r).context("recreating swapchain after resize")
    }

    fn begin_frame(&mut self) -> anyhow::Result<FrameStatus> {
        let r = self.begin_inner();
        self.settle(r)
    }

    fn render_frame(&mut self) -> anyhow::Result<()> {
        let r = self.render_inner();
        self.settle(r)
    }

    fn end_frame(&mut self) -> anyhow::Result<()> {
        let r = self.end_inner();
        self.settle(r)
    }

    fn reload_pipeline(&mut self) -> anyhow::Result<()> {
        self.ensure_live()?;
        if self.state != FrameState::Idle {
            return Err(GpuError::FrameOrder {
                op: "reload_pipeline",
                state: self.state.name(),
            }
            .into());
        }
        let device = self.ctx.device()?;
        self.pipeline
            .reload(device)
            .context("reloading graphics pipeline")?;
        // framebuffers were made against the previous render pass
        destroy_framebuffers(device, &mut self.framebuffers);
        match create_framebuffers(device, self.pipeline.render_pass(), self.ctx.swapchain()) {
            Ok(framebuffers) => self.framebuffers = framebuffers,
            Err(e) => {
                self.swapchain_dirty = true;
                return Err(anyhow::Error::new(e).context("recreating framebuffers after reload"));
            }
        }
        Ok(())
    }

    /// Pipeline (pipeline, layout, render pass), framebuffers, frame ring,
    /// then the context.
    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.overlay = None;

        if let Ok(device) = self.ctx.device() {
            if let Err(e) = device.wait_idle() {
                warn!(error = %e, "vkDeviceWaitIdle failed during shutdown");
            }
            self.pipeline.destroy(device);
            destroy_framebuffers(device, &mut self.framebuffers);
            self.ring.destroy(device);
        }
        self.ctx.destroy();
        self.state = FrameState::Idle;
        info!(frames = self.cursor.frame(), "Vulkan renderer shut down");
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }

    fn set_vsync(&mut self, on: bool) {
        let mut prefs = self.ctx.present_prefs();
        if prefs.vsync != on {
            prefs.vsync = on;
            self.ctx.set_present_prefs(prefs);
            self.swapchain_dirty = true;
        }
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
