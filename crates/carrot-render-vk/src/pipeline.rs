// SPDX-License-Identifier: CEPL-1.0
//! Render pass, pipeline layout and graphics pipeline for the procedural
//! triangle, plus the hot-reload path that rebuilds them from SPIR-V on disk.

use std::ffi::CStr;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{GpuError, Result, VkResultExt};
use crate::gpu::GpuDevice;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl ShaderPaths {
    pub fn new(vertex: impl Into<PathBuf>, fragment: impl Into<PathBuf>) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }
}

/// Read a SPIR-V binary as 32-bit words.
///
/// Missing, empty, misaligned or magic-less files are errors; nothing here
/// ever hands a zero-length blob to the driver.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|source| GpuError::ShaderIo {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(GpuError::EmptyShader {
            path: path.to_path_buf(),
        });
    }

    // read_spv byte-swaps foreign-endian modules and rejects lengths not divisible by 4
    let words =
        ash::util::read_spv(&mut Cursor::new(&bytes[..])).map_err(|source| GpuError::InvalidSpirv {
            path: path.to_path_buf(),
            source,
        })?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(GpuError::InvalidSpirv {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "missing SPIR-V magic number",
            ),
        });
    }
    Ok(words)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushConstantDesc {
    pub stages: vk::ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlendDesc {
    pub enabled: bool,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub color_op: vk::BlendOp,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
    pub write_mask: vk::ColorComponentFlags,
}

impl BlendDesc {
    /// Straight alpha "over" compositing.
    pub fn alpha_over() -> Self {
        Self {
            enabled: true,
            src_color: vk::BlendFactor::SRC_ALPHA,
            dst_color: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            alpha_op: vk::BlendOp::ADD,
            write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
        }
    }
}

/// Single color attachment render pass that ends in a presentable layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderPassDesc {
    pub color_format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

impl RenderPassDesc {
    pub fn presentable(color_format: vk::Format) -> Self {
        Self {
            color_format,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineDesc {
    pub color_format: vk::Format,
    pub stages: Vec<vk::ShaderStageFlags>,
    pub entry_point: &'static CStr,
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub blend: BlendDesc,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub push_constants: Vec<PushConstantDesc>,
}

impl PipelineDesc {
    /// Geometry comes from `gl_VertexIndex`, so there is no vertex input.
    /// The frame counter is pushed as one `u32` to the vertex stage.
    pub fn procedural_triangle(color_format: vk::Format) -> Self {
        Self {
            color_format,
            stages: vec![vk::ShaderStageFlags::VERTEX, vk::ShaderStageFlags::FRAGMENT],
            entry_point: c"main",
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            blend: BlendDesc::alpha_over(),
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            push_constants: vec![PushConstantDesc {
                stages: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: std::mem::size_of::<u32>() as u32,
            }],
        }
    }

    pub fn render_pass(&self) -> RenderPassDesc {
        RenderPassDesc::presentable(self.color_format)
    }
}

/// The three objects a draw needs. All null until built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineObjects {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl PipelineObjects {
    pub fn is_null(&self) -> bool {
        *self == Self::default()
    }

    /// Pipeline, then layout, then render pass: the pipeline references both.
    pub fn release(&mut self, device: &dyn GpuDevice) {
        if self.pipeline != vk::Pipeline::null() {
            device.destroy_pipeline(self.pipeline);
            self.pipeline = vk::Pipeline::null();
        }
        if self.layout != vk::PipelineLayout::null() {
            device.destroy_pipeline_layout(self.layout);
            self.layout = vk::PipelineLayout::null();
        }
        if self.render_pass != vk::RenderPass::null() {
            device.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
    }
}

fn build(device: &dyn GpuDevice, desc: &PipelineDesc, paths: &ShaderPaths) -> Result<PipelineObjects> {
    // read both binaries before touching the device
    let vs_code = load_spirv(&paths.vertex)?;
    let fs_code = load_spirv(&paths.fragment)?;

    let vs = device
        .create_shader_module(&vs_code)
        .op("vkCreateShaderModule(vertex)")?;
    let fs = match device.create_shader_module(&fs_code) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_shader_module(vs);
            return Err(GpuError::Vulkan {
                op: "vkCreateShaderModule(fragment)",
                result: e,
            });
        }
    };

    let mut objects = PipelineObjects::default();
    let built = (|| -> Result<()> {
        objects.render_pass = device
            .create_render_pass(&desc.render_pass())
            .op("vkCreateRenderPass")?;
        objects.layout = device
            .create_pipeline_layout(&desc.push_constants)
            .op("vkCreatePipelineLayout")?;
        objects.pipeline = device
            .create_graphics_pipeline(desc, vs, fs, objects.layout, objects.render_pass)
            .op("vkCreateGraphicsPipelines")?;
        Ok(())
    })();

    // modules are only needed while the pipeline is compiled
    device.destroy_shader_module(vs);
    device.destroy_shader_module(fs);

    match built {
        Ok(()) => Ok(objects),
        Err(e) => {
            objects.release(device);
            Err(e)
        }
    }
}

/// Owns the render pass / layout / pipeline trio and knows how to rebuild it.
#[derive(Debug)]
pub struct PipelineManager {
    paths: ShaderPaths,
    desc: PipelineDesc,
    objects: PipelineObjects,
}

impl PipelineManager {
    /// Nothing is created until [`PipelineManager::create`].
    pub fn new(paths: ShaderPaths) -> Self {
        Self {
            paths,
            desc: PipelineDesc::procedural_triangle(vk::Format::UNDEFINED),
            objects: PipelineObjects::default(),
        }
    }

    pub fn create(&mut self, device: &dyn GpuDevice, color_format: vk::Format) -> Result<()> {
        let desc = PipelineDesc::procedural_triangle(color_format);
        let objects = build(device, &desc, &self.paths)?;
        self.objects.release(device);
        self.objects = objects;
        self.desc = desc;
        info!(
            vertex = %self.paths.vertex.display(),
            fragment = %self.paths.fragment.display(),
            "graphics pipeline created"
        );
        Ok(())
    }

    pub fn destroy(&mut self, device: &dyn GpuDevice) {
        if !self.objects.is_null() {
            debug!("destroying graphics pipeline");
        }
        self.objects.release(device);
    }

    /// Rebuild from the binaries on disk. The device is drained first; the
    /// running pipeline is only replaced once the new one built successfully.
    pub fn reload(&mut self, device: &dyn GpuDevice) -> Result<()> {
        device.wait_idle().op("vkDeviceWaitIdle")?;
        match build(device, &self.desc, &self.paths) {
            Ok(objects) => {
                self.objects.release(device);
                self.objects = objects;
                info!("graphics pipeline reloaded");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "pipeline reload failed, keeping the previous pipeline");
                Err(e)
            }
        }
    }

    pub fn objects(&self) -> PipelineObjects {
        self.objects
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.objects.render_pass
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.objects.layout
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.objects.pipeline
    }

    pub fn desc(&self) -> &PipelineDesc {
        &self.desc
    }

    pub fn paths(&self) -> &ShaderPaths {
        &self.paths
    }
}
