// SPDX-License-Identifier: CEPL-1.0
//! Vulkan frame execution: device context, a ring of in-flight frame
//! resources, a hot-reloadable graphics pipeline and the per-frame
//! begin / render / end state machine that drives them.

mod ash_backend;
pub mod context;
mod error;
pub mod frame_ring;
pub mod gpu;
pub mod pipeline;
pub mod renderer;
pub mod swapchain;

#[cfg(test)]
mod fake;

/// Frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

pub use ash_backend::{AshDevice, AshInstance};
pub use context::{
    Context, DevicePreference, DeviceSelector, FirstEnumerated, GpuBuffer, PreferDiscrete,
};
pub use error::{GpuError, Result, VkResultExt};
pub use frame_ring::{FrameCursor, FrameResource, FrameRing};
pub use gpu::{AdapterInfo, GpuDevice, GpuInstance};
pub use pipeline::{load_spirv, PipelineDesc, PipelineManager, ShaderPaths};
pub use renderer::{FrameState, OverlayRenderer, RendererConfig, VkRenderer};
pub use swapchain::{PresentPrefs, VsyncMode};

pub use ash::vk;
