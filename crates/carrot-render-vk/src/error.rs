// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;
use std::time::Duration;

use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("{op} failed: {result}")]
    Vulkan {
        op: &'static str,
        result: vk::Result,
    },

    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("no Vulkan physical device available")]
    NoPhysicalDevice,

    #[error("device `{device}` has no queue family with both graphics and present support")]
    NoQueueFamily { device: String },

    #[error("surface reports no supported formats")]
    NoSurfaceFormat,

    #[error("no memory type in bits {type_bits:#x} has properties {required:?}")]
    NoMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("failed to read shader {}: {source}", path.display())]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader {} is empty", path.display())]
    EmptyShader { path: PathBuf },

    #[error("shader {} is not valid SPIR-V: {source}", path.display())]
    InvalidSpirv {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {timeout:?} waiting for frame slot {slot}")]
    FenceTimeout { slot: usize, timeout: Duration },

    #[error("timed out after {timeout:?} acquiring a swapchain image")]
    AcquireTimeout { timeout: Duration },

    #[error("{op} called while the frame is {state}")]
    FrameOrder {
        op: &'static str,
        state: &'static str,
    },

    #[error("renderer is not initialized")]
    NotInitialized,

    #[error("surface error: {0}")]
    Surface(String),
}

pub type Result<T, E = GpuError> = std::result::Result<T, E>;

/// Attach the name of the failing call to a raw `VkResult`.
pub trait VkResultExt<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|result| GpuError::Vulkan { op, result })
    }
}
