// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{GpuError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum VsyncMode {
    #[default]
    Fifo,
    Mailbox,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentPrefs {
    pub vsync: bool,
    pub mode: VsyncMode,
}

impl Default for PresentPrefs {
    fn default() -> Self {
        Self {
            vsync: true,
            mode: VsyncMode::Fifo,
        }
    }
}

/// The live swapchain. Images are driver owned; views are ours and always
/// match `images` one to one.
#[derive(Debug, Default)]
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

impl Swapchain {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn is_null(&self) -> bool {
        self.handle == vk::SwapchainKHR::null() && self.views.is_empty()
    }
}

/// SDR preference list, falling back to whatever the driver lists first.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<(vk::SurfaceFormatKHR, &'static str)> {
    let first = formats.first().copied().ok_or(GpuError::NoSurfaceFormat)?;

    let find = |want: vk::Format, cs: Option<vk::ColorSpaceKHR>| {
        formats
            .iter()
            .copied()
            .find(|f| f.format == want && cs.map_or(true, |cs| f.color_space == cs))
    };

    if let Some(f) = find(vk::Format::B8G8R8A8_SRGB, Some(vk::ColorSpaceKHR::SRGB_NONLINEAR)) {
        return Ok((f, "bgra8_srgb"));
    }
    if let Some(f) = find(vk::Format::R8G8B8A8_SRGB, None) {
        return Ok((f, "rgba8_srgb"));
    }
    if let Some(f) = find(vk::Format::B8G8R8A8_UNORM, Some(vk::ColorSpaceKHR::SRGB_NONLINEAR)) {
        return Ok((f, "bgra8_unorm_srgbcs"));
    }
    Ok((first, "driver_default"))
}

/// FIFO is always supported, so it is the floor of every preference list.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], prefs: PresentPrefs) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match (prefs.vsync, prefs.mode) {
        (false, _) => &[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ],
        (true, VsyncMode::Mailbox) => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        (true, VsyncMode::Fifo) => &[vk::PresentModeKHR::FIFO],
    };
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub fn image_count_from_caps(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub fn pre_transform_from_caps(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

// log helpers
pub(crate) fn format_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        _ => "OTHER",
    }
}

pub(crate) fn present_mode_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}
