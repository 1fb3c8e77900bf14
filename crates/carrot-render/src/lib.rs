// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Outcome of `begin_frame`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// An image was acquired and recording is open.
    Ready,
    /// Nothing was recorded this tick (paused, or the swapchain was rebuilt).
    /// The caller simply tries again next tick.
    Skipped,
}

/// The fixed begin/render/end loop every backend drives once per tick.
pub trait Renderer {
    fn resize(&mut self, size: RenderSize) -> Result<()>;

    fn begin_frame(&mut self) -> Result<FrameStatus>;
    fn render_frame(&mut self) -> Result<()>;
    fn end_frame(&mut self) -> Result<()>;

    /// Rebuild the graphics pipeline from the shader binaries on disk.
    fn reload_pipeline(&mut self) -> Result<()>;

    /// Release every GPU object. Calling it twice is a no-op.
    fn shutdown(&mut self);

    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _on: bool) {}

    /// One full tick: begin, and when an image was acquired, render and end.
    fn render(&mut self) -> Result<FrameStatus> {
        let status = self.begin_frame()?;
        if status == FrameStatus::Ready {
            self.render_frame()?;
            self.end_frame()?;
        }
        Ok(status)
    }
}
