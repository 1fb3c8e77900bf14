// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use carrot_core::{init_tracing, FrameClock};
use carrot_hot_reload::{compile_all, ShaderWatcher};
use carrot_render::{FrameStatus, RenderSize, Renderer};
use carrot_render_vk::{
    DevicePreference, PresentPrefs, RendererConfig, ShaderPaths, VkRenderer, VsyncMode,
};
use serde::Deserialize;
use tracing::{error, info, warn};

use carrot_platform::primary_window_attributes;
use carrot_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config
    #[arg(long, default_value = "carrot.toml")]
    config: PathBuf,
    /// Do not watch shader sources for changes
    #[arg(long)]
    no_hot_reload: bool,
    /// Override `render.device` from the config
    #[arg(long, value_enum)]
    device: Option<DeviceCfg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "snake_case")]
enum DeviceCfg {
    #[default]
    First,
    Discrete,
}

impl From<DeviceCfg> for DevicePreference {
    fn from(d: DeviceCfg) -> Self {
        match d {
            DeviceCfg::First => DevicePreference::FirstEnumerated,
            DeviceCfg::Discrete => DevicePreference::PreferDiscrete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum VsyncModeCfg {
    #[default]
    Fifo,
    Mailbox,
}

impl From<VsyncModeCfg> for VsyncMode {
    fn from(m: VsyncModeCfg) -> Self {
        match m {
            VsyncModeCfg::Fifo => VsyncMode::Fifo,
            VsyncModeCfg::Mailbox => VsyncMode::Mailbox,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "carrot".into(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
struct RenderCfg {
    clear_color: [f32; 4],
    vsync: bool,
    vsync_mode: VsyncModeCfg,
    device: DeviceCfg,
    frame_timeout_ms: u64,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let base = RendererConfig::default();
        RenderCfg {
            clear_color: base.clear_color,
            vsync: true,
            vsync_mode: VsyncModeCfg::Fifo,
            device: DeviceCfg::First,
            frame_timeout_ms: base.frame_timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct ShadersCfg {
    source_dir: PathBuf,
    output_dir: PathBuf,
    vertex: String,
    fragment: String,
    hot_reload: bool,
}

impl Default for ShadersCfg {
    fn default() -> Self {
        ShadersCfg {
            source_dir: "shaders".into(),
            output_dir: "shaders/bin".into(),
            vertex: "triangle.vert".into(),
            fragment: "triangle.frag".into(),
            hot_reload: true,
        }
    }
}

impl ShadersCfg {
    fn spirv_paths(&self) -> ShaderPaths {
        ShaderPaths::new(
            self.output_dir.join(format!("{}.spv", self.vertex)),
            self.output_dir.join(format!("{}.spv", self.fragment)),
        )
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct AppCfg {
    window: WindowCfg,
    render: RenderCfg,
    shaders: ShadersCfg,
}

impl AppCfg {
    fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            shaders: self.shaders.spirv_paths(),
            clear_color: self.render.clear_color,
            present: PresentPrefs {
                vsync: self.render.vsync,
                mode: self.render.vsync_mode.into(),
            },
            device: self.render.device.into(),
            frame_timeout: Duration::from_millis(self.render.frame_timeout_ms.max(1)),
        }
    }
}

fn parse_cfg(text: &str) -> Result<AppCfg> {
    Ok(toml::from_str::<AppCfg>(text)?)
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("{}: {e:#}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(e) => {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

// renderer before window: the surface must go before the window it targets
struct App {
    cfg: AppCfg,
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    watcher: Option<ShaderWatcher>,
    render_size: RenderSize,
    clock: FrameClock,
    exiting: bool,
}

impl App {
    fn shutdown(&mut self) {
        if let Some(r) = &mut self.renderer {
            r.shutdown();
        }
        self.renderer = None;
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let w = &self.cfg.window;
        let window = match event_loop
            .create_window(primary_window_attributes(&w.title, w.width, w.height))
        {
            Ok(win) => win,
            Err(e) => {
                error!("create_window failed: {e}");
                event_loop.exit();
                return;
            }
        };

        let size = window.inner_size();
        self.render_size = RenderSize {
            width: size.width,
            height: size.height,
        };

        match VkRenderer::new(&window, &window, self.render_size, self.cfg.renderer_config()) {
            Ok(r) => {
                info!(
                    "renderer up: {}x{}, vsync={}",
                    self.render_size.width, self.render_size.height, self.cfg.render.vsync
                );
                self.renderer = Some(r);
            }
            Err(e) => {
                error!("vk init failed: {e:#}");
                event_loop.exit();
                return;
            }
        }

        event_loop.set_control_flow(if self.cfg.render.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                info!(
                    "Resized → {}x{}",
                    self.render_size.width, self.render_size.height
                );
                if let Some(r) = &mut self.renderer {
                    if let Err(e) = r.resize(self.render_size) {
                        error!("resize failed: {e:#}");
                    }
                }
                if self.render_size.is_zero_area() {
                    self.clock.reset_window();
                } else if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                if let Some(r) = &mut self.renderer {
                    match r.render() {
                        Ok(FrameStatus::Ready) => {
                            if let Some(fps) = self.clock.tick() {
                                info!("fps ~ {fps}");
                            }
                        }
                        Ok(FrameStatus::Skipped) => {}
                        Err(e) => error!("render error: {e:#}"),
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if let (Some(watcher), Some(r)) = (&self.watcher, &mut self.renderer) {
            if let Some(req) = watcher.poll() {
                info!("shaders changed: {:?}", req.shaders);
                if let Err(e) = r.reload_pipeline() {
                    error!("pipeline reload failed, keeping the old one: {e:#}");
                }
            }
        }

        if self.render_size.is_zero_area() {
            return;
        }

        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

fn start_watcher(cfg: &ShadersCfg) -> Option<ShaderWatcher> {
    match ShaderWatcher::new(&cfg.source_dir, &cfg.output_dir) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!("hot reload disabled: {e:#}");
            None
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    if let Some(device) = args.device {
        cfg.render.device = device;
    }

    if let Err(e) = compile_all(&cfg.shaders.source_dir, &cfg.shaders.output_dir) {
        warn!("startup shader compile failed, using binaries on disk: {e:#}");
    }
    let watcher = if cfg.shaders.hot_reload && !args.no_hot_reload {
        start_watcher(&cfg.shaders)
    } else {
        None
    };

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        cfg,
        window: None,
        renderer: None,
        watcher,
        render_size: RenderSize {
            width: 1,
            height: 1,
        },
        clock: FrameClock::new(),
        exiting: false,
    };

    event_loop.run_app(&mut app)?;
    app.shutdown();
    Ok(())
}
