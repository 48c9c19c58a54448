//! vkloop - Main Entry Point
//!
//! Opens a window and drives the Vulkan frame loop until it is closed.
//!
//! Usage: `vkloop [config.toml]`. Without an argument `vkloop.toml` in the
//! working directory is used when present, otherwise built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use vkloop_core::{FrameStats, RendererConfig};
use vkloop_platform::Window;
use vkloop_renderer::{FrameStatus, Renderer};

/// Config file picked up from the working directory.
const DEFAULT_CONFIG_PATH: &str = "vkloop.toml";

struct App {
    config: RendererConfig,
    window: Option<Window>,
    renderer: Renderer,
    stats: FrameStats,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        let stats = FrameStats::new(Duration::from_secs_f64(config.stats_interval_secs));
        Self {
            renderer: Renderer::new(config.clone()),
            config,
            window: None,
            stats,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(event_loop, &self.config.window) {
            Ok(window) => window,
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        if !self.renderer.initialize(&window) {
            event_loop.exit();
            return;
        }

        info!("Initialization complete, entering main loop");
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.renderer.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                self.renderer.resize();
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => {
                match self.renderer.render_frame() {
                    Ok(FrameStatus::Presented { .. }) => {
                        if let Some(report) = self.stats.frame() {
                            info!(
                                "{:.1} fps ({:.2} ms/frame, {} frames total)",
                                report.fps(),
                                report.average_frame_ms(),
                                self.renderer.frames_presented()
                            );
                        }
                    }
                    Ok(FrameStatus::OutOfDate | FrameStatus::Skipped) => {}
                    Err(e) => {
                        error!("Render error: {}", e);
                        self.renderer.shutdown();
                        event_loop.exit();
                        return;
                    }
                }

                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.renderer.shutdown();
    }
}

/// Config path from the first argument, else `vkloop.toml` if it exists.
fn config_path(arg: Option<String>) -> Option<PathBuf> {
    match arg {
        Some(path) => Some(PathBuf::from(path)),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            default.exists().then(|| default.to_path_buf())
        }
    }
}

fn load_config() -> Result<RendererConfig> {
    match config_path(std::env::args().nth(1)) {
        Some(path) => RendererConfig::load_from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            info!("No config file, using defaults");
            Ok(RendererConfig::default())
        }
    }
}

fn main() -> Result<()> {
    vkloop_core::init_logging();
    info!("Starting vkloop");

    let config = load_config()?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
