// =============================================================================
// QUAD PRESENTER - sample programs for the presentation engine
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, input, resize)                       │
// │    └── App                                                      │
// │          ├── FrameLoop (per-frame state machine)                │
// │          └── Renderer (Vulkan objects, one frame in flight)     │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (one RedrawRequested):
// 1. Rebuild the swapchain if a resize was seen
// 2. Wait for the previous frame's fence
// 3. Acquire a swapchain image (stale -> rebuild, abandon frame)
// 4. Record and submit the command buffer
// 5. Present
//
// =============================================================================

use anyhow::Result;
use ash::vk;
use clap::Parser;
use quad_presenter::{Config, FrameLoop, FrameOutcome, Renderer, Sample, SceneDesc};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

#[derive(Parser, Debug)]
#[command(version, about = "Present a small piece of geometry through Vulkan")]
struct Cli {
    /// Sample program to run
    #[arg(short, long, value_enum, default_value_t = Sample::Staging)]
    sample: Sample,

    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    // The log level comes from the config, so problems loading it are
    // reported once the logger is up
    let (config, config_error) = match Config::load_from_path(&cli.config) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    init_logging(&config);
    if let Some(e) = config_error {
        log::warn!("{:#}. Using defaults.", e);
    }

    log::info!("Starting sample '{:?}'", cli.sample);
    log::info!(
        "Window: {}x{}, present mode: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    match run(config, cli.sample) {
        Ok(()) => {
            log::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config, sample: Sample) -> Result<()> {
    let event_loop = EventLoop::new()?;
    let mut app = App::new(config, SceneDesc::for_sample(sample));
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging: level from the config file, `RUST_LOG` wins if set
fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .parse_filters(&config.debug.log_level)
        .parse_default_env()
        .init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer (and its surface) must go
/// before the window it presents to.
struct App {
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    config: Config,
    /// `None` for the window-only sample
    scene: Option<SceneDesc>,
    frame_loop: FrameLoop,

    /// Window has zero area; no frames are acquired or submitted
    is_minimized: bool,
    /// First fatal error, reported after the event loop returns
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config, scene: Option<SceneDesc>) -> Self {
        let frame_loop = FrameLoop::new(config.graphics.wait_idle_after_present);
        Self {
            renderer: None,
            window: None,
            config,
            scene,
            frame_loop,
            is_minimized: false,
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        event_loop.exit();
    }

    /// Let the GPU finish before the window goes away
    fn shutdown(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            if let Err(e) = self.frame_loop.finish(renderer) {
                log::error!("Failed to drain queue on shutdown: {:#}", e);
            }
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        if self.is_minimized {
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match self.frame_loop.render_frame(renderer) {
            Ok(FrameOutcome::Presented { .. }) | Ok(FrameOutcome::Postponed) => {}
            Ok(FrameOutcome::Abandoned(reason)) => {
                log::debug!("Frame abandoned ({:?})", reason);
            }
            Err(e) => {
                self.shutdown();
                self.fail(event_loop, e.context("Frame loop aborted"));
            }
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        if let Some(scene) = &self.scene {
            let size = window.inner_size();
            let extent = vk::Extent2D {
                width: size.width,
                height: size.height,
            };
            match Renderer::new(&self.config, window.as_ref(), extent, scene) {
                Ok(renderer) => self.renderer = Some(renderer),
                Err(e) => {
                    self.fail(event_loop, e.context("Failed to initialize Vulkan"));
                    return;
                }
            }
        } else {
            log::info!("Window-only sample, nothing will be rendered");
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    if let Some(renderer) = self.renderer.as_mut() {
                        renderer.set_window_extent(size.width, size.height);
                        self.frame_loop.request_recreate();
                    }
                }
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown();
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Keep redrawing continuously while there is something to render
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.renderer.is_none() {
            return;
        }
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
