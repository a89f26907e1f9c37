// =============================================================================
// HELLO TRIANGLE - minimal Vulkan bootstrap
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (App)                                         │
// │    └── TriangleRenderer                                         │
// │          └── Instance → Surface → Device → Swapchain            │
// │                └── Pre-recorded command buffers (one per image) │
// │                      └── Frames in flight (fences, semaphores)  │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

mod backend;
mod config;
mod logging;
mod renderer;
mod triangle;

use anyhow::Result;
use config::Config;
use renderer::TriangleRenderer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    let (config, config_error) = match Config::load_from_path(CONFIG_PATH) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    logging::init_logging(&config);
    match config_error {
        Some(e) => log::warn!("{:#}. Using defaults.", e),
        None => log::debug!("Config: {:?}", config),
    }
    for warning in config.warnings() {
        log::warn!("{}", warning);
    }
    log::info!("Starting {}", config.window.title);
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.resizable { "resizable" } else { "fixed size" }
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.exit_error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// =============================================================================
// FPS TRACKING
// =============================================================================

/// Frame rate over roughly one-second windows
#[derive(Debug)]
struct FpsCounter {
    frame_count: u32,
    window_start: Instant,
    last_frame: Instant,
}

/// One FPS sample: average frames per second and the latest frame time
#[derive(Debug, Clone, Copy, PartialEq)]
struct FpsSample {
    fps: f32,
    frame_ms: f32,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self {
            frame_count: 0,
            window_start: now,
            last_frame: now,
        }
    }

    /// Count a presented frame; yields a sample once per second
    fn tick(&mut self, now: Instant) -> Option<FpsSample> {
        let frame_time = now.duration_since(self.last_frame);
        self.last_frame = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.window_start);
        if elapsed < Duration::from_secs(1) {
            return None;
        }

        let sample = FpsSample {
            fps: self.frame_count as f32 / elapsed.as_secs_f32(),
            frame_ms: frame_time.as_secs_f32() * 1000.0,
        };
        self.frame_count = 0;
        self.window_start = now;

        Some(sample)
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Window plus renderer.
///
/// The renderer is declared first so it drops (and destroys the surface)
/// before the window it was created for.
struct App {
    config: Config,
    renderer: Option<TriangleRenderer>,
    window: Option<Arc<Window>>,
    fps: FpsCounter,
    /// Fatal error that stopped the event loop, reported from `main`
    exit_error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            fps: FpsCounter::new(Instant::now()),
            exit_error: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.shutdown(event_loop);
        self.exit_error = Some(error);
    }

    /// Release GPU resources while the window still exists, then stop the loop
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(ref renderer) = self.renderer {
            if let Err(e) = renderer.wait_idle() {
                log::warn!("{:#}", e);
            }
        }
        self.renderer = None;
        event_loop.exit();
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        if let (Some(sample), Some(window)) = (self.fps.tick(Instant::now()), &self.window) {
            window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms)",
                self.config.window.title, sample.fps, sample.frame_ms
            ));
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
            ))
            .with_resizable(self.config.window.resizable);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::anyhow!("Failed to create window: {}", e));
                return;
            }
        };

        let size = window.inner_size();
        match TriangleRenderer::new(&self.config, window.as_ref(), size.width, size.height) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, e.context("Failed to initialize Vulkan"));
                return;
            }
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
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(ref mut renderer) = self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(ref mut renderer) = self.renderer else {
                    return;
                };
                match renderer.render_frame() {
                    Ok(true) => self.update_fps(),
                    Ok(false) => {}
                    Err(e) => self.fail(event_loop, e.context("Render error")),
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws while the renderer is alive.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let (Some(_), Some(window)) = (&self.renderer, &self.window) {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_silent_within_first_second() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);
        assert_eq!(fps.tick(start + Duration::from_millis(16)), None);
        assert_eq!(fps.tick(start + Duration::from_millis(500)), None);
    }

    #[test]
    fn test_fps_sample_after_one_second() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);
        for i in 1..60 {
            assert!(fps.tick(start + Duration::from_millis(i * 16)).is_none());
        }

        let sample = fps.tick(start + Duration::from_millis(1000)).unwrap();
        assert!((sample.fps - 60.0).abs() < 0.01);
        assert!((sample.frame_ms - 56.0).abs() < 0.01);
    }

    #[test]
    fn test_fps_window_restarts_after_sample() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);
        fps.tick(start + Duration::from_secs(1)).unwrap();
        assert_eq!(fps.tick(start + Duration::from_millis(1500)), None);
    }
}
