use std::sync::Arc;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use refract::{Background, PipelineConfig, Renderer, WgpuBackend};

/// Interactive viewer. Keys toggle pipeline features:
/// `S` shadow, `C` shadow cache, `B` bloom, `O` SSAO, `A` antialias,
/// `P` preview grid.
struct App {
    config: PipelineConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer<WgpuBackend>>,
}

impl App {
    fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
        }
    }

    fn toggle(&mut self, key: KeyCode) {
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        let mut config = renderer.config().clone();
        match key {
            KeyCode::KeyS => config.shadow.enabled = !config.shadow.enabled,
            KeyCode::KeyC => config.shadow.enable_cache = !config.shadow.enable_cache,
            KeyCode::KeyB => config.bloom.enabled = !config.bloom.enabled,
            KeyCode::KeyO => config.ssao.enabled = !config.ssao.enabled,
            KeyCode::KeyA => config.antialias = !config.antialias,
            KeyCode::KeyP => config.preview.enabled = !config.preview.enabled,
            _ => return,
        }
        if let Err(e) = renderer.set_config(config) {
            log::error!("pipeline rebuild failed: {e}");
        }
    }
}

/// Vertical gradient used as the scene background.
fn gradient(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        let t = y as f32 / height.max(1) as f32;
        for _ in 0..width {
            data.extend_from_slice(&[
                (40.0 + 120.0 * t) as u8,
                (60.0 + 100.0 * t) as u8,
                (90.0 + 140.0 * t) as u8,
                255,
            ]);
        }
    }
    data
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let attrs = Window::default_attributes().with_title("refract viewer");
        let window = match event_loop.create_window(attrs) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };

        let renderer = WgpuBackend::new(window.clone()).and_then(|mut backend| {
            let background = backend.upload_rgba(&gradient(64, 64), 64, 64, "Background");
            let mut renderer = Renderer::new(backend, self.config.clone())?;
            renderer.scene_mut().background = Background::Texture(background);
            Ok(renderer)
        });
        match renderer {
            Ok(r) => self.renderer = Some(r),
            Err(e) => {
                log::error!("failed to start renderer: {e}");
                event_loop.exit();
                return;
            }
        }

        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(renderer) = &mut self.renderer {
                    renderer.destroy();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.resize(size.width, size.height) {
                        log::error!("resize failed: {e}");
                    }
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed && !event.repeat {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        self.toggle(key);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(renderer) = &mut self.renderer {
                    match renderer.render() {
                        Ok(Some(stats)) => log::trace!("frame: {stats:?}"),
                        Ok(None) => {}
                        Err(e) => log::warn!("frame failed: {e}"),
                    }
                }
            }
            _ => (),
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        let dirty = self.renderer.as_ref().is_some_and(|r| r.needs_frame());
        if let (true, Some(window)) = (dirty, &self.window) {
            window.request_redraw();
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|json| PipelineConfig::from_json(&json).map_err(|e| e.to_string()))
        {
            Ok(config) => config,
            Err(e) => {
                log::error!("could not load config {path}: {e}");
                std::process::exit(1);
            }
        },
        None => PipelineConfig::new().shadow(true),
    };

    let event_loop = match EventLoop::new() {
        Ok(el) => el,
        Err(e) => {
            log::error!("failed to create event loop: {e}");
            std::process::exit(1);
        }
    };
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = App::new(config);
    if let Err(e) = event_loop.run_app(&mut app) {
        log::error!("event loop error: {e}");
    }
}
