pub mod clear_pass;
pub mod config;
pub mod logging;

use color_eyre::Result;
use std::sync::Arc;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};
use crate::app::clear_pass::ClearPass;
use crate::app::config::AppConfig;
use crate::renderer::{LifecycleController, VulkanBackend, WindowBinding};

type Lifecycle = LifecycleController<VulkanBackend<ClearPass>>;

/// Spin only while there is a chain to present into. A minimised or lost window waits for
/// the next event.
fn control_flow(can_render: bool, idle: bool) -> ControlFlow {
    if can_render && !idle {
        ControlFlow::Poll
    } else {
        ControlFlow::Wait
    }
}

/// Host glue between winit's event loop and the renderer lifecycle
pub struct App {
    config: AppConfig,
    // Declared before the window so teardown runs while the window still exists
    lifecycle: Lifecycle,
    window: Option<Arc<Window>>,

    // State
    close_requested: bool,
    fatal: Option<color_eyre::Report>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        let content = ClearPass::new(config.render.clear_color);
        let backend = VulkanBackend::new(config.render.clone(), content);

        Self {
            config,
            lifecycle: LifecycleController::new(backend),
            window: None,

            close_requested: false,
            fatal: None,
        }
    }

    /// Runs until the window closes. A renderer failure ends the loop and is returned here.
    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run_app(&mut self)?;

        match self.fatal.take() {
            Some(report) => Err(report),
            None => Ok(()),
        }
    }

    fn handle(&mut self, event_loop: &ActiveEventLoop, result: Result<()>) {
        if let Err(report) = result {
            log::error!("Renderer failed: {report:?}");
            self.fatal = Some(report);
            event_loop.exit();
        }
    }

    fn create_window(&self, event_loop: &ActiveEventLoop) -> Result<Arc<Window>> {
        let (width, height) = self.config.window_size;
        let attributes = Window::default_attributes()
            .with_title(self.config.window_title.clone())
            .with_inner_size(PhysicalSize::new(width, height));
        Ok(Arc::new(event_loop.create_window(attributes)?))
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.fatal.is_some() {
            return;
        }

        let window = match &self.window {
            Some(window) => window.clone(),
            None => match self.create_window(event_loop) {
                Ok(window) => {
                    self.window = Some(window.clone());
                    window
                }
                Err(report) => return self.handle(event_loop, Err(report)),
            },
        };

        let result = self.lifecycle.on_window_available(WindowBinding::new(&window));
        self.handle(event_loop, result);
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().map(|window| window.id()) != Some(window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                self.lifecycle.request_resize();
            }
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: Key::Named(NamedKey::Escape),
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
            return;
        }

        if self.fatal.is_none() && self.lifecycle.can_render() {
            let result = self.lifecycle.poll_and_render_once().map(|_| ());
            self.handle(event_loop, result);
        }

        event_loop.set_control_flow(control_flow(
            self.lifecycle.can_render(),
            self.lifecycle.is_idle(),
        ));
    }

    fn suspended(&mut self, event_loop: &ActiveEventLoop) {
        self.lifecycle.on_window_lost();
        self.window = None;
        event_loop.set_control_flow(ControlFlow::Wait);
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.lifecycle.on_app_terminate();
    }
}
