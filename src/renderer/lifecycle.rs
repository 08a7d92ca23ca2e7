//! Top-level state machine driven by the host's window and application events.

use color_eyre::Result;
use crate::renderer::backend::RenderBackend;
use crate::renderer::core::surface::WindowBinding;
use crate::renderer::core::swapchain::SwapchainState;
use crate::renderer::frame::FrameOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing created yet
    Uninitialized,
    /// Device exists but no chain is presentable
    DeviceReady,
    Rendering,
    /// Window gone. GPU objects are kept for the next window.
    Suspended,
    Terminated,
}

pub struct LifecycleController<B: RenderBackend> {
    backend: B,
    state: LifecycleState,
}

impl<B: RenderBackend> LifecycleController<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: LifecycleState::Uninitialized,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn can_render(&self) -> bool {
        self.state == LifecycleState::Rendering
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn swapchain_state(&self) -> SwapchainState {
        self.backend.swapchain_state()
    }

    /// Rendering is permitted but the window has no area to present into
    pub fn is_idle(&self) -> bool {
        self.can_render() && self.backend.swapchain_state() == SwapchainState::Absent
    }

    /// First call creates the device; later calls only rebind the surface and rebuild the chain
    pub fn on_window_available(&mut self, window: WindowBinding) -> Result<()> {
        match self.state {
            LifecycleState::Uninitialized => {
                log::info!("Window available, initialising renderer");
                self.backend.init_device(&window)?;
                self.set_state(LifecycleState::DeviceReady);
            }
            LifecycleState::DeviceReady | LifecycleState::Suspended | LifecycleState::Rendering => {
                log::info!("Window available, rebinding surface");
                self.backend.rebind_window(&window)?;
                self.set_state(LifecycleState::DeviceReady);
            }
            LifecycleState::Terminated => {
                log::warn!("Window offered after teardown, ignoring");
                return Ok(());
            }
        }

        self.backend.recreate_swapchain()?;
        self.set_state(LifecycleState::Rendering);
        Ok(())
    }

    /// Stops rendering. No GPU object is destroyed.
    pub fn on_window_lost(&mut self) {
        if self.state == LifecycleState::Rendering {
            self.set_state(LifecycleState::Suspended);
        } else {
            log::debug!("Window lost while {:?}, nothing to suspend", self.state);
        }
    }

    pub fn on_app_terminate(&mut self) {
        if self.state == LifecycleState::Terminated {
            return;
        }
        self.backend.destroy();
        self.set_state(LifecycleState::Terminated);
    }

    /// Host sequencing bugs: polling before the first window or after teardown
    pub fn poll_and_render_once(&mut self) -> Result<FrameOutcome> {
        assert!(
            !matches!(self.state, LifecycleState::Uninitialized | LifecycleState::Terminated),
            "render polled while {:?}",
            self.state
        );
        if self.state != LifecycleState::Rendering {
            return Ok(FrameOutcome::Skipped);
        }

        if self.backend.swapchain_state() != SwapchainState::Ready {
            self.backend.recreate_swapchain()?;
            if self.backend.swapchain_state() != SwapchainState::Ready {
                return Ok(FrameOutcome::Skipped);
            }
        }

        self.backend.render_frame()
    }

    /// Resize or rotation notice from the host. The chain is rebuilt on the next poll.
    pub fn request_resize(&mut self) {
        self.backend.mark_swapchain_stale();
    }

    fn set_state(&mut self, state: LifecycleState) {
        if self.state != state {
            log::info!("Lifecycle {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}

impl<B: RenderBackend> Drop for LifecycleController<B> {
    fn drop(&mut self) {
        self.on_app_terminate();
    }
}
