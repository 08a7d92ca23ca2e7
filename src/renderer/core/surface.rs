use std::sync::{Arc, Weak};
use ash::vk;
use color_eyre::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use crate::renderer::core::check::VkCheck;
use crate::renderer::core::instance::RenderInstance;

/// A platform window the renderer can present into
pub trait PresentWindow: HasDisplayHandle + HasWindowHandle {
    /// Current drawable size in physical pixels
    fn pixel_size(&self) -> (u32, u32);
}

impl PresentWindow for winit::window::Window {
    fn pixel_size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }
}

/// Non-owning reference to the window the host most recently handed over
#[derive(Clone)]
pub struct WindowBinding {
    window: Weak<dyn PresentWindow>,
}

impl WindowBinding {
    pub fn new<W: PresentWindow + 'static>(window: &Arc<W>) -> Self {
        let window: Weak<W> = Arc::downgrade(window);
        Self { window }
    }

    /// The live window, or `None` once the host has dropped it
    pub fn upgrade(&self) -> Option<Arc<dyn PresentWindow>> {
        self.window.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.window.strong_count() > 0
    }
}

/// Presentable surface wrapping the currently bound window
pub struct RenderSurface {
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
}

impl RenderSurface {
    /// The host must have bound a window; calling this without one is a sequencing bug.
    pub fn new(ins: &RenderInstance, binding: &WindowBinding) -> Result<Self> {
        let window = binding
            .upgrade()
            .unwrap_or_else(|| panic!("surface creation requested without a live window"));

        let surface = unsafe {
            ash_window::create_surface(
                &ins.entry,
                &ins.instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )
        }
            .check("vkCreateSurfaceKHR")?;
        let surface_loader = ash::khr::surface::Instance::new(&ins.entry, &ins.instance);

        log::debug!("Surface created for window of {:?} pixels", window.pixel_size());

        Ok(Self {
            surface,
            surface_loader,
        })
    }

    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family: u32) -> bool {
        unsafe {
            self.surface_loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.surface,
            )
        }
            .unwrap_or_else(|err| {
                log::warn!("Present support query failed for family {queue_family}: {err}");
                false
            })
    }

    /// Any swapchain built on this surface must already be destroyed
    pub fn destroy(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
        self.surface = vk::SurfaceKHR::null();
    }
}
