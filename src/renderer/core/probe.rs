//! Read-only queries about what a physical device and surface can do, plus the pure selection
//! rules that run over the answers.

use std::ffi::CStr;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::core::check::VkCheck;
use crate::renderer::core::queue::QueueFamilyIndices;
use crate::renderer::core::surface::RenderSurface;

/// Surface-dependent limits of one physical device. Recomputed on every swapchain build.
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(surface: &RenderSurface, physical_device: vk::PhysicalDevice) -> Result<Self> {
        let loader = &surface.surface_loader;
        let capabilities = unsafe {
            loader.get_physical_device_surface_capabilities(physical_device, surface.surface)
        }
            .check("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        let formats = unsafe {
            loader.get_physical_device_surface_formats(physical_device, surface.surface)
        }
            .check("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        let present_modes = unsafe {
            loader.get_physical_device_surface_present_modes(physical_device, surface.surface)
        }
            .check("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Everything device selection needs to know about one candidate
#[derive(Debug, Clone)]
pub struct DeviceProbe {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub queue_families: QueueFamilyIndices,
    pub missing_extensions: Vec<String>,
    pub support: SwapchainSupport,
}

impl DeviceProbe {
    pub fn query(
        instance: &ash::Instance,
        surface: &RenderSurface,
        physical_device: vk::PhysicalDevice,
        required_extensions: &[&CStr],
    ) -> Result<Self> {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed device>".into());

        let families = unsafe {
            instance.get_physical_device_queue_family_properties(physical_device)
        };
        let queue_families = QueueFamilyIndices::find(&families, |index| {
            surface.supports_present(physical_device, index)
        });

        let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }
            .check("vkEnumerateDeviceExtensionProperties")?;
        let available = available
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .collect::<Vec<_>>();
        let missing_extensions = missing_extensions(required_extensions, &available);

        // Surface queries are only meaningful once the swapchain extension is known to exist
        let support = if missing_extensions.is_empty() {
            SwapchainSupport::query(surface, physical_device)?
        } else {
            SwapchainSupport::default()
        };

        Ok(Self {
            physical_device,
            name,
            queue_families,
            missing_extensions,
            support,
        })
    }

    pub fn is_suitable(&self) -> bool {
        self.queue_families.is_complete()
            && self.missing_extensions.is_empty()
            && self.support.is_adequate()
    }
}

pub fn missing_extensions(required: &[&CStr], available: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|req| !available.contains(*req))
        .map(|req| req.to_string_lossy().into_owned())
        .collect()
}

/// First suitable candidate in enumeration order. No scoring: a discrete GPU listed after a
/// suitable integrated one is not preferred.
pub fn select_physical_device(
    candidates: impl IntoIterator<Item = DeviceProbe>,
) -> Option<DeviceProbe> {
    candidates.into_iter().find(|candidate| {
        let suitable = candidate.is_suitable();
        if !suitable {
            log::debug!(
                "Skipping {}: queues {:?}, missing extensions {:?}, {} formats, {} present modes",
                candidate.name,
                candidate.queue_families,
                candidate.missing_extensions,
                candidate.support.formats.len(),
                candidate.support.present_modes.len(),
            );
        }
        suitable
    })
}

/// Index of the first memory type allowed by `type_bits` that has every flag in `required`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            type_bits & (1 << i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
        .ok_or_else(|| eyre!(
            "No memory type matches bits {:#b} with properties {:?}",
            type_bits,
            required
        ))
}
