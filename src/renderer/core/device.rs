use std::ffi::{c_char, CStr};
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use smallvec::SmallVec;
use crate::renderer::core::check::VkCheck;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::probe::{self, DeviceProbe};
use crate::renderer::core::queue::{Queue, QueueFamilyIndices};
use crate::renderer::core::surface::RenderSurface;

/// The chosen GPU, its logical device and the queues rendering runs on.
///
/// Created once on the first window and kept until teardown. The graphics and present queues
/// may be the same hardware queue.
pub struct RenderDevice {
    pub physical: vk::PhysicalDevice,
    pub logical: ash::Device,

    pub graphics_queue: Queue,
    pub present_queue: Queue,
    pub queue_families: QueueFamilyIndices,

    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub required_extensions: Vec<&'static CStr>,
    pub enabled_layers: Vec<&'static CStr>,

    pub swapchain_loader: ash::khr::swapchain::Device,
    command_pool: vk::CommandPool,
}

impl RenderDevice {
    pub fn new(ins: &RenderInstance, surface: &RenderSurface) -> Result<Self> {
        let required_extensions = Self::get_required_device_extensions();

        let chosen = Self::pick_physical_device(&ins.instance, surface, &required_extensions)?;
        let (graphics_family, present_family) = chosen
            .queue_families
            .pair()
            .ok_or_eyre("Selected device lost its queue families")?;

        let logical = Self::create_logical_device(
            &ins.instance,
            chosen.physical_device,
            &chosen.queue_families,
            &required_extensions,
            &ins.enabled_layers,
        )?;

        let graphics_queue = unsafe {
            Queue::new(graphics_family, logical.get_device_queue(graphics_family, 0))
        };
        let present_queue = unsafe {
            Queue::new(present_family, logical.get_device_queue(present_family, 0))
        };

        let memory_properties = unsafe {
            ins.instance.get_physical_device_memory_properties(chosen.physical_device)
        };
        let swapchain_loader = ash::khr::swapchain::Device::new(&ins.instance, &logical);

        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_family)
            // Frame slots reset their own command buffers
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { logical.create_command_pool(&command_pool_info, None) }
            .check("vkCreateCommandPool")?;

        log::info!(
            "Using {} (graphics family {}, present family {})",
            chosen.name,
            graphics_family,
            present_family,
        );

        Ok(Self {
            physical: chosen.physical_device,
            logical,
            graphics_queue,
            present_queue,
            queue_families: chosen.queue_families,
            memory_properties,
            required_extensions,
            enabled_layers: ins.enabled_layers.clone(),
            swapchain_loader,
            command_pool,
        })
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface: &RenderSurface,
        required_extensions: &[&CStr],
    ) -> Result<DeviceProbe> {
        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .check("vkEnumeratePhysicalDevices")?;
        log::debug!("{} physical device(s) available", physical_devices.len());

        let candidates = physical_devices
            .into_iter()
            .map(|pd| DeviceProbe::query(instance, surface, pd, required_extensions))
            .collect::<Result<Vec<_>>>()?;

        probe::select_physical_device(candidates)
            .ok_or_eyre("No physical device supports graphics, presentation and the swapchain")
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: &QueueFamilyIndices,
        required_extensions: &[&'static CStr],
        enabled_layers: &[&'static CStr],
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos = queue_create_infos(queue_families, &queue_priorities);

        let enabled_extension_names = required_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();
        let enabled_layer_names = enabled_layers
            .iter()
            .map(|layer| layer.as_ptr())
            .collect::<Vec<*const c_char>>();

        let enabled_features = vk::PhysicalDeviceFeatures::default();

        // Device layers are ignored by current loaders but still set for older ones
        #[allow(deprecated)]
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_features(&enabled_features);

        unsafe { instance.create_device(physical_device, &device_create_info, None) }
            .check("vkCreateDevice")
    }

    fn get_required_device_extensions() -> Vec<&'static CStr> {
        vec![
            ash::khr::swapchain::NAME,

            #[cfg(target_os = "macos")]
            ash::khr::portability_subset::NAME,
        ]
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        probe::find_memory_type(&self.memory_properties, type_bits, required)
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.logical.device_wait_idle() }.check("vkDeviceWaitIdle")
    }

    /// Records `func` into a one-off command buffer, submits it to the graphics queue and
    /// blocks until it has executed.
    pub fn immediate_submit<F>(&self, func: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        let device = &self.logical;

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let cmd = unsafe { device.allocate_command_buffers(&command_buffer_info) }
            .check("vkAllocateCommandBuffers")?[0];
        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .check("vkCreateFence")?;

        let result = (|| {
            let cmd_begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(cmd, &cmd_begin_info) }
                .check("vkBeginCommandBuffer")?;

            func(cmd, device)?;

            unsafe { device.end_command_buffer(cmd) }.check("vkEndCommandBuffer")?;

            let cmds = [cmd];
            let submit = vk::SubmitInfo::default().command_buffers(&cmds);
            unsafe {
                device.queue_submit(self.graphics_queue.handle, &[submit], fence)
                    .check("vkQueueSubmit")?;
                device.wait_for_fences(&[fence], true, u64::MAX)
                    .check("vkWaitForFences")
            }
        })();

        unsafe {
            device.destroy_fence(fence, None);
            device.free_command_buffers(self.command_pool, &[cmd]);
        }

        result
    }

    /// Runs after the content layer released everything it allocated from the pool
    pub fn destroy_command_pool(&mut self) {
        if self.command_pool != vk::CommandPool::null() {
            unsafe {
                self.logical.destroy_command_pool(self.command_pool, None);
            }
            self.command_pool = vk::CommandPool::null();
        }
    }

    pub fn destroy(&mut self) {
        self.destroy_command_pool();
        unsafe {
            self.logical.destroy_device(None);
        }
    }
}

/// One create-info per distinct family. Requesting the same family twice is invalid.
fn queue_create_infos<'a>(
    queue_families: &QueueFamilyIndices,
    queue_priorities: &'a [f32],
) -> SmallVec<[vk::DeviceQueueCreateInfo<'a>; 2]> {
    queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(queue_priorities)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_family_requests_a_single_queue() {
        let families = QueueFamilyIndices {
            graphics: Some(2),
            present: Some(2),
        };
        let priorities = [1.0];
        let infos = queue_create_infos(&families, &priorities);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].queue_family_index, 2);
        assert_eq!(infos[0].queue_count, 1);
    }

    #[test]
    fn split_families_request_one_queue_each() {
        let families = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(3),
        };
        let priorities = [1.0];
        let infos = queue_create_infos(&families, &priorities);
        let indices = infos.iter().map(|i| i.queue_family_index).collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 3]);
    }
}
