use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use crate::renderer::core::check::VkCheck;
use crate::renderer::core::config::RenderConfig;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::surface::{RenderSurface, WindowBinding};
use crate::renderer::core::swapchain::{Swapchain, SwapchainManager, SwapchainState};
use crate::renderer::core::sync::{FrameSyncPool, MAX_FRAMES_IN_FLIGHT};
use crate::renderer::frame::{
    classify_acquire, classify_present, frame_disposition, AcquireOutcome, ContentContext,
    FrameContent, FrameOutcome,
};

/// GPU side of the lifecycle. The controller decides when each step runs; implementors only
/// carry them out.
pub trait RenderBackend {
    /// Instance, surface and device for the first window. No swapchain yet.
    fn init_device(&mut self, window: &WindowBinding) -> Result<()>;

    /// Swaps the surface for a new window. The old chain is destroyed; the device is kept.
    fn rebind_window(&mut self, window: &WindowBinding) -> Result<()>;

    /// Waits for the device to go idle, then replaces the chain with one that matches the
    /// surface as it is now
    fn recreate_swapchain(&mut self) -> Result<()>;

    fn render_frame(&mut self) -> Result<FrameOutcome>;

    fn swapchain_state(&self) -> SwapchainState;

    fn mark_swapchain_stale(&mut self);

    /// Releases everything. Safe to call when nothing was created.
    fn destroy(&mut self);
}

struct GpuState {
    instance: RenderInstance,
    surface: RenderSurface,
    device: RenderDevice,
    swapchain: SwapchainManager,
    /// Allocated after the first chain is built and kept across rebuilds
    frames: Option<FrameSyncPool>,
}

pub struct VulkanBackend<C: FrameContent> {
    config: RenderConfig,
    content: C,
    window: Option<WindowBinding>,
    gpu: Option<GpuState>,
}

impl<C: FrameContent> VulkanBackend<C> {
    pub fn new(config: RenderConfig, content: C) -> Self {
        Self {
            config,
            content,
            window: None,
            gpu: None,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn content(&self) -> &C {
        &self.content
    }

    pub fn device(&self) -> Option<&RenderDevice> {
        self.gpu.as_ref().map(|gpu| &gpu.device)
    }

    fn window_size(&self) -> (u32, u32) {
        self.window
            .as_ref()
            .and_then(WindowBinding::upgrade)
            .map(|window| window.pixel_size())
            .unwrap_or((0, 0))
    }
}

fn content_context<'a>(device: &'a RenderDevice, chain: &'a Swapchain) -> ContentContext<'a> {
    ContentContext {
        device: &device.logical,
        graphics_queue: device.graphics_queue,
        present_queue: device.present_queue,
        command_pool: device.command_pool(),
        image_count: chain.image_count(),
        format: chain.format.format,
        extent: chain.extent,
        image_views: &chain.image_views,
    }
}

impl<C: FrameContent> RenderBackend for VulkanBackend<C> {
    fn init_device(&mut self, window: &WindowBinding) -> Result<()> {
        assert!(self.gpu.is_none(), "device initialised twice");
        let live_window = window
            .upgrade()
            .unwrap_or_else(|| panic!("device initialisation requested without a live window"));

        let mut instance = RenderInstance::new(&self.config, &live_window)?;
        let mut surface = match RenderSurface::new(&instance, window) {
            Ok(surface) => surface,
            Err(err) => {
                instance.destroy();
                return Err(err);
            }
        };
        let device = match RenderDevice::new(&instance, &surface) {
            Ok(device) => device,
            Err(err) => {
                surface.destroy();
                instance.destroy();
                return Err(err);
            }
        };

        self.window = Some(window.clone());
        self.gpu = Some(GpuState {
            instance,
            surface,
            device,
            swapchain: SwapchainManager::new(),
            frames: None,
        });
        Ok(())
    }

    fn rebind_window(&mut self, window: &WindowBinding) -> Result<()> {
        let gpu = self.gpu.as_mut().ok_or_eyre("Window rebound before the device exists")?;

        gpu.device.wait_idle()?;
        if let Some(mut chain) = gpu.swapchain.take() {
            chain.destroy(&gpu.device);
        }
        gpu.surface.destroy();
        gpu.surface = RenderSurface::new(&gpu.instance, window)?;

        // The device was chosen for the first surface and has to be able to present to this one
        let present_family = gpu.device.present_queue.family;
        if !gpu.surface.supports_present(gpu.device.physical, present_family) {
            return Err(eyre!(
                "Queue family {present_family} cannot present to the new window surface"
            ));
        }

        self.window = Some(window.clone());
        log::info!("Rebound to a new window");
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        let window_size = self.window_size();
        let Self { content, gpu, .. } = self;
        let GpuState { surface, device, swapchain, frames, .. } =
            gpu.as_mut().ok_or_eyre("Swapchain requested before the device exists")?;
        let (device, surface) = (&*device, &*surface);

        device.wait_idle()?;

        // A minimised window has nothing to present into
        if window_size.0 == 0 || window_size.1 == 0 {
            if let Some(mut chain) = swapchain.take() {
                chain.destroy(device);
            }
            log::debug!("Window has zero area, swapchain left absent");
            return Ok(());
        }

        let chain = swapchain.rebuild(
            |mut old| old.destroy(device),
            || Swapchain::new(device, surface, || window_size),
        )?;

        if frames.is_none() {
            *frames = Some(FrameSyncPool::new(
                &device.logical,
                device.command_pool(),
                MAX_FRAMES_IN_FLIGHT,
            )?);
        }

        content.on_swapchain_rebuilt(&content_context(device, chain))
    }

    fn render_frame(&mut self) -> Result<FrameOutcome> {
        let Self { content, gpu, .. } = self;
        let GpuState { device, swapchain, frames, .. } =
            gpu.as_mut().ok_or_eyre("Frame requested before the device exists")?;
        let (Some(chain), Some(frames)) = (swapchain.current(), frames.as_mut()) else {
            return Ok(FrameOutcome::Skipped);
        };
        let logical = &device.logical;
        let frame = *frames.current();

        unsafe { logical.wait_for_fences(&[frame.in_flight], true, u64::MAX) }
            .check("vkWaitForFences")?;

        let acquired = classify_acquire(unsafe {
            device.swapchain_loader.acquire_next_image(
                chain.handle,
                u64::MAX,
                frame.image_available,
                vk::Fence::null(),
            )
        })?;
        let (image_index, suboptimal) = match acquired {
            AcquireOutcome::Acquired { image_index, suboptimal } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                swapchain.mark_stale();
                return Ok(FrameOutcome::Skipped);
            }
        };

        // Only reset once work is certain to be submitted, or the next wait never returns
        unsafe { logical.reset_fences(&[frame.in_flight]) }.check("vkResetFences")?;

        let cmd = frame.command_buffer;
        unsafe {
            logical.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .check("vkResetCommandBuffer")?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            logical.begin_command_buffer(cmd, &begin_info)
                .check("vkBeginCommandBuffer")?;
        }

        content.record(&content_context(device, chain), cmd, image_index)?;

        unsafe { logical.end_command_buffer(cmd) }.check("vkEndCommandBuffer")?;

        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.render_finished];
        let command_buffers = [cmd];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe { logical.queue_submit(device.graphics_queue.handle, &[submit], frame.in_flight) }
            .check("vkQueueSubmit")?;

        let swapchains = [chain.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let presented = classify_present(unsafe {
            device.swapchain_loader.queue_present(device.present_queue.handle, &present_info)
        })?;

        let disposition = frame_disposition(suboptimal, presented);
        if disposition.mark_stale {
            swapchain.mark_stale();
        }
        if disposition.advance {
            frames.advance();
        }
        Ok(disposition.outcome())
    }

    fn swapchain_state(&self) -> SwapchainState {
        self.gpu
            .as_ref()
            .map(|gpu| gpu.swapchain.state())
            .unwrap_or(SwapchainState::Absent)
    }

    fn mark_swapchain_stale(&mut self) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.swapchain.mark_stale();
        }
    }

    fn destroy(&mut self) {
        let Some(mut gpu) = self.gpu.take() else {
            return;
        };

        if let Err(err) = gpu.device.wait_idle() {
            log::error!("Device did not go idle before teardown: {err:?}");
        }

        if let Some(mut chain) = gpu.swapchain.take() {
            chain.destroy(&gpu.device);
        }
        self.content.destroy(&gpu.device.logical);
        gpu.device.destroy_command_pool();
        if let Some(mut frames) = gpu.frames.take() {
            frames.destroy(&gpu.device.logical);
        }
        gpu.device.destroy();
        gpu.instance.destroy_debug_messenger();
        gpu.surface.destroy();
        gpu.instance.destroy();

        self.window = None;
        log::info!("Renderer torn down");
    }
}

impl<C: FrameContent> Drop for VulkanBackend<C> {
    fn drop(&mut self) {
        self.destroy();
    }
}
