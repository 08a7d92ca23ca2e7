use ash::vk;
use color_eyre::Result;
use crate::renderer::core::check::VkCheck;

/// Frames the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Synchronization objects and command buffer for one in-flight slot
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub command_buffer: vk::CommandBuffer,
}

/// Fixed pool of frame slots. Independent of the swapchain, so it survives every rebuild.
pub struct FrameSyncPool {
    frames: Vec<FrameSync>,
    cursor: FrameCursor,
}

impl FrameSyncPool {
    pub fn new(device: &ash::Device, command_pool: vk::CommandPool, depth: usize) -> Result<Self> {
        assert!(depth > 0, "frame pool needs at least one slot");

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(depth as u32)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffers = unsafe { device.allocate_command_buffers(&command_buffer_info) }
            .check("vkAllocateCommandBuffers")?;

        let mut pool = Self {
            frames: Vec::with_capacity(depth),
            cursor: FrameCursor::new(depth),
        };

        for command_buffer in &command_buffers {
            match Self::create_frame(device, *command_buffer) {
                Ok(frame) => pool.frames.push(frame),
                Err(err) => {
                    pool.destroy(device);
                    unsafe { device.free_command_buffers(command_pool, &command_buffers) };
                    return Err(err);
                }
            }
        }

        log::debug!("Allocated {depth} frame slots");
        Ok(pool)
    }

    fn create_frame(device: &ash::Device, command_buffer: vk::CommandBuffer) -> Result<FrameSync> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        unsafe {
            let image_available = device.create_semaphore(&semaphore_info, None)
                .check("vkCreateSemaphore")?;
            let render_finished = device.create_semaphore(&semaphore_info, None)
                .check("vkCreateSemaphore")?;
            let in_flight = device.create_fence(&fence_create_info(), None)
                .check("vkCreateFence")?;
            Ok(FrameSync {
                image_available,
                render_finished,
                in_flight,
                command_buffer,
            })
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current_index(&self) -> usize {
        self.cursor.current()
    }

    pub fn current(&self) -> &FrameSync {
        &self.frames[self.cursor.current()]
    }

    /// Only called once a frame has reached presentation
    pub fn advance(&mut self) {
        self.cursor.advance();
    }

    /// The device must be idle. Command buffers are released together with their pool.
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for frame in self.frames.drain(..) {
                device.destroy_semaphore(frame.image_available, None);
                device.destroy_semaphore(frame.render_finished, None);
                device.destroy_fence(frame.in_flight, None);
            }
        }
    }
}

/// Fences start signaled so the first wait on each slot returns immediately
pub fn fence_create_info() -> vk::FenceCreateInfo<'static> {
    vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED)
}

/// Index of the slot the next frame uses, cycling through `0..depth`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor {
    current: usize,
    depth: usize,
}

impl FrameCursor {
    pub fn new(depth: usize) -> Self {
        Self { current: 0, depth }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.depth;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_cycles_through_every_slot() {
        let mut cursor = FrameCursor::new(MAX_FRAMES_IN_FLIGHT);
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(cursor.current());
            cursor.advance();
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn cursor_of_depth_three() {
        let mut cursor = FrameCursor::new(3);
        cursor.advance();
        cursor.advance();
        assert_eq!(cursor.current(), 2);
        cursor.advance();
        assert_eq!(cursor.current(), 0);
    }

    #[test]
    fn fences_are_created_signaled() {
        assert!(fence_create_info().flags.contains(vk::FenceCreateFlags::SIGNALED));
    }
}
