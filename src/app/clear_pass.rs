use ash::vk;
use color_eyre::Result;
use crate::renderer::core::check::VkCheck;
use crate::renderer::frame::{ContentContext, FrameContent};

/// Fills every swapchain image with a single colour
pub struct ClearPass {
    clear_color: [f32; 4],
    format: vk::Format,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
}

impl ClearPass {
    pub fn new(clear_color: [f32; 4]) -> Self {
        Self {
            clear_color,
            format: vk::Format::UNDEFINED,
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
        }
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
        let attachments = [color_attachment(format)];
        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];
        // Layout transition waits for the acquire semaphore, which is signalled at this stage
        let dependencies = [vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::empty(),
        }];

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        unsafe { device.create_render_pass(&render_pass_info, None) }.check("vkCreateRenderPass")
    }

    fn destroy_framebuffers(&mut self, device: &ash::Device) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { device.destroy_framebuffer(framebuffer, None) };
        }
    }
}

fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }
}

impl FrameContent for ClearPass {
    fn on_swapchain_rebuilt(&mut self, ctx: &ContentContext) -> Result<()> {
        let device = ctx.device;
        self.destroy_framebuffers(device);

        if self.format != ctx.format {
            if self.render_pass != vk::RenderPass::null() {
                unsafe { device.destroy_render_pass(self.render_pass, None) };
                self.render_pass = vk::RenderPass::null();
            }
            self.render_pass = Self::create_render_pass(device, ctx.format)?;
            self.format = ctx.format;
        }

        for view in ctx.image_views {
            let attachments = [*view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(ctx.extent.width)
                .height(ctx.extent.height)
                .layers(1);
            let framebuffer = unsafe { device.create_framebuffer(&framebuffer_info, None) }
                .check("vkCreateFramebuffer")?;
            self.framebuffers.push(framebuffer);
        }

        log::debug!(
            "Clear pass rebuilt for {} images at {}x{}",
            self.framebuffers.len(),
            ctx.extent.width,
            ctx.extent.height
        );
        Ok(())
    }

    fn record(&mut self, ctx: &ContentContext, cmd: vk::CommandBuffer, image_index: u32) -> Result<()> {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image_index as usize])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: ctx.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            ctx.device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
            ctx.device.cmd_end_render_pass(cmd);
        }
        Ok(())
    }

    fn destroy(&mut self, device: &ash::Device) {
        self.destroy_framebuffers(device);
        if self.render_pass != vk::RenderPass::null() {
            unsafe { device.destroy_render_pass(self.render_pass, None) };
            self.render_pass = vk::RenderPass::null();
        }
    }
}
