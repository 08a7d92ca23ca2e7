use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::core::check::VkCheck;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::probe::SwapchainSupport;
use crate::renderer::core::queue::QueueFamilyIndices;
use crate::renderer::core::surface::RenderSurface;

pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Preferred BGRA sRGB pair when offered, otherwise whatever the surface lists first.
/// `None` only for an empty list, which device selection already rules out.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|format| {
            format.format == PREFERRED_SURFACE_FORMAT.format
                && format.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first())
        .copied()
}

/// FIFO is the only mode every implementation must support, and it never tears
pub fn choose_present_mode(_available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    vk::PresentModeKHR::FIFO
}

/// One more than the minimum, clamped to the maximum. A maximum of zero means unbounded.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let requested = capabilities.min_image_count + 1;
    let max = capabilities.max_image_count;
    if max > 0 && requested > max {
        max
    } else {
        requested
    }
}

pub fn is_rotated(transform: vk::SurfaceTransformFlagsKHR) -> bool {
    transform.intersects(
        vk::SurfaceTransformFlagsKHR::ROTATE_90
            | vk::SurfaceTransformFlagsKHR::ROTATE_270
            | vk::SurfaceTransformFlagsKHR::HORIZONTAL_MIRROR_ROTATE_90
            | vk::SurfaceTransformFlagsKHR::HORIZONTAL_MIRROR_ROTATE_270,
    )
}

/// Extent of the chain in the display's native orientation.
///
/// A quarter-turn transform swaps the reported width and height; the pre-transform then rotates
/// the images on presentation. When the surface leaves the extent up to the swapchain
/// (`u32::MAX`), the window size clamped to the surface limits is used instead.
pub fn display_identity_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_size: impl FnOnce() -> (u32, u32),
) -> vk::Extent2D {
    let current = capabilities.current_extent;
    if current.width == u32::MAX {
        let (width, height) = window_size();
        let min = capabilities.min_image_extent;
        let max = capabilities.max_image_extent;
        return vk::Extent2D {
            width: width.clamp(min.width, max.width.max(min.width)),
            height: height.clamp(min.height, max.height.max(min.height)),
        };
    }

    if is_rotated(capabilities.current_transform) {
        vk::Extent2D {
            width: current.height,
            height: current.width,
        }
    } else {
        current
    }
}

/// Exclusive ownership when one family does both jobs, otherwise shared by both families
pub fn choose_sharing_mode(queue_families: &QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    match queue_families.pair() {
        Some((graphics, present)) if graphics != present => {
            (vk::SharingMode::CONCURRENT, vec![graphics, present])
        }
        _ => (vk::SharingMode::EXCLUSIVE, Vec::new()),
    }
}

pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
        .into_iter()
        .find(|mode| supported.contains(*mode))
        // Surfaces that report nothing still accept INHERIT on most drivers
        .unwrap_or(vk::CompositeAlphaFlagsKHR::INHERIT)
}

/// Presentable image chain. Never mutated after creation; rebuilding replaces it whole.
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    /// Extent as the surface reported it, before undoing the rotation
    pub surface_extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl Swapchain {
    pub fn new(
        device: &RenderDevice,
        surface: &RenderSurface,
        window_size: impl FnOnce() -> (u32, u32),
    ) -> Result<Self> {
        let support = SwapchainSupport::query(surface, device.physical)?;
        let capabilities = &support.capabilities;

        let format = choose_surface_format(&support.formats)
            .ok_or_eyre("Surface reports no formats")?;
        let present_mode = choose_present_mode(&support.present_modes);
        let image_count = choose_image_count(capabilities);
        let extent = display_identity_extent(capabilities, window_size);
        let pre_transform = capabilities.current_transform;
        let composite_alpha = choose_composite_alpha(capabilities.supported_composite_alpha);
        let (sharing_mode, queue_family_indices) = choose_sharing_mode(&device.queue_families);

        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(pre_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let handle = unsafe { device.swapchain_loader.create_swapchain(&swapchain_info, None) }
            .check("vkCreateSwapchainKHR")?;

        let images = match unsafe { device.swapchain_loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(err) => {
                unsafe { device.swapchain_loader.destroy_swapchain(handle, None) };
                return Err(err).check("vkGetSwapchainImagesKHR");
            }
        };

        let mut swapchain = Self {
            handle,
            images,
            image_views: Vec::new(),
            format,
            extent,
            surface_extent: capabilities.current_extent,
            pre_transform,
        };
        if let Err(err) = swapchain.create_image_views(&device.logical) {
            swapchain.destroy(device);
            return Err(err);
        }

        log::info!(
            "Swapchain ready: {} images, {:?}/{:?}, {}x{}, transform {:?}",
            swapchain.images.len(),
            format.format,
            format.color_space,
            extent.width,
            extent.height,
            pre_transform,
        );

        Ok(swapchain)
    }

    fn create_image_views(&mut self, device: &ash::Device) -> Result<()> {
        for image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image(*image);
            let view = unsafe { device.create_image_view(&view_info, None) }
                .check("vkCreateImageView")?;
            self.image_views.push(view);
        }
        Ok(())
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Views go first; the images belong to the chain and disappear with it
    pub fn destroy(&mut self, device: &RenderDevice) {
        unsafe {
            for view in self.image_views.drain(..) {
                device.logical.destroy_image_view(view, None);
            }
            device.swapchain_loader.destroy_swapchain(self.handle, None);
        }
        self.images.clear();
        self.handle = vk::SwapchainKHR::null();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Absent,
    Ready,
    Stale,
}

/// Holds at most one chain and tracks whether it still matches the surface
pub struct SwapchainManager<S = Swapchain> {
    chain: Option<S>,
    stale: bool,
}

impl<S> Default for SwapchainManager<S> {
    fn default() -> Self {
        Self {
            chain: None,
            stale: false,
        }
    }
}

impl<S> SwapchainManager<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SwapchainState {
        match (&self.chain, self.stale) {
            (None, _) => SwapchainState::Absent,
            (Some(_), true) => SwapchainState::Stale,
            (Some(_), false) => SwapchainState::Ready,
        }
    }

    pub fn current(&self) -> Option<&S> {
        self.chain.as_ref()
    }

    /// No effect without a chain; an absent chain is rebuilt regardless
    pub fn mark_stale(&mut self) {
        if self.chain.is_some() && !self.stale {
            log::debug!("Swapchain marked stale");
            self.stale = true;
        }
    }

    /// Removes the chain so the caller can destroy it
    pub fn take(&mut self) -> Option<S> {
        self.stale = false;
        self.chain.take()
    }

    /// Destroys the current chain, if any, before creating the next one. A failed create
    /// leaves the manager ABSENT.
    pub fn rebuild(
        &mut self,
        destroy: impl FnOnce(S),
        create: impl FnOnce() -> Result<S>,
    ) -> Result<&S> {
        if let Some(old) = self.take() {
            destroy(old);
        }
        Ok(&*self.chain.insert(create()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    #[test]
    fn preferred_format_wins_over_earlier_entries() {
        let formats = [format(vk::Format::R8G8B8A8_SRGB), format(vk::Format::B8G8R8A8_SRGB)];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_SRGB)
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [format(vk::Format::R8G8B8A8_SRGB), format(vk::Format::R8G8B8A8_UNORM)];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_SRGB)
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn preferred_format_needs_matching_color_space() {
        let wrong_space = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        };
        let formats = [format(vk::Format::R8G8B8A8_UNORM), wrong_space];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
    }

    #[test]
    fn present_mode_is_always_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn image_count_clamps_to_nonzero_max() {
        assert_eq!(choose_image_count(&caps(2, 2)), 2);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 0)), 4);
    }

    fn rotated_caps(transform: vk::SurfaceTransformFlagsKHR) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 1080, height: 2340 },
            current_transform: transform,
            ..Default::default()
        }
    }

    #[test]
    fn quarter_turns_swap_the_extent() {
        use vk::SurfaceTransformFlagsKHR as T;
        let no_window = || -> (u32, u32) { panic!("window size queried for a defined extent") };
        for transform in [T::ROTATE_90, T::ROTATE_270, T::HORIZONTAL_MIRROR_ROTATE_90] {
            let extent = display_identity_extent(&rotated_caps(transform), no_window);
            assert_eq!((extent.width, extent.height), (2340, 1080), "{transform:?}");
        }
        for transform in [T::IDENTITY, T::ROTATE_180] {
            let extent = display_identity_extent(&rotated_caps(transform), no_window);
            assert_eq!((extent.width, extent.height), (1080, 2340), "{transform:?}");
        }
    }

    #[test]
    fn undefined_extent_uses_clamped_window_size() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D { width: 4096, height: 2048 },
            ..Default::default()
        };
        let extent = display_identity_extent(&caps, || (8000, 600));
        assert_eq!((extent.width, extent.height), (4096, 600));
        let extent = display_identity_extent(&caps, || (0, 0));
        assert_eq!((extent.width, extent.height), (16, 16));
    }

    #[test]
    fn sharing_mode_follows_queue_families() {
        let shared = QueueFamilyIndices { graphics: Some(1), present: Some(1) };
        assert_eq!(choose_sharing_mode(&shared), (vk::SharingMode::EXCLUSIVE, vec![]));

        let split = QueueFamilyIndices { graphics: Some(0), present: Some(2) };
        assert_eq!(choose_sharing_mode(&split), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }

    #[test]
    fn composite_alpha_prefers_inherit_then_opaque() {
        use vk::CompositeAlphaFlagsKHR as A;
        assert_eq!(choose_composite_alpha(A::INHERIT | A::OPAQUE), A::INHERIT);
        assert_eq!(choose_composite_alpha(A::OPAQUE | A::PRE_MULTIPLIED), A::OPAQUE);
        assert_eq!(choose_composite_alpha(A::POST_MULTIPLIED), A::POST_MULTIPLIED);
    }

    #[test]
    fn manager_walks_absent_ready_stale() {
        let mut manager = SwapchainManager::<u32>::new();
        assert_eq!(manager.state(), SwapchainState::Absent);
        manager.mark_stale();
        assert_eq!(manager.state(), SwapchainState::Absent);

        manager.rebuild(|_| unreachable!(), || Ok(1)).unwrap();
        assert_eq!(manager.state(), SwapchainState::Ready);
        manager.mark_stale();
        assert_eq!(manager.state(), SwapchainState::Stale);

        manager.rebuild(|_| {}, || Ok(2)).unwrap();
        assert_eq!(manager.state(), SwapchainState::Ready);
        assert_eq!(manager.current(), Some(&2));
    }

    #[test]
    fn back_to_back_rebuilds_destroy_each_chain_once() {
        let destroyed = RefCell::new(Vec::new());
        let mut manager = SwapchainManager::<u32>::new();
        manager.rebuild(|old| destroyed.borrow_mut().push(old), || Ok(1)).unwrap();
        manager.rebuild(|old| destroyed.borrow_mut().push(old), || Ok(2)).unwrap();
        manager.rebuild(|old| destroyed.borrow_mut().push(old), || Ok(3)).unwrap();

        assert_eq!(*destroyed.borrow(), vec![1, 2]);
        assert_eq!(manager.state(), SwapchainState::Ready);
        assert_eq!(manager.current(), Some(&3));
    }

    #[test]
    fn failed_rebuild_leaves_no_chain() {
        let mut manager = SwapchainManager::<u32>::new();
        manager.rebuild(|_| {}, || Ok(1)).unwrap();
        let result = manager.rebuild(|_| {}, || Err(color_eyre::eyre::eyre!("surface lost")));
        assert!(result.is_err());
        assert_eq!(manager.state(), SwapchainState::Absent);
    }
}
