//! One-shot upload of raw pixel data into a sampled, device-local image.
//!
//! Callers pass pixels mip by mip, each mip holding every layer back to back and each layer
//! tightly packed. Cube faces are layers in +X, -X, +Y, -Y, +Z, -Z order. The staging buffer
//! keeps that order but starts every mip on a legal copy offset.

use std::ptr::NonNull;
use ash::vk;
use color_eyre::eyre::{bail, ensure, eyre, OptionExt};
use color_eyre::Result;
use crate::renderer::core::check::VkCheck;
use crate::renderer::core::device::RenderDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    Dim2,
    Array { layers: u32 },
    Cube,
}

impl TextureKind {
    pub fn layers(self) -> u32 {
        match self {
            Self::Dim2 => 1,
            Self::Array { layers } => layers,
            Self::Cube => 6,
        }
    }

    pub fn view_type(self) -> vk::ImageViewType {
        match self {
            Self::Dim2 => vk::ImageViewType::TYPE_2D,
            Self::Array { .. } => vk::ImageViewType::TYPE_2D_ARRAY,
            Self::Cube => vk::ImageViewType::CUBE,
        }
    }

    fn create_flags(self) -> vk::ImageCreateFlags {
        match self {
            Self::Cube => vk::ImageCreateFlags::CUBE_COMPATIBLE,
            _ => vk::ImageCreateFlags::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
}

impl TextureDesc {
    pub fn new_2d(format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            kind: TextureKind::Dim2,
            format,
            width,
            height,
            mip_levels: 1,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.width > 0 && self.height > 0, "Texture has zero area");
        ensure!(self.kind.layers() > 0, "Texture array has no layers");
        ensure!(
            (1..=max_mip_levels(self.width, self.height)).contains(&self.mip_levels),
            "{} mip levels requested for a {}x{} texture",
            self.mip_levels,
            self.width,
            self.height
        );
        if self.kind == TextureKind::Cube {
            ensure!(self.width == self.height, "Cube faces must be square");
        }
        bytes_per_texel(self.format)?;
        Ok(())
    }
}

/// Length of the full mip chain down to 1x1
pub fn max_mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Uncompressed formats only; block-compressed data needs a decoder first
pub fn bytes_per_texel(format: vk::Format) -> Result<u64> {
    let size = match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => 1,
        vk::Format::R8G8_UNORM | vk::Format::R16_SFLOAT => 2,
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT => 4,
        vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        other => bail!("Unsupported texture format {other:?}"),
    };
    Ok(size)
}

/// Where each mip lives in the caller's pixels and in the staging buffer
#[derive(Debug, Clone)]
pub struct StagingLayout {
    /// One copy per mip level covering every layer
    pub regions: Vec<vk::BufferImageCopy>,
    /// Tightly packed byte length of each mip, every layer included
    pub mip_sizes: Vec<u64>,
    /// Staging buffer size including the padding between mips
    pub staging_size: u64,
}

impl StagingLayout {
    /// Bytes the caller has to supply
    pub fn packed_size(&self) -> u64 {
        self.mip_sizes.iter().sum()
    }
}

/// Buffer offsets of a copy must be multiples of both 4 and the texel size
pub fn copy_alignment(texel: u64) -> u64 {
    let (mut a, mut b) = (4, texel.max(1));
    while b != 0 {
        (a, b) = (b, a % b);
    }
    4 * texel.max(1) / a
}

pub fn staging_layout(desc: &TextureDesc) -> Result<StagingLayout> {
    desc.validate()?;
    let texel = bytes_per_texel(desc.format)?;
    let alignment = copy_alignment(texel);
    let layers = desc.kind.layers();

    let mut regions = Vec::with_capacity(desc.mip_levels as usize);
    let mut mip_sizes = Vec::with_capacity(desc.mip_levels as usize);
    let mut offset: u64 = 0;
    for level in 0..desc.mip_levels {
        let width = (desc.width >> level).max(1);
        let height = (desc.height >> level).max(1);
        offset = offset.next_multiple_of(alignment);

        regions.push(vk::BufferImageCopy {
            buffer_offset: offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level,
                base_array_layer: 0,
                layer_count: layers,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
        });

        let size = u64::from(width) * u64::from(height) * texel * u64::from(layers);
        mip_sizes.push(size);
        offset += size;
    }

    Ok(StagingLayout {
        regions,
        mip_sizes,
        staging_size: offset,
    })
}

/// Device-local sampled image with its view and sampler
pub struct Texture {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub desc: TextureDesc,
}

impl Texture {
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_sampler(self.sampler, None);
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
        self.sampler = vk::Sampler::null();
        self.view = vk::ImageView::null();
        self.image = vk::Image::null();
        self.memory = vk::DeviceMemory::null();
    }
}

/// Copies `pixels` into a new image and leaves it in `SHADER_READ_ONLY_OPTIMAL`.
/// Blocks until the transfer has finished on the graphics queue.
pub fn upload_texture(device: &RenderDevice, desc: &TextureDesc, pixels: &[u8]) -> Result<Texture> {
    let layout = staging_layout(desc)?;
    ensure!(
        pixels.len() as u64 == layout.packed_size(),
        "Texture expects {} bytes of pixel data, got {}",
        layout.packed_size(),
        pixels.len()
    );

    let mut staging = StagingBuffer::new(device, &layout, pixels)?;
    let mut texture = Texture {
        image: vk::Image::null(),
        memory: vk::DeviceMemory::null(),
        view: vk::ImageView::null(),
        sampler: vk::Sampler::null(),
        desc: *desc,
    };

    let result = (|| {
        create_image(device, &mut texture)?;
        device.immediate_submit(|cmd, logical| {
            record_upload(logical, cmd, staging.buffer, &texture, &layout.regions);
            Ok(())
        })?;
        create_view_and_sampler(&device.logical, &mut texture)
    })();
    staging.destroy(&device.logical);

    if let Err(err) = result {
        texture.destroy(&device.logical);
        return Err(err);
    }

    log::debug!(
        "Uploaded {:?} texture {}x{} ({} mips, {} bytes)",
        desc.kind,
        desc.width,
        desc.height,
        desc.mip_levels,
        layout.staging_size
    );
    Ok(texture)
}

fn full_range(desc: &TextureDesc) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: desc.mip_levels,
        base_array_layer: 0,
        layer_count: desc.kind.layers(),
    }
}

fn create_image(device: &RenderDevice, texture: &mut Texture) -> Result<()> {
    let desc = texture.desc;
    let logical = &device.logical;

    let image_info = vk::ImageCreateInfo::default()
        .flags(desc.kind.create_flags())
        .image_type(vk::ImageType::TYPE_2D)
        .format(desc.format)
        .extent(vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: 1,
        })
        .mip_levels(desc.mip_levels)
        .array_layers(desc.kind.layers())
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);
    texture.image = unsafe { logical.create_image(&image_info, None) }
        .check("vkCreateImage")?;

    let reqs = unsafe { logical.get_image_memory_requirements(texture.image) };
    let memory_type_index =
        device.find_memory_type(reqs.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(reqs.size)
        .memory_type_index(memory_type_index);
    texture.memory = unsafe { logical.allocate_memory(&alloc_info, None) }
        .check("vkAllocateMemory")?;
    unsafe { logical.bind_image_memory(texture.image, texture.memory, 0) }
        .check("vkBindImageMemory")
}

fn record_upload(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    staging: vk::Buffer,
    texture: &Texture,
    regions: &[vk::BufferImageCopy],
) {
    let range = full_range(&texture.desc);

    let to_transfer = vk::ImageMemoryBarrier::default()
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(texture.image)
        .subresource_range(range);

    let to_shader_read = to_transfer
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::HOST,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[to_transfer],
        );
        device.cmd_copy_buffer_to_image(
            cmd,
            staging,
            texture.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            regions,
        );
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[to_shader_read],
        );
    }
}

fn create_view_and_sampler(device: &ash::Device, texture: &mut Texture) -> Result<()> {
    let desc = texture.desc;

    let view_info = vk::ImageViewCreateInfo::default()
        .image(texture.image)
        .view_type(desc.kind.view_type())
        .format(desc.format)
        .subresource_range(full_range(&desc));
    texture.view = unsafe { device.create_image_view(&view_info, None) }
        .check("vkCreateImageView")?;

    let sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .min_lod(0.0)
        .max_lod(desc.mip_levels as f32)
        .anisotropy_enable(false)
        .compare_op(vk::CompareOp::NEVER)
        .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);
    texture.sampler = unsafe { device.create_sampler(&sampler_info, None) }
        .check("vkCreateSampler")?;
    Ok(())
}

/// Host-visible buffer the pixels are copied through
struct StagingBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
}

impl StagingBuffer {
    fn new(device: &RenderDevice, layout: &StagingLayout, pixels: &[u8]) -> Result<Self> {
        let logical = &device.logical;
        let mut staging = Self {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
        };

        let result = (|| {
            let buffer_info = vk::BufferCreateInfo::default()
                .size(layout.staging_size)
                .usage(vk::BufferUsageFlags::TRANSFER_SRC)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            staging.buffer = unsafe { logical.create_buffer(&buffer_info, None) }
                .check("vkCreateBuffer")?;

            let reqs = unsafe { logical.get_buffer_memory_requirements(staging.buffer) };
            let memory_type_index = device.find_memory_type(
                reqs.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            let alloc_info = vk::MemoryAllocateInfo::default()
                .allocation_size(reqs.size)
                .memory_type_index(memory_type_index);
            staging.memory = unsafe { logical.allocate_memory(&alloc_info, None) }
                .check("vkAllocateMemory")?;
            unsafe { logical.bind_buffer_memory(staging.buffer, staging.memory, 0) }
                .check("vkBindBufferMemory")?;

            staging.write(logical, layout, pixels, reqs.size)
        })();

        match result {
            Ok(()) => Ok(staging),
            Err(err) => {
                staging.destroy(logical);
                Err(err)
            }
        }
    }

    /// Copies each tightly packed mip to its aligned offset
    fn write(&self, device: &ash::Device, layout: &StagingLayout, pixels: &[u8], size: u64) -> Result<()> {
        let ptr = unsafe {
            device.map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        }
            .check("vkMapMemory")?;
        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or_eyre("Mapped staging pointer is null")?;

        // The mapping covers the whole allocation and stays valid until unmapped below
        let mut raw = unsafe { presser::RawAllocation::from_raw_parts(ptr, size as usize) };
        let mut slab = unsafe { raw.borrow_as_slab() };

        let mut src = 0;
        let mut copied = Ok(());
        for (region, &mip_size) in layout.regions.iter().zip(&layout.mip_sizes) {
            let mip = &pixels[src..src + mip_size as usize];
            src += mip_size as usize;
            if let Err(err) =
                presser::copy_from_slice_to_offset(mip, &mut slab, region.buffer_offset as usize)
            {
                let level = region.image_subresource.mip_level;
                copied = Err(eyre!("Staging copy of mip {level} failed: {err:?}"));
                break;
            }
        }

        unsafe { device.unmap_memory(self.memory) };
        copied
    }

    fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
        self.buffer = vk::Buffer::null();
        self.memory = vk::DeviceMemory::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_regions_are_packed_back_to_back() {
        let desc = TextureDesc {
            mip_levels: 3,
            ..TextureDesc::new_2d(vk::Format::R8G8B8A8_UNORM, 8, 4)
        };
        let layout = staging_layout(&desc).unwrap();

        let offsets = layout.regions.iter().map(|r| r.buffer_offset).collect::<Vec<_>>();
        let extents = layout
            .regions
            .iter()
            .map(|r| (r.image_extent.width, r.image_extent.height))
            .collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 128, 160]);
        assert_eq!(extents, vec![(8, 4), (4, 2), (2, 1)]);
        assert_eq!(layout.staging_size, 128 + 32 + 8);
        assert_eq!(layout.packed_size(), layout.staging_size);
    }

    #[test]
    fn single_byte_mips_start_on_four_byte_boundaries() {
        let desc = TextureDesc {
            mip_levels: 4,
            ..TextureDesc::new_2d(vk::Format::R8_UNORM, 8, 4)
        };
        let layout = staging_layout(&desc).unwrap();

        let offsets = layout.regions.iter().map(|r| r.buffer_offset).collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 32, 40, 44]);
        assert!(offsets.iter().all(|offset| offset % 4 == 0));
        assert_eq!(layout.mip_sizes, vec![32, 8, 2, 1]);
        assert_eq!(layout.packed_size(), 43);
        assert_eq!(layout.staging_size, 45);
    }

    #[test]
    fn two_byte_texel_array_stays_aligned() {
        let desc = TextureDesc {
            kind: TextureKind::Array { layers: 3 },
            mip_levels: 3,
            ..TextureDesc::new_2d(vk::Format::R8G8_UNORM, 4, 2)
        };
        let layout = staging_layout(&desc).unwrap();
        let offsets = layout.regions.iter().map(|r| r.buffer_offset).collect::<Vec<_>>();
        // 48 bytes, then 12, then 6
        assert_eq!(offsets, vec![0, 48, 60]);
        assert_eq!(layout.staging_size, 66);
    }

    #[test]
    fn alignment_is_a_multiple_of_four_and_the_texel() {
        assert_eq!(copy_alignment(1), 4);
        assert_eq!(copy_alignment(2), 4);
        assert_eq!(copy_alignment(4), 4);
        assert_eq!(copy_alignment(8), 8);
        assert_eq!(copy_alignment(16), 16);
        assert_eq!(copy_alignment(12), 12);
    }

    #[test]
    fn cube_copies_cover_six_layers() {
        let desc = TextureDesc {
            kind: TextureKind::Cube,
            ..TextureDesc::new_2d(vk::Format::R8_UNORM, 4, 4)
        };
        let layout = staging_layout(&desc).unwrap();
        assert_eq!(layout.regions.len(), 1);
        assert_eq!(layout.regions[0].image_subresource.layer_count, 6);
        assert_eq!(layout.staging_size, 4 * 4 * 6);
        assert_eq!(desc.kind.view_type(), vk::ImageViewType::CUBE);
    }

    #[test]
    fn array_layers_multiply_each_mip() {
        let desc = TextureDesc {
            kind: TextureKind::Array { layers: 3 },
            mip_levels: 2,
            ..TextureDesc::new_2d(vk::Format::R16G16B16A16_SFLOAT, 2, 2)
        };
        let layout = staging_layout(&desc).unwrap();
        assert_eq!(layout.regions[1].buffer_offset, 2 * 2 * 8 * 3);
        assert_eq!(layout.staging_size, (4 + 1) * 8 * 3);
    }

    #[test]
    fn rejects_invalid_descriptions() {
        let base = TextureDesc::new_2d(vk::Format::R8G8B8A8_SRGB, 16, 16);
        assert!(TextureDesc { width: 0, ..base }.validate().is_err());
        assert!(TextureDesc { mip_levels: 0, ..base }.validate().is_err());
        assert!(TextureDesc { mip_levels: 6, ..base }.validate().is_err());
        assert!(TextureDesc { mip_levels: 5, ..base }.validate().is_ok());
        assert!(TextureDesc { kind: TextureKind::Array { layers: 0 }, ..base }.validate().is_err());
        assert!(TextureDesc { kind: TextureKind::Cube, height: 8, ..base }.validate().is_err());
        assert!(TextureDesc { format: vk::Format::BC7_SRGB_BLOCK, ..base }.validate().is_err());
    }

    #[test]
    fn mip_chain_length() {
        assert_eq!(max_mip_levels(1, 1), 1);
        assert_eq!(max_mip_levels(256, 16), 9);
        assert_eq!(max_mip_levels(300, 1), 9);
    }
}
