//! Texel block sizes for the formats the transcoder can move.

use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Bytes per texel block
    pub bytes: u32,
    pub width: u32,
    pub height: u32,
}

impl BlockInfo {
    const fn texel(bytes: u32) -> Self {
        Self { bytes, width: 1, height: 1 }
    }

    const fn compressed(bytes: u32) -> Self {
        Self { bytes, width: 4, height: 4 }
    }
}

/// Aspects stored as separate planes, in subresource order.
pub fn aspects(format: vk::Format) -> &'static [vk::ImageAspectFlags] {
    const COLOR: &[vk::ImageAspectFlags] = &[vk::ImageAspectFlags::COLOR];
    const DEPTH: &[vk::ImageAspectFlags] = &[vk::ImageAspectFlags::DEPTH];
    const STENCIL: &[vk::ImageAspectFlags] = &[vk::ImageAspectFlags::STENCIL];
    const DEPTH_STENCIL: &[vk::ImageAspectFlags] =
        &[vk::ImageAspectFlags::DEPTH, vk::ImageAspectFlags::STENCIL];

    match format {
        vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => DEPTH,
        vk::Format::S8_UINT => STENCIL,
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => DEPTH_STENCIL,
        _ => COLOR,
    }
}

/// Formats whose depth and stencil planes share one image layout.
pub fn is_combined_depth_stencil(format: vk::Format) -> bool {
    aspects(format).len() == 2
}

/// Block layout of one aspect of `format` as seen by buffer/image copies.
pub fn block_info(format: vk::Format, aspect: vk::ImageAspectFlags) -> Option<BlockInfo> {
    if aspect == vk::ImageAspectFlags::STENCIL {
        return match format {
            vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT => Some(BlockInfo::texel(1)),
            _ => None,
        };
    }

    let info = match format {
        vk::Format::R8_UNORM
        | vk::Format::R8_SNORM
        | vk::Format::R8_UINT
        | vk::Format::R8_SINT
        | vk::Format::R8_SRGB => BlockInfo::texel(1),

        vk::Format::R8G8_UNORM
        | vk::Format::R8G8_SNORM
        | vk::Format::R8G8_UINT
        | vk::Format::R8G8_SINT
        | vk::Format::R16_UNORM
        | vk::Format::R16_SNORM
        | vk::Format::R16_UINT
        | vk::Format::R16_SINT
        | vk::Format::R16_SFLOAT
        | vk::Format::R5G6B5_UNORM_PACK16
        | vk::Format::D16_UNORM
        | vk::Format::D16_UNORM_S8_UINT => BlockInfo::texel(2),

        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SNORM
        | vk::Format::R8G8B8A8_UINT
        | vk::Format::R8G8B8A8_SINT
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::A2B10G10R10_UNORM_PACK32
        | vk::Format::A2R10G10B10_UNORM_PACK32
        | vk::Format::B10G11R11_UFLOAT_PACK32
        | vk::Format::E5B9G9R9_UFLOAT_PACK32
        | vk::Format::R16G16_UNORM
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::R32_SINT
        | vk::Format::R32_SFLOAT
        | vk::Format::X8_D24_UNORM_PACK32
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT
        | vk::Format::D32_SFLOAT_S8_UINT => BlockInfo::texel(4),

        vk::Format::R16G16B16A16_UNORM
        | vk::Format::R16G16B16A16_SFLOAT
        | vk::Format::R16G16B16A16_UINT
        | vk::Format::R32G32_UINT
        | vk::Format::R32G32_SINT
        | vk::Format::R32G32_SFLOAT => BlockInfo::texel(8),

        vk::Format::R32G32B32_UINT
        | vk::Format::R32G32B32_SINT
        | vk::Format::R32G32B32_SFLOAT => BlockInfo::texel(12),

        vk::Format::R32G32B32A32_UINT
        | vk::Format::R32G32B32A32_SINT
        | vk::Format::R32G32B32A32_SFLOAT => BlockInfo::texel(16),

        vk::Format::BC1_RGB_UNORM_BLOCK
        | vk::Format::BC1_RGB_SRGB_BLOCK
        | vk::Format::BC1_RGBA_UNORM_BLOCK
        | vk::Format::BC1_RGBA_SRGB_BLOCK
        | vk::Format::BC4_UNORM_BLOCK
        | vk::Format::BC4_SNORM_BLOCK => BlockInfo::compressed(8),

        vk::Format::BC2_UNORM_BLOCK
        | vk::Format::BC2_SRGB_BLOCK
        | vk::Format::BC3_UNORM_BLOCK
        | vk::Format::BC3_SRGB_BLOCK
        | vk::Format::BC5_UNORM_BLOCK
        | vk::Format::BC5_SNORM_BLOCK
        | vk::Format::BC6H_UFLOAT_BLOCK
        | vk::Format::BC6H_SFLOAT_BLOCK
        | vk::Format::BC7_UNORM_BLOCK
        | vk::Format::BC7_SRGB_BLOCK => BlockInfo::compressed(16),

        _ => return None,
    };
    Some(info)
}
