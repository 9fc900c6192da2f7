use rhi_state::{Color, Format};

/// wgpu texture format for `format`, if wgpu has one.
///
/// Three-component 32-bit formats have no wgpu texture equivalent.
pub fn texture_format(format: Format) -> Option<wgpu::TextureFormat> {
    Some(match format {
        Format::R8Uint => wgpu::TextureFormat::R8Uint,
        Format::R8Unorm => wgpu::TextureFormat::R8Unorm,
        Format::R16Uint => wgpu::TextureFormat::R16Uint,
        Format::R16Float => wgpu::TextureFormat::R16Float,
        Format::R32Uint => wgpu::TextureFormat::R32Uint,
        Format::R32Float => wgpu::TextureFormat::R32Float,
        Format::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        Format::Rg16Float => wgpu::TextureFormat::Rg16Float,
        Format::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        Format::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        Format::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        Format::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        Format::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        Format::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        Format::D16 => wgpu::TextureFormat::Depth16Unorm,
        Format::D24S8 => wgpu::TextureFormat::Depth24PlusStencil8,
        Format::D32 => wgpu::TextureFormat::Depth32Float,
        Format::D32S8 => wgpu::TextureFormat::Depth32FloatStencil8,
        Format::Unknown | Format::Rgb32Float => return None,
    })
}

pub fn index_format(format: Format) -> Option<wgpu::IndexFormat> {
    match format {
        Format::R16Uint => Some(wgpu::IndexFormat::Uint16),
        Format::R32Uint => Some(wgpu::IndexFormat::Uint32),
        _ => None,
    }
}

pub(crate) fn color(value: Color) -> wgpu::Color {
    wgpu::Color {
        r: f64::from(value.r),
        g: f64::from(value.g),
        b: f64::from(value.b),
        a: f64::from(value.a),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_keep_their_stencil_aspect() {
        assert_eq!(
            texture_format(Format::D24S8),
            Some(wgpu::TextureFormat::Depth24PlusStencil8)
        );
        assert_eq!(
            texture_format(Format::D32),
            Some(wgpu::TextureFormat::Depth32Float)
        );
        assert_eq!(texture_format(Format::Rgb32Float), None);
        assert_eq!(texture_format(Format::Unknown), None);
    }

    #[test]
    fn only_integer_formats_index() {
        assert_eq!(index_format(Format::R16Uint), Some(wgpu::IndexFormat::Uint16));
        assert_eq!(index_format(Format::R32Uint), Some(wgpu::IndexFormat::Uint32));
        assert_eq!(index_format(Format::R32Float), None);
    }
}
