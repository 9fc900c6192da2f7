//! Portable texel formats.
//!
//! Only the information the recorder itself needs is kept here (aspect flags
//! and block size); mapping to native format enums is the backend's job.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Unknown,
    R8Uint,
    R8Unorm,
    R16Uint,
    R16Float,
    R32Uint,
    R32Float,
    Rg8Unorm,
    Rg16Float,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Rgb32Float,
    D16,
    D24S8,
    D32,
    D32S8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub bytes_per_block: u32,
    pub has_depth: bool,
    pub has_stencil: bool,
}

impl FormatInfo {
    const fn color(bytes_per_block: u32) -> Self {
        Self {
            bytes_per_block,
            has_depth: false,
            has_stencil: false,
        }
    }

    const fn depth(bytes_per_block: u32, has_stencil: bool) -> Self {
        Self {
            bytes_per_block,
            has_depth: true,
            has_stencil,
        }
    }
}

impl Format {
    pub const fn info(self) -> FormatInfo {
        match self {
            Format::Unknown => FormatInfo::color(0),
            Format::R8Uint | Format::R8Unorm => FormatInfo::color(1),
            Format::R16Uint | Format::R16Float | Format::Rg8Unorm => FormatInfo::color(2),
            Format::R32Uint
            | Format::R32Float
            | Format::Rg16Float
            | Format::Rgba8Unorm
            | Format::Rgba8UnormSrgb
            | Format::Bgra8Unorm
            | Format::Bgra8UnormSrgb => FormatInfo::color(4),
            Format::Rgba16Float => FormatInfo::color(8),
            Format::Rgb32Float => FormatInfo::color(12),
            Format::Rgba32Float => FormatInfo::color(16),
            Format::D16 => FormatInfo::depth(2, false),
            Format::D24S8 => FormatInfo::depth(4, true),
            Format::D32 => FormatInfo::depth(4, false),
            Format::D32S8 => FormatInfo::depth(8, true),
        }
    }

    pub const fn is_depth_stencil(self) -> bool {
        let info = self.info();
        info.has_depth || info.has_stencil
    }

    /// Index formats accepted by index-buffer binds.
    pub const fn is_index_format(self) -> bool {
        matches!(self, Format::R16Uint | Format::R32Uint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_report_aspects() {
        assert!(Format::D24S8.info().has_stencil);
        assert!(Format::D32.is_depth_stencil());
        assert!(!Format::D32.info().has_stencil);
        assert!(!Format::Rgba8Unorm.is_depth_stencil());
    }

    #[test]
    fn index_formats() {
        assert!(Format::R16Uint.is_index_format());
        assert!(Format::R32Uint.is_index_format());
        assert!(!Format::R32Float.is_index_format());
    }
}
