use std::ops::Range;
use std::sync::{Arc, OnceLock};

use crate::format::Format;
use crate::states::ResourceStates;

use super::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    Unknown,
    Texture1D,
    Texture1DArray,
    #[default]
    Texture2D,
    Texture2DArray,
    TextureCube,
    TextureCubeArray,
    Texture2DMS,
    Texture2DMSArray,
    Texture3D,
}

impl TextureDimension {
    /// Dimensions whose subresources are addressed by array slice.
    pub fn is_array_like(self) -> bool {
        matches!(
            self,
            TextureDimension::Texture1DArray
                | TextureDimension::Texture2DArray
                | TextureDimension::TextureCube
                | TextureDimension::TextureCubeArray
                | TextureDimension::Texture2DMSArray
        )
    }

    pub fn is_multisampled(self) -> bool {
        matches!(
            self,
            TextureDimension::Texture2DMS | TextureDimension::Texture2DMSArray
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Number of array slices; cube textures count each face.
    pub array_size: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub sample_quality: u32,
    pub format: Format,
    pub dimension: TextureDimension,
    pub debug_name: String,

    pub is_render_target: bool,
    pub is_uav: bool,
    pub is_shading_rate_surface: bool,

    /// State the texture is in when created. With `keep_initial_state` the
    /// recorder starts tracking from it and restores it when a command list
    /// is closed.
    pub initial_state: ResourceStates,
    pub keep_initial_state: bool,
    /// Keep the texture alive while a submission referencing it is in flight.
    pub track_liveness: bool,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth: 1,
            array_size: 1,
            mip_levels: 1,
            sample_count: 1,
            sample_quality: 0,
            format: Format::Unknown,
            dimension: TextureDimension::Texture2D,
            debug_name: String::new(),
            is_render_target: false,
            is_uav: false,
            is_shading_rate_surface: false,
            initial_state: ResourceStates::UNKNOWN,
            keep_initial_state: false,
            track_liveness: true,
        }
    }
}

impl TextureDesc {
    /// Width of `mip_level`, never smaller than one texel.
    pub fn mip_width(&self, mip_level: u32) -> u32 {
        (self.width >> mip_level).max(1)
    }

    pub fn mip_height(&self, mip_level: u32) -> u32 {
        (self.height >> mip_level).max(1)
    }

    pub fn mip_depth(&self, mip_level: u32) -> u32 {
        (self.depth >> mip_level).max(1)
    }
}

/// A rectangular block of mip levels and array slices.
///
/// [`TextureSubresourceSet::ALL_MIP_LEVELS`] / [`TextureSubresourceSet::ALL_ARRAY_SLICES`]
/// stand for "to the end" and are clamped by [`TextureSubresourceSet::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSubresourceSet {
    pub base_mip_level: u32,
    pub num_mip_levels: u32,
    pub base_array_slice: u32,
    pub num_array_slices: u32,
}

impl Default for TextureSubresourceSet {
    fn default() -> Self {
        Self {
            base_mip_level: 0,
            num_mip_levels: 1,
            base_array_slice: 0,
            num_array_slices: 1,
        }
    }
}

impl TextureSubresourceSet {
    pub const ALL_MIP_LEVELS: u32 = u32::MAX;
    pub const ALL_ARRAY_SLICES: u32 = u32::MAX;

    pub const ALL: Self = Self {
        base_mip_level: 0,
        num_mip_levels: Self::ALL_MIP_LEVELS,
        base_array_slice: 0,
        num_array_slices: Self::ALL_ARRAY_SLICES,
    };

    pub const fn new(
        base_mip_level: u32,
        num_mip_levels: u32,
        base_array_slice: u32,
        num_array_slices: u32,
    ) -> Self {
        Self {
            base_mip_level,
            num_mip_levels,
            base_array_slice,
            num_array_slices,
        }
    }

    /// Mip range `mips` on every array slice.
    pub fn mips(mips: Range<u32>) -> Self {
        Self::new(
            mips.start,
            mips.end.saturating_sub(mips.start),
            0,
            Self::ALL_ARRAY_SLICES,
        )
    }

    /// Clamps the set against `desc`.
    ///
    /// Non-array dimensions always resolve to slice 0. With `single_mip_level`
    /// only the base mip level is kept. A set that starts past the end of the
    /// texture resolves to an empty set.
    pub fn resolve(&self, desc: &TextureDesc, single_mip_level: bool) -> Self {
        let num_mip_levels = if single_mip_level {
            1
        } else {
            let last = self
                .base_mip_level
                .saturating_add(self.num_mip_levels)
                .min(desc.mip_levels);
            last.saturating_sub(self.base_mip_level)
        };

        let (base_array_slice, num_array_slices) = if desc.dimension.is_array_like() {
            let last = self
                .base_array_slice
                .saturating_add(self.num_array_slices)
                .min(desc.array_size);
            (self.base_array_slice, last.saturating_sub(self.base_array_slice))
        } else {
            (0, 1)
        };

        Self {
            base_mip_level: self.base_mip_level,
            num_mip_levels,
            base_array_slice,
            num_array_slices,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_mip_levels == 0 || self.num_array_slices == 0
    }

    /// Whether this (resolved) set covers every subresource of `desc`.
    pub fn is_entire_texture(&self, desc: &TextureDesc) -> bool {
        if self.base_mip_level > 0
            || self.base_mip_level.saturating_add(self.num_mip_levels) < desc.mip_levels
        {
            return false;
        }
        if desc.dimension.is_array_like()
            && (self.base_array_slice > 0
                || self.base_array_slice.saturating_add(self.num_array_slices) < desc.array_size)
        {
            return false;
        }
        true
    }

    pub fn mip_range(&self) -> Range<u32> {
        self.base_mip_level..self.base_mip_level + self.num_mip_levels
    }

    pub fn slice_range(&self) -> Range<u32> {
        self.base_array_slice..self.base_array_slice + self.num_array_slices
    }
}

/// A region of one subresource, used by copies and uploads.
///
/// `u32::MAX` extents mean "to the edge of the mip level".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSlice {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_level: u32,
    pub array_slice: u32,
}

impl Default for TextureSlice {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            z: 0,
            width: u32::MAX,
            height: u32::MAX,
            depth: u32::MAX,
            mip_level: 0,
            array_slice: 0,
        }
    }
}

impl TextureSlice {
    pub fn resolve(&self, desc: &TextureDesc) -> Self {
        let mut ret = *self;
        if ret.width == u32::MAX {
            ret.width = desc.mip_width(self.mip_level).saturating_sub(self.x);
        }
        if ret.height == u32::MAX {
            ret.height = desc.mip_height(self.mip_level).saturating_sub(self.y);
        }
        if ret.depth == u32::MAX {
            ret.depth = if desc.dimension == TextureDimension::Texture3D {
                desc.mip_depth(self.mip_level).saturating_sub(self.z)
            } else {
                1
            };
        }
        ret
    }

    pub fn subresource(&self) -> TextureSubresourceSet {
        TextureSubresourceSet::new(self.mip_level, 1, self.array_slice, 1)
    }
}

#[derive(Debug)]
pub struct Texture {
    id: ResourceId,
    desc: TextureDesc,
    permanent_state: OnceLock<ResourceStates>,
}

pub type TextureHandle = Arc<Texture>;

impl Texture {
    pub(crate) fn new(id: ResourceId, desc: TextureDesc) -> Self {
        Self {
            id,
            desc,
            permanent_state: OnceLock::new(),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    /// Registry-wide permanent state, set once a command list requesting it
    /// has been submitted.
    pub fn permanent_state(&self) -> Option<ResourceStates> {
        self.permanent_state.get().copied()
    }

    /// Returns the already assigned state if it differs from `state`.
    pub(crate) fn promote_permanent(&self, state: ResourceStates) -> Result<(), ResourceStates> {
        let assigned = *self.permanent_state.get_or_init(|| state);
        if assigned == state {
            Ok(())
        } else {
            Err(assigned)
        }
    }

    pub fn num_subresources(&self) -> usize {
        self.desc.mip_levels as usize * self.subresource_slices() as usize
    }

    pub(crate) fn subresource_slices(&self) -> u32 {
        if self.desc.dimension.is_array_like() {
            self.desc.array_size
        } else {
            1
        }
    }

    pub(crate) fn subresource_index(&self, mip_level: u32, array_slice: u32) -> usize {
        array_slice as usize * self.desc.mip_levels as usize + mip_level as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc_2d_array(mips: u32, slices: u32) -> TextureDesc {
        TextureDesc {
            width: 64,
            height: 64,
            mip_levels: mips,
            array_size: slices,
            dimension: TextureDimension::Texture2DArray,
            ..TextureDesc::default()
        }
    }

    #[test]
    fn resolve_all_clamps_to_desc() {
        let desc = desc_2d_array(4, 3);
        let set = TextureSubresourceSet::ALL.resolve(&desc, false);
        assert_eq!(set, TextureSubresourceSet::new(0, 4, 0, 3));
        assert!(set.is_entire_texture(&desc));
    }

    #[test]
    fn resolve_non_array_forces_slice_zero() {
        let desc = TextureDesc {
            mip_levels: 4,
            ..TextureDesc::default()
        };
        let set = TextureSubresourceSet::new(1, 2, 5, 9).resolve(&desc, false);
        assert_eq!(set, TextureSubresourceSet::new(1, 2, 0, 1));
        assert!(!set.is_entire_texture(&desc));
    }

    #[test]
    #[allow(clippy::reversed_empty_ranges)]
    fn reversed_mip_range_is_empty() {
        let set = TextureSubresourceSet::mips(3..1);
        assert_eq!(set.base_mip_level, 3);
        assert!(set.is_empty());
        assert!(set.resolve(&desc_2d_array(4, 1), false).is_empty());
    }

    #[test]
    fn resolve_single_mip_level() {
        let desc = desc_2d_array(4, 2);
        let set = TextureSubresourceSet::ALL.resolve(&desc, true);
        assert_eq!(set.num_mip_levels, 1);
        assert_eq!(set.num_array_slices, 2);
    }

    #[test]
    fn resolve_past_end_is_empty() {
        let desc = desc_2d_array(2, 2);
        assert!(TextureSubresourceSet::new(3, 1, 0, 1).resolve(&desc, false).is_empty());
        assert!(TextureSubresourceSet::new(0, 1, 2, 1).resolve(&desc, false).is_empty());
    }

    #[test]
    fn slice_resolve_uses_mip_extent() {
        let desc = TextureDesc {
            width: 100,
            height: 40,
            mip_levels: 3,
            ..TextureDesc::default()
        };
        let slice = TextureSlice {
            mip_level: 2,
            x: 5,
            ..TextureSlice::default()
        }
        .resolve(&desc);
        assert_eq!((slice.width, slice.height, slice.depth), (20, 10, 1));
    }
}
