//! Resource-state and shader-stage masks.
//!
//! Both masks share their bit assignments with the native APIs the recorder
//! sits on top of, so the values here must not be renumbered.

use bitflags::bitflags;

bitflags! {
    /// Legal usage roles of a resource or texture subresource.
    ///
    /// An empty mask means the state is unknown (never observed in the
    /// current command list).
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ResourceStates: u32 {
        const COMMON = 0x0000_0001;
        const CONSTANT_BUFFER = 0x0000_0002;
        const VERTEX_BUFFER = 0x0000_0004;
        const INDEX_BUFFER = 0x0000_0008;
        const INDIRECT_ARGUMENT = 0x0000_0010;
        const SHADER_RESOURCE = 0x0000_0020;
        const UNORDERED_ACCESS = 0x0000_0040;
        const RENDER_TARGET = 0x0000_0080;
        const DEPTH_WRITE = 0x0000_0100;
        const DEPTH_READ = 0x0000_0200;
        const STREAM_OUT = 0x0000_0400;
        const COPY_DEST = 0x0000_0800;
        const COPY_SOURCE = 0x0000_1000;
        const RESOLVE_DEST = 0x0000_2000;
        const RESOLVE_SOURCE = 0x0000_4000;
        const PRESENT = 0x0000_8000;
        const ACCEL_STRUCT_READ = 0x0001_0000;
        const ACCEL_STRUCT_WRITE = 0x0002_0000;
        const ACCEL_STRUCT_BUILD_INPUT = 0x0004_0000;
        const ACCEL_STRUCT_BUILD_BLAS = 0x0008_0000;
        const SHADING_RATE_SURFACE = 0x0010_0000;
        const OPACITY_MICROMAP_WRITE = 0x0020_0000;
        const OPACITY_MICROMAP_BUILD_INPUT = 0x0040_0000;
    }
}

impl ResourceStates {
    /// Never observed.
    pub const UNKNOWN: Self = Self::empty();

    pub fn is_unknown(self) -> bool {
        self.is_empty()
    }
}

impl Default for ResourceStates {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

bitflags! {
    /// Shader stages, used both as a single stage tag and as a visibility mask.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ShaderType: u16 {
        const VERTEX = 0x0001;
        const HULL = 0x0002;
        const DOMAIN = 0x0004;
        const GEOMETRY = 0x0008;
        const PIXEL = 0x0010;
        const COMPUTE = 0x0020;
        const AMPLIFICATION = 0x0040;
        const MESH = 0x0080;
        const ALL_GRAPHICS = 0x00DF;

        const RAY_GENERATION = 0x0100;
        const ANY_HIT = 0x0200;
        const CLOSEST_HIT = 0x0400;
        const MISS = 0x0800;
        const INTERSECTION = 0x1000;
        const CALLABLE = 0x2000;
        const ALL_RAY_TRACING = 0x3F00;

        const ALL = 0x3FFF;
    }
}

impl ShaderType {
    /// `true` when exactly one stage bit is set.
    pub fn is_single_stage(self) -> bool {
        self.bits().count_ones() == 1
    }
}

impl Default for ShaderType {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_state_bits_match_native_values() {
        assert_eq!(ResourceStates::UNKNOWN.bits(), 0);
        assert_eq!(ResourceStates::SHADER_RESOURCE.bits(), 0x20);
        assert_eq!(ResourceStates::RENDER_TARGET.bits(), 0x80);
        assert_eq!(ResourceStates::COPY_SOURCE.bits(), 0x1000);
        assert_eq!(ResourceStates::PRESENT.bits(), 0x8000);
        assert_eq!(ResourceStates::OPACITY_MICROMAP_BUILD_INPUT.bits(), 0x40_0000);
    }

    #[test]
    fn shader_type_aggregates() {
        assert!(ShaderType::ALL_GRAPHICS.contains(ShaderType::VERTEX | ShaderType::MESH));
        assert!(!ShaderType::ALL_GRAPHICS.contains(ShaderType::COMPUTE));
        assert_eq!(
            ShaderType::ALL,
            ShaderType::ALL_GRAPHICS | ShaderType::COMPUTE | ShaderType::ALL_RAY_TRACING
        );
        assert!(ShaderType::PIXEL.is_single_stage());
        assert!(!ShaderType::ALL_GRAPHICS.is_single_stage());
    }
}
