//! Framebuffers and the render-target compatibility signature.

use std::sync::Arc;

use crate::config::MAX_RENDER_TARGETS;
use crate::error::PipelineError;
use crate::format::Format;
use crate::resource::{
    FramebufferId, ResourceId, TextureDimension, TextureHandle, TextureSubresourceSet,
};

/// Dimension of a render-target view onto a texture of `dimension`.
///
/// Cubes and 3D textures cannot be rendered to directly and are viewed as 2D
/// arrays; an array view over a single slice becomes the non-array dimension.
pub fn framebuffer_view_dimension(dimension: TextureDimension, is_array: bool) -> TextureDimension {
    let dimension = match dimension {
        TextureDimension::TextureCube
        | TextureDimension::TextureCubeArray
        | TextureDimension::Texture3D => TextureDimension::Texture2DArray,
        other => other,
    };
    if is_array {
        return dimension;
    }
    match dimension {
        TextureDimension::Texture1DArray => TextureDimension::Texture1D,
        TextureDimension::Texture2DArray => TextureDimension::Texture2D,
        TextureDimension::Texture2DMSArray => TextureDimension::Texture2DMS,
        other => other,
    }
}

#[derive(Debug, Clone)]
pub struct FramebufferAttachment {
    pub texture: TextureHandle,
    /// Render targets always use the base mip level of this set.
    pub subresources: TextureSubresourceSet,
    /// `Format::Unknown` uses the texture's format.
    pub format: Format,
    /// Depth attachments only: bind as depth-read instead of depth-write.
    pub is_read_only: bool,
}

impl FramebufferAttachment {
    pub fn new(texture: TextureHandle) -> Self {
        Self {
            texture,
            subresources: TextureSubresourceSet::default(),
            format: Format::Unknown,
            is_read_only: false,
        }
    }

    pub fn with_subresources(texture: TextureHandle, subresources: TextureSubresourceSet) -> Self {
        Self {
            subresources,
            ..Self::new(texture)
        }
    }

    fn resolved_format(&self) -> Format {
        if self.format == Format::Unknown {
            self.texture.desc().format
        } else {
            self.format
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FramebufferDesc {
    pub color_attachments: Vec<FramebufferAttachment>,
    pub depth_attachment: Option<FramebufferAttachment>,
    pub shading_rate_attachment: Option<FramebufferAttachment>,
}

/// The render-target compatibility signature. A pipeline may only be used
/// with framebuffers whose signature is equal to the one it was created for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FramebufferInfo {
    pub color_formats: Vec<Format>,
    pub depth_format: Format,
    pub sample_count: u32,
    pub sample_quality: u32,
}

/// Signature plus the render area.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FramebufferInfoEx {
    pub info: FramebufferInfo,
    pub width: u32,
    pub height: u32,
    pub array_size: u32,
}

/// A derived render-target / depth-stencil view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetView {
    pub texture: ResourceId,
    pub format: Format,
    pub dimension: TextureDimension,
    pub subresources: TextureSubresourceSet,
}

fn attachment_view(attachment: &FramebufferAttachment) -> Result<RenderTargetView, PipelineError> {
    let desc = attachment.texture.desc();
    let subresources = attachment.subresources.resolve(desc, true);
    if subresources.is_empty() || subresources.base_mip_level >= desc.mip_levels {
        return Err(PipelineError::InvalidFramebuffer(
            "attachment subresources are out of range",
        ));
    }
    Ok(RenderTargetView {
        texture: attachment.texture.id(),
        format: attachment.resolved_format(),
        dimension: framebuffer_view_dimension(desc.dimension, subresources.num_array_slices > 1),
        subresources,
    })
}

#[derive(Debug)]
pub struct Framebuffer {
    id: FramebufferId,
    desc: FramebufferDesc,
    info: FramebufferInfoEx,
    color_views: Vec<RenderTargetView>,
    depth_view: Option<RenderTargetView>,
    shading_rate_view: Option<RenderTargetView>,
}

pub type FramebufferHandle = Arc<Framebuffer>;

impl Framebuffer {
    pub(crate) fn new(id: FramebufferId, desc: FramebufferDesc) -> Result<Self, PipelineError> {
        if desc.color_attachments.len() > MAX_RENDER_TARGETS {
            return Err(PipelineError::TooManyRenderTargets {
                count: desc.color_attachments.len(),
                max: MAX_RENDER_TARGETS,
            });
        }

        let first = desc
            .color_attachments
            .first()
            .or(desc.depth_attachment.as_ref())
            .ok_or(PipelineError::InvalidFramebuffer("framebuffer has no attachments"))?;
        let first_desc = first.texture.desc();
        let first_view = attachment_view(first)?;
        let width = first_desc.mip_width(first_view.subresources.base_mip_level);
        let height = first_desc.mip_height(first_view.subresources.base_mip_level);
        let array_size = first_view.subresources.num_array_slices;

        let check_attachment = |attachment: &FramebufferAttachment,
                                view: &RenderTargetView|
         -> Result<(), PipelineError> {
            let tex = attachment.texture.desc();
            if !tex.is_render_target {
                return Err(PipelineError::InvalidFramebuffer(
                    "attachment texture is not a render target",
                ));
            }
            if tex.sample_count != first_desc.sample_count
                || tex.sample_quality != first_desc.sample_quality
            {
                return Err(PipelineError::InvalidFramebuffer(
                    "attachments differ in sample count",
                ));
            }
            let mip = view.subresources.base_mip_level;
            if tex.mip_width(mip) != width || tex.mip_height(mip) != height {
                return Err(PipelineError::InvalidFramebuffer("attachments differ in size"));
            }
            if view.subresources.num_array_slices != array_size {
                return Err(PipelineError::InvalidFramebuffer(
                    "attachments differ in array size",
                ));
            }
            Ok(())
        };

        let mut color_views = Vec::with_capacity(desc.color_attachments.len());
        for attachment in &desc.color_attachments {
            let view = attachment_view(attachment)?;
            if view.format.is_depth_stencil() {
                return Err(PipelineError::InvalidFramebuffer(
                    "color attachment has a depth format",
                ));
            }
            check_attachment(attachment, &view)?;
            color_views.push(view);
        }

        let depth_view = match &desc.depth_attachment {
            Some(attachment) => {
                let view = attachment_view(attachment)?;
                if !view.format.is_depth_stencil() {
                    return Err(PipelineError::InvalidFramebuffer(
                        "depth attachment does not have a depth format",
                    ));
                }
                check_attachment(attachment, &view)?;
                Some(view)
            }
            None => None,
        };

        let shading_rate_view = match &desc.shading_rate_attachment {
            Some(attachment) => {
                if !attachment.texture.desc().is_shading_rate_surface {
                    return Err(PipelineError::InvalidFramebuffer(
                        "shading rate attachment is not a shading rate surface",
                    ));
                }
                Some(attachment_view(attachment)?)
            }
            None => None,
        };

        let info = FramebufferInfoEx {
            info: FramebufferInfo {
                color_formats: color_views.iter().map(|v| v.format).collect(),
                depth_format: depth_view.map_or(Format::Unknown, |v| v.format),
                sample_count: first_desc.sample_count,
                sample_quality: first_desc.sample_quality,
            },
            width,
            height,
            array_size,
        };

        Ok(Self {
            id,
            desc,
            info,
            color_views,
            depth_view,
            shading_rate_view,
        })
    }

    pub fn id(&self) -> FramebufferId {
        self.id
    }

    pub fn desc(&self) -> &FramebufferDesc {
        &self.desc
    }

    pub fn info(&self) -> &FramebufferInfoEx {
        &self.info
    }

    pub fn framebuffer_info(&self) -> &FramebufferInfo {
        &self.info.info
    }

    pub fn color_views(&self) -> &[RenderTargetView] {
        &self.color_views
    }

    pub fn depth_view(&self) -> Option<&RenderTargetView> {
        self.depth_view.as_ref()
    }

    pub fn shading_rate_view(&self) -> Option<&RenderTargetView> {
        self.shading_rate_view.as_ref()
    }
}
