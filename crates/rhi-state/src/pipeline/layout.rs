use crate::binding::BindingLayoutHandle;
use crate::config::MAX_BINDING_LAYOUTS;
use crate::error::PipelineError;
use crate::states::ShaderType;

/// Maps a pipeline's logical binding layout indices to native descriptor
/// set / root parameter indices.
///
/// Binding sets are bound by logical index (their position in the state's
/// `bindings` array); the native index comes from here.
#[derive(Debug, Clone)]
pub struct PipelineBindingMap {
    layouts: Vec<BindingLayoutHandle>,
    /// Native set index per logical layout index.
    descriptor_sets: Vec<u32>,
    /// Logical layout index per native set index; gaps are `None`.
    set_to_layout: Vec<Option<usize>>,
    push_constant_visibility: ShaderType,
    push_constant_size: u32,
}

impl PipelineBindingMap {
    pub fn resolve(layouts: &[BindingLayoutHandle]) -> Result<Self, PipelineError> {
        if layouts.len() > MAX_BINDING_LAYOUTS {
            return Err(PipelineError::TooManyBindingLayouts {
                count: layouts.len(),
                max: MAX_BINDING_LAYOUTS,
            });
        }

        let explicit_sets = layouts
            .first()
            .is_some_and(|l| l.desc().register_space_is_descriptor_set);
        if layouts
            .iter()
            .any(|l| l.desc().register_space_is_descriptor_set != explicit_sets)
        {
            return Err(PipelineError::InconsistentRegisterSpaceMode);
        }

        let descriptor_sets: Vec<u32> = if explicit_sets {
            layouts.iter().map(|l| l.desc().register_space).collect()
        } else {
            (0..layouts.len() as u32).collect()
        };

        if let Some(&set) = descriptor_sets
            .iter()
            .find(|&&set| set as usize >= MAX_BINDING_LAYOUTS)
        {
            return Err(PipelineError::DescriptorSetOutOfRange {
                set,
                max: MAX_BINDING_LAYOUTS,
            });
        }

        let set_count = descriptor_sets.iter().max().map_or(0, |&max| max as usize + 1);
        let mut set_to_layout = vec![None; set_count];
        for (layout_index, &set) in descriptor_sets.iter().enumerate() {
            let entry = &mut set_to_layout[set as usize];
            if entry.is_some() {
                return Err(PipelineError::DuplicateDescriptorSet { set });
            }
            *entry = Some(layout_index);
        }

        let mut push_constant_visibility = ShaderType::empty();
        let mut push_constant_size = 0;
        for layout in layouts {
            if layout.push_constant_size() > 0 {
                push_constant_visibility |= layout.desc().visibility;
                push_constant_size = push_constant_size.max(layout.push_constant_size());
            }
        }

        Ok(Self {
            layouts: layouts.to_vec(),
            descriptor_sets,
            set_to_layout,
            push_constant_visibility,
            push_constant_size,
        })
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    pub fn layouts(&self) -> &[BindingLayoutHandle] {
        &self.layouts
    }

    pub fn layout(&self, layout_index: usize) -> Option<&BindingLayoutHandle> {
        self.layouts.get(layout_index)
    }

    pub fn descriptor_set(&self, layout_index: usize) -> Option<u32> {
        self.descriptor_sets.get(layout_index).copied()
    }

    pub fn layout_for_descriptor_set(&self, set: u32) -> Option<usize> {
        self.set_to_layout.get(set as usize).copied().flatten()
    }

    /// Number of native set indices, including gaps.
    pub fn descriptor_set_count(&self) -> usize {
        self.set_to_layout.len()
    }

    pub fn push_constant_visibility(&self) -> ShaderType {
        self.push_constant_visibility
    }

    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::binding::{BindingLayout, BindingLayoutDesc, BindingLayoutItem};
    use crate::resource::BindingLayoutId;

    fn layout(space: u32, explicit: bool, visibility: ShaderType) -> BindingLayoutHandle {
        layout_with(space, explicit, visibility, Vec::new())
    }

    fn layout_with(
        space: u32,
        explicit: bool,
        visibility: ShaderType,
        bindings: Vec<BindingLayoutItem>,
    ) -> BindingLayoutHandle {
        Arc::new(
            BindingLayout::new(
                BindingLayoutId(u64::from(space) + 1),
                BindingLayoutDesc {
                    visibility,
                    register_space: space,
                    register_space_is_descriptor_set: explicit,
                    bindings,
                },
            )
            .unwrap(),
        )
    }

    #[test]
    fn implicit_sets_are_sequential() {
        let map = PipelineBindingMap::resolve(&[
            layout(5, false, ShaderType::VERTEX),
            layout(2, false, ShaderType::PIXEL),
        ])
        .unwrap();
        assert_eq!(map.descriptor_set(0), Some(0));
        assert_eq!(map.descriptor_set(1), Some(1));
        assert_eq!(map.descriptor_set_count(), 2);
    }

    #[test]
    fn explicit_sets_follow_register_space_with_gaps() {
        let map = PipelineBindingMap::resolve(&[
            layout(3, true, ShaderType::VERTEX),
            layout(0, true, ShaderType::PIXEL),
        ])
        .unwrap();
        assert_eq!(map.descriptor_set(0), Some(3));
        assert_eq!(map.descriptor_set(1), Some(0));
        assert_eq!(map.descriptor_set_count(), 4);
        assert_eq!(map.layout_for_descriptor_set(3), Some(0));
        assert_eq!(map.layout_for_descriptor_set(1), None);
    }

    #[test]
    fn rejects_mixed_modes_and_duplicates() {
        assert_eq!(
            PipelineBindingMap::resolve(&[
                layout(0, true, ShaderType::VERTEX),
                layout(1, false, ShaderType::PIXEL),
            ])
            .unwrap_err(),
            PipelineError::InconsistentRegisterSpaceMode
        );
        assert_eq!(
            PipelineBindingMap::resolve(&[
                layout(1, true, ShaderType::VERTEX),
                layout(1, true, ShaderType::PIXEL),
            ])
            .unwrap_err(),
            PipelineError::DuplicateDescriptorSet { set: 1 }
        );
    }

    #[test]
    fn rejects_too_many_layouts() {
        let layouts: Vec<_> = (0..9).map(|i| layout(i, false, ShaderType::ALL)).collect();
        assert!(matches!(
            PipelineBindingMap::resolve(&layouts),
            Err(PipelineError::TooManyBindingLayouts { count: 9, .. })
        ));
    }

    #[test]
    fn rejects_descriptor_sets_past_the_layout_limit() {
        assert_eq!(
            PipelineBindingMap::resolve(&[layout(u32::MAX, true, ShaderType::COMPUTE)])
                .unwrap_err(),
            PipelineError::DescriptorSetOutOfRange {
                set: u32::MAX,
                max: MAX_BINDING_LAYOUTS,
            }
        );
        let highest = MAX_BINDING_LAYOUTS as u32 - 1;
        let map = PipelineBindingMap::resolve(&[layout(highest, true, ShaderType::COMPUTE)])
            .unwrap();
        assert_eq!(map.descriptor_set_count(), MAX_BINDING_LAYOUTS);
    }

    #[test]
    fn push_constant_visibility_is_union() {
        let map = PipelineBindingMap::resolve(&[
            layout_with(
                0,
                false,
                ShaderType::VERTEX,
                vec![BindingLayoutItem::push_constants(0, 16)],
            ),
            layout(1, false, ShaderType::PIXEL),
        ])
        .unwrap();
        assert_eq!(map.push_constant_visibility(), ShaderType::VERTEX);
        assert_eq!(map.push_constant_size(), 16);
    }
}
