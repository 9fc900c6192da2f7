//! Shader handles and specialization-constant tables.

use std::ops::Range;
use std::sync::Arc;

use crate::states::ShaderType;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderDesc {
    /// Exactly one stage.
    pub shader_type: ShaderType,
    pub entry_name: String,
    pub debug_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpecializationConstant {
    pub constant_id: u32,
    /// Raw 32-bit payload (bool, int, uint or float bits).
    pub value: u32,
}

impl SpecializationConstant {
    pub fn uint(constant_id: u32, value: u32) -> Self {
        Self { constant_id, value }
    }

    pub fn float(constant_id: u32, value: f32) -> Self {
        Self {
            constant_id,
            value: value.to_bits(),
        }
    }
}

/// Compiled shader plus its specialization. Compilation happens elsewhere;
/// the bytecode is carried through to the native device untouched.
#[derive(Debug)]
pub struct Shader {
    desc: ShaderDesc,
    bytecode: Arc<[u8]>,
    specialization_constants: Vec<SpecializationConstant>,
}

pub type ShaderHandle = Arc<Shader>;

impl Shader {
    pub fn new(desc: ShaderDesc, bytecode: impl Into<Arc<[u8]>>) -> ShaderHandle {
        Arc::new(Self {
            desc,
            bytecode: bytecode.into(),
            specialization_constants: Vec::new(),
        })
    }

    /// A variant of `base` sharing its bytecode with `constants` applied.
    pub fn specialize(base: &ShaderHandle, constants: &[SpecializationConstant]) -> ShaderHandle {
        Arc::new(Self {
            desc: base.desc.clone(),
            bytecode: base.bytecode.clone(),
            specialization_constants: constants.to_vec(),
        })
    }

    pub fn desc(&self) -> &ShaderDesc {
        &self.desc
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn specialization_constants(&self) -> &[SpecializationConstant] {
        &self.specialization_constants
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecializationMapEntry {
    pub constant_id: u32,
    /// Byte offset into the stage's data block.
    pub offset: u32,
    pub size: u32,
}

/// One stage's view into [`SpecializationTables`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecializationInfo {
    pub map_entries: Range<usize>,
    pub data: Range<usize>,
}

/// A shader stage of a pipeline being created.
#[derive(Debug, Clone)]
pub struct ShaderStageInfo {
    pub stage: ShaderType,
    pub shader: ShaderHandle,
    /// Index into [`SpecializationTables::infos`].
    pub specialization: Option<usize>,
}

/// Specialization data of every stage of one pipeline, stored contiguously.
///
/// Stage descriptors refer to ranges of these tables, so the tables are
/// sized for all stages before any stage is filled in and never grow after.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SpecializationTables {
    infos: Vec<SpecializationInfo>,
    map_entries: Vec<SpecializationMapEntry>,
    data: Vec<u32>,
}

impl SpecializationTables {
    /// Builds the tables for `stages` and returns the stage infos with their
    /// specialization index filled in.
    pub fn build(stages: &[(ShaderType, &ShaderHandle)]) -> (Self, Vec<ShaderStageInfo>) {
        let (specialized, constants) = stages.iter().fold((0, 0), |(n, c), (_, shader)| {
            let count = shader.specialization_constants().len();
            (n + usize::from(count > 0), c + count)
        });

        let mut tables = Self {
            infos: Vec::with_capacity(specialized),
            map_entries: Vec::with_capacity(constants),
            data: Vec::with_capacity(constants),
        };

        let mut infos = Vec::with_capacity(stages.len());
        for &(stage, shader) in stages {
            let specialization = tables.push_stage(shader.specialization_constants());
            infos.push(ShaderStageInfo {
                stage,
                shader: shader.clone(),
                specialization,
            });
        }

        debug_assert_eq!(tables.map_entries.len(), constants);
        debug_assert_eq!(tables.infos.len(), specialized);
        (tables, infos)
    }

    fn push_stage(&mut self, constants: &[SpecializationConstant]) -> Option<usize> {
        if constants.is_empty() {
            return None;
        }
        let entries_start = self.map_entries.len();
        let data_start = self.data.len();
        for (i, constant) in constants.iter().enumerate() {
            self.map_entries.push(SpecializationMapEntry {
                constant_id: constant.constant_id,
                offset: (i * std::mem::size_of::<u32>()) as u32,
                size: std::mem::size_of::<u32>() as u32,
            });
            self.data.push(constant.value);
        }
        self.infos.push(SpecializationInfo {
            map_entries: entries_start..self.map_entries.len(),
            data: data_start..self.data.len(),
        });
        Some(self.infos.len() - 1)
    }

    pub fn infos(&self) -> &[SpecializationInfo] {
        &self.infos
    }

    pub fn map_entries(&self, info: &SpecializationInfo) -> &[SpecializationMapEntry] {
        &self.map_entries[info.map_entries.clone()]
    }

    pub fn data(&self, info: &SpecializationInfo) -> &[u32] {
        &self.data[info.data.clone()]
    }

    /// Total number of specialization constants across all stages.
    pub fn map_entry_count(&self) -> usize {
        self.map_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shader(stage: ShaderType) -> ShaderHandle {
        Shader::new(
            ShaderDesc {
                shader_type: stage,
                entry_name: "main".into(),
                ..ShaderDesc::default()
            },
            vec![0u8; 4],
        )
    }

    #[test]
    fn stages_reference_their_own_ranges() {
        let vs = Shader::specialize(
            &shader(ShaderType::VERTEX),
            &[SpecializationConstant::uint(0, 7), SpecializationConstant::uint(3, 9)],
        );
        let gs = shader(ShaderType::GEOMETRY);
        let ps = Shader::specialize(
            &shader(ShaderType::PIXEL),
            &[SpecializationConstant::float(1, 0.5)],
        );

        let (tables, stages) = SpecializationTables::build(&[
            (ShaderType::VERTEX, &vs),
            (ShaderType::GEOMETRY, &gs),
            (ShaderType::PIXEL, &ps),
        ]);

        assert_eq!(tables.infos().len(), 2);
        assert_eq!(stages[1].specialization, None);

        let vs_info = &tables.infos()[stages[0].specialization.unwrap()];
        assert_eq!(tables.data(vs_info), &[7, 9]);
        assert_eq!(tables.map_entries(vs_info)[1].offset, 4);
        assert_eq!(tables.map_entries(vs_info)[1].constant_id, 3);

        let ps_info = &tables.infos()[stages[2].specialization.unwrap()];
        assert_eq!(tables.data(ps_info), &[0.5f32.to_bits()]);
        assert_eq!(tables.map_entries(ps_info)[0].offset, 0);
    }

    #[test]
    fn specialization_shares_bytecode() {
        let base = shader(ShaderType::COMPUTE);
        let variant = Shader::specialize(&base, &[SpecializationConstant::uint(0, 1)]);
        assert_eq!(variant.bytecode(), base.bytecode());
        assert!(base.specialization_constants().is_empty());
    }
}
