//! Recompiler from Xenos microcode to HLSL.
//!
//! The emitted source carries three dialect regions selected by the
//! downstream preprocessor: plain HLSL for DXIL, `__spirv__` for Vulkan and
//! `__air__` for Metal. Common helpers (`tfetch2D`, `swapFloats`, `cube`,
//! ...) come from an include fragment that is prepended verbatim.
//!
//! A [`Recompiler`] instance is single-use: it is consumed by
//! [`Recompiler::recompile`] and either yields the full shader text or an
//! error, never partial output.

mod alu;
mod decl;
mod fetch;
mod flow;

use std::fmt::Write;

use bitflags::bitflags;
use hashbrown::HashMap;
use thiserror::Error;
use xenos_shader::container::{
    ConstantTable, ConstantTableError, ContainerError, DeclUsage, DefinitionTable, RegisterSet,
    ShaderContainer, ShaderHeaderError, ShaderStageInfo, VertexElement,
};
use xenos_shader::reader::EofError;

pub(crate) const SWIZZLES: [char; 8] = ['x', 'y', 'z', 'w', '0', '1', '_', '_'];

bitflags! {
    /// Specialization constants the emitted source may reference.
    ///
    /// Bit values are shared with the runtime side of the include fragment.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SpecConstants: u32 {
        const R11G11B10_NORMAL = 1 << 0;
        const ALPHA_TEST = 1 << 1;
        const BICUBIC_GI_FILTER = 1 << 2;
        const ALPHA_TO_COVERAGE = 1 << 3;
        const REVERSE_Z = 1 << 4;
    }
}

/// The result of one recompilation.
#[derive(Clone, Debug)]
pub struct RecompiledShader {
    /// Null-terminator-free HLSL source, include fragment first.
    pub source: String,
    pub is_pixel_shader: bool,
    /// Exactly the specialization constants the source references.
    pub spec_constants: SpecConstants,
}

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] ErrorImpl);

#[derive(Debug, Error)]
enum ErrorImpl {
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    ConstantTable(#[from] ConstantTableError),
    #[error(transparent)]
    Header(#[from] ShaderHeaderError),
    #[error(transparent)]
    Eof(#[from] EofError),
    #[error("int4 constant {0:?} is not supported")]
    UnsupportedConstant(String),
    #[error("no attribute location for vertex element {usage:?}{usage_index}")]
    UnmappedVertexAttribute { usage: DeclUsage, usage_index: u32 },
    #[error("export targets undeclared interpolator {0}")]
    MissingInterpolator(u32),
    #[error("vertex fetch address {0} has no vertex element")]
    MissingVertexElement(u32),
}

/// A float4 constant-table entry as seen from one of the registers it spans.
#[derive(Clone, Debug)]
pub(crate) struct Float4Constant {
    pub name: String,
    pub register_index: u16,
    pub register_count: u16,
}

/// Per-invocation recompile state.
#[derive(Debug, Default)]
pub struct Recompiler {
    out: String,
    indentation: u32,
    is_pixel_shader: bool,
    vertex_elements: HashMap<u32, VertexElement>,
    interpolators: HashMap<u32, String>,
    float4_constants: HashMap<u32, Float4Constant>,
    bool_constants: HashMap<u32, String>,
    samplers: HashMap<u32, String>,
    if_end_labels: HashMap<u32, u32>,
    spec_constants: SpecConstants,

    // Game-specific constant vocabulary; see DESIGN.md.
    has_mtx_projection: bool,
    has_index_count: bool,
    is_meta_instancer: bool,
    has_mtx_prev_inv_view_projection: bool,
}

impl Recompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompiles one shader container into annotated HLSL.
    ///
    /// `include` is prepended verbatim and carries the common helper
    /// functions the emitted body calls into.
    pub fn recompile(mut self, bytes: &[u8], include: &str) -> Result<RecompiledShader, Error> {
        self.run(bytes, include)?;

        Ok(RecompiledShader {
            source: self.out,
            is_pixel_shader: self.is_pixel_shader,
            spec_constants: self.spec_constants,
        })
    }

    fn run(&mut self, bytes: &[u8], include: &str) -> Result<(), ErrorImpl> {
        let container = ShaderContainer::parse(bytes)?;
        self.is_pixel_shader = container.is_pixel_shader();

        let constant_table = ConstantTable::parse(bytes, container.constant_table_offset as usize)?;
        self.classify_constants(&constant_table)?;

        let stage = ShaderStageInfo::parse(
            bytes,
            container.shader_offset as usize,
            self.is_pixel_shader,
        )?;

        if let ShaderStageInfo::Vertex(tail) = &stage {
            for element in &tail.vertex_elements {
                self.vertex_elements.insert(element.address, *element);
            }
        }

        let definitions = if container.definition_table_offset != 0 {
            Some(DefinitionTable::parse(
                bytes,
                container.definition_table_offset as usize,
            )?)
        } else {
            None
        };

        let header = *stage.header();
        let code = microcode_words(bytes, &container, header.physical_offset, header.size)?;

        self.out.push_str(include);
        self.out.push('\n');

        self.emit_constant_macros(&constant_table);
        self.emit_bool_defines(&constant_table);
        self.emit_io_structs(&stage)?;
        self.emit_entry_decl(&stage);
        self.emit_prologue(bytes, &container, &stage, definitions.as_ref())?;

        let flow = self.analyze_control_flow(&code, header.size)?;
        self.emit_body(&code, &flow)?;

        Ok(())
    }

    fn classify_constants(&mut self, table: &ConstantTable) -> Result<(), ErrorImpl> {
        for info in &table.constants {
            if self.is_pixel_shader {
                if info.name == "g_MtxPrevInvViewProjection" {
                    self.has_mtx_prev_inv_view_projection = true;
                }
            } else {
                match info.name.as_str() {
                    "g_MtxProjection" => self.has_mtx_projection = true,
                    "g_InstanceTypes" => self.is_meta_instancer = true,
                    "g_IndexCount" => self.has_index_count = true,
                    _ => (),
                }
            }

            match info.register_set {
                RegisterSet::Float4 => {
                    for i in 0..info.register_count {
                        self.float4_constants.insert(
                            u32::from(info.register_index + i),
                            Float4Constant {
                                name: info.name.clone(),
                                register_index: info.register_index,
                                register_count: info.register_count,
                            },
                        );
                    }
                }
                RegisterSet::Bool => {
                    self.bool_constants
                        .insert(u32::from(info.register_index), info.name.clone());
                }
                RegisterSet::Sampler => {
                    self.samplers
                        .insert(u32::from(info.register_index), info.name.clone());
                }
                RegisterSet::Int4 => {
                    return Err(ErrorImpl::UnsupportedConstant(info.name.clone()));
                }
            }
        }

        Ok(())
    }

    pub(crate) fn indent(&mut self) {
        for _ in 0..self.indentation {
            self.out.push('\t');
        }
    }

    pub(crate) fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }

    pub(crate) fn print(&mut self, args: std::fmt::Arguments<'_>) {
        // Writing into a String cannot fail.
        self.out.write_fmt(args).unwrap();
    }

    pub(crate) fn println(&mut self, args: std::fmt::Arguments<'_>) {
        self.print(args);
        self.out.push('\n');
    }
}

/// Reads the shader's microcode as byteswapped dwords.
///
/// The microcode starts at `physical_offset` inside the physical region and
/// spans `size` bytes covering both the control-flow program and the data
/// instructions it points into.
fn microcode_words(
    bytes: &[u8],
    container: &ShaderContainer,
    physical_offset: u32,
    size: u32,
) -> Result<Vec<u32>, EofError> {
    let start = container.virtual_size as usize + physical_offset as usize;
    let end = start + size as usize;

    let code = bytes.get(start..end).ok_or(EofError {
        on: "microcode",
        offset: start,
    })?;

    // If the region is word-aligned the slice can be cast in place and only
    // byteswapped; otherwise the words are reassembled bytewise.
    let words = match bytemuck::try_cast_slice::<_, u32>(code) {
        Ok(words) => words.iter().copied().map(u32::from_be).collect(),
        Err(_) => code
            .chunks_exact(4)
            .map(|chunk| u32::from_be_bytes(chunk.try_into().unwrap()))
            .collect(),
    };

    Ok(words)
}
