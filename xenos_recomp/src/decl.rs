//! Declaration emission: constant macros for the three dialects, input and
//! output structs, the entry point signature and the register prologue.

use xenos_shader::container::{
    ConstantTable, DeclUsage, DefinitionTable, PixelShaderOutputs, RegisterSet, ShaderContainer,
    ShaderStageInfo,
};
use xenos_shader::reader::{EofError, Reader};

use crate::{ErrorImpl, Recompiler, SpecConstants, SWIZZLES};

pub(crate) const USAGE_TYPES: [&str; 14] = [
    "float4", // POSITION
    "float4", // BLENDWEIGHT
    "uint4",  // BLENDINDICES
    "float4", // NORMAL
    "float4", // PSIZE
    "float4", // TEXCOORD
    "float4", // TANGENT
    "float4", // BINORMAL
    "float4", // TESSFACTOR
    "float4", // POSITIONT
    "float4", // COLOR
    "float4", // FOG
    "float4", // DEPTH
    "float4", // SAMPLE
];

pub(crate) const USAGE_VARIABLES: [&str; 14] = [
    "Position",
    "BlendWeight",
    "BlendIndices",
    "Normal",
    "PointSize",
    "TexCoord",
    "Tangent",
    "Binormal",
    "TessFactor",
    "PositionT",
    "Color",
    "Fog",
    "Depth",
    "Sample",
];

pub(crate) const USAGE_SEMANTICS: [&str; 14] = [
    "POSITION",
    "BLENDWEIGHT",
    "BLENDINDICES",
    "NORMAL",
    "PSIZE",
    "TEXCOORD",
    "TANGENT",
    "BINORMAL",
    "TESSFACTOR",
    "POSITIONT",
    "COLOR",
    "FOG",
    "DEPTH",
    "SAMPLE",
];

/// Stable Vulkan attribute locations per usage/usage-index pair.
const USAGE_LOCATIONS: [(DeclUsage, u32, u32); 20] = [
    (DeclUsage::Position, 0, 0),
    (DeclUsage::Position, 1, 1),
    (DeclUsage::Position, 2, 2),
    (DeclUsage::Position, 3, 3),
    (DeclUsage::Normal, 0, 4),
    (DeclUsage::Normal, 1, 5),
    (DeclUsage::Normal, 2, 6),
    (DeclUsage::Normal, 3, 7),
    (DeclUsage::Tangent, 0, 8),
    (DeclUsage::Tangent, 1, 9),
    (DeclUsage::Tangent, 2, 10),
    (DeclUsage::Tangent, 3, 11),
    (DeclUsage::Binormal, 0, 12),
    (DeclUsage::TexCoord, 0, 13),
    (DeclUsage::TexCoord, 1, 14),
    (DeclUsage::TexCoord, 2, 15),
    (DeclUsage::TexCoord, 3, 16),
    (DeclUsage::Color, 0, 17),
    (DeclUsage::BlendIndices, 0, 18),
    (DeclUsage::BlendWeight, 0, 19),
];

/// The fixed VS->PS varying slots.
pub(crate) const INTERPOLATORS: [(DeclUsage, u32); 18] = [
    (DeclUsage::TexCoord, 0),
    (DeclUsage::TexCoord, 1),
    (DeclUsage::TexCoord, 2),
    (DeclUsage::TexCoord, 3),
    (DeclUsage::TexCoord, 4),
    (DeclUsage::TexCoord, 5),
    (DeclUsage::TexCoord, 6),
    (DeclUsage::TexCoord, 7),
    (DeclUsage::TexCoord, 8),
    (DeclUsage::TexCoord, 9),
    (DeclUsage::TexCoord, 10),
    (DeclUsage::TexCoord, 11),
    (DeclUsage::TexCoord, 12),
    (DeclUsage::TexCoord, 13),
    (DeclUsage::TexCoord, 14),
    (DeclUsage::TexCoord, 15),
    (DeclUsage::Color, 0),
    (DeclUsage::Color, 1),
];

pub(crate) const TEXTURE_DIMENSIONS: [&str; 3] = ["2D", "2DArray", "Cube"];

fn usage_location(usage: DeclUsage, usage_index: u32) -> Option<u32> {
    USAGE_LOCATIONS
        .iter()
        .find(|(u, i, _)| *u == usage && *i == usage_index)
        .map(|(_, _, location)| *location)
}

impl Recompiler {
    fn stage_name(&self) -> &'static str {
        if self.is_pixel_shader {
            "Pixel"
        } else {
            "Vertex"
        }
    }

    /// Highest float4 register for this stage; array macros clamp to it.
    fn float4_tail(&self, register_index: u16) -> u32 {
        let bank = if self.is_pixel_shader { 224 } else { 256 };
        bank - u32::from(register_index)
    }

    pub(crate) fn emit_constant_macros(&mut self, table: &ConstantTable) {
        self.push("#ifdef __spirv__\n\n");

        for info in &table.constants {
            match info.register_set {
                RegisterSet::Float4 => {
                    if info.register_count > 1 {
                        let tail = self.float4_tail(info.register_index);
                        self.println(format_args!(
                            "#define {}(INDEX) selectWrapper((INDEX) < {}, vk::RawBufferLoad<float4>(g_PushConstants.{}ShaderConstants + ({} + min(INDEX, {})) * 16, 0x10), 0.0)",
                            info.name,
                            tail,
                            self.stage_name(),
                            info.register_index,
                            tail - 1,
                        ));
                    } else {
                        self.println(format_args!(
                            "#define {} vk::RawBufferLoad<float4>(g_PushConstants.{}ShaderConstants + {}, 0x10)",
                            info.name,
                            self.stage_name(),
                            u32::from(info.register_index) * 16,
                        ));
                    }
                }
                RegisterSet::Sampler => {
                    for (i, dimension) in TEXTURE_DIMENSIONS.iter().enumerate() {
                        self.println(format_args!(
                            "#define {}_Texture{}DescriptorIndex vk::RawBufferLoad<uint>(g_PushConstants.SharedConstants + {})",
                            info.name,
                            dimension,
                            i as u32 * 64 + u32::from(info.register_index) * 4,
                        ));
                    }

                    self.println(format_args!(
                        "#define {}_SamplerDescriptorIndex vk::RawBufferLoad<uint>(g_PushConstants.SharedConstants + {})",
                        info.name,
                        TEXTURE_DIMENSIONS.len() as u32 * 64 + u32::from(info.register_index) * 4,
                    ));
                }
                _ => (),
            }
        }

        self.push("\n#elif defined(__air__)\n\n");

        for info in &table.constants {
            match info.register_set {
                RegisterSet::Float4 => {
                    if info.register_count > 1 {
                        let tail = self.float4_tail(info.register_index);
                        self.println(format_args!(
                            "#define {}(INDEX) selectWrapper((INDEX) < {}, (*(reinterpret_cast<device float4*>(g_PushConstants.{}ShaderConstants + ({} + min(INDEX, {})) * 16))), 0.0)",
                            info.name,
                            tail,
                            self.stage_name(),
                            info.register_index,
                            tail - 1,
                        ));
                    } else {
                        self.println(format_args!(
                            "#define {} (*(reinterpret_cast<device float4*>(g_PushConstants.{}ShaderConstants + {})))",
                            info.name,
                            self.stage_name(),
                            u32::from(info.register_index) * 16,
                        ));
                    }
                }
                RegisterSet::Sampler => {
                    for (i, dimension) in TEXTURE_DIMENSIONS.iter().enumerate() {
                        self.println(format_args!(
                            "#define {}_Texture{}DescriptorIndex (*(reinterpret_cast<device uint*>(g_PushConstants.SharedConstants + {})))",
                            info.name,
                            dimension,
                            i as u32 * 64 + u32::from(info.register_index) * 4,
                        ));
                    }

                    self.println(format_args!(
                        "#define {}_SamplerDescriptorIndex (*(reinterpret_cast<device uint*>(g_PushConstants.SharedConstants + {})))",
                        info.name,
                        TEXTURE_DIMENSIONS.len() as u32 * 64 + u32::from(info.register_index) * 4,
                    ));
                }
                _ => (),
            }
        }

        self.push("\n#else\n\n");

        self.println(format_args!(
            "cbuffer {}ShaderConstants : register(b{}, space4)",
            self.stage_name(),
            if self.is_pixel_shader { 1 } else { 0 },
        ));
        self.push("{\n");

        for info in &table.constants {
            if info.register_set != RegisterSet::Float4 {
                continue;
            }

            self.print(format_args!("\tfloat4 {}", info.name));
            if info.register_count > 1 {
                self.print(format_args!("[{}]", info.register_count));
            }
            self.println(format_args!(" : packoffset(c{});", info.register_index));

            if info.register_count > 1 {
                let tail = self.float4_tail(info.register_index);
                self.println(format_args!(
                    "#define {0}(INDEX) selectWrapper((INDEX) < {1}, {0}[min(INDEX, {2})], 0.0)",
                    info.name,
                    tail,
                    tail - 1,
                ));
            }
        }

        self.push("};\n\n");

        self.push("cbuffer SharedConstants : register(b2, space4)\n");
        self.push("{\n");

        for info in &table.constants {
            if info.register_set != RegisterSet::Sampler {
                continue;
            }

            let register = u32::from(info.register_index);
            for (i, dimension) in TEXTURE_DIMENSIONS.iter().enumerate() {
                self.println(format_args!(
                    "\tuint {}_Texture{}DescriptorIndex : packoffset(c{}.{});",
                    info.name,
                    dimension,
                    i as u32 * 4 + register / 4,
                    SWIZZLES[register as usize % 4],
                ));
            }

            self.println(format_args!(
                "\tuint {}_SamplerDescriptorIndex : packoffset(c{}.{});",
                info.name,
                4 * TEXTURE_DIMENSIONS.len() as u32 + register / 4,
                SWIZZLES[register as usize % 4],
            ));
        }

        self.push("\tDEFINE_SHARED_CONSTANTS();\n");
        self.push("};\n\n");

        self.push("#endif\n");
    }

    pub(crate) fn emit_bool_defines(&mut self, table: &ConstantTable) {
        for info in &table.constants {
            if info.register_set == RegisterSet::Bool {
                let bit = u32::from(info.register_index) + if self.is_pixel_shader { 16 } else { 0 };
                self.println(format_args!("#define {} (1 << {})", info.name, bit));
            }
        }

        self.out.push('\n');
    }

    fn vertex_element_type(&self, usage: DeclUsage, usage_index: u32) -> &'static str {
        // Meta instancers carry packed instance data in TexCoord2; Position1
        // is a packed index stream. Both read as uint4.
        if (usage == DeclUsage::TexCoord && usage_index == 2 && self.is_meta_instancer)
            || (usage == DeclUsage::Position && usage_index == 1)
        {
            "uint4"
        } else {
            USAGE_TYPES[usage.as_usize()]
        }
    }

    pub(crate) fn emit_io_structs(&mut self, stage: &ShaderStageInfo) -> Result<(), ErrorImpl> {
        self.println(format_args!(
            "struct {}",
            if self.is_pixel_shader {
                "Interpolators"
            } else {
                "VertexShaderInput"
            }
        ));
        self.push("{\n");

        match stage {
            ShaderStageInfo::Pixel(_) => {
                self.push("#ifdef __air__\n");
                self.push("\tfloat4 iPos [[position]];\n");
                for (usage, index) in INTERPOLATORS {
                    self.println(format_args!(
                        "\tfloat4 i{0}{1} [[user({2}{1})]];",
                        USAGE_VARIABLES[usage.as_usize()],
                        index,
                        USAGE_SEMANTICS[usage.as_usize()],
                    ));
                }

                self.push("#else\n");
                self.push("\tfloat4 iPos : SV_Position;\n");
                for (usage, index) in INTERPOLATORS {
                    self.println(format_args!(
                        "\tfloat4 i{0}{1} : {2}{1};",
                        USAGE_VARIABLES[usage.as_usize()],
                        index,
                        USAGE_SEMANTICS[usage.as_usize()],
                    ));
                }

                self.push("#endif\n");
            }
            ShaderStageInfo::Vertex(tail) => {
                self.push("#ifdef __air__\n");
                for element in &tail.vertex_elements {
                    let location = usage_location(element.usage, element.usage_index).ok_or(
                        ErrorImpl::UnmappedVertexAttribute {
                            usage: element.usage,
                            usage_index: element.usage_index,
                        },
                    )?;

                    self.println(format_args!(
                        "\t{} i{}{} [[attribute({})]];",
                        self.vertex_element_type(element.usage, element.usage_index),
                        USAGE_VARIABLES[element.usage.as_usize()],
                        element.usage_index,
                        location,
                    ));
                }

                self.push("#else\n");
                for element in &tail.vertex_elements {
                    // Checked above.
                    let location = usage_location(element.usage, element.usage_index).unwrap();

                    self.println(format_args!(
                        "\t[[vk::location({})]] {} i{2}{3} : {4}{3};",
                        location,
                        self.vertex_element_type(element.usage, element.usage_index),
                        USAGE_VARIABLES[element.usage.as_usize()],
                        element.usage_index,
                        USAGE_SEMANTICS[element.usage.as_usize()],
                    ));
                }

                self.push("#endif\n");
            }
        }

        self.push("};\n");

        self.println(format_args!(
            "struct {}",
            if self.is_pixel_shader {
                "PixelShaderOutput"
            } else {
                "Interpolators"
            }
        ));
        self.push("{\n");

        match stage {
            ShaderStageInfo::Pixel(tail) => {
                self.push("#ifdef __air__\n");
                for i in 0..4 {
                    if tail.outputs.bits() & (1 << i) != 0 {
                        self.println(format_args!("\tfloat4 oC{0} [[color({0})]];", i));
                    }
                }
                if tail.outputs.contains(PixelShaderOutputs::DEPTH) {
                    self.push("\tfloat oDepth [[depth(any)]];\n");
                }

                self.push("#else\n");
                for i in 0..4 {
                    if tail.outputs.bits() & (1 << i) != 0 {
                        self.println(format_args!("\tfloat4 oC{0} : SV_Target{0};", i));
                    }
                }
                if tail.outputs.contains(PixelShaderOutputs::DEPTH) {
                    self.push("\tfloat oDepth : SV_Depth;\n");
                }

                self.push("#endif\n");
            }
            ShaderStageInfo::Vertex(_) => {
                self.push("#ifdef __air__\n");
                self.push("\tfloat4 oPos [[position]] [[invariant]];\n");
                for (usage, index) in INTERPOLATORS {
                    self.println(format_args!(
                        "\tfloat4 o{0}{1} [[user({2}{1})]];",
                        USAGE_VARIABLES[usage.as_usize()],
                        index,
                        USAGE_SEMANTICS[usage.as_usize()],
                    ));
                }
                self.push("\tfloat clipDistance [[clip_distance]];\n");

                self.push("#else\n");
                self.push("\tprecise float4 oPos : SV_Position;\n");
                for (usage, index) in INTERPOLATORS {
                    self.println(format_args!(
                        "\tfloat4 o{0}{1} : {2}{1};",
                        USAGE_VARIABLES[usage.as_usize()],
                        index,
                        USAGE_SEMANTICS[usage.as_usize()],
                    ));
                }
                self.push("\tfloat clipDistance : SV_ClipDistance;\n");

                self.push("#endif\n");
            }
        }

        self.push("};\n");
        Ok(())
    }

    pub(crate) fn emit_entry_decl(&mut self, stage: &ShaderStageInfo) {
        let depth_written = match stage {
            ShaderStageInfo::Pixel(tail) => tail.outputs.contains(PixelShaderOutputs::DEPTH),
            ShaderStageInfo::Vertex(_) => false,
        };

        self.push("#ifdef __air__\n");
        if self.is_pixel_shader {
            self.push("[[fragment]]\n");
            if !depth_written {
                self.push("[[early_fragment_tests]]\n");
            }
        } else {
            self.push("[[vertex]]\n");
        }

        self.push("#else\n");
        self.push("#if !defined(__spirv__)\n");
        if self.is_pixel_shader {
            self.push("[shader(\"pixel\")]\n");
        } else {
            self.push("[shader(\"vertex\")]\n");
        }
        self.push("#endif\n");

        if self.is_pixel_shader && !depth_written {
            self.push("[earlydepthstencil]\n");
        }

        self.push("#endif\n");

        self.println(format_args!(
            "{} shaderMain(",
            if self.is_pixel_shader {
                "PixelShaderOutput"
            } else {
                "Interpolators"
            }
        ));

        if self.is_pixel_shader {
            self.push("#ifdef __air__\n");
            self.push("\tInterpolators input [[stage_in]],\n");
            self.push("\tbool iFace [[front_facing]],\n");
            self.push("\tconstant Texture2DDescriptorHeap* g_Texture2DDescriptorHeap [[buffer(0)]],\n");
            self.push(
                "\tconstant Texture2DArrayDescriptorHeap* g_Texture2DArrayDescriptorHeap [[buffer(1)]],\n",
            );
            self.push(
                "\tconstant TextureCubeDescriptorHeap* g_TextureCubeDescriptorHeap [[buffer(2)]],\n",
            );
            self.push("\tconstant SamplerDescriptorHeap* g_SamplerDescriptorHeap [[buffer(3)]],\n");
            self.push("\tconstant PushConstants& g_PushConstants [[buffer(8)]]\n");
            self.push("#else\n");
            self.push("\tInterpolators input,\n");
            self.push("#ifdef __spirv__\n");
            self.push("\tin bool iFace : SV_IsFrontFace\n");
            self.push("#else\n");
            self.push("\tin uint iFace : SV_IsFrontFace\n");
            self.push("#endif\n");
            self.push("\n#endif\n");
        } else {
            self.push("#ifdef __air__\n");
            self.push("\tconstant PushConstants& g_PushConstants [[buffer(8)]],\n");
            self.push("\tVertexShaderInput input [[stage_in]]\n");
            self.push("#else\n");
            self.push("\tVertexShaderInput input\n");
            self.push("#endif\n");

            if self.has_index_count {
                self.push("\t,\n");
                self.push("#ifdef __air__\n");
                self.push("\tuint iVertexId [[vertex_id]],\n");
                self.push("\tuint iInstanceId [[instance_id]]\n");
                self.push("#else\n");
                self.push("\tin uint iVertexId : SV_VertexID,\n");
                self.push("\tin uint iInstanceId : SV_InstanceID\n");
                self.push("#endif\n");
            }
        }

        self.push(")\n");
        self.push("{\n");
    }

    pub(crate) fn emit_prologue(
        &mut self,
        bytes: &[u8],
        container: &ShaderContainer,
        stage: &ShaderStageInfo,
        definitions: Option<&DefinitionTable>,
    ) -> Result<(), ErrorImpl> {
        let output_name = if self.is_pixel_shader {
            "PixelShaderOutput"
        } else {
            "Interpolators"
        };

        self.push("#ifdef __air__\n");
        self.println(format_args!("\t{0} output = {0}{{}};", output_name));
        self.push("#else\n");
        self.println(format_args!("\t{0} output = ({0})0;", output_name));
        self.push("#endif\n");

        if self.has_mtx_projection {
            self.spec_constants |= SpecConstants::REVERSE_Z;

            self.push("\toutput.oPos = 0.0;\n");
            self.push("\tfloat4x4 mtxProjection = float4x4(g_MtxProjection(0), g_MtxProjection(1), g_MtxProjection(2), g_MtxProjection(3));\n");
            self.push("\tfloat4x4 mtxProjectionReverseZ = mul(mtxProjection, float4x4(1, 0, 0, 0, 0, 1, 0, 0, 0, 0, -1, 0, 0, 0, 1, 1));\n");
            self.push("\tUNROLL for (int iterationIndex = 0; iterationIndex < 2; iterationIndex++)\n");
            self.push("\t{\n");
        }

        if let Some(definitions) = definitions {
            self.emit_literal_definitions(bytes, container, definitions)?;
            self.out.push('\n');
        }

        let mut printed_registers = [false; 32];

        match stage {
            ShaderStageInfo::Pixel(tail) => {
                for interpolator in &tail.interpolators {
                    self.println(format_args!(
                        "\tfloat4 r{} = input.i{}{};",
                        interpolator.register,
                        USAGE_VARIABLES[interpolator.usage.as_usize()],
                        interpolator.usage_index,
                    ));
                    printed_registers[interpolator.register as usize & 31] = true;
                }
            }
            ShaderStageInfo::Vertex(tail) => {
                for (i, interpolator) in tail.interpolators.iter().enumerate() {
                    self.interpolators.insert(
                        i as u32,
                        format!(
                            "output.o{}{}",
                            USAGE_VARIABLES[interpolator.usage.as_usize()],
                            interpolator.usage_index,
                        ),
                    );
                }
            }
        }

        if !self.is_pixel_shader {
            if !self.has_mtx_projection {
                self.push("\toutput.oPos = 0.0;\n");
            }

            for (usage, index) in INTERPOLATORS {
                self.println(format_args!(
                    "\toutput.o{}{} = 0.0;",
                    USAGE_VARIABLES[usage.as_usize()],
                    index,
                ));
            }

            self.out.push('\n');
        }

        let position_register = stage.header().position_register();

        for i in 0..32 {
            if printed_registers[i] {
                continue;
            }

            self.print(format_args!("\tfloat4 r{} = ", i));
            if self.is_pixel_shader && i as u32 == position_register {
                self.push("float4((input.iPos.xy - 0.5) * float2(iFace ? 1.0 : -1.0, 1.0), 0.0, 0.0);\n");
            } else if !self.is_pixel_shader && self.has_index_count && i == 0 {
                self.push("float4(iVertexId + g_IndexCount.x * iInstanceId, 0.0, 0.0, 0.0);\n");
            } else {
                self.push("0.0;\n");
            }
        }

        self.push("\tint a0 = 0;\n");
        self.push("\tint aL = 0;\n");
        self.push("\tbool p0 = false;\n");
        self.push("\tfloat ps = 0.0;\n");
        if self.is_pixel_shader {
            self.push("\tfloat2 pixelCoord = 0.0;\n");
        }

        Ok(())
    }

    fn emit_literal_definitions(
        &mut self,
        bytes: &[u8],
        container: &ShaderContainer,
        definitions: &DefinitionTable,
    ) -> Result<(), EofError> {
        let register_bias = if self.is_pixel_shader { 256 } else { 0 };

        for definition in &definitions.float4 {
            let offset =
                container.virtual_size as usize + definition.physical_offset as usize;
            let mut values = Reader::at(bytes, offset);

            for i in 0..(u32::from(definition.count) + 3) / 4 {
                let value = [
                    values.u32("float4_literal")?,
                    values.u32("float4_literal")?,
                    values.u32("float4_literal")?,
                    values.u32("float4_literal")?,
                ];

                let register = i32::from(definition.register_index) + i as i32 - register_bias;

                self.push("#ifdef __air__\n");
                self.println(format_args!(
                    "\tfloat4 c{} = as_type<float4>(uint4(0x{:X}, 0x{:X}, 0x{:X}, 0x{:X}));",
                    register, value[0], value[1], value[2], value[3],
                ));
                self.push("#else\n");
                self.println(format_args!(
                    "\tfloat4 c{} = asfloat(uint4(0x{:X}, 0x{:X}, 0x{:X}, 0x{:X}));",
                    register, value[0], value[1], value[2], value[3],
                ));
                self.push("#endif\n");
            }
        }

        for definition in &definitions.int4 {
            for (i, value) in definition.values.iter().enumerate() {
                let register = (i32::from(definition.register_index) - 8992) / 4 + i as i32;

                self.println(format_args!(
                    "\tint4 i{} = int4({}, {}, {}, {});",
                    register,
                    *value as u8 as i8,
                    (*value >> 8) as u8 as i8,
                    (*value >> 16) as u8 as i8,
                    (*value >> 24) as u8 as i8,
                ));
            }
        }

        Ok(())
    }
}
