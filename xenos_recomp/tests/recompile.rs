//! End-to-end recompiles over synthetic shader containers.

use xenos_recomp::{Recompiler, RecompiledShader, SpecConstants};

const INCLUDE: &str = "// xenos shader helpers\n";

const BOOL: u16 = 0;
const INT4: u16 = 1;
const FLOAT4: u16 = 2;
const SAMPLER: u16 = 3;

const POSITION: u32 = 0;
const NORMAL: u32 = 3;
const TEXCOORD: u32 = 5;

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Assembles a complete big-endian shader container.
#[derive(Default)]
struct ContainerBuilder {
    pixel_shader: bool,
    constants: Vec<(String, u16, u16, u16)>,
    vertex_elements: Vec<u32>,
    interpolators: Vec<u32>,
    outputs: u32,
    field_c: u32,
    control_flow: Vec<u64>,
    data: Vec<[u32; 3]>,
    float4_defs: Vec<(u16, u16, Vec<u32>)>,
    int4_defs: Vec<(u16, Vec<u32>)>,
}

impl ContainerBuilder {
    fn vertex() -> Self {
        Self::default()
    }

    fn pixel() -> Self {
        Self {
            pixel_shader: true,
            outputs: 0x1,
            ..Self::default()
        }
    }

    fn constant(mut self, name: &str, set: u16, index: u16, count: u16) -> Self {
        self.constants.push((name.to_owned(), set, index, count));
        self
    }

    fn vertex_element(mut self, address: u32, usage: u32, usage_index: u32) -> Self {
        self.vertex_elements
            .push(address | usage << 12 | usage_index << 16);
        self
    }

    fn interpolator(mut self, usage: u32, usage_index: u32, register: u32) -> Self {
        self.interpolators
            .push(usage_index | usage << 4 | register << 8);
        self
    }

    fn outputs(mut self, outputs: u32) -> Self {
        self.outputs = outputs;
        self
    }

    fn position_register(mut self, register: u32) -> Self {
        self.field_c = register << 8;
        self
    }

    fn control_flow(mut self, op: u64) -> Self {
        self.control_flow.push(op);
        self
    }

    fn data(mut self, words: [u32; 3]) -> Self {
        self.data.push(words);
        self
    }

    fn float4_def(mut self, register: u16, count: u16, values: Vec<u32>) -> Self {
        assert_eq!(values.len(), (count as usize + 3) / 4 * 4);
        self.float4_defs.push((register, count, values));
        self
    }

    fn int4_def(mut self, register: u16, values: Vec<u32>) -> Self {
        self.int4_defs.push((register, values));
        self
    }

    /// Index of the first data slot; exec addresses point past the
    /// control-flow slots.
    fn data_base(&self) -> u64 {
        ((self.control_flow.len() + 1) / 2) as u64
    }

    fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; 36];

        // Constant table container.
        let constant_table_offset = out.len() as u32;
        put_u32(&mut out, 0);

        let info_offset = 28u32;
        let names_offset = info_offset + self.constants.len() as u32 * 20;

        put_u32(&mut out, 28); // size
        put_u32(&mut out, 0); // creator
        put_u32(&mut out, 0); // version
        put_u32(&mut out, self.constants.len() as u32);
        put_u32(&mut out, info_offset);
        put_u32(&mut out, 0); // flags
        put_u32(&mut out, 0); // target

        let mut name_offset = names_offset;
        for (name, set, index, count) in &self.constants {
            put_u32(&mut out, name_offset);
            put_u16(&mut out, *set);
            put_u16(&mut out, *index);
            put_u16(&mut out, *count);
            put_u16(&mut out, 0); // reserved
            put_u32(&mut out, 0); // type info
            put_u32(&mut out, 0); // default value
            name_offset += name.len() as u32 + 1;
        }

        for (name, ..) in &self.constants {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }

        while out.len() % 4 != 0 {
            out.push(0);
        }

        // Definition table.
        let mut definition_table_offset = 0;
        if !self.float4_defs.is_empty() || !self.int4_defs.is_empty() {
            definition_table_offset = out.len() as u32;

            for _ in 0..5 {
                put_u32(&mut out, 0);
            }

            let mut physical_offset = 0;
            for (register, count, values) in &self.float4_defs {
                put_u16(&mut out, *register);
                put_u16(&mut out, *count);
                put_u32(&mut out, physical_offset);
                physical_offset += values.len() as u32 * 4;
            }
            put_u32(&mut out, 0);

            for (register, values) in &self.int4_defs {
                put_u16(&mut out, *register);
                put_u16(&mut out, values.len() as u16);
                for value in values {
                    put_u32(&mut out, *value);
                }
            }
            put_u32(&mut out, 0);
        }

        // Shader header and stage tail.
        let shader_offset = out.len() as u32;
        let literal_bytes: u32 = self
            .float4_defs
            .iter()
            .map(|(_, _, values)| values.len() as u32 * 4)
            .sum();
        let slots = (self.control_flow.len() + 1) / 2 + self.data.len();

        put_u32(&mut out, literal_bytes); // physical offset of the microcode
        put_u32(&mut out, slots as u32 * 12); // size
        put_u32(&mut out, 0); // field 8
        put_u32(&mut out, self.field_c);
        put_u32(&mut out, 0); // field 10
        put_u32(&mut out, (self.interpolators.len() as u32) << 5);

        if self.pixel_shader {
            put_u32(&mut out, 0); // field 18
            put_u32(&mut out, self.outputs);
            for interpolator in &self.interpolators {
                put_u32(&mut out, *interpolator);
            }
        } else {
            put_u32(&mut out, 0); // field 18: element table starts immediately
            put_u32(&mut out, self.vertex_elements.len() as u32);
            put_u32(&mut out, 0); // field 20
            for element in &self.vertex_elements {
                put_u32(&mut out, *element);
            }
            for interpolator in &self.interpolators {
                put_u32(&mut out, *interpolator);
            }
        }

        let virtual_size = out.len() as u32;

        // Physical region: literal values then microcode.
        for (_, _, values) in &self.float4_defs {
            for value in values {
                put_u32(&mut out, *value);
            }
        }

        for pair in self.control_flow.chunks(2) {
            let low = pair[0];
            let high = pair.get(1).copied().unwrap_or(0);

            put_u32(&mut out, low as u32);
            put_u32(&mut out, ((low >> 32) as u32 & 0xFFFF) | ((high as u32 & 0xFFFF) << 16));
            put_u32(&mut out, (high >> 16) as u32);
        }

        for words in &self.data {
            for word in words {
                put_u32(&mut out, *word);
            }
        }

        let physical_size = out.len() as u32 - virtual_size;

        let flags = 0x102A_1100 | u32::from(!self.pixel_shader);
        out[0..4].copy_from_slice(&flags.to_be_bytes());
        out[4..8].copy_from_slice(&virtual_size.to_be_bytes());
        out[8..12].copy_from_slice(&physical_size.to_be_bytes());
        out[16..20].copy_from_slice(&constant_table_offset.to_be_bytes());
        out[20..24].copy_from_slice(&definition_table_offset.to_be_bytes());
        out[24..28].copy_from_slice(&shader_offset.to_be_bytes());

        out
    }

    fn recompile(&self) -> RecompiledShader {
        Recompiler::new()
            .recompile(&self.build(), INCLUDE)
            .expect("recompilation failed")
    }
}

// Control-flow encoding helpers; the opcode sits in the top nibble of the
// 48-bit word.

fn exec(address: u64, count: u64, sequence: u64) -> u64 {
    address | count << 12 | sequence << 16 | 1 << 44
}

fn exec_end(address: u64, count: u64, sequence: u64) -> u64 {
    address | count << 12 | sequence << 16 | 2 << 44
}

fn loop_start(address: u64, loop_id: u64) -> u64 {
    address | loop_id << 16 | 7 << 44
}

fn loop_end(address: u64, loop_id: u64) -> u64 {
    address | loop_id << 16 | 8 << 44
}

fn cond_jmp_pred(address: u64, condition: bool) -> u64 {
    address | 1 << 14 | u64::from(condition) << 42 | 11 << 44
}

fn cond_jmp_bool(address: u64, bool_address: u64, condition: bool) -> u64 {
    address | bool_address << 34 | u64::from(condition) << 42 | 11 << 44
}

fn cond_jmp_unconditional(address: u64) -> u64 {
    address | 1 << 13 | 11 << 44
}

/// Identity destination swizzle keeping all four lanes.
const DST_XYZW: u32 = 0o3210;

fn vertex_fetch(dst_register: u32, dst_swizzle: u32) -> [u32; 3] {
    [dst_register << 12, dst_swizzle, 0]
}

fn texture_fetch_2d(
    src_register: u32,
    dst_register: u32,
    const_index: u32,
    offset_x: u32,
    offset_y: u32,
) -> [u32; 3] {
    [
        1 | src_register << 5 | dst_register << 12 | const_index << 20 | 0b0100 << 26,
        DST_XYZW,
        1 << 14 | offset_x << 16 | offset_y << 21,
    ]
}

/// ALU instruction assembler with pass-through defaults.
#[derive(Clone)]
struct AluSpec {
    vector_opcode: u32,
    scalar_opcode: u32,
    vector_dest: u32,
    scalar_dest: u32,
    vector_write_mask: u32,
    scalar_write_mask: u32,
    export_data: bool,
    vector_saturate: bool,
    scalar_dest_relative: bool,
    is_predicated: bool,
    predicate_condition: bool,
    // (register, swizzle, select, negate)
    src1: (u32, u32, bool, bool),
    src2: (u32, u32, bool, bool),
    src3: (u32, u32, bool, bool),
}

impl Default for AluSpec {
    fn default() -> Self {
        Self {
            vector_opcode: 0,
            scalar_opcode: 50, // RetainPrev
            vector_dest: 0,
            scalar_dest: 0,
            vector_write_mask: 0,
            scalar_write_mask: 0,
            export_data: false,
            vector_saturate: false,
            scalar_dest_relative: false,
            is_predicated: false,
            predicate_condition: false,
            src1: (0, 0, true, false),
            src2: (0, 0, true, false),
            src3: (0, 0, true, false),
        }
    }
}

impl AluSpec {
    fn encode(&self) -> [u32; 3] {
        let w0 = self.vector_dest
            | self.scalar_dest << 8
            | u32::from(self.scalar_dest_relative) << 14
            | u32::from(self.export_data) << 15
            | self.vector_write_mask << 16
            | self.scalar_write_mask << 20
            | u32::from(self.vector_saturate) << 24
            | self.scalar_opcode << 26;

        let w1 = self.src3.1
            | self.src2.1 << 8
            | self.src1.1 << 16
            | u32::from(self.src3.3) << 24
            | u32::from(self.src2.3) << 25
            | u32::from(self.src1.3) << 26
            | u32::from(self.predicate_condition) << 27
            | u32::from(self.is_predicated) << 28;

        let w2 = self.src3.0
            | self.src2.0 << 8
            | self.src1.0 << 16
            | self.vector_opcode << 24
            | u32::from(self.src3.2) << 29
            | u32::from(self.src2.2) << 30
            | u32::from(self.src1.2) << 31;

        [w0, w1, w2]
    }
}

#[test]
fn minimal_pass_through_vertex_shader() {
    let builder = ContainerBuilder::vertex()
        .constant("g_Mtx", FLOAT4, 0, 4)
        .vertex_element(1, POSITION, 0)
        .interpolator(TEXCOORD, 0, 0)
        .control_flow(exec_end(1, 2, 0b0001))
        .data(vertex_fetch(4, DST_XYZW))
        .data(
            AluSpec {
                vector_opcode: 11, // Mad
                vector_dest: 62,
                vector_write_mask: 0b1111,
                export_data: true,
                src1: (0, 0, false, false),
                src2: (4, 0, true, false),
                src3: (4, 0, true, false),
                ..AluSpec::default()
            }
            .encode(),
        );
    assert_eq!(builder.data_base(), 1);

    let shader = builder.recompile();
    assert!(!shader.is_pixel_shader);

    assert!(shader.source.starts_with(INCLUDE));

    // Declarations.
    assert!(shader
        .source
        .contains("cbuffer VertexShaderConstants : register(b0, space4)"));
    assert!(shader
        .source
        .contains("\tfloat4 g_Mtx[4] : packoffset(c0);"));
    assert!(shader
        .source
        .contains("#define g_Mtx(INDEX) selectWrapper((INDEX) < 256, g_Mtx[min(INDEX, 255)], 0.0)"));
    assert!(shader
        .source
        .contains("\t[[vk::location(0)]] float4 iPosition0 : POSITION0;"));
    assert!(shader.source.contains("\tprecise float4 oPos : SV_Position;"));

    // Body.
    assert!(shader.source.contains("\toutput.oPos = 0.0;\n"));
    assert!(shader
        .source
        .contains("\tr4.xyzw = (float4)((input.iPosition0)).xyzw;"));
    assert!(shader
        .source
        .contains("\toutput.oPos.xyzw = (float4)((g_Mtx(0).xyzw * r4.xyzw + r4.xyzw));"));

    // Epilogue.
    assert!(shader
        .source
        .contains("\tif (g_ClipPlaneEnabled) output.clipDistance = dot(output.oPos, g_ClipPlane);"));
    assert!(shader
        .source
        .contains("\toutput.oPos.xy += g_HalfPixelOffset * output.oPos.w;"));
    assert!(shader.source.contains("\treturn output;\n"));
    assert!(shader.source.ends_with('}'));
}

#[test]
fn recompilation_is_deterministic() {
    let builder = ContainerBuilder::vertex()
        .constant("g_Mtx", FLOAT4, 0, 4)
        .vertex_element(1, POSITION, 0)
        .control_flow(exec_end(1, 1, 0b01))
        .data(vertex_fetch(4, DST_XYZW));

    let bytes = builder.build();
    let first = Recompiler::new().recompile(&bytes, INCLUDE).unwrap();
    let second = Recompiler::new().recompile(&bytes, INCLUDE).unwrap();

    assert_eq!(first.source, second.source);
    assert_eq!(first.spec_constants, second.spec_constants);
}

#[test]
fn pixel_shader_alpha_test_epilogue() {
    let shader = ContainerBuilder::pixel()
        .control_flow(exec_end(0, 0, 0))
        .recompile();

    assert!(shader.is_pixel_shader);
    assert!(shader
        .source
        .contains("BRANCH if (g_SpecConstants() & SPEC_CONSTANT_ALPHA_TEST)"));
    assert!(shader
        .source
        .contains("\tclip(output.oC0.w - g_AlphaThreshold);"));
    assert!(shader
        .source
        .contains("else if (g_SpecConstants() & SPEC_CONSTANT_ALPHA_TO_COVERAGE)"));
    assert!(shader.source.contains("\treturn output;\n"));

    assert!(shader.spec_constants.contains(SpecConstants::ALPHA_TEST));
    assert!(shader
        .spec_constants
        .contains(SpecConstants::ALPHA_TO_COVERAGE));
    assert!(!shader
        .spec_constants
        .contains(SpecConstants::R11G11B10_NORMAL));
}

#[test]
fn swap_controlled_texcoord_fetch() {
    let shader = ContainerBuilder::vertex()
        .vertex_element(1, TEXCOORD, 2)
        .control_flow(exec_end(1, 1, 0b01))
        .data(vertex_fetch(5, DST_XYZW))
        .recompile();

    assert!(shader
        .source
        .contains("swapFloats(g_SwappedTexcoords, (input.iTexCoord2), 2)"));
    assert!(!shader.spec_constants.contains(SpecConstants::R11G11B10_NORMAL));
}

#[test]
fn r11g11b10_normal_fetch() {
    let shader = ContainerBuilder::vertex()
        .vertex_element(1, NORMAL, 0)
        .control_flow(exec_end(1, 1, 0b01))
        .data(vertex_fetch(6, DST_XYZW))
        .recompile();

    assert!(shader
        .source
        .contains("tfetchR11G11B10(asuint(swapFloats(g_SwappedNormals, (input.iNormal0), 0)))"));
    assert!(shader.spec_constants.contains(SpecConstants::R11G11B10_NORMAL));
}

#[test]
fn texture_fetch_resolves_sampler_and_offsets() {
    let shader = ContainerBuilder::pixel()
        .constant("sampAlbedo", SAMPLER, 0, 1)
        .control_flow(exec_end(1, 1, 0b01))
        .data(texture_fetch_2d(0, 1, 0, 1, 0x1F))
        .recompile();

    // Descriptor index macros in all three dialects.
    assert!(shader.source.contains(
        "#define sampAlbedo_Texture2DDescriptorIndex vk::RawBufferLoad<uint>(g_PushConstants.SharedConstants + 0)"
    ));
    assert!(shader.source.contains(
        "\tuint sampAlbedo_Texture2DDescriptorIndex : packoffset(c0.x);"
    ));
    assert!(shader.source.contains(
        "\tuint sampAlbedo_SamplerDescriptorIndex : packoffset(c12.x);"
    ));

    // The primary 2D fetch feeds the alpha-to-coverage mip estimate.
    assert!(shader.source.contains("pixelCoord = getPixelCoord("));

    // Half-texel offsets scale the 5-bit signed fields by 0.5.
    assert!(shader.source.contains(
        "sampAlbedo_Texture2DDescriptorIndex, sampAlbedo_SamplerDescriptorIndex, r0.xy, float2(0.5, -0.5)).xyzw;"
    ));
}

#[test]
fn unknown_sampler_falls_back_to_slot_name() {
    let shader = ContainerBuilder::pixel()
        .control_flow(exec_end(1, 1, 0b01))
        .data(texture_fetch_2d(0, 1, 3, 0, 0))
        .recompile();

    assert!(shader
        .source
        .contains("s3_Texture2DDescriptorIndex, s3_SamplerDescriptorIndex, r0.xy"));
}

#[test]
fn dispatched_control_flow_shape() {
    let shader = ContainerBuilder::pixel()
        .control_flow(cond_jmp_unconditional(1))
        .control_flow(exec_end(0, 0, 0))
        .recompile();

    assert!(shader.source.contains("\tuint pc = 0;\n"));
    assert!(shader.source.contains("\twhile (true)\n"));
    assert!(shader.source.contains("\t\tswitch (pc)\n"));
    assert!(shader.source.contains("\t\tcase 0:\n"));
    assert!(shader.source.contains("\t\tcase 1:\n"));
    assert!(shader.source.contains("\t\t\tpc = 1;\n\t\t\tcontinue;\n"));
    assert!(shader.source.contains("\treturn output;\n}"));
}

#[test]
fn structured_forward_jump_becomes_if() {
    let shader = ContainerBuilder::pixel()
        .control_flow(cond_jmp_pred(2, true))
        .control_flow(exec(0, 0, 0))
        .control_flow(exec_end(0, 0, 0))
        .recompile();

    assert!(!shader.source.contains("switch (pc)"));
    assert!(shader.source.contains("\tif (!p0)\n\t{\n"));
    // The block closes at the jump target, before the epilogue.
    let close = shader.source.find("\t}\n").unwrap();
    let epilogue = shader
        .source
        .find("BRANCH if (g_SpecConstants() & SPEC_CONSTANT_ALPHA_TEST)")
        .unwrap();
    assert!(close < epilogue);
}

#[test]
fn structured_bool_jump_tests_booleans_dword() {
    let shader = ContainerBuilder::pixel()
        .constant("g_HasLightmap", BOOL, 0, 1)
        .control_flow(cond_jmp_bool(2, 0, true))
        .control_flow(exec(0, 0, 0))
        .control_flow(exec_end(0, 0, 0))
        .recompile();

    // Pixel shader bools live in the upper half of the packed dword.
    assert!(shader.source.contains("#define g_HasLightmap (1 << 16)"));
    assert!(shader
        .source
        .contains("\tif ((g_Booleans & g_HasLightmap) == 0)\n\t{\n"));
}

#[test]
fn structured_loop_references_loop_constant() {
    let shader = ContainerBuilder::vertex()
        .control_flow(loop_start(1, 3))
        .control_flow(loop_end(0, 3))
        .control_flow(exec_end(0, 0, 0))
        .recompile();

    // The loop constant is referenced even though i3 is never declared.
    assert!(shader
        .source
        .contains("\tUNROLL for (aL = 0; aL < i3.x; aL++)\n\t{\n"));
}

#[test]
fn dispatched_loop_counts_and_jumps() {
    let shader = ContainerBuilder::vertex()
        .control_flow(cond_jmp_unconditional(1))
        .control_flow(loop_start(2, 3))
        .control_flow(loop_end(1, 3))
        .control_flow(exec_end(0, 0, 0))
        .recompile();

    assert!(shader.source.contains("\t\t\taL = 0;\n"));
    assert!(shader.source.contains("\t\t\t++aL;\n"));
    assert!(shader.source.contains("\t\t\tif (aL < i3.x)\n"));
    assert!(shader.source.contains("\t\t\t{\n\t\t\t\tpc = 1;\n\t\t\t\tcontinue;\n\t\t\t}\n"));
}

#[test]
fn predicated_alu_with_scalar_kill() {
    let shader = ContainerBuilder::pixel()
        .control_flow(exec_end(1, 1, 0))
        .data(
            AluSpec {
                scalar_opcode: 35, // KillsEq
                scalar_write_mask: 0b0001,
                scalar_dest: 2,
                is_predicated: true,
                predicate_condition: false,
                src3: (1, 0, true, false),
                ..AluSpec::default()
            }
            .encode(),
        )
        .recompile();

    assert!(shader.source.contains("\tif (!p0)\n\t{\n"));
    assert!(shader.source.contains("ps = r1.w == 0.0;\n"));
    assert!(shader.source.contains("r2.x = ps;\n"));
    assert!(shader.source.contains("clip(ps != 0.0 ? -1 : 1);\n"));
}

#[test]
fn export_overlap_writes_literal_one() {
    // Vector writes xy, scalar writes yz: the overlap lane y becomes a
    // literal one; with a relative scalar destination lane w zeroes.
    let shader = ContainerBuilder::pixel()
        .control_flow(exec_end(1, 1, 0))
        .data(
            AluSpec {
                vector_opcode: 0, // Add
                vector_dest: 0,
                vector_write_mask: 0b0011,
                scalar_opcode: 0, // Adds
                scalar_write_mask: 0b0110,
                scalar_dest: 0,
                scalar_dest_relative: true,
                export_data: true,
                src1: (1, 0, true, false),
                src2: (2, 0, true, false),
                src3: (3, 0, true, false),
                ..AluSpec::default()
            }
            .encode(),
        )
        .recompile();

    // Masked writes exclude the overlapping lane on both halves.
    assert!(shader.source.contains("\toutput.oC0.x = "));
    assert!(shader.source.contains("\toutput.oC0.z = ps;\n"));
    assert!(shader.source.contains("\toutput.oC0.y = 1.0;\n"));
    assert!(shader.source.contains("\toutput.oC0.w = 0.0;\n"));
}

#[test]
fn literal_definitions_initialize_registers() {
    let shader = ContainerBuilder::vertex()
        .float4_def(252, 1, vec![0x3F80_0000, 0, 0, 0x4000_0000])
        .int4_def(8992, vec![0x0102_03FF])
        .control_flow(exec_end(0, 0, 0))
        .recompile();

    assert!(shader
        .source
        .contains("\tfloat4 c252 = asfloat(uint4(0x3F800000, 0x0, 0x0, 0x40000000));"));
    assert!(shader.source.contains("\tint4 i0 = int4(-1, 3, 2, 1);"));
}

#[test]
fn pixel_literal_registers_rebase_at_256() {
    let shader = ContainerBuilder::pixel()
        .float4_def(258, 1, vec![1, 2, 3, 4])
        .control_flow(exec_end(0, 0, 0))
        .recompile();

    assert!(shader
        .source
        .contains("\tfloat4 c2 = asfloat(uint4(0x1, 0x2, 0x3, 0x4));"));
}

#[test]
fn pixel_position_register_is_seeded() {
    let shader = ContainerBuilder::pixel()
        .position_register(3)
        .control_flow(exec_end(0, 0, 0))
        .recompile();

    assert!(shader.source.contains(
        "\tfloat4 r3 = float4((input.iPos.xy - 0.5) * float2(iFace ? 1.0 : -1.0, 1.0), 0.0, 0.0);"
    ));
}

#[test]
fn empty_vertex_input_still_emits_structs() {
    let shader = ContainerBuilder::vertex()
        .control_flow(exec_end(0, 0, 0))
        .recompile();

    assert!(shader
        .source
        .contains("struct VertexShaderInput\n{\n#ifdef __air__\n#else\n#endif\n};"));
    assert!(shader.source.contains("\toutput.oPos = 0.0;\n"));
    assert!(shader.source.contains("\treturn output;\n"));
}

#[test]
fn pixel_outputs_follow_written_mask() {
    let shader = ContainerBuilder::pixel()
        .outputs(0b10011)
        .control_flow(exec_end(0, 0, 0))
        .recompile();

    assert!(shader.source.contains("\tfloat4 oC0 : SV_Target0;"));
    assert!(shader.source.contains("\tfloat4 oC1 : SV_Target1;"));
    assert!(!shader.source.contains("oC2"));
    assert!(!shader.source.contains("oC3"));
    assert!(shader.source.contains("\tfloat oDepth : SV_Depth;"));
    // Depth writes disable the early-depth attributes.
    assert!(!shader.source.contains("[earlydepthstencil]"));
}

#[test]
fn int4_constants_are_rejected() {
    let bytes = ContainerBuilder::vertex()
        .constant("g_Counts", INT4, 0, 1)
        .control_flow(exec_end(0, 0, 0))
        .build();

    assert!(Recompiler::new().recompile(&bytes, INCLUDE).is_err());
}

#[test]
fn vertex_fetch_without_element_fails() {
    let bytes = ContainerBuilder::vertex()
        .control_flow(exec_end(1, 1, 0b01))
        .data(vertex_fetch(0, DST_XYZW))
        .build();

    assert!(Recompiler::new().recompile(&bytes, INCLUDE).is_err());
}

#[test]
fn export_to_undeclared_interpolator_fails() {
    let bytes = ContainerBuilder::vertex()
        .control_flow(exec_end(1, 1, 0))
        .data(
            AluSpec {
                vector_opcode: 0,
                vector_dest: 5,
                vector_write_mask: 0b1111,
                export_data: true,
                src1: (1, 0, true, false),
                src2: (2, 0, true, false),
                ..AluSpec::default()
            }
            .encode(),
        )
        .build();

    assert!(Recompiler::new().recompile(&bytes, INCLUDE).is_err());
}

#[test]
fn truncated_container_fails() {
    let bytes = ContainerBuilder::vertex()
        .control_flow(exec_end(0, 0, 0))
        .build();

    assert!(Recompiler::new().recompile(&bytes[..40], INCLUDE).is_err());
}

#[test]
fn index_count_seeds_vertex_id_indirection() {
    let shader = ContainerBuilder::vertex()
        .constant("g_IndexCount", FLOAT4, 0, 1)
        .control_flow(exec_end(0, 0, 0))
        .recompile();

    assert!(shader
        .source
        .contains("\tin uint iVertexId : SV_VertexID,"));
    assert!(shader
        .source
        .contains("\tfloat4 r0 = float4(iVertexId + g_IndexCount.x * iInstanceId, 0.0, 0.0, 0.0);"));
}

#[test]
fn projection_matrix_expands_reverse_z() {
    let shader = ContainerBuilder::vertex()
        .constant("g_MtxProjection", FLOAT4, 0, 4)
        .control_flow(exec_end(1, 1, 0))
        .data(
            AluSpec {
                vector_opcode: 15, // Dp4
                vector_dest: 62,
                vector_write_mask: 0b0001,
                export_data: true,
                src1: (0, 0, false, false),
                src2: (1, 0, true, false),
                ..AluSpec::default()
            }
            .encode(),
        )
        .recompile();

    assert!(shader
        .source
        .contains("\tUNROLL for (int iterationIndex = 0; iterationIndex < 2; iterationIndex++)"));
    assert!(shader
        .source
        .contains("if ((g_SpecConstants() & SPEC_CONSTANT_REVERSE_Z) == 0 || iterationIndex == 0)"));
    assert!(shader
        .source
        .contains("(iterationIndex == 0 ? mtxProjectionReverseZ[0] : mtxProjection[0])"));
    assert!(shader.spec_constants.contains(SpecConstants::REVERSE_Z));
    // Termination continues into the second iteration instead of returning.
    assert!(shader.source.contains("\tcontinue;\n"));
    assert!(shader.source.ends_with("\treturn output;\n}"));
}

#[test]
fn vector_write_narrowing_appends_lane_suffix() {
    // Dp4 produces one component written into a single lane.
    let shader = ContainerBuilder::pixel()
        .control_flow(exec_end(1, 1, 0))
        .data(
            AluSpec {
                vector_opcode: 15, // Dp4
                vector_dest: 2,
                vector_write_mask: 0b0001,
                src1: (1, 0, true, false),
                src2: (1, 0, true, false),
                ..AluSpec::default()
            }
            .encode(),
        )
        .recompile();

    assert!(shader
        .source
        .contains("\tr2.x = (float)((dot(r1.xyzw, r1.xyzw)));"));
}
