//! Lowering for vertex-stream and texture fetch instructions.

use xenos_shader::code::{FetchOpcode, TextureDimension, TextureFetch, VertexFetch};
use xenos_shader::container::DeclUsage;

use crate::decl::USAGE_VARIABLES;
use crate::{ErrorImpl, Recompiler, SpecConstants, SWIZZLES};

/// Lane selectors of a fetch destination swizzle.
const SWIZZLE_ZERO: u32 = 4;
const SWIZZLE_ONE: u32 = 5;

fn dest_swizzle(dst_swizzle: u32, index: u32) -> u32 {
    (dst_swizzle >> (index * 3)) & 0x7
}

impl Recompiler {
    /// Prints the kept lanes of a fetch destination swizzle and returns how
    /// many there are. `operand` selects source lanes over destination lanes.
    fn print_dst_swizzle(&mut self, dst_swizzle: u32, operand: bool) -> u32 {
        let mut size = 0;

        for i in 0..4 {
            let swizzle = dest_swizzle(dst_swizzle, i);
            if swizzle <= 3 {
                let lane = if operand { swizzle } else { i };
                self.out.push(SWIZZLES[lane as usize]);
                size += 1;
            }
        }

        size
    }

    /// Constant-zero and constant-one lanes become separate assignments.
    fn print_dst_swizzle_01(&mut self, dst_register: u32, dst_swizzle: u32) {
        for i in 0..4 {
            let swizzle = dest_swizzle(dst_swizzle, i);
            if swizzle == SWIZZLE_ZERO {
                self.indent();
                self.println(format_args!(
                    "r{}.{} = 0.0;",
                    dst_register, SWIZZLES[i as usize]
                ));
            } else if swizzle == SWIZZLE_ONE {
                self.indent();
                self.println(format_args!(
                    "r{}.{} = 1.0;",
                    dst_register, SWIZZLES[i as usize]
                ));
            }
        }
    }

    fn print_src_register(&mut self, register: u32, swizzle: u32, components: u32) {
        self.print(format_args!("r{}.", register));

        for i in 0..components {
            self.out
                .push(SWIZZLES[((swizzle >> (i * 2)) & 0x3) as usize]);
        }
    }

    pub(crate) fn emit_vertex_fetch(
        &mut self,
        instr: &VertexFetch,
        address: u32,
    ) -> Result<(), ErrorImpl> {
        let Some(element) = self.vertex_elements.get(&address).copied() else {
            return Err(ErrorImpl::MissingVertexElement(address));
        };

        if instr.is_predicated {
            self.indent();
            self.println(format_args!(
                "if ({}p0)",
                if instr.predicate_condition { "" } else { "!" }
            ));

            self.indent();
            self.push("{\n");
            self.indentation += 1;
        }

        self.indent();
        self.print(format_args!("r{}.", instr.dst_register));
        let size = self.print_dst_swizzle(instr.dst_swizzle, false);

        self.push(" = ");

        if size <= 1 {
            self.push("(float)(");
        } else {
            self.print(format_args!("(float{})(", size));
        }

        match element.usage {
            DeclUsage::Normal => {
                self.spec_constants |= SpecConstants::R11G11B10_NORMAL;
                self.push("tfetchR11G11B10(asuint(swapFloats(g_SwappedNormals, ");
            }
            DeclUsage::Tangent => {
                self.spec_constants |= SpecConstants::R11G11B10_NORMAL;
                self.push("tfetchR11G11B10(asuint(swapFloats(g_SwappedTangents, ");
            }
            DeclUsage::Binormal => {
                self.spec_constants |= SpecConstants::R11G11B10_NORMAL;
                self.push("tfetchR11G11B10(asuint(swapFloats(g_SwappedBinormals, ");
            }
            DeclUsage::BlendWeight => self.push("swapFloats(g_SwappedBlendWeights, "),
            DeclUsage::TexCoord => self.push("swapFloats(g_SwappedTexcoords, "),
            _ => (),
        }

        self.print(format_args!(
            "(input.i{}{})",
            USAGE_VARIABLES[element.usage.as_usize()],
            element.usage_index,
        ));

        match element.usage {
            DeclUsage::Normal | DeclUsage::Tangent | DeclUsage::Binormal => {
                self.print(format_args!(", {})))", element.usage_index));
            }
            DeclUsage::BlendWeight | DeclUsage::TexCoord => {
                self.print(format_args!(", {})", element.usage_index));
            }
            _ => (),
        }

        self.push(").");
        self.print_dst_swizzle(instr.dst_swizzle, true);

        self.push(";\n");

        self.print_dst_swizzle_01(instr.dst_register, instr.dst_swizzle);

        if instr.is_predicated {
            self.indentation -= 1;
            self.indent();
            self.push("}\n");
        }

        Ok(())
    }

    pub(crate) fn emit_texture_fetch(&mut self, instr: &TextureFetch, bicubic: bool) {
        if instr.is_predicated {
            self.indent();
            self.println(format_args!(
                "if ({}p0)",
                if instr.predicate_condition { "" } else { "!" }
            ));

            self.indent();
            self.push("{\n");
            self.indentation += 1;
        }

        let sampler = match self.samplers.get(&instr.const_index) {
            Some(name) => name.clone(),
            None => format!("s{}", instr.const_index),
        };

        // Depth sourced through the previous frame's inverse view projection
        // is stored inverted.
        let subtract_from_one =
            self.has_mtx_prev_inv_view_projection && sampler == "sampZBuffer";

        if self.is_pixel_shader
            && instr.const_index == 0
            && instr.dimension == TextureDimension::Texture2D
        {
            // The alpha-to-coverage epilogue sharpens against the mip level
            // of the primary texture.
            self.indent();
            self.push("pixelCoord = getPixelCoord(\n");
            self.push("#ifdef __air__\n");
            self.indent();
            self.push("g_Texture2DDescriptorHeap,\n");
            self.push("#endif\n");
            self.indent();
            self.print(format_args!("{}_Texture2DDescriptorIndex, ", sampler));
            self.print_src_register(instr.src_register, instr.src_swizzle, 2);
            self.push(");\n");
        }

        self.indent();
        self.print(format_args!("r{}.", instr.dst_register));
        self.print_dst_swizzle(instr.dst_swizzle, false);

        self.push(" = ");

        match instr.opcode {
            FetchOpcode::GetTextureWeights => self.push("getWeights"),
            _ => {
                if subtract_from_one {
                    self.push("1.0 - ");
                }

                self.push("tfetch");
            }
        }

        let (dimension, components) = match instr.dimension {
            TextureDimension::Texture1D => ("1D", 1),
            TextureDimension::Texture2D => ("2D", 2),
            TextureDimension::Texture3D => ("2DArray", 3),
            TextureDimension::Cube => ("Cube", 3),
        };

        self.push(dimension);

        if bicubic {
            self.push("Bicubic");
        }

        self.push("(\n");

        self.push("#ifdef __air__\n");
        self.indent();
        self.println(format_args!("\tg_Texture{}DescriptorHeap,", dimension));
        self.indent();
        self.push("\tg_SamplerDescriptorHeap,\n");
        self.push("#endif\n");

        self.indent();
        self.print(format_args!(
            "\t{0}_Texture{1}DescriptorIndex, {0}_SamplerDescriptorIndex, ",
            sampler, dimension,
        ));
        self.print_src_register(instr.src_register, instr.src_swizzle, components);

        match instr.dimension {
            TextureDimension::Texture2D => {
                self.print(format_args!(
                    ", float2({}, {})",
                    instr.offset_x as f32 * 0.5,
                    instr.offset_y as f32 * 0.5,
                ));
            }
            TextureDimension::Texture3D => {
                self.print(format_args!(
                    ", float3({}, {}, {})",
                    instr.offset_x as f32 * 0.5,
                    instr.offset_y as f32 * 0.5,
                    instr.offset_z as f32 * 0.5,
                ));
            }
            _ => (),
        }

        self.push(").");

        self.print_dst_swizzle(instr.dst_swizzle, true);

        self.push(";\n");

        self.print_dst_swizzle_01(instr.dst_register, instr.dst_swizzle);

        if instr.is_predicated {
            self.indentation -= 1;
            self.indent();
            self.push("}\n");
        }
    }
}
