//! Control-flow shape analysis and the body walk.
//!
//! A pre-pass decides between the two emission shapes. When every `CondJmp`
//! is a forward conditional the program is emitted as nested `if` blocks
//! closed at the jump targets; any unconditional or backward jump forces the
//! dispatched `while (true) switch (pc)` form.

use tracing::trace;
use xenos_shader::code::{Alu, CoIssue, ControlFlow, Fetch, SLOT_SIZE};
use xenos_shader::reader::EofError;

use crate::{ErrorImpl, Recompiler, SpecConstants};

/// Result of the control-flow pre-pass.
#[derive(Clone, Debug)]
pub(crate) struct FlowInfo {
    pub structured: bool,
    /// Byte size of the control-flow program, truncated to the first
    /// referenced data instruction.
    pub size: u32,
    /// Decoded instructions in program-counter order, two per slot.
    pub ops: Vec<ControlFlow>,
}

pub(crate) fn read_slot(words: &[u32], index: usize) -> Result<[u32; 3], EofError> {
    match words.get(index..index + 3) {
        Some(words) => Ok([words[0], words[1], words[2]]),
        None => Err(EofError {
            on: "microcode",
            offset: index * 4,
        }),
    }
}

impl Recompiler {
    pub(crate) fn analyze_control_flow(
        &mut self,
        code: &[u32],
        size: u32,
    ) -> Result<FlowInfo, ErrorImpl> {
        let mut structured = true;
        let mut ops = Vec::new();

        let mut size = size;
        let mut address = 0;
        let mut slot = 0;

        // Exec addresses point at data slots, so the smallest one bounds the
        // control-flow program.
        while address < size {
            for op in ControlFlow::decode_slot(read_slot(code, slot * 3)?) {
                if let Some((target, _, _)) = op.exec_block() {
                    if target != 0 {
                        size = size.min(target * SLOT_SIZE as u32);
                    }
                }

                if let ControlFlow::CondJmp(jmp) = &op {
                    if jmp.is_unconditional || jmp.direction {
                        structured = false;
                    } else {
                        *self.if_end_labels.entry(jmp.address).or_insert(0) += 1;
                    }
                }

                ops.push(op);
            }

            slot += 1;
            address += SLOT_SIZE as u32;
        }

        Ok(FlowInfo {
            structured,
            size,
            ops,
        })
    }

    pub(crate) fn emit_body(&mut self, code: &[u32], flow: &FlowInfo) -> Result<(), ErrorImpl> {
        if flow.structured {
            self.out.push('\n');
            self.indentation = 1;
        } else {
            self.push("\n\tuint pc = 0;\n");
            self.push("\twhile (true)\n");
            self.push("\t{\n");
            self.push("\t\tswitch (pc)\n");
            self.push("\t\t{\n");
        }

        let mut pc: u32 = 0;
        for slot in 0..flow.size as usize / SLOT_SIZE {
            for half in 0..2 {
                let op = flow.ops[slot * 2 + half];

                if !flow.structured {
                    self.indentation = 3;
                    self.println(format_args!("\t\tcase {}:", pc));
                } else if let Some(count) = self.if_end_labels.get(&pc).copied() {
                    for _ in 0..count {
                        self.indentation -= 1;
                        self.indent();
                        self.push("}\n");
                    }
                }

                pc += 1;

                match &op {
                    ControlFlow::LoopStart(cf) => {
                        if flow.structured {
                            self.indent();
                            self.println(format_args!(
                                "UNROLL for (aL = 0; aL < i{}.x; aL++)",
                                cf.loop_id
                            ));
                            self.indent();
                            self.push("{\n");
                            self.indentation += 1;
                        } else {
                            self.push("\t\t\taL = 0;\n");
                        }
                    }
                    ControlFlow::LoopEnd(cf) => {
                        if flow.structured {
                            self.indentation -= 1;
                            self.indent();
                            self.push("}\n");
                        } else {
                            self.push("\t\t\t++aL;\n");
                            self.println(format_args!("\t\t\tif (aL < i{}.x)", cf.loop_id));
                            self.push("\t\t\t{\n");
                            self.println(format_args!("\t\t\t\tpc = {};", cf.address));
                            self.push("\t\t\t\tcontinue;\n");
                            self.push("\t\t\t}\n");
                        }
                    }
                    ControlFlow::CondJmp(cf) => {
                        if cf.is_unconditional {
                            // The pre-pass forces the dispatched shape for
                            // unconditional jumps.
                            self.println(format_args!("\t\t\tpc = {};", cf.address));
                            self.push("\t\t\tcontinue;\n");
                        } else {
                            self.indent();
                            if cf.is_predicated {
                                self.println(format_args!(
                                    "if ({}p0)",
                                    if cf.condition ^ flow.structured { "" } else { "!" }
                                ));
                            } else if let Some(name) =
                                self.bool_constants.get(&cf.bool_address).cloned()
                            {
                                self.println(format_args!(
                                    "if ((g_Booleans & {}) {}= 0)",
                                    name,
                                    if cf.condition ^ flow.structured { "!" } else { "=" }
                                ));
                            } else {
                                self.println(format_args!(
                                    "if ({})",
                                    if cf.condition ^ flow.structured {
                                        "false"
                                    } else {
                                        "true"
                                    }
                                ));
                            }

                            if flow.structured {
                                self.indent();
                                self.push("{\n");
                                self.indentation += 1;
                            } else {
                                self.push("\t\t\t{\n");
                                self.println(format_args!("\t\t\t\tpc = {};", cf.address));
                                self.push("\t\t\t\tcontinue;\n");
                                self.push("\t\t\t}\n");
                            }
                        }
                    }
                    _ => (),
                }

                if let Some((address, count, sequence)) = op.exec_block() {
                    for (i, is_fetch) in CoIssue::new(sequence, count).enumerate() {
                        let words = read_slot(code, (address as usize + i) * 3)?;

                        if is_fetch {
                            match Fetch::decode(words) {
                                Fetch::Vertex(fetch) => {
                                    self.emit_vertex_fetch(&fetch, address + i as u32)?;
                                }
                                Fetch::Texture(fetch) => {
                                    if fetch.const_index == 10 {
                                        // The global-illumination sampler can
                                        // be upgraded to bicubic filtering.
                                        self.spec_constants |=
                                            SpecConstants::BICUBIC_GI_FILTER;

                                        self.indent();
                                        self.push(
                                            "if (g_SpecConstants() & SPEC_CONSTANT_BICUBIC_GI_FILTER)\n",
                                        );
                                        self.indent();
                                        self.push("{\n");

                                        self.indentation += 1;
                                        self.emit_texture_fetch(&fetch, true);
                                        self.indentation -= 1;

                                        self.indent();
                                        self.push("}\n");
                                        self.indent();
                                        self.push("else\n");
                                        self.indent();
                                        self.push("{\n");

                                        self.indentation += 1;
                                        self.emit_texture_fetch(&fetch, false);
                                        self.indentation -= 1;

                                        self.indent();
                                        self.push("}\n");
                                    } else {
                                        self.emit_texture_fetch(&fetch, false);
                                    }
                                }
                                Fetch::Other(opcode) => {
                                    trace!(opcode, "skipping fetch instruction");
                                }
                            }
                        } else {
                            let alu = Alu::decode(words);
                            self.emit_alu(&alu)?;
                        }
                    }
                }

                if op.terminates() {
                    self.emit_termination(flow.structured);
                }
            }
        }

        if !flow.structured {
            self.push("\t\t\tbreak;\n");
            self.push("\t\t}\n");
            self.push("\t\tbreak;\n");
            self.push("\t}\n");
        }

        if self.has_mtx_projection {
            self.push("\t}\n");
        }

        if !flow.structured || self.has_mtx_projection {
            self.push("\treturn output;\n");
        }

        self.push("}");

        Ok(())
    }

    fn emit_termination(&mut self, structured: bool) {
        if self.is_pixel_shader {
            self.spec_constants |= SpecConstants::ALPHA_TEST;

            self.indent();
            self.push("BRANCH if (g_SpecConstants() & SPEC_CONSTANT_ALPHA_TEST)\n");
            self.indent();
            self.push("{\n");
            self.indent();
            self.push("\tclip(output.oC0.w - g_AlphaThreshold);\n");
            self.indent();
            self.push("}\n");

            self.spec_constants |= SpecConstants::ALPHA_TO_COVERAGE;

            self.indent();
            self.push("else if (g_SpecConstants() & SPEC_CONSTANT_ALPHA_TO_COVERAGE)\n");
            self.indent();
            self.push("{\n");
            self.indent();
            self.push("\toutput.oC0.w *= 1.0 + computeMipLevel(pixelCoord) * 0.25;\n");
            self.indent();
            self.push(
                "\toutput.oC0.w = 0.5 + (output.oC0.w - g_AlphaThreshold) / max(fwidth(output.oC0.w), 1e-6);\n",
            );
            self.indent();
            self.push("}\n");
        } else {
            self.push("\tif (g_ClipPlaneEnabled) output.clipDistance = dot(output.oPos, g_ClipPlane);\n");
            self.push("\toutput.oPos.xy += g_HalfPixelOffset * output.oPos.w;\n");
        }

        if structured {
            self.indent();
            if self.has_mtx_projection {
                self.push("continue;\n");
            } else {
                self.push("return output;\n");
            }
        } else {
            self.push("\t\t\tbreak;\n");
        }
    }
}
