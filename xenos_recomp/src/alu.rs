//! Lowering for the fused vector+scalar ALU instructions.

use tracing::warn;
use xenos_shader::code::{export, Alu, AluScalarOpcode, AluVectorOpcode};

use crate::{ErrorImpl, Recompiler, SWIZZLES};

/// The seven positional operand slots an ALU instruction can read.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Slot {
    Vector0,
    Vector1,
    Vector2,
    Scalar0,
    Scalar1,
    ScalarConstant0,
    ScalarConstant1,
}

/// A formatted source operand and the width it expands to.
struct Operand {
    expression: String,
    components: u32,
}

impl Recompiler {
    fn operand(&self, instr: &Alu, slot: Slot) -> Operand {
        let (reg, swizzle, select, negate, abs) = match slot {
            Slot::ScalarConstant0 => (
                instr.src3_register,
                instr.src3_swizzle,
                false,
                instr.src3_negate,
                instr.abs_constants,
            ),
            Slot::ScalarConstant1 => (
                // The register index is scattered over the opcode LSB, the
                // select bit and the upper swizzle bits.
                (instr.scalar_opcode.map_or(0, AluScalarOpcode::raw) & 1)
                    | u32::from(instr.src3_select) << 1
                    | (instr.src3_swizzle & 0x3C),
                instr.src3_swizzle,
                true,
                instr.src3_negate,
                instr.abs_constants,
            ),
            _ => {
                let (reg, swizzle, select, negate) = match slot {
                    Slot::Vector0 => (
                        instr.src1_register,
                        instr.src1_swizzle,
                        instr.src1_select,
                        instr.src1_negate,
                    ),
                    Slot::Vector1 => (
                        instr.src2_register,
                        instr.src2_swizzle,
                        instr.src2_select,
                        instr.src2_negate,
                    ),
                    _ => (
                        instr.src3_register,
                        instr.src3_swizzle,
                        instr.src3_select,
                        instr.src3_negate,
                    ),
                };

                // A temporary operand folds the absolute-value flag into the
                // top register bit; constants share the instruction-wide bit.
                if select {
                    (reg & 0x3F, swizzle, select, negate, reg & 0x80 != 0)
                } else {
                    (reg, swizzle, select, negate, instr.abs_constants)
                }
            }
        };

        let formatted = if select {
            format!("r{}", reg)
        } else if let Some(constant) = self.float4_constants.get(&reg) {
            if constant.register_count > 1 {
                if self.has_mtx_projection && constant.name == "g_MtxProjection" {
                    format!(
                        "(iterationIndex == 0 ? mtxProjectionReverseZ[{0}] : mtxProjection[{0}])",
                        reg - u32::from(constant.register_index),
                    )
                } else {
                    format!(
                        "{}({}{})",
                        constant.name,
                        reg - u32::from(constant.register_index),
                        if instr.const0_relative {
                            if instr.const_address_register_relative {
                                " + a0"
                            } else {
                                " + aL"
                            }
                        } else {
                            ""
                        },
                    )
                }
            } else {
                constant.name.clone()
            }
        } else {
            format!("c{}", reg)
        };

        let mut expression = String::new();
        let mut components = 0;

        if negate {
            expression.push('-');
        }

        if abs {
            expression.push_str("abs(");
        }

        expression.push_str(&formatted);
        expression.push('.');

        match slot {
            Slot::Vector0 | Slot::Vector1 | Slot::Vector2 => {
                let mask = match instr.vector_opcode {
                    Some(AluVectorOpcode::Dp2Add) => {
                        if slot == Slot::Vector2 {
                            0b1
                        } else {
                            0b11
                        }
                    }
                    Some(AluVectorOpcode::Dp3) => 0b111,
                    Some(AluVectorOpcode::Dp4 | AluVectorOpcode::Max4) => 0b1111,
                    _ => {
                        if instr.vector_write_mask != 0 {
                            instr.vector_write_mask
                        } else {
                            0b1
                        }
                    }
                };

                for i in 0..4 {
                    if (mask >> i) & 1 != 0 {
                        components += 1;
                        // Swizzles encode a per-lane delta from the natural
                        // lane, not an absolute lane index.
                        expression
                            .push(SWIZZLES[(((swizzle >> (i * 2)) + i) & 0x3) as usize]);
                    }
                }
            }
            Slot::Scalar0 | Slot::ScalarConstant0 => {
                components = 1;
                expression.push(SWIZZLES[(((swizzle >> 6) + 3) & 0x3) as usize]);
            }
            Slot::Scalar1 | Slot::ScalarConstant1 => {
                components = 1;
                expression.push(SWIZZLES[(swizzle & 0x3) as usize]);
            }
        }

        if abs {
            expression.push(')');
        }

        Operand {
            expression,
            components,
        }
    }

    pub(crate) fn emit_alu(&mut self, instr: &Alu) -> Result<(), ErrorImpl> {
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

        match instr.vector_opcode {
            Some(AluVectorOpcode::KillEq) => {
                let v0 = self.operand(instr, Slot::Vector0).expression;
                let v1 = self.operand(instr, Slot::Vector1).expression;
                self.indent();
                self.println(format_args!("clip(any({} == {}) ? -1 : 1);", v0, v1));
            }
            Some(AluVectorOpcode::KillGt) => {
                let v0 = self.operand(instr, Slot::Vector0).expression;
                let v1 = self.operand(instr, Slot::Vector1).expression;
                self.indent();
                self.println(format_args!("clip(any({} > {}) ? -1 : 1);", v0, v1));
            }
            Some(AluVectorOpcode::KillGe) => {
                let v0 = self.operand(instr, Slot::Vector0).expression;
                let v1 = self.operand(instr, Slot::Vector1).expression;
                self.indent();
                self.println(format_args!("clip(any({} >= {}) ? -1 : 1);", v0, v1));
            }
            Some(AluVectorOpcode::KillNe) => {
                let v0 = self.operand(instr, Slot::Vector0).expression;
                let v1 = self.operand(instr, Slot::Vector1).expression;
                self.indent();
                self.println(format_args!("clip(any({} != {}) ? -1 : 1);", v0, v1));
            }
            _ => (),
        }

        let mut close_if_bracket = false;
        let mut vector_register = true;
        let mut export_register = String::new();

        if instr.export_data {
            if self.is_pixel_shader {
                match instr.vector_dest {
                    export::PS_COLOR0 => export_register.push_str("output.oC0"),
                    export::PS_COLOR1 => export_register.push_str("output.oC1"),
                    export::PS_COLOR2 => export_register.push_str("output.oC2"),
                    export::PS_COLOR3 => export_register.push_str("output.oC3"),
                    export::PS_DEPTH => {
                        export_register.push_str("output.oDepth");
                        vector_register = false;
                    }
                    _ => (),
                }
            } else if instr.vector_dest == export::VS_POSITION {
                export_register.push_str("output.oPos");

                if self.has_mtx_projection {
                    self.indent();
                    self.push(
                        "if ((g_SpecConstants() & SPEC_CONSTANT_REVERSE_Z) == 0 || iterationIndex == 0)\n",
                    );
                    self.indent();
                    self.push("{\n");
                    self.indentation += 1;

                    close_if_bracket = true;
                }
            } else {
                let Some(interpolator) = self.interpolators.get(&instr.vector_dest) else {
                    return Err(ErrorImpl::MissingInterpolator(instr.vector_dest));
                };

                export_register.push_str(interpolator);
            }
        }

        if matches!(
            instr.vector_opcode,
            Some(
                AluVectorOpcode::SetpEqPush
                    | AluVectorOpcode::SetpNePush
                    | AluVectorOpcode::SetpGtPush
                    | AluVectorOpcode::SetpGePush
            )
        ) {
            let v0 = self.operand(instr, Slot::Vector0).expression;
            let v1 = self.operand(instr, Slot::Vector1).expression;

            self.indent();
            self.print(format_args!("p0 = {} == 0.0 && {} ", v0, v1));

            self.push(match instr.vector_opcode {
                Some(AluVectorOpcode::SetpEqPush) => "==",
                Some(AluVectorOpcode::SetpNePush) => "!=",
                Some(AluVectorOpcode::SetpGtPush) => ">",
                _ => ">=",
            });

            self.push(" 0.0;\n");
        } else if instr.vector_opcode == Some(AluVectorOpcode::MaxA) {
            let v0 = self.operand(instr, Slot::Vector0).expression;
            self.indent();
            self.println(format_args!(
                "a0 = (int)clamp(floor(({}).w + 0.5), -256.0, 255.0);",
                v0
            ));
        }

        let mut vector_write_mask = instr.vector_write_mask;
        if instr.export_data {
            vector_write_mask &= !instr.scalar_write_mask;
        }

        if vector_write_mask != 0 {
            self.indent();
            if export_register.is_empty() {
                self.print(format_args!("r{}.", instr.vector_dest));
            } else {
                self.print(format_args!("{}", export_register));
                if vector_register {
                    self.out.push('.');
                }
            }

            let mut vector_write_size = 0;
            for i in 0..4 {
                if (vector_write_mask >> i) & 1 != 0 {
                    if vector_register {
                        self.out.push(SWIZZLES[i as usize]);
                    }
                    vector_write_size += 1;
                }
            }

            self.push(" = ");

            if vector_write_size > 1 {
                self.print(format_args!("(float{})((", vector_write_size));
            } else {
                self.push("(float)((");
            }

            if instr.vector_saturate {
                self.push("saturate(");
            }

            let (expression, components) = self.vector_expression(instr);
            self.push(&expression);

            self.push(")");

            if components > vector_write_size {
                match vector_write_size {
                    1 => self.push(".x"),
                    2 => self.push(".xy"),
                    3 => self.push(".xyz"),
                    _ => (),
                }
            }

            self.push(")");

            if instr.vector_saturate {
                self.out.push(')');
            }

            self.push(";\n");
        }

        if instr.scalar_opcode != Some(AluScalarOpcode::RetainPrev) {
            self.emit_scalar(instr);
        }

        let mut scalar_write_mask = instr.scalar_write_mask;
        if instr.export_data {
            scalar_write_mask &= !instr.vector_write_mask;
        }

        if scalar_write_mask != 0 {
            self.indent();
            if export_register.is_empty() {
                self.print(format_args!("r{}.", instr.scalar_dest));
            } else {
                self.print(format_args!("{}", export_register));
                if vector_register {
                    self.out.push('.');
                }
            }

            for i in 0..4 {
                if (scalar_write_mask >> i) & 1 != 0 && vector_register {
                    self.out.push(SWIZZLES[i as usize]);
                }
            }

            self.push(" = ps;\n");
        }

        if instr.export_data && !export_register.is_empty() {
            // Overlapping vector/scalar lanes export a literal one; with a
            // relative destination the untouched lanes are forced to zero.
            let zero_mask = if instr.scalar_dest_relative {
                0b1111 & !(instr.vector_write_mask | instr.scalar_write_mask)
            } else {
                0
            };
            let one_mask = instr.vector_write_mask & instr.scalar_write_mask;

            for i in 0..4 {
                let mask = 1 << i;
                if zero_mask & mask != 0 {
                    self.indent();
                    self.println(format_args!(
                        "{}.{} = 0.0;",
                        export_register, SWIZZLES[i as usize]
                    ));
                } else if one_mask & mask != 0 {
                    self.indent();
                    self.println(format_args!(
                        "{}.{} = 1.0;",
                        export_register, SWIZZLES[i as usize]
                    ));
                }
            }
        }

        if matches!(
            instr.scalar_opcode,
            Some(op) if op >= AluScalarOpcode::KillsEq && op <= AluScalarOpcode::KillsOne
        ) {
            self.indent();
            self.push("clip(ps != 0.0 ? -1 : 1);\n");
        }

        if close_if_bracket {
            self.indentation -= 1;
            self.indent();
            self.push("}\n");
        }

        if instr.is_predicated {
            self.indentation -= 1;
            self.indent();
            self.push("}\n");
        }

        Ok(())
    }

    /// Builds the full-width RHS of the vector operation.
    fn vector_expression(&mut self, instr: &Alu) -> (String, u32) {
        let v0 = |s: &Self| s.operand(instr, Slot::Vector0);
        let v1 = |s: &Self| s.operand(instr, Slot::Vector1);
        let v2 = |s: &Self| s.operand(instr, Slot::Vector2);

        let Some(opcode) = instr.vector_opcode else {
            warn!("unhandled vector opcode, substituting zero");
            return ("0.0".to_owned(), 1);
        };

        match opcode {
            AluVectorOpcode::Add => {
                let (a, b) = (v0(self), v1(self));
                (
                    format!("{} + {}", a.expression, b.expression),
                    a.components.max(b.components),
                )
            }
            AluVectorOpcode::Mul => {
                let (a, b) = (v0(self), v1(self));
                (
                    format!("{} * {}", a.expression, b.expression),
                    a.components.max(b.components),
                )
            }
            AluVectorOpcode::Max | AluVectorOpcode::MaxA => {
                let (a, b) = (v0(self), v1(self));
                (
                    format!("max({}, {})", a.expression, b.expression),
                    a.components.max(b.components),
                )
            }
            AluVectorOpcode::Min => {
                let (a, b) = (v0(self), v1(self));
                (
                    format!("min({}, {})", a.expression, b.expression),
                    a.components.max(b.components),
                )
            }
            AluVectorOpcode::Seq => {
                let (a, b) = (v0(self), v1(self));
                (
                    format!("{} == {}", a.expression, b.expression),
                    a.components.max(b.components),
                )
            }
            AluVectorOpcode::Sgt => {
                let (a, b) = (v0(self), v1(self));
                (
                    format!("{} > {}", a.expression, b.expression),
                    a.components.max(b.components),
                )
            }
            AluVectorOpcode::Sge => {
                let (a, b) = (v0(self), v1(self));
                (
                    format!("{} >= {}", a.expression, b.expression),
                    a.components.max(b.components),
                )
            }
            AluVectorOpcode::Sne => {
                let (a, b) = (v0(self), v1(self));
                (
                    format!("{} != {}", a.expression, b.expression),
                    a.components.max(b.components),
                )
            }
            AluVectorOpcode::Frc => {
                let a = v0(self);
                (format!("frac({})", a.expression), a.components)
            }
            AluVectorOpcode::Trunc => {
                let a = v0(self);
                (format!("trunc({})", a.expression), a.components)
            }
            AluVectorOpcode::Floor => {
                let a = v0(self);
                (format!("floor({})", a.expression), a.components)
            }
            AluVectorOpcode::Mad => {
                let (a, b, c) = (v0(self), v1(self), v2(self));
                (
                    format!("{} * {} + {}", a.expression, b.expression, c.expression),
                    a.components.max(b.components).max(c.components),
                )
            }
            AluVectorOpcode::CndEq => {
                let (a, b, c) = (v0(self), v1(self), v2(self));
                (
                    format!(
                        "selectWrapper({} == 0.0, {}, {})",
                        a.expression, b.expression, c.expression
                    ),
                    b.components.max(c.components),
                )
            }
            AluVectorOpcode::CndGe => {
                let (a, b, c) = (v0(self), v1(self), v2(self));
                (
                    format!(
                        "selectWrapper({} >= 0.0, {}, {})",
                        a.expression, b.expression, c.expression
                    ),
                    b.components.max(c.components),
                )
            }
            AluVectorOpcode::CndGt => {
                let (a, b, c) = (v0(self), v1(self), v2(self));
                (
                    format!(
                        "selectWrapper({} > 0.0, {}, {})",
                        a.expression, b.expression, c.expression
                    ),
                    b.components.max(c.components),
                )
            }
            AluVectorOpcode::Dp4 | AluVectorOpcode::Dp3 => {
                let (a, b) = (v0(self), v1(self));
                (format!("dot({}, {})", a.expression, b.expression), 1)
            }
            AluVectorOpcode::Dp2Add => {
                let (a, b, c) = (v0(self), v1(self), v2(self));
                (
                    format!(
                        "dot({}, {}) + {}",
                        a.expression, b.expression, c.expression
                    ),
                    c.components,
                )
            }
            AluVectorOpcode::Cube => {
                let a = v0(self);
                (format!("cube({})", a.expression), 4)
            }
            AluVectorOpcode::Max4 => {
                let a = v0(self);
                (format!("max4({})", a.expression), 4)
            }
            AluVectorOpcode::SetpEqPush
            | AluVectorOpcode::SetpNePush
            | AluVectorOpcode::SetpGtPush
            | AluVectorOpcode::SetpGePush => {
                let a = v0(self);
                (
                    format!("p0 ? 0.0 : {} + 1.0", a.expression),
                    a.components,
                )
            }
            AluVectorOpcode::KillEq => {
                let (a, b) = (v0(self), v1(self));
                (format!("any({} == {})", a.expression, b.expression), 1)
            }
            AluVectorOpcode::KillGt => {
                let (a, b) = (v0(self), v1(self));
                (format!("any({} > {})", a.expression, b.expression), 1)
            }
            AluVectorOpcode::KillGe => {
                let (a, b) = (v0(self), v1(self));
                (format!("any({} >= {})", a.expression, b.expression), 1)
            }
            AluVectorOpcode::KillNe => {
                let (a, b) = (v0(self), v1(self));
                (format!("any({} != {})", a.expression, b.expression), 1)
            }
            AluVectorOpcode::Dst => {
                let (a, b) = (v0(self), v1(self));
                (format!("dst({}, {})", a.expression, b.expression), 1)
            }
        }
    }

    fn emit_scalar(&mut self, instr: &Alu) {
        let s0 = |s: &Self| s.operand(instr, Slot::Scalar0).expression;
        let s1 = |s: &Self| s.operand(instr, Slot::Scalar1).expression;

        if matches!(
            instr.scalar_opcode,
            Some(op) if op >= AluScalarOpcode::SetpEq && op <= AluScalarOpcode::SetpRstr
        ) {
            self.indent();
            self.push("p0 = ");

            match instr.scalar_opcode.unwrap() {
                AluScalarOpcode::SetpEq | AluScalarOpcode::SetpRstr => {
                    let a = s0(self);
                    self.print(format_args!("{} == 0.0", a));
                }
                AluScalarOpcode::SetpNe => {
                    let a = s0(self);
                    self.print(format_args!("{} != 0.0", a));
                }
                AluScalarOpcode::SetpGt => {
                    let a = s0(self);
                    self.print(format_args!("{} > 0.0", a));
                }
                AluScalarOpcode::SetpGe => {
                    let a = s0(self);
                    self.print(format_args!("{} >= 0.0", a));
                }
                AluScalarOpcode::SetpInv => {
                    let a = s0(self);
                    self.print(format_args!("{} == 1.0", a));
                }
                AluScalarOpcode::SetpPop => {
                    let a = s0(self);
                    self.print(format_args!("{} - 1.0 <= 0.0", a));
                }
                AluScalarOpcode::SetpClr => self.push("false"),
                _ => unreachable!(),
            }

            self.push(";\n");
        }

        self.indent();
        self.push("ps = ");
        if instr.scalar_saturate {
            self.push("saturate((float)(");
        }

        match instr.scalar_opcode {
            Some(AluScalarOpcode::Adds) => {
                let (a, b) = (s0(self), s1(self));
                self.print(format_args!("{} + {}", a, b));
            }
            Some(AluScalarOpcode::AddsPrev) => {
                let a = s0(self);
                self.print(format_args!("{} + ps", a));
            }
            Some(AluScalarOpcode::Muls) => {
                let (a, b) = (s0(self), s1(self));
                self.print(format_args!("{} * {}", a, b));
            }
            Some(AluScalarOpcode::MulsPrev | AluScalarOpcode::MulsPrev2) => {
                let a = s0(self);
                self.print(format_args!("{} * ps", a));
            }
            Some(
                AluScalarOpcode::Maxs | AluScalarOpcode::MaxAs | AluScalarOpcode::MaxAsf,
            ) => {
                let (a, b) = (s0(self), s1(self));
                self.print(format_args!("max({}, {})", a, b));
            }
            Some(AluScalarOpcode::Mins) => {
                let (a, b) = (s0(self), s1(self));
                self.print(format_args!("min({}, {})", a, b));
            }
            Some(AluScalarOpcode::Seqs) => {
                let a = s0(self);
                self.print(format_args!("{} == 0.0", a));
            }
            Some(AluScalarOpcode::Sgts) => {
                let a = s0(self);
                self.print(format_args!("{} > 0.0", a));
            }
            Some(AluScalarOpcode::Sges) => {
                let a = s0(self);
                self.print(format_args!("{} >= 0.0", a));
            }
            Some(AluScalarOpcode::Snes) => {
                let a = s0(self);
                self.print(format_args!("{} != 0.0", a));
            }
            Some(AluScalarOpcode::Frcs) => {
                let a = s0(self);
                self.print(format_args!("frac({})", a));
            }
            Some(AluScalarOpcode::Truncs) => {
                let a = s0(self);
                self.print(format_args!("trunc({})", a));
            }
            Some(AluScalarOpcode::Floors) => {
                let a = s0(self);
                self.print(format_args!("floor({})", a));
            }
            Some(AluScalarOpcode::Exp) => {
                let a = s0(self);
                self.print(format_args!("exp2({})", a));
            }
            Some(AluScalarOpcode::Logc | AluScalarOpcode::Log) => {
                let a = s0(self);
                self.print(format_args!("clamp(log2({}), -FLT_MAX, FLT_MAX)", a));
            }
            Some(AluScalarOpcode::Rcpc | AluScalarOpcode::Rcpf | AluScalarOpcode::Rcp) => {
                let a = s0(self);
                self.print(format_args!("clamp(rcp({}), -FLT_MAX, FLT_MAX)", a));
            }
            Some(AluScalarOpcode::Rsqc | AluScalarOpcode::Rsqf | AluScalarOpcode::Rsq) => {
                let a = s0(self);
                self.print(format_args!("clamp(rsqrt({}), -FLT_MAX, FLT_MAX)", a));
            }
            Some(AluScalarOpcode::Subs) => {
                let (a, b) = (s0(self), s1(self));
                self.print(format_args!("{} - {}", a, b));
            }
            Some(AluScalarOpcode::SubsPrev) => {
                let a = s0(self);
                self.print(format_args!("{} - ps", a));
            }
            Some(
                AluScalarOpcode::SetpEq
                | AluScalarOpcode::SetpNe
                | AluScalarOpcode::SetpGt
                | AluScalarOpcode::SetpGe,
            ) => {
                self.push("p0 ? 0.0 : 1.0");
            }
            Some(AluScalarOpcode::SetpInv) => {
                let a = s0(self);
                self.print(format_args!("p0 ? 0.0 : {0} == 0.0 ? 1.0 : {0}", a));
            }
            Some(AluScalarOpcode::SetpPop) => {
                let a = s0(self);
                self.print(format_args!("p0 ? 0.0 : ({} - 1.0)", a));
            }
            Some(AluScalarOpcode::SetpClr) => self.push("FLT_MAX"),
            Some(AluScalarOpcode::SetpRstr) => {
                let a = s0(self);
                self.print(format_args!("p0 ? 0.0 : {}", a));
            }
            Some(AluScalarOpcode::KillsEq) => {
                let a = s0(self);
                self.print(format_args!("{} == 0.0", a));
            }
            Some(AluScalarOpcode::KillsGt) => {
                let a = s0(self);
                self.print(format_args!("{} > 0.0", a));
            }
            Some(AluScalarOpcode::KillsGe) => {
                let a = s0(self);
                self.print(format_args!("{} >= 0.0", a));
            }
            Some(AluScalarOpcode::KillsNe) => {
                let a = s0(self);
                self.print(format_args!("{} != 0.0", a));
            }
            Some(AluScalarOpcode::KillsOne) => {
                let a = s0(self);
                self.print(format_args!("{} == 1.0", a));
            }
            Some(AluScalarOpcode::Sqrt) => {
                let a = s0(self);
                self.print(format_args!("sqrt({})", a));
            }
            Some(AluScalarOpcode::Mulsc0 | AluScalarOpcode::Mulsc1) => {
                let a = self.operand(instr, Slot::ScalarConstant0).expression;
                let b = self.operand(instr, Slot::ScalarConstant1).expression;
                self.print(format_args!("{} * {}", a, b));
            }
            Some(AluScalarOpcode::Addsc0 | AluScalarOpcode::Addsc1) => {
                let a = self.operand(instr, Slot::ScalarConstant0).expression;
                let b = self.operand(instr, Slot::ScalarConstant1).expression;
                self.print(format_args!("{} + {}", a, b));
            }
            Some(AluScalarOpcode::Subsc0 | AluScalarOpcode::Subsc1) => {
                let a = self.operand(instr, Slot::ScalarConstant0).expression;
                let b = self.operand(instr, Slot::ScalarConstant1).expression;
                self.print(format_args!("{} - {}", a, b));
            }
            Some(AluScalarOpcode::Sin) => {
                let a = s0(self);
                self.print(format_args!("sin({})", a));
            }
            Some(AluScalarOpcode::Cos) => {
                let a = s0(self);
                self.print(format_args!("cos({})", a));
            }
            Some(AluScalarOpcode::RetainPrev) | None => {
                if instr.scalar_opcode.is_none() {
                    warn!("unhandled scalar opcode, substituting zero");
                }
                self.push("0.0");
            }
        }

        if instr.scalar_saturate {
            self.push("))");
        }

        self.push(";\n");

        match instr.scalar_opcode {
            Some(AluScalarOpcode::MaxAs) => {
                let a = s0(self);
                self.indent();
                self.println(format_args!(
                    "a0 = (int)clamp(floor({} + 0.5), -256.0, 255.0);",
                    a
                ));
            }
            Some(AluScalarOpcode::MaxAsf) => {
                let a = s0(self);
                self.indent();
                self.println(format_args!("a0 = (int)clamp(floor({}), -256.0, 255.0);", a));
            }
            _ => (),
        }
    }
}
