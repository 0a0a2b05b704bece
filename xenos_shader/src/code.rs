//! Decoder for the Xenos microcode instruction stream.
//!
//! The microcode is a sequence of 96-bit slots. A control-flow slot packs two
//! 48-bit instructions; a data slot holds one ALU or fetch instruction. All
//! slots are stored as three big-endian dwords and every bitfield is defined
//! on the byteswapped value.

use crate::reader::{bit, bits, sbits};

/// Bytes per 96-bit microcode slot.
pub const SLOT_SIZE: usize = 12;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ControlFlowOpcode {
    Nop,
    Exec,
    ExecEnd,
    CondExec,
    CondExecEnd,
    CondExecPred,
    CondExecPredEnd,
    LoopStart,
    LoopEnd,
    CondCall,
    Return,
    CondJmp,
    Alloc,
    CondExecPredClean,
    CondExecPredCleanEnd,
    MarkVsFetchDone,
}

impl ControlFlowOpcode {
    fn from_u32(value: u32) -> Self {
        match value & 0xF {
            0 => Self::Nop,
            1 => Self::Exec,
            2 => Self::ExecEnd,
            3 => Self::CondExec,
            4 => Self::CondExecEnd,
            5 => Self::CondExecPred,
            6 => Self::CondExecPredEnd,
            7 => Self::LoopStart,
            8 => Self::LoopEnd,
            9 => Self::CondCall,
            10 => Self::Return,
            11 => Self::CondJmp,
            12 => Self::Alloc,
            13 => Self::CondExecPredClean,
            14 => Self::CondExecPredCleanEnd,
            _ => Self::MarkVsFetchDone,
        }
    }
}

/// `Exec` / `ExecEnd` payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExecCf {
    pub address: u32,
    pub count: u32,
    pub sequence: u32,
    pub is_yield: bool,
    pub is_predicate_clean: bool,
}

/// `CondExec` family payload keyed on a boolean constant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CondExecCf {
    pub address: u32,
    pub count: u32,
    pub sequence: u32,
    pub bool_address: u32,
    pub condition: bool,
}

/// `CondExecPred` family payload keyed on the predicate register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CondExecPredCf {
    pub address: u32,
    pub count: u32,
    pub sequence: u32,
    pub is_predicate_clean: bool,
    pub condition: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LoopStartCf {
    pub address: u32,
    pub is_repeat: bool,
    pub loop_id: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LoopEndCf {
    pub address: u32,
    pub loop_id: u32,
    pub is_predicated_break: bool,
    pub condition: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CondCallCf {
    pub address: u32,
    pub is_unconditional: bool,
    pub is_predicated: bool,
    pub bool_address: u32,
    pub condition: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CondJmpCf {
    pub address: u32,
    pub is_unconditional: bool,
    pub is_predicated: bool,
    pub direction: bool,
    pub bool_address: u32,
    pub condition: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AllocCf {
    pub size: u32,
    pub alloc_type: u32,
}

/// One decoded control-flow instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlFlow {
    Nop,
    Exec(ExecCf),
    ExecEnd(ExecCf),
    CondExec(CondExecCf),
    CondExecEnd(CondExecCf),
    CondExecPred(CondExecPredCf),
    CondExecPredEnd(CondExecPredCf),
    LoopStart(LoopStartCf),
    LoopEnd(LoopEndCf),
    CondCall(CondCallCf),
    Return,
    CondJmp(CondJmpCf),
    Alloc(AllocCf),
    CondExecPredClean(CondExecCf),
    CondExecPredCleanEnd(CondExecCf),
    MarkVsFetchDone,
}

impl ControlFlow {
    /// Splits a 96-bit slot into its two packed 48-bit values.
    pub fn unpack_pair(words: [u32; 3]) -> (u64, u64) {
        let low = u64::from(words[0]) | u64::from(words[1] & 0xFFFF) << 32;
        let high = u64::from(words[1] >> 16) | u64::from(words[2]) << 16;
        (low, high)
    }

    /// Decodes both instructions of a control-flow slot.
    pub fn decode_slot(words: [u32; 3]) -> [Self; 2] {
        let (low, high) = Self::unpack_pair(words);
        [Self::decode(low), Self::decode(high)]
    }

    /// Decodes one 48-bit control-flow value. The opcode lives in the top
    /// nibble; every opcode value is defined so decoding cannot fail.
    pub fn decode(word: u64) -> Self {
        let exec = || ExecCf {
            address: bits(word, 0, 12),
            count: bits(word, 12, 3),
            sequence: bits(word, 16, 12),
            is_yield: bit(word, 15),
            is_predicate_clean: bit(word, 41),
        };

        let cond_exec = || CondExecCf {
            address: bits(word, 0, 12),
            count: bits(word, 12, 3),
            sequence: bits(word, 16, 12),
            bool_address: bits(word, 34, 8),
            condition: bit(word, 42),
        };

        let cond_exec_pred = || CondExecPredCf {
            address: bits(word, 0, 12),
            count: bits(word, 12, 3),
            sequence: bits(word, 16, 12),
            is_predicate_clean: bit(word, 41),
            condition: bit(word, 42),
        };

        match ControlFlowOpcode::from_u32(bits(word, 44, 4)) {
            ControlFlowOpcode::Nop => Self::Nop,
            ControlFlowOpcode::Exec => Self::Exec(exec()),
            ControlFlowOpcode::ExecEnd => Self::ExecEnd(exec()),
            ControlFlowOpcode::CondExec => Self::CondExec(cond_exec()),
            ControlFlowOpcode::CondExecEnd => Self::CondExecEnd(cond_exec()),
            ControlFlowOpcode::CondExecPred => Self::CondExecPred(cond_exec_pred()),
            ControlFlowOpcode::CondExecPredEnd => Self::CondExecPredEnd(cond_exec_pred()),
            ControlFlowOpcode::LoopStart => Self::LoopStart(LoopStartCf {
                address: bits(word, 0, 13),
                is_repeat: bit(word, 13),
                loop_id: bits(word, 16, 5),
            }),
            ControlFlowOpcode::LoopEnd => Self::LoopEnd(LoopEndCf {
                address: bits(word, 0, 13),
                loop_id: bits(word, 16, 5),
                is_predicated_break: bit(word, 21),
                condition: bit(word, 42),
            }),
            ControlFlowOpcode::CondCall => Self::CondCall(CondCallCf {
                address: bits(word, 0, 13),
                is_unconditional: bit(word, 13),
                is_predicated: bit(word, 14),
                bool_address: bits(word, 34, 8),
                condition: bit(word, 42),
            }),
            ControlFlowOpcode::Return => Self::Return,
            ControlFlowOpcode::CondJmp => Self::CondJmp(CondJmpCf {
                address: bits(word, 0, 13),
                is_unconditional: bit(word, 13),
                is_predicated: bit(word, 14),
                direction: bit(word, 33),
                bool_address: bits(word, 34, 8),
                condition: bit(word, 42),
            }),
            ControlFlowOpcode::Alloc => Self::Alloc(AllocCf {
                size: bits(word, 0, 3),
                alloc_type: bits(word, 41, 2),
            }),
            ControlFlowOpcode::CondExecPredClean => Self::CondExecPredClean(cond_exec()),
            ControlFlowOpcode::CondExecPredCleanEnd => Self::CondExecPredCleanEnd(cond_exec()),
            ControlFlowOpcode::MarkVsFetchDone => Self::MarkVsFetchDone,
        }
    }

    pub const fn opcode(&self) -> ControlFlowOpcode {
        match self {
            Self::Nop => ControlFlowOpcode::Nop,
            Self::Exec(_) => ControlFlowOpcode::Exec,
            Self::ExecEnd(_) => ControlFlowOpcode::ExecEnd,
            Self::CondExec(_) => ControlFlowOpcode::CondExec,
            Self::CondExecEnd(_) => ControlFlowOpcode::CondExecEnd,
            Self::CondExecPred(_) => ControlFlowOpcode::CondExecPred,
            Self::CondExecPredEnd(_) => ControlFlowOpcode::CondExecPredEnd,
            Self::LoopStart(_) => ControlFlowOpcode::LoopStart,
            Self::LoopEnd(_) => ControlFlowOpcode::LoopEnd,
            Self::CondCall(_) => ControlFlowOpcode::CondCall,
            Self::Return => ControlFlowOpcode::Return,
            Self::CondJmp(_) => ControlFlowOpcode::CondJmp,
            Self::Alloc(_) => ControlFlowOpcode::Alloc,
            Self::CondExecPredClean(_) => ControlFlowOpcode::CondExecPredClean,
            Self::CondExecPredCleanEnd(_) => ControlFlowOpcode::CondExecPredCleanEnd,
            Self::MarkVsFetchDone => ControlFlowOpcode::MarkVsFetchDone,
        }
    }

    /// Address, count and sequence of an instruction that executes a block of
    /// co-issued data instructions.
    pub const fn exec_block(&self) -> Option<(u32, u32, u32)> {
        match self {
            Self::Exec(cf) | Self::ExecEnd(cf) => Some((cf.address, cf.count, cf.sequence)),
            Self::CondExec(cf)
            | Self::CondExecEnd(cf)
            | Self::CondExecPredClean(cf)
            | Self::CondExecPredCleanEnd(cf) => Some((cf.address, cf.count, cf.sequence)),
            Self::CondExecPred(cf) | Self::CondExecPredEnd(cf) => {
                Some((cf.address, cf.count, cf.sequence))
            }
            _ => None,
        }
    }

    /// Whether this instruction ends the program.
    ///
    /// `CondExecPredCleanEnd` deliberately does not terminate; see DESIGN.md.
    pub const fn terminates(&self) -> bool {
        matches!(
            self,
            Self::ExecEnd(_) | Self::CondExecEnd(_) | Self::CondExecPredEnd(_)
        )
    }
}

/// Classifies the co-issued data instructions of an exec block.
///
/// Bit `2i` of the 12-bit sequence selects a fetch (set) over an ALU (clear)
/// for the i-th instruction; the field is consumed two bits at a time.
#[derive(Clone, Debug)]
pub struct CoIssue {
    sequence: u32,
    remaining: u32,
}

impl CoIssue {
    pub fn new(sequence: u32, count: u32) -> Self {
        Self {
            sequence,
            remaining: count,
        }
    }
}

impl Iterator for CoIssue {
    /// `true` when the instruction is a fetch.
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        if self.remaining == 0 {
            return None;
        }

        let is_fetch = self.sequence & 1 != 0;
        self.sequence >>= 2;
        self.remaining -= 1;
        Some(is_fetch)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FetchOpcode {
    VertexFetch,
    TextureFetch,
    GetTextureBorderColorFrac,
    GetTextureComputedLod,
    GetTextureGradients,
    GetTextureWeights,
    SetTextureLod,
    SetTextureGradientsHorz,
    SetTextureGradientsVert,
}

impl FetchOpcode {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::VertexFetch,
            1 => Self::TextureFetch,
            16 => Self::GetTextureBorderColorFrac,
            17 => Self::GetTextureComputedLod,
            18 => Self::GetTextureGradients,
            19 => Self::GetTextureWeights,
            24 => Self::SetTextureLod,
            25 => Self::SetTextureGradientsHorz,
            26 => Self::SetTextureGradientsVert,
            _ => return None,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    Texture1D,
    Texture2D,
    Texture3D,
    Cube,
}

/// A load from a vertex stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VertexFetch {
    pub src_register: u32,
    pub src_swizzle: u32,
    pub dst_register: u32,
    pub dst_swizzle: u32,
    pub const_index: u32,
    pub format: u32,
    pub exp_adjust: i32,
    pub stride: u32,
    pub offset: i32,
    pub is_mini_fetch: bool,
    pub is_predicated: bool,
    pub predicate_condition: bool,
}

/// A texture sample or texture helper operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureFetch {
    pub opcode: FetchOpcode,
    pub src_register: u32,
    pub src_swizzle: u32,
    pub dst_register: u32,
    pub dst_swizzle: u32,
    pub const_index: u32,
    pub dimension: TextureDimension,
    pub offset_x: i32,
    pub offset_y: i32,
    pub offset_z: i32,
    pub is_predicated: bool,
    pub predicate_condition: bool,
}

/// A decoded fetch slot.
///
/// Opcodes without a lowering decode to `Other` and are skipped by the
/// emitter rather than failing the shader.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fetch {
    Vertex(VertexFetch),
    Texture(TextureFetch),
    Other(u32),
}

impl Fetch {
    pub fn decode(words: [u32; 3]) -> Self {
        let w0 = u64::from(words[0]);
        let w1 = u64::from(words[1]);
        let w2 = u64::from(words[2]);

        match FetchOpcode::from_u32(bits(w0, 0, 5)) {
            Some(FetchOpcode::VertexFetch) => Self::Vertex(VertexFetch {
                src_register: bits(w0, 5, 6),
                src_swizzle: bits(w0, 30, 2),
                dst_register: bits(w0, 12, 6),
                dst_swizzle: bits(w1, 0, 12),
                const_index: bits(w0, 20, 5),
                format: bits(w1, 16, 6),
                exp_adjust: sbits(w1, 24, 6),
                stride: bits(w2, 0, 8),
                offset: sbits(w2, 8, 23),
                is_mini_fetch: bit(w1, 30),
                is_predicated: bit(w1, 31),
                predicate_condition: bit(w2, 31),
            }),
            Some(opcode @ (FetchOpcode::TextureFetch | FetchOpcode::GetTextureWeights)) => {
                Self::Texture(TextureFetch {
                    opcode,
                    src_register: bits(w0, 5, 6),
                    src_swizzle: bits(w0, 26, 6),
                    dst_register: bits(w0, 12, 6),
                    dst_swizzle: bits(w1, 0, 12),
                    const_index: bits(w0, 20, 5),
                    dimension: match bits(w2, 14, 2) {
                        0 => TextureDimension::Texture1D,
                        1 => TextureDimension::Texture2D,
                        2 => TextureDimension::Texture3D,
                        _ => TextureDimension::Cube,
                    },
                    offset_x: sbits(w2, 16, 5),
                    offset_y: sbits(w2, 21, 5),
                    offset_z: sbits(w2, 26, 5),
                    is_predicated: bit(w1, 31),
                    predicate_condition: bit(w2, 31),
                })
            }
            _ => Self::Other(bits(w0, 0, 5)),
        }
    }
}

/// Scalar half of a fused ALU instruction.
///
/// Discriminants match the hardware encoding; the declaration order backs the
/// range comparisons the lowering tables use (`SetpEq..=SetpRstr`,
/// `KillsEq..=KillsOne`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AluScalarOpcode {
    Adds,
    AddsPrev,
    Muls,
    MulsPrev,
    MulsPrev2,
    Maxs,
    Mins,
    Seqs,
    Sgts,
    Sges,
    Snes,
    Frcs,
    Truncs,
    Floors,
    Exp,
    Logc,
    Log,
    Rcpc,
    Rcpf,
    Rcp,
    Rsqc,
    Rsqf,
    Rsq,
    MaxAs,
    MaxAsf,
    Subs,
    SubsPrev,
    SetpEq,
    SetpNe,
    SetpGt,
    SetpGe,
    SetpInv,
    SetpPop,
    SetpClr,
    SetpRstr,
    KillsEq,
    KillsGt,
    KillsGe,
    KillsNe,
    KillsOne,
    Sqrt,
    Mulsc0,
    Mulsc1,
    Addsc0,
    Addsc1,
    Subsc0,
    Subsc1,
    Sin,
    Cos,
    RetainPrev,
}

impl AluScalarOpcode {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Adds,
            1 => Self::AddsPrev,
            2 => Self::Muls,
            3 => Self::MulsPrev,
            4 => Self::MulsPrev2,
            5 => Self::Maxs,
            6 => Self::Mins,
            7 => Self::Seqs,
            8 => Self::Sgts,
            9 => Self::Sges,
            10 => Self::Snes,
            11 => Self::Frcs,
            12 => Self::Truncs,
            13 => Self::Floors,
            14 => Self::Exp,
            15 => Self::Logc,
            16 => Self::Log,
            17 => Self::Rcpc,
            18 => Self::Rcpf,
            19 => Self::Rcp,
            20 => Self::Rsqc,
            21 => Self::Rsqf,
            22 => Self::Rsq,
            23 => Self::MaxAs,
            24 => Self::MaxAsf,
            25 => Self::Subs,
            26 => Self::SubsPrev,
            27 => Self::SetpEq,
            28 => Self::SetpNe,
            29 => Self::SetpGt,
            30 => Self::SetpGe,
            31 => Self::SetpInv,
            32 => Self::SetpPop,
            33 => Self::SetpClr,
            34 => Self::SetpRstr,
            35 => Self::KillsEq,
            36 => Self::KillsGt,
            37 => Self::KillsGe,
            38 => Self::KillsNe,
            39 => Self::KillsOne,
            40 => Self::Sqrt,
            42 => Self::Mulsc0,
            43 => Self::Mulsc1,
            44 => Self::Addsc0,
            45 => Self::Addsc1,
            46 => Self::Subsc0,
            47 => Self::Subsc1,
            48 => Self::Sin,
            49 => Self::Cos,
            50 => Self::RetainPrev,
            _ => return None,
        })
    }

    /// Hardware encoding of the opcode.
    pub fn raw(self) -> u32 {
        match self {
            op if op < Self::Mulsc0 => op as u32,
            op => op as u32 + 1,
        }
    }
}

/// Vector half of a fused ALU instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AluVectorOpcode {
    Add,
    Mul,
    Max,
    Min,
    Seq,
    Sgt,
    Sge,
    Sne,
    Frc,
    Trunc,
    Floor,
    Mad,
    CndEq,
    CndGe,
    CndGt,
    Dp4,
    Dp3,
    Dp2Add,
    Cube,
    Max4,
    SetpEqPush,
    SetpNePush,
    SetpGtPush,
    SetpGePush,
    KillEq,
    KillGt,
    KillGe,
    KillNe,
    Dst,
    MaxA,
}

impl AluVectorOpcode {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Add,
            1 => Self::Mul,
            2 => Self::Max,
            3 => Self::Min,
            4 => Self::Seq,
            5 => Self::Sgt,
            6 => Self::Sge,
            7 => Self::Sne,
            8 => Self::Frc,
            9 => Self::Trunc,
            10 => Self::Floor,
            11 => Self::Mad,
            12 => Self::CndEq,
            13 => Self::CndGe,
            14 => Self::CndGt,
            15 => Self::Dp4,
            16 => Self::Dp3,
            17 => Self::Dp2Add,
            18 => Self::Cube,
            19 => Self::Max4,
            20 => Self::SetpEqPush,
            21 => Self::SetpNePush,
            22 => Self::SetpGtPush,
            23 => Self::SetpGePush,
            24 => Self::KillEq,
            25 => Self::KillGt,
            26 => Self::KillGe,
            27 => Self::KillNe,
            28 => Self::Dst,
            29 => Self::MaxA,
            _ => return None,
        })
    }
}

/// Export destination slots named by `vector_dest` when `export_data` is set.
pub mod export {
    pub const PS_COLOR0: u32 = 0;
    pub const PS_COLOR1: u32 = 1;
    pub const PS_COLOR2: u32 = 2;
    pub const PS_COLOR3: u32 = 3;
    pub const PS_DEPTH: u32 = 61;
    pub const VS_POSITION: u32 = 62;
}

/// A fused vector+scalar ALU instruction.
///
/// Opcode values without a lowering decode to `None` so a single bad
/// instruction degrades to a diagnostic instead of failing the shader.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Alu {
    pub vector_opcode: Option<AluVectorOpcode>,
    pub scalar_opcode: Option<AluScalarOpcode>,
    pub vector_dest: u32,
    pub vector_dest_relative: bool,
    pub scalar_dest: u32,
    pub scalar_dest_relative: bool,
    pub export_data: bool,
    pub vector_write_mask: u32,
    pub scalar_write_mask: u32,
    pub vector_saturate: bool,
    pub scalar_saturate: bool,
    pub abs_constants: bool,
    pub is_predicated: bool,
    pub predicate_condition: bool,
    pub const_address_register_relative: bool,
    pub const0_relative: bool,
    pub const1_relative: bool,
    pub src1_register: u32,
    pub src2_register: u32,
    pub src3_register: u32,
    pub src1_swizzle: u32,
    pub src2_swizzle: u32,
    pub src3_swizzle: u32,
    pub src1_negate: bool,
    pub src2_negate: bool,
    pub src3_negate: bool,
    pub src1_select: bool,
    pub src2_select: bool,
    pub src3_select: bool,
}

impl Alu {
    pub fn decode(words: [u32; 3]) -> Self {
        let w0 = u64::from(words[0]);
        let w1 = u64::from(words[1]);
        let w2 = u64::from(words[2]);

        Self {
            vector_opcode: AluVectorOpcode::from_u32(bits(w2, 24, 5)),
            scalar_opcode: AluScalarOpcode::from_u32(bits(w0, 26, 6)),
            vector_dest: bits(w0, 0, 6),
            vector_dest_relative: bit(w0, 6),
            scalar_dest: bits(w0, 8, 6),
            scalar_dest_relative: bit(w0, 14),
            export_data: bit(w0, 15),
            vector_write_mask: bits(w0, 16, 4),
            scalar_write_mask: bits(w0, 20, 4),
            vector_saturate: bit(w0, 24),
            scalar_saturate: bit(w0, 25),
            abs_constants: bit(w0, 7),
            is_predicated: bit(w1, 28),
            predicate_condition: bit(w1, 27),
            const_address_register_relative: bit(w1, 29),
            const0_relative: bit(w1, 31),
            const1_relative: bit(w1, 30),
            src1_register: bits(w2, 16, 8),
            src2_register: bits(w2, 8, 8),
            src3_register: bits(w2, 0, 8),
            src1_swizzle: bits(w1, 16, 8),
            src2_swizzle: bits(w1, 8, 8),
            src3_swizzle: bits(w1, 0, 8),
            src1_negate: bit(w1, 26),
            src2_negate: bit(w1, 25),
            src3_negate: bit(w1, 24),
            src1_select: bit(w2, 31),
            src2_select: bit(w2, 30),
            src3_select: bit(w2, 29),
        }
    }
}
