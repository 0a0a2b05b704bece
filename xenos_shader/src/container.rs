//! Parsing for the Xenos shader container format.
//!
//! A container starts with a [`ShaderContainer`] header followed by a virtual
//! region holding the D3DX constant table, the literal definition table and
//! the stage header, and a physical region holding literal values and the
//! microcode itself.

use std::ops::Range;
use std::string::FromUtf8Error;

use bitflags::bitflags;
use thiserror::Error;
use tracing::trace;

use crate::reader::{bits, EofError, Reader};

/// Upper 24 bits of the container flag dword.
pub const CONTAINER_MAGIC: u32 = 0x102A_1100;

/// Container header at offset 0. All fields big-endian.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ShaderContainer {
    pub flags: u32,
    pub virtual_size: u32,
    pub physical_size: u32,
    pub constant_table_offset: u32,
    pub definition_table_offset: u32,
    pub shader_offset: u32,
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error(transparent)]
    Eof(#[from] EofError),
    #[error("bad container magic: {0:#010X}")]
    BadMagic(u32),
    #[error("reserved container fields must be zero")]
    ReservedNotZero,
    #[error("constant table offset is zero")]
    NoConstantTable,
}

impl ShaderContainer {
    /// Size of the header in bytes.
    pub const SIZE: usize = 36;

    pub fn parse(bytes: &[u8]) -> Result<Self, ContainerError> {
        let mut reader = Reader::new(bytes);

        let flags = reader.u32("flags")?;
        if flags & 0xFFFF_FF00 != CONTAINER_MAGIC {
            return Err(ContainerError::BadMagic(flags));
        }

        let virtual_size = reader.u32("virtual_size")?;
        let physical_size = reader.u32("physical_size")?;
        reader.skip(4, "field_c")?;
        let constant_table_offset = reader.u32("constant_table_offset")?;
        let definition_table_offset = reader.u32("definition_table_offset")?;
        let shader_offset = reader.u32("shader_offset")?;
        let reserved0 = reader.u32("reserved0")?;
        let reserved1 = reader.u32("reserved1")?;

        if reserved0 != 0 || reserved1 != 0 {
            return Err(ContainerError::ReservedNotZero);
        }

        if constant_table_offset == 0 {
            return Err(ContainerError::NoConstantTable);
        }

        Ok(Self {
            flags,
            virtual_size,
            physical_size,
            constant_table_offset,
            definition_table_offset,
            shader_offset,
        })
    }

    /// Bit 0 of the flags selects the stage: set for vertex, clear for pixel.
    pub const fn is_pixel_shader(&self) -> bool {
        self.flags & 1 == 0
    }

    /// Total length of the container in bytes.
    pub const fn total_size(&self) -> usize {
        self.virtual_size as usize + self.physical_size as usize
    }
}

/// Scans a blob for embedded containers.
///
/// Containers are dword-aligned; each hit is validated through
/// [`ShaderContainer::parse`] and skipped over in full so that container
/// payloads are not themselves scanned.
pub fn scan_containers(bytes: &[u8]) -> Vec<Range<usize>> {
    let mut containers = Vec::new();

    let mut pos = 0;
    while pos + ShaderContainer::SIZE <= bytes.len() {
        let flags = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap());
        if flags & 0xFFFF_FF00 == CONTAINER_MAGIC {
            if let Ok(container) = ShaderContainer::parse(&bytes[pos..]) {
                let total = container.total_size();
                if total >= ShaderContainer::SIZE && pos + total <= bytes.len() {
                    trace!(offset = pos, size = total, "found embedded container");
                    containers.push(pos..pos + total);
                    pos += (total + 3) & !3;
                    continue;
                }
            }
        }

        pos += 4;
    }

    containers
}

/// `D3DXREGISTER_SET`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegisterSet {
    Bool,
    Int4,
    Float4,
    Sampler,
}

impl RegisterSet {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Bool),
            1 => Some(Self::Int4),
            2 => Some(Self::Float4),
            3 => Some(Self::Sampler),
            _ => None,
        }
    }
}

/// One `D3DXSHADER_CONSTANTINFO` record with its name resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstantInfo {
    pub name: String,
    pub register_set: RegisterSet,
    pub register_index: u16,
    pub register_count: u16,
}

/// The D3DX-style constant table embedded in the virtual region.
#[derive(Clone, Debug, Default)]
pub struct ConstantTable {
    pub constants: Vec<ConstantInfo>,
}

#[derive(Debug, Error)]
pub enum ConstantTableError {
    #[error(transparent)]
    Eof(#[from] EofError),
    #[error("unknown register set value {0} for constant {1:?}")]
    UnknownRegisterSet(u16, String),
    #[error("constant name at offset {0} is not terminated")]
    UnterminatedName(usize),
    #[error("constant name is not valid utf-8: {0}")]
    InvalidName(FromUtf8Error),
}

impl ConstantTable {
    /// Parses the table at `offset` inside the container.
    ///
    /// `offset` points at the `ConstantTableContainer`, a size dword followed
    /// by the table proper. Name and record offsets are relative to the table
    /// proper, not to the outer container.
    pub fn parse(bytes: &[u8], offset: usize) -> Result<Self, ConstantTableError> {
        let mut reader = Reader::at(bytes, offset);
        reader.skip(4, "constant_table_container")?;

        let base = offset + 4;
        reader.skip(12, "constant_table_header")?;
        let count = reader.u32("constants")?;
        let constant_info = reader.u32("constant_info")?;

        let mut constants = Vec::with_capacity(count as usize);
        for i in 0..count {
            let mut record = Reader::at(bytes, base + constant_info as usize + i as usize * 20);

            let name_offset = record.u32("constant_name_offset")?;
            let register_set = record.u16("register_set")?;
            let register_index = record.u16("register_index")?;
            let register_count = record.u16("register_count")?;

            let name = read_name(bytes, base + name_offset as usize)?;

            let Some(register_set) = RegisterSet::from_u16(register_set) else {
                return Err(ConstantTableError::UnknownRegisterSet(register_set, name));
            };

            constants.push(ConstantInfo {
                name,
                register_set,
                register_index,
                register_count,
            });
        }

        Ok(Self { constants })
    }
}

fn read_name(bytes: &[u8], offset: usize) -> Result<String, ConstantTableError> {
    let tail = bytes
        .get(offset..)
        .ok_or(ConstantTableError::UnterminatedName(offset))?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(ConstantTableError::UnterminatedName(offset))?;

    String::from_utf8(tail[..len].to_vec()).map_err(ConstantTableError::InvalidName)
}

/// A float4 literal definition; values live in the physical region.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Float4Definition {
    pub register_index: u16,
    pub count: u16,
    pub physical_offset: u32,
}

/// An int4 literal definition with inline packed byte-quads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Int4Definition {
    pub register_index: u16,
    pub values: Vec<u32>,
}

/// The two NUL-separated literal sub-tables.
#[derive(Clone, Debug, Default)]
pub struct DefinitionTable {
    pub float4: Vec<Float4Definition>,
    pub int4: Vec<Int4Definition>,
}

impl DefinitionTable {
    pub fn parse(bytes: &[u8], offset: usize) -> Result<Self, EofError> {
        let mut reader = Reader::at(bytes, offset);
        // field0..fieldC and the size dword.
        reader.skip(20, "definition_table_header")?;

        let mut float4 = Vec::new();
        while reader.peek_u32("float4_definition")? != 0 {
            let register_index = reader.u16("float4_register_index")?;
            let count = reader.u16("float4_count")?;
            let physical_offset = reader.u32("float4_physical_offset")?;

            float4.push(Float4Definition {
                register_index,
                count,
                physical_offset,
            });
        }
        reader.skip(4, "float4_terminator")?;

        let mut int4 = Vec::new();
        while reader.peek_u32("int4_definition")? != 0 {
            let register_index = reader.u16("int4_register_index")?;
            let count = reader.u16("int4_count")?;

            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                values.push(reader.u32("int4_value")?);
            }

            int4.push(Int4Definition {
                register_index,
                values,
            });
        }

        Ok(Self { float4, int4 })
    }
}

/// `D3DDECLUSAGE` as carried by vertex elements and interpolators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeclUsage {
    Position,
    BlendWeight,
    BlendIndices,
    Normal,
    PointSize,
    TexCoord,
    Tangent,
    Binormal,
    TessFactor,
    PositionT,
    Color,
    Fog,
    Depth,
    Sample,
}

impl DeclUsage {
    /// Index into per-usage lookup tables; matches the D3D encoding.
    pub const fn as_usize(self) -> usize {
        self as usize
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Position,
            1 => Self::BlendWeight,
            2 => Self::BlendIndices,
            3 => Self::Normal,
            4 => Self::PointSize,
            5 => Self::TexCoord,
            6 => Self::Tangent,
            7 => Self::Binormal,
            8 => Self::TessFactor,
            9 => Self::PositionT,
            10 => Self::Color,
            11 => Self::Fog,
            12 => Self::Depth,
            13 => Self::Sample,
            _ => return None,
        })
    }
}

#[derive(Debug, Error)]
#[error("unknown vertex declaration usage {0}")]
pub struct UnknownUsage(pub u32);

/// One entry of the vertex element table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VertexElement {
    pub address: u32,
    pub usage: DeclUsage,
    pub usage_index: u32,
}

impl VertexElement {
    pub fn from_raw(raw: u32) -> Result<Self, UnknownUsage> {
        let usage = bits(raw.into(), 12, 4);

        Ok(Self {
            address: bits(raw.into(), 0, 12),
            usage: DeclUsage::from_u32(usage).ok_or(UnknownUsage(usage))?,
            usage_index: bits(raw.into(), 16, 4),
        })
    }
}

/// One entry of the interpolator assignment table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Interpolator {
    pub usage_index: u32,
    pub usage: DeclUsage,
    pub register: u32,
}

impl Interpolator {
    pub fn from_raw(raw: u32) -> Result<Self, UnknownUsage> {
        let usage = bits(raw.into(), 4, 4);

        Ok(Self {
            usage_index: bits(raw.into(), 0, 4),
            usage: DeclUsage::from_u32(usage).ok_or(UnknownUsage(usage))?,
            register: bits(raw.into(), 8, 4),
        })
    }
}

bitflags! {
    /// Color targets and depth a pixel shader writes.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PixelShaderOutputs: u32 {
        const COLOR0 = 1 << 0;
        const COLOR1 = 1 << 1;
        const COLOR2 = 1 << 2;
        const COLOR3 = 1 << 3;
        const DEPTH = 1 << 4;
    }
}

/// The stage-independent part of the shader header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ShaderHeader {
    pub physical_offset: u32,
    pub size: u32,
    pub field_c: u32,
    pub interpolator_info: u32,
}

impl ShaderHeader {
    pub const fn interpolator_count(&self) -> u32 {
        (self.interpolator_info >> 5) & 0x1F
    }

    /// Pixel shaders only: the temporary register pre-loaded with the
    /// screen-space position.
    pub const fn position_register(&self) -> u32 {
        (self.field_c >> 8) & 0xFF
    }
}

#[derive(Debug, Error)]
pub enum ShaderHeaderError {
    #[error(transparent)]
    Eof(#[from] EofError),
    #[error(transparent)]
    Usage(#[from] UnknownUsage),
}

/// Vertex stage tail: declared input elements plus interpolator assignments.
#[derive(Clone, Debug)]
pub struct VertexShaderTail {
    pub header: ShaderHeader,
    pub vertex_elements: Vec<VertexElement>,
    pub interpolators: Vec<Interpolator>,
}

/// Pixel stage tail: written outputs plus interpolator-to-register mapping.
#[derive(Clone, Debug)]
pub struct PixelShaderTail {
    pub header: ShaderHeader,
    pub outputs: PixelShaderOutputs,
    pub interpolators: Vec<Interpolator>,
}

#[derive(Clone, Debug)]
pub enum ShaderStageInfo {
    Vertex(VertexShaderTail),
    Pixel(PixelShaderTail),
}

impl ShaderStageInfo {
    pub fn parse(
        bytes: &[u8],
        offset: usize,
        pixel_shader: bool,
    ) -> Result<Self, ShaderHeaderError> {
        let mut reader = Reader::at(bytes, offset);

        let physical_offset = reader.u32("physical_offset")?;
        let size = reader.u32("shader_size")?;
        reader.skip(4, "field_8")?;
        let field_c = reader.u32("field_c")?;
        reader.skip(4, "field_10")?;
        let interpolator_info = reader.u32("interpolator_info")?;

        let header = ShaderHeader {
            physical_offset,
            size,
            field_c,
            interpolator_info,
        };

        if pixel_shader {
            reader.skip(4, "field_18")?;
            let outputs =
                PixelShaderOutputs::from_bits_truncate(reader.u32("pixel_shader_outputs")?);

            let mut interpolators = Vec::new();
            for _ in 0..header.interpolator_count() {
                interpolators.push(Interpolator::from_raw(reader.u32("interpolator")?)?);
            }

            Ok(Self::Pixel(PixelShaderTail {
                header,
                outputs,
                interpolators,
            }))
        } else {
            let element_offset = reader.u32("field_18")?;
            let element_count = reader.u32("vertex_element_count")?;
            reader.skip(4, "field_20")?;

            // The trailing dword array holds the vertex elements at
            // `element_offset` followed directly by the interpolators.
            reader.skip(element_offset as usize * 4, "vertex_element_offset")?;

            let mut vertex_elements = Vec::with_capacity(element_count as usize);
            for _ in 0..element_count {
                vertex_elements.push(VertexElement::from_raw(reader.u32("vertex_element")?)?);
            }

            let mut interpolators = Vec::new();
            for _ in 0..header.interpolator_count() {
                interpolators.push(Interpolator::from_raw(reader.u32("interpolator")?)?);
            }

            Ok(Self::Vertex(VertexShaderTail {
                header,
                vertex_elements,
                interpolators,
            }))
        }
    }

    pub fn header(&self) -> &ShaderHeader {
        match self {
            Self::Vertex(tail) => &tail.header,
            Self::Pixel(tail) => &tail.header,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        scan_containers, ConstantTable, ContainerError, DeclUsage, DefinitionTable, Interpolator,
        RegisterSet, ShaderContainer, VertexElement,
    };

    fn put_u32(bytes: &mut Vec<u8>, value: u32) {
        bytes.extend_from_slice(&value.to_be_bytes());
    }

    fn header(flags: u32, virtual_size: u32, physical_size: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        put_u32(&mut bytes, flags);
        put_u32(&mut bytes, virtual_size);
        put_u32(&mut bytes, physical_size);
        put_u32(&mut bytes, 0);
        put_u32(&mut bytes, 0x24);
        put_u32(&mut bytes, 0);
        put_u32(&mut bytes, 0x24);
        put_u32(&mut bytes, 0);
        put_u32(&mut bytes, 0);
        bytes
    }

    #[test]
    fn container_magic_and_stage() {
        let bytes = header(0x102A_1101, 0x40, 0x20);
        let container = ShaderContainer::parse(&bytes).unwrap();
        assert!(!container.is_pixel_shader());
        assert_eq!(container.total_size(), 0x60);

        let container = ShaderContainer::parse(&header(0x102A_1100, 0, 0)).unwrap();
        assert!(container.is_pixel_shader());
    }

    #[test]
    fn container_rejects_bad_magic() {
        let bytes = header(0xDEAD_BEEF, 0, 0);
        assert!(matches!(
            ShaderContainer::parse(&bytes),
            Err(ContainerError::BadMagic(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn container_rejects_nonzero_reserved() {
        let mut bytes = header(0x102A_1101, 0, 0);
        let len = bytes.len();
        bytes[len - 1] = 1;
        assert!(matches!(
            ShaderContainer::parse(&bytes),
            Err(ContainerError::ReservedNotZero)
        ));
    }

    #[test]
    fn container_requires_constant_table() {
        let mut bytes = header(0x102A_1101, 0, 0);
        bytes[16..20].copy_from_slice(&[0; 4]);
        assert!(matches!(
            ShaderContainer::parse(&bytes),
            Err(ContainerError::NoConstantTable)
        ));
    }

    #[test]
    fn constant_table_resolves_names() {
        let mut bytes = vec![0u8; 16];
        let offset = bytes.len();

        put_u32(&mut bytes, 0); // container size
        let base = bytes.len();
        put_u32(&mut bytes, 28); // table size
        put_u32(&mut bytes, 0); // creator
        put_u32(&mut bytes, 0); // version
        put_u32(&mut bytes, 2); // constants
        put_u32(&mut bytes, 28); // constant info offset
        put_u32(&mut bytes, 0); // flags
        put_u32(&mut bytes, 0); // target

        let names = 28 + 2 * 20;
        for (i, (set, index, count)) in [(2u16, 0u16, 4u16), (3, 1, 1)].iter().enumerate() {
            put_u32(&mut bytes, names as u32 + i as u32 * 8);
            bytes.extend_from_slice(&set.to_be_bytes());
            bytes.extend_from_slice(&index.to_be_bytes());
            bytes.extend_from_slice(&count.to_be_bytes());
            bytes.extend_from_slice(&0u16.to_be_bytes());
            put_u32(&mut bytes, 0);
            put_u32(&mut bytes, 0);
        }

        assert_eq!(bytes.len(), base + names);
        bytes.extend_from_slice(b"g_MtxVP\0");
        bytes.extend_from_slice(b"sampAlb\0");

        let table = ConstantTable::parse(&bytes, offset).unwrap();
        assert_eq!(table.constants.len(), 2);
        assert_eq!(table.constants[0].name, "g_MtxVP");
        assert_eq!(table.constants[0].register_set, RegisterSet::Float4);
        assert_eq!(table.constants[0].register_count, 4);
        assert_eq!(table.constants[1].name, "sampAlb");
        assert_eq!(table.constants[1].register_set, RegisterSet::Sampler);
        assert_eq!(table.constants[1].register_index, 1);
    }

    #[test]
    fn definition_table_walk() {
        let mut bytes = vec![0u8; 8];
        let offset = bytes.len();

        // Header dwords.
        for _ in 0..5 {
            put_u32(&mut bytes, 0);
        }

        // One float4 definition.
        bytes.extend_from_slice(&252u16.to_be_bytes());
        bytes.extend_from_slice(&2u16.to_be_bytes());
        put_u32(&mut bytes, 0x80);
        put_u32(&mut bytes, 0);

        // One int4 definition with two packed values.
        bytes.extend_from_slice(&9000u16.to_be_bytes());
        bytes.extend_from_slice(&2u16.to_be_bytes());
        put_u32(&mut bytes, 0x0102_03FF);
        put_u32(&mut bytes, 0x8000_0001);
        put_u32(&mut bytes, 0);

        let table = DefinitionTable::parse(&bytes, offset).unwrap();
        assert_eq!(table.float4.len(), 1);
        assert_eq!(table.float4[0].register_index, 252);
        assert_eq!(table.float4[0].count, 2);
        assert_eq!(table.float4[0].physical_offset, 0x80);

        assert_eq!(table.int4.len(), 1);
        assert_eq!(table.int4[0].register_index, 9000);
        assert_eq!(table.int4[0].values, vec![0x0102_03FF, 0x8000_0001]);
    }

    #[test]
    fn vertex_element_fields() {
        // address = 4, usage = TexCoord (5), usage index = 2.
        let element = VertexElement::from_raw(4 | (5 << 12) | (2 << 16)).unwrap();
        assert_eq!(element.address, 4);
        assert_eq!(element.usage, DeclUsage::TexCoord);
        assert_eq!(element.usage_index, 2);

        assert!(VertexElement::from_raw(15 << 12).is_err());
    }

    #[test]
    fn interpolator_fields() {
        // usage index = 1, usage = Color (10), register = 3.
        let interpolator = Interpolator::from_raw(1 | (10 << 4) | (3 << 8)).unwrap();
        assert_eq!(interpolator.usage_index, 1);
        assert_eq!(interpolator.usage, DeclUsage::Color);
        assert_eq!(interpolator.register, 3);
    }

    #[test]
    fn scan_finds_embedded_containers() {
        let mut blob = vec![0u8; 16];
        let container = header(0x102A_1101, 36, 0);
        blob.extend_from_slice(&container);
        blob.extend_from_slice(&[0u8; 8]);
        blob.extend_from_slice(&header(0x102A_1100, 36, 4));
        blob.extend_from_slice(&[0u8; 4]);

        let found = scan_containers(&blob);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], 16..52);
        assert_eq!(found[1], 60..100);
    }
}
