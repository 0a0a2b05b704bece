//! Data model and decoders for Xenos shader containers.
//!
//! The container embeds a D3DX constant table, literal definition tables, a
//! stage header and the microcode proper. Everything is stored big-endian;
//! bitfields are defined on the byteswapped words.

pub mod code;
pub mod container;
pub mod reader;

pub use code::{Alu, ControlFlow, Fetch, TextureFetch, VertexFetch};
pub use container::{ConstantTable, DefinitionTable, ShaderContainer, ShaderStageInfo};
