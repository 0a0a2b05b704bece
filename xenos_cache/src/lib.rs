//! The shader cache artifact.
//!
//! A cache file carries one entry per unique shader container plus two
//! Zstandard-compressed sections, one with every DXIL blob and one with
//! every SPIR-V blob. Entries are keyed by the xxHash3 of the exact
//! container bytes; containers hashing equal share an entry.

use std::io;

use bytes::{Buf, BufMut};
use thiserror::Error;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

pub const MAGIC: [u8; 4] = *b"XSC1";

/// Zstandard level used for both sections.
const COMPRESSION_LEVEL: i32 = 22;

pub trait Encode {
    fn encode<B>(&self, buf: B)
    where
        B: BufMut;
}

pub trait Decode: Sized {
    type Error;

    fn decode<B>(buf: B) -> Result<Self, Self::Error>
    where
        B: Buf;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("unexpected eof reading {0}")]
    Eof(&'static str),
    #[error("bad cache magic")]
    BadMagic,
    #[error("compressed section: {0}")]
    Compression(#[from] io::Error),
}

/// One shader in the cache.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderCacheEntry {
    pub hash: u64,
    pub dxil_offset: u32,
    pub dxil_size: u32,
    pub spirv_offset: u32,
    pub spirv_size: u32,
    pub spec_constants_mask: u32,
}

impl Encode for ShaderCacheEntry {
    fn encode<B>(&self, mut buf: B)
    where
        B: BufMut,
    {
        buf.put_u64_le(self.hash);
        buf.put_u32_le(self.dxil_offset);
        buf.put_u32_le(self.dxil_size);
        buf.put_u32_le(self.spirv_offset);
        buf.put_u32_le(self.spirv_size);
        buf.put_u32_le(self.spec_constants_mask);
    }
}

impl Decode for ShaderCacheEntry {
    type Error = Error;

    fn decode<B>(mut buf: B) -> Result<Self, Self::Error>
    where
        B: Buf,
    {
        if buf.remaining() < 28 {
            return Err(Error::Eof("shader cache entry"));
        }

        Ok(Self {
            hash: buf.get_u64_le(),
            dxil_offset: buf.get_u32_le(),
            dxil_size: buf.get_u32_le(),
            spirv_offset: buf.get_u32_le(),
            spirv_size: buf.get_u32_le(),
            spec_constants_mask: buf.get_u32_le(),
        })
    }
}

/// Accumulates compiled shaders and writes the final cache blob.
#[derive(Debug, Default)]
pub struct CacheBuilder {
    entries: Vec<ShaderCacheEntry>,
    dxil: Vec<u8>,
    spirv: Vec<u8>,
}

impl CacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash used for deduplication: xxHash3 of the exact container bytes.
    pub fn container_hash(container: &[u8]) -> u64 {
        xxh3_64(container)
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.entries.iter().any(|entry| entry.hash == hash)
    }

    /// Inserts one compiled shader. Returns false when an entry with the
    /// same hash already exists.
    pub fn insert(&mut self, hash: u64, dxil: &[u8], spirv: &[u8], spec_constants_mask: u32) -> bool {
        if self.contains(hash) {
            debug!(hash, "skipping duplicate shader");
            return false;
        }

        self.entries.push(ShaderCacheEntry {
            hash,
            dxil_offset: self.dxil.len() as u32,
            dxil_size: dxil.len() as u32,
            spirv_offset: self.spirv.len() as u32,
            spirv_size: spirv.len() as u32,
            spec_constants_mask,
        });

        self.dxil.extend_from_slice(dxil);
        self.spirv.extend_from_slice(spirv);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compresses both sections and encodes the cache file.
    pub fn finish(self) -> Result<Vec<u8>, Error> {
        let dxil = zstd::bulk::compress(&self.dxil, COMPRESSION_LEVEL)?;
        let spirv = zstd::bulk::compress(&self.spirv, COMPRESSION_LEVEL)?;

        let mut out = Vec::with_capacity(32 + self.entries.len() * 28 + dxil.len() + spirv.len());

        out.put_slice(&MAGIC);
        out.put_u32_le(self.entries.len() as u32);
        out.put_u32_le(dxil.len() as u32);
        out.put_u32_le(self.dxil.len() as u32);
        out.put_u32_le(spirv.len() as u32);
        out.put_u32_le(self.spirv.len() as u32);

        for entry in &self.entries {
            entry.encode(&mut out);
        }

        out.put_slice(&dxil);
        out.put_slice(&spirv);

        Ok(out)
    }
}

/// Decoded view of a cache file with decompressed sections.
#[derive(Clone, Debug)]
pub struct ShaderCache {
    pub entries: Vec<ShaderCacheEntry>,
    pub dxil: Vec<u8>,
    pub spirv: Vec<u8>,
}

impl ShaderCache {
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut buf = bytes;

        if buf.remaining() < 24 {
            return Err(Error::Eof("cache header"));
        }

        let mut magic = [0; 4];
        buf.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(Error::BadMagic);
        }

        let count = buf.get_u32_le() as usize;
        let dxil_compressed = buf.get_u32_le() as usize;
        let dxil_size = buf.get_u32_le() as usize;
        let spirv_compressed = buf.get_u32_le() as usize;
        let spirv_size = buf.get_u32_le() as usize;

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(ShaderCacheEntry::decode(&mut buf)?);
        }

        if buf.remaining() < dxil_compressed + spirv_compressed {
            return Err(Error::Eof("cache sections"));
        }

        let dxil = zstd::bulk::decompress(&buf[..dxil_compressed], dxil_size)?;
        buf.advance(dxil_compressed);
        let spirv = zstd::bulk::decompress(&buf[..spirv_compressed], spirv_size)?;

        Ok(Self {
            entries,
            dxil,
            spirv,
        })
    }

    /// The DXIL blob of `entry`.
    pub fn dxil(&self, entry: &ShaderCacheEntry) -> &[u8] {
        &self.dxil[entry.dxil_offset as usize..(entry.dxil_offset + entry.dxil_size) as usize]
    }

    /// The SPIR-V blob of `entry`.
    pub fn spirv(&self, entry: &ShaderCacheEntry) -> &[u8] {
        &self.spirv[entry.spirv_offset as usize..(entry.spirv_offset + entry.spirv_size) as usize]
    }
}
