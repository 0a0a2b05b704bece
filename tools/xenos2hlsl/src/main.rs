//! Batch recompiler for Xenos shader containers.
//!
//! With a directory input every `.xpu`/`.xvu` file is scanned for embedded
//! containers and the deduplicated set is recompiled, compiled to DXIL and
//! SPIR-V through DXC and packed into a shader cache. With a file input the
//! single container is recompiled and the HLSL text written out.

mod dxc;

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use xenos_cache::CacheBuilder;
use xenos_recomp::Recompiler;
use xenos_shader::container::scan_containers;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Shader directory for a cache build, or a single container file.
    input: PathBuf,

    /// Output cache file, or the emitted HLSL for a single container.
    output: PathBuf,

    /// Common helper include prepended to every emitted shader.
    include: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let args = Args::parse();

    let include = fs::read_to_string(&args.include)
        .with_context(|| format!("reading include {}", args.include.display()))?;

    if args.input.is_dir() {
        build_cache(&args, &include)
    } else {
        emit_single(&args, &include)
    }
}

fn emit_single(args: &Args, include: &str) -> anyhow::Result<()> {
    let bytes = fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;

    let shader = Recompiler::new()
        .recompile(&bytes, include)
        .with_context(|| format!("recompiling {}", args.input.display()))?;

    dxc::write_source(&args.output, &shader.source)?;

    info!(
        pixel_shader = shader.is_pixel_shader,
        spec_constants = shader.spec_constants.bits(),
        "emitted {}",
        args.output.display()
    );

    Ok(())
}

fn build_cache(args: &Args, include: &str) -> anyhow::Result<()> {
    let mut builder = CacheBuilder::new();

    let mut paths: Vec<_> = fs::read_dir(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("xpu" | "xvu")
            )
        })
        .collect();
    paths.sort();

    for path in paths {
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;

        for range in scan_containers(&bytes) {
            let container = &bytes[range];
            let hash = CacheBuilder::container_hash(container);
            if builder.contains(hash) {
                continue;
            }

            let shader = match Recompiler::new().recompile(container, include) {
                Ok(shader) => shader,
                Err(err) => {
                    warn!("skipping container in {}: {err}", path.display());
                    continue;
                }
            };

            info!(
                pixel_shader = shader.is_pixel_shader,
                "recompiling shader {hash:016x} from {}",
                path.display()
            );

            let dxil = dxc::compile(&shader.source, shader.is_pixel_shader, dxc::Target::Dxil)?;
            let spirv = dxc::compile(&shader.source, shader.is_pixel_shader, dxc::Target::Spirv)?;

            builder.insert(hash, &dxil, &spirv, shader.spec_constants.bits());
        }
    }

    info!("writing {} shaders to cache", builder.len());

    let cache = builder.finish().context("compressing cache")?;
    fs::write(&args.output, cache)
        .with_context(|| format!("writing {}", args.output.display()))?;

    Ok(())
}
