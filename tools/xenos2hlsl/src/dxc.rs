//! Invocation boundary for the downstream DXC compiler.

use std::io::Write as _;
use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context};
use tempfile::NamedTempFile;

/// Bytecode flavour DXC is asked to produce.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Dxil,
    Spirv,
}

/// Builds the DXC argument list for one shader.
///
/// `library` selects `lib_6_3` for raytracing-capable linking and is
/// mutually exclusive with SPIR-V output.
pub fn arguments(pixel_shader: bool, library: bool, target: Target) -> Vec<&'static str> {
    assert!(!library || target != Target::Spirv);

    let mut args = Vec::new();

    if library {
        args.push("-T");
        args.push("lib_6_3");
    } else if pixel_shader {
        args.push("-T");
        args.push("ps_6_0");
    } else {
        args.push("-T");
        args.push("vs_6_0");
    }

    args.push("-HV");
    args.push("2021");
    args.push("-all-resources-bound");

    match target {
        Target::Spirv => {
            args.push("-spirv");
            args.push("-fvk-use-dx-layout");

            if !pixel_shader {
                args.push("-fvk-invert-y");
            }
        }
        Target::Dxil => {
            args.push("-Wno-ignored-attributes");
            args.push("-Qstrip_reflect");
        }
    }

    args.push("-Qstrip_debug");
    args
}

/// Compiles `source` by spawning `dxc`, returning the object bytes.
pub fn compile(source: &str, pixel_shader: bool, target: Target) -> anyhow::Result<Vec<u8>> {
    let mut input = NamedTempFile::with_suffix(".hlsl").context("creating dxc input")?;
    input.write_all(source.as_bytes()).context("writing dxc input")?;

    let output = NamedTempFile::with_suffix(".bin").context("creating dxc output")?;

    let status = Command::new("dxc")
        .args(arguments(pixel_shader, false, target))
        .arg("-Fo")
        .arg(output.path())
        .arg(input.path())
        .status()
        .context("spawning dxc")?;

    if !status.success() {
        bail!("dxc exited with {status}");
    }

    let object = std::fs::read(output.path()).context("reading dxc output")?;

    if target == Target::Dxil {
        verify_signed(&object)?;
    }

    Ok(object)
}

/// A DXIL container with a zeroed digest was not signed by the validator and
/// will be rejected by the runtime.
fn verify_signed(dxil: &[u8]) -> anyhow::Result<()> {
    let digest = dxil.get(4..20).context("dxil object too short")?;
    if digest.iter().all(|&b| b == 0) {
        bail!("dxil was not signed properly");
    }

    Ok(())
}

/// Writes the emitted source next to the final output for inspection.
pub fn write_source(path: &Path, source: &str) -> anyhow::Result<()> {
    std::fs::write(path, source).with_context(|| format!("writing {}", path.display()))
}
