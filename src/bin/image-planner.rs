use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use image_planner::config::{load_request, ImageRequest};
use image_planner::distro::{AssembledManifest, Distro};
use image_planner::platform::{Arch, BootMode};
use image_planner::resolve::ResolvedContent;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "IMAGE_PLANNER_LOG";

fn usage() -> &'static str {
    "Usage:\n  image-planner image-types [x86_64|aarch64]\n  image-planner partitions <request.toml>\n  image-planner content <request.toml>\n  image-planner manifest <request.toml> <resolved.json>"
}

fn main() -> Result<()> {
    init_tracing();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let distro = Distro::rhel9();

    match args.as_slice() {
        [cmd] if cmd == "image-types" => list_image_types(&distro, None),
        [cmd, arch] if cmd == "image-types" => list_image_types(&distro, Some(arch)),
        [cmd, request] if cmd == "partitions" => print_partitions(&distro, Path::new(request)),
        [cmd, request] if cmd == "content" => print_content(&distro, Path::new(request)),
        [cmd, request, resolved] if cmd == "manifest" => {
            print_manifest(&distro, Path::new(request), Path::new(resolved))
        }
        _ => bail!(usage()),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_env_var(LOG_ENV)
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn boot_mode_label(mode: BootMode) -> &'static str {
    match mode {
        BootMode::None => "none",
        BootMode::Legacy => "legacy",
        BootMode::Uefi => "uefi",
        BootMode::Hybrid => "hybrid",
    }
}

fn list_image_types(distro: &Distro, arch: Option<&String>) -> Result<()> {
    let arches = match arch {
        Some(arch) => {
            let parsed: Arch = arch.parse().map_err(anyhow::Error::msg)?;
            if !distro.arches().contains(&parsed) {
                bail!("{} does not support architecture '{}'", distro.name, arch);
            }
            vec![parsed]
        }
        None => distro.arches(),
    };

    for arch in arches {
        for image_type in distro.image_types(arch) {
            println!(
                "{}\t{}\t{}\t{}\t{}\t{}",
                arch,
                image_type.name,
                image_type.filename,
                image_type.mime_type,
                boot_mode_label(image_type.boot_mode()),
                image_type.partition_type().unwrap_or("-"),
            );
        }
    }
    Ok(())
}

fn assemble(distro: &Distro, path: &Path) -> Result<(ImageRequest, AssembledManifest)> {
    let request = load_request(path)?;
    let assembled = distro.assemble(&request).with_context(|| {
        format!(
            "assembling '{}' for {} from '{}'",
            request.image_type,
            request.arch,
            path.display()
        )
    })?;
    for warning in &assembled.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok((request, assembled))
}

fn print_partitions(distro: &Distro, path: &Path) -> Result<()> {
    let (request, assembled) = assemble(distro, path)?;
    let Some(table) = assembled.partition_table else {
        bail!("image type '{}' does not produce a disk", request.image_type);
    };
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}

fn print_content(distro: &Distro, path: &Path) -> Result<()> {
    let (_, assembled) = assemble(distro, path)?;
    let content = assembled
        .manifest
        .content()
        .context("assembled manifest has no collected content")?;
    println!("{}", serde_json::to_string_pretty(content)?);
    Ok(())
}

fn print_manifest(distro: &Distro, request_path: &Path, resolved_path: &Path) -> Result<()> {
    let (_, mut assembled) = assemble(distro, request_path)?;
    let text = fs::read_to_string(resolved_path)
        .with_context(|| format!("reading resolved content '{}'", resolved_path.display()))?;
    let resolved: ResolvedContent = serde_json::from_str(&text)
        .with_context(|| format!("parsing resolved content '{}'", resolved_path.display()))?;

    let document = assembled
        .manifest
        .serialize(&resolved)
        .with_context(|| format!("serializing manifest with '{}'", resolved_path.display()))?;
    println!("{}", document.to_json_pretty()?);
    eprintln!("sha256: {}", document.digest()?);
    Ok(())
}
