use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;

use d2b::config::BuildConfig;
use d2b::engine::guestfish::GuestfishEngine;
use d2b::layout::DiskLayout;
use d2b::ordering::MountOrder;
use d2b::pipeline::{Content, DiskImage, PipelineOptions, Provisioner};
use d2b::{docker, preflight};

const GIB: u64 = 1024 * 1024 * 1024;

/// Build a bootable GPT disk image from a Docker image.
#[derive(Parser, Debug)]
#[command(name = "d2b", version, about)]
struct Args {
    /// Base OS image; built from --config when omitted
    #[arg(long)]
    image: Option<String>,

    /// Build recipe for constructing the base image
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disk layout file; the built-in BIOS/GPT/EFI layout when omitted
    #[arg(long)]
    layout: Option<PathBuf>,

    /// Output disk image path
    #[arg(long, default_value = "disk.img")]
    output: PathBuf,

    /// Output image size in GiB
    #[arg(long, default_value_t = 2)]
    size_gb: u64,

    /// Mount and import shallow paths strictly first instead of the
    /// historical string sort
    #[arg(long)]
    depth_order: bool,

    /// Enable engine call tracing
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.debug { "debug" } else { "info" }),
    )
    .init();

    preflight::check_required_tools(preflight::REQUIRED_TOOLS)?;

    let layout = match &args.layout {
        Some(path) => DiskLayout::from_toml_file(path)?,
        None => DiskLayout::default_gpt(),
    };
    layout.validate().context("invalid disk layout")?;

    let image_ref = match (&args.image, &args.config) {
        (Some(image), _) => image.clone(),
        (None, Some(config_path)) => {
            let config = BuildConfig::from_toml_file(config_path)?;
            docker::build_image(&config)?
        }
        (None, None) => bail!("either --image or --config is required"),
    };

    info!("create boot image from base {}", image_ref);
    let rootfs_tar = docker::unpack_image(&image_ref)?;
    let contents = vec![Content::tar(rootfs_tar, "/")];

    let image = DiskImage::new(&args.output, args.size_gb * GIB);
    let options = PipelineOptions {
        order: if args.depth_order {
            MountOrder::PathDepth
        } else {
            MountOrder::Lexicographic
        },
        ..PipelineOptions::default()
    };

    let mut engine = GuestfishEngine::start()?;
    let report = Provisioner::new(&mut engine, options)
        .run(&image, &layout, &contents)
        .with_context(|| format!("provisioning '{}'", args.output.display()))?;

    info!(
        "done: {} ({} partitions, {} fstab entries)",
        args.output.display(),
        report.partitions_created,
        report.fstab_lines
    );
    Ok(())
}
