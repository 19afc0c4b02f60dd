//! Docker collaborators: build a base image from a recipe, and export an
//! image's filesystem as the tar the pipeline imports at `/`.

use crate::config::BuildConfig;
use crate::process::Cmd;
use anyhow::{bail, Context, Result};
use log::{debug, info};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Render the Dockerfile for a build recipe.
///
/// The base installs what a disk image needs to boot that a container
/// never carries: grub for both firmware paths, a pinned kernel with an
/// initramfs, and systemd as pid 1.
pub fn render_dockerfile(config: &BuildConfig) -> String {
    let mut out = String::new();
    out.push_str(&format!("FROM ubuntu:{} AS ubuntu\n\n", config.base_version));
    out.push_str("ENV DEBIAN_FRONTEND=noninteractive\n\n");

    out.push_str("# bootloader and kernel image\n");
    out.push_str(&format!("ARG KERNEL_VERSION={}\n", config.kernel));
    out.push_str(
        r#"RUN echo "link_in_boot=no" >> /etc/kernel-img.conf \
    && apt-get update \
    && apt-get install --no-install-recommends -y \
        grub-pc \
        grub-efi-amd64-bin \
        grub-efi-amd64-signed \
        linux-image-${KERNEL_VERSION}-generic \
        linux-modules-extra-${KERNEL_VERSION}-generic \
        initramfs-tools \
        intel-microcode

RUN update-initramfs -k ${KERNEL_VERSION}-generic -c

# systemd as /sbin/init
RUN apt-get install --no-install-recommends -y \
        systemd \
        systemd-sysv

RUN systemctl enable systemd-networkd.service
"#,
    );
    for service in config.services.iter().filter(|s| s.enabled) {
        out.push_str(&format!("RUN systemctl enable {}\n", service.name));
    }
    out.push('\n');

    if let Some(login) = &config.login {
        out.push_str(&format!("RUN echo '{}' | chpasswd\n\n", login));
    }

    if !config.packages.is_empty() {
        out.push_str(&format!(
            "RUN apt-get update \\\n    && apt-get install --no-install-recommends -y \\\n        {}\n\n",
            config.packages.join(" ")
        ));
    }

    if !config.files.is_empty() {
        out.push_str("COPY tree/ /\n");
    }

    out
}

/// Materialize the build context: the rendered Dockerfile plus the
/// recipe's files under `tree/`, with their declared modes.
pub fn write_build_context(config: &BuildConfig, dir: &Path) -> Result<()> {
    let dockerfile = render_dockerfile(config);
    debug!("dockerfile:\n{}", dockerfile);
    fs::write(dir.join("Dockerfile"), dockerfile).context("writing Dockerfile")?;

    let tree = dir.join("tree");
    for f in &config.files {
        let mode = match f.mode.as_deref() {
            Some(raw) => u32::from_str_radix(raw, 8)
                .with_context(|| format!("bad file mode '{}' for '{}'", raw, f.path))?,
            None => 0o644,
        };
        let target = tree.join(f.path.trim_start_matches('/'));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directories for '{}'", f.path))?;
        }
        fs::write(&target, &f.content).with_context(|| format!("writing '{}'", f.path))?;
        fs::set_permissions(&target, fs::Permissions::from_mode(mode))
            .with_context(|| format!("setting mode on '{}'", f.path))?;
        info!("  created file {} mode {:o}", f.path, mode);
    }
    Ok(())
}

/// Build the base image from a recipe and return its image id.
pub fn build_image(config: &BuildConfig) -> Result<String> {
    let context_dir = tempfile::Builder::new()
        .prefix("d2b-imagedir")
        .tempdir()
        .context("creating build context directory")?;
    write_build_context(config, context_dir.path())?;

    info!("building base image from {}", context_dir.path().display());
    let image_id = Cmd::new("docker")
        .args(["build", "-q"])
        .arg_path(context_dir.path())
        .error_msg("docker build failed")
        .capture_stdout()?;

    if image_id.is_empty() {
        bail!("docker build produced no image id");
    }
    Ok(image_id)
}

/// Export an image's filesystem to a tar on the host.
///
/// Docker only exports containers, so a throwaway container is created
/// and removed around the export.
pub fn unpack_image(image: &str) -> Result<PathBuf> {
    let container_id = Cmd::new("docker")
        .args(["create", image])
        .error_msg("docker create failed")
        .capture_stdout()?;
    if container_id.is_empty() {
        bail!("docker create returned no container id for '{}'", image);
    }

    let short_id: String = container_id.chars().take(12).collect();
    let out_tar = std::env::temp_dir().join(format!("d2b-{}.tar", short_id));

    let export = Cmd::new("docker")
        .args(["export", "-o"])
        .arg_path(&out_tar)
        .arg(&container_id)
        .error_msg("docker export failed")
        .run();

    let _ = Cmd::new("docker")
        .args(["rm", &container_id])
        .allow_fail()
        .run();

    export?;
    info!("exported {} to {}", image, out_tar.display());
    Ok(out_tar)
}
