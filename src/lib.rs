//! Turn a Docker image into a bootable GPT disk image.
//!
//! The heavy lifting of block devices and filesystems is delegated to an
//! external engine (libguestfs, driven through `guestfish`); this crate owns
//! the orchestration that makes the result actually boot:
//!
//! - **Layout model** - GPT partition table description and validation
//! - **Orderer** - parent-before-child sequencing of mounts and content
//! - **Pipeline** - attach → partition → format → mount → import →
//!   configure → bootloader → rewrite → finalize, fatal on first error
//! - **Grub rewrite** - replaces build-time device references in the
//!   generated grub.cfg with filesystem labels so the image boots on any
//!   host topology
//!
//! # Example
//!
//! ```rust,ignore
//! use d2b::engine::guestfish::GuestfishEngine;
//! use d2b::layout::DiskLayout;
//! use d2b::pipeline::{Content, DiskImage, PipelineOptions, Provisioner, SourceKind};
//!
//! let layout = DiskLayout::default_gpt();
//! layout.validate()?;
//!
//! let image = DiskImage::new("disk.img", 2 * 1024 * 1024 * 1024);
//! let contents = vec![Content::tar("rootfs.tar", "/")];
//!
//! let mut engine = GuestfishEngine::start()?;
//! let report = Provisioner::new(&mut engine, PipelineOptions::default())
//!     .run(&image, &layout, &contents)?;
//! println!("created {} partitions", report.partitions_created);
//! ```

pub mod config;
pub mod docker;
pub mod engine;
pub mod fstab;
pub mod grub;
pub mod layout;
pub mod ordering;
pub mod pipeline;
pub mod preflight;
pub mod process;

pub use layout::{DiskLayout, LayoutError, Partition};
pub use ordering::MountOrder;
pub use pipeline::{
    Content, DiskImage, PipelineOptions, PipelineState, ProvisionError, ProvisionReport,
    Provisioner, SourceKind,
};
