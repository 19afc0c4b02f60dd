//! Disk partition layout: definition, loading, and validation.
//!
//! A [`DiskLayout`] describes the GPT partition table the pipeline will
//! create. Layouts come from a toml file or from [`DiskLayout::default_gpt`],
//! and must pass [`DiskLayout::validate`] before a build starts.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// GPT type GUID for the BIOS boot partition (grub core.img landing zone).
pub const GPT_TYPE_BIOS_BOOT: &str = "21686148-6449-6E6F-744E-656564454649";

/// GPT type GUID for the EFI system partition.
pub const GPT_TYPE_EFI_SYSTEM: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";

/// Partition names every layout must carry for the hybrid BIOS/UEFI boot path.
pub const PART_NAME_ROOT: &str = "root";
pub const PART_NAME_EFI: &str = "efi";
pub const PART_NAME_BIOSBOOT: &str = "biosboot";

/// Partition table scheme. Only GPT is supported; msdos is representable so
/// that layout files declaring it fail validation with a clear reason
/// instead of a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionTableKind {
    Gpt,
    Msdos,
}

impl fmt::Display for PartitionTableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionTableKind::Gpt => write!(f, "gpt"),
            PartitionTableKind::Msdos => write!(f, "msdos"),
        }
    }
}

/// One partition in the layout.
///
/// A partition without a filesystem type is never formatted or mounted;
/// the BIOS boot partition is the usual case, holding raw bootloader code.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Partition {
    /// Partition number, 1-based, contiguous across the layout.
    pub number: u32,
    /// First sector of the partition.
    pub start: i64,
    /// Last sector of the partition (inclusive, must be > start).
    pub end: i64,
    /// GPT partition name, used by the pipeline to locate the device node.
    pub name: String,
    /// GPT type GUID, e.g. [`GPT_TYPE_EFI_SYSTEM`].
    #[serde(default)]
    pub gpt_type: Option<String>,
    /// Filesystem to create ("ext4", "vfat", ...). None means raw.
    #[serde(default)]
    pub fs_type: Option<String>,
    /// Filesystem label, what fstab and grub.cfg end up referring to.
    #[serde(default)]
    pub fs_label: Option<String>,
    /// Where the filesystem is mounted inside the image.
    #[serde(default)]
    pub mount_point: Option<String>,
    /// Mount options for the fstab entry.
    #[serde(default)]
    pub mount_options: Option<String>,
}

/// Reasons a layout is rejected, first failure wins.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("partition table must be gpt, found {0}")]
    UnsupportedTable(PartitionTableKind),
    #[error("layout is missing a '{PART_NAME_ROOT}' partition mounted at /")]
    MissingRoot,
    #[error("layout is missing an '{PART_NAME_EFI}' boot partition")]
    MissingEfi,
    #[error("partition numbers must be unique and contiguous from 1, found {0}")]
    BadNumbering(u32),
    #[error("partition '{name}' has end sector {end} not after start sector {start}")]
    EmptyRange { name: String, start: i64, end: i64 },
    #[error("partitions '{first}' and '{second}' overlap in sectors")]
    Overlap { first: String, second: String },
}

/// The full partition table description for one disk image.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskLayout {
    pub table: PartitionTableKind,
    #[serde(rename = "partition")]
    pub partitions: Vec<Partition>,
}

impl DiskLayout {
    /// Load an explicit layout from a toml file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading disk layout '{}'", path.display()))?;
        let layout: DiskLayout = toml::from_str(&raw)
            .with_context(|| format!("parsing disk layout '{}'", path.display()))?;
        Ok(layout)
    }

    /// The reference BIOS/GPT/EFI layout.
    ///
    /// biosboot carries no filesystem (grub writes core.img into it raw),
    /// efi is the vfat EFI system partition mounted at /boot, then root
    /// and /var on ext4. See
    /// <https://wiki.archlinux.org/title/GRUB#GUID_Partition_Table_(GPT)_specific_instructions>.
    pub fn default_gpt() -> Self {
        DiskLayout {
            table: PartitionTableKind::Gpt,
            partitions: vec![
                Partition {
                    number: 1,
                    start: 2048,
                    end: 4095,
                    name: PART_NAME_BIOSBOOT.to_string(),
                    gpt_type: Some(GPT_TYPE_BIOS_BOOT.to_string()),
                    fs_type: None,
                    fs_label: None,
                    mount_point: None,
                    mount_options: None,
                },
                Partition {
                    number: 2,
                    start: 8192,
                    end: 212991,
                    name: PART_NAME_EFI.to_string(),
                    gpt_type: Some(GPT_TYPE_EFI_SYSTEM.to_string()),
                    fs_type: Some("vfat".to_string()),
                    fs_label: Some("BOOT".to_string()),
                    mount_point: Some("/boot".to_string()),
                    mount_options: None,
                },
                Partition {
                    number: 3,
                    start: 212992,
                    end: 3751007,
                    name: PART_NAME_ROOT.to_string(),
                    gpt_type: None,
                    fs_type: Some("ext4".to_string()),
                    fs_label: Some("ROOT".to_string()),
                    mount_point: Some("/".to_string()),
                    mount_options: Some("defaults,noatime,rw".to_string()),
                },
                Partition {
                    number: 4,
                    start: 3751936,
                    end: 4161535,
                    name: "var".to_string(),
                    gpt_type: None,
                    fs_type: Some("ext4".to_string()),
                    fs_label: Some("VAR".to_string()),
                    mount_point: Some("/var".to_string()),
                    mount_options: Some("defaults,noatime,rw".to_string()),
                },
            ],
        }
    }

    /// Validate the layout before provisioning starts.
    ///
    /// Checks run in a fixed order and the first failure is returned:
    /// the table must be GPT, a `root` partition mounted at `/` and an
    /// `efi` partition must exist, partition numbers must be contiguous
    /// from 1, and sector ranges must be non-empty and non-overlapping.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.table != PartitionTableKind::Gpt {
            return Err(LayoutError::UnsupportedTable(self.table));
        }

        let has_root = self
            .partitions
            .iter()
            .any(|p| p.name == PART_NAME_ROOT && p.mount_point.as_deref() == Some("/"));
        if !has_root {
            return Err(LayoutError::MissingRoot);
        }

        if !self.partitions.iter().any(|p| p.name == PART_NAME_EFI) {
            return Err(LayoutError::MissingEfi);
        }

        let mut numbers: Vec<u32> = self.partitions.iter().map(|p| p.number).collect();
        numbers.sort_unstable();
        for (i, n) in numbers.iter().enumerate() {
            if *n != i as u32 + 1 {
                return Err(LayoutError::BadNumbering(*n));
            }
        }

        for p in &self.partitions {
            if p.end <= p.start {
                return Err(LayoutError::EmptyRange {
                    name: p.name.clone(),
                    start: p.start,
                    end: p.end,
                });
            }
        }

        let mut by_start: Vec<&Partition> = self.partitions.iter().collect();
        by_start.sort_by_key(|p| p.start);
        for pair in by_start.windows(2) {
            if pair[1].start <= pair[0].end {
                return Err(LayoutError::Overlap {
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }

        Ok(())
    }
}
