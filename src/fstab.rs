//! fstab generation from a disk layout.
//!
//! Entries refer to filesystems by label, never by device path, so the
//! table stays valid whatever device number the image comes up as.

use crate::layout::{DiskLayout, Partition};

/// One `/etc/fstab` line, derived from the layout after content import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub label: String,
    pub mount_point: String,
    pub fs_type: String,
    pub options: String,
}

impl FstabEntry {
    pub fn render(&self) -> String {
        format!(
            "LABEL={} {} {} {} 0 0",
            self.label, self.mount_point, self.fs_type, self.options
        )
    }
}

fn eligible(p: &Partition) -> bool {
    // The boot partition is mounted by systemd at runtime, a static entry
    // for it would fight the generator.
    p.mount_point.is_some() && p.fs_type.is_some() && p.fs_label.as_deref() != Some("BOOT")
}

/// Derive the fstab entries for a layout, in mount-point order.
///
/// Partitions without a mount point or filesystem, and the BOOT-labeled
/// EFI partition, are excluded.
pub fn entries_for(layout: &DiskLayout) -> Vec<FstabEntry> {
    let mut entries: Vec<FstabEntry> = layout
        .partitions
        .iter()
        .filter(|p| eligible(p))
        .map(|p| FstabEntry {
            label: p.fs_label.clone().unwrap_or_default(),
            mount_point: p.mount_point.clone().unwrap_or_default(),
            fs_type: p.fs_type.clone().unwrap_or_default(),
            options: p
                .mount_options
                .clone()
                .unwrap_or_else(|| "defaults".to_string()),
        })
        .collect();
    entries.sort_by(|a, b| a.mount_point.cmp(&b.mount_point));
    entries
}

/// Render the entries as the text appended to `/etc/fstab`.
pub fn render(entries: &[FstabEntry]) -> String {
    entries
        .iter()
        .map(FstabEntry::render)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::DiskLayout;

    #[test]
    fn default_layout_yields_root_and_var_only() {
        let layout = DiskLayout::default_gpt();
        let entries = entries_for(&layout);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].render(), "LABEL=ROOT / ext4 defaults,noatime,rw 0 0");
        assert_eq!(entries[1].render(), "LABEL=VAR /var ext4 defaults,noatime,rw 0 0");
    }

    #[test]
    fn boot_partition_is_excluded() {
        let layout = DiskLayout::default_gpt();
        let entries = entries_for(&layout);
        assert!(entries.iter().all(|e| e.label != "BOOT"));
        assert!(entries.iter().all(|e| e.mount_point != "/boot"));
    }

    #[test]
    fn renders_newline_joined_lines() {
        let layout = DiskLayout::default_gpt();
        let text = render(&entries_for(&layout));
        assert_eq!(
            text,
            "LABEL=ROOT / ext4 defaults,noatime,rw 0 0\nLABEL=VAR /var ext4 defaults,noatime,rw 0 0"
        );
    }
}
