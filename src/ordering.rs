//! Ordering of mounts and content imports.
//!
//! A filesystem must not be mounted, and content must not be imported,
//! before its parent path exists. The historical rule is a plain ascending
//! string sort of the mount point / destination directory, which places
//! `/` before `/boot` before `/var` but is not true path-depth ordering:
//! sibling paths sharing a prefix can interleave with nested ones
//! (`/a/b` sorts before `/ab`). [`MountOrder::Lexicographic`] keeps that
//! behavior as the default; [`MountOrder::PathDepth`] is the strict
//! shallow-first alternative and must be opted into explicitly.

use crate::layout::Partition;
use crate::pipeline::Content;

/// How mounts and content imports are sequenced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MountOrder {
    /// Ascending string comparison of the whole path (historical default).
    #[default]
    Lexicographic,
    /// Fewer path components first, ties broken lexicographically.
    PathDepth,
}

fn depth(path: &str) -> usize {
    path.split('/').filter(|c| !c.is_empty()).count()
}

fn compare(a: &str, b: &str, order: MountOrder) -> std::cmp::Ordering {
    match order {
        MountOrder::Lexicographic => a.cmp(b),
        MountOrder::PathDepth => depth(a).cmp(&depth(b)).then_with(|| a.cmp(b)),
    }
}

/// Partitions in the order they should be mounted.
///
/// Partitions without a mount point sort first and are skipped by the
/// mount step.
pub fn sorted_partitions<'a>(partitions: &'a [Partition], order: MountOrder) -> Vec<&'a Partition> {
    let mut out: Vec<&Partition> = partitions.iter().collect();
    out.sort_by(|a, b| {
        compare(
            a.mount_point.as_deref().unwrap_or(""),
            b.mount_point.as_deref().unwrap_or(""),
            order,
        )
    });
    out
}

/// Content entries in the order they should be imported, which must match
/// the order their destination filesystems were mounted.
pub fn sorted_contents<'a>(contents: &'a [Content], order: MountOrder) -> Vec<&'a Content> {
    let mut out: Vec<&Content> = contents.iter().collect();
    out.sort_by(|a, b| compare(&a.dest_dir, &b.dest_dir, order));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Content, SourceKind};

    fn content(dest: &str) -> Content {
        Content {
            source: format!("{}.tar", dest.trim_matches('/')).into(),
            kind: SourceKind::Tar,
            dest_dir: dest.to_string(),
        }
    }

    #[test]
    fn root_sorts_before_children() {
        let contents = vec![content("/var"), content("/"), content("/boot")];
        let ordered: Vec<&str> = sorted_contents(&contents, MountOrder::Lexicographic)
            .iter()
            .map(|c| c.dest_dir.as_str())
            .collect();
        assert_eq!(ordered, vec!["/", "/boot", "/var"]);
    }

    #[test]
    fn default_layout_mounts_root_first() {
        let layout = crate::layout::DiskLayout::default_gpt();
        let ordered: Vec<&str> = sorted_partitions(&layout.partitions, MountOrder::default())
            .iter()
            .filter_map(|p| p.mount_point.as_deref())
            .collect();
        assert_eq!(ordered, vec!["/", "/boot", "/var"]);
    }

    #[test]
    fn lexicographic_and_depth_orders_diverge_on_shared_prefixes() {
        let contents = vec![content("/ab"), content("/a/b")];

        let lex: Vec<&str> = sorted_contents(&contents, MountOrder::Lexicographic)
            .iter()
            .map(|c| c.dest_dir.as_str())
            .collect();
        // '/' compares below 'b', so the nested path wins the string sort
        assert_eq!(lex, vec!["/a/b", "/ab"]);

        let by_depth: Vec<&str> = sorted_contents(&contents, MountOrder::PathDepth)
            .iter()
            .map(|c| c.dest_dir.as_str())
            .collect();
        assert_eq!(by_depth, vec!["/ab", "/a/b"]);
    }
}
