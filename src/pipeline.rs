//! The provisioning pipeline: a validated layout plus ordered content in,
//! a bootable image out.
//!
//! One run drives a single engine session through a fixed sequence of
//! steps, each depending hard on the previous one: attach → partition →
//! format → mount → import → configure → bootloader → rewrite → finalize.
//! The first failure aborts the run with a step-tagged error; nothing is
//! retried or rolled back, the caller discards the image file and starts
//! over.

use crate::engine::{DiskEngine, EngineError, TarInOptions};
use crate::fstab;
use crate::grub::{self, GrubDefaults};
use crate::layout::{DiskLayout, LayoutError, PartitionTableKind, PART_NAME_EFI};
use crate::ordering::{self, MountOrder};
use log::info;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

const HOSTS_CONTENT: &str = "127.0.0.1 localhost\n";
const RESOLV_CONTENT: &str = "nameserver 127.0.0.1\nnameserver 8.8.8.8\n";

/// The output disk image file: created sparse at the declared size,
/// GPT-partitioned by the run.
#[derive(Debug, Clone)]
pub struct DiskImage {
    pub path: PathBuf,
    /// Declared size in bytes.
    pub size: u64,
}

impl DiskImage {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        DiskImage {
            path: path.into(),
            size,
        }
    }
}

/// Supported content source kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A tar archive extracted into the destination directory.
    Tar,
}

/// A piece of filesystem content to import into the mounted target.
#[derive(Debug, Clone)]
pub struct Content {
    pub source: PathBuf,
    pub kind: SourceKind,
    pub dest_dir: String,
}

impl Content {
    pub fn tar(source: impl Into<PathBuf>, dest_dir: impl Into<String>) -> Self {
        Content {
            source: source.into(),
            kind: SourceKind::Tar,
            dest_dir: dest_dir.into(),
        }
    }
}

/// Where a run currently stands. Strictly sequential on success; any
/// failure moves to `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Attached,
    Launched,
    Partitioned,
    Formatted,
    Mounted,
    ContentImported,
    PostConfigured,
    BootloaderInstalled,
    ConfigRewritten,
    Finalized,
    Aborted,
}

/// Step-tagged fatal errors. Every variant ends the run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid disk layout: {0}")]
    Validation(#[from] LayoutError),
    #[error("device error: {0}")]
    Device(String),
    #[error("partitioning failed: {0}")]
    Partition(String),
    #[error("creating {fs_type} on partition '{name}' failed")]
    Format {
        name: String,
        fs_type: String,
        #[source]
        source: EngineError,
    },
    #[error("mounting '{mount_point}' failed: {reason}")]
    Mount { mount_point: String, reason: String },
    #[error("importing content into '{dest}' failed")]
    Import {
        dest: String,
        #[source]
        source: EngineError,
    },
    #[error("writing configuration '{path}' failed")]
    ConfigWrite {
        path: String,
        #[source]
        source: EngineError,
    },
    #[error("bootloader install failed")]
    BootloaderInstall(#[source] EngineError),
    #[error("flushing image to disk failed, the image must not be trusted")]
    Finalize(#[source] EngineError),
}

/// Caller-supplied knobs for a run.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Sequencing rule for mounts and content imports.
    pub order: MountOrder,
    /// Content of the grub defaults file written before `update-grub`.
    pub grub: GrubDefaults,
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    /// Partitions created on the device, as counted back from the engine.
    pub partitions_created: usize,
    /// fstab entries appended to the target's `/etc/fstab`.
    pub fstab_lines: usize,
    /// The rewritten grub.cfg text.
    pub grub_cfg: String,
}

/// Drives one engine session through a full provisioning run.
pub struct Provisioner<'e, E: DiskEngine> {
    engine: &'e mut E,
    options: PipelineOptions,
    state: PipelineState,
}

impl<'e, E: DiskEngine> Provisioner<'e, E> {
    pub fn new(engine: &'e mut E, options: PipelineOptions) -> Self {
        Provisioner {
            engine,
            options,
            state: PipelineState::Created,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run the whole pipeline. On error the state is `Aborted` and the
    /// engine session is left to the caller to release.
    pub fn run(
        &mut self,
        image: &DiskImage,
        layout: &DiskLayout,
        contents: &[Content],
    ) -> Result<ProvisionReport, ProvisionError> {
        let result = self.run_steps(image, layout, contents);
        if result.is_err() {
            self.state = PipelineState::Aborted;
        }
        result
    }

    fn run_steps(
        &mut self,
        image: &DiskImage,
        layout: &DiskLayout,
        contents: &[Content],
    ) -> Result<ProvisionReport, ProvisionError> {
        layout.validate()?;

        info!("create {}", image.path.display());
        let device = self.attach(image)?;

        let partitions_created = self.partition(&device, layout)?;
        self.format(&device, layout)?;
        self.mount_all(layout)?;
        self.import(contents)?;
        let fstab_lines = self.post_configure(layout)?;
        self.install_bootloader(&device, layout)?;
        let grub_cfg = self.rewrite_grub_cfg()?;
        self.finalize()?;

        Ok(ProvisionReport {
            partitions_created,
            fstab_lines,
            grub_cfg,
        })
    }

    /// Create the sparse image file and bind it as the engine's sole drive.
    fn attach(&mut self, image: &DiskImage) -> Result<String, ProvisionError> {
        let file = fs::File::create(&image.path).map_err(|e| {
            ProvisionError::Device(format!("could not create '{}': {}", image.path.display(), e))
        })?;
        file.set_len(image.size).map_err(|e| {
            ProvisionError::Device(format!(
                "could not truncate '{}' to {} bytes: {}",
                image.path.display(),
                image.size,
                e
            ))
        })?;

        self.engine
            .add_drive(&image.path)
            .map_err(|e| ProvisionError::Device(e.to_string()))?;
        self.state = PipelineState::Attached;

        self.engine
            .launch()
            .map_err(|e| ProvisionError::Device(e.to_string()))?;

        let devices = self
            .engine
            .list_devices()
            .map_err(|e| ProvisionError::Device(e.to_string()))?;
        if devices.len() != 1 {
            return Err(ProvisionError::Device(format!(
                "expected a single device from the engine, got {}",
                devices.len()
            )));
        }
        self.state = PipelineState::Launched;
        Ok(devices.into_iter().next().unwrap())
    }

    /// Initialize the GPT table and add every declared partition.
    fn partition(&mut self, device: &str, layout: &DiskLayout) -> Result<usize, ProvisionError> {
        let table = match layout.table {
            PartitionTableKind::Gpt => "gpt",
            PartitionTableKind::Msdos => "msdos",
        };
        self.engine
            .part_init(device, table)
            .map_err(|e| ProvisionError::Partition(e.to_string()))?;

        for p in &layout.partitions {
            if p.end <= p.start {
                continue;
            }
            self.engine
                .part_add(device, p.start, p.end)
                .map_err(|e| ProvisionError::Partition(format!("add '{}': {}", p.name, e)))?;
            self.engine
                .part_set_name(device, p.number, &p.name)
                .map_err(|e| ProvisionError::Partition(format!("name '{}': {}", p.name, e)))?;
            if let Some(guid) = &p.gpt_type {
                self.engine
                    .part_set_gpt_type(device, p.number, guid)
                    .map_err(|e| ProvisionError::Partition(format!("type '{}': {}", p.name, e)))?;
            }
        }

        let created = self
            .engine
            .list_partitions()
            .map_err(|e| ProvisionError::Partition(e.to_string()))?
            .len();
        if created != layout.partitions.len() {
            return Err(ProvisionError::Partition(format!(
                "expected {} partitions, engine reports {}",
                layout.partitions.len(),
                created
            )));
        }

        self.state = PipelineState::Partitioned;
        Ok(created)
    }

    /// Create filesystems, with labels, on every partition that wants one.
    fn format(&mut self, device: &str, layout: &DiskLayout) -> Result<(), ProvisionError> {
        for p in &layout.partitions {
            let Some(fs_type) = p.fs_type.as_deref() else {
                continue;
            };
            let node = format!("{}{}", device, p.number);
            self.engine
                .mkfs(fs_type, &node, p.fs_label.as_deref())
                .map_err(|source| ProvisionError::Format {
                    name: p.name.clone(),
                    fs_type: fs_type.to_string(),
                    source,
                })?;
            info!("  mkfs {} on {} ({})", fs_type, node, p.name);
        }
        self.state = PipelineState::Formatted;
        Ok(())
    }

    /// Mount every partition with a mount point, parents before children.
    fn mount_all(&mut self, layout: &DiskLayout) -> Result<(), ProvisionError> {
        info!("rootfs setup start");
        for p in ordering::sorted_partitions(&layout.partitions, self.options.order) {
            let Some(mount_point) = p.mount_point.clone() else {
                continue;
            };
            let node = self
                .partition_device_by_name(&p.name)
                .map_err(|e| ProvisionError::Mount {
                    mount_point: mount_point.clone(),
                    reason: e.to_string(),
                })?
                .ok_or_else(|| ProvisionError::Mount {
                    mount_point: mount_point.clone(),
                    reason: format!("no partition named '{}' on the device", p.name),
                })?;

            if mount_point != "/" {
                self.engine
                    .mkdir_p(&mount_point)
                    .map_err(|e| ProvisionError::Mount {
                        mount_point: mount_point.clone(),
                        reason: e.to_string(),
                    })?;
            }
            self.engine
                .mount(&node, &mount_point)
                .map_err(|e| ProvisionError::Mount {
                    mount_point: mount_point.clone(),
                    reason: e.to_string(),
                })?;
            info!("  mount {} at {}", node, mount_point);
        }
        self.state = PipelineState::Mounted;
        Ok(())
    }

    /// Find the device node of the partition carrying the given GPT name.
    ///
    /// Linear scan over the engine's partition list; fine at the
    /// partition counts a bootable disk carries.
    fn partition_device_by_name(&mut self, name: &str) -> Result<Option<String>, EngineError> {
        for node in self.engine.list_partitions()? {
            let num = self.engine.part_to_partnum(&node)?;
            let dev = self.engine.part_to_dev(&node)?;
            if self.engine.part_get_name(&dev, num)? == name {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    /// Import content in the same order the destinations were mounted.
    fn import(&mut self, contents: &[Content]) -> Result<(), ProvisionError> {
        info!("import rootfs data");
        for c in ordering::sorted_contents(contents, self.options.order) {
            match c.kind {
                SourceKind::Tar => {
                    self.engine
                        .tar_in(
                            &c.source,
                            &c.dest_dir,
                            TarInOptions {
                                xattrs: false,
                                acls: false,
                            },
                        )
                        .map_err(|source| ProvisionError::Import {
                            dest: c.dest_dir.clone(),
                            source,
                        })?;
                    info!("  import {} into {}", c.source.display(), c.dest_dir);
                }
            }
        }
        self.state = PipelineState::ContentImported;
        Ok(())
    }

    /// fstab, network bootstrap files, and removal of the container marker.
    ///
    /// Runs after import on purpose: imported content would overwrite
    /// anything written earlier.
    fn post_configure(&mut self, layout: &DiskLayout) -> Result<usize, ProvisionError> {
        let entries = fstab::entries_for(layout);
        let text = fstab::render(&entries);
        info!("/etc/fstab:\n{}", text);
        self.write_config("/etc/fstab", &text, true)?;

        self.write_config("/etc/hosts", HOSTS_CONTENT, false)?;
        self.write_config("/etc/resolv.conf", RESOLV_CONTENT, false)?;

        // The content came out of a container export; left in place this
        // makes init tooling believe it is still inside one.
        self.engine
            .rm_f("/.dockerenv")
            .map_err(|source| ProvisionError::ConfigWrite {
                path: "/.dockerenv".to_string(),
                source,
            })?;

        self.state = PipelineState::PostConfigured;
        Ok(entries.len())
    }

    fn write_config(
        &mut self,
        path: &str,
        content: &str,
        append: bool,
    ) -> Result<(), ProvisionError> {
        let result = if append {
            self.engine.write_append(path, content)
        } else {
            self.engine.write_file(path, content)
        };
        result.map_err(|source| ProvisionError::ConfigWrite {
            path: path.to_string(),
            source,
        })
    }

    /// Install grub for both firmware paths and generate its config.
    ///
    /// The BIOS pass drops core.img into the bios boot partition; the UEFI
    /// pass installs removable into the EFI directory so no NVRAM entry is
    /// needed on the boot host.
    fn install_bootloader(
        &mut self,
        device: &str,
        layout: &DiskLayout,
    ) -> Result<(), ProvisionError> {
        info!("install bootloader");
        let efi_dir = layout
            .partitions
            .iter()
            .find(|p| p.name == PART_NAME_EFI)
            .and_then(|p| p.mount_point.clone())
            .unwrap_or_else(|| "/boot".to_string());

        self.engine
            .command(&["grub-install", "--target=i386-pc", device])
            .map_err(ProvisionError::BootloaderInstall)?;

        let efi_directory = format!("--efi-directory={}", efi_dir);
        self.engine
            .command(&[
                "grub-install",
                "--target=x86_64-efi",
                &efi_directory,
                "--bootloader-id=GRUB",
                "--removable",
                device,
            ])
            .map_err(ProvisionError::BootloaderInstall)?;

        let defaults = self.options.grub.render();
        self.engine
            .write_file(grub::GRUB_DEFAULTS_PATH, &defaults)
            .map_err(ProvisionError::BootloaderInstall)?;

        self.engine
            .command(&["update-grub"])
            .map_err(ProvisionError::BootloaderInstall)?;

        self.state = PipelineState::BootloaderInstalled;
        Ok(())
    }

    /// Make the generated grub.cfg device-independent, keeping a backup.
    fn rewrite_grub_cfg(&mut self) -> Result<String, ProvisionError> {
        let cfg_path = grub::GRUB_CFG_PATH;
        let original =
            self.engine
                .read_file(cfg_path)
                .map_err(|source| ProvisionError::ConfigWrite {
                    path: cfg_path.to_string(),
                    source,
                })?;

        let backup_path = format!("{}{}", cfg_path, grub::GRUB_CFG_BACKUP_SUFFIX);
        self.write_config(&backup_path, &original, false)?;

        let rewritten = grub::rewrite_device_references(&original);
        self.write_config(cfg_path, &rewritten, false)?;

        self.state = PipelineState::ConfigRewritten;
        Ok(rewritten)
    }

    /// Flush to the backing file and end the session.
    fn finalize(&mut self) -> Result<(), ProvisionError> {
        self.engine.shutdown().map_err(ProvisionError::Finalize)?;
        self.state = PipelineState::Finalized;
        info!("image finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineResult;
    use std::collections::HashMap;
    use std::path::Path;

    const GENERATED_GRUB_CFG: &str = "set root='hd0,gpt3'\n\
         search --no-floppy --fs-uuid --set=root 1234-ABCD\n\
         linux /boot/vmlinuz-5.15 root=/dev/sda3 ro console=ttyS0\n\
         linux /boot/vmlinuz-5.15 root=UUID=0a1b2c3d-4e5f-6071-8293-a4b5c6d7e8f9 ro recovery\n";

    #[derive(Debug, Clone)]
    struct MockPartition {
        node: String,
        number: u32,
        name: String,
        gpt_type: Option<String>,
    }

    /// In-memory engine: records every call, answers lookups from the
    /// recorded partition table, fakes update-grub output.
    #[derive(Default)]
    struct MockEngine {
        drives: Vec<PathBuf>,
        launched: bool,
        devices: Vec<String>,
        partitions: Vec<MockPartition>,
        filesystems: HashMap<String, (String, Option<String>)>,
        mounts: Vec<(String, String)>,
        dirs: Vec<String>,
        files: HashMap<String, String>,
        imports: Vec<(PathBuf, String, TarInOptions)>,
        commands: Vec<Vec<String>>,
        shut_down: bool,
        // failure knobs
        report_extra_device: bool,
        swallow_partitions: usize,
        fail_mkfs_label: Option<String>,
    }

    impl MockEngine {
        fn new() -> Self {
            MockEngine::default()
        }

        fn commands_named(&self, name: &str) -> usize {
            self.commands.iter().filter(|c| c[0] == name).count()
        }
    }

    impl DiskEngine for MockEngine {
        fn add_drive(&mut self, path: &Path) -> EngineResult<()> {
            self.drives.push(path.to_path_buf());
            self.devices.push("/dev/sda".to_string());
            if self.report_extra_device {
                self.devices.push("/dev/sdb".to_string());
            }
            Ok(())
        }

        fn launch(&mut self) -> EngineResult<()> {
            self.launched = true;
            Ok(())
        }

        fn list_devices(&mut self) -> EngineResult<Vec<String>> {
            Ok(self.devices.clone())
        }

        fn part_init(&mut self, _device: &str, table: &str) -> EngineResult<()> {
            assert_eq!(table, "gpt");
            self.partitions.clear();
            Ok(())
        }

        fn part_add(&mut self, device: &str, _start: i64, _end: i64) -> EngineResult<()> {
            let number = self.partitions.len() as u32 + 1;
            self.partitions.push(MockPartition {
                node: format!("{}{}", device, number),
                number,
                name: String::new(),
                gpt_type: None,
            });
            Ok(())
        }

        fn part_set_name(&mut self, _device: &str, partnum: u32, name: &str) -> EngineResult<()> {
            let p = self
                .partitions
                .iter_mut()
                .find(|p| p.number == partnum)
                .ok_or_else(|| EngineError::op("part-set-name", "no such partition"))?;
            p.name = name.to_string();
            Ok(())
        }

        fn part_set_gpt_type(
            &mut self,
            _device: &str,
            partnum: u32,
            guid: &str,
        ) -> EngineResult<()> {
            let p = self
                .partitions
                .iter_mut()
                .find(|p| p.number == partnum)
                .ok_or_else(|| EngineError::op("part-set-gpt-type", "no such partition"))?;
            p.gpt_type = Some(guid.to_string());
            Ok(())
        }

        fn list_partitions(&mut self) -> EngineResult<Vec<String>> {
            let mut nodes: Vec<String> = self.partitions.iter().map(|p| p.node.clone()).collect();
            nodes.truncate(nodes.len().saturating_sub(self.swallow_partitions));
            Ok(nodes)
        }

        fn part_to_partnum(&mut self, partition: &str) -> EngineResult<u32> {
            self.partitions
                .iter()
                .find(|p| p.node == partition)
                .map(|p| p.number)
                .ok_or_else(|| EngineError::op("part-to-partnum", "no such partition"))
        }

        fn part_to_dev(&mut self, _partition: &str) -> EngineResult<String> {
            Ok("/dev/sda".to_string())
        }

        fn part_get_name(&mut self, _device: &str, partnum: u32) -> EngineResult<String> {
            self.partitions
                .iter()
                .find(|p| p.number == partnum)
                .map(|p| p.name.clone())
                .ok_or_else(|| EngineError::op("part-get-name", "no such partition"))
        }

        fn mkfs(&mut self, fs_type: &str, device: &str, label: Option<&str>) -> EngineResult<()> {
            if self.fail_mkfs_label.as_deref() == label {
                return Err(EngineError::op("mkfs", "injected failure"));
            }
            self.filesystems.insert(
                device.to_string(),
                (fs_type.to_string(), label.map(str::to_string)),
            );
            Ok(())
        }

        fn mkdir_p(&mut self, path: &str) -> EngineResult<()> {
            self.dirs.push(path.to_string());
            Ok(())
        }

        fn mount(&mut self, device: &str, mount_point: &str) -> EngineResult<()> {
            self.mounts.push((device.to_string(), mount_point.to_string()));
            Ok(())
        }

        fn write_file(&mut self, path: &str, content: &str) -> EngineResult<()> {
            self.files.insert(path.to_string(), content.to_string());
            Ok(())
        }

        fn write_append(&mut self, path: &str, content: &str) -> EngineResult<()> {
            self.files
                .entry(path.to_string())
                .or_default()
                .push_str(content);
            Ok(())
        }

        fn read_file(&mut self, path: &str) -> EngineResult<String> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| EngineError::op("cat", format!("no such file: {}", path)))
        }

        fn rm_f(&mut self, path: &str) -> EngineResult<()> {
            self.files.remove(path);
            Ok(())
        }

        fn command(&mut self, argv: &[&str]) -> EngineResult<String> {
            self.commands.push(argv.iter().map(|s| s.to_string()).collect());
            if argv[0] == "update-grub" {
                self.files.insert(
                    grub::GRUB_CFG_PATH.to_string(),
                    GENERATED_GRUB_CFG.to_string(),
                );
            }
            Ok(String::new())
        }

        fn tar_in(&mut self, source: &Path, dest: &str, opts: TarInOptions) -> EngineResult<()> {
            self.imports.push((source.to_path_buf(), dest.to_string(), opts));
            Ok(())
        }

        fn shutdown(&mut self) -> EngineResult<()> {
            self.shut_down = true;
            Ok(())
        }
    }

    fn image() -> DiskImage {
        let dir = std::env::temp_dir();
        DiskImage::new(dir.join("d2b-test.img"), 64 * 1024 * 1024)
    }

    #[test]
    fn full_run_over_default_layout() {
        let layout = DiskLayout::default_gpt();
        let contents = vec![Content::tar("/tmp/rootfs.tar", "/")];
        let mut engine = MockEngine::new();

        let report = {
            let mut p = Provisioner::new(&mut engine, PipelineOptions::default());
            let report = p.run(&image(), &layout, &contents).unwrap();
            assert_eq!(p.state(), PipelineState::Finalized);
            report
        };

        assert_eq!(report.partitions_created, 4);
        assert_eq!(report.fstab_lines, 2);
        assert!(report.grub_cfg.contains("LABEL=ROOT"));
        assert!(!report.grub_cfg.contains("root=/dev/"));
        assert!(!report.grub_cfg.contains("root=UUID="));

        assert!(engine.launched);
        assert!(engine.shut_down);

        // biosboot: no filesystem, never formatted, never mounted
        assert!(!engine.filesystems.contains_key("/dev/sda1"));
        assert!(engine.mounts.iter().all(|(d, _)| d != "/dev/sda1"));

        // mounts happen root-first, imports follow the same order
        let mount_points: Vec<&str> = engine.mounts.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(mount_points, vec!["/", "/boot", "/var"]);
        assert_eq!(engine.imports.len(), 1);
        assert_eq!(engine.imports[0].1, "/");
        assert!(!engine.imports[0].2.xattrs);
        assert!(!engine.imports[0].2.acls);

        // fstab excludes the BOOT partition
        let fstab = &engine.files["/etc/fstab"];
        assert_eq!(
            fstab,
            "LABEL=ROOT / ext4 defaults,noatime,rw 0 0\nLABEL=VAR /var ext4 defaults,noatime,rw 0 0"
        );

        // network bootstrap files and container marker
        assert_eq!(engine.files["/etc/hosts"], "127.0.0.1 localhost\n");
        assert!(engine.files["/etc/resolv.conf"].contains("nameserver 8.8.8.8"));
        assert!(!engine.files.contains_key("/.dockerenv"));

        // both grub-install passes plus the defaults file
        assert_eq!(engine.commands_named("grub-install"), 2);
        assert!(engine
            .commands
            .iter()
            .any(|c| c.contains(&"--target=i386-pc".to_string())));
        assert!(engine
            .commands
            .iter()
            .any(|c| c.contains(&"--efi-directory=/boot".to_string())));
        assert!(engine.files[grub::GRUB_DEFAULTS_PATH].contains("GRUB_TERMINAL"));

        // backup preserved, live config rewritten
        let backup = format!("{}{}", grub::GRUB_CFG_PATH, grub::GRUB_CFG_BACKUP_SUFFIX);
        assert_eq!(engine.files[&backup], GENERATED_GRUB_CFG);
        assert_eq!(engine.files[grub::GRUB_CFG_PATH], report.grub_cfg);
    }

    #[test]
    fn invalid_layout_aborts_before_touching_the_engine() {
        let mut layout = DiskLayout::default_gpt();
        layout.partitions.retain(|p| p.name != "efi");
        layout.partitions.iter_mut().for_each(|p| {
            if p.number > 2 {
                p.number -= 1;
            }
        });
        let mut engine = MockEngine::new();
        let mut p = Provisioner::new(&mut engine, PipelineOptions::default());
        let err = p.run(&image(), &layout, &[]).unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
        assert_eq!(p.state(), PipelineState::Aborted);
        assert!(engine.drives.is_empty());
    }

    #[test]
    fn more_than_one_device_is_fatal() {
        let layout = DiskLayout::default_gpt();
        let mut engine = MockEngine::new();
        engine.report_extra_device = true;
        let mut p = Provisioner::new(&mut engine, PipelineOptions::default());
        let err = p.run(&image(), &layout, &[]).unwrap_err();
        assert!(matches!(err, ProvisionError::Device(_)));
        assert_eq!(p.state(), PipelineState::Aborted);
    }

    #[test]
    fn partition_count_mismatch_is_fatal() {
        let layout = DiskLayout::default_gpt();
        let mut engine = MockEngine::new();
        engine.swallow_partitions = 1;
        let mut p = Provisioner::new(&mut engine, PipelineOptions::default());
        let err = p.run(&image(), &layout, &[]).unwrap_err();
        assert!(matches!(err, ProvisionError::Partition(_)));
        assert_eq!(p.state(), PipelineState::Aborted);
    }

    #[test]
    fn mkfs_failure_names_the_partition() {
        let layout = DiskLayout::default_gpt();
        let mut engine = MockEngine::new();
        engine.fail_mkfs_label = Some("VAR".to_string());
        let mut p = Provisioner::new(&mut engine, PipelineOptions::default());
        let err = p.run(&image(), &layout, &[]).unwrap_err();
        match err {
            ProvisionError::Format { name, fs_type, .. } => {
                assert_eq!(name, "var");
                assert_eq!(fs_type, "ext4");
            }
            other => panic!("expected Format error, got {:?}", other),
        }
        assert_eq!(p.state(), PipelineState::Aborted);
    }

    #[test]
    fn custom_grub_defaults_reach_the_target() {
        let layout = DiskLayout::default_gpt();
        let contents = vec![Content::tar("/tmp/rootfs.tar", "/")];
        let mut engine = MockEngine::new();
        let options = PipelineOptions {
            grub: GrubDefaults {
                timeout: 1,
                ..GrubDefaults::default()
            },
            ..PipelineOptions::default()
        };
        Provisioner::new(&mut engine, options)
            .run(&image(), &layout, &contents)
            .unwrap();
        assert!(engine.files[grub::GRUB_DEFAULTS_PATH].starts_with("GRUB_TIMEOUT=1\n"));
    }
}
