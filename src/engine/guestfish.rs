//! Production engine backed by a persistent `guestfish` session.
//!
//! `guestfish --listen` forks a server and prints its pid; every trait
//! call is then a `guestfish --remote=<pid>` invocation against that
//! session. One session maps to one pipeline run.

use super::{DiskEngine, EngineError, EngineResult, TarInOptions};
use log::debug;
use std::path::Path;
use std::process::Command;

pub struct GuestfishEngine {
    pid: u32,
    finished: bool,
}

impl GuestfishEngine {
    /// Start a listening guestfish session.
    pub fn start() -> EngineResult<Self> {
        let output = Command::new("guestfish").arg("--listen").output()?;
        if !output.status.success() {
            return Err(EngineError::Session(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        // stdout looks like: GUESTFISH_PID=1234; export GUESTFISH_PID
        let stdout = String::from_utf8_lossy(&output.stdout);
        let pid = stdout
            .split(|c: char| !c.is_ascii_digit())
            .find(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                EngineError::Session(format!("could not parse guestfish pid from '{}'", stdout))
            })?;

        debug!("guestfish session started, pid {}", pid);
        Ok(GuestfishEngine {
            pid,
            finished: false,
        })
    }

    fn call(&self, op: &'static str, args: &[&str]) -> EngineResult<String> {
        debug!("guestfish {} {:?}", op, args);
        let output = Command::new("guestfish")
            .arg(format!("--remote={}", self.pid))
            .arg("--")
            .arg(op)
            .args(args)
            .output()?;
        if !output.status.success() {
            return Err(EngineError::op(
                op,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .trim_end()
            .to_string())
    }

    fn call_lines(&self, op: &'static str, args: &[&str]) -> EngineResult<Vec<String>> {
        Ok(self
            .call(op, args)?
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

impl DiskEngine for GuestfishEngine {
    fn add_drive(&mut self, path: &Path) -> EngineResult<()> {
        self.call("add-drive", &[&path.display().to_string(), "format:raw"])?;
        Ok(())
    }

    fn launch(&mut self) -> EngineResult<()> {
        self.call("launch", &[])?;
        Ok(())
    }

    fn list_devices(&mut self) -> EngineResult<Vec<String>> {
        self.call_lines("list-devices", &[])
    }

    fn part_init(&mut self, device: &str, table: &str) -> EngineResult<()> {
        self.call("part-init", &[device, table])?;
        Ok(())
    }

    fn part_add(&mut self, device: &str, start: i64, end: i64) -> EngineResult<()> {
        self.call(
            "part-add",
            &[device, "p", &start.to_string(), &end.to_string()],
        )?;
        Ok(())
    }

    fn part_set_name(&mut self, device: &str, partnum: u32, name: &str) -> EngineResult<()> {
        self.call("part-set-name", &[device, &partnum.to_string(), name])?;
        Ok(())
    }

    fn part_set_gpt_type(&mut self, device: &str, partnum: u32, guid: &str) -> EngineResult<()> {
        self.call("part-set-gpt-type", &[device, &partnum.to_string(), guid])?;
        Ok(())
    }

    fn list_partitions(&mut self) -> EngineResult<Vec<String>> {
        self.call_lines("list-partitions", &[])
    }

    fn part_to_partnum(&mut self, partition: &str) -> EngineResult<u32> {
        let out = self.call("part-to-partnum", &[partition])?;
        out.parse()
            .map_err(|_| EngineError::op("part-to-partnum", format!("bad partnum '{}'", out)))
    }

    fn part_to_dev(&mut self, partition: &str) -> EngineResult<String> {
        self.call("part-to-dev", &[partition])
    }

    fn part_get_name(&mut self, device: &str, partnum: u32) -> EngineResult<String> {
        self.call("part-get-name", &[device, &partnum.to_string()])
    }

    fn mkfs(&mut self, fs_type: &str, device: &str, label: Option<&str>) -> EngineResult<()> {
        match label {
            Some(label) => {
                let label_opt = format!("label:{}", label);
                self.call("mkfs", &[fs_type, device, &label_opt])?;
            }
            None => {
                self.call("mkfs", &[fs_type, device])?;
            }
        }
        Ok(())
    }

    fn mkdir_p(&mut self, path: &str) -> EngineResult<()> {
        self.call("mkdir-p", &[path])?;
        Ok(())
    }

    fn mount(&mut self, device: &str, mount_point: &str) -> EngineResult<()> {
        self.call("mount", &[device, mount_point])?;
        Ok(())
    }

    fn write_file(&mut self, path: &str, content: &str) -> EngineResult<()> {
        self.call("write", &[path, content])?;
        Ok(())
    }

    fn write_append(&mut self, path: &str, content: &str) -> EngineResult<()> {
        self.call("write-append", &[path, content])?;
        Ok(())
    }

    fn read_file(&mut self, path: &str) -> EngineResult<String> {
        self.call("cat", &[path])
    }

    fn rm_f(&mut self, path: &str) -> EngineResult<()> {
        self.call("rm-f", &[path])?;
        Ok(())
    }

    fn command(&mut self, argv: &[&str]) -> EngineResult<String> {
        // guestfish's command takes the whole invocation as one argument
        let joined = argv.join(" ");
        self.call("command", &[&joined])
    }

    fn tar_in(&mut self, source: &Path, dest: &str, opts: TarInOptions) -> EngineResult<()> {
        let source = source.display().to_string();
        let xattrs = format!("xattrs:{}", opts.xattrs);
        let acls = format!("acls:{}", opts.acls);
        self.call("tar-in", &[&source, dest, &xattrs, &acls])?;
        Ok(())
    }

    fn shutdown(&mut self) -> EngineResult<()> {
        self.call("shutdown", &[])?;
        self.call("exit", &[])?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for GuestfishEngine {
    fn drop(&mut self) {
        if !self.finished {
            // Abandoned session after a failed run; kill it so the image
            // file is released.
            let _ = Command::new("guestfish")
                .arg(format!("--remote={}", self.pid))
                .arg("--")
                .arg("exit")
                .output();
        }
    }
}
