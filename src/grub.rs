//! Grub defaults and the device-independence rewrite of grub.cfg.
//!
//! `update-grub` inside the target hard-codes the build-time device of the
//! root and boot partitions. [`rewrite_device_references`] swaps those for
//! filesystem labels, which is what lets the image boot when it shows up
//! as a different disk on the eventual host.

/// Where the defaults file lands inside the target (Debian-family path).
pub const GRUB_DEFAULTS_PATH: &str = "/etc/default/grub";

/// The generated runtime configuration inside the target.
pub const GRUB_CFG_PATH: &str = "/boot/grub/grub.cfg";

/// Suffix for the pre-rewrite backup kept next to the config.
pub const GRUB_CFG_BACKUP_SUFFIX: &str = ".ori";

/// Content of `/etc/default/grub` written before `update-grub` runs.
///
/// The defaults favor headless operation: serial console on, graphics
/// payload off. `Default` reproduces the values the tool has always
/// written; callers override fields to change console parameters without
/// patching the pipeline.
#[derive(Debug, Clone)]
pub struct GrubDefaults {
    pub timeout: u32,
    pub terminal: String,
    pub gfxpayload: String,
    pub cmdline_default: String,
    pub serial_command: String,
}

impl Default for GrubDefaults {
    fn default() -> Self {
        GrubDefaults {
            timeout: 5,
            terminal: "serial console".to_string(),
            gfxpayload: "text".to_string(),
            cmdline_default:
                "console=tty0 console=ttyS0,115200 no_timer_check nofb nomodeset vga=normal"
                    .to_string(),
            serial_command: "serial --speed=115200 --unit=0 --word=8 --parity=no --stop=1"
                .to_string(),
        }
    }
}

impl GrubDefaults {
    pub fn render(&self) -> String {
        format!(
            "GRUB_TIMEOUT={}\n\
             GRUB_TERMINAL=\"{}\"\n\
             GRUB_GFXPAYLOAD_LINUX={}\n\
             GRUB_CMDLINE_LINUX_DEFAULT=\"{}\"\n\
             GRUB_SERIAL_COMMAND=\"{}\"\n",
            self.timeout, self.terminal, self.gfxpayload, self.cmdline_default, self.serial_command
        )
    }
}

/// Replace build-time device references in a generated grub.cfg with
/// label-based ones.
///
/// Four substitutions, order-independent and idempotent:
/// `root=/dev/sdXN`, `root='hdN,gptN'` and `root=UUID=...` all become
/// `root=LABEL=ROOT`; a `search --no-floppy --fs-uuid --set=root ...`
/// tail becomes `search --no-floppy --set=root --label BOOT`. Input
/// without any of the patterns passes through unchanged.
pub fn rewrite_device_references(cfg: &str) -> String {
    let mut out: String = cfg
        .lines()
        .map(|line| {
            let line = rewrite_short_device(line);
            let line = rewrite_gpt_hint(&line);
            let line = rewrite_uuid_root(&line);
            rewrite_fs_uuid_search(&line)
        })
        .collect::<Vec<_>>()
        .join("\n");
    if cfg.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// `root=/dev/sd<letter><digit>` → `root=LABEL=ROOT`.
fn rewrite_short_device(line: &str) -> String {
    const PAT: &str = "root=/dev/sd";
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(pos) = rest.find(PAT) {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);
        let after = &tail[PAT.len()..];
        let mut chars = after.chars();
        match (chars.next(), chars.next()) {
            (Some(l), Some(d)) if l.is_ascii_lowercase() && d.is_ascii_digit() => {
                out.push_str("root=LABEL=ROOT");
                rest = &after[2..];
            }
            _ => {
                out.push_str(PAT);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `root='hd<digit>,gpt<digit>'` → `root=LABEL=ROOT`.
fn rewrite_gpt_hint(line: &str) -> String {
    const PAT: &str = "root='hd";
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(pos) = rest.find(PAT) {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);
        let after = &tail[PAT.len()..];
        let bytes = after.as_bytes();
        let matched = bytes.len() >= 7
            && bytes[0].is_ascii_digit()
            && &bytes[1..5] == b",gpt"
            && bytes[5].is_ascii_digit()
            && bytes[6] == b'\'';
        if matched {
            out.push_str("root=LABEL=ROOT");
            rest = &after[7..];
        } else {
            out.push_str(PAT);
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

/// `root=UUID=<hex-and-dashes>` → `root=LABEL=ROOT`.
fn rewrite_uuid_root(line: &str) -> String {
    const PAT: &str = "root=UUID=";
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(pos) = rest.find(PAT) {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);
        let after = &tail[PAT.len()..];
        let uuid_len = after
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
            .count();
        out.push_str("root=LABEL=ROOT");
        rest = &after[uuid_len..];
    }
    out.push_str(rest);
    out
}

/// Replace a UUID-based boot volume search with a label-based one, from
/// the search token through the end of the line.
fn rewrite_fs_uuid_search(line: &str) -> String {
    const PAT: &str = "search --no-floppy --fs-uuid --set=root";
    match line.find(PAT) {
        Some(pos) => format!(
            "{}search --no-floppy --set=root --label BOOT",
            &line[..pos]
        ),
        None => line.to_string(),
    }
}
