//! Read-back checks for a produced image.
//!
//! `verify_layout` is the checklist every image from [`crate::assemble`] must
//! pass: the NoCloud volume label, the kernel/initrd/config/seed files (seeds
//! under their exact Rock Ridge names), and a single UEFI boot entry that
//! points at the EFI boot image.

use std::fmt::Write as _;

use crate::artifact::iso::{Emulation, IsoImage, MAX_DEPTH, PLATFORM_EFI};
use crate::error::Result;
use crate::layout::{EFIBOOT_ISO_PATH, REQUIRED_OUTPUT_PATHS, SEED_FILES, VOLUME_ID};

/// Outcome of one checklist item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub item: String,
    /// `None` when the check passed, otherwise what is wrong.
    pub failure: Option<String>,
}

impl CheckResult {
    fn pass(item: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            failure: None,
        }
    }

    fn fail(item: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            failure: Some(reason.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LayoutReport {
    pub checks: Vec<CheckResult>,
}

impl LayoutReport {
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(CheckResult::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed())
    }
}

/// Check an image against the output layout.
pub fn verify_layout(image: &mut IsoImage) -> Result<LayoutReport> {
    let mut report = LayoutReport::default();

    if image.volume_id() == VOLUME_ID {
        report.checks.push(CheckResult::pass("volume identifier"));
    } else {
        report.checks.push(CheckResult::fail(
            "volume identifier",
            format!("is '{}', NoCloud expects '{VOLUME_ID}'", image.volume_id()),
        ));
    }

    for &path in REQUIRED_OUTPUT_PATHS {
        let seed = SEED_FILES.iter().find(|s| s.iso_path == path);
        let check = match image.lookup(path)? {
            Some(entry) if entry.is_dir => CheckResult::fail(path, "is a directory"),
            // cloud-init matches seed files by exact name
            Some(entry) => match seed {
                Some(seed) if entry.rr_name.as_deref() != Some(seed.name) => CheckResult::fail(
                    path,
                    format!(
                        "Rock Ridge name is {:?}, NoCloud expects '{}'",
                        entry.rr_name, seed.name
                    ),
                ),
                _ => CheckResult::pass(path),
            },
            None => CheckResult::fail(path, "missing"),
        };
        report.checks.push(check);
    }

    let boot = image.boot_entries()?;
    let esp = image.lookup(EFIBOOT_ISO_PATH)?;
    let item = "El Torito UEFI entry";
    match (boot.as_slice(), esp) {
        ([], _) => report.checks.push(CheckResult::fail(item, "no boot catalog")),
        ([entry], Some(esp)) => {
            let problem = if entry.platform_id != PLATFORM_EFI {
                Some(format!("platform 0x{:02x}, expected 0xef", entry.platform_id))
            } else if entry.emulation != Emulation::NoEmulation {
                Some(format!("emulation {:?}", entry.emulation))
            } else if !entry.bootable {
                Some("not marked bootable".to_string())
            } else if entry.load_lba != esp.lba {
                Some(format!(
                    "loads sector {}, EFI boot image is at {}",
                    entry.load_lba, esp.lba
                ))
            } else {
                None
            };
            report.checks.push(match problem {
                Some(reason) => CheckResult::fail(item, reason),
                None => CheckResult::pass(item),
            });
        }
        ([_], None) => report
            .checks
            .push(CheckResult::fail(item, "EFI boot image missing")),
        (entries, _) => report.checks.push(CheckResult::fail(
            item,
            format!("{} entries, expected exactly one", entries.len()),
        )),
    }

    Ok(report)
}

/// Indented listing of the volume, Rock Ridge names first.
pub fn render_tree(image: &mut IsoImage) -> Result<String> {
    let mut out = String::from("/\n");
    walk(image, "", 1, &mut out)?;
    Ok(out)
}

fn walk(image: &mut IsoImage, dir: &str, depth: usize, out: &mut String) -> Result<()> {
    let path = if dir.is_empty() { "/" } else { dir };
    for entry in image.read_dir(path)? {
        let indent = "  ".repeat(depth);
        let _ = match &entry.rr_name {
            Some(name) => write!(out, "{indent}{name} [{}]", entry.identifier),
            None => write!(out, "{indent}{}", entry.identifier),
        };
        if entry.is_dir {
            out.push_str("/\n");
            if depth < MAX_DEPTH {
                let child = format!("{dir}/{}", entry.identifier);
                walk(image, &child, depth + 1, out)?;
            }
        } else {
            let _ = writeln!(out, " {} bytes @ {}", entry.len, entry.lba);
        }
    }
    Ok(())
}
