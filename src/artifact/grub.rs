//! GRUB configuration for the assembled medium.
//!
//! The second-stage loader on the ESP reads `/boot/grub/grub.cfg` from the
//! optical volume. The menu has a single entry that boots the installer with
//! the NoCloud data source, which finds `user-data` and `meta-data` on the
//! volume labeled `CIDATA`.

use crate::layout::{INITRD_BOOT_PATH, KERNEL_BOOT_PATH, VOLUME_ID};

/// Kernel parameters for an unattended install from the NoCloud seed.
pub const AUTOINSTALL_CMDLINE: &str = "quiet autoinstall ds=nocloud ---";

/// Options for rendering the boot menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootMenu {
    /// Deployment label shown in the menu entry title.
    pub label: String,

    /// OS name prefixed to the title.
    pub os_name: String,

    /// Volume label GRUB searches for to set `root`.
    pub volume_id: String,

    /// Kernel path inside the volume, as GRUB sees it.
    pub kernel_path: String,

    pub initrd_path: String,

    pub cmdline: String,

    /// Seconds before the default entry boots.
    ///
    /// Default: 0
    pub timeout: u32,
}

impl BootMenu {
    /// Menu for an autoinstall run of deployment `label`, using the paths the
    /// assembler stages the kernel and initrd at.
    pub fn autoinstall(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            os_name: "Ubuntu".to_string(),
            volume_id: VOLUME_ID.to_string(),
            kernel_path: KERNEL_BOOT_PATH.to_string(),
            initrd_path: INITRD_BOOT_PATH.to_string(),
            cmdline: AUTOINSTALL_CMDLINE.to_string(),
            timeout: 0,
        }
    }
}

/// Render `grub.cfg`.
///
/// # Example
///
/// ```rust,ignore
/// use autoiso::artifact::grub::{render_boot_menu, BootMenu};
///
/// let cfg = render_boot_menu(&BootMenu::autoinstall("vm01"));
/// assert!(cfg.contains("menuentry \"Ubuntu Auto Install vm01\""));
/// ```
pub fn render_boot_menu(menu: &BootMenu) -> String {
    let title = quote(&format!("{} Auto Install {}", menu.os_name, menu.label));
    format!(
        "set timeout={timeout}\n\
         \n\
         search --no-floppy --label {volume_id} --set=root\n\
         \n\
         menuentry {title} {{\n\
         \x20   linux {kernel} {cmdline}\n\
         \x20   initrd {initrd}\n\
         }}\n",
        timeout = menu.timeout,
        volume_id = menu.volume_id,
        kernel = menu.kernel_path,
        cmdline = menu.cmdline,
        initrd = menu.initrd_path,
    )
}

/// Double-quoted GRUB word; `"`, `\` and `$` are escaped.
fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if matches!(c, '"' | '\\' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
