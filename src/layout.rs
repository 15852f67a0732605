//! Fixed layout of the produced installer image.
//!
//! The source installer's layout drifts between releases; these constants pin
//! down where things land in the OUTPUT, plus the default candidate lists used
//! to find assets in the INPUT.

/// Volume identifier. The NoCloud data source looks for a volume labelled
/// `cidata`/`CIDATA`, so this doubles as the data-source marker.
pub const VOLUME_ID: &str = "CIDATA";

/// Interchange level used for the output volume.
pub const INTERCHANGE_LEVEL: u8 = 3;

/// Default EFI boot image size in megabytes.
pub const EFIBOOT_SIZE_MB: u64 = 16;

/// Directory skeleton created in the output volume, parents first.
pub const ISO_SKELETON: &[&str] = &["/EFI", "/EFI/BOOT", "/CASPER", "/BOOT", "/BOOT/GRUB"];

pub const KERNEL_ISO_PATH: &str = "/CASPER/VMLINUZ.;1";
pub const KERNEL_ALIAS: &str = "vmlinuz";
pub const INITRD_ISO_PATH: &str = "/CASPER/INITRD.;1";
pub const INITRD_ALIAS: &str = "initrd";

pub const GRUB_CFG_ISO_PATH: &str = "/BOOT/GRUB/GRUB.CFG;1";
pub const GRUB_CFG_ALIAS: &str = "grub.cfg";

pub const EFIBOOT_ISO_PATH: &str = "/EFI/BOOT/EFIBOOT.IMG;1";
pub const EFIBOOT_ALIAS: &str = "efiboot.img";

/// Where the El Torito catalog itself is recorded in the volume.
pub const BOOT_CATALOG_ISO_PATH: &str = "/BOOT.CAT;1";
pub const BOOT_CATALOG_ALIAS: &str = "boot.catalog";

/// Kernel and initrd as GRUB sees them through Rock Ridge names.
pub const KERNEL_BOOT_PATH: &str = "/casper/vmlinuz";
pub const INITRD_BOOT_PATH: &str = "/casper/initrd";

/// Names of the ESP payload files inside `/EFI/BOOT`.
pub const EFI_BOOTLOADER: &str = "BOOTX64.EFI";
pub const EFI_SECOND_STAGE: &str = "grubx64.efi";

/// A NoCloud seed file copied from the payload directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedFile {
    /// File name in the payload directory, also the Rock Ridge alias.
    pub name: &'static str,
    pub iso_path: &'static str,
    pub required: bool,
}

pub const SEED_FILES: &[SeedFile] = &[
    SeedFile {
        name: "user-data",
        iso_path: "/USER_DATA.;1",
        required: true,
    },
    SeedFile {
        name: "meta-data",
        iso_path: "/META_DATA.;1",
        required: true,
    },
    SeedFile {
        name: "vendor-data",
        iso_path: "/VENDOR_DATA.;1",
        required: false,
    },
    SeedFile {
        name: "network-config",
        iso_path: "/NETWORK_CONFIG.;1",
        required: false,
    },
];

// Candidate lists. Default and hardware-enablement kernel builds use
// different file names depending on the release.
pub const KERNEL_CANDIDATES: &[&str] = &["/CASPER/VMLINUZ.;1", "/CASPER/HWE_VMLINUZ.;1"];
pub const INITRD_CANDIDATES: &[&str] = &["/CASPER/INITRD.;1", "/CASPER/HWE_INITRD.;1"];
pub const BOOTLOADER_CANDIDATES: &[&str] = &["/EFI/BOOT/BOOTX64.EFI;1"];
pub const SECOND_STAGE_CANDIDATES: &[&str] = &["/EFI/BOOT/GRUBX64.EFI;1"];

/// Paths that must exist in every image this crate produces.
pub const REQUIRED_OUTPUT_PATHS: &[&str] = &[
    KERNEL_ISO_PATH,
    INITRD_ISO_PATH,
    GRUB_CFG_ISO_PATH,
    EFIBOOT_ISO_PATH,
    "/USER_DATA.;1",
    "/META_DATA.;1",
];
