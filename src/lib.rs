//! Assembles UEFI-bootable autoinstall images.
//!
//! Takes a stock installer ISO and a NoCloud payload directory and produces a
//! small image that boots straight into an unattended install:
//!
//! - **Extraction** - kernel, initrd and both UEFI loaders pulled out of the
//!   source image through ordered candidate lists
//! - **EFI boot image** - a FAT16 filesystem holding `/EFI/BOOT/BOOTX64.EFI`
//!   and `grubx64.efi`, written from scratch
//! - **Volume** - ISO9660 with Rock Ridge names and an El Torito UEFI entry,
//!   labelled `CIDATA` so cloud-init finds the seed files on it
//! - **Handoff** - optional checksum and a JSON attach request for the
//!   hypervisor tooling
//!
//! # Architecture
//!
//! ```text
//! autoiso
//!     │
//!     ├── assemble    one run: workspace, extract, ESP, volume, finalize
//!     ├── extract     candidate lookup against the source image
//!     ├── artifact    iso (reader + writer), esp, grub, checksum
//!     ├── inspect     read-back layout checks
//!     ├── config      TOML run configuration
//!     └── attach      attach request for the VM
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use autoiso::{assemble, AssemblyPlan};
//!
//! let plan = AssemblyPlan::new(
//!     "/iso/ubuntu-24.04.3-live-server-amd64.iso",
//!     "vm01/autoinstall",
//!     "vm01",
//!     "vm01/bootstrap.iso",
//! );
//! let report = assemble(&plan)?;
//! println!("{} bytes", report.image_len);
//! ```

pub mod artifact;
pub mod assemble;
pub mod attach;
pub mod config;
pub mod error;
pub mod extract;
pub mod inspect;
pub mod layout;
pub mod workspace;

pub use assemble::{assemble, AssemblyPlan, AssemblyReport};
pub use attach::{attach_request_path, write_attach_request, AttachRequest};
pub use config::{load_config, LoadedConfig};
pub use error::{Error, Result};
pub use inspect::{render_tree, verify_layout, LayoutReport};
