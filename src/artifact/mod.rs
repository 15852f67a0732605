//! Artifact builders for the installer image.
//!
//! - [`iso`] - ISO9660 reader and writer (Rock Ridge, El Torito)
//! - [`esp`] - FAT16 EFI System Partition image
//! - [`grub`] - GRUB menu for the autoinstall entry
//! - [`checksum`] - SHA512 sidecar for the finished image
//!
//! Everything here works on plain files and byte buffers; sequencing and
//! progress output live in [`crate::assemble`].

pub mod checksum;
pub mod esp;
pub mod grub;
pub mod iso;
