//! ISO9660 images with Rock Ridge and El Torito.
//!
//! - [`reader`] - read-only access to an existing image (source extraction, inspection)
//! - [`volume`] - builds a new image in memory and serializes it in one pass
//! - [`names`] - ISO9660 identifier rules and path canonicalization
//! - [`records`] - directory record and timestamp encoding shared by both sides
//! - [`rock_ridge`] - SUSP/RRIP system use entries
//! - [`eltorito`] - boot record descriptor and boot catalog
//!
//! Layout reference: ECMA-119, RRIP 1.09/1.12, El Torito 1.0.

pub mod eltorito;
pub mod names;
pub mod reader;
pub mod records;
pub mod rock_ridge;
pub mod volume;

pub use eltorito::{BootEntry, Emulation, PLATFORM_EFI};
pub use reader::{IsoEntry, IsoImage};
pub use rock_ridge::RockRidge;
pub use volume::{FinalizeSummary, TargetVolume, VolumeOptions};

/// Logical sector size. Only 2048-byte images are produced or accepted.
pub const SECTOR_SIZE: usize = 2048;

/// Sectors 0-15 form the system area; descriptors start at 16.
pub const SYSTEM_AREA_SECTORS: u32 = 16;

pub const STANDARD_ID: &[u8; 5] = b"CD001";

pub const VD_BOOT_RECORD: u8 = 0;
pub const VD_PRIMARY: u8 = 1;
pub const VD_TERMINATOR: u8 = 255;

pub const FLAG_DIRECTORY: u8 = 0x02;
pub const FLAG_MULTI_EXTENT: u8 = 0x80;

/// Maximum directory depth allowed by ECMA-119 (root is level 1).
pub const MAX_DEPTH: usize = 8;

/// Round `len` up to whole sectors.
pub(crate) fn sectors_for(len: u64) -> u32 {
    len.div_ceil(SECTOR_SIZE as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sectors_for_rounds_up() {
        assert_eq!(sectors_for(0), 0);
        assert_eq!(sectors_for(1), 1);
        assert_eq!(sectors_for(2048), 1);
        assert_eq!(sectors_for(2049), 2);
    }
}
