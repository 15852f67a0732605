//! El Torito boot record and boot catalog.
//!
//! The boot catalog starts with a validation entry followed by an
//! initial/default entry, then optional section headers with their own
//! entries. This crate only ever writes one UEFI no-emulation entry, but
//! reads any catalog layout back.

use super::records::{put_padded, read_le_u16, read_le_u32};
use super::{SECTOR_SIZE, STANDARD_ID, VD_BOOT_RECORD};

/// Platform id for UEFI boot images.
pub const PLATFORM_EFI: u8 = 0xEF;

pub const BOOT_SYSTEM_ID: &str = "EL TORITO SPECIFICATION";

/// Catalog entry size (32 bytes)
pub const ENTRY_SIZE: usize = 32;

const HEADER_VALIDATION: u8 = 0x01;
const HEADER_SECTION: u8 = 0x90;
const HEADER_FINAL_SECTION: u8 = 0x91;
const INDICATOR_BOOTABLE: u8 = 0x88;
const INDICATOR_NOT_BOOTABLE: u8 = 0x00;
const EXTENSION_ENTRY: u8 = 0x44;

/// Boot media emulation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emulation {
    NoEmulation,
    Floppy12,
    Floppy144,
    Floppy288,
    HardDisk,
}

impl Emulation {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte & 0x0F {
            0 => Some(Emulation::NoEmulation),
            1 => Some(Emulation::Floppy12),
            2 => Some(Emulation::Floppy144),
            3 => Some(Emulation::Floppy288),
            4 => Some(Emulation::HardDisk),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Emulation::NoEmulation => 0,
            Emulation::Floppy12 => 1,
            Emulation::Floppy144 => 2,
            Emulation::Floppy288 => 3,
            Emulation::HardDisk => 4,
        }
    }
}

/// A boot entry registered on a volume under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntry {
    /// Canonical in-volume path of the boot image.
    pub target: String,
    pub platform_id: u8,
    pub emulation: Emulation,
    pub bootable: bool,
}

impl BootEntry {
    /// Bootable UEFI entry pointing at a raw ESP image.
    pub fn uefi(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            platform_id: PLATFORM_EFI,
            emulation: Emulation::NoEmulation,
            bootable: true,
        }
    }
}

/// A boot entry decoded from an existing catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub platform_id: u8,
    pub bootable: bool,
    pub emulation: Emulation,
    pub load_lba: u32,
    pub sector_count: u16,
}

/// Image size in 512-byte virtual sectors. Images too large for the 16-bit
/// field record 0, which firmware treats as "read the image's own size".
pub fn virtual_sector_count(image_len: u64) -> u16 {
    u16::try_from(image_len.div_ceil(512)).unwrap_or(0)
}

/// Boot Record volume descriptor pointing at the catalog.
pub fn boot_record_descriptor(catalog_lba: u32) -> Vec<u8> {
    let mut sector = vec![0u8; SECTOR_SIZE];
    sector[0] = VD_BOOT_RECORD;
    sector[1..6].copy_from_slice(STANDARD_ID);
    sector[6] = 1;
    put_padded(&mut sector[7..39], BOOT_SYSTEM_ID, 0);
    sector[71..75].copy_from_slice(&catalog_lba.to_le_bytes());
    sector
}

/// One-sector boot catalog holding a single default entry.
pub fn encode_catalog(entry: &BootEntry, load_lba: u32, image_len: u64) -> Vec<u8> {
    let mut catalog = vec![0u8; SECTOR_SIZE];

    let validation = &mut catalog[..ENTRY_SIZE];
    validation[0] = HEADER_VALIDATION;
    validation[1] = entry.platform_id;
    validation[30] = 0x55;
    validation[31] = 0xAA;
    let checksum = validation_checksum(validation);
    validation[28..30].copy_from_slice(&checksum.to_le_bytes());

    let initial = &mut catalog[ENTRY_SIZE..ENTRY_SIZE * 2];
    initial[0] = if entry.bootable {
        INDICATOR_BOOTABLE
    } else {
        INDICATOR_NOT_BOOTABLE
    };
    initial[1] = entry.emulation.to_byte();
    initial[6..8].copy_from_slice(&virtual_sector_count(image_len).to_le_bytes());
    initial[8..12].copy_from_slice(&load_lba.to_le_bytes());

    catalog
}

/// Value for the checksum field so that all 16-bit words sum to zero.
/// The checksum field itself must be zero when this is computed.
fn validation_checksum(entry: &[u8]) -> u16 {
    let sum = entry
        .chunks_exact(2)
        .fold(0u16, |acc, word| acc.wrapping_add(read_le_u16(word)));
    0u16.wrapping_sub(sum)
}

/// Catalog location from a Boot Record volume descriptor, if it is an El
/// Torito one.
pub fn parse_boot_record(sector: &[u8]) -> Option<u32> {
    if sector.len() < 75 || sector[0] != VD_BOOT_RECORD || &sector[1..6] != STANDARD_ID {
        return None;
    }
    let id = &sector[7..39];
    let id_len = id.iter().position(|&b| b == 0).unwrap_or(id.len());
    if &id[..id_len] != BOOT_SYSTEM_ID.as_bytes() {
        return None;
    }
    Some(read_le_u32(&sector[71..75]))
}

/// Decode every boot entry of a catalog.
pub fn parse_catalog(data: &[u8]) -> Result<Vec<CatalogEntry>, String> {
    if data.len() < ENTRY_SIZE * 2 {
        return Err("boot catalog shorter than two entries".to_string());
    }
    let validation = &data[..ENTRY_SIZE];
    if validation[0] != HEADER_VALIDATION || validation[30..32] != [0x55, 0xAA] {
        return Err("boot catalog validation entry is malformed".to_string());
    }
    let sum = validation
        .chunks_exact(2)
        .fold(0u16, |acc, word| acc.wrapping_add(read_le_u16(word)));
    if sum != 0 {
        return Err("boot catalog validation checksum mismatch".to_string());
    }

    let mut entries = vec![decode_entry(validation[1], &data[ENTRY_SIZE..ENTRY_SIZE * 2])?];

    let mut pos = ENTRY_SIZE * 2;
    while pos + ENTRY_SIZE <= data.len() {
        let header = &data[pos..pos + ENTRY_SIZE];
        if header[0] != HEADER_SECTION && header[0] != HEADER_FINAL_SECTION {
            break;
        }
        let platform_id = header[1];
        let count = read_le_u16(&header[2..4]) as usize;
        pos += ENTRY_SIZE;
        let mut decoded = 0;
        while decoded < count && pos + ENTRY_SIZE <= data.len() {
            let raw = &data[pos..pos + ENTRY_SIZE];
            pos += ENTRY_SIZE;
            if raw[0] == EXTENSION_ENTRY {
                continue;
            }
            entries.push(decode_entry(platform_id, raw)?);
            decoded += 1;
        }
        if header[0] == HEADER_FINAL_SECTION {
            break;
        }
    }
    Ok(entries)
}

fn decode_entry(platform_id: u8, raw: &[u8]) -> Result<CatalogEntry, String> {
    let bootable = match raw[0] {
        INDICATOR_BOOTABLE => true,
        INDICATOR_NOT_BOOTABLE => false,
        other => return Err(format!("unknown boot indicator 0x{other:02x}")),
    };
    let emulation = Emulation::from_byte(raw[1])
        .ok_or_else(|| format!("unknown emulation type 0x{:02x}", raw[1]))?;
    Ok(CatalogEntry {
        platform_id,
        bootable,
        emulation,
        load_lba: read_le_u32(&raw[8..12]),
        sector_count: read_le_u16(&raw[6..8]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_round_trip() {
        let entry = BootEntry::uefi("/EFI/BOOT/EFIBOOT.IMG;1");
        let catalog = encode_catalog(&entry, 42, 16 * 1024 * 1024);
        let parsed = parse_catalog(&catalog).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].platform_id, PLATFORM_EFI);
        assert!(parsed[0].bootable);
        assert_eq!(parsed[0].emulation, Emulation::NoEmulation);
        assert_eq!(parsed[0].load_lba, 42);
        assert_eq!(parsed[0].sector_count, 32768);
    }

    #[test]
    fn test_corrupt_checksum_rejected() {
        let mut catalog = encode_catalog(&BootEntry::uefi("/X.;1"), 1, 512);
        catalog[4] ^= 0xFF;
        assert!(parse_catalog(&catalog).is_err());
    }

    #[test]
    fn test_boot_record_round_trip() {
        let sector = boot_record_descriptor(19);
        assert_eq!(parse_boot_record(&sector), Some(19));
        let mut other = sector.clone();
        other[7] = b'X';
        assert_eq!(parse_boot_record(&other), None);
    }

    #[test]
    fn test_virtual_sector_count() {
        assert_eq!(virtual_sector_count(512), 1);
        assert_eq!(virtual_sector_count(513), 2);
        assert_eq!(virtual_sector_count(64 * 1024 * 1024), 0);
    }

    #[test]
    fn test_section_entries_are_decoded() {
        let mut catalog = encode_catalog(&BootEntry::uefi("/X.;1"), 5, 2048);
        // final section header for EFI with one entry
        catalog[64] = HEADER_FINAL_SECTION;
        catalog[65] = PLATFORM_EFI;
        catalog[66] = 1;
        catalog[96] = INDICATOR_BOOTABLE;
        catalog[104..108].copy_from_slice(&9u32.to_le_bytes());
        let parsed = parse_catalog(&catalog).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].load_lba, 9);
    }
}
