//! EFI System Partition image synthesis.
//!
//! Produces a raw FAT16 volume, built entirely in memory, holding
//! `/EFI/BOOT/BOOTX64.EFI` and `/EFI/BOOT/grubx64.efi`. The image is what the
//! El Torito UEFI entry points at: firmware mounts it as a partition and runs
//! the removable-media loader.
//!
//! Layout (512-byte sectors):
//! - sector 0: boot sector with the BPB
//! - sectors 1..: a single FAT
//! - 32 sectors of root directory (512 entries)
//! - data area, cluster 2 onwards

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::error::{Error, IoContext, Result};
use crate::layout::{EFI_BOOTLOADER, EFI_SECOND_STAGE};

pub const FAT_SECTOR_SIZE: usize = 512;
const RESERVED_SECTORS: u32 = 1;
const NUM_FATS: u32 = 1;
const ROOT_ENTRIES: u32 = 512;
const ROOT_DIR_SECTORS: u32 = ROOT_ENTRIES * 32 / FAT_SECTOR_SIZE as u32;
const MEDIA_DESCRIPTOR: u8 = 0xF8;
const MIN_CLUSTERS: u32 = 4085;
const MAX_CLUSTERS: u32 = 65524;
const DIR_ENTRY_LEN: usize = 32;

const OEM_NAME: &[u8; 8] = b"AUTOISO ";
const VOLUME_LABEL: &str = "EFIBOOT";

const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_ARCHIVE: u8 = 0x20;

// NT reserved byte: base name / extension stored upper, displayed lower
const CASE_LOWER_BASE: u8 = 0x08;
const CASE_LOWER_EXT: u8 = 0x10;

const FAT_END_OF_CHAIN: u16 = 0xFFFF;

/// The `/EFI` and `/EFI/BOOT` directories take one cluster each.
const DIRECTORY_CLUSTERS: u32 = 2;

/// FAT16 geometry for a given sector count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub total_sectors: u32,
    pub sectors_per_cluster: u32,
    pub fat_sectors: u32,
    pub cluster_count: u32,
}

impl Geometry {
    /// Smallest power-of-two cluster size that keeps the cluster count in
    /// the FAT16 range, or `None` if no cluster size does.
    pub fn for_sectors(total_sectors: u32) -> Option<Self> {
        let overhead = RESERVED_SECTORS + ROOT_DIR_SECTORS;
        if total_sectors <= overhead {
            return None;
        }
        (0..8).map(|shift| 1u32 << shift).find_map(|spc| {
            // FAT size rounding as in the Microsoft FAT specification
            let divisor = 256 * spc + NUM_FATS;
            let fat_sectors = (total_sectors - overhead).div_ceil(divisor);
            let data_sectors = total_sectors.checked_sub(overhead + NUM_FATS * fat_sectors)?;
            let cluster_count = data_sectors / spc;
            let fat_entries = fat_sectors * FAT_SECTOR_SIZE as u32 / 2;
            ((MIN_CLUSTERS..=MAX_CLUSTERS).contains(&cluster_count)
                && fat_entries >= cluster_count + 2)
                .then_some(Self {
                    total_sectors,
                    sectors_per_cluster: spc,
                    fat_sectors,
                    cluster_count,
                })
        })
    }

    pub fn cluster_bytes(&self) -> u64 {
        u64::from(self.sectors_per_cluster) * FAT_SECTOR_SIZE as u64
    }

    fn fat_start(&self) -> usize {
        RESERVED_SECTORS as usize * FAT_SECTOR_SIZE
    }

    fn root_dir_start(&self) -> usize {
        (RESERVED_SECTORS + NUM_FATS * self.fat_sectors) as usize * FAT_SECTOR_SIZE
    }

    fn cluster_offset(&self, cluster: u32) -> usize {
        let data_start = RESERVED_SECTORS + NUM_FATS * self.fat_sectors + ROOT_DIR_SECTORS;
        (data_start + (cluster - 2) * self.sectors_per_cluster) as usize * FAT_SECTOR_SIZE
    }

    fn clusters_for(&self, len: u64) -> u32 {
        len.div_ceil(self.cluster_bytes()) as u32
    }

    /// Whether the directories and payloads fit the data area.
    fn fits(&self, payload_lens: &[u64]) -> bool {
        let needed: u64 = u64::from(DIRECTORY_CLUSTERS)
            + payload_lens
                .iter()
                .map(|&len| len.div_ceil(self.cluster_bytes()))
                .sum::<u64>();
        needed <= u64::from(self.cluster_count)
    }
}

/// A formatted FAT16 image, ready to be written out and added to the volume.
#[derive(Debug, Clone)]
pub struct EfiSystemPartitionImage {
    bytes: Vec<u8>,
    geometry: Geometry,
}

impl EfiSystemPartitionImage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn capacity(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.bytes)
            .io_context(|| format!("writing EFI boot image '{}'", path.display()))
    }
}

/// Smallest capacity, in bytes, of a FAT16 image that holds the ESP
/// directories plus payloads of the given lengths.
pub fn required_esp_capacity(payload_lens: &[u64]) -> Result<u64> {
    let first = RESERVED_SECTORS + ROOT_DIR_SECTORS + 1;
    let mut sectors = first;
    let mut seen_valid = false;
    loop {
        match Geometry::for_sectors(sectors) {
            Some(geometry) => {
                if geometry.fits(payload_lens) {
                    return Ok(u64::from(sectors) * FAT_SECTOR_SIZE as u64);
                }
                seen_valid = true;
            }
            // past the largest FAT16 volume
            None if seen_valid && too_large(sectors) => {
                return Err(Error::FormatFailure(format!(
                    "payloads of {} bytes do not fit any FAT16 volume",
                    payload_lens.iter().sum::<u64>()
                )))
            }
            None => {}
        }
        sectors = sectors.checked_add(1).ok_or_else(|| {
            Error::FormatFailure("FAT16 sector count overflow".to_string())
        })?;
    }
}

/// A sector count with too many clusters even at the largest cluster size.
fn too_large(total_sectors: u32) -> bool {
    total_sectors / 128 > MAX_CLUSTERS
}

/// Format `capacity_bytes` of zeroes as FAT16 and write the two UEFI loaders
/// into `/EFI/BOOT`.
///
/// # Arguments
///
/// * `capacity_bytes` - Exact size of the image
/// * `bootloader` - Content of `BOOTX64.EFI`, the removable-media loader
/// * `second_stage` - Content of `grubx64.efi`, chain-loaded by the first
/// * `recorded` - Timestamp written into every directory entry
pub fn build_esp_image(
    capacity_bytes: u64,
    bootloader: &[u8],
    second_stage: &[u8],
    recorded: OffsetDateTime,
) -> Result<EfiSystemPartitionImage> {
    let payload_lens = [bootloader.len() as u64, second_stage.len() as u64];
    let insufficient = || -> Error {
        match required_esp_capacity(&payload_lens) {
            Ok(required) => Error::InsufficientCapacity {
                required,
                capacity: capacity_bytes,
            },
            Err(err) => err,
        }
    };

    let total_sectors = u32::try_from(capacity_bytes / FAT_SECTOR_SIZE as u64).map_err(|_| {
        Error::FormatFailure(format!("{capacity_bytes} bytes is beyond FAT16 limits"))
    })?;
    let geometry = match Geometry::for_sectors(total_sectors) {
        Some(geometry) => geometry,
        None if too_large(total_sectors) => {
            return Err(Error::FormatFailure(format!(
                "no FAT16 geometry for {capacity_bytes} bytes (too large)"
            )))
        }
        None => return Err(insufficient()),
    };
    if !geometry.fits(&payload_lens) {
        return Err(insufficient());
    }

    let bootloader_name = short_name(EFI_BOOTLOADER)?;
    let second_stage_name = short_name(EFI_SECOND_STAGE)?;

    let capacity = usize::try_from(capacity_bytes)
        .map_err(|_| Error::FormatFailure(format!("{capacity_bytes} bytes is not addressable")))?;
    let mut image = FatWriter {
        bytes: vec![0u8; capacity],
        geometry,
        next_cluster: 2,
        stamp: FatTimestamp::from(recorded),
    };
    image.write_boot_sector(volume_serial(&[bootloader, second_stage], recorded));
    image.set_fat(0, 0xFF00 | u16::from(MEDIA_DESCRIPTOR));
    image.set_fat(1, FAT_END_OF_CHAIN);

    let efi = image.allocate(1);
    let boot = image.allocate(1);
    let loader = image.store(bootloader);
    let grub = image.store(second_stage);

    let label = padded_label(VOLUME_LABEL);
    let root = geometry.root_dir_start();
    image.put_entry(root, &DirEntry::new(label, ATTR_VOLUME_ID, 0, 0, 0));
    image.put_entry(
        root + DIR_ENTRY_LEN,
        &DirEntry::new(padded_label("EFI"), ATTR_DIRECTORY, 0, efi, 0),
    );

    let efi_dir = geometry.cluster_offset(efi);
    image.put_dot_entries(efi_dir, efi, 0);
    image.put_entry(
        efi_dir + 2 * DIR_ENTRY_LEN,
        &DirEntry::new(padded_label("BOOT"), ATTR_DIRECTORY, 0, boot, 0),
    );

    let boot_dir = geometry.cluster_offset(boot);
    image.put_dot_entries(boot_dir, boot, efi);
    image.put_entry(
        boot_dir + 2 * DIR_ENTRY_LEN,
        &DirEntry::new(
            bootloader_name.0,
            ATTR_ARCHIVE,
            bootloader_name.1,
            loader,
            bootloader.len() as u32,
        ),
    );
    image.put_entry(
        boot_dir + 3 * DIR_ENTRY_LEN,
        &DirEntry::new(
            second_stage_name.0,
            ATTR_ARCHIVE,
            second_stage_name.1,
            grub,
            second_stage.len() as u32,
        ),
    );

    Ok(EfiSystemPartitionImage {
        bytes: image.bytes,
        geometry,
    })
}

/// 8.3 name plus NT case flags. Each half must be entirely upper or
/// entirely lower case to round-trip.
fn short_name(name: &str) -> Result<([u8; 11], u8)> {
    let unrepresentable = |reason: &str| Error::FormatFailure(format!("'{name}' {reason}"));
    let (base, ext) = name.split_once('.').unwrap_or((name, ""));
    if base.is_empty() || base.len() > 8 || ext.len() > 3 || ext.contains('.') {
        return Err(unrepresentable("is not an 8.3 name"));
    }
    let mut flags = 0;
    for (part, flag) in [(base, CASE_LOWER_BASE), (ext, CASE_LOWER_EXT)] {
        if !part.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
            return Err(unrepresentable("has characters outside the 8.3 set"));
        }
        let has_lower = part.bytes().any(|b| b.is_ascii_lowercase());
        let has_upper = part.bytes().any(|b| b.is_ascii_uppercase());
        match (has_lower, has_upper) {
            (true, true) => return Err(unrepresentable("mixes upper and lower case")),
            (true, false) => flags |= flag,
            _ => {}
        }
    }
    let mut raw = [b' '; 11];
    raw[..base.len()].copy_from_slice(base.to_ascii_uppercase().as_bytes());
    raw[8..8 + ext.len()].copy_from_slice(ext.to_ascii_uppercase().as_bytes());
    Ok((raw, flags))
}

fn padded_label(label: &str) -> [u8; 11] {
    let mut raw = [b' '; 11];
    let bytes = label.as_bytes();
    let len = bytes.len().min(11);
    raw[..len].copy_from_slice(&bytes[..len]);
    raw
}

/// Serial derived from the content so identical inputs give identical images.
fn volume_serial(payloads: &[&[u8]], recorded: OffsetDateTime) -> u32 {
    let mut hasher = Sha256::new();
    for payload in payloads {
        hasher.update(payload);
    }
    hasher.update(recorded.unix_timestamp().to_le_bytes());
    let digest = hasher.finalize();
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[derive(Debug, Clone, Copy)]
struct FatTimestamp {
    date: u16,
    time: u16,
}

impl From<OffsetDateTime> for FatTimestamp {
    fn from(ts: OffsetDateTime) -> Self {
        let ts = ts.to_offset(time::UtcOffset::UTC);
        if ts.year() < 1980 {
            // earliest representable: 1980-01-01 00:00:00
            return Self {
                date: (1 << 5) | 1,
                time: 0,
            };
        }
        let year = (ts.year() - 1980).min(127) as u16;
        Self {
            date: (year << 9) | (u16::from(u8::from(ts.month())) << 5) | u16::from(ts.day()),
            time: (u16::from(ts.hour()) << 11)
                | (u16::from(ts.minute()) << 5)
                | u16::from(ts.second() / 2),
        }
    }
}

struct DirEntry {
    name: [u8; 11],
    attr: u8,
    case_flags: u8,
    cluster: u32,
    size: u32,
}

impl DirEntry {
    fn new(name: [u8; 11], attr: u8, case_flags: u8, cluster: u32, size: u32) -> Self {
        Self {
            name,
            attr,
            case_flags,
            cluster,
            size,
        }
    }
}

struct FatWriter {
    bytes: Vec<u8>,
    geometry: Geometry,
    next_cluster: u32,
    stamp: FatTimestamp,
}

impl FatWriter {
    fn write_boot_sector(&mut self, serial: u32) {
        let g = self.geometry;
        let bs = &mut self.bytes[..FAT_SECTOR_SIZE];
        bs[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        bs[3..11].copy_from_slice(OEM_NAME);
        bs[11..13].copy_from_slice(&(FAT_SECTOR_SIZE as u16).to_le_bytes());
        bs[13] = g.sectors_per_cluster as u8;
        bs[14..16].copy_from_slice(&(RESERVED_SECTORS as u16).to_le_bytes());
        bs[16] = NUM_FATS as u8;
        bs[17..19].copy_from_slice(&(ROOT_ENTRIES as u16).to_le_bytes());
        match u16::try_from(g.total_sectors) {
            Ok(small) => bs[19..21].copy_from_slice(&small.to_le_bytes()),
            Err(_) => bs[32..36].copy_from_slice(&g.total_sectors.to_le_bytes()),
        }
        bs[21] = MEDIA_DESCRIPTOR;
        bs[22..24].copy_from_slice(&(g.fat_sectors as u16).to_le_bytes());
        bs[24..26].copy_from_slice(&32u16.to_le_bytes()); // sectors per track
        bs[26..28].copy_from_slice(&64u16.to_le_bytes()); // heads
        bs[36] = 0x80;
        bs[38] = 0x29;
        bs[39..43].copy_from_slice(&serial.to_le_bytes());
        bs[43..54].copy_from_slice(&padded_label(VOLUME_LABEL));
        bs[54..62].copy_from_slice(b"FAT16   ");
        bs[510] = 0x55;
        bs[511] = 0xAA;
    }

    fn set_fat(&mut self, cluster: u32, value: u16) {
        let offset = self.geometry.fat_start() + cluster as usize * 2;
        self.bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Chain `count` consecutive clusters and return the first.
    fn allocate(&mut self, count: u32) -> u32 {
        let first = self.next_cluster;
        for cluster in first..first + count {
            let next = if cluster + 1 == first + count {
                FAT_END_OF_CHAIN
            } else {
                (cluster + 1) as u16
            };
            self.set_fat(cluster, next);
        }
        self.next_cluster += count;
        first
    }

    /// Copy a payload into fresh clusters; empty payloads get cluster 0.
    fn store(&mut self, payload: &[u8]) -> u32 {
        let count = self.geometry.clusters_for(payload.len() as u64);
        if count == 0 {
            return 0;
        }
        let first = self.allocate(count);
        let offset = self.geometry.cluster_offset(first);
        self.bytes[offset..offset + payload.len()].copy_from_slice(payload);
        first
    }

    fn put_entry(&mut self, offset: usize, entry: &DirEntry) {
        let raw = &mut self.bytes[offset..offset + DIR_ENTRY_LEN];
        raw[0..11].copy_from_slice(&entry.name);
        raw[11] = entry.attr;
        raw[12] = entry.case_flags;
        if entry.attr & ATTR_VOLUME_ID == 0 {
            raw[14..16].copy_from_slice(&self.stamp.time.to_le_bytes());
            raw[16..18].copy_from_slice(&self.stamp.date.to_le_bytes());
            raw[18..20].copy_from_slice(&self.stamp.date.to_le_bytes());
        }
        raw[22..24].copy_from_slice(&self.stamp.time.to_le_bytes());
        raw[24..26].copy_from_slice(&self.stamp.date.to_le_bytes());
        raw[26..28].copy_from_slice(&(entry.cluster as u16).to_le_bytes());
        raw[28..32].copy_from_slice(&entry.size.to_le_bytes());
    }

    fn put_dot_entries(&mut self, offset: usize, own: u32, parent: u32) {
        let mut dot = [b' '; 11];
        dot[0] = b'.';
        let mut dotdot = dot;
        dotdot[1] = b'.';
        self.put_entry(offset, &DirEntry::new(dot, ATTR_DIRECTORY, 0, own, 0));
        self.put_entry(
            offset + DIR_ENTRY_LEN,
            &DirEntry::new(dotdot, ATTR_DIRECTORY, 0, parent, 0),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const STAMP: OffsetDateTime = datetime!(2024-03-01 12:30:10 UTC);

    /// Minimal FAT16 reader for checking what the writer produced.
    struct FatView<'a> {
        bytes: &'a [u8],
        geometry: Geometry,
    }

    struct Found {
        name: [u8; 11],
        case_flags: u8,
        attr: u8,
        cluster: u32,
        size: u32,
    }

    impl<'a> FatView<'a> {
        fn new(bytes: &'a [u8]) -> Self {
            let spc = u32::from(bytes[13]);
            let fat_sectors = u32::from(u16::from_le_bytes([bytes[22], bytes[23]]));
            let total16 = u16::from_le_bytes([bytes[19], bytes[20]]);
            let total_sectors = if total16 != 0 {
                u32::from(total16)
            } else {
                u32::from_le_bytes([bytes[32], bytes[33], bytes[34], bytes[35]])
            };
            let data = total_sectors - RESERVED_SECTORS - fat_sectors - ROOT_DIR_SECTORS;
            Self {
                bytes,
                geometry: Geometry {
                    total_sectors,
                    sectors_per_cluster: spc,
                    fat_sectors,
                    cluster_count: data / spc,
                },
            }
        }

        fn fat(&self, cluster: u32) -> u16 {
            let off = self.geometry.fat_start() + cluster as usize * 2;
            u16::from_le_bytes([self.bytes[off], self.bytes[off + 1]])
        }

        fn entries(&self, offset: usize, count: usize) -> Vec<Found> {
            (0..count)
                .map(|i| &self.bytes[offset + i * DIR_ENTRY_LEN..offset + (i + 1) * DIR_ENTRY_LEN])
                .take_while(|raw| raw[0] != 0)
                .map(|raw| Found {
                    name: raw[0..11].try_into().unwrap(),
                    attr: raw[11],
                    case_flags: raw[12],
                    cluster: u32::from(u16::from_le_bytes([raw[26], raw[27]])),
                    size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
                })
                .collect()
        }

        fn find(&self, path: &[&str]) -> Found {
            let mut entries = self.entries(self.geometry.root_dir_start(), ROOT_ENTRIES as usize);
            let mut found = None;
            for name in path {
                let (raw, _) = short_name(name).unwrap();
                let hit = entries.into_iter().find(|e| e.name == raw).unwrap();
                entries = if hit.attr & ATTR_DIRECTORY != 0 {
                    let per_cluster = self.geometry.cluster_bytes() as usize / DIR_ENTRY_LEN;
                    self.entries(self.geometry.cluster_offset(hit.cluster), per_cluster)
                } else {
                    Vec::new()
                };
                found = Some(hit);
            }
            found.unwrap()
        }

        fn read(&self, path: &[&str]) -> Vec<u8> {
            let entry = self.find(path);
            let mut out = Vec::new();
            let mut cluster = entry.cluster;
            while out.len() < entry.size as usize {
                let off = self.geometry.cluster_offset(cluster);
                let take = (entry.size as usize - out.len()).min(self.geometry.cluster_bytes() as usize);
                out.extend_from_slice(&self.bytes[off..off + take]);
                cluster = u32::from(self.fat(cluster));
            }
            out
        }
    }

    fn payloads() -> (Vec<u8>, Vec<u8>) {
        let loader: Vec<u8> = (0..3000u32).map(|i| (i % 7) as u8).collect();
        let grub: Vec<u8> = (0..70_000u32).map(|i| (i % 241) as u8).collect();
        (loader, grub)
    }

    #[test]
    fn test_default_size_image_round_trip() {
        let (loader, grub) = payloads();
        let esp = build_esp_image(16 * 1024 * 1024, &loader, &grub, STAMP).unwrap();
        assert_eq!(esp.capacity(), 16 * 1024 * 1024);

        let bytes = esp.as_bytes();
        assert_eq!(&bytes[54..62], b"FAT16   ");
        assert_eq!(&bytes[510..512], &[0x55, 0xAA]);
        assert_eq!(bytes[16], 1, "single FAT");
        assert_eq!(bytes[21], 0xF8);

        let view = FatView::new(bytes);
        assert!((MIN_CLUSTERS..=MAX_CLUSTERS).contains(&view.geometry.cluster_count));
        assert_eq!(view.fat(0), 0xFFF8);
        assert_eq!(view.read(&["EFI", "BOOT", "BOOTX64.EFI"]), loader);
        assert_eq!(view.read(&["EFI", "BOOT", "grubx64.efi"]), grub);
    }

    #[test]
    fn test_second_stage_is_lowercase() {
        let (loader, grub) = payloads();
        let esp = build_esp_image(16 * 1024 * 1024, &loader, &grub, STAMP).unwrap();
        let view = FatView::new(esp.as_bytes());
        let grub_entry = view.find(&["EFI", "BOOT", "grubx64.efi"]);
        assert_eq!(grub_entry.case_flags, CASE_LOWER_BASE | CASE_LOWER_EXT);
        let loader_entry = view.find(&["EFI", "BOOT", "BOOTX64.EFI"]);
        assert_eq!(loader_entry.case_flags, 0);
        assert_eq!(view.find(&["EFI", "BOOT"]).attr, ATTR_DIRECTORY);
    }

    #[test]
    fn test_capacity_boundary() {
        let (loader, grub) = payloads();
        let required = required_esp_capacity(&[loader.len() as u64, grub.len() as u64]).unwrap();
        build_esp_image(required, &loader, &grub, STAMP).unwrap();

        let err = build_esp_image(required - 1, &loader, &grub, STAMP).unwrap_err();
        match err {
            Error::InsufficientCapacity {
                required: r,
                capacity,
            } => {
                assert_eq!(r, required);
                assert_eq!(capacity, required - 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_capacity_boundary_with_large_payload() {
        // larger than the FAT16 minimum, so the payload decides the size
        let loader = vec![0xAB; 4 * 1024 * 1024];
        let grub = vec![0xCD; 1024];
        let required = required_esp_capacity(&[loader.len() as u64, grub.len() as u64]).unwrap();
        let esp = build_esp_image(required, &loader, &grub, STAMP).unwrap();
        assert_eq!(FatView::new(esp.as_bytes()).read(&["EFI", "BOOT", "BOOTX64.EFI"]), loader);
        assert!(matches!(
            build_esp_image(required - 1, &loader, &grub, STAMP),
            Err(Error::InsufficientCapacity { .. })
        ));
    }

    #[test]
    fn test_payload_exceeds_capacity() {
        let loader = vec![1u8; 20 * 1024 * 1024];
        let err = build_esp_image(16 * 1024 * 1024, &loader, b"grub", STAMP).unwrap_err();
        assert!(matches!(err, Error::InsufficientCapacity { required, .. } if required > 16 * 1024 * 1024));
    }

    #[test]
    fn test_too_large_is_format_failure() {
        let err = build_esp_image(8 * 1024 * 1024 * 1024, b"a", b"b", STAMP).unwrap_err();
        assert!(matches!(err, Error::FormatFailure(_)), "{err}");
    }

    #[test]
    fn test_identical_inputs_identical_images() {
        let (loader, grub) = payloads();
        let a = build_esp_image(4 * 1024 * 1024, &loader, &grub, STAMP).unwrap();
        let b = build_esp_image(4 * 1024 * 1024, &loader, &grub, STAMP).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_short_name_case_flags() {
        assert_eq!(short_name("BOOTX64.EFI").unwrap().1, 0);
        let (raw, flags) = short_name("grubx64.efi").unwrap();
        assert_eq!(&raw, b"GRUBX64 EFI");
        assert_eq!(flags, CASE_LOWER_BASE | CASE_LOWER_EXT);
        assert!(short_name("GrubX64.efi").is_err());
        assert!(short_name("toolongname.efi").is_err());
    }

    #[test]
    fn test_fat_timestamp() {
        let ts = FatTimestamp::from(STAMP);
        assert_eq!(ts.date, (44 << 9) | (3 << 5) | 1);
        assert_eq!(ts.time, (12 << 11) | (30 << 5) | 5);
        let early = FatTimestamp::from(datetime!(1970-01-01 0:00 UTC));
        assert_eq!(early.date, (1 << 5) | 1);
    }
}
