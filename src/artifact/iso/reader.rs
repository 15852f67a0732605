//! Read-only access to an existing ISO9660 image.
//!
//! Only what extraction and inspection need: the primary volume descriptor,
//! directory listings (with Rock Ridge names when present), file contents and
//! the El Torito catalog. Multi-extent files are listed but cannot be read,
//! and `CE` continuation areas are not followed.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::eltorito::{self, CatalogEntry};
use super::names;
use super::records::{read_le_u16, RawRecord};
use super::rock_ridge;
use super::{
    FLAG_MULTI_EXTENT, SECTOR_SIZE, STANDARD_ID, SYSTEM_AREA_SECTORS, VD_BOOT_RECORD, VD_PRIMARY,
    VD_TERMINATOR,
};
use crate::error::{Error, IoContext, Result};

/// Give up looking for a terminator after this many descriptors.
const MAX_DESCRIPTORS: u32 = 64;

/// Refuse directory extents larger than this.
const MAX_DIR_LEN: u32 = 16 * 1024 * 1024;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoEntry {
    /// Identifier as recorded, e.g. `VMLINUZ.;1`.
    pub identifier: String,
    /// Rock Ridge `NM` name, if the entry has one.
    pub rr_name: Option<String>,
    pub lba: u32,
    /// Total length; for multi-extent files the sum of all sections.
    pub len: u64,
    pub is_dir: bool,
    /// Recorded in more than one extent; [`IsoImage::copy_to`] refuses these.
    pub multi_extent: bool,
}

impl IsoEntry {
    /// Rock Ridge name if present, otherwise the identifier.
    pub fn display_name(&self) -> &str {
        self.rr_name.as_deref().unwrap_or(&self.identifier)
    }

    fn matches(&self, component: &str) -> bool {
        self.rr_name.as_deref() == Some(component)
            || names::lookup_key(&self.identifier) == names::lookup_key(component)
    }
}

/// An open source image.
#[derive(Debug)]
pub struct IsoImage {
    path: PathBuf,
    file: File,
    volume_id: String,
    root_lba: u32,
    root_len: u32,
    catalog_lba: Option<u32>,
    /// Root `.` record carries the SUSP indicator, so `NM` names are read.
    rock_ridge: bool,
}

impl IsoImage {
    /// Open `path` and read its volume descriptors.
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).io_context(|| format!("opening source image '{}'", path.display()))?;
        let mut image = Self {
            path: path.to_path_buf(),
            file,
            volume_id: String::new(),
            root_lba: 0,
            root_len: 0,
            catalog_lba: None,
            rock_ridge: false,
        };

        let mut primary = None;
        let mut terminated = false;
        for index in 0..MAX_DESCRIPTORS {
            let lba = SYSTEM_AREA_SECTORS + index;
            let sector = image.read_sectors(lba, SECTOR_SIZE)?;
            if &sector[1..6] != STANDARD_ID {
                return Err(image.invalid(format!("sector {lba} is not a volume descriptor")));
            }
            match sector[0] {
                VD_PRIMARY if primary.is_none() => primary = Some(sector),
                VD_BOOT_RECORD => image.catalog_lba = eltorito::parse_boot_record(&sector),
                VD_TERMINATOR => {
                    terminated = true;
                    break;
                }
                _ => {}
            }
        }
        if !terminated {
            return Err(image.invalid("volume descriptor set is not terminated"));
        }
        let Some(pvd) = primary else {
            return Err(image.invalid("no primary volume descriptor"));
        };

        let block_size = read_le_u16(&pvd[128..130]);
        if usize::from(block_size) != SECTOR_SIZE {
            return Err(image.invalid(format!("unsupported logical block size {block_size}")));
        }
        let root = RawRecord::parse(&pvd[156..190])
            .filter(RawRecord::is_directory)
            .ok_or_else(|| image.invalid("malformed root directory record"))?;
        image.root_lba = root.extent;
        image.root_len = root.data_len;
        image.volume_id = String::from_utf8_lossy(&pvd[40..72]).trim_end().to_string();

        let first = image.read_sectors(root.extent, SECTOR_SIZE)?;
        image.rock_ridge = RawRecord::parse(&first)
            .is_some_and(|dot| rock_ridge::has_susp_indicator(dot.system_use));
        Ok(image)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }

    /// Find an entry by in-volume path. Components match case-insensitively,
    /// ignoring the `;N` version, or exactly by Rock Ridge name.
    pub fn lookup(&mut self, path: &str) -> Result<Option<IsoEntry>> {
        let parts = names::split_path(path)?;
        let mut current = IsoEntry {
            identifier: String::new(),
            rr_name: None,
            lba: self.root_lba,
            len: u64::from(self.root_len),
            is_dir: true,
            multi_extent: false,
        };
        for part in parts {
            if !current.is_dir {
                return Ok(None);
            }
            let entries = self.list(current.lba, current.len as u32)?;
            match entries.into_iter().find(|e| e.matches(part)) {
                Some(entry) => current = entry,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Entries of the directory at `path`, excluding `.` and `..`.
    pub fn read_dir(&mut self, path: &str) -> Result<Vec<IsoEntry>> {
        match self.lookup(path)? {
            Some(entry) if entry.is_dir => self.list(entry.lba, entry.len as u32),
            Some(_) => Err(self.invalid(format!("'{path}' is not a directory"))),
            None => Err(Error::io(
                format!("'{path}' not found in '{}'", self.path.display()),
                io::Error::from(io::ErrorKind::NotFound),
            )),
        }
    }

    /// Stream a file's content to `writer`, returning the bytes copied.
    pub fn copy_to<W: Write + ?Sized>(&mut self, entry: &IsoEntry, writer: &mut W) -> Result<u64> {
        if entry.is_dir {
            return Err(self.invalid(format!("'{}' is a directory", entry.identifier)));
        }
        if entry.multi_extent {
            return Err(self.invalid(format!(
                "'{}' spans multiple extents",
                entry.identifier
            )));
        }
        if entry.len == 0 {
            return Ok(0);
        }
        let path = self.path.clone();
        self.file
            .seek(SeekFrom::Start(u64::from(entry.lba) * SECTOR_SIZE as u64))
            .io_context(|| format!("seeking in '{}'", path.display()))?;
        let copied = io::copy(&mut (&self.file).take(entry.len), writer)
            .io_context(|| format!("copying '{}' out of '{}'", entry.identifier, path.display()))?;
        if copied != entry.len {
            return Err(self.invalid(format!(
                "'{}' is truncated ({copied} of {} bytes)",
                entry.identifier, entry.len
            )));
        }
        Ok(copied)
    }

    /// Whole content of the file at `path`.
    pub fn read_to_vec(&mut self, path: &str) -> Result<Vec<u8>> {
        let entry = self.lookup(path)?.ok_or_else(|| {
            Error::io(
                format!("'{path}' not found in '{}'", self.path.display()),
                io::Error::from(io::ErrorKind::NotFound),
            )
        })?;
        let mut out = Vec::with_capacity(entry.len as usize);
        self.copy_to(&entry, &mut out)?;
        Ok(out)
    }

    /// Decoded El Torito entries; empty when the image has no boot record.
    pub fn boot_entries(&mut self) -> Result<Vec<CatalogEntry>> {
        let Some(lba) = self.catalog_lba else {
            return Ok(Vec::new());
        };
        let sector = self.read_sectors(lba, SECTOR_SIZE)?;
        eltorito::parse_catalog(&sector).map_err(|reason| self.invalid(reason))
    }

    /// Which of `required` paths are absent from the image.
    pub fn missing_paths<'a>(&mut self, required: &[&'a str]) -> Result<Vec<&'a str>> {
        let mut missing = Vec::new();
        for &path in required {
            if self.lookup(path)?.is_none() {
                missing.push(path);
            }
        }
        Ok(missing)
    }

    /// Release the underlying file handle.
    pub fn close(self) {
        drop(self.file);
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidSourceImage {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn read_sectors(&mut self, lba: u32, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let offset = u64::from(lba) * SECTOR_SIZE as u64;
        let read = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut buf));
        match read {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(self.invalid(format!("image ends before sector {lba}")))
            }
            Err(e) => Err(Error::io(format!("reading '{}'", self.path.display()), e)),
        }
    }

    fn list(&mut self, lba: u32, len: u32) -> Result<Vec<IsoEntry>> {
        if len > MAX_DIR_LEN {
            return Err(self.invalid(format!("directory at sector {lba} is {len} bytes")));
        }
        let data = self.read_sectors(lba, len as usize)?;
        let mut entries: Vec<IsoEntry> = Vec::new();
        // previous record had the multi-extent flag, so the next one with the
        // same identifier is its continuation
        let mut open_section = false;
        let mut pos = 0usize;
        while pos < data.len() {
            if data[pos] == 0 {
                // rest of this sector is padding
                pos = (pos / SECTOR_SIZE + 1) * SECTOR_SIZE;
                continue;
            }
            let Some(record) = RawRecord::parse(&data[pos..]) else {
                return Err(self.invalid(format!(
                    "malformed directory record at sector {lba} offset {pos}"
                )));
            };
            pos += data[pos] as usize;
            if record.is_self_or_parent() {
                continue;
            }
            let identifier = String::from_utf8_lossy(record.identifier).into_owned();
            let more = record.flags & FLAG_MULTI_EXTENT != 0;
            if open_section {
                if let Some(last) = entries.last_mut().filter(|e| e.identifier == identifier) {
                    last.len += u64::from(record.data_len);
                    open_section = more;
                    continue;
                }
            }
            open_section = more;
            entries.push(IsoEntry {
                identifier,
                rr_name: if self.rock_ridge {
                    rock_ridge::alternate_name(record.system_use)
                } else {
                    None
                },
                lba: record.extent,
                len: u64::from(record.data_len),
                is_dir: record.is_directory(),
                multi_extent: more,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::iso::{TargetVolume, VolumeOptions};
    use std::fs;
    use tempfile::TempDir;

    fn build(temp: &TempDir) -> PathBuf {
        let kernel = temp.path().join("vmlinuz");
        fs::write(&kernel, b"kernel image").unwrap();
        let mut volume = TargetVolume::new(VolumeOptions::new("UBUNTU")).unwrap();
        volume
            .add_file(&kernel, "/CASPER/VMLINUZ;1", Some("vmlinuz"))
            .unwrap();
        let out = temp.path().join("source.iso");
        volume.finalize(&out).unwrap();
        out
    }

    #[test]
    fn test_lookup_is_loose() {
        let temp = TempDir::new().unwrap();
        let mut image = IsoImage::open(&build(&temp)).unwrap();
        assert_eq!(image.volume_id(), "UBUNTU");

        for path in [
            "/CASPER/VMLINUZ.;1",
            "/CASPER/VMLINUZ;1",
            "/casper/vmlinuz",
            "/CASPER/VMLINUZ",
        ] {
            let entry = image.lookup(path).unwrap();
            assert!(entry.is_some(), "{path}");
        }
        assert!(image.lookup("/CASPER/INITRD").unwrap().is_none());
        assert!(image.lookup("/CASPER/VMLINUZ/X").unwrap().is_none());
    }

    #[test]
    fn test_copy_to_streams_content() {
        let temp = TempDir::new().unwrap();
        let mut image = IsoImage::open(&build(&temp)).unwrap();
        let entry = image.lookup("/CASPER/VMLINUZ").unwrap().unwrap();
        let mut out = Vec::new();
        assert_eq!(image.copy_to(&entry, &mut out).unwrap(), 12);
        assert_eq!(out, b"kernel image");
        assert_eq!(entry.display_name(), "vmlinuz");
    }

    #[test]
    fn test_missing_paths() {
        let temp = TempDir::new().unwrap();
        let mut image = IsoImage::open(&build(&temp)).unwrap();
        let missing = image
            .missing_paths(&["/CASPER/VMLINUZ.;1", "/USER_DATA.;1"])
            .unwrap();
        assert_eq!(missing, vec!["/USER_DATA.;1"]);
        assert!(image.boot_entries().unwrap().is_empty());
    }

    #[test]
    fn test_multi_extent_entry_does_not_hide_siblings() {
        let temp = TempDir::new().unwrap();
        let big = temp.path().join("big");
        fs::write(&big, vec![7u8; 3000]).unwrap();
        let kernel = temp.path().join("vmlinuz");
        fs::write(&kernel, b"kernel image").unwrap();
        let mut volume = TargetVolume::new(VolumeOptions::new("UBUNTU")).unwrap();
        volume.add_file(&big, "/CASPER/FILESYS.SQUASHFS;1", None).unwrap();
        volume.add_file(&kernel, "/CASPER/VMLINUZ;1", None).unwrap();
        let out = temp.path().join("source.iso");
        volume.finalize(&out).unwrap();

        // flag the squashfs record as the first section of a multi-extent file
        let mut bytes = fs::read(&out).unwrap();
        let id = b"FILESYS.SQUASHFS;1";
        let at = bytes.windows(id.len()).position(|w| w == id).unwrap();
        assert_eq!(bytes[at - 1] as usize, id.len());
        bytes[at - 8] |= FLAG_MULTI_EXTENT;
        fs::write(&out, &bytes).unwrap();

        let mut image = IsoImage::open(&out).unwrap();
        assert_eq!(image.read_to_vec("/CASPER/VMLINUZ").unwrap(), b"kernel image");

        let squashfs = image.lookup("/CASPER/FILESYS.SQUASHFS").unwrap().unwrap();
        assert!(squashfs.multi_extent);
        let err = image.copy_to(&squashfs, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidSourceImage { .. }), "{err}");
    }

    #[test]
    fn test_plain_volume_has_no_rock_ridge_names() {
        let temp = TempDir::new().unwrap();
        let kernel = temp.path().join("vmlinuz");
        fs::write(&kernel, b"kernel image").unwrap();
        let options = VolumeOptions {
            rock_ridge: None,
            ..VolumeOptions::new("UBUNTU")
        };
        let mut volume = TargetVolume::new(options).unwrap();
        volume.add_file(&kernel, "/CASPER/VMLINUZ;1", None).unwrap();
        let out = temp.path().join("plain.iso");
        volume.finalize(&out).unwrap();

        let mut image = IsoImage::open(&out).unwrap();
        let entry = image.lookup("/CASPER/VMLINUZ").unwrap().unwrap();
        assert_eq!(entry.rr_name, None);
        assert_eq!(entry.display_name(), "VMLINUZ.;1");
    }

    #[test]
    fn test_not_an_iso() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("junk.iso");
        fs::write(&path, vec![0u8; 40 * SECTOR_SIZE]).unwrap();
        let err = IsoImage::open(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidSourceImage { .. }), "{err}");

        let short = temp.path().join("short.iso");
        fs::write(&short, b"tiny").unwrap();
        let err = IsoImage::open(&short).unwrap_err();
        assert!(matches!(err, Error::InvalidSourceImage { .. }), "{err}");
    }
}
