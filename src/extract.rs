//! Pull assets out of the source installer image.
//!
//! Installer releases move files around (`VMLINUZ` vs `HWE_VMLINUZ`), so each
//! asset is looked up through an ordered candidate list and the first hit
//! wins.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::artifact::iso::IsoImage;
use crate::error::{Error, IoContext, Result};

/// A logical asset and the in-image paths to try for it, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLookup {
    pub asset: String,
    pub candidates: Vec<String>,
}

impl CandidateLookup {
    pub fn new(asset: impl Into<String>, candidates: &[&str]) -> Self {
        Self {
            asset: asset.into(),
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// A file materialized in the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAsset {
    pub asset: String,
    pub path: PathBuf,
    pub len: u64,
    /// The candidate that resolved.
    pub matched: String,
}

/// Copy the first candidate of `lookup` that names a file in `source` to
/// `destination`.
///
/// Fails with [`Error::AssetNotFound`] when no candidate resolves. The source
/// is only read; `destination` is the only file created.
pub fn extract(
    source: &mut IsoImage,
    lookup: &CandidateLookup,
    destination: &Path,
) -> Result<StagedAsset> {
    for candidate in &lookup.candidates {
        let Some(entry) = source.lookup(candidate)? else {
            continue;
        };
        if entry.is_dir {
            continue;
        }

        let file = File::create(destination)
            .io_context(|| format!("creating '{}'", destination.display()))?;
        let mut writer = BufWriter::new(file);
        let copied = source
            .copy_to(&entry, &mut writer)
            .and_then(|copied| {
                writer
                    .flush()
                    .io_context(|| format!("writing '{}'", destination.display()))?;
                Ok(copied)
            });
        let len = match copied {
            Ok(len) => len,
            Err(err) => {
                drop(writer);
                let _ = fs::remove_file(destination);
                return Err(err);
            }
        };

        return Ok(StagedAsset {
            asset: lookup.asset.clone(),
            path: destination.to_path_buf(),
            len,
            matched: candidate.clone(),
        });
    }

    Err(Error::AssetNotFound {
        asset: lookup.asset.clone(),
        candidates: lookup.candidates.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::iso::{TargetVolume, VolumeOptions};
    use crate::layout::KERNEL_CANDIDATES;
    use tempfile::TempDir;

    /// Source image with the given `(in-volume path, content)` files.
    fn source_iso(temp: &TempDir, files: &[(&str, &[u8])]) -> PathBuf {
        let mut volume = TargetVolume::new(VolumeOptions::new("UBUNTU_SERVER")).unwrap();
        for (i, (path, content)) in files.iter().enumerate() {
            let local = temp.path().join(format!("src-{i}"));
            fs::write(&local, content).unwrap();
            volume.add_file(&local, path, None).unwrap();
        }
        let out = temp.path().join("source.iso");
        volume.finalize(&out).unwrap();
        out
    }

    #[test]
    fn test_first_candidate_wins() {
        let temp = TempDir::new().unwrap();
        let iso = source_iso(
            &temp,
            &[
                ("/CASPER/VMLINUZ;1", b"generic kernel"),
                ("/CASPER/HWE_VMLINUZ;1", b"hwe kernel"),
            ],
        );
        let mut source = IsoImage::open(&iso).unwrap();
        let dest = temp.path().join("vmlinuz");
        let staged = extract(
            &mut source,
            &CandidateLookup::new("kernel", KERNEL_CANDIDATES),
            &dest,
        )
        .unwrap();

        assert_eq!(staged.matched, "/CASPER/VMLINUZ.;1");
        assert_eq!(staged.len, 14);
        assert_eq!(fs::read(&dest).unwrap(), b"generic kernel");
    }

    #[test]
    fn test_falls_back_to_later_candidate() {
        let temp = TempDir::new().unwrap();
        let iso = source_iso(&temp, &[("/CASPER/HWE_VMLINUZ;1", b"hwe kernel")]);
        let mut source = IsoImage::open(&iso).unwrap();
        let dest = temp.path().join("vmlinuz");
        let staged = extract(
            &mut source,
            &CandidateLookup::new("kernel", KERNEL_CANDIDATES),
            &dest,
        )
        .unwrap();
        assert_eq!(staged.matched, "/CASPER/HWE_VMLINUZ.;1");
        assert_eq!(fs::read(&dest).unwrap(), b"hwe kernel");
    }

    #[test]
    fn test_staged_length_matches_record() {
        let temp = TempDir::new().unwrap();
        let kernel: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        let iso = source_iso(&temp, &[("/CASPER/VMLINUZ.;1", &kernel)]);
        let mut source = IsoImage::open(&iso).unwrap();
        let entry = source.lookup("/CASPER/VMLINUZ.;1").unwrap().unwrap();

        let dest = temp.path().join("vmlinuz");
        let staged = extract(
            &mut source,
            &CandidateLookup::new("kernel", &["/CASPER/VMLINUZ.;1"]),
            &dest,
        )
        .unwrap();
        assert_eq!(staged.len, entry.len);
        assert_eq!(fs::metadata(&dest).unwrap().len(), entry.len);
    }

    #[test]
    fn test_no_candidate_is_asset_not_found() {
        let temp = TempDir::new().unwrap();
        let iso = source_iso(&temp, &[("/CASPER/INITRD;1", b"initrd")]);
        let mut source = IsoImage::open(&iso).unwrap();
        let dest = temp.path().join("vmlinuz");
        let err = extract(
            &mut source,
            &CandidateLookup::new("kernel", KERNEL_CANDIDATES),
            &dest,
        )
        .unwrap_err();

        match err {
            Error::AssetNotFound { asset, candidates } => {
                assert_eq!(asset, "kernel");
                assert_eq!(candidates, KERNEL_CANDIDATES);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dest.exists());
    }

    #[test]
    fn test_directory_candidate_is_skipped() {
        let temp = TempDir::new().unwrap();
        let iso = source_iso(&temp, &[("/BOOT/GRUB/GRUB.CFG;1", b"cfg")]);
        let mut source = IsoImage::open(&iso).unwrap();
        let err = extract(
            &mut source,
            &CandidateLookup::new("config", &["/BOOT/GRUB"]),
            &temp.path().join("out"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::AssetNotFound { .. }));
    }
}
