//! SHA512 sidecar for the assembled image.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha512};

use crate::error::{Error, IoContext, Result};

/// Separator between hash and filename in `sha512sum` output.
const SHA512_SEPARATOR: &str = "  ";

/// Hex SHA512 of a file, streamed.
pub fn sha512_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).io_context(|| format!("opening '{}'", path.display()))?;
    let mut hasher = Sha512::new();
    io::copy(&mut file, &mut hasher).io_context(|| format!("reading '{}'", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Generate SHA512 checksum for an ISO file.
///
/// Writes checksum in standard format: "<hash>  <filename>" (two spaces)
/// Uses just the filename (not full path) so users can verify with:
///   cd output && sha512sum -c bootstrap.iso.sha512
///
/// # Returns
///
/// Path to the generated checksum file (`<image>.sha512`)
pub fn generate_iso_checksum(iso_path: &Path) -> Result<PathBuf> {
    let hash = sha512_file(iso_path)?;

    let filename = iso_path
        .file_name()
        .ok_or_else(|| Error::Workspace(format!("'{}' has no file name", iso_path.display())))?
        .to_string_lossy();
    let checksum_content = format!("{hash}{SHA512_SEPARATOR}{filename}\n");

    let mut checksum_path = iso_path.as_os_str().to_owned();
    checksum_path.push(".sha512");
    let checksum_path = PathBuf::from(checksum_path);
    fs::write(&checksum_path, checksum_content)
        .io_context(|| format!("writing '{}'", checksum_path.display()))?;

    // Print abbreviated hash for visual confirmation
    println!("  SHA512: {}...{}", &hash[..8], &hash[hash.len() - 8..]);
    println!("  Wrote: {}", checksum_path.display());

    Ok(checksum_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sha512_of_known_input() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("abc");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha512_file(&path).unwrap(),
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
    }

    #[test]
    fn test_sha512_streams_large_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("image");
        let content: Vec<u8> = (0..3 * 1024 * 1024u32).map(|i| (i % 253) as u8).collect();
        fs::write(&path, &content).unwrap();
        assert_eq!(
            sha512_file(&path).unwrap(),
            hex::encode(Sha512::digest(&content))
        );
    }

    #[test]
    fn test_sha512_of_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        let err = sha512_file(&temp.path().join("absent")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "{err}");
    }

    #[test]
    fn test_sidecar_format() {
        let temp = TempDir::new().unwrap();
        let iso = temp.path().join("bootstrap.iso");
        fs::write(&iso, b"abc").unwrap();

        let sidecar = generate_iso_checksum(&iso).unwrap();
        assert_eq!(sidecar, temp.path().join("bootstrap.iso.sha512"));
        let content = fs::read_to_string(&sidecar).unwrap();
        assert!(content.starts_with("ddaf35a1"));
        assert!(content.ends_with("  bootstrap.iso\n"));
    }
}
