//! ISO9660 identifier rules.
//!
//! In-volume paths are written the ISO way: uppercase d-characters, a `.`
//! separator and a `;N` version on files. A file path given without separator
//! or version is canonicalized, so `/CASPER/VMLINUZ` and `/CASPER/VMLINUZ;1`
//! both become `/CASPER/VMLINUZ.;1`.

use crate::error::{Error, Result};

/// ISO9660 interchange level. Level 1 restricts names to 8.3, levels 2 and 3
/// allow 30-character file identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterchangeLevel(u8);

impl InterchangeLevel {
    pub fn new(level: u8) -> Result<Self> {
        if !(1..=3).contains(&level) {
            return Err(Error::InvalidOption(format!(
                "interchange level {level} is not supported (expected 1, 2 or 3)"
            )));
        }
        Ok(Self(level))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    fn max_dir_len(self) -> usize {
        if self.0 == 1 {
            8
        } else {
            31
        }
    }
}

fn is_d_char(c: u8) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || c == b'_'
}

/// Split an absolute in-volume path into its components.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| Error::invalid_name(path, "in-volume paths must be absolute"))?;
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    rest.split('/')
        .map(|part| {
            if part.is_empty() {
                Err(Error::invalid_name(path, "empty path component"))
            } else {
                Ok(part)
            }
        })
        .collect()
}

pub fn directory_identifier(name: &str, level: InterchangeLevel) -> Result<String> {
    if name.is_empty() {
        return Err(Error::invalid_name(name, "empty directory identifier"));
    }
    if !name.bytes().all(is_d_char) {
        return Err(Error::invalid_name(
            name,
            "directory identifiers may only use A-Z, 0-9 and _",
        ));
    }
    if name.len() > level.max_dir_len() {
        return Err(Error::invalid_name(
            name,
            format!(
                "longer than {} characters at interchange level {}",
                level.max_dir_len(),
                level.get()
            ),
        ));
    }
    Ok(name.to_string())
}

/// Canonical file identifier: `STEM.EXT;VERSION`, with an empty extension kept
/// as a bare `.`.
pub fn file_identifier(name: &str, level: InterchangeLevel) -> Result<String> {
    let (base, version) = match name.rsplit_once(';') {
        Some((base, version)) => {
            let version = version
                .parse::<u16>()
                .ok()
                .filter(|v| (1..=32767).contains(v))
                .ok_or_else(|| Error::invalid_name(name, "version must be 1..=32767"))?;
            (base, version)
        }
        None => (name, 1),
    };

    let (stem, ext) = base.split_once('.').unwrap_or((base, ""));
    if ext.contains('.') {
        return Err(Error::invalid_name(name, "more than one '.' separator"));
    }
    if stem.is_empty() && ext.is_empty() {
        return Err(Error::invalid_name(name, "empty file identifier"));
    }
    if !stem.bytes().chain(ext.bytes()).all(is_d_char) {
        return Err(Error::invalid_name(
            name,
            "file identifiers may only use A-Z, 0-9 and _",
        ));
    }

    if level.get() == 1 {
        if stem.len() > 8 || ext.len() > 3 {
            return Err(Error::invalid_name(
                name,
                "interchange level 1 requires 8.3 names",
            ));
        }
    } else if stem.len() + ext.len() > 30 {
        return Err(Error::invalid_name(
            name,
            "name and extension exceed 30 characters",
        ));
    }

    Ok(format!("{stem}.{ext};{version}"))
}

/// Canonical path of a file: validated directories plus canonical identifier.
pub fn canonical_file_path(path: &str, level: InterchangeLevel) -> Result<String> {
    let parts = split_path(path)?;
    let Some((file, dirs)) = parts.split_last() else {
        return Err(Error::invalid_name(path, "file path names the root"));
    };
    let mut canonical = String::new();
    for dir in dirs {
        canonical.push('/');
        canonical.push_str(&directory_identifier(dir, level)?);
    }
    canonical.push('/');
    canonical.push_str(&file_identifier(file, level)?);
    Ok(canonical)
}

pub fn canonical_dir_path(path: &str, level: InterchangeLevel) -> Result<String> {
    let parts = split_path(path)?;
    if parts.is_empty() {
        return Ok("/".to_string());
    }
    let mut canonical = String::new();
    for dir in parts {
        canonical.push('/');
        canonical.push_str(&directory_identifier(dir, level)?);
    }
    Ok(canonical)
}

/// Parent of a canonical path; `/` for top-level entries.
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Last component of a canonical path.
pub fn leaf_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Key used to compare identifiers loosely: uppercase, no version, no
/// trailing empty-extension dot. `VMLINUZ.;1`, `VMLINUZ;1` and `vmlinuz`
/// share the key `VMLINUZ`.
pub fn lookup_key(identifier: &str) -> String {
    let base = identifier
        .split_once(';')
        .map_or(identifier, |(base, _)| base);
    let base = base.strip_suffix('.').unwrap_or(base);
    base.to_ascii_uppercase()
}

/// Volume identifiers are up to 32 d-characters.
pub fn validate_volume_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 32 {
        return Err(Error::InvalidOption(format!(
            "volume identifier '{id}' must be 1-32 characters"
        )));
    }
    if !id.bytes().all(is_d_char) {
        return Err(Error::InvalidOption(format!(
            "volume identifier '{id}' may only use A-Z, 0-9 and _"
        )));
    }
    Ok(())
}

/// Rock Ridge aliases are POSIX names: no `/`, no NUL, not `.`/`..`.
pub fn validate_alias(alias: &str) -> Result<()> {
    if alias.is_empty() || alias == "." || alias == ".." {
        return Err(Error::invalid_name(alias, "not a usable Rock Ridge name"));
    }
    if alias.contains('/') || alias.contains('\0') {
        return Err(Error::invalid_name(alias, "Rock Ridge names cannot contain '/' or NUL"));
    }
    if alias.len() > 128 {
        return Err(Error::invalid_name(alias, "Rock Ridge names are limited to 128 bytes"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(n: u8) -> InterchangeLevel {
        InterchangeLevel::new(n).unwrap()
    }

    #[test]
    fn test_file_identifier_adds_separator_and_version() {
        assert_eq!(file_identifier("VMLINUZ", level(3)).unwrap(), "VMLINUZ.;1");
        assert_eq!(file_identifier("VMLINUZ;1", level(3)).unwrap(), "VMLINUZ.;1");
        assert_eq!(file_identifier("GRUB.CFG", level(1)).unwrap(), "GRUB.CFG;1");
        assert_eq!(file_identifier("BOOTX64.EFI;2", level(1)).unwrap(), "BOOTX64.EFI;2");
    }

    #[test]
    fn test_file_identifier_rejects_lowercase_and_bad_versions() {
        assert!(file_identifier("vmlinuz", level(3)).is_err());
        assert!(file_identifier("A.B.C", level(3)).is_err());
        assert!(file_identifier("KERNEL;0", level(3)).is_err());
        assert!(file_identifier("KERNEL;x", level(3)).is_err());
    }

    #[test]
    fn test_level_one_enforces_8_3() {
        assert!(file_identifier("NETWORK_CONFIG", level(1)).is_err());
        assert!(file_identifier("NETWORK_CONFIG", level(3)).is_ok());
        assert!(directory_identifier("VERYLONGDIR", level(1)).is_err());
        assert!(directory_identifier("VERYLONGDIR", level(2)).is_ok());
    }

    #[test]
    fn test_canonical_paths() {
        assert_eq!(
            canonical_file_path("/CASPER/VMLINUZ;1", level(3)).unwrap(),
            "/CASPER/VMLINUZ.;1"
        );
        assert_eq!(canonical_dir_path("/BOOT/GRUB", level(3)).unwrap(), "/BOOT/GRUB");
        assert_eq!(canonical_dir_path("/", level(3)).unwrap(), "/");
        assert!(canonical_file_path("CASPER/VMLINUZ", level(3)).is_err());
        assert!(canonical_file_path("/CASPER//VMLINUZ", level(3)).is_err());
    }

    #[test]
    fn test_parent_and_leaf() {
        assert_eq!(parent_of("/CASPER/VMLINUZ.;1"), "/CASPER");
        assert_eq!(parent_of("/USER_DATA.;1"), "/");
        assert_eq!(leaf_of("/CASPER/VMLINUZ.;1"), "VMLINUZ.;1");
    }

    #[test]
    fn test_lookup_key_ignores_version_and_dot() {
        assert_eq!(lookup_key("VMLINUZ.;1"), "VMLINUZ");
        assert_eq!(lookup_key("VMLINUZ;1"), "VMLINUZ");
        assert_eq!(lookup_key("vmlinuz"), "VMLINUZ");
        assert_eq!(lookup_key("GRUBX64.EFI;1"), "GRUBX64.EFI");
    }

    #[test]
    fn test_volume_id_rules() {
        assert!(validate_volume_id("CIDATA").is_ok());
        assert!(validate_volume_id("cidata").is_err());
        assert!(validate_volume_id("").is_err());
        assert!(validate_volume_id(&"A".repeat(33)).is_err());
    }
}
