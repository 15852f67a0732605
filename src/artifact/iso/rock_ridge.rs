//! Rock Ridge (RRIP over SUSP) system use entries.
//!
//! Each directory record can carry a system use area after its identifier.
//! The root's `.` record starts with `SP` and points at a continuation area
//! holding the `ER` entry, which is too large to fit inline.

use std::fmt;
use std::str::FromStr;

use super::records::put_both_u32;
use crate::error::{Error, Result};

pub mod signatures {
    pub const SUSP_INDICATOR: &[u8; 2] = b"SP";
    pub const RR_FLAGS: &[u8; 2] = b"RR";
    pub const CONTINUATION: &[u8; 2] = b"CE";
    pub const EXTENSION_REF: &[u8; 2] = b"ER";
    pub const POSIX_ATTRS: &[u8; 2] = b"PX";
    pub const TIMESTAMPS: &[u8; 2] = b"TF";
    pub const ALTERNATE_NAME: &[u8; 2] = b"NM";
    pub const TERMINATOR: &[u8; 2] = b"ST";
}

// Bits of the RR entry announcing which RRIP entries follow.
const RR_HAS_PX: u8 = 0x01;
const RR_HAS_NM: u8 = 0x08;
const RR_HAS_TF: u8 = 0x80;

const TF_MODIFY: u8 = 0x02;

/// Entry version byte; 1 for every SUSP and RRIP entry written here.
const ENTRY_VERSION: u8 = 1;

/// `SP` check bytes.
const SP_CHECK: [u8; 2] = [0xBE, 0xEF];
const SP_LEN: usize = 7;
const RR_LEN: usize = 5;

const NM_CONTINUE: u8 = 0x01;
const NM_CURRENT: u8 = 0x02;
const NM_PARENT: u8 = 0x04;

pub const MODE_DIR: u32 = 0o040_555;
pub const MODE_FILE: u32 = 0o100_444;

/// Length of the CE entry placed in the root `.` record.
pub const CE_LEN: usize = 28;

/// Supported RRIP revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RockRidge {
    V1_09,
    V1_10,
    V1_12,
}

impl RockRidge {
    fn extension(self) -> (&'static str, &'static str, &'static str) {
        match self {
            RockRidge::V1_09 | RockRidge::V1_10 => (
                "RRIP_1991A",
                "THE ROCK RIDGE INTERCHANGE PROTOCOL PROVIDES SUPPORT FOR POSIX FILE SYSTEM SEMANTICS",
                "PLEASE CONTACT DISC PUBLISHER FOR SPECIFICATION SOURCE.  SEE PUBLISHER IDENTIFIER IN PRIMARY VOLUME DESCRIPTOR FOR CONTACT INFORMATION.",
            ),
            RockRidge::V1_12 => (
                "IEEE_P1282",
                "THE IEEE P1282 PROTOCOL PROVIDES SUPPORT FOR POSIX FILE SYSTEM SEMANTICS.",
                "PLEASE CONTACT THE IEEE STANDARDS DEPARTMENT, PISCATAWAY, NJ, USA FOR THE P1282 SPECIFICATION.",
            ),
        }
    }

    /// The RR entry was dropped in 1.12.
    fn emits_rr(self) -> bool {
        !matches!(self, RockRidge::V1_12)
    }

    /// 1.12 added the file serial number to PX.
    fn px_len(self) -> usize {
        match self {
            RockRidge::V1_12 => 44,
            _ => 36,
        }
    }

    /// System use area for an ordinary record (`.`/`..` of non-root
    /// directories, and every child entry).
    pub fn system_use(self, attrs: &EntryAttrs<'_>) -> Vec<u8> {
        let mut out = Vec::new();
        if self.emits_rr() {
            let mut flags = RR_HAS_PX | RR_HAS_TF;
            if attrs.alias.is_some() {
                flags |= RR_HAS_NM;
            }
            out.extend_from_slice(&header(signatures::RR_FLAGS, RR_LEN));
            out.push(flags);
        }
        self.push_px(&mut out, attrs);
        push_tf(&mut out, attrs.recorded);
        if let Some(alias) = attrs.alias {
            push_nm(&mut out, alias);
        }
        out
    }

    /// System use area for the root directory's `.` record.
    pub fn root_system_use(self, attrs: &EntryAttrs<'_>, continuation: Continuation) -> Vec<u8> {
        let mut out = header(signatures::SUSP_INDICATOR, SP_LEN).to_vec();
        out.extend_from_slice(&SP_CHECK);
        out.push(0);
        if self.emits_rr() {
            out.extend_from_slice(&header(signatures::RR_FLAGS, RR_LEN));
            out.push(RR_HAS_PX | RR_HAS_TF);
        }
        let mut ce = [0u8; CE_LEN];
        ce[..4].copy_from_slice(&header(signatures::CONTINUATION, CE_LEN));
        put_both_u32(&mut ce[4..12], continuation.block);
        put_both_u32(&mut ce[12..20], continuation.offset);
        put_both_u32(&mut ce[20..28], continuation.len);
        out.extend_from_slice(&ce);
        self.push_px(&mut out, attrs);
        push_tf(&mut out, attrs.recorded);
        out
    }

    /// Length of the root `.` system use area, independent of where the
    /// continuation area ends up.
    pub fn root_system_use_len(self) -> usize {
        let rr_len = if self.emits_rr() { RR_LEN } else { 0 };
        SP_LEN + rr_len + CE_LEN + self.px_len() + TF_LEN
    }

    /// The `ER` entry stored in the continuation area.
    pub fn extension_reference(self) -> Vec<u8> {
        let (id, descriptor, source) = self.extension();
        let len = 8 + id.len() + descriptor.len() + source.len();
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&header(signatures::EXTENSION_REF, len));
        out.extend_from_slice(&[
            id.len() as u8,
            descriptor.len() as u8,
            source.len() as u8,
            ENTRY_VERSION,
        ]);
        out.extend_from_slice(id.as_bytes());
        out.extend_from_slice(descriptor.as_bytes());
        out.extend_from_slice(source.as_bytes());
        out
    }

    fn push_px(self, out: &mut Vec<u8>, attrs: &EntryAttrs<'_>) {
        let len = self.px_len();
        let mut px = vec![0u8; len];
        px[..4].copy_from_slice(&header(signatures::POSIX_ATTRS, len));
        put_both_u32(&mut px[4..12], attrs.mode);
        put_both_u32(&mut px[12..20], attrs.links);
        // uid and gid stay 0
        if len == 44 {
            put_both_u32(&mut px[36..44], attrs.serial);
        }
        out.extend_from_slice(&px);
    }
}

impl FromStr for RockRidge {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1.09" => Ok(RockRidge::V1_09),
            "1.10" => Ok(RockRidge::V1_10),
            "1.12" => Ok(RockRidge::V1_12),
            other => Err(Error::InvalidOption(format!(
                "unsupported Rock Ridge version '{other}' (expected 1.09, 1.10 or 1.12)"
            ))),
        }
    }
}

impl fmt::Display for RockRidge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RockRidge::V1_09 => "1.09",
            RockRidge::V1_10 => "1.10",
            RockRidge::V1_12 => "1.12",
        };
        f.write_str(s)
    }
}

/// POSIX attributes recorded for one directory record.
#[derive(Debug, Clone, Copy)]
pub struct EntryAttrs<'a> {
    pub mode: u32,
    pub links: u32,
    pub serial: u32,
    pub recorded: [u8; 7],
    pub alias: Option<&'a str>,
}

/// Location of the continuation area referenced by `CE`.
#[derive(Debug, Clone, Copy)]
pub struct Continuation {
    pub block: u32,
    pub offset: u32,
    pub len: u32,
}

const TF_LEN: usize = 12;

/// Signature, length and version: the 4 bytes every entry starts with.
fn header(signature: &[u8; 2], len: usize) -> [u8; 4] {
    [signature[0], signature[1], len as u8, ENTRY_VERSION]
}

fn push_tf(out: &mut Vec<u8>, recorded: [u8; 7]) {
    out.extend_from_slice(&header(signatures::TIMESTAMPS, TF_LEN));
    out.push(TF_MODIFY);
    out.extend_from_slice(&recorded);
}

fn push_nm(out: &mut Vec<u8>, name: &str) {
    out.extend_from_slice(&header(signatures::ALTERNATE_NAME, 5 + name.len()));
    out.push(0);
    out.extend_from_slice(name.as_bytes());
}

/// Length of the system use area [`RockRidge::system_use`] will produce.
pub fn system_use_len(rr: RockRidge, alias: Option<&str>) -> usize {
    let rr_len = if rr.emits_rr() { RR_LEN } else { 0 };
    let nm_len = alias.map_or(0, |a| 5 + a.len());
    rr_len + rr.px_len() + TF_LEN + nm_len
}

/// Reassemble the Rock Ridge name from the `NM` entries of a system use
/// area. Continuation areas are not followed.
pub fn alternate_name(system_use: &[u8]) -> Option<String> {
    let mut name: Option<Vec<u8>> = None;
    let mut pos = 0;
    while pos + 4 <= system_use.len() {
        let sig = &system_use[pos..pos + 2];
        let len = system_use[pos + 2] as usize;
        if len < 4 || pos + len > system_use.len() {
            break;
        }
        if sig == signatures::TERMINATOR {
            break;
        }
        if sig == signatures::ALTERNATE_NAME && len >= 5 {
            let flags = system_use[pos + 4];
            if flags & (NM_CURRENT | NM_PARENT) == 0 {
                name.get_or_insert_with(Vec::new)
                    .extend_from_slice(&system_use[pos + 5..pos + len]);
            }
            if flags & NM_CONTINUE == 0 && name.is_some() {
                break;
            }
        }
        pos += len;
    }
    name.map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Whether a system use area starts with the SUSP indicator. Only the root
/// `.` record of a volume using SUSP carries one.
pub fn has_susp_indicator(system_use: &[u8]) -> bool {
    system_use.len() >= SP_LEN
        && &system_use[..2] == signatures::SUSP_INDICATOR
        && system_use[4..6] == SP_CHECK
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(alias: Option<&str>) -> EntryAttrs<'_> {
        EntryAttrs {
            mode: MODE_FILE,
            links: 1,
            serial: 7,
            recorded: [124, 1, 1, 0, 0, 0, 0],
            alias,
        }
    }

    #[test]
    fn test_system_use_len_matches_encoding() {
        for rr in [RockRidge::V1_09, RockRidge::V1_10, RockRidge::V1_12] {
            for alias in [None, Some("user-data")] {
                let su = rr.system_use(&attrs(alias));
                assert_eq!(su.len(), system_use_len(rr, alias), "{rr} {alias:?}");
            }
        }
    }

    #[test]
    fn test_root_system_use_len_matches_encoding() {
        let cont = Continuation {
            block: 30,
            offset: 0,
            len: 237,
        };
        for rr in [RockRidge::V1_09, RockRidge::V1_12] {
            let su = rr.root_system_use(&attrs(None), cont);
            assert_eq!(su.len(), rr.root_system_use_len());
            assert!(has_susp_indicator(&su));
        }
    }

    #[test]
    fn test_alternate_name_round_trip() {
        let su = RockRidge::V1_09.system_use(&attrs(Some("grub.cfg")));
        assert_eq!(alternate_name(&su).as_deref(), Some("grub.cfg"));
        let su = RockRidge::V1_09.system_use(&attrs(None));
        assert_eq!(alternate_name(&su), None);
    }

    #[test]
    fn test_extension_reference_1_09() {
        let er = RockRidge::V1_09.extension_reference();
        assert_eq!(&er[..2], b"ER");
        assert_eq!(er[2] as usize, er.len());
        assert_eq!(&er[8..18], b"RRIP_1991A");
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!("1.09".parse::<RockRidge>().unwrap(), RockRidge::V1_09);
        assert_eq!("1.12".parse::<RockRidge>().unwrap(), RockRidge::V1_12);
        assert!("2.0".parse::<RockRidge>().is_err());
    }
}
