//! Error taxonomy for image assembly.
//!
//! Every variant carries the asset or path involved so a failed run can be
//! diagnosed from the message alone. Nothing in the engine retries or
//! swallows these; they surface unchanged to the caller.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// None of the candidate paths for a mandatory asset exist in the source image.
    #[error("{asset} not found in source image (tried {})", .candidates.join(", "))]
    AssetNotFound {
        asset: String,
        candidates: Vec<String>,
    },

    /// The ESP payloads plus filesystem overhead do not fit the requested capacity.
    #[error("EFI boot image needs at least {required} bytes, capacity is {capacity}")]
    InsufficientCapacity { required: u64, capacity: u64 },

    /// The blob cannot be initialized as a valid FAT16 volume.
    #[error("cannot format EFI boot image: {0}")]
    FormatFailure(String),

    #[error("path '{0}' already exists in the volume")]
    DuplicatePath(String),

    /// A directory was requested where a file already lives, or the reverse.
    #[error("path '{path}' conflicts with an existing {existing}")]
    PathConflict { path: String, existing: &'static str },

    #[error("boot target '{0}' was not added to the volume")]
    UnknownBootTarget(String),

    /// Joint validation at finalize time failed; nothing was written.
    #[error("volume is structurally inconsistent: {0}")]
    StructuralInconsistency(String),

    #[error("cannot read staged file '{}': {source}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid ISO9660 name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("'{}' is {size} bytes, larger than a single ISO9660 extent", .path.display())]
    FileTooLarge { path: PathBuf, size: u64 },

    /// The source image is not a readable ISO9660 volume.
    #[error("invalid source image '{}': {reason}", .path.display())]
    InvalidSourceImage { path: PathBuf, reason: String },

    /// A volume option (identifier, interchange level, Rock Ridge version) is unusable.
    #[error("invalid volume option: {0}")]
    InvalidOption(String),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Attach a context message to an `io::Result`, the way `anyhow::Context` does.
pub(crate) trait IoContext<T> {
    fn io_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> IoContext<T> for std::result::Result<T, io::Error> {
    fn io_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|source| Error::io(f(), source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_not_found_names_candidates() {
        let err = Error::AssetNotFound {
            asset: "kernel".to_string(),
            candidates: vec![
                "/CASPER/VMLINUZ.;1".to_string(),
                "/CASPER/HWE_VMLINUZ.;1".to_string(),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("kernel"));
        assert!(msg.contains("/CASPER/VMLINUZ.;1, /CASPER/HWE_VMLINUZ.;1"));
    }

    #[test]
    fn test_io_context_wraps_error() {
        let result: std::result::Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::NotFound, "gone"));
        let err = result.io_context(|| "reading thing").unwrap_err();
        assert_eq!(err.to_string(), "reading thing: gone");
    }
}
