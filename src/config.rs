//! TOML run configuration.
//!
//! ```toml
//! [assembly]
//! source_iso = "/iso/ubuntu-24.04.3-live-server-amd64.iso"
//! payload_dir = "vm01/autoinstall"
//! deployment_label = "vm01"
//! output = "vm01/bootstrap.iso"
//!
//! [attach]
//! vm = "vm01"
//! datastore = "iso"
//! iso_path = "vm01/bootstrap.iso"
//! ```
//!
//! Relative paths resolve against the directory holding the config file.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

use crate::artifact::iso::RockRidge;
use crate::assemble::AssemblyPlan;
use crate::attach::AttachRequest;
use crate::extract::CandidateLookup;

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub plan: AssemblyPlan,
    pub attach: Option<AttachRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AutoisoToml {
    assembly: AssemblyToml,
    attach: Option<AttachToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AssemblyToml {
    source_iso: String,
    payload_dir: String,
    deployment_label: String,
    output: String,
    volume_id: Option<String>,
    interchange_level: Option<u8>,
    rock_ridge: Option<String>,
    esp_size_mb: Option<u64>,
    checksum: Option<bool>,
    workspace_root: Option<String>,
    candidates: Option<CandidatesToml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CandidatesToml {
    kernel: Option<Vec<String>>,
    initrd: Option<Vec<String>>,
    bootloader: Option<Vec<String>>,
    second_stage: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AttachToml {
    vm: String,
    datastore: String,
    iso_path: String,
    installer_iso_path: Option<String>,
}

/// Load and validate `config_path`.
pub fn load_config(config_path: &Path) -> Result<LoadedConfig> {
    let config_text = fs::read_to_string(config_path)
        .with_context(|| format!("reading config '{}'", config_path.display()))?;
    let base_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parse_config(
        &config_text,
        base_dir,
        config_path,
        std::env::var("SOURCE_DATE_EPOCH").ok().as_deref(),
    )
}

fn parse_config(
    config_text: &str,
    base_dir: &Path,
    config_path: &Path,
    source_date_epoch: Option<&str>,
) -> Result<LoadedConfig> {
    let parsed: AutoisoToml = toml::from_str(config_text)
        .with_context(|| format!("parsing config '{}'", config_path.display()))?;
    let assembly = parsed.assembly;

    let deployment_label = assembly.deployment_label.trim().to_string();
    if deployment_label.is_empty() {
        bail!(
            "invalid config '{}': deployment_label must not be empty",
            config_path.display()
        );
    }

    let rock_ridge = match assembly.rock_ridge.as_deref() {
        None => RockRidge::V1_09,
        Some(v) => v
            .parse::<RockRidge>()
            .with_context(|| format!("invalid config '{}'", config_path.display()))?,
    };

    let mut plan = AssemblyPlan::new(
        resolve_path(base_dir, &assembly.source_iso),
        resolve_path(base_dir, &assembly.payload_dir),
        deployment_label,
        resolve_path(base_dir, &assembly.output),
    );
    plan.rock_ridge = Some(rock_ridge);
    plan.recorded_at = recording_time(source_date_epoch)?;
    if let Some(volume_id) = assembly.volume_id {
        plan.volume_id = volume_id;
    }
    if let Some(level) = assembly.interchange_level {
        plan.interchange_level = level;
    }
    if let Some(size_mb) = assembly.esp_size_mb {
        if size_mb == 0 {
            bail!(
                "invalid config '{}': esp_size_mb must be positive",
                config_path.display()
            );
        }
        plan.esp_capacity = size_mb * 1024 * 1024;
    }
    plan.checksum = assembly.checksum.unwrap_or(false);
    plan.workspace_root = assembly
        .workspace_root
        .as_deref()
        .map(|root| resolve_path(base_dir, root));

    let candidates = assembly.candidates.unwrap_or_default();
    for (lookup, overrides) in [
        (&mut plan.kernel, candidates.kernel),
        (&mut plan.initrd, candidates.initrd),
        (&mut plan.bootloader, candidates.bootloader),
        (&mut plan.second_stage, candidates.second_stage),
    ] {
        if let Some(list) = overrides {
            apply_candidates(lookup, list, config_path)?;
        }
    }

    plan.validate()
        .with_context(|| format!("invalid config '{}'", config_path.display()))?;

    let attach = parsed.attach.map(|attach| AttachRequest {
        installer_iso_path: attach.installer_iso_path,
        ..AttachRequest::new(attach.vm, attach.datastore, attach.iso_path)
    });

    Ok(LoadedConfig { plan, attach })
}

fn apply_candidates(
    lookup: &mut CandidateLookup,
    list: Vec<String>,
    config_path: &Path,
) -> Result<()> {
    let list: Vec<String> = list
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if list.is_empty() {
        bail!(
            "invalid config '{}': candidate list for {} is empty",
            config_path.display(),
            lookup.asset
        );
    }
    if let Some(relative) = list.iter().find(|c| !c.starts_with('/')) {
        bail!(
            "invalid config '{}': {} candidate '{}' must be an absolute in-image path",
            config_path.display(),
            lookup.asset,
            relative
        );
    }
    lookup.candidates = list;
    Ok(())
}

pub(crate) fn resolve_path(base_dir: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    }
}

/// `SOURCE_DATE_EPOCH` when set, for reproducible images; otherwise now.
pub fn recording_time(source_date_epoch: Option<&str>) -> Result<OffsetDateTime> {
    match source_date_epoch.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(OffsetDateTime::now_utc()),
        Some(raw) => {
            let seconds: i64 = raw
                .parse()
                .with_context(|| format!("SOURCE_DATE_EPOCH '{raw}' is not an integer"))?;
            OffsetDateTime::from_unix_timestamp(seconds)
                .map_err(|e| anyhow!("SOURCE_DATE_EPOCH '{raw}' is out of range: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{KERNEL_CANDIDATES, VOLUME_ID};
    use tempfile::TempDir;
    use time::macros::datetime;

    const MINIMAL: &str = r#"
[assembly]
source_iso = "/iso/ubuntu.iso"
payload_dir = "vm01/autoinstall"
deployment_label = "vm01"
output = "vm01/bootstrap.iso"
"#;

    fn parse(text: &str) -> Result<LoadedConfig> {
        parse_config(text, Path::new("/srv/iso"), Path::new("/srv/iso/vm01.toml"), Some("0"))
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let loaded = parse(MINIMAL).unwrap();
        let plan = loaded.plan;
        assert_eq!(plan.source_iso, PathBuf::from("/iso/ubuntu.iso"));
        assert_eq!(plan.payload_dir, PathBuf::from("/srv/iso/vm01/autoinstall"));
        assert_eq!(plan.output, PathBuf::from("/srv/iso/vm01/bootstrap.iso"));
        assert_eq!(plan.volume_id, VOLUME_ID);
        assert_eq!(plan.interchange_level, 3);
        assert_eq!(plan.rock_ridge, Some(RockRidge::V1_09));
        assert_eq!(plan.esp_capacity, 16 * 1024 * 1024);
        assert_eq!(plan.kernel.candidates, KERNEL_CANDIDATES);
        assert_eq!(plan.recorded_at, datetime!(1970-01-01 0:00 UTC));
        assert!(!plan.checksum);
        assert!(loaded.attach.is_none());
    }

    #[test]
    fn test_full_config() {
        let text = r#"
[assembly]
source_iso = "ubuntu.iso"
payload_dir = "vm01/autoinstall"
deployment_label = "vm01"
output = "vm01/bootstrap.iso"
rock_ridge = "1.12"
esp_size_mb = 32
checksum = true
workspace_root = "/var/tmp"

[assembly.candidates]
kernel = ["/CASPER/HWE_VMLINUZ.;1"]

[attach]
vm = "vm01"
datastore = "iso"
iso_path = "vm01/bootstrap.iso"
installer_iso_path = "ubuntu-24.04.3-live-server-amd64.iso"
"#;
        let loaded = parse(text).unwrap();
        assert_eq!(loaded.plan.source_iso, PathBuf::from("/srv/iso/ubuntu.iso"));
        assert_eq!(loaded.plan.rock_ridge, Some(RockRidge::V1_12));
        assert_eq!(loaded.plan.esp_capacity, 32 * 1024 * 1024);
        assert!(loaded.plan.checksum);
        assert_eq!(loaded.plan.workspace_root, Some(PathBuf::from("/var/tmp")));
        assert_eq!(loaded.plan.kernel.candidates, vec!["/CASPER/HWE_VMLINUZ.;1"]);
        assert_eq!(loaded.plan.initrd.candidates.len(), 2);

        let attach = loaded.attach.unwrap();
        assert_eq!(attach.vm, "vm01");
        assert_eq!(attach.backing_files().len(), 2);
    }

    #[test]
    fn test_rejects_layouts_that_cannot_provision() {
        let plain = MINIMAL.replace("[assembly]", "[assembly]\nrock_ridge = \"none\"");
        assert!(parse(&plain).is_err());

        let level_one = MINIMAL.replace("[assembly]", "[assembly]\ninterchange_level = 1");
        let err = format!("{:#}", parse(&level_one).unwrap_err());
        assert!(err.contains("interchange level 1"), "{err}");

        let bad_label = MINIMAL.replace("[assembly]", "[assembly]\nvolume_id = \"cidata\"");
        assert!(parse(&bad_label).is_err());
    }

    #[test]
    fn test_rejects_bad_values() {
        let unknown = MINIMAL.replace("[assembly]", "[assembly]\nbogus = 1");
        assert!(parse(&unknown).is_err());

        let bad_rr = MINIMAL.replace("[assembly]", "[assembly]\nrock_ridge = \"2.0\"");
        assert!(parse(&bad_rr).is_err());

        let empty_label = MINIMAL.replace("\"vm01\"\n", "\" \"\n");
        assert!(parse(&empty_label).is_err());

        let relative = format!("{MINIMAL}\n[assembly.candidates]\nkernel = [\"casper/vmlinuz\"]\n");
        let err = parse(&relative).unwrap_err();
        assert!(err.to_string().contains("absolute"));

        let empty = format!("{MINIMAL}\n[assembly.candidates]\ninitrd = []\n");
        assert!(parse(&empty).is_err());
    }

    #[test]
    fn test_source_date_epoch() {
        assert_eq!(
            recording_time(Some("1700000000")).unwrap(),
            datetime!(2023-11-14 22:13:20 UTC)
        );
        assert!(recording_time(Some("soon")).is_err());
        assert!(recording_time(None).is_ok());
    }

    #[test]
    fn test_demo_config_parses() {
        let loaded = parse(include_str!("../demos/vm01.toml")).unwrap();
        assert_eq!(loaded.plan.deployment_label, "vm01");
        assert_eq!(loaded.plan.output, PathBuf::from("/srv/iso/out/vm01/bootstrap.iso"));
        assert!(loaded.plan.checksum);
        assert_eq!(
            loaded.attach.unwrap().installer_iso_path.as_deref(),
            Some("ubuntu-24.04.3-live-server-amd64.iso")
        );
    }

    #[test]
    fn test_load_config_resolves_against_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vm01.toml");
        fs::write(&path, MINIMAL).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(
            loaded.plan.payload_dir,
            temp.path().join("vm01/autoinstall")
        );
    }
}
