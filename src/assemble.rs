//! End-to-end assembly of the autoinstall image.
//!
//! Sequence, inside one scratch workspace:
//! 1. extract kernel, initrd and both UEFI loaders from the source image
//! 2. build the FAT16 EFI boot image from the loaders
//! 3. lay out the new volume: skeleton, kernel, initrd, NoCloud seed files,
//!    `grub.cfg`, the EFI boot image and its El Torito entry
//! 4. finalize the volume to the output path, then the optional checksum
//!
//! Errors propagate unchanged and nothing is retried. The run leaves either a
//! complete image at the output path or nothing.

use std::fs;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::artifact::checksum::generate_iso_checksum;
use crate::artifact::esp::build_esp_image;
use crate::artifact::grub::{render_boot_menu, BootMenu};
use crate::artifact::iso::names::{self, InterchangeLevel};
use crate::artifact::iso::{IsoImage, RockRidge, TargetVolume, VolumeOptions};
use crate::error::{Error, IoContext, Result};
use crate::extract::{extract, CandidateLookup, StagedAsset};
use crate::layout::{
    BOOTLOADER_CANDIDATES, BOOT_CATALOG_ISO_PATH, EFIBOOT_ALIAS, EFIBOOT_ISO_PATH, EFIBOOT_SIZE_MB, GRUB_CFG_ALIAS,
    GRUB_CFG_ISO_PATH, INITRD_ALIAS, INITRD_CANDIDATES, INITRD_ISO_PATH, INTERCHANGE_LEVEL,
    ISO_SKELETON, KERNEL_ALIAS, KERNEL_CANDIDATES, KERNEL_ISO_PATH, SECOND_STAGE_CANDIDATES,
    SEED_FILES, VOLUME_ID,
};
use crate::workspace::WorkspaceDir;

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct AssemblyPlan {
    pub source_iso: PathBuf,
    /// Directory holding `user-data`, `meta-data` and optionally
    /// `vendor-data` / `network-config`.
    pub payload_dir: PathBuf,
    pub deployment_label: String,
    pub output: PathBuf,

    pub volume_id: String,
    pub interchange_level: u8,
    pub rock_ridge: Option<RockRidge>,
    pub recorded_at: OffsetDateTime,

    /// EFI boot image size in bytes.
    pub esp_capacity: u64,
    pub checksum: bool,
    /// Parent for the scratch workspace; system temp dir when `None`.
    pub workspace_root: Option<PathBuf>,

    pub kernel: CandidateLookup,
    pub initrd: CandidateLookup,
    pub bootloader: CandidateLookup,
    pub second_stage: CandidateLookup,
}

impl AssemblyPlan {
    /// Plan with the default layout: volume `CIDATA`, level 3, Rock Ridge
    /// 1.09, 16 MiB EFI boot image, default candidate lists.
    pub fn new(
        source_iso: impl Into<PathBuf>,
        payload_dir: impl Into<PathBuf>,
        deployment_label: impl Into<String>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_iso: source_iso.into(),
            payload_dir: payload_dir.into(),
            deployment_label: deployment_label.into(),
            output: output.into(),
            volume_id: VOLUME_ID.to_string(),
            interchange_level: INTERCHANGE_LEVEL,
            rock_ridge: Some(RockRidge::V1_09),
            recorded_at: OffsetDateTime::now_utc(),
            esp_capacity: EFIBOOT_SIZE_MB * 1024 * 1024,
            checksum: false,
            workspace_root: None,
            kernel: CandidateLookup::new("kernel", KERNEL_CANDIDATES),
            initrd: CandidateLookup::new("initrd", INITRD_CANDIDATES),
            bootloader: CandidateLookup::new("bootloader", BOOTLOADER_CANDIDATES),
            second_stage: CandidateLookup::new("second-stage loader", SECOND_STAGE_CANDIDATES),
        }
    }

    /// Reject options the fixed output layout cannot be built with.
    ///
    /// cloud-init only finds the seed files under their Rock Ridge names
    /// (`user-data`, `meta-data`), and every layout path has to be valid at the
    /// chosen interchange level.
    pub fn validate(&self) -> Result<()> {
        names::validate_volume_id(&self.volume_id)?;
        if self.rock_ridge.is_none() {
            return Err(Error::InvalidOption(
                "Rock Ridge is required: NoCloud reads the seed files as 'user-data' and 'meta-data'"
                    .to_string(),
            ));
        }
        let level = InterchangeLevel::new(self.interchange_level)?;
        let unusable = |path: &str, e: Error| {
            Error::InvalidOption(format!(
                "interchange level {} cannot hold '{path}': {e}",
                self.interchange_level
            ))
        };
        for &dir in ISO_SKELETON {
            names::canonical_dir_path(dir, level).map_err(|e| unusable(dir, e))?;
        }
        let files = [
            KERNEL_ISO_PATH,
            INITRD_ISO_PATH,
            GRUB_CFG_ISO_PATH,
            EFIBOOT_ISO_PATH,
            BOOT_CATALOG_ISO_PATH,
        ];
        for path in files.into_iter().chain(SEED_FILES.iter().map(|s| s.iso_path)) {
            names::canonical_file_path(path, level).map_err(|e| unusable(path, e))?;
        }
        Ok(())
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct AssemblyReport {
    pub output: PathBuf,
    pub image_len: u64,
    /// Kernel, initrd, bootloader, second stage, in that order.
    pub extracted: Vec<StagedAsset>,
    /// Payload file names written to the volume.
    pub seeds: Vec<&'static str>,
    pub checksum: Option<PathBuf>,
}

/// Run the whole assembly described by `plan`.
///
/// The plan is validated before anything is read or created.
///
/// The workspace is removed exactly once whatever happens. A removal failure
/// after a successful run is only a warning; after a failed run the original
/// error is returned.
pub fn assemble(plan: &AssemblyPlan) -> Result<AssemblyReport> {
    println!(
        "Assembling autoinstall image for '{}'...",
        plan.deployment_label
    );
    plan.validate()?;
    let workspace = WorkspaceDir::create(plan.workspace_root.as_deref())?;
    let result = run(plan, &workspace);

    if let Err(e) = workspace.close() {
        eprintln!("  [WARN] {e}");
    }
    result
}

fn run(plan: &AssemblyPlan, workspace: &WorkspaceDir) -> Result<AssemblyReport> {
    println!("Extracting boot assets from {}", plan.source_iso.display());
    let mut source = IsoImage::open(&plan.source_iso)?;
    let kernel = stage(&mut source, &plan.kernel, &workspace.join("vmlinuz"))?;
    let initrd = stage(&mut source, &plan.initrd, &workspace.join("initrd"))?;
    let bootloader = stage(&mut source, &plan.bootloader, &workspace.join("BOOTX64.EFI"))?;
    let second_stage = stage(&mut source, &plan.second_stage, &workspace.join("grubx64.efi"))?;
    source.close();

    println!("Building EFI boot image...");
    let esp_path = workspace.join("efiboot.img");
    let esp = build_esp_image(
        plan.esp_capacity,
        &read_staged(&bootloader)?,
        &read_staged(&second_stage)?,
        plan.recorded_at,
    )?;
    esp.write_to(&esp_path)?;
    println!(
        "  FAT16: {} bytes, {} clusters of {} bytes",
        esp.capacity(),
        esp.geometry().cluster_count,
        esp.geometry().cluster_bytes()
    );

    println!("Laying out volume {}...", plan.volume_id);
    let mut volume = TargetVolume::new(VolumeOptions {
        interchange_level: plan.interchange_level,
        rock_ridge: plan.rock_ridge,
        recorded_at: plan.recorded_at,
        ..VolumeOptions::new(plan.volume_id.clone())
    })?;
    for dir in ISO_SKELETON {
        volume.add_directory(dir)?;
    }
    volume.add_file(&kernel.path, KERNEL_ISO_PATH, Some(KERNEL_ALIAS))?;
    volume.add_file(&initrd.path, INITRD_ISO_PATH, Some(INITRD_ALIAS))?;
    let seeds = add_seed_files(&mut volume, &plan.payload_dir)?;

    let menu = BootMenu {
        volume_id: plan.volume_id.clone(),
        ..BootMenu::autoinstall(plan.deployment_label.clone())
    };
    let grub_cfg = workspace.join("grub.cfg");
    fs::write(&grub_cfg, render_boot_menu(&menu))
        .io_context(|| format!("writing '{}'", grub_cfg.display()))?;
    volume.add_file(&grub_cfg, GRUB_CFG_ISO_PATH, Some(GRUB_CFG_ALIAS))?;

    volume.add_file(&esp_path, EFIBOOT_ISO_PATH, Some(EFIBOOT_ALIAS))?;
    volume.add_boot_catalog_entry(EFIBOOT_ISO_PATH)?;

    if let Some(parent) = plan.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .io_context(|| format!("creating output directory '{}'", parent.display()))?;
    }
    let summary = volume.finalize(&plan.output)?;
    println!("  Wrote: {} ({} bytes)", summary.output.display(), summary.image_len());

    let checksum = if plan.checksum {
        match generate_iso_checksum(&plan.output) {
            Ok(path) => Some(path),
            Err(e) => {
                // all or nothing: an image without its requested sidecar is removed
                let _ = fs::remove_file(&plan.output);
                return Err(e);
            }
        }
    } else {
        None
    };

    Ok(AssemblyReport {
        image_len: summary.image_len(),
        output: summary.output,
        extracted: vec![kernel, initrd, bootloader, second_stage],
        seeds,
        checksum,
    })
}

fn stage(source: &mut IsoImage, lookup: &CandidateLookup, destination: &Path) -> Result<StagedAsset> {
    let staged = extract(source, lookup, destination)?;
    println!(
        "  Extracted {} -> {} ({} bytes)",
        staged.matched,
        destination.display(),
        staged.len
    );
    Ok(staged)
}

fn read_staged(asset: &StagedAsset) -> Result<Vec<u8>> {
    fs::read(&asset.path).io_context(|| format!("reading staged {} '{}'", asset.asset, asset.path.display()))
}

/// Add the NoCloud seed files. Required ones must exist; optional ones are
/// added only when present.
fn add_seed_files(volume: &mut TargetVolume, payload_dir: &Path) -> Result<Vec<&'static str>> {
    let mut added = Vec::new();
    for seed in SEED_FILES {
        let local = payload_dir.join(seed.name);
        if !seed.required && !local.is_file() {
            continue;
        }
        volume.add_file(&local, seed.iso_path, Some(seed.name))?;
        println!("  Added {} -> {}", seed.name, seed.iso_path);
        added.push(seed.name);
    }
    Ok(added)
}
