use std::path::Path;

use anyhow::{bail, Context, Result};
use autoiso::artifact::grub::{render_boot_menu, BootMenu};
use autoiso::artifact::iso::IsoImage;
use autoiso::{
    assemble, attach_request_path, load_config, render_tree, verify_layout, write_attach_request,
    AssemblyPlan,
};

fn usage() -> &'static str {
    "Usage:\n  autoiso build <config.toml>\n  autoiso assemble <source_iso> <payload_dir> <label> <output>\n  autoiso inspect <image.iso>\n  autoiso grub-cfg <label>"
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [cmd, config] if cmd == "build" => build(Path::new(config)),
        [cmd, source_iso, payload_dir, label, output] if cmd == "assemble" => {
            let mut plan = AssemblyPlan::new(source_iso, payload_dir, label.as_str(), output);
            plan.recorded_at = autoiso::config::recording_time(
                std::env::var("SOURCE_DATE_EPOCH").ok().as_deref(),
            )?;
            assemble_plan(&plan)
        }
        [cmd, image] if cmd == "inspect" => inspect(Path::new(image)),
        [cmd, label] if cmd == "grub-cfg" => {
            print!("{}", render_boot_menu(&BootMenu::autoinstall(label.as_str())));
            Ok(())
        }
        _ => bail!(usage()),
    }
}

fn build(config_path: &Path) -> Result<()> {
    let loaded = load_config(config_path)?;
    assemble_plan(&loaded.plan)?;

    if let Some(request) = loaded.attach {
        let path = attach_request_path(&loaded.plan.output);
        write_attach_request(&path, &request)?;
        println!("  Attach request: {}", path.display());
        for (slot, backing) in request.backing_files().iter().enumerate() {
            println!("    cdrom{slot}: {backing}");
        }
    }
    Ok(())
}

fn assemble_plan(plan: &AssemblyPlan) -> Result<()> {
    let report = assemble(plan).with_context(|| {
        format!(
            "assembling '{}' from '{}'",
            plan.output.display(),
            plan.source_iso.display()
        )
    })?;
    println!(
        "Done: {} ({} bytes, {} seed files)",
        report.output.display(),
        report.image_len,
        report.seeds.len()
    );
    Ok(())
}

fn inspect(image_path: &Path) -> Result<()> {
    let mut image = IsoImage::open(image_path)
        .with_context(|| format!("opening '{}'", image_path.display()))?;

    println!("Volume: {}", image.volume_id());
    print!("{}", render_tree(&mut image)?);

    let entries = image.boot_entries()?;
    if entries.is_empty() {
        println!("El Torito: none");
    }
    for entry in &entries {
        println!(
            "El Torito: platform 0x{:02x}, {:?}, bootable={}, lba {}, {} sectors",
            entry.platform_id, entry.emulation, entry.bootable, entry.load_lba, entry.sector_count
        );
    }

    let report = verify_layout(&mut image)?;
    for check in &report.checks {
        match &check.failure {
            None => println!("  [OK] {}", check.item),
            Some(reason) => println!("  [FAIL] {}: {reason}", check.item),
        }
    }
    if !report.is_ok() {
        bail!(
            "'{}' fails {} layout check(s)",
            image_path.display(),
            report.failures().count()
        );
    }
    Ok(())
}
