//! Builds a new ISO9660 volume.
//!
//! Directories and files are registered up front; nothing touches the output
//! until [`TargetVolume::finalize`], which validates the whole tree, lays out
//! every sector, and streams the image to a temporary file that is renamed
//! into place only once it is complete.
//!
//! # Example
//!
//! ```rust,ignore
//! use autoiso::artifact::iso::{TargetVolume, VolumeOptions};
//! use std::path::Path;
//!
//! let mut volume = TargetVolume::new(VolumeOptions::new("CIDATA"))?;
//! volume.add_directory("/BOOT/GRUB")?;
//! volume.add_file(Path::new("grub.cfg"), "/BOOT/GRUB/GRUB.CFG;1", Some("grub.cfg"))?;
//! volume.finalize(Path::new("out.iso"))?;
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use time::OffsetDateTime;

use super::eltorito::{self, BootEntry};
use super::names::{self, InterchangeLevel};
use super::records::{
    self, encode_record, put_both_u16, put_both_u32, put_padded, record_len, RecordSpec,
};
use super::rock_ridge::{self, Continuation, EntryAttrs, RockRidge, MODE_DIR, MODE_FILE};
use super::{
    sectors_for, FLAG_DIRECTORY, MAX_DEPTH, SECTOR_SIZE, STANDARD_ID, SYSTEM_AREA_SECTORS,
    VD_PRIMARY, VD_TERMINATOR,
};
use crate::error::{Error, IoContext, Result};
use crate::layout::{BOOT_CATALOG_ALIAS, BOOT_CATALOG_ISO_PATH};

/// Largest file that fits one extent, kept sector aligned.
const MAX_EXTENT_LEN: u64 = 0xFFFF_F800;

const MAX_RECORD_LEN: usize = 255;

/// Options fixed at volume creation.
#[derive(Debug, Clone)]
pub struct VolumeOptions {
    pub volume_id: String,
    pub interchange_level: u8,
    /// `None` produces a plain ISO9660 volume without POSIX names.
    pub rock_ridge: Option<RockRidge>,
    pub recorded_at: OffsetDateTime,
    pub system_id: String,
    pub application_id: String,
    /// Where the El Torito catalog is recorded once a boot entry exists.
    pub boot_catalog_path: String,
    pub boot_catalog_alias: Option<String>,
}

impl VolumeOptions {
    /// Interchange level 3, Rock Ridge 1.09, timestamped now.
    pub fn new(volume_id: impl Into<String>) -> Self {
        Self {
            volume_id: volume_id.into(),
            interchange_level: 3,
            rock_ridge: Some(RockRidge::V1_09),
            recorded_at: OffsetDateTime::now_utc(),
            system_id: "LINUX".to_string(),
            application_id: "AUTOISO".to_string(),
            boot_catalog_path: BOOT_CATALOG_ISO_PATH.to_string(),
            boot_catalog_alias: Some(BOOT_CATALOG_ALIAS.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Directory { alias: Option<String> },
    File(FileNode),
    BootCatalog { alias: Option<String> },
}

impl Node {
    fn kind(&self) -> &'static str {
        match self {
            Node::Directory { .. } => "directory",
            Node::File(_) => "file",
            Node::BootCatalog { .. } => "boot catalog",
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self, Node::Directory { .. })
    }

    fn alias(&self) -> Option<&str> {
        match self {
            Node::Directory { alias } | Node::BootCatalog { alias } => alias.as_deref(),
            Node::File(file) => file.alias.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
struct FileNode {
    source: PathBuf,
    len: u64,
    alias: Option<String>,
}

/// Result of a successful [`TargetVolume::finalize`].
#[derive(Debug, Clone)]
pub struct FinalizeSummary {
    pub output: PathBuf,
    pub total_sectors: u32,
    pub directories: usize,
    pub files: usize,
}

impl FinalizeSummary {
    pub fn image_len(&self) -> u64 {
        u64::from(self.total_sectors) * SECTOR_SIZE as u64
    }
}

/// An ISO9660 volume under construction.
#[derive(Debug)]
pub struct TargetVolume {
    options: VolumeOptions,
    level: InterchangeLevel,
    /// Canonical path -> node. The root is implicit.
    nodes: BTreeMap<String, Node>,
    boot: Option<BootEntry>,
}

impl TargetVolume {
    pub fn new(options: VolumeOptions) -> Result<Self> {
        names::validate_volume_id(&options.volume_id)?;
        let level = InterchangeLevel::new(options.interchange_level)?;
        Ok(Self {
            options,
            level,
            nodes: BTreeMap::new(),
            boot: None,
        })
    }

    /// Create a directory and any missing parents.
    ///
    /// Calling this for a directory that already exists is a no-op. A path
    /// that names an existing file is a [`Error::PathConflict`].
    pub fn add_directory(&mut self, path: &str) -> Result<()> {
        let canonical = names::canonical_dir_path(path, self.level)?;
        self.ensure_directory(&canonical)
    }

    fn ensure_directory(&mut self, canonical: &str) -> Result<()> {
        if canonical == "/" {
            return Ok(());
        }
        match self.nodes.get(canonical) {
            Some(node) if node.is_dir() => return Ok(()),
            Some(node) => {
                return Err(Error::PathConflict {
                    path: canonical.to_string(),
                    existing: node.kind(),
                })
            }
            None => {}
        }

        self.ensure_directory(names::parent_of(canonical))?;

        let leaf = names::leaf_of(canonical);
        self.check_sibling_conflict(canonical, true)?;
        let alias = self
            .options
            .rock_ridge
            .map(|_| leaf.to_ascii_lowercase());
        self.nodes
            .insert(canonical.to_string(), Node::Directory { alias });
        Ok(())
    }

    /// A file and a directory in the same parent may not share a name once
    /// versions and empty extensions are ignored.
    fn check_sibling_conflict(&self, canonical: &str, adding_dir: bool) -> Result<()> {
        let parent = names::parent_of(canonical);
        let key = names::lookup_key(names::leaf_of(canonical));
        for (path, node) in &self.nodes {
            if node.is_dir() == adding_dir || names::parent_of(path) != parent {
                continue;
            }
            if names::lookup_key(names::leaf_of(path)) == key {
                return Err(Error::PathConflict {
                    path: canonical.to_string(),
                    existing: node.kind(),
                });
            }
        }
        Ok(())
    }

    /// Register a local file at `iso_path`, with an optional Rock Ridge name.
    ///
    /// The file is only stat'ed here; its content is read during
    /// [`finalize`](Self::finalize). Missing parent directories are created.
    pub fn add_file(&mut self, source: &Path, iso_path: &str, alias: Option<&str>) -> Result<()> {
        let canonical = names::canonical_file_path(iso_path, self.level)?;
        if let Some(alias) = alias {
            names::validate_alias(alias)?;
        }
        self.check_record_fits(&canonical, alias)?;
        if self.nodes.contains_key(&canonical) {
            return Err(Error::DuplicatePath(canonical));
        }

        let len = probe_source(source)?;
        if len > MAX_EXTENT_LEN {
            return Err(Error::FileTooLarge {
                path: source.to_path_buf(),
                size: len,
            });
        }

        self.check_sibling_conflict(&canonical, false)?;
        self.ensure_directory(names::parent_of(&canonical))?;
        self.nodes.insert(
            canonical,
            Node::File(FileNode {
                source: source.to_path_buf(),
                len,
                alias: alias.map(str::to_string),
            }),
        );
        Ok(())
    }

    fn check_record_fits(&self, canonical: &str, alias: Option<&str>) -> Result<()> {
        let id_len = names::leaf_of(canonical).len();
        let su_len = self
            .options
            .rock_ridge
            .map_or(0, |rr| rock_ridge::system_use_len(rr, alias));
        if record_len(id_len, su_len) > MAX_RECORD_LEN {
            return Err(Error::invalid_name(
                alias.unwrap_or(canonical),
                "directory record would exceed 255 bytes",
            ));
        }
        Ok(())
    }

    /// Register the El Torito UEFI entry for an already-added boot image.
    pub fn add_boot_catalog_entry(&mut self, esp_path: &str) -> Result<()> {
        let target = names::canonical_file_path(esp_path, self.level)
            .map_err(|_| Error::UnknownBootTarget(esp_path.to_string()))?;
        if !matches!(self.nodes.get(&target), Some(Node::File(_))) {
            return Err(Error::UnknownBootTarget(target));
        }
        if self.boot.is_some() {
            return Err(Error::StructuralInconsistency(
                "a boot catalog entry is already registered".to_string(),
            ));
        }

        let catalog = names::canonical_file_path(&self.options.boot_catalog_path, self.level)?;
        let alias = self.options.boot_catalog_alias.clone();
        if let Some(alias) = alias.as_deref() {
            names::validate_alias(alias)?;
        }
        self.check_record_fits(&catalog, alias.as_deref())?;
        if self.nodes.contains_key(&catalog) {
            return Err(Error::DuplicatePath(catalog));
        }
        self.check_sibling_conflict(&catalog, false)?;
        self.ensure_directory(names::parent_of(&catalog))?;
        self.nodes.insert(catalog, Node::BootCatalog { alias });
        self.boot = Some(BootEntry::uefi(target));
        Ok(())
    }

    /// Check the accumulated tree as a whole.
    fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let mut iso_names: HashMap<(&str, String), &str> = HashMap::new();
        let mut rr_names: HashMap<(&str, String), &str> = HashMap::new();
        for (path, node) in &self.nodes {
            let parent = names::parent_of(path);
            if parent != "/" && !matches!(self.nodes.get(parent), Some(Node::Directory { .. })) {
                problems.push(format!("'{path}' is not reachable from the root"));
            }
            if node.is_dir() && path.matches('/').count() > MAX_DEPTH - 1 {
                problems.push(format!("'{path}' is nested deeper than {MAX_DEPTH} levels"));
            }

            let leaf = names::leaf_of(path);
            let key = names::lookup_key(leaf);
            if let Some(other) = iso_names.insert((parent, key.clone()), path) {
                problems.push(format!("'{path}' and '{other}' resolve to the same name"));
            }
            if self.options.rock_ridge.is_some() {
                let rr = node
                    .alias()
                    .map_or_else(|| key.to_ascii_lowercase(), str::to_string);
                if let Some(other) = rr_names.insert((parent, rr.clone()), path) {
                    problems.push(format!(
                        "'{path}' and '{other}' share the Rock Ridge name '{rr}'"
                    ));
                }
            }
        }

        if let Some(boot) = &self.boot {
            if !matches!(self.nodes.get(&boot.target), Some(Node::File(_))) {
                problems.push(format!("boot image '{}' is not in the volume", boot.target));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            problems.sort();
            Err(Error::StructuralInconsistency(problems.join("; ")))
        }
    }

    /// Validate the volume and write it to `output`.
    ///
    /// Either a complete image exists at `output` afterwards or nothing was
    /// written there.
    pub fn finalize(&self, output: &Path) -> Result<FinalizeSummary> {
        self.validate()?;
        let layout = self.layout()?;
        let metadata = self.encode_metadata(&layout)?;

        let parent = match output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&parent)
            .io_context(|| format!("creating temporary image in '{}'", parent.display()))?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            writer
                .write_all(&metadata)
                .io_context(|| format!("writing '{}'", output.display()))?;
            for path in &layout.file_order {
                if let Some(Node::File(file)) = self.nodes.get(path) {
                    copy_extent(file, &mut writer, output)?;
                }
            }
            writer
                .flush()
                .io_context(|| format!("writing '{}'", output.display()))?;
        }
        tmp.as_file()
            .sync_all()
            .io_context(|| format!("syncing '{}'", output.display()))?;
        tmp.persist(output)
            .map_err(|e| Error::io(format!("moving image into '{}'", output.display()), e.error))?;

        Ok(FinalizeSummary {
            output: output.to_path_buf(),
            total_sectors: layout.total_sectors,
            directories: layout.dirs.len(),
            files: layout.file_order.len(),
        })
    }

    fn rr_attrs<'a>(&self, node: Option<&'a Node>, links: u32, serial: u32) -> EntryAttrs<'a> {
        let is_dir = node.map_or(true, Node::is_dir);
        EntryAttrs {
            mode: if is_dir { MODE_DIR } else { MODE_FILE },
            links,
            serial,
            recorded: records::record_datetime(self.options.recorded_at),
            alias: node.and_then(Node::alias),
        }
    }

    /// Assign sectors to every structure.
    fn layout(&self) -> Result<Layout> {
        // Breadth-first with sorted children gives path table order:
        // by level, then parent number, then identifier.
        let mut dirs: Vec<DirPlan> = Vec::new();
        let mut index_of: HashMap<String, usize> = HashMap::new();
        let mut queue = VecDeque::from([("/".to_string(), 0usize)]);
        while let Some((path, parent)) = queue.pop_front() {
            let index = dirs.len();
            index_of.insert(path.clone(), index);
            let children = self.children_of(&path);
            for child in &children {
                if self.nodes.get(child).is_some_and(Node::is_dir) {
                    queue.push_back((child.clone(), index));
                }
            }
            dirs.push(DirPlan {
                identifier: if path == "/" {
                    vec![0]
                } else {
                    names::leaf_of(&path).as_bytes().to_vec()
                },
                path,
                parent,
                children,
                size: 0,
                lba: 0,
            });
        }

        for dir in &mut dirs {
            let root = dir.path == "/";
            let mut lens = Vec::with_capacity(dir.children.len() + 2);
            let self_su = match self.options.rock_ridge {
                Some(rr) if root => rr.root_system_use_len(),
                Some(rr) => rock_ridge::system_use_len(rr, None),
                None => 0,
            };
            let parent_su = self
                .options
                .rock_ridge
                .map_or(0, |rr| rock_ridge::system_use_len(rr, None));
            lens.push(record_len(1, self_su));
            lens.push(record_len(1, parent_su));
            for child in &dir.children {
                let node = self.nodes.get(child);
                let su = self
                    .options
                    .rock_ridge
                    .map_or(0, |rr| rock_ridge::system_use_len(rr, node.and_then(Node::alias)));
                let len = record_len(names::leaf_of(child).len(), su);
                if len > MAX_RECORD_LEN {
                    return Err(Error::StructuralInconsistency(format!(
                        "directory record for '{child}' exceeds 255 bytes"
                    )));
                }
                lens.push(len);
            }
            dir.size = packed_size(&lens);
        }

        let mut next = SYSTEM_AREA_SECTORS + 1;
        let boot_record_lba = self.boot.as_ref().map(|_| {
            next += 1;
            next - 1
        });
        next += 1; // terminator

        let path_table_len: u32 = dirs
            .iter()
            .map(|d| path_table_record_len(d.identifier.len()) as u32)
            .sum();
        let l_table_lba = next;
        next += sectors_for(u64::from(path_table_len));
        let m_table_lba = next;
        next += sectors_for(u64::from(path_table_len));

        for dir in &mut dirs {
            dir.lba = next;
            next += dir.size / SECTOR_SIZE as u32;
        }

        let continuation_lba = self.options.rock_ridge.map(|_| {
            next += 1;
            next - 1
        });

        let mut extents: HashMap<String, u32> = HashMap::new();
        let mut catalog_lba = None;
        for (path, node) in &self.nodes {
            if let Node::BootCatalog { .. } = node {
                extents.insert(path.clone(), next);
                catalog_lba = Some(next);
                next += 1;
            }
        }

        let metadata_sectors = next;
        let mut file_order = Vec::new();
        for (path, node) in &self.nodes {
            if let Node::File(file) = node {
                if file.len == 0 {
                    extents.insert(path.clone(), 0);
                } else {
                    extents.insert(path.clone(), next);
                    next += sectors_for(file.len);
                }
                file_order.push(path.clone());
            }
        }

        Ok(Layout {
            dirs,
            index_of,
            boot_record_lba,
            path_table_len,
            l_table_lba,
            m_table_lba,
            continuation_lba,
            catalog_lba,
            extents,
            file_order,
            metadata_sectors,
            total_sectors: next,
        })
    }

    /// Children of a directory sorted by identifier.
    fn children_of(&self, dir: &str) -> Vec<String> {
        let mut children: Vec<String> = self
            .nodes
            .keys()
            .filter(|path| names::parent_of(path) == dir)
            .cloned()
            .collect();
        children.sort_by(|a, b| names::leaf_of(a).cmp(names::leaf_of(b)));
        children
    }

    /// Everything before the first file extent: system area, descriptors,
    /// path tables, directories, continuation area and boot catalog.
    fn encode_metadata(&self, layout: &Layout) -> Result<Vec<u8>> {
        let mut image = vec![0u8; layout.metadata_sectors as usize * SECTOR_SIZE];
        let recorded = records::record_datetime(self.options.recorded_at);
        let sector = |lba: u32| lba as usize * SECTOR_SIZE;

        let root = &layout.dirs[0];
        let root_record = encode_record(&RecordSpec {
            extent: root.lba,
            data_len: root.size,
            flags: FLAG_DIRECTORY,
            recorded,
            identifier: &[0],
            system_use: &[],
        });
        let pvd = self.primary_descriptor(layout, &root_record);
        image[sector(SYSTEM_AREA_SECTORS)..sector(SYSTEM_AREA_SECTORS + 1)].copy_from_slice(&pvd);

        if let (Some(br_lba), Some(catalog_lba)) = (layout.boot_record_lba, layout.catalog_lba) {
            let br = eltorito::boot_record_descriptor(catalog_lba);
            image[sector(br_lba)..sector(br_lba + 1)].copy_from_slice(&br);
        }
        let terminator_lba = layout.boot_record_lba.map_or(SYSTEM_AREA_SECTORS + 1, |l| l + 1);
        let term = &mut image[sector(terminator_lba)..sector(terminator_lba + 1)];
        term[0] = VD_TERMINATOR;
        term[1..6].copy_from_slice(STANDARD_ID);
        term[6] = 1;

        let (l_table, m_table) = path_tables(&layout.dirs);
        let l_start = sector(layout.l_table_lba);
        image[l_start..l_start + l_table.len()].copy_from_slice(&l_table);
        let m_start = sector(layout.m_table_lba);
        image[m_start..m_start + m_table.len()].copy_from_slice(&m_table);

        let mut serial = 1u32;
        for dir in &layout.dirs {
            let root = dir.path == "/";
            let parent = &layout.dirs[dir.parent];
            let dir_node = if root { None } else { self.nodes.get(&dir.path) };
            let subdirs = dir
                .children
                .iter()
                .filter(|c| self.nodes.get(*c).is_some_and(Node::is_dir))
                .count() as u32;
            let links = 2 + subdirs;

            let mut encoded: Vec<Vec<u8>> = Vec::with_capacity(dir.children.len() + 2);
            let self_su = match self.options.rock_ridge {
                Some(rr) => {
                    let attrs = EntryAttrs {
                        alias: None,
                        ..self.rr_attrs(dir_node, links, serial)
                    };
                    match (root, layout.continuation_lba) {
                        (true, Some(block)) => rr.root_system_use(
                            &attrs,
                            Continuation {
                                block,
                                offset: 0,
                                len: rr.extension_reference().len() as u32,
                            },
                        ),
                        _ => rr.system_use(&attrs),
                    }
                }
                None => Vec::new(),
            };
            encoded.push(encode_record(&RecordSpec {
                extent: dir.lba,
                data_len: dir.size,
                flags: FLAG_DIRECTORY,
                recorded,
                identifier: &[0],
                system_use: &self_su,
            }));

            let parent_su = self.options.rock_ridge.map_or_else(Vec::new, |rr| {
                let parent_links = 2 + layout.dirs[dir.parent]
                    .children
                    .iter()
                    .filter(|c| self.nodes.get(*c).is_some_and(Node::is_dir))
                    .count() as u32;
                rr.system_use(&EntryAttrs {
                    alias: None,
                    ..self.rr_attrs(None, parent_links, serial)
                })
            });
            encoded.push(encode_record(&RecordSpec {
                extent: parent.lba,
                data_len: parent.size,
                flags: FLAG_DIRECTORY,
                recorded,
                identifier: &[1],
                system_use: &parent_su,
            }));

            for child in &dir.children {
                serial += 1;
                let node = self.nodes.get(child);
                let (extent, data_len, flags, links) = match node {
                    Some(Node::Directory { .. }) => {
                        let plan = &layout.dirs[layout.index_of[child]];
                        let child_subdirs = plan
                            .children
                            .iter()
                            .filter(|c| self.nodes.get(*c).is_some_and(Node::is_dir))
                            .count() as u32;
                        (plan.lba, plan.size, FLAG_DIRECTORY, 2 + child_subdirs)
                    }
                    Some(Node::File(file)) => (layout.extents[child], file.len as u32, 0, 1),
                    Some(Node::BootCatalog { .. }) => {
                        (layout.extents[child], SECTOR_SIZE as u32, 0, 1)
                    }
                    None => {
                        return Err(Error::StructuralInconsistency(format!(
                            "'{child}' vanished during layout"
                        )))
                    }
                };
                let su = self
                    .options
                    .rock_ridge
                    .map_or_else(Vec::new, |rr| rr.system_use(&self.rr_attrs(node, links, serial)));
                encoded.push(encode_record(&RecordSpec {
                    extent,
                    data_len,
                    flags,
                    recorded,
                    identifier: names::leaf_of(child).as_bytes(),
                    system_use: &su,
                }));
            }
            serial += 1;

            let base = sector(dir.lba);
            let mut offset = 0usize;
            for rec in encoded {
                if offset % SECTOR_SIZE + rec.len() > SECTOR_SIZE {
                    offset = offset.next_multiple_of(SECTOR_SIZE);
                }
                image[base + offset..base + offset + rec.len()].copy_from_slice(&rec);
                offset += rec.len();
            }
        }

        if let (Some(rr), Some(lba)) = (self.options.rock_ridge, layout.continuation_lba) {
            let er = rr.extension_reference();
            image[sector(lba)..sector(lba) + er.len()].copy_from_slice(&er);
        }

        if let (Some(boot), Some(lba)) = (&self.boot, layout.catalog_lba) {
            let Some(Node::File(image_file)) = self.nodes.get(&boot.target) else {
                return Err(Error::UnknownBootTarget(boot.target.clone()));
            };
            let catalog =
                eltorito::encode_catalog(boot, layout.extents[&boot.target], image_file.len);
            image[sector(lba)..sector(lba + 1)].copy_from_slice(&catalog);
        }

        Ok(image)
    }

    fn primary_descriptor(&self, layout: &Layout, root_record: &[u8]) -> Vec<u8> {
        let opts = &self.options;
        let mut pvd = vec![0u8; SECTOR_SIZE];
        pvd[0] = VD_PRIMARY;
        pvd[1..6].copy_from_slice(STANDARD_ID);
        pvd[6] = 1;
        put_padded(&mut pvd[8..40], &opts.system_id, b' ');
        put_padded(&mut pvd[40..72], &opts.volume_id, b' ');
        put_both_u32(&mut pvd[80..88], layout.total_sectors);
        put_both_u16(&mut pvd[120..124], 1);
        put_both_u16(&mut pvd[124..128], 1);
        put_both_u16(&mut pvd[128..132], SECTOR_SIZE as u16);
        put_both_u32(&mut pvd[132..140], layout.path_table_len);
        pvd[140..144].copy_from_slice(&layout.l_table_lba.to_le_bytes());
        pvd[148..152].copy_from_slice(&layout.m_table_lba.to_be_bytes());
        pvd[156..190].copy_from_slice(root_record);
        put_padded(&mut pvd[190..318], "", b' ');
        put_padded(&mut pvd[318..446], "", b' ');
        put_padded(&mut pvd[446..574], "", b' ');
        put_padded(&mut pvd[574..702], &opts.application_id, b' ');
        put_padded(&mut pvd[702..813], "", b' ');
        let created = records::volume_datetime(opts.recorded_at);
        pvd[813..830].copy_from_slice(&created);
        pvd[830..847].copy_from_slice(&created);
        pvd[847..864].copy_from_slice(&records::unset_volume_datetime());
        pvd[864..881].copy_from_slice(&records::unset_volume_datetime());
        pvd[881] = 1;
        pvd
    }
}

struct DirPlan {
    path: String,
    identifier: Vec<u8>,
    /// Index of the parent in `Layout::dirs`; the root is its own parent.
    parent: usize,
    children: Vec<String>,
    /// Extent size in bytes, a whole number of sectors.
    size: u32,
    lba: u32,
}

struct Layout {
    dirs: Vec<DirPlan>,
    index_of: HashMap<String, usize>,
    boot_record_lba: Option<u32>,
    path_table_len: u32,
    l_table_lba: u32,
    m_table_lba: u32,
    continuation_lba: Option<u32>,
    catalog_lba: Option<u32>,
    extents: HashMap<String, u32>,
    file_order: Vec<String>,
    metadata_sectors: u32,
    total_sectors: u32,
}

/// Records never straddle a sector boundary.
fn packed_size(lens: &[usize]) -> u32 {
    let mut offset = 0usize;
    for &len in lens {
        if offset % SECTOR_SIZE + len > SECTOR_SIZE {
            offset = offset.next_multiple_of(SECTOR_SIZE);
        }
        offset += len;
    }
    offset.next_multiple_of(SECTOR_SIZE) as u32
}

fn path_table_record_len(identifier_len: usize) -> usize {
    8 + identifier_len + identifier_len % 2
}

/// Type L (little-endian) and type M (big-endian) path tables.
fn path_tables(dirs: &[DirPlan]) -> (Vec<u8>, Vec<u8>) {
    let mut l_table = Vec::new();
    let mut m_table = Vec::new();
    for dir in dirs {
        let parent_number = (dir.parent + 1) as u16;
        for (table, little) in [(&mut l_table, true), (&mut m_table, false)] {
            table.push(dir.identifier.len() as u8);
            table.push(0);
            if little {
                table.extend_from_slice(&dir.lba.to_le_bytes());
                table.extend_from_slice(&parent_number.to_le_bytes());
            } else {
                table.extend_from_slice(&dir.lba.to_be_bytes());
                table.extend_from_slice(&parent_number.to_be_bytes());
            }
            table.extend_from_slice(&dir.identifier);
            if dir.identifier.len() % 2 == 1 {
                table.push(0);
            }
        }
    }
    (l_table, m_table)
}

/// Length of a readable regular file.
fn probe_source(source: &Path) -> Result<u64> {
    let unreadable = |source_err: io::Error| Error::SourceUnreadable {
        path: source.to_path_buf(),
        source: source_err,
    };
    let meta = fs::metadata(source).map_err(unreadable)?;
    if !meta.is_file() {
        return Err(unreadable(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    File::open(source).map_err(unreadable)?;
    Ok(meta.len())
}

/// Stream one file and pad it to a whole sector.
fn copy_extent<W: Write>(file: &FileNode, writer: &mut W, output: &Path) -> Result<()> {
    if file.len == 0 {
        return Ok(());
    }
    let unreadable = |source_err: io::Error| Error::SourceUnreadable {
        path: file.source.clone(),
        source: source_err,
    };
    let reader = File::open(&file.source).map_err(unreadable)?;
    let copied = io::copy(&mut reader.take(file.len), writer).map_err(unreadable)?;
    if copied != file.len {
        return Err(unreadable(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, read {copied}", file.len),
        )));
    }
    let tail = (file.len % SECTOR_SIZE as u64) as usize;
    if tail != 0 {
        writer
            .write_all(&vec![0u8; SECTOR_SIZE - tail])
            .io_context(|| format!("writing '{}'", output.display()))?;
    }
    Ok(())
}
