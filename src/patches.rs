//! Game patches.
//!
//! A patch is an addendum archive modifying a specific game, identified by
//! the target game's UUID. Patches are discovered stand-alone (`*.depatch`)
//! or inside DELGA archives, and carry a set of required-patch UUIDs with OR
//! semantics: any one of them present satisfies the prerequisite.

use log::{debug, error, info};
use uuid::Uuid;

use crate::engine_instance::EngineInstance;
use crate::errors::Result;
use crate::manifest_xml;
use crate::vfs::VirtualFileSystem;

/// One discovered patch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub identifier: Option<Uuid>,
    pub name: String,
    pub description: String,
    pub creator: String,
    pub homepage: String,
    /// Native directory of a stand-alone patch.
    pub patch_directory: String,
    /// Data directory relative to the patch directory (or inside the DELGA).
    pub data_directory: String,
    /// UUID of the game this patch applies to.
    pub game_id: Option<Uuid>,
    /// Prerequisites; any single one present satisfies the edge.
    pub required_patches: Vec<Uuid>,
    /// Hosting DELGA file, empty for stand-alone patches.
    pub delga_file: String,
    /// Paths inside the patched tree to pretend absent.
    pub hidden_paths: Vec<String>,
}

impl Patch {
    pub fn identifier_hex(&self) -> String {
        self.identifier
            .map(|id| id.simple().to_string())
            .unwrap_or_default()
    }
}

/// Ordered collection of patches, unique by identifier.
#[derive(Debug, Clone, Default)]
pub struct PatchList {
    patches: Vec<Patch>,
}

impl PatchList {
    pub fn new() -> Self {
        PatchList {
            patches: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Patch> {
        self.patches.iter()
    }

    pub fn get_with_id(&self, id: Uuid) -> Option<&Patch> {
        self.patches.iter().find(|p| p.identifier == Some(id))
    }

    pub fn has_with_id(&self, id: Uuid) -> bool {
        self.get_with_id(id).is_some()
    }

    /// Append a patch. Duplicate identifiers are dropped silently.
    pub fn add(&mut self, patch: Patch) {
        if let Some(id) = patch.identifier {
            if self.has_with_id(id) {
                debug!("Ignoring duplicate patch '{}'", patch.identifier_hex());
                return;
            }
        }
        self.patches.push(patch);
    }

    pub fn clear(&mut self) {
        self.patches.clear();
    }
}

/// Discovers and owns all known patches.
#[derive(Debug, Default)]
pub struct PatchManager {
    patches: PatchList,
}

impl PatchManager {
    pub fn new() -> Self {
        PatchManager {
            patches: PatchList::new(),
        }
    }

    pub fn patches(&self) -> &PatchList {
        &self.patches
    }

    pub fn clear(&mut self) {
        self.patches.clear();
    }

    /// Discover patches: scan the directories hosting game DELGA files and
    /// the legacy games directory for `*.depatch` and `*.delga`.
    ///
    /// `delga_directories` are the native directories of all games loaded
    /// from DELGA files; `games_directory` is the legacy install root.
    pub fn load_patches(
        &mut self,
        instance: &mut dyn EngineInstance,
        delga_directories: &[String],
        games_directory: &str,
    ) {
        info!("Loading patch list");
        self.patches.clear();

        for directory in delga_directories {
            self.scan_directory(instance, directory);
        }
        self.scan_directory(instance, games_directory);
    }

    fn scan_directory(&mut self, instance: &mut dyn EngineInstance, directory: &str) {
        let mut vfs = VirtualFileSystem::new();
        vfs.add_disk_dir("/", directory, true);

        for file in vfs.search_files("/", &["*.depatch", "*.delga"]) {
            let native = format!("{}{}", directory.trim_end_matches('/'), file);
            let mut found = PatchList::new();
            if let Err(err) = load_patch_from_disk(instance, &native, &mut found) {
                error!("Failed to read patch file '{}': {}", native, err);
                continue;
            }
            for patch in found.iter() {
                self.patches.add(patch.clone());
            }
        }
    }

    /// Register additionally discovered patches (e.g. found next to a
    /// stand-alone game). Duplicates are dropped silently.
    pub fn add_all(&mut self, patches: &PatchList) {
        for patch in patches.iter() {
            self.patches.add(patch.clone());
        }
    }
}

/// Load every patch a file defines: a `*.depatch` manifest yields one patch,
/// a `*.delga` may embed several.
pub fn load_patch_from_disk(
    instance: &mut dyn EngineInstance,
    path: &str,
    list: &mut PatchList,
) -> Result<()> {
    info!("Reading patch file '{}'", path);

    if path.ends_with(".delga") {
        for definition in instance.read_delga_patch_defs(path)? {
            match manifest_xml::read_patch(&definition) {
                Ok(mut patch) => {
                    patch.delga_file = path.to_string();
                    list.add(patch);
                }
                Err(err) => error!("Bad patch definition in '{}': {}", path, err),
            }
        }
        return Ok(());
    }

    let text = std::fs::read_to_string(path)?;
    let mut patch = manifest_xml::read_patch(&text)?;

    if !patch.patch_directory.starts_with('/') {
        let base = std::path::Path::new(path)
            .parent()
            .unwrap_or_else(|| std::path::Path::new("/"));
        patch.patch_directory = base
            .join(&patch.patch_directory)
            .to_string_lossy()
            .into_owned();
    }

    list.add(patch);
    Ok(())
}
