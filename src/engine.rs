//! Engine-side state of the launcher: the module registry, the engine's
//! native paths and the display resolution list.
//!
//! The launcher never links the engine. Everything here is collected through
//! an engine instance: paths via `get-property`, module status and
//! parameters via the module commands, resolutions via the display
//! commands. Module manifests are read from the launcher VFS once the
//! engine paths are mounted under `/engine/...`.

use log::{error, info};

use crate::engine_instance::EngineInstance;
use crate::errors::Result;
use crate::manifest_xml;
use crate::modules::{EngineModuleList, ModuleKind, ModuleStatus};
use crate::protocol::{EngineProperty, Point};
use crate::vfs::{FileType, VirtualFileSystem};

/// Engine registry and engine-reported state.
#[derive(Debug, Default)]
pub struct Engine {
    pub modules: EngineModuleList,
    pub path_config: String,
    pub path_share: String,
    pub path_lib: String,
    pub path_cache: String,
    /// Launcher-side engine log file, relative to the logs root.
    pub log_file: String,
    pub current_resolution: Point,
    resolutions: Vec<Point>,
}

impl Engine {
    pub fn new(log_file_title: &str) -> Self {
        Engine {
            log_file: format!("{}.log", log_file_title),
            ..Default::default()
        }
    }

    /// Resolutions, sorted by decreasing pixel count.
    pub fn resolutions(&self) -> &[Point] {
        &self.resolutions
    }

    /// Pull the engine's native paths and mount them read-only under
    /// `/engine/...`.
    pub fn put_engine_into_vfs(
        &mut self,
        instance: &mut dyn EngineInstance,
        vfs: &mut VirtualFileSystem,
    ) -> Result<()> {
        self.path_config = instance.get_property(EngineProperty::PathEngineConfig)?;
        self.path_share = instance.get_property(EngineProperty::PathEngineShare)?;
        self.path_lib = instance.get_property(EngineProperty::PathEngineLib)?;
        self.path_cache = instance.get_property(EngineProperty::PathEngineCache)?;

        for (root, native) in [
            ("/engine/config", &self.path_config),
            ("/engine/share", &self.path_share),
            ("/engine/lib", &self.path_lib),
            ("/engine/cache", &self.path_cache),
        ] {
            if !native.is_empty() {
                vfs.add_disk_dir(root, native.clone(), true);
            }
        }
        Ok(())
    }

    /// Rescan the engine module tree and rebuild the registry.
    ///
    /// Layout: `/engine/lib/modules/<kind-dir>/<family>/<version>/module.xml`.
    pub fn reload_modules(&mut self, vfs: &VirtualFileSystem) {
        info!("loading module list");
        self.modules.clear();

        for kind in ModuleKind::ALL {
            let kind_dir = format!("/engine/lib/modules/{}", kind.directory_name());
            self.add_modules_from(vfs, &kind_dir, kind);
        }
    }

    fn add_modules_from(&mut self, vfs: &VirtualFileSystem, directory: &str, kind: ModuleKind) {
        for family_dir in vfs.list_directories(directory) {
            let family = family_dir.rsplit('/').next().unwrap_or("").to_string();

            for version_dir in vfs.list_directories(&family_dir) {
                let manifest = format!("{}/module.xml", version_dir);
                if vfs.file_type(&manifest) != Some(FileType::Regular) {
                    continue;
                }

                info!("Reading module definition from '{}'", manifest);
                let text = match vfs.read(&manifest) {
                    Ok(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            error!("Module definition '{}' is not UTF-8", manifest);
                            continue;
                        }
                    },
                    Err(err) => {
                        error!("Failed to read '{}': {}", manifest, err);
                        continue;
                    }
                };

                match manifest_xml::read_module(&text) {
                    Ok(mut module) => {
                        if module.kind != Some(kind) {
                            error!(
                                "Module definition '{}' declares kind {:?}, expected {:?}",
                                manifest, module.kind, kind
                            );
                            continue;
                        }
                        module.directory_name = family.clone();
                        if let Err(err) = self.modules.add(module) {
                            error!("{}", err);
                        }
                    }
                    Err(err) => {
                        error!("Failed to parse module definition '{}': {}", manifest, err);
                    }
                }
            }
        }
    }

    /// Ask the engine instance for the status and parameters of every
    /// registered module. Ready modules get their library fingerprinted.
    pub fn check_modules(&mut self, instance: &mut dyn EngineInstance, vfs: &VirtualFileSystem) {
        for module in self.modules.iter_mut() {
            let name = module.name.clone();
            let version = module.version.clone();

            match instance.module_status(&name, &version) {
                Ok(error_code) => {
                    module.error_code = error_code;
                    if error_code == 0 {
                        module.status = ModuleStatus::Ready;
                        module.calc_size_and_hash(vfs);
                    } else {
                        module.status = ModuleStatus::Broken;
                    }
                }
                Err(err) => {
                    error!("Checking module '{}' failed: {}", name, err);
                    module.status = ModuleStatus::Broken;
                    continue;
                }
            }

            match instance.module_parameters(&name, &version) {
                Ok(parameters) => module.parameters = parameters,
                Err(err) => {
                    error!("Fetching parameters of module '{}' failed: {}", name, err);
                    module.status = ModuleStatus::Broken;
                }
            }
        }
    }

    /// Refresh the display resolution list from the engine and keep it
    /// sorted by decreasing pixel count.
    pub fn update_resolutions(&mut self, instance: &mut dyn EngineInstance) {
        self.resolutions.clear();

        let display = 0;
        match instance.display_current_resolution(display) {
            Ok(resolution) => self.current_resolution = resolution,
            Err(err) => {
                error!("Fetching current resolution failed: {}", err);
                return;
            }
        }

        match instance.display_resolutions(display) {
            Ok(mut resolutions) => {
                resolutions.sort_by_key(|r| std::cmp::Reverse(r.pixel_count()));
                self.resolutions = resolutions;
            }
            Err(err) => error!("Fetching resolution list failed: {}", err),
        }
    }

    /// Index of the largest resolution not exceeding `width` x `height` in
    /// pixel count, `None` when the list is empty.
    pub fn closest_resolution_to(&self, width: u32, height: u32) -> Option<usize> {
        if self.resolutions.is_empty() {
            return None;
        }
        let wanted = width as i64 * height as i64;
        for (index, resolution) in self.resolutions.iter().enumerate() {
            if resolution.pixel_count() <= wanted {
                return Some(index);
            }
        }
        Some(self.resolutions.len() - 1)
    }
}
