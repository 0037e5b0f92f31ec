//! Engine module records and the module registry.
//!
//! A module is a pluggable engine component identified by its family name and
//! version. The registry is filled by scanning the engine's module tree
//! (`/engine/lib/modules/<kind>/<family>/<version>/module.xml`), then
//! verified against a live engine instance which reports status and
//! parameters. Library files are fingerprinted (size + SHA-1) so they can be
//! compared against the manifest's expected values.

use std::cmp::Ordering;
use std::fmt;

use log::{error, info};
use sha1::{Digest, Sha1};

use crate::errors::{LauncherError, Result};
use crate::vfs::VirtualFileSystem;

/// Closed set of module kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Graphic,
    Input,
    Physics,
    Animator,
    Ai,
    CrashRecovery,
    Audio,
    Synthesizer,
    Network,
    Vr,
    Script,
    Archive,
    Animation,
    Font,
    Image,
    Model,
    Rig,
    Skin,
    LanguagePack,
    Sound,
    Video,
    OcclusionMesh,
    Service,
}

impl ModuleKind {
    /// All kinds, in module tree scan order.
    pub const ALL: [ModuleKind; 23] = [
        ModuleKind::CrashRecovery,
        ModuleKind::Graphic,
        ModuleKind::Input,
        ModuleKind::Physics,
        ModuleKind::Audio,
        ModuleKind::Network,
        ModuleKind::Script,
        ModuleKind::Animator,
        ModuleKind::Ai,
        ModuleKind::Synthesizer,
        ModuleKind::Vr,
        ModuleKind::Archive,
        ModuleKind::Animation,
        ModuleKind::Font,
        ModuleKind::Image,
        ModuleKind::Model,
        ModuleKind::Rig,
        ModuleKind::Skin,
        ModuleKind::LanguagePack,
        ModuleKind::Sound,
        ModuleKind::Video,
        ModuleKind::OcclusionMesh,
        ModuleKind::Service,
    ];

    /// Kinds with exactly one active module per run.
    pub fn is_single_instance(self) -> bool {
        matches!(
            self,
            ModuleKind::Graphic
                | ModuleKind::Input
                | ModuleKind::Physics
                | ModuleKind::Animator
                | ModuleKind::Ai
                | ModuleKind::CrashRecovery
                | ModuleKind::Audio
                | ModuleKind::Synthesizer
                | ModuleKind::Network
                | ModuleKind::Vr
                | ModuleKind::Script
        )
    }

    /// Directory name below the engine module tree.
    pub fn directory_name(self) -> &'static str {
        match self {
            ModuleKind::Graphic => "graphic",
            ModuleKind::Input => "input",
            ModuleKind::Physics => "physics",
            ModuleKind::Animator => "animator",
            ModuleKind::Ai => "ai",
            ModuleKind::CrashRecovery => "crashrecovery",
            ModuleKind::Audio => "audio",
            ModuleKind::Synthesizer => "synthesizer",
            ModuleKind::Network => "network",
            ModuleKind::Vr => "vr",
            ModuleKind::Script => "scripting",
            ModuleKind::Archive => "archive",
            ModuleKind::Animation => "animation",
            ModuleKind::Font => "font",
            ModuleKind::Image => "image",
            ModuleKind::Model => "model",
            ModuleKind::Rig => "rig",
            ModuleKind::Skin => "skin",
            ModuleKind::LanguagePack => "langpack",
            ModuleKind::Sound => "sound",
            ModuleKind::Video => "video",
            ModuleKind::OcclusionMesh => "occlusionmesh",
            ModuleKind::Service => "service",
        }
    }

    /// Human readable kind name for listings.
    pub fn display_name(self) -> &'static str {
        match self {
            ModuleKind::Graphic => "Graphic",
            ModuleKind::Input => "Input",
            ModuleKind::Physics => "Physics",
            ModuleKind::Animator => "Animator",
            ModuleKind::Ai => "AI",
            ModuleKind::CrashRecovery => "Crash Recovery",
            ModuleKind::Audio => "Audio",
            ModuleKind::Synthesizer => "Synthesizer",
            ModuleKind::Network => "Network",
            ModuleKind::Vr => "VR",
            ModuleKind::Script => "Script",
            ModuleKind::Archive => "Archive",
            ModuleKind::Animation => "Animation",
            ModuleKind::Font => "Font",
            ModuleKind::Image => "Image",
            ModuleKind::Model => "Model",
            ModuleKind::Rig => "Rig",
            ModuleKind::Skin => "Skin",
            ModuleKind::LanguagePack => "Language Pack",
            ModuleKind::Sound => "Sound",
            ModuleKind::Video => "Video",
            ModuleKind::OcclusionMesh => "Occlusion Mesh",
            ModuleKind::Service => "Service",
        }
    }

    /// Parse the `type` element of a module manifest.
    pub fn from_manifest(value: &str) -> Option<ModuleKind> {
        Some(match value {
            "Graphic" => ModuleKind::Graphic,
            "Input" => ModuleKind::Input,
            "Physics" => ModuleKind::Physics,
            "Animator" => ModuleKind::Animator,
            "AI" => ModuleKind::Ai,
            "CrashRecovery" => ModuleKind::CrashRecovery,
            "Audio" => ModuleKind::Audio,
            "Synthesizer" => ModuleKind::Synthesizer,
            "Network" => ModuleKind::Network,
            "VR" => ModuleKind::Vr,
            "Script" => ModuleKind::Script,
            "Archive" => ModuleKind::Archive,
            "Animation" => ModuleKind::Animation,
            "Font" => ModuleKind::Font,
            "Image" => ModuleKind::Image,
            "Model" => ModuleKind::Model,
            "Rig" => ModuleKind::Rig,
            "Skin" => ModuleKind::Skin,
            "LanguagePack" => ModuleKind::LanguagePack,
            "Sound" => ModuleKind::Sound,
            "Video" => ModuleKind::Video,
            "OcclusionMesh" => ModuleKind::OcclusionMesh,
            "Service" => ModuleKind::Service,
            _ => return None,
        })
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Verification state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleStatus {
    #[default]
    NotTested,
    Ready,
    Broken,
}

/// Parameter value type as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ParameterType {
    #[default]
    Boolean = 0,
    Numeric = 1,
    Ranged = 2,
    String = 3,
    Selection = 4,
}

impl ParameterType {
    pub fn from_tag(tag: u8) -> ParameterType {
        match tag {
            1 => ParameterType::Numeric,
            2 => ParameterType::Ranged,
            3 => ParameterType::String,
            4 => ParameterType::Selection,
            _ => ParameterType::Boolean,
        }
    }
}

/// UI grouping of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ParameterCategory {
    #[default]
    Basic = 0,
    Advanced = 1,
    Expert = 2,
}

impl ParameterCategory {
    pub fn from_tag(tag: u8) -> ParameterCategory {
        match tag {
            1 => ParameterCategory::Advanced,
            2 => ParameterCategory::Expert,
            _ => ParameterCategory::Basic,
        }
    }
}

/// One choice of a selection parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionEntry {
    pub value: String,
    pub display_name: String,
    pub description: String,
}

/// Static description of a module parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterInfo {
    pub name: String,
    pub description: String,
    pub parameter_type: ParameterType,
    pub minimum: f32,
    pub maximum: f32,
    pub step: f32,
    pub category: ParameterCategory,
    pub display_name: String,
    pub default_value: String,
    pub selection_entries: Vec<SelectionEntry>,
}

/// A parameter of an engine module, with its current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleParameter {
    pub index: usize,
    pub info: ParameterInfo,
    pub value: String,
}

/// One concrete engine module release.
#[derive(Debug, Clone, Default)]
pub struct EngineModule {
    pub kind: Option<ModuleKind>,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub directory_name: String,
    pub pattern: String,
    pub priority: i32,
    pub is_fallback: bool,
    pub status: ModuleStatus,
    pub error_code: u16,

    pub lib_file_name: String,
    pub lib_size_expected: u64,
    pub lib_size_actual: u64,
    pub lib_hash_expected: String,
    pub lib_hash_actual: String,
    pub lib_entry_point: String,

    pub parameters: Vec<ModuleParameter>,
}

impl EngineModule {
    /// Parameter record by name.
    pub fn parameter_named(&self, name: &str) -> Option<&ModuleParameter> {
        self.parameters.iter().find(|p| p.info.name == name)
    }

    /// Virtual path of the module library inside the engine tree, `None`
    /// when the manifest names an absolute native path.
    pub fn library_vfs_path(&self) -> Option<String> {
        if std::path::Path::new(&self.lib_file_name).is_absolute() {
            return None;
        }
        let kind = self.kind?;
        Some(format!(
            "/engine/lib/modules/{}/{}/{}/{}",
            kind.directory_name(),
            self.directory_name,
            self.version,
            self.lib_file_name
        ))
    }

    /// Read the library file, record its size and SHA-1 (hex, computed in
    /// 4 KiB blocks). Failures are logged and leave zeroed fields behind.
    pub fn calc_size_and_hash(&mut self, vfs: &VirtualFileSystem) {
        self.lib_size_actual = 0;
        self.lib_hash_actual = "0".repeat(40);

        let content = match self.library_vfs_path() {
            Some(path) => vfs.read(&path),
            None => std::fs::read(&self.lib_file_name).map_err(LauncherError::from),
        };
        let content = match content {
            Ok(content) => content,
            Err(err) => {
                error!(
                    "Failed to read library file of module '{}': {}",
                    self.name, err
                );
                return;
            }
        };

        self.lib_size_actual = content.len() as u64;

        let mut hasher = Sha1::new();
        for block in content.chunks(4096) {
            hasher.update(block);
        }
        let digest = hasher.finalize();
        self.lib_hash_actual = digest.iter().map(|b| format!("{:02x}", b)).collect();
    }

    /// True when observed size and hash match the manifest expectations.
    pub fn library_matches_manifest(&self) -> bool {
        self.lib_size_actual == self.lib_size_expected
            && self.lib_hash_actual.eq_ignore_ascii_case(&self.lib_hash_expected)
    }
}

/// Compare two dotted version strings component-wise. Missing components
/// count as zero, so `2.0` equals `2.0.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<u64> = a.split('.').map(|c| c.parse().unwrap_or(0)).collect();
    let right: Vec<u64> = b.split('.').map(|c| c.parse().unwrap_or(0)).collect();
    let len = left.len().max(right.len());

    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Module registry. `(name, version)` is unique; insertion order is kept and
/// breaks selection ties.
#[derive(Debug, Default)]
pub struct EngineModuleList {
    modules: Vec<EngineModule>,
}

impl EngineModuleList {
    pub fn new() -> Self {
        EngineModuleList {
            modules: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EngineModule> {
        self.modules.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EngineModule> {
        self.modules.iter_mut()
    }

    pub fn clear(&mut self) {
        self.modules.clear();
    }

    /// Add a module. `(name, version)` must be unique within the registry.
    pub fn add(&mut self, module: EngineModule) -> Result<()> {
        if self
            .get_named_version(&module.name, &module.version)
            .is_some()
        {
            return Err(LauncherError::invalid_state(format!(
                "module '{}' version '{}' already registered",
                module.name, module.version
            )));
        }
        info!(
            "Registered module '{}' version '{}'",
            module.name, module.version
        );
        self.modules.push(module);
        Ok(())
    }

    /// Highest version of the family `name`.
    pub fn get_named(&self, name: &str) -> Option<&EngineModule> {
        self.modules
            .iter()
            .filter(|m| m.name == name)
            .reduce(|best, m| {
                if compare_versions(&m.version, &best.version) == Ordering::Greater {
                    m
                } else {
                    best
                }
            })
    }

    /// Exact `(name, version)` lookup.
    pub fn get_named_version(&self, name: &str, version: &str) -> Option<&EngineModule> {
        self.modules
            .iter()
            .find(|m| m.name == name && m.version == version)
    }

    pub fn get_named_version_mut(&mut self, name: &str, version: &str) -> Option<&mut EngineModule> {
        self.modules
            .iter_mut()
            .find(|m| m.name == name && m.version == version)
    }

    /// Highest version of `name` that is at least `min_version`.
    pub fn get_named_at_least(&self, name: &str, min_version: &str) -> Option<&EngineModule> {
        self.modules
            .iter()
            .filter(|m| {
                m.name == name && compare_versions(&m.version, min_version) != Ordering::Less
            })
            .reduce(|best, m| {
                if compare_versions(&m.version, &best.version) == Ordering::Greater {
                    m
                } else {
                    best
                }
            })
    }

    /// Modules of a kind, in insertion order.
    pub fn modules_of_kind(&self, kind: ModuleKind) -> impl Iterator<Item = &EngineModule> {
        self.modules.iter().filter(move |m| m.kind == Some(kind))
    }

    /// Select the preferred module of a kind among the ready ones:
    /// non-fallback beats fallback, same family prefers the higher version,
    /// different families prefer the higher priority. Ties keep the earlier
    /// registered module.
    pub fn best_module_for_kind(&self, kind: ModuleKind) -> Option<&EngineModule> {
        let mut best: Option<&EngineModule> = None;

        for module in self.modules.iter() {
            if module.kind != Some(kind) || module.status != ModuleStatus::Ready {
                continue;
            }

            match best {
                None => best = Some(module),
                Some(current) => {
                    if module.is_fallback {
                        continue;
                    }
                    if module.name == current.name {
                        if compare_versions(&module.version, &current.version)
                            == Ordering::Greater
                        {
                            best = Some(module);
                        }
                    } else if module.priority > current.priority || current.is_fallback {
                        best = Some(module);
                    }
                }
            }
        }

        best
    }
}
