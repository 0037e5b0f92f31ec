//! Game profiles.
//!
//! A profile is a named set of module choices, disabled module versions,
//! sparse per-module parameter overrides and window preferences that
//! together configure an engine run. The anonymous variant ("custom
//! profile") is embedded in a single game's config. Profiles are validated
//! against the module registry and activated by sequencing commands on an
//! engine instance.

use log::{debug, warn};

use crate::engine_instance::EngineInstance;
use crate::errors::Result;
use crate::modules::{EngineModuleList, ModuleKind, ModuleStatus};

/// Single-instance kinds a profile selects modules for, in activation
/// order. The script module is not part of a profile; games pin it
/// themselves.
pub const PROFILE_KINDS: [ModuleKind; 10] = [
    ModuleKind::CrashRecovery,
    ModuleKind::Graphic,
    ModuleKind::Input,
    ModuleKind::Physics,
    ModuleKind::Animator,
    ModuleKind::Ai,
    ModuleKind::Audio,
    ModuleKind::Synthesizer,
    ModuleKind::Network,
    ModuleKind::Vr,
];

/// One parameter override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileParameter {
    pub name: String,
    pub value: String,
}

/// Sparse parameter overrides for one module family.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileModule {
    pub name: String,
    pub parameters: Vec<ProfileParameter>,
}

impl ProfileModule {
    pub fn new(name: &str) -> Self {
        ProfileModule {
            name: name.to_string(),
            parameters: Vec::new(),
        }
    }

    pub fn parameter_named(&self, name: &str) -> Option<&ProfileParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Set or replace a parameter override.
    pub fn set_parameter(&mut self, name: &str, value: &str) {
        match self.parameters.iter_mut().find(|p| p.name == name) {
            Some(parameter) => parameter.value = value.to_string(),
            None => self.parameters.push(ProfileParameter {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
    }
}

/// A module version that must not be activated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisabledModuleVersion {
    pub name: String,
    pub version: String,
}

/// Chosen module of one single-instance kind. An empty version means "use
/// the highest known version".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleSelection {
    pub name: String,
    pub version: String,
}

/// A named engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    /// Empty for the anonymous custom profile of a game config.
    pub name: String,
    selections: [ModuleSelection; PROFILE_KINDS.len()],
    pub disabled_module_versions: Vec<DisabledModuleVersion>,
    pub modules: Vec<ProfileModule>,
    pub run_arguments: String,
    pub replace_run_arguments: bool,
    pub full_screen: bool,
    pub width: u32,
    pub height: u32,
    pub valid: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Profile {
            name: String::new(),
            selections: Default::default(),
            disabled_module_versions: Vec::new(),
            modules: Vec::new(),
            run_arguments: String::new(),
            replace_run_arguments: false,
            full_screen: true,
            width: 1680,
            height: 1050,
            valid: false,
        }
    }
}

fn kind_index(kind: ModuleKind) -> Option<usize> {
    PROFILE_KINDS.iter().position(|k| *k == kind)
}

impl Profile {
    pub fn named(name: &str) -> Self {
        Profile {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Chosen module for a single-instance kind.
    ///
    /// Panics when `kind` is not one of [`PROFILE_KINDS`].
    pub fn module(&self, kind: ModuleKind) -> &ModuleSelection {
        &self.selections[kind_index(kind).expect("not a profile kind")]
    }

    pub fn set_module_name(&mut self, kind: ModuleKind, name: &str) {
        self.selections[kind_index(kind).expect("not a profile kind")].name = name.to_string();
    }

    pub fn set_module_version(&mut self, kind: ModuleKind, version: &str) {
        self.selections[kind_index(kind).expect("not a profile kind")].version =
            version.to_string();
    }

    pub fn set_width(&mut self, width: u32) {
        self.width = width.max(100);
    }

    pub fn set_height(&mut self, height: u32) {
        self.height = height.max(75);
    }

    pub fn module_overrides_named(&self, name: &str) -> Option<&ProfileModule> {
        self.modules.iter().find(|m| m.name == name)
    }

    fn module_overrides_named_mut(&mut self, name: &str) -> Option<&mut ProfileModule> {
        self.modules.iter_mut().find(|m| m.name == name)
    }

    /// Recompute validity: every chosen module must exist in the registry
    /// with the matching kind and `ready` status. A pinned version must
    /// match exactly; an empty version accepts any family member.
    pub fn verify(&mut self, modules: &EngineModuleList) -> bool {
        let mut valid = true;
        for kind in PROFILE_KINDS {
            if !self.verify_module(kind, modules) {
                debug!(
                    "Profile '{}': no usable {} module '{}'",
                    self.name,
                    kind,
                    self.module(kind).name
                );
                valid = false;
            }
        }
        self.valid = valid;
        valid
    }

    fn verify_module(&self, kind: ModuleKind, modules: &EngineModuleList) -> bool {
        let selection = self.module(kind);
        let module = if selection.version.is_empty() {
            modules.get_named(&selection.name)
        } else {
            modules.get_named_version(&selection.name, &selection.version)
        };
        match module {
            Some(module) => module.kind == Some(kind) && module.status == ModuleStatus::Ready,
            None => false,
        }
    }

    /// Push this profile onto an engine instance: first disable the listed
    /// module versions, then activate the chosen module of every kind, then
    /// apply parameter overrides. Overrides for parameters the engine module
    /// does not know are silently skipped.
    pub fn activate(
        &self,
        instance: &mut dyn EngineInstance,
        modules: &EngineModuleList,
    ) -> Result<()> {
        for disabled in &self.disabled_module_versions {
            match modules.get_named_version(&disabled.name, &disabled.version) {
                Some(module) => {
                    instance.enable_module(&module.name, &module.version, false)?;
                }
                None => debug!(
                    "Profile '{}': disabled module '{}' version '{}' is not registered",
                    self.name, disabled.name, disabled.version
                ),
            }
        }

        for kind in PROFILE_KINDS {
            let selection = self.module(kind);
            instance.activate_module(&selection.name, &selection.version)?;
        }

        for overrides in &self.modules {
            let engine_module = match modules.get_named(&overrides.name) {
                Some(module) => module,
                None => {
                    warn!(
                        "Profile '{}': module '{}' has overrides but is not registered",
                        self.name, overrides.name
                    );
                    continue;
                }
            };
            for parameter in &overrides.parameters {
                if engine_module.parameter_named(&parameter.name).is_none() {
                    continue;
                }
                instance.set_module_parameter(
                    &engine_module.name,
                    &engine_module.version,
                    &parameter.name,
                    &parameter.value,
                )?;
            }
        }

        Ok(())
    }

    /// Merge reported parameter drift into this profile. New values win per
    /// parameter; modules without an entry are added. Applying the same
    /// drift twice is a no-op the second time.
    pub fn apply_drift(&mut self, drift: &[ProfileModule]) {
        for changes in drift {
            match self.module_overrides_named_mut(&changes.name) {
                Some(module) => {
                    for parameter in &changes.parameters {
                        module.set_parameter(&parameter.name, &parameter.value);
                    }
                }
                None => self.modules.push(changes.clone()),
            }
        }
    }
}

/// Named profiles of the launcher config. Names are unique.
#[derive(Debug, Clone, Default)]
pub struct ProfileList {
    profiles: Vec<Profile>,
}

impl ProfileList {
    pub fn new() -> Self {
        ProfileList {
            profiles: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Profile> {
        self.profiles.iter_mut()
    }

    pub fn get_named(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn has_named(&self, name: &str) -> bool {
        self.get_named(name).is_some()
    }

    /// Add a profile, replacing any previous one with the same name.
    pub fn add(&mut self, profile: Profile) {
        match self.profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
    }

    pub fn remove_named(&mut self, name: &str) {
        self.profiles.retain(|p| p.name != name);
    }

    pub fn clear(&mut self) {
        self.profiles.clear();
    }

    /// Re-verify every profile against the registry.
    pub fn validate_all(&mut self, modules: &EngineModuleList) {
        for profile in &mut self.profiles {
            profile.verify(modules);
        }
    }
}
