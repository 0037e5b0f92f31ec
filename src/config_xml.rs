//! Launcher and per-game configuration codecs.
//!
//! `<user_config>/launcher.xml` carries the named profiles and the active
//! profile name; `<user_config>/games/<uuid-hex>/launcher.xml` carries a
//! game's anonymous custom profile and run settings. Both share the profile
//! element shape.

use uuid::Uuid;

use crate::errors::{LauncherError, Result};
use crate::games::Game;
use crate::modules::ModuleKind;
use crate::profiles::{DisabledModuleVersion, Profile, ProfileList, ProfileModule};
use crate::xml_util::{
    attribute, build_document, cdata, cdata_bool, cdata_int, element_children, emit_end,
    emit_empty_element, emit_start, emit_text_element, parse_document, warn_unknown_tag,
};

/// System tags of the profile element, in on-disk order.
const SYSTEM_TAGS: [(ModuleKind, &str, &str); 10] = [
    (ModuleKind::Graphic, "graphic", "graphicVersion"),
    (ModuleKind::Input, "input", "inputVersion"),
    (ModuleKind::Physics, "physics", "physicsVersion"),
    (ModuleKind::Animator, "animator", "animatorVersion"),
    (ModuleKind::Ai, "ai", "aiVersion"),
    (ModuleKind::CrashRecovery, "crashRecovery", "crashRecoveryVersion"),
    (ModuleKind::Audio, "audio", "audioVersion"),
    (ModuleKind::Synthesizer, "synthesizer", "synthesizerVersion"),
    (ModuleKind::Network, "network", "networkVersion"),
    (ModuleKind::Vr, "vr", "vrVersion"),
];

/// Read a profile element (`<profile>` or `<customProfile>`).
pub fn read_profile_node(node: roxmltree::Node) -> Result<Profile> {
    let mut profile = Profile::default();
    if let Some(name) = node.attribute("name") {
        profile.name = name.to_string();
    }

    for tag in element_children(node) {
        match tag.tag_name().name() {
            "systems" => read_profile_systems(tag, &mut profile),
            "disableModuleVersions" => {
                for entry in element_children(tag) {
                    if entry.tag_name().name() != "disableModuleVersion" {
                        continue;
                    }
                    profile.disabled_module_versions.push(DisabledModuleVersion {
                        name: attribute(entry, "name")?.to_string(),
                        version: attribute(entry, "version")?.to_string(),
                    });
                }
            }
            "modules" => {
                for entry in element_children(tag) {
                    if entry.tag_name().name() != "module" {
                        continue;
                    }
                    profile.modules.push(read_profile_module(entry)?);
                }
            }
            "runArguments" => profile.run_arguments = cdata(tag).to_string(),
            "replaceRunArguments" => profile.replace_run_arguments = cdata_bool(tag),
            "window" => {
                for entry in element_children(tag) {
                    match entry.tag_name().name() {
                        "fullScreen" => profile.full_screen = cdata_bool(entry),
                        "width" => profile.set_width(cdata_int(entry)? as u32),
                        "height" => profile.set_height(cdata_int(entry)? as u32),
                        _ => warn_unknown_tag("profile window", entry),
                    }
                }
            }
            _ => warn_unknown_tag("profile", tag),
        }
    }

    Ok(profile)
}

fn read_profile_systems(node: roxmltree::Node, profile: &mut Profile) {
    for tag in element_children(node) {
        let name = tag.tag_name().name();
        let mut known = false;
        for (kind, module_tag, version_tag) in SYSTEM_TAGS {
            if name == module_tag {
                profile.set_module_name(kind, cdata(tag).trim());
                known = true;
                break;
            }
            if name == version_tag {
                profile.set_module_version(kind, cdata(tag).trim());
                known = true;
                break;
            }
        }
        if !known {
            warn_unknown_tag("profile systems", tag);
        }
    }
}

fn read_profile_module(node: roxmltree::Node) -> Result<ProfileModule> {
    let mut module = ProfileModule::new(attribute(node, "name")?);
    for tag in element_children(node) {
        if tag.tag_name().name() != "parameters" {
            continue;
        }
        for parameter in element_children(tag) {
            if parameter.tag_name().name() != "parameter" {
                continue;
            }
            module.set_parameter(attribute(parameter, "name")?, cdata(parameter));
        }
    }
    Ok(module)
}

/// Write a profile element under the given tag name. Anonymous profiles get
/// no `name` attribute.
pub fn write_profile_into<W: std::io::Write>(
    writer: &mut quick_xml::Writer<W>,
    profile: &Profile,
    tag_name: &str,
) -> Result<()> {
    if profile.name.is_empty() {
        emit_start(writer, tag_name, &[])?;
    } else {
        emit_start(writer, tag_name, &[("name", profile.name.as_str())])?;
    }

    emit_start(writer, "systems", &[])?;
    for (kind, module_tag, version_tag) in SYSTEM_TAGS {
        let selection = profile.module(kind);
        emit_text_element(writer, module_tag, &[], &selection.name)?;
        if !selection.version.is_empty() {
            emit_text_element(writer, version_tag, &[], &selection.version)?;
        }
    }
    emit_end(writer, "systems")?;

    if !profile.disabled_module_versions.is_empty() {
        emit_start(writer, "disableModuleVersions", &[])?;
        for disabled in &profile.disabled_module_versions {
            emit_empty_element(
                writer,
                "disableModuleVersion",
                &[
                    ("name", disabled.name.as_str()),
                    ("version", disabled.version.as_str()),
                ],
            )?;
        }
        emit_end(writer, "disableModuleVersions")?;
    }

    if !profile.modules.is_empty() {
        emit_start(writer, "modules", &[])?;
        for module in &profile.modules {
            emit_start(writer, "module", &[("name", module.name.as_str())])?;
            emit_start(writer, "parameters", &[])?;
            for parameter in &module.parameters {
                emit_text_element(
                    writer,
                    "parameter",
                    &[("name", parameter.name.as_str())],
                    &parameter.value,
                )?;
            }
            emit_end(writer, "parameters")?;
            emit_end(writer, "module")?;
        }
        emit_end(writer, "modules")?;
    }

    if !profile.run_arguments.is_empty() {
        emit_text_element(writer, "runArguments", &[], &profile.run_arguments)?;
    }
    if profile.replace_run_arguments {
        emit_text_element(writer, "replaceRunArguments", &[], "1")?;
    }

    emit_start(writer, "window", &[])?;
    emit_text_element(
        writer,
        "fullScreen",
        &[],
        if profile.full_screen { "1" } else { "0" },
    )?;
    emit_text_element(writer, "width", &[], &profile.width.to_string())?;
    emit_text_element(writer, "height", &[], &profile.height.to_string())?;
    emit_end(writer, "window")?;

    emit_end(writer, tag_name)
}

/// Parsed `launcher.xml`.
#[derive(Debug, Default)]
pub struct LauncherConfig {
    pub profiles: ProfileList,
    pub active_profile_name: Option<String>,
}

/// Read the launcher-wide configuration.
pub fn read_launcher_config(text: &str) -> Result<LauncherConfig> {
    let document = parse_document(text, "launcherConfig")?;
    let root = document.root_element();
    let mut config = LauncherConfig::default();

    for tag in element_children(root) {
        match tag.tag_name().name() {
            "profiles" => {
                for entry in element_children(tag) {
                    if entry.tag_name().name() != "profile" {
                        continue;
                    }
                    let profile = read_profile_node(entry)?;
                    if profile.name.is_empty() {
                        return Err(LauncherError::invalid_format(
                            "launcher config: profile without name",
                        ));
                    }
                    config.profiles.add(profile);
                }
            }
            "activeProfile" => {
                let name = cdata(tag).trim().to_string();
                if !name.is_empty() {
                    config.active_profile_name = Some(name);
                }
            }
            _ => warn_unknown_tag("launcher config", tag),
        }
    }

    Ok(config)
}

/// Write the launcher-wide configuration.
pub fn write_launcher_config(config: &LauncherConfig) -> Result<String> {
    build_document(|writer| {
        emit_start(writer, "launcherConfig", &[])?;

        emit_start(writer, "profiles", &[])?;
        for profile in config.profiles.iter() {
            write_profile_into(writer, profile, "profile")?;
        }
        emit_end(writer, "profiles")?;

        if let Some(name) = &config.active_profile_name {
            emit_text_element(writer, "activeProfile", &[], name)?;
        }

        emit_end(writer, "launcherConfig")
    })
}

/// Read a per-game configuration into the game record.
pub fn read_game_config(text: &str, game: &mut Game) -> Result<()> {
    let document = parse_document(text, "gameConfig")?;
    let root = document.root_element();

    for tag in element_children(root) {
        match tag.tag_name().name() {
            "customProfile" => {
                let mut profile = read_profile_node(tag)?;
                profile.name.clear();
                game.custom_profile = Some(profile);
            }
            "activeProfile" => {
                let name = cdata(tag).trim().to_string();
                if !name.is_empty() {
                    game.active_profile_name = Some(name);
                }
            }
            "runArguments" => game.run_arguments = cdata(tag).to_string(),
            "useLatestPatch" => game.use_latest_patch = cdata_bool(tag),
            "useCustomPatch" => {
                let text = cdata(tag).trim().to_string();
                if !text.is_empty() {
                    game.use_custom_patch = Some(Uuid::parse_str(&text).map_err(|_| {
                        LauncherError::invalid_format(format!(
                            "game config: bad patch identifier '{}'",
                            text
                        ))
                    })?);
                }
            }
            "delgaFile" => game.delga_file = cdata(tag).trim().to_string(),
            _ => warn_unknown_tag("game config", tag),
        }
    }

    Ok(())
}

/// Write a per-game configuration.
pub fn write_game_config(game: &Game) -> Result<String> {
    build_document(|writer| {
        emit_start(writer, "gameConfig", &[])?;

        if !game.delga_file.is_empty() {
            emit_text_element(writer, "delgaFile", &[], &game.delga_file)?;
        }

        if let Some(profile) = &game.custom_profile {
            write_profile_into(writer, profile, "customProfile")?;
        }
        if let Some(name) = &game.active_profile_name {
            emit_text_element(writer, "activeProfile", &[], name)?;
        }

        if !game.run_arguments.is_empty() {
            emit_text_element(writer, "runArguments", &[], &game.run_arguments)?;
        }

        emit_text_element(
            writer,
            "useLatestPatch",
            &[],
            if game.use_latest_patch { "1" } else { "0" },
        )?;
        if let Some(patch) = game.use_custom_patch {
            emit_text_element(writer, "useCustomPatch", &[], &patch.simple().to_string())?;
        }

        emit_end(writer, "gameConfig")
    })
}
