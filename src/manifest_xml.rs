//! Readers for engine artifact manifests: `module.xml`, `*.degame` and
//! `*.depatch`.
//!
//! Unknown tags are logged and skipped; a missing mandatory tag (e.g. the
//! `identifier` of a game or patch) fails the load.

use uuid::Uuid;

use crate::errors::{LauncherError, Result};
use crate::games::{FileFormat, Game, GameIcon};
use crate::modules::{EngineModule, ModuleKind};
use crate::patches::Patch;
use crate::xml_util::{
    attribute, cdata, cdata_int, element_children, parse_document, warn_unknown_tag,
};

fn parse_uuid(text: &str, context: &str) -> Result<Uuid> {
    Uuid::parse_str(text.trim()).map_err(|_| {
        LauncherError::invalid_format(format!("{}: bad identifier '{}'", context, text))
    })
}

/// Read an engine module manifest. The directory name is derived from the
/// manifest location by the caller.
pub fn read_module(text: &str) -> Result<EngineModule> {
    let document = parse_document(text, "module")?;
    let root = document.root_element();
    let mut module = EngineModule::default();

    for tag in element_children(root) {
        match tag.tag_name().name() {
            "name" => module.name = cdata(tag).trim().to_string(),
            "description" => module.description = cdata(tag).trim().to_string(),
            "author" => module.author = cdata(tag).trim().to_string(),
            "version" => module.version = cdata(tag).trim().to_string(),
            "type" => {
                let value = cdata(tag).trim().to_string();
                module.kind = ModuleKind::from_manifest(&value);
                if module.kind.is_none() {
                    return Err(LauncherError::invalid_format(format!(
                        "module manifest: unknown type '{}'",
                        value
                    )));
                }
            }
            "pattern" => module.pattern = cdata(tag).trim().to_string(),
            "homepage" => {}
            "data" => {} // deprecated
            "fallback" => module.is_fallback = true,
            "priority" => module.priority = cdata_int(tag)? as i32,
            "library" => read_module_library(tag, &mut module)?,
            _ => warn_unknown_tag("module manifest", tag),
        }
    }

    if module.name.is_empty() {
        return Err(LauncherError::invalid_format("module manifest: missing name"));
    }
    if module.version.is_empty() {
        return Err(LauncherError::invalid_format(
            "module manifest: missing version",
        ));
    }
    Ok(module)
}

fn read_module_library(node: roxmltree::Node, module: &mut EngineModule) -> Result<()> {
    for tag in element_children(node) {
        match tag.tag_name().name() {
            "file" => module.lib_file_name = cdata(tag).trim().to_string(),
            "size" => module.lib_size_expected = cdata_int(tag)? as u64,
            "sha1" => module.lib_hash_expected = cdata(tag).trim().to_string(),
            "entrypoint" => module.lib_entry_point = cdata(tag).trim().to_string(),
            "preloadLibrary" => {}
            _ => warn_unknown_tag("module manifest library", tag),
        }
    }
    Ok(())
}

/// Read a `degame` manifest.
pub fn read_game(text: &str) -> Result<Game> {
    let document = parse_document(text, "degame")?;
    let root = document.root_element();
    let mut game = Game::default();

    for tag in element_children(root) {
        match tag.tag_name().name() {
            "identifier" => {
                game.identifier = Some(parse_uuid(cdata(tag), "degame")?);
            }
            "aliasIdentifier" => game.alias_identifier = cdata(tag).trim().to_string(),
            "title" => game.title = cdata(tag).trim().to_string(),
            "subTitle" => {}
            "description" => game.description = cdata(tag).trim().to_string(),
            "creator" => game.creator = cdata(tag).trim().to_string(),
            "homepage" => game.homepage = cdata(tag).trim().to_string(),
            "icon" => {
                let size = attribute(tag, "size")?
                    .parse()
                    .map_err(|_| LauncherError::invalid_format("degame: bad icon size"))?;
                game.icons.push(GameIcon {
                    size,
                    path: cdata(tag).trim().to_string(),
                    content: None,
                });
            }
            "gameDirectory" => game.game_directory = cdata(tag).trim().to_string(),
            "dataDirectory" => game.data_directory = cdata(tag).trim().to_string(),
            "scriptDirectory" => game.script_directory = cdata(tag).trim().to_string(),
            "gameObject" => game.game_object = cdata(tag).trim().to_string(),
            "pathConfig" => game.path_config = cdata(tag).trim().to_string(),
            "pathCapture" => game.path_capture = cdata(tag).trim().to_string(),
            "scriptModule" => {
                game.script_module = cdata(tag).trim().to_string();
                if let Some(version) = tag.attribute("version") {
                    game.script_module_version = version.to_string();
                }
            }
            "windowSize" => {
                let x = attribute(tag, "x")?
                    .parse()
                    .map_err(|_| LauncherError::invalid_format("degame: bad windowSize x"))?;
                let y = attribute(tag, "y")?
                    .parse()
                    .map_err(|_| LauncherError::invalid_format("degame: bad windowSize y"))?;
                if x > 0 && y > 0 {
                    game.window_size = Some((x, y));
                }
            }
            "requireFormat" => {
                let kind_name = attribute(tag, "type")?;
                let kind = ModuleKind::from_manifest(kind_name).ok_or_else(|| {
                    LauncherError::invalid_format(format!(
                        "degame: unknown format type '{}'",
                        kind_name
                    ))
                })?;
                game.file_formats.push(FileFormat {
                    kind,
                    pattern: cdata(tag).trim().to_string(),
                    supported: false,
                });
            }
            "hiddenPath" => game.hidden_paths.push(cdata(tag).trim().to_string()),
            _ => warn_unknown_tag("degame manifest", tag),
        }
    }

    if game.identifier.is_none() {
        return Err(LauncherError::invalid_format(
            "degame manifest: missing identifier",
        ));
    }
    Ok(game)
}

/// Read a `depatch` manifest.
pub fn read_patch(text: &str) -> Result<Patch> {
    let document = parse_document(text, "depatch")?;
    let root = document.root_element();
    let mut patch = Patch::default();

    for tag in element_children(root) {
        match tag.tag_name().name() {
            "identifier" => {
                patch.identifier = Some(parse_uuid(cdata(tag), "depatch")?);
            }
            "name" => patch.name = cdata(tag).trim().to_string(),
            "description" => patch.description = cdata(tag).trim().to_string(),
            "creator" => patch.creator = cdata(tag).trim().to_string(),
            "homepage" => patch.homepage = cdata(tag).trim().to_string(),
            "patchDir" => patch.patch_directory = cdata(tag).trim().to_string(),
            "dataDir" => patch.data_directory = cdata(tag).trim().to_string(),
            "gameId" => {
                patch.game_id = Some(parse_uuid(cdata(tag), "depatch")?);
            }
            "requiredPatch" => {
                patch
                    .required_patches
                    .push(parse_uuid(cdata(tag), "depatch")?);
            }
            "hiddenPath" => patch.hidden_paths.push(cdata(tag).trim().to_string()),
            _ => warn_unknown_tag("depatch manifest", tag),
        }
    }

    if patch.identifier.is_none() {
        return Err(LauncherError::invalid_format(
            "depatch manifest: missing identifier",
        ));
    }
    if patch.game_id.is_none() {
        return Err(LauncherError::invalid_format(
            "depatch manifest: missing gameId",
        ));
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ModuleKind;

    const MODULE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<module>
  <name>opengl</name>
  <description>OpenGL renderer</description>
  <author>Example Team</author>
  <version>1.10</version>
  <type>Graphic</type>
  <pattern></pattern>
  <priority>2</priority>
  <library>
    <file>libgfxopengl.so</file>
    <size>123456</size>
    <sha1>a9993e364706816aba3e25717850c26c9cd0d89d</sha1>
    <entrypoint>GFXOpenGLCreateModule</entrypoint>
  </library>
</module>"#;

    #[test]
    fn test_read_module() {
        let module = read_module(MODULE_XML).unwrap();
        assert_eq!(module.name, "opengl");
        assert_eq!(module.version, "1.10");
        assert_eq!(module.kind, Some(ModuleKind::Graphic));
        assert_eq!(module.priority, 2);
        assert!(!module.is_fallback);
        assert_eq!(module.lib_file_name, "libgfxopengl.so");
        assert_eq!(module.lib_size_expected, 123456);
        assert_eq!(
            module.lib_hash_expected,
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(module.lib_entry_point, "GFXOpenGLCreateModule");
    }

    #[test]
    fn test_read_module_fallback_flag() {
        let text = r#"<module>
  <name>basic</name>
  <version>1.0</version>
  <type>Graphic</type>
  <fallback/>
</module>"#;
        let module = read_module(text).unwrap();
        assert!(module.is_fallback);
    }

    #[test]
    fn test_read_module_rejects_unknown_type() {
        let text = "<module><name>x</name><version>1</version><type>Bogus</type></module>";
        assert!(read_module(text).is_err());
    }

    const DEGAME_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<degame>
  <identifier>8cf8a8b1ef6b4b2bb9df3c10d9c4a2c6</identifier>
  <aliasIdentifier>example-quest</aliasIdentifier>
  <title>Example Quest</title>
  <description>A small adventure.</description>
  <creator>Example Team</creator>
  <homepage>https://example.invalid</homepage>
  <icon size="128">/icons/icon128.png</icon>
  <icon size="64">/icons/icon64.png</icon>
  <gameDirectory>.</gameDirectory>
  <dataDirectory>data</dataDirectory>
  <scriptDirectory>/scripts</scriptDirectory>
  <gameObject>ExampleQuestApp</gameObject>
  <pathConfig>/config</pathConfig>
  <pathCapture>/capture</pathCapture>
  <scriptModule version="1.5">descript</scriptModule>
  <windowSize x="1024" y="768"/>
  <requireFormat type="Image">img.deimg</requireFormat>
  <requireFormat type="Model">mdl.demodel</requireFormat>
</degame>"#;

    #[test]
    fn test_read_game() {
        let game = read_game(DEGAME_XML).unwrap();
        assert_eq!(
            game.identifier.unwrap().simple().to_string(),
            "8cf8a8b1ef6b4b2bb9df3c10d9c4a2c6"
        );
        assert_eq!(game.alias_identifier, "example-quest");
        assert_eq!(game.title, "Example Quest");
        assert_eq!(game.icons.len(), 2);
        assert_eq!(game.icons[0].size, 128);
        assert_eq!(game.data_directory, "data");
        assert_eq!(game.script_module, "descript");
        assert_eq!(game.script_module_version, "1.5");
        assert_eq!(game.window_size, Some((1024, 768)));
        assert_eq!(game.file_formats.len(), 2);
        assert_eq!(game.file_formats[0].kind, ModuleKind::Image);
        assert_eq!(game.path_config, "/config");
        assert_eq!(game.path_capture, "/capture");
    }

    #[test]
    fn test_read_game_missing_identifier_fails() {
        let text = "<degame><title>No Id</title></degame>";
        assert!(matches!(
            read_game(text),
            Err(LauncherError::InvalidFormat(_))
        ));
    }

    const DEPATCH_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<depatch>
  <identifier>11111111222233334444555555555555</identifier>
  <name>Update 2</name>
  <description>Second update.</description>
  <patchDir>patch2</patchDir>
  <dataDir>data</dataDir>
  <gameId>8cf8a8b1ef6b4b2bb9df3c10d9c4a2c6</gameId>
  <requiredPatch>aaaaaaaabbbbccccdddd000000000001</requiredPatch>
  <requiredPatch>aaaaaaaabbbbccccdddd000000000002</requiredPatch>
  <hiddenPath>/old/level1</hiddenPath>
</depatch>"#;

    #[test]
    fn test_read_patch() {
        let patch = read_patch(DEPATCH_XML).unwrap();
        assert_eq!(patch.name, "Update 2");
        assert_eq!(patch.patch_directory, "patch2");
        assert_eq!(patch.required_patches.len(), 2);
        assert_eq!(patch.hidden_paths, vec!["/old/level1".to_string()]);
        assert_eq!(
            patch.game_id.unwrap().simple().to_string(),
            "8cf8a8b1ef6b4b2bb9df3c10d9c4a2c6"
        );
    }

    #[test]
    fn test_read_patch_missing_game_id_fails() {
        let text = "<depatch><identifier>11111111222233334444555555555555</identifier></depatch>";
        assert!(read_patch(text).is_err());
    }

    #[test]
    fn test_unknown_tags_do_not_fail_loads() {
        let text = r#"<degame>
  <identifier>8cf8a8b1ef6b4b2bb9df3c10d9c4a2c6</identifier>
  <somethingNew>ignored</somethingNew>
</degame>"#;
        assert!(read_game(text).is_ok());
    }
}
