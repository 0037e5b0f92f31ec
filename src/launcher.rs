//! The launcher root object.
//!
//! Owns the resolved paths, the layered VFS, the engine registry and the
//! game/patch managers, and coordinates the phases of a run: boot
//! (`prepare`), launching games, polling them and persisting state on the
//! way out.

use log::{error, info};

use crate::config_xml::{self, LauncherConfig};
use crate::engine::Engine;
use crate::engine_instance::EngineInstanceFactory;
use crate::errors::{LauncherError, Result};
use crate::games::{GameContext, GameManager};
use crate::history::{LogHistory, SharedHistory};
use crate::paths::LauncherPaths;
use crate::patches::PatchManager;
use crate::run_params::RunParams;
use crate::vfs::{FileType, VirtualFileSystem};

/// Default capacity of the log history ring.
const HISTORY_CAPACITY: usize = 250;

/// Virtual path of the launcher-wide configuration file.
const CONFIG_FILE: &str = "/config/user/launcher.xml";

/// Launcher backend: discovery registries, engine state and game lifecycle.
pub struct Launcher {
    pub paths: LauncherPaths,
    pub vfs: VirtualFileSystem,
    pub history: SharedHistory,
    pub engine: Engine,
    pub game_manager: GameManager,
    pub patch_manager: PatchManager,
    factory: Box<dyn EngineInstanceFactory>,
}

impl Launcher {
    /// Compose a launcher over resolved paths and an instance factory. The
    /// VFS stack is `/config/system` read-only, `/config/user`, `/data` and
    /// `/logs` writable; engine paths join later during [`Self::prepare`].
    pub fn new(paths: LauncherPaths, factory: Box<dyn EngineInstanceFactory>) -> Self {
        let mut vfs = VirtualFileSystem::new();
        vfs.add_disk_dir("/config/system", &paths.config_system, true);
        vfs.add_disk_dir("/config/user", &paths.config_user, false);
        vfs.add_disk_dir("/data", &paths.shares, false);
        vfs.add_disk_dir("/logs", &paths.logs, false);

        Launcher {
            paths,
            vfs,
            history: LogHistory::new(HISTORY_CAPACITY),
            engine: Engine::new("delga-launcher-engine"),
            game_manager: GameManager::new(),
            patch_manager: PatchManager::new(),
            factory,
        }
    }

    /// Boot sequence: start a bootstrap engine instance, pull engine paths
    /// and display modes, discover and check modules, load the launcher
    /// config, synthesize the default profile, discover games and patches,
    /// then verify everything. The bootstrap instance is shut down at the
    /// end.
    pub fn prepare(&mut self) -> Result<()> {
        info!("System config path: {}", self.paths.config_system.display());
        info!("User config path: {}", self.paths.config_user.display());
        info!("Shares path: {}", self.paths.shares.display());
        info!("Games path: {}", self.paths.games.display());
        info!("Logs path: {}", self.paths.logs.display());

        let mut instance = self.factory.create_instance(&self.engine.log_file)?;
        instance.start_engine()?;
        let result = (|| -> Result<()> {
            instance.load_modules()?;

            self.engine
                .put_engine_into_vfs(instance.as_mut(), &mut self.vfs)?;
            info!("Engine config path = '{}'", self.engine.path_config);
            info!("Engine share path = '{}'", self.engine.path_share);
            info!("Engine lib path = '{}'", self.engine.path_lib);

            self.engine.update_resolutions(instance.as_mut());
            self.engine.reload_modules(&self.vfs);
            self.engine.check_modules(instance.as_mut(), &self.vfs);

            self.load_config()?;

            let resolution = self.engine.current_resolution;
            self.game_manager.create_default_profile(
                &self.engine.modules,
                (resolution.x.max(0) as u32, resolution.y.max(0) as u32),
            );

            self.game_manager.load_games(
                instance.as_mut(),
                &self.vfs,
                &self.paths,
                &mut self.patch_manager,
            );
            self.patch_manager.load_patches(
                instance.as_mut(),
                &self.game_manager.delga_directories(),
                &self.paths.games.to_string_lossy(),
            );
            Ok(())
        })();
        instance.stop_engine();
        result?;

        self.game_manager.load_game_configs(&self.vfs);
        self.game_manager.verify(&self.engine.modules);
        Ok(())
    }

    /// Read `launcher.xml`: named profiles and the active profile name.
    pub fn load_config(&mut self) -> Result<()> {
        match self.vfs.file_type(CONFIG_FILE) {
            Some(FileType::Regular) => {}
            Some(_) => {
                return Err(LauncherError::invalid_format(
                    "launcher configuration file is not a regular file",
                ))
            }
            None => {
                info!("Launcher configuration file not found, will be created upon exiting");
                return Ok(());
            }
        }

        info!("Reading launcher configuration file");
        let text = self.vfs.read(CONFIG_FILE)?;
        let text = String::from_utf8(text)
            .map_err(|_| LauncherError::invalid_format("launcher config is not UTF-8"))?;
        let config = config_xml::read_launcher_config(&text)?;
        self.game_manager.profiles = config.profiles;
        self.game_manager.active_profile_name = config.active_profile_name;
        Ok(())
    }

    /// Write `launcher.xml`.
    pub fn save_config(&self) -> Result<()> {
        info!("Writing launcher configuration file");
        let config = LauncherConfig {
            profiles: self.game_manager.profiles.clone(),
            active_profile_name: self.game_manager.active_profile_name.clone(),
        };
        let text = config_xml::write_launcher_config(&config)?;
        self.vfs.write(CONFIG_FILE, text.as_bytes())
    }

    /// Start the game matching `key` (UUID or alias).
    pub fn start_game(&mut self, key: &str) -> Result<()> {
        let game = self
            .game_manager
            .game_matching(key)
            .ok_or_else(|| LauncherError::not_found(format!("game '{}'", key)))?;
        let identifier = game
            .identifier
            .ok_or_else(|| LauncherError::invalid_state("game has no identifier"))?;

        let mut params =
            RunParams::resolve(game, &self.game_manager, self.patch_manager.patches())?;
        params.profile.verify(&self.engine.modules);

        let ctx = GameContext {
            vfs: &self.vfs,
            modules: &self.engine.modules,
            factory: self.factory.as_ref(),
            paths: &self.paths,
        };
        let game = self
            .game_manager
            .game_with_id_mut(identifier)
            .ok_or_else(|| LauncherError::not_found(format!("game '{}'", key)))?;
        game.start(&params, &ctx)
    }

    /// Cooperatively stop the game matching `key`.
    pub fn stop_game(&mut self, key: &str) -> Result<()> {
        let identifier = self
            .game_manager
            .game_matching(key)
            .and_then(|game| game.identifier)
            .ok_or_else(|| LauncherError::not_found(format!("game '{}'", key)))?;

        let ctx = GameContext {
            vfs: &self.vfs,
            modules: &self.engine.modules,
            factory: self.factory.as_ref(),
            paths: &self.paths,
        };
        let game = self
            .game_manager
            .game_with_id_mut(identifier)
            .ok_or_else(|| LauncherError::not_found(format!("game '{}'", key)))?;
        game.stop(&ctx)
    }

    /// Kill every running game unconditionally.
    pub fn kill_running_games(&mut self) {
        for game in self.game_manager.games_mut() {
            if game.is_running() {
                game.kill();
            }
        }
    }

    /// Poll all running games; never blocks.
    pub fn pulse_checking(&mut self) {
        let ctx = GameContext {
            vfs: &self.vfs,
            modules: &self.engine.modules,
            factory: self.factory.as_ref(),
            paths: &self.paths,
        };
        self.game_manager.pulse_checking(&ctx);
    }

    pub fn has_running_games(&self) -> bool {
        self.game_manager.games().iter().any(|game| game.is_running())
    }

    /// Persist launcher state on the way out.
    pub fn shutdown(&mut self) {
        self.kill_running_games();
        if let Err(err) = self.save_config() {
            error!("Failed to write launcher configuration: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use uuid::Uuid;

    use crate::engine_instance::testing::{new_command_log, CommandLog, RecordingInstance};
    use crate::engine_instance::EngineInstance;
    use crate::games::Game;
    use crate::modules::{EngineModule, ModuleKind, ModuleStatus};
    use crate::profiles::{Profile, ProfileModule, PROFILE_KINDS};

    struct RecordingFactory {
        log: CommandLog,
        drift: Arc<Mutex<Option<Vec<ProfileModule>>>>,
        properties: HashMap<crate::protocol::EngineProperty, String>,
    }

    impl EngineInstanceFactory for RecordingFactory {
        fn create_instance(
            &self,
            _log_file: &str,
        ) -> Result<Box<dyn EngineInstance>> {
            let mut instance = RecordingInstance::new(self.log.clone());
            instance.properties = self.properties.clone();
            instance.drift = self.drift.lock().unwrap().take();
            Ok(Box::new(instance))
        }
    }

    fn test_paths(dir: &TempDir) -> LauncherPaths {
        LauncherPaths {
            config_system: dir.path().join("sysconf"),
            config_user: dir.path().join("userconf"),
            shares: dir.path().join("shares"),
            games: dir.path().join("games"),
            logs: dir.path().join("logs"),
        }
    }

    fn ready_registry() -> crate::modules::EngineModuleList {
        let mut modules = crate::modules::EngineModuleList::new();
        for (kind, name) in [
            (ModuleKind::CrashRecovery, "basicrecovery"),
            (ModuleKind::Graphic, "opengl"),
            (ModuleKind::Input, "xinput"),
            (ModuleKind::Physics, "bullet"),
            (ModuleKind::Animator, "deanim"),
            (ModuleKind::Ai, "deai"),
            (ModuleKind::Audio, "openal"),
            (ModuleKind::Synthesizer, "desynth"),
            (ModuleKind::Network, "basicnet"),
            (ModuleKind::Vr, "openvr"),
            (ModuleKind::Script, "descript"),
        ] {
            modules
                .add(EngineModule {
                    kind: Some(kind),
                    name: name.to_string(),
                    version: "1.0".to_string(),
                    status: ModuleStatus::Ready,
                    ..Default::default()
                })
                .unwrap();
        }
        modules
    }

    fn valid_profile() -> Profile {
        let mut profile = Profile::default();
        for kind in PROFILE_KINDS {
            let name = match kind {
                ModuleKind::CrashRecovery => "basicrecovery",
                ModuleKind::Graphic => "opengl",
                ModuleKind::Input => "xinput",
                ModuleKind::Physics => "bullet",
                ModuleKind::Animator => "deanim",
                ModuleKind::Ai => "deai",
                ModuleKind::Audio => "openal",
                ModuleKind::Synthesizer => "desynth",
                ModuleKind::Network => "basicnet",
                ModuleKind::Vr => "openvr",
                _ => unreachable!(),
            };
            profile.set_module_name(kind, name);
        }
        profile
    }

    fn runnable_game(id: Uuid) -> Game {
        let mut game = Game {
            identifier: Some(id),
            alias_identifier: "demo".to_string(),
            title: "Demo".to_string(),
            game_directory: "/opt/demo".to_string(),
            data_directory: "data".to_string(),
            script_directory: "/scripts".to_string(),
            game_object: "DemoApp".to_string(),
            script_module: "descript".to_string(),
            path_config: "/config".to_string(),
            path_capture: "/capture".to_string(),
            ..Default::default()
        };
        game.set_default_log_file();
        game
    }

    fn test_launcher(log: CommandLog) -> (TempDir, Launcher) {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        let paths = test_paths(&dir);
        for path in [
            &paths.config_system,
            &paths.config_user,
            &paths.shares,
            &paths.games,
            &paths.logs,
        ] {
            fs::create_dir_all(path).unwrap();
        }
        let factory = RecordingFactory {
            log,
            drift: Arc::new(Mutex::new(None)),
            properties: HashMap::new(),
        };
        let launcher = Launcher::new(paths, Box::new(factory));
        (dir, launcher)
    }

    #[test]
    fn test_start_game_command_sequence() {
        let log = new_command_log();
        let (_dir, mut launcher) = test_launcher(log.clone());

        launcher.engine.modules = ready_registry();
        launcher.game_manager.default_profile = Some(valid_profile());

        let id = Uuid::parse_str("00112233445566778899aabbccddeeff").unwrap();
        let mut game = runnable_game(id);
        game.run_arguments = "--demo".to_string();
        launcher.game_manager.add_game(game);
        launcher.game_manager.verify(&launcher.engine.modules);

        launcher.start_game("demo").unwrap();

        let commands = log.lock().unwrap().clone();
        // engine boot
        assert_eq!(commands[0], "start-engine");
        assert_eq!(commands[1], "load-modules");
        // profile activation: disabled versions first, then the fixed order
        assert_eq!(commands[2], "activate-module basicrecovery:");
        assert_eq!(commands[11], "activate-module openvr:");
        // script module at its resolved version
        assert_eq!(commands[12], "activate-module descript:1.0");
        assert_eq!(
            commands[13],
            "set-cache-app-id 00112233445566778899aabbccddeeff"
        );
        assert!(commands[14].starts_with("set-data-dir "));
        assert!(commands[14].ends_with("/opt/demo/data"));
        assert_eq!(commands[15], "set-cmd-line-args --demo");
        // VFS stack: game data, script shared data, overlay, config, capture
        assert!(commands[16].starts_with("vfs-add-disk-dir / /opt/demo/data ro=true"));
        assert_eq!(commands[17], "vfs-add-script-shared-data-dir");
        assert!(commands[18].contains("/overlay ro=false"));
        assert!(commands[19].starts_with("vfs-add-disk-dir /config "));
        assert!(commands[19].contains("/config ro=false"));
        assert!(commands[20].starts_with("vfs-add-disk-dir /capture "));
        // window then start
        assert!(commands[21].starts_with("create-render-window 1680x1050 fs=true"));
        assert_eq!(commands[22], "start-game /scripts 1.0 DemoApp");
        assert_eq!(commands.len(), 23);

        assert!(launcher.has_running_games());
    }

    #[test]
    fn test_game_with_delga_mounts_archive() {
        let log = new_command_log();
        let (_dir, mut launcher) = test_launcher(log.clone());

        launcher.engine.modules = ready_registry();
        launcher.game_manager.default_profile = Some(valid_profile());

        let id = Uuid::new_v4();
        let mut game = runnable_game(id);
        game.delga_file = "/downloads/demo.delga".to_string();
        launcher.game_manager.add_game(game);
        launcher.game_manager.verify(&launcher.engine.modules);

        launcher.start_game(&id.to_string()).unwrap();

        let commands = log.lock().unwrap().clone();
        assert!(commands
            .iter()
            .any(|c| c == "vfs-add-delga-file /downloads/demo.delga data hidden=0"));
    }

    #[test]
    fn test_drift_is_persisted_into_custom_profile() {
        let log = new_command_log();
        let (_dir, mut launcher) = test_launcher(log.clone());

        launcher.engine.modules = ready_registry();
        launcher.game_manager.default_profile = Some(valid_profile());

        let id = Uuid::parse_str("00112233445566778899aabbccddeeff").unwrap();
        launcher.game_manager.add_game(runnable_game(id));
        launcher.game_manager.verify(&launcher.engine.modules);

        // arrange the next instance to report drift when the game ends
        let mut drift_module = ProfileModule::new("opengl");
        drift_module.set_parameter("brightness", "2.0");
        let factory = RecordingFactory {
            log: log.clone(),
            drift: Arc::new(Mutex::new(Some(vec![drift_module]))),
            properties: HashMap::new(),
        };
        launcher.factory = Box::new(factory);

        launcher.start_game("demo").unwrap();

        // the instance reports the game as exited on the first poll
        launcher.pulse_checking();
        assert!(!launcher.has_running_games());

        let game = launcher.game_manager.game_with_id(id).unwrap();
        let custom = game.custom_profile.as_ref().expect("custom profile saved");
        assert_eq!(
            custom
                .module_overrides_named("opengl")
                .unwrap()
                .parameter_named("brightness")
                .unwrap()
                .value,
            "2.0"
        );
        // the rest of the profile mirrors the profile the game ran under
        assert_eq!(custom.module(ModuleKind::Graphic).name, "opengl");

        // and it was written to the per-game config file
        let config_path = launcher
            .paths
            .game_state_dir("00112233445566778899aabbccddeeff")
            .join("launcher.xml");
        let saved = fs::read_to_string(config_path).unwrap();
        assert!(saved.contains("brightness"));
        assert!(saved.contains("2.0"));
    }

    #[test]
    fn test_launcher_config_round_trip_through_vfs() {
        let log = new_command_log();
        let (_dir, mut launcher) = test_launcher(log);

        let mut profile = valid_profile();
        profile.name = "speed".to_string();
        launcher.game_manager.profiles.add(profile);
        launcher.game_manager.active_profile_name = Some("speed".to_string());

        launcher.save_config().unwrap();

        let mut reloaded_profiles = GameManager::new();
        std::mem::swap(&mut launcher.game_manager, &mut reloaded_profiles);
        launcher.load_config().unwrap();

        assert!(launcher.game_manager.profiles.has_named("speed"));
        assert_eq!(
            launcher.game_manager.active_profile_name.as_deref(),
            Some("speed")
        );
    }

    #[test]
    fn test_start_unknown_game_fails() {
        let log = new_command_log();
        let (_dir, mut launcher) = test_launcher(log);
        assert!(matches!(
            launcher.start_game("nope"),
            Err(LauncherError::NotFound(_))
        ));
    }
}
