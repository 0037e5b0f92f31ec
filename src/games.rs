//! Games and the game registry.
//!
//! A game is discovered either stand-alone (a `*.degame` manifest next to
//! its data) or packaged inside a DELGA archive. Per-game state (custom
//! profile, run settings, overlay/config/capture trees, logs) lives under
//! `<user_config>/games/<uuid-hex>/`. The registry loads known games from
//! that tree first, then scans the legacy games directory; the first
//! sighting of an identifier wins.

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::config_xml;
use crate::engine_instance::{EngineInstance, EngineInstanceFactory};
use crate::errors::{LauncherError, Result};
use crate::manifest_xml;
use crate::modules::{EngineModuleList, ModuleKind, ModuleStatus};
use crate::paths::LauncherPaths;
use crate::patches::{PatchList, PatchManager};
use crate::profiles::{Profile, ProfileList, ProfileModule};
use crate::run_params::RunParams;
use crate::vfs::{self, FileType, VirtualFileSystem};

/// Icon declared by a game manifest. Content is read lazily from the DELGA.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameIcon {
    /// Nominal square size in pixels.
    pub size: u32,
    /// Resource path inside the game data or DELGA.
    pub path: String,
    pub content: Option<Vec<u8>>,
}

/// A file format the game requires support for, matched against module
/// patterns of the corresponding kind.
#[derive(Debug, Clone, PartialEq)]
pub struct FileFormat {
    pub kind: ModuleKind,
    pub pattern: String,
    pub supported: bool,
}

/// One installed game.
pub struct Game {
    pub identifier: Option<Uuid>,
    /// Human-friendly secondary identifier, not necessarily unique.
    pub alias_identifier: String,
    pub title: String,
    pub description: String,
    pub creator: String,
    pub homepage: String,
    pub icons: Vec<GameIcon>,

    /// Native directory of a stand-alone game.
    pub game_directory: String,
    /// Data directory, relative to the game directory.
    pub data_directory: String,
    /// Script directory, relative to the data directory.
    pub script_directory: String,
    /// Script object started as the game entry point.
    pub game_object: String,
    pub script_module: String,
    /// Minimum required script module version; empty accepts any.
    pub script_module_version: String,
    /// Fixed window size requested by the game.
    pub window_size: Option<(u32, u32)>,
    pub file_formats: Vec<FileFormat>,
    /// Virtual path the game writes its configuration to.
    pub path_config: String,
    /// Virtual path for captured output.
    pub path_capture: String,
    /// Hosting DELGA file, empty for stand-alone games.
    pub delga_file: String,
    /// Paths inside the game tree to pretend absent.
    pub hidden_paths: Vec<String>,

    pub custom_profile: Option<Profile>,
    /// Name of the chosen registry profile, if any.
    pub active_profile_name: Option<String>,
    pub run_arguments: String,
    /// Log file, relative to the per-user config root.
    pub log_file: String,
    pub use_latest_patch: bool,
    pub use_custom_patch: Option<Uuid>,
    /// Patches discovered next to a stand-alone game file.
    pub local_patches: PatchList,

    // filled by verification
    pub all_formats_supported: bool,
    pub script_module_found: bool,
    pub script_module_found_version: String,
    pub can_run: bool,

    // runtime state of a started game
    pub(crate) instance: Option<Box<dyn EngineInstance>>,
    pub(crate) snapshot_profile: Option<Profile>,
    pub(crate) collected_drift: Vec<ProfileModule>,
}

impl Default for Game {
    fn default() -> Self {
        Game {
            identifier: None,
            alias_identifier: String::new(),
            title: String::new(),
            description: String::new(),
            creator: String::new(),
            homepage: String::new(),
            icons: Vec::new(),
            game_directory: String::new(),
            data_directory: String::new(),
            script_directory: String::new(),
            game_object: String::new(),
            script_module: String::new(),
            script_module_version: String::new(),
            window_size: None,
            file_formats: Vec::new(),
            path_config: String::new(),
            path_capture: String::new(),
            delga_file: String::new(),
            hidden_paths: Vec::new(),
            custom_profile: None,
            active_profile_name: None,
            run_arguments: String::new(),
            log_file: String::new(),
            // newly discovered games play with the latest patch
            use_latest_patch: true,
            use_custom_patch: None,
            local_patches: PatchList::new(),
            all_formats_supported: false,
            script_module_found: false,
            script_module_found_version: String::new(),
            can_run: false,
            instance: None,
            snapshot_profile: None,
            collected_drift: Vec::new(),
        }
    }
}

impl std::fmt::Debug for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("identifier", &self.identifier)
            .field("alias_identifier", &self.alias_identifier)
            .field("title", &self.title)
            .field("delga_file", &self.delga_file)
            .field("can_run", &self.can_run)
            .field("running", &self.instance.is_some())
            .finish()
    }
}

/// Borrowed launcher facilities a game needs while starting, polling or
/// stopping.
pub struct GameContext<'a> {
    pub vfs: &'a VirtualFileSystem,
    pub modules: &'a EngineModuleList,
    pub factory: &'a dyn EngineInstanceFactory,
    pub paths: &'a LauncherPaths,
}

impl Game {
    /// Identifier as bare hex, as used in filesystem paths.
    pub fn identifier_hex(&self) -> String {
        self.identifier
            .map(|id| id.simple().to_string())
            .unwrap_or_default()
    }

    /// Set the log file to its default location inside the per-game state
    /// directory.
    pub fn set_default_log_file(&mut self) {
        self.log_file = format!("games/{}/logs/last_run.log", self.identifier_hex());
    }

    pub fn is_running(&self) -> bool {
        self.instance.is_some()
    }

    /// Verify this game against the module registry: every required file
    /// format must be claimed by a ready module of the matching kind, and
    /// the script module must exist at the required minimum version.
    pub fn verify_requirements(&mut self, modules: &EngineModuleList) {
        if let Some(profile) = &mut self.custom_profile {
            profile.verify(modules);
        }

        self.all_formats_supported = true;
        for format in &mut self.file_formats {
            format.supported = false;
            if !format.kind.is_single_instance() {
                format.supported = modules.iter().any(|module| {
                    module.kind == Some(format.kind)
                        && module.status == ModuleStatus::Ready
                        && vfs::matches_pattern(&format.pattern, &module.pattern)
                });
            }
            if !format.supported {
                self.all_formats_supported = false;
            }
        }

        let module = if self.script_module_version.is_empty() {
            modules.get_named(&self.script_module)
        } else {
            modules.get_named_at_least(&self.script_module, &self.script_module_version)
        };

        self.script_module_found = module
            .map(|m| m.kind == Some(ModuleKind::Script) && m.status == ModuleStatus::Ready)
            .unwrap_or(false);
        if let Some(module) = module {
            self.script_module_found_version = module.version.clone();
        }

        self.can_run = self.all_formats_supported && self.script_module_found;
    }

    /// Path of the largest declared icon, used for the render window.
    pub fn best_icon_path(&self) -> &str {
        self.icons
            .iter()
            .max_by_key(|icon| icon.size)
            .map(|icon| icon.path.as_str())
            .unwrap_or("")
    }

    /// Start the game with resolved run parameters.
    ///
    /// Creates and boots an engine instance, activates the resolved profile
    /// and script module, composes the child VFS and starts the game. On any
    /// failure the instance is torn down.
    pub fn start(&mut self, run_params: &RunParams, ctx: &GameContext) -> Result<()> {
        if self.is_running() {
            return Err(LauncherError::invalid_state("game is already running"));
        }
        if !self.can_run {
            return Err(LauncherError::invalid_state("game can not run"));
        }
        if !run_params.profile.valid {
            return Err(LauncherError::invalid_state("profile is not valid"));
        }

        // truncate the previous run's log; opening for writing suffices
        let log_path = vfs::join("/config/user", &self.log_file);
        if let Err(err) = ctx.vfs.open_write(&log_path) {
            warn!("Failed to truncate game log '{}': {}", log_path, err);
        }

        info!("Starting game '{}'", self.title);

        let mut instance = ctx.factory.create_instance(&self.log_file)?;
        let result = self.push_start_commands(instance.as_mut(), run_params, ctx);
        match result {
            Ok(()) => {
                self.snapshot_profile = Some(run_params.profile.clone());
                self.collected_drift.clear();
                self.instance = Some(instance);
                Ok(())
            }
            Err(err) => {
                error!("Game '{}' failed to start: {}", self.title, err);
                instance.kill();
                Err(err)
            }
        }
    }

    fn push_start_commands(
        &self,
        instance: &mut dyn EngineInstance,
        run_params: &RunParams,
        ctx: &GameContext,
    ) -> Result<()> {
        instance.start_engine()?;
        instance.load_modules()?;

        run_params.profile.activate(instance, ctx.modules)?;

        let script_version = if self.script_module_found_version.is_empty() {
            &self.script_module_version
        } else {
            &self.script_module_found_version
        };
        instance.activate_module(&self.script_module, script_version)?;

        instance.set_cache_app_id(&self.identifier_hex())?;

        // the engine expects an absolute native data directory composed of
        // the data directory underneath the game directory
        let data_dir = native_join(&self.game_directory, &self.data_directory);
        instance.set_data_directory(&data_dir)?;

        instance.set_cmd_line_args(&run_params.run_arguments)?;

        if self.delga_file.is_empty() {
            instance.vfs_add_disk_dir("/", &data_dir, true, &self.hidden_paths)?;
        } else {
            instance.vfs_add_delga_file(
                &self.delga_file,
                &self.data_directory,
                &self.hidden_paths,
            )?;
        }

        for patch in run_params.patches.iter() {
            if patch.delga_file.is_empty() {
                let patch_data = native_join(&patch.patch_directory, &patch.data_directory);
                instance.vfs_add_disk_dir("/", &patch_data, true, &patch.hidden_paths)?;
            } else {
                instance.vfs_add_delga_file(
                    &patch.delga_file,
                    &patch.data_directory,
                    &patch.hidden_paths,
                )?;
            }
        }

        instance.vfs_add_script_shared_data_dir()?;

        let state_dir = ctx.paths.game_state_dir(&self.identifier_hex());
        instance.vfs_add_disk_dir(
            "/",
            &state_dir.join("overlay").to_string_lossy(),
            false,
            &[],
        )?;
        instance.vfs_add_disk_dir(
            &self.path_config,
            &state_dir.join("config").to_string_lossy(),
            false,
            &[],
        )?;
        instance.vfs_add_disk_dir(
            &self.path_capture,
            &state_dir.join("capture").to_string_lossy(),
            false,
            &[],
        )?;

        instance.create_render_window(
            run_params.width as u16,
            run_params.height as u16,
            run_params.full_screen,
            &self.title,
            self.best_icon_path(),
        )?;

        instance.start_game(&self.script_directory, script_version, &self.game_object)
    }

    /// Cooperatively stop the running game, collect its parameter drift and
    /// persist the custom profile.
    pub fn stop(&mut self, ctx: &GameContext) -> Result<()> {
        let instance = self
            .instance
            .as_mut()
            .ok_or_else(|| LauncherError::invalid_state("game is not running"))?;

        info!("Stopping game '{}'", self.title);
        instance.stop_game()?;

        // drain the post-game exchange
        while instance.is_game_running() {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        self.finish_run(ctx);
        info!("Game '{}' stopped", self.title);
        Ok(())
    }

    /// Terminate the running game unconditionally. No drift is collected.
    pub fn kill(&mut self) {
        if let Some(mut instance) = self.instance.take() {
            info!("Killing game '{}'", self.title);
            instance.kill();
        }
        self.snapshot_profile = None;
        self.collected_drift.clear();
    }

    /// Poll the running game; must not block. When the game turned out to
    /// have ended, the drift exchange has happened and the custom profile is
    /// persisted.
    pub fn pulse_checking(&mut self, ctx: &GameContext) {
        if !self.is_running() {
            return;
        }
        let still_running = self
            .instance
            .as_mut()
            .map(|instance| instance.is_game_running())
            .unwrap_or(false);
        if still_running {
            return;
        }

        info!("Game '{}' is no longer running", self.title);
        self.finish_run(ctx);
    }

    fn finish_run(&mut self, ctx: &GameContext) {
        if let Some(mut instance) = self.instance.take() {
            if let Some(drift) = instance.take_changed_parameters() {
                self.collected_drift = drift;
            }
            instance.stop_engine();
        }
        self.store_custom_config(ctx);
    }

    /// Merge collected drift into the custom profile and save the per-game
    /// config. Games with a fixed window size force the custom profile to
    /// windowed mode at exactly that size.
    fn store_custom_config(&mut self, ctx: &GameContext) {
        let snapshot = match self.snapshot_profile.take() {
            Some(snapshot) => snapshot,
            None => return,
        };
        if self.collected_drift.is_empty() {
            return;
        }

        let mut profile = snapshot;
        profile.name.clear();
        profile.apply_drift(&self.collected_drift);
        self.collected_drift.clear();

        if let Some((width, height)) = self.window_size {
            profile.full_screen = false;
            profile.set_width(width);
            profile.set_height(height);
        }

        profile.verify(ctx.modules);
        self.custom_profile = Some(profile);

        if let Err(err) = self.save_config(ctx.vfs) {
            error!(
                "Failed to write game configuration for '{}': {}",
                self.title, err
            );
        }
    }

    /// Virtual path of the per-game config file.
    fn config_file_path(&self) -> String {
        format!("/config/user/games/{}/launcher.xml", self.identifier_hex())
    }

    /// Load the per-game configuration, if present.
    pub fn load_config(&mut self, vfs: &VirtualFileSystem) -> Result<()> {
        let path = self.config_file_path();
        match vfs.file_type(&path) {
            Some(FileType::Regular) => {
                info!("Reading game configuration file for '{}'", self.title);
                let text = vfs.read(&path)?;
                let text = String::from_utf8(text)
                    .map_err(|_| LauncherError::invalid_format("game config is not UTF-8"))?;
                config_xml::read_game_config(&text, self)
            }
            Some(_) => Err(LauncherError::invalid_format(
                "game configuration file is not a regular file",
            )),
            None => {
                info!(
                    "Game configuration file for '{}' not found, will be created upon exiting",
                    self.title
                );
                Ok(())
            }
        }
    }

    /// Write the per-game configuration.
    pub fn save_config(&self, vfs: &VirtualFileSystem) -> Result<()> {
        let path = self.config_file_path();
        info!("Writing game configuration file for '{}'", self.title);
        let text = config_xml::write_game_config(self)?;
        vfs.write(&path, text.as_bytes())
    }
}

/// Join a native base directory and a relative unix-style part.
fn native_join(base: &str, rel: &str) -> String {
    let mut path = std::path::PathBuf::from(base);
    for component in rel.split('/').filter(|c| !c.is_empty() && *c != ".") {
        path.push(component);
    }
    path.to_string_lossy().into_owned()
}

/// Discovers and owns all known games, the profile registry and the default
/// profile.
#[derive(Debug, Default)]
pub struct GameManager {
    games: Vec<Game>,
    pub profiles: ProfileList,
    pub active_profile_name: Option<String>,
    pub default_profile: Option<Profile>,
}

impl GameManager {
    pub fn new() -> Self {
        GameManager::default()
    }

    pub fn games(&self) -> &[Game] {
        &self.games
    }

    pub fn games_mut(&mut self) -> &mut [Game] {
        &mut self.games
    }

    pub fn game_with_id(&self, id: Uuid) -> Option<&Game> {
        self.games.iter().find(|g| g.identifier == Some(id))
    }

    pub fn game_with_id_mut(&mut self, id: Uuid) -> Option<&mut Game> {
        self.games.iter_mut().find(|g| g.identifier == Some(id))
    }

    /// Register a game directly, skipping discovery. Duplicates by
    /// identifier are dropped silently.
    pub fn add_game(&mut self, game: Game) {
        if self.has_with_id(game.identifier) {
            debug!("Ignoring duplicate game '{}'", game.identifier_hex());
            return;
        }
        self.games.push(game);
    }

    /// Look a game up by UUID or alias identifier.
    pub fn game_matching(&self, key: &str) -> Option<&Game> {
        if let Ok(id) = Uuid::parse_str(key) {
            if let Some(game) = self.game_with_id(id) {
                return Some(game);
            }
        }
        self.games.iter().find(|g| g.alias_identifier == key)
    }

    fn has_with_id(&self, id: Option<Uuid>) -> bool {
        id.map(|id| self.game_with_id(id).is_some()).unwrap_or(false)
    }

    /// Discover games from the per-user config tree and the legacy games
    /// directory. The first sighting of an identifier wins.
    pub fn load_games(
        &mut self,
        instance: &mut dyn EngineInstance,
        vfs: &VirtualFileSystem,
        paths: &LauncherPaths,
        patch_manager: &mut PatchManager,
    ) {
        info!("Loading game list");
        self.games.clear();

        // pass one: games known from per-user config directories
        for directory in vfs.list_directories("/config/user/games") {
            let hex = directory.rsplit('/').next().unwrap_or("");
            let identifier = match Uuid::parse_str(hex) {
                Ok(id) => id,
                Err(_) => {
                    warn!("Ignoring game state directory with bad name '{}'", hex);
                    continue;
                }
            };

            let mut game = Game {
                identifier: Some(identifier),
                ..Default::default()
            };
            game.set_default_log_file();
            if let Err(err) = game.load_config(vfs) {
                error!("Failed to load game config '{}': {}", hex, err);
                continue;
            }

            if !game.delga_file.is_empty() {
                // the config points at a DELGA; the real metadata lives there
                let mut list: Vec<Game> = Vec::new();
                if let Err(err) =
                    load_game_from_disk(instance, &game.delga_file, &mut list, patch_manager)
                {
                    error!(
                        "Failed to reload game '{}' from '{}': {}",
                        hex, game.delga_file, err
                    );
                    continue;
                }
                if let Some(mut delga_game) = list
                    .into_iter()
                    .find(|g| g.identifier == Some(identifier))
                {
                    // the config layer contributes profile and run settings
                    delga_game.custom_profile = game.custom_profile.take();
                    delga_game.active_profile_name = game.active_profile_name.take();
                    delga_game.run_arguments = std::mem::take(&mut game.run_arguments);
                    delga_game.use_latest_patch = game.use_latest_patch;
                    delga_game.use_custom_patch = game.use_custom_patch;
                    game = delga_game;
                }
            }

            if game.title.is_empty() {
                game.title = game.identifier_hex();
            }

            if !self.has_with_id(game.identifier) {
                self.games.push(game);
            }
        }

        // pass two: legacy games directory (takes effect only for new ids)
        let mut disk_vfs = VirtualFileSystem::new();
        disk_vfs.add_disk_dir("/", &paths.games, true);
        let games_root = paths.games.to_string_lossy().into_owned();

        for file in disk_vfs.search_files("/", &["*.degame", "*.delga"]) {
            let native = format!("{}{}", games_root.trim_end_matches('/'), file);
            let mut list: Vec<Game> = Vec::new();
            if let Err(err) = load_game_from_disk(instance, &native, &mut list, patch_manager) {
                error!("Failed to read game file '{}': {}", native, err);
                continue;
            }
            for game in list {
                if self.has_with_id(game.identifier) {
                    debug!("Ignoring duplicate game '{}'", game.identifier_hex());
                    continue;
                }
                self.games.push(game);
            }
        }
    }

    /// Native directories hosting the DELGA files of loaded games, for the
    /// patch scan.
    pub fn delga_directories(&self) -> Vec<String> {
        let mut directories = Vec::new();
        for game in &self.games {
            if game.delga_file.is_empty() {
                continue;
            }
            if let Some(parent) = std::path::Path::new(&game.delga_file).parent() {
                let dir = parent.to_string_lossy().into_owned();
                if !directories.contains(&dir) {
                    directories.push(dir);
                }
            }
        }
        directories
    }

    /// Load the per-game configs of every known game.
    pub fn load_game_configs(&mut self, vfs: &VirtualFileSystem) {
        for game in &mut self.games {
            if let Err(err) = game.load_config(vfs) {
                error!(
                    "Failed to load game config for '{}': {}",
                    game.title, err
                );
            }
        }
    }

    /// Verify profiles and game requirements against the module registry.
    pub fn verify(&mut self, modules: &EngineModuleList) {
        if let Some(profile) = &mut self.default_profile {
            profile.verify(modules);
        }
        self.profiles.validate_all(modules);
        for game in &mut self.games {
            game.verify_requirements(modules);
        }
    }

    /// Drop dangling active-profile references after profiles changed.
    pub fn apply_profile_changes(&mut self, modules: &EngineModuleList) {
        for game in &mut self.games {
            let dangling = game
                .active_profile_name
                .as_ref()
                .map(|name| !self.profiles.has_named(name))
                .unwrap_or(false);
            if dangling {
                game.active_profile_name = None;
                game.verify_requirements(modules);
            }
        }
    }

    /// Synthesize the default profile from the best ready module of every
    /// kind and the engine's current display resolution. Profiles saved
    /// before the VR module existed are patched up with the default VR
    /// choice.
    pub fn create_default_profile(
        &mut self,
        modules: &EngineModuleList,
        current_resolution: (u32, u32),
    ) {
        let mut profile = self.default_profile.take().unwrap_or_default();

        for kind in crate::profiles::PROFILE_KINDS {
            let name = modules
                .best_module_for_kind(kind)
                .map(|m| m.name.clone())
                .unwrap_or_default();
            info!("Default profile: {} module = '{}'", kind, name);
            profile.set_module_name(kind, &name);
            profile.set_module_version(kind, "");
        }

        profile.full_screen = true;
        profile.set_width(current_resolution.0);
        profile.set_height(current_resolution.1);

        // profiles from before the VR module era have no vr entry
        let default_vr = profile.module(ModuleKind::Vr).clone();
        for stored in self.profiles.iter_mut() {
            if stored.module(ModuleKind::Vr).name.is_empty() {
                stored.set_module_name(ModuleKind::Vr, &default_vr.name);
                stored.set_module_version(ModuleKind::Vr, &default_vr.version);
            }
        }

        self.default_profile = Some(profile);
    }

    /// The profile a game would run under right now:
    /// game active profile, game custom profile, launcher active profile,
    /// default profile.
    pub fn profile_to_use<'a>(&'a self, game: &'a Game) -> Option<&'a Profile> {
        if let Some(name) = &game.active_profile_name {
            if let Some(profile) = self.profiles.get_named(name) {
                return Some(profile);
            }
        }
        if let Some(profile) = &game.custom_profile {
            return Some(profile);
        }
        if let Some(name) = &self.active_profile_name {
            if let Some(profile) = self.profiles.get_named(name) {
                return Some(profile);
            }
        }
        self.default_profile.as_ref()
    }

    /// Poll every running game.
    pub fn pulse_checking(&mut self, ctx: &GameContext) {
        for game in &mut self.games {
            game.pulse_checking(ctx);
        }
    }

    pub fn clear(&mut self) {
        self.games.clear();
        self.profiles.clear();
        self.active_profile_name = None;
        self.default_profile = None;
    }
}

/// Load every game a file defines: a `*.degame` manifest yields one game, a
/// `*.delga` may embed several. Patches found in the same directory tree are
/// registered with the patch manager and associated with the games.
pub fn load_game_from_disk(
    instance: &mut dyn EngineInstance,
    path: &str,
    list: &mut Vec<Game>,
    patch_manager: &mut PatchManager,
) -> Result<()> {
    info!("Reading game file '{}'", path);

    if path.ends_with(".delga") {
        for definition in instance.read_delga_game_defs(path)? {
            let mut game = match manifest_xml::read_game(&definition) {
                Ok(game) => game,
                Err(err) => {
                    error!("Bad game definition in '{}': {}", path, err);
                    continue;
                }
            };
            game.set_default_log_file();
            game.delga_file = path.to_string();

            if game.path_config.is_empty() {
                info!("No configuration path specified, ignoring game file.");
                continue;
            }
            if game.path_capture.is_empty() {
                info!("No capture path specified, ignoring game file.");
                continue;
            }

            materialize_icons(instance, path, &mut game);
            list.push(game);
        }
    } else {
        let text = std::fs::read_to_string(path)?;
        let mut game = manifest_xml::read_game(&text)?;

        if !std::path::Path::new(&game.game_directory).is_absolute() {
            let base = std::path::Path::new(path)
                .parent()
                .unwrap_or_else(|| std::path::Path::new("/"));
            game.game_directory = base
                .join(&game.game_directory)
                .to_string_lossy()
                .into_owned();
        }
        game.set_default_log_file();

        if game.path_config.is_empty() {
            info!("No configuration path specified, ignoring game file.");
            return Err(LauncherError::invalid_format(path.to_string()));
        }
        if game.path_capture.is_empty() {
            info!("No capture path specified, ignoring game file.");
            return Err(LauncherError::invalid_format(path.to_string()));
        }

        list.push(game);
    }

    // patches located in the same directory or below apply to these games
    if let Some(base) = std::path::Path::new(path).parent() {
        let mut patches = PatchList::new();
        let mut vfs = VirtualFileSystem::new();
        vfs.add_disk_dir("/", base, true);
        let base_str = base.to_string_lossy().into_owned();
        for file in vfs.search_files("/", &["*.depatch"]) {
            let native = format!("{}{}", base_str.trim_end_matches('/'), file);
            if let Err(err) = crate::patches::load_patch_from_disk(instance, &native, &mut patches)
            {
                error!("Failed to read patch file '{}': {}", native, err);
            }
        }

        for game in list.iter_mut() {
            for patch in patches.iter() {
                if patch.game_id == game.identifier {
                    game.local_patches.add(patch.clone());
                }
            }
        }
        patch_manager.add_all(&patches);
    }

    Ok(())
}

fn materialize_icons(instance: &mut dyn EngineInstance, delga_file: &str, game: &mut Game) {
    for icon in &mut game.icons {
        if icon.path.is_empty() {
            continue;
        }
        let names = vec![icon.path.clone()];
        match instance.read_delga_files(delga_file, &names) {
            Ok(mut contents) if !contents.is_empty() => {
                icon.content = Some(contents.remove(0));
            }
            Ok(_) => {}
            Err(err) => {
                error!(
                    "Exception while reading icon '{}' for game '{}': {}",
                    icon.path, game.title, err
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::EngineModule;

    fn ready_module(name: &str, version: &str, kind: ModuleKind) -> EngineModule {
        EngineModule {
            kind: Some(kind),
            name: name.to_string(),
            version: version.to_string(),
            status: ModuleStatus::Ready,
            ..Default::default()
        }
    }

    fn game_with_script(script: &str, min_version: &str) -> Game {
        Game {
            identifier: Some(Uuid::new_v4()),
            script_module: script.to_string(),
            script_module_version: min_version.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_verify_requirements_script_module() {
        let mut modules = EngineModuleList::new();
        modules
            .add(ready_module("descript", "1.4", ModuleKind::Script))
            .unwrap();

        let mut game = game_with_script("descript", "1.2");
        game.verify_requirements(&modules);
        assert!(game.script_module_found);
        assert_eq!(game.script_module_found_version, "1.4");
        assert!(game.can_run);

        let mut game = game_with_script("descript", "2.0");
        game.verify_requirements(&modules);
        assert!(!game.script_module_found);
        assert!(!game.can_run);
    }

    #[test]
    fn test_verify_requirements_file_formats() {
        let mut modules = EngineModuleList::new();
        let mut image = ready_module("deimage", "1.0", ModuleKind::Image);
        image.pattern = "*.deimg".to_string();
        modules.add(image).unwrap();
        modules
            .add(ready_module("descript", "1.0", ModuleKind::Script))
            .unwrap();

        let mut game = game_with_script("descript", "");
        game.file_formats.push(FileFormat {
            kind: ModuleKind::Image,
            pattern: "img.deimg".to_string(),
            supported: false,
        });
        game.verify_requirements(&modules);
        assert!(game.all_formats_supported);
        assert!(game.can_run);

        game.file_formats.push(FileFormat {
            kind: ModuleKind::Model,
            pattern: "m.demodel".to_string(),
            supported: false,
        });
        game.verify_requirements(&modules);
        assert!(!game.all_formats_supported);
        assert!(!game.can_run);
    }

    #[test]
    fn test_identifier_hex_and_default_log_file() {
        let mut game = Game {
            identifier: Some(
                Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap(),
            ),
            ..Default::default()
        };
        game.set_default_log_file();
        assert_eq!(
            game.log_file,
            "games/00112233445566778899aabbccddeeff/logs/last_run.log"
        );
    }

    #[test]
    fn test_best_icon_path_prefers_largest() {
        let mut game = Game::default();
        game.icons.push(GameIcon {
            size: 64,
            path: "/icons/64.png".to_string(),
            content: None,
        });
        game.icons.push(GameIcon {
            size: 256,
            path: "/icons/256.png".to_string(),
            content: None,
        });
        assert_eq!(game.best_icon_path(), "/icons/256.png");
    }

    #[test]
    fn test_profile_to_use_precedence() {
        let mut manager = GameManager::new();
        manager.default_profile = Some(Profile::named("default"));
        manager.profiles.add(Profile::named("global"));
        manager.profiles.add(Profile::named("per-game"));
        manager.active_profile_name = Some("global".to_string());

        let mut game = Game::default();
        assert_eq!(manager.profile_to_use(&game).unwrap().name, "global");

        manager.active_profile_name = None;
        assert_eq!(manager.profile_to_use(&game).unwrap().name, "default");

        game.custom_profile = Some(Profile::default());
        assert_eq!(manager.profile_to_use(&game).unwrap().name, "");

        game.active_profile_name = Some("per-game".to_string());
        assert_eq!(manager.profile_to_use(&game).unwrap().name, "per-game");
    }

    #[test]
    fn test_load_game_from_delga_round_trips_identifier() {
        use crate::engine_instance::testing::{new_command_log, RecordingInstance};

        let definition = r#"<degame>
  <identifier>8cf8a8b1ef6b4b2bb9df3c10d9c4a2c6</identifier>
  <title>Example Quest</title>
  <icon size="128">/icons/icon128.png</icon>
  <gameDirectory>.</gameDirectory>
  <dataDirectory>data</dataDirectory>
  <scriptDirectory>/scripts</scriptDirectory>
  <gameObject>App</gameObject>
  <pathConfig>/config</pathConfig>
  <pathCapture>/capture</pathCapture>
  <scriptModule>descript</scriptModule>
</degame>"#;

        let log = new_command_log();
        let mut instance = RecordingInstance::new(log);
        instance
            .delga_game_defs
            .insert("/d/demo.delga".to_string(), vec![definition.to_string()]);
        instance
            .delga_files
            .insert("/icons/icon128.png".to_string(), vec![1, 2, 3]);

        let mut list = Vec::new();
        let mut patches = PatchManager::new();
        load_game_from_disk(&mut instance, "/d/demo.delga", &mut list, &mut patches).unwrap();

        assert_eq!(list.len(), 1);
        let game = &list[0];
        assert_eq!(
            game.identifier_hex(),
            "8cf8a8b1ef6b4b2bb9df3c10d9c4a2c6"
        );
        assert_eq!(game.delga_file, "/d/demo.delga");
        assert_eq!(
            game.log_file,
            "games/8cf8a8b1ef6b4b2bb9df3c10d9c4a2c6/logs/last_run.log"
        );
        // the icon was materialized through a second DELGA read
        assert_eq!(game.icons[0].content.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_delga_game_without_config_path_is_skipped() {
        use crate::engine_instance::testing::{new_command_log, RecordingInstance};

        let definition = r#"<degame>
  <identifier>8cf8a8b1ef6b4b2bb9df3c10d9c4a2c6</identifier>
  <pathCapture>/capture</pathCapture>
</degame>"#;

        let log = new_command_log();
        let mut instance = RecordingInstance::new(log);
        instance
            .delga_game_defs
            .insert("/d/demo.delga".to_string(), vec![definition.to_string()]);

        let mut list = Vec::new();
        let mut patches = PatchManager::new();
        load_game_from_disk(&mut instance, "/d/demo.delga", &mut list, &mut patches).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_standalone_game_with_local_patch() {
        use crate::engine_instance::testing::{new_command_log, RecordingInstance};
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let degame = r#"<degame>
  <identifier>8cf8a8b1ef6b4b2bb9df3c10d9c4a2c6</identifier>
  <title>Example Quest</title>
  <gameDirectory>gamedata</gameDirectory>
  <dataDirectory>data</dataDirectory>
  <scriptDirectory>/scripts</scriptDirectory>
  <gameObject>App</gameObject>
  <pathConfig>/config</pathConfig>
  <pathCapture>/capture</pathCapture>
  <scriptModule>descript</scriptModule>
</degame>"#;
        let depatch = r#"<depatch>
  <identifier>11111111222233334444555555555555</identifier>
  <name>Update 1</name>
  <patchDir>patch1</patchDir>
  <dataDir>data</dataDir>
  <gameId>8cf8a8b1ef6b4b2bb9df3c10d9c4a2c6</gameId>
</depatch>"#;
        std::fs::write(dir.path().join("quest.degame"), degame).unwrap();
        std::fs::write(dir.path().join("quest.depatch"), depatch).unwrap();

        let log = new_command_log();
        let mut instance = RecordingInstance::new(log);
        let mut list = Vec::new();
        let mut patches = PatchManager::new();
        load_game_from_disk(
            &mut instance,
            &dir.path().join("quest.degame").to_string_lossy(),
            &mut list,
            &mut patches,
        )
        .unwrap();

        assert_eq!(list.len(), 1);
        let game = &list[0];
        // relative game directory resolves against the manifest location
        assert!(game.game_directory.ends_with("/gamedata"));
        assert!(std::path::Path::new(&game.game_directory).is_absolute());
        // the nearby patch is associated and registered
        assert_eq!(game.local_patches.len(), 1);
        assert_eq!(patches.patches().len(), 1);
    }

    #[test]
    fn test_duplicate_games_keep_first_sighting() {
        let mut manager = GameManager::new();
        let id = Uuid::new_v4();

        let mut first = Game {
            identifier: Some(id),
            title: "first".to_string(),
            ..Default::default()
        };
        first.set_default_log_file();
        manager.add_game(first);

        let second = Game {
            identifier: Some(id),
            title: "second".to_string(),
            ..Default::default()
        };
        manager.add_game(second);

        assert_eq!(manager.games().len(), 1);
        assert_eq!(manager.game_with_id(id).unwrap().title, "first");
    }

    #[test]
    fn test_legacy_profiles_inherit_default_vr() {
        let mut modules = EngineModuleList::new();
        modules
            .add(ready_module("openvr", "1.0", ModuleKind::Vr))
            .unwrap();

        let mut manager = GameManager::new();
        manager.profiles.add(Profile::named("old"));
        manager.create_default_profile(&modules, (1920, 1080));

        assert_eq!(
            manager.profiles.get_named("old").unwrap().module(ModuleKind::Vr).name,
            "openvr"
        );
        let default = manager.default_profile.as_ref().unwrap();
        assert_eq!(default.width, 1920);
        assert_eq!(default.height, 1080);
        assert!(default.full_screen);
    }
}
