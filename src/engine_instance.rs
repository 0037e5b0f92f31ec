//! Engine instance interface.
//!
//! A running embodiment of the engine is driven through this trait. Two
//! interchangeable implementations exist: the out-of-process instance
//! speaking the pipe protocol ([`crate::instance_process`]) and the
//! in-process instance calling the engine API directly
//! ([`crate::instance_direct`]). Which one a launcher uses is decided once,
//! at construction time, through the factory.

use crate::errors::Result;
use crate::modules::ModuleParameter;
use crate::profiles::ProfileModule;
use crate::protocol::{EngineProperty, Point};

/// Default executable started for out-of-process instances.
pub const DEFAULT_ENGINE_EXECUTABLE: &str = "delga-launcher-engine";

/// Full command surface of a running engine instance.
///
/// Commands are strictly serialized per instance: a call only returns once
/// the engine answered. An empty `version` argument selects the latest known
/// version of the module family.
pub trait EngineInstance: Send {
    /// Start the engine. Out-of-process: spawn the child and complete the
    /// handshake.
    fn start_engine(&mut self) -> Result<()>;

    /// Cooperatively shut the engine down, waiting bounded for the child to
    /// exit before falling back to a kill.
    fn stop_engine(&mut self);

    /// Preemptively terminate the engine. No further commands are accepted.
    fn kill(&mut self);

    fn is_engine_running(&self) -> bool;

    /// Native path the engine reports for `property`.
    fn get_property(&mut self, property: EngineProperty) -> Result<String>;

    fn load_modules(&mut self) -> Result<()>;

    /// Error code of a module after loading; `0` means usable.
    fn module_status(&mut self, name: &str, version: &str) -> Result<u16>;

    fn module_parameters(&mut self, name: &str, version: &str) -> Result<Vec<ModuleParameter>>;

    fn set_module_parameter(
        &mut self,
        name: &str,
        version: &str,
        parameter: &str,
        value: &str,
    ) -> Result<()>;

    fn activate_module(&mut self, name: &str, version: &str) -> Result<()>;

    fn enable_module(&mut self, name: &str, version: &str, enable: bool) -> Result<()>;

    fn set_data_directory(&mut self, directory: &str) -> Result<()>;

    fn set_cache_app_id(&mut self, id: &str) -> Result<()>;

    fn set_path_overlay(&mut self, path: &str) -> Result<()>;

    fn set_path_capture(&mut self, path: &str) -> Result<()>;

    fn set_path_config(&mut self, path: &str) -> Result<()>;

    fn vfs_add_disk_dir(
        &mut self,
        vfs_root: &str,
        native_directory: &str,
        read_only: bool,
        hidden: &[String],
    ) -> Result<()>;

    fn vfs_add_script_shared_data_dir(&mut self) -> Result<()>;

    fn vfs_add_delga_file(
        &mut self,
        delga_file: &str,
        archive_path: &str,
        hidden: &[String],
    ) -> Result<()>;

    fn set_cmd_line_args(&mut self, arguments: &str) -> Result<()>;

    fn create_render_window(
        &mut self,
        width: u16,
        height: u16,
        full_screen: bool,
        title: &str,
        icon_path: &str,
    ) -> Result<()>;

    /// Start the game. Returns once the engine acknowledged the start; the
    /// game itself keeps running and is observed through
    /// [`Self::is_game_running`].
    fn start_game(
        &mut self,
        script_directory: &str,
        script_version: &str,
        game_object: &str,
    ) -> Result<()>;

    /// Ask the running game to quit. The post-game exchange still happens
    /// through [`Self::is_game_running`].
    fn stop_game(&mut self) -> Result<()>;

    /// Poll the running game without blocking. Returns `false` once the game
    /// ended; at that point any reported parameter drift has been collected
    /// and the engine has been shut down.
    fn is_game_running(&mut self) -> bool;

    /// Module parameter drift reported by the last finished game, if any.
    /// Consumes the stored drift.
    fn take_changed_parameters(&mut self) -> Option<Vec<ProfileModule>>;

    fn display_current_resolution(&mut self, display: u8) -> Result<Point>;

    fn display_resolutions(&mut self, display: u8) -> Result<Vec<Point>>;

    /// Full text of every `*.degame` manifest inside the DELGA file.
    fn read_delga_game_defs(&mut self, delga_file: &str) -> Result<Vec<String>>;

    /// Full text of every `*.depatch` manifest inside the DELGA file.
    fn read_delga_patch_defs(&mut self, delga_file: &str) -> Result<Vec<String>>;

    /// Raw content of the named files inside the DELGA file. At most 255
    /// files per request.
    fn read_delga_files(&mut self, delga_file: &str, names: &[String]) -> Result<Vec<Vec<u8>>>;
}

/// Creates engine instances. The executable name for out-of-process
/// instances is process-wide configuration, fixed at construction.
pub trait EngineInstanceFactory: Send + Sync {
    /// Create a stopped instance logging to `log_file` (relative to the
    /// logs root).
    fn create_instance(&self, log_file: &str) -> Result<Box<dyn EngineInstance>>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording instance shared by the unit tests of several modules.

    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::errors::LauncherError;

    /// Command log shared between a test and the instances it hands out.
    pub type CommandLog = Arc<Mutex<Vec<String>>>;

    pub fn new_command_log() -> CommandLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    /// [`EngineInstance`] double that records every command as a readable
    /// line and answers from canned data.
    pub struct RecordingInstance {
        pub log: CommandLog,
        pub running: bool,
        pub properties: HashMap<EngineProperty, String>,
        pub module_parameters: HashMap<String, Vec<ModuleParameter>>,
        pub module_status: HashMap<(String, String), u16>,
        pub current_resolution: Point,
        pub resolutions: Vec<Point>,
        pub game_running_polls: VecDeque<bool>,
        pub drift: Option<Vec<ProfileModule>>,
        pub delga_game_defs: HashMap<String, Vec<String>>,
        pub delga_patch_defs: HashMap<String, Vec<String>>,
        pub delga_files: HashMap<String, Vec<u8>>,
    }

    impl RecordingInstance {
        pub fn new(log: CommandLog) -> Self {
            RecordingInstance {
                log,
                running: false,
                properties: HashMap::new(),
                module_parameters: HashMap::new(),
                module_status: HashMap::new(),
                current_resolution: Point::new(1920, 1080),
                resolutions: vec![Point::new(1920, 1080), Point::new(1280, 720)],
                game_running_polls: VecDeque::new(),
                drift: None,
                delga_game_defs: HashMap::new(),
                delga_patch_defs: HashMap::new(),
                delga_files: HashMap::new(),
            }
        }

        fn record(&self, line: String) {
            self.log.lock().unwrap().push(line);
        }
    }

    impl EngineInstance for RecordingInstance {
        fn start_engine(&mut self) -> Result<()> {
            self.record("start-engine".to_string());
            self.running = true;
            Ok(())
        }

        fn stop_engine(&mut self) {
            self.record("stop-engine".to_string());
            self.running = false;
        }

        fn kill(&mut self) {
            self.record("kill".to_string());
            self.running = false;
        }

        fn is_engine_running(&self) -> bool {
            self.running
        }

        fn get_property(&mut self, property: EngineProperty) -> Result<String> {
            self.record(format!("get-property {:?}", property));
            self.properties
                .get(&property)
                .cloned()
                .ok_or_else(|| LauncherError::not_found(format!("property {:?}", property)))
        }

        fn load_modules(&mut self) -> Result<()> {
            self.record("load-modules".to_string());
            Ok(())
        }

        fn module_status(&mut self, name: &str, version: &str) -> Result<u16> {
            self.record(format!("module-status {}:{}", name, version));
            Ok(self
                .module_status
                .get(&(name.to_string(), version.to_string()))
                .copied()
                .unwrap_or(0))
        }

        fn module_parameters(
            &mut self,
            name: &str,
            version: &str,
        ) -> Result<Vec<ModuleParameter>> {
            self.record(format!("module-parameters {}:{}", name, version));
            Ok(self.module_parameters.get(name).cloned().unwrap_or_default())
        }

        fn set_module_parameter(
            &mut self,
            name: &str,
            version: &str,
            parameter: &str,
            value: &str,
        ) -> Result<()> {
            self.record(format!(
                "set-module-parameter {}:{} {}={}",
                name, version, parameter, value
            ));
            Ok(())
        }

        fn activate_module(&mut self, name: &str, version: &str) -> Result<()> {
            self.record(format!("activate-module {}:{}", name, version));
            Ok(())
        }

        fn enable_module(&mut self, name: &str, version: &str, enable: bool) -> Result<()> {
            self.record(format!("enable-module {}:{} {}", name, version, enable));
            Ok(())
        }

        fn set_data_directory(&mut self, directory: &str) -> Result<()> {
            self.record(format!("set-data-dir {}", directory));
            Ok(())
        }

        fn set_cache_app_id(&mut self, id: &str) -> Result<()> {
            self.record(format!("set-cache-app-id {}", id));
            Ok(())
        }

        fn set_path_overlay(&mut self, path: &str) -> Result<()> {
            self.record(format!("set-path-overlay {}", path));
            Ok(())
        }

        fn set_path_capture(&mut self, path: &str) -> Result<()> {
            self.record(format!("set-path-capture {}", path));
            Ok(())
        }

        fn set_path_config(&mut self, path: &str) -> Result<()> {
            self.record(format!("set-path-config {}", path));
            Ok(())
        }

        fn vfs_add_disk_dir(
            &mut self,
            vfs_root: &str,
            native_directory: &str,
            read_only: bool,
            hidden: &[String],
        ) -> Result<()> {
            self.record(format!(
                "vfs-add-disk-dir {} {} ro={} hidden={}",
                vfs_root,
                native_directory,
                read_only,
                hidden.len()
            ));
            Ok(())
        }

        fn vfs_add_script_shared_data_dir(&mut self) -> Result<()> {
            self.record("vfs-add-script-shared-data-dir".to_string());
            Ok(())
        }

        fn vfs_add_delga_file(
            &mut self,
            delga_file: &str,
            archive_path: &str,
            hidden: &[String],
        ) -> Result<()> {
            self.record(format!(
                "vfs-add-delga-file {} {} hidden={}",
                delga_file,
                archive_path,
                hidden.len()
            ));
            Ok(())
        }

        fn set_cmd_line_args(&mut self, arguments: &str) -> Result<()> {
            self.record(format!("set-cmd-line-args {}", arguments));
            Ok(())
        }

        fn create_render_window(
            &mut self,
            width: u16,
            height: u16,
            full_screen: bool,
            title: &str,
            _icon_path: &str,
        ) -> Result<()> {
            self.record(format!(
                "create-render-window {}x{} fs={} title={}",
                width, height, full_screen, title
            ));
            Ok(())
        }

        fn start_game(
            &mut self,
            script_directory: &str,
            script_version: &str,
            game_object: &str,
        ) -> Result<()> {
            self.record(format!(
                "start-game {} {} {}",
                script_directory, script_version, game_object
            ));
            Ok(())
        }

        fn stop_game(&mut self) -> Result<()> {
            self.record("stop-game".to_string());
            Ok(())
        }

        fn is_game_running(&mut self) -> bool {
            self.game_running_polls.pop_front().unwrap_or(false)
        }

        fn take_changed_parameters(&mut self) -> Option<Vec<ProfileModule>> {
            self.drift.take()
        }

        fn display_current_resolution(&mut self, _display: u8) -> Result<Point> {
            Ok(self.current_resolution)
        }

        fn display_resolutions(&mut self, _display: u8) -> Result<Vec<Point>> {
            Ok(self.resolutions.clone())
        }

        fn read_delga_game_defs(&mut self, delga_file: &str) -> Result<Vec<String>> {
            self.record(format!("read-delga-game-defs {}", delga_file));
            Ok(self
                .delga_game_defs
                .get(delga_file)
                .cloned()
                .unwrap_or_default())
        }

        fn read_delga_patch_defs(&mut self, delga_file: &str) -> Result<Vec<String>> {
            self.record(format!("read-delga-patch-defs {}", delga_file));
            Ok(self
                .delga_patch_defs
                .get(delga_file)
                .cloned()
                .unwrap_or_default())
        }

        fn read_delga_files(
            &mut self,
            delga_file: &str,
            names: &[String],
        ) -> Result<Vec<Vec<u8>>> {
            self.record(format!("read-delga-files {} {}", delga_file, names.len()));
            names
                .iter()
                .map(|name| {
                    self.delga_files
                        .get(name)
                        .cloned()
                        .ok_or_else(|| LauncherError::not_found(name.clone()))
                })
                .collect()
        }
    }
}
