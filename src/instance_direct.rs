//! In-process engine instance.
//!
//! Same public surface and semantics as the out-of-process instance, but
//! command handlers call the engine API directly and values travel as normal
//! function returns. The game loop runs on a dedicated thread so start,
//! polling and cooperative stop behave like the piped variant.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{error, info};

use crate::engine_api::{ActiveModuleParameters, EngineApi, QuitRequest};
use crate::engine_instance::{EngineInstance, EngineInstanceFactory};
use crate::engine_process::diff_parameters;
use crate::errors::{LauncherError, Result};
use crate::modules::ModuleParameter;
use crate::profiles::{ProfileModule, ProfileParameter};
use crate::protocol::{EngineProperty, Point};

/// Engine instance embedded in the launcher process.
pub struct DirectEngineInstance<E: EngineApi + 'static> {
    engine: Arc<Mutex<E>>,
    running: bool,
    quit: QuitRequest,
    game_thread: Option<JoinHandle<()>>,
    snapshot: Option<Vec<ActiveModuleParameters>>,
    drift: Option<Vec<ProfileModule>>,
}

impl<E: EngineApi + 'static> DirectEngineInstance<E> {
    pub fn new(engine: E) -> Self {
        DirectEngineInstance {
            engine: Arc::new(Mutex::new(engine)),
            running: false,
            quit: QuitRequest::new(),
            game_thread: None,
            snapshot: None,
            drift: None,
        }
    }

    fn engine(&self) -> Result<std::sync::MutexGuard<'_, E>> {
        if !self.running {
            return Err(LauncherError::invalid_state("engine instance is not running"));
        }
        Ok(self
            .engine
            .lock()
            .unwrap_or_else(|poison| poison.into_inner()))
    }

    /// Join the finished game thread and compute the parameter drift.
    fn collect_finished_game(&mut self) {
        let thread = match self.game_thread.take() {
            Some(thread) => thread,
            None => return,
        };
        let _ = thread.join();

        if let Some(before) = self.snapshot.take() {
            let after = self
                .engine
                .lock()
                .unwrap_or_else(|poison| poison.into_inner())
                .active_module_parameters();

            let mut drift: Vec<ProfileModule> = Vec::new();
            for (module, parameter, value) in diff_parameters(&before, &after) {
                match drift.iter_mut().find(|m| m.name == module) {
                    Some(entry) => entry.set_parameter(&parameter, &value),
                    None => drift.push(ProfileModule {
                        name: module,
                        parameters: vec![ProfileParameter {
                            name: parameter,
                            value,
                        }],
                    }),
                }
            }
            info!("game exited, collected {} drifted modules", drift.len());
            self.drift = Some(drift);
        }
    }
}

impl<E: EngineApi + 'static> EngineInstance for DirectEngineInstance<E> {
    fn start_engine(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn stop_engine(&mut self) {
        if self.game_thread.is_some() {
            self.quit.request();
            self.collect_finished_game();
        }
        self.running = false;
    }

    fn kill(&mut self) {
        // ask the loop to quit but do not wait for it
        self.quit.request();
        self.game_thread = None;
        self.snapshot = None;
        self.running = false;
    }

    fn is_engine_running(&self) -> bool {
        self.running
    }

    fn get_property(&mut self, property: EngineProperty) -> Result<String> {
        self.engine()?.engine_path(property)
    }

    fn load_modules(&mut self) -> Result<()> {
        self.engine()?.load_modules()
    }

    fn module_status(&mut self, name: &str, version: &str) -> Result<u16> {
        self.engine()?.module_error_code(name, version)
    }

    fn module_parameters(&mut self, name: &str, version: &str) -> Result<Vec<ModuleParameter>> {
        self.engine()?.module_parameters(name, version)
    }

    fn set_module_parameter(
        &mut self,
        name: &str,
        version: &str,
        parameter: &str,
        value: &str,
    ) -> Result<()> {
        self.engine()?
            .set_module_parameter(name, version, parameter, value)
    }

    fn activate_module(&mut self, name: &str, version: &str) -> Result<()> {
        self.engine()?.activate_module(name, version)
    }

    fn enable_module(&mut self, name: &str, version: &str, enable: bool) -> Result<()> {
        self.engine()?.enable_module(name, version, enable)
    }

    fn set_data_directory(&mut self, directory: &str) -> Result<()> {
        self.engine()?.set_data_directory(directory)
    }

    fn set_cache_app_id(&mut self, id: &str) -> Result<()> {
        self.engine()?.set_cache_app_id(id)
    }

    fn set_path_overlay(&mut self, path: &str) -> Result<()> {
        self.engine()?.set_path_overlay(path)
    }

    fn set_path_capture(&mut self, path: &str) -> Result<()> {
        self.engine()?.set_path_capture(path)
    }

    fn set_path_config(&mut self, path: &str) -> Result<()> {
        self.engine()?.set_path_config(path)
    }

    fn vfs_add_disk_dir(
        &mut self,
        vfs_root: &str,
        native_directory: &str,
        read_only: bool,
        hidden: &[String],
    ) -> Result<()> {
        self.engine()?
            .vfs_add_disk_dir(vfs_root, native_directory, read_only, hidden)
    }

    fn vfs_add_script_shared_data_dir(&mut self) -> Result<()> {
        self.engine()?.vfs_add_script_shared_data_dir()
    }

    fn vfs_add_delga_file(
        &mut self,
        delga_file: &str,
        archive_path: &str,
        hidden: &[String],
    ) -> Result<()> {
        self.engine()?
            .vfs_add_delga_file(delga_file, archive_path, hidden)
    }

    fn set_cmd_line_args(&mut self, arguments: &str) -> Result<()> {
        self.engine()?.add_cmd_line_args(arguments)
    }

    fn create_render_window(
        &mut self,
        width: u16,
        height: u16,
        full_screen: bool,
        title: &str,
        icon_path: &str,
    ) -> Result<()> {
        self.engine()?
            .create_render_window(width, height, full_screen, title, icon_path)
    }

    fn start_game(
        &mut self,
        script_directory: &str,
        script_version: &str,
        game_object: &str,
    ) -> Result<()> {
        if self.game_thread.is_some() {
            return Err(LauncherError::invalid_state("a game is already running"));
        }

        let snapshot = self.engine()?.active_module_parameters();
        self.snapshot = Some(snapshot);
        self.quit.reset();

        let engine = self.engine.clone();
        let quit = self.quit.clone();
        let script_directory = script_directory.to_string();
        let script_version = script_version.to_string();
        let game_object = game_object.to_string();

        self.game_thread = Some(thread::spawn(move || {
            let mut engine = engine.lock().unwrap_or_else(|poison| poison.into_inner());
            if let Err(err) =
                engine.run_game(&script_directory, &script_version, &game_object, &quit)
            {
                error!("Game loop failed: {}", err);
            }
        }));
        Ok(())
    }

    fn stop_game(&mut self) -> Result<()> {
        if self.game_thread.is_none() {
            return Err(LauncherError::invalid_state("no game is running"));
        }
        self.quit.request();
        Ok(())
    }

    fn is_game_running(&mut self) -> bool {
        match &self.game_thread {
            Some(thread) if !thread.is_finished() => true,
            Some(_) => {
                self.collect_finished_game();
                false
            }
            None => false,
        }
    }

    fn take_changed_parameters(&mut self) -> Option<Vec<ProfileModule>> {
        self.drift.take()
    }

    fn display_current_resolution(&mut self, display: u8) -> Result<Point> {
        self.engine()?.display_current_resolution(display)
    }

    fn display_resolutions(&mut self, display: u8) -> Result<Vec<Point>> {
        self.engine()?.display_resolutions(display)
    }

    fn read_delga_game_defs(&mut self, delga_file: &str) -> Result<Vec<String>> {
        self.engine()?.read_delga_game_defs(delga_file)
    }

    fn read_delga_patch_defs(&mut self, delga_file: &str) -> Result<Vec<String>> {
        self.engine()?.read_delga_patch_defs(delga_file)
    }

    fn read_delga_files(&mut self, delga_file: &str, names: &[String]) -> Result<Vec<Vec<u8>>> {
        self.engine()?.read_delga_files(delga_file, names)
    }
}

/// Factory for in-process instances; builds a fresh engine per instance.
pub struct DirectInstanceFactory<E, F>
where
    E: EngineApi + 'static,
    F: Fn() -> E + Send + Sync,
{
    build_engine: F,
}

impl<E, F> DirectInstanceFactory<E, F>
where
    E: EngineApi + 'static,
    F: Fn() -> E + Send + Sync,
{
    pub fn new(build_engine: F) -> Self {
        DirectInstanceFactory { build_engine }
    }
}

impl<E, F> EngineInstanceFactory for DirectInstanceFactory<E, F>
where
    E: EngineApi + 'static,
    F: Fn() -> E + Send + Sync,
{
    fn create_instance(&self, _log_file: &str) -> Result<Box<dyn EngineInstance>> {
        Ok(Box::new(DirectEngineInstance::new((self.build_engine)())))
    }
}
