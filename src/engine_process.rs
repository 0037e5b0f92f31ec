//! Child-side engine process: command dispatch over the control pipes.
//!
//! The launcher spawns one engine process per running game. The process
//! reads commands from its input pipe, drives the engine through
//! [`EngineApi`] and answers every command with a status byte. Failures are
//! translated into status `1`; they never cross the pipe as anything else.
//!
//! While a game runs, a watcher thread reads the input pipe. It accepts only
//! `stop-game`, which it turns into a cooperative quit request for the
//! engine's main loop. When the game loop exits the process reports the
//! module parameter drift, waits for a one-byte acknowledgement and shuts
//! down.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use log::{error, info};

use crate::engine_api::{ActiveModuleParameters, EngineApi, QuitRequest};
use crate::errors::Result;
use crate::protocol::{
    Command, EngineProperty, WireRead, WireWrite, FLAG_USE_CONSOLE, STATUS_FAILED,
    STATUS_GAME_EXITED, STATUS_SUCCESS, SYNC_BYTE,
};

/// Handshake data received from the parent before the command loop starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Native path of the log file; empty means log to the console.
    pub log_file: String,
    pub use_console: bool,
}

/// Read the handshake (u16-length log file path, flags byte) and answer the
/// sync byte. Only then is the instance considered started by the parent.
pub fn read_handshake<R: Read, W: Write>(pipe_in: &mut R, pipe_out: &mut W) -> Result<Handshake> {
    let log_file = pipe_in.read_string16()?;
    let flags = pipe_in.read_u8_le()?;
    pipe_out.write_u8_le(SYNC_BYTE)?;
    pipe_out.flush()?;
    Ok(Handshake {
        log_file,
        use_console: flags & FLAG_USE_CONSOLE != 0,
    })
}

/// The engine process command loop.
pub struct EngineProcess<E: EngineApi, R: Read + Send + 'static, W: Write + Send + 'static> {
    pipe_in: R,
    pipe_out: W,
    /// Duplicates of the pipe ends for the in-game watcher thread.
    watch_in: Option<R>,
    watch_out: Option<W>,
    engine: E,
    stop_process: bool,
}

impl<E: EngineApi, R: Read + Send + 'static, W: Write + Send + 'static> EngineProcess<E, R, W> {
    /// Create the process loop. `watch_in`/`watch_out` must reference the
    /// same pipes as `pipe_in`/`pipe_out` (duplicated handles); they are
    /// consumed by the watcher thread of the first started game.
    pub fn new(pipe_in: R, pipe_out: W, watch_in: R, watch_out: W, engine: E) -> Self {
        EngineProcess {
            pipe_in,
            pipe_out,
            watch_in: Some(watch_in),
            watch_out: Some(watch_out),
            engine,
            stop_process: false,
        }
    }

    /// Read commands from the input pipe until told to stop or the pipe
    /// closes. Losing the pipe is fatal to the instance.
    pub fn run(mut self) -> Result<()> {
        while !self.stop_process {
            let tag = self.pipe_in.read_u8_le()?;
            self.dispatch(tag)?;
        }
        Ok(())
    }

    /// Errors returned here are pipe-level and abort the process; command
    /// handlers answer their own failures with a status byte instead.
    fn dispatch(&mut self, tag: u8) -> Result<()> {
        let command = match Command::from_tag(tag) {
            Some(command) => command,
            None => {
                error!("Received unknown command {}", tag);
                self.pipe_out.write_status(STATUS_FAILED)?;
                self.pipe_out.flush()?;
                return Ok(());
            }
        };
        info!("Received command {:?}", command);

        let result = match command {
            Command::StopProcess => {
                self.stop_process = true;
                Ok(())
            }
            Command::GetProperty => self.command_get_property(),
            Command::LoadModules => {
                let result = self.engine.load_modules();
                self.answer_empty(result, "load-modules")
            }
            Command::GetModuleStatus => self.command_get_module_status(),
            Command::GetModuleParamList => self.command_get_module_param_list(),
            Command::SetModuleParameter => self.command_set_module_parameter(),
            Command::ActivateModule => self.command_activate_module(),
            Command::EnableModule => self.command_enable_module(),
            Command::SetDataDir => {
                let directory = self.pipe_in.read_string16()?;
                let result = self.engine.set_data_directory(&directory);
                self.answer_empty(result, "set-data-dir")
            }
            Command::SetCacheAppId => {
                let id = self.pipe_in.read_string16()?;
                let result = self.engine.set_cache_app_id(&id);
                self.answer_empty(result, "set-cache-app-id")
            }
            Command::VfsAddDiskDir => self.command_vfs_add_disk_dir(),
            Command::VfsAddScriptSharedDataDir => {
                let result = self.engine.vfs_add_script_shared_data_dir();
                self.answer_empty(result, "vfs-add-script-shared-data-dir")
            }
            Command::VfsAddDelgaFile => self.command_vfs_add_delga_file(),
            Command::SetCmdLineArgs => {
                let arguments = self.pipe_in.read_string16()?;
                let result = self.engine.add_cmd_line_args(&arguments);
                self.answer_empty(result, "set-cmd-line-args")
            }
            Command::CreateRenderWindow => self.command_create_render_window(),
            Command::StartGame => self.command_start_game(),
            Command::StopGame => {
                // no game is running; the in-game path is handled elsewhere
                error!("Received stop-game with no game running");
                self.pipe_out.write_status(STATUS_FAILED)
            }
            Command::GetDisplayCurrentResolution => self.command_get_display_current_resolution(),
            Command::GetDisplayResolutions => self.command_get_display_resolutions(),
            Command::ReadDelgaGameDefs => self.command_read_delga_defs(false),
            Command::ReadDelgaPatchDefs => self.command_read_delga_defs(true),
            Command::ReadDelgaFiles => self.command_read_delga_files(),
            Command::SetPathOverlay => {
                let path = self.pipe_in.read_string16()?;
                let result = self.engine.set_path_overlay(&path);
                self.answer_empty(result, "set-path-overlay")
            }
            Command::SetPathCapture => {
                let path = self.pipe_in.read_string16()?;
                let result = self.engine.set_path_capture(&path);
                self.answer_empty(result, "set-path-capture")
            }
            Command::SetPathConfig => {
                let path = self.pipe_in.read_string16()?;
                let result = self.engine.set_path_config(&path);
                self.answer_empty(result, "set-path-config")
            }
        };
        self.pipe_out.flush()?;
        result
    }

    /// Answer a payload-free command.
    fn answer_empty(&mut self, result: Result<()>, what: &str) -> Result<()> {
        match result {
            Ok(()) => self.pipe_out.write_status(STATUS_SUCCESS),
            Err(err) => {
                error!("Command {} failed: {}", what, err);
                self.pipe_out.write_status(STATUS_FAILED)
            }
        }
    }

    fn command_get_property(&mut self) -> Result<()> {
        let tag = self.pipe_in.read_u8_le()?;
        let value = EngineProperty::from_tag(tag)
            .ok_or(())
            .and_then(|property| self.engine.engine_path(property).map_err(|err| {
                error!("Command get-property failed: {}", err);
            }));
        match value {
            Ok(value) => {
                self.pipe_out.write_status(STATUS_SUCCESS)?;
                self.pipe_out.write_string16(&value)
            }
            Err(()) => self.pipe_out.write_status(STATUS_FAILED),
        }
    }

    fn command_get_module_status(&mut self) -> Result<()> {
        let name = self.pipe_in.read_string16()?;
        let version = self.pipe_in.read_string16()?;
        match self.engine.module_error_code(&name, &version) {
            Ok(code) => {
                self.pipe_out.write_status(STATUS_SUCCESS)?;
                self.pipe_out.write_u16_le(code)
            }
            Err(err) => {
                error!("Command get-module-status '{}':{} failed: {}", name, version, err);
                self.pipe_out.write_status(STATUS_FAILED)
            }
        }
    }

    fn command_get_module_param_list(&mut self) -> Result<()> {
        let name = self.pipe_in.read_string16()?;
        let version = self.pipe_in.read_string16()?;
        let parameters = match self.engine.module_parameters(&name, &version) {
            Ok(parameters) => parameters,
            Err(err) => {
                error!(
                    "Command get-module-param-list '{}':{} failed: {}",
                    name, version, err
                );
                return self.pipe_out.write_status(STATUS_FAILED);
            }
        };

        self.pipe_out.write_status(STATUS_SUCCESS)?;
        self.pipe_out.write_u16_le(parameters.len() as u16)?;
        for parameter in &parameters {
            let info = &parameter.info;
            self.pipe_out.write_string16(&info.name)?;
            self.pipe_out.write_string16(&info.description)?;
            self.pipe_out.write_u8_le(info.parameter_type as u8)?;
            self.pipe_out.write_f32_le(info.minimum)?;
            self.pipe_out.write_f32_le(info.maximum)?;
            self.pipe_out.write_f32_le(info.step)?;
            self.pipe_out.write_u8_le(info.category as u8)?;
            self.pipe_out.write_string16(&info.display_name)?;
            self.pipe_out.write_string16(&info.default_value)?;
            self.pipe_out
                .write_u16_le(info.selection_entries.len() as u16)?;
            for entry in &info.selection_entries {
                self.pipe_out.write_string16(&entry.value)?;
                self.pipe_out.write_string16(&entry.display_name)?;
                self.pipe_out.write_string16(&entry.description)?;
            }
            self.pipe_out.write_string16(&parameter.value)?;
        }
        Ok(())
    }

    fn command_set_module_parameter(&mut self) -> Result<()> {
        let name = self.pipe_in.read_string16()?;
        let version = self.pipe_in.read_string16()?;
        let parameter = self.pipe_in.read_string16()?;
        let value = self.pipe_in.read_string16()?;
        let result = self
            .engine
            .set_module_parameter(&name, &version, &parameter, &value);
        self.answer_empty(result, "set-module-parameter")
    }

    fn command_activate_module(&mut self) -> Result<()> {
        let name = self.pipe_in.read_string16()?;
        let version = self.pipe_in.read_string16()?;
        let result = self.engine.activate_module(&name, &version);
        self.answer_empty(result, "activate-module")
    }

    fn command_enable_module(&mut self) -> Result<()> {
        let name = self.pipe_in.read_string16()?;
        let version = self.pipe_in.read_string16()?;
        let enable = self.pipe_in.read_u8_le()? != 0;
        let result = self.engine.enable_module(&name, &version, enable);
        self.answer_empty(result, "enable-module")
    }

    fn command_vfs_add_disk_dir(&mut self) -> Result<()> {
        let root = self.pipe_in.read_string16()?;
        let directory = self.pipe_in.read_string16()?;
        let read_only = self.pipe_in.read_u8_le()? != 0;
        let hidden = self.read_hidden_paths()?;
        let result = self
            .engine
            .vfs_add_disk_dir(&root, &directory, read_only, &hidden);
        self.answer_empty(result, "vfs-add-disk-dir")
    }

    fn command_vfs_add_delga_file(&mut self) -> Result<()> {
        let delga_file = self.pipe_in.read_string16()?;
        let archive_path = self.pipe_in.read_string16()?;
        let hidden = self.read_hidden_paths()?;
        let result = self
            .engine
            .vfs_add_delga_file(&delga_file, &archive_path, &hidden);
        self.answer_empty(result, "vfs-add-delga-file")
    }

    fn read_hidden_paths(&mut self) -> Result<Vec<String>> {
        let count = self.pipe_in.read_u16_le()? as usize;
        let mut hidden = Vec::with_capacity(count);
        for _ in 0..count {
            hidden.push(self.pipe_in.read_string16()?);
        }
        Ok(hidden)
    }

    fn command_create_render_window(&mut self) -> Result<()> {
        let width = self.pipe_in.read_u16_le()?;
        let height = self.pipe_in.read_u16_le()?;
        let full_screen = self.pipe_in.read_u8_le()? != 0;
        let title = self.pipe_in.read_string16()?;
        let icon_path = self.pipe_in.read_string16()?;
        let result = self
            .engine
            .create_render_window(width, height, full_screen, &title, &icon_path);
        self.answer_empty(result, "create-render-window")
    }

    fn command_get_display_current_resolution(&mut self) -> Result<()> {
        let display = self.pipe_in.read_u8_le()?;
        match self.engine.display_current_resolution(display) {
            Ok(resolution) => {
                self.pipe_out.write_status(STATUS_SUCCESS)?;
                self.pipe_out.write_point(resolution)
            }
            Err(err) => {
                error!("Command get-display-current-resolution failed: {}", err);
                self.pipe_out.write_status(STATUS_FAILED)
            }
        }
    }

    fn command_get_display_resolutions(&mut self) -> Result<()> {
        let display = self.pipe_in.read_u8_le()?;
        let max_count = self.pipe_in.read_u8_le()? as usize;
        let resolutions = match self.engine.display_resolutions(display) {
            Ok(resolutions) => resolutions,
            Err(err) => {
                error!("Command get-display-resolutions failed: {}", err);
                return self.pipe_out.write_status(STATUS_FAILED);
            }
        };

        if max_count == 0 {
            self.pipe_out.write_status(STATUS_SUCCESS)?;
            return self.pipe_out.write_u8_le(resolutions.len() as u8);
        }
        if max_count < resolutions.len() {
            error!("Command get-display-resolutions: caller buffer too small");
            return self.pipe_out.write_status(STATUS_FAILED);
        }

        self.pipe_out.write_status(STATUS_SUCCESS)?;
        self.pipe_out.write_u8_le(resolutions.len() as u8)?;
        for resolution in resolutions {
            self.pipe_out.write_point(resolution)?;
        }
        Ok(())
    }

    fn command_read_delga_defs(&mut self, patches: bool) -> Result<()> {
        let delga_file = self.pipe_in.read_string16()?;
        let definitions = if patches {
            self.engine.read_delga_patch_defs(&delga_file)
        } else {
            self.engine.read_delga_game_defs(&delga_file)
        };
        match definitions {
            Ok(definitions) => {
                self.pipe_out.write_status(STATUS_SUCCESS)?;
                self.pipe_out.write_u16_le(definitions.len() as u16)?;
                for definition in definitions {
                    self.pipe_out.write_string16(&definition)?;
                }
                Ok(())
            }
            Err(err) => {
                error!("Command read-delga-defs '{}' failed: {}", delga_file, err);
                self.pipe_out.write_status(STATUS_FAILED)
            }
        }
    }

    fn command_read_delga_files(&mut self) -> Result<()> {
        let delga_file = self.pipe_in.read_string16()?;
        let count = self.pipe_in.read_u8_le()? as usize;
        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            names.push(self.pipe_in.read_string16()?);
        }

        match self.engine.read_delga_files(&delga_file, &names) {
            Ok(contents) => {
                self.pipe_out.write_status(STATUS_SUCCESS)?;
                self.pipe_out.write_u8_le(contents.len() as u8)?;
                for content in contents {
                    self.pipe_out.write_i32_le(content.len() as i32)?;
                    self.pipe_out.write_all(&content)?;
                }
                Ok(())
            }
            Err(err) => {
                error!("Command read-delga-files '{}' failed: {}", delga_file, err);
                self.pipe_out.write_status(STATUS_FAILED)
            }
        }
    }

    /// The start-game sub-protocol.
    ///
    /// Acknowledge the start, snapshot the parameters of every active
    /// single-instance module, run the game loop with a watcher thread on
    /// the input pipe, then report parameter drift and wait for the
    /// acknowledgement. Afterwards the process shuts down.
    fn command_start_game(&mut self) -> Result<()> {
        let script_directory = self.pipe_in.read_string16()?;
        let script_version = self.pipe_in.read_string16()?;
        let game_object = self.pipe_in.read_string16()?;

        let (watch_in, watch_out) = match (self.watch_in.take(), self.watch_out.take()) {
            (Some(watch_in), Some(watch_out)) => (watch_in, watch_out),
            _ => {
                error!("Command start-game: a game already ran in this process");
                return self.pipe_out.write_status(STATUS_FAILED);
            }
        };

        info!("start-game: launching in-pipe processing thread");
        self.pipe_out.write_status(STATUS_SUCCESS)?;
        self.pipe_out.flush()?;

        // parameters before the game runs, to diff against on exit
        let snapshot = self.engine.active_module_parameters();

        let quit = QuitRequest::new();
        let stop_requested = Arc::new(AtomicBool::new(false));
        let game_over = Arc::new(AtomicBool::new(false));
        let (forward_tx, forward_rx) = mpsc::channel::<u8>();

        let watcher = spawn_watcher(
            watch_in,
            watch_out,
            quit.clone(),
            stop_requested.clone(),
            game_over.clone(),
            forward_tx,
        );

        info!("start-game: launching game");
        if let Err(err) =
            self.engine
                .run_game(&script_directory, &script_version, &game_object, &quit)
        {
            error!("Game loop failed: {}", err);
        }
        info!("start-game: game exited, stopping in-pipe processing thread");

        game_over.store(true, Ordering::SeqCst);
        let was_stop_requested = stop_requested.load(Ordering::SeqCst);

        // stop-game requires its own reply before the drift report
        if was_stop_requested {
            self.pipe_out.write_status(STATUS_SUCCESS)?;
        }

        info!("start-game: sending module parameter changes");
        self.pipe_out.write_status(STATUS_GAME_EXITED)?;
        let after = self.engine.active_module_parameters();
        for (module, parameter, value) in diff_parameters(&snapshot, &after) {
            self.pipe_out.write_string16(&module)?;
            self.pipe_out.write_string16(&parameter)?;
            self.pipe_out.write_string16(&value)?;
        }
        self.pipe_out.write_string16("")?; // end of list marker
        self.pipe_out.flush()?;

        // wait for the acknowledgement; the watcher forwards it from the
        // pipe regardless of how the game ended
        info!("start-game: waiting for acknowledge");
        forward_rx
            .recv()
            .map_err(|_| crate::errors::LauncherError::protocol("pipe closed before acknowledge"))?;
        let _ = watcher.join();

        info!("start-game: acknowledge received, exiting process");
        self.stop_process = true;
        Ok(())
    }
}

/// Spawn the in-game pipe watcher.
///
/// Before the game ends it accepts only `stop-game` (anything else is
/// answered with a failure status); the first byte after the game ended is
/// the parent's acknowledgement, which it forwards to the main thread
/// before exiting. Keeping the watcher on the pipe for the whole exchange
/// avoids a race between a stop request and the game quitting on its own.
fn spawn_watcher<R: Read + Send + 'static, W: Write + Send + 'static>(
    mut pipe_in: R,
    mut pipe_out: W,
    quit: QuitRequest,
    stop_requested: Arc<AtomicBool>,
    game_over: Arc<AtomicBool>,
    forward: mpsc::Sender<u8>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        let byte = match pipe_in.read_u8_le() {
            Ok(byte) => byte,
            Err(_) => return,
        };

        if game_over.load(Ordering::SeqCst) {
            let _ = forward.send(byte);
            return;
        }

        if byte == Command::StopGame as u8 {
            // raising the quit flag is thread safe; the engine main loop
            // notices it at its own pace
            stop_requested.store(true, Ordering::SeqCst);
            quit.request();
            continue;
        }

        let _ = pipe_out.write_status(STATUS_FAILED);
    })
}

/// Changed parameters between two snapshots as (module, parameter, value)
/// tuples.
pub(crate) fn diff_parameters(
    before: &[ActiveModuleParameters],
    after: &[ActiveModuleParameters],
) -> Vec<(String, String, String)> {
    let mut changes = Vec::new();
    for old in before {
        let new = match after.iter().find(|m| m.module_name == old.module_name) {
            Some(new) => new,
            None => continue,
        };
        let new_values: HashMap<&str, &str> = new
            .parameters
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();

        for (name, old_value) in &old.parameters {
            if let Some(new_value) = new_values.get(name.as_str()) {
                if *new_value != old_value {
                    changes.push((
                        old.module_name.clone(),
                        name.clone(),
                        new_value.to_string(),
                    ));
                }
            }
        }
    }
    changes
}
