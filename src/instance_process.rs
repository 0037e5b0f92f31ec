//! Out-of-process engine instance.
//!
//! Spawns the engine executable with its stdin/stdout replaced by the
//! control pipes, performs the handshake and then drives the command
//! protocol: strictly serialized request/reply per command, a non-blocking
//! readable check while a game runs, and the post-game drift exchange. Any
//! pipe-level failure is fatal to the instance and triggers a kill.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command as ProcessCommand, Stdio};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::engine_instance::{EngineInstance, EngineInstanceFactory};
use crate::errors::{LauncherError, Result};
use crate::modules::{
    ModuleParameter, ParameterCategory, ParameterInfo, ParameterType, SelectionEntry,
};
use crate::profiles::{ProfileModule, ProfileParameter};
use crate::protocol::{
    expect_success, Command, EngineProperty, Point, WireRead, WireWrite, FLAG_USE_CONSOLE,
    STATUS_GAME_EXITED, STATUS_SUCCESS, SYNC_BYTE,
};

/// How long a cooperative stop may take before the child is killed.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Client side of the command protocol over a pair of pipe ends.
///
/// Generic over the transports so the same code drives a spawned child and
/// the in-process pipe pair used by tests.
pub(crate) struct Exchange<'a, W: Write, R: Read> {
    writer: &'a mut W,
    reader: &'a mut R,
}

impl<'a, W: Write, R: Read> Exchange<'a, W, R> {
    pub fn new(writer: &'a mut W, reader: &'a mut R) -> Self {
        Exchange { writer, reader }
    }

    fn command(&mut self, command: Command) -> Result<()> {
        self.writer.write_u8_le(command as u8)?;
        Ok(())
    }

    fn finish(&mut self, command: &str) -> Result<()> {
        self.writer.flush()?;
        let status = self.reader.read_u8_le()?;
        expect_success(status, command)
    }

    /// Parent half of the handshake: send the log file path and flags, wait
    /// for the sync byte.
    pub fn handshake(&mut self, log_file: &str, use_console: bool) -> Result<()> {
        self.writer.write_string16(log_file)?;
        let mut flags = 0u8;
        if use_console {
            flags |= FLAG_USE_CONSOLE;
        }
        self.writer.write_u8_le(flags)?;
        self.writer.flush()?;

        let sync = self.reader.read_u8_le()?;
        if sync != SYNC_BYTE {
            return Err(LauncherError::protocol(format!(
                "handshake sync value invalid: {}",
                sync
            )));
        }
        Ok(())
    }

    pub fn stop_process(&mut self) -> Result<()> {
        self.command(Command::StopProcess)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn get_property(&mut self, property: EngineProperty) -> Result<String> {
        self.command(Command::GetProperty)?;
        self.writer.write_u8_le(property as u8)?;
        self.finish("get-property")?;
        self.reader.read_string16()
    }

    pub fn load_modules(&mut self) -> Result<()> {
        self.command(Command::LoadModules)?;
        self.finish("load-modules")
    }

    pub fn module_status(&mut self, name: &str, version: &str) -> Result<u16> {
        self.command(Command::GetModuleStatus)?;
        self.writer.write_string16(name)?;
        self.writer.write_string16(version)?;
        self.finish("get-module-status")?;
        self.reader.read_u16_le()
    }

    pub fn module_parameters(&mut self, name: &str, version: &str) -> Result<Vec<ModuleParameter>> {
        self.command(Command::GetModuleParamList)?;
        self.writer.write_string16(name)?;
        self.writer.write_string16(version)?;
        self.finish("get-module-param-list")?;

        let count = self.reader.read_u16_le()? as usize;
        let mut parameters = Vec::with_capacity(count);
        for index in 0..count {
            let mut info = ParameterInfo {
                name: self.reader.read_string16()?,
                description: self.reader.read_string16()?,
                parameter_type: ParameterType::from_tag(self.reader.read_u8_le()?),
                minimum: self.reader.read_f32_le()?,
                maximum: self.reader.read_f32_le()?,
                step: self.reader.read_f32_le()?,
                category: ParameterCategory::from_tag(self.reader.read_u8_le()?),
                display_name: self.reader.read_string16()?,
                default_value: self.reader.read_string16()?,
                selection_entries: Vec::new(),
            };
            let entry_count = self.reader.read_u16_le()? as usize;
            for _ in 0..entry_count {
                info.selection_entries.push(SelectionEntry {
                    value: self.reader.read_string16()?,
                    display_name: self.reader.read_string16()?,
                    description: self.reader.read_string16()?,
                });
            }
            let value = self.reader.read_string16()?;
            parameters.push(ModuleParameter { index, info, value });
        }
        Ok(parameters)
    }

    pub fn set_module_parameter(
        &mut self,
        name: &str,
        version: &str,
        parameter: &str,
        value: &str,
    ) -> Result<()> {
        self.command(Command::SetModuleParameter)?;
        self.writer.write_string16(name)?;
        self.writer.write_string16(version)?;
        self.writer.write_string16(parameter)?;
        self.writer.write_string16(value)?;
        self.finish("set-module-parameter")
    }

    pub fn activate_module(&mut self, name: &str, version: &str) -> Result<()> {
        self.command(Command::ActivateModule)?;
        self.writer.write_string16(name)?;
        self.writer.write_string16(version)?;
        self.finish("activate-module")
    }

    pub fn enable_module(&mut self, name: &str, version: &str, enable: bool) -> Result<()> {
        self.command(Command::EnableModule)?;
        self.writer.write_string16(name)?;
        self.writer.write_string16(version)?;
        self.writer.write_u8_le(if enable { 1 } else { 0 })?;
        self.finish("enable-module")
    }

    pub fn set_data_directory(&mut self, directory: &str) -> Result<()> {
        self.command(Command::SetDataDir)?;
        self.writer.write_string16(directory)?;
        self.finish("set-data-dir")
    }

    pub fn set_cache_app_id(&mut self, id: &str) -> Result<()> {
        self.command(Command::SetCacheAppId)?;
        self.writer.write_string16(id)?;
        self.finish("set-cache-app-id")
    }

    pub fn set_path(&mut self, command: Command, path: &str, what: &str) -> Result<()> {
        self.command(command)?;
        self.writer.write_string16(path)?;
        self.finish(what)
    }

    pub fn vfs_add_disk_dir(
        &mut self,
        vfs_root: &str,
        native_directory: &str,
        read_only: bool,
        hidden: &[String],
    ) -> Result<()> {
        self.command(Command::VfsAddDiskDir)?;
        self.writer.write_string16(vfs_root)?;
        self.writer.write_string16(native_directory)?;
        self.writer.write_u8_le(if read_only { 1 } else { 0 })?;
        self.write_hidden_paths(hidden)?;
        self.finish("vfs-add-disk-dir")
    }

    pub fn vfs_add_script_shared_data_dir(&mut self) -> Result<()> {
        self.command(Command::VfsAddScriptSharedDataDir)?;
        self.finish("vfs-add-script-shared-data-dir")
    }

    pub fn vfs_add_delga_file(
        &mut self,
        delga_file: &str,
        archive_path: &str,
        hidden: &[String],
    ) -> Result<()> {
        self.command(Command::VfsAddDelgaFile)?;
        self.writer.write_string16(delga_file)?;
        self.writer.write_string16(archive_path)?;
        self.write_hidden_paths(hidden)?;
        self.finish("vfs-add-delga-file")
    }

    fn write_hidden_paths(&mut self, hidden: &[String]) -> Result<()> {
        if hidden.len() > u16::MAX as usize {
            return Err(LauncherError::protocol("too many hidden paths"));
        }
        self.writer.write_u16_le(hidden.len() as u16)?;
        for path in hidden {
            self.writer.write_string16(path)?;
        }
        Ok(())
    }

    pub fn set_cmd_line_args(&mut self, arguments: &str) -> Result<()> {
        self.command(Command::SetCmdLineArgs)?;
        self.writer.write_string16(arguments)?;
        self.finish("set-cmd-line-args")
    }

    pub fn create_render_window(
        &mut self,
        width: u16,
        height: u16,
        full_screen: bool,
        title: &str,
        icon_path: &str,
    ) -> Result<()> {
        self.command(Command::CreateRenderWindow)?;
        self.writer.write_u16_le(width)?;
        self.writer.write_u16_le(height)?;
        self.writer.write_u8_le(if full_screen { 1 } else { 0 })?;
        self.writer.write_string16(title)?;
        self.writer.write_string16(icon_path)?;
        self.finish("create-render-window")
    }

    pub fn start_game(
        &mut self,
        script_directory: &str,
        script_version: &str,
        game_object: &str,
    ) -> Result<()> {
        self.command(Command::StartGame)?;
        self.writer.write_string16(script_directory)?;
        self.writer.write_string16(script_version)?;
        self.writer.write_string16(game_object)?;
        self.finish("start-game")
    }

    pub fn display_current_resolution(&mut self, display: u8) -> Result<Point> {
        self.command(Command::GetDisplayCurrentResolution)?;
        self.writer.write_u8_le(display)?;
        self.finish("get-display-current-resolution")?;
        self.reader.read_point()
    }

    pub fn display_resolutions(&mut self, display: u8) -> Result<Vec<Point>> {
        // first ask for the count, then fetch the full list
        self.command(Command::GetDisplayResolutions)?;
        self.writer.write_u8_le(display)?;
        self.writer.write_u8_le(0)?;
        self.finish("get-display-resolutions")?;
        let total = self.reader.read_u8_le()?;
        if total == 0 {
            return Ok(Vec::new());
        }

        self.command(Command::GetDisplayResolutions)?;
        self.writer.write_u8_le(display)?;
        self.writer.write_u8_le(total)?;
        self.finish("get-display-resolutions")?;
        let count = self.reader.read_u8_le()? as usize;
        if count > total as usize {
            return Err(LauncherError::protocol(
                "engine reported more resolutions than announced",
            ));
        }
        let mut resolutions = Vec::with_capacity(count);
        for _ in 0..count {
            resolutions.push(self.reader.read_point()?);
        }
        Ok(resolutions)
    }

    pub fn read_delga_defs(&mut self, command: Command, delga_file: &str) -> Result<Vec<String>> {
        self.command(command)?;
        self.writer.write_string16(delga_file)?;
        self.finish("read-delga-defs")?;

        let count = self.reader.read_u16_le()? as usize;
        let mut definitions = Vec::with_capacity(count);
        for _ in 0..count {
            definitions.push(self.reader.read_string16()?);
        }
        Ok(definitions)
    }

    pub fn read_delga_files(
        &mut self,
        delga_file: &str,
        names: &[String],
    ) -> Result<Vec<Vec<u8>>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        if names.len() > crate::defaults::MAX_DELGA_READ_FILES {
            return Err(LauncherError::protocol(
                "at most 255 files per read-delga-files request",
            ));
        }

        self.command(Command::ReadDelgaFiles)?;
        self.writer.write_string16(delga_file)?;
        self.writer.write_u8_le(names.len() as u8)?;
        for name in names {
            self.writer.write_string16(name)?;
        }
        self.finish("read-delga-files")?;

        let count = self.reader.read_u8_le()? as usize;
        let mut contents = Vec::with_capacity(count);
        for _ in 0..count {
            let length = self.reader.read_i32_le()?;
            if length < 0 {
                return Err(LauncherError::protocol("negative file length"));
            }
            contents.push(self.reader.read_blob(length as usize)?);
        }
        Ok(contents)
    }

    pub fn stop_game(&mut self) -> Result<u8> {
        self.command(Command::StopGame)?;
        self.writer.flush()?;
        self.reader.read_u8_le()
    }

    /// Read the drift records after the game-exited marker: repeated
    /// (module, parameter, value) string triples, terminated by an empty
    /// module name, then acknowledge with one byte so the child may exit.
    pub fn read_drift(&mut self) -> Result<Vec<ProfileModule>> {
        let mut drift: Vec<ProfileModule> = Vec::new();

        loop {
            let module_name = self.reader.read_string16()?;
            if module_name.is_empty() {
                break; // end of list marker
            }
            let parameter = self.reader.read_string16()?;
            let value = self.reader.read_string16()?;

            match drift.iter_mut().find(|m| m.name == module_name) {
                Some(module) => module.set_parameter(&parameter, &value),
                None => drift.push(ProfileModule {
                    name: module_name,
                    parameters: vec![ProfileParameter {
                        name: parameter,
                        value,
                    }],
                }),
            }
        }

        // any byte signals the child it may exit now
        self.writer.write_u8_le(1)?;
        self.writer.flush()?;
        Ok(drift)
    }

    /// One game-exited marker byte, when available.
    pub fn read_exit_marker(&mut self) -> Result<u8> {
        self.reader.read_u8_le()
    }
}

/// Engine instance running in a separate child process.
pub struct ProcessEngineInstance {
    executable: PathBuf,
    logs_dir: PathBuf,
    log_file: String,
    use_console: bool,
    child: Option<Child>,
    pipe_in: Option<ChildStdin>,
    pipe_out: Option<ChildStdout>,
    collecting: bool,
    drift: Option<Vec<ProfileModule>>,
}

impl ProcessEngineInstance {
    pub fn new(
        executable: PathBuf,
        logs_dir: PathBuf,
        log_file: String,
        use_console: bool,
    ) -> Self {
        ProcessEngineInstance {
            executable,
            logs_dir,
            log_file,
            use_console,
            child: None,
            pipe_in: None,
            pipe_out: None,
            collecting: false,
            drift: None,
        }
    }

    fn exchange(&mut self) -> Result<Exchange<'_, ChildStdin, ChildStdout>> {
        match (self.pipe_in.as_mut(), self.pipe_out.as_mut()) {
            (Some(writer), Some(reader)) => Ok(Exchange::new(writer, reader)),
            _ => Err(LauncherError::invalid_state("engine instance is not running")),
        }
    }

    /// Pipe-level failures terminate the instance; clean failure replies do
    /// not (the engine is still in a usable state).
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(LauncherError::Io(_))) {
            error!("Pipe failure, killing engine instance");
            self.kill();
        }
        result
    }

    fn native_log_file(&self) -> String {
        let path = std::path::Path::new(&self.log_file);
        if path.is_absolute() {
            self.log_file.clone()
        } else {
            self.logs_dir.join(path).to_string_lossy().into_owned()
        }
    }

    fn check_can_read(&self) -> bool {
        #[cfg(unix)]
        {
            use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
            use std::os::fd::AsFd;

            let pipe = match &self.pipe_out {
                Some(pipe) => pipe,
                None => return false,
            };
            let mut fds = [PollFd::new(pipe.as_fd(), PollFlags::POLLIN)];
            matches!(poll(&mut fds, PollTimeout::ZERO), Ok(n) if n > 0)
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    fn child_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn wait_bounded(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(_)) | Err(_) => return true,
                Ok(None) => {}
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        true
    }

    fn drop_pipes(&mut self) {
        self.pipe_in = None;
        self.pipe_out = None;
    }

    /// Collect the post-game exchange after the game-exited marker was
    /// consumed, then shut the engine down.
    fn collect_drift_and_shutdown(&mut self) -> Result<()> {
        let drift = {
            let mut exchange = self.exchange()?;
            exchange.read_drift()?
        };
        info!("game exited, collected {} drifted modules", drift.len());
        self.drift = Some(drift);
        self.collecting = false;
        self.stop_engine();
        Ok(())
    }
}

impl Drop for ProcessEngineInstance {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.kill();
        }
    }
}

impl EngineInstance for ProcessEngineInstance {
    fn start_engine(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }

        info!("Starting engine process '{}'", self.executable.display());
        let mut child = ProcessCommand::new(&self.executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;

        let mut pipe_in = child
            .stdin
            .take()
            .ok_or_else(|| LauncherError::invalid_state("child stdin not captured"))?;
        let mut pipe_out = child
            .stdout
            .take()
            .ok_or_else(|| LauncherError::invalid_state("child stdout not captured"))?;

        let log_file = self.native_log_file();
        let handshake = Exchange::new(&mut pipe_in, &mut pipe_out)
            .handshake(&log_file, self.use_console);
        if let Err(err) = handshake {
            error!("Engine process handshake failed: {}", err);
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }

        info!("Game engine running in process {}", child.id());
        self.child = Some(child);
        self.pipe_in = Some(pipe_in);
        self.pipe_out = Some(pipe_out);
        self.collecting = false;
        self.drift = None;
        Ok(())
    }

    fn stop_engine(&mut self) {
        if self.child.is_none() {
            return;
        }
        info!("Stopping engine process");

        if self.pipe_in.is_some() {
            let result = self.exchange().and_then(|mut ex| ex.stop_process());
            if result.is_err() {
                warn!("Sending stop-process failed; process probably gone");
            }
        }

        if !self.wait_bounded(STOP_TIMEOUT) {
            warn!("Engine process did not exit in time, killing it");
            self.kill();
            return;
        }

        self.child = None;
        self.drop_pipes();
        self.collecting = false;
    }

    fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            info!("Killing engine process {}", child.id());
            let _ = child.kill();
            let _ = child.wait();
        }
        self.drop_pipes();
        self.collecting = false;
    }

    fn is_engine_running(&self) -> bool {
        self.child.is_some()
    }

    fn get_property(&mut self, property: EngineProperty) -> Result<String> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.get_property(property));
        self.guard(result)
    }

    fn load_modules(&mut self) -> Result<()> {
        let result = self.exchange().and_then(|mut ex| ex.load_modules());
        self.guard(result)
    }

    fn module_status(&mut self, name: &str, version: &str) -> Result<u16> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.module_status(name, version));
        self.guard(result)
    }

    fn module_parameters(&mut self, name: &str, version: &str) -> Result<Vec<ModuleParameter>> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.module_parameters(name, version));
        self.guard(result)
    }

    fn set_module_parameter(
        &mut self,
        name: &str,
        version: &str,
        parameter: &str,
        value: &str,
    ) -> Result<()> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.set_module_parameter(name, version, parameter, value));
        self.guard(result)
    }

    fn activate_module(&mut self, name: &str, version: &str) -> Result<()> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.activate_module(name, version));
        self.guard(result)
    }

    fn enable_module(&mut self, name: &str, version: &str, enable: bool) -> Result<()> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.enable_module(name, version, enable));
        self.guard(result)
    }

    fn set_data_directory(&mut self, directory: &str) -> Result<()> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.set_data_directory(directory));
        self.guard(result)
    }

    fn set_cache_app_id(&mut self, id: &str) -> Result<()> {
        let result = self.exchange().and_then(|mut ex| ex.set_cache_app_id(id));
        self.guard(result)
    }

    fn set_path_overlay(&mut self, path: &str) -> Result<()> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.set_path(Command::SetPathOverlay, path, "set-path-overlay"));
        self.guard(result)
    }

    fn set_path_capture(&mut self, path: &str) -> Result<()> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.set_path(Command::SetPathCapture, path, "set-path-capture"));
        self.guard(result)
    }

    fn set_path_config(&mut self, path: &str) -> Result<()> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.set_path(Command::SetPathConfig, path, "set-path-config"));
        self.guard(result)
    }

    fn vfs_add_disk_dir(
        &mut self,
        vfs_root: &str,
        native_directory: &str,
        read_only: bool,
        hidden: &[String],
    ) -> Result<()> {
        let result = self.exchange().and_then(|mut ex| {
            ex.vfs_add_disk_dir(vfs_root, native_directory, read_only, hidden)
        });
        self.guard(result)
    }

    fn vfs_add_script_shared_data_dir(&mut self) -> Result<()> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.vfs_add_script_shared_data_dir());
        self.guard(result)
    }

    fn vfs_add_delga_file(
        &mut self,
        delga_file: &str,
        archive_path: &str,
        hidden: &[String],
    ) -> Result<()> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.vfs_add_delga_file(delga_file, archive_path, hidden));
        self.guard(result)
    }

    fn set_cmd_line_args(&mut self, arguments: &str) -> Result<()> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.set_cmd_line_args(arguments));
        self.guard(result)
    }

    fn create_render_window(
        &mut self,
        width: u16,
        height: u16,
        full_screen: bool,
        title: &str,
        icon_path: &str,
    ) -> Result<()> {
        let result = self.exchange().and_then(|mut ex| {
            ex.create_render_window(width, height, full_screen, title, icon_path)
        });
        self.guard(result)
    }

    fn start_game(
        &mut self,
        script_directory: &str,
        script_version: &str,
        game_object: &str,
    ) -> Result<()> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.start_game(script_directory, script_version, game_object));
        let result = self.guard(result);
        if result.is_ok() {
            self.collecting = true;
        }
        result
    }

    fn stop_game(&mut self) -> Result<()> {
        if !self.collecting {
            return Err(LauncherError::invalid_state("no game is running"));
        }

        let status = {
            let mut exchange = self.exchange()?;
            exchange.stop_game()
        };
        let status = self.guard(status)?;

        match status {
            STATUS_SUCCESS => {
                // the stop reply; the game-exited marker follows
                let marker = {
                    let mut exchange = self.exchange()?;
                    exchange.read_exit_marker()
                };
                let marker = self.guard(marker)?;
                if marker != STATUS_GAME_EXITED {
                    self.kill();
                    return Err(LauncherError::protocol(format!(
                        "expected game-exited marker, got {}",
                        marker
                    )));
                }
            }
            STATUS_GAME_EXITED => {
                // the game had already ended on its own
            }
            other => {
                self.kill();
                return Err(LauncherError::protocol(format!(
                    "stop-game answered status {}",
                    other
                )));
            }
        }

        let result = self.collect_drift_and_shutdown();
        self.guard(result)
    }

    fn is_game_running(&mut self) -> bool {
        if !self.is_engine_running() {
            return false;
        }

        // the process may have crashed; clean up either way
        if !self.child_alive() {
            self.kill();
            return false;
        }

        // a pending byte without an outstanding command is the game-exited
        // marker
        if self.collecting && self.check_can_read() {
            let marker = {
                match self.exchange() {
                    Ok(mut exchange) => exchange.read_exit_marker(),
                    Err(err) => Err(err),
                }
            };
            match marker {
                Ok(STATUS_GAME_EXITED) => {
                    if let Err(err) = self.collect_drift_and_shutdown() {
                        error!("Post-game exchange failed: {}", err);
                        self.kill();
                    }
                }
                Ok(other) => {
                    error!("Unexpected byte {} on idle pipe", other);
                    self.kill();
                }
                Err(err) => {
                    error!("Reading game-exited marker failed: {}", err);
                    self.kill();
                }
            }
            return false;
        }

        true
    }

    fn take_changed_parameters(&mut self) -> Option<Vec<ProfileModule>> {
        self.drift.take()
    }

    fn display_current_resolution(&mut self, display: u8) -> Result<Point> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.display_current_resolution(display));
        self.guard(result)
    }

    fn display_resolutions(&mut self, display: u8) -> Result<Vec<Point>> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.display_resolutions(display));
        self.guard(result)
    }

    fn read_delga_game_defs(&mut self, delga_file: &str) -> Result<Vec<String>> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.read_delga_defs(Command::ReadDelgaGameDefs, delga_file));
        self.guard(result)
    }

    fn read_delga_patch_defs(&mut self, delga_file: &str) -> Result<Vec<String>> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.read_delga_defs(Command::ReadDelgaPatchDefs, delga_file));
        self.guard(result)
    }

    fn read_delga_files(&mut self, delga_file: &str, names: &[String]) -> Result<Vec<Vec<u8>>> {
        let result = self
            .exchange()
            .and_then(|mut ex| ex.read_delga_files(delga_file, names));
        self.guard(result)
    }
}

/// Factory for out-of-process instances. The executable name is fixed at
/// construction time.
pub struct ProcessInstanceFactory {
    executable: PathBuf,
    logs_dir: PathBuf,
    use_console: bool,
}

impl ProcessInstanceFactory {
    pub fn new(executable: PathBuf, logs_dir: PathBuf, use_console: bool) -> Self {
        ProcessInstanceFactory {
            executable,
            logs_dir,
            use_console,
        }
    }
}

impl EngineInstanceFactory for ProcessInstanceFactory {
    fn create_instance(&self, log_file: &str) -> Result<Box<dyn EngineInstance>> {
        Ok(Box::new(ProcessEngineInstance::new(
            self.executable.clone(),
            self.logs_dir.clone(),
            log_file.to_string(),
            self.use_console,
        )))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs::File;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use crate::engine_api::{ActiveModuleParameters, EngineApi, QuitRequest};
    use crate::engine_process::{read_handshake, EngineProcess};
    use crate::modules::ModuleParameter;
    use crate::modules::ParameterInfo;

    /// Scriptable engine double driven by the child-side dispatcher.
    struct StubEngine {
        paths: Vec<(EngineProperty, String)>,
        parameters: Arc<Mutex<Vec<ActiveModuleParameters>>>,
        /// Parameter mutations the "game" performs while running.
        game_changes: Vec<(String, String, String)>,
        /// Whether the game loop waits for a quit request.
        wait_for_quit: bool,
        commands: Arc<Mutex<Vec<String>>>,
        resolutions: Vec<Point>,
    }

    impl StubEngine {
        fn new() -> Self {
            StubEngine {
                paths: vec![
                    (EngineProperty::PathEngineConfig, "/e/config".to_string()),
                    (EngineProperty::PathEngineShare, "/e/share".to_string()),
                    (EngineProperty::PathEngineLib, "/e/lib".to_string()),
                    (EngineProperty::PathEngineCache, "/e/cache".to_string()),
                ],
                parameters: Arc::new(Mutex::new(vec![ActiveModuleParameters {
                    module_name: "opengl".to_string(),
                    parameters: vec![
                        ("brightness".to_string(), "1.0".to_string()),
                        ("gamma".to_string(), "1.2".to_string()),
                    ],
                }])),
                game_changes: Vec::new(),
                wait_for_quit: false,
                commands: Arc::new(Mutex::new(Vec::new())),
                resolutions: vec![Point::new(1920, 1080), Point::new(1280, 720)],
            }
        }

        fn record(&self, line: String) {
            self.commands.lock().unwrap().push(line);
        }
    }

    impl EngineApi for StubEngine {
        fn engine_path(&self, property: EngineProperty) -> crate::errors::Result<String> {
            self.paths
                .iter()
                .find(|(p, _)| *p == property)
                .map(|(_, path)| path.clone())
                .ok_or_else(|| LauncherError::not_found("property"))
        }

        fn load_modules(&mut self) -> crate::errors::Result<()> {
            self.record("load-modules".to_string());
            Ok(())
        }

        fn module_error_code(&self, name: &str, _version: &str) -> crate::errors::Result<u16> {
            if name == "broken" {
                Ok(7)
            } else {
                Ok(0)
            }
        }

        fn module_parameters(
            &self,
            name: &str,
            _version: &str,
        ) -> crate::errors::Result<Vec<ModuleParameter>> {
            if name == "missing" {
                return Err(LauncherError::not_found("module"));
            }
            Ok(vec![ModuleParameter {
                index: 0,
                info: ParameterInfo {
                    name: "brightness".to_string(),
                    description: "Display brightness".to_string(),
                    minimum: 0.0,
                    maximum: 2.0,
                    step: 0.1,
                    display_name: "Brightness".to_string(),
                    default_value: "1.0".to_string(),
                    selection_entries: vec![crate::modules::SelectionEntry {
                        value: "low".to_string(),
                        display_name: "Low".to_string(),
                        description: "Low brightness".to_string(),
                    }],
                    ..Default::default()
                },
                value: "1.0".to_string(),
            }])
        }

        fn set_module_parameter(
            &mut self,
            name: &str,
            _version: &str,
            parameter: &str,
            value: &str,
        ) -> crate::errors::Result<()> {
            self.record(format!("set {} {}={}", name, parameter, value));
            Ok(())
        }

        fn activate_module(&mut self, name: &str, version: &str) -> crate::errors::Result<()> {
            self.record(format!("activate {}:{}", name, version));
            Ok(())
        }

        fn enable_module(
            &mut self,
            name: &str,
            _version: &str,
            enable: bool,
        ) -> crate::errors::Result<()> {
            self.record(format!("enable {} {}", name, enable));
            Ok(())
        }

        fn set_data_directory(&mut self, directory: &str) -> crate::errors::Result<()> {
            self.record(format!("data-dir {}", directory));
            Ok(())
        }

        fn set_cache_app_id(&mut self, id: &str) -> crate::errors::Result<()> {
            self.record(format!("cache-id {}", id));
            Ok(())
        }

        fn set_path_overlay(&mut self, path: &str) -> crate::errors::Result<()> {
            self.record(format!("path-overlay {}", path));
            Ok(())
        }

        fn set_path_capture(&mut self, path: &str) -> crate::errors::Result<()> {
            self.record(format!("path-capture {}", path));
            Ok(())
        }

        fn set_path_config(&mut self, path: &str) -> crate::errors::Result<()> {
            self.record(format!("path-config {}", path));
            Ok(())
        }

        fn vfs_add_disk_dir(
            &mut self,
            vfs_root: &str,
            native_directory: &str,
            read_only: bool,
            hidden: &[String],
        ) -> crate::errors::Result<()> {
            self.record(format!(
                "vfs-disk {} {} {} {}",
                vfs_root,
                native_directory,
                read_only,
                hidden.len()
            ));
            Ok(())
        }

        fn vfs_add_script_shared_data_dir(&mut self) -> crate::errors::Result<()> {
            self.record("vfs-script-shared".to_string());
            Ok(())
        }

        fn vfs_add_delga_file(
            &mut self,
            delga_file: &str,
            archive_path: &str,
            _hidden: &[String],
        ) -> crate::errors::Result<()> {
            self.record(format!("vfs-delga {} {}", delga_file, archive_path));
            Ok(())
        }

        fn add_cmd_line_args(&mut self, arguments: &str) -> crate::errors::Result<()> {
            self.record(format!("args {}", arguments));
            Ok(())
        }

        fn create_render_window(
            &mut self,
            width: u16,
            height: u16,
            full_screen: bool,
            title: &str,
            _icon_path: &str,
        ) -> crate::errors::Result<()> {
            self.record(format!(
                "window {}x{} {} {}",
                width, height, full_screen, title
            ));
            Ok(())
        }

        fn run_game(
            &mut self,
            script_directory: &str,
            _script_version: &str,
            _game_object: &str,
            quit: &QuitRequest,
        ) -> crate::errors::Result<()> {
            self.record(format!("run-game {}", script_directory));

            if self.wait_for_quit {
                while !quit.is_requested() {
                    thread::sleep(Duration::from_millis(5));
                }
            }

            let mut parameters = self.parameters.lock().unwrap();
            for (module, name, value) in &self.game_changes {
                if let Some(entry) = parameters.iter_mut().find(|m| m.module_name == *module) {
                    if let Some(parameter) =
                        entry.parameters.iter_mut().find(|(n, _)| n == name)
                    {
                        parameter.1 = value.clone();
                    }
                }
            }
            Ok(())
        }

        fn active_module_parameters(&self) -> Vec<ActiveModuleParameters> {
            self.parameters.lock().unwrap().clone()
        }

        fn display_current_resolution(&self, _display: u8) -> crate::errors::Result<Point> {
            Ok(self.resolutions[0])
        }

        fn display_resolutions(&self, _display: u8) -> crate::errors::Result<Vec<Point>> {
            Ok(self.resolutions.clone())
        }

        fn read_delga_game_defs(&mut self, _delga: &str) -> crate::errors::Result<Vec<String>> {
            Ok(vec!["<degame/>".to_string()])
        }

        fn read_delga_patch_defs(&mut self, _delga: &str) -> crate::errors::Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn read_delga_files(
            &mut self,
            _delga: &str,
            names: &[String],
        ) -> crate::errors::Result<Vec<Vec<u8>>> {
            Ok(names.iter().map(|n| n.as_bytes().to_vec()).collect())
        }
    }

    /// Pipe pair as the child process would see it, plus the parent ends.
    fn pipe_pair() -> (File, File) {
        let (read, write) = nix::unistd::pipe().unwrap();
        (File::from(read), File::from(write))
    }

    struct Harness {
        to_child: File,
        from_child: File,
        child: thread::JoinHandle<crate::errors::Result<()>>,
    }

    fn spawn_child(engine: StubEngine) -> Harness {
        let (child_read, parent_write) = pipe_pair();
        let (parent_read, child_write) = pipe_pair();

        let child = thread::spawn(move || {
            let mut pipe_in = child_read;
            let mut pipe_out = child_write;
            let watch_in = pipe_in.try_clone().unwrap();
            let watch_out = pipe_out.try_clone().unwrap();

            read_handshake(&mut pipe_in, &mut pipe_out)?;
            EngineProcess::new(pipe_in, pipe_out, watch_in, watch_out, engine).run()
        });

        Harness {
            to_child: parent_write,
            from_child: parent_read,
            child,
        }
    }

    impl Harness {
        fn exchange(&mut self) -> Exchange<'_, File, File> {
            Exchange::new(&mut self.to_child, &mut self.from_child)
        }
    }

    #[test]
    fn test_handshake_and_basic_commands() {
        let mut harness = spawn_child(StubEngine::new());

        harness.exchange().handshake("/logs/run.log", false).unwrap();
        harness.exchange().load_modules().unwrap();

        assert_eq!(
            harness
                .exchange()
                .get_property(EngineProperty::PathEngineLib)
                .unwrap(),
            "/e/lib"
        );

        assert_eq!(harness.exchange().module_status("opengl", "1.0").unwrap(), 0);
        assert_eq!(harness.exchange().module_status("broken", "1.0").unwrap(), 7);

        let parameters = harness
            .exchange()
            .module_parameters("opengl", "1.0")
            .unwrap();
        assert_eq!(parameters.len(), 1);
        assert_eq!(parameters[0].info.name, "brightness");
        assert_eq!(parameters[0].info.maximum, 2.0);
        assert_eq!(parameters[0].info.selection_entries.len(), 1);
        assert_eq!(parameters[0].info.selection_entries[0].value, "low");
        assert_eq!(parameters[0].value, "1.0");

        // a failing engine call answers a clean failed status
        assert!(harness
            .exchange()
            .module_parameters("missing", "1.0")
            .is_err());

        let resolutions = harness.exchange().display_resolutions(0).unwrap();
        assert_eq!(resolutions, vec![Point::new(1920, 1080), Point::new(1280, 720)]);

        let defs = harness
            .exchange()
            .read_delga_defs(Command::ReadDelgaGameDefs, "/d/demo.delga")
            .unwrap();
        assert_eq!(defs, vec!["<degame/>".to_string()]);

        let files = harness
            .exchange()
            .read_delga_files("/d/demo.delga", &["icon.png".to_string()])
            .unwrap();
        assert_eq!(files, vec![b"icon.png".to_vec()]);

        harness.exchange().stop_process().unwrap();
        harness.child.join().unwrap().unwrap();
    }

    #[test]
    fn test_game_self_exit_reports_drift() {
        let mut engine = StubEngine::new();
        engine.game_changes.push((
            "opengl".to_string(),
            "brightness".to_string(),
            "2.0".to_string(),
        ));
        let mut harness = spawn_child(engine);

        harness.exchange().handshake("", false).unwrap();
        harness
            .exchange()
            .start_game("/scripts", "1.0", "GameApp")
            .unwrap();

        // the game "runs" and exits immediately; the exited marker follows
        let marker = harness.exchange().read_exit_marker().unwrap();
        assert_eq!(marker, STATUS_GAME_EXITED);

        let drift = harness.exchange().read_drift().unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].name, "opengl");
        assert_eq!(drift[0].parameters.len(), 1);
        assert_eq!(drift[0].parameters[0].name, "brightness");
        assert_eq!(drift[0].parameters[0].value, "2.0");

        // after the acknowledge the child shuts down by itself
        harness.child.join().unwrap().unwrap();
    }

    #[test]
    fn test_stop_game_quits_and_reports() {
        let mut engine = StubEngine::new();
        engine.wait_for_quit = true;
        engine.game_changes.push((
            "opengl".to_string(),
            "gamma".to_string(),
            "1.6".to_string(),
        ));
        let mut harness = spawn_child(engine);

        harness.exchange().handshake("", false).unwrap();
        harness
            .exchange()
            .start_game("/scripts", "1.0", "GameApp")
            .unwrap();

        // the game loop blocks until the stop command arrives
        let status = harness.exchange().stop_game().unwrap();
        assert_eq!(status, STATUS_SUCCESS);

        let marker = harness.exchange().read_exit_marker().unwrap();
        assert_eq!(marker, STATUS_GAME_EXITED);

        let drift = harness.exchange().read_drift().unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].parameters[0].name, "gamma");
        assert_eq!(drift[0].parameters[0].value, "1.6");

        harness.child.join().unwrap().unwrap();
    }

    #[test]
    fn test_unknown_command_answers_failed() {
        let mut harness = spawn_child(StubEngine::new());
        harness.exchange().handshake("", false).unwrap();

        harness.to_child.write_u8_le(200).unwrap();
        let status = harness.from_child.read_u8_le().unwrap();
        assert_eq!(status, crate::protocol::STATUS_FAILED);

        harness.exchange().stop_process().unwrap();
        harness.child.join().unwrap().unwrap();
    }
}
