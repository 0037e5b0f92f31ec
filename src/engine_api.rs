//! Seam to the actual game engine.
//!
//! The engine is a black box to the launcher: everything it needs from the
//! engine goes through this trait, whether the engine lives in the same
//! process (direct instance) or behind the pipe protocol (the child-side
//! dispatcher drives an implementation of this trait). Tests substitute a
//! recording stub.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::Result;
use crate::modules::ModuleParameter;
use crate::protocol::{EngineProperty, Point};

/// Cooperative quit flag handed to the engine's game loop.
///
/// Requesting a quit only raises a flag; the game loop notices it at its own
/// pace. Safe to share with the pipe-watcher thread.
#[derive(Debug, Clone, Default)]
pub struct QuitRequest {
    flag: Arc<AtomicBool>,
}

impl QuitRequest {
    pub fn new() -> Self {
        QuitRequest {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Parameter values of one active module, used for drift detection.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveModuleParameters {
    pub module_name: String,
    pub parameters: Vec<(String, String)>,
}

/// The engine API surface used by the launcher.
///
/// Version arguments follow the protocol convention: an empty version string
/// selects the latest known version of the family.
pub trait EngineApi: Send {
    /// Native path the engine reports for `property`.
    fn engine_path(&self, property: EngineProperty) -> Result<String>;

    /// Scan and load all engine modules.
    fn load_modules(&mut self) -> Result<()>;

    /// Error code of the module after loading; `0` means usable.
    fn module_error_code(&self, name: &str, version: &str) -> Result<u16>;

    /// Parameter descriptions and current values of the module.
    fn module_parameters(&self, name: &str, version: &str) -> Result<Vec<ModuleParameter>>;

    fn set_module_parameter(
        &mut self,
        name: &str,
        version: &str,
        parameter: &str,
        value: &str,
    ) -> Result<()>;

    /// Make the module the active one of its single-instance kind.
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

    /// Mount whatever shared data the active script module contributes.
    fn vfs_add_script_shared_data_dir(&mut self) -> Result<()>;

    fn vfs_add_delga_file(
        &mut self,
        delga_file: &str,
        archive_path: &str,
        hidden: &[String],
    ) -> Result<()>;

    /// Append command line arguments; the engine splits on whitespace.
    fn add_cmd_line_args(&mut self, arguments: &str) -> Result<()>;

    fn create_render_window(
        &mut self,
        width: u16,
        height: u16,
        full_screen: bool,
        title: &str,
        icon_path: &str,
    ) -> Result<()>;

    /// Run the game loop. Blocks until the game ends or `quit` is raised.
    fn run_game(
        &mut self,
        script_directory: &str,
        script_version: &str,
        game_object: &str,
        quit: &QuitRequest,
    ) -> Result<()>;

    /// Current parameter values of every active single-instance module.
    fn active_module_parameters(&self) -> Vec<ActiveModuleParameters>;

    fn display_current_resolution(&self, display: u8) -> Result<Point>;

    fn display_resolutions(&self, display: u8) -> Result<Vec<Point>>;

    /// Full text of every `*.degame` manifest inside the DELGA file.
    fn read_delga_game_defs(&mut self, delga_file: &str) -> Result<Vec<String>>;

    /// Full text of every `*.depatch` manifest inside the DELGA file.
    fn read_delga_patch_defs(&mut self, delga_file: &str) -> Result<Vec<String>>;

    /// Raw content of the named files inside the DELGA file.
    fn read_delga_files(&mut self, delga_file: &str, names: &[String]) -> Result<Vec<Vec<u8>>>;
}
