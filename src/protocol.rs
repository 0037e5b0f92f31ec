//! Wire protocol between the launcher and an out-of-process engine instance.
//!
//! All integers are little-endian. Strings are UTF-8 with a `u16` byte-length
//! prefix and no trailing NUL. A point is two `i32` values (x, y). Commands
//! are a single `u8` tag followed by their arguments; every command is
//! answered with a `u8` status byte, optionally followed by reply data.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::{LauncherError, Result};

/// Command tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    StopProcess = 0,
    GetProperty = 1,
    LoadModules = 2,
    GetModuleStatus = 3,
    GetModuleParamList = 4,
    SetModuleParameter = 5,
    ActivateModule = 6,
    EnableModule = 7,
    SetDataDir = 8,
    SetCacheAppId = 9,
    VfsAddDiskDir = 10,
    VfsAddScriptSharedDataDir = 11,
    VfsAddDelgaFile = 12,
    SetCmdLineArgs = 13,
    CreateRenderWindow = 14,
    StartGame = 15,
    StopGame = 16,
    GetDisplayCurrentResolution = 17,
    GetDisplayResolutions = 18,
    ReadDelgaGameDefs = 19,
    ReadDelgaPatchDefs = 20,
    ReadDelgaFiles = 21,
    SetPathOverlay = 22,
    SetPathCapture = 23,
    SetPathConfig = 24,
}

impl Command {
    pub fn from_tag(tag: u8) -> Option<Command> {
        use Command::*;
        Some(match tag {
            0 => StopProcess,
            1 => GetProperty,
            2 => LoadModules,
            3 => GetModuleStatus,
            4 => GetModuleParamList,
            5 => SetModuleParameter,
            6 => ActivateModule,
            7 => EnableModule,
            8 => SetDataDir,
            9 => SetCacheAppId,
            10 => VfsAddDiskDir,
            11 => VfsAddScriptSharedDataDir,
            12 => VfsAddDelgaFile,
            13 => SetCmdLineArgs,
            14 => CreateRenderWindow,
            15 => StartGame,
            16 => StopGame,
            17 => GetDisplayCurrentResolution,
            18 => GetDisplayResolutions,
            19 => ReadDelgaGameDefs,
            20 => ReadDelgaPatchDefs,
            21 => ReadDelgaFiles,
            22 => SetPathOverlay,
            23 => SetPathCapture,
            24 => SetPathConfig,
            _ => return None,
        })
    }
}

/// Reply status bytes.
pub const STATUS_SUCCESS: u8 = 0;
pub const STATUS_FAILED: u8 = 1;
/// Only sent after `start-game`, when the game loop has ended.
pub const STATUS_GAME_EXITED: u8 = 2;

/// Engine property ids for `get-property`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EngineProperty {
    PathEngineConfig = 0,
    PathEngineShare = 1,
    PathEngineLib = 2,
    PathEngineCache = 3,
}

impl EngineProperty {
    pub fn from_tag(tag: u8) -> Option<EngineProperty> {
        use EngineProperty::*;
        Some(match tag {
            0 => PathEngineConfig,
            1 => PathEngineShare,
            2 => PathEngineLib,
            3 => PathEngineCache,
            _ => return None,
        })
    }
}

/// Handshake: the child answers this byte once its engine is constructed.
pub const SYNC_BYTE: u8 = 0x01;
/// Handshake flags byte: log to the console instead of the log file.
pub const FLAG_USE_CONSOLE: u8 = 0x1;

/// Display mode as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Point { x, y }
    }

    pub fn pixel_count(&self) -> i64 {
        self.x as i64 * self.y as i64
    }
}

/// Little-endian write half of the pipe encoding.
pub trait WireWrite: Write {
    fn write_u8_le(&mut self, value: u8) -> Result<()> {
        self.write_u8(value)?;
        Ok(())
    }

    fn write_u16_le(&mut self, value: u16) -> Result<()> {
        self.write_u16::<LittleEndian>(value)?;
        Ok(())
    }

    fn write_i32_le(&mut self, value: i32) -> Result<()> {
        self.write_i32::<LittleEndian>(value)?;
        Ok(())
    }

    fn write_f32_le(&mut self, value: f32) -> Result<()> {
        self.write_f32::<LittleEndian>(value)?;
        Ok(())
    }

    fn write_string16(&mut self, value: &str) -> Result<()> {
        if value.len() > u16::MAX as usize {
            return Err(LauncherError::protocol("string exceeds u16 length prefix"));
        }
        self.write_u16_le(value.len() as u16)?;
        if !value.is_empty() {
            self.write_all(value.as_bytes())?;
        }
        Ok(())
    }

    fn write_point(&mut self, value: Point) -> Result<()> {
        self.write_i32_le(value.x)?;
        self.write_i32_le(value.y)
    }

    fn write_status(&mut self, status: u8) -> Result<()> {
        self.write_u8_le(status)
    }
}

impl<W: Write + ?Sized> WireWrite for W {}

/// Little-endian read half of the pipe encoding. Every reader blocks until
/// the requested bytes arrived; a closed pipe surfaces as an I/O error.
pub trait WireRead: Read {
    fn read_u8_le(&mut self) -> Result<u8> {
        Ok(self.read_u8()?)
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        Ok(self.read_u16::<LittleEndian>()?)
    }

    fn read_i32_le(&mut self) -> Result<i32> {
        Ok(self.read_i32::<LittleEndian>()?)
    }

    fn read_f32_le(&mut self) -> Result<f32> {
        Ok(self.read_f32::<LittleEndian>()?)
    }

    fn read_string16(&mut self) -> Result<String> {
        let length = self.read_u16_le()? as usize;
        let mut buffer = vec![0u8; length];
        self.read_exact(&mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|_| LauncherError::protocol("pipe string is not valid UTF-8"))
    }

    fn read_point(&mut self) -> Result<Point> {
        Ok(Point {
            x: self.read_i32_le()?,
            y: self.read_i32_le()?,
        })
    }

    fn read_blob(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; length];
        self.read_exact(&mut buffer)?;
        Ok(buffer)
    }
}

impl<R: Read + ?Sized> WireRead for R {}

/// Check a reply status byte, mapping failure to a protocol error.
pub fn expect_success(status: u8, command: &str) -> Result<()> {
    if status == STATUS_SUCCESS {
        Ok(())
    } else {
        Err(LauncherError::protocol(format!(
            "command {} answered status {}",
            command, status
        )))
    }
}
