//! Framed log transport between the engine child process and the launcher.
//!
//! Each record is `u8` kind, `u16` source length, source bytes, `u16` message
//! length, message bytes; integers little-endian, strings UTF-8 without a
//! trailing NUL. The child installs a [`PipeLogWriter`] when it has no log
//! file of its own; the parent side decodes records with
//! [`read_pipe_log_entry`].

use std::io::{Read, Write};
use std::sync::Mutex;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{Level, Log, Metadata, Record};

use crate::errors::{LauncherError, Result};
use crate::history::EntryKind;

const KIND_INFO: u8 = 0;
const KIND_WARN: u8 = 1;
const KIND_ERROR: u8 = 2;

fn kind_tag(kind: EntryKind) -> u8 {
    match kind {
        EntryKind::Info => KIND_INFO,
        EntryKind::Warn => KIND_WARN,
        EntryKind::Error => KIND_ERROR,
    }
}

/// Logger sink writing framed records to a pipe.
pub struct PipeLogWriter<W: Write + Send> {
    pipe: Mutex<W>,
    source: String,
}

impl<W: Write + Send> PipeLogWriter<W> {
    pub fn new(pipe: W, source: &str) -> Self {
        PipeLogWriter {
            pipe: Mutex::new(pipe),
            source: source.to_string(),
        }
    }

    /// Write one framed record.
    pub fn log_entry(&self, kind: EntryKind, source: &str, message: &str) -> Result<()> {
        let mut pipe = self
            .pipe
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        write_record(&mut *pipe, kind_tag(kind), source, message)
    }
}

fn write_record<W: Write>(pipe: &mut W, kind: u8, source: &str, message: &str) -> Result<()> {
    if source.len() > u16::MAX as usize || message.len() > u16::MAX as usize {
        return Err(LauncherError::protocol("log record exceeds u16 length"));
    }
    pipe.write_u8(kind)?;
    pipe.write_u16::<LittleEndian>(source.len() as u16)?;
    pipe.write_all(source.as_bytes())?;
    pipe.write_u16::<LittleEndian>(message.len() as u16)?;
    pipe.write_all(message.as_bytes())?;
    pipe.flush()?;
    Ok(())
}

impl<W: Write + Send> Log for PipeLogWriter<W> {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let kind = match record.level() {
            Level::Error => EntryKind::Error,
            Level::Warn => EntryKind::Warn,
            _ => EntryKind::Info,
        };
        // a broken log pipe must not take the engine down with it
        let _ = self.log_entry(kind, &self.source, &record.args().to_string());
    }

    fn flush(&self) {}
}

/// One decoded record from the log pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeLogEntry {
    pub kind: EntryKind,
    pub source: String,
    pub message: String,
}

/// Read a single framed record. Blocks until a full record arrived.
pub fn read_pipe_log_entry<R: Read>(pipe: &mut R) -> Result<PipeLogEntry> {
    let kind = match pipe.read_u8()? {
        KIND_INFO => EntryKind::Info,
        KIND_WARN => EntryKind::Warn,
        KIND_ERROR => EntryKind::Error,
        other => {
            return Err(LauncherError::protocol(format!(
                "unknown log record kind {}",
                other
            )))
        }
    };
    let source = read_string(pipe)?;
    let message = read_string(pipe)?;
    Ok(PipeLogEntry {
        kind,
        source,
        message,
    })
}

fn read_string<R: Read>(pipe: &mut R) -> Result<String> {
    let len = pipe.read_u16::<LittleEndian>()? as usize;
    let mut buffer = vec![0u8; len];
    pipe.read_exact(&mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|_| LauncherError::protocol("log record is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_record_round_trip() {
        let mut buffer = Vec::new();
        write_record(&mut buffer, KIND_WARN, "Engine", "texture cache is cold").unwrap();

        let mut cursor = Cursor::new(buffer);
        let entry = read_pipe_log_entry(&mut cursor).unwrap();
        assert_eq!(entry.kind, EntryKind::Warn);
        assert_eq!(entry.source, "Engine");
        assert_eq!(entry.message, "texture cache is cold");
    }

    #[test]
    fn test_record_framing_layout() {
        let mut buffer = Vec::new();
        write_record(&mut buffer, KIND_INFO, "ab", "xyz").unwrap();

        // u8 kind, u16 len "ab", bytes, u16 len "xyz", bytes, little-endian
        assert_eq!(
            buffer,
            vec![0u8, 2, 0, b'a', b'b', 3, 0, b'x', b'y', b'z']
        );
    }

    #[test]
    fn test_empty_strings_are_valid() {
        let mut buffer = Vec::new();
        write_record(&mut buffer, KIND_ERROR, "", "").unwrap();

        let entry = read_pipe_log_entry(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(entry.kind, EntryKind::Error);
        assert!(entry.source.is_empty());
        assert!(entry.message.is_empty());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let buffer = vec![9u8, 0, 0, 0, 0];
        assert!(read_pipe_log_entry(&mut Cursor::new(buffer)).is_err());
    }

    #[test]
    fn test_short_read_is_an_error() {
        // claims a 5 byte source but carries only 2
        let buffer = vec![0u8, 5, 0, b'a', b'b'];
        assert!(read_pipe_log_entry(&mut Cursor::new(buffer)).is_err());
    }
}
