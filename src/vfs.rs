//! Layered virtual filesystem.
//!
//! The launcher never touches native paths directly once its roots are
//! resolved. Instead it composes a stack of containers, each mapping a
//! virtual subtree to a backing store: a native directory (optionally
//! read-only, with hidden subpaths) or a DELGA archive. Lookup walks the
//! stack back to front, so later containers shadow earlier ones for the same
//! virtual path. Writes are routed to the shadowing container and fail when
//! it is read-only.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::path::PathBuf;

use log::warn;

use crate::errors::{LauncherError, Result};

/// Kind of a virtual filesystem node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
}

/// Normalize a virtual path: leading slash, no duplicate or trailing
/// separators, `.` components removed.
pub fn normalize(path: &str) -> String {
    let mut result = String::from("/");
    for component in path.split('/') {
        if component.is_empty() || component == "." {
            continue;
        }
        if !result.ends_with('/') {
            result.push('/');
        }
        result.push_str(component);
    }
    result
}

/// Join a virtual base path and a relative part.
pub fn join(base: &str, rel: &str) -> String {
    normalize(&format!("{}/{}", base, rel))
}

/// Match a file name against a `*`-wildcard pattern (e.g. `*.degame`).
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    fn matches(name: &[u8], pattern: &[u8]) -> bool {
        match (pattern.first(), name.first()) {
            (None, None) => true,
            (None, Some(_)) => false,
            (Some(b'*'), _) => {
                matches(name, &pattern[1..])
                    || (!name.is_empty() && matches(&name[1..], pattern))
            }
            (Some(p), Some(n)) => p == n && matches(&name[1..], &pattern[1..]),
            (Some(_), None) => false,
        }
    }
    matches(name.as_bytes(), pattern.as_bytes())
}

/// Native directory mapped at a virtual root.
#[derive(Debug)]
pub struct DiskContainer {
    root: String,
    disk: PathBuf,
    read_only: bool,
    hidden: Vec<String>,
}

/// DELGA archive mapped at a virtual root. Always read-only.
#[derive(Debug)]
pub struct DelgaContainer {
    root: String,
    archive: PathBuf,
    hidden: Vec<String>,
}

#[derive(Debug)]
enum Container {
    Disk(DiskContainer),
    Delga(DelgaContainer),
}

impl Container {
    fn root(&self) -> &str {
        match self {
            Container::Disk(c) => &c.root,
            Container::Delga(c) => &c.root,
        }
    }

    fn hidden(&self) -> &[String] {
        match self {
            Container::Disk(c) => &c.hidden,
            Container::Delga(c) => &c.hidden,
        }
    }

    /// Relative virtual path inside this container, `None` when the path is
    /// outside the mapped subtree or hidden.
    fn relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        let root = self.root();
        let rel = if root == "/" {
            path
        } else if path == root {
            "/"
        } else if path.starts_with(root) && path.as_bytes().get(root.len()) == Some(&b'/') {
            &path[root.len()..]
        } else {
            return None;
        };

        for hidden in self.hidden() {
            if rel == hidden
                || (rel.starts_with(hidden.as_str())
                    && rel.as_bytes().get(hidden.len()) == Some(&b'/'))
            {
                return None;
            }
        }
        Some(rel)
    }
}

impl DiskContainer {
    fn native_path(&self, rel: &str) -> PathBuf {
        let mut path = self.disk.clone();
        for component in rel.split('/').filter(|c| !c.is_empty()) {
            path.push(component);
        }
        path
    }

    fn file_type(&self, rel: &str) -> Option<FileType> {
        let native = self.native_path(rel);
        let meta = fs::metadata(&native).ok()?;
        if meta.is_dir() {
            Some(FileType::Directory)
        } else if meta.is_file() {
            Some(FileType::Regular)
        } else {
            None
        }
    }
}

impl DelgaContainer {
    fn open_archive(&self) -> Result<zip::ZipArchive<File>> {
        let file = File::open(&self.archive)?;
        Ok(zip::ZipArchive::new(file)?)
    }

    fn entry_name(rel: &str) -> String {
        rel.trim_start_matches('/').to_string()
    }

    fn file_type(&self, rel: &str) -> Option<FileType> {
        if rel == "/" {
            return Some(FileType::Directory);
        }
        let archive = self.open_archive().ok()?;
        let name = Self::entry_name(rel);
        let dir_prefix = format!("{}/", name);
        for entry in archive.file_names() {
            if entry == name {
                return Some(FileType::Regular);
            }
            if entry.starts_with(&dir_prefix) || entry.trim_end_matches('/') == name {
                return Some(FileType::Directory);
            }
        }
        None
    }

    fn read(&self, rel: &str) -> Result<Vec<u8>> {
        let mut archive = self.open_archive()?;
        let name = Self::entry_name(rel);
        let mut entry = archive
            .by_name(&name)
            .map_err(|_| LauncherError::not_found(format!("archive entry '{}'", name)))?;
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut content)?;
        Ok(content)
    }
}

/// Ordered stack of containers with shadowing lookup.
#[derive(Debug, Default)]
pub struct VirtualFileSystem {
    containers: Vec<Container>,
}

impl VirtualFileSystem {
    pub fn new() -> Self {
        VirtualFileSystem {
            containers: Vec::new(),
        }
    }

    /// Mount a native directory at `root`.
    pub fn add_disk_dir(&mut self, root: &str, disk: impl Into<PathBuf>, read_only: bool) {
        self.add_disk_dir_hidden(root, disk, read_only, Vec::new());
    }

    /// Mount a native directory at `root` with hidden subpaths.
    pub fn add_disk_dir_hidden(
        &mut self,
        root: &str,
        disk: impl Into<PathBuf>,
        read_only: bool,
        hidden: Vec<String>,
    ) {
        self.containers.push(Container::Disk(DiskContainer {
            root: normalize(root),
            disk: disk.into(),
            read_only,
            hidden: hidden.iter().map(|h| normalize(h)).collect(),
        }));
    }

    /// Mount a DELGA archive at `root`.
    pub fn add_delga(&mut self, root: &str, archive: impl Into<PathBuf>, hidden: Vec<String>) {
        self.containers.push(Container::Delga(DelgaContainer {
            root: normalize(root),
            archive: archive.into(),
            hidden: hidden.iter().map(|h| normalize(h)).collect(),
        }));
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Type of the node at `path`, across the whole stack.
    pub fn file_type(&self, path: &str) -> Option<FileType> {
        let path = normalize(path);
        for container in self.containers.iter().rev() {
            let found = match container {
                Container::Disk(disk) => container
                    .relative(&path)
                    .and_then(|rel| disk.file_type(rel)),
                Container::Delga(delga) => container
                    .relative(&path)
                    .and_then(|rel| delga.file_type(rel)),
            };
            if found.is_some() {
                return found;
            }
        }
        // a container mounted below this path implies a directory
        for container in &self.containers {
            let root = container.root();
            if root != "/" && root.starts_with(&path) && root.len() > path.len() {
                return Some(FileType::Directory);
            }
        }
        None
    }

    pub fn exists(&self, path: &str) -> bool {
        self.file_type(path).is_some()
    }

    /// Read the full content of the shadowing regular file at `path`.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize(path);
        for container in self.containers.iter().rev() {
            match container {
                Container::Disk(disk) => {
                    if let Some(rel) = container.relative(&path) {
                        if disk.file_type(rel) == Some(FileType::Regular) {
                            return Ok(fs::read(disk.native_path(rel))?);
                        }
                    }
                }
                Container::Delga(delga) => {
                    if let Some(rel) = container.relative(&path) {
                        if delga.file_type(rel) == Some(FileType::Regular) {
                            return delga.read(rel);
                        }
                    }
                }
            }
        }
        Err(LauncherError::not_found(format!("file '{}'", path)))
    }

    /// Open the shadowing regular file at `path` for reading.
    pub fn open_read(&self, path: &str) -> Result<Box<dyn Read>> {
        Ok(Box::new(Cursor::new(self.read(path)?)))
    }

    /// True when a write to `path` would be routed to a writable container.
    pub fn can_write(&self, path: &str) -> bool {
        let path = normalize(path);
        for container in self.containers.iter().rev() {
            if container.relative(&path).is_none() {
                continue;
            }
            return match container {
                Container::Disk(disk) => !disk.read_only,
                Container::Delga(_) => false,
            };
        }
        false
    }

    /// Open `path` for writing, truncating any existing file. Parent
    /// directories are created inside the backing store.
    pub fn open_write(&self, path: &str) -> Result<File> {
        let path = normalize(path);
        for container in self.containers.iter().rev() {
            let rel = match container.relative(&path) {
                Some(rel) => rel,
                None => continue,
            };
            return match container {
                Container::Disk(disk) => {
                    if disk.read_only {
                        Err(LauncherError::invalid_state(format!(
                            "container '{}' is read-only",
                            disk.root
                        )))
                    } else {
                        let native = disk.native_path(rel);
                        if let Some(parent) = native.parent() {
                            fs::create_dir_all(parent)?;
                        }
                        Ok(File::create(native)?)
                    }
                }
                Container::Delga(delga) => Err(LauncherError::invalid_state(format!(
                    "container '{}' is an archive",
                    delga.root
                ))),
            };
        }
        Err(LauncherError::not_found(format!(
            "no container maps '{}'",
            path
        )))
    }

    /// Write `content` to `path`, truncating any existing file.
    pub fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let mut file = self.open_write(path)?;
        file.write_all(content)?;
        Ok(())
    }

    /// Entries of the virtual directory `path`, merged across the stack.
    /// Later containers win on name collisions.
    pub fn list_dir(&self, path: &str) -> Vec<(String, FileType)> {
        let path = normalize(path);
        let mut entries: BTreeMap<String, FileType> = BTreeMap::new();

        for container in &self.containers {
            match container {
                Container::Disk(disk) => {
                    if let Some(rel) = container.relative(&path) {
                        let native = disk.native_path(rel);
                        let dir = match fs::read_dir(&native) {
                            Ok(dir) => dir,
                            Err(_) => continue,
                        };
                        for entry in dir.flatten() {
                            let name = entry.file_name().to_string_lossy().into_owned();
                            let child = join(&path, &name);
                            if container.relative(&child).is_none() {
                                continue; // hidden
                            }
                            let file_type = match entry.file_type() {
                                Ok(t) if t.is_dir() => FileType::Directory,
                                Ok(t) if t.is_file() => FileType::Regular,
                                _ => continue,
                            };
                            entries.insert(name, file_type);
                        }
                    }
                }
                Container::Delga(delga) => {
                    if let Some(rel) = container.relative(&path) {
                        let archive = match delga.open_archive() {
                            Ok(archive) => archive,
                            Err(err) => {
                                warn!(
                                    "Failed to open archive {}: {}",
                                    delga.archive.display(),
                                    err
                                );
                                continue;
                            }
                        };
                        let prefix = match rel {
                            "/" => String::new(),
                            other => format!("{}/", DelgaContainer::entry_name(other)),
                        };
                        for entry in archive.file_names() {
                            let entry = entry.trim_end_matches('/');
                            if !entry.starts_with(&prefix) || entry.len() == prefix.len() {
                                continue;
                            }
                            let remainder = &entry[prefix.len()..];
                            let child = join(&path, remainder.split('/').next().unwrap_or(""));
                            if container.relative(&child).is_none() {
                                continue;
                            }
                            match remainder.split_once('/') {
                                Some((first, _)) => {
                                    entries.insert(first.to_string(), FileType::Directory);
                                }
                                None => {
                                    entries.insert(remainder.to_string(), FileType::Regular);
                                }
                            }
                        }
                    }
                }
            }

            // containers mounted below the listed directory surface their
            // mount point as a directory
            let root = container.root();
            if root != "/" && root.len() > path.len() {
                let parent_ok = path == "/" || root.starts_with(&path) && root.as_bytes()[path.len()] == b'/';
                if parent_ok {
                    let rest = if path == "/" { &root[1..] } else { &root[path.len() + 1..] };
                    if let Some(first) = rest.split('/').next() {
                        if !first.is_empty() {
                            entries.entry(first.to_string()).or_insert(FileType::Directory);
                        }
                    }
                }
            }
        }

        entries.into_iter().collect()
    }

    /// Virtual paths of the subdirectories of `path`.
    pub fn list_directories(&self, path: &str) -> Vec<String> {
        self.list_dir(path)
            .into_iter()
            .filter(|(_, t)| *t == FileType::Directory)
            .map(|(name, _)| join(path, &name))
            .collect()
    }

    /// Recursively collect regular files under `path` matching any of the
    /// `*`-wildcard patterns. Results are virtual paths in directory order.
    pub fn search_files(&self, path: &str, patterns: &[&str]) -> Vec<String> {
        let mut found = Vec::new();
        self.search_files_into(&normalize(path), patterns, &mut found);
        found
    }

    fn search_files_into(&self, path: &str, patterns: &[&str], found: &mut Vec<String>) {
        for (name, file_type) in self.list_dir(path) {
            let child = join(path, &name);
            match file_type {
                FileType::Regular => {
                    if patterns.iter().any(|p| matches_pattern(&name, p)) {
                        found.push(child);
                    }
                }
                FileType::Directory => self.search_files_into(&child, patterns, found),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_file(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = File::create(path).unwrap();
        file.write_all(content).unwrap();
    }

    fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("foo//bar/"), "/foo/bar");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("./a/./b"), "/a/b");
        assert_eq!(join("/config", "user/games"), "/config/user/games");
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("demo.degame", "*.degame"));
        assert!(matches_pattern("module.xml", "module.xml"));
        assert!(matches_pattern("a.b.degame", "*.degame"));
        assert!(!matches_pattern("demo.depatch", "*.degame"));
        assert!(matches_pattern("anything", "*"));
    }

    #[test]
    fn test_later_container_shadows_earlier() {
        let base = tempdir().unwrap();
        let game_dir = base.path().join("game");
        let overlay_dir = base.path().join("overlay");
        write_file(&game_dir.join("foo.txt"), b"game");
        write_file(&game_dir.join("only-game.txt"), b"game");
        write_file(&overlay_dir.join("foo.txt"), b"overlay");

        let mut vfs = VirtualFileSystem::new();
        vfs.add_disk_dir("/", &game_dir, true);
        vfs.add_disk_dir("/", &overlay_dir, false);

        assert_eq!(vfs.read("/foo.txt").unwrap(), b"overlay");
        assert_eq!(vfs.read("/only-game.txt").unwrap(), b"game");
    }

    #[test]
    fn test_write_routed_to_writable_overlay() {
        let base = tempdir().unwrap();
        let game_dir = base.path().join("game");
        let overlay_dir = base.path().join("overlay");
        fs::create_dir_all(&game_dir).unwrap();
        fs::create_dir_all(&overlay_dir).unwrap();

        let mut vfs = VirtualFileSystem::new();
        vfs.add_disk_dir("/", &game_dir, true);
        vfs.add_disk_dir("/", &overlay_dir, false);

        assert!(vfs.can_write("/saves/slot0.sav"));
        vfs.write("/saves/slot0.sav", b"state").unwrap();

        // landed in the overlay, not the read-only game data
        assert!(overlay_dir.join("saves/slot0.sav").is_file());
        assert!(!game_dir.join("saves").exists());
    }

    #[test]
    fn test_write_to_read_only_container_fails() {
        let base = tempdir().unwrap();
        fs::create_dir_all(base.path().join("game")).unwrap();

        let mut vfs = VirtualFileSystem::new();
        vfs.add_disk_dir("/", base.path().join("game"), true);

        assert!(!vfs.can_write("/foo.txt"));
        assert!(matches!(
            vfs.write("/foo.txt", b"x"),
            Err(LauncherError::InvalidState(_))
        ));
    }

    #[test]
    fn test_hidden_paths_pretend_absence() {
        let base = tempdir().unwrap();
        let lower = base.path().join("lower");
        let upper = base.path().join("upper");
        write_file(&lower.join("secret/data.bin"), b"old");
        write_file(&upper.join("secret/data.bin"), b"patched");

        let mut vfs = VirtualFileSystem::new();
        vfs.add_disk_dir("/", &lower, true);
        vfs.add_disk_dir_hidden("/", &upper, true, vec!["/other".to_string()]);

        assert_eq!(vfs.read("/secret/data.bin").unwrap(), b"patched");

        let mut vfs = VirtualFileSystem::new();
        vfs.add_disk_dir("/", &lower, true);
        vfs.add_disk_dir_hidden("/", &upper, true, vec!["/secret".to_string()]);

        // the upper copy is hidden, the lower one shows through
        assert_eq!(vfs.read("/secret/data.bin").unwrap(), b"old");
    }

    #[test]
    fn test_delga_container_read_and_search() {
        let base = tempdir().unwrap();
        let delga = base.path().join("demo.delga");
        make_zip(
            &delga,
            &[
                ("demo.degame", b"<degame/>" as &[u8]),
                ("content/models/a.demodel", b"m"),
                ("content/textures/b.deimg", b"t"),
            ],
        );

        let mut vfs = VirtualFileSystem::new();
        vfs.add_delga("/", &delga, Vec::new());

        assert_eq!(vfs.file_type("/demo.degame"), Some(FileType::Regular));
        assert_eq!(vfs.file_type("/content/models"), Some(FileType::Directory));
        assert_eq!(vfs.read("/demo.degame").unwrap(), b"<degame/>");

        let found = vfs.search_files("/", &["*.degame"]);
        assert_eq!(found, vec!["/demo.degame".to_string()]);

        assert!(!vfs.can_write("/demo.degame"));
    }

    #[test]
    fn test_mount_points_surface_as_directories() {
        let base = tempdir().unwrap();
        let config = base.path().join("config");
        fs::create_dir_all(&config).unwrap();

        let mut vfs = VirtualFileSystem::new();
        vfs.add_disk_dir("/config/user", &config, false);

        assert_eq!(vfs.file_type("/config/user"), Some(FileType::Directory));
        assert_eq!(vfs.file_type("/config"), Some(FileType::Directory));
        let root = vfs.list_dir("/");
        assert!(root.iter().any(|(name, t)| name == "config" && *t == FileType::Directory));
    }

    #[test]
    fn test_recursive_search_across_directories() {
        let base = tempdir().unwrap();
        let games = base.path().join("games");
        write_file(&games.join("a/one.degame"), b"1");
        write_file(&games.join("b/nested/two.delga"), b"2");
        write_file(&games.join("b/readme.txt"), b"3");

        let mut vfs = VirtualFileSystem::new();
        vfs.add_disk_dir("/", &games, true);

        let mut found = vfs.search_files("/", &["*.degame", "*.delga"]);
        found.sort();
        assert_eq!(
            found,
            vec!["/a/one.degame".to_string(), "/b/nested/two.delga".to_string()]
        );
    }
}
