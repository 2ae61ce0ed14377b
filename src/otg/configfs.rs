//! ConfigFS primitives for USB Gadget trees

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{GadgetError, Result};

/// ConfigFS base path for USB gadgets
pub const CONFIGFS_PATH: &str = "/sys/kernel/config/usb_gadget";

/// Class directory listing the USB Device Controllers
pub const UDC_CLASS_PATH: &str = "/sys/class/udc";

/// English (US) string table
pub const LANG_ENGLISH: &str = "0x409";

/// Filesystem primitives a step sequence executes against
///
/// Paths are absolute by the time they reach an implementation. `exists`
/// uses lstat semantics so dangling symlinks count as present.
pub trait Filesystem {
    /// Create a directory and any missing parents
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Create a single directory, failing if it exists
    fn create_dir(&self, path: &Path) -> Result<()>;

    /// Remove an empty directory
    fn remove_dir(&self, path: &Path) -> Result<()>;

    /// Remove one path: attribute file, empty directory or symlink
    fn remove(&self, path: &Path) -> Result<()>;

    /// Write a text attribute
    fn write_text(&self, path: &Path, content: &str) -> Result<()>;

    /// Write a binary attribute
    fn write_bytes(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Create `link` pointing at `target`
    fn symlink(&self, target: &Path, link: &Path) -> Result<()>;

    /// Read a text attribute, trimmed
    fn read_text(&self, path: &Path) -> Result<String>;

    /// Read a symlink target
    fn read_link(&self, path: &Path) -> Result<PathBuf>;

    fn exists(&self, path: &Path) -> bool;
}

/// The host filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFs;

impl Filesystem for HostFs {
    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| GadgetError::io("mkdir", path, e))
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                GadgetError::AlreadyExists(path.display().to_string())
            } else {
                GadgetError::io("mkdir", path, e)
            }
        })
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        fs::remove_dir(path).map_err(|e| GadgetError::io("rmdir", path, e))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path).map_err(|e| GadgetError::io("remove", path, e))?;
        let removed = if meta.is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
        removed.map_err(|e| GadgetError::io("remove", path, e))
    }

    fn write_text(&self, path: &Path, content: &str) -> Result<()> {
        write_file(path, content)
    }

    fn write_bytes(&self, path: &Path, data: &[u8]) -> Result<()> {
        write_bytes(path, data)
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        std::os::unix::fs::symlink(target, link).map_err(|e| GadgetError::io("symlink", link, e))
    }

    fn read_text(&self, path: &Path) -> Result<String> {
        read_file(path)
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        fs::read_link(path).map_err(|e| GadgetError::io("readlink", path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }
}

/// List available UDCs (USB Device Controllers), sorted by name
///
/// A missing class directory means the host has no controllers.
pub fn list_udcs(class_path: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(class_path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(GadgetError::io("readdir", class_path, e)),
    };

    let mut udcs: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    udcs.sort();
    Ok(udcs)
}

/// Write string content to an attribute file
///
/// configfs and sysfs attributes take the whole value in a single write()
/// syscall, so the buffer (including the trailing newline) is built first.
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    // No O_TRUNC: some attributes reject it. Regular files fall back to create.
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .or_else(|e| {
            if path.exists() {
                Err(e)
            } else {
                File::create(path)
            }
        })
        .map_err(|e| GadgetError::io("open", path, e))?;

    let data: std::borrow::Cow<[u8]> = if content.ends_with('\n') {
        content.as_bytes().into()
    } else {
        let mut buf = content.as_bytes().to_vec();
        buf.push(b'\n');
        buf.into()
    };

    file.write_all(&data)
        .map_err(|e| GadgetError::io("write", path, e))?;
    file.flush().map_err(|e| GadgetError::io("flush", path, e))?;

    Ok(())
}

/// Write binary content to an attribute file
pub fn write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| GadgetError::io("create", path, e))?;

    file.write_all(data)
        .map_err(|e| GadgetError::io("write", path, e))?;

    Ok(())
}

/// Read string content from an attribute file
pub fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| GadgetError::io("read", path, e))
}

/// Join `rel` under `base`, treating an empty `rel` as `base` itself
pub(crate) fn join_path(base: &Path, rel: &Path) -> PathBuf {
    if rel.as_os_str().is_empty() {
        base.to_path_buf()
    } else if base.as_os_str().is_empty() {
        rel.to_path_buf()
    } else {
        base.join(rel)
    }
}
