//! In-memory ConfigFS emulation
//!
//! Models the parts of configfs behavior the step engine depends on:
//! - attribute files disappear together with their directory
//! - the kernel pre-creates default groups (`configs`, `functions`, `strings`
//!   in a gadget, `strings` in a config, `lun.0` in a mass storage function)
//! - `rmdir` refuses while user-created subdirectories or symlinks remain,
//!   and refuses outright on a default group
//! - a symlink target must exist when the link is made

use std::collections::BTreeMap;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::configfs::Filesystem;
use crate::error::{GadgetError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    /// `default` marks a kernel-created group
    Dir { default: bool },
    File(Vec<u8>),
    Link(PathBuf),
}

/// In-memory configfs rooted at a gadget base path
#[derive(Debug)]
pub struct MemFs {
    root: PathBuf,
    nodes: Mutex<BTreeMap<PathBuf, Node>>,
}

impl MemFs {
    /// Create an emulated configfs whose gadget directory is `root`
    /// (the equivalent of `/sys/kernel/config/usb_gadget`)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let nodes: BTreeMap<PathBuf, Node> = root
            .ancestors()
            .map(|p| (p.to_path_buf(), Node::Dir { default: false }))
            .collect();
        Self { root, nodes: Mutex::new(nodes) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_dir(&self, path: &Path) -> bool {
        matches!(self.nodes.lock().get(path), Some(Node::Dir { .. }))
    }

    pub fn is_symlink(&self, path: &Path) -> bool {
        matches!(self.nodes.lock().get(path), Some(Node::Link(_)))
    }

    /// All paths strictly below `path`, sorted
    pub fn paths_under(&self, path: &Path) -> Vec<PathBuf> {
        self.nodes
            .lock()
            .keys()
            .filter(|k| k.starts_with(path) && k.as_path() != path)
            .cloned()
            .collect()
    }

    /// Default groups the kernel creates alongside a new directory
    fn default_groups(&self, path: &Path) -> &'static [&'static str] {
        let Some(parent) = path.parent() else {
            return &[];
        };
        if parent == self.root {
            return &["configs", "functions", "strings"];
        }

        let in_gadget = |kind: &str| {
            parent.file_name().is_some_and(|n| n == kind)
                && parent.parent().and_then(Path::parent) == Some(self.root.as_path())
        };
        if in_gadget("configs") {
            return &["strings"];
        }
        let is_msd = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("mass_storage."));
        if in_gadget("functions") && is_msd {
            return &["lun.0"];
        }
        &[]
    }

    fn mkdir_locked(&self, nodes: &mut BTreeMap<PathBuf, Node>, path: &Path) -> Result<()> {
        if nodes.contains_key(path) {
            return Err(GadgetError::AlreadyExists(path.display().to_string()));
        }
        require_dir(nodes, path.parent(), "mkdir", path)?;

        nodes.insert(path.to_path_buf(), Node::Dir { default: false });
        for group in self.default_groups(path) {
            nodes.insert(path.join(group), Node::Dir { default: true });
        }
        Ok(())
    }
}

/// Absolute path a link at `link` points to
fn link_target(link: &Path, target: &Path) -> PathBuf {
    match link.parent() {
        Some(parent) if target.is_relative() => parent.join(target),
        _ => target.to_path_buf(),
    }
}

fn io_error(op: &'static str, path: &Path, kind: ErrorKind) -> GadgetError {
    GadgetError::io(op, path, Error::from(kind))
}

fn not_a_directory() -> Error {
    Error::new(ErrorKind::Other, "not a directory")
}

fn not_an_attribute() -> Error {
    Error::new(ErrorKind::Other, "not an attribute")
}

fn require_dir(
    nodes: &BTreeMap<PathBuf, Node>,
    dir: Option<&Path>,
    op: &'static str,
    path: &Path,
) -> Result<()> {
    match dir.and_then(|d| nodes.get(d)) {
        Some(Node::Dir { .. }) => Ok(()),
        Some(_) => Err(GadgetError::io(op, path, not_a_directory())),
        None => Err(io_error(op, path, ErrorKind::NotFound)),
    }
}

impl Filesystem for MemFs {
    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut nodes = self.nodes.lock();
        let missing: Vec<&Path> = path
            .ancestors()
            .take_while(|p| !nodes.contains_key(*p))
            .collect();
        if let Some(existing) = path.ancestors().nth(missing.len()) {
            require_dir(&nodes, Some(existing), "mkdir", path)?;
        }
        for dir in missing.into_iter().rev() {
            // Made just now as a default group of its parent
            if nodes.contains_key(dir) {
                continue;
            }
            self.mkdir_locked(&mut nodes, dir)?;
        }
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        let mut nodes = self.nodes.lock();
        self.mkdir_locked(&mut nodes, path)
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        let mut nodes = self.nodes.lock();
        match nodes.get(path) {
            Some(Node::Dir { default: false }) => {}
            Some(Node::Dir { default: true }) => {
                return Err(io_error("rmdir", path, ErrorKind::PermissionDenied));
            }
            Some(_) => {
                return Err(GadgetError::io("rmdir", path, not_a_directory()));
            }
            None => return Err(io_error("rmdir", path, ErrorKind::NotFound)),
        }

        let below: Vec<PathBuf> = nodes
            .iter()
            .filter(|(k, _)| k.starts_with(path) && k.as_path() != path)
            .map(|(k, _)| k.clone())
            .collect();
        let busy = below.iter().any(|k| {
            matches!(nodes.get(k), Some(Node::Link(_)) | Some(Node::Dir { default: false }))
        });
        if busy {
            return Err(io_error("rmdir", path, ErrorKind::DirectoryNotEmpty));
        }

        // A config link holds its target function in place
        let pinned = nodes.iter().any(|(k, node)| match node {
            Node::Link(target) => !k.starts_with(path) && link_target(k, target).starts_with(path),
            _ => false,
        });
        if pinned {
            return Err(io_error("rmdir", path, ErrorKind::ResourceBusy));
        }

        for k in below {
            nodes.remove(&k);
        }
        nodes.remove(path);
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let node = self.nodes.lock().get(path).cloned();
        match node {
            Some(Node::Dir { .. }) => self.remove_dir(path),
            Some(Node::Link(_)) => {
                self.nodes.lock().remove(path);
                Ok(())
            }
            // Attribute files belong to their directory
            Some(Node::File(_)) => Err(io_error("remove", path, ErrorKind::PermissionDenied)),
            None => Err(io_error("remove", path, ErrorKind::NotFound)),
        }
    }

    fn write_text(&self, path: &Path, content: &str) -> Result<()> {
        self.write_bytes(path, content.as_bytes())
    }

    fn write_bytes(&self, path: &Path, data: &[u8]) -> Result<()> {
        let mut nodes = self.nodes.lock();
        require_dir(&nodes, path.parent(), "write", path)?;
        if matches!(nodes.get(path), Some(Node::Dir { .. }) | Some(Node::Link(_))) {
            return Err(GadgetError::io("write", path, not_an_attribute()));
        }
        nodes.insert(path.to_path_buf(), Node::File(data.to_vec()));
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        let mut nodes = self.nodes.lock();
        require_dir(&nodes, link.parent(), "symlink", link)?;
        if nodes.contains_key(link) {
            return Err(io_error("symlink", link, ErrorKind::AlreadyExists));
        }

        if !matches!(nodes.get(&link_target(link, target)), Some(Node::Dir { .. })) {
            return Err(io_error("symlink", target, ErrorKind::NotFound));
        }

        nodes.insert(link.to_path_buf(), Node::Link(target.to_path_buf()));
        Ok(())
    }

    fn read_text(&self, path: &Path) -> Result<String> {
        match self.nodes.lock().get(path) {
            Some(Node::File(data)) => Ok(String::from_utf8_lossy(data).trim().to_string()),
            Some(_) => Err(GadgetError::io("read", path, not_an_attribute())),
            None => Err(io_error("read", path, ErrorKind::NotFound)),
        }
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        match self.nodes.lock().get(path) {
            Some(Node::Link(target)) => Ok(target.clone()),
            Some(_) => Err(io_error("readlink", path, ErrorKind::InvalidInput)),
            None => Err(io_error("readlink", path, ErrorKind::NotFound)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.nodes.lock().contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_kind(err: &GadgetError) -> Option<ErrorKind> {
        match err.root_cause() {
            GadgetError::Io { source, .. } => Some(source.kind()),
            _ => None,
        }
    }

    #[test]
    fn test_gadget_default_groups() {
        let fs = MemFs::new("/cfg");
        fs.create_dir_all(Path::new("/cfg/g0")).unwrap();
        assert!(fs.is_dir(Path::new("/cfg/g0/configs")));
        assert!(fs.is_dir(Path::new("/cfg/g0/functions")));
        assert!(fs.is_dir(Path::new("/cfg/g0/strings")));

        fs.create_dir_all(Path::new("/cfg/g0/configs/c.1")).unwrap();
        assert!(fs.is_dir(Path::new("/cfg/g0/configs/c.1/strings")));

        fs.create_dir_all(Path::new("/cfg/g0/functions/mass_storage.usb0")).unwrap();
        assert!(fs.is_dir(Path::new("/cfg/g0/functions/mass_storage.usb0/lun.0")));
        fs.create_dir_all(Path::new("/cfg/g0/functions/hid.usb0")).unwrap();
        assert!(fs.paths_under(Path::new("/cfg/g0/functions/hid.usb0")).is_empty());
    }

    #[test]
    fn test_rmdir_drops_attributes() {
        let fs = MemFs::new("/cfg");
        let func = Path::new("/cfg/g0/functions/hid.kbd");
        fs.create_dir_all(func).unwrap();
        fs.write_text(&func.join("protocol"), "1").unwrap();
        fs.write_bytes(&func.join("report_desc"), &[0x05, 0x01]).unwrap();

        fs.remove_dir(func).unwrap();
        assert!(!fs.exists(&func.join("protocol")));
        assert!(!fs.exists(func));
    }

    #[test]
    fn test_rmdir_refuses_user_children() {
        let fs = MemFs::new("/cfg");
        fs.create_dir_all(Path::new("/cfg/g0/strings/0x409")).unwrap();

        let err = fs.remove_dir(Path::new("/cfg/g0")).unwrap_err();
        assert_eq!(io_kind(&err), Some(ErrorKind::DirectoryNotEmpty));

        let err = fs.remove_dir(Path::new("/cfg/g0/strings")).unwrap_err();
        assert_eq!(io_kind(&err), Some(ErrorKind::PermissionDenied));

        fs.remove_dir(Path::new("/cfg/g0/strings/0x409")).unwrap();
        fs.remove_dir(Path::new("/cfg/g0")).unwrap();
        assert!(fs.paths_under(Path::new("/cfg")).is_empty());
    }

    #[test]
    fn test_symlink_requires_target() {
        let fs = MemFs::new("/cfg");
        fs.create_dir_all(Path::new("/cfg/g0/configs/c.1")).unwrap();

        let link = Path::new("/cfg/g0/configs/c.1/hid.kbd");
        let target = Path::new("/cfg/g0/functions/hid.kbd");
        let err = fs.symlink(target, link).unwrap_err();
        assert!(err.is_not_found());

        fs.create_dir_all(target).unwrap();
        fs.symlink(target, link).unwrap();
        assert!(fs.is_symlink(link));
        assert_eq!(fs.read_link(link).unwrap(), target);

        let err = fs.remove_dir(Path::new("/cfg/g0/configs/c.1")).unwrap_err();
        assert_eq!(io_kind(&err), Some(ErrorKind::DirectoryNotEmpty));
    }

    #[test]
    fn test_link_pins_target() {
        let fs = MemFs::new("/cfg");
        let target = Path::new("/cfg/g0/functions/hid.kbd");
        let link = Path::new("/cfg/g0/configs/c.1/hid.kbd");
        fs.create_dir_all(Path::new("/cfg/g0/configs/c.1")).unwrap();
        fs.create_dir_all(target).unwrap();
        fs.symlink(target, link).unwrap();

        let err = fs.remove_dir(target).unwrap_err();
        assert_eq!(io_kind(&err), Some(ErrorKind::ResourceBusy));

        fs.remove(link).unwrap();
        fs.remove_dir(target).unwrap();
        assert!(!fs.exists(target));
    }

    #[test]
    fn test_write_needs_parent() {
        let fs = MemFs::new("/cfg");
        let err = fs.write_text(Path::new("/cfg/g0/idVendor"), "0x1d6b").unwrap_err();
        assert!(err.is_not_found());

        fs.create_dir_all(Path::new("/cfg/g0")).unwrap();
        fs.write_text(Path::new("/cfg/g0/idVendor"), "0x1d6b").unwrap();
        assert_eq!(fs.read_text(Path::new("/cfg/g0/idVendor")).unwrap(), "0x1d6b");
    }
}
