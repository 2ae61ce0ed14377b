//! Declarative filesystem steps
//!
//! A gadget tree is compiled into a flat [`Steps`] sequence before anything
//! touches the filesystem. Each component compiles its own steps relative to
//! its own directory; the caller relocates them with [`Steps::prepend_path`]
//! and concatenates them in order. Teardown is derived from the same
//! sequence with [`Steps::teardown`].

use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::configfs::{join_path, Filesystem};
use crate::error::{GadgetError, Result};

/// One filesystem action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Noop,
    /// Marker carried through the plan for readability; never touches disk
    Comment(String),
    /// Create a directory and missing parents; succeeds if it exists
    Mkdir(PathBuf),
    /// Create a directory; fails with `AlreadyExists` if it exists
    MkdirCreateOnly(PathBuf),
    Rmdir(PathBuf),
    /// Write a text attribute. An empty value is a no-op.
    Write { path: PathBuf, value: String },
    /// Write a binary attribute. An empty value is a no-op.
    WriteBinary { path: PathBuf, value: Vec<u8> },
    /// Remove a single file, empty directory or symlink
    Remove(PathBuf),
    /// Create `link` pointing at `target`
    Symlink { target: PathBuf, link: PathBuf },
}

impl Step {
    pub fn comment(text: impl Into<String>) -> Self {
        Step::Comment(text.into())
    }

    pub fn mkdir(path: impl Into<PathBuf>) -> Self {
        Step::Mkdir(path.into())
    }

    pub fn mkdir_create_only(path: impl Into<PathBuf>) -> Self {
        Step::MkdirCreateOnly(path.into())
    }

    pub fn rmdir(path: impl Into<PathBuf>) -> Self {
        Step::Rmdir(path.into())
    }

    pub fn write(path: impl Into<PathBuf>, value: impl Into<String>) -> Self {
        Step::Write {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn write_binary(path: impl Into<PathBuf>, value: impl Into<Vec<u8>>) -> Self {
        Step::WriteBinary {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn remove(path: impl Into<PathBuf>) -> Self {
        Step::Remove(path.into())
    }

    pub fn symlink(target: impl Into<PathBuf>, link: impl Into<PathBuf>) -> Self {
        Step::Symlink {
            target: target.into(),
            link: link.into(),
        }
    }

    /// Execute this step
    ///
    /// Removing a path that is already gone counts as success.
    pub fn run<F: Filesystem + ?Sized>(&self, fs: &F) -> Result<()> {
        match self {
            Step::Noop => Ok(()),
            Step::Comment(text) => {
                debug!("# {}", text);
                Ok(())
            }
            Step::Mkdir(path) => fs.create_dir_all(path),
            Step::MkdirCreateOnly(path) => {
                if fs.exists(path) {
                    return Err(GadgetError::AlreadyExists(path.display().to_string()));
                }
                fs.create_dir(path)
            }
            Step::Rmdir(path) => {
                if fs.exists(path) {
                    fs.remove_dir(path)?;
                }
                Ok(())
            }
            Step::Write { path, value } => {
                if value.is_empty() {
                    return Ok(());
                }
                fs.write_text(path, value)
            }
            Step::WriteBinary { path, value } => {
                if value.is_empty() {
                    return Ok(());
                }
                fs.write_bytes(path, value)
            }
            Step::Remove(path) => {
                if fs.exists(path) {
                    fs.remove(path)?;
                }
                Ok(())
            }
            Step::Symlink { target, link } => fs.symlink(target, link),
        }
    }

    /// Relocate this step under `base`
    ///
    /// Symlink targets are left as compiled: only the link location moves.
    pub fn prepend_path(&self, base: &Path) -> Step {
        match self {
            Step::Noop | Step::Comment(_) => self.clone(),
            Step::Mkdir(path) => Step::Mkdir(join_path(base, path)),
            Step::MkdirCreateOnly(path) => Step::MkdirCreateOnly(join_path(base, path)),
            Step::Rmdir(path) => Step::Rmdir(join_path(base, path)),
            Step::Write { path, value } => Step::Write {
                path: join_path(base, path),
                value: value.clone(),
            },
            Step::WriteBinary { path, value } => Step::WriteBinary {
                path: join_path(base, path),
                value: value.clone(),
            },
            Step::Remove(path) => Step::Remove(join_path(base, path)),
            Step::Symlink { target, link } => Step::Symlink {
                target: target.clone(),
                link: join_path(base, link),
            },
        }
    }

    /// The step reverting this one
    ///
    /// Writes are not tracked, so they invert to `Noop`.
    pub fn undo(&self) -> Step {
        match self {
            Step::Mkdir(path) | Step::MkdirCreateOnly(path) => Step::Rmdir(path.clone()),
            Step::Symlink { link, .. } => Step::Remove(link.clone()),
            _ => Step::Noop,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Noop => write!(f, "noop"),
            Step::Comment(text) => write!(f, "# {}", text),
            Step::Mkdir(path) => write!(f, "mkdir -p {}", path.display()),
            Step::MkdirCreateOnly(path) => write!(f, "mkdir {}", path.display()),
            Step::Rmdir(path) => write!(f, "rmdir {}", path.display()),
            Step::Write { path, value } => write!(f, "write {} = {:?}", path.display(), value),
            Step::WriteBinary { path, value } => {
                write!(f, "write {} <{} bytes>", path.display(), value.len())
            }
            Step::Remove(path) => write!(f, "rm {}", path.display()),
            Step::Symlink { target, link } => {
                write!(f, "ln -s {} {}", target.display(), link.display())
            }
        }
    }
}

/// Ordered sequence of steps
///
/// Order is significant: later steps rely on directories made by earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Steps(Vec<Step>);

impl Steps {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add one step at the end
    pub fn append(&mut self, step: Step) -> &mut Self {
        self.0.push(step);
        self
    }

    /// Add all of `more` at the end, keeping their order
    pub fn extend(&mut self, more: Steps) -> &mut Self {
        self.0.extend(more.0);
        self
    }

    /// Relocate every step under `base`
    pub fn prepend_path(self, base: impl AsRef<Path>) -> Steps {
        let base = base.as_ref();
        self.0.iter().map(|s| s.prepend_path(base)).collect()
    }

    /// Invert each step in place order
    pub fn undo(&self) -> Steps {
        self.0.iter().map(Step::undo).collect()
    }

    /// Same steps, last first
    pub fn reverse(&self) -> Steps {
        self.0.iter().rev().cloned().collect()
    }

    /// Steps removing what this sequence creates, children before parents
    pub fn teardown(&self) -> Steps {
        self.undo().reverse()
    }

    /// Execute all steps in order
    ///
    /// Stops at the first failure. Steps already executed are not rolled back.
    pub fn run<F: Filesystem + ?Sized>(&self, fs: &F) -> Result<()> {
        debug!("Running {} steps", self.0.len());
        for (index, step) in self.0.iter().enumerate() {
            trace!("step {}: {}", index, step);
            step.run(fs).map_err(|e| GadgetError::Step {
                index,
                step: step.to_string(),
                source: Box::new(e),
            })?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> Vec<Step> {
        self.0
    }
}

impl Deref for Steps {
    type Target = [Step];

    fn deref(&self) -> &[Step] {
        &self.0
    }
}

impl From<Vec<Step>> for Steps {
    fn from(steps: Vec<Step>) -> Self {
        Self(steps)
    }
}

impl FromIterator<Step> for Steps {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Steps {
    type Item = Step;
    type IntoIter = std::vec::IntoIter<Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Steps {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Steps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, step) in self.0.iter().enumerate() {
            writeln!(f, "{:3}  {}", index, step)?;
        }
        Ok(())
    }
}
