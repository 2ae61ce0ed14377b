//! configfs-gadget - declarative USB gadget trees for Linux configfs
//!
//! A gadget, its configurations and functions are compiled into an ordered
//! list of filesystem steps (mkdir, attribute writes, symlinks). Removal is
//! derived from the same list by inverting each step and reversing the
//! order, so directories are removed only after everything inside them.

pub mod config;
pub mod error;
pub mod otg;

pub use error::{GadgetError, Result};
