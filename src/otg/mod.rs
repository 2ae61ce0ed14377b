//! USB Gadget configuration through configfs
//!
//! A [`Gadget`] model is compiled into a flat [`Steps`] sequence of
//! filesystem actions, which is then executed against a [`Filesystem`].
//!
//! Architecture:
//! ```text
//! GadgetManager (lifecycle, bind/unbind, incremental add/remove)
//!     └── Gadget ── Config ── Function (HidFunction | MassStorageFunction)
//!             │ create_steps()
//!             ▼
//!          Steps ── run() ──▶ Filesystem (HostFs | MemFs)
//! ```

pub mod configfs;
pub mod function;
pub mod gadget;
pub mod hid;
pub mod manager;
pub mod memfs;
pub mod msd;
pub mod report_desc;
pub mod step;

pub use configfs::{list_udcs, Filesystem, HostFs};
pub use function::{Function, FunctionKind, FunctionMeta, GadgetFunction};
pub use gadget::{Config, Gadget, GadgetStrings};
pub use hid::{HidAttributes, HidFunction, HidFunctionType};
pub use manager::GadgetManager;
pub use memfs::MemFs;
pub use msd::{LunAttributes, MassStorageFunction, MsdLun, MsdLunConfig};
pub use report_desc::{KEYBOARD, MOUSE_ABSOLUTE, MOUSE_RELATIVE};
pub use step::{Step, Steps};
